//! Shared utilities for the Kakehashi workspace.
//!
//! Logging bootstrap and timestamp helpers used by both the chat
//! synchronization library and the CLI client.

pub mod logger;
pub mod time;

pub use logger::init_logger;
pub use time::{now_millis, now_utc};
