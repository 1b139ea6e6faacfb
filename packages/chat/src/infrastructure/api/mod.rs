//! REST backend adapters.

pub mod http;

pub use http::HttpChatApi;
