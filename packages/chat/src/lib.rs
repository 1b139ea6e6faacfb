//! Realtime chat synchronization core for the Kakehashi marketplace client.
//!
//! This library owns the client-side chat plumbing that sits between the UI
//! and two external collaborators: the marketplace REST backend and the
//! realtime pub/sub transport. It provides:
//!
//! - a process-wide [`RealtimeConnectionManager`] holding the single shared
//!   realtime connection with single-flighted token refresh,
//! - a per-conversation [`ChatSessionController`] reconciling paginated
//!   history, live pushes, and optimistic sends,
//! - a [`TypingPresenceController`] for ephemeral typing indicators,
//! - a [`ChatRoomPollingService`] collapsing many UI subscribers into one
//!   room-list refresh cadence, feeding the shared [`RoomListStore`].

pub mod domain;
pub mod infrastructure;
pub mod service;
pub mod state;
pub mod util;

// Re-export entry points
pub use service::connection::RealtimeConnectionManager;
pub use service::polling::{ChatRoomPollingService, PollConfig, PollSubscriber, Visibility};
pub use service::session::{ChatSessionController, SessionParams, SessionPhase, SessionSnapshot};
pub use service::typing::TypingPresenceController;
pub use state::RoomListStore;
