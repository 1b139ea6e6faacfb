//! Domain layer for the chat synchronization core.
//!
//! This module contains the chat data model, the pure channel naming scheme,
//! and the ports (REST api, realtime transport) that the infrastructure
//! layer implements. Services depend on the ports, never on the adapters.

pub mod api;
pub mod channel;
pub mod error;
pub mod model;
pub mod transport;

pub use api::ChatApi;
pub use error::{ApiError, TokenExchangeError, TransportError};
pub use model::{
    ChatMessage, ChatRoom, ChatType, LastMessage, MessagePage, MessageType, MilestoneNotification,
    MilestoneStatus, NewMilestone, OtherParty, RealtimeToken, RoomFilter, RoomStatus, SenderType,
    TypingEvent, TypingState, UserIdentity, UserRole,
};
pub use transport::{
    ConnectionStatus, EventHandler, ListenerId, RealtimeChannel, RealtimeConnection,
    RealtimeConnector, StateListener, TokenSource, TransportOptions, TransportState,
};
