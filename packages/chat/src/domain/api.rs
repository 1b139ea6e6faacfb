//! REST backend port.
//!
//! Services depend on this trait, never on a concrete HTTP client
//! (dependency inversion, mirroring the repository seam of the domain
//! layer). The reqwest adapter lives in `infrastructure::api`.

use async_trait::async_trait;

use super::error::ApiError;
use super::model::{
    ChatMessage, ChatRoom, MessagePage, MilestoneNotification, MilestoneStatus, NewMilestone,
    RealtimeToken, RoomFilter,
};

/// Port to the marketplace REST backend.
///
/// Every call carries the session bearer token of the signed-in user.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Fetch the room list, scoped to active rooms or all rooms.
    async fn fetch_chat_rooms(
        &self,
        token: &str,
        filter: RoomFilter,
    ) -> Result<Vec<ChatRoom>, ApiError>;

    /// Fetch one page of chat history, newest first.
    async fn fetch_chat_history(
        &self,
        token: &str,
        chat_room_id: i64,
        page: u32,
        size: u32,
    ) -> Result<MessagePage, ApiError>;

    /// Send a message; returns the stored message with its server-assigned id.
    async fn send_message(
        &self,
        token: &str,
        chat_room_id: i64,
        content: &str,
    ) -> Result<ChatMessage, ApiError>;

    /// Mark every message in a room as read.
    async fn mark_as_read(&self, token: &str, chat_room_id: i64) -> Result<(), ApiError>;

    /// Exchange the session token for a short-lived realtime-transport token.
    async fn issue_realtime_token(&self, token: &str) -> Result<RealtimeToken, ApiError>;

    /// Create a contract milestone. Thin passthrough.
    async fn create_milestone(&self, token: &str, milestone: NewMilestone) -> Result<(), ApiError>;

    /// Update a milestone's status. Thin passthrough.
    async fn update_milestone_status(
        &self,
        token: &str,
        milestone_id: i64,
        status: MilestoneStatus,
    ) -> Result<(), ApiError>;

    /// Push a milestone notification into a chat room. Thin passthrough.
    async fn send_milestone_notification(
        &self,
        token: &str,
        chat_room_id: i64,
        notification: MilestoneNotification,
    ) -> Result<(), ApiError>;
}
