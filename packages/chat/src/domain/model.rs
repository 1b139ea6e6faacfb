//! Core data model for the chat synchronization core.
//!
//! All wire-facing structs serialize with camelCase field names because the
//! marketplace backend and the realtime payloads both speak camelCase JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of conversation a chat room belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChatType {
    BidNegotiation,
    Contract,
}

impl ChatType {
    /// Stable segment used when deriving realtime channel names.
    pub fn channel_segment(&self) -> &'static str {
        match self {
            ChatType::BidNegotiation => "bid",
            ChatType::Contract => "contract",
        }
    }
}

/// Which side of the marketplace sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderType {
    Client,
    Freelancer,
}

/// Lifecycle status of a chat room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomStatus {
    Active,
    Completed,
    Archived,
}

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    Text,
    Milestone,
    System,
}

/// The counterpart of the local user in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtherParty {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub party_type: SenderType,
}

/// Compact preview of the latest message in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_type: SenderType,
}

/// A chat room as reported by the room-list endpoint.
///
/// Room lists are replaced wholesale on every successful fetch; only
/// `unread_count` and `last_message` are mutated in place between fetches
/// (by read-receipt and new-message events).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: i64,
    pub chat_type: ChatType,
    pub reference_id: i64,
    pub other_party: OtherParty,
    pub last_message: Option<LastMessage>,
    pub unread_count: u32,
    pub status: RoomStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single chat message.
///
/// Messages with a negative id and `is_pending == true` are client-origin
/// optimistic entries awaiting server confirmation. `is_pending` never goes
/// over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: i64,
    pub chat_room_id: i64,
    pub sender_type: SenderType,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub is_pending: bool,
}

/// One page of chat history, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct MessagePage {
    pub content: Vec<ChatMessage>,
    pub total_pages: u32,
}

/// Scope of a room-list fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomFilter {
    Active,
    All,
}

impl RoomFilter {
    pub fn query_value(&self) -> &'static str {
        match self {
            RoomFilter::Active => "active",
            RoomFilter::All => "all",
        }
    }
}

/// Payload of a `typing:start` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub user_id: i64,
    pub user_name: String,
}

/// Ephemeral per-conversation typing indicator state. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypingState {
    pub is_typing: bool,
    pub typing_user: Option<String>,
}

/// Short-lived token for the realtime transport, issued by the backend in
/// exchange for the session bearer token.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Role of the locally signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserRole {
    Client,
    Freelancer,
}

impl UserRole {
    pub fn sender_type(&self) -> SenderType {
        match self {
            UserRole::Client => SenderType::Client,
            UserRole::Freelancer => SenderType::Freelancer,
        }
    }
}

/// Identity of the locally signed-in user, used to stamp optimistic sends
/// and to filter out self-originated typing events.
#[derive(Debug, Clone, PartialEq)]
pub struct UserIdentity {
    pub user_id: i64,
    pub user_name: String,
    pub role: UserRole,
}

/// Status of a contract milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Submitted,
    Approved,
    Rejected,
}

/// Request body for creating a contract milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMilestone {
    pub contract_id: i64,
    pub title: String,
    pub amount: i64,
    pub due_date: Option<DateTime<Utc>>,
}

/// Chat-linked milestone notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneNotification {
    pub milestone_id: i64,
    pub title: String,
    pub status: MilestoneStatus,
}
