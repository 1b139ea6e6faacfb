//! HTTP wire DTOs for the chat endpoints.

use serde::{Deserialize, Serialize};

use crate::domain::model::{ChatMessage, MessagePage, MessageType, MilestoneStatus, RealtimeToken};

/// Paged chat-history response: `GET /api/chat/rooms/{id}/messages`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryResponse {
    pub content: Vec<ChatMessage>,
    pub total_pages: u32,
}

impl From<ChatHistoryResponse> for MessagePage {
    fn from(response: ChatHistoryResponse) -> Self {
        MessagePage {
            content: response.content,
            total_pages: response.total_pages,
        }
    }
}

/// Send-message request body: `POST /api/chat/rooms/{id}/messages`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest<'a> {
    pub content: &'a str,
    pub message_type: MessageType,
}

/// Realtime-token response: `POST /api/realtime/token`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeTokenResponse {
    pub token: String,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<RealtimeTokenResponse> for RealtimeToken {
    fn from(response: RealtimeTokenResponse) -> Self {
        RealtimeToken {
            token: response.token,
            expires_at: response.expires_at,
        }
    }
}

/// Milestone status-update request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMilestoneStatusRequest {
    pub status: MilestoneStatus,
}

/// Structured error body returned by the backend on 4xx/5xx.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub message: Option<String>,
}
