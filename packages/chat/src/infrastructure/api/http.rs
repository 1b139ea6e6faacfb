//! reqwest adapter for the `ChatApi` port.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};

use crate::domain::api::ChatApi;
use crate::domain::error::ApiError;
use crate::domain::model::{
    ChatMessage, ChatRoom, MessagePage, MessageType, MilestoneNotification, MilestoneStatus,
    NewMilestone, RealtimeToken, RoomFilter,
};
use crate::infrastructure::dto::http::{
    ApiErrorBody, ChatHistoryResponse, RealtimeTokenResponse, SendMessageRequest,
    UpdateMilestoneStatusRequest,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client for the marketplace REST backend.
pub struct HttpChatApi {
    base_url: String,
    client: Client,
}

impl HttpChatApi {
    /// Create a client for the backend at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Map transport-level reqwest failures to `ApiError`.
fn request_error(err: reqwest::Error) -> ApiError {
    ApiError::Network(err.to_string())
}

/// Check the status and extract the structured error message on 4xx/5xx.
async fn into_api_result(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .json::<ApiErrorBody>()
        .await
        .ok()
        .and_then(|body| body.message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    Err(ApiError::Status {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    response
        .json::<T>()
        .await
        .map_err(|err| ApiError::Decode(err.to_string()))
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_chat_rooms(
        &self,
        token: &str,
        filter: RoomFilter,
    ) -> Result<Vec<ChatRoom>, ApiError> {
        let response = self
            .client
            .get(self.url("/api/chat/rooms"))
            .query(&[("filter", filter.query_value())])
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;
        decode(into_api_result(response).await?).await
    }

    async fn fetch_chat_history(
        &self,
        token: &str,
        chat_room_id: i64,
        page: u32,
        size: u32,
    ) -> Result<MessagePage, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/api/chat/rooms/{chat_room_id}/messages")))
            .query(&[("page", page), ("size", size)])
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;
        let history: ChatHistoryResponse = decode(into_api_result(response).await?).await?;
        Ok(history.into())
    }

    async fn send_message(
        &self,
        token: &str,
        chat_room_id: i64,
        content: &str,
    ) -> Result<ChatMessage, ApiError> {
        let request = SendMessageRequest {
            content,
            message_type: MessageType::Text,
        };
        let response = self
            .client
            .post(self.url(&format!("/api/chat/rooms/{chat_room_id}/messages")))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;
        decode(into_api_result(response).await?).await
    }

    async fn mark_as_read(&self, token: &str, chat_room_id: i64) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/api/chat/rooms/{chat_room_id}/read")))
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;
        into_api_result(response).await?;
        Ok(())
    }

    async fn issue_realtime_token(&self, token: &str) -> Result<RealtimeToken, ApiError> {
        let response = self
            .client
            .post(self.url("/api/realtime/token"))
            .bearer_auth(token)
            .send()
            .await
            .map_err(request_error)?;
        let body: RealtimeTokenResponse = decode(into_api_result(response).await?).await?;
        Ok(body.into())
    }

    async fn create_milestone(&self, token: &str, milestone: NewMilestone) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/api/milestones"))
            .bearer_auth(token)
            .json(&milestone)
            .send()
            .await
            .map_err(request_error)?;
        into_api_result(response).await?;
        Ok(())
    }

    async fn update_milestone_status(
        &self,
        token: &str,
        milestone_id: i64,
        status: MilestoneStatus,
    ) -> Result<(), ApiError> {
        let request = UpdateMilestoneStatusRequest { status };
        let response = self
            .client
            .post(self.url(&format!("/api/milestones/{milestone_id}/status")))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(request_error)?;
        into_api_result(response).await?;
        Ok(())
    }

    async fn send_milestone_notification(
        &self,
        token: &str,
        chat_room_id: i64,
        notification: MilestoneNotification,
    ) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!(
                "/api/chat/rooms/{chat_room_id}/milestone-notification"
            )))
            .bearer_auth(token)
            .json(&notification)
            .send()
            .await
            .map_err(request_error)?;
        into_api_result(response).await?;
        Ok(())
    }
}
