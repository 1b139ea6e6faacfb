//! Domain layer error definitions.

use thiserror::Error;

/// Errors from the REST backend.
///
/// These are caught at the calling service boundary and converted to a
/// user-facing string; they are never retried automatically.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response at all (connection refused, timeout, DNS failure)
    #[error("network error: {0}")]
    Network(String),

    /// The backend answered with a 4xx/5xx and a structured body
    #[error("request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// The backend answered 2xx but the body did not parse
    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// Token endpoint failure.
///
/// Displays a deliberately generic message; the original cause is logged at
/// the exchange site and never shown to the user.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("failed to authenticate with the realtime service")]
pub struct TokenExchangeError;

/// Errors from the realtime transport.
///
/// Connection-level failures are reported through connection-status
/// callbacks, never thrown to callers; these variants cover the direct
/// channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("realtime transport is not connected")]
    NotConnected,

    #[error("realtime connect failed: {0}")]
    Connect(String),

    #[error("realtime publish failed: {0}")]
    Publish(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_exchange_error_message_is_generic() {
        // テスト項目: トークン交換エラーは詳細を含まない汎用メッセージになる
        let err = TokenExchangeError;
        assert_eq!(
            err.to_string(),
            "failed to authenticate with the realtime service"
        );
    }

    #[test]
    fn test_api_error_status_display() {
        // テスト項目: HTTP エラーがステータスとメッセージを表示する
        let err = ApiError::Status {
            status: 404,
            message: "chat room not found".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "request failed with status 404: chat room not found"
        );
    }
}
