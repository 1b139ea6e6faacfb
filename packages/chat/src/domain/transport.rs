//! Realtime transport port.
//!
//! The third-party realtime messaging service is an external collaborator;
//! this module specifies the interface the synchronization core needs from
//! it: a connection with observable state, named pub/sub channels, and an
//! auth callback that exchanges the session token for a transport token.
//! Adapters live in `infrastructure::transport`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::error::{TokenExchangeError, TransportError};
use super::model::RealtimeToken;

/// Identifier of a registered channel listener, used to detach it.
pub type ListenerId = u64;

/// Handler invoked with the JSON payload of a received channel event.
pub type EventHandler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Listener invoked on every transport state transition.
pub type StateListener = Box<dyn Fn(TransportState, Option<String>) + Send + Sync>;

/// Lifecycle states of the underlying transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Initialized,
    Connecting,
    Connected,
    Disconnected,
    Suspended,
    Failed,
    Closed,
}

/// Connection status as exposed to the application layer.
///
/// Exactly one of the four accessors is true for every state:
/// `Initialized` counts as connecting, and `Disconnected`, `Closed` and
/// `Suspended` all count as disconnected.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: TransportState,
    pub error: Option<String>,
}

impl ConnectionStatus {
    pub fn new(state: TransportState, error: Option<String>) -> Self {
        Self { state, error }
    }

    /// Status before any connection has been established.
    pub fn initial() -> Self {
        Self::new(TransportState::Initialized, None)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, TransportState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self.state,
            TransportState::Initialized | TransportState::Connecting
        )
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.state,
            TransportState::Disconnected | TransportState::Closed | TransportState::Suspended
        )
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, TransportState::Failed)
    }
}

/// Retry configuration for the transport's built-in reconnection policy.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Wait between reconnect attempts while disconnected.
    pub disconnected_retry: Duration,
    /// Wait between reconnect attempts once suspended.
    pub suspended_retry: Duration,
    /// Consecutive failed attempts before the connection is considered
    /// suspended.
    pub suspend_after: u32,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            disconnected_retry: Duration::from_secs(15),
            suspended_retry: Duration::from_secs(30),
            suspend_after: 5,
        }
    }
}

/// Auth callback the transport invokes whenever it needs a token (initial
/// connect and every reconnect). Failures are surfaced to the transport,
/// which applies its own retry policy; they are never thrown to callers.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn request_token(&self) -> Result<RealtimeToken, TokenExchangeError>;
}

/// A named pub/sub channel on an active connection.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Publish an event on this channel.
    async fn publish(&self, event: &str, data: serde_json::Value) -> Result<(), TransportError>;

    /// Register a handler for an event; returns an id for detaching.
    fn subscribe(&self, event: &str, handler: EventHandler) -> ListenerId;

    /// Detach a handler. Synchronous; no events are delivered afterwards.
    fn unsubscribe(&self, listener: ListenerId);
}

/// An established (or establishing) connection to the realtime service.
#[async_trait]
pub trait RealtimeConnection: Send + Sync {
    fn state(&self) -> TransportState;

    fn last_error(&self) -> Option<String>;

    /// Get or create the channel with the given name.
    fn channel(&self, name: &str) -> Arc<dyn RealtimeChannel>;

    /// Install the single state listener (the connection manager). Replaces
    /// any previous listener.
    fn set_state_listener(&self, listener: StateListener);

    /// Ask the transport to drop the current socket and reconnect now.
    fn reconnect(&self);

    /// Close the connection for good; the state becomes `Closed`.
    async fn close(&self);
}

/// Factory for connections; implemented per concrete transport.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(
        &self,
        tokens: Arc<dyn TokenSource>,
        options: &TransportOptions,
    ) -> Result<Arc<dyn RealtimeConnection>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_one_status_flag_per_state() {
        // テスト項目: どの状態でも 4 つのフラグのうちちょうど 1 つが true になる
        let states = [
            TransportState::Initialized,
            TransportState::Connecting,
            TransportState::Connected,
            TransportState::Disconnected,
            TransportState::Suspended,
            TransportState::Failed,
            TransportState::Closed,
        ];
        for state in states {
            let status = ConnectionStatus::new(state, None);
            let flags = [
                status.is_connected(),
                status.is_connecting(),
                status.is_disconnected(),
                status.is_failed(),
            ];
            let set = flags.iter().filter(|f| **f).count();
            assert_eq!(set, 1, "state {state:?} sets {set} flags");
        }
    }

    #[test]
    fn test_disconnected_and_closed_map_to_is_disconnected() {
        // テスト項目: disconnected と closed はどちらも isDisconnected になる
        assert!(ConnectionStatus::new(TransportState::Disconnected, None).is_disconnected());
        assert!(ConnectionStatus::new(TransportState::Closed, None).is_disconnected());
    }
}
