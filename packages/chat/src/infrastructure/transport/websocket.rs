//! WebSocket adapter for the realtime transport port.
//!
//! Wire protocol, JSON text frames both ways:
//!
//! - client → server: `{"action": "subscribe", "channel": "..."}` and
//!   `{"action": "publish", "channel": "...", "event": "...", "data": ...}`
//! - server → client: `{"channel": "...", "event": "...", "data": ...}`
//!
//! The adapter owns the reconnection policy the application layer delegates
//! to: a fresh token is requested before every attempt, retries wait
//! `disconnected_retry` until `suspend_after` consecutive failures, then
//! `suspended_retry`. All acquired channels are re-announced after a
//! reconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::domain::error::TransportError;
use crate::domain::transport::{
    EventHandler, ListenerId, RealtimeChannel, RealtimeConnection, RealtimeConnector,
    StateListener, TokenSource, TransportOptions, TransportState,
};

#[derive(Debug, Serialize)]
struct ClientFrame {
    action: &'static str,
    channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

impl ClientFrame {
    fn subscribe(channel: &str) -> Self {
        Self {
            action: "subscribe",
            channel: channel.to_string(),
            event: None,
            data: None,
        }
    }

    fn publish(channel: &str, event: &str, data: serde_json::Value) -> Self {
        Self {
            action: "publish",
            channel: channel.to_string(),
            event: Some(event.to_string()),
            data: Some(data),
        }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct ServerFrame {
    channel: String,
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

enum ConnCommand {
    Send(ClientFrame),
    Reconnect,
    Close,
}

/// Shared connection state cell: current state plus last error.
type StateCell = Mutex<(TransportState, Option<String>)>;

/// Connector for a WebSocket-based realtime service.
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// `url` is the WebSocket endpoint, e.g. `wss://realtime.example.com/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl RealtimeConnector for WebSocketConnector {
    async fn connect(
        &self,
        tokens: Arc<dyn TokenSource>,
        options: &TransportOptions,
    ) -> Result<Arc<dyn RealtimeConnection>, TransportError> {
        let connection = WebSocketConnection::new(self.url.clone(), tokens, options.clone());
        tokio::spawn(WebSocketConnection::run(connection.clone()));
        Ok(connection)
    }
}

pub struct WebSocketConnection {
    url: String,
    tokens: Arc<dyn TokenSource>,
    options: TransportOptions,
    state: Arc<StateCell>,
    state_listener: Mutex<Option<StateListener>>,
    channels: Mutex<HashMap<String, Arc<WsChannel>>>,
    command_tx: mpsc::UnboundedSender<ConnCommand>,
    command_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnCommand>>>,
}

impl WebSocketConnection {
    fn new(url: String, tokens: Arc<dyn TokenSource>, options: TransportOptions) -> Arc<Self> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            url,
            tokens,
            options,
            state: Arc::new(Mutex::new((TransportState::Initialized, None))),
            state_listener: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
        })
    }

    fn set_state(&self, state: TransportState, error: Option<String>) {
        {
            let mut cell = self.state.lock().unwrap();
            *cell = (state, error.clone());
        }
        tracing::debug!("realtime transport state: {state:?}");
        let listener = self.state_listener.lock().unwrap();
        if let Some(callback) = listener.as_ref() {
            callback(state, error);
        }
    }

    fn channel_names(&self) -> Vec<String> {
        self.channels.lock().unwrap().keys().cloned().collect()
    }

    fn dispatch(&self, text: &str) {
        let frame: ServerFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::debug!("ignoring malformed realtime frame: {err}");
                return;
            }
        };
        let channel = self.channels.lock().unwrap().get(&frame.channel).cloned();
        if let Some(channel) = channel {
            channel.emit(&frame.event, frame.data);
        }
    }

    async fn run(self: Arc<Self>) {
        let mut command_rx = match self.command_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };
        let mut attempts: u32 = 0;
        loop {
            self.set_state(TransportState::Connecting, None);
            let token = match self.tokens.request_token().await {
                Ok(token) => token,
                Err(err) => {
                    // Token provider failure is absorbed here; the retry
                    // policy below owns backoff.
                    tracing::warn!("realtime token request failed: {err}");
                    self.set_state(TransportState::Disconnected, Some(err.to_string()));
                    attempts += 1;
                    if !self.wait_before_retry(&mut command_rx, attempts).await {
                        return;
                    }
                    continue;
                }
            };

            let ws_url = format!("{}?token={}", self.url, token.token);
            let stream = match connect_async(ws_url.as_str()).await {
                Ok((stream, _)) => stream,
                Err(err) => {
                    tracing::warn!("realtime connect failed: {err}");
                    self.set_state(TransportState::Disconnected, Some(err.to_string()));
                    attempts += 1;
                    if !self.wait_before_retry(&mut command_rx, attempts).await {
                        return;
                    }
                    continue;
                }
            };

            attempts = 0;
            self.set_state(TransportState::Connected, None);
            let (mut write, mut read) = stream.split();

            // Re-announce every channel acquired so far.
            for name in self.channel_names() {
                let frame = ClientFrame::subscribe(&name);
                if write.send(Message::text(frame.to_json())).await.is_err() {
                    break;
                }
            }

            let mut closing = false;
            loop {
                tokio::select! {
                    command = command_rx.recv() => match command {
                        Some(ConnCommand::Send(frame)) => {
                            if write.send(Message::text(frame.to_json())).await.is_err() {
                                break;
                            }
                        }
                        Some(ConnCommand::Reconnect) => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                        Some(ConnCommand::Close) | None => {
                            closing = true;
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    message = read.next() => match message {
                        Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            tracing::warn!("realtime socket error: {err}");
                            break;
                        }
                    },
                }
            }

            if closing {
                self.set_state(TransportState::Closed, None);
                return;
            }
            self.set_state(
                TransportState::Disconnected,
                Some("connection lost".to_string()),
            );
            attempts += 1;
            if !self.wait_before_retry(&mut command_rx, attempts).await {
                return;
            }
        }
    }

    /// Wait out the retry delay while still honoring close/reconnect
    /// commands. Returns false when the connection was closed.
    async fn wait_before_retry(
        &self,
        command_rx: &mut mpsc::UnboundedReceiver<ConnCommand>,
        attempts: u32,
    ) -> bool {
        let delay = if attempts >= self.options.suspend_after {
            let error = self.last_error();
            self.set_state(TransportState::Suspended, error);
            self.options.suspended_retry
        } else {
            self.options.disconnected_retry
        };
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = command_rx.recv() => match command {
                    Some(ConnCommand::Reconnect) => return true,
                    Some(ConnCommand::Close) | None => {
                        self.set_state(TransportState::Closed, None);
                        return false;
                    }
                    // Publishes while offline are dropped.
                    Some(ConnCommand::Send(_)) => {}
                },
            }
        }
    }
}

#[async_trait]
impl RealtimeConnection for WebSocketConnection {
    fn state(&self) -> TransportState {
        self.state.lock().unwrap().0
    }

    fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().1.clone()
    }

    fn channel(&self, name: &str) -> Arc<dyn RealtimeChannel> {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.get(name) {
            return channel.clone();
        }
        let channel = Arc::new(WsChannel {
            name: name.to_string(),
            state: self.state.clone(),
            command_tx: self.command_tx.clone(),
            listeners: Mutex::new(HashMap::new()),
            next_listener: AtomicU64::new(1),
        });
        channels.insert(name.to_string(), channel.clone());
        drop(channels);
        if self.state() == TransportState::Connected {
            let _ = self
                .command_tx
                .send(ConnCommand::Send(ClientFrame::subscribe(name)));
        }
        channel
    }

    fn set_state_listener(&self, listener: StateListener) {
        *self.state_listener.lock().unwrap() = Some(listener);
    }

    fn reconnect(&self) {
        let _ = self.command_tx.send(ConnCommand::Reconnect);
    }

    async fn close(&self) {
        let _ = self.command_tx.send(ConnCommand::Close);
    }
}

struct WsChannel {
    name: String,
    state: Arc<StateCell>,
    command_tx: mpsc::UnboundedSender<ConnCommand>,
    listeners: Mutex<HashMap<ListenerId, (String, EventHandler)>>,
    next_listener: AtomicU64,
}

impl WsChannel {
    fn emit(&self, event: &str, data: serde_json::Value) {
        let handlers: Vec<EventHandler> = {
            let listeners = self.listeners.lock().unwrap();
            listeners
                .values()
                .filter(|(wanted, _)| wanted == event)
                .map(|(_, handler)| handler.clone())
                .collect()
        };
        for handler in handlers {
            handler(data.clone());
        }
    }
}

#[async_trait]
impl RealtimeChannel for WsChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &str, data: serde_json::Value) -> Result<(), TransportError> {
        if self.state.lock().unwrap().0 != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.command_tx
            .send(ConnCommand::Send(ClientFrame::publish(
                &self.name, event, data,
            )))
            .map_err(|_| TransportError::Publish("connection task stopped".to_string()))
    }

    fn subscribe(&self, event: &str, handler: EventHandler) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .insert(id, (event.to_string(), handler));
        id
    }

    fn unsubscribe(&self, listener: ListenerId) {
        self.listeners.lock().unwrap().remove(&listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::TokenExchangeError;
    use crate::domain::model::RealtimeToken;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct StaticTokens {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for StaticTokens {
        async fn request_token(&self) -> Result<RealtimeToken, TokenExchangeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RealtimeToken {
                token: "test-token".to_string(),
                expires_at: None,
            })
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[test]
    fn test_client_frame_serialization() {
        // テスト項目: クライアントフレームがプロトコル通りの JSON になる
        let subscribe = ClientFrame::subscribe("chat:bid:1");
        let json: serde_json::Value = serde_json::from_str(&subscribe.to_json()).unwrap();
        assert_eq!(json["action"], "subscribe");
        assert_eq!(json["channel"], "chat:bid:1");
        assert!(json.get("event").is_none());

        let publish = ClientFrame::publish("chat:bid:1", "message", serde_json::json!({"id": 1}));
        let json: serde_json::Value = serde_json::from_str(&publish.to_json()).unwrap();
        assert_eq!(json["action"], "publish");
        assert_eq!(json["event"], "message");
        assert_eq!(json["data"]["id"], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_connects_subscribes_and_receives_events() {
        // テスト項目: 接続・購読・イベント受信が一往復で動作する
        // given (前提条件): subscribe を受けたらイベントを1つ返すサーバ
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    if text.as_str().contains("subscribe") {
                        let frame = serde_json::json!({
                            "channel": "chat:bid:1",
                            "event": "message",
                            "data": {"hello": "world"},
                        });
                        ws.send(Message::text(frame.to_string())).await.unwrap();
                    }
                }
            }
        });

        // when (操作): コネクタで接続してチャンネルを購読する
        let connector = WebSocketConnector::new(format!("ws://{addr}/ws"));
        let tokens = Arc::new(StaticTokens {
            calls: AtomicUsize::new(0),
        });
        let connection = connector
            .connect(tokens.clone(), &TransportOptions::default())
            .await
            .unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let channel = connection.channel("chat:bid:1");
        channel.subscribe(
            "message",
            Arc::new(move |data| {
                sink.lock().unwrap().push(data);
            }),
        );

        // then (期待する結果): 接続が確立し、イベントがハンドラに届く
        wait_for(|| connection.state() == TransportState::Connected).await;
        wait_for(|| !received.lock().unwrap().is_empty()).await;
        let events = received.lock().unwrap();
        assert_eq!(events[0]["hello"], "world");
        assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_moves_state_to_closed() {
        // テスト項目: close で状態が closed になり再接続しない
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        });

        let connector = WebSocketConnector::new(format!("ws://{addr}/ws"));
        let tokens = Arc::new(StaticTokens {
            calls: AtomicUsize::new(0),
        });
        let connection = connector
            .connect(tokens, &TransportOptions::default())
            .await
            .unwrap();
        wait_for(|| connection.state() == TransportState::Connected).await;

        connection.close().await;
        wait_for(|| connection.state() == TransportState::Closed).await;
    }
}
