//! Realtime connection manager.
//!
//! Owns the single shared connection to the realtime transport for the
//! whole process. Lazily connects on first `initialize`, exchanges the
//! session token for transport tokens with a single-flighted refresh, and
//! fans connection-status changes out to registered listeners. Retry and
//! backoff belong to the transport; this service only observes state.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};

use crate::domain::api::ChatApi;
use crate::domain::error::TokenExchangeError;
use crate::domain::model::RealtimeToken;
use crate::domain::transport::{
    ConnectionStatus, ListenerId, RealtimeChannel, RealtimeConnection, RealtimeConnector,
    TokenSource, TransportOptions, TransportState,
};

type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;
type TokenFuture = Shared<BoxFuture<'static, Result<RealtimeToken, TokenExchangeError>>>;

struct TokenFlight {
    id: u64,
    future: TokenFuture,
}

struct ManagerInner {
    session_token: Option<String>,
    connection: Option<Arc<dyn RealtimeConnection>>,
    initializing: bool,
}

pub struct RealtimeConnectionManager {
    api: Arc<dyn ChatApi>,
    connector: Arc<dyn RealtimeConnector>,
    options: TransportOptions,
    inner: Mutex<ManagerInner>,
    listeners: Mutex<HashMap<ListenerId, StatusCallback>>,
    next_listener_id: AtomicU64,
    token_flight: Mutex<Option<TokenFlight>>,
    flight_seq: AtomicU64,
    weak_self: Weak<Self>,
}

impl RealtimeConnectionManager {
    pub fn new(
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn RealtimeConnector>,
        options: TransportOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            api,
            connector,
            options,
            inner: Mutex::new(ManagerInner {
                session_token: None,
                connection: None,
                initializing: false,
            }),
            listeners: Mutex::new(HashMap::new()),
            next_listener_id: AtomicU64::new(1),
            token_flight: Mutex::new(None),
            flight_seq: AtomicU64::new(1),
            weak_self: weak_self.clone(),
        })
    }

    /// Establish the shared connection. Idempotent: once a connection
    /// exists (or is being created) this is a no-op.
    ///
    /// Connection failures are never returned here; they surface through
    /// the status listeners.
    pub async fn initialize(&self, session_token: &str) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.connection.is_some() || inner.initializing {
                return;
            }
            inner.initializing = true;
            inner.session_token = Some(session_token.to_string());
        }

        let tokens: Arc<dyn TokenSource> = Arc::new(ManagedTokenSource {
            manager: self.weak_self.clone(),
        });
        match self.connector.connect(tokens, &self.options).await {
            Ok(connection) => {
                let manager = self.weak_self.clone();
                connection.set_state_listener(Box::new(move |state, error| {
                    if let Some(manager) = manager.upgrade() {
                        manager.fan_out(ConnectionStatus::new(state, error));
                    }
                }));
                let current = ConnectionStatus::new(connection.state(), connection.last_error());
                {
                    let mut inner = self.inner.lock().unwrap();
                    inner.connection = Some(connection);
                    inner.initializing = false;
                }
                self.fan_out(current);
            }
            Err(err) => {
                tracing::error!("realtime connect failed: {err}");
                self.inner.lock().unwrap().initializing = false;
                self.fan_out(ConnectionStatus::new(
                    TransportState::Failed,
                    Some(err.to_string()),
                ));
            }
        }
    }

    /// Handle to a named channel, or `None` while the connection is not
    /// yet ready. "Not ready" is not an error; callers try again later.
    pub fn channel(&self, name: &str) -> Option<Arc<dyn RealtimeChannel>> {
        self.inner
            .lock()
            .unwrap()
            .connection
            .as_ref()
            .map(|connection| connection.channel(name))
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        match self.inner.lock().unwrap().connection.as_ref() {
            Some(connection) => {
                ConnectionStatus::new(connection.state(), connection.last_error())
            }
            None => ConnectionStatus::initial(),
        }
    }

    /// Register a status listener. The current status is replayed to the
    /// new listener immediately; the returned id detaches it.
    pub fn on_status_change(
        &self,
        callback: impl Fn(ConnectionStatus) + Send + Sync + 'static,
    ) -> ListenerId {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let callback: StatusCallback = Arc::new(callback);
        self.listeners.lock().unwrap().insert(id, callback.clone());
        invoke_isolated(&callback, self.status());
        id
    }

    /// Detach a status listener.
    pub fn off_status_change(&self, id: ListenerId) {
        self.listeners.lock().unwrap().remove(&id);
    }

    /// Ask the transport to reconnect now (manual control).
    pub fn reconnect(&self) {
        if let Some(connection) = self.inner.lock().unwrap().connection.as_ref() {
            connection.reconnect();
        }
    }

    /// Tear the connection down, drop every status listener, and reset the
    /// initialization state so a later `initialize` starts fresh.
    pub async fn disconnect(&self) {
        let connection = {
            let mut inner = self.inner.lock().unwrap();
            inner.session_token = None;
            inner.initializing = false;
            inner.connection.take()
        };
        self.listeners.lock().unwrap().clear();
        self.token_flight.lock().unwrap().take();
        if let Some(connection) = connection {
            connection.close().await;
        }
    }

    /// Exchange the session token for a realtime token, single-flighted:
    /// concurrent callers share one in-flight backend call and all receive
    /// its result.
    pub async fn refresh_token(&self) -> Result<RealtimeToken, TokenExchangeError> {
        let (id, future) = {
            let mut flight = self.token_flight.lock().unwrap();
            match flight.as_ref() {
                Some(in_flight) => (in_flight.id, in_flight.future.clone()),
                None => {
                    let api = self.api.clone();
                    let session_token = self.inner.lock().unwrap().session_token.clone();
                    let id = self.flight_seq.fetch_add(1, Ordering::Relaxed);
                    let future: TokenFuture = async move {
                        let session_token = session_token.ok_or(TokenExchangeError)?;
                        api.issue_realtime_token(&session_token).await.map_err(|err| {
                            tracing::error!("realtime token exchange failed: {err}");
                            TokenExchangeError
                        })
                    }
                    .boxed()
                    .shared();
                    *flight = Some(TokenFlight {
                        id,
                        future: future.clone(),
                    });
                    (id, future)
                }
            }
        };

        let result = future.await;

        let mut flight = self.token_flight.lock().unwrap();
        if flight.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *flight = None;
        }
        result
    }

    fn fan_out(&self, status: ConnectionStatus) {
        let callbacks: Vec<StatusCallback> =
            self.listeners.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            invoke_isolated(&callback, status.clone());
        }
    }
}

/// Invoke one status callback, isolating a panic so the remaining
/// listeners still receive the status.
fn invoke_isolated(callback: &StatusCallback, status: ConnectionStatus) {
    let outcome = catch_unwind(AssertUnwindSafe(|| callback(status)));
    if outcome.is_err() {
        tracing::error!("connection status listener panicked");
    }
}

/// Auth callback handed to the transport: delegates to the manager's
/// single-flighted refresh.
struct ManagedTokenSource {
    manager: Weak<RealtimeConnectionManager>,
}

#[async_trait]
impl TokenSource for ManagedTokenSource {
    async fn request_token(&self) -> Result<RealtimeToken, TokenExchangeError> {
        match self.manager.upgrade() {
            Some(manager) => manager.refresh_token().await,
            None => Err(TokenExchangeError),
        }
    }
}
