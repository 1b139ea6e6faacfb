//! In-memory loopback implementation of the realtime transport port.
//!
//! Used by tests and the demo client. Publishes are recorded and delivered
//! to local subscribers of the same channel; test code can push simulated
//! remote events with [`InMemoryConnection::push`] and drive state
//! transitions with [`InMemoryConnection::set_state`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::domain::error::TransportError;
use crate::domain::transport::{
    EventHandler, ListenerId, RealtimeChannel, RealtimeConnection, RealtimeConnector,
    StateListener, TokenSource, TransportOptions, TransportState,
};

/// Connector handing out one shared in-memory connection.
pub struct InMemoryConnector {
    connection: Arc<InMemoryConnection>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self {
            connection: Arc::new(InMemoryConnection::new()),
        }
    }

    /// Handle to the shared connection, for pushing events and driving
    /// state transitions from test code.
    pub fn connection(&self) -> Arc<InMemoryConnection> {
        self.connection.clone()
    }
}

impl Default for InMemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RealtimeConnector for InMemoryConnector {
    async fn connect(
        &self,
        tokens: Arc<dyn TokenSource>,
        _options: &TransportOptions,
    ) -> Result<Arc<dyn RealtimeConnection>, TransportError> {
        // Exercise the auth callback exactly like a real transport would.
        match tokens.request_token().await {
            Ok(_) => self.connection.set_state(TransportState::Connected, None),
            Err(err) => self
                .connection
                .set_state(TransportState::Disconnected, Some(err.to_string())),
        }
        Ok(self.connection.clone())
    }
}

type PublishLog = Arc<Mutex<Vec<(String, String, serde_json::Value)>>>;

pub struct InMemoryConnection {
    state: Mutex<(TransportState, Option<String>)>,
    state_listener: Mutex<Option<StateListener>>,
    channels: Mutex<HashMap<String, Arc<InMemoryChannel>>>,
    published: PublishLog,
}

impl InMemoryConnection {
    fn new() -> Self {
        Self {
            state: Mutex::new((TransportState::Initialized, None)),
            state_listener: Mutex::new(None),
            channels: Mutex::new(HashMap::new()),
            published: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Force a state transition, firing the registered listener.
    pub fn set_state(&self, state: TransportState, error: Option<String>) {
        {
            let mut cell = self.state.lock().unwrap();
            *cell = (state, error.clone());
        }
        let listener = self.state_listener.lock().unwrap();
        if let Some(callback) = listener.as_ref() {
            callback(state, error);
        }
    }

    /// Deliver a simulated remote event to local subscribers.
    pub fn push(&self, channel: &str, event: &str, data: serde_json::Value) {
        let channel = self.channels.lock().unwrap().get(channel).cloned();
        if let Some(channel) = channel {
            channel.emit(event, data);
        }
    }

    /// Everything published locally, in order: (channel, event, data).
    pub fn published(&self) -> Vec<(String, String, serde_json::Value)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl RealtimeConnection for InMemoryConnection {
    fn state(&self) -> TransportState {
        self.state.lock().unwrap().0
    }

    fn last_error(&self) -> Option<String> {
        self.state.lock().unwrap().1.clone()
    }

    fn channel(&self, name: &str) -> Arc<dyn RealtimeChannel> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(InMemoryChannel {
                    name: name.to_string(),
                    listeners: Mutex::new(HashMap::new()),
                    next_listener: AtomicU64::new(1),
                    published: self.published.clone(),
                })
            })
            .clone()
    }

    fn set_state_listener(&self, listener: StateListener) {
        *self.state_listener.lock().unwrap() = Some(listener);
    }

    fn reconnect(&self) {
        self.set_state(TransportState::Connecting, None);
        self.set_state(TransportState::Connected, None);
    }

    async fn close(&self) {
        self.set_state(TransportState::Closed, None);
    }
}

struct InMemoryChannel {
    name: String,
    listeners: Mutex<HashMap<ListenerId, (String, EventHandler)>>,
    next_listener: AtomicU64,
    published: PublishLog,
}

impl InMemoryChannel {
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
impl RealtimeChannel for InMemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, event: &str, data: serde_json::Value) -> Result<(), TransportError> {
        self.published.lock().unwrap().push((
            self.name.clone(),
            event.to_string(),
            data.clone(),
        ));
        // Loopback delivery, so subscriber-side filtering (e.g. ignoring
        // one's own typing events) can be tested.
        self.emit(event, data);
        Ok(())
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
