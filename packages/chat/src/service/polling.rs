//! Centralized chat-room polling service.
//!
//! Many independently-mounted widgets want "refresh the room list
//! periodically"; this service collapses them into a single timer and a
//! single fetch per tick. Subscribers never start their own timers. The
//! effective interval is the minimum applicable interval (visible vs
//! hidden, by page visibility) across all current subscribers, recomputed
//! on every subscribe/unsubscribe and visibility change.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::api::ChatApi;
use crate::domain::model::{ChatRoom, RoomFilter};
use crate::state::RoomListStore;

pub type UpdateCallback = Arc<dyn Fn(&[ChatRoom]) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Page visibility as reported by the embedding UI shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Visible,
    Hidden,
}

/// Per-subscriber polling configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Desired interval while the page is in the foreground.
    pub visible_interval: Duration,
    /// Desired interval while the page is in the background.
    pub hidden_interval: Duration,
    /// Room-list scope this subscriber needs.
    pub fetch_type: RoomFilter,
}

/// One mounted widget's registration. Created on mount, removed on unmount.
pub struct PollSubscriber {
    pub id: String,
    pub config: PollConfig,
    pub on_update: UpdateCallback,
    pub on_error: ErrorCallback,
}

impl PollSubscriber {
    pub fn new(
        id: impl Into<String>,
        config: PollConfig,
        on_update: impl Fn(&[ChatRoom]) + Send + Sync + 'static,
        on_error: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            config,
            on_update: Arc::new(on_update),
            on_error: Arc::new(on_error),
        }
    }

    /// Fresh unique subscriber id for callers without a natural key.
    pub fn generated_id() -> String {
        Uuid::new_v4().to_string()
    }
}

struct TimerState {
    handle: Option<JoinHandle<()>>,
    interval: Option<Duration>,
}

pub struct ChatRoomPollingService {
    api: Arc<dyn ChatApi>,
    auth_token: Mutex<Option<String>>,
    store: Mutex<Arc<RoomListStore>>,
    subscribers: Mutex<HashMap<String, PollSubscriber>>,
    visibility: Mutex<Visibility>,
    timer: Mutex<TimerState>,
    weak_self: Weak<Self>,
}

impl ChatRoomPollingService {
    pub fn new(api: Arc<dyn ChatApi>, store: Arc<RoomListStore>) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            api,
            auth_token: Mutex::new(None),
            store: Mutex::new(store),
            subscribers: Mutex::new(HashMap::new()),
            visibility: Mutex::new(Visibility::Visible),
            timer: Mutex::new(TimerState {
                handle: None,
                interval: None,
            }),
            weak_self: weak_self.clone(),
        })
    }

    /// Swap the auth token without disturbing subscribers or the timer.
    pub fn set_auth_token(&self, token: Option<String>) {
        *self.auth_token.lock().unwrap() = token;
    }

    /// Swap the dispatch target without disturbing subscribers or the timer.
    pub fn set_store(&self, store: Arc<RoomListStore>) {
        *self.store.lock().unwrap() = store;
    }

    /// Register a subscriber; an existing registration with the same id is
    /// replaced in place.
    pub fn subscribe(&self, subscriber: PollSubscriber) {
        self.subscribers
            .lock()
            .unwrap()
            .insert(subscriber.id.clone(), subscriber);
        self.reschedule();
    }

    /// Remove a subscriber; with none left the timer stops entirely.
    pub fn unsubscribe(&self, id: &str) {
        self.subscribers.lock().unwrap().remove(id);
        self.reschedule();
    }

    /// Report a page-visibility change.
    pub fn set_visibility(&self, visibility: Visibility) {
        {
            let mut current = self.visibility.lock().unwrap();
            if *current == visibility {
                return;
            }
            *current = visibility;
        }
        self.reschedule();
    }

    /// Minimum applicable interval across subscribers; `None` with no
    /// subscribers.
    pub fn effective_interval(&self) -> Option<Duration> {
        let visibility = *self.visibility.lock().unwrap();
        let subscribers = self.subscribers.lock().unwrap();
        subscribers
            .values()
            .map(|subscriber| match visibility {
                Visibility::Visible => subscriber.config.visible_interval,
                Visibility::Hidden => subscriber.config.hidden_interval,
            })
            .min()
    }

    /// Run one refresh immediately (user-invoked retry).
    pub async fn refresh_now(&self) {
        self.tick().await;
    }

    fn reschedule(&self) {
        let interval = self.effective_interval();
        let mut timer = self.timer.lock().unwrap();
        match interval {
            None => {
                timer.interval = None;
                if let Some(handle) = timer.handle.take() {
                    handle.abort();
                }
            }
            Some(interval_value) => {
                if timer.interval == Some(interval_value) && timer.handle.is_some() {
                    return;
                }
                if let Some(handle) = timer.handle.take() {
                    handle.abort();
                }
                timer.interval = Some(interval_value);
                let service = self.weak_self.clone();
                timer.handle = Some(tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(interval_value).await;
                        match service.upgrade() {
                            Some(service) => service.tick().await,
                            None => return,
                        }
                    }
                }));
            }
        }
    }

    /// One poll cycle: exactly one backend fetch regardless of subscriber
    /// count, fanned out to every subscriber and committed to the store.
    async fn tick(&self) {
        let token = self.auth_token.lock().unwrap().clone();
        let Some(token) = token else {
            tracing::debug!("room-list poll skipped: no auth token");
            return;
        };
        let filter = {
            let subscribers = self.subscribers.lock().unwrap();
            if subscribers
                .values()
                .any(|subscriber| subscriber.config.fetch_type == RoomFilter::All)
            {
                RoomFilter::All
            } else {
                RoomFilter::Active
            }
        };

        match self.api.fetch_chat_rooms(&token, filter).await {
            Ok(rooms) => {
                let store = self.store.lock().unwrap().clone();
                store.replace_all(rooms.clone());
                let callbacks: Vec<UpdateCallback> = {
                    let subscribers = self.subscribers.lock().unwrap();
                    subscribers
                        .values()
                        .map(|subscriber| subscriber.on_update.clone())
                        .collect()
                };
                for callback in callbacks {
                    callback(&rooms);
                }
            }
            Err(err) => {
                let message = err.to_string();
                tracing::warn!("room-list poll failed: {message}");
                let callbacks: Vec<ErrorCallback> = {
                    let subscribers = self.subscribers.lock().unwrap();
                    subscribers
                        .values()
                        .map(|subscriber| subscriber.on_error.clone())
                        .collect()
                };
                for callback in callbacks {
                    callback(&message);
                }
            }
        }
    }
}
