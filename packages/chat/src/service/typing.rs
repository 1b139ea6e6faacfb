//! Typing presence controller.
//!
//! Tracks remote typing activity for one conversation with a self-expiring
//! indicator, and broadcasts local typing with a rate-limited publish.
//! Typing state is ephemeral and never persisted.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::channel;
use crate::domain::model::{ChatType, TypingEvent, TypingState, UserIdentity};
use crate::domain::transport::{ListenerId, RealtimeChannel};
use crate::service::connection::RealtimeConnectionManager;
use crate::util::debounce::Debouncer;

/// Remote indicators clear after this long without a new event.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(3);

/// Quiet period for coalescing local typing broadcasts.
pub const TYPING_DEBOUNCE: Duration = Duration::from_millis(500);

struct TypingInner {
    active: bool,
    typing: TypingState,
    channel_listener: Option<(Arc<dyn RealtimeChannel>, ListenerId)>,
}

pub struct TypingPresenceController {
    realtime: Arc<RealtimeConnectionManager>,
    identity: UserIdentity,
    channel_name: String,
    state: Mutex<TypingInner>,
    watch_tx: watch::Sender<TypingState>,
    debouncer: Debouncer,
    expiry: Mutex<Option<JoinHandle<()>>>,
    weak_self: Weak<Self>,
}

impl TypingPresenceController {
    pub fn new(
        realtime: Arc<RealtimeConnectionManager>,
        identity: UserIdentity,
        chat_type: ChatType,
        reference_id: i64,
    ) -> Arc<Self> {
        let channel_name =
            channel::typing_channel(&channel::message_channel(chat_type, reference_id));
        let (watch_tx, _) = watch::channel(TypingState::default());
        Arc::new_cyclic(|weak_self| Self {
            realtime,
            identity,
            channel_name,
            state: Mutex::new(TypingInner {
                active: false,
                typing: TypingState::default(),
                channel_listener: None,
            }),
            watch_tx,
            debouncer: Debouncer::new(TYPING_DEBOUNCE),
            expiry: Mutex::new(None),
            weak_self: weak_self.clone(),
        })
    }

    /// Subscribe to the conversation's typing channel.
    pub fn activate(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.active {
                return;
            }
            state.active = true;
        }
        let Some(typing_channel) = self.realtime.channel(&self.channel_name) else {
            tracing::debug!(
                "realtime connection not ready; no typing indicators for {}",
                self.channel_name
            );
            return;
        };
        let controller = self.weak_self.clone();
        let listener = typing_channel.subscribe(
            channel::TYPING_START_EVENT,
            Arc::new(move |data| {
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                match serde_json::from_value::<TypingEvent>(data) {
                    Ok(event) => controller.apply_remote_typing(event),
                    Err(err) => tracing::warn!("ignoring malformed typing event: {err}"),
                }
            }),
        );
        self.state.lock().unwrap().channel_listener = Some((typing_channel, listener));
    }

    /// Detach the channel listener and drop any pending timers.
    pub fn deactivate(&self) {
        let detached = {
            let mut state = self.state.lock().unwrap();
            state.active = false;
            state.typing = TypingState::default();
            state.channel_listener.take()
        };
        if let Some((typing_channel, listener)) = detached {
            typing_channel.unsubscribe(listener);
        }
        self.debouncer.cancel();
        if let Some(handle) = self.expiry.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Broadcast that the local user is typing. Rapid calls coalesce into
    /// one publish per quiet period (trailing edge). No-op while the
    /// connection is not ready.
    pub fn start_typing(&self) {
        let Some(typing_channel) = self.realtime.channel(&self.channel_name) else {
            return;
        };
        let event = TypingEvent {
            user_id: self.identity.user_id,
            user_name: self.identity.user_name.clone(),
        };
        self.debouncer.call(move || async move {
            let payload = match serde_json::to_value(&event) {
                Ok(payload) => payload,
                Err(_) => return,
            };
            if let Err(err) = typing_channel
                .publish(channel::TYPING_START_EVENT, payload)
                .await
            {
                tracing::debug!("typing broadcast dropped: {err}");
            }
        });
    }

    /// Intentionally a no-op: indicators expire only via the timeout.
    pub fn stop_typing(&self) {}

    /// Current typing state.
    pub fn typing_state(&self) -> TypingState {
        self.state.lock().unwrap().typing.clone()
    }

    /// Observe typing-state changes.
    pub fn watch(&self) -> watch::Receiver<TypingState> {
        self.watch_tx.subscribe()
    }

    fn apply_remote_typing(&self, event: TypingEvent) {
        if event.user_id == self.identity.user_id {
            // No self-notification.
            return;
        }
        {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            state.typing = TypingState {
                is_typing: true,
                typing_user: Some(event.user_name),
            };
        }
        self.publish();
        self.arm_expiry();
    }

    /// (Re-)arm the expiry timer; each received event restarts the window.
    fn arm_expiry(&self) {
        let controller = self.weak_self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(TYPING_EXPIRY).await;
            let Some(controller) = controller.upgrade() else {
                return;
            };
            {
                let mut state = controller.state.lock().unwrap();
                state.typing = TypingState::default();
            }
            controller.publish();
        });
        let mut expiry = self.expiry.lock().unwrap();
        if let Some(previous) = expiry.replace(handle) {
            previous.abort();
        }
    }

    fn publish(&self) {
        self.watch_tx.send_replace(self.typing_state());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::ChatApi;
    use crate::domain::error::ApiError;
    use crate::domain::model::{
        ChatMessage, ChatRoom, MessagePage, MilestoneNotification, MilestoneStatus, NewMilestone,
        RealtimeToken, RoomFilter, UserRole,
    };
    use crate::domain::transport::TransportOptions;
    use crate::infrastructure::transport::inmemory::{InMemoryConnection, InMemoryConnector};
    use async_trait::async_trait;

    struct TokenOnlyApi;

    #[async_trait]
    impl ChatApi for TokenOnlyApi {
        async fn fetch_chat_rooms(
            &self,
            _token: &str,
            _filter: RoomFilter,
        ) -> Result<Vec<ChatRoom>, ApiError> {
            unimplemented!("not used in these tests")
        }

        async fn fetch_chat_history(
            &self,
            _token: &str,
            _chat_room_id: i64,
            _page: u32,
            _size: u32,
        ) -> Result<MessagePage, ApiError> {
            unimplemented!("not used in these tests")
        }

        async fn send_message(
            &self,
            _token: &str,
            _chat_room_id: i64,
            _content: &str,
        ) -> Result<ChatMessage, ApiError> {
            unimplemented!("not used in these tests")
        }

        async fn mark_as_read(&self, _token: &str, _chat_room_id: i64) -> Result<(), ApiError> {
            unimplemented!("not used in these tests")
        }

        async fn issue_realtime_token(&self, _token: &str) -> Result<RealtimeToken, ApiError> {
            Ok(RealtimeToken {
                token: "rt".to_string(),
                expires_at: None,
            })
        }

        async fn create_milestone(
            &self,
            _token: &str,
            _milestone: NewMilestone,
        ) -> Result<(), ApiError> {
            unimplemented!("not used in these tests")
        }

        async fn update_milestone_status(
            &self,
            _token: &str,
            _milestone_id: i64,
            _status: MilestoneStatus,
        ) -> Result<(), ApiError> {
            unimplemented!("not used in these tests")
        }

        async fn send_milestone_notification(
            &self,
            _token: &str,
            _chat_room_id: i64,
            _notification: MilestoneNotification,
        ) -> Result<(), ApiError> {
            unimplemented!("not used in these tests")
        }
    }

    async fn make_controller() -> (Arc<TypingPresenceController>, Arc<InMemoryConnection>) {
        let connector = Arc::new(InMemoryConnector::new());
        let connection = connector.connection();
        let realtime = RealtimeConnectionManager::new(
            Arc::new(TokenOnlyApi),
            connector,
            TransportOptions::default(),
        );
        realtime.initialize("session").await;
        let controller = TypingPresenceController::new(
            realtime,
            UserIdentity {
                user_id: 1,
                user_name: "alice".to_string(),
                role: UserRole::Client,
            },
            ChatType::Contract,
            9,
        );
        controller.activate();
        (controller, connection)
    }

    fn typing_payload(user_id: i64, user_name: &str) -> serde_json::Value {
        serde_json::json!({"userId": user_id, "userName": user_name})
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_typing_sets_state_then_expires() {
        // テスト項目: 相手のタイピングで 3 秒間 isTyping になり、自動で消える
        // given (前提条件):
        let (controller, connection) = make_controller().await;

        // when (操作):
        connection.push("chat:contract:9:typing", "typing:start", typing_payload(2, "bob"));

        // then (期待する結果):
        let state = controller.typing_state();
        assert!(state.is_typing);
        assert_eq!(state.typing_user.as_deref(), Some("bob"));

        tokio::time::sleep(Duration::from_millis(3_100)).await;
        assert!(!controller.typing_state().is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_event_rearms_the_expiry_window() {
        // テスト項目: イベントごとにタイマーが再アームされる（累積ではない）
        let (controller, connection) = make_controller().await;

        connection.push("chat:contract:9:typing", "typing:start", typing_payload(2, "bob"));
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        connection.push("chat:contract:9:typing", "typing:start", typing_payload(2, "bob"));
        tokio::time::sleep(Duration::from_millis(2_000)).await;

        // 最初のイベントから 4 秒経過しているが、再アームによりまだ表示中
        assert!(controller.typing_state().is_typing);

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(!controller.typing_state().is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_typing_events_are_ignored() {
        // テスト項目: 自分の userId のイベントでは状態が変化しない
        let (controller, connection) = make_controller().await;

        connection.push("chat:contract:9:typing", "typing:start", typing_payload(1, "alice"));

        assert!(!controller.typing_state().is_typing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_typing_coalesces_broadcasts() {
        // テスト項目: 500ms の静止期間内の start_typing は 1 回の publish になる
        // given (前提条件):
        let (controller, connection) = make_controller().await;

        // when (操作): 立て続けに 4 回呼ぶ
        for _ in 0..4 {
            controller.start_typing();
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(Duration::from_millis(600)).await;

        // then (期待する結果): publish は 1 回、payload は自分の識別情報
        let published = connection.published();
        assert_eq!(published.len(), 1);
        let (channel_name, event, data) = &published[0];
        assert_eq!(channel_name, "chat:contract:9:typing");
        assert_eq!(event, "typing:start");
        assert_eq!(data["userId"], 1);
        assert_eq!(data["userName"], "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_stops_indicator_updates() {
        // テスト項目: deactivate 後のイベントは反映されない
        let (controller, connection) = make_controller().await;

        controller.deactivate();
        connection.push("chat:contract:9:typing", "typing:start", typing_payload(2, "bob"));

        assert!(!controller.typing_state().is_typing);
    }
}
