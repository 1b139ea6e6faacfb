//! Chat session controller.
//!
//! Per-conversation state machine: loads paginated history, merges
//! live-pushed messages, applies optimistic-send reconciliation, and
//! exposes pagination. One controller per mounted conversation view; the
//! shared realtime connection is not torn down per conversation.

use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use kakehashi_shared::time::now_utc;

use crate::domain::api::ChatApi;
use crate::domain::channel;
use crate::domain::model::{ChatMessage, ChatType, MessageType, UserIdentity};
use crate::domain::transport::{ListenerId, RealtimeChannel};
use crate::service::connection::RealtimeConnectionManager;
use crate::state::RoomListStore;

/// Fixed history page size.
pub const HISTORY_PAGE_SIZE: u32 = 20;

/// Conversation coordinates of a session.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub chat_room_id: i64,
    pub chat_type: ChatType,
    pub reference_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
    Error,
}

/// Immutable view of the session state, newest message first.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub messages: Vec<ChatMessage>,
    pub has_more: bool,
    pub error: Option<String>,
}

struct SessionState {
    phase: SessionPhase,
    messages: Vec<ChatMessage>,
    page: u32,
    has_more: bool,
    error: Option<String>,
    active: bool,
    next_local_id: i64,
    channel_listener: Option<(Arc<dyn RealtimeChannel>, ListenerId)>,
}

pub struct ChatSessionController {
    api: Arc<dyn ChatApi>,
    realtime: Arc<RealtimeConnectionManager>,
    store: Arc<RoomListStore>,
    identity: UserIdentity,
    session_token: String,
    params: SessionParams,
    state: Mutex<SessionState>,
    watch_tx: watch::Sender<SessionSnapshot>,
    weak_self: Weak<Self>,
}

impl ChatSessionController {
    pub fn new(
        api: Arc<dyn ChatApi>,
        realtime: Arc<RealtimeConnectionManager>,
        store: Arc<RoomListStore>,
        identity: UserIdentity,
        session_token: impl Into<String>,
        params: SessionParams,
    ) -> Arc<Self> {
        let (watch_tx, _) = watch::channel(SessionSnapshot {
            phase: SessionPhase::Idle,
            messages: Vec::new(),
            has_more: false,
            error: None,
        });
        Arc::new_cyclic(|weak_self| Self {
            api,
            realtime,
            store,
            identity,
            session_token: session_token.into(),
            params,
            state: Mutex::new(SessionState {
                phase: SessionPhase::Idle,
                messages: Vec::new(),
                page: 0,
                has_more: false,
                error: None,
                active: false,
                next_local_id: -1,
                channel_listener: None,
            }),
            watch_tx,
            weak_self: weak_self.clone(),
        })
    }

    /// Start the session: subscribe to the conversation channel and load
    /// page 0 of history. Live pushes may arrive while the fetch is in
    /// flight; both paths deduplicate by message id.
    pub async fn activate(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if state.active {
                return;
            }
            state.active = true;
            state.phase = SessionPhase::LoadingInitial;
            state.error = None;
        }
        self.publish_snapshot();
        self.attach_channel();
        self.load_initial().await;
    }

    /// Stop the session. Synchronously detaches the channel listener; an
    /// in-flight fetch resolving afterwards will not touch state.
    pub fn deactivate(&self) {
        let detached = {
            let mut state = self.state.lock().unwrap();
            state.active = false;
            state.channel_listener.take()
        };
        if let Some((channel, listener)) = detached {
            channel.unsubscribe(listener);
        }
    }

    /// Send a message optimistically: a pending entry with a negative
    /// synthetic id is prepended before the backend call. On failure the
    /// pending entry stays visible and only an error string is recorded.
    pub async fn send_message(&self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            return;
        }
        let local_id = {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            let id = state.next_local_id;
            state.next_local_id -= 1;
            state.messages.insert(
                0,
                ChatMessage {
                    id,
                    chat_room_id: self.params.chat_room_id,
                    sender_type: self.identity.role.sender_type(),
                    sender_id: self.identity.user_id,
                    sender_name: self.identity.user_name.clone(),
                    content: content.to_string(),
                    message_type: MessageType::Text,
                    is_read: false,
                    created_at: now_utc(),
                    is_pending: true,
                },
            );
            id
        };
        self.publish_snapshot();

        match self
            .api
            .send_message(&self.session_token, self.params.chat_room_id, content)
            .await
        {
            Ok(saved) => {
                {
                    let mut state = self.state.lock().unwrap();
                    if !state.active {
                        return;
                    }
                    if let Some(position) =
                        state.messages.iter().position(|message| message.id == local_id)
                    {
                        if state.messages.iter().any(|message| message.id == saved.id) {
                            // The push event already delivered the confirmed
                            // copy; drop the pending placeholder.
                            state.messages.remove(position);
                        } else {
                            state.messages[position] = saved.clone();
                        }
                    }
                }
                self.store.apply_incoming_message(&saved, true);
                self.publish_snapshot();
            }
            Err(err) => {
                let mut state = self.state.lock().unwrap();
                if !state.active {
                    return;
                }
                state.error = Some(err.to_string());
                drop(state);
                self.publish_snapshot();
            }
        }
    }

    /// Fetch the next (older) page and append it. No-op while another load
    /// is running or when no further pages exist.
    pub async fn load_more(&self) {
        let next_page = {
            let mut state = self.state.lock().unwrap();
            if !state.active || state.phase != SessionPhase::Ready || !state.has_more {
                return;
            }
            state.phase = SessionPhase::LoadingMore;
            state.page + 1
        };
        self.publish_snapshot();

        let result = self
            .api
            .fetch_chat_history(
                &self.session_token,
                self.params.chat_room_id,
                next_page,
                HISTORY_PAGE_SIZE,
            )
            .await;
        {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            match result {
                Ok(page) => {
                    for message in page.content {
                        if !state.messages.iter().any(|existing| existing.id == message.id) {
                            state.messages.push(message);
                        }
                    }
                    state.page = next_page;
                    state.has_more = next_page + 1 < page.total_pages;
                    state.phase = SessionPhase::Ready;
                }
                Err(err) => {
                    state.error = Some(err.to_string());
                    state.phase = SessionPhase::Ready;
                }
            }
        }
        self.publish_snapshot();
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().unwrap();
        SessionSnapshot {
            phase: state.phase,
            messages: state.messages.clone(),
            has_more: state.has_more,
            error: state.error.clone(),
        }
    }

    /// Observe state changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.watch_tx.subscribe()
    }

    fn attach_channel(&self) {
        let name = channel::message_channel(self.params.chat_type, self.params.reference_id);
        let Some(conversation) = self.realtime.channel(&name) else {
            tracing::debug!("realtime connection not ready; no live updates for {name}");
            return;
        };
        let controller = self.weak_self.clone();
        let listener = conversation.subscribe(
            channel::MESSAGE_EVENT,
            Arc::new(move |data| {
                let Some(controller) = controller.upgrade() else {
                    return;
                };
                match serde_json::from_value::<ChatMessage>(data) {
                    Ok(message) => controller.apply_incoming(message),
                    Err(err) => tracing::warn!("ignoring malformed message event: {err}"),
                }
            }),
        );
        self.state.lock().unwrap().channel_listener = Some((conversation, listener));
    }

    /// Merge a live-pushed message, newest first, deduplicated by id. A
    /// push that confirms an optimistic send replaces the pending entry.
    fn apply_incoming(&self, message: ChatMessage) {
        let own = message.sender_id == self.identity.user_id
            && message.sender_type == self.identity.role.sender_type();
        {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            if state.messages.iter().any(|existing| existing.id == message.id) {
                return;
            }
            let pending = own.then(|| {
                state
                    .messages
                    .iter()
                    .position(|existing| existing.is_pending && existing.content == message.content)
            });
            match pending.flatten() {
                Some(position) => state.messages[position] = message.clone(),
                None => state.messages.insert(0, message.clone()),
            }
        }
        self.store.apply_incoming_message(&message, own);
        self.publish_snapshot();
    }

    async fn load_initial(&self) {
        let result = self
            .api
            .fetch_chat_history(
                &self.session_token,
                self.params.chat_room_id,
                0,
                HISTORY_PAGE_SIZE,
            )
            .await;
        let loaded = {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return;
            }
            match result {
                Ok(page) => {
                    // Keep pushes that landed during the fetch in front of
                    // the fetched page, deduplicated by id.
                    let pushed: Vec<ChatMessage> = state.messages.drain(..).collect();
                    state.messages = page.content;
                    for message in pushed.into_iter().rev() {
                        if !state.messages.iter().any(|existing| existing.id == message.id) {
                            state.messages.insert(0, message);
                        }
                    }
                    state.page = 0;
                    state.has_more = page.total_pages > 1;
                    state.phase = SessionPhase::Ready;
                    state.error = None;
                    true
                }
                Err(err) => {
                    state.phase = SessionPhase::Error;
                    state.error = Some(err.to_string());
                    false
                }
            }
        };
        self.publish_snapshot();

        if loaded {
            match self
                .api
                .mark_as_read(&self.session_token, self.params.chat_room_id)
                .await
            {
                Ok(()) => self.store.mark_read(self.params.chat_room_id),
                Err(err) => tracing::warn!(
                    "mark-as-read failed for room {}: {err}",
                    self.params.chat_room_id
                ),
            }
        }
    }

    fn publish_snapshot(&self) {
        self.watch_tx.send_replace(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::api::ChatApi;
    use crate::domain::error::ApiError;
    use crate::domain::model::{
        MessagePage, MilestoneNotification, MilestoneStatus, NewMilestone, RealtimeToken,
        RoomFilter, SenderType, UserRole,
    };
    use crate::domain::model::ChatRoom;
    use crate::domain::transport::TransportOptions;
    use crate::infrastructure::transport::inmemory::{InMemoryConnection, InMemoryConnector};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn make_message(id: i64, content: &str, sender_id: i64, sender_type: SenderType) -> ChatMessage {
        ChatMessage {
            id,
            chat_room_id: 7,
            sender_type,
            sender_id,
            sender_name: "someone".to_string(),
            content: content.to_string(),
            message_type: MessageType::Text,
            is_read: false,
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            is_pending: false,
        }
    }

    /// ChatApi fake with scripted history pages and a gated send endpoint.
    struct FakeApi {
        pages: Vec<MessagePage>,
        history_calls: AtomicUsize,
        mark_read_calls: AtomicUsize,
        send_result: Mutex<Option<Result<ChatMessage, ApiError>>>,
        send_gate: Notify,
        send_gated: bool,
        history_error: Option<ApiError>,
    }

    impl FakeApi {
        fn with_pages(pages: Vec<MessagePage>) -> Arc<Self> {
            Arc::new(Self {
                pages,
                history_calls: AtomicUsize::new(0),
                mark_read_calls: AtomicUsize::new(0),
                send_result: Mutex::new(None),
                send_gate: Notify::new(),
                send_gated: false,
                history_error: None,
            })
        }

        fn gated(mut self: Arc<Self>, result: Result<ChatMessage, ApiError>) -> Arc<Self> {
            let this = Arc::get_mut(&mut self).unwrap();
            this.send_gated = true;
            *this.send_result.lock().unwrap() = Some(result);
            self
        }

        fn with_send_result(self: Arc<Self>, result: Result<ChatMessage, ApiError>) -> Arc<Self> {
            *self.send_result.lock().unwrap() = Some(result);
            self
        }

        fn failing_history(error: ApiError) -> Arc<Self> {
            Arc::new(Self {
                pages: Vec::new(),
                history_calls: AtomicUsize::new(0),
                mark_read_calls: AtomicUsize::new(0),
                send_result: Mutex::new(None),
                send_gate: Notify::new(),
                send_gated: false,
                history_error: Some(error),
            })
        }
    }

    #[async_trait]
    impl ChatApi for FakeApi {
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
            page: u32,
            _size: u32,
        ) -> Result<MessagePage, ApiError> {
            self.history_calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = &self.history_error {
                return Err(error.clone());
            }
            Ok(self
                .pages
                .get(page as usize)
                .cloned()
                .unwrap_or(MessagePage {
                    content: Vec::new(),
                    total_pages: self.pages.len() as u32,
                }))
        }

        async fn send_message(
            &self,
            _token: &str,
            _chat_room_id: i64,
            _content: &str,
        ) -> Result<ChatMessage, ApiError> {
            if self.send_gated {
                self.send_gate.notified().await;
            }
            self.send_result
                .lock()
                .unwrap()
                .clone()
                .expect("send_message result not configured")
        }

        async fn mark_as_read(&self, _token: &str, _chat_room_id: i64) -> Result<(), ApiError> {
            self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
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

    async fn make_controller(
        api: Arc<FakeApi>,
    ) -> (Arc<ChatSessionController>, Arc<InMemoryConnection>) {
        let connector = Arc::new(InMemoryConnector::new());
        let connection = connector.connection();
        let realtime = RealtimeConnectionManager::new(
            api.clone(),
            connector,
            TransportOptions::default(),
        );
        realtime.initialize("session").await;
        let store = RoomListStore::new();
        let controller = ChatSessionController::new(
            api,
            realtime,
            store,
            UserIdentity {
                user_id: 1,
                user_name: "alice".to_string(),
                role: UserRole::Client,
            },
            "session",
            SessionParams {
                chat_room_id: 7,
                chat_type: ChatType::BidNegotiation,
                reference_id: 42,
            },
        );
        (controller, connection)
    }

    fn pages_of(total: usize) -> Vec<MessagePage> {
        // total 件を 20 件ずつのページに割る（新しい順）
        let page_size = HISTORY_PAGE_SIZE as usize;
        let total_pages = total.div_ceil(page_size) as u32;
        (0..total_pages)
            .map(|page| {
                let start = page as usize * page_size;
                let end = (start + page_size).min(total);
                MessagePage {
                    content: (start..end)
                        .map(|index| {
                            make_message(
                                (total - index) as i64,
                                &format!("message {}", total - index),
                                2,
                                SenderType::Freelancer,
                            )
                        })
                        .collect(),
                    total_pages,
                }
            })
            .collect()
    }

    #[tokio::test]
    async fn test_initial_load_exposes_first_page_newest_first() {
        // テスト項目: 25 件中、初回ロードで 20 件（新しい順）と hasMore=true
        // given (前提条件):
        let api = FakeApi::with_pages(pages_of(25));
        let (controller, _connection) = make_controller(api.clone()).await;

        // when (操作):
        controller.activate().await;

        // then (期待する結果):
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Ready);
        assert_eq!(snapshot.messages.len(), 20);
        assert_eq!(snapshot.messages[0].id, 25);
        assert!(snapshot.has_more);
        assert_eq!(api.mark_read_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_load_more_appends_remaining_and_clears_has_more() {
        // テスト項目: loadMore で残り 5 件が末尾に追加され hasMore=false
        let api = FakeApi::with_pages(pages_of(25));
        let (controller, _connection) = make_controller(api).await;
        controller.activate().await;

        controller.load_more().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.messages.len(), 25);
        assert_eq!(snapshot.messages.last().unwrap().id, 1);
        assert!(!snapshot.has_more);
        assert_eq!(snapshot.phase, SessionPhase::Ready);

        // さらに呼んでも no-op
        controller.load_more().await;
        assert_eq!(controller.snapshot().messages.len(), 25);
    }

    #[tokio::test]
    async fn test_initial_load_failure_moves_to_error_state() {
        // テスト項目: 初回ロード失敗で error 状態になり自動リトライしない
        let api = FakeApi::failing_history(ApiError::Network("connection refused".to_string()));
        let (controller, _connection) = make_controller(api.clone()).await;

        controller.activate().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Error);
        assert!(snapshot.error.as_deref().unwrap().contains("connection refused"));
        assert_eq!(api.history_calls.load(Ordering::SeqCst), 1);
        assert_eq!(api.mark_read_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_optimistic_send_prepends_pending_then_confirms() {
        // テスト項目: 送信直後に isPending の先頭要素が現れ、確定後に重複しない
        // given (前提条件): 確定レスポンスをゲートで止められる API
        let confirmed = make_message(101, "hello", 1, SenderType::Client);
        let api = FakeApi::with_pages(pages_of(0)).gated(Ok(confirmed.clone()));
        let (controller, connection) = make_controller(api.clone()).await;
        controller.activate().await;

        // when (操作): 送信して、確定前のスナップショットを観察する
        let sender = controller.clone();
        let send_task = tokio::spawn(async move { sender.send_message("hello").await });
        tokio::task::yield_now().await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.messages[0].content, "hello");
        assert!(snapshot.messages[0].is_pending);
        assert!(snapshot.messages[0].id < 0);

        // then (期待する結果): 確定後は同じ内容が 1 件だけになる
        api.send_gate.notify_one();
        send_task.await.unwrap();
        let snapshot = controller.snapshot();
        let hellos: Vec<_> = snapshot
            .messages
            .iter()
            .filter(|message| message.content == "hello")
            .collect();
        assert_eq!(hellos.len(), 1);
        assert_eq!(hellos[0].id, 101);
        assert!(!hellos[0].is_pending);

        // 確定済みメッセージの push イベントが来ても重複しない
        connection.push(
            "chat:bid:42",
            "message",
            serde_json::to_value(&confirmed).unwrap(),
        );
        let snapshot = controller.snapshot();
        assert_eq!(
            snapshot
                .messages
                .iter()
                .filter(|message| message.content == "hello")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_failed_send_keeps_pending_message_visible() {
        // テスト項目: 送信失敗でも pending メッセージは消えず、エラーのみ記録される
        let api = FakeApi::with_pages(pages_of(0)).with_send_result(Err(ApiError::Status {
            status: 500,
            message: "internal error".to_string(),
        }));
        let (controller, _connection) = make_controller(api).await;
        controller.activate().await;

        controller.send_message("hello").await;

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.messages.len(), 1);
        assert!(snapshot.messages[0].is_pending);
        assert!(snapshot.error.as_deref().unwrap().contains("internal error"));
    }

    #[tokio::test]
    async fn test_empty_message_is_not_sent() {
        // テスト項目: 空白のみの内容は no-op
        let api = FakeApi::with_pages(pages_of(0));
        let (controller, _connection) = make_controller(api).await;
        controller.activate().await;

        controller.send_message("   ").await;

        assert!(controller.snapshot().messages.is_empty());
    }

    #[tokio::test]
    async fn test_push_events_prepend_and_deduplicate() {
        // テスト項目: push イベントは先頭に追加され、同じ id は 1 回だけ反映される
        let api = FakeApi::with_pages(pages_of(2));
        let (controller, connection) = make_controller(api).await;
        controller.activate().await;

        let pushed = make_message(50, "fresh", 2, SenderType::Freelancer);
        let payload = serde_json::to_value(&pushed).unwrap();
        connection.push("chat:bid:42", "message", payload.clone());
        connection.push("chat:bid:42", "message", payload);

        let snapshot = controller.snapshot();
        assert_eq!(snapshot.messages[0].id, 50);
        assert_eq!(
            snapshot.messages.iter().filter(|message| message.id == 50).count(),
            1
        );
    }

    #[tokio::test]
    async fn test_deactivate_detaches_listener() {
        // テスト項目: deactivate 後の push はセッション状態に反映されない
        let api = FakeApi::with_pages(pages_of(2));
        let (controller, connection) = make_controller(api).await;
        controller.activate().await;

        controller.deactivate();
        connection.push(
            "chat:bid:42",
            "message",
            serde_json::to_value(&make_message(50, "late", 2, SenderType::Freelancer)).unwrap(),
        );

        assert_eq!(controller.snapshot().messages.len(), 2);
    }
}
