//! Shared room-list application state.
//!
//! One store instance per application, written by the polling service and
//! the chat controllers, read by every notification widget. The list is
//! replaced wholesale on each successful fetch; between fetches only
//! `unread_count` and `last_message` are mutated in place.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::domain::model::{ChatMessage, ChatRoom, LastMessage};

pub struct RoomListStore {
    rooms: Mutex<Vec<ChatRoom>>,
    watch_tx: watch::Sender<Vec<ChatRoom>>,
}

impl RoomListStore {
    pub fn new() -> Arc<Self> {
        let (watch_tx, _) = watch::channel(Vec::new());
        Arc::new(Self {
            rooms: Mutex::new(Vec::new()),
            watch_tx,
        })
    }

    /// Snapshot of the current room list.
    pub fn rooms(&self) -> Vec<ChatRoom> {
        self.rooms.lock().unwrap().clone()
    }

    /// Observe room-list changes.
    pub fn watch(&self) -> watch::Receiver<Vec<ChatRoom>> {
        self.watch_tx.subscribe()
    }

    /// Total unread count across all rooms.
    pub fn total_unread(&self) -> u32 {
        self.rooms
            .lock()
            .unwrap()
            .iter()
            .map(|room| room.unread_count)
            .sum()
    }

    /// Replace the whole list (successful fetch), most recent message first.
    pub fn replace_all(&self, mut rooms: Vec<ChatRoom>) {
        sort_by_recency(&mut rooms);
        {
            let mut current = self.rooms.lock().unwrap();
            *current = rooms.clone();
        }
        self.watch_tx.send_replace(rooms);
    }

    /// Apply a live-pushed message: update the room's preview, bump its
    /// unread count unless the message is the local user's own, and move it
    /// to the front of the list.
    pub fn apply_incoming_message(&self, message: &ChatMessage, own: bool) {
        let snapshot = {
            let mut rooms = self.rooms.lock().unwrap();
            let Some(position) = rooms.iter().position(|room| room.id == message.chat_room_id)
            else {
                tracing::debug!(
                    "message for unknown room {}; waiting for next refresh",
                    message.chat_room_id
                );
                return;
            };
            let mut room = rooms.remove(position);
            room.last_message = Some(LastMessage {
                id: message.id,
                content: message.content.clone(),
                created_at: message.created_at,
                sender_type: message.sender_type,
            });
            if !own {
                room.unread_count += 1;
            }
            room.updated_at = message.created_at;
            rooms.insert(0, room);
            rooms.clone()
        };
        self.watch_tx.send_replace(snapshot);
    }

    /// Zero a room's unread count (read receipt).
    pub fn mark_read(&self, chat_room_id: i64) {
        let snapshot = {
            let mut rooms = self.rooms.lock().unwrap();
            if let Some(room) = rooms.iter_mut().find(|room| room.id == chat_room_id) {
                room.unread_count = 0;
            }
            rooms.clone()
        };
        self.watch_tx.send_replace(snapshot);
    }
}

fn recency(room: &ChatRoom) -> DateTime<Utc> {
    room.last_message
        .as_ref()
        .map(|message| message.created_at)
        .unwrap_or(room.updated_at)
}

fn sort_by_recency(rooms: &mut [ChatRoom]) {
    rooms.sort_by(|a, b| recency(b).cmp(&recency(a)));
}
