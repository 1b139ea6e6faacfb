//! Realtime channel naming scheme.
//!
//! Both ends of a conversation derive channel names independently, so the
//! mapping must be pure and stable across process restarts.

use super::model::ChatType;

/// Event name for chat messages on a conversation channel.
pub const MESSAGE_EVENT: &str = "message";

/// Event name for typing notifications on a typing channel.
pub const TYPING_START_EVENT: &str = "typing:start";

/// Suffix appended to a conversation channel name to derive its typing
/// channel.
const TYPING_SUFFIX: &str = ":typing";

/// Derive the message channel name for a conversation.
pub fn message_channel(chat_type: ChatType, reference_id: i64) -> String {
    format!("chat:{}:{}", chat_type.channel_segment(), reference_id)
}

/// Derive the typing channel name from a message channel name.
pub fn typing_channel(channel_name: &str) -> String {
    format!("{channel_name}{TYPING_SUFFIX}")
}
