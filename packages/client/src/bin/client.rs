//! CLI chat client for Kakehashi.
//!
//! Wires the chat synchronization services together once at startup and
//! drives them from a small REPL. Useful for poking at a running backend
//! during development.

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use kakehashi_chat::domain::model::{ChatType, RoomFilter, UserIdentity, UserRole};
use kakehashi_chat::domain::transport::TransportOptions;
use kakehashi_chat::infrastructure::api::HttpChatApi;
use kakehashi_chat::infrastructure::transport::WebSocketConnector;
use kakehashi_chat::{
    ChatRoomPollingService, ChatSessionController, PollConfig, PollSubscriber,
    RealtimeConnectionManager, RoomListStore, SessionParams, TypingPresenceController,
};
use kakehashi_shared::logger::init_logger;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Client,
    Freelancer,
}

impl From<RoleArg> for UserRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Client => UserRole::Client,
            RoleArg::Freelancer => UserRole::Freelancer,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "kakehashi-client", about = "CLI chat client for Kakehashi")]
struct Args {
    /// REST backend base URL, e.g. http://localhost:8080
    #[arg(long, default_value = "http://localhost:8080")]
    base_url: String,

    /// Realtime WebSocket endpoint, e.g. ws://localhost:8081/realtime
    #[arg(long, default_value = "ws://localhost:8081/realtime")]
    ws_url: String,

    /// Session bearer token of the signed-in user
    #[arg(long)]
    session_token: String,

    /// Local user id
    #[arg(long)]
    user_id: i64,

    /// Local user display name
    #[arg(long)]
    user_name: String,

    /// Marketplace role of the local user
    #[arg(long, value_enum, default_value_t = RoleArg::Client)]
    role: RoleArg,
}

struct OpenConversation {
    session: Arc<ChatSessionController>,
    typing: Arc<TypingPresenceController>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_logger("kakehashi_chat=info,kakehashi_client=info");
    let args = Args::parse();

    let identity = UserIdentity {
        user_id: args.user_id,
        user_name: args.user_name.clone(),
        role: args.role.into(),
    };

    // Long-lived services, constructed once and shared from here on.
    let api = Arc::new(HttpChatApi::new(args.base_url.clone()));
    let store = RoomListStore::new();
    let connector = Arc::new(WebSocketConnector::new(args.ws_url.clone()));
    let realtime =
        RealtimeConnectionManager::new(api.clone(), connector, TransportOptions::default());
    realtime.initialize(&args.session_token).await;
    realtime.on_status_change(|status| {
        tracing::info!("realtime connection: {:?}", status.state);
    });

    let polling = ChatRoomPollingService::new(api.clone(), store.clone());
    polling.set_auth_token(Some(args.session_token.clone()));
    polling.subscribe(PollSubscriber::new(
        PollSubscriber::generated_id(),
        PollConfig {
            visible_interval: Duration::from_secs(30),
            hidden_interval: Duration::from_secs(120),
            fetch_type: RoomFilter::Active,
        },
        |rooms| {
            let unread: u32 = rooms.iter().map(|room| room.unread_count).sum();
            tracing::info!("room list refreshed: {} rooms, {} unread", rooms.len(), unread);
        },
        |message| {
            tracing::warn!("room list refresh failed: {message}");
        },
    ));
    polling.refresh_now().await;

    println!("kakehashi-client — type `help` for commands");
    let mut editor = DefaultEditor::new()?;
    let mut open: Option<OpenConversation> = None;

    loop {
        let line = match tokio::task::block_in_place(|| editor.readline("kakehashi> ")) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => return Err(err.into()),
        };
        let _ = editor.add_history_entry(line.as_str());
        let mut parts = line.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };

        match command {
            "help" => {
                println!("  rooms                              list chat rooms");
                println!("  open <room_id> <bid|contract> <reference_id>");
                println!("  send <text...>                     send into the open conversation");
                println!("  more                               load older messages");
                println!("  typing                             broadcast a typing notification");
                println!("  refresh                            refresh the room list now");
                println!("  status                             show connection status");
                println!("  reconnect                          force a reconnect");
                println!("  quit");
            }
            "rooms" => {
                for room in store.rooms() {
                    let preview = room
                        .last_message
                        .as_ref()
                        .map(|message| message.content.clone())
                        .unwrap_or_default();
                    println!(
                        "  #{} [{}] {} (unread {}): {}",
                        room.id,
                        room.updated_at.format("%Y-%m-%d %H:%M"),
                        room.other_party.name,
                        room.unread_count,
                        preview
                    );
                }
            }
            "open" => {
                let (Some(room_id), Some(kind), Some(reference_id)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    println!("usage: open <room_id> <bid|contract> <reference_id>");
                    continue;
                };
                let chat_type = match kind {
                    "bid" => ChatType::BidNegotiation,
                    "contract" => ChatType::Contract,
                    other => {
                        println!("unknown chat type: {other}");
                        continue;
                    }
                };
                let (Ok(chat_room_id), Ok(reference_id)) =
                    (room_id.parse::<i64>(), reference_id.parse::<i64>())
                else {
                    println!("room_id and reference_id must be numeric");
                    continue;
                };

                if let Some(previous) = open.take() {
                    previous.session.deactivate();
                    previous.typing.deactivate();
                }

                let session = ChatSessionController::new(
                    api.clone(),
                    realtime.clone(),
                    store.clone(),
                    identity.clone(),
                    args.session_token.clone(),
                    SessionParams {
                        chat_room_id,
                        chat_type,
                        reference_id,
                    },
                );
                session.activate().await;
                let typing = TypingPresenceController::new(
                    realtime.clone(),
                    identity.clone(),
                    chat_type,
                    reference_id,
                );
                typing.activate();

                let snapshot = session.snapshot();
                match snapshot.error {
                    Some(error) => println!("failed to open conversation: {error}"),
                    None => {
                        for message in snapshot.messages.iter().rev() {
                            println!(
                                "  [{}] {}: {}",
                                message.created_at.with_timezone(&chrono::Local).format("%H:%M"),
                                message.sender_name,
                                message.content
                            );
                        }
                        println!("opened room {chat_room_id} ({} messages)", snapshot.messages.len());
                    }
                }
                open = Some(OpenConversation { session, typing });
            }
            "send" => {
                let Some(conversation) = open.as_ref() else {
                    println!("no open conversation");
                    continue;
                };
                let text = parts.collect::<Vec<_>>().join(" ");
                conversation.session.send_message(&text).await;
                if let Some(error) = conversation.session.snapshot().error {
                    println!("send failed: {error}");
                }
            }
            "more" => {
                let Some(conversation) = open.as_ref() else {
                    println!("no open conversation");
                    continue;
                };
                conversation.session.load_more().await;
                let snapshot = conversation.session.snapshot();
                println!(
                    "{} messages loaded, more: {}",
                    snapshot.messages.len(),
                    snapshot.has_more
                );
            }
            "typing" => {
                if let Some(conversation) = open.as_ref() {
                    conversation.typing.start_typing();
                }
            }
            "refresh" => polling.refresh_now().await,
            "status" => {
                let status = realtime.status();
                println!("realtime: {:?} (error: {:?})", status.state, status.error);
            }
            "reconnect" => realtime.reconnect(),
            "quit" | "exit" => break,
            other => println!("unknown command: {other} (try `help`)"),
        }
    }

    if let Some(conversation) = open.take() {
        conversation.session.deactivate();
        conversation.typing.deactivate();
    }
    realtime.disconnect().await;
    Ok(())
}
