//! Service 層
//!
//! 長命なサービスオブジェクトを実装するレイヤー。アプリケーション起動時に
//! 一度だけ構築し、`Arc` で UI 側へ注入して使います。共有のリアルタイム
//! 接続とポーリングタイマーはプロセス全体で単一のインスタンスが所有します。

pub mod connection;
pub mod polling;
pub mod session;
pub mod typing;

pub use connection::RealtimeConnectionManager;
pub use polling::ChatRoomPollingService;
pub use session::ChatSessionController;
pub use typing::TypingPresenceController;
