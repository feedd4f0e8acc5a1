//! FICS 国际象棋客户端
//!
//! 对局同步引擎：乐观走子管线、预走棋、角色管理和着法树，
//! 以及带重连与保活的服务器连接。

pub mod error;
pub mod game;
pub mod history;
pub mod network;
pub mod oracle;
pub mod session;
pub mod settings;
pub mod storage;

pub use error::{ConnectionError, GameError, HistoryError};
pub use game::{Game, GameContext, GameEvent, Notification, Role, RoleRequest};
pub use history::{History, NodeId};
pub use network::{CommandSink, ConnectionEvent, ConnectionStatus, NetworkConnection};
pub use session::{Session, SCRATCH_GAME};
pub use settings::ClientSettings;
