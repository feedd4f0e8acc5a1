//! FICS 国际象棋服务器共享协议库
//!
//! 包含:
//! - 走法、棋盘格、阵营等基础类型
//! - FEN 字段辅助与 style12 局面解析
//! - 消息类型定义 (ClientCommand, ServerEvent)
//! - 传输层抽象 (Connector, Connection traits) 与行编解码
//! - Timeseal 帧编码
//! - 棋谱格式 (JSON, 着法文本)

mod constants;
mod error;
mod fen;
mod message;
mod moves;
mod record;
mod style12;
mod timeseal;
mod transport;

pub use constants::*;
pub use error::{ChessError, ProtocolError, Result};
pub use fen::Fen;
pub use message::{ClientCommand, GameId, PositionUpdate, ServerEvent};
pub use moves::{Color, Move, PieceKind, Square};
pub use record::{GameRecord, MoveRecord, RECORD_VERSION};
pub use style12::{CastlingRights, Relation, Style12, STYLE12_PREFIX};
pub use timeseal::{Timeseal, TIMESEAL_ACK, TIMESEAL_KEY, TIMESEAL_PING};
pub use transport::{
    Connection, Connector, Inbound, LineReader, LineWriter, NetworkConfig, TcpConnection,
    TcpConnector,
};
