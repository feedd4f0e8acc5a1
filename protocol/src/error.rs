//! 错误类型定义

use thiserror::Error;

/// 走法与局面错误（规则库拒绝、局面串无效等）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChessError {
    /// 无效的格子名
    #[error("Invalid square: {text}")]
    InvalidSquare { text: String },

    /// 无法解析的走法文本
    #[error("Invalid move notation: {text}")]
    InvalidMove { text: String },

    /// 规则库判定为非法走法
    #[error("Illegal move {mv} in position {fen}")]
    IllegalMove { mv: String, fen: String },

    /// 无效的 FEN 字符串
    #[error("Invalid FEN string: {reason}")]
    InvalidFen { reason: String },

    /// 不支持的变体
    #[error("Unsupported variant: {name}")]
    UnsupportedVariant { name: String },
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 单行数据超限（服务器迟迟不发送换行）
    #[error("Line too large: {size} bytes (max: {max})")]
    LineTooLarge { size: usize, max: usize },

    /// 无法解析的 style12 行
    #[error("Invalid style12 line: {reason}")]
    InvalidStyle12 { reason: String },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 走法或局面错误
    #[error("Chess error: {0}")]
    Chess(#[from] ChessError),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
