//! 客户端错误类型

use protocol::GameId;
use thiserror::Error;

use crate::game::Role;
use crate::history::NodeId;
use crate::network::ConnectionState;

/// 着法树操作错误
///
/// 这些都是调用方违反约定，不应在正确的集成中出现。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
    /// 节点不存在（已删除或从未创建）
    #[error("Unknown node {0:?}")]
    UnknownNode(NodeId),

    /// 主线已有不同的后续着法
    #[error("Node {node:?} already has a different mainline continuation")]
    ContinuationConflict { node: NodeId },

    /// 光标位于待删除的分支上
    #[error("Cannot remove {node:?}: the cursor is on the removed line")]
    CursorInRemovedLine { node: NodeId },

    /// 根节点不能删除
    #[error("Cannot remove the root node")]
    CannotRemoveRoot,

    /// 节点不在变着中
    #[error("Node {node:?} is not part of a subvariation")]
    NotASubvariation { node: NodeId },

    /// 棋谱中的走法无法解析
    #[error("Invalid move '{text}' in game record")]
    InvalidRecord { text: String },
}

/// 对局同步错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// 当前角色不允许该请求
    #[error("Request {request} is not allowed while {role:?}")]
    RequestNotAllowed { request: String, role: Role },

    /// 没有等待选择的分支
    #[error("No branch choice is pending")]
    NoBranchPending,

    /// 会话中没有该对局
    #[error("Unknown game {0}")]
    UnknownGame(GameId),

    /// 着法树错误
    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

/// 连接状态机错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// 当前状态不允许该转换
    #[error("Cannot {action} while {state}")]
    InvalidTransition {
        action: &'static str,
        state: ConnectionState,
    },
}
