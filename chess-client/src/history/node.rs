//! 着法树节点

use std::collections::BTreeSet;

use protocol::Move;
use serde::{Deserialize, Serialize};

/// 节点句柄（arena 下标，删除后不复用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// 双方剩余时间（毫秒）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Clocks {
    pub white_ms: Option<i64>,
    pub black_ms: Option<i64>,
}

impl Clocks {
    pub fn new(white_ms: i64, black_ms: i64) -> Self {
        Self {
            white_ms: Some(white_ms),
            black_ms: Some(black_ms),
        }
    }
}

/// 一个半回合
///
/// `subvariations` 是在本节点之后、与 `mainline_next` 并列的其他走法，
/// 每个变着沿自己的 `mainline_next` 链展开，深度比本节点多一层。
#[derive(Debug, Clone, PartialEq)]
pub struct MoveNode {
    /// 根节点没有走法
    pub mv: Option<Move>,
    /// 服务器给出的简明记法
    pub san: Option<String>,
    /// 走后局面
    pub fen: String,
    pub clocks: Clocks,
    pub parent: Option<NodeId>,
    pub mainline_next: Option<NodeId>,
    pub subvariations: Vec<NodeId>,
    pub comment_before: Option<String>,
    pub comment_after: Option<String>,
    /// 符号注释代码（NAG）
    pub annotations: BTreeSet<u8>,
    /// 规则库的变体数据
    pub variant_data: Option<String>,
    /// 嵌套层级，0 为主线
    pub depth: u32,
}

impl MoveNode {
    pub(crate) fn root(fen: &str) -> Self {
        Self::new(None, fen, None, 0)
    }

    pub(crate) fn new(mv: Option<Move>, fen: &str, parent: Option<NodeId>, depth: u32) -> Self {
        Self {
            mv,
            san: None,
            fen: fen.to_string(),
            clocks: Clocks::default(),
            parent,
            mainline_next: None,
            subvariations: Vec::new(),
            comment_before: None,
            comment_after: None,
            annotations: BTreeSet::new(),
            variant_data: None,
            depth,
        }
    }

    /// 是否为根节点
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// 所有直接子节点（主线后续在前）
    pub fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.mainline_next
            .into_iter()
            .chain(self.subvariations.iter().copied())
    }
}
