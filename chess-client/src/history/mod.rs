//! 着法树
//!
//! 节点存放在 arena 中，以 [`NodeId`] 互相引用，删除只会清空槽位，句柄不会被复用。
//! 树形结构与光标分离：导航只移动光标，从不改变树形。

mod edit;
mod node;
mod record;

pub use node::{Clocks, MoveNode, NodeId};

use std::collections::HashSet;

use protocol::{Fen, Move, STANDARD_START_FEN};

use crate::error::HistoryError;

pub type Result<T> = std::result::Result<T, HistoryError>;

/// 一盘棋的着法树
#[derive(Debug, Clone)]
pub struct History {
    nodes: Vec<Option<MoveNode>>,
    root: NodeId,
    cursor: NodeId,
    /// 尚未与服务器记录对齐的本地棋局
    scratch: bool,
    /// 新走法是否可以覆盖已有后续
    edit_mode: bool,
    metatags: Vec<(String, String)>,
    initial_fen: String,
}

impl Default for History {
    fn default() -> Self {
        Self::new(STANDARD_START_FEN)
    }
}

impl History {
    /// 创建本地（scratch）着法树
    pub fn new(initial_fen: &str) -> Self {
        Self {
            nodes: vec![Some(MoveNode::root(initial_fen))],
            root: NodeId(0),
            cursor: NodeId(0),
            scratch: true,
            edit_mode: false,
            metatags: Vec::new(),
            initial_fen: initial_fen.to_string(),
        }
    }

    /// 创建以服务器局面为根的着法树
    pub fn anchored(initial_fen: &str) -> Self {
        let mut history = Self::new(initial_fen);
        history.scratch = false;
        history
    }

    // === 访问 ===

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// 当前显示的节点
    pub fn cursor(&self) -> NodeId {
        self.cursor
    }

    /// 主线最后一个节点
    pub fn tip(&self) -> NodeId {
        self.line_end(self.root)
    }

    pub fn initial_fen(&self) -> &str {
        &self.initial_fen
    }

    pub fn is_scratch(&self) -> bool {
        self.scratch
    }

    pub fn edit_mode(&self) -> bool {
        self.edit_mode
    }

    pub fn set_edit_mode(&mut self, edit_mode: bool) {
        self.edit_mode = edit_mode;
    }

    /// 是否只有根节点
    pub fn is_empty(&self) -> bool {
        self.get(self.root)
            .map(|root| root.mainline_next.is_none() && root.subvariations.is_empty())
            .unwrap_or(true)
    }

    /// 节点数（不含根）
    pub fn len(&self) -> usize {
        self.nodes.iter().flatten().count().saturating_sub(1)
    }

    pub fn node(&self, id: NodeId) -> Option<&MoveNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.node(id).is_some()
    }

    pub fn get(&self, id: NodeId) -> Result<&MoveNode> {
        self.node(id).ok_or(HistoryError::UnknownNode(id))
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Result<&mut MoveNode> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(HistoryError::UnknownNode(id))
    }

    /// 光标处的局面
    pub fn current_fen(&self) -> &str {
        self.node(self.cursor)
            .map(|n| n.fen.as_str())
            .unwrap_or(&self.initial_fen)
    }

    /// 空树在第一次收到服务器局面时转为非 scratch，并以该局面为根
    pub fn try_anchor(&mut self, fen: &str) -> bool {
        if !self.scratch || !self.is_empty() {
            return false;
        }
        if let Ok(root) = self.get_mut(self.root) {
            root.fen = fen.to_string();
        }
        self.initial_fen = fen.to_string();
        self.scratch = false;
        true
    }

    // === 添加 ===

    /// 在光标后添加走法，光标移到新节点
    ///
    /// 与已有后续局面相同则只前进光标；`as_sub` 为假且主线已有不同后续时报错。
    pub fn add(&mut self, mv: Move, fen: &str, as_sub: bool) -> Result<NodeId> {
        let (id, _) = self.add_after(self.cursor, mv, fen, as_sub)?;
        self.cursor = id;
        Ok(id)
    }

    /// 在指定节点后添加走法，不移动光标；返回 (节点, 是否新建)
    pub fn add_after(
        &mut self,
        parent: NodeId,
        mv: Move,
        fen: &str,
        as_sub: bool,
    ) -> Result<(NodeId, bool)> {
        if let Some(existing) = self.continuation_of(parent, fen) {
            return Ok((existing, false));
        }

        let parent_node = self.get(parent)?;
        let (depth, is_mainline) = match parent_node.mainline_next {
            None => (parent_node.depth, true),
            Some(_) if as_sub => (parent_node.depth + 1, false),
            Some(_) => return Err(HistoryError::ContinuationConflict { node: parent }),
        };

        let id = NodeId(self.nodes.len());
        self.nodes
            .push(Some(MoveNode::new(Some(mv), fen, Some(parent), depth)));
        let parent_node = self.get_mut(parent)?;
        if is_mainline {
            parent_node.mainline_next = Some(id);
        } else {
            parent_node.subvariations.push(id);
        }
        Ok((id, true))
    }

    /// 已有的、走到 `fen` 的后续节点（主线或变着）
    pub fn continuation_of(&self, parent: NodeId, fen: &str) -> Option<NodeId> {
        let node = self.node(parent)?;
        node.children()
            .find(|child| {
                self.node(*child)
                    .map(|c| Fen::same_position(&c.fen, fen))
                    .unwrap_or(false)
            })
    }

    // === 节点属性 ===

    pub fn set_clocks(&mut self, id: NodeId, clocks: Clocks) -> Result<()> {
        self.get_mut(id)?.clocks = clocks;
        Ok(())
    }

    pub fn set_san(&mut self, id: NodeId, san: Option<String>) -> Result<()> {
        self.get_mut(id)?.san = san;
        Ok(())
    }

    pub fn set_variant_data(&mut self, id: NodeId, data: Option<String>) -> Result<()> {
        self.get_mut(id)?.variant_data = data;
        Ok(())
    }

    // === 导航 ===

    /// 显示指定节点
    pub fn display(&mut self, id: NodeId) -> Result<&MoveNode> {
        self.get(id)?;
        self.cursor = id;
        self.get(id)
    }

    /// 回到根节点
    pub fn first(&mut self) -> NodeId {
        self.cursor = self.root;
        self.root
    }

    /// 后退一步
    pub fn prev(&mut self) -> Option<NodeId> {
        let parent = self.node(self.cursor)?.parent?;
        self.cursor = parent;
        Some(parent)
    }

    /// 沿当前线前进一步
    pub fn next(&mut self) -> Option<NodeId> {
        let next = self.node(self.cursor)?.mainline_next?;
        self.cursor = next;
        Some(next)
    }

    /// 走到当前线的末端
    pub fn last(&mut self) -> NodeId {
        self.cursor = self.line_end(self.cursor);
        self.cursor
    }

    /// 在当前显示的线（光标及其后续）和光标的祖先中查找局面
    pub fn find(&self, fen: &str) -> Option<NodeId> {
        self.find_from(self.cursor, fen)
    }

    /// 从 `start` 沿后续向前、再沿祖先向后查找局面
    pub fn find_from(&self, start: NodeId, fen: &str) -> Option<NodeId> {
        let matches = |id: NodeId| {
            self.node(id)
                .map(|n| Fen::same_position(&n.fen, fen))
                .unwrap_or(false)
        };

        let mut current = Some(start);
        while let Some(id) = current {
            if matches(id) {
                return Some(id);
            }
            current = self.node(id).and_then(|n| n.mainline_next);
        }

        let mut current = self.node(start).and_then(|n| n.parent);
        while let Some(id) = current {
            if matches(id) {
                return Some(id);
            }
            current = self.node(id).and_then(|n| n.parent);
        }
        None
    }

    // === 树结构查询 ===

    /// 沿 `mainline_next` 走到线的末端
    pub fn line_end(&self, from: NodeId) -> NodeId {
        let mut id = from;
        while let Some(next) = self.node(id).and_then(|n| n.mainline_next) {
            id = next;
        }
        id
    }

    /// 节点所在线的第一个节点（变着的起点或根）
    pub fn line_head(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.node(current).and_then(|n| n.parent) {
            let continues = self
                .node(parent)
                .map(|p| p.mainline_next == Some(current))
                .unwrap_or(false);
            if !continues {
                break;
            }
            current = parent;
        }
        current
    }

    /// 半回合数（根为 0）
    pub fn ply(&self, id: NodeId) -> usize {
        self.path_from_root(id).len().saturating_sub(1)
    }

    /// 从根到节点的路径（含两端）
    pub fn path_from_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = Vec::new();
        let mut current = self.node(id).map(|_| id);
        while let Some(node) = current {
            path.push(node);
            current = self.node(node).and_then(|n| n.parent);
        }
        path.reverse();
        path
    }

    /// `ancestor` 是否为 `id` 本身或其祖先
    pub fn is_ancestor(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.node(node).and_then(|n| n.parent);
        }
        false
    }

    /// 最近公共祖先
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let ancestors: HashSet<NodeId> = self.path_from_root(a).into_iter().collect();
        let mut current = Some(b);
        while let Some(node) = current {
            if ancestors.contains(&node) {
                return node;
            }
            current = self.node(node).and_then(|n| n.parent);
        }
        self.root
    }

    /// 主线节点（不含根）
    pub fn mainline(&self) -> Vec<NodeId> {
        let mut line = Vec::new();
        let mut current = self.node(self.root).and_then(|n| n.mainline_next);
        while let Some(id) = current {
            line.push(id);
            current = self.node(id).and_then(|n| n.mainline_next);
        }
        line
    }

    // === 元数据 ===

    pub fn metatags(&self) -> &[(String, String)] {
        &self.metatags
    }

    pub fn metatag(&self, key: &str) -> Option<&str> {
        self.metatags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 设置标签（保持原有顺序）
    pub fn set_metatag(&mut self, key: &str, value: &str) {
        match self.metatags.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.metatags.push((key.to_string(), value.to_string())),
        }
    }
}
