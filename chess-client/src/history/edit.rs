//! 着法树编辑：提升变着、设为后续、删除、注释

use super::{History, NodeId, Result};
use crate::error::HistoryError;

impl History {
    /// 把变着逐级提升为主线
    ///
    /// 每一级交换变着与分支点的主线后续，直到该线深度为 0。
    pub fn promote(&mut self, id: NodeId) -> Result<()> {
        if self.get(id)?.depth == 0 {
            return Err(HistoryError::NotASubvariation { node: id });
        }

        let mut current = id;
        loop {
            let head = self.line_head(current);
            let Some(branch) = self.get(head)?.parent else {
                break;
            };

            let branch_node = self.get_mut(branch)?;
            let index = branch_node
                .subvariations
                .iter()
                .position(|s| *s == head)
                .ok_or(HistoryError::NotASubvariation { node: head })?;
            let demoted = branch_node.mainline_next.replace(head);
            match demoted {
                Some(old) => branch_node.subvariations[index] = old,
                None => {
                    branch_node.subvariations.remove(index);
                }
            }

            if let Some(old) = demoted {
                self.shift_depth(old, 1)?;
            }
            self.shift_depth(head, -1)?;

            if self.get(head)?.depth == 0 {
                break;
            }
            current = head;
        }
        tracing::debug!("Promoted {:?} to mainline", id);
        Ok(())
    }

    /// 把直接变着设为分支点的主线后续，原后续成为第一个变着
    pub fn make_continuation(&mut self, id: NodeId) -> Result<()> {
        let parent = self
            .get(id)?
            .parent
            .ok_or(HistoryError::NotASubvariation { node: id })?;

        let parent_node = self.get_mut(parent)?;
        let index = parent_node
            .subvariations
            .iter()
            .position(|s| *s == id)
            .ok_or(HistoryError::NotASubvariation { node: id })?;
        parent_node.subvariations.remove(index);
        let old = parent_node.mainline_next.replace(id);
        if let Some(old) = old {
            parent_node.subvariations.insert(0, old);
            self.shift_depth(old, 1)?;
        }
        self.shift_depth(id, -1)?;
        Ok(())
    }

    /// 删除节点及其全部后续与变着，返回被删除的节点
    ///
    /// 光标不能位于被删除的部分，调用方需先移开光标。
    pub fn remove(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        if id == self.root {
            return Err(HistoryError::CannotRemoveRoot);
        }
        let parent = self
            .get(id)?
            .parent
            .ok_or(HistoryError::CannotRemoveRoot)?;
        if self.is_ancestor(id, self.cursor) {
            tracing::error!("Refusing to remove {:?}: cursor {:?} is on that line", id, self.cursor);
            return Err(HistoryError::CursorInRemovedLine { node: id });
        }

        let parent_node = self.get_mut(parent)?;
        if parent_node.mainline_next == Some(id) {
            parent_node.mainline_next = None;
        } else {
            parent_node.subvariations.retain(|s| *s != id);
        }

        let removed = self.subtree(id);
        for node in &removed {
            if let Some(slot) = self.nodes.get_mut(node.0) {
                *slot = None;
            }
        }
        Ok(removed)
    }

    /// 节点及其所有后代
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if let Some(n) = self.node(node) {
                out.push(node);
                stack.extend(n.children());
            }
        }
        out
    }

    fn shift_depth(&mut self, head: NodeId, delta: i64) -> Result<()> {
        for id in self.subtree(head) {
            let node = self.get_mut(id)?;
            node.depth = (i64::from(node.depth) + delta).max(0) as u32;
        }
        Ok(())
    }

    // === 注释 ===

    pub fn set_comment_before(&mut self, id: NodeId, comment: Option<String>) -> Result<()> {
        self.get_mut(id)?.comment_before = comment.filter(|c| !c.trim().is_empty());
        Ok(())
    }

    pub fn set_comment_after(&mut self, id: NodeId, comment: Option<String>) -> Result<()> {
        self.get_mut(id)?.comment_after = comment.filter(|c| !c.trim().is_empty());
        Ok(())
    }

    /// 添加符号注释（NAG），返回是否新增
    pub fn add_annotation(&mut self, id: NodeId, nag: u8) -> Result<bool> {
        Ok(self.get_mut(id)?.annotations.insert(nag))
    }

    pub fn remove_annotation(&mut self, id: NodeId, nag: u8) -> Result<bool> {
        Ok(self.get_mut(id)?.annotations.remove(&nag))
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;

    const AFTER_C4: &str = "rnbqkbnr/pppppppp/8/8/2P5/8/PP1PPPPP/RNBQKBNR b KQkq - 0 1";
    const AFTER_D4_D5: &str = "rnbqkbnr/ppp1pppp/8/3p4/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 0 2";
    const AFTER_D4_NF6: &str = "rnbqkb1r/pppppppp/5n2/8/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 1 2";

    /// 1. e4 e5 (1... c5) (1. d4 d5 (1... Nf6))
    fn branched() -> (History, [NodeId; 6]) {
        let mut h = History::default();
        let e4 = h.add(mv("e2e4"), AFTER_E4, false).unwrap();
        let e5 = h.add(mv("e7e5"), AFTER_E4_E5, false).unwrap();
        h.display(e4).unwrap();
        let c5 = h.add(mv("c7c5"), AFTER_E4_C5, true).unwrap();
        h.first();
        let d4 = h.add(mv("d2d4"), AFTER_D4, true).unwrap();
        let d5 = h.add(mv("d7d5"), AFTER_D4_D5, false).unwrap();
        h.display(d4).unwrap();
        let nf6 = h.add(mv("g8f6"), AFTER_D4_NF6, true).unwrap();
        h.first();
        (h, [e4, e5, c5, d4, d5, nf6])
    }

    #[test]
    fn test_promote_one_level() {
        let (mut h, [e4, e5, c5, ..]) = branched();
        h.promote(c5).unwrap();
        let e4_node = h.get(e4).unwrap();
        assert_eq!(e4_node.mainline_next, Some(c5));
        assert_eq!(e4_node.subvariations, vec![e5]);
        assert_eq!(h.get(c5).unwrap().depth, 0);
        assert_eq!(h.get(e5).unwrap().depth, 1);
        assert_tree(&h);
    }

    #[test]
    fn test_promote_recursive_to_mainline() {
        let (mut h, [e4, _, _, d4, d5, nf6]) = branched();
        assert_eq!(h.get(nf6).unwrap().depth, 2);
        h.promote(nf6).unwrap();

        // Nf6 先替换 d5，然后 d4 线替换 e4 线
        assert_eq!(h.mainline(), vec![d4, nf6]);
        assert_eq!(h.get(h.root()).unwrap().subvariations, vec![e4]);
        assert_eq!(h.get(d4).unwrap().subvariations, vec![d5]);
        assert_eq!(h.get(d5).unwrap().depth, 1);
        assert_eq!(h.get(e4).unwrap().depth, 1);
        assert_tree(&h);
    }

    #[test]
    fn test_promote_mainline_is_error() {
        let (mut h, [e4, ..]) = branched();
        assert_eq!(h.promote(e4), Err(HistoryError::NotASubvariation { node: e4 }));
    }

    #[test]
    fn test_make_continuation() {
        let (mut h, [e4, e5, c5, ..]) = branched();
        h.display(c5).unwrap();
        let c4 = h.add(mv("c2c4"), AFTER_C4, false).unwrap();
        assert_eq!(h.get(c4).unwrap().depth, 1);
        h.first();
        h.make_continuation(c5).unwrap();
        let e4_node = h.get(e4).unwrap();
        assert_eq!(e4_node.mainline_next, Some(c5));
        assert_eq!(e4_node.subvariations, vec![e5]);
        assert_eq!(h.get(c4).unwrap().depth, 0);
        assert_tree(&h);

        assert_eq!(
            h.make_continuation(c5),
            Err(HistoryError::NotASubvariation { node: c5 })
        );
    }

    #[test]
    fn test_remove_subtree() {
        let (mut h, [_, _, _, d4, d5, nf6]) = branched();
        let before = h.len();
        let removed = h.remove(d4).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(removed.contains(&d5) && removed.contains(&nf6));
        assert_eq!(h.len(), before - 3);
        assert!(h.get(h.root()).unwrap().subvariations.is_empty());
        assert!(!h.contains(d4));
        assert_tree(&h);
    }

    #[test]
    fn test_remove_cursor_line_is_error() {
        let (mut h, [e4, e5, ..]) = branched();
        h.display(e5).unwrap();
        assert_eq!(h.remove(e4), Err(HistoryError::CursorInRemovedLine { node: e4 }));
        assert_eq!(h.remove(e5), Err(HistoryError::CursorInRemovedLine { node: e5 }));
        let root = h.root();
        assert_eq!(h.remove(root), Err(HistoryError::CannotRemoveRoot));

        h.display(e4).unwrap();
        assert_eq!(h.remove(e5).unwrap(), vec![e5]);
        assert_eq!(h.get(e4).unwrap().mainline_next, None);
        assert_tree(&h);
    }

    #[test]
    fn test_tree_integrity_under_mixed_edits() {
        let (mut h, [e4, e5, c5, d4, d5, nf6]) = branched();
        h.promote(nf6).unwrap();
        assert_tree(&h);
        h.make_continuation(d5).unwrap();
        assert_tree(&h);
        h.promote(c5).unwrap();
        assert_tree(&h);
        h.first();
        h.remove(e5).unwrap();
        assert_tree(&h);
        h.make_continuation(d4).unwrap();
        assert_tree(&h);
        assert_eq!(h.mainline(), vec![d4, d5]);
        assert_eq!(h.get(h.root()).unwrap().subvariations, vec![e4]);
        assert!(h.contains(c5));
    }

    #[test]
    fn test_comments_and_annotations() {
        let (mut h, [e4, ..]) = branched();
        h.set_comment_after(e4, Some("best by test".to_string())).unwrap();
        h.set_comment_before(e4, Some("  ".to_string())).unwrap();
        assert!(h.add_annotation(e4, 1).unwrap());
        assert!(!h.add_annotation(e4, 1).unwrap());
        let node = h.get(e4).unwrap();
        assert_eq!(node.comment_after.as_deref(), Some("best by test"));
        assert_eq!(node.comment_before, None);
        assert!(node.annotations.contains(&1));
        assert!(h.remove_annotation(e4, 1).unwrap());
    }
}
