//! 着法树与棋谱记录的互相转换

use protocol::{GameRecord, Move, MoveRecord};

use super::{Clocks, History, NodeId, Result};
use crate::error::HistoryError;

impl History {
    /// 导出为棋谱记录
    pub fn to_record(&self) -> GameRecord {
        let mut record = GameRecord::new(self.initial_fen.clone());
        record.metatags = self.metatags.clone();
        record.moves = self.line_records(self.root);
        record
    }

    /// 从棋谱记录构建本地着法树，光标位于根
    pub fn from_record(record: &GameRecord) -> Result<History> {
        let mut history = History::new(&record.initial_fen);
        history.metatags = record.metatags.clone();
        let root = history.root;
        history.load_line(root, &record.moves, false)?;
        Ok(history)
    }

    /// `parent` 之后的一条线；没有主线后续时第一个变着充当后续
    fn line_records(&self, parent: NodeId) -> Vec<MoveRecord> {
        let mut line = Vec::new();
        let mut current = parent;
        while let Some(node) = self.node(current) {
            let mut children = node.children();
            let Some(next) = children.next() else {
                break;
            };
            let mut record = self.move_record(next);
            record.variations = children
                .map(|sub| {
                    let mut variation = vec![self.move_record(sub)];
                    variation.extend(self.line_records(sub));
                    variation
                })
                .collect();
            line.push(record);
            current = next;
        }
        line
    }

    fn move_record(&self, id: NodeId) -> MoveRecord {
        let Some(node) = self.node(id) else {
            return MoveRecord::default();
        };
        MoveRecord {
            uci: node.mv.as_ref().map(Move::to_uci).unwrap_or_default(),
            san: node.san.clone(),
            fen: node.fen.clone(),
            white_clock_ms: node.clocks.white_ms,
            black_clock_ms: node.clocks.black_ms,
            comment_before: node.comment_before.clone(),
            comment_after: node.comment_after.clone(),
            nags: node.annotations.iter().copied().collect(),
            variations: Vec::new(),
            variant_data: node.variant_data.clone(),
        }
    }

    fn load_line(&mut self, parent: NodeId, moves: &[MoveRecord], first_as_sub: bool) -> Result<()> {
        let mut current = parent;
        for (i, record) in moves.iter().enumerate() {
            let id = self.insert_record(current, record, first_as_sub && i == 0)?;
            for variation in &record.variations {
                self.load_line(current, variation, true)?;
            }
            current = id;
        }
        Ok(())
    }

    fn insert_record(&mut self, parent: NodeId, record: &MoveRecord, as_sub: bool) -> Result<NodeId> {
        let mv = Move::from_uci(&record.uci).map_err(|_| HistoryError::InvalidRecord {
            text: record.uci.clone(),
        })?;
        let (id, _) = self.add_after(parent, mv, &record.fen, as_sub)?;

        let node = self.get_mut(id)?;
        node.san = record.san.clone();
        node.clocks = Clocks {
            white_ms: record.white_clock_ms,
            black_ms: record.black_clock_ms,
        };
        node.comment_before = record.comment_before.clone();
        node.comment_after = record.comment_after.clone();
        node.annotations = record.nags.iter().copied().collect();
        node.variant_data = record.variant_data.clone();
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::*;
    use super::*;

    const AFTER_D4_D5: &str = "rnbqkbnr/ppp1pppp/8/3p4/3P4/8/PPP1PPPP/RNBQKBNR w KQkq - 0 2";

    fn sample() -> History {
        let mut h = History::default();
        h.set_metatag("White", "alice");
        let e4 = h.add(mv("e2e4"), AFTER_E4, false).unwrap();
        h.add(mv("e7e5"), AFTER_E4_E5, false).unwrap();
        h.display(e4).unwrap();
        h.add(mv("c7c5"), AFTER_E4_C5, true).unwrap();
        h.first();
        h.add(mv("d2d4"), AFTER_D4, true).unwrap();
        h.add(mv("d7d5"), AFTER_D4_D5, false).unwrap();

        h.set_clocks(e4, Clocks::new(180_000, 180_000)).unwrap();
        h.set_comment_after(e4, Some("king pawn".to_string())).unwrap();
        h.add_annotation(e4, 1).unwrap();
        h
    }

    #[test]
    fn test_to_record_layout() {
        let record = sample().to_record();
        assert_eq!(record.tag("White"), Some("alice"));
        assert_eq!(record.moves.len(), 2);

        let e4 = &record.moves[0];
        assert_eq!(e4.uci, "e2e4");
        assert_eq!(e4.white_clock_ms, Some(180_000));
        assert_eq!(e4.comment_after.as_deref(), Some("king pawn"));
        assert_eq!(e4.nags, vec![1]);
        assert_eq!(e4.variations.len(), 1);
        let d_line: Vec<&str> = e4.variations[0].iter().map(|m| m.uci.as_str()).collect();
        assert_eq!(d_line, vec!["d2d4", "d7d5"]);

        let e5 = &record.moves[1];
        assert_eq!(e5.variations.len(), 1);
        assert_eq!(e5.variations[0][0].uci, "c7c5");
    }

    #[test]
    fn test_from_record_rebuilds_tree() {
        let record = sample().to_record();
        let loaded = History::from_record(&record).unwrap();
        assert!(loaded.is_scratch());
        assert_eq!(loaded.cursor(), loaded.root());
        assert_eq!(loaded.len(), 5);
        assert_tree(&loaded);

        let mainline: Vec<String> = loaded
            .mainline()
            .iter()
            .map(|id| loaded.get(*id).unwrap().mv.as_ref().unwrap().to_uci())
            .collect();
        assert_eq!(mainline, vec!["e2e4", "e7e5"]);
        assert_eq!(loaded.to_record(), record);
    }

    #[test]
    fn test_orphan_subvariation_exported_as_continuation() {
        let mut h = History::default();
        let e4 = h.add(mv("e2e4"), AFTER_E4, false).unwrap();
        h.first();
        let d4 = h.add(mv("d2d4"), AFTER_D4, true).unwrap();
        h.first();
        h.remove(e4).unwrap();

        let record = h.to_record();
        assert_eq!(record.moves.len(), 1);
        assert_eq!(record.moves[0].uci, "d2d4");
        assert!(h.get(d4).unwrap().depth > 0);

        let loaded = History::from_record(&record).unwrap();
        let first = loaded.mainline()[0];
        assert_eq!(loaded.get(first).unwrap().depth, 0);
    }

    #[test]
    fn test_invalid_record_move() {
        let mut record = GameRecord::default();
        record.moves.push(MoveRecord::new("zz", AFTER_E4));
        assert_eq!(
            History::from_record(&record).unwrap_err(),
            HistoryError::InvalidRecord {
                text: "zz".to_string()
            }
        );
    }
}
