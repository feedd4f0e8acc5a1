//! 预走棋队列
//!
//! 不轮到本方时排队的走法。每个条目都在强制本方走子的局面上校验，
//! 并按顺序串成一条投机链。

use protocol::{Color, Fen, Move, Square};
use serde::{Deserialize, Serialize};

use crate::oracle::Applied;

/// 预走棋模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PremoveMode {
    /// 至多一步，新预走替换旧的，任何失配清空
    Single,
    /// 多步，失配时保留仍然有效的前缀
    #[default]
    Multiple,
}

/// 一步预走棋
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Premove {
    pub mv: Move,
    /// 投机走后的局面
    pub fen: String,
    pub variant_data: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PremoveQueue {
    entries: Vec<Premove>,
    mode: PremoveMode,
}

impl PremoveQueue {
    pub fn new(mode: PremoveMode) -> Self {
        Self {
            entries: Vec::new(),
            mode,
        }
    }

    pub fn mode(&self) -> PremoveMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: PremoveMode) {
        self.mode = mode;
        if mode == PremoveMode::Single {
            self.entries.truncate(1);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[Premove] {
        &self.entries
    }

    /// 整条队列投机走完后的局面，队列为空时为 None
    pub fn chain_fen(&self) -> Option<&str> {
        self.entries.last().map(|p| p.fen.as_str())
    }

    /// 排入一步预走棋
    ///
    /// 在链尾（队列为空时为 `current_fen`）强制 `side` 走子后校验，失败则丢弃并返回 false。
    pub fn enqueue<F>(
        &mut self,
        mv: Move,
        current_fen: &str,
        current_data: Option<&str>,
        side: Color,
        mut validate: F,
    ) -> bool
    where
        F: FnMut(&str, Option<&str>, &Move) -> Option<Applied>,
    {
        let (base, data) = match (self.mode, self.entries.last()) {
            (PremoveMode::Multiple, Some(last)) => (last.fen.as_str(), last.variant_data.as_deref()),
            _ => (current_fen, current_data),
        };
        let Some(applied) = check(base, data, side, &mv, &mut validate) else {
            tracing::debug!("Premove {} discarded", mv.to_uci());
            return false;
        };

        if self.mode == PremoveMode::Single {
            self.entries.clear();
        }
        self.entries.push(Premove {
            mv: applied.mv,
            fen: applied.fen,
            variant_data: applied.variant_data,
        });
        true
    }

    /// 对手走子后从新局面重新校验，返回被丢弃的条目数
    pub fn revalidate<F>(
        &mut self,
        fen: &str,
        variant_data: Option<&str>,
        side: Color,
        mut validate: F,
    ) -> usize
    where
        F: FnMut(&str, Option<&str>, &Move) -> Option<Applied>,
    {
        let mut base = fen.to_string();
        let mut data = variant_data.map(str::to_string);
        let mut valid = 0;
        for entry in self.entries.iter_mut() {
            match check(&base, data.as_deref(), side, &entry.mv, &mut validate) {
                Some(applied) => {
                    entry.fen = applied.fen;
                    entry.variant_data = applied.variant_data;
                    base = entry.fen.clone();
                    data = entry.variant_data.clone();
                    valid += 1;
                }
                None => break,
            }
        }

        let dropped = self.entries.len() - valid;
        if dropped > 0 {
            match self.mode {
                PremoveMode::Single => self.entries.clear(),
                PremoveMode::Multiple => self.entries.truncate(valid),
            }
            tracing::warn!("Dropped {} premove(s) after opponent move", dropped);
        }
        dropped
    }

    /// 轮到本方时取出一步
    pub fn pop(&mut self) -> Option<Premove> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0))
    }

    /// 队首预走棋是否从该格出发（该格棋子被吃时整队取消）
    ///
    /// 后续条目的起始格要等前面的预走棋执行后才有本方棋子，不在此列。
    pub fn touches(&self, square: Square) -> bool {
        self.entries.first().is_some_and(|p| p.mv.from == Some(square))
    }

    /// 清空队列，返回清除的条目数
    pub fn clear(&mut self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }
}

fn check<F>(
    base: &str,
    data: Option<&str>,
    side: Color,
    mv: &Move,
    validate: &mut F,
) -> Option<Applied>
where
    F: FnMut(&str, Option<&str>, &Move) -> Option<Applied>,
{
    let forced = Fen::force_side_to_move(base, side).ok()?;
    validate(&forced, data, mv)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 假规则库：局面是已走着法的列表，`bad` 中的着法在任何局面下都非法
    fn validator<'a>(bad: &'a [&'a str]) -> impl FnMut(&str, Option<&str>, &Move) -> Option<Applied> + 'a {
        move |fen: &str, _: Option<&str>, mv: &Move| {
            let uci = mv.to_uci();
            if bad.contains(&uci.as_str()) {
                return None;
            }
            let mut fields: Vec<&str> = fen.split_whitespace().collect();
            let board = format!("{}+{}", fields[0], uci);
            fields[0] = &board;
            Some(Applied {
                fen: fields.join(" "),
                mv: *mv,
                variant_data: None,
            })
        }
    }

    fn mv(uci: &str) -> Move {
        Move::from_uci(uci).unwrap()
    }

    const START: &str = "x b - - 0 1";
    const MOVES: [&str; 4] = ["a2a3", "b2b3", "c2c3", "d2d3"];

    fn filled(mode: PremoveMode) -> PremoveQueue {
        let mut queue = PremoveQueue::new(mode);
        for m in MOVES {
            queue.enqueue(mv(m), START, None, Color::White, validator(&[]));
        }
        queue
    }

    #[test]
    fn test_enqueue_chains_on_forced_side() {
        let queue = filled(PremoveMode::Multiple);
        assert_eq!(queue.len(), 4);
        assert_eq!(queue.chain_fen(), Some("x+a2a3+b2b3+c2c3+d2d3 w - - 0 1"));
    }

    #[test]
    fn test_invalid_premove_discarded() {
        let mut queue = PremoveQueue::default();
        assert!(!queue.enqueue(mv("e2e4"), START, None, Color::White, validator(&["e2e4"])));
        assert!(queue.is_empty());
        assert_eq!(queue.chain_fen(), None);
    }

    #[test]
    fn test_prefix_survives_for_every_position() {
        for i in 0..MOVES.len() {
            let mut queue = filled(PremoveMode::Multiple);
            let dropped = queue.revalidate("y w - - 0 2", None, Color::White, validator(&[MOVES[i]]));
            assert_eq!(dropped, MOVES.len() - i);
            let kept: Vec<String> = queue.entries().iter().map(|p| p.mv.to_uci()).collect();
            assert_eq!(kept, MOVES[..i].to_vec());
            if i == 0 {
                assert_eq!(queue.chain_fen(), None);
            }
        }
    }

    #[test]
    fn test_revalidate_rebases_chain() {
        let mut queue = filled(PremoveMode::Multiple);
        assert_eq!(queue.revalidate("y w - - 0 2", None, Color::White, validator(&[])), 0);
        assert_eq!(queue.chain_fen(), Some("y+a2a3+b2b3+c2c3+d2d3 w - - 0 2"));
    }

    #[test]
    fn test_single_mode_replaces_and_clears() {
        let mut queue = filled(PremoveMode::Single);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.entries()[0].mv, mv("d2d3"));
        assert_eq!(queue.chain_fen(), Some("x+d2d3 w - - 0 1"));

        queue.revalidate("y w - - 0 2", None, Color::White, validator(&["d2d3"]));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_pop_one_per_turn() {
        let mut queue = filled(PremoveMode::Multiple);
        assert_eq!(queue.pop().unwrap().mv, mv("a2a3"));
        assert_eq!(queue.len(), 3);
        for _ in 0..3 {
            queue.pop();
        }
        assert!(queue.pop().is_none());
        assert_eq!(queue.chain_fen(), None);
    }

    #[test]
    fn test_touches_and_clear() {
        let mut queue = filled(PremoveMode::Multiple);
        assert!(queue.touches("a2".parse().unwrap()));
        assert!(!queue.touches("b2".parse().unwrap()));
        assert!(!queue.touches("e2".parse().unwrap()));
        assert_eq!(queue.clear(), 4);
        assert!(queue.is_empty());
    }
}
