//! FEN 字符串辅助函数
//!
//! 国际象棋 FEN 格式：
//! `<棋盘> <走子方> <易位权> <吃过路兵格> <半回合计数> <回合数>`
//!
//! 这里只做字段级处理，局面合法性交给规则库。

use crate::error::ChessError;
use crate::moves::Color;

/// FEN 字段处理
pub struct Fen;

impl Fen {
    /// 读取走子方
    pub fn side_to_move(fen: &str) -> Result<Color, ChessError> {
        fen.split_whitespace()
            .nth(1)
            .and_then(|field| field.chars().next())
            .and_then(Color::from_char)
            .ok_or_else(|| ChessError::InvalidFen {
                reason: format!("missing side to move in '{}'", fen),
            })
    }

    /// 强制走子方（预走棋校验用），同时清除吃过路兵格
    pub fn force_side_to_move(fen: &str, side: Color) -> Result<String, ChessError> {
        let mut fields: Vec<String> = fen.split_whitespace().map(str::to_string).collect();
        if fields.len() < 2 {
            return Err(ChessError::InvalidFen {
                reason: format!("expected at least 2 fields in '{}'", fen),
            });
        }
        fields[1] = side.fen_char().to_string();
        if fields.len() > 3 {
            fields[3] = "-".to_string();
        }
        Ok(fields.join(" "))
    }

    /// 局面比较键：棋盘、走子方、易位权、半回合计数、回合数
    ///
    /// 忽略吃过路兵字段：style12 总是报告双步兵所在列，而规则库只在存在合法吃过路兵时输出。
    pub fn position_key(fen: &str) -> String {
        fen.split_whitespace()
            .enumerate()
            .filter(|(i, _)| *i != 3)
            .map(|(_, field)| field)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// 两个 FEN 是否表示同一局面
    pub fn same_position(a: &str, b: &str) -> bool {
        Self::position_key(a) == Self::position_key(b)
    }

    /// 只比较棋子摆放
    pub fn same_placement(a: &str, b: &str) -> bool {
        a.split_whitespace().next() == b.split_whitespace().next()
    }
}
