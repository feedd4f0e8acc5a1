//! style12 局面行解析
//!
//! 服务器在 `set style 12` 后以单行推送每个局面：
//! `<12> <8 行棋盘> <走子方> <双步兵列> <4 个易位标志> <不可逆步数> <对局号>
//!  <白方> <黑方> <关系> <初始时间> <加秒> <白方子力> <黑方子力> <白方时钟> <黑方时钟>
//!  <回合数> <详细记法> <用时> <简明记法> <翻转> [<计时中> <延迟>]`

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolError, Result};
use crate::message::{GameId, PositionUpdate};
use crate::moves::{Color, Move};

/// 行前缀
pub const STYLE12_PREFIX: &str = "<12>";

/// 最少字段数（含前缀）
const MIN_FIELDS: usize = 31;

/// 本方与对局的关系码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    /// -3：孤立局面（如 `refresh` 之外的单独局面）
    IsolatedPosition,
    /// -2：观看他人研究的对局
    ObservingExamined,
    /// -1：对局中，轮到对手
    PlayingOpponentsMove,
    /// 0：观看对局
    Observing,
    /// 1：对局中，轮到自己
    PlayingMyMove,
    /// 2：研究者
    Examining,
}

impl Relation {
    /// 由数字码解析
    pub fn from_code(code: i32) -> Option<Relation> {
        match code {
            -3 => Some(Relation::IsolatedPosition),
            -2 => Some(Relation::ObservingExamined),
            -1 => Some(Relation::PlayingOpponentsMove),
            0 => Some(Relation::Observing),
            1 => Some(Relation::PlayingMyMove),
            2 => Some(Relation::Examining),
            _ => None,
        }
    }

    /// 数字码
    pub fn code(&self) -> i32 {
        match self {
            Relation::IsolatedPosition => -3,
            Relation::ObservingExamined => -2,
            Relation::PlayingOpponentsMove => -1,
            Relation::Observing => 0,
            Relation::PlayingMyMove => 1,
            Relation::Examining => 2,
        }
    }

    /// 是否在下棋
    pub fn is_playing(&self) -> bool {
        matches!(self, Relation::PlayingMyMove | Relation::PlayingOpponentsMove)
    }
}

/// 易位权
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CastlingRights {
    pub white_short: bool,
    pub white_long: bool,
    pub black_short: bool,
    pub black_long: bool,
}

impl CastlingRights {
    /// FEN 易位字段
    pub fn to_fen(&self) -> String {
        let mut s = String::new();
        if self.white_short {
            s.push('K');
        }
        if self.white_long {
            s.push('Q');
        }
        if self.black_short {
            s.push('k');
        }
        if self.black_long {
            s.push('q');
        }
        if s.is_empty() {
            s.push('-');
        }
        s
    }
}

/// 一条 style12 记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style12 {
    /// 8 行棋盘，从第 8 行到第 1 行，`-` 为空格
    pub rows: Vec<String>,
    pub side_to_move: Color,
    /// 上一步双步兵所在列（0-7）
    pub double_push_file: Option<u8>,
    pub castling: CastlingRights,
    /// 自上次吃子或兵步以来的半回合数
    pub irreversible_count: u32,
    pub game_id: GameId,
    pub white: String,
    pub black: String,
    pub relation: Relation,
    pub initial_time_secs: u32,
    pub increment_secs: u32,
    pub white_strength: u32,
    pub black_strength: u32,
    /// 白方剩余时间（毫秒，需要 `iset ms 1`）
    pub white_clock_ms: i64,
    /// 黑方剩余时间（毫秒）
    pub black_clock_ms: i64,
    /// 即将走的回合数
    pub move_number: u32,
    pub verbose_move: String,
    pub time_taken: String,
    pub pretty_move: String,
    pub flip: bool,
    pub clock_ticking: bool,
    pub lag_ms: u32,
}

impl Style12 {
    /// 解析一行
    pub fn parse(line: &str) -> Result<Style12> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first() != Some(&STYLE12_PREFIX) {
            return Err(invalid("missing <12> prefix"));
        }
        if fields.len() < MIN_FIELDS {
            return Err(invalid(&format!("expected {} fields, got {}", MIN_FIELDS, fields.len())));
        }

        let rows: Vec<String> = fields[1..9].iter().map(|r| r.to_string()).collect();
        for row in &rows {
            if row.chars().count() != 8 {
                return Err(invalid(&format!("bad board row '{}'", row)));
            }
        }

        let side_to_move = fields[9]
            .chars()
            .next()
            .and_then(Color::from_char)
            .ok_or_else(|| invalid("bad side to move"))?;
        let double_push: i32 = number(fields[10], "double push file")?;
        let double_push_file = if (0..8).contains(&double_push) {
            Some(double_push as u8)
        } else {
            None
        };
        let castling = CastlingRights {
            white_short: fields[11] == "1",
            white_long: fields[12] == "1",
            black_short: fields[13] == "1",
            black_long: fields[14] == "1",
        };
        let relation_code: i32 = number(fields[19], "relation")?;
        let relation = Relation::from_code(relation_code)
            .ok_or_else(|| invalid(&format!("unknown relation {}", relation_code)))?;

        Ok(Style12 {
            rows,
            side_to_move,
            double_push_file,
            castling,
            irreversible_count: number(fields[15], "irreversible count")?,
            game_id: number(fields[16], "game number")?,
            white: fields[17].to_string(),
            black: fields[18].to_string(),
            relation,
            initial_time_secs: number(fields[20], "initial time")?,
            increment_secs: number(fields[21], "increment")?,
            white_strength: number(fields[22], "white strength")?,
            black_strength: number(fields[23], "black strength")?,
            white_clock_ms: number(fields[24], "white clock")?,
            black_clock_ms: number(fields[25], "black clock")?,
            move_number: number(fields[26], "move number")?,
            verbose_move: fields[27].to_string(),
            time_taken: fields[28].to_string(),
            pretty_move: fields[29].to_string(),
            flip: fields[30] == "1",
            clock_ticking: fields.get(31).map_or(true, |f| *f == "1"),
            lag_ms: fields.get(32).and_then(|f| f.parse().ok()).unwrap_or(0),
        })
    }

    /// 转换为 FEN
    pub fn to_fen(&self) -> String {
        let mut placement = String::with_capacity(72);
        for (i, row) in self.rows.iter().enumerate() {
            if i > 0 {
                placement.push('/');
            }
            let mut empty = 0;
            for c in row.chars() {
                if c == '-' {
                    empty += 1;
                } else {
                    if empty > 0 {
                        placement.push_str(&empty.to_string());
                        empty = 0;
                    }
                    placement.push(c);
                }
            }
            if empty > 0 {
                placement.push_str(&empty.to_string());
            }
        }

        // 双步兵越过的格子：白方走子说明黑兵刚走，位于第 6 行
        let en_passant = match self.double_push_file {
            Some(file) => {
                let rank = match self.side_to_move {
                    Color::White => '6',
                    Color::Black => '3',
                };
                format!("{}{}", (b'a' + file) as char, rank)
            }
            None => "-".to_string(),
        };

        format!(
            "{} {} {} {} {} {}",
            placement,
            self.side_to_move.fen_char(),
            self.castling.to_fen(),
            en_passant,
            self.irreversible_count,
            self.move_number
        )
    }

    /// 上一步走法（没有或无法解析时为 `None`）
    pub fn last_move(&self) -> Option<Move> {
        let mover = self.side_to_move.opponent();
        match Move::from_verbose(&self.verbose_move, mover) {
            Ok(mv) => mv,
            Err(e) => {
                tracing::debug!("Unparsed verbose move '{}': {}", self.verbose_move, e);
                None
            }
        }
    }

    /// 转换为引擎消费的局面更新
    pub fn to_update(&self) -> PositionUpdate {
        let last_move = self.last_move();
        PositionUpdate {
            game_id: self.game_id,
            fen: self.to_fen(),
            relation: self.relation,
            white: self.white.clone(),
            black: self.black.clone(),
            white_clock_ms: self.white_clock_ms,
            black_clock_ms: self.black_clock_ms,
            last_move_san: last_move.map(|_| self.pretty_move.clone()),
            last_move,
            initial_time_secs: self.initial_time_secs,
            increment_secs: self.increment_secs,
        }
    }
}

fn invalid(reason: &str) -> ProtocolError {
    ProtocolError::InvalidStyle12 {
        reason: reason.to_string(),
    }
}

fn number<T: std::str::FromStr>(field: &str, name: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| invalid(&format!("bad {} '{}'", name, field)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::Square;

    const NEWTON: &str = "<12> rnbqkb-r pppppppp -----n-- -------- ----P--- -------- PPPPKPPP RNBQ-BNR B -1 0 0 1 1 0 7 Newton Einstein 1 2 12 39 39 119 122 2 K/e1-e2 (0:06) Ke2 0";

    #[test]
    fn test_parse_fields() {
        let s = Style12::parse(NEWTON).unwrap();
        assert_eq!(s.side_to_move, Color::Black);
        assert_eq!(s.double_push_file, None);
        assert!(!s.castling.white_short && s.castling.black_long);
        assert_eq!(s.game_id, 7);
        assert_eq!(s.white, "Newton");
        assert_eq!(s.black, "Einstein");
        assert_eq!(s.relation, Relation::PlayingMyMove);
        assert_eq!(s.initial_time_secs, 2);
        assert_eq!(s.increment_secs, 12);
        assert_eq!(s.white_clock_ms, 119);
        assert_eq!(s.black_clock_ms, 122);
        assert_eq!(s.move_number, 2);
        assert_eq!(s.pretty_move, "Ke2");
        assert!(s.clock_ticking);
    }

    #[test]
    fn test_to_fen() {
        let s = Style12::parse(NEWTON).unwrap();
        assert_eq!(
            s.to_fen(),
            "rnbqkb1r/pppppppp/5n2/8/4P3/8/PPPPKPPP/RNBQ1BNR b kq - 0 2"
        );
    }

    #[test]
    fn test_en_passant_square() {
        let line = "<12> rnbqkbnr pppppppp -------- -------- ----P--- -------- PPPP-PPP RNBQKBNR B 4 1 1 1 1 0 12 alice bob -1 3 0 39 39 180000 180000 1 P/e2-e4 (0:00.000) e4 0 1 0";
        let s = Style12::parse(line).unwrap();
        assert_eq!(s.double_push_file, Some(4));
        assert_eq!(
            s.to_fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1"
        );
        let update = s.to_update();
        assert_eq!(update.game_id, 12);
        assert_eq!(update.relation, Relation::PlayingOpponentsMove);
        assert_eq!(
            update.last_move,
            Some(Move::new("e2".parse::<Square>().unwrap(), "e4".parse().unwrap()))
        );
        assert_eq!(update.last_move_san.as_deref(), Some("e4"));
        assert_eq!(update.white_clock_ms, 180000);
    }

    #[test]
    fn test_initial_position_has_no_last_move() {
        let line = "<12> rnbqkbnr pppppppp -------- -------- -------- -------- PPPPPPPP RNBQKBNR W -1 1 1 1 1 0 3 alice bob 1 3 0 39 39 180000 180000 1 none (0:00.000) none 0 0 0";
        let update = Style12::parse(line).unwrap().to_update();
        assert_eq!(update.last_move, None);
        assert_eq!(update.last_move_san, None);
        assert_eq!(update.relation, Relation::PlayingMyMove);
    }

    #[test]
    fn test_reject_malformed() {
        assert!(Style12::parse("<12> rnbqkbnr").is_err());
        assert!(Style12::parse("hello").is_err());
        let bad_relation = NEWTON.replace("Einstein 1 2", "Einstein 9 2");
        assert!(Style12::parse(&bad_relation).is_err());
    }
}
