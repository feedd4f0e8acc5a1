//! 走法与基础棋盘类型

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChessError;

/// 阵营
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// 获取对方阵营
    pub fn opponent(&self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// FEN 中的走子方字符
    pub fn fen_char(&self) -> char {
        match self {
            Color::White => 'w',
            Color::Black => 'b',
        }
    }

    /// 从 FEN 字符解析（`w`/`b`，style12 中为 `W`/`B`）
    pub fn from_char(c: char) -> Option<Color> {
        match c.to_ascii_lowercase() {
            'w' => Some(Color::White),
            'b' => Some(Color::Black),
            _ => None,
        }
    }
}

/// 棋子种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PieceKind {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceKind {
    /// 小写字母表示
    pub fn to_char(&self) -> char {
        match self {
            PieceKind::Pawn => 'p',
            PieceKind::Knight => 'n',
            PieceKind::Bishop => 'b',
            PieceKind::Rook => 'r',
            PieceKind::Queen => 'q',
            PieceKind::King => 'k',
        }
    }

    /// 从字母解析（不区分大小写）
    pub fn from_char(c: char) -> Option<PieceKind> {
        match c.to_ascii_lowercase() {
            'p' => Some(PieceKind::Pawn),
            'n' => Some(PieceKind::Knight),
            'b' => Some(PieceKind::Bishop),
            'r' => Some(PieceKind::Rook),
            'q' => Some(PieceKind::Queen),
            'k' => Some(PieceKind::King),
            _ => None,
        }
    }
}

/// 棋盘格（a1 = 0，h8 = 63）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Square(u8);

impl Square {
    /// 由列（0-7）和行（0-7）创建
    pub fn new(file: u8, rank: u8) -> Option<Self> {
        if file < 8 && rank < 8 {
            Some(Self(rank * 8 + file))
        } else {
            None
        }
    }

    /// 列（0 = a）
    pub fn file(&self) -> u8 {
        self.0 % 8
    }

    /// 行（0 = 第 1 行）
    pub fn rank(&self) -> u8 {
        self.0 / 8
    }

    /// 线性下标
    pub fn index(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", (b'a' + self.file()) as char, self.rank() + 1)
    }
}

impl FromStr for Square {
    type Err = ChessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let invalid = || ChessError::InvalidSquare { text: s.to_string() };
        if bytes.len() != 2 {
            return Err(invalid());
        }
        let file = bytes[0].to_ascii_lowercase().wrapping_sub(b'a');
        let rank = bytes[1].wrapping_sub(b'1');
        Square::new(file, rank).ok_or_else(invalid)
    }
}

/// 结构化走法
///
/// 普通走法有 `from`；落子（crazyhouse 类变体）没有 `from`，由 `drop` 指明棋子种类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// 起始格（落子时为空）
    pub from: Option<Square>,
    /// 目标格
    pub to: Square,
    /// 升变棋子
    pub promotion: Option<PieceKind>,
    /// 落子的棋子种类
    pub drop: Option<PieceKind>,
}

impl Move {
    /// 创建普通走法
    pub fn new(from: Square, to: Square) -> Self {
        Self {
            from: Some(from),
            to,
            promotion: None,
            drop: None,
        }
    }

    /// 创建升变走法
    pub fn with_promotion(from: Square, to: Square, promotion: PieceKind) -> Self {
        Self {
            from: Some(from),
            to,
            promotion: Some(promotion),
            drop: None,
        }
    }

    /// 创建落子走法
    pub fn drop_piece(kind: PieceKind, to: Square) -> Self {
        Self {
            from: None,
            to,
            promotion: None,
            drop: Some(kind),
        }
    }

    /// 是否为落子
    pub fn is_drop(&self) -> bool {
        self.drop.is_some()
    }

    /// 解析坐标记法：`e2e4`、`e7e8q`、`e7e8=q`、`N@f3`
    pub fn from_uci(text: &str) -> Result<Move, ChessError> {
        let invalid = || ChessError::InvalidMove { text: text.to_string() };
        let text = text.trim();

        if let Some((piece, to)) = text.split_once('@') {
            let mut chars = piece.chars();
            let kind = match (chars.next(), chars.next()) {
                (Some(c), None) => PieceKind::from_char(c).ok_or_else(invalid)?,
                _ => return Err(invalid()),
            };
            let to: Square = to.parse().map_err(|_| invalid())?;
            return Ok(Move::drop_piece(kind, to));
        }

        if !text.is_ascii() || text.len() < 4 {
            return Err(invalid());
        }
        let from: Square = text[0..2].parse().map_err(|_| invalid())?;
        let to: Square = text[2..4].parse().map_err(|_| invalid())?;
        let promotion = match text[4..].trim_start_matches('=') {
            "" => None,
            p if p.len() == 1 => {
                let kind = p.chars().next().and_then(PieceKind::from_char).ok_or_else(invalid)?;
                Some(kind)
            }
            _ => return Err(invalid()),
        };

        Ok(Move {
            from: Some(from),
            to,
            promotion,
            drop: None,
        })
    }

    /// 坐标记法（`e7e8q`、`N@f3`）
    pub fn to_uci(&self) -> String {
        match (self.from, self.drop) {
            (_, Some(kind)) => format!("{}@{}", kind.to_char().to_ascii_uppercase(), self.to),
            (Some(from), None) => match self.promotion {
                Some(p) => format!("{}{}{}", from, self.to, p.to_char()),
                None => format!("{}{}", from, self.to),
            },
            (None, None) => self.to.to_string(),
        }
    }

    /// 发送给服务器的命令形式（升变写作 `e7e8=q`）
    pub fn to_command(&self) -> String {
        match (self.from, self.promotion) {
            (Some(from), Some(p)) if self.drop.is_none() => format!("{}{}={}", from, self.to, p.to_char()),
            _ => self.to_uci(),
        }
    }

    /// 解析 style12 详细记法
    ///
    /// `P/e2-e4`、`P/e7-e8=Q`、`N/g1-f3`、`o-o`、`o-o-o`、`P/@@-e4`；
    /// `none` 表示没有上一步，返回 `Ok(None)`。`mover` 为走出这步棋的一方。
    pub fn from_verbose(text: &str, mover: Color) -> Result<Option<Move>, ChessError> {
        let invalid = || ChessError::InvalidMove { text: text.to_string() };
        let text = text.trim();
        if text == "none" {
            return Ok(None);
        }

        let back_rank = match mover {
            Color::White => 0,
            Color::Black => 7,
        };
        let castle = |to_file: u8| -> Result<Option<Move>, ChessError> {
            let from = Square::new(4, back_rank).ok_or_else(invalid)?;
            let to = Square::new(to_file, back_rank).ok_or_else(invalid)?;
            Ok(Some(Move::new(from, to)))
        };
        match text.to_ascii_lowercase().as_str() {
            "o-o" => return castle(6),
            "o-o-o" => return castle(2),
            _ => {}
        }

        let (piece, rest) = text.split_once('/').ok_or_else(invalid)?;
        let kind = piece.chars().next().and_then(PieceKind::from_char).ok_or_else(invalid)?;
        let (from, rest) = rest.split_once('-').ok_or_else(invalid)?;
        let (to, promotion) = match rest.split_once('=') {
            Some((to, p)) => {
                let kind = p.chars().next().and_then(PieceKind::from_char).ok_or_else(invalid)?;
                (to, Some(kind))
            }
            None => (rest, None),
        };
        let to: Square = to.parse().map_err(|_| invalid())?;

        if from == "@@" {
            return Ok(Some(Move::drop_piece(kind, to)));
        }
        let from: Square = from.parse().map_err(|_| invalid())?;
        Ok(Some(Move {
            from: Some(from),
            to,
            promotion,
            drop: None,
        }))
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uci())
    }
}

impl FromStr for Move {
    type Err = ChessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Move::from_uci(s)
    }
}
