//! 规则库适配
//!
//! 同步引擎只通过 [`RulesOracle`] 获取新局面，自身不懂棋规。
//! 调用必须是确定且无副作用的，以便投机地用于乐观走子与预走棋校验。

use std::collections::BTreeMap;

use protocol::{ChessError, Move, Square};
use serde::{Deserialize, Serialize};
use shakmaty::fen::{Fen, LossyFenError};
use shakmaty::uci::UciMove;
use shakmaty::variant::Crazyhouse;
use shakmaty::{
    attacks, Bitboard, CastlingMode, Chess, Color, EnPassantMode, File, FromSetup, Piece, Position,
    PositionError, Rank, Role, Setup,
};

/// 变体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VariantCategory {
    #[default]
    Chess,
    /// 吃子入手、可落子
    Crazyhouse,
}

impl VariantCategory {
    /// 从服务器对局描述推断（如 `Creating unrated crazyhouse match`）
    pub fn from_description(description: &str) -> Self {
        if description.to_ascii_lowercase().contains("crazyhouse") {
            VariantCategory::Crazyhouse
        } else {
            VariantCategory::Chess
        }
    }
}

/// 走子结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// 走后局面
    pub fen: String,
    /// 规范化后的走法（易位统一为王走两格）
    pub mv: Move,
    /// 需要随局面传递的变体数据
    pub variant_data: Option<String>,
}

/// 规则库接口
pub trait RulesOracle: Send + Sync {
    /// 在 `fen` 上走 `mv`
    ///
    /// `is_premove` 为真时放宽局面校验（走子方是强制指定的）。
    fn apply_move(
        &self,
        fen: &str,
        mv: &Move,
        initial_fen: &str,
        variant: VariantCategory,
        variant_data: Option<&str>,
        is_premove: bool,
    ) -> Result<Applied, ChessError>;

    /// 每个起始格可到达的格子
    fn legal_destinations(
        &self,
        fen: &str,
        initial_fen: &str,
        variant: VariantCategory,
        variant_data: Option<&str>,
    ) -> Result<BTreeMap<Square, Vec<Square>>, ChessError>;
}

/// 基于 shakmaty 的规则库
#[derive(Debug, Clone, Copy, Default)]
pub struct ShakmatyOracle;

impl RulesOracle for ShakmatyOracle {
    fn apply_move(
        &self,
        fen: &str,
        mv: &Move,
        _initial_fen: &str,
        variant: VariantCategory,
        variant_data: Option<&str>,
        is_premove: bool,
    ) -> Result<Applied, ChessError> {
        match variant {
            VariantCategory::Chess => {
                let (after, mv) = play_fen::<Chess>(fen, mv, is_premove)?;
                Ok(Applied {
                    fen: after,
                    mv,
                    variant_data: None,
                })
            }
            VariantCategory::Crazyhouse => {
                let full = with_holdings(fen, variant_data);
                let (after, mv) = play_fen::<Crazyhouse>(&full, mv, is_premove)?;
                Ok(Applied {
                    fen: strip_holdings(&after),
                    mv,
                    variant_data: Some(after),
                })
            }
        }
    }

    fn legal_destinations(
        &self,
        fen: &str,
        _initial_fen: &str,
        variant: VariantCategory,
        variant_data: Option<&str>,
    ) -> Result<BTreeMap<Square, Vec<Square>>, ChessError> {
        match variant {
            VariantCategory::Chess => {
                let pos: Chess = setup(fen, false)?;
                Ok(destinations(&pos))
            }
            VariantCategory::Crazyhouse => {
                let pos: Crazyhouse = setup(&with_holdings(fen, variant_data), false)?;
                Ok(destinations(&pos))
            }
        }
    }
}

fn setup<P: FromSetup + Position>(fen: &str, is_premove: bool) -> Result<P, ChessError> {
    let parsed: Fen = fen.parse().map_err(|e| ChessError::InvalidFen {
        reason: format!("{}: {}", e, fen),
    })?;
    let position = parsed.into_position::<P>(CastlingMode::Standard);
    let position = if is_premove {
        position.or_else(PositionError::ignore_impossible_check)
    } else {
        position
    };
    position.map_err(|e| ChessError::InvalidFen {
        reason: format!("{}: {}", e, fen),
    })
}

fn play_fen<P: FromSetup + Position>(
    fen: &str,
    mv: &Move,
    is_premove: bool,
) -> Result<(String, Move), ChessError> {
    match setup::<P>(fen, is_premove) {
        Ok(pos) => play(pos, mv, fen),
        // 本方刚将军后强制本方走子，对方王处于被将状态，规则库拒绝构造该局面
        Err(_) if is_premove => play_pseudo_legal(fen, mv),
        Err(e) => Err(e),
    }
}

fn play<P: Position>(pos: P, mv: &Move, fen: &str) -> Result<(String, Move), ChessError> {
    let illegal = || ChessError::IllegalMove {
        mv: mv.to_uci(),
        fen: fen.to_string(),
    };
    let uci: UciMove = mv.to_uci().parse().map_err(|_| ChessError::InvalidMove {
        text: mv.to_uci(),
    })?;
    let legal = uci.to_move(&pos).map_err(|_| illegal())?;
    let normalized = Move::from_uci(&legal.to_uci(CastlingMode::Standard).to_string())?;
    let after = pos.play(legal).map_err(|_| illegal())?;
    Ok((Fen::from_position(&after, EnPassantMode::Legal).to_string(), normalized))
}

/// 只按棋子走法校验预走棋（不检查本方王是否被将），执行时会在真实局面上重新校验
fn play_pseudo_legal(fen: &str, mv: &Move) -> Result<(String, Move), ChessError> {
    let illegal = || ChessError::IllegalMove {
        mv: mv.to_uci(),
        fen: fen.to_string(),
    };
    let parsed: Fen = fen.parse().map_err(|e| ChessError::InvalidFen {
        reason: format!("{}: {}", e, fen),
    })?;
    let uci: UciMove = mv.to_uci().parse().map_err(|_| ChessError::InvalidMove {
        text: mv.to_uci(),
    })?;

    let mut setup = parsed.into_setup();
    let us = setup.turn;
    let mut reset_halfmoves = false;
    match uci {
        UciMove::Normal { from, to, promotion } => {
            let piece = setup
                .board
                .piece_at(from)
                .filter(|p| p.color == us)
                .ok_or_else(illegal)?;
            if setup.board.by_color(us).contains(to) {
                return Err(illegal());
            }
            let occupied = setup.board.occupied();
            let castling = piece.role == Role::King
                && from.rank() == to.rank()
                && from.distance(to) == 2;

            if castling {
                let kingside = to.file() > from.file();
                let rook = shakmaty::Square::from_coords(
                    if kingside { File::H } else { File::A },
                    from.rank(),
                );
                if !setup.castling_rights.contains(rook) || (attacks::between(from, rook) & occupied).any() {
                    return Err(illegal());
                }
                let rook_to = shakmaty::Square::from_coords(
                    if kingside { File::F } else { File::D },
                    from.rank(),
                );
                setup.board.remove_piece_at(from);
                setup.board.remove_piece_at(rook);
                setup.board.set_piece_at(to, piece);
                setup.board.set_piece_at(rook_to, Piece { color: us, role: Role::Rook });
            } else {
                let reach = if piece.role == Role::Pawn {
                    pawn_reach(&setup, us, from)
                } else {
                    attacks::attacks(from, piece, occupied)
                };
                if !reach.contains(to) {
                    return Err(illegal());
                }
                let last_rank = match us {
                    Color::White => Rank::Eighth,
                    Color::Black => Rank::First,
                };
                let role = match (piece.role, promotion) {
                    (Role::Pawn, Some(role)) if to.rank() == last_rank && role != Role::Pawn && role != Role::King => role,
                    (Role::Pawn, None) if to.rank() != last_rank => Role::Pawn,
                    (role, None) if role != Role::Pawn => role,
                    _ => return Err(illegal()),
                };

                let was_promoted = setup.promoted.contains(from);
                setup.board.remove_piece_at(from);
                setup.promoted.discard(from);
                if let Some(captured) = setup.board.remove_piece_at(to) {
                    let pocket_role = if setup.promoted.contains(to) { Role::Pawn } else { captured.role };
                    if let Some(pockets) = setup.pockets.as_mut() {
                        *pockets.get_mut(us).get_mut(pocket_role) += 1;
                    }
                    setup.promoted.discard(to);
                    reset_halfmoves = true;
                }
                setup.board.set_piece_at(to, Piece { color: us, role });
                if was_promoted || (piece.role == Role::Pawn && role != Role::Pawn && setup.pockets.is_some()) {
                    setup.promoted.add(to);
                }
                reset_halfmoves |= piece.role == Role::Pawn;
            }

            setup.castling_rights.discard(from);
            setup.castling_rights.discard(to);
            if piece.role == Role::King {
                for file in [File::A, File::H] {
                    setup.castling_rights.discard(shakmaty::Square::from_coords(file, from.rank()));
                }
            }
        }
        UciMove::Put { role, to } => {
            let back_ranks = [Rank::First, Rank::Eighth];
            if setup.board.occupied().contains(to)
                || (role == Role::Pawn && back_ranks.contains(&to.rank()))
            {
                return Err(illegal());
            }
            let pockets = setup.pockets.as_mut().ok_or_else(illegal)?;
            let count = pockets.get_mut(us).get_mut(role);
            if *count == 0 {
                return Err(illegal());
            }
            *count -= 1;
            setup.board.set_piece_at(to, Piece { color: us, role });
        }
        UciMove::Null => return Err(illegal()),
    }

    setup.turn = !us;
    setup.ep_square = None;
    setup.halfmoves = if reset_halfmoves { 0 } else { setup.halfmoves.saturating_add(1) };
    if us == Color::Black {
        setup.fullmoves = setup.fullmoves.saturating_add(1);
    }
    Ok((Fen::try_from_setup(setup).unwrap_or_else(LossyFenError::ignore).to_string(), *mv))
}

/// 兵的推进与吃子目标（强制换边后没有吃过路兵格）
fn pawn_reach(setup: &Setup, us: Color, from: shakmaty::Square) -> Bitboard {
    let occupied = setup.board.occupied();
    let (forward, start) = match us {
        Color::White => (8, Rank::Second),
        Color::Black => (-8, Rank::Seventh),
    };
    let mut reach = attacks::pawn_attacks(us, from) & setup.board.by_color(!us);
    if let Some(one) = from.offset(forward).filter(|sq| !occupied.contains(*sq)) {
        reach.add(one);
        if from.rank() == start {
            if let Some(two) = one.offset(forward).filter(|sq| !occupied.contains(*sq)) {
                reach.add(two);
            }
        }
    }
    reach
}

fn destinations<P: Position>(pos: &P) -> BTreeMap<Square, Vec<Square>> {
    let mut map: BTreeMap<Square, Vec<Square>> = BTreeMap::new();
    for legal in pos.legal_moves() {
        let text = legal.to_uci(CastlingMode::Standard).to_string();
        if let Ok(Move { from: Some(from), to, .. }) = Move::from_uci(&text) {
            map.entry(from).or_default().push(to);
        }
    }
    for targets in map.values_mut() {
        targets.sort();
        targets.dedup();
    }
    map
}

/// 还原带手中棋子的完整局面：变体数据与当前局面一致时使用变体数据，否则视为手中无子
fn with_holdings(fen: &str, variant_data: Option<&str>) -> String {
    if let Some(full) = variant_data {
        if protocol::Fen::same_position(&strip_holdings(full), fen) {
            return full.to_string();
        }
    }
    let mut fields: Vec<String> = fen.split_whitespace().map(str::to_string).collect();
    if let Some(board) = fields.first_mut() {
        if !board.contains('[') {
            board.push_str("[]");
        }
    }
    fields.join(" ")
}

/// 去掉棋盘字段中的手中棋子与升变标记，得到服务器格式的局面
fn strip_holdings(fen: &str) -> String {
    let mut fields = fen.split_whitespace();
    let board = fields.next().unwrap_or_default();
    let board: String = match board.split_once('[') {
        Some((placement, _)) => placement.to_string(),
        None => board.to_string(),
    };
    let board = board.replace('~', "");
    std::iter::once(board.as_str())
        .chain(fields)
        .collect::<Vec<_>>()
        .join(" ")
}
