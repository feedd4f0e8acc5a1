//! 角色与角色请求
//!
//! 角色完全由服务器局面更新中的关系码决定，客户端只能发出请求并等待服务器确认。

use protocol::{ClientCommand, Color, GameId, Relation};
use serde::{Deserialize, Serialize};

/// 本方在对局中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Role {
    #[default]
    None,
    PlayingWhite,
    PlayingBlack,
    Examining,
    Observing,
    /// 观看他人研究的棋局
    ObservingExamined,
    PlayingComputer,
}

impl Role {
    /// 由关系码推出角色与本方颜色
    ///
    /// 对弈时本方颜色由走子方推出：轮到本方则本方是走子方，否则是对方。
    pub fn from_relation(
        relation: Relation,
        side_to_move: Color,
        vs_computer: bool,
    ) -> (Role, Option<Color>) {
        match relation {
            Relation::IsolatedPosition => (Role::None, None),
            Relation::ObservingExamined => (Role::ObservingExamined, None),
            Relation::Observing => (Role::Observing, None),
            Relation::Examining => (Role::Examining, None),
            Relation::PlayingMyMove | Relation::PlayingOpponentsMove => {
                let local = if relation == Relation::PlayingMyMove {
                    side_to_move
                } else {
                    side_to_move.opponent()
                };
                let role = match (vs_computer, local) {
                    (true, _) => Role::PlayingComputer,
                    (false, Color::White) => Role::PlayingWhite,
                    (false, Color::Black) => Role::PlayingBlack,
                };
                (role, Some(local))
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(
            self,
            Role::PlayingWhite | Role::PlayingBlack | Role::PlayingComputer
        )
    }

    pub fn is_observing(&self) -> bool {
        matches!(self, Role::Observing | Role::ObservingExamined)
    }

    /// 是否允许向服务器发送走法
    pub fn can_send_moves(&self) -> bool {
        self.is_playing() || *self == Role::Examining
    }
}

/// 角色转换请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleRequest {
    Examine,
    Observe(GameId),
    PlayComputer {
        opponent: String,
        minutes: u32,
        increment: u32,
    },
    Match {
        opponent: String,
        minutes: u32,
        increment: u32,
        rated: bool,
    },
    Resign,
    Abort,
    Draw,
    Takeback(u32),
    StopExamining,
    StopObserving,
}

impl RoleRequest {
    /// 当前角色下是否允许该请求
    pub fn permitted_for(&self, role: Role) -> bool {
        match self {
            RoleRequest::Examine
            | RoleRequest::Observe(_)
            | RoleRequest::PlayComputer { .. }
            | RoleRequest::Match { .. } => role == Role::None,
            RoleRequest::Resign
            | RoleRequest::Abort
            | RoleRequest::Draw
            | RoleRequest::Takeback(_) => role.is_playing(),
            RoleRequest::StopExamining => role == Role::Examining,
            RoleRequest::StopObserving => role.is_observing(),
        }
    }

    pub fn to_command(&self, game_id: GameId) -> ClientCommand {
        match self {
            RoleRequest::Examine => ClientCommand::Examine,
            RoleRequest::Observe(id) => ClientCommand::Observe(*id),
            RoleRequest::PlayComputer {
                opponent,
                minutes,
                increment,
            } => ClientCommand::Match {
                opponent: opponent.clone(),
                minutes: *minutes,
                increment: *increment,
                rated: false,
            },
            RoleRequest::Match {
                opponent,
                minutes,
                increment,
                rated,
            } => ClientCommand::Match {
                opponent: opponent.clone(),
                minutes: *minutes,
                increment: *increment,
                rated: *rated,
            },
            RoleRequest::Resign => ClientCommand::Resign,
            RoleRequest::Abort => ClientCommand::Abort,
            RoleRequest::Draw => ClientCommand::Draw,
            RoleRequest::Takeback(n) => ClientCommand::Takeback(*n),
            RoleRequest::StopExamining => ClientCommand::Unexamine,
            RoleRequest::StopObserving => ClientCommand::Unobserve(game_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_relation() {
        assert_eq!(
            Role::from_relation(Relation::PlayingMyMove, Color::White, false),
            (Role::PlayingWhite, Some(Color::White))
        );
        assert_eq!(
            Role::from_relation(Relation::PlayingOpponentsMove, Color::White, false),
            (Role::PlayingBlack, Some(Color::Black))
        );
        assert_eq!(
            Role::from_relation(Relation::PlayingOpponentsMove, Color::Black, true),
            (Role::PlayingComputer, Some(Color::White))
        );
        assert_eq!(
            Role::from_relation(Relation::Examining, Color::Black, false),
            (Role::Examining, None)
        );
        assert_eq!(
            Role::from_relation(Relation::IsolatedPosition, Color::White, false).0,
            Role::None
        );
    }

    #[test]
    fn test_request_permissions() {
        assert!(RoleRequest::Examine.permitted_for(Role::None));
        assert!(!RoleRequest::Examine.permitted_for(Role::Observing));
        assert!(RoleRequest::Draw.permitted_for(Role::PlayingComputer));
        assert!(!RoleRequest::Draw.permitted_for(Role::Observing));
        assert!(!RoleRequest::Resign.permitted_for(Role::Examining));
        assert!(RoleRequest::StopExamining.permitted_for(Role::Examining));
        assert!(RoleRequest::StopObserving.permitted_for(Role::ObservingExamined));
        assert!(!RoleRequest::StopObserving.permitted_for(Role::None));
    }

    #[test]
    fn test_request_commands() {
        assert_eq!(RoleRequest::StopObserving.to_command(42).to_line(), "unobserve 42");
        assert_eq!(RoleRequest::Takeback(2).to_command(7).to_line(), "takeback 2");
        let vs_computer = RoleRequest::PlayComputer {
            opponent: "GnuChess".to_string(),
            minutes: 5,
            increment: 0,
        };
        assert_eq!(vs_computer.to_command(0).to_line(), "match GnuChess 5 0 unrated");
    }
}
