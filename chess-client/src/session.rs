//! 多棋盘会话
//!
//! 按服务器对局号把事件分发给各自的 [`Game`]。对局之间互不影响，
//! 共享的只有规则库和设置组成的上下文。

use std::collections::BTreeMap;

use protocol::{GameId, ServerEvent};

use crate::error::GameError;
use crate::game::{Game, GameContext, GameEvent, MoveOutcome, Notification, Role, RoleRequest};
use crate::history::History;
use crate::network::CommandSink;

/// 本地分析棋盘的对局号（服务器对局号从 1 开始）
pub const SCRATCH_GAME: GameId = 0;

pub struct Session {
    ctx: GameContext,
    games: BTreeMap<GameId, Game>,
    scratch: Game,
    handle: Option<String>,
    registered: bool,
    /// 已请求与电脑对弈，等待服务器创建对局
    pending_computer: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(GameContext::default())
    }
}

impl Session {
    pub fn new(ctx: GameContext) -> Self {
        Self {
            scratch: Game::new(SCRATCH_GAME, ctx.clone()),
            ctx,
            games: BTreeMap::new(),
            handle: None,
            registered: false,
            pending_computer: false,
        }
    }

    pub fn context(&self) -> &GameContext {
        &self.ctx
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn registered(&self) -> bool {
        self.registered
    }

    /// 按对局号查找，`SCRATCH_GAME` 为本地分析棋盘
    pub fn game(&self, id: GameId) -> Option<&Game> {
        if id == SCRATCH_GAME {
            return Some(&self.scratch);
        }
        self.games.get(&id)
    }

    pub fn game_mut(&mut self, id: GameId) -> Option<&mut Game> {
        if id == SCRATCH_GAME {
            return Some(&mut self.scratch);
        }
        self.games.get_mut(&id)
    }

    /// 服务器对局，按对局号排序
    pub fn games(&self) -> impl Iterator<Item = &Game> {
        self.games.values()
    }

    pub fn scratch(&self) -> &Game {
        &self.scratch
    }

    /// 用载入的着法树替换本地分析棋盘
    pub fn load_scratch(&mut self, history: History) {
        tracing::info!("Loaded {} move(s) into the analysis board", history.len());
        self.scratch = Game::with_history(SCRATCH_GAME, history, self.ctx.clone());
    }

    /// 关闭一局（结束后界面不再需要时）
    pub fn remove(&mut self, id: GameId) -> Option<Game> {
        let game = self.games.remove(&id);
        if game.is_some() {
            tracing::debug!("Game {} removed from session", id);
        }
        game
    }

    /// 处理一个服务器事件，返回受影响的对局号
    pub fn dispatch(
        &mut self,
        event: ServerEvent,
        sink: &mut dyn CommandSink,
    ) -> Result<Option<GameId>, GameError> {
        let (id, game_event) = match event {
            ServerEvent::SessionStarted { handle, registered } => {
                self.handle = Some(handle);
                self.registered = registered;
                return Ok(None);
            }
            ServerEvent::GameCreated {
                game_id,
                white,
                black,
                description,
            } => {
                let ours = self.is_local_player(&white) || self.is_local_player(&black);
                let vs_computer = ours && std::mem::take(&mut self.pending_computer);
                // 服务器会复用对局号，新对局从空着法树开始
                let mut game = Game::new(game_id, self.ctx.clone());
                game.set_vs_computer(vs_computer);
                if self.games.insert(game_id, game).is_some() {
                    tracing::debug!("Game number {} reused, previous state discarded", game_id);
                }
                (
                    game_id,
                    GameEvent::Created {
                        white,
                        black,
                        description,
                    },
                )
            }
            ServerEvent::Position(update) => {
                let id = update.game_id;
                self.open(id);
                (id, GameEvent::Position(update))
            }
            ServerEvent::GameEnded {
                game_id,
                reason,
                result,
            } => (game_id, GameEvent::Ended { reason, result }),
            ServerEvent::ObservationStopped { game_id } => (game_id, GameEvent::ObservationStopped),
            ServerEvent::ExaminationStopped { game_id } => (game_id, GameEvent::ExaminationStopped),
            ServerEvent::LoginPrompt
            | ServerEvent::PasswordPrompt
            | ServerEvent::GuestPrompt { .. }
            | ServerEvent::Text(_) => return Ok(None),
        };

        let Some(game) = self.games.get_mut(&id) else {
            tracing::debug!("Ignoring event for unknown game {}", id);
            return Ok(None);
        };
        game.dispatch(game_event, sink)?;
        Ok(Some(id))
    }

    /// 把用户输入交给指定对局
    pub fn send_event(
        &mut self,
        id: GameId,
        event: GameEvent,
        sink: &mut dyn CommandSink,
    ) -> Result<Option<MoveOutcome>, GameError> {
        self.game_mut(id)
            .ok_or(GameError::UnknownGame(id))?
            .dispatch(event, sink)
    }

    /// 发出角色请求
    ///
    /// `game` 为空时是不针对任何对局的请求（研究、观看、约战），按角色 None 校验。
    pub fn request(
        &mut self,
        game: Option<GameId>,
        request: RoleRequest,
        sink: &mut dyn CommandSink,
    ) -> Result<(), GameError> {
        match game {
            Some(id) => self
                .game_mut(id)
                .ok_or(GameError::UnknownGame(id))?
                .request(&request, sink)?,
            None => {
                if !request.permitted_for(Role::None) {
                    tracing::warn!("{:?} rejected without a game", request);
                    return Err(GameError::RequestNotAllowed {
                        request: format!("{:?}", request),
                        role: Role::None,
                    });
                }
                sink.send_command(request.to_command(SCRATCH_GAME));
            }
        }
        // 电脑对局由随后的创建消息认领
        if matches!(request, RoleRequest::PlayComputer { .. }) {
            self.pending_computer = true;
        }
        Ok(())
    }

    /// 连接断开：所有对局的待确认与预走棋队列作废
    pub fn on_disconnect(&mut self) {
        let mut discarded = Vec::new();
        for game in self.games.values_mut() {
            if let Err(e) = game.dispatch(GameEvent::Disconnected, &mut discarded) {
                tracing::warn!("Game {}: teardown failed: {}", game.id(), e);
            }
        }
        self.pending_computer = false;
        self.handle = None;
        self.registered = false;
    }

    /// 取出所有对局积累的通知
    pub fn take_notifications(&mut self) -> Vec<(GameId, Notification)> {
        let mut out: Vec<(GameId, Notification)> = self
            .scratch
            .take_notifications()
            .into_iter()
            .map(|n| (SCRATCH_GAME, n))
            .collect();
        for (id, game) in self.games.iter_mut() {
            out.extend(game.take_notifications().into_iter().map(|n| (*id, n)));
        }
        out
    }

    fn open(&mut self, id: GameId) -> &mut Game {
        let ctx = &self.ctx;
        self.games.entry(id).or_insert_with(|| {
            tracing::info!("Tracking game {}", id);
            Game::new(id, ctx.clone())
        })
    }

    /// 登录名未知时任何对局都可能是本方的
    fn is_local_player(&self, name: &str) -> bool {
        self.handle.as_deref().map_or(true, |h| h == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::tests::update;
    use protocol::{ClientCommand, Move, PositionUpdate, Relation, STANDARD_START_FEN};

    const AFTER_E4: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";

    fn position(id: GameId, fen: &str, relation: Relation) -> ServerEvent {
        ServerEvent::Position(PositionUpdate {
            game_id: id,
            ..update(fen, relation, None)
        })
    }

    fn mv(uci: &str) -> Move {
        Move::from_uci(uci).unwrap()
    }

    #[test]
    fn test_events_routed_by_game_number() {
        let mut session = Session::default();
        let mut sink = Vec::new();

        let routed = session
            .dispatch(position(3, STANDARD_START_FEN, Relation::Observing), &mut sink)
            .unwrap();
        assert_eq!(routed, Some(3));
        session
            .dispatch(position(7, STANDARD_START_FEN, Relation::Examining), &mut sink)
            .unwrap();

        assert_eq!(session.games().count(), 2);
        assert_eq!(session.game(3).unwrap().role(), Role::Observing);
        assert_eq!(session.game(7).unwrap().role(), Role::Examining);

        session
            .dispatch(ServerEvent::ObservationStopped { game_id: 3 }, &mut sink)
            .unwrap();
        assert_eq!(session.game(3).unwrap().role(), Role::None);
        assert_eq!(session.game(7).unwrap().role(), Role::Examining);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_unrelated_lines_ignored() {
        let mut session = Session::default();
        let mut sink = Vec::new();
        let text = ServerEvent::Text("Welcome to FICS".to_string());
        assert_eq!(session.dispatch(text, &mut sink).unwrap(), None);
        let ended = ServerEvent::GameEnded {
            game_id: 9,
            reason: "alice resigns".to_string(),
            result: "0-1".to_string(),
        };
        assert_eq!(session.dispatch(ended, &mut sink).unwrap(), None);
        assert_eq!(session.games().count(), 0);
    }

    #[test]
    fn test_play_computer_request_marks_next_game() {
        let mut session = Session::default();
        let mut sink = Vec::new();
        session
            .dispatch(
                ServerEvent::SessionStarted {
                    handle: "alice".to_string(),
                    registered: true,
                },
                &mut sink,
            )
            .unwrap();

        let request = RoleRequest::PlayComputer {
            opponent: "GnuChess".to_string(),
            minutes: 3,
            increment: 0,
        };
        session.request(None, request, &mut sink).unwrap();
        assert_eq!(sink[0].to_line(), "match GnuChess 3 0 unrated");

        let created = ServerEvent::GameCreated {
            game_id: 1,
            white: "alice".to_string(),
            black: "GnuChess".to_string(),
            description: "Creating unrated blitz match".to_string(),
        };
        session.dispatch(created, &mut sink).unwrap();
        session
            .dispatch(position(1, STANDARD_START_FEN, Relation::PlayingMyMove), &mut sink)
            .unwrap();

        let game = session.game(1).unwrap();
        assert_eq!(game.role(), Role::PlayingComputer);
        assert_eq!(game.local_side(), Some(protocol::Color::White));
    }

    fn created(id: GameId, white: &str, black: &str) -> ServerEvent {
        ServerEvent::GameCreated {
            game_id: id,
            white: white.to_string(),
            black: black.to_string(),
            description: "Creating unrated blitz match".to_string(),
        }
    }

    #[test]
    fn test_reused_game_number_starts_fresh() {
        let mut session = Session::default();
        let mut sink = Vec::new();
        session
            .dispatch(
                ServerEvent::SessionStarted {
                    handle: "alice".to_string(),
                    registered: true,
                },
                &mut sink,
            )
            .unwrap();
        let request = RoleRequest::PlayComputer {
            opponent: "GnuChess".to_string(),
            minutes: 3,
            increment: 0,
        };
        session.request(None, request, &mut sink).unwrap();

        session.dispatch(created(1, "alice", "GnuChess"), &mut sink).unwrap();
        session
            .dispatch(position(1, STANDARD_START_FEN, Relation::PlayingMyMove), &mut sink)
            .unwrap();
        session
            .send_event(1, GameEvent::UserMove(mv("e2e4")), &mut sink)
            .unwrap();
        session
            .dispatch(position(1, AFTER_E4, Relation::PlayingOpponentsMove), &mut sink)
            .unwrap();
        session
            .dispatch(
                ServerEvent::GameEnded {
                    game_id: 1,
                    reason: "GnuChess resigns".to_string(),
                    result: "1-0".to_string(),
                },
                &mut sink,
            )
            .unwrap();
        assert_eq!(session.game(1).unwrap().history().metatag("Result"), Some("1-0"));

        session.dispatch(created(1, "alice", "carol"), &mut sink).unwrap();
        session
            .dispatch(position(1, STANDARD_START_FEN, Relation::PlayingMyMove), &mut sink)
            .unwrap();

        let game = session.game(1).unwrap();
        assert_eq!(game.role(), Role::PlayingWhite);
        assert!(game.history().is_empty());
        assert_eq!(game.history().metatag("Result"), None);
        assert_eq!(game.history().metatag("Termination"), None);
        assert_eq!(game.server_node(), game.history().root());
        assert!(game.pending_moves().is_empty());
    }

    #[test]
    fn test_computer_request_from_finished_game_marks_next_game() {
        let mut session = Session::default();
        let mut sink = Vec::new();
        session
            .dispatch(position(4, STANDARD_START_FEN, Relation::Observing), &mut sink)
            .unwrap();
        session
            .dispatch(ServerEvent::ObservationStopped { game_id: 4 }, &mut sink)
            .unwrap();

        let request = RoleRequest::PlayComputer {
            opponent: "GnuChess".to_string(),
            minutes: 3,
            increment: 0,
        };
        session.request(Some(4), request, &mut sink).unwrap();
        assert_eq!(sink[0].to_line(), "match GnuChess 3 0 unrated");

        // 发出请求的棋盘本身不会变成电脑对局
        session
            .dispatch(position(4, STANDARD_START_FEN, Relation::PlayingMyMove), &mut sink)
            .unwrap();
        assert_eq!(session.game(4).unwrap().role(), Role::PlayingWhite);

        session.dispatch(created(6, "GnuChess", "alice"), &mut sink).unwrap();
        session
            .dispatch(position(6, STANDARD_START_FEN, Relation::PlayingOpponentsMove), &mut sink)
            .unwrap();
        assert_eq!(session.game(6).unwrap().role(), Role::PlayingComputer);
    }

    #[test]
    fn test_requests_checked_before_sending() {
        let mut session = Session::default();
        let mut sink = Vec::new();
        assert!(matches!(
            session.request(None, RoleRequest::Draw, &mut sink),
            Err(GameError::RequestNotAllowed { role: Role::None, .. })
        ));
        assert_eq!(
            session.request(Some(42), RoleRequest::Resign, &mut sink),
            Err(GameError::UnknownGame(42))
        );
        session.request(None, RoleRequest::Observe(42), &mut sink).unwrap();
        assert_eq!(sink, vec![ClientCommand::Observe(42)]);
    }

    #[test]
    fn test_disconnect_clears_every_game() {
        let mut session = Session::default();
        let mut sink = Vec::new();
        session
            .dispatch(position(1, STANDARD_START_FEN, Relation::PlayingMyMove), &mut sink)
            .unwrap();
        session
            .send_event(1, GameEvent::UserMove(mv("e2e4")), &mut sink)
            .unwrap();
        assert_eq!(session.game(1).unwrap().pending_moves().len(), 1);

        session.on_disconnect();
        assert!(session.game(1).unwrap().pending_moves().is_empty());
        assert_eq!(session.handle(), None);

        // 断开后服务器的回显不再与任何待确认走法比较
        session
            .dispatch(position(1, AFTER_E4, Relation::PlayingOpponentsMove), &mut sink)
            .unwrap();
        assert_eq!(session.game(1).unwrap().history().len(), 1);
    }

    #[test]
    fn test_scratch_board_is_local() {
        let mut session = Session::default();
        let mut sink = Vec::new();
        let outcome = session
            .send_event(SCRATCH_GAME, GameEvent::UserMove(mv("e2e4")), &mut sink)
            .unwrap();
        assert_eq!(outcome, Some(MoveOutcome::Local));
        assert!(sink.is_empty());
        assert_eq!(session.scratch().history().len(), 1);

        let notes = session.take_notifications();
        assert!(notes
            .iter()
            .any(|(id, n)| *id == SCRATCH_GAME && matches!(n, Notification::NodeAdded { .. })));

        session.load_scratch(History::default());
        assert!(session.scratch().history().is_empty());
        assert!(session.remove(SCRATCH_GAME).is_none());
    }
}
