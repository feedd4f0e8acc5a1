//! 消息类型定义
//!
//! 出站：类型化命令，渲染为服务器命令行。
//! 入站：按行分类为服务器事件。

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::moves::{Color, Move};
use crate::style12::{Relation, Style12, STYLE12_PREFIX};

/// 服务器对局号
pub type GameId = u32;

/// 一次局面更新（由 style12 行转换而来）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub game_id: GameId,
    /// 完整局面
    pub fen: String,
    /// 本方与对局的关系
    pub relation: Relation,
    pub white: String,
    pub black: String,
    /// 白方剩余时间（毫秒）
    pub white_clock_ms: i64,
    /// 黑方剩余时间（毫秒）
    pub black_clock_ms: i64,
    /// 到达此局面的走法（初始局面为空）
    pub last_move: Option<Move>,
    /// 服务器给出的简明记法
    pub last_move_san: Option<String>,
    pub initial_time_secs: u32,
    pub increment_secs: u32,
}

impl PositionUpdate {
    /// 局面中的走子方
    pub fn side_to_move(&self) -> Option<Color> {
        crate::fen::Fen::side_to_move(&self.fen).ok()
    }
}

/// 客户端发送给服务器的命令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientCommand {
    /// 原样发送的一行
    Raw(String),
    /// 走棋
    Move(Move),

    // === 对局 ===
    /// 发起挑战
    Match {
        opponent: String,
        minutes: u32,
        increment: u32,
        rated: bool,
    },
    /// 认输
    Resign,
    /// 中止
    Abort,
    /// 提和 / 接受和棋
    Draw,
    /// 请求悔棋若干半回合
    Takeback(u32),

    // === 观看与研究 ===
    /// 观看对局
    Observe(GameId),
    /// 停止观看
    Unobserve(GameId),
    /// 开始研究（新的空白棋局）
    Examine,
    /// 停止研究
    Unexamine,
    /// 研究中后退若干半回合
    Backward(u32),
    /// 研究中前进若干半回合
    Forward(u32),
    /// 请求重新发送当前局面
    Refresh,

    // === 会话 ===
    /// 设置变量
    Set { name: String, value: String },
    /// 设置界面变量
    Iset { name: String, value: String },
    /// 保活探测（任意无副作用命令）
    Date,
    /// 退出
    Quit,
}

impl ClientCommand {
    /// 渲染为服务器命令行（不含换行）
    pub fn to_line(&self) -> String {
        match self {
            ClientCommand::Raw(line) => line.clone(),
            ClientCommand::Move(mv) => mv.to_command(),
            ClientCommand::Match {
                opponent,
                minutes,
                increment,
                rated,
            } => format!(
                "match {} {} {} {}",
                opponent,
                minutes,
                increment,
                if *rated { "rated" } else { "unrated" }
            ),
            ClientCommand::Resign => "resign".to_string(),
            ClientCommand::Abort => "abort".to_string(),
            ClientCommand::Draw => "draw".to_string(),
            ClientCommand::Takeback(n) => format!("takeback {}", n),
            ClientCommand::Observe(id) => format!("observe {}", id),
            ClientCommand::Unobserve(id) => format!("unobserve {}", id),
            ClientCommand::Examine => "examine".to_string(),
            ClientCommand::Unexamine => "unexamine".to_string(),
            ClientCommand::Backward(n) => format!("backward {}", n),
            ClientCommand::Forward(n) => format!("forward {}", n),
            ClientCommand::Refresh => "refresh".to_string(),
            ClientCommand::Set { name, value } => format!("set {} {}", name, value),
            ClientCommand::Iset { name, value } => format!("iset {} {}", name, value),
            ClientCommand::Date => "date".to_string(),
            ClientCommand::Quit => "quit".to_string(),
        }
    }
}

/// 服务器发来的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    // === 登录 ===
    /// `login:` 提示
    LoginPrompt,
    /// `password:` 提示
    PasswordPrompt,
    /// 游客确认提示，附带分配的游客名
    GuestPrompt { handle: String },
    /// 会话开始
    SessionStarted { handle: String, registered: bool },

    // === 对局 ===
    /// 局面更新
    Position(PositionUpdate),
    /// 对局创建（或续弈）
    GameCreated {
        game_id: GameId,
        white: String,
        black: String,
        description: String,
    },
    /// 对局结束
    GameEnded {
        game_id: GameId,
        reason: String,
        result: String,
    },
    /// 不再观看
    ObservationStopped { game_id: GameId },
    /// 不再研究
    ExaminationStopped { game_id: GameId },

    /// 其他文本
    Text(String),
}

impl ServerEvent {
    /// 对局相关事件的对局号
    pub fn game_id(&self) -> Option<GameId> {
        match self {
            ServerEvent::Position(update) => Some(update.game_id),
            ServerEvent::GameCreated { game_id, .. }
            | ServerEvent::GameEnded { game_id, .. }
            | ServerEvent::ObservationStopped { game_id }
            | ServerEvent::ExaminationStopped { game_id } => Some(*game_id),
            _ => None,
        }
    }

    /// 分类一行服务器输出
    ///
    /// 只有格式错误的 style12 行会返回错误，无法识别的行一律为 `Text`。
    pub fn parse(line: &str) -> Result<ServerEvent> {
        let trimmed = line.trim();

        if trimmed.starts_with(STYLE12_PREFIX) {
            return Ok(ServerEvent::Position(Style12::parse(trimmed)?.to_update()));
        }
        if trimmed == "login:" {
            return Ok(ServerEvent::LoginPrompt);
        }
        if trimmed == "password:" {
            return Ok(ServerEvent::PasswordPrompt);
        }
        if let Some(event) = parse_guest_prompt(trimmed)
            .or_else(|| parse_session_start(trimmed))
            .or_else(|| parse_game_notice(trimmed))
            .or_else(|| parse_stopped(trimmed))
        {
            return Ok(event);
        }
        Ok(ServerEvent::Text(line.to_string()))
    }
}

/// `Press return to enter the server as "GuestABCD":`
fn parse_guest_prompt(line: &str) -> Option<ServerEvent> {
    let rest = line.strip_prefix("Press return to enter the server as \"")?;
    let (handle, _) = rest.split_once('"')?;
    Some(ServerEvent::GuestPrompt {
        handle: handle.to_string(),
    })
}

/// `**** Starting FICS session as GuestABCD(U) ****`
fn parse_session_start(line: &str) -> Option<ServerEvent> {
    let rest = line.strip_prefix("**** Starting FICS session as ")?;
    let name = rest.strip_suffix("****")?.trim();
    // 句柄后可能跟若干标记，如 (U)、(C)
    let handle_end = name.find('(').unwrap_or(name.len());
    let handle = &name[..handle_end];
    if handle.is_empty() {
        return None;
    }
    Some(ServerEvent::SessionStarted {
        handle: handle.to_string(),
        registered: !name.contains("(U)"),
    })
}

/// `{Game 12 (alice vs. bob) Creating rated blitz match.}`
/// `{Game 12 (alice vs. bob) alice resigns} 0-1`
fn parse_game_notice(line: &str) -> Option<ServerEvent> {
    let rest = line.strip_prefix("{Game ")?;
    let (id, rest) = rest.split_once(' ')?;
    let game_id: GameId = id.parse().ok()?;
    let rest = rest.strip_prefix('(')?;
    let (players, rest) = rest.split_once(") ")?;
    let (white, black) = players.split_once(" vs. ")?;
    let (text, tail) = rest.split_once('}')?;
    let tail = tail.trim();

    if text.starts_with("Creating") || text.starts_with("Continuing") {
        return Some(ServerEvent::GameCreated {
            game_id,
            white: white.to_string(),
            black: black.to_string(),
            description: text.trim_end_matches('.').to_string(),
        });
    }
    if matches!(tail, "1-0" | "0-1" | "1/2-1/2" | "*") {
        return Some(ServerEvent::GameEnded {
            game_id,
            reason: text.to_string(),
            result: tail.to_string(),
        });
    }
    None
}

/// `Removing game 12 from observation list.` / `You are no longer examining game 12.`
fn parse_stopped(line: &str) -> Option<ServerEvent> {
    if let Some(rest) = line.strip_prefix("Removing game ") {
        let (id, _) = rest.split_once(' ')?;
        return Some(ServerEvent::ObservationStopped {
            game_id: id.parse().ok()?,
        });
    }
    if let Some(rest) = line.strip_prefix("You are no longer examining game ") {
        let id = rest.trim_end_matches('.');
        return Some(ServerEvent::ExaminationStopped {
            game_id: id.parse().ok()?,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_lines() {
        let mv = Move::from_uci("e7e8q").unwrap();
        assert_eq!(ClientCommand::Move(mv).to_line(), "e7e8=q");
        assert_eq!(
            ClientCommand::Match {
                opponent: "bob".to_string(),
                minutes: 3,
                increment: 2,
                rated: false,
            }
            .to_line(),
            "match bob 3 2 unrated"
        );
        assert_eq!(ClientCommand::Backward(3).to_line(), "backward 3");
        assert_eq!(ClientCommand::Observe(77).to_line(), "observe 77");
        assert_eq!(
            ClientCommand::Iset {
                name: "ms".to_string(),
                value: "1".to_string()
            }
            .to_line(),
            "iset ms 1"
        );
    }

    #[test]
    fn test_command_serialize() {
        let cmd = ClientCommand::Takeback(2);
        let json = serde_json::to_string(&cmd).unwrap();
        let decoded: ClientCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, cmd);
    }

    #[test]
    fn test_parse_login_events() {
        assert_eq!(ServerEvent::parse("login:").unwrap(), ServerEvent::LoginPrompt);
        assert_eq!(ServerEvent::parse("password: ").unwrap(), ServerEvent::PasswordPrompt);
        assert_eq!(
            ServerEvent::parse("Press return to enter the server as \"GuestQXYZ\":").unwrap(),
            ServerEvent::GuestPrompt {
                handle: "GuestQXYZ".to_string()
            }
        );
        assert_eq!(
            ServerEvent::parse("**** Starting FICS session as GuestQXYZ(U) ****").unwrap(),
            ServerEvent::SessionStarted {
                handle: "GuestQXYZ".to_string(),
                registered: false
            }
        );
        assert_eq!(
            ServerEvent::parse("**** Starting FICS session as alice ****").unwrap(),
            ServerEvent::SessionStarted {
                handle: "alice".to_string(),
                registered: true
            }
        );
    }

    #[test]
    fn test_parse_game_notices() {
        let created = ServerEvent::parse("{Game 12 (alice vs. bob) Creating rated blitz match.}").unwrap();
        assert_eq!(
            created,
            ServerEvent::GameCreated {
                game_id: 12,
                white: "alice".to_string(),
                black: "bob".to_string(),
                description: "Creating rated blitz match".to_string(),
            }
        );
        let ended = ServerEvent::parse("{Game 12 (alice vs. bob) alice resigns} 0-1").unwrap();
        assert_eq!(
            ended,
            ServerEvent::GameEnded {
                game_id: 12,
                reason: "alice resigns".to_string(),
                result: "0-1".to_string(),
            }
        );
        assert_eq!(ended.game_id(), Some(12));
        assert_eq!(
            ServerEvent::parse("Removing game 31 from observation list.").unwrap(),
            ServerEvent::ObservationStopped { game_id: 31 }
        );
        assert_eq!(
            ServerEvent::parse("You are no longer examining game 5.").unwrap(),
            ServerEvent::ExaminationStopped { game_id: 5 }
        );
    }

    #[test]
    fn test_parse_position_and_text() {
        let line = "<12> rnbqkbnr pppppppp -------- -------- ----P--- -------- PPPP-PPP RNBQKBNR B 4 1 1 1 1 0 12 alice bob -1 3 0 39 39 180000 180000 1 P/e2-e4 (0:00.000) e4 0 1 0";
        match ServerEvent::parse(line).unwrap() {
            ServerEvent::Position(update) => {
                assert_eq!(update.game_id, 12);
                assert_eq!(update.side_to_move(), Some(Color::Black));
            }
            other => panic!("Wrong event: {:?}", other),
        }
        assert!(ServerEvent::parse("<12> garbage").is_err());
        assert_eq!(
            ServerEvent::parse("Illegal move (e2e5).").unwrap(),
            ServerEvent::Text("Illegal move (e2e5).".to_string())
        );
    }
}
