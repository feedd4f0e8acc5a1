//! 终端前端：从标准输入读取命令，打印对局通知

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chess_client::game::{BranchChoice, GameEvent, Navigation, Notification, RoleRequest};
use chess_client::oracle::ShakmatyOracle;
use chess_client::settings::ClientSettings;
use chess_client::storage::StorageManager;
use chess_client::{
    ConnectionEvent, ConnectionStatus, GameContext, NetworkConnection, Role, Session, SCRATCH_GAME,
};
use protocol::{GameId, Move, TcpConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const HELP: &str = "\
commands:
  <uci>                    move on the focused board (e2e4, e7e8q, N@f3)
  focus <n>                switch board (0 is the analysis board)
  first | prev | next | last
  overwrite | variation    answer a branch question
  cancel                   cancel premoves
  observe <n> | unobserve | examine | unexamine
  match <name> <min> <inc> [rated] | computer <name> <min> <inc>
  resign | abort | draw | takeback [n]
  show | save | saves | load <file>
  raw <text>               send a raw server command
  quit";

#[tokio::main]
async fn main() -> Result<()> {
    let settings = ClientSettings::load();

    // RUST_LOG 优先于设置中的日志级别
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = settings.log_level.as_filter();
        EnvFilter::new(format!("chess_client={},protocol={}", level, level))
    });
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let ctx = GameContext::new(Arc::new(ShakmatyOracle), settings.sync_settings());
    let mut session = Session::new(ctx);
    let storage = StorageManager::new()?;

    let (mut conn, mut events) = NetworkConnection::spawn(TcpConnector, settings.login_config());
    conn.connect();
    println!("{}", HELP);

    let mut focus: GameId = SCRATCH_GAME;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ConnectionEvent::Server(event) => {
                        match session.dispatch(event, &mut conn) {
                            Ok(Some(id)) if focus == SCRATCH_GAME => focus = id,
                            Ok(_) => {}
                            Err(e) => tracing::warn!("{}", e),
                        }
                    }
                    ConnectionEvent::Status(status) => {
                        println!("* {:?}", status);
                        if matches!(status, ConnectionStatus::Disconnected | ConnectionStatus::Error) {
                            session.on_disconnect();
                        }
                    }
                    ConnectionEvent::Error(e) => println!("! {}", e),
                }
            }
            line = stdin.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(line.trim(), &mut session, &mut conn, &storage, &mut focus) {
                    conn.close();
                    break;
                }
            }
        }
        print_notifications(&mut session);
    }

    // 等待驱动发出 quit 并关闭连接
    if conn.status() == ConnectionStatus::Connected {
        let closed = async {
            while let Some(event) = events.recv().await {
                if event == ConnectionEvent::Status(ConnectionStatus::Disconnected) {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(Duration::from_secs(2), closed).await;
    }
    Ok(())
}

/// 执行一条终端命令，返回 false 表示退出
fn run_command(
    line: &str,
    session: &mut Session,
    conn: &mut NetworkConnection,
    storage: &StorageManager,
    focus: &mut GameId,
) -> bool {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, args)) = words.split_first() else {
        return true;
    };
    let arg = |i: usize| args.get(i).copied().unwrap_or_default();
    let number = |i: usize, default: u32| arg(i).parse().unwrap_or(default);

    let event = match command {
        "quit" => return false,
        "help" => {
            println!("{}", HELP);
            return true;
        }
        "focus" => {
            *focus = number(0, SCRATCH_GAME);
            return true;
        }
        "raw" => {
            conn.send_line(line.trim_start_matches("raw").trim());
            return true;
        }
        "show" => {
            show(session, *focus);
            return true;
        }
        "save" => {
            if let Some(game) = session.game(*focus) {
                match storage.save_history(game.history()) {
                    Ok(name) => println!("saved {}", name),
                    Err(e) => println!("! {:#}", e),
                }
            }
            return true;
        }
        "saves" => {
            match storage.list() {
                Ok(games) => {
                    for info in games {
                        println!("{}  {}  {}", info.formatted_time(), info.name, info.display_name());
                    }
                }
                Err(e) => println!("! {:#}", e),
            }
            return true;
        }
        "load" => {
            match storage.load_history(arg(0)) {
                Ok(history) => {
                    session.load_scratch(history);
                    *focus = SCRATCH_GAME;
                }
                Err(e) => println!("! {:#}", e),
            }
            return true;
        }
        "first" => GameEvent::Navigate(Navigation::First),
        "prev" => GameEvent::Navigate(Navigation::Prev),
        "next" => GameEvent::Navigate(Navigation::Next),
        "last" => GameEvent::Navigate(Navigation::Last),
        "overwrite" => GameEvent::ChooseBranch(BranchChoice::Overwrite),
        "variation" => GameEvent::ChooseBranch(BranchChoice::NewVariation),
        "cancel" => GameEvent::CancelPremoves,
        _ => {
            let request = match command {
                "observe" => Some(RoleRequest::Observe(number(0, 0))),
                "unobserve" => Some(RoleRequest::StopObserving),
                "examine" => Some(RoleRequest::Examine),
                "unexamine" => Some(RoleRequest::StopExamining),
                "match" => Some(RoleRequest::Match {
                    opponent: arg(0).to_string(),
                    minutes: number(1, 5),
                    increment: number(2, 0),
                    rated: arg(3) == "rated",
                }),
                "computer" => Some(RoleRequest::PlayComputer {
                    opponent: arg(0).to_string(),
                    minutes: number(1, 5),
                    increment: number(2, 0),
                }),
                "resign" => Some(RoleRequest::Resign),
                "abort" => Some(RoleRequest::Abort),
                "draw" => Some(RoleRequest::Draw),
                "takeback" => Some(RoleRequest::Takeback(number(0, 1))),
                _ => None,
            };
            if let Some(request) = request {
                // 研究、观看、约战不针对任何已有对局
                let game = if request.permitted_for(Role::None) || *focus == SCRATCH_GAME {
                    None
                } else {
                    Some(*focus)
                };
                if let Err(e) = session.request(game, request, conn) {
                    println!("! {}", e);
                }
                return true;
            }
            match Move::from_uci(command) {
                Ok(mv) => GameEvent::UserMove(mv),
                Err(_) => {
                    println!("unknown command '{}', try 'help'", command);
                    return true;
                }
            }
        }
    };

    match session.send_event(*focus, event, conn) {
        Ok(Some(outcome)) => println!("{:?}", outcome),
        Ok(None) => {}
        Err(e) => println!("! {}", e),
    }
    true
}

fn show(session: &Session, focus: GameId) {
    let Some(game) = session.game(focus) else {
        println!("no board {}", focus);
        return;
    };
    let history = game.history();
    print!("{}", history.to_record().to_movetext());
    println!("board {} {:?}: {}", focus, game.role(), history.current_fen());
    if !game.premoves().is_empty() {
        let queued: Vec<String> = game.premoves().entries().iter().map(|p| p.mv.to_uci()).collect();
        println!("premoves: {}", queued.join(" "));
    }
}

fn print_notifications(session: &mut Session) {
    for (id, note) in session.take_notifications() {
        match note {
            Notification::CursorChanged { node } => {
                if let Some(game) = session.game(id) {
                    if let Ok(n) = game.history().get(node) {
                        println!("[{}] {}", id, n.fen);
                    }
                }
            }
            Notification::RoleChanged { from, to } => println!("[{}] role {:?} -> {:?}", id, from, to),
            Notification::BranchChoiceRequired { .. } => {
                println!("[{}] move differs from the existing continuation: overwrite or variation?", id)
            }
            Notification::GameEnded { result } => println!("[{}] game over {}", id, result),
            Notification::Desynchronized { .. } => println!("[{}] board resynchronized with server", id),
            _ => {}
        }
    }
}
