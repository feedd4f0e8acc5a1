//! 网络连接驱动
//!
//! 后台 tokio 任务持有连接，通过通道与调用方交互：
//! - 控制通道接收连接、发送、关闭和前后台切换请求
//! - 事件通道上报服务器事件、连接状态变化和错误
//!
//! 登录握手、timeseal 心跳应答、保活和掉线重连都在任务内部完成。

use std::time::Duration;

use protocol::{
    ClientCommand, Connection, Connector, Inbound, NetworkConfig, ServerEvent, KEEPALIVE_INTERVAL,
};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::state::{ConnectionCore, ReconnectDecision};
use super::ConnectionStatus;

/// 未配置登录名时使用的游客登录名
const GUEST_LOGIN: &str = "guest";

/// 登录与会话参数
#[derive(Debug, Clone)]
pub struct LoginConfig {
    pub network: NetworkConfig,
    /// 为空时以游客身份登录
    pub handle: Option<String>,
    pub password: Option<String>,
    /// 登录完成后、补发排队命令前发送
    pub init_commands: Vec<String>,
    pub keepalive: Duration,
    /// 意外断开后是否重连
    pub reconnect: bool,
}

impl Default for LoginConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            handle: None,
            password: None,
            init_commands: Vec::new(),
            keepalive: KEEPALIVE_INTERVAL,
            reconnect: true,
        }
    }
}

/// 驱动上报的事件
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Status(ConnectionStatus),
    Server(ServerEvent),
    /// 连接失败、掉线或无法解析的服务器行
    Error(String),
}

enum Control {
    Connect,
    Send(String),
    Close,
    Visible(bool),
}

enum SessionEnd {
    /// 用户关闭
    Closed,
    /// 意外断开
    Lost,
    /// 连接尝试失败
    Failed,
    /// 句柄已被丢弃
    Shutdown,
}

/// 网络连接句柄
///
/// 所有方法都是同步的，只向后台任务投递请求。丢弃句柄会让任务关闭连接并退出。
pub struct NetworkConnection {
    control: mpsc::UnboundedSender<Control>,
    status: watch::Receiver<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl NetworkConnection {
    /// 启动驱动任务，返回句柄与事件接收端
    ///
    /// 必须在 tokio 运行时内调用。任务启动后处于断开状态，调用 [`connect`](Self::connect) 开始连接。
    pub fn spawn<C>(connector: C, config: LoginConfig) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>)
    where
        C: Connector + 'static,
        C::Conn: 'static,
    {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);

        let driver = Driver {
            connector,
            core: ConnectionCore::new(config.reconnect),
            config,
            events: event_tx,
            status: status_tx,
        };
        let task = tokio::spawn(driver.run(control_rx));

        let handle = Self {
            control: control_tx,
            status: status_rx,
            task,
        };
        (handle, event_rx)
    }

    pub fn connect(&self) {
        self.post(Control::Connect);
    }

    /// 发送一行命令；未连接时排队，登录完成后按顺序补发
    pub fn send_line(&self, line: impl Into<String>) {
        self.post(Control::Send(line.into()));
    }

    /// 用户主动断开，不会触发重连
    pub fn close(&self) {
        self.post(Control::Close);
    }

    /// 报告应用是否在前台
    pub fn set_visible(&self, visible: bool) {
        self.post(Control::Visible(visible));
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// 驱动任务是否已经退出
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    fn post(&self, control: Control) {
        if self.control.send(control).is_err() {
            tracing::warn!("Connection driver is no longer running");
        }
    }
}

struct Driver<C> {
    connector: C,
    config: LoginConfig,
    core: ConnectionCore,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    status: watch::Sender<ConnectionStatus>,
}

impl<C> Driver<C>
where
    C: Connector + 'static,
    C::Conn: 'static,
{
    async fn run(mut self, mut control: mpsc::UnboundedReceiver<Control>) {
        while let Some(command) = control.recv().await {
            let connect = match command {
                Control::Connect => true,
                Control::Send(line) => {
                    self.core.submit(line);
                    false
                }
                Control::Close => {
                    self.core.close();
                    false
                }
                Control::Visible(visible) => {
                    let resume = self.core.set_visible(visible);
                    if resume {
                        tracing::info!("Application visible again, reconnecting");
                    }
                    resume
                }
            };
            if connect && !self.connect_loop(&mut control).await {
                break;
            }
        }
        tracing::debug!("Connection driver stopped");
    }

    /// 连接并在掉线后按策略重连，返回 false 表示控制通道已关闭
    async fn connect_loop(&mut self, control: &mut mpsc::UnboundedReceiver<Control>) -> bool {
        loop {
            match self.session(control).await {
                SessionEnd::Shutdown => return false,
                SessionEnd::Closed | SessionEnd::Failed => return true,
                SessionEnd::Lost => match self.core.connection_lost() {
                    ReconnectDecision::Now => {
                        tracing::info!("Reconnecting to {}", self.config.network.addr());
                    }
                    ReconnectDecision::WhenVisible => {
                        tracing::info!("Reconnect deferred until the application is visible");
                        return true;
                    }
                    ReconnectDecision::None => return true,
                },
            }
        }
    }

    /// 一次完整的连接生命周期
    async fn session(&mut self, control: &mut mpsc::UnboundedReceiver<Control>) -> SessionEnd {
        if let Err(e) = self.core.begin_connect() {
            tracing::warn!("{}", e);
            return SessionEnd::Closed;
        }
        self.set_status(ConnectionStatus::Connecting);
        let addr = self.config.network.addr();
        tracing::info!("Connecting to {}", addr);

        let mut conn = match self.connector.connect(&self.config.network).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", addr, e);
                self.core.connect_failed();
                self.emit(ConnectionEvent::Error(e.to_string()));
                self.set_status(ConnectionStatus::Error);
                return SessionEnd::Failed;
            }
        };

        let period = self.config.keepalive;
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let result = tokio::select! {
                inbound = conn.recv() => match inbound {
                    Ok(inbound) => self.on_inbound(&mut conn, inbound).await,
                    Err(e) => Err(e),
                },
                command = control.recv() => match command {
                    Some(Control::Send(line)) => match self.core.submit(line) {
                        Some(line) => conn.send_line(&line).await,
                        None => Ok(()),
                    },
                    Some(Control::Close) => {
                        self.shutdown(&mut conn).await;
                        return SessionEnd::Closed;
                    }
                    Some(Control::Visible(visible)) => {
                        self.core.set_visible(visible);
                        Ok(())
                    }
                    Some(Control::Connect) => Ok(()),
                    None => {
                        self.shutdown(&mut conn).await;
                        return SessionEnd::Shutdown;
                    }
                },
                _ = keepalive.tick(), if self.core.is_connected() => {
                    tracing::debug!("Sending keepalive");
                    conn.send_line(&ClientCommand::Date.to_line()).await
                }
            };

            if let Err(e) = result {
                tracing::warn!("Connection to {} lost: {}", addr, e);
                self.emit(ConnectionEvent::Error(e.to_string()));
                self.set_status(ConnectionStatus::Disconnected);
                return SessionEnd::Lost;
            }
        }
    }

    async fn on_inbound(&mut self, conn: &mut C::Conn, inbound: Inbound) -> protocol::Result<()> {
        let line = match inbound {
            Inbound::TimesealPing => {
                tracing::trace!("Answering timeseal ping");
                return conn.ack_ping().await;
            }
            Inbound::Line(line) => line,
        };

        let event = match ServerEvent::parse(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Ignoring malformed line: {}", e);
                self.emit(ConnectionEvent::Error(e.to_string()));
                return Ok(());
            }
        };

        match &event {
            ServerEvent::LoginPrompt => {
                let login = self.login_name();
                tracing::debug!("Logging in as {}", login);
                conn.send_line(&login).await?;
            }
            ServerEvent::PasswordPrompt => {
                conn.send_line(self.config.password.as_deref().unwrap_or_default())
                    .await?;
            }
            ServerEvent::GuestPrompt { handle } => {
                tracing::debug!("Entering as {}", handle);
                conn.send_line("").await?;
            }
            ServerEvent::SessionStarted { handle, registered } => {
                self.on_login(conn, handle, *registered).await?;
            }
            _ => {}
        }

        self.emit(ConnectionEvent::Server(event));
        Ok(())
    }

    /// 配置的登录名；游客重连时沿用上次分配的游客名
    fn login_name(&self) -> String {
        self.config
            .handle
            .as_deref()
            .or(self.core.handle())
            .unwrap_or(GUEST_LOGIN)
            .to_string()
    }

    async fn on_login(
        &mut self,
        conn: &mut C::Conn,
        handle: &str,
        registered: bool,
    ) -> protocol::Result<()> {
        let queued = match self.core.complete_login(handle, registered) {
            Ok(queued) => queued,
            Err(e) => {
                tracing::warn!("Unexpected session start: {}", e);
                return Ok(());
            }
        };
        tracing::info!(
            "Logged in as {} ({})",
            handle,
            if registered { "registered" } else { "guest" }
        );

        for command in &self.config.init_commands {
            conn.send_line(command).await?;
        }
        if !queued.is_empty() {
            tracing::debug!("Flushing {} queued command(s)", queued.len());
        }
        for line in queued {
            conn.send_line(&line).await?;
        }
        self.set_status(ConnectionStatus::Connected);
        Ok(())
    }

    async fn shutdown(&mut self, conn: &mut C::Conn) {
        if self.core.is_connected() {
            if let Err(e) = conn.send_line(&ClientCommand::Quit.to_line()).await {
                tracing::debug!("Failed to send quit: {}", e);
            }
        }
        if let Err(e) = conn.close().await {
            tracing::debug!("Failed to close connection: {}", e);
        }
        self.core.close();
        tracing::info!("Disconnected from {}", self.config.network.addr());
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
        self.emit(ConnectionEvent::Status(status));
    }

    fn emit(&self, event: ConnectionEvent) {
        // 接收端被丢弃时没有人关心事件
        let _ = self.events.send(event);
    }
}
