//! 连接状态机
//!
//! 不做任何 I/O：只记录连接阶段、登录身份、离线期间排队的命令以及重连决策。
//! 异步驱动（见 `connection`）根据这里的返回值决定做什么。

use std::collections::VecDeque;
use std::fmt;

use crate::error::ConnectionError;

/// 连接阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// 套接字已打开或正在打开，登录尚未完成
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// 连接丢失后的处理
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// 不重连
    None,
    /// 立即重连
    Now,
    /// 应用回到前台后重连
    WhenVisible,
}

#[derive(Debug)]
pub struct ConnectionCore {
    state: ConnectionState,
    handle: Option<String>,
    registered: bool,
    queued: VecDeque<String>,
    reconnect: bool,
    /// 本次掉线的重连机会已经用掉
    retry_used: bool,
    /// 用户主动关闭
    user_closed: bool,
    visible: bool,
    deferred: bool,
}

impl Default for ConnectionCore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ConnectionCore {
    pub fn new(reconnect: bool) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            handle: None,
            registered: false,
            queued: VecDeque::new(),
            reconnect,
            retry_used: false,
            user_closed: false,
            visible: true,
            deferred: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// 服务器分配的登录名（游客为 GuestXXXX）
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn registered(&self) -> bool {
        self.registered
    }

    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    pub fn visible(&self) -> bool {
        self.visible
    }

    /// 是否有一次重连在等待应用回到前台
    pub fn reconnect_deferred(&self) -> bool {
        self.deferred
    }

    /// Disconnected -> Connecting
    pub fn begin_connect(&mut self) -> Result<(), ConnectionError> {
        if self.state != ConnectionState::Disconnected {
            return Err(ConnectionError::InvalidTransition {
                action: "connect",
                state: self.state,
            });
        }
        self.state = ConnectionState::Connecting;
        self.user_closed = false;
        self.deferred = false;
        Ok(())
    }

    /// Connecting -> Connected，返回需要按顺序补发的命令
    pub fn complete_login(
        &mut self,
        handle: &str,
        registered: bool,
    ) -> Result<Vec<String>, ConnectionError> {
        if self.state != ConnectionState::Connecting {
            return Err(ConnectionError::InvalidTransition {
                action: "complete login",
                state: self.state,
            });
        }
        self.state = ConnectionState::Connected;
        self.handle = Some(handle.to_string());
        self.registered = registered;
        self.retry_used = false;
        Ok(self.queued.drain(..).collect())
    }

    /// 提交一行命令：已连接时原样返回供立即发送，否则排队
    pub fn submit(&mut self, line: String) -> Option<String> {
        if self.is_connected() {
            return Some(line);
        }
        tracing::debug!("Queued '{}' while {}", line, self.state);
        self.queued.push_back(line);
        None
    }

    /// 用户主动关闭，不会触发重连
    pub fn close(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.registered = false;
        self.user_closed = true;
        self.deferred = false;
    }

    /// 连接尝试失败
    ///
    /// 重连机会只在已登录的会话掉线时给出，尝试失败不会再次重试。
    pub fn connect_failed(&mut self) -> ReconnectDecision {
        self.state = ConnectionState::Disconnected;
        self.registered = false;
        ReconnectDecision::None
    }

    /// 连接意外断开
    pub fn connection_lost(&mut self) -> ReconnectDecision {
        self.state = ConnectionState::Disconnected;
        self.registered = false;

        if self.user_closed || !self.reconnect {
            return ReconnectDecision::None;
        }
        if self.retry_used {
            tracing::warn!("Reconnect already attempted for this drop, giving up");
            return ReconnectDecision::None;
        }
        self.retry_used = true;
        if self.visible {
            ReconnectDecision::Now
        } else {
            self.deferred = true;
            ReconnectDecision::WhenVisible
        }
    }

    /// 更新前后台状态，返回是否应当立即执行被推迟的重连
    pub fn set_visible(&mut self, visible: bool) -> bool {
        self.visible = visible;
        if visible && self.deferred {
            self.deferred = false;
            return self.state == ConnectionState::Disconnected;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> ConnectionCore {
        let mut core = ConnectionCore::default();
        core.begin_connect().unwrap();
        core.complete_login("alice", true).unwrap();
        core
    }

    #[test]
    fn test_transitions() {
        let mut core = ConnectionCore::default();
        assert_eq!(core.state(), ConnectionState::Disconnected);
        assert!(core.complete_login("alice", true).is_err());

        core.begin_connect().unwrap();
        assert_eq!(core.state(), ConnectionState::Connecting);
        assert_eq!(
            core.begin_connect(),
            Err(ConnectionError::InvalidTransition {
                action: "connect",
                state: ConnectionState::Connecting,
            })
        );

        core.complete_login("GuestABCD", false).unwrap();
        assert!(core.is_connected());
        assert_eq!(core.handle(), Some("GuestABCD"));
        assert!(!core.registered());
    }

    #[test]
    fn test_queue_flushed_in_order() {
        let mut core = ConnectionCore::default();
        assert_eq!(core.submit("observe 1".to_string()), None);
        core.begin_connect().unwrap();
        assert_eq!(core.submit("observe 2".to_string()), None);
        assert_eq!(core.queued_len(), 2);

        let flushed = core.complete_login("alice", true).unwrap();
        assert_eq!(flushed, vec!["observe 1", "observe 2"]);
        assert_eq!(core.queued_len(), 0);
        assert_eq!(core.submit("date".to_string()), Some("date".to_string()));
    }

    #[test]
    fn test_single_retry_per_drop() {
        let mut core = connected();
        assert_eq!(core.connection_lost(), ReconnectDecision::Now);

        // 重连失败后不再重试
        core.begin_connect().unwrap();
        assert_eq!(core.connect_failed(), ReconnectDecision::None);
        assert_eq!(core.connection_lost(), ReconnectDecision::None);

        // 重连成功后下一次掉线又有一次机会
        let mut core = connected();
        assert_eq!(core.connection_lost(), ReconnectDecision::Now);
        core.begin_connect().unwrap();
        core.complete_login("alice", true).unwrap();
        assert_eq!(core.connection_lost(), ReconnectDecision::Now);
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let mut core = connected();
        core.close();
        assert_eq!(core.state(), ConnectionState::Disconnected);
        assert_eq!(core.connection_lost(), ReconnectDecision::None);

        let mut core = ConnectionCore::new(false);
        core.begin_connect().unwrap();
        core.complete_login("alice", true).unwrap();
        assert_eq!(core.connection_lost(), ReconnectDecision::None);
    }

    #[test]
    fn test_reconnect_waits_for_visibility() {
        let mut core = connected();
        assert!(!core.set_visible(false));
        assert_eq!(core.connection_lost(), ReconnectDecision::WhenVisible);
        assert!(core.reconnect_deferred());

        assert!(core.set_visible(true));
        assert!(!core.reconnect_deferred());
        assert!(!core.set_visible(true));
    }
}
