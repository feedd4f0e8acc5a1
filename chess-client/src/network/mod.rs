//! 网络通信模块
//!
//! `state` 是不做 I/O 的连接状态机，`connection` 是在 tokio 任务中运行的驱动。
//! 对局层只通过 [`CommandSink`] 发送命令，不直接接触连接。

mod connection;
mod state;

pub use connection::{ConnectionEvent, LoginConfig, NetworkConnection};
pub use state::{ConnectionCore, ConnectionState, ReconnectDecision};

use protocol::ClientCommand;

/// 命令出口
pub trait CommandSink {
    fn send_command(&mut self, command: ClientCommand);
}

/// 收集命令，用于离线分析与测试
impl CommandSink for Vec<ClientCommand> {
    fn send_command(&mut self, command: ClientCommand) {
        self.push(command);
    }
}

impl CommandSink for NetworkConnection {
    fn send_command(&mut self, command: ClientCommand) {
        self.send_line(command.to_line());
    }
}

/// 连接状态（给界面层的连通性指示）
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}
