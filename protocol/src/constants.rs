//! 协议常量定义

use std::time::Duration;

/// 默认服务器主机
pub const DEFAULT_HOST: &str = "freechess.org";

/// 默认服务器端口
pub const DEFAULT_PORT: u16 = 5000;

/// 握手时报告的客户端名称
pub const CLIENT_NAME: &str = "chess-client";

/// 单行最大缓冲大小（超过仍未遇到换行则视为协议错误）
pub const MAX_LINE_SIZE: usize = 65536;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 保活间隔（分钟）- 服务器空闲 60 分钟自动登出
pub const KEEPALIVE_INTERVAL_MINS: u64 = 59;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

/// 保活间隔 Duration
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(KEEPALIVE_INTERVAL_MINS * 60);

/// 标准国际象棋初始局面
pub const STANDARD_START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";
