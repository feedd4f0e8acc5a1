//! 客户端设置
//!
//! 以 JSON 保存在 `<配置目录>/fics-client/settings.json`。文件缺失或损坏时使用默认值。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use protocol::{NetworkConfig, CLIENT_NAME, DEFAULT_HOST, DEFAULT_PORT, KEEPALIVE_INTERVAL_MINS};
use serde::{Deserialize, Serialize};

use crate::game::{EditPolicy, PremoveMode, SyncSettings};
use crate::network::LoginConfig;

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// `EnvFilter` 指令
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// 客户端设置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    // === 服务器 ===
    pub host: String,
    pub port: u16,
    pub timeseal: bool,
    /// 握手时报告的客户端名称
    pub client_name: String,

    // === 账号 ===
    /// 为空时以游客登录
    pub handle: Option<String>,
    pub password: Option<String>,
    /// 登录后发送的命令
    pub init_commands: Vec<String>,

    // === 连接 ===
    pub keepalive_mins: u64,
    /// 意外断开后重连
    pub reconnect: bool,

    // === 对局 ===
    pub premove_enabled: bool,
    pub premove_mode: PremoveMode,
    pub edit_policy: EditPolicy,

    // === 高级 ===
    pub log_level: LogLevel,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeseal: true,
            client_name: CLIENT_NAME.to_string(),

            handle: None,
            password: None,
            // 局面更新依赖 style12 与毫秒时钟
            init_commands: vec![
                "set style 12".to_string(),
                "iset ms 1".to_string(),
                "iset nowrap 1".to_string(),
                "set bell 0".to_string(),
            ],

            keepalive_mins: KEEPALIVE_INTERVAL_MINS,
            reconnect: true,

            premove_enabled: true,
            premove_mode: PremoveMode::default(),
            edit_policy: EditPolicy::default(),

            log_level: LogLevel::default(),
        }
    }
}

impl ClientSettings {
    /// 获取设置文件路径
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("fics-client").join("settings.json"))
    }

    /// 从默认位置加载
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            tracing::warn!("No config directory available, using default settings");
            return Self::default();
        };
        Self::load_from(&path)
    }

    /// 从指定文件加载，失败时使用默认值
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!("Settings file {:?} not found, using defaults", path);
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => {
                    tracing::info!("Loaded settings from {:?}", path);
                    settings
                }
                Err(e) => {
                    tracing::warn!("Invalid settings file {:?}: {}, using defaults", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Cannot read settings file {:?}: {}, using defaults", path, e);
                Self::default()
            }
        }
    }

    /// 保存到默认位置
    pub fn save(&self) -> Result<()> {
        let path = Self::settings_path().context("No config directory available")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        tracing::info!("Settings saved to {:?}", path);
        Ok(())
    }

    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            host: self.host.clone(),
            port: self.port,
            timeseal: self.timeseal,
            client_name: self.client_name.clone(),
        }
    }

    pub fn login_config(&self) -> LoginConfig {
        LoginConfig {
            network: self.network_config(),
            handle: self.handle.clone().filter(|h| !h.is_empty()),
            password: self.password.clone(),
            init_commands: self.init_commands.clone(),
            // 间隔为 0 会让 tokio 的 interval 失败
            keepalive: Duration::from_secs(self.keepalive_mins.max(1) * 60),
            reconnect: self.reconnect,
        }
    }

    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            premove_enabled: self.premove_enabled,
            premove_mode: self.premove_mode,
            edit_policy: self.edit_policy,
        }
    }
}
