//! 本地棋局存储
//!
//! 着法树以 JSON 棋谱保存在 `<数据目录>/fics-client/saves`，载入后成为本地分析用的草稿着法树。

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use protocol::GameRecord;

use crate::history::History;

/// 存储管理器
pub struct StorageManager {
    saves_dir: PathBuf,
}

impl StorageManager {
    /// 使用默认存储目录
    pub fn new() -> Result<Self> {
        let app_data_dir = dirs::data_dir().context("No data directory available")?;
        Self::with_dir(app_data_dir.join("fics-client").join("saves"))
    }

    /// 使用指定目录（不存在时创建）
    pub fn with_dir(saves_dir: impl Into<PathBuf>) -> Result<Self> {
        let saves_dir = saves_dir.into();
        if !saves_dir.exists() {
            fs::create_dir_all(&saves_dir)
                .with_context(|| format!("Failed to create saves directory {:?}", saves_dir))?;
        }
        Ok(Self { saves_dir })
    }

    /// 保存着法树，返回文件名
    pub fn save_history(&self, history: &History) -> Result<String> {
        let timestamp = Utc::now();
        let mut record = history.to_record();
        record.saved_at = Some(timestamp);

        let filename = generate_filename(
            &timestamp,
            record.tag("White").unwrap_or("White"),
            record.tag("Black").unwrap_or("Black"),
        );
        let filepath = self.saves_dir.join(&filename);

        let json = record.to_json().context("Failed to serialize game record")?;
        fs::write(&filepath, json).with_context(|| format!("Failed to write {:?}", filepath))?;

        tracing::info!("Game saved: {}", filename);
        Ok(filename)
    }

    /// 读取棋谱
    pub fn load_record(&self, name: &str) -> Result<GameRecord> {
        let filepath = self.saves_dir.join(name);
        if !filepath.exists() {
            anyhow::bail!("Saved game not found: {}", name);
        }

        let content = fs::read_to_string(&filepath)
            .with_context(|| format!("Failed to read {:?}", filepath))?;
        GameRecord::from_json(&content).context("Failed to parse game record")
    }

    /// 载入为草稿着法树
    pub fn load_history(&self, name: &str) -> Result<History> {
        let record = self.load_record(name)?;
        History::from_record(&record).with_context(|| format!("Invalid game record {}", name))
    }

    /// 列出所有保存的棋局，最新的在前
    pub fn list(&self) -> Result<Vec<SavedGameInfo>> {
        let mut games = Vec::new();
        let entries = fs::read_dir(&self.saves_dir)
            .with_context(|| format!("Failed to read {:?}", self.saves_dir))?;

        for entry in entries {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let Some(filename) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };

            match self.load_record(filename) {
                Ok(record) => {
                    let saved_at = record.saved_at.unwrap_or_else(|| {
                        entry
                            .metadata()
                            .and_then(|m| m.modified())
                            .map(DateTime::from)
                            .unwrap_or_else(|_| Utc::now())
                    });
                    games.push(SavedGameInfo {
                        name: filename.to_string(),
                        white: record.tag("White").unwrap_or("?").to_string(),
                        black: record.tag("Black").unwrap_or("?").to_string(),
                        result: record.tag("Result").map(str::to_string),
                        saved_at,
                        move_count: record.moves.len(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable saved game {}: {}", filename, e);
                }
            }
        }

        games.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(games)
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let filepath = self.saves_dir.join(name);
        if filepath.exists() {
            fs::remove_file(&filepath).with_context(|| format!("Failed to delete {:?}", filepath))?;
            tracing::info!("Saved game deleted: {}", name);
        }
        Ok(())
    }

    pub fn saves_directory(&self) -> &Path {
        &self.saves_dir
    }
}

/// 保存的棋局信息
#[derive(Debug, Clone)]
pub struct SavedGameInfo {
    /// 文件名
    pub name: String,
    pub white: String,
    pub black: String,
    pub result: Option<String>,
    pub saved_at: DateTime<Utc>,
    /// 主线步数
    pub move_count: usize,
}

impl SavedGameInfo {
    pub fn formatted_time(&self) -> String {
        self.saved_at.format("%Y-%m-%d %H:%M").to_string()
    }

    pub fn display_name(&self) -> String {
        match &self.result {
            Some(result) => format!("{} vs {} ({})", self.white, self.black, result),
            None => format!("{} vs {}", self.white, self.black),
        }
    }
}

fn generate_filename(timestamp: &DateTime<Utc>, white: &str, black: &str) -> String {
    format!(
        "{}_{}vs{}.json",
        timestamp.format("%Y%m%d_%H%M%S%3f"),
        sanitize_filename(white),
        sanitize_filename(black)
    )
}

/// 替换文件名中的非法字符
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .to_string()
}
