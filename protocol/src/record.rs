//! 棋谱记录格式
//!
//! JSON 存储的着法树：主线按顺序排列，每步可以挂若干替代变着（与这一步并列的其他走法）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::STANDARD_START_FEN;

/// 棋谱版本
pub const RECORD_VERSION: &str = "2.0";

/// 走法记录
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveRecord {
    /// 坐标记法（`e2e4`、`e7e8q`、`N@f3`）
    pub uci: String,
    /// 服务器给出的简明记法
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub san: Option<String>,
    /// 走后局面
    pub fen: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub white_clock_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub black_clock_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_after: Option<String>,
    /// 符号注释代码（NAG）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nags: Vec<u8>,
    /// 替代这一步的变着
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variations: Vec<Vec<MoveRecord>>,
    /// 规则库的变体附加数据（如 crazyhouse 手中棋子）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_data: Option<String>,
}

impl MoveRecord {
    /// 创建新的走法记录
    pub fn new(uci: impl Into<String>, fen: impl Into<String>) -> Self {
        Self {
            uci: uci.into(),
            fen: fen.into(),
            ..Default::default()
        }
    }
}

/// 完整的棋谱记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    /// 版本号
    pub version: String,
    /// 有序的元数据标签（White、Black、Result 等）
    pub metatags: Vec<(String, String)>,
    /// 初始局面 FEN
    pub initial_fen: String,
    /// 主线
    pub moves: Vec<MoveRecord>,
    /// 保存时间
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Default for GameRecord {
    fn default() -> Self {
        Self::new(STANDARD_START_FEN)
    }
}

impl GameRecord {
    /// 从初始局面创建
    pub fn new(initial_fen: impl Into<String>) -> Self {
        Self {
            version: RECORD_VERSION.to_string(),
            metatags: Vec::new(),
            initial_fen: initial_fen.into(),
            moves: Vec::new(),
            saved_at: None,
        }
    }

    /// 读取标签
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.metatags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// 设置标签（已存在则原位替换，保持顺序）
    pub fn set_tag(&mut self, key: &str, value: &str) {
        match self.metatags.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = value.to_string(),
            None => self.metatags.push((key.to_string(), value.to_string())),
        }
    }

    /// 转换为 JSON 字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// 生成着法文本（标签、带编号的着法、注释、变着括号、结果）
    pub fn to_movetext(&self) -> String {
        let mut output = String::new();
        for (key, value) in &self.metatags {
            output.push_str(&format!("[{} \"{}\"]\n", key, value.replace('"', "\\\"")));
        }
        if !self.metatags.is_empty() {
            output.push('\n');
        }

        let mut tokens = line_tokens(&self.moves, self.start_ply());
        tokens.push(self.tag("Result").unwrap_or("*").to_string());
        output.push_str(&tokens.join(" "));
        output.push('\n');
        output
    }

    /// 初始局面对应的半回合序号（白方第 1 步为 0）
    fn start_ply(&self) -> u32 {
        let mut fields = self.initial_fen.split_whitespace().skip(1);
        let black = fields.next() == Some("b");
        let fullmove: u32 = fields
            .nth(3)
            .and_then(|f| f.parse().ok())
            .unwrap_or(1)
            .max(1);
        (fullmove - 1) * 2 + u32::from(black)
    }
}

fn line_tokens(line: &[MoveRecord], mut ply: u32) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut need_number = true;

    for mv in line {
        if let Some(comment) = &mv.comment_before {
            tokens.push(format!("{{{}}}", comment));
            need_number = true;
        }
        if ply % 2 == 0 {
            tokens.push(format!("{}.", ply / 2 + 1));
        } else if need_number {
            tokens.push(format!("{}...", ply / 2 + 1));
        }
        tokens.push(mv.san.clone().unwrap_or_else(|| mv.uci.clone()));
        need_number = false;

        for nag in &mv.nags {
            tokens.push(format!("${}", nag));
        }
        if let Some(comment) = &mv.comment_after {
            tokens.push(format!("{{{}}}", comment));
            need_number = true;
        }
        for variation in &mv.variations {
            tokens.push(format!("({})", line_tokens(variation, ply).join(" ")));
            need_number = true;
        }
        ply += 1;
    }
    tokens
}
