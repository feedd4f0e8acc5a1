//! 传输层抽象
//!
//! 提供 Connector/Connection traits 使上层会话逻辑与具体传输实现解耦。
//! 服务器是面向行的文本协议：入站按换行切分，出站每行独立经 timeseal 编码。

use std::collections::VecDeque;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ProtocolError, Result};
use crate::timeseal::{Timeseal, TIMESEAL_ACK, TIMESEAL_PING};
use crate::{CLIENT_NAME, CONNECT_TIMEOUT, DEFAULT_HOST, DEFAULT_PORT, MAX_LINE_SIZE};

/// 服务器命令提示符
const COMMAND_PROMPT: &str = "fics% ";

/// 不以换行结尾的登录提示
const BARE_PROMPTS: [&str; 2] = ["login:", "password:"];

/// 网络配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// 是否启用 timeseal 编码
    pub timeseal: bool,
    /// 握手时报告的客户端名称
    pub client_name: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeseal: true,
            client_name: CLIENT_NAME.to_string(),
        }
    }
}

impl NetworkConfig {
    /// `host:port`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 入站单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// 一行文本（已去除换行与命令提示符）
    Line(String),
    /// timeseal 心跳，需要立即应答
    TimesealPing,
}

/// 连接抽象 trait（核心抽象，用于会话层）
#[async_trait]
pub trait Connection: Send {
    /// 发送一行命令
    async fn send_line(&mut self, line: &str) -> Result<()>;

    /// 接收下一个入站单元
    ///
    /// 必须可安全取消：在 `select!` 中被丢弃时不丢失已读数据。
    async fn recv(&mut self) -> Result<Inbound>;

    /// 应答 timeseal 心跳
    async fn ack_ping(&mut self) -> Result<()> {
        self.send_line(TIMESEAL_ACK).await
    }

    /// 关闭连接
    async fn close(&mut self) -> Result<()>;

    /// 获取远端地址
    fn peer_addr(&self) -> Option<String>;
}

/// 连接器 trait
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// 建立连接并完成传输层握手
    async fn connect(&self, config: &NetworkConfig) -> Result<Self::Conn>;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 连接器
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpConnection;

    async fn connect(&self, config: &NetworkConfig) -> Result<Self::Conn> {
        let addr = config.addr();
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
            .map_err(ProtocolError::Io)?;

        stream.set_nodelay(true)?;
        let mut conn = TcpConnection::from_stream(stream, config.timeseal)?;

        if config.timeseal {
            // 握手必须是连接上的第一帧
            conn.writer.write_line(&Timeseal::handshake(&config.client_name)).await?;
        }
        tracing::debug!("Transport ready to {} (timeseal: {})", addr, config.timeseal);
        Ok(conn)
    }
}

/// TCP 连接
pub struct TcpConnection {
    reader: LineReader<OwnedReadHalf>,
    writer: LineWriter<OwnedWriteHalf>,
    peer_addr: Option<String>,
}

impl TcpConnection {
    /// 从 TcpStream 创建
    pub fn from_stream(stream: TcpStream, timeseal: bool) -> Result<Self> {
        let peer_addr = stream.peer_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();

        Ok(Self {
            reader: LineReader::new(read_half),
            writer: LineWriter::new(write_half, timeseal),
            peer_addr,
        })
    }

    /// 分离读写端
    pub fn split(self) -> (LineReader<OwnedReadHalf>, LineWriter<OwnedWriteHalf>) {
        (self.reader, self.writer)
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_line(line).await
    }

    async fn recv(&mut self) -> Result<Inbound> {
        self.reader.read().await
    }

    async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }

    fn peer_addr(&self) -> Option<String> {
        self.peer_addr.clone()
    }
}

// ============================================================================
// 行编解码
// ============================================================================

/// 行读取器
pub struct LineReader<R> {
    reader: R,
    buffer: Vec<u8>,
    ready: VecDeque<Inbound>,
}

impl<R: AsyncRead + Unpin + Send> LineReader<R> {
    /// 创建新的行读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(4096),
            ready: VecDeque::new(),
        }
    }

    /// 读取下一个入站单元
    pub async fn read(&mut self) -> Result<Inbound> {
        let mut chunk = [0u8; 4096];
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Ok(item);
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(ProtocolError::ConnectionClosed);
            }
            self.buffer.extend_from_slice(&chunk[..n]);
            self.scan()?;
        }
    }

    /// 从缓冲区切出所有完整单元
    fn scan(&mut self) -> Result<()> {
        while let Some(pos) = find(&self.buffer, TIMESEAL_PING) {
            self.buffer.drain(pos..pos + TIMESEAL_PING.len());
            self.ready.push_back(Inbound::TimesealPing);
        }

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&raw);
            let line = strip_prompt(text.trim_matches(|c| c == '\r' || c == '\n'));
            if !line.is_empty() {
                self.ready.push_back(Inbound::Line(line.to_string()));
            }
        }

        // 登录提示后服务器等待输入，不会发送换行
        let pending = String::from_utf8_lossy(&self.buffer).to_string();
        let pending = strip_prompt(pending.trim_start_matches('\r')).trim_end();
        if is_bare_prompt(pending) {
            self.ready.push_back(Inbound::Line(pending.to_string()));
            self.buffer.clear();
        } else if self.buffer.len() > MAX_LINE_SIZE {
            return Err(ProtocolError::LineTooLarge {
                size: self.buffer.len(),
                max: MAX_LINE_SIZE,
            });
        }
        Ok(())
    }
}

/// 行写入器
pub struct LineWriter<W> {
    writer: W,
    timeseal: bool,
}

impl<W: AsyncWrite + Unpin + Send> LineWriter<W> {
    /// 创建新的行写入器
    pub fn new(writer: W, timeseal: bool) -> Self {
        Self { writer, timeseal }
    }

    /// 写入一行（timeseal 模式下整行编码为一帧）
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        if self.timeseal {
            self.writer.write_all(&Timeseal::encode(line)).await?;
        } else {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\n").await?;
        }
        self.writer.flush().await?;
        Ok(())
    }

    /// 关闭写端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

fn strip_prompt(mut line: &str) -> &str {
    while let Some(rest) = line.strip_prefix(COMMAND_PROMPT) {
        line = rest;
    }
    line
}

fn is_bare_prompt(text: &str) -> bool {
    BARE_PROMPTS.contains(&text)
        || (text.starts_with("Press return to enter the server as") && text.ends_with(':'))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(input: &[u8]) -> Vec<Inbound> {
        let mut reader = LineReader::new(input);
        let mut items = Vec::new();
        while let Ok(item) = reader.read().await {
            items.push(item);
        }
        items
    }

    fn line(s: &str) -> Inbound {
        Inbound::Line(s.to_string())
    }

    #[tokio::test]
    async fn test_line_splitting() {
        let items = read_all(b"hello\n\rfics% world\n\r\n\rfics% ").await;
        assert_eq!(items, vec![line("hello"), line("world")]);
    }

    #[tokio::test]
    async fn test_bare_prompts() {
        let items = read_all(b"Welcome\n\rlogin: ").await;
        assert_eq!(items, vec![line("Welcome"), line("login:")]);

        let items = read_all(b"\n\rPress return to enter the server as \"GuestABCD\": ").await;
        assert_eq!(
            items,
            vec![line("Press return to enter the server as \"GuestABCD\":")]
        );
    }

    #[tokio::test]
    async fn test_timeseal_ping_extracted() {
        let items = read_all(b"[G]\0fics% text\n").await;
        assert_eq!(items, vec![Inbound::TimesealPing, line("text")]);
    }

    #[tokio::test]
    async fn test_line_too_large() {
        let big = vec![b'x'; MAX_LINE_SIZE + 1];
        let mut reader = LineReader::new(&big[..]);
        assert!(matches!(
            reader.read().await,
            Err(ProtocolError::LineTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_plain_writer() {
        let mut out = Vec::new();
        let mut writer = LineWriter::new(&mut out, false);
        writer.write_line("observe 5").await.unwrap();
        assert_eq!(out, b"observe 5\n");
    }

    #[tokio::test]
    async fn test_tcp_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frames = Vec::new();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 256];
            stream.write_all(b"login: ").await.unwrap();
            while frames.len() < 2 {
                let n = stream.read(&mut chunk).await.unwrap();
                assert!(n > 0);
                buf.extend_from_slice(&chunk[..n]);
                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let frame: Vec<u8> = buf.drain(..=pos).collect();
                    frames.push(Timeseal::decode(&frame).unwrap().0);
                }
            }
            frames
        });

        let config = NetworkConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeseal: true,
            client_name: "test-client".to_string(),
        };
        let mut conn = TcpConnector.connect(&config).await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), line("login:"));
        conn.send_line("guest").await.unwrap();

        let frames = server.await.unwrap();
        assert_eq!(
            frames,
            vec!["TIMESEAL2|openseal|test-client|".to_string(), "guest".to_string()]
        );
    }
}
