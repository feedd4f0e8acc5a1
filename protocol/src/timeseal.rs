//! Timeseal 帧编码
//!
//! 服务器要求每条出站命令都经过 timeseal 混淆：
//! 命令字节 + `0x18` + 时间戳十进制 + `0x19`，以 `'1'` 填充到 12 的倍数，
//! 每 12 字节块内交换固定字节对，再逐字节与密钥异或，最后追加 `0x80 0x0a`。

use chrono::Utc;

/// 混淆密钥（50 字节 ASCII 短语）
pub const TIMESEAL_KEY: &[u8; 50] = b"Timestamp (FICS) v1.0 - programmed by Henrik Gram.";

/// 服务器发来的 timeseal 心跳
pub const TIMESEAL_PING: &[u8] = b"[G]\0";

/// 心跳应答命令（经编码后发送）
pub const TIMESEAL_ACK: &str = "\u{2}9";

/// 命令与时间戳之间的分隔符
const COMMAND_DELIMITER: u8 = 0x18;

/// 时间戳结尾分隔符
const STAMP_DELIMITER: u8 = 0x19;

/// 填充字节 `'1'`
const PADDING: u8 = 0x31;

/// 块大小
const BLOCK_SIZE: usize = 12;

/// 块内交换的字节对
const BLOCK_SWAPS: [(usize, usize); 3] = [(0, 11), (2, 9), (4, 7)];

/// 帧结尾
const TRAILER: [u8; 2] = [0x80, 0x0a];

/// Timeseal 编解码
pub struct Timeseal;

impl Timeseal {
    /// 以当前时间编码一条命令
    pub fn encode(command: &str) -> Vec<u8> {
        Self::encode_at(command, Self::stamp_now())
    }

    /// 以指定时间戳编码一条命令（确定性，供测试与重放）
    pub fn encode_at(command: &str, stamp: u32) -> Vec<u8> {
        let stamp = stamp.to_string();
        let unpadded = command.len() + stamp.len() + 2;
        let mut buf = Vec::with_capacity(unpadded.div_ceil(BLOCK_SIZE) * BLOCK_SIZE + TRAILER.len());

        buf.extend_from_slice(command.as_bytes());
        buf.push(COMMAND_DELIMITER);
        buf.extend_from_slice(stamp.as_bytes());
        buf.push(STAMP_DELIMITER);
        while buf.len() % BLOCK_SIZE != 0 {
            buf.push(PADDING);
        }

        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            for (a, b) in BLOCK_SWAPS {
                block.swap(a, b);
            }
        }

        for (n, byte) in buf.iter_mut().enumerate() {
            *byte = ((*byte | 0x80) ^ TIMESEAL_KEY[n % TIMESEAL_KEY.len()]).wrapping_sub(32);
        }

        buf.extend_from_slice(&TRAILER);
        buf
    }

    /// 解码一帧，返回 (命令, 时间戳)
    ///
    /// 仅用于诊断与测试；非 ASCII 命令字节在编码时丢失最高位，无法还原。
    pub fn decode(frame: &[u8]) -> Option<(String, u32)> {
        let body = frame.strip_suffix(&TRAILER)?;
        if body.is_empty() || body.len() % BLOCK_SIZE != 0 {
            return None;
        }

        let mut buf: Vec<u8> = body
            .iter()
            .enumerate()
            .map(|(n, byte)| (byte.wrapping_add(32) ^ TIMESEAL_KEY[n % TIMESEAL_KEY.len()]) & 0x7f)
            .collect();

        for block in buf.chunks_exact_mut(BLOCK_SIZE) {
            for (a, b) in BLOCK_SWAPS {
                block.swap(a, b);
            }
        }

        let split = buf.iter().position(|&b| b == COMMAND_DELIMITER)?;
        let end = buf.iter().position(|&b| b == STAMP_DELIMITER)?;
        if end < split {
            return None;
        }
        let command = String::from_utf8(buf[..split].to_vec()).ok()?;
        let stamp = std::str::from_utf8(&buf[split + 1..end]).ok()?.parse().ok()?;
        Some((command, stamp))
    }

    /// 当前时间戳：`(秒 mod 10000) * 1000 + 毫秒`
    pub fn stamp_now() -> u32 {
        let now = Utc::now();
        Self::stamp(now.timestamp(), now.timestamp_subsec_millis())
    }

    /// 由 Unix 秒与毫秒计算时间戳
    pub fn stamp(unix_secs: i64, millis: u32) -> u32 {
        (unix_secs.rem_euclid(10_000) as u32) * 1000 + millis % 1000
    }

    /// 连接建立后的握手命令
    pub fn handshake(client_name: &str) -> String {
        format!("TIMESEAL2|openseal|{}|", client_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// "hello" 在时间戳 123456 下的编码结果
    const HELLO_123456: [u8; 26] = [
        0xc2, 0x6c, 0xb9, 0x69, 0xa1, 0xcc, 0xb0, 0x62, 0xa3, 0xac, 0x7d, 0x8e, 0xd8, 0xd2, 0xc2,
        0x78, 0x71, 0xa7, 0x60, 0x7f, 0x61, 0x71, 0x7c, 0x99, 0x80, 0x0a,
    ];

    #[test]
    fn test_encode_golden() {
        assert_eq!(Timeseal::encode_at("hello", 123456), HELLO_123456.to_vec());
    }

    #[test]
    fn test_encode_short_frame() {
        // "hello" + 0x18 + "0" + 0x19 恰好 8 字节，填充到 12
        let expected = [
            0xc5, 0x6c, 0xbc, 0x69, 0xca, 0xcc, 0xb1, 0x62, 0xa1, 0xac, 0x79, 0x8e, 0x80, 0x0a,
        ];
        assert_eq!(Timeseal::encode_at("hello", 0), expected.to_vec());
    }

    #[test]
    fn test_encode_deterministic() {
        let a = Timeseal::encode_at("observe 42", 777_001);
        let b = Timeseal::encode_at("observe 42", 777_001);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_stamps_differ_only_in_padding_length() {
        let a = Timeseal::encode_at("hello", 5);
        let b = Timeseal::encode_at("hello", 9_999_999);
        assert_ne!(a, b);
        // 两帧都是 12 的倍数加 2 字节结尾
        assert_eq!((a.len() - 2) % 12, 0);
        assert_eq!((b.len() - 2) % 12, 0);
        assert_eq!(a.len(), 14);
        assert_eq!(b.len(), 26);
    }

    #[test]
    fn test_ack_frame() {
        let expected = [
            0xc5, 0xb0, 0xd4, 0xb4, 0xa6, 0xa7, 0xb5, 0xbf, 0xa6, 0x98, 0x79, 0xa4, 0x80, 0x0a,
        ];
        assert_eq!(Timeseal::encode_at(TIMESEAL_ACK, 123456), expected.to_vec());
    }

    #[test]
    fn test_trailer_and_no_inner_newline() {
        let frame = Timeseal::encode_at(&Timeseal::handshake("chess-client"), 4321);
        assert_eq!(&frame[frame.len() - 2..], &[0x80, 0x0a]);
        assert!(!frame[..frame.len() - 2].contains(&b'\n'));
    }

    #[test]
    fn test_decode_inverts_encode() {
        let frame = Timeseal::encode_at("match GuestABCD 3 0", 42_017);
        assert_eq!(
            Timeseal::decode(&frame),
            Some(("match GuestABCD 3 0".to_string(), 42_017))
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(Timeseal::decode(b"hello\n"), None);
        assert_eq!(Timeseal::decode(&[]), None);
    }

    #[test]
    fn test_stamp() {
        assert_eq!(Timeseal::stamp(1_700_000_123, 456), 123_456);
        assert_eq!(Timeseal::stamp(9_999, 999), 9_999_999);
        assert!(Timeseal::stamp_now() < 10_000_000);
    }
}
