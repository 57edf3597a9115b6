//! Decoding of one channel snapshot.

use std::borrow::Cow;
use std::fmt;

use crate::channel::PID_LEN;

/// One debug message taken out of the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugMessage {
    /// Process that wrote the message.
    pub pid: u32,
    /// Text bytes up to (not including) the first NUL.
    pub text: Vec<u8>,
}

/// Something about a snapshot that could not be decoded cleanly.
///
/// Broadcasters are arbitrary processes, so these are expected now and then.
/// They are logged and counted, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeAnomaly {
    /// Snapshot too short to hold a pid.
    ShortSnapshot { len: usize },
    /// Text is not UTF-8; replacement characters were substituted.
    InvalidUtf8 { valid_up_to: usize },
}

impl fmt::Display for DecodeAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortSnapshot { len } => {
                write!(f, "snapshot of {} bytes has no room for a pid", len)
            }
            Self::InvalidUtf8 { valid_up_to } => {
                write!(f, "text is not valid UTF-8 after byte {}", valid_up_to)
            }
        }
    }
}

impl DebugMessage {
    pub fn new(pid: u32, text: impl Into<Vec<u8>>) -> Self {
        Self {
            pid,
            text: text.into(),
        }
    }

    /// Decode `pid | text` from a snapshot.
    ///
    /// The pid is the first 4 bytes, little endian. The text is the rest,
    /// cut at the first NUL; with no NUL the whole remainder is used.
    pub fn decode(snapshot: &[u8]) -> Result<Self, DecodeAnomaly> {
        if snapshot.len() < PID_LEN {
            return Err(DecodeAnomaly::ShortSnapshot {
                len: snapshot.len(),
            });
        }

        let (pid_bytes, rest) = snapshot.split_at(PID_LEN);
        let pid = u32::from_le_bytes([pid_bytes[0], pid_bytes[1], pid_bytes[2], pid_bytes[3]]);

        let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());

        Ok(Self {
            pid,
            text: rest[..end].to_vec(),
        })
    }

    /// Text as UTF-8, or the anomaly describing why it isn't.
    pub fn check_text(&self) -> Result<&str, DecodeAnomaly> {
        std::str::from_utf8(&self.text).map_err(|e| DecodeAnomaly::InvalidUtf8 {
            valid_up_to: e.valid_up_to(),
        })
    }

    /// Text with invalid sequences replaced by U+FFFD.
    pub fn text_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.text)
    }
}

/// Formats as a log line, without the newline.
impl fmt::Display for DebugMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process {}: {}", self.pid, self.text_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{CHANNEL_CAPACITY, PAYLOAD_CAPACITY};

    fn snapshot(pid: u32, text: &[u8]) -> [u8; CHANNEL_CAPACITY] {
        let mut buf = [0u8; CHANNEL_CAPACITY];
        buf[..PID_LEN].copy_from_slice(&pid.to_le_bytes());
        buf[PID_LEN..PID_LEN + text.len()].copy_from_slice(text);
        buf
    }

    #[test]
    fn test_decode_nul_terminated() {
        let msg = DebugMessage::decode(&snapshot(100, b"foo")).unwrap();
        assert_eq!(msg.pid, 100);
        assert_eq!(msg.text, b"foo");
        assert_eq!(msg.to_string(), "Process 100: foo");
    }

    #[test]
    fn test_decode_truncates_at_first_nul() {
        let msg = DebugMessage::decode(&snapshot(7, b"abc\0def")).unwrap();
        assert_eq!(msg.text, b"abc");
    }

    #[test]
    fn test_decode_full_payload_without_nul() {
        let text = vec![b'x'; PAYLOAD_CAPACITY];
        let msg = DebugMessage::decode(&snapshot(1, &text)).unwrap();
        assert_eq!(msg.text.len(), PAYLOAD_CAPACITY);
    }

    #[test]
    fn test_decode_pid_is_little_endian() {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&[0x78, 0x56, 0x34, 0x12]);
        let msg = DebugMessage::decode(&buf).unwrap();
        assert_eq!(msg.pid, 0x1234_5678);
        assert!(msg.text.is_empty());
    }

    #[test]
    fn test_decode_short_snapshot() {
        assert_eq!(
            DebugMessage::decode(&[1, 2]),
            Err(DecodeAnomaly::ShortSnapshot { len: 2 })
        );
    }

    #[test]
    fn test_invalid_utf8_is_lossy() {
        let msg = DebugMessage::new(9, vec![b'o', b'k', 0xff, b'!']);
        assert_eq!(
            msg.check_text(),
            Err(DecodeAnomaly::InvalidUtf8 { valid_up_to: 2 })
        );
        assert_eq!(msg.to_string(), "Process 9: ok\u{fffd}!");
    }

    #[test]
    fn test_empty_text_line() {
        let msg = DebugMessage::new(42, Vec::new());
        assert_eq!(msg.check_text(), Ok(""));
        assert_eq!(msg.to_string(), "Process 42: ");
    }
}
