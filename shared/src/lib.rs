//! Wire protocol shared by the relay server and its clients.
//!
//! A message is the raw ASCII content of one TCP read: a leading decimal type
//! tag followed by type-specific, space-separated fields. There is no length
//! prefix and no terminator, so a single read of at most [`MAX_MESSAGE_SIZE`]
//! bytes is one message. Writes longer than that arrive as several messages.

use thiserror::Error;

pub const MAX_MESSAGE_SIZE: usize = 1400;
pub const DEFAULT_PORT: u16 = 1234;
pub const MAX_SESSIONS: usize = 30;
pub const IDLE_TIMEOUT_MS: u64 = 100_000;

pub const GREETING_TAG: u64 = 0;
pub const MOVE_TAG: u64 = 1;
pub const DISCONNECT_TAG: u64 = 2;
pub const SHOT_TAG: u64 = 3;

/// Message types the server knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Opaque move/action, relayed to everyone but the sender.
    Move,
    /// Graceful disconnect, relayed to everyone else before the sender leaves.
    Disconnect,
    /// Targeted event carrying the id of the session that was hit.
    Shot,
}

impl TryFrom<u64> for MessageKind {
    type Error = DecodeError;

    fn try_from(tag: u64) -> Result<Self, Self::Error> {
        match tag {
            MOVE_TAG => Ok(MessageKind::Move),
            DISCONNECT_TAG => Ok(MessageKind::Disconnect),
            SHOT_TAG => Ok(MessageKind::Shot),
            other => Err(DecodeError::UnknownType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("message does not start with a decimal type tag")]
    MissingTypeTag,
    #[error("type tag does not fit in 64 bits")]
    TagOverflow,
    #[error("unknown message type {0}")]
    UnknownType(u64),
    #[error("shot message carries no target id")]
    MissingTarget,
}

/// A decoded view over a received buffer.
///
/// `rest` is everything after the type tag, leading space included, so
/// handlers can re-parse it the way their message type requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub tag: u64,
    pub rest: &'a [u8],
}

impl<'a> Message<'a> {
    /// Parses the leading type tag of `buffer`.
    pub fn decode(buffer: &'a [u8]) -> Result<Self, DecodeError> {
        if buffer.is_empty() {
            return Err(DecodeError::Empty);
        }

        let digits = buffer.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return Err(DecodeError::MissingTypeTag);
        }

        let mut tag: u64 = 0;
        for &digit in &buffer[..digits] {
            tag = tag
                .checked_mul(10)
                .and_then(|t| t.checked_add(u64::from(digit - b'0')))
                .ok_or(DecodeError::TagOverflow)?;
        }

        Ok(Message {
            tag,
            rest: &buffer[digits..],
        })
    }

    pub fn kind(&self) -> Result<MessageKind, DecodeError> {
        MessageKind::try_from(self.tag)
    }

    /// Reads the target id of a shot message (`3 <id>`).
    pub fn shot_target(&self) -> Result<u64, DecodeError> {
        self.leading_number().ok_or(DecodeError::MissingTarget)
    }

    /// First decimal field after the tag.
    ///
    /// Leading whitespace is skipped and anything after the number, including
    /// the NUL terminator C clients append, is ignored.
    fn leading_number(&self) -> Option<u64> {
        let fields = trim_terminator(self.rest);
        let start = fields.iter().position(|b| !b.is_ascii_whitespace())?;
        let number = &fields[start..];
        let digits = number.iter().take_while(|b| b.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }

        std::str::from_utf8(&number[..digits]).ok()?.parse().ok()
    }
}

/// Strips trailing NUL bytes.
fn trim_terminator(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &bytes[..end]
}

/// Greeting sent to a newly admitted session: `0 <id>`.
pub fn greeting(id: u64) -> Vec<u8> {
    format!("{} {}", GREETING_TAG, id).into_bytes()
}

/// Notice broadcast when the server evicts a session: `2 <id>`.
pub fn disconnect_notice(id: u64) -> Vec<u8> {
    format!("{} {}", DISCONNECT_TAG, id).into_bytes()
}

pub fn move_message() -> Vec<u8> {
    MOVE_TAG.to_string().into_bytes()
}

pub fn shot_message(target: u64) -> Vec<u8> {
    format!("{} {}", SHOT_TAG, target).into_bytes()
}

/// Session id carried by a greeting or server disconnect notice.
pub fn parse_session_id(buffer: &[u8]) -> Option<u64> {
    Message::decode(buffer).ok()?.leading_number()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_reads_multi_digit_tag() {
        let message = Message::decode(b"12 rest").unwrap();
        assert_eq!(message.tag, 12);
        assert_eq!(message.rest, b" rest");
    }

    #[test]
    fn decode_bare_tag_has_empty_rest() {
        let message = Message::decode(b"1").unwrap();
        assert_eq!(message.kind(), Ok(MessageKind::Move));
        assert!(message.rest.is_empty());
    }

    #[test]
    fn decode_rejects_missing_tag() {
        assert_eq!(Message::decode(b""), Err(DecodeError::Empty));
        assert_eq!(Message::decode(b" 1"), Err(DecodeError::MissingTypeTag));
        assert_eq!(Message::decode(b"-1"), Err(DecodeError::MissingTypeTag));
        assert_eq!(Message::decode(b"\0"), Err(DecodeError::MissingTypeTag));
    }

    #[test]
    fn decode_rejects_overflowing_tag() {
        assert_eq!(
            Message::decode(b"99999999999999999999999 x"),
            Err(DecodeError::TagOverflow)
        );
    }

    #[test]
    fn unknown_tags_are_errors() {
        let message = Message::decode(b"7 whatever").unwrap();
        assert_eq!(message.kind(), Err(DecodeError::UnknownType(7)));
        let message = Message::decode(b"0 4").unwrap();
        assert_eq!(message.kind(), Err(DecodeError::UnknownType(0)));
    }

    #[test]
    fn shot_target_parsing() {
        let message = Message::decode(b"3 7").unwrap();
        assert_eq!(message.kind(), Ok(MessageKind::Shot));
        assert_eq!(message.shot_target(), Ok(7));

        let message = Message::decode(b"3   42 trailing\0").unwrap();
        assert_eq!(message.shot_target(), Ok(42));

        let message = Message::decode(b"3 15\0").unwrap();
        assert_eq!(message.shot_target(), Ok(15));
    }

    #[test]
    fn shot_without_target_is_rejected() {
        for buffer in [&b"3"[..], &b"3 "[..], &b"3 x"[..], &b"3\0"[..]] {
            let message = Message::decode(buffer).unwrap();
            assert_eq!(message.shot_target(), Err(DecodeError::MissingTarget));
        }
    }

    #[test]
    fn server_payloads() {
        assert_eq!(greeting(4), b"0 4".to_vec());
        assert_eq!(disconnect_notice(11), b"2 11".to_vec());
        assert_eq!(shot_message(2), b"3 2".to_vec());
        assert_eq!(move_message(), b"1".to_vec());
        assert_eq!(parse_session_id(&greeting(9)), Some(9));
        assert_eq!(parse_session_id(b"2"), None);
    }
}
