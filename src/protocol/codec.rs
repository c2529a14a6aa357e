//! Protocol codec for encoding/decoding messages
//!
//! Handles the symmetric conversion between [`WireMessage`] field maps
//! and the line-oriented text that actually travels in datagrams.

use thiserror::Error;

use super::{fields, WireMessage, MAX_DATAGRAM_SIZE};

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("message has no message_type field")]
    MissingMessageType,

    #[error("encoded message is {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    #[error("datagram is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

/// Encode a message into its on-wire text form.
///
/// Rejects any message lacking `message_type`; everything else is
/// emitted verbatim, one `name: value` line per field.
pub fn encode(message: &WireMessage) -> Result<String, CodecError> {
    if message.raw_type().is_none() {
        return Err(CodecError::MissingMessageType);
    }

    let lines: Vec<String> = message
        .fields()
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect();

    Ok(lines.join("\n"))
}

/// Encode a message and check it fits in a single datagram.
pub fn encode_datagram(message: &WireMessage) -> Result<Vec<u8>, CodecError> {
    let text = encode(message)?;
    let bytes = text.into_bytes();
    if bytes.len() > MAX_DATAGRAM_SIZE {
        return Err(CodecError::MessageTooLarge(bytes.len(), MAX_DATAGRAM_SIZE));
    }
    Ok(bytes)
}

/// Decode the text form back into a field map.
///
/// Each line is trimmed; empty lines and lines without a colon are
/// skipped; the split happens at the *first* colon so values keep any
/// colons of their own. A result without `message_type` is returned
/// as-is - the dispatcher logs and drops it as malformed.
pub fn decode(raw_text: &str) -> WireMessage {
    let mut parsed = Vec::new();

    for line in raw_text.split('\n') {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            continue;
        };

        parsed.push((name.trim().to_string(), value.trim().to_string()));
    }

    if parsed.iter().all(|(name, _)| name != fields::MESSAGE_TYPE) {
        tracing::debug!(raw = raw_text, "decoded message has no message_type");
    }

    WireMessage::from_fields(parsed)
}

/// Decode raw datagram bytes.
pub fn decode_datagram(bytes: &[u8]) -> Result<WireMessage, CodecError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(decode(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[test]
    fn test_encode_decode_roundtrip() {
        let original = WireMessage::attack_announce("Thunder Lance")
            .with(fields::SEQUENCE_NUMBER, "7");

        let text = encode(&original).unwrap();
        let decoded = decode(&text);

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_encode_rejects_missing_type() {
        let message = WireMessage::from_fields(vec![("seed".to_string(), "1".to_string())]);
        assert!(matches!(
            encode(&message),
            Err(CodecError::MissingMessageType)
        ));
    }

    #[test]
    fn test_encode_puts_type_first() {
        let text = encode(&WireMessage::defense_announce()).unwrap();
        assert!(text.starts_with("message_type: DEFENSE_ANNOUNCE"));
    }

    #[test]
    fn test_decode_splits_on_first_colon_only() {
        let decoded = decode("message_type: CHAT_MESSAGE\nmessage_text: meet at 10:30:00");
        assert_eq!(decoded.get("message_text"), Some("meet at 10:30:00"));
    }

    #[test]
    fn test_decode_skips_blank_and_colonless_lines() {
        let decoded = decode("\nmessage_type: ACK\nthis line has no colon\n\nack_number: 3\n");
        assert_eq!(decoded.message_type(), Some(MessageType::Ack));
        assert_eq!(decoded.ack_number(), Some(3));
        assert_eq!(decoded.fields().len(), 2);
    }

    #[test]
    fn test_decode_trims_whitespace() {
        let decoded = decode("  message_type :  GAME_OVER \n winner:Emberfox  ");
        assert_eq!(decoded.message_type(), Some(MessageType::GameOver));
        assert_eq!(decoded.get("winner"), Some("Emberfox"));
    }

    #[test]
    fn test_decode_without_type_is_surfaced_not_dropped() {
        let decoded = decode("move_name: Tackle");
        assert_eq!(decoded.message_type(), None);
        assert_eq!(decoded.get("move_name"), Some("Tackle"));
    }

    #[test]
    fn test_datagram_size_limit() {
        let message =
            WireMessage::chat_text("player", &"x".repeat(MAX_DATAGRAM_SIZE));
        assert!(matches!(
            encode_datagram(&message),
            Err(CodecError::MessageTooLarge(_, _))
        ));
    }
}
