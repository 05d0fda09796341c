//! Frame codec + grammar combined into the unit both endpoints speak.

use thiserror::Error;

use crate::protocol::frame::FrameCodec;
use crate::protocol::grammar::{Grammar, Message};

/// Errors that can occur while framing or parsing a message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The header bytes are not a non-negative decimal integer.
    #[error("corrupt frame header: {header:?}")]
    CorruptHeader { header: String },

    /// The declared body length exceeds the configured maximum.
    #[error("frame of {declared} bytes exceeds the {limit}-byte limit")]
    OversizeFrame { declared: usize, limit: usize },

    /// The body length does not fit into the fixed-width header.
    #[error("body of {body_len} bytes cannot be announced in a {header_len}-byte header")]
    HeaderOverflow { body_len: usize, header_len: usize },

    /// The body is structurally invalid for the grammar in use.
    #[error("malformed frame body: {0}")]
    Framing(String),

    /// A command or payload collides with a grammar marker.
    #[error("escaping error: {detail}")]
    Escaping { detail: String },

    /// A reserved control frame carries an unusable argument.
    #[error("malformed control frame: {0}")]
    MalformedControl(String),
}

/// Encodes [`Message`]s into wire bytes and decodes frame bodies back.
///
/// # Examples
///
/// ```rust
/// use cmdwire_core::protocol::{Message, WireCodec};
///
/// let codec = WireCodec::default();
/// let wire = codec.encode(&Message::command("greet", Some(b"hi".to_vec()))).unwrap();
/// assert_eq!(&wire[..16], b"17              ");
/// assert_eq!(&wire[16..], b"$CMD$greet$MSG$hi");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WireCodec {
    frame: FrameCodec,
    grammar: Grammar,
}

impl WireCodec {
    pub fn new(frame: FrameCodec, grammar: Grammar) -> Self {
        Self { frame, grammar }
    }

    pub fn frame(&self) -> FrameCodec {
        self.frame
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    /// Produces `header ‖ body` for `message`.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        self.encode_with(message, false)
    }

    /// Like [`WireCodec::encode`], optionally letting payloads carry marker text.
    pub fn encode_with(&self, message: &Message, allow_markers: bool) -> Result<Vec<u8>, ProtocolError> {
        let body = self.grammar.encode_with(message, allow_markers)?;
        self.frame.encode_frame(&body)
    }

    /// Parses a frame body (header already stripped).
    pub fn decode_body(&self, body: &[u8]) -> Result<Message, ProtocolError> {
        self.grammar.decode(body)
    }

    /// Decodes one complete message from the front of `buf`.
    ///
    /// Returns `Ok(None)` until the whole frame is buffered; otherwise the
    /// message plus the number of bytes consumed.
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Message, usize)>, ProtocolError> {
        match self.frame.decode(buf)? {
            Some((body, consumed)) => Ok(Some((self.grammar.decode(&body)?, consumed))),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::grammar::Control;

    #[test]
    fn test_encode_greet_matches_expected_wire_bytes() {
        let codec = WireCodec::default();

        let wire = codec
            .encode(&Message::command("greet", Some(b"hi".to_vec())))
            .unwrap();

        assert_eq!(&wire[..16], b"17              ");
        assert_eq!(&wire[16..], b"$CMD$greet$MSG$hi");
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let codec = WireCodec::default();
        let wire = codec.encode(&Message::Control(Control::KeepAlive)).unwrap();

        assert_eq!(codec.decode(&wire[..10]).unwrap(), None);
        let (message, consumed) = codec.decode(&wire).unwrap().unwrap();
        assert_eq!(message, Message::Control(Control::KeepAlive));
        assert_eq!(consumed, wire.len());
    }

    #[test]
    fn test_header_len_mismatch_corrupts_framing() {
        let sender = WireCodec::new(FrameCodec::new(16), Grammar::Marker);
        let receiver = WireCodec::new(FrameCodec::new(8), Grammar::Marker);
        let wire = sender.encode(&Message::command("greet", None)).unwrap();

        // The receiver reads 8 header bytes, then treats the padding as body.
        let (message, _) = receiver.decode(&wire).unwrap().unwrap();
        assert_ne!(message, Message::command("greet", None));
    }
}
