//! Command grammar: what goes *inside* a frame body.
//!
//! # Marker grammar (default)
//!
//! ```text
//! $CMD$<command>                    command without payload
//! $CMD$<command>$MSG$<payload>      command with payload
//! $KEEPALIVE$ / $DISCONN$ / ...     reserved control sequences
//! <anything else>                   raw payload (send-without-command)
//! ```
//!
//! Control sequences that carry an argument separate it from the marker with
//! a single space, e.g. `$CHNAME$ alice` or `$CLTCONN$ {"addr":...}`.
//! Reserved controls are recognised *before* `$CMD$` parsing and never reach
//! the router as ordinary commands.
//!
//! Because markers are plain text, a command containing `$MSG$` would split in
//! the wrong place on decode, and a raw payload starting with `$DISCONN$` would
//! be mistaken for a control frame.  [`Grammar::encode`] refuses such input
//! with [`ProtocolError::Escaping`].
//!
//! # Tagged grammar
//!
//! ```text
//! [tag:1][cmd_len:4][cmd][payload_flag:1][payload_len:4][payload]
//! ```
//! Lengths are big-endian `u32`.  Nothing needs escaping.  Both ends of a
//! connection must agree on the grammar, exactly as they must agree on the
//! header length.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::protocol::codec::ProtocolError;
use crate::registry::ClientIdentity;

const CMD_MARKER: &[u8] = b"$CMD$";
const MSG_MARKER: &[u8] = b"$MSG$";

const HELLO: &str = "$CLTHELLO$";
const KEEPALIVE: &str = "$KEEPALIVE$";
const KEEPALIVE_ACK: &str = "$KEEPACK$";
const DISCONNECT: &str = "$DISCONN$";
const PEER_JOINED: &str = "$CLTCONN$";
const PEER_LEFT: &str = "$CLTDISCONN$";
const LOOKUP: &str = "$GETCLT$";
const CLIENT_INFO: &str = "$CLTINFO$";
const CHANGE_NAME: &str = "$CHNAME$";
const CHANGE_GROUP: &str = "$CHGROUP$";
const CLOSE: &str = "$USRCLOSE$";

/// Every reserved control marker, in the order they are matched.
pub const RESERVED_MARKERS: &[&str] = &[
    HELLO,
    KEEPALIVE,
    KEEPALIVE_ACK,
    DISCONNECT,
    PEER_JOINED,
    PEER_LEFT,
    LOOKUP,
    CLIENT_INFO,
    CHANGE_NAME,
    CHANGE_GROUP,
    CLOSE,
];

const TAG_COMMAND: u8 = 0x00;
const TAG_RAW: u8 = 0x01;
const TAG_HELLO: u8 = 0x10;
const TAG_KEEPALIVE: u8 = 0x11;
const TAG_KEEPALIVE_ACK: u8 = 0x12;
const TAG_DISCONNECT: u8 = 0x13;
const TAG_PEER_JOINED: u8 = 0x14;
const TAG_PEER_LEFT: u8 = 0x15;
const TAG_LOOKUP: u8 = 0x16;
const TAG_CLIENT_INFO: u8 = 0x17;
const TAG_CHANGE_NAME: u8 = 0x18;
const TAG_CHANGE_GROUP: u8 = 0x19;
const TAG_CLOSE: u8 = 0x1A;

// ── Message types ─────────────────────────────────────────────────────────────

/// Name and group a client announces when it joins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinInfo {
    pub name: Option<String>,
    pub group: Option<String>,
}

/// Reserved protocol-level control frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Join handshake sent by a client right after connecting.
    Hello(JoinInfo),
    /// Keepalive probe.
    KeepAlive,
    /// Keepalive acknowledgment.
    KeepAliveAck,
    /// Server tells a client it is being disconnected.
    Disconnect,
    /// Another client joined the server.
    PeerJoined(ClientIdentity),
    /// Another client left the server.
    PeerLeft(ClientIdentity),
    /// Client asks the server to look up clients by selector text.
    Lookup(String),
    /// Server answers a lookup with every match.
    ClientInfo(Vec<ClientIdentity>),
    /// Client changes (or clears) its name.
    ChangeName(Option<String>),
    /// Client changes (or clears) its group.
    ChangeGroup(Option<String>),
    /// Local graceful-close signal.
    Close,
}

/// One decoded frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A user command with an optional payload.
    Command {
        command: String,
        payload: Option<Vec<u8>>,
    },
    /// Payload sent without any command.
    Raw(Vec<u8>),
    /// Reserved control frame.
    Control(Control),
}

impl Message {
    /// Shorthand for a [`Message::Command`].
    pub fn command(command: impl Into<String>, payload: Option<Vec<u8>>) -> Self {
        Message::Command {
            command: command.into(),
            payload,
        }
    }

    /// Returns `true` for reserved control frames.
    pub fn is_control(&self) -> bool {
        matches!(self, Message::Control(_))
    }
}

// ── Grammar ───────────────────────────────────────────────────────────────────

/// Which body grammar a connection speaks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grammar {
    /// Textual `$CMD$` / `$MSG$` markers.
    #[default]
    Marker,
    /// Length-tagged fields; no escaping required.
    Tagged,
}

impl Grammar {
    /// Encodes `message`, refusing input that collides with grammar markers.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        self.encode_with(message, false)
    }

    /// Encodes `message`.
    ///
    /// With `allow_markers` set, payloads may contain or start with marker
    /// text.  Commands are always validated: a command holding `$MSG$` can
    /// never be decoded back correctly.
    pub fn encode_with(&self, message: &Message, allow_markers: bool) -> Result<Vec<u8>, ProtocolError> {
        if let Message::Command { command, .. } = message {
            validate_command(command)?;
        }
        match self {
            Grammar::Marker => encode_marker(message, allow_markers),
            Grammar::Tagged => encode_tagged(message),
        }
    }

    /// Decodes one frame body.
    pub fn decode(&self, body: &[u8]) -> Result<Message, ProtocolError> {
        match self {
            Grammar::Marker => decode_marker(body),
            Grammar::Tagged => decode_tagged(body),
        }
    }
}

/// Checks that a command can travel through the marker grammar unambiguously.
///
/// # Errors
///
/// [`ProtocolError::Escaping`] for empty commands, commands containing
/// `$CMD$`, `$MSG$` or a reserved marker, and `$...$`-style commands that
/// look like reserved markup.
pub fn validate_command(command: &str) -> Result<(), ProtocolError> {
    let escaping = |detail: String| Err(ProtocolError::Escaping { detail });

    if command.is_empty() {
        return escaping("command is empty".to_string());
    }
    let bytes = command.as_bytes();
    for marker in [CMD_MARKER, MSG_MARKER] {
        if contains(bytes, marker) {
            return escaping(format!(
                "command `{command}` contains `{}`",
                String::from_utf8_lossy(marker)
            ));
        }
    }
    if let Some(marker) = RESERVED_MARKERS.iter().find(|m| command.contains(**m)) {
        return escaping(format!("command `{command}` contains reserved marker `{marker}`"));
    }
    if command.len() >= 2 && command.starts_with('$') && command.ends_with('$') {
        return escaping(format!("command `{command}` uses reserved `$...$` notation"));
    }
    Ok(())
}

// ── Marker grammar ────────────────────────────────────────────────────────────

fn encode_marker(message: &Message, allow_markers: bool) -> Result<Vec<u8>, ProtocolError> {
    match message {
        Message::Command { command, payload } => {
            let mut body = Vec::with_capacity(
                CMD_MARKER.len() + command.len() + payload.as_ref().map_or(0, |p| p.len() + MSG_MARKER.len()),
            );
            body.extend_from_slice(CMD_MARKER);
            body.extend_from_slice(command.as_bytes());
            if let Some(payload) = payload {
                if !allow_markers {
                    reject_markers_in_payload(payload)?;
                }
                body.extend_from_slice(MSG_MARKER);
                body.extend_from_slice(payload);
            }
            Ok(body)
        }
        Message::Raw(payload) => {
            if !allow_markers {
                if payload.starts_with(CMD_MARKER) {
                    return Err(ProtocolError::Escaping {
                        detail: "raw payload starts with `$CMD$`".to_string(),
                    });
                }
                if let Some(marker) = RESERVED_MARKERS.iter().find(|m| payload.starts_with(m.as_bytes())) {
                    return Err(ProtocolError::Escaping {
                        detail: format!("raw payload starts with reserved marker `{marker}`"),
                    });
                }
            }
            Ok(payload.clone())
        }
        Message::Control(control) => {
            let (marker, argument) = marker_parts(control)?;
            let mut body = marker.as_bytes().to_vec();
            if let Some(argument) = argument {
                body.push(b' ');
                body.extend_from_slice(&argument);
            }
            Ok(body)
        }
    }
}

fn reject_markers_in_payload(payload: &[u8]) -> Result<(), ProtocolError> {
    for marker in [CMD_MARKER, MSG_MARKER] {
        if contains(payload, marker) {
            return Err(ProtocolError::Escaping {
                detail: format!("payload contains `{}`", String::from_utf8_lossy(marker)),
            });
        }
    }
    if let Some(marker) = RESERVED_MARKERS.iter().find(|m| contains(payload, m.as_bytes())) {
        return Err(ProtocolError::Escaping {
            detail: format!("payload contains reserved marker `{marker}`"),
        });
    }
    Ok(())
}

fn decode_marker(body: &[u8]) -> Result<Message, ProtocolError> {
    for marker in RESERVED_MARKERS {
        let marker_bytes = marker.as_bytes();
        if body == marker_bytes {
            return parse_control(marker, None).map(Message::Control);
        }
        if body.len() > marker_bytes.len() && body.starts_with(marker_bytes) && body[marker_bytes.len()] == b' ' {
            let argument = &body[marker_bytes.len() + 1..];
            return parse_control(marker, Some(argument)).map(Message::Control);
        }
    }

    let Some(rest) = body.strip_prefix(CMD_MARKER) else {
        return Ok(Message::Raw(body.to_vec()));
    };

    let (command, payload) = match find(rest, MSG_MARKER) {
        Some(at) => (&rest[..at], Some(rest[at + MSG_MARKER.len()..].to_vec())),
        None => (rest, None),
    };
    let command = std::str::from_utf8(command)
        .map_err(|_| ProtocolError::Framing("command is not valid UTF-8".to_string()))?;
    if command.is_empty() {
        return Err(ProtocolError::Framing("frame carries an empty command".to_string()));
    }

    Ok(Message::Command {
        command: command.to_string(),
        payload,
    })
}

fn marker_parts(control: &Control) -> Result<(&'static str, Option<Vec<u8>>), ProtocolError> {
    let parts = match control {
        Control::Hello(info) => (HELLO, Some(to_json(info)?)),
        Control::KeepAlive => (KEEPALIVE, None),
        Control::KeepAliveAck => (KEEPALIVE_ACK, None),
        Control::Disconnect => (DISCONNECT, None),
        Control::PeerJoined(identity) => (PEER_JOINED, Some(to_json(identity)?)),
        Control::PeerLeft(identity) => (PEER_LEFT, Some(to_json(identity)?)),
        Control::Lookup(selector) => (LOOKUP, Some(selector.as_bytes().to_vec())),
        Control::ClientInfo(identities) => (CLIENT_INFO, Some(to_json(identities)?)),
        Control::ChangeName(name) => (CHANGE_NAME, name.as_ref().map(|n| n.as_bytes().to_vec())),
        Control::ChangeGroup(group) => (CHANGE_GROUP, group.as_ref().map(|g| g.as_bytes().to_vec())),
        Control::Close => (CLOSE, None),
    };
    Ok(parts)
}

fn parse_control(marker: &str, argument: Option<&[u8]>) -> Result<Control, ProtocolError> {
    let control = match marker {
        HELLO => Control::Hello(from_json(marker, required(marker, argument)?)?),
        KEEPALIVE => Control::KeepAlive,
        KEEPALIVE_ACK => Control::KeepAliveAck,
        DISCONNECT => Control::Disconnect,
        PEER_JOINED => Control::PeerJoined(from_json(marker, required(marker, argument)?)?),
        PEER_LEFT => Control::PeerLeft(from_json(marker, required(marker, argument)?)?),
        LOOKUP => Control::Lookup(utf8(marker, required(marker, argument)?)?),
        CLIENT_INFO => Control::ClientInfo(from_json(marker, required(marker, argument)?)?),
        CHANGE_NAME => Control::ChangeName(argument.map(|a| utf8(marker, a)).transpose()?),
        CHANGE_GROUP => Control::ChangeGroup(argument.map(|a| utf8(marker, a)).transpose()?),
        CLOSE => Control::Close,
        other => return Err(ProtocolError::MalformedControl(format!("unknown marker {other}"))),
    };
    Ok(control)
}

fn required<'a>(marker: &str, argument: Option<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    argument.ok_or_else(|| ProtocolError::MalformedControl(format!("{marker} requires an argument")))
}

fn utf8(marker: &str, argument: &[u8]) -> Result<String, ProtocolError> {
    std::str::from_utf8(argument)
        .map(str::to_string)
        .map_err(|_| ProtocolError::MalformedControl(format!("{marker} argument is not UTF-8")))
}

// ── Tagged grammar ────────────────────────────────────────────────────────────

fn encode_tagged(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    let (tag, command, payload): (u8, &[u8], Option<Vec<u8>>) = match message {
        Message::Command { command, payload } => (TAG_COMMAND, command.as_bytes(), payload.clone()),
        Message::Raw(payload) => (TAG_RAW, b"".as_slice(), Some(payload.clone())),
        Message::Control(control) => {
            let (marker, argument) = marker_parts(control)?;
            (tag_for(marker), b"".as_slice(), argument)
        }
    };

    let payload_len = payload.as_ref().map_or(0, Vec::len);
    let mut body = Vec::with_capacity(1 + 4 + command.len() + 1 + 4 + payload_len);
    body.push(tag);
    body.extend_from_slice(&(command.len() as u32).to_be_bytes());
    body.extend_from_slice(command);
    match payload {
        Some(payload) => {
            body.push(1);
            body.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            body.extend_from_slice(&payload);
        }
        None => {
            body.push(0);
            body.extend_from_slice(&0u32.to_be_bytes());
        }
    }
    Ok(body)
}

fn tag_for(marker: &str) -> u8 {
    match marker {
        HELLO => TAG_HELLO,
        KEEPALIVE => TAG_KEEPALIVE,
        KEEPALIVE_ACK => TAG_KEEPALIVE_ACK,
        DISCONNECT => TAG_DISCONNECT,
        PEER_JOINED => TAG_PEER_JOINED,
        PEER_LEFT => TAG_PEER_LEFT,
        LOOKUP => TAG_LOOKUP,
        CLIENT_INFO => TAG_CLIENT_INFO,
        CHANGE_NAME => TAG_CHANGE_NAME,
        CHANGE_GROUP => TAG_CHANGE_GROUP,
        _ => TAG_CLOSE,
    }
}

fn decode_tagged(body: &[u8]) -> Result<Message, ProtocolError> {
    let mut cursor = TaggedCursor { body, pos: 0 };
    let tag = cursor.take(1)?[0];
    let command_len = cursor.read_u32()? as usize;
    let command = cursor.take(command_len)?;
    let has_payload = cursor.take(1)?[0];
    let payload_len = cursor.read_u32()? as usize;
    let payload = cursor.take(payload_len)?;
    if cursor.pos != body.len() {
        return Err(ProtocolError::Framing(format!(
            "{} trailing bytes after tagged fields",
            body.len() - cursor.pos
        )));
    }
    let payload = match has_payload {
        0 => None,
        1 => Some(payload),
        other => return Err(ProtocolError::Framing(format!("invalid payload flag {other}"))),
    };

    let marker = match tag {
        TAG_COMMAND => {
            let command = std::str::from_utf8(command)
                .map_err(|_| ProtocolError::Framing("command is not valid UTF-8".to_string()))?;
            if command.is_empty() {
                return Err(ProtocolError::Framing("frame carries an empty command".to_string()));
            }
            return Ok(Message::Command {
                command: command.to_string(),
                payload: payload.map(<[u8]>::to_vec),
            });
        }
        TAG_RAW => return Ok(Message::Raw(payload.map(<[u8]>::to_vec).unwrap_or_default())),
        TAG_HELLO => HELLO,
        TAG_KEEPALIVE => KEEPALIVE,
        TAG_KEEPALIVE_ACK => KEEPALIVE_ACK,
        TAG_DISCONNECT => DISCONNECT,
        TAG_PEER_JOINED => PEER_JOINED,
        TAG_PEER_LEFT => PEER_LEFT,
        TAG_LOOKUP => LOOKUP,
        TAG_CLIENT_INFO => CLIENT_INFO,
        TAG_CHANGE_NAME => CHANGE_NAME,
        TAG_CHANGE_GROUP => CHANGE_GROUP,
        TAG_CLOSE => CLOSE,
        other => return Err(ProtocolError::Framing(format!("unknown tag 0x{other:02X}"))),
    };
    parse_control(marker, payload).map(Message::Control)
}

struct TaggedCursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> TaggedCursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.body.len())
            .ok_or_else(|| {
                ProtocolError::Framing(format!(
                    "tagged body truncated: need {n} bytes at offset {}, have {}",
                    self.pos,
                    self.body.len()
                ))
            })?;
        let slice = &self.body[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::MalformedControl(e.to_string()))
}

fn from_json<T: DeserializeOwned>(marker: &str, argument: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(argument)
        .map_err(|e| ProtocolError::MalformedControl(format!("{marker} argument: {e}")))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle).is_some()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ConnectionId;

    fn identity() -> ClientIdentity {
        ClientIdentity {
            connection: ConnectionId::new(),
            addr: "10.0.0.7:40000".parse().unwrap(),
            name: Some("alice".to_string()),
            group: Some("g1".to_string()),
        }
    }

    #[test]
    fn test_marker_encodes_command_with_payload() {
        let body = Grammar::Marker
            .encode(&Message::command("greet", Some(b"hi".to_vec())))
            .unwrap();
        assert_eq!(body, b"$CMD$greet$MSG$hi");
    }

    #[test]
    fn test_marker_encodes_command_without_payload() {
        let body = Grammar::Marker.encode(&Message::command("ping", None)).unwrap();
        assert_eq!(body, b"$CMD$ping");
    }

    #[test]
    fn test_marker_distinguishes_empty_payload_from_absent_payload() {
        let decoded = Grammar::Marker.decode(b"$CMD$ping$MSG$").unwrap();
        assert_eq!(decoded, Message::command("ping", Some(Vec::new())));
    }

    #[test]
    fn test_marker_rejects_command_containing_msg_marker() {
        let result = Grammar::Marker.encode(&Message::command("a$MSG$b", None));
        assert!(matches!(result, Err(ProtocolError::Escaping { .. })));
    }

    #[test]
    fn test_marker_rejects_dollar_wrapped_command() {
        let result = Grammar::Marker.encode(&Message::command("$join$", None));
        assert!(matches!(result, Err(ProtocolError::Escaping { .. })));
    }

    #[test]
    fn test_marker_rejects_empty_command() {
        let result = Grammar::Tagged.encode(&Message::command("", None));
        assert!(matches!(result, Err(ProtocolError::Escaping { .. })));
    }

    #[test]
    fn test_marker_rejects_payload_with_marker_unless_allowed() {
        let message = Message::command("echo", Some(b"x$CMD$y".to_vec()));

        assert!(matches!(
            Grammar::Marker.encode(&message),
            Err(ProtocolError::Escaping { .. })
        ));

        let body = Grammar::Marker.encode_with(&message, true).unwrap();
        assert_eq!(Grammar::Marker.decode(&body).unwrap(), message);
    }

    #[test]
    fn test_marker_rejects_raw_payload_that_looks_like_control() {
        let result = Grammar::Marker.encode(&Message::Raw(b"$DISCONN$".to_vec()));
        assert!(matches!(result, Err(ProtocolError::Escaping { .. })));
    }

    #[test]
    fn test_marker_decodes_unprefixed_body_as_raw() {
        let decoded = Grammar::Marker.decode(b"just bytes").unwrap();
        assert_eq!(decoded, Message::Raw(b"just bytes".to_vec()));
    }

    #[test]
    fn test_marker_recognises_controls_before_commands() {
        assert_eq!(
            Grammar::Marker.decode(b"$DISCONN$").unwrap(),
            Message::Control(Control::Disconnect)
        );
        assert_eq!(
            Grammar::Marker.decode(b"$KEEPALIVE$").unwrap(),
            Message::Control(Control::KeepAlive)
        );
    }

    #[test]
    fn test_marker_change_name_without_argument_clears_name() {
        assert_eq!(
            Grammar::Marker.decode(b"$CHNAME$").unwrap(),
            Message::Control(Control::ChangeName(None))
        );
        assert_eq!(
            Grammar::Marker.decode(b"$CHNAME$ bob").unwrap(),
            Message::Control(Control::ChangeName(Some("bob".to_string())))
        );
    }

    #[test]
    fn test_marker_peer_joined_carries_serialized_identity() {
        let control = Control::PeerJoined(identity());
        let body = Grammar::Marker.encode(&Message::Control(control.clone())).unwrap();

        assert!(body.starts_with(b"$CLTCONN$ {"));
        assert_eq!(Grammar::Marker.decode(&body).unwrap(), Message::Control(control));
    }

    #[test]
    fn test_marker_rejects_peer_joined_with_bad_json() {
        let result = Grammar::Marker.decode(b"$CLTCONN$ not-json");
        assert!(matches!(result, Err(ProtocolError::MalformedControl(_))));
    }

    #[test]
    fn test_tagged_round_trips_payload_containing_markers() {
        let message = Message::command("echo", Some(b"$CMD$x$MSG$y".to_vec()));
        let body = Grammar::Tagged.encode(&message).unwrap();
        assert_eq!(Grammar::Tagged.decode(&body).unwrap(), message);
    }

    #[test]
    fn test_tagged_round_trips_controls() {
        let controls = [
            Control::Hello(JoinInfo {
                name: Some("alice".to_string()),
                group: None,
            }),
            Control::ClientInfo(vec![identity()]),
            Control::ChangeGroup(None),
            Control::Close,
        ];
        for control in controls {
            let message = Message::Control(control);
            let body = Grammar::Tagged.encode(&message).unwrap();
            assert_eq!(Grammar::Tagged.decode(&body).unwrap(), message);
        }
    }

    #[test]
    fn test_tagged_rejects_truncated_body() {
        let body = Grammar::Tagged
            .encode(&Message::command("greet", Some(b"hi".to_vec())))
            .unwrap();
        let result = Grammar::Tagged.decode(&body[..body.len() - 1]);
        assert!(matches!(result, Err(ProtocolError::Framing(_))));
    }

    #[test]
    fn test_tagged_rejects_trailing_bytes() {
        let mut body = Grammar::Tagged.encode(&Message::command("greet", None)).unwrap();
        body.push(0xFF);
        assert!(matches!(
            Grammar::Tagged.decode(&body),
            Err(ProtocolError::Framing(_))
        ));
    }
}
