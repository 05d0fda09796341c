//! Connection state machine shared by both endpoints.
//!
//! ```text
//! Connecting  ──►  Connected  ──►  Disconnecting  ──►  Closed
//!      │                                                 ▲
//!      └──────────────────── (handshake failed) ─────────┘
//! ```
//!
//! `Closed` is terminal.  A connection never re-enters `Connected`; a new
//! connection means a new state machine.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Transport open, join handshake not finished.
    #[default]
    Connecting,
    /// Handshake done; frames flow.
    Connected,
    /// Close requested or transport failed; cleanup in progress.
    Disconnecting,
    /// Transport closed and per-connection state released.
    Closed,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("illegal connection state transition {from} -> {to}")]
pub struct StateError {
    pub from: ConnectionState,
    pub to: ConnectionState,
}

impl ConnectionState {
    /// Returns `true` if moving from `self` to `to` is allowed.
    pub fn can_transition(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Connecting, Connected)
                | (Connecting, Disconnecting)
                | (Connecting, Closed)
                | (Connected, Disconnecting)
                | (Disconnecting, Closed)
        )
    }

    /// Moves to `to`, refusing illegal edges.
    pub fn transition(&mut self, to: ConnectionState) -> Result<(), StateError> {
        if !self.can_transition(to) {
            return Err(StateError { from: *self, to });
        }
        *self = to;
        Ok(())
    }

    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn is_closed(self) -> bool {
        self == ConnectionState::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnecting => "disconnecting",
            ConnectionState::Closed => "closed",
        };
        f.write_str(text)
    }
}
