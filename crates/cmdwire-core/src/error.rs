//! Crate-level error type and the reasons a connection can close.
//!
//! Each concern keeps its own narrow error enum ([`ProtocolError`],
//! [`TypeCastError`], [`RouterError`], [`RegistryError`], [`StateError`]).
//! [`Error`] folds them together so endpoint code can use `?` across layers
//! while callers can still match on the specific failure.

use std::fmt;

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::registry::RegistryError;
use crate::router::RouterError;
use crate::state::StateError;
use crate::typecast::TypeCastError;

/// Convenience alias used throughout the workspace.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Why a connection stopped being usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the byte stream (EOF or reset).
    ClosedByPeer,
    /// The server sent a disconnect notice before closing.
    ForcedByServer,
    /// The peer announced a graceful close.
    PeerClosed,
    /// This endpoint closed the connection itself.
    Local,
    /// The peer never acknowledged a keepalive probe.
    KeepaliveTimeout,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::ClosedByPeer => "closed by peer",
            CloseReason::ForcedByServer => "forcibly disconnected by server",
            CloseReason::PeerClosed => "peer closed gracefully",
            CloseReason::Local => "closed locally",
            CloseReason::KeepaliveTimeout => "keepalive timed out",
        };
        f.write_str(text)
    }
}

/// Every failure the framing and dispatch engine can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// Framing, header, size, escaping, or grammar failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A payload could not be converted to the type a handler declared.
    #[error(transparent)]
    TypeCast(#[from] TypeCastError),

    /// Handler registration was rejected.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// A client lookup failed or was ambiguous.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// An illegal connection state transition was attempted.
    #[error(transparent)]
    State(#[from] StateError),

    /// The connection is gone, either because the peer left or because this
    /// endpoint was closed while a caller was waiting on it.
    #[error("connection closed: {0}")]
    ConnectionClosed(CloseReason),

    /// The underlying byte stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// An inline handler returned an error.
    #[error("handler for `{command}` failed: {source}")]
    Handler {
        command: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl Error {
    /// Returns `true` when the error means the connection can no longer be
    /// used (as opposed to a failure confined to a single frame or call).
    pub fn is_connection_fatal(&self) -> bool {
        matches!(self, Error::ConnectionClosed(_) | Error::Transport(_))
            || matches!(
                self,
                Error::Protocol(ProtocolError::CorruptHeader { .. })
                    | Error::Protocol(ProtocolError::OversizeFrame { .. })
            )
    }
}
