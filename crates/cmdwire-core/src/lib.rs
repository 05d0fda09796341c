//! # cmdwire-core
//!
//! Framing and dispatch engine for the cmdwire message protocol, shared by
//! the server and client crates.  It never opens a socket: everything here
//! works on byte slices or on any `tokio::io::AsyncRead` / `AsyncWrite`.
//!
//! # Architecture overview (for beginners)
//!
//! cmdwire gives plain TCP streams message boundaries and command names.  A
//! program sends `greet` with payload `"hi"`; the other side runs whatever
//! handler was registered for `greet`, with the payload already converted to
//! the type that handler asked for.
//!
//! Inbound data flows through these modules, leaves first:
//!
//! - **`protocol`** – How bytes travel.  A fixed-width decimal length header
//!   precedes every frame body (`frame`), and the body is either
//!   `$CMD$greet$MSG$hi` text or a tagged binary layout (`grammar`).  A set of
//!   reserved control frames (keepalive, disconnect, join, ...) is recognised
//!   before any user command.
//! - **`typecast`** – Converts raw payload bytes into the [`PayloadType`] a
//!   handler declared: text, numbers, booleans, JSON lists and maps.
//! - **`router`** – Maps command names to handlers, including reserved
//!   lifecycle events and the `*` wildcard.
//! - **`registry`** – Server side: who is connected, by address, name, group.
//! - **`cache`** – Client side: a bounded FIFO of recently received frames.
//! - **`link`** – The reader and writer tasks that move frames between a
//!   socket and an endpoint's poll loop.
//! - **`state`** – The one-shot `Connecting → Connected → Disconnecting →
//!   Closed` lifecycle shared by both endpoints.

pub mod cache;
pub mod config;
pub mod error;
pub mod link;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod state;
pub mod typecast;

// Re-export the most-used types at the crate root so callers can write
// `cmdwire_core::Handler` instead of `cmdwire_core::router::Handler`.
pub use cache::{CacheEntry, MessageCache};
pub use config::{ConfigError, ProtocolConfig};
pub use error::{CloseReason, Error, Result};
pub use link::{LinkEvent, Outbound, OutboundTx};
pub use protocol::{Control, FrameCodec, FrameReader, FrameWriter, Grammar, JoinInfo, Message, ProtocolError, WireCodec};
pub use registry::{ClientIdentity, ClientRegistry, ClientSelector, ConnectionId, RegistryError};
pub use router::{
    Change, Delivery, Dispatched, Event, EventRouter, Handler, HandlerResult, RouterError, Shape, WILDCARD,
};
pub use state::{ConnectionState, StateError};
pub use typecast::{cast, PayloadType, TypeCastError, Value};
