//! Command routing: maps command names to handlers.
//!
//! # Lookup order
//!
//! 1. Exact command registration.
//! 2. The wildcard registration (`"*"`), only when step 1 found nothing.
//! 3. Neither: the frame is dropped with an "unhandled command" warning.
//!    This is not an error.
//!
//! # Handler shapes (for beginners)
//!
//! A handler states up front which arguments it wants.  Nothing is inferred
//! from the closure signature.
//!
//! | [`Shape`]         | receives                           |
//! |-------------------|------------------------------------|
//! | `Bare`            | nothing, even if a payload arrived |
//! | `Identity`        | the sender (server side only)      |
//! | `Payload`         | the payload cast to its type       |
//! | `IdentityPayload` | both                               |
//!
//! A payload-taking handler without a declared [`PayloadType`] receives raw
//! [`Value::Bytes`], or [`Value::Null`] when the frame carried no payload, so
//! an absent payload stays distinguishable from an empty one.
//!
//! # Reserved events
//!
//! Each endpoint passes its own immutable table of reserved names (`join`,
//! `leave`, ...).  Those names cannot be registered as ordinary commands.
//! [`EventRouter::on_event`] adds a hook that runs *alongside* the endpoint's
//! built-in reaction; registering the name with
//! [`Handler::override_reserved`] *replaces* that reaction, see
//! [`EventRouter::fire_reserved`].
//!
//! # Threading
//!
//! Inline handlers get `&mut C` (the endpoint core) and run to completion
//! inside the poll tick.  Threaded handlers get a clone of `H` (the endpoint's
//! cloneable handle) and run on `tokio::task::spawn_blocking`; dispatch does
//! not wait for them.  They reach endpoint state only by sending requests
//! through that handle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::protocol::grammar::validate_command;
use crate::registry::ClientIdentity;
use crate::typecast::{cast, PayloadType, Value};

/// Command token that matches every command without an exact registration.
pub const WILDCARD: &str = "*";

/// What user handler bodies return.
pub type HandlerResult = anyhow::Result<()>;

/// Which arguments a handler receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Bare,
    Identity,
    Payload,
    IdentityPayload,
}

impl Shape {
    fn wants_identity(self) -> bool {
        matches!(self, Shape::Identity | Shape::IdentityPayload)
    }

    fn wants_payload(self) -> bool {
        matches!(self, Shape::Payload | Shape::IdentityPayload)
    }
}

/// Old and new value of a name or group change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub old: Option<String>,
    pub new: Option<String>,
}

/// Arguments delivered to a handler, filled according to its [`Shape`].
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Command (or reserved event name).  `None` for raw frames.
    pub command: Option<String>,
    pub identity: Option<ClientIdentity>,
    pub payload: Option<Value>,
    pub change: Option<Change>,
}

/// An inbound frame or lifecycle occurrence about to be routed.
#[derive(Debug, Clone, Default)]
pub struct Delivery<'a> {
    pub command: Option<&'a str>,
    pub identity: Option<&'a ClientIdentity>,
    pub payload: Option<&'a [u8]>,
    pub change: Option<Change>,
}

impl<'a> Delivery<'a> {
    pub fn command(command: &'a str, payload: Option<&'a [u8]>) -> Self {
        Self {
            command: Some(command),
            payload,
            ..Self::default()
        }
    }

    pub fn raw(payload: &'a [u8]) -> Self {
        Self {
            payload: Some(payload),
            ..Self::default()
        }
    }

    pub fn sent_by(mut self, identity: &'a ClientIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_change(mut self, old: Option<String>, new: Option<String>) -> Self {
        self.change = Some(Change { old, new });
        self
    }
}

/// How [`EventRouter::dispatch`] resolved a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Exact,
    Wildcard,
    Unhandled,
}

impl Dispatched {
    pub fn was_handled(self) -> bool {
        self != Dispatched::Unhandled
    }
}

/// Registration failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The name is reserved and the handler did not opt into overriding it.
    #[error("`{0}` is a reserved event; register it with override_reserved() or use on_event()")]
    DuplicateReservedCommand(String),

    /// `on_event` was called with a name this endpoint does not reserve.
    #[error("`{0}` is not a reserved event of this endpoint")]
    UnknownEvent(String),

    /// The command could never arrive through the grammar.
    #[error("invalid command `{command}`: {detail}")]
    InvalidCommand { command: String, detail: String },

    /// An identity-taking handler was registered where no identity exists.
    #[error("handler for `{0}` wants a client identity, which this endpoint never provides")]
    IdentityUnavailable(String),
}

type InlineFn<C> = Box<dyn FnMut(&mut C, Event) -> HandlerResult + Send>;
type ThreadedFn<H> = Arc<dyn Fn(H, Event) -> HandlerResult + Send + Sync>;

enum Callback<C, H> {
    Inline(InlineFn<C>),
    Threaded(ThreadedFn<H>),
}

/// A handler plus its registration metadata.
pub struct Handler<C, H> {
    shape: Shape,
    payload_type: Option<PayloadType>,
    callback: Callback<C, H>,
    override_reserved: bool,
}

impl<C, H> Handler<C, H> {
    /// Handler that takes no arguments.
    pub fn bare<F>(mut f: F) -> Self
    where
        F: FnMut(&mut C) -> HandlerResult + Send + 'static,
    {
        Self::inline(Shape::Bare, None, move |core, _| f(core))
    }

    /// Handler that takes the sender's identity.
    pub fn with_identity<F>(mut f: F) -> Self
    where
        F: FnMut(&mut C, ClientIdentity) -> HandlerResult + Send + 'static,
    {
        Self::inline(Shape::Identity, None, move |core, event| {
            f(core, require_identity(event.identity)?)
        })
    }

    /// Handler that takes the payload cast to `payload_type`.
    pub fn with_payload<F>(payload_type: PayloadType, mut f: F) -> Self
    where
        F: FnMut(&mut C, Value) -> HandlerResult + Send + 'static,
    {
        Self::inline(Shape::Payload, Some(payload_type), move |core, event| {
            f(core, event.payload.unwrap_or(Value::Null))
        })
    }

    /// Handler that takes the sender's identity and the cast payload.
    pub fn with_identity_payload<F>(payload_type: PayloadType, mut f: F) -> Self
    where
        F: FnMut(&mut C, ClientIdentity, Value) -> HandlerResult + Send + 'static,
    {
        Self::inline(Shape::IdentityPayload, Some(payload_type), move |core, event| {
            let identity = require_identity(event.identity)?;
            f(core, identity, event.payload.unwrap_or(Value::Null))
        })
    }

    /// Handler that receives the whole [`Event`], command and change included.
    pub fn inline<F>(shape: Shape, payload_type: Option<PayloadType>, f: F) -> Self
    where
        F: FnMut(&mut C, Event) -> HandlerResult + Send + 'static,
    {
        Self {
            shape,
            payload_type,
            callback: Callback::Inline(Box::new(f)),
            override_reserved: false,
        }
    }

    /// Handler that runs on the blocking thread pool with a clone of the
    /// endpoint handle.
    pub fn threaded<F>(shape: Shape, payload_type: Option<PayloadType>, f: F) -> Self
    where
        F: Fn(H, Event) -> HandlerResult + Send + Sync + 'static,
    {
        Self {
            shape,
            payload_type,
            callback: Callback::Threaded(Arc::new(f)),
            override_reserved: false,
        }
    }

    /// Allows registering this handler under a reserved event name, replacing
    /// the endpoint's built-in reaction.
    pub fn override_reserved(mut self) -> Self {
        self.override_reserved = true;
        self
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn is_threaded(&self) -> bool {
        matches!(self.callback, Callback::Threaded(_))
    }
}

impl<C, H> fmt::Debug for Handler<C, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("shape", &self.shape)
            .field("payload_type", &self.payload_type)
            .field("threaded", &self.is_threaded())
            .field("override_reserved", &self.override_reserved)
            .finish()
    }
}

fn require_identity(identity: Option<ClientIdentity>) -> anyhow::Result<ClientIdentity> {
    identity.ok_or_else(|| anyhow::anyhow!("event carries no client identity"))
}

/// Per-endpoint routing table.
///
/// `C` is the endpoint core inline handlers mutate, `H` the cloneable handle
/// threaded handlers receive.
pub struct EventRouter<C, H> {
    reserved: &'static [&'static str],
    identities: bool,
    handlers: HashMap<String, Handler<C, H>>,
    hooks: HashMap<&'static str, Handler<C, H>>,
    overrides: HashMap<&'static str, Handler<C, H>>,
}

impl<C, H> fmt::Debug for EventRouter<C, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("reserved", &self.reserved)
            .field("commands", &self.handlers.keys().collect::<Vec<_>>())
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("overrides", &self.overrides.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C, H: Clone + Send + 'static> EventRouter<C, H> {
    /// Creates a router.
    ///
    /// `reserved` is the endpoint's reserved event table.  `identities` says
    /// whether user commands on this endpoint carry a sender identity
    /// (server: yes, client: no).
    pub fn new(reserved: &'static [&'static str], identities: bool) -> Self {
        Self {
            reserved,
            identities,
            handlers: HashMap::new(),
            hooks: HashMap::new(),
            overrides: HashMap::new(),
        }
    }

    pub fn reserved(&self) -> &'static [&'static str] {
        self.reserved
    }

    fn reserved_name(&self, name: &str) -> Option<&'static str> {
        self.reserved.iter().copied().find(|r| *r == name)
    }

    /// Registers `handler` for `command`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// - [`RouterError::DuplicateReservedCommand`] for a reserved name without
    ///   [`Handler::override_reserved`].
    /// - [`RouterError::InvalidCommand`] for names the grammar cannot carry.
    /// - [`RouterError::IdentityUnavailable`] for identity shapes on an
    ///   endpoint whose commands carry no identity.  Reserved events are
    ///   exempt: a client still learns *which peer* joined or left.
    pub fn register(&mut self, command: &str, handler: Handler<C, H>) -> Result<(), RouterError> {
        if let Some(name) = self.reserved_name(command) {
            if !handler.override_reserved {
                return Err(RouterError::DuplicateReservedCommand(command.to_string()));
            }
            debug!(event = name, "reserved event overridden");
            self.overrides.insert(name, handler);
            return Ok(());
        }

        if handler.shape.wants_identity() && !self.identities {
            return Err(RouterError::IdentityUnavailable(command.to_string()));
        }
        if command != WILDCARD {
            validate_command(command).map_err(|e| RouterError::InvalidCommand {
                command: command.to_string(),
                detail: e.to_string(),
            })?;
        }
        self.handlers.insert(command.to_string(), handler);
        Ok(())
    }

    /// Adds a hook for a reserved event that runs next to the endpoint's
    /// built-in reaction.
    pub fn on_event(&mut self, event: &str, handler: Handler<C, H>) -> Result<(), RouterError> {
        let name = self
            .reserved_name(event)
            .ok_or_else(|| RouterError::UnknownEvent(event.to_string()))?;
        self.hooks.insert(name, handler);
        Ok(())
    }

    /// Removes the handler registered for `command`.
    pub fn unregister(&mut self, command: &str) -> bool {
        self.handlers.remove(command).is_some()
    }

    /// Returns `true` if `command` resolves to a handler (exact or wildcard).
    pub fn resolves(&self, command: &str) -> bool {
        self.handlers.contains_key(command) || self.handlers.contains_key(WILDCARD)
    }

    /// Routes one user frame.
    ///
    /// # Errors
    ///
    /// [`Error::TypeCast`] if the payload does not fit the handler's declared
    /// type, [`Error::Handler`] if an inline handler fails.  Threaded handler
    /// failures are logged, not returned.
    pub fn dispatch(&mut self, core: &mut C, handle: &H, delivery: Delivery<'_>) -> Result<Dispatched, Error> {
        let (key, resolved) = match delivery.command {
            Some(command) if self.handlers.contains_key(command) => (command, Dispatched::Exact),
            _ if self.handlers.contains_key(WILDCARD) => (WILDCARD, Dispatched::Wildcard),
            Some(command) => {
                warn!(command, "unhandled command");
                return Ok(Dispatched::Unhandled);
            }
            None => {
                warn!(len = delivery.payload.map_or(0, <[u8]>::len), "unhandled raw payload");
                return Ok(Dispatched::Unhandled);
            }
        };
        if let Some(handler) = self.handlers.get_mut(key) {
            invoke(handler, core, handle, delivery)?;
        }
        Ok(resolved)
    }

    /// Fires a reserved event.
    ///
    /// Runs the override handler if one was registered, otherwise the
    /// `on_event` hook (if any).  Returns `true` when an override ran, which
    /// tells the endpoint to skip its built-in reaction.
    ///
    /// The handler sees the delivery's command when it has one (the `message`
    /// event carries the user command it precedes), the event name otherwise.
    pub fn fire_reserved(
        &mut self,
        core: &mut C,
        handle: &H,
        event: &'static str,
        delivery: Delivery<'_>,
    ) -> Result<bool, Error> {
        let delivery = Delivery {
            command: delivery.command.or(Some(event)),
            ..delivery
        };
        if let Some(handler) = self.overrides.get_mut(event) {
            invoke(handler, core, handle, delivery)?;
            return Ok(true);
        }
        if let Some(handler) = self.hooks.get_mut(event) {
            invoke(handler, core, handle, delivery)?;
        }
        Ok(false)
    }
}

fn invoke<C, H: Clone + Send + 'static>(
    handler: &mut Handler<C, H>,
    core: &mut C,
    handle: &H,
    delivery: Delivery<'_>,
) -> Result<(), Error> {
    let payload = match (handler.shape.wants_payload(), &handler.payload_type) {
        (false, _) => None,
        (true, None) if delivery.payload.is_none() => Some(Value::Null),
        (true, target) => Some(cast(delivery.payload, target.as_ref().unwrap_or(&PayloadType::Bytes))?),
    };
    let identity = if handler.shape.wants_identity() {
        delivery.identity.cloned()
    } else {
        None
    };
    let command = delivery.command.map(str::to_string);
    let event = Event {
        command: command.clone(),
        identity,
        payload,
        change: delivery.change,
    };

    match &mut handler.callback {
        Callback::Inline(f) => f(core, event).map_err(|source| Error::Handler {
            command: command.unwrap_or_default(),
            source: source.into(),
        }),
        Callback::Threaded(f) => {
            let f = Arc::clone(f);
            let handle = handle.clone();
            tokio::task::spawn_blocking(move || {
                if let Err(e) = f(handle, event) {
                    error!(command = command.as_deref().unwrap_or(""), error = %e, "threaded handler failed");
                }
            });
            Ok(())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    const RESERVED: &[&str] = &["join", "leave"];

    #[derive(Default)]
    struct Core {
        calls: Vec<String>,
        payloads: Vec<Value>,
    }

    type Router = EventRouter<Core, ()>;

    fn alice() -> ClientIdentity {
        ClientIdentity::new(SocketAddr::from(([127, 0, 0, 1], 5000)), Some("alice".into()), None)
    }

    #[test]
    fn test_exact_handler_wins_over_wildcard() {
        // Arrange
        let mut router = Router::new(RESERVED, true);
        router
            .register("greet", Handler::bare(|core: &mut Core| {
                core.calls.push("exact".into());
                Ok(())
            }))
            .unwrap();
        router
            .register(WILDCARD, Handler::bare(|core: &mut Core| {
                core.calls.push("wildcard".into());
                Ok(())
            }))
            .unwrap();
        let mut core = Core::default();

        // Act
        let exact = router.dispatch(&mut core, &(), Delivery::command("greet", None)).unwrap();
        let miss = router.dispatch(&mut core, &(), Delivery::command("other", None)).unwrap();

        // Assert
        assert_eq!(exact, Dispatched::Exact);
        assert_eq!(miss, Dispatched::Wildcard);
        assert_eq!(core.calls, vec!["exact", "wildcard"]);
    }

    #[test]
    fn test_unhandled_command_is_not_an_error() {
        let mut router = Router::new(RESERVED, true);
        let mut core = Core::default();
        let result = router.dispatch(&mut core, &(), Delivery::command("nobody", Some(b"x".as_slice())));
        assert_eq!(result.unwrap(), Dispatched::Unhandled);
    }

    #[test]
    fn test_bare_handler_ignores_payload() {
        // A payload that would fail any typed cast must not matter here.
        let mut router = Router::new(RESERVED, true);
        router
            .register("ping", Handler::bare(|core: &mut Core| {
                core.calls.push("ping".into());
                Ok(())
            }))
            .unwrap();
        let mut core = Core::default();

        router
            .dispatch(&mut core, &(), Delivery::command("ping", Some([0xFFu8, 0x00].as_slice())))
            .unwrap();

        assert_eq!(core.calls, vec!["ping"]);
        assert!(core.payloads.is_empty());
    }

    #[test]
    fn test_identity_payload_handler_receives_both() {
        // Arrange
        let mut router = Router::new(RESERVED, true);
        router
            .register(
                "score",
                Handler::with_identity_payload(PayloadType::Int, |core: &mut Core, who, value| {
                    core.calls.push(who.name.unwrap_or_default());
                    core.payloads.push(value);
                    Ok(())
                }),
            )
            .unwrap();
        let mut core = Core::default();
        let sender = alice();

        // Act
        router
            .dispatch(&mut core, &(), Delivery::command("score", Some(b"12".as_slice())).sent_by(&sender))
            .unwrap();

        // Assert
        assert_eq!(core.calls, vec!["alice"]);
        assert_eq!(core.payloads, vec![Value::Int(12)]);
    }

    #[test]
    fn test_untyped_payload_handler_keeps_absent_apart_from_empty() {
        // Arrange
        let mut router = Router::new(RESERVED, false);
        router
            .register(
                "blob",
                Handler::inline(Shape::Payload, None, |core: &mut Core, event| {
                    core.payloads.push(event.payload.unwrap_or(Value::Null));
                    Ok(())
                }),
            )
            .unwrap();
        let mut core = Core::default();

        // Act
        router.dispatch(&mut core, &(), Delivery::command("blob", None)).unwrap();
        router.dispatch(&mut core, &(), Delivery::command("blob", Some(b"".as_slice()))).unwrap();
        router.dispatch(&mut core, &(), Delivery::command("blob", Some(b"\x01".as_slice()))).unwrap();

        // Assert
        assert_eq!(
            core.payloads,
            vec![Value::Null, Value::Bytes(Vec::new()), Value::Bytes(vec![1])]
        );
    }

    #[test]
    fn test_type_cast_error_propagates_out_of_dispatch() {
        let mut router = Router::new(RESERVED, false);
        router
            .register("n", Handler::with_payload(PayloadType::Int, |_: &mut Core, _| Ok(())))
            .unwrap();
        let mut core = Core::default();

        let result = router.dispatch(&mut core, &(), Delivery::command("n", Some(b"abc".as_slice())));

        assert!(matches!(result, Err(Error::TypeCast(_))));
    }

    #[test]
    fn test_inline_handler_failure_is_reported_with_command() {
        let mut router = Router::new(RESERVED, false);
        router
            .register("boom", Handler::bare(|_: &mut Core| anyhow::bail!("kaboom")))
            .unwrap();
        let mut core = Core::default();

        let err = router
            .dispatch(&mut core, &(), Delivery::command("boom", None))
            .unwrap_err();

        assert!(matches!(err, Error::Handler { ref command, .. } if command == "boom"));
    }

    #[test]
    fn test_reserved_name_requires_override() {
        let mut router = Router::new(RESERVED, true);
        let result = router.register("join", Handler::bare(|_: &mut Core| Ok(())));
        assert_eq!(result, Err(RouterError::DuplicateReservedCommand("join".into())));
    }

    #[test]
    fn test_override_replaces_hook_and_suppresses_builtin() {
        // Arrange – a hook and an override for the same event
        let mut router = Router::new(RESERVED, true);
        router
            .on_event("join", Handler::bare(|core: &mut Core| {
                core.calls.push("hook".into());
                Ok(())
            }))
            .unwrap();
        router
            .register(
                "join",
                Handler::with_identity(|core: &mut Core, who| {
                    core.calls.push(format!("override:{}", who.name.unwrap_or_default()));
                    Ok(())
                })
                .override_reserved(),
            )
            .unwrap();
        let mut core = Core::default();
        let who = alice();

        // Act
        let overridden = router
            .fire_reserved(&mut core, &(), "join", Delivery::default().sent_by(&who))
            .unwrap();

        // Assert
        assert!(overridden);
        assert_eq!(core.calls, vec!["override:alice"]);
    }

    #[test]
    fn test_hook_runs_without_suppressing_builtin() {
        let mut router = Router::new(RESERVED, true);
        router
            .on_event("leave", Handler::bare(|core: &mut Core| {
                core.calls.push("left".into());
                Ok(())
            }))
            .unwrap();
        let mut core = Core::default();

        let overridden = router
            .fire_reserved(&mut core, &(), "leave", Delivery::default())
            .unwrap();

        assert!(!overridden);
        assert_eq!(core.calls, vec!["left"]);
    }

    #[test]
    fn test_on_event_rejects_unknown_name() {
        let mut router = Router::new(RESERVED, true);
        let result = router.on_event("greet", Handler::bare(|_: &mut Core| Ok(())));
        assert_eq!(result, Err(RouterError::UnknownEvent("greet".into())));
    }

    #[test]
    fn test_register_rejects_marker_command() {
        let mut router = Router::new(RESERVED, true);
        let result = router.register("$weird$", Handler::bare(|_: &mut Core| Ok(())));
        assert!(matches!(result, Err(RouterError::InvalidCommand { .. })));
    }

    #[test]
    fn test_identity_shape_rejected_without_identities() {
        let mut router = Router::new(RESERVED, false);
        let result = router.register("x", Handler::with_identity(|_: &mut Core, _| Ok(())));
        assert_eq!(result, Err(RouterError::IdentityUnavailable("x".into())));
    }

    #[tokio::test]
    async fn test_threaded_handler_runs_off_the_dispatch_path() {
        // Arrange – the handle is a channel back to the test
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let mut router: EventRouter<Core, tokio::sync::mpsc::UnboundedSender<String>> =
            EventRouter::new(RESERVED, false);
        router
            .register(
                "work",
                Handler::threaded(Shape::Payload, Some(PayloadType::Text), |tx: tokio::sync::mpsc::UnboundedSender<String>, event: Event| {
                    let text = event.payload.and_then(|v| v.as_text().map(str::to_string));
                    tx.send(text.unwrap_or_default())?;
                    Ok(())
                }),
            )
            .unwrap();
        let mut core = Core::default();

        // Act
        let resolved = router
            .dispatch(&mut core, &tx, Delivery::command("work", Some(b"job-1".as_slice())))
            .unwrap();

        // Assert
        assert_eq!(resolved, Dispatched::Exact);
        assert_eq!(rx.recv().await.unwrap(), "job-1");
    }
}
