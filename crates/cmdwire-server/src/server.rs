//! `Server`: accept loop, poll loop, and reserved-event wiring.
//!
//! # Task layout
//!
//! ```text
//!  accept task ──Accepted──┐
//!  reader task ──Link──────┼──► input queue ──► poll loop (update / run / recv)
//!  ServerHandle ─Request───┘                        │  owns ServerCore + router
//!                                                   ▼
//!                                    writer tasks (one per connection)
//! ```
//!
//! Only the poll loop touches the registry and the routing table, so inline
//! handlers run without locks.  One queue feeds it, which keeps frames from a
//! single connection in arrival order.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cmdwire_core::link::LinkEvent;
use cmdwire_core::{
    cast, ClientIdentity, CloseReason, ConfigError, Control, Delivery, Error, EventRouter, Handler, Message,
    PayloadType, Result, Value,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::connections::{Departure, ServerCore};
use crate::handle::{Input, Request, ServerHandle};

/// Reserved event names on the server side.
pub const SERVER_EVENTS: &[&str] = &["join", "leave", "message", "name_change", "group_change"];

/// Back-off after a failed `accept` (for example, out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handlers registered on a [`Server`].
pub type ServerHandler = Handler<ServerCore, ServerHandle>;

/// Server lifecycle events.
///
/// | event         | fired when                              | built-in reaction                |
/// |---------------|-----------------------------------------|----------------------------------|
/// | `Join`        | a client completed the hello            | peer-joined notice to the others |
/// | `Leave`       | a joined client is gone for any reason  | peer-left notice to the rest     |
/// | `Message`     | before every user command or raw frame  | route the frame                  |
/// | `NameChange`  | a client renamed itself                 | debug log                        |
/// | `GroupChange` | a client switched group                 | debug log                        |
///
/// [`Server::on_event`] runs a hook next to the built-in reaction.
/// Registering the event name with [`Handler::override_reserved`] replaces it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    Join,
    Leave,
    Message,
    NameChange,
    GroupChange,
}

impl ServerEvent {
    pub fn name(self) -> &'static str {
        match self {
            ServerEvent::Join => "join",
            ServerEvent::Leave => "leave",
            ServerEvent::Message => "message",
            ServerEvent::NameChange => "name_change",
            ServerEvent::GroupChange => "group_change",
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can stop a server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] Error),
}

/// What a `recv` call is waiting for.
struct Want<'a> {
    command: Option<&'a str>,
    payload_type: &'a PayloadType,
}

/// A frame claimed by `recv` instead of being routed.
type Captured = Option<(ClientIdentity, Value)>;

enum Tick {
    Input(Input),
    Sweep,
    Drained,
}

/// A cmdwire server endpoint.
pub struct Server {
    core: ServerCore,
    router: EventRouter<ServerCore, ServerHandle>,
    handle: ServerHandle,
    input_rx: mpsc::UnboundedReceiver<Input>,
    local_addr: SocketAddr,
    acceptor: JoinHandle<()>,
    keepalive: Option<Duration>,
    next_sweep: Option<Instant>,
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.core.registry().len())
            .field("router", &self.router)
            .field("closed", &self.core.is_closed())
            .finish()
    }
}

impl Server {
    /// Binds the listener and starts accepting connections.
    ///
    /// Accepted sockets wait in the input queue until the next `update`,
    /// `run` or `recv`.
    ///
    /// # Errors
    ///
    /// [`ServerError::Config`] for an invalid protocol section,
    /// [`ServerError::BindFailed`] if the address cannot be bound.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.protocol.validate()?;
        let addr = config.bind_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::BindFailed { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::BindFailed { addr, source })?;

        let codec = config.protocol.codec();
        let (tx, input_rx) = mpsc::unbounded_channel();
        let limit = (config.max_connections > 0).then(|| Arc::new(Semaphore::new(config.max_connections)));
        let acceptor = tokio::spawn(accept_loop(listener, tx.clone(), limit));
        let keepalive = config.keepalive_interval();

        info!(
            %local_addr,
            grammar = ?codec.grammar(),
            header_len = codec.frame().header_len(),
            max_connections = config.max_connections,
            "server listening"
        );

        Ok(Self {
            core: ServerCore::new(codec, config.allow_markers, tx.clone()),
            router: EventRouter::new(SERVER_EVENTS, true),
            handle: ServerHandle::new(tx, codec, config.allow_markers),
            input_rx,
            local_addr,
            acceptor,
            keepalive,
            next_sweep: keepalive.map(|interval| Instant::now() + interval),
        })
    }

    /// The bound address, with the OS-assigned port when the config asked
    /// for port `0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn core(&self) -> &ServerCore {
        &self.core
    }

    /// Direct access to the core, for sends and lookups outside handlers.
    pub fn core_mut(&mut self) -> &mut ServerCore {
        &mut self.core
    }

    pub fn clients(&self) -> Vec<ClientIdentity> {
        self.core.clients()
    }

    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Registers a handler for a user command or for [`cmdwire_core::WILDCARD`].
    ///
    /// # Errors
    ///
    /// [`Error::Router`] for reserved names without
    /// [`Handler::override_reserved`] and for commands the grammar cannot
    /// carry.
    pub fn register(&mut self, command: &str, handler: ServerHandler) -> Result<()> {
        self.router.register(command, handler)?;
        Ok(())
    }

    /// Adds a hook that runs next to the built-in reaction to `event`.
    pub fn on_event(&mut self, event: ServerEvent, handler: ServerHandler) -> Result<()> {
        self.router.on_event(event.name(), handler)?;
        Ok(())
    }

    pub fn unregister(&mut self, command: &str) -> bool {
        self.router.unregister(command)
    }

    // ── Poll loop ─────────────────────────────────────────────────────────────

    /// Processes everything that is ready right now without waiting.
    ///
    /// Returns the number of inputs handled.  Must be called from inside a
    /// Tokio runtime because accepted connections spawn their I/O tasks here.
    ///
    /// # Errors
    ///
    /// The first handler failure or [`Error::TypeCast`].  The failing frame
    /// is consumed; calling `update` again continues with the next one.
    pub fn update(&mut self) -> Result<usize> {
        let mut processed = 0;
        if self.sweep_due() {
            self.sweep()?;
            processed += 1;
        }
        while !self.core.is_closed() {
            let Ok(input) = self.input_rx.try_recv() else {
                break;
            };
            processed += 1;
            self.step(input, None)?;
        }
        Ok(processed)
    }

    /// Processes inputs as they arrive until the server is closed.
    ///
    /// # Errors
    ///
    /// Same as [`Server::update`].  Calling `run` again resumes serving.
    pub async fn run(&mut self) -> Result<()> {
        while !self.core.is_closed() {
            match self.next_tick().await {
                Tick::Input(input) => {
                    self.step(input, None)?;
                }
                Tick::Sweep => self.sweep()?,
                Tick::Drained => break,
            }
        }
        debug!("server loop finished");
        Ok(())
    }

    /// Waits for the next user command matching `command` (any command when
    /// `None`) and returns its sender and payload cast to `payload_type`.
    ///
    /// Frames that do not match are routed as usual while waiting, so no
    /// frame is handled twice.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the server is closed before a match
    /// arrives, [`Error::TypeCast`] if the matching payload does not fit.
    pub async fn recv(&mut self, command: Option<&str>, payload_type: &PayloadType) -> Result<(ClientIdentity, Value)> {
        let want = Want { command, payload_type };
        loop {
            if self.core.is_closed() {
                return Err(Error::ConnectionClosed(CloseReason::Local));
            }
            match self.next_tick().await {
                Tick::Input(input) => {
                    if let Some(hit) = self.step(input, Some(&want))? {
                        return Ok(hit);
                    }
                }
                Tick::Sweep => self.sweep()?,
                Tick::Drained => return Err(Error::ConnectionClosed(CloseReason::Local)),
            }
        }
    }

    /// Force-disconnects every client and stops the server.
    pub fn close(&mut self) -> Result<()> {
        self.core.close();
        self.acceptor.abort();
        self.flush_departures()
    }

    /// Moves the server onto a background task.
    ///
    /// Use the returned handle to send and to close; the task resolves when
    /// the server is closed or a handler fails.
    pub fn spawn(self) -> (ServerHandle, JoinHandle<Result<()>>) {
        let handle = self.handle();
        let task = tokio::spawn(async move {
            let mut server = self;
            server.run().await
        });
        (handle, task)
    }

    async fn next_tick(&mut self) -> Tick {
        let sweep_at = self.next_sweep;
        tokio::select! {
            input = self.input_rx.recv() => match input {
                Some(input) => Tick::Input(input),
                None => Tick::Drained,
            },
            _ = tokio::time::sleep_until(sweep_at.unwrap_or_else(Instant::now)), if sweep_at.is_some() => Tick::Sweep,
        }
    }

    fn sweep_due(&self) -> bool {
        self.next_sweep.is_some_and(|at| Instant::now() >= at)
    }

    fn sweep(&mut self) -> Result<()> {
        self.next_sweep = self.keepalive.map(|interval| Instant::now() + interval);
        let swept = self.core.keepalive_sweep();
        let flushed = self.flush_departures();
        swept?;
        flushed
    }

    /// Handles one input, then turns any departures it caused into `leave`
    /// events.
    fn step(&mut self, input: Input, want: Option<&Want<'_>>) -> Result<Captured> {
        let result = self.process(input, want);
        let flushed = self.flush_departures();
        if self.core.is_closed() {
            self.acceptor.abort();
        }
        let captured = result?;
        flushed?;
        Ok(captured)
    }

    fn process(&mut self, input: Input, want: Option<&Want<'_>>) -> Result<Captured> {
        match input {
            Input::Accepted { stream, addr, permit } => {
                self.core.attach(stream, addr, permit);
                Ok(None)
            }
            Input::Request(request) => {
                self.apply(request);
                Ok(None)
            }
            Input::Link { addr, id, event } => {
                if !self.core.is_current(&addr, id) {
                    trace!(%addr, "event from a closed connection ignored");
                    return Ok(None);
                }
                match event {
                    LinkEvent::Closed(e) => {
                        self.core.drop_link(&addr, false, ServerCore::close_reason(&e));
                        Ok(None)
                    }
                    LinkEvent::Message(message) if self.core.is_joined(&addr) => {
                        self.on_message(addr, message, want)
                    }
                    LinkEvent::Message(message) => {
                        self.on_hello(addr, message)?;
                        Ok(None)
                    }
                }
            }
        }
    }

    fn apply(&mut self, request: Request) {
        match request {
            Request::Send { target, wire } => {
                self.core.deliver(&target, wire);
            }
            Request::Disconnect { target, force } => {
                self.core.disconnect_target(&target, force);
            }
            Request::Lookup { selector, reply } => {
                let found = match selector {
                    Some(selector) => self.core.lookup(selector),
                    None => self.core.clients(),
                };
                let _ = reply.send(found);
            }
            Request::Close => self.core.close(),
        }
    }

    // ── Protocol handling ─────────────────────────────────────────────────────

    /// The first frame of every connection must be the hello.
    fn on_hello(&mut self, addr: SocketAddr, message: Message) -> Result<()> {
        let Message::Control(Control::Hello(info)) = message else {
            warn!(%addr, "first frame was not a hello; dropping connection");
            self.core.drop_link(&addr, false, CloseReason::Local);
            return Ok(());
        };
        let identity = ClientIdentity::new(addr, info.name, info.group);
        self.core.join(identity.clone())?;

        let fired = self.router.fire_reserved(
            &mut self.core,
            &self.handle,
            ServerEvent::Join.name(),
            Delivery::default().sent_by(&identity),
        );
        if !matches!(fired, Ok(true)) && self.core.is_joined(&addr) {
            self.core.broadcast_control(Control::PeerJoined(identity), Some(&addr))?;
        }
        fired.map(|_| ())
    }

    fn on_message(&mut self, addr: SocketAddr, message: Message, want: Option<&Want<'_>>) -> Result<Captured> {
        let Some(identity) = self.core.identity(&addr) else {
            return Ok(None);
        };
        match message {
            Message::Control(control) => {
                self.on_control(identity, control)?;
                Ok(None)
            }
            Message::Command { command, payload } => {
                let payload = payload.as_deref();
                let overridden = self.router.fire_reserved(
                    &mut self.core,
                    &self.handle,
                    ServerEvent::Message.name(),
                    Delivery::command(&command, payload).sent_by(&identity),
                )?;
                if overridden {
                    return Ok(None);
                }
                if let Some(want) = want.filter(|w| w.command.map_or(true, |c| c == command)) {
                    let value = cast(payload, want.payload_type)?;
                    return Ok(Some((identity, value)));
                }
                self.router.dispatch(
                    &mut self.core,
                    &self.handle,
                    Delivery::command(&command, payload).sent_by(&identity),
                )?;
                Ok(None)
            }
            Message::Raw(payload) => {
                let overridden = self.router.fire_reserved(
                    &mut self.core,
                    &self.handle,
                    ServerEvent::Message.name(),
                    Delivery::raw(&payload).sent_by(&identity),
                )?;
                if !overridden {
                    self.router
                        .dispatch(&mut self.core, &self.handle, Delivery::raw(&payload).sent_by(&identity))?;
                }
                Ok(None)
            }
        }
    }

    fn on_control(&mut self, identity: ClientIdentity, control: Control) -> Result<()> {
        let addr = identity.addr;
        match control {
            Control::KeepAlive => self.core.send_control(&addr, Control::KeepAliveAck)?,
            Control::KeepAliveAck => self.core.acknowledge(&addr),
            Control::Close | Control::Disconnect => self.core.drop_link(&addr, false, CloseReason::PeerClosed),
            Control::ChangeName(name) => {
                let old = self.core.change_name(&addr, name.clone()).unwrap_or_default();
                self.fire_change(ServerEvent::NameChange, &addr, old, name)?;
            }
            Control::ChangeGroup(group) => {
                let old = self.core.change_group(&addr, group.clone()).unwrap_or_default();
                self.fire_change(ServerEvent::GroupChange, &addr, old, group)?;
            }
            Control::Lookup(selector) => {
                let found = self.core.lookup(selector.as_str());
                debug!(client = %identity, %selector, matches = found.len(), "client lookup");
                self.core.send_control(&addr, Control::ClientInfo(found))?;
            }
            Control::Hello(_) => warn!(client = %identity, "repeated hello ignored"),
            other => warn!(client = %identity, control = ?other, "unexpected control frame from client ignored"),
        }
        Ok(())
    }

    fn fire_change(
        &mut self,
        event: ServerEvent,
        addr: &SocketAddr,
        old: Option<String>,
        new: Option<String>,
    ) -> Result<()> {
        let Some(identity) = self.core.identity(addr) else {
            return Ok(());
        };
        let overridden = self.router.fire_reserved(
            &mut self.core,
            &self.handle,
            event.name(),
            Delivery::default()
                .sent_by(&identity)
                .with_change(old.clone(), new.clone()),
        )?;
        if !overridden {
            debug!(client = %identity, %event, ?old, ?new, "client updated");
        }
        Ok(())
    }

    /// Fires `leave` for every queued departure.  Departures caused by a
    /// `leave` handler are processed in the same pass.
    fn flush_departures(&mut self) -> Result<()> {
        let mut first_error = None;
        while let Some(Departure { identity, reason }) = self.core.take_departure() {
            let fired = self.router.fire_reserved(
                &mut self.core,
                &self.handle,
                ServerEvent::Leave.name(),
                Delivery::default().sent_by(&identity),
            );
            if !matches!(fired, Ok(true)) {
                if let Err(e) = self.core.broadcast_control(Control::PeerLeft(identity.clone()), None) {
                    warn!(client = %identity, error = %e, "peer-left notice not sent");
                }
            }
            trace!(client = %identity, %reason, "departure processed");
            if let Err(e) = fired {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.acceptor.abort();
        self.core.abort_all();
    }
}

/// Accepts sockets and queues them for the poll loop.
async fn accept_loop(listener: TcpListener, tx: mpsc::UnboundedSender<Input>, limit: Option<Arc<Semaphore>>) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };
        let permit = match &limit {
            None => None,
            Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    warn!(%addr, "connection limit reached; refusing connection");
                    drop(stream);
                    continue;
                }
            },
        };
        trace!(%addr, "socket accepted");
        if tx.send(Input::Accepted { stream, addr, permit }).is_err() {
            debug!("server gone; accept loop stopping");
            return;
        }
    }
}
