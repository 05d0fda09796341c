//! `Client`: connect, handshake, and the client poll loop.
//!
//! # Poll loop (for beginners)
//!
//! A reader task decodes frames from the socket and queues them.  Nothing
//! happens to them until the application drives the client:
//!
//! - [`Client::update`] handles whatever is already queued and returns.
//! - [`Client::run`] keeps handling frames until the connection ends.
//! - [`Client::recv`] waits for one specific command and returns its
//!   payload, routing every other frame normally while it waits.
//!
//! Control frames never reach user handlers directly.  Keepalive probes are
//! answered automatically, peer notices become `client_connect` /
//! `client_disconnect` events, and a disconnect notice from the server fires
//! `force_disconnect` and ends the connection.

use std::fmt;
use std::net::SocketAddr;

use cmdwire_core::link::{self, LinkEvent};
use cmdwire_core::{
    cast, ClientIdentity, ClientSelector, CloseReason, ConfigError, ConnectionState, Control, Delivery, Error,
    EventRouter, Handler, Message, MessageCache, PayloadType, Result, Value, WILDCARD,
};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ClientConfig;
use crate::connection::ClientCore;
use crate::handle::{ClientHandle, Input, Request};

/// Reserved event names on the client side.
pub const CLIENT_EVENTS: &[&str] = &["client_connect", "client_disconnect", "force_disconnect"];

/// Handlers registered on a [`Client`].
pub type ClientHandler = Handler<ClientCore, ClientHandle>;

/// Client lifecycle events.
///
/// `Connect` and `Disconnect` describe *other* clients joining and leaving
/// the server, so their handlers may ask for the peer's identity.
/// `ForceDisconnect` fires when the server kicks this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientEvent {
    Connect,
    Disconnect,
    ForceDisconnect,
}

impl ClientEvent {
    pub fn name(self) -> &'static str {
        match self {
            ClientEvent::Connect => "client_connect",
            ClientEvent::Disconnect => "client_disconnect",
            ClientEvent::ForceDisconnect => "force_disconnect",
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors that can stop a client from connecting.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Core(#[from] Error),
}

/// What a `recv` call is waiting for.
enum Want<'a> {
    Command {
        command: Option<&'a str>,
        payload_type: &'a PayloadType,
    },
    Raw,
}

/// A cmdwire client endpoint.
pub struct Client {
    core: ClientCore,
    router: EventRouter<ClientCore, ClientHandle>,
    handle: ClientHandle,
    input_rx: mpsc::UnboundedReceiver<Input>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("local_addr", &self.local_addr)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.core.state())
            .field("router", &self.router)
            .finish()
    }
}

impl Client {
    /// Connects to the server and sends the hello.
    ///
    /// # Errors
    ///
    /// [`ClientError::Config`] for an invalid protocol section,
    /// [`ClientError::ConnectFailed`] if the server cannot be reached.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        config.protocol.validate()?;
        let endpoint = config.server_endpoint();
        let stream = TcpStream::connect((config.server_address.as_str(), config.port))
            .await
            .map_err(|source| ClientError::ConnectFailed {
                addr: endpoint.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }
        let local_addr = stream.local_addr().map_err(Error::from)?;
        let peer_addr = stream.peer_addr().map_err(Error::from)?;

        let codec = config.protocol.codec();
        let (read_half, write_half) = stream.into_split();
        let (outbound, _writer) = link::spawn_writer(write_half, codec);
        let (tx, input_rx) = mpsc::unbounded_channel();
        let link_tx = tx.clone();
        let reader = link::spawn_reader(read_half, codec, move |event| link_tx.send(Input::Link(event)).is_ok());

        let mut core = ClientCore::new(
            codec,
            config.allow_markers,
            outbound,
            reader,
            config.name,
            config.group,
            config.cache_capacity,
        );
        core.handshake()?;
        info!(server = %endpoint, %local_addr, name = ?core.name(), group = ?core.group(), "connected");

        Ok(Self {
            core,
            router: EventRouter::new(CLIENT_EVENTS, false),
            handle: ClientHandle::new(tx, codec, config.allow_markers),
            input_rx,
            local_addr,
            peer_addr,
        })
    }

    /// This end of the connection, as the server sees it.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn core(&self) -> &ClientCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut ClientCore {
        &mut self.core
    }

    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    pub fn cache(&self) -> Option<&MessageCache> {
        self.core.cache()
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Registers a handler for a user command or for [`WILDCARD`].
    ///
    /// # Errors
    ///
    /// [`Error::Router`] for reserved names without
    /// [`Handler::override_reserved`], for commands the grammar cannot carry,
    /// and for identity-taking handlers, since commands a client receives
    /// come from the server and carry no sender identity.
    pub fn register(&mut self, command: &str, handler: ClientHandler) -> Result<()> {
        self.router.register(command, handler)?;
        Ok(())
    }

    /// Adds a hook that runs next to the built-in reaction to `event`.
    pub fn on_event(&mut self, event: ClientEvent, handler: ClientHandler) -> Result<()> {
        self.router.on_event(event.name(), handler)?;
        Ok(())
    }

    pub fn unregister(&mut self, command: &str) -> bool {
        self.router.unregister(command)
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    pub fn send(&mut self, command: &str, payload: impl Into<Value>) -> Result<()> {
        self.core.send(command, payload)
    }

    pub fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        self.core.send_raw(payload)
    }

    pub fn change_name(&mut self, name: Option<String>) -> Result<()> {
        self.core.change_name(name)
    }

    pub fn change_group(&mut self, group: Option<String>) -> Result<()> {
        self.core.change_group(group)
    }

    /// Asks the server which clients match `selector` and waits for the
    /// answer, handling other frames meanwhile.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection ends first.
    pub async fn lookup(&mut self, selector: impl Into<ClientSelector>) -> Result<Vec<ClientIdentity>> {
        let (reply, mut rx) = oneshot::channel();
        self.core.request_lookup(selector.into().to_string(), reply)?;
        loop {
            match rx.try_recv() {
                Ok(found) => return Ok(found),
                Err(oneshot::error::TryRecvError::Closed) => return Err(self.closed_error()),
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
            let input = self.next_input().await?;
            self.step(input, None)?;
        }
    }

    // ── Poll loop ─────────────────────────────────────────────────────────────

    /// Handles every queued frame and request without waiting.
    ///
    /// Returns how many inputs were handled.
    ///
    /// # Errors
    ///
    /// The transport or framing error that ended the connection, once;
    /// [`Error::ConnectionClosed`] on every call after that, with
    /// [`CloseReason::ForcedByServer`] after a kick.  Handler failures and
    /// [`Error::TypeCast`] are returned as they happen; the failing frame is
    /// consumed.
    pub fn update(&mut self) -> Result<usize> {
        let mut processed = 0;
        loop {
            if self.core.is_closed() {
                return Err(self.closed_error());
            }
            let Ok(input) = self.input_rx.try_recv() else {
                return Ok(processed);
            };
            processed += 1;
            self.step(input, None)?;
        }
    }

    /// Handles frames as they arrive until the connection ends.
    ///
    /// Returns `Ok(())` after a local close and
    /// [`Error::ConnectionClosed`] for every other ending.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            match self.core.close_reason() {
                Some(CloseReason::Local) => return Ok(()),
                Some(_) => return Err(self.closed_error()),
                None => {}
            }
            let input = self.next_input().await?;
            self.step(input, None)?;
        }
    }

    /// Waits for the next frame carrying `command` (any command when `None`)
    /// and returns its payload cast to `payload_type`.
    ///
    /// The matching frame is consumed by this call and not routed.  Every
    /// other frame is routed normally while waiting.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectionClosed`] if the connection ends or
    /// [`ClientHandle::close`] is called while waiting; [`Error::TypeCast`]
    /// if the matching payload does not fit `payload_type`.
    pub async fn recv(&mut self, command: Option<&str>, payload_type: &PayloadType) -> Result<Value> {
        self.wait_for(Want::Command { command, payload_type }).await
    }

    /// Waits for the next frame sent without a command.
    pub async fn recv_raw(&mut self) -> Result<Vec<u8>> {
        match self.wait_for(Want::Raw).await? {
            Value::Bytes(bytes) => Ok(bytes),
            other => Ok(other.to_payload()?.unwrap_or_default()),
        }
    }

    /// Closes the connection gracefully.
    pub fn close(&mut self) {
        self.core.close();
    }

    /// Moves the client onto a background task.
    pub fn spawn(self) -> (ClientHandle, JoinHandle<Result<()>>) {
        let handle = self.handle();
        let task = tokio::spawn(async move {
            let mut client = self;
            client.run().await
        });
        (handle, task)
    }

    async fn wait_for(&mut self, want: Want<'_>) -> Result<Value> {
        loop {
            if self.core.is_closed() {
                return Err(self.closed_error());
            }
            let input = self.next_input().await?;
            if let Some(value) = self.step(input, Some(&want))? {
                return Ok(value);
            }
        }
    }

    async fn next_input(&mut self) -> Result<Input> {
        match self.input_rx.recv().await {
            Some(input) => Ok(input),
            None => Err(self.closed_error()),
        }
    }

    /// The error that ended the connection the first time it is asked for,
    /// [`Error::ConnectionClosed`] after that.
    fn closed_error(&mut self) -> Error {
        match self.core.take_close_error() {
            Some(error) => error,
            None => Error::ConnectionClosed(self.core.close_reason().unwrap_or(CloseReason::ClosedByPeer)),
        }
    }

    fn step(&mut self, input: Input, want: Option<&Want<'_>>) -> Result<Option<Value>> {
        match input {
            Input::Request(request) => {
                self.apply(request)?;
                Ok(None)
            }
            Input::Link(_) if self.core.is_closed() => {
                trace!("frame after close ignored");
                Ok(None)
            }
            Input::Link(LinkEvent::Closed(Error::ConnectionClosed(reason))) => {
                self.core.shut_down(reason);
                Ok(None)
            }
            Input::Link(LinkEvent::Closed(e)) => {
                warn!(error = %e, "connection failed");
                self.core.fail(e);
                Ok(None)
            }
            Input::Link(LinkEvent::Message(message)) => self.on_message(message, want),
        }
    }

    fn apply(&mut self, request: Request) -> Result<()> {
        match request {
            Request::Send(wire) => self.core.push(wire),
            Request::ChangeName(name) => self.core.change_name(name),
            Request::ChangeGroup(group) => self.core.change_group(group),
            Request::Lookup { selector, reply } => self.core.request_lookup(selector, reply),
            Request::Close => {
                self.core.close();
                Ok(())
            }
        }
    }

    fn on_message(&mut self, message: Message, want: Option<&Want<'_>>) -> Result<Option<Value>> {
        match message {
            Message::Control(control) => {
                self.on_control(control)?;
                Ok(None)
            }
            Message::Command { command, payload } => {
                if let Some(Want::Command {
                    command: wanted,
                    payload_type,
                }) = want
                {
                    if wanted.map_or(true, |w| w == command) {
                        let value = cast(payload.as_deref(), payload_type);
                        self.core.record(Some(command), payload, true);
                        return Ok(Some(value?));
                    }
                }
                let handled = self.router.resolves(&command);
                let dispatched = self
                    .router
                    .dispatch(&mut self.core, &self.handle, Delivery::command(&command, payload.as_deref()));
                self.core.record(Some(command), payload, handled);
                dispatched?;
                Ok(None)
            }
            Message::Raw(payload) => {
                if let Some(Want::Raw) = want {
                    self.core.record(None, Some(payload.clone()), true);
                    return Ok(Some(Value::Bytes(payload)));
                }
                let handled = self.router.resolves(WILDCARD);
                let dispatched = self
                    .router
                    .dispatch(&mut self.core, &self.handle, Delivery::raw(&payload));
                self.core.record(None, Some(payload), handled);
                dispatched?;
                Ok(None)
            }
        }
    }

    fn on_control(&mut self, control: Control) -> Result<()> {
        match control {
            Control::KeepAlive => self.core.send_control(Control::KeepAliveAck)?,
            Control::KeepAliveAck => trace!("keepalive acknowledged"),
            Control::Disconnect => {
                let fired = self.router.fire_reserved(
                    &mut self.core,
                    &self.handle,
                    ClientEvent::ForceDisconnect.name(),
                    Delivery::default(),
                );
                if !matches!(fired, Ok(true)) {
                    warn!("disconnected by server");
                }
                self.core.shut_down(CloseReason::ForcedByServer);
                fired?;
            }
            Control::Close => self.core.shut_down(CloseReason::PeerClosed),
            Control::PeerJoined(peer) => self.fire_peer(ClientEvent::Connect, &peer)?,
            Control::PeerLeft(peer) => self.fire_peer(ClientEvent::Disconnect, &peer)?,
            Control::ClientInfo(found) => self.core.resolve_lookup(found),
            other => warn!(control = ?other, "unexpected control frame from server ignored"),
        }
        Ok(())
    }

    fn fire_peer(&mut self, event: ClientEvent, peer: &ClientIdentity) -> Result<()> {
        let overridden = self.router.fire_reserved(
            &mut self.core,
            &self.handle,
            event.name(),
            Delivery::default().sent_by(peer),
        )?;
        if !overridden {
            debug!(%peer, %event, "peer notice");
        }
        Ok(())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.core.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdwire_core::{FrameReader, JoinInfo, RouterError, WireCodec};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// A bare listener that speaks the wire format by hand.
    async fn fake_server() -> (TcpListener, ClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, ClientConfig::new("127.0.0.1", port).with_name("alice").with_cache(8))
    }

    #[test]
    fn test_event_names_match_reserved_table() {
        let names: Vec<&str> = [ClientEvent::Connect, ClientEvent::Disconnect, ClientEvent::ForceDisconnect]
            .iter()
            .map(|e| e.name())
            .collect();
        assert_eq!(names, CLIENT_EVENTS);
    }

    #[tokio::test]
    async fn test_connect_sends_hello_first() {
        // Arrange
        let (listener, config) = fake_server().await;
        let codec = WireCodec::default();

        // Act
        let client = Client::connect(config.with_group("g1")).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let mut reader = FrameReader::new(socket, codec.frame());
        let body = reader.read_frame().await.unwrap();

        // Assert
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(
            codec.decode_body(&body).unwrap(),
            Message::Control(Control::Hello(JoinInfo {
                name: Some("alice".to_string()),
                group: Some("g1".to_string()),
            }))
        );
    }

    #[tokio::test]
    async fn test_identity_handlers_are_rejected_for_commands() {
        let (_listener, config) = fake_server().await;
        let mut client = Client::connect(config).await.unwrap();

        let result = client.register("x", Handler::with_identity(|_: &mut ClientCore, _| Ok(())));

        assert!(matches!(result, Err(Error::Router(RouterError::IdentityUnavailable(_)))));
    }

    #[tokio::test]
    async fn test_recv_returns_matching_frame_and_routes_the_rest() {
        // Arrange – server sends `noise` then `greet`
        let (listener, config) = fake_server().await;
        let codec = WireCodec::default();
        let mut client = Client::connect(config).await.unwrap();
        client
            .register(
                "noise",
                Handler::with_payload(PayloadType::Text, |core: &mut ClientCore, _| {
                    core.send("heard", ())?;
                    Ok(())
                }),
            )
            .unwrap();
        let (mut socket, _) = listener.accept().await.unwrap();
        for message in [
            Message::command("noise", Some(b"x".to_vec())),
            Message::command("greet", Some(b"hi".to_vec())),
        ] {
            socket.write_all(&codec.encode(&message).unwrap()).await.unwrap();
        }

        // Act
        let value = client.recv(Some("greet"), &PayloadType::Text).await.unwrap();

        // Assert
        assert_eq!(value, Value::Text("hi".to_string()));
        let cache = client.cache().unwrap();
        let commands: Vec<_> = cache.snapshot().into_iter().map(|e| (e.command, e.handled)).collect();
        assert_eq!(
            commands,
            vec![(Some("noise".to_string()), true), (Some("greet".to_string()), true)]
        );
    }

    #[tokio::test]
    async fn test_keepalive_is_acknowledged_automatically() {
        // Arrange
        let (listener, config) = fake_server().await;
        let codec = WireCodec::default();
        let mut client = Client::connect(config).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut reader = FrameReader::new(read_half, codec.frame());
        reader.read_frame().await.unwrap(); // hello

        // Act – probe, then a command so recv has something to return
        write_half
            .write_all(&codec.encode(&Message::Control(Control::KeepAlive)).unwrap())
            .await
            .unwrap();
        write_half
            .write_all(&codec.encode(&Message::command("done", None)).unwrap())
            .await
            .unwrap();
        client.recv(Some("done"), &PayloadType::Null).await.unwrap();

        // Assert
        let body = reader.read_frame().await.unwrap();
        assert_eq!(codec.decode_body(&body).unwrap(), Message::Control(Control::KeepAliveAck));
    }

    #[tokio::test]
    async fn test_handle_close_unblocks_pending_recv() {
        // Arrange
        let (_listener, config) = fake_server().await;
        let mut client = Client::connect(config).await.unwrap();
        let handle = client.handle();

        // Act
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            handle.close().unwrap();
        });
        let result = client.recv(Some("never"), &PayloadType::Bytes).await;

        // Assert
        assert!(matches!(result, Err(Error::ConnectionClosed(CloseReason::Local))));
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_peer_closing_the_socket_ends_update() {
        // Arrange
        let (listener, config) = fake_server().await;
        let mut client = Client::connect(config).await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();

        // Act
        drop(socket);
        let result = client.recv(None, &PayloadType::Bytes).await;

        // Assert
        assert!(matches!(result, Err(Error::ConnectionClosed(CloseReason::ClosedByPeer))));
        assert!(matches!(
            client.update(),
            Err(Error::ConnectionClosed(CloseReason::ClosedByPeer))
        ));
    }
}
