//! `ServerCore`: live connections, the client registry, and every send and
//! disconnect operation.
//!
//! The core is owned by the server's poll loop.  Inline handlers receive it as
//! `&mut ServerCore`, so they can send, look clients up, and disconnect them
//! without any locking.  Threaded handlers go through
//! [`crate::ServerHandle`] instead.
//!
//! # Connection lifecycle
//!
//! ```text
//! accept ──► link (Connecting) ──$CLTHELLO$──► registry (Connected)
//!                                                  │
//!        disconnect / peer close / I/O error ──────┘──► departure ──► `leave`
//! ```
//!
//! A link that has not completed the hello is invisible to lookups and
//! broadcasts.  Removing a joined link queues a *departure*; the server turns
//! departures into `leave` events and peer-left notices after the current
//! handler returns.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;

use cmdwire_core::link;
use cmdwire_core::{
    ClientIdentity, ClientRegistry, ClientSelector, CloseReason, ConnectionState, Control, Error, Message,
    Outbound, OutboundTx, Result, Value, WireCodec,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::handle::{Input, Target};

/// Distinguishes successive connections that reuse one remote address.
pub(crate) type LinkId = u64;

/// One accepted socket.
#[derive(Debug)]
struct Link {
    id: LinkId,
    outbound: OutboundTx,
    reader: JoinHandle<()>,
    state: ConnectionState,
    awaiting_ack: bool,
    // Released when the link is dropped, freeing a `max_connections` slot.
    _permit: Option<OwnedSemaphorePermit>,
}

/// A joined client that is gone and still needs its `leave` event.
#[derive(Debug, Clone)]
pub(crate) struct Departure {
    pub identity: ClientIdentity,
    pub reason: CloseReason,
}

/// Server state handed to inline handlers.
#[derive(Debug)]
pub struct ServerCore {
    codec: WireCodec,
    allow_markers: bool,
    registry: ClientRegistry,
    links: HashMap<SocketAddr, Link>,
    next_link: LinkId,
    departures: VecDeque<Departure>,
    closed: bool,
    input_tx: mpsc::UnboundedSender<Input>,
}

impl ServerCore {
    pub(crate) fn new(codec: WireCodec, allow_markers: bool, input_tx: mpsc::UnboundedSender<Input>) -> Self {
        Self {
            codec,
            allow_markers,
            registry: ClientRegistry::new(),
            links: HashMap::new(),
            next_link: 0,
            departures: VecDeque::new(),
            closed: false,
            input_tx,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    /// Every joined client, in join order.
    pub fn clients(&self) -> Vec<ClientIdentity> {
        self.registry.all()
    }

    /// Every joined client matching `selector`, in join order.
    pub fn lookup(&self, selector: impl Into<ClientSelector>) -> Vec<ClientIdentity> {
        self.registry.lookup(&selector.into())
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn codec(&self) -> WireCodec {
        self.codec
    }

    /// Connection state of the link at `addr`, joined or not.
    pub fn state_of(&self, addr: &SocketAddr) -> Option<ConnectionState> {
        self.links.get(addr).map(|link| link.state)
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Sends `command` to every client matching `selector` and returns how
    /// many were reached.  Zero matches is not an error.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] when the command or payload cannot be encoded,
    /// [`Error::TypeCast`] when the payload value has no wire form.
    pub fn send_to(
        &mut self,
        selector: impl Into<ClientSelector>,
        command: &str,
        payload: impl Into<Value>,
    ) -> Result<usize> {
        let wire = self.encode_command(command, payload.into())?;
        Ok(self.deliver(&Target::Selector(selector.into()), wire))
    }

    /// Sends `command` to exactly one client.
    ///
    /// # Errors
    ///
    /// [`Error::Registry`] when the selector matches no client or several.
    pub fn send_to_one(
        &mut self,
        selector: impl Into<ClientSelector>,
        command: &str,
        payload: impl Into<Value>,
    ) -> Result<ClientIdentity> {
        let target = self.registry.lookup_one(&selector.into())?;
        let wire = self.encode_command(command, payload.into())?;
        self.deliver(&Target::Selector(ClientSelector::from(&target)), wire);
        Ok(target)
    }

    /// Sends `command` to every joined client.
    pub fn send_all(&mut self, command: &str, payload: impl Into<Value>) -> Result<usize> {
        let wire = self.encode_command(command, payload.into())?;
        Ok(self.deliver(&Target::All, wire))
    }

    /// Sends `command` to the clients whose group is `group` right now.
    pub fn send_group(&mut self, group: &str, command: &str, payload: impl Into<Value>) -> Result<usize> {
        let wire = self.encode_command(command, payload.into())?;
        Ok(self.deliver(&Target::Group(group.to_string()), wire))
    }

    /// Sends a payload without a command.
    pub fn send_raw(&mut self, selector: impl Into<ClientSelector>, payload: &[u8]) -> Result<usize> {
        let wire = self.encode(&Message::Raw(payload.to_vec()))?;
        Ok(self.deliver(&Target::Selector(selector.into()), wire))
    }

    /// Sends a payload without a command to every member of `group`.
    pub fn send_group_raw(&mut self, group: &str, payload: &[u8]) -> Result<usize> {
        let wire = self.encode(&Message::Raw(payload.to_vec()))?;
        Ok(self.deliver(&Target::Group(group.to_string()), wire))
    }

    pub(crate) fn encode_command(&self, command: &str, payload: Value) -> Result<Vec<u8>> {
        let payload = payload.to_payload()?;
        self.encode(&Message::command(command, payload))
    }

    pub(crate) fn encode(&self, message: &Message) -> Result<Vec<u8>> {
        Ok(self.codec.encode_with(message, self.allow_markers)?)
    }

    /// Joined clients addressed by `target`.
    pub(crate) fn resolve(&self, target: &Target) -> Vec<SocketAddr> {
        match target {
            Target::Selector(selector) => self.registry.lookup(selector).into_iter().map(|c| c.addr).collect(),
            Target::All => self.registry.iter().map(|c| c.addr).collect(),
            Target::Group(group) => self.registry.iter().filter(|c| c.in_group(group)).map(|c| c.addr).collect(),
        }
    }

    /// Queues pre-encoded wire bytes for every client `target` resolves to.
    pub(crate) fn deliver(&mut self, target: &Target, wire: Vec<u8>) -> usize {
        let addrs = self.resolve(target);
        let mut sent = 0;
        for addr in &addrs {
            if self.push_wire(addr, wire.clone()) {
                sent += 1;
            }
        }
        trace!(?target, sent, "frame queued");
        sent
    }

    /// Queues wire bytes on one link, joined or not.
    fn push_wire(&self, addr: &SocketAddr, wire: Vec<u8>) -> bool {
        match self.links.get(addr) {
            Some(link) => link.outbound.send(Outbound::Frame(wire)).is_ok(),
            None => false,
        }
    }

    pub(crate) fn send_control(&self, addr: &SocketAddr, control: Control) -> Result<()> {
        let wire = self.encode(&Message::Control(control))?;
        self.push_wire(addr, wire);
        Ok(())
    }

    /// Sends a control frame to every joined client except `except`.
    pub(crate) fn broadcast_control(&self, control: Control, except: Option<&SocketAddr>) -> Result<()> {
        let wire = self.encode(&Message::Control(control))?;
        for client in self.registry.iter() {
            if Some(&client.addr) != except {
                self.push_wire(&client.addr, wire.clone());
            }
        }
        Ok(())
    }

    // ── Disconnecting ─────────────────────────────────────────────────────────

    /// Disconnects every client matching `selector` and returns how many.
    ///
    /// With `force`, each client first receives a disconnect notice so it
    /// can tell a kick from a network failure.
    pub fn disconnect(&mut self, selector: impl Into<ClientSelector>, force: bool) -> usize {
        self.disconnect_target(&Target::Selector(selector.into()), force)
    }

    /// Disconnects every joined client.
    pub fn disconnect_all(&mut self, force: bool) -> usize {
        self.disconnect_target(&Target::All, force)
    }

    pub(crate) fn disconnect_target(&mut self, target: &Target, force: bool) -> usize {
        let addrs = self.resolve(target);
        let reason = if force {
            CloseReason::ForcedByServer
        } else {
            CloseReason::Local
        };
        for addr in &addrs {
            self.drop_link(addr, force, reason);
        }
        addrs.len()
    }

    /// Force-disconnects everyone, including connections that never joined,
    /// and stops the server.  Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        info!(clients = self.registry.len(), "closing server");
        self.disconnect_all(true);
        let pending: Vec<SocketAddr> = self.links.keys().copied().collect();
        for addr in &pending {
            self.drop_link(addr, false, CloseReason::Local);
        }
        self.closed = true;
    }

    /// Tears one link down.  A joined client becomes a [`Departure`].
    pub(crate) fn drop_link(&mut self, addr: &SocketAddr, notify: bool, reason: CloseReason) {
        let Some(mut link) = self.links.remove(addr) else {
            return;
        };
        if link.state.transition(ConnectionState::Disconnecting).is_err() {
            debug!(%addr, state = %link.state, "link already shutting down");
        }
        if notify {
            match self.encode(&Message::Control(Control::Disconnect)) {
                Ok(wire) => {
                    let _ = link.outbound.send(Outbound::Frame(wire));
                }
                Err(e) => warn!(%addr, error = %e, "could not encode disconnect notice"),
            }
        }
        let _ = link.outbound.send(Outbound::Close);
        link.reader.abort();
        let _ = link.state.transition(ConnectionState::Closed);

        if let Some(identity) = self.registry.remove(addr) {
            info!(client = %identity, %reason, "client disconnected");
            self.departures.push_back(Departure { identity, reason });
        } else {
            debug!(%addr, %reason, "connection closed before joining");
        }
    }

    pub(crate) fn take_departure(&mut self) -> Option<Departure> {
        self.departures.pop_front()
    }

    // ── Link bookkeeping (poll loop only) ─────────────────────────────────────

    /// Splits an accepted socket into reader and writer tasks.
    pub(crate) fn attach(&mut self, stream: TcpStream, addr: SocketAddr, permit: Option<OwnedSemaphorePermit>) {
        if self.closed {
            return;
        }
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%addr, error = %e, "set_nodelay failed");
        }
        let (read_half, write_half) = stream.into_split();
        let id = self.next_link;
        self.next_link += 1;

        let (outbound, _writer) = link::spawn_writer(write_half, self.codec);
        let tx = self.input_tx.clone();
        let reader = link::spawn_reader(read_half, self.codec, move |event| {
            tx.send(Input::Link { addr, id, event }).is_ok()
        });

        // A stale link for the same address cannot survive a new accept.
        self.drop_link(&addr, false, CloseReason::ClosedByPeer);
        self.links.insert(
            addr,
            Link {
                id,
                outbound,
                reader,
                state: ConnectionState::Connecting,
                awaiting_ack: false,
                _permit: permit,
            },
        );
        debug!(%addr, "connection accepted; awaiting hello");
    }

    /// `true` if the event belongs to the current link at `addr`.
    pub(crate) fn is_current(&self, addr: &SocketAddr, id: LinkId) -> bool {
        self.links.get(addr).is_some_and(|link| link.id == id)
    }

    pub(crate) fn is_joined(&self, addr: &SocketAddr) -> bool {
        self.registry.get(addr).is_some()
    }

    /// Completes the hello handshake.
    pub(crate) fn join(&mut self, identity: ClientIdentity) -> Result<()> {
        let link = self
            .links
            .get_mut(&identity.addr)
            .ok_or(Error::ConnectionClosed(CloseReason::ClosedByPeer))?;
        link.state.transition(ConnectionState::Connected)?;
        info!(client = %identity, group = ?identity.group, "client joined");
        self.registry.insert(identity);
        Ok(())
    }

    pub(crate) fn identity(&self, addr: &SocketAddr) -> Option<ClientIdentity> {
        self.registry.get(addr).cloned()
    }

    pub(crate) fn change_name(&mut self, addr: &SocketAddr, name: Option<String>) -> Option<Option<String>> {
        self.registry.change_name(addr, name)
    }

    pub(crate) fn change_group(&mut self, addr: &SocketAddr, group: Option<String>) -> Option<Option<String>> {
        self.registry.change_group(addr, group)
    }

    pub(crate) fn acknowledge(&mut self, addr: &SocketAddr) {
        if let Some(link) = self.links.get_mut(addr) {
            link.awaiting_ack = false;
        }
    }

    /// Drops joined clients that ignored the previous probe, then probes the
    /// rest.
    pub(crate) fn keepalive_sweep(&mut self) -> Result<()> {
        let silent: Vec<SocketAddr> = self
            .registry
            .iter()
            .filter(|c| self.links.get(&c.addr).is_some_and(|link| link.awaiting_ack))
            .map(|c| c.addr)
            .collect();
        for addr in &silent {
            warn!(%addr, "keepalive not acknowledged; dropping client");
            self.drop_link(addr, false, CloseReason::KeepaliveTimeout);
        }

        let wire = self.encode(&Message::Control(Control::KeepAlive))?;
        let joined: Vec<SocketAddr> = self.registry.iter().map(|c| c.addr).collect();
        for addr in &joined {
            if let Some(link) = self.links.get_mut(addr) {
                if link.outbound.send(Outbound::Frame(wire.clone())).is_ok() {
                    link.awaiting_ack = true;
                }
            }
        }
        trace!(probed = joined.len(), dropped = silent.len(), "keepalive sweep");
        Ok(())
    }

    /// Maps a reader's final event to a close reason.
    pub(crate) fn close_reason(error: &Error) -> CloseReason {
        match error {
            Error::ConnectionClosed(reason) => *reason,
            _ => CloseReason::ClosedByPeer,
        }
    }

    pub(crate) fn abort_all(&mut self) {
        for link in self.links.values() {
            link.reader.abort();
            let _ = link.outbound.send(Outbound::Close);
        }
    }
}
