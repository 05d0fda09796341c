//! `ClientCore`: the client's single connection and everything inline
//! handlers may do with it.

use std::collections::VecDeque;

use cmdwire_core::{
    ClientIdentity, CloseReason, ConnectionState, Control, Error, JoinInfo, Message, MessageCache, Outbound,
    OutboundTx, Result, Value, WireCodec,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Client state handed to inline handlers.
#[derive(Debug)]
pub struct ClientCore {
    codec: WireCodec,
    allow_markers: bool,
    outbound: OutboundTx,
    reader: JoinHandle<()>,
    state: ConnectionState,
    close_reason: Option<CloseReason>,
    // The failure that ended the link, until a caller has seen it.
    close_error: Option<Error>,
    name: Option<String>,
    group: Option<String>,
    cache: Option<MessageCache>,
    pending_lookups: VecDeque<oneshot::Sender<Vec<ClientIdentity>>>,
}

impl ClientCore {
    pub(crate) fn new(
        codec: WireCodec,
        allow_markers: bool,
        outbound: OutboundTx,
        reader: JoinHandle<()>,
        name: Option<String>,
        group: Option<String>,
        cache_capacity: Option<usize>,
    ) -> Self {
        Self {
            codec,
            allow_markers,
            outbound,
            reader,
            state: ConnectionState::Connecting,
            close_reason: None,
            close_error: None,
            name,
            group,
            cache: cache_capacity.map(MessageCache::new),
            pending_lookups: VecDeque::new(),
        }
    }

    /// Sends the hello and enters `Connected`.
    pub(crate) fn handshake(&mut self) -> Result<()> {
        let hello = Control::Hello(JoinInfo {
            name: self.name.clone(),
            group: self.group.clone(),
        });
        self.send_control(hello)?;
        self.state.transition(ConnectionState::Connected)?;
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.close_reason.is_some()
    }

    /// Why the connection ended, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn cache(&self) -> Option<&MessageCache> {
        self.cache.as_ref()
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    /// Sends `command` with `payload` to the server.
    ///
    /// # Errors
    ///
    /// Encoding failures, or [`Error::ConnectionClosed`] after the
    /// connection has ended.
    pub fn send(&mut self, command: &str, payload: impl Into<Value>) -> Result<()> {
        let message = Message::command(command, payload.into().to_payload()?);
        self.send_message(&message)
    }

    /// Sends a payload without a command.
    pub fn send_raw(&mut self, payload: &[u8]) -> Result<()> {
        self.send_message(&Message::Raw(payload.to_vec()))
    }

    /// Renames this client on the server.  `None` clears the name.
    pub fn change_name(&mut self, name: Option<String>) -> Result<()> {
        self.send_control(Control::ChangeName(name.clone()))?;
        self.name = name;
        Ok(())
    }

    /// Moves this client to another group.  `None` leaves every group.
    pub fn change_group(&mut self, group: Option<String>) -> Result<()> {
        self.send_control(Control::ChangeGroup(group.clone()))?;
        self.group = group;
        Ok(())
    }

    /// Closes the connection gracefully.  Idempotent.
    pub fn close(&mut self) {
        if self.is_closed() {
            return;
        }
        if let Err(e) = self.send_control(Control::Close) {
            debug!(error = %e, "close notice not sent");
        }
        self.shut_down(CloseReason::Local);
    }

    fn send_message(&self, message: &Message) -> Result<()> {
        let wire = self.codec.encode_with(message, self.allow_markers)?;
        self.push(wire)
    }

    pub(crate) fn send_control(&self, control: Control) -> Result<()> {
        self.send_message(&Message::Control(control))
    }

    /// Queues pre-encoded wire bytes.
    pub(crate) fn push(&self, wire: Vec<u8>) -> Result<()> {
        if let Some(reason) = self.close_reason {
            return Err(Error::ConnectionClosed(reason));
        }
        self.outbound
            .send(Outbound::Frame(wire))
            .map_err(|_| Error::ConnectionClosed(CloseReason::ClosedByPeer))
    }

    // ── Lookups ───────────────────────────────────────────────────────────────

    /// Sends a lookup request.  The server answers in order, so replies are
    /// matched to requests first-in first-out.
    pub(crate) fn request_lookup(&mut self, selector: String, reply: oneshot::Sender<Vec<ClientIdentity>>) -> Result<()> {
        self.send_control(Control::Lookup(selector))?;
        self.pending_lookups.push_back(reply);
        Ok(())
    }

    pub(crate) fn resolve_lookup(&mut self, found: Vec<ClientIdentity>) {
        match self.pending_lookups.pop_front() {
            Some(reply) => {
                let _ = reply.send(found);
            }
            None => warn!(matches = found.len(), "client info received without a pending lookup"),
        }
    }

    // ── Bookkeeping (poll loop only) ──────────────────────────────────────────

    /// Records a user frame in the cache, if one is configured.
    pub(crate) fn record(&mut self, command: Option<String>, payload: Option<Vec<u8>>, handled: bool) {
        if let Some(cache) = self.cache.as_mut() {
            cache.push(None, command, payload, handled);
        }
    }

    /// Ends the connection for `reason`.  Pending lookups fail with
    /// [`Error::ConnectionClosed`].  Only the first call has an effect.
    pub(crate) fn shut_down(&mut self, reason: CloseReason) {
        if self.close_reason.is_some() {
            return;
        }
        if self.state.transition(ConnectionState::Disconnecting).is_err() {
            debug!(state = %self.state, "shutdown from unexpected state");
        }
        let _ = self.outbound.send(Outbound::Close);
        self.reader.abort();
        self.pending_lookups.clear();
        let _ = self.state.transition(ConnectionState::Closed);
        self.close_reason = Some(reason);
        info!(%reason, "connection closed");
    }

    /// Ends the connection because the link failed.  The error is kept for
    /// the next caller of `update`, `run` or `recv`.
    pub(crate) fn fail(&mut self, error: Error) {
        if self.is_closed() {
            return;
        }
        self.shut_down(CloseReason::ClosedByPeer);
        self.close_error = Some(error);
    }

    /// Hands out the link failure once; later calls see `None`.
    pub(crate) fn take_close_error(&mut self) -> Option<Error> {
        self.close_error.take()
    }

    pub(crate) fn abort(&mut self) {
        self.reader.abort();
        let _ = self.outbound.send(Outbound::Close);
    }
}
