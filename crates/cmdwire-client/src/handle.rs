//! `ClientHandle`: cloneable remote control for a client's poll loop.

use cmdwire_core::link::LinkEvent;
use cmdwire_core::{ClientIdentity, ClientSelector, CloseReason, Error, Message, Result, Value, WireCodec};
use tokio::sync::{mpsc, oneshot};

/// Work a handle asks the poll loop to do.
#[derive(Debug)]
pub(crate) enum Request {
    Send(Vec<u8>),
    ChangeName(Option<String>),
    ChangeGroup(Option<String>),
    Lookup {
        selector: String,
        reply: oneshot::Sender<Vec<ClientIdentity>>,
    },
    Close,
}

/// Everything the client's poll loop consumes, in one ordered queue.
#[derive(Debug)]
pub(crate) enum Input {
    Link(LinkEvent),
    Request(Request),
}

/// Cloneable handle to a client's poll loop.
///
/// Threaded handlers receive one; so can any other task.  Requests are
/// applied by the poll loop in order with inbound frames.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Input>,
    codec: WireCodec,
    allow_markers: bool,
}

impl ClientHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Input>, codec: WireCodec, allow_markers: bool) -> Self {
        Self {
            tx,
            codec,
            allow_markers,
        }
    }

    fn request(&self, request: Request) -> Result<()> {
        self.tx
            .send(Input::Request(request))
            .map_err(|_| Error::ConnectionClosed(CloseReason::Local))
    }

    /// Queues `command` for the server.
    ///
    /// # Errors
    ///
    /// Encoding failures, or [`Error::ConnectionClosed`] once the client is
    /// gone.
    pub fn send(&self, command: &str, payload: impl Into<Value>) -> Result<()> {
        let message = Message::command(command, payload.into().to_payload()?);
        let wire = self.codec.encode_with(&message, self.allow_markers)?;
        self.request(Request::Send(wire))
    }

    pub fn send_raw(&self, payload: &[u8]) -> Result<()> {
        let wire = self
            .codec
            .encode_with(&Message::Raw(payload.to_vec()), self.allow_markers)?;
        self.request(Request::Send(wire))
    }

    pub fn change_name(&self, name: Option<String>) -> Result<()> {
        self.request(Request::ChangeName(name))
    }

    pub fn change_group(&self, group: Option<String>) -> Result<()> {
        self.request(Request::ChangeGroup(group))
    }

    /// Closes the connection.  A `recv` waiting on the client returns
    /// [`Error::ConnectionClosed`].
    pub fn close(&self) -> Result<()> {
        self.request(Request::Close)
    }

    /// Asks the server which clients match `selector`.
    pub async fn lookup(&self, selector: impl Into<ClientSelector>) -> Result<Vec<ClientIdentity>> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Lookup {
            selector: selector.into().to_string(),
            reply,
        })?;
        rx.await.map_err(|_| Error::ConnectionClosed(CloseReason::ClosedByPeer))
    }

    /// [`ClientHandle::lookup`] for threaded handlers.  Must not be called
    /// from async code.
    pub fn lookup_blocking(&self, selector: impl Into<ClientSelector>) -> Result<Vec<ClientIdentity>> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Lookup {
            selector: selector.into().to_string(),
            reply,
        })?;
        rx.blocking_recv()
            .map_err(|_| Error::ConnectionClosed(CloseReason::ClosedByPeer))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
