//! `ServerHandle`: a cloneable, thread-safe remote control for a running
//! server.
//!
//! Threaded handlers and code outside the poll loop cannot borrow the
//! [`crate::ServerCore`].  Instead they send requests through a handle; the
//! poll loop applies them in arrival order, interleaved with inbound frames.
//! Frames are encoded on the caller's side so encoding errors surface
//! immediately instead of inside the loop.

use std::net::SocketAddr;

use cmdwire_core::link::LinkEvent;
use cmdwire_core::{ClientIdentity, ClientSelector, CloseReason, Error, Message, Result, Value, WireCodec};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit};

use crate::connections::LinkId;

/// Which joined clients a send or disconnect addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Target {
    Selector(ClientSelector),
    All,
    Group(String),
}

/// Work a handle asks the poll loop to do.
#[derive(Debug)]
pub(crate) enum Request {
    Send {
        target: Target,
        wire: Vec<u8>,
    },
    Disconnect {
        target: Target,
        force: bool,
    },
    Lookup {
        selector: Option<ClientSelector>,
        reply: oneshot::Sender<Vec<ClientIdentity>>,
    },
    Close,
}

/// Everything the poll loop consumes, in one ordered queue.
#[derive(Debug)]
pub(crate) enum Input {
    Accepted {
        stream: TcpStream,
        addr: SocketAddr,
        permit: Option<OwnedSemaphorePermit>,
    },
    Link {
        addr: SocketAddr,
        id: LinkId,
        event: LinkEvent,
    },
    Request(Request),
}

/// Cloneable handle to a server's poll loop.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<Input>,
    codec: WireCodec,
    allow_markers: bool,
}

impl ServerHandle {
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

    fn encode_command(&self, command: &str, payload: Value) -> Result<Vec<u8>> {
        let message = Message::command(command, payload.to_payload()?);
        Ok(self.codec.encode_with(&message, self.allow_markers)?)
    }

    fn send(&self, target: Target, command: &str, payload: Value) -> Result<()> {
        let wire = self.encode_command(command, payload)?;
        self.request(Request::Send { target, wire })
    }

    /// Queues `command` for every client matching `selector`.
    ///
    /// # Errors
    ///
    /// Encoding failures, or [`Error::ConnectionClosed`] once the server is
    /// gone.
    pub fn send_to(&self, selector: impl Into<ClientSelector>, command: &str, payload: impl Into<Value>) -> Result<()> {
        self.send(Target::Selector(selector.into()), command, payload.into())
    }

    pub fn send_all(&self, command: &str, payload: impl Into<Value>) -> Result<()> {
        self.send(Target::All, command, payload.into())
    }

    pub fn send_group(&self, group: &str, command: &str, payload: impl Into<Value>) -> Result<()> {
        self.send(Target::Group(group.to_string()), command, payload.into())
    }

    pub fn send_raw(&self, selector: impl Into<ClientSelector>, payload: &[u8]) -> Result<()> {
        let wire = self
            .codec
            .encode_with(&Message::Raw(payload.to_vec()), self.allow_markers)?;
        self.request(Request::Send {
            target: Target::Selector(selector.into()),
            wire,
        })
    }

    pub fn send_group_raw(&self, group: &str, payload: &[u8]) -> Result<()> {
        let wire = self
            .codec
            .encode_with(&Message::Raw(payload.to_vec()), self.allow_markers)?;
        self.request(Request::Send {
            target: Target::Group(group.to_string()),
            wire,
        })
    }

    pub fn disconnect(&self, selector: impl Into<ClientSelector>, force: bool) -> Result<()> {
        self.request(Request::Disconnect {
            target: Target::Selector(selector.into()),
            force,
        })
    }

    pub fn disconnect_all(&self, force: bool) -> Result<()> {
        self.request(Request::Disconnect {
            target: Target::All,
            force,
        })
    }

    /// Asks the server to close.  A `recv` waiting on the server returns
    /// [`Error::ConnectionClosed`].
    pub fn close(&self) -> Result<()> {
        self.request(Request::Close)
    }

    /// Clients matching `selector`, as seen by the poll loop.
    pub async fn lookup(&self, selector: impl Into<ClientSelector>) -> Result<Vec<ClientIdentity>> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Lookup {
            selector: Some(selector.into()),
            reply,
        })?;
        rx.await.map_err(|_| Error::ConnectionClosed(CloseReason::Local))
    }

    /// Every joined client.
    pub async fn clients(&self) -> Result<Vec<ClientIdentity>> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Lookup { selector: None, reply })?;
        rx.await.map_err(|_| Error::ConnectionClosed(CloseReason::Local))
    }

    /// [`ServerHandle::lookup`] for threaded handlers, which run outside the
    /// async runtime.  Must not be called from async code.
    pub fn lookup_blocking(&self, selector: impl Into<ClientSelector>) -> Result<Vec<ClientIdentity>> {
        let (reply, rx) = oneshot::channel();
        self.request(Request::Lookup {
            selector: Some(selector.into()),
            reply,
        })?;
        rx.blocking_recv().map_err(|_| Error::ConnectionClosed(CloseReason::Local))
    }

    /// `true` once the poll loop has dropped its end of the queue.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmdwire_core::ProtocolError;

    fn make_handle() -> (ServerHandle, mpsc::UnboundedReceiver<Input>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ServerHandle::new(tx, WireCodec::default(), false), rx)
    }

    #[test]
    fn test_send_group_queues_encoded_frame() {
        // Arrange
        let (handle, mut rx) = make_handle();

        // Act
        handle.send_group("g1", "greet", "hi").unwrap();

        // Assert
        let Ok(Input::Request(Request::Send { target, wire })) = rx.try_recv() else {
            panic!("expected a send request");
        };
        assert_eq!(target, Target::Group("g1".to_string()));
        assert_eq!(&wire[16..], b"$CMD$greet$MSG$hi");
    }

    #[test]
    fn test_encoding_error_is_reported_to_the_caller() {
        let (handle, mut rx) = make_handle();

        let result = handle.send_all("bad$CMD$name", ());

        assert!(matches!(result, Err(Error::Protocol(ProtocolError::Escaping { .. }))));
        assert!(rx.try_recv().is_err(), "nothing may be queued");
    }

    #[test]
    fn test_requests_fail_once_the_loop_is_gone() {
        let (handle, rx) = make_handle();
        drop(rx);

        assert!(handle.is_closed());
        assert!(matches!(
            handle.close(),
            Err(Error::ConnectionClosed(CloseReason::Local))
        ));
    }

    #[test]
    fn test_selector_text_becomes_address_or_name() {
        let (handle, mut rx) = make_handle();

        handle.disconnect("127.0.0.1:4000", true).unwrap();
        handle.disconnect("alice", false).unwrap();

        let targets: Vec<Target> = std::iter::from_fn(|| match rx.try_recv() {
            Ok(Input::Request(Request::Disconnect { target, .. })) => Some(target),
            _ => None,
        })
        .collect();
        assert_eq!(
            targets,
            vec![
                Target::Selector(ClientSelector::ByAddress("127.0.0.1:4000".parse().unwrap())),
                Target::Selector(ClientSelector::ByName("alice".to_string())),
            ]
        );
    }
}
