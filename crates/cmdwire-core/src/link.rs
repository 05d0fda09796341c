//! Per-connection I/O tasks shared by both endpoints.
//!
//! Each connection is split into a read half and a write half:
//!
//! ```text
//!  socket ──► reader task ──► LinkEvent ──► poll loop (server / client)
//!  socket ◄── writer task ◄── Outbound  ◄── send_* calls, handles
//! ```
//!
//! The poll loop never touches the socket directly.  Sends queue pre-encoded
//! frames on an unbounded channel, so they never block a handler.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{CloseReason, Error};
use crate::protocol::{FrameReader, FrameWriter, Message, WireCodec};

/// Work for a writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Complete wire bytes (`header ‖ body`).
    Frame(Vec<u8>),
    /// Flush what is queued, shut the write half down, and stop.
    Close,
}

/// What a reader task reports.
#[derive(Debug)]
pub enum LinkEvent {
    Message(Message),
    /// The read side is finished; no further events follow.
    Closed(Error),
}

/// Sending half of an outbound queue.
pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// Spawns the writer task for one connection.
///
/// The task exits on [`Outbound::Close`], when every sender is dropped, or
/// on the first write error.
pub fn spawn_writer<W>(writer: W, codec: WireCodec) -> (OutboundTx, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let task = tokio::spawn(async move {
        let mut writer = FrameWriter::new(writer, codec.frame());
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Frame(wire) => {
                    if let Err(e) = writer.write_wire(&wire).await {
                        debug!(error = %e, "write failed; stopping writer");
                        return;
                    }
                    trace!(len = wire.len(), "frame written");
                }
                Outbound::Close => break,
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "shutdown after close failed");
        }
    });
    (tx, task)
}

/// Spawns the reader task for one connection.
///
/// Every decoded message is handed to `emit`; the task stops when `emit`
/// returns `false` (the poll loop is gone) or the stream ends.  Bodies that
/// fail the grammar are logged and skipped because framing is still intact.
/// Header and transport failures end the connection.
pub fn spawn_reader<R, F>(reader: R, codec: WireCodec, mut emit: F) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    F: FnMut(LinkEvent) -> bool + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = FrameReader::new(reader, codec.frame());
        loop {
            match reader.read_frame().await {
                Ok(body) => match codec.decode_body(&body) {
                    Ok(message) => {
                        if !emit(LinkEvent::Message(message)) {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, len = body.len(), "dropping undecodable frame"),
                },
                Err(e) => {
                    match &e {
                        Error::ConnectionClosed(CloseReason::ClosedByPeer) => debug!("peer closed the stream"),
                        other => warn!(error = %other, "connection failed"),
                    }
                    emit(LinkEvent::Closed(e));
                    return;
                }
            }
        }
    })
}
