//! Length-prefixed framing.
//!
//! Wire format:
//! ```text
//! [header: header_len bytes, ASCII decimal, space padded][body: L bytes]
//! ```
//! The header carries the exact byte length `L` of the body that follows.
//! With the default `header_len` of 16 a 17-byte body is announced as
//! `"17              "`.
//!
//! # Two ways to decode
//!
//! - [`FrameCodec::decode`] works on a byte slice and reports *not ready*
//!   (`Ok(None)`) while the slice holds less than one full frame.  The caller
//!   keeps buffering and tries again.
//! - [`FrameReader::read_frame`] waits on an async byte stream until the whole
//!   frame has arrived, no matter how many partial reads that takes.
//!
//! Both reject a declared length above the configured maximum *before*
//! allocating the body buffer.  A peer that announces a 10 GB frame must not
//! be able to make us reserve 10 GB.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use crate::error::{CloseReason, Error};
use crate::protocol::codec::ProtocolError;

/// Default header width in bytes.
pub const DEFAULT_HEADER_LEN: usize = 16;

/// Default upper bound on a single frame body (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Turns frame bodies into `header ‖ body` and back.
///
/// # Examples
///
/// ```rust
/// use cmdwire_core::protocol::FrameCodec;
///
/// let codec = FrameCodec::default();
/// let wire = codec.encode_frame(b"$CMD$ping").unwrap();
/// assert_eq!(&wire[..16], b"9               ");
///
/// let (body, consumed) = codec.decode(&wire).unwrap().unwrap();
/// assert_eq!(body, b"$CMD$ping");
/// assert_eq!(consumed, wire.len());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    header_len: usize,
    max_frame_size: Option<usize>,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_HEADER_LEN)
    }
}

impl FrameCodec {
    /// Creates a codec with the given header width and the default size limit.
    pub fn new(header_len: usize) -> Self {
        Self {
            header_len: header_len.max(1),
            max_frame_size: Some(DEFAULT_MAX_FRAME_SIZE),
        }
    }

    /// Replaces the maximum accepted body length.
    pub fn with_max_frame_size(mut self, limit: usize) -> Self {
        self.max_frame_size = Some(limit);
        self
    }

    /// Removes the body length limit entirely.
    pub fn without_limit(mut self) -> Self {
        self.max_frame_size = None;
        self
    }

    pub fn header_len(&self) -> usize {
        self.header_len
    }

    pub fn max_frame_size(&self) -> Option<usize> {
        self.max_frame_size
    }

    /// Builds the fixed-width header announcing `body_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::HeaderOverflow`] if the decimal length needs
    /// more digits than the header has room for.
    pub fn encode_header(&self, body_len: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut header = body_len.to_string().into_bytes();
        if header.len() > self.header_len {
            return Err(ProtocolError::HeaderOverflow {
                body_len,
                header_len: self.header_len,
            });
        }
        header.resize(self.header_len, b' ');
        Ok(header)
    }

    /// Prefixes `body` with its header.
    pub fn encode_frame(&self, body: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        let mut wire = self.encode_header(body.len())?;
        wire.extend_from_slice(body);
        Ok(wire)
    }

    /// Parses a complete header into the declared body length.
    ///
    /// Leading/trailing ASCII spaces and NULs are ignored, so both the
    /// space-padded form we emit and zero-padded forms decode.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::CorruptHeader`] when the bytes are not a non-negative
    /// decimal integer, [`ProtocolError::OversizeFrame`] when the value exceeds
    /// the configured limit.
    pub fn parse_header(&self, header: &[u8]) -> Result<usize, ProtocolError> {
        let corrupt = || ProtocolError::CorruptHeader {
            header: String::from_utf8_lossy(header).into_owned(),
        };

        let text = std::str::from_utf8(header).map_err(|_| corrupt())?;
        let digits = text.trim_matches(|c: char| c == ' ' || c == '\0');
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(corrupt());
        }
        let declared: usize = digits.parse().map_err(|_| corrupt())?;

        if let Some(limit) = self.max_frame_size {
            if declared > limit {
                return Err(ProtocolError::OversizeFrame { declared, limit });
            }
        }
        Ok(declared)
    }

    /// Decodes one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` while `buf` does not yet contain a full header plus
    /// body.  On success returns the body and the number of bytes consumed
    /// (`header_len + L`).
    pub fn decode(&self, buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, ProtocolError> {
        if buf.len() < self.header_len {
            return Ok(None);
        }
        let body_len = self.parse_header(&buf[..self.header_len])?;
        let total = self
            .header_len
            .checked_add(body_len)
            .ok_or_else(|| unallocatable(body_len))?;
        if buf.len() < total {
            return Ok(None);
        }
        Ok(Some((buf[self.header_len..total].to_vec(), total)))
    }
}

/// A declared length no buffer can hold, even with the limit disabled.
fn unallocatable(declared: usize) -> ProtocolError {
    ProtocolError::OversizeFrame {
        declared,
        limit: isize::MAX as usize,
    }
}

// ── Async stream adapters ─────────────────────────────────────────────────────

/// Reads whole frames from an async byte stream.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, codec: FrameCodec) -> Self {
        Self { inner, codec }
    }

    /// Waits for the next complete frame and returns its body.
    ///
    /// Consumes exactly `header_len + L` bytes from the stream.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the stream ends before the header or
    ///   the body is complete.
    /// - [`Error::Protocol`] for a corrupt or oversize header.
    /// - [`Error::Transport`] for any other I/O failure.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>, Error> {
        let mut header = vec![0u8; self.codec.header_len()];
        self.fill(&mut header).await?;
        let body_len = self.codec.parse_header(&header)?;

        let mut body = Vec::new();
        body.try_reserve_exact(body_len).map_err(|_| unallocatable(body_len))?;
        body.resize(body_len, 0);
        self.fill(&mut body).await?;
        trace!(body_len, "frame read");
        Ok(body)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    async fn fill(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        if buf.is_empty() {
            return Ok(());
        }
        match self.inner.read_exact(buf).await {
            Ok(_) => Ok(()),
            Err(e) if is_peer_gone(&e) => Err(Error::ConnectionClosed(CloseReason::ClosedByPeer)),
            Err(e) => Err(Error::Transport(e)),
        }
    }
}

/// Writes whole frames to an async byte stream.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: W,
    codec: FrameCodec,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, codec: FrameCodec) -> Self {
        Self { inner, codec }
    }

    /// Frames `body` and writes it out in full.
    pub async fn write_frame(&mut self, body: &[u8]) -> Result<(), Error> {
        let wire = self.codec.encode_frame(body)?;
        self.write_wire(&wire).await
    }

    /// Writes bytes that already carry their header.
    pub async fn write_wire(&mut self, wire: &[u8]) -> Result<(), Error> {
        match self.inner.write_all(wire).await {
            Ok(()) => {}
            Err(e) if is_peer_gone(&e) => return Err(Error::ConnectionClosed(CloseReason::ClosedByPeer)),
            Err(e) => return Err(Error::Transport(e)),
        }
        self.inner.flush().await.map_err(Error::Transport)
    }

    /// Shuts down the write direction of the stream.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.inner.shutdown().await.map_err(Error::Transport)
    }
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────
