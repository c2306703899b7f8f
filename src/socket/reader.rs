//! TCP connect and newline-delimited reading.
//!
//! Lines are decoded lossily: bytes that are not valid UTF-8 become U+FFFD
//! instead of failing the read. A line longer than the configured maximum is
//! discarded up to its newline and reported with a warning; the connection
//! stays up.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures_util::stream::{self, Stream};
use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio::net::{TcpSocket, TcpStream};
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use super::resolver::Endpoint;
use crate::error::BridgeError;

/// Longest accepted line, terminator excluded.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// `true` for lines that carry a record; blank and whitespace-only lines
/// are not records.
pub fn is_content_line(line: &str) -> bool {
    !line.trim().is_empty()
}

/// Connect to `endpoint` with TCP keep-alive enabled.
///
/// `host` is only used for error context.
pub async fn open(
    host: &str,
    endpoint: Endpoint,
    cancel: &CancellationToken,
) -> Result<TcpStream, BridgeError> {
    let conn_err = |source: std::io::Error| BridgeError::Connection {
        host: host.to_string(),
        port: endpoint.addr.port(),
        source,
    };

    let socket = match endpoint.addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(conn_err)?;
    socket.set_keepalive(true).map_err(conn_err)?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BridgeError::Cancelled),
        res = socket.connect(endpoint.addr) => res.map_err(conn_err),
    }
}

// ---------------------------------------------------------------------------
// FeedLineCodec
// ---------------------------------------------------------------------------

/// One decoded unit of the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedFrame {
    /// A line with its `\n` or `\r\n` terminator removed.
    Line(String),
    /// A line over the length limit; `discarded` bytes were dropped.
    Overlong { discarded: usize },
}

/// Newline framing with lossy UTF-8 and a length cap.
#[derive(Debug, Clone)]
pub struct FeedLineCodec {
    max_length: usize,
    // bytes already scanned for a newline
    next_index: usize,
    discarding: bool,
    discarded: usize,
}

impl FeedLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
            discarded: 0,
        }
    }

    fn finish_discard(&mut self) -> FeedFrame {
        self.discarding = false;
        FeedFrame::Overlong {
            discarded: std::mem::take(&mut self.discarded),
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

impl Decoder for FeedLineCodec {
    type Item = FeedFrame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<FeedFrame>, io::Error> {
        let newline = buf[self.next_index..]
            .iter()
            .position(|b| *b == b'\n')
            .map(|i| i + self.next_index);

        match newline {
            Some(end) if self.discarding || end > self.max_length => {
                self.discarding = true;
                self.discarded += end + 1;
                buf.advance(end + 1);
                self.next_index = 0;
                Ok(Some(self.finish_discard()))
            }
            Some(end) => {
                let line = buf.split_to(end + 1);
                self.next_index = 0;
                Ok(Some(FeedFrame::Line(decode_line(&line[..end]))))
            }
            None if self.discarding || buf.len() > self.max_length => {
                self.discarding = true;
                self.discarded += buf.len();
                buf.clear();
                self.next_index = 0;
                Ok(None)
            }
            None => {
                self.next_index = buf.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<FeedFrame>, io::Error> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if self.discarding {
            return Ok(Some(self.finish_discard()));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let line = buf.split_to(buf.len());
        Ok(Some(FeedFrame::Line(decode_line(&line))))
    }
}

// ---------------------------------------------------------------------------
// SocketLineReader
// ---------------------------------------------------------------------------

/// Reads non-blank lines from one connection.
///
/// Every fetch restarts the idle window, so the timeout measures silence
/// between messages rather than connection age. Dropping the reader closes
/// the connection.
pub struct SocketLineReader<R = TcpStream> {
    frames: FramedRead<R, FeedLineCodec>,
    idle_timeout: Duration,
}

impl<R: AsyncRead + Unpin> SocketLineReader<R> {
    pub fn new(stream: R, idle_timeout: Duration) -> Self {
        Self::with_max_line_length(stream, idle_timeout, DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(stream: R, idle_timeout: Duration, max_length: usize) -> Self {
        Self {
            frames: FramedRead::new(stream, FeedLineCodec::new(max_length)),
            idle_timeout,
        }
    }

    /// Next content line, `Ok(None)` once the peer closes the stream.
    ///
    /// # Errors
    /// - [`BridgeError::IdleTimeout`] when nothing arrives within the window.
    /// - [`BridgeError::Cancelled`] when `cancel` fires.
    /// - [`BridgeError::Io`] on a read fault.
    pub async fn next_line(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, BridgeError> {
        loop {
            let read = tokio::time::timeout(self.idle_timeout, self.frames.next());
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BridgeError::Cancelled),
                res = read => match res {
                    Err(_) => return Err(BridgeError::IdleTimeout(self.idle_timeout)),
                    Ok(frame) => frame.transpose()?,
                },
            };

            match frame {
                None => return Ok(None),
                Some(FeedFrame::Line(line)) if is_content_line(&line) => return Ok(Some(line)),
                Some(FeedFrame::Line(_)) => trace!("Blank line ignored"),
                Some(FeedFrame::Overlong { discarded }) => {
                    warn!(
                        discarded,
                        max_length = self.frames.decoder().max_length,
                        "Line exceeds the maximum length, dropped"
                    );
                }
            }
        }
    }

    /// Turn the reader into a lazy stream of lines.
    ///
    /// The stream ends after the peer closes the connection or right after
    /// yielding the first error.
    pub fn into_lines(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<String, BridgeError>> {
        stream::unfold(Some(self), move |state| {
            let cancel = cancel.clone();
            async move {
                let mut reader = state?;
                match reader.next_line(&cancel).await {
                    Ok(Some(line)) => Some((Ok(line), Some(reader))),
                    Ok(None) => None,
                    Err(e) => Some((Err(e), None)),
                }
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
