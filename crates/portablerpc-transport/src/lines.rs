//! Newline-delimited JSON over any async byte stream (pipes, sockets,
//! child-process stdio).

use std::io;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use portablerpc_core::errors::Result;
use portablerpc_core::{Disposable, Envelope, Listener, MessageFanout, Transport, TransportError};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Transport framing one JSON envelope per line.
///
/// A reader task decodes inbound lines and feeds subscribers; a writer task
/// drains an unbounded queue so [`Transport::send_message`] never blocks.
/// Lines that are not JSON, or longer than the configured limit, are
/// skipped.
pub struct LinesTransport {
    fanout: MessageFanout,
    outbound: mpsc::UnboundedSender<String>,
    shutdown: CancellationToken,
}

impl LinesTransport {
    /// Start reader and writer tasks over the given halves.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn spawn<R, W>(reader: R, writer: W, max_line_length: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let fanout = MessageFanout::new();
        let shutdown = CancellationToken::new();
        let (outbound, queue) = mpsc::unbounded_channel();

        let lines = FramedRead::new(reader, BoundedLines::new(max_line_length));
        drop(tokio::spawn(read_loop(
            lines,
            fanout.clone(),
            shutdown.clone(),
            max_line_length,
        )));

        let sink = FramedWrite::new(writer, LinesCodec::new());
        drop(tokio::spawn(write_loop(sink, queue, shutdown.clone())));

        Self {
            fanout,
            outbound,
            shutdown,
        }
    }

    /// Stop both tasks. Queued but unwritten lines are discarded; later
    /// sends fail with [`TransportError::Closed`].
    pub fn close(&self) {
        self.shutdown.cancel();
    }

    /// Whether the transport was closed locally or by a write failure.
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of live subscribers.
    pub fn listener_count(&self) -> usize {
        self.fanout.listener_count()
    }
}

enum Frame {
    Line(String),
    Oversized,
}

/// [`LinesCodec`] that reports over-long lines as a frame instead of an
/// error. `FramedRead` pauses the stream after any decoder error, which would
/// strand lines already buffered behind the oversized one.
struct BoundedLines {
    inner: LinesCodec,
}

impl BoundedLines {
    fn new(max_line_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_length),
        }
    }

    fn lift(decoded: std::result::Result<Option<String>, LinesCodecError>) -> io::Result<Option<Frame>> {
        match decoded {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(LinesCodecError::Io(error)) => Err(error),
        }
    }
}

impl Decoder for BoundedLines {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        Self::lift(self.inner.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> io::Result<Option<Frame>> {
        Self::lift(self.inner.decode_eof(buf))
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, BoundedLines>,
    fanout: MessageFanout,
    shutdown: CancellationToken,
    max_line_length: usize,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = frames.next() => next,
        };
        match next {
            Some(Ok(Frame::Line(line))) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(value) => {
                        let _ = fanout.fire(&value);
                    }
                    Err(error) => debug!(%error, "skipping unparseable line"),
                }
            }
            Some(Ok(Frame::Oversized)) => {
                debug!(max_line_length, "skipping oversized line");
            }
            Some(Err(error)) => {
                warn!(%error, "lines transport read failed");
                break;
            }
            None => {
                debug!("lines transport reached end of input");
                break;
            }
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, LinesCodec>,
    mut queue: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let line = tokio::select! {
            () = shutdown.cancelled() => break,
            line = queue.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        if let Err(error) = sink.send(line).await {
            warn!(%error, "lines transport write failed, closing");
            shutdown.cancel();
            break;
        }
    }
}

impl Transport for LinesTransport {
    fn send_message(&self, envelope: &Envelope) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let line = serde_json::to_string(envelope)?;
        self.outbound
            .send(line)
            .map_err(|_| TransportError::Closed)
    }

    fn on_message(&self, listener: Listener) -> Disposable {
        self.fanout.subscribe(listener)
    }
}

impl Drop for LinesTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for LinesTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinesTransport")
            .field("closed", &self.is_closed())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}
