use bytes::{Buf, Bytes, BytesMut};
use crossbeam::channel::{
    Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError, bounded,
};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{MsgError, Result};
use crate::transport::{
    BoxExchangeReader, BoxExchangeWriter, BoxReader, BoxWriter, Cancel, Close, ReaderChainer,
    ReaderGiver, ReaderTaker, TransportStats, Writer, WriterGiver,
};

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Configuration for the in-process exchange connection.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Messages queued towards the peer before senders block.
    pub capacity: usize,
    pub max_message_size: usize,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

impl ChannelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn without_read_timeout(mut self) -> Self {
        self.read_timeout = None;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }
}

/// A finalized message on its way to the peer.
struct Envelope {
    payload: Bytes,
    reply: Option<Sender<Bytes>>,
}

enum Taker {
    Plain(Arc<dyn ReaderTaker<BoxReader>>),
    Exchange(Arc<dyn ReaderTaker<BoxExchangeReader>>),
}

/// In-process message connection with request/reply exchanges (Layer 1).
///
/// Clones share the same queues, taker and statistics.
#[derive(Clone)]
pub struct ChannelConn {
    outbox: Sender<Envelope>,
    inbox: Receiver<Envelope>,
    taker: Arc<OnceLock<Taker>>,
    config: ChannelConfig,
    stats: Arc<Mutex<TransportStats>>,
    name: Arc<str>,
}

impl ChannelConn {
    /// Create a pair of connected endpoints.
    pub fn create_pair(name: impl Into<String>, config: ChannelConfig) -> Result<(Self, Self)> {
        let name = name.into();
        let capacity = config.capacity.max(1);

        let (tx1, rx1) = bounded(capacity);
        let (tx2, rx2) = bounded(capacity);

        let conn1 = Self {
            outbox: tx1,
            inbox: rx2,
            taker: Arc::new(OnceLock::new()),
            config: config.clone(),
            stats: Arc::new(Mutex::new(TransportStats::default())),
            name: format!("{}-client", name).into(),
        };

        let conn2 = Self {
            outbox: tx2,
            inbox: rx1,
            taker: Arc::new(OnceLock::new()),
            config,
            stats: Arc::new(Mutex::new(TransportStats::default())),
            name: format!("{}-server", name).into(),
        };

        Ok((conn1, conn2))
    }

    /// Wait for the next inbound message and hand it to the chained taker.
    ///
    /// Returns `Ok(false)` once the peer is gone and nothing is left to read.
    pub fn dispatch(&self) -> Result<bool> {
        let taker = self.taker.get().ok_or(MsgError::Unchained)?;

        let envelope = match self.config.read_timeout {
            Some(timeout) => match self.inbox.recv_timeout(timeout) {
                Ok(envelope) => envelope,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(MsgError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                        operation: "dispatch".into(),
                    });
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(false),
            },
            None => match self.inbox.recv() {
                Ok(envelope) => envelope,
                Err(_) => return Ok(false),
            },
        };

        {
            let mut stats = self.stats.lock();
            stats.messages_received += 1;
            stats.bytes_received += envelope.payload.len() as u64;
        }

        tracing::debug!(
            conn = %self.name,
            bytes = envelope.payload.len(),
            exchange = envelope.reply.is_some(),
            "dispatching inbound message"
        );

        match taker {
            Taker::Plain(taker) => {
                taker.reader_take(Box::new(ChannelReader::ready(envelope.payload)))?;
            }
            Taker::Exchange(taker) => {
                let reader = ChannelExchangeReader {
                    reader: ChannelReader::ready(envelope.payload),
                    reply: envelope.reply,
                    config: self.config.clone(),
                    stats: self.stats.clone(),
                };
                taker.reader_take(Box::new(reader))?;
            }
        }

        Ok(true)
    }

    /// Run [`dispatch`](Self::dispatch) on a background thread until the peer
    /// disconnects. Taker failures are logged and do not stop the loop.
    pub fn spawn_dispatcher(&self) -> Result<JoinHandle<Result<()>>> {
        let conn = self.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-dispatch", self.name))
            .spawn(move || {
                loop {
                    match conn.dispatch() {
                        Ok(true) => {}
                        Ok(false) => return Ok(()),
                        Err(MsgError::Timeout { .. }) => {}
                        Err(MsgError::Unchained) => return Err(MsgError::Unchained),
                        Err(e) => {
                            tracing::warn!(conn = %conn.name, error = %e, "reader taker failed");
                        }
                    }
                }
            })?;
        Ok(handle)
    }

    pub fn stats(&self) -> TransportStats {
        self.stats.lock().clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn chain(&self, taker: Taker) -> Result<()> {
        self.taker
            .set(taker)
            .map_err(|_| MsgError::AlreadyChained)
    }

    fn new_writer(&self, reply: Option<Sender<Bytes>>) -> ChannelWriter {
        ChannelWriter {
            buf: BytesMut::new(),
            target: Target::Peer {
                outbox: self.outbox.clone(),
                reply,
            },
            state: WriteState::Open,
            config: self.config.clone(),
            stats: self.stats.clone(),
        }
    }
}

impl ReaderChainer<BoxReader> for ChannelConn {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<BoxReader>>) -> Result<()> {
        self.chain(Taker::Plain(taker))
    }
}

impl ReaderChainer<BoxExchangeReader> for ChannelConn {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<BoxExchangeReader>>) -> Result<()> {
        self.chain(Taker::Exchange(taker))
    }
}

impl WriterGiver<BoxWriter> for ChannelConn {
    fn writer(&mut self) -> Result<BoxWriter> {
        Ok(Box::new(self.new_writer(None)))
    }
}

impl WriterGiver<BoxExchangeWriter> for ChannelConn {
    fn writer(&mut self) -> Result<BoxExchangeWriter> {
        let (tx, rx) = bounded(1);
        Ok(Box::new(ChannelExchangeWriter {
            writer: self.new_writer(Some(tx)),
            response: Some(rx),
            read_timeout: self.config.read_timeout,
        }))
    }
}

impl std::fmt::Debug for ChannelConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelConn")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

/// Inbound message of a [`ChannelConn`].
///
/// A reply reader starts out pending and blocks on its first read until the
/// peer finalizes the reply.
pub struct ChannelReader {
    data: Bytes,
    pending: Option<(Receiver<Bytes>, Option<Duration>)>,
    closed: bool,
}

impl ChannelReader {
    fn ready(payload: Bytes) -> Self {
        Self {
            data: payload,
            pending: None,
            closed: false,
        }
    }

    fn pending(rx: Receiver<Bytes>, timeout: Option<Duration>) -> Self {
        Self {
            data: Bytes::new(),
            pending: Some((rx, timeout)),
            closed: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let Some((rx, timeout)) = &self.pending else {
            return Ok(());
        };
        let aborted = || io::Error::new(io::ErrorKind::ConnectionAborted, MsgError::Cancelled);
        self.data = match timeout {
            Some(timeout) => rx.recv_timeout(*timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => io::Error::new(
                    io::ErrorKind::TimedOut,
                    MsgError::Timeout {
                        duration_ms: timeout.as_millis() as u64,
                        operation: "reply".into(),
                    },
                ),
                RecvTimeoutError::Disconnected => aborted(),
            })?,
            None => rx.recv().map_err(|_| aborted())?,
        };
        self.pending = None;
        Ok(())
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, MsgError::Closed));
        }
        self.fill()?;
        let n = buf.len().min(self.data.remaining());
        self.data.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl Close for ChannelReader {
    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.data.clear();
        self.pending = None;
        Ok(())
    }
}

/// Inbound exchange: the request plus a one-shot reply writer.
pub struct ChannelExchangeReader {
    reader: ChannelReader,
    reply: Option<Sender<Bytes>>,
    config: ChannelConfig,
    stats: Arc<Mutex<TransportStats>>,
}

impl Read for ChannelExchangeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl Close for ChannelExchangeReader {
    fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}

impl WriterGiver<BoxWriter> for ChannelExchangeReader {
    fn writer(&mut self) -> Result<BoxWriter> {
        let tx = self.reply.take().ok_or(MsgError::ReplyUnavailable)?;
        Ok(Box::new(ChannelWriter {
            buf: BytesMut::new(),
            target: Target::Reply(Some(tx)),
            state: WriteState::Open,
            config: self.config.clone(),
            stats: self.stats.clone(),
        }))
    }
}

enum Target {
    Peer {
        outbox: Sender<Envelope>,
        reply: Option<Sender<Bytes>>,
    },
    Reply(Option<Sender<Bytes>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Open,
    Sent,
    Cancelled,
}

/// Outbound message of a [`ChannelConn`], buffered until [`Close::close`].
///
/// Cancelling discards the buffer; nothing reaches the peer.
pub struct ChannelWriter {
    buf: BytesMut,
    target: Target,
    state: WriteState,
    config: ChannelConfig,
    stats: Arc<Mutex<TransportStats>>,
}

impl ChannelWriter {
    fn send(&mut self, payload: Bytes) -> Result<()> {
        let len = payload.len();
        match &mut self.target {
            Target::Peer { outbox, reply } => {
                let envelope = Envelope {
                    payload,
                    reply: reply.take(),
                };
                match self.config.write_timeout {
                    Some(timeout) => outbox.send_timeout(envelope, timeout).map_err(|e| match e {
                        SendTimeoutError::Timeout(_) => MsgError::Timeout {
                            duration_ms: timeout.as_millis() as u64,
                            operation: "send".into(),
                        },
                        SendTimeoutError::Disconnected(_) => MsgError::Disconnected,
                    })?,
                    None => outbox
                        .send(envelope)
                        .map_err(|_| MsgError::Disconnected)?,
                }
            }
            // the reply slot holds exactly one message, so this never blocks
            Target::Reply(tx) => tx
                .as_ref()
                .ok_or(MsgError::Closed)?
                .try_send(payload)
                .map_err(|e| match e {
                    TrySendError::Full(_) => MsgError::ReplyUnavailable,
                    TrySendError::Disconnected(_) => MsgError::Disconnected,
                })?,
        }

        let mut stats = self.stats.lock();
        stats.messages_sent += 1;
        stats.bytes_sent += len as u64;
        Ok(())
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.state != WriteState::Open {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, MsgError::Closed));
        }
        let size = self.buf.len() + data.len();
        if size > self.config.max_message_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                MsgError::MessageTooLarge {
                    size,
                    max: self.config.max_message_size,
                },
            ));
        }
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Close for ChannelWriter {
    fn close(&mut self) -> Result<()> {
        if self.state != WriteState::Open {
            return Ok(());
        }
        self.state = WriteState::Sent;
        let payload = self.buf.split().freeze();
        tracing::trace!(bytes = payload.len(), "sending message");
        self.send(payload)
    }
}

impl Cancel for ChannelWriter {
    fn cancel(&mut self) -> Result<()> {
        match self.state {
            WriteState::Open => {
                self.state = WriteState::Cancelled;
                self.buf.clear();
                // dropping the reply sender tells a waiting requester the reply is gone
                match &mut self.target {
                    Target::Peer { reply, .. } => drop(reply.take()),
                    Target::Reply(tx) => drop(tx.take()),
                }
                self.stats.lock().messages_cancelled += 1;
                tracing::trace!("message cancelled");
                Ok(())
            }
            WriteState::Cancelled => Ok(()),
            WriteState::Sent => Err(MsgError::Closed),
        }
    }
}

impl Writer for ChannelWriter {
    fn as_canceler(&mut self) -> Option<&mut dyn Cancel> {
        Some(self)
    }
}

/// Outbound exchange: the request plus the reader of its reply.
pub struct ChannelExchangeWriter {
    writer: ChannelWriter,
    response: Option<Receiver<Bytes>>,
    read_timeout: Option<Duration>,
}

impl Write for ChannelExchangeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writer.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Close for ChannelExchangeWriter {
    fn close(&mut self) -> Result<()> {
        self.writer.close()
    }
}

impl Cancel for ChannelExchangeWriter {
    fn cancel(&mut self) -> Result<()> {
        self.response = None;
        self.writer.cancel()
    }
}

impl Writer for ChannelExchangeWriter {
    fn as_canceler(&mut self) -> Option<&mut dyn Cancel> {
        Some(self)
    }
}

impl ReaderGiver<BoxReader> for ChannelExchangeWriter {
    /// Finalizes the request if still open, then hands out the reply reader
    /// (once).
    fn reader(&mut self) -> Result<BoxReader> {
        if self.writer.state == WriteState::Cancelled {
            return Err(MsgError::Cancelled);
        }
        self.writer.close()?;
        let rx = self.response.take().ok_or(MsgError::ReplyUnavailable)?;
        Ok(Box::new(ChannelReader::pending(rx, self.read_timeout)))
    }
}
