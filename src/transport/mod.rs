//! Layer 1: byte-level message primitives.
//!
//! A message is a byte stream with an explicit end: a [`Writer`] is finalized
//! by [`Close::close`], a [`Reader`] is released by it. Exchanges pair one
//! direction with a giver for the other one, so a request writer can hand back
//! the reader of its reply and vice versa.

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::Result;

pub mod channel;
pub mod shared;

pub use shared::{NoClose, Shared};

/// Release (and for writers, finalize) the resource behind a stream.
pub trait Close {
    fn close(&mut self) -> Result<()>;
}

/// Abort an in-flight message instead of finalizing it.
///
/// Optional capability of a [`Writer`], discovered through
/// [`Writer::as_canceler`].
pub trait Cancel {
    fn cancel(&mut self) -> Result<()>;
}

/// Inbound byte message.
pub trait Reader: Read + Close + Send {}

impl<T: Read + Close + Send + ?Sized> Reader for T {}

/// Outbound byte message.
pub trait Writer: Write + Close + Send {
    /// Capability query for [`Cancel`].
    fn as_canceler(&mut self) -> Option<&mut dyn Cancel> {
        None
    }
}

/// Produces readers on demand.
pub trait ReaderGiver<R> {
    fn reader(&mut self) -> Result<R>;
}

/// Produces writers on demand.
pub trait WriterGiver<W> {
    fn writer(&mut self) -> Result<W>;
}

/// Receives inbound readers. May be called from any thread.
pub trait ReaderTaker<R>: Send + Sync {
    fn reader_take(&self, reader: R) -> Result<()>;
}

/// Delivers every inbound reader to one registered [`ReaderTaker`].
pub trait ReaderChainer<R> {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<R>>) -> Result<()>;
}

/// A connection: inbound readers are chained, outbound writers are given.
pub trait Conn<R, W>: ReaderChainer<R> + WriterGiver<W> {}

impl<T, R, W> Conn<R, W> for T where T: ReaderChainer<R> + WriterGiver<W> + ?Sized {}

pub type BoxReader = Box<dyn Reader>;
pub type BoxWriter = Box<dyn Writer>;

/// Request reader that can give the writer for its reply.
pub trait ExchangeReader: Reader + WriterGiver<BoxWriter> {}

impl<T: Reader + WriterGiver<BoxWriter> + ?Sized> ExchangeReader for T {}

/// Request writer that can give the reader for its reply.
pub trait ExchangeWriter: Writer + ReaderGiver<BoxReader> {}

impl<T: Writer + ReaderGiver<BoxReader> + ?Sized> ExchangeWriter for T {}

pub type BoxExchangeReader = Box<dyn ExchangeReader>;
pub type BoxExchangeWriter = Box<dyn ExchangeWriter>;

/// Statistics collected by connection implementations
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_cancelled: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for TransportStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Transport Statistics:")?;
        writeln!(f, "  Messages sent:      {}", self.messages_sent)?;
        writeln!(f, "  Messages received:  {}", self.messages_received)?;
        writeln!(f, "  Messages cancelled: {}", self.messages_cancelled)?;
        writeln!(f, "  Bytes sent:         {}", self.bytes_sent)?;
        writeln!(f, "  Bytes received:     {}", self.bytes_received)?;
        Ok(())
    }
}

impl<T: Close + ?Sized> Close for Box<T> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl<T: Cancel + ?Sized> Cancel for Box<T> {
    fn cancel(&mut self) -> Result<()> {
        (**self).cancel()
    }
}

impl<T: Writer + ?Sized> Writer for Box<T> {
    fn as_canceler(&mut self) -> Option<&mut dyn Cancel> {
        (**self).as_canceler()
    }
}

impl<R, T: ReaderGiver<R> + ?Sized> ReaderGiver<R> for Box<T> {
    fn reader(&mut self) -> Result<R> {
        (**self).reader()
    }
}

impl<W, T: WriterGiver<W> + ?Sized> WriterGiver<W> for Box<T> {
    fn writer(&mut self) -> Result<W> {
        (**self).writer()
    }
}

impl<R, T: ReaderTaker<R> + ?Sized> ReaderTaker<R> for Box<T> {
    fn reader_take(&self, reader: R) -> Result<()> {
        (**self).reader_take(reader)
    }
}

impl<R, T: ReaderTaker<R> + ?Sized> ReaderTaker<R> for Arc<T> {
    fn reader_take(&self, reader: R) -> Result<()> {
        (**self).reader_take(reader)
    }
}

impl<R, T: ReaderChainer<R> + ?Sized> ReaderChainer<R> for Box<T> {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<R>>) -> Result<()> {
        (**self).reader_chain(taker)
    }
}

impl<R, T: ReaderChainer<R> + ?Sized> ReaderChainer<R> for Arc<T> {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<R>>) -> Result<()> {
        (**self).reader_chain(taker)
    }
}
