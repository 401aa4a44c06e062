//! Adapters that split one byte resource across several roles.

use parking_lot::{Mutex, MutexGuard};
use std::io::{self, Read, Write};
use std::sync::Arc;

use super::{Cancel, Close, ReaderGiver, Writer, WriterGiver};
use crate::error::Result;

/// One byte resource reachable from several handles.
///
/// An exchange is a single resource playing two parts: the stream a codec
/// reads or writes, and the giver of the opposite direction. Each handle
/// locks the resource for the duration of one call.
pub struct Shared<T: ?Sized>(Arc<Mutex<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(Arc::new(Mutex::new(inner)))
    }
}

impl<T: ?Sized> Shared<T> {
    /// Direct access, e.g. for capability queries.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.0.lock()
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: Read + ?Sized> Read for Shared<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.lock().read(buf)
    }
}

impl<T: Write + ?Sized> Write for Shared<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.lock().flush()
    }
}

impl<T: Close + ?Sized> Close for Shared<T> {
    fn close(&mut self) -> Result<()> {
        self.0.lock().close()
    }
}

impl<T: Cancel + ?Sized> Cancel for Shared<T> {
    fn cancel(&mut self) -> Result<()> {
        self.0.lock().cancel()
    }
}

impl<R, T: ReaderGiver<R> + ?Sized> ReaderGiver<R> for Shared<T> {
    fn reader(&mut self) -> Result<R> {
        self.0.lock().reader()
    }
}

impl<W, T: WriterGiver<W> + ?Sized> WriterGiver<W> for Shared<T> {
    fn writer(&mut self) -> Result<W> {
        self.0.lock().writer()
    }
}

/// Writer whose [`Close`] does nothing.
///
/// Handed to a codec that closes its stream once a value is done, while the
/// real finalize-or-cancel decision is taken by whoever holds the inner
/// writer through another handle. The cancel capability is hidden as well.
pub struct NoClose<W>(W);

impl<W> NoClose<W> {
    pub fn new(inner: W) -> Self {
        Self(inner)
    }
}

impl<W: Write> Write for NoClose<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<W> Close for NoClose<W> {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<W: Write + Send> Writer for NoClose<W> {}
