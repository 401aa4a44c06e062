use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{self, Read, Write};

use crate::codec::{Decoder, Encoder};
use crate::error::{MsgError, Result};
use crate::transport::{Close, ReaderTaker, Writer};

/// Null stream at both layers.
///
/// Encodes and writes into nothing, decodes and reads nothing, and as a
/// taker closes every reader it is handed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Void;

impl Close for Void {
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

impl Encoder for Void {
    fn encode<T: Serialize + ?Sized>(&mut self, _value: &T) -> Result<()> {
        Ok(())
    }
}

impl Decoder for Void {
    fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        Err(MsgError::Eof)
    }
}

impl Read for Void {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

impl Write for Void {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer for Void {}

impl<R: Close> ReaderTaker<R> for Void {
    fn reader_take(&self, mut reader: R) -> Result<()> {
        reader.close()
    }
}
