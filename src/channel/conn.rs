//! Typed connections assembled from a byte-level connection.

use std::sync::Arc;

use super::exchange::{
    TypedExchangeReaderChainer, TypedExchangeWriterGiver, exchange_reader_chainer_of,
};
use super::plain::{TypedReaderChainer, TypedWriterGiver, reader_chainer_of};
use crate::codec::Codec;
use crate::error::Result;
use crate::transport::{
    BoxExchangeReader, BoxExchangeWriter, BoxReader, BoxWriter, ReaderChainer, ReaderTaker,
    WriterGiver,
};

/// A connection made of a separate chainer and giver.
#[derive(Debug, Clone)]
pub struct ConnBlock<RC, WG> {
    pub chainer: RC,
    pub giver: WG,
}

impl<RC, WG> ConnBlock<RC, WG> {
    pub fn new(chainer: RC, giver: WG) -> Self {
        Self { chainer, giver }
    }
}

impl<R, RC: ReaderChainer<R>, WG> ReaderChainer<R> for ConnBlock<RC, WG> {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<R>>) -> Result<()> {
        self.chainer.reader_chain(taker)
    }
}

impl<W, RC, WG: WriterGiver<W>> WriterGiver<W> for ConnBlock<RC, WG> {
    fn writer(&mut self) -> Result<W> {
        self.giver.writer()
    }
}

pub type TypedConn<B, C> = ConnBlock<Arc<TypedReaderChainer<C>>, TypedWriterGiver<B, C>>;

pub type TypedExchangeConn<B, C> =
    ConnBlock<Arc<TypedExchangeReaderChainer<C>>, TypedExchangeWriterGiver<B, C>>;

/// Typed view of `conn`.
///
/// Registers the typed chainer as the inbound taker of `conn`; a byte-level
/// connection accepts this once.
pub fn conn_of<B, C>(conn: B, codec: C) -> Result<TypedConn<B, C>>
where
    B: ReaderChainer<BoxReader> + WriterGiver<BoxWriter>,
    C: Codec,
{
    let chainer = reader_chainer_of(&conn, codec.clone())?;
    Ok(ConnBlock::new(chainer, TypedWriterGiver::new(conn, codec)))
}

/// Typed exchange view of `conn`. Same registration rule as [`conn_of`].
pub fn exchange_conn_of<B, C>(conn: B, codec: C) -> Result<TypedExchangeConn<B, C>>
where
    B: ReaderChainer<BoxExchangeReader> + WriterGiver<BoxExchangeWriter>,
    C: Codec,
{
    let chainer = exchange_reader_chainer_of(&conn, codec.clone())?;
    Ok(ConnBlock::new(chainer, TypedExchangeWriterGiver::new(conn, codec)))
}
