//! Typed givers and chainers over their byte-level counterparts.

use std::sync::{Arc, OnceLock};

use crate::codec::Codec;
use crate::error::{MsgError, Result};
use crate::transport::{
    BoxReader, BoxWriter, Close, ReaderChainer, ReaderGiver, ReaderTaker, WriterGiver,
};

/// Typed [`ReaderGiver`]: each byte reader from `G` is bound to the codec.
#[derive(Debug, Clone)]
pub struct TypedReaderGiver<G, C> {
    giver: G,
    codec: C,
}

impl<G, C> TypedReaderGiver<G, C> {
    pub fn new(giver: G, codec: C) -> Self {
        Self { giver, codec }
    }
}

impl<G: ReaderGiver<BoxReader>, C: Codec> ReaderGiver<C::Decoder> for TypedReaderGiver<G, C> {
    fn reader(&mut self) -> Result<C::Decoder> {
        let reader = self.giver.reader()?;
        self.codec.decoder(reader)
    }
}

/// Typed [`WriterGiver`]: each byte writer from `G` is bound to the codec.
#[derive(Debug, Clone)]
pub struct TypedWriterGiver<G, C> {
    giver: G,
    codec: C,
}

impl<G, C> TypedWriterGiver<G, C> {
    pub fn new(giver: G, codec: C) -> Self {
        Self { giver, codec }
    }
}

impl<G: WriterGiver<BoxWriter>, C: Codec> WriterGiver<C::Encoder> for TypedWriterGiver<G, C> {
    fn writer(&mut self) -> Result<C::Encoder> {
        let writer = self.giver.writer()?;
        self.codec.encoder(writer)
    }
}

/// Typed [`ReaderChainer`].
///
/// Registered as the taker of a byte-level chainer; every inbound byte reader
/// is bound to the codec and forwarded to the typed taker chained here. The
/// typed taker must be chained before traffic arrives.
pub struct TypedReaderChainer<C: Codec> {
    taker: OnceLock<Arc<dyn ReaderTaker<C::Decoder>>>,
    codec: C,
}

impl<C: Codec> TypedReaderChainer<C> {
    pub fn new(codec: C) -> Self {
        Self {
            taker: OnceLock::new(),
            codec,
        }
    }
}

impl<C: Codec> ReaderChainer<C::Decoder> for TypedReaderChainer<C> {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<C::Decoder>>) -> Result<()> {
        self.taker.set(taker).map_err(|_| MsgError::AlreadyChained)
    }
}

impl<C: Codec> ReaderTaker<BoxReader> for TypedReaderChainer<C> {
    fn reader_take(&self, reader: BoxReader) -> Result<()> {
        let Some(taker) = self.taker.get() else {
            return unchained(reader);
        };
        let decoder = self.codec.decoder(reader)?;
        taker.reader_take(decoder)
    }
}

impl<C: Codec> std::fmt::Debug for TypedReaderChainer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedReaderChainer")
            .field("chained", &self.taker.get().is_some())
            .field("codec", &self.codec)
            .finish()
    }
}

/// Inbound traffic before registration is a caller error: report it and
/// release the reader rather than dropping it unnoticed.
pub(crate) fn unchained<R: Close>(mut reader: R) -> Result<()> {
    tracing::error!("inbound reader arrived before a taker was chained");
    MsgError::join([Err(MsgError::Unchained), reader.close()])
}

pub fn reader_giver_of<G, C>(giver: G, codec: C) -> TypedReaderGiver<G, C>
where
    G: ReaderGiver<BoxReader>,
    C: Codec,
{
    TypedReaderGiver::new(giver, codec)
}

pub fn writer_giver_of<G, C>(giver: G, codec: C) -> TypedWriterGiver<G, C>
where
    G: WriterGiver<BoxWriter>,
    C: Codec,
{
    TypedWriterGiver::new(giver, codec)
}

/// Chain a new [`TypedReaderChainer`] onto `chainer`.
///
/// The returned chainer is also the byte-level taker registered on `chainer`.
pub fn reader_chainer_of<RC, C>(chainer: &RC, codec: C) -> Result<Arc<TypedReaderChainer<C>>>
where
    RC: ReaderChainer<BoxReader> + ?Sized,
    C: Codec,
{
    let typed = Arc::new(TypedReaderChainer::new(codec));
    chainer.reader_chain(typed.clone())?;
    Ok(typed)
}
