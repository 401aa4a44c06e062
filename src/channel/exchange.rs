//! Typed exchanges.
//!
//! An outbound exchange ends one of two ways. Requesting the reply reader
//! finalizes the request; closing without ever asking for the reply abandons
//! it, and the underlying writer is cancelled when it supports that, so the
//! peer is not left producing a reply nobody reads.

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use serde::de::DeserializeOwned;

use super::plain::{TypedReaderGiver, TypedWriterGiver, unchained};
use crate::codec::{Codec, Decoder, Encoder};
use crate::error::{MsgError, Result};
use crate::transport::{
    BoxExchangeReader, BoxExchangeWriter, Close, NoClose, ReaderChainer, ReaderGiver,
    ReaderTaker, Shared, Writer, WriterGiver,
};

/// Inbound typed exchange: decodes the request and gives the reply encoder.
pub struct TypedExchangeReader<C: Codec> {
    decoder: C::Decoder,
    giver: TypedWriterGiver<Shared<BoxExchangeReader>, C>,
}

impl<C: Codec> TypedExchangeReader<C> {
    pub fn new(reader: BoxExchangeReader, codec: C) -> Result<Self> {
        let shared = Shared::new(reader);
        let decoder = codec.decoder(Box::new(shared.clone()))?;
        Ok(Self {
            decoder,
            giver: TypedWriterGiver::new(shared, codec),
        })
    }
}

impl<C: Codec> Decoder for TypedExchangeReader<C> {
    fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.decoder.decode()
    }
}

impl<C: Codec> Close for TypedExchangeReader<C> {
    fn close(&mut self) -> Result<()> {
        self.decoder.close()
    }
}

impl<C: Codec> WriterGiver<C::Encoder> for TypedExchangeReader<C> {
    fn writer(&mut self) -> Result<C::Encoder> {
        self.giver.writer()
    }
}

/// Typed counterpart of a byte-level exchange chainer.
pub struct TypedExchangeReaderChainer<C: Codec> {
    taker: OnceLock<Arc<dyn ReaderTaker<TypedExchangeReader<C>>>>,
    codec: C,
}

impl<C: Codec> TypedExchangeReaderChainer<C> {
    pub fn new(codec: C) -> Self {
        Self {
            taker: OnceLock::new(),
            codec,
        }
    }
}

impl<C: Codec> ReaderChainer<TypedExchangeReader<C>> for TypedExchangeReaderChainer<C> {
    fn reader_chain(&self, taker: Arc<dyn ReaderTaker<TypedExchangeReader<C>>>) -> Result<()> {
        self.taker.set(taker).map_err(|_| MsgError::AlreadyChained)
    }
}

impl<C: Codec> ReaderTaker<BoxExchangeReader> for TypedExchangeReaderChainer<C> {
    fn reader_take(&self, reader: BoxExchangeReader) -> Result<()> {
        let Some(taker) = self.taker.get() else {
            return unchained(reader);
        };
        let reader = TypedExchangeReader::new(reader, self.codec.clone())?;
        taker.reader_take(reader)
    }
}

impl<C: Codec> std::fmt::Debug for TypedExchangeReaderChainer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedExchangeReaderChainer")
            .field("chained", &self.taker.get().is_some())
            .field("codec", &self.codec)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeState {
    Open,
    /// The request was finalized by asking for the reply.
    Finalized,
    Closed,
}

/// Outbound typed exchange.
///
/// The encoder writes through a [`NoClose`] mask, so finishing a value never
/// finalizes the request by itself. The real writer is kept to either
/// finalize it ([`ReaderGiver::reader`]) or abandon it ([`Close::close`]
/// while still open). Dropping an open exchange abandons it.
pub struct TypedExchangeWriter<C: Codec> {
    encoder: C::Encoder,
    exchange: Shared<BoxExchangeWriter>,
    giver: TypedReaderGiver<Shared<BoxExchangeWriter>, C>,
    state: ExchangeState,
}

impl<C: Codec> TypedExchangeWriter<C> {
    pub fn new(writer: BoxExchangeWriter, codec: C) -> Result<Self> {
        let exchange = Shared::new(writer);
        let encoder = match codec.encoder(Box::new(NoClose::new(exchange.clone()))) {
            Ok(encoder) => encoder,
            Err(err) => {
                return Err(match abandon(&mut *exchange.lock()) {
                    Ok(()) => err,
                    Err(released) => MsgError::Multiple(vec![err, released]),
                });
            }
        };
        Ok(Self {
            encoder,
            giver: TypedReaderGiver::new(exchange.clone(), codec),
            exchange,
            state: ExchangeState::Open,
        })
    }

    /// Whether the reply has been requested.
    pub fn is_finalized(&self) -> bool {
        self.state == ExchangeState::Finalized
    }
}

impl<C: Codec> Encoder for TypedExchangeWriter<C> {
    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        if self.state != ExchangeState::Open {
            return Err(MsgError::Closed);
        }
        self.encoder.encode(value)
    }
}

impl<C: Codec> ReaderGiver<C::Decoder> for TypedExchangeWriter<C> {
    fn reader(&mut self) -> Result<C::Decoder> {
        match self.state {
            ExchangeState::Open => {
                // a failed finalize leaves the exchange open; no reply is requested
                self.encoder.close()?;
                self.exchange.close()?;
                self.state = ExchangeState::Finalized;
            }
            ExchangeState::Finalized => {}
            ExchangeState::Closed => return Err(MsgError::Closed),
        }
        self.giver.reader()
    }
}

impl<C: Codec> Close for TypedExchangeWriter<C> {
    fn close(&mut self) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ExchangeState::Closed);
        if state != ExchangeState::Open {
            return Ok(());
        }

        let mut exchange = self.exchange.lock();
        if let Some(canceler) = exchange.as_canceler() {
            tracing::trace!("cancelling exchange closed before its reply was requested");
            return canceler.cancel();
        }
        drop(exchange);

        MsgError::join([self.encoder.close(), self.exchange.close()])
    }
}

impl<C: Codec> Drop for TypedExchangeWriter<C> {
    fn drop(&mut self) {
        if self.state != ExchangeState::Open {
            return;
        }
        if let Err(e) = self.close() {
            tracing::warn!(error = %e, "failed to release abandoned exchange");
        }
    }
}

/// Cancel if possible, close otherwise.
fn abandon<W: Writer + ?Sized>(writer: &mut W) -> Result<()> {
    match writer.as_canceler() {
        Some(canceler) => canceler.cancel(),
        None => writer.close(),
    }
}

/// Typed [`WriterGiver`] of exchanges.
#[derive(Debug, Clone)]
pub struct TypedExchangeWriterGiver<G, C> {
    giver: G,
    codec: C,
}

impl<G, C> TypedExchangeWriterGiver<G, C> {
    pub fn new(giver: G, codec: C) -> Self {
        Self { giver, codec }
    }
}

impl<G, C> WriterGiver<TypedExchangeWriter<C>> for TypedExchangeWriterGiver<G, C>
where
    G: WriterGiver<BoxExchangeWriter>,
    C: Codec,
{
    fn writer(&mut self) -> Result<TypedExchangeWriter<C>> {
        let writer = self.giver.writer()?;
        TypedExchangeWriter::new(writer, self.codec.clone())
    }
}

pub fn exchange_reader_of<C: Codec>(
    reader: BoxExchangeReader,
    codec: C,
) -> Result<TypedExchangeReader<C>> {
    TypedExchangeReader::new(reader, codec)
}

pub fn exchange_writer_of<C: Codec>(
    writer: BoxExchangeWriter,
    codec: C,
) -> Result<TypedExchangeWriter<C>> {
    TypedExchangeWriter::new(writer, codec)
}

pub fn exchange_writer_giver_of<G, C>(giver: G, codec: C) -> TypedExchangeWriterGiver<G, C>
where
    G: WriterGiver<BoxExchangeWriter>,
    C: Codec,
{
    TypedExchangeWriterGiver::new(giver, codec)
}

/// Chain a new [`TypedExchangeReaderChainer`] onto `chainer`.
pub fn exchange_reader_chainer_of<RC, C>(
    chainer: &RC,
    codec: C,
) -> Result<Arc<TypedExchangeReaderChainer<C>>>
where
    RC: ReaderChainer<BoxExchangeReader> + ?Sized,
    C: Codec,
{
    let typed = Arc::new(TypedExchangeReaderChainer::new(codec));
    chainer.reader_chain(typed.clone())?;
    Ok(typed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{JsonCodec, JsonDecoder};
    use crate::transport::channel::{ChannelConfig, ChannelConn};
    use crate::transport::{BoxReader, BoxWriter, Cancel};
    use parking_lot::Mutex;
    use serde::Deserialize;
    use std::io::{self, Cursor, Read, Write};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u64,
        name: String,
    }

    fn record() -> Record {
        Record {
            id: 7,
            name: "a".to_string(),
        }
    }

    #[derive(Debug, Default)]
    struct Events {
        data: Vec<u8>,
        closes: usize,
        cancels: usize,
        readers: usize,
    }

    /// Exchange writer that records what happens to it.
    struct Recorder {
        events: Arc<Mutex<Events>>,
        cancelable: bool,
        fail_close: bool,
        reply: Vec<u8>,
    }

    impl Recorder {
        fn new(cancelable: bool) -> (Self, Arc<Mutex<Events>>) {
            let events = Arc::new(Mutex::new(Events::default()));
            let recorder = Self {
                events: events.clone(),
                cancelable,
                fail_close: false,
                reply: b"{\"id\":8,\"name\":\"b\"}\n".to_vec(),
            };
            (recorder, events)
        }
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.events.lock().data.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Close for Recorder {
        fn close(&mut self) -> Result<()> {
            self.events.lock().closes += 1;
            if self.fail_close {
                return Err(MsgError::Disconnected);
            }
            Ok(())
        }
    }

    impl Cancel for Recorder {
        fn cancel(&mut self) -> Result<()> {
            self.events.lock().cancels += 1;
            Ok(())
        }
    }

    impl Writer for Recorder {
        fn as_canceler(&mut self) -> Option<&mut dyn Cancel> {
            if self.cancelable { Some(self) } else { None }
        }
    }

    struct Canned(Cursor<Vec<u8>>);

    impl Read for Canned {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Close for Canned {
        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    impl ReaderGiver<BoxReader> for Recorder {
        fn reader(&mut self) -> Result<BoxReader> {
            self.events.lock().readers += 1;
            Ok(Box::new(Canned(Cursor::new(self.reply.clone()))))
        }
    }

    /// JSON codec whose encoders always fail to close.
    #[derive(Debug, Clone, Copy)]
    struct StuckCodec;

    struct StuckEncoder(BoxWriter);

    impl Encoder for StuckEncoder {
        fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
            serde_json::to_writer(&mut self.0, value)?;
            Ok(())
        }
    }

    impl Close for StuckEncoder {
        fn close(&mut self) -> Result<()> {
            Err(MsgError::Serialization("encoder stuck".to_string()))
        }
    }

    impl Codec for StuckCodec {
        type Decoder = JsonDecoder;
        type Encoder = StuckEncoder;

        fn decoder(&self, reader: BoxReader) -> Result<JsonDecoder> {
            Ok(JsonDecoder::new(reader))
        }

        fn encoder(&self, writer: BoxWriter) -> Result<StuckEncoder> {
            Ok(StuckEncoder(writer))
        }
    }

    #[test]
    fn test_close_without_reader_cancels() {
        let (recorder, events) = Recorder::new(true);
        let mut w = exchange_writer_of(Box::new(recorder), JsonCodec).unwrap();
        w.encode(&record()).unwrap();
        w.close().unwrap();

        let events = events.lock();
        assert_eq!(events.cancels, 1);
        assert_eq!(events.closes, 0);
        assert_eq!(events.readers, 0);
        assert!(!events.data.is_empty());
    }

    #[test]
    fn test_reader_then_close_finalizes_once() {
        let (recorder, events) = Recorder::new(true);
        let mut w = exchange_writer_of(Box::new(recorder), JsonCodec).unwrap();
        w.encode(&record()).unwrap();

        let mut reply = w.reader().unwrap();
        assert!(w.is_finalized());
        let got: Record = reply.decode().unwrap();
        assert_eq!(
            got,
            Record {
                id: 8,
                name: "b".to_string()
            }
        );

        w.close().unwrap();
        w.close().unwrap();

        let events = events.lock();
        assert_eq!(events.closes, 1);
        assert_eq!(events.cancels, 0);
        assert_eq!(events.readers, 1);
    }

    #[test]
    fn test_encode_after_reader_is_rejected() {
        let (recorder, _events) = Recorder::new(true);
        let mut w = exchange_writer_of(Box::new(recorder), JsonCodec).unwrap();
        let _reply = w.reader().unwrap();
        assert!(matches!(w.encode(&record()), Err(MsgError::Closed)));
    }

    #[test]
    fn test_close_without_cancel_capability_closes() {
        let (recorder, events) = Recorder::new(false);
        let mut w = exchange_writer_of(Box::new(recorder), JsonCodec).unwrap();
        w.encode(&record()).unwrap();
        w.close().unwrap();

        let events = events.lock();
        assert_eq!(events.closes, 1);
        assert_eq!(events.cancels, 0);
    }

    #[test]
    fn test_dual_close_failures_are_joined() {
        let (mut recorder, _events) = Recorder::new(false);
        recorder.fail_close = true;
        let mut w = exchange_writer_of(Box::new(recorder), StuckCodec).unwrap();
        w.encode(&record()).unwrap();

        match w.close() {
            Err(MsgError::Multiple(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(matches!(errors[0], MsgError::Serialization(_)));
                assert!(matches!(errors[1], MsgError::Disconnected));
            }
            other => panic!("expected joined failure, got {other:?}"),
        }
    }

    #[test]
    fn test_finalize_failure_skips_reader() {
        let (recorder, events) = Recorder::new(true);
        let mut w = exchange_writer_of(Box::new(recorder), StuckCodec).unwrap();
        assert!(matches!(w.reader(), Err(MsgError::Serialization(_))));
        assert_eq!(events.lock().readers, 0);
    }

    #[test]
    fn test_failed_finalize_never_requests_reply() {
        let (mut recorder, events) = Recorder::new(true);
        recorder.fail_close = true;
        let mut w = exchange_writer_of(Box::new(recorder), JsonCodec).unwrap();
        w.encode(&record()).unwrap();

        assert!(matches!(w.reader(), Err(MsgError::Disconnected)));
        assert!(!w.is_finalized());
        assert!(matches!(w.reader(), Err(MsgError::Disconnected)));
        assert_eq!(events.lock().readers, 0);

        // still open, so closing abandons it
        w.close().unwrap();
        let events = events.lock();
        assert_eq!(events.closes, 2);
        assert_eq!(events.cancels, 1);
        assert_eq!(events.readers, 0);
    }

    /// Codec that refuses to bind, closing whatever stream it was handed.
    #[derive(Debug, Clone, Copy)]
    struct UnboundCodec;

    impl Codec for UnboundCodec {
        type Decoder = JsonDecoder;
        type Encoder = StuckEncoder;

        fn decoder(&self, mut reader: BoxReader) -> Result<JsonDecoder> {
            reader.close()?;
            Err(MsgError::Serialization("bind".to_string()))
        }

        fn encoder(&self, mut writer: BoxWriter) -> Result<StuckEncoder> {
            writer.close()?;
            Err(MsgError::Serialization("bind".to_string()))
        }
    }

    #[test]
    fn test_binding_failure_cancels_exchange() {
        let (recorder, events) = Recorder::new(true);
        let result = exchange_writer_of(Box::new(recorder), UnboundCodec);
        assert!(matches!(result, Err(MsgError::Serialization(_))));

        let events = events.lock();
        assert_eq!(events.cancels, 1);
        assert_eq!(events.closes, 0);
        assert_eq!(events.readers, 0);
    }

    #[test]
    fn test_binding_failure_closes_exchange_without_cancel() {
        let (recorder, events) = Recorder::new(false);
        let result = exchange_writer_of(Box::new(recorder), UnboundCodec);
        assert!(matches!(result, Err(MsgError::Serialization(_))));

        let events = events.lock();
        assert_eq!(events.closes, 1);
        assert_eq!(events.cancels, 0);
    }

    #[test]
    fn test_binding_failure_joins_release_failure() {
        let (mut recorder, events) = Recorder::new(false);
        recorder.fail_close = true;
        match exchange_writer_of(Box::new(recorder), UnboundCodec) {
            Err(MsgError::Multiple(errors)) => {
                assert_eq!(errors.len(), 2);
                assert!(matches!(errors[0], MsgError::Serialization(_)));
                assert!(matches!(errors[1], MsgError::Disconnected));
            }
            Err(other) => panic!("expected joined failure, got {other:?}"),
            Ok(_) => panic!("binding should fail"),
        }
        assert_eq!(events.lock().closes, 1);
    }

    #[test]
    fn test_drop_abandons_open_exchange() {
        let (recorder, events) = Recorder::new(true);
        {
            let mut w = exchange_writer_of(Box::new(recorder), JsonCodec).unwrap();
            w.encode(&record()).unwrap();
        }
        let events = events.lock();
        assert_eq!(events.cancels, 1);
        assert_eq!(events.closes, 0);
    }

    struct Echo;

    impl ReaderTaker<TypedExchangeReader<JsonCodec>> for Echo {
        fn reader_take(&self, mut reader: TypedExchangeReader<JsonCodec>) -> Result<()> {
            let mut request: Record = reader.decode()?;
            request.id += 1;
            let mut reply = reader.writer()?;
            reply.encode(&request)?;
            MsgError::join([reply.close(), reader.close()])
        }
    }

    fn pair(name: &str) -> (ChannelConn, ChannelConn) {
        let config = ChannelConfig::default().with_read_timeout(Duration::from_millis(200));
        ChannelConn::create_pair(name, config).unwrap()
    }

    #[test]
    fn test_exchange_round_trip_over_channel() {
        let (a, b) = pair("typed-exchange");
        let chainer = exchange_reader_chainer_of(&b, JsonCodec).unwrap();
        chainer.reader_chain(Arc::new(Echo)).unwrap();

        let mut giver = exchange_writer_giver_of(a.clone(), JsonCodec);
        let mut w = giver.writer().unwrap();
        w.encode(&record()).unwrap();
        let mut reply = w.reader().unwrap();

        assert!(b.dispatch().unwrap());
        let got: Record = reply.decode().unwrap();
        assert_eq!(got.id, 8);
        assert_eq!(got.name, "a");
        reply.close().unwrap();
        w.close().unwrap();

        let stats = a.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_cancelled, 0);
    }

    #[test]
    fn test_abandoned_exchange_never_reaches_peer() {
        let (a, _b) = pair("typed-abandon");
        let mut giver = exchange_writer_giver_of(a.clone(), JsonCodec);
        let mut w = giver.writer().unwrap();
        w.encode(&record()).unwrap();
        w.close().unwrap();

        let stats = a.stats();
        assert_eq!(stats.messages_sent, 0);
        assert_eq!(stats.messages_cancelled, 1);
    }

    #[test]
    fn test_exchange_taker_is_single_assignment() {
        let chainer = TypedExchangeReaderChainer::new(JsonCodec);
        chainer.reader_chain(Arc::new(Echo)).unwrap();
        assert!(matches!(
            chainer.reader_chain(Arc::new(Echo)),
            Err(MsgError::AlreadyChained)
        ));
    }
}
