//! typed-msg - typed messages and exchanges over byte-level message connections
pub mod channel;
pub mod codec;
pub mod error;
pub mod transport;

pub use channel::{
    ConnBlock, TypedConn, TypedExchangeConn, TypedExchangeReader, TypedExchangeReaderChainer,
    TypedExchangeWriter, TypedExchangeWriterGiver, TypedReaderChainer, TypedReaderGiver,
    TypedWriterGiver, Void, conn_of, exchange_conn_of, exchange_reader_chainer_of,
    exchange_reader_of, exchange_writer_giver_of, exchange_writer_of, reader_chainer_of,
    reader_giver_of, writer_giver_of,
};
pub use codec::{BincodeCodec, Codec, Decoder, Encoder, JsonCodec};
pub use error::{MsgError, Result};
pub use transport::channel::{ChannelConfig, ChannelConn};
pub use transport::{
    BoxExchangeReader, BoxExchangeWriter, BoxReader, BoxWriter, Cancel, Close, Conn,
    ExchangeReader, ExchangeWriter, NoClose, Reader, ReaderChainer, ReaderGiver, ReaderTaker,
    Shared, TransportStats, Writer, WriterGiver,
};

#[cfg(feature = "codec-cbor")]
pub use codec::CborCodec;
#[cfg(feature = "codec-messagepack")]
pub use codec::MessagePackCodec;
