//! Layer 2: typed messages over the byte-level primitives.
//!
//! Every byte-level contract has a typed twin produced by binding a
//! [`Codec`]: readers become [`Decoder`]s, writers become [`Encoder`]s, and
//! givers, chainers and connections hand those out instead of raw streams.

pub mod conn;
pub mod exchange;
pub mod plain;
pub mod void;

pub use conn::{ConnBlock, TypedConn, TypedExchangeConn, conn_of, exchange_conn_of};
pub use exchange::{
    TypedExchangeReader, TypedExchangeReaderChainer, TypedExchangeWriter,
    TypedExchangeWriterGiver, exchange_reader_chainer_of, exchange_reader_of,
    exchange_writer_giver_of, exchange_writer_of,
};
pub use plain::{
    TypedReaderChainer, TypedReaderGiver, TypedWriterGiver, reader_chainer_of, reader_giver_of,
    writer_giver_of,
};
pub use void::Void;

pub use crate::codec::{Codec, Decoder, Encoder};
