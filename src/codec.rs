use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use std::io::Write;

use crate::error::Result;
use crate::transport::{BoxReader, BoxWriter, Close, Shared};

/// Binds byte streams to typed decoders and encoders.
///
/// Binding is lazy: no bytes are consumed or produced until the first
/// `decode`/`encode`. If binding fails, the codec must close the stream it
/// was handed.
pub trait Codec: Clone + Send + Sync + Debug + 'static {
    type Decoder: Decoder + 'static;
    type Encoder: Encoder + 'static;

    fn decoder(&self, reader: BoxReader) -> Result<Self::Decoder>;

    fn encoder(&self, writer: BoxWriter) -> Result<Self::Encoder>;
}

/// Typed reader. The type parameter of `decode` selects what is read.
///
/// Closing closes the bound byte reader exactly once.
pub trait Decoder: Close + Send {
    fn decode<T: DeserializeOwned>(&mut self) -> Result<T>;
}

/// Typed writer.
///
/// Closing closes the bound byte writer exactly once.
pub trait Encoder: Close + Send {
    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()>;
}

/// Byte stream owned by a decoder or encoder.
struct Bound<S> {
    stream: S,
    closed: bool,
}

impl<S: Close> Bound<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.close()
    }
}

/// JSON codec, one value per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    type Decoder = JsonDecoder;
    type Encoder = JsonEncoder;

    fn decoder(&self, reader: BoxReader) -> Result<JsonDecoder> {
        Ok(JsonDecoder::new(reader))
    }

    fn encoder(&self, writer: BoxWriter) -> Result<JsonEncoder> {
        Ok(JsonEncoder::new(writer))
    }
}

pub struct JsonDecoder {
    de: serde_json::Deserializer<serde_json::de::IoRead<Shared<BoxReader>>>,
    closer: Bound<Shared<BoxReader>>,
}

impl JsonDecoder {
    pub fn new(reader: BoxReader) -> Self {
        // serde_json owns its reader, so closing goes through a second handle
        let shared = Shared::new(reader);
        Self {
            de: serde_json::Deserializer::from_reader(shared.clone()),
            closer: Bound::new(shared),
        }
    }
}

impl Decoder for JsonDecoder {
    fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(<T as serde::Deserialize>::deserialize(&mut self.de)?)
    }
}

impl Close for JsonDecoder {
    fn close(&mut self) -> Result<()> {
        self.closer.close()
    }
}

pub struct JsonEncoder {
    writer: Bound<BoxWriter>,
}

impl JsonEncoder {
    pub fn new(writer: BoxWriter) -> Self {
        Self {
            writer: Bound::new(writer),
        }
    }
}

impl Encoder for JsonEncoder {
    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let stream = &mut self.writer.stream;
        serde_json::to_writer(&mut *stream, value)?;
        stream.write_all(b"\n")?;
        Ok(())
    }
}

impl Close for JsonEncoder {
    fn close(&mut self) -> Result<()> {
        self.writer.close()
    }
}

/// Default binary codec (Bincode codec)
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    type Decoder = BincodeDecoder;
    type Encoder = BincodeEncoder;

    fn decoder(&self, reader: BoxReader) -> Result<BincodeDecoder> {
        Ok(BincodeDecoder {
            reader: Bound::new(reader),
        })
    }

    fn encoder(&self, writer: BoxWriter) -> Result<BincodeEncoder> {
        Ok(BincodeEncoder {
            writer: Bound::new(writer),
        })
    }
}

pub struct BincodeDecoder {
    reader: Bound<BoxReader>,
}

impl Decoder for BincodeDecoder {
    fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(bincode::deserialize_from(&mut self.reader.stream)?)
    }
}

impl Close for BincodeDecoder {
    fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}

pub struct BincodeEncoder {
    writer: Bound<BoxWriter>,
}

impl Encoder for BincodeEncoder {
    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        Ok(bincode::serialize_into(&mut self.writer.stream, value)?)
    }
}

impl Close for BincodeEncoder {
    fn close(&mut self) -> Result<()> {
        self.writer.close()
    }
}

/// MessagePack codec - compact binary, cross-language compatible
#[cfg(feature = "codec-messagepack")]
#[derive(Debug, Clone, Copy, Default)]
pub struct MessagePackCodec;

#[cfg(feature = "codec-messagepack")]
impl Codec for MessagePackCodec {
    type Decoder = MessagePackDecoder;
    type Encoder = MessagePackEncoder;

    fn decoder(&self, reader: BoxReader) -> Result<MessagePackDecoder> {
        Ok(MessagePackDecoder {
            reader: Bound::new(reader),
        })
    }

    fn encoder(&self, writer: BoxWriter) -> Result<MessagePackEncoder> {
        Ok(MessagePackEncoder {
            writer: Bound::new(writer),
        })
    }
}

#[cfg(feature = "codec-messagepack")]
pub struct MessagePackDecoder {
    reader: Bound<BoxReader>,
}

#[cfg(feature = "codec-messagepack")]
impl Decoder for MessagePackDecoder {
    fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(rmp_serde::decode::from_read(&mut self.reader.stream)?)
    }
}

#[cfg(feature = "codec-messagepack")]
impl Close for MessagePackDecoder {
    fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}

#[cfg(feature = "codec-messagepack")]
pub struct MessagePackEncoder {
    writer: Bound<BoxWriter>,
}

#[cfg(feature = "codec-messagepack")]
impl Encoder for MessagePackEncoder {
    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        rmp_serde::encode::write(&mut self.writer.stream, value)
            .map_err(|e| crate::error::MsgError::Serialization(e.to_string()))
    }
}

#[cfg(feature = "codec-messagepack")]
impl Close for MessagePackEncoder {
    fn close(&mut self) -> Result<()> {
        self.writer.close()
    }
}

/// CBOR codec - binary JSON (RFC 8949), self-describing
#[cfg(feature = "codec-cbor")]
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

#[cfg(feature = "codec-cbor")]
impl Codec for CborCodec {
    type Decoder = CborDecoder;
    type Encoder = CborEncoder;

    fn decoder(&self, reader: BoxReader) -> Result<CborDecoder> {
        Ok(CborDecoder {
            reader: Bound::new(reader),
        })
    }

    fn encoder(&self, writer: BoxWriter) -> Result<CborEncoder> {
        Ok(CborEncoder {
            writer: Bound::new(writer),
        })
    }
}

#[cfg(feature = "codec-cbor")]
pub struct CborDecoder {
    reader: Bound<BoxReader>,
}

#[cfg(feature = "codec-cbor")]
impl Decoder for CborDecoder {
    fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        Ok(ciborium::from_reader(&mut self.reader.stream)?)
    }
}

#[cfg(feature = "codec-cbor")]
impl Close for CborDecoder {
    fn close(&mut self) -> Result<()> {
        self.reader.close()
    }
}

#[cfg(feature = "codec-cbor")]
pub struct CborEncoder {
    writer: Bound<BoxWriter>,
}

#[cfg(feature = "codec-cbor")]
impl Encoder for CborEncoder {
    fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ciborium::into_writer(value, &mut self.writer.stream)
            .map_err(|e| crate::error::MsgError::Serialization(e.to_string()))
    }
}

#[cfg(feature = "codec-cbor")]
impl Close for CborEncoder {
    fn close(&mut self) -> Result<()> {
        self.writer.close()
    }
}
