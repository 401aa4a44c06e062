use thiserror::Error;

#[derive(Error, Debug)]
pub enum MsgError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unexpected end of message")]
    Eof,

    #[error("Stream closed")]
    Closed,

    #[error("Exchange cancelled")]
    Cancelled,

    #[error("No reader taker chained")]
    Unchained,

    #[error("Reader taker already chained")]
    AlreadyChained,

    #[error("No reply direction available for this exchange")]
    ReplyUnavailable,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Timeout after {duration_ms}ms during {operation}")]
    Timeout { duration_ms: u64, operation: String },

    #[error("Peer disconnected")]
    Disconnected,

    #[error("{}", display_all(.0))]
    Multiple(Vec<MsgError>),
}

pub type Result<T> = std::result::Result<T, MsgError>;

impl MsgError {
    /// Collects the failures of several independent operations.
    ///
    /// Every result is expected to be evaluated already, so one failure never
    /// prevents another resource from being released.
    pub fn join(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
        let mut errors: Vec<MsgError> = results.into_iter().filter_map(Result::err).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(MsgError::Multiple(errors)),
        }
    }
}

fn display_all(errors: &[MsgError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl MsgError {
    /// A read that ran out of bytes is `Eof`, anything else stays `Io`.
    fn from_read(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            MsgError::Eof
        } else {
            MsgError::Io(err)
        }
    }
}

impl From<bincode::Error> for MsgError {
    fn from(err: bincode::Error) -> Self {
        match *err {
            bincode::ErrorKind::Io(e) => MsgError::from_read(e),
            other => MsgError::Serialization(other.to_string()),
        }
    }
}

#[cfg(feature = "codec-messagepack")]
impl From<rmp_serde::decode::Error> for MsgError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        match err {
            rmp_serde::decode::Error::InvalidMarkerRead(e)
            | rmp_serde::decode::Error::InvalidDataRead(e) => MsgError::from_read(e),
            other => MsgError::Serialization(other.to_string()),
        }
    }
}

#[cfg(feature = "codec-cbor")]
impl From<ciborium::de::Error<std::io::Error>> for MsgError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        match err {
            ciborium::de::Error::Io(e) => MsgError::from_read(e),
            other => MsgError::Serialization(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MsgError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            MsgError::Io(err.into())
        } else if err.is_eof() {
            MsgError::Eof
        } else {
            MsgError::Serialization(err.to_string())
        }
    }
}
