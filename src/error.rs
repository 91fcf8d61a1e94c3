//! Error handling.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
#[must_use]
pub enum Error {
    #[error("invalid save state header: {0}")]
    InvalidHeader(String),
    #[error("failed to write save state header: {0:?}")]
    WriteHeaderFailed(std::io::Error),
    #[error("failed to encode save state: {0:?}")]
    EncodingFailed(std::io::Error),
    #[error("failed to decode save state: {0:?}")]
    DecodingFailed(std::io::Error),
    #[error("failed to serialize save state: {0}")]
    SerializationFailed(String),
    #[error("failed to deserialize save state: {0}")]
    DeserializationFailed(String),
}
