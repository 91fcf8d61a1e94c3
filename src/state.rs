//! Save-state serialization.
//!
//! A save state is a magic string, a version byte, and a deflate-compressed
//! `bincode` payload of the serialized component. Regional timing tables are
//! compile-time constants and never travel through here; they are rederived
//! from the saved region field on restore.

use crate::error::{Error, Result};
use flate2::{read::DeflateDecoder, write::DeflateEncoder, Compression};
use serde::{de::DeserializeOwned, Serialize};
use std::io::{Read, Write};

const SAVE_MAGIC_LEN: usize = 8;
const SAVE_MAGIC: [u8; SAVE_MAGIC_LEN] = *b"NESAPU\x1a\x00";
// Keep this separate from Semver because breaking API changes may not invalidate the save format.
const SAVE_VERSION: u8 = 1;

/// Writes a header including a magic string and a version.
///
/// # Errors
///
/// If the header fails to write, then an error is returned.
pub(crate) fn write_header(f: &mut impl Write) -> std::io::Result<()> {
    f.write_all(&SAVE_MAGIC)?;
    f.write_all(&[SAVE_VERSION])
}

/// Verifies a save state header.
///
/// # Errors
///
/// If the header fails to validate, then an error is returned.
pub(crate) fn validate_header(f: &mut impl Read) -> Result<()> {
    let mut magic = [0u8; SAVE_MAGIC_LEN];
    f.read_exact(&mut magic)
        .map_err(|s| Error::InvalidHeader(s.to_string()))?;
    if magic != SAVE_MAGIC {
        return Err(Error::InvalidHeader(format!(
            "invalid magic (expected {SAVE_MAGIC:?}, found: {magic:?})",
        )));
    }

    let mut version = [0u8];
    f.read_exact(&mut version)
        .map_err(|s| Error::InvalidHeader(s.to_string()))?;
    if version == [SAVE_VERSION] {
        Ok(())
    } else {
        Err(Error::InvalidHeader(format!(
            "invalid version (expected {SAVE_VERSION:?}, found: {version:?})",
        )))
    }
}

/// Serialize `value` into `writer` as a versioned, compressed save state.
///
/// # Errors
///
/// If the value fails to serialize or the stream fails to write, then an error
/// is returned.
pub fn save<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: Write,
    T: ?Sized + Serialize,
{
    let data =
        bincode::serialize(value).map_err(|err| Error::SerializationFailed(err.to_string()))?;
    write_header(writer).map_err(Error::WriteHeaderFailed)?;
    let mut encoder = DeflateEncoder::new(writer, Compression::default());
    encoder.write_all(&data).map_err(Error::EncodingFailed)?;
    encoder.finish().map_err(Error::EncodingFailed)?;
    Ok(())
}

/// Deserialize a save state previously written by [`save`].
///
/// # Errors
///
/// If the header fails to validate or the payload fails to decode, then an
/// error is returned.
pub fn load<R, T>(reader: &mut R) -> Result<T>
where
    R: Read,
    T: DeserializeOwned,
{
    validate_header(reader)?;
    let mut data = Vec::new();
    DeflateDecoder::new(reader)
        .read_to_end(&mut data)
        .map_err(Error::DecodingFailed)?;
    bincode::deserialize(&data).map_err(|err| Error::DeserializationFailed(err.to_string()))
}
