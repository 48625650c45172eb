/*!
The primary error type for the `bpv7` crate, covering wire-level
parsing failures and semantic validation failures.
*/

use super::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The bundle protocol version is not 7.
    #[error("Unsupported bundle protocol version {0}")]
    InvalidVersion(u64),

    /// The received byte stream does not start with the indefinite-length
    /// array header.
    #[error("Bundle does not start with an indefinite-length CBOR array")]
    InvalidBundleArray,

    /// A canonical block's element count does not agree with its CRC type.
    #[error("Block has {0} elements but CRC type {1}")]
    InvalidBlockArraySize(u64, u64),

    /// A bundle has more than one block with the same block number.
    #[error("Bundle has more than one block with block number {0}")]
    DuplicateBlockNumber(u64),

    /// A block carries a block number reserved for another type.
    #[error("Block type {1} cannot be block number {0}")]
    InvalidBlockNumber(u64, u64),

    /// The primary block's trailing element count implies a fragment but
    /// the fragment flag disagrees, or vice versa.
    #[error("Primary block fragment fields do not match the fragment flag")]
    InvalidFragmentInfo,

    /// An invalid combination of bundle or block flags.
    #[error("Invalid bundle or block flag combination")]
    InvalidFlags,

    /// The payload did not arrive in full and the bundle cannot be
    /// salvaged by reactive fragmentation.
    #[error("Incomplete payload: {0} of {1} bytes received")]
    IncompletePayload(u64, u64),

    /// An IMC state block with an unknown format version.
    #[error("Unsupported IMC state block format version {0}")]
    InvalidImcFormat(u64),

    /// An operation referenced a transmission list that was never prepared.
    #[error("No transmission blocks prepared for link {0}")]
    NoXmitBlocks(String),

    /// An error in the payload store.
    #[error("Payload store error: {0}")]
    PayloadStore(#[from] payload::Error),

    /// An error related to CRC processing.
    #[error(transparent)]
    InvalidCrc(#[from] crc::Error),

    /// An error related to endpoint ID processing.
    #[error(transparent)]
    InvalidEid(#[from] eid::Error),

    /// An error related to CBOR decoding.
    #[error(transparent)]
    InvalidCbor(#[from] drift_codec::decode::Error),

    /// A specific field failed to parse.
    #[error("Failed to parse {field}: {source}")]
    InvalidField {
        field: &'static str,
        source: Box<dyn core::error::Error + Send + Sync>,
    },
}

impl Error {
    /// True when the underlying cause is "more bytes needed", the
    /// recoverable outcome of a chunked decode.
    pub fn is_eof(&self) -> bool {
        match self {
            Error::InvalidCbor(e) => e.is_eof(),
            Error::InvalidEid(e) => e.is_eof(),
            _ => false,
        }
    }
}

/// Extension trait mapping errors to [`Error::InvalidField`] with a
/// field name for context. EOF outcomes pass through untouched so the
/// chunking layer can still see them.
pub trait CaptureFieldErr<T> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error>;
}

impl<T> CaptureFieldErr<T> for Result<T, drift_codec::decode::Error> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| {
            if e.is_eof() {
                e.into()
            } else {
                Error::InvalidField {
                    field,
                    source: e.into(),
                }
            }
        })
    }
}

impl<T> CaptureFieldErr<T> for Result<T, Error> {
    fn map_field_err(self, field: &'static str) -> Result<T, Error> {
        self.map_err(|e| {
            if e.is_eof() {
                e
            } else {
                Error::InvalidField {
                    field,
                    source: e.into(),
                }
            }
        })
    }
}
