/*!
Canonical block bookkeeping.

A [`BlockInfo`] tracks one received block: its preamble fields, the
raw bytes accumulated so far, and the offsets that carve those bytes
into preamble, block-type-specific data and CRC. Once `complete` is
set the contents are immutable for the lifetime of the block info, and
`data_offset + data_length + crc_length == full_length()` holds.
*/

use super::*;
use drift_codec::{decode, encode};

/// Well-known block type codes.
pub mod block_type {
    pub const PRIMARY: u64 = 0;
    pub const PAYLOAD: u64 = 1;
    pub const PREVIOUS_NODE: u64 = 6;
    pub const BUNDLE_AGE: u64 = 7;
    pub const HOP_COUNT: u64 = 10;
    // Experimental interplanetary multicast codes
    pub const IMC_DESTINATIONS: u64 = 194;
    pub const IMC_STATE: u64 = 195;
}

/// Block processing control flags.
#[derive(Default, Debug, Clone)]
pub struct BlockFlags {
    /// The block must be replicated in every fragment.
    pub must_replicate: bool,
    /// Report if the block cannot be processed.
    pub report_on_failure: bool,
    /// Delete the bundle if the block cannot be processed.
    pub delete_bundle_on_failure: bool,
    /// Discard the block if it cannot be processed.
    pub delete_block_on_failure: bool,
    /// Any unrecognised flag bits, preserved for re-emission.
    pub unrecognised: Option<u64>,
}

impl From<&BlockFlags> for u64 {
    fn from(value: &BlockFlags) -> Self {
        let mut flags = value.unrecognised.unwrap_or_default();
        if value.must_replicate {
            flags |= 1 << 0;
        }
        if value.report_on_failure {
            flags |= 1 << 1;
        }
        if value.delete_bundle_on_failure {
            flags |= 1 << 2;
        }
        if value.delete_block_on_failure {
            flags |= 1 << 4;
        }
        flags
    }
}

impl From<u64> for BlockFlags {
    fn from(value: u64) -> Self {
        let mut flags = Self::default();
        let mut unrecognised = value;

        if (value & (1 << 0)) != 0 {
            flags.must_replicate = true;
            unrecognised &= !(1 << 0);
        }
        if (value & (1 << 1)) != 0 {
            flags.report_on_failure = true;
            unrecognised &= !(1 << 1);
        }
        if (value & (1 << 2)) != 0 {
            flags.delete_bundle_on_failure = true;
            unrecognised &= !(1 << 2);
        }
        if (value & (1 << 4)) != 0 {
            flags.delete_block_on_failure = true;
            unrecognised &= !(1 << 4);
        }

        if unrecognised != 0 {
            flags.unrecognised = Some(unrecognised);
        }
        flags
    }
}

impl encode::ToCbor for BlockFlags {
    fn to_cbor(&self, encoder: &mut encode::Encoder) {
        encoder.emit_uint(u64::from(self))
    }
}

impl decode::FromCbor for BlockFlags {
    type Error = decode::Error;

    fn from_cbor(reader: &mut decode::Reader) -> Result<Self, Self::Error> {
        reader.read_uint().map(Into::into)
    }
}

/// One received block and its accumulated bytes.
#[derive(Default, Debug, Clone)]
pub struct BlockInfo {
    /// Wire block type code; the primary block uses 0.
    pub block_type: u64,
    /// Block number; 0 for the primary block, 1 for the payload.
    pub number: u64,
    pub flags: BlockFlags,
    pub crc_type: crc::CrcType,

    /// Accumulated raw bytes. For every block except the payload this
    /// grows to the complete block encoding; for the payload it holds
    /// only the preamble up to and including the byte-string header.
    pub contents: Vec<u8>,

    /// Offset of the block-type-specific data within the full encoding.
    /// Zero until the preamble has been decoded.
    pub data_offset: usize,
    /// Length of the block-type-specific data.
    pub data_length: usize,
    /// Length of the trailing CRC field (byte-string header + value).
    pub crc_length: usize,
    /// Payload only: CRC field bytes accumulated out-of-band.
    pub crc_bytes: Vec<u8>,

    /// Set when the last byte of the block has been consumed. Contents
    /// are immutable from this point on.
    pub complete: bool,
}

impl BlockInfo {
    pub fn new(block_type: u64) -> Self {
        Self {
            block_type,
            ..Default::default()
        }
    }

    /// Total wire length of the block.
    pub fn full_length(&self) -> usize {
        self.data_offset + self.data_length + self.crc_length
    }

    /// The block-type-specific data bytes. Valid only for blocks whose
    /// contents are memory-resident (everything except the payload).
    pub fn data(&self) -> &[u8] {
        &self.contents[self.data_offset..self.data_offset + self.data_length]
    }
}
