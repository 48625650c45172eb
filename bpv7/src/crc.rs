/*!
Per-block CRC handling.

Both CRCs are computed over the complete CBOR encoding of a block with
the CRC value bytes present and zero-filled; the computed value
replaces the placeholder on emit and is compared against the
transmitted value on receive. Values travel as 2- or 4-byte CBOR byte
strings in network byte order.
*/

use core::ops::Range;
use thiserror::Error;

const X25: ::crc::Crc<u16> = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_SDLC);
const CASTAGNOLI: ::crc::Crc<u32> = ::crc::Crc::<u32>::new(&::crc::CRC_32_ISCSI);

#[derive(Error, Debug)]
pub enum Error {
    /// An invalid or unsupported CRC type code.
    #[error("Invalid CRC type {0}")]
    InvalidType(u64),

    /// The CRC value byte string has the wrong length for its type.
    #[error("Block has unexpected CRC value length {0}")]
    InvalidLength(usize),

    /// The calculated CRC does not match the transmitted value.
    #[error("Incorrect CRC value")]
    IncorrectCrc,
}

/// The CRC type of a bundle block.
#[derive(Default, Debug, Copy, Clone, PartialEq, Eq)]
pub enum CrcType {
    /// No CRC.
    #[default]
    None,
    /// CRC-16/X-25 (poly 0x8408 reflected).
    Crc16X25,
    /// CRC-32/Castagnoli (poly 0x82f63b78 reflected).
    Crc32Castagnoli,
}

impl CrcType {
    /// Wire length of the CRC field: byte-string header plus value bytes.
    pub fn field_len(&self) -> usize {
        match self {
            CrcType::None => 0,
            CrcType::Crc16X25 => 3,
            CrcType::Crc32Castagnoli => 5,
        }
    }

    /// Length of the value bytes alone.
    pub fn value_len(&self) -> usize {
        match self {
            CrcType::None => 0,
            CrcType::Crc16X25 => 2,
            CrcType::Crc32Castagnoli => 4,
        }
    }
}

impl TryFrom<u64> for CrcType {
    type Error = Error;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Crc16X25),
            2 => Ok(Self::Crc32Castagnoli),
            v => Err(Error::InvalidType(v)),
        }
    }
}

impl From<CrcType> for u64 {
    fn from(value: CrcType) -> Self {
        match value {
            CrcType::None => 0,
            CrcType::Crc16X25 => 1,
            CrcType::Crc32Castagnoli => 2,
        }
    }
}

impl drift_codec::encode::ToCbor for CrcType {
    fn to_cbor(&self, encoder: &mut drift_codec::encode::Encoder) {
        encoder.emit_uint(u64::from(*self))
    }
}

/// Appends the CRC field to a fully laid-out block.
///
/// `data` must end exactly where the CRC field belongs, with the rest
/// of the block (including the array header that accounts for the CRC
/// element) already emitted.
pub(crate) fn append_crc_value(crc_type: CrcType, mut data: Vec<u8>) -> Vec<u8> {
    match crc_type {
        CrcType::None => {}
        CrcType::Crc16X25 => {
            // CBOR byte string header for a 2-byte string
            data.push(0x42);
            let mut digest = X25.digest();
            digest.update(&data);
            digest.update(&[0; 2]);
            data.extend_from_slice(&digest.finalize().to_be_bytes());
        }
        CrcType::Crc32Castagnoli => {
            // CBOR byte string header for a 4-byte string
            data.push(0x44);
            let mut digest = CASTAGNOLI.digest();
            digest.update(&data);
            digest.update(&[0; 4]);
            data.extend_from_slice(&digest.finalize().to_be_bytes());
        }
    }
    data
}

/// Recomputes a received block's CRC with the value bytes zero-filled
/// and compares against the transmitted value.
///
/// `block` is the complete block encoding and `value` the range of the
/// CRC value bytes within it (excluding the byte-string header).
pub(crate) fn check_crc(crc_type: CrcType, block: &[u8], value: Range<usize>) -> Result<(), Error> {
    match crc_type {
        CrcType::None => Ok(()),
        CrcType::Crc16X25 => {
            let crc_value = u16::from_be_bytes(
                block[value.clone()]
                    .try_into()
                    .map_err(|_| Error::InvalidLength(value.len()))?,
            );
            let mut digest = X25.digest();
            digest.update(&block[..value.start]);
            digest.update(&[0u8; 2]);
            digest.update(&block[value.end..]);
            if crc_value != digest.finalize() {
                Err(Error::IncorrectCrc)
            } else {
                Ok(())
            }
        }
        CrcType::Crc32Castagnoli => {
            let crc_value = u32::from_be_bytes(
                block[value.clone()]
                    .try_into()
                    .map_err(|_| Error::InvalidLength(value.len()))?,
            );
            let mut digest = CASTAGNOLI.digest();
            digest.update(&block[..value.start]);
            digest.update(&[0u8; 4]);
            digest.update(&block[value.end..]);
            if crc_value != digest.finalize() {
                Err(Error::IncorrectCrc)
            } else {
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_then_check() {
        for crc_type in [CrcType::Crc16X25, CrcType::Crc32Castagnoli] {
            let body = drift_codec::encode::emit_array(Some(6), |a| {
                a.emit_uint(7);
                a.emit_uint(2);
                a.emit_uint(0);
                a.emit(&crc_type);
                a.emit_bytes(b"data".as_slice());
                a.skip_value();
            });
            let block = append_crc_value(crc_type, body);
            let value_start = block.len() - crc_type.value_len();
            check_crc(crc_type, &block, value_start..block.len()).unwrap();

            // Flip a bit anywhere and the check must fail
            let mut bad = block.clone();
            bad[1] ^= 0x01;
            assert!(matches!(
                check_crc(crc_type, &bad, value_start..bad.len()),
                Err(Error::IncorrectCrc)
            ));
        }
    }

    #[test]
    fn known_crc16() {
        // CRC-16/X-25 of "123456789" is 0x906e
        assert_eq!(X25.checksum(b"123456789"), 0x906e);
    }

    #[test]
    fn known_crc32c() {
        // CRC-32C of "123456789" is 0xe3069283
        assert_eq!(CASTAGNOLI.checksum(b"123456789"), 0xe3069283);
    }
}
