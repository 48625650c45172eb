/*!
A chunk-tolerant CBOR reader.

The decoder is built for streams that arrive in arbitrary fragments:
every primitive either succeeds and advances the cursor, fails with a
non-recoverable protocol error, or fails with
[`Error::NeedMoreData`], in which case the caller buffers more bytes
and retries from a saved start offset. Nothing is consumed on failure.

Only definite-length items are accepted, with one exception: the
indefinite-length array header (0x9f) and its terminating break byte
(0xff), which BPv7 uses for the outer bundle array.
*/

use core::{ops::Range, str::Utf8Error};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The input is incomplete; at least this many more bytes are needed.
    #[error("Need at least {0} more bytes to decode value")]
    NeedMoreData(usize),

    /// An encoded item's length exceeds addressable memory.
    #[error("An encoded item requires more memory than available")]
    TooBig,

    /// The item has an invalid minor value for its major type.
    #[error("Invalid minor-type value {0}")]
    InvalidMinorValue(u8),

    /// The item's major type does not match the expected type.
    #[error("Incorrect type, expecting {0}, found major type {1}")]
    IncorrectType(&'static str, u8),

    /// An indefinite-length item was found where a definite length is required.
    #[error("Indefinite-length item where a definite length is required")]
    IndefiniteLength,

    /// A fixed array's element count is outside the permitted range.
    #[error("Array has {0} elements, expected between {1} and {2}")]
    InvalidArrayLength(u64, u64, u64),

    /// Something other than the expected break byte was found.
    #[error("Expected CBOR break byte, found {0:#04x}")]
    MissingBreak(u8),

    /// An unexpected simple value was found.
    #[error("Invalid simple value {0}")]
    InvalidSimpleValue(u8),

    /// A text string contains invalid UTF-8.
    #[error(transparent)]
    InvalidUtf8(#[from] Utf8Error),

    /// An integer narrowing failed.
    #[error(transparent)]
    TryFromIntError(#[from] core::num::TryFromIntError),
}

impl Error {
    /// True for the recoverable buffer-more-and-retry outcome.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::NeedMoreData(_))
    }
}

/// A type that can be read from a [`Reader`].
pub trait FromCbor: Sized {
    type Error: From<Error>;

    fn from_cbor(reader: &mut Reader) -> Result<Self, Self::Error>;
}

/// A cursor over a CBOR byte slice.
///
/// On any `Err` return the cursor is left where it was, so a caller
/// that sees [`Error::NeedMoreData`] can retry the same read against a
/// longer buffer.
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes left in the underlying slice.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Rewinds (or advances) the cursor to an absolute offset.
    pub fn seek(&mut self, offset: usize) {
        debug_assert!(offset <= self.data.len());
        self.offset = offset;
    }

    fn peek(&self) -> Result<u8, Error> {
        self.data
            .get(self.offset)
            .copied()
            .ok_or(Error::NeedMoreData(1))
    }

    /// Reads an item head, returning `(major, value, indefinite)`.
    /// `value` is the argument: the integer itself, a length, or a count.
    fn read_head(&mut self) -> Result<(u8, u64, bool), Error> {
        let b = self.peek()?;
        let (major, minor) = (b >> 5, b & 0x1F);
        match minor {
            0..24 => {
                self.offset += 1;
                Ok((major, minor as u64, false))
            }
            24..=27 => {
                let width = 1usize << (minor - 24);
                let avail = self.remaining() - 1;
                if avail < width {
                    return Err(Error::NeedMoreData(width - avail));
                }
                let mut value = 0u64;
                for i in 0..width {
                    value = (value << 8) | self.data[self.offset + 1 + i] as u64;
                }
                self.offset += 1 + width;
                Ok((major, value, false))
            }
            31 => {
                self.offset += 1;
                Ok((major, 0, true))
            }
            _ => Err(Error::InvalidMinorValue(minor)),
        }
    }

    /// Reads an unsigned integer.
    pub fn read_uint(&mut self) -> Result<u64, Error> {
        let start = self.offset;
        let (major, value, indefinite) = self.read_head()?;
        if major != 0 {
            self.offset = start;
            return Err(Error::IncorrectType("Unsigned Integer", major));
        }
        if indefinite {
            self.offset = start;
            return Err(Error::InvalidMinorValue(31));
        }
        Ok(value)
    }

    /// Reads a boolean simple value.
    pub fn read_bool(&mut self) -> Result<bool, Error> {
        let b = self.peek()?;
        match (b >> 5, b & 0x1F) {
            (7, 20) => {
                self.offset += 1;
                Ok(false)
            }
            (7, 21) => {
                self.offset += 1;
                Ok(true)
            }
            (7, minor) => Err(Error::InvalidSimpleValue(minor)),
            (major, _) => Err(Error::IncorrectType("Boolean", major)),
        }
    }

    /// Reads a definite-length byte string, returning the range of its
    /// content within the underlying slice.
    pub fn read_bytes(&mut self) -> Result<Range<usize>, Error> {
        let start = self.offset;
        let len = self.read_bytes_header()?;
        let len = usize::try_from(len).map_err(|_| {
            self.offset = start;
            Error::TooBig
        })?;
        if self.remaining() < len {
            let need = len - self.remaining();
            self.offset = start;
            return Err(Error::NeedMoreData(need));
        }
        let range = self.offset..self.offset + len;
        self.offset += len;
        Ok(range)
    }

    /// Reads only the head of a definite-length byte string, leaving the
    /// cursor at the first content byte. Used when the string body is
    /// streamed elsewhere rather than held in memory.
    pub fn read_bytes_header(&mut self) -> Result<u64, Error> {
        let start = self.offset;
        let (major, len, indefinite) = self.read_head()?;
        if major != 2 {
            self.offset = start;
            return Err(Error::IncorrectType("Byte String", major));
        }
        if indefinite {
            self.offset = start;
            return Err(Error::IndefiniteLength);
        }
        Ok(len)
    }

    /// Reads a definite-length text string.
    pub fn read_text(&mut self) -> Result<&'a str, Error> {
        let start = self.offset;
        let (major, len, indefinite) = self.read_head()?;
        if major != 3 {
            self.offset = start;
            return Err(Error::IncorrectType("Text String", major));
        }
        if indefinite {
            self.offset = start;
            return Err(Error::IndefiniteLength);
        }
        let len = usize::try_from(len).map_err(|_| {
            self.offset = start;
            Error::TooBig
        })?;
        if self.remaining() < len {
            let need = len - self.remaining();
            self.offset = start;
            return Err(Error::NeedMoreData(need));
        }
        let s = core::str::from_utf8(&self.data[self.offset..self.offset + len]).map_err(|e| {
            self.offset = start;
            e
        })?;
        self.offset += len;
        Ok(s)
    }

    /// Reads a definite-length array header, validating the element
    /// count against `[min, max]`.
    pub fn read_array(&mut self, min: u64, max: u64) -> Result<u64, Error> {
        let start = self.offset;
        let (major, count, indefinite) = self.read_head()?;
        if major != 4 {
            self.offset = start;
            return Err(Error::IncorrectType("Array", major));
        }
        if indefinite {
            self.offset = start;
            return Err(Error::IndefiniteLength);
        }
        if count < min || count > max {
            self.offset = start;
            return Err(Error::InvalidArrayLength(count, min, max));
        }
        Ok(count)
    }

    /// Reads an indefinite-length array header (0x9f).
    pub fn read_open_array(&mut self) -> Result<(), Error> {
        let b = self.peek()?;
        match (b >> 5, b & 0x1F) {
            (4, 31) => {
                self.offset += 1;
                Ok(())
            }
            (4, _) => Err(Error::IncorrectType("Indefinite-length Array", 4)),
            (major, _) => Err(Error::IncorrectType("Indefinite-length Array", major)),
        }
    }

    /// Consumes the 0xff break byte terminating an indefinite-length array.
    pub fn read_break(&mut self) -> Result<(), Error> {
        let b = self.peek()?;
        if b != 0xFF {
            return Err(Error::MissingBreak(b));
        }
        self.offset += 1;
        Ok(())
    }

    /// Reads a value that implements [`FromCbor`].
    pub fn read<T>(&mut self) -> Result<T, T::Error>
    where
        T: FromCbor,
    {
        T::from_cbor(self)
    }
}

/// Decodes a single value from the start of a slice.
pub fn parse<T>(data: &[u8]) -> Result<T, T::Error>
where
    T: FromCbor,
{
    T::from_cbor(&mut Reader::new(data))
}

macro_rules! impl_uint_from_cbor {
    ($($ty:ty),*) => {
        $(
            impl FromCbor for $ty {
                type Error = Error;

                fn from_cbor(reader: &mut Reader) -> Result<Self, Self::Error> {
                    let start = reader.offset();
                    let v = reader.read_uint()?;
                    v.try_into().map_err(|e: core::num::TryFromIntError| {
                        reader.seek(start);
                        e.into()
                    })
                }
            }
        )*
    };
}

impl_uint_from_cbor!(u8, u16, u32, usize);

impl FromCbor for u64 {
    type Error = Error;

    fn from_cbor(reader: &mut Reader) -> Result<Self, Self::Error> {
        reader.read_uint()
    }
}

impl FromCbor for bool {
    type Error = Error;

    fn from_cbor(reader: &mut Reader) -> Result<Self, Self::Error> {
        reader.read_bool()
    }
}

impl FromCbor for String {
    type Error = Error;

    fn from_cbor(reader: &mut Reader) -> Result<Self, Self::Error> {
        reader.read_text().map(str::to_string)
    }
}
