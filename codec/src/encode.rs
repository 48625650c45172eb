/*!
A definite-length CBOR emitter.

Only the subset of RFC 8949 that BPv7 puts on the wire is supported:
unsigned integers, byte strings, text strings, booleans, and arrays.
Arrays are emitted either with a definite element count (checked when
the array closes) or as the indefinite-length form, which the caller
terminates with the 0xff break byte.
*/

use core::ops::Range;

/// A type that knows how to emit itself into an [`Encoder`].
pub trait ToCbor {
    fn to_cbor(&self, encoder: &mut Encoder);
}

/// A stateful encoder building a CBOR byte stream in a `Vec<u8>`.
pub struct Encoder {
    data: Vec<u8>,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Consumes the encoder and returns the generated bytes.
    pub fn build(self) -> Vec<u8> {
        self.data
    }

    /// Current length of the encoded data in bytes.
    #[inline]
    pub fn offset(&self) -> usize {
        self.data.len()
    }

    fn emit_uint_minor(&mut self, major: u8, val: u64) {
        const U8_MAX: u64 = (u8::MAX as u64) + 1;
        const U16_MAX: u64 = (u16::MAX as u64) + 1;
        const U32_MAX: u64 = (u32::MAX as u64) + 1;

        match val {
            0..24 => self.data.push((major << 5) | (val as u8)),
            24..U8_MAX => {
                self.data.push((major << 5) | 24u8);
                self.data.push(val as u8)
            }
            U8_MAX..U16_MAX => {
                self.data.push((major << 5) | 25u8);
                self.data.extend((val as u16).to_be_bytes())
            }
            U16_MAX..U32_MAX => {
                self.data.push((major << 5) | 26u8);
                self.data.extend((val as u32).to_be_bytes())
            }
            _ => {
                self.data.push((major << 5) | 27u8);
                self.data.extend(val.to_be_bytes())
            }
        }
    }

    /// Encodes a value that implements [`ToCbor`].
    pub fn emit<T>(&mut self, value: &T)
    where
        T: ToCbor + ?Sized,
    {
        value.to_cbor(self)
    }

    pub fn emit_uint(&mut self, value: u64) {
        self.emit_uint_minor(0, value)
    }

    pub fn emit_bool(&mut self, value: bool) {
        self.data.push((7 << 5) | if value { 21 } else { 20 })
    }

    /// Emits a definite-length byte string, returning the range of the
    /// string's content bytes within the stream.
    pub fn emit_bytes<V>(&mut self, value: &V) -> Range<usize>
    where
        V: AsRef<[u8]> + ?Sized,
    {
        let value = value.as_ref();
        self.emit_uint_minor(2, value.len() as u64);
        let start = self.offset();
        self.data.extend_from_slice(value);
        start..self.offset()
    }

    /// Emits only the header of a definite-length byte string, for
    /// callers that splice the content bytes in from elsewhere.
    pub fn emit_bytes_header(&mut self, len: u64) {
        self.emit_uint_minor(2, len)
    }

    /// Emits a definite-length text string.
    pub fn emit_text<V>(&mut self, value: &V)
    where
        V: AsRef<str> + ?Sized,
    {
        let value = value.as_ref().as_bytes();
        self.emit_uint_minor(3, value.len() as u64);
        self.data.extend_from_slice(value);
    }

    /// Splices raw, pre-encoded bytes into the stream, returning their range.
    pub fn emit_raw<V>(&mut self, value: &V) -> Range<usize>
    where
        V: AsRef<[u8]> + ?Sized,
    {
        let start = self.offset();
        self.data.extend_from_slice(value.as_ref());
        start..self.offset()
    }

    /// Emits a CBOR array.
    ///
    /// `Some(count)` produces the definite-length form and the element
    /// count is enforced when the closure returns. `None` produces the
    /// indefinite-length form terminated with a break byte.
    pub fn emit_array<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Array),
    {
        let mut a = Array::new(self, count);
        f(&mut a);
        a.end();
    }

    /// Fallible variant of [`Encoder::emit_array`].
    pub fn try_emit_array<F, E>(&mut self, count: Option<usize>, f: F) -> Result<(), E>
    where
        F: FnOnce(&mut Array) -> Result<(), E>,
    {
        let mut a = Array::new(self, count);
        f(&mut a)?;
        a.end();
        Ok(())
    }
}

/// Helper for emitting the elements of a CBOR array.
pub struct Array<'a> {
    encoder: &'a mut Encoder,
    count: Option<usize>,
    idx: usize,
}

impl<'a> Array<'a> {
    fn new(encoder: &'a mut Encoder, count: Option<usize>) -> Self {
        if let Some(count) = count {
            encoder.emit_uint_minor(4, count as u64);
        } else {
            encoder.data.push((4 << 5) | 31);
        }
        Self {
            encoder,
            count,
            idx: 0,
        }
    }

    fn next_field(&mut self) -> &mut Encoder {
        self.idx += 1;
        if let Some(count) = self.count
            && self.idx > count
        {
            panic!("Too many items added to definite length array");
        }
        self.encoder
    }

    fn end(self) {
        let Some(count) = self.count else {
            return self.encoder.data.push(0xFF);
        };
        if self.idx != count {
            panic!(
                "Definite length array is short of items: {}, expected {}",
                self.idx, count
            );
        }
    }

    /// Records that a slot will be filled out-of-band (e.g. a CRC value
    /// appended after the array body has been laid out).
    pub fn skip_value(&mut self) {
        self.next_field();
    }

    pub fn emit<T>(&mut self, value: &T)
    where
        T: ToCbor + ?Sized,
    {
        self.next_field().emit(value)
    }

    pub fn emit_uint(&mut self, value: u64) {
        self.next_field().emit_uint(value)
    }

    pub fn emit_bool(&mut self, value: bool) {
        self.next_field().emit_bool(value)
    }

    pub fn emit_bytes<V>(&mut self, value: &V) -> Range<usize>
    where
        V: AsRef<[u8]> + ?Sized,
    {
        self.next_field().emit_bytes(value)
    }

    pub fn emit_text<V>(&mut self, value: &V)
    where
        V: AsRef<str> + ?Sized,
    {
        self.next_field().emit_text(value)
    }

    pub fn emit_raw<V>(&mut self, value: &V) -> Range<usize>
    where
        V: AsRef<[u8]> + ?Sized,
    {
        self.next_field().emit_raw(value)
    }

    pub fn emit_array<F>(&mut self, count: Option<usize>, f: F)
    where
        F: FnOnce(&mut Array),
    {
        self.next_field().emit_array(count, f)
    }
}

impl<T> ToCbor for &T
where
    T: ToCbor,
{
    fn to_cbor(&self, encoder: &mut Encoder) {
        (*self).to_cbor(encoder)
    }
}

macro_rules! impl_uint_to_cbor {
    ($($ty:ty),*) => {
        $(
            impl ToCbor for $ty {
                fn to_cbor(&self, encoder: &mut Encoder) {
                    encoder.emit_uint(*self as u64)
                }
            }
        )*
    };
}

impl_uint_to_cbor!(u8, u16, u32, u64, usize);

impl ToCbor for bool {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_bool(*self)
    }
}

impl ToCbor for str {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_text(self)
    }
}

impl ToCbor for String {
    fn to_cbor(&self, encoder: &mut Encoder) {
        encoder.emit_text(self)
    }
}

/// Convenience: encode a single value into a fresh `Vec<u8>`.
pub fn emit<T>(value: &T) -> Vec<u8>
where
    T: ToCbor + ?Sized,
{
    let mut e = Encoder::new();
    e.emit(value);
    e.build()
}

/// Convenience: encode a single array into a fresh `Vec<u8>`.
pub fn emit_array<F>(count: Option<usize>, f: F) -> Vec<u8>
where
    F: FnOnce(&mut Array),
{
    let mut e = Encoder::new();
    e.emit_array(count, f);
    e.build()
}

/// Fallible variant of [`emit_array`].
pub fn try_emit_array<F, E>(count: Option<usize>, f: F) -> Result<Vec<u8>, E>
where
    F: FnOnce(&mut Array) -> Result<(), E>,
{
    let mut e = Encoder::new();
    e.try_emit_array(count, f)?;
    Ok(e.build())
}
