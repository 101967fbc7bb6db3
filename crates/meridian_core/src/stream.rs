//! # Binary Streams
//!
//! Ordered, untagged little-endian encoding for inter-process messages.
//!
//! ## Design
//!
//! - Fields carry no tags and no lengths except where a field is itself
//!   variable-length (blobs, strings). Reader and writer must agree on the
//!   field order exactly.
//! - Writing never fails: the output buffer grows as needed.
//! - Reading returns [`StreamError`] on underflow instead of panicking, so a
//!   malformed message from another process is a warning, not a crash.
//! - Pod types (vectors, directions) are copied directly.

use bytemuck::{bytes_of, pod_read_unaligned, Pod};

use crate::error::{StreamError, StreamResult};

/// Growable binary writer.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BinaryOStream {
    buffer: Vec<u8>,
}

impl BinaryOStream {
    /// Creates an empty stream.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Creates an empty stream with preallocated room.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Returns the number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if no bytes have been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns a slice of the written data.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the stream and returns its bytes.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Discards everything written so far.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Writes a single byte.
    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Writes a bool as one byte.
    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.buffer.push(u8::from(value));
    }

    /// Writes a u16 in little-endian format.
    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u32 in little-endian format.
    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a u64 in little-endian format.
    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes an i32 in little-endian format.
    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a f32 in little-endian format.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        self.buffer.extend_from_slice(&value.to_le_bytes());
    }

    /// Writes a Pod type directly.
    #[inline]
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.buffer.extend_from_slice(bytes_of(value));
    }

    /// Appends raw bytes with no length prefix.
    #[inline]
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a length-prefixed byte blob.
    ///
    /// # Panics
    ///
    /// Panics if the blob is longer than `u32::MAX` bytes.
    pub fn write_blob(&mut self, bytes: &[u8]) {
        let len = u32::try_from(bytes.len()).expect("blob longer than u32::MAX");
        self.write_u32(len);
        self.buffer.extend_from_slice(bytes);
    }

    /// Writes a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, value: &str) {
        self.write_blob(value.as_bytes());
    }
}

/// Binary reader over a borrowed buffer.
#[derive(Clone, Debug)]
pub struct BinaryIStream<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> BinaryIStream<'a> {
    /// Creates a reader over `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Returns the number of unread bytes.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    /// Returns true once every byte has been read.
    #[inline]
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Fails if any bytes remain unread.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::TrailingBytes`] if the stream is not exhausted.
    pub fn finish(&self) -> StreamResult<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(StreamError::TrailingBytes(n)),
        }
    }

    fn take(&mut self, needed: usize) -> StreamResult<&'a [u8]> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(StreamError::Underflow { needed, remaining });
        }
        let bytes = &self.buffer[self.position..self.position + needed];
        self.position += needed;
        Ok(bytes)
    }

    fn take_array<const N: usize>(&mut self) -> StreamResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Reads a single byte.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Underflow`] if the stream is exhausted.
    #[inline]
    pub fn read_u8(&mut self) -> StreamResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    /// Reads a bool written by [`BinaryOStream::write_bool`].
    ///
    /// # Errors
    ///
    /// Fails on underflow or on a byte other than 0 or 1.
    pub fn read_bool(&mut self) -> StreamResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StreamError::InvalidValue {
                what: "bool",
                value: u64::from(other),
            }),
        }
    }

    /// Reads a little-endian u16.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Underflow`] if fewer than 2 bytes remain.
    #[inline]
    pub fn read_u16(&mut self) -> StreamResult<u16> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    /// Reads a little-endian u32.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Underflow`] if fewer than 4 bytes remain.
    #[inline]
    pub fn read_u32(&mut self) -> StreamResult<u32> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    /// Reads a little-endian u64.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Underflow`] if fewer than 8 bytes remain.
    #[inline]
    pub fn read_u64(&mut self) -> StreamResult<u64> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    /// Reads a little-endian i32.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Underflow`] if fewer than 4 bytes remain.
    #[inline]
    pub fn read_i32(&mut self) -> StreamResult<i32> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    /// Reads a little-endian f32.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Underflow`] if fewer than 4 bytes remain.
    #[inline]
    pub fn read_f32(&mut self) -> StreamResult<f32> {
        Ok(f32::from_le_bytes(self.take_array()?))
    }

    /// Reads a Pod type written by [`BinaryOStream::write_pod`].
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::Underflow`] if the value does not fit.
    pub fn read_pod<T: Pod>(&mut self) -> StreamResult<T> {
        let bytes = self.take(std::mem::size_of::<T>())?;
        Ok(pod_read_unaligned(bytes))
    }

    /// Reads a length-prefixed blob, borrowing from the underlying buffer.
    ///
    /// # Errors
    ///
    /// Fails if the prefix or the payload is truncated.
    pub fn read_blob(&mut self) -> StreamResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Reads a length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Fails on truncation or invalid UTF-8.
    pub fn read_string(&mut self) -> StreamResult<String> {
        let bytes = self.read_blob()?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| StreamError::InvalidUtf8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_shared::Vec3;

    #[test]
    fn test_fields_read_back_in_order() {
        let mut out = BinaryOStream::new();
        out.write_u8(7);
        out.write_u16(0xBEEF);
        out.write_i32(-5);
        out.write_f32(1.5);
        out.write_pod(&Vec3::new(1.0, 2.0, 3.0));
        out.write_str("trap");
        out.write_bool(true);

        let mut input = BinaryIStream::new(out.as_slice());
        assert_eq!(input.read_u8().unwrap(), 7);
        assert_eq!(input.read_u16().unwrap(), 0xBEEF);
        assert_eq!(input.read_i32().unwrap(), -5);
        assert!((input.read_f32().unwrap() - 1.5).abs() < f32::EPSILON);
        assert_eq!(input.read_pod::<Vec3>().unwrap(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(input.read_string().unwrap(), "trap");
        assert!(input.read_bool().unwrap());
        assert!(input.finish().is_ok());
    }

    #[test]
    fn test_underflow_is_an_error() {
        let mut input = BinaryIStream::new(&[1, 2]);
        assert_eq!(
            input.read_u32(),
            Err(StreamError::Underflow {
                needed: 4,
                remaining: 2
            })
        );
        assert_eq!(input.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn test_truncated_blob() {
        let mut out = BinaryOStream::new();
        out.write_u32(10);
        out.write_raw(&[0; 3]);
        let mut input = BinaryIStream::new(out.as_slice());
        assert!(matches!(input.read_blob(), Err(StreamError::Underflow { .. })));
    }

    #[test]
    fn test_trailing_bytes() {
        let input = BinaryIStream::new(&[0, 0]);
        assert_eq!(input.finish(), Err(StreamError::TrailingBytes(2)));
    }

    #[test]
    fn test_invalid_bool() {
        let mut input = BinaryIStream::new(&[2]);
        assert!(matches!(
            input.read_bool(),
            Err(StreamError::InvalidValue { what: "bool", .. })
        ));
    }
}
