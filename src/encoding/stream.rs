//! Encoded stream - a positioned cursor over a byte buffer.

use crate::common::{Error, Result};

/// A byte buffer with an explicit read/write position.
///
/// Reads consume bytes from the current position; writes overwrite bytes at
/// the current position and extend the buffer when they run past its end.
/// Multi-byte primitives are little-endian.
///
/// A stream is scoped to one encode/decode call; nothing long-lived owns it.
///
/// # Example
/// ```
/// use durabletree::encoding::EncodedStream;
///
/// let mut stream = EncodedStream::new();
/// stream.put_u32(7);
/// stream.put_u8(1);
///
/// stream.set_position(0).unwrap();
/// assert_eq!(stream.get_u32().unwrap(), 7);
/// assert_eq!(stream.get_u8().unwrap(), 1);
/// assert_eq!(stream.remaining(), 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedStream {
    buf: Vec<u8>,
    pos: usize,
}

macro_rules! primitive {
    ($put:ident, $get:ident, $ty:ty) => {
        #[doc = concat!("Write a little-endian `", stringify!($ty), "`.")]
        #[inline]
        pub fn $put(&mut self, value: $ty) {
            self.put_bytes(&value.to_le_bytes());
        }

        #[doc = concat!("Read a little-endian `", stringify!($ty), "`.")]
        #[inline]
        pub fn $get(&mut self) -> Result<$ty> {
            let mut raw = [0u8; std::mem::size_of::<$ty>()];
            let len = raw.len();
            raw.copy_from_slice(self.get_bytes(len)?);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

impl EncodedStream {
    /// Create an empty stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty stream with preallocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            pos: 0,
        }
    }

    /// Wrap existing bytes, positioned at the start.
    pub fn from_bytes(buf: Vec<u8>) -> Self {
        Self { buf, pos: 0 }
    }

    /// Copy a slice into a new stream, positioned at the start.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_bytes(data.to_vec())
    }

    /// Current position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move to an absolute position (at most `len()`).
    pub fn set_position(&mut self, pos: usize) -> Result<()> {
        if pos > self.buf.len() {
            return Err(Error::StreamUnderflow {
                needed: pos,
                remaining: self.buf.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    /// Move relative to the current position.
    pub fn seek(&mut self, delta: isize) -> Result<()> {
        let target = self
            .pos
            .checked_add_signed(delta)
            .ok_or(Error::StreamUnderflow {
                needed: delta.unsigned_abs(),
                remaining: self.pos,
            })?;
        if target > self.buf.len() {
            return Err(Error::StreamUnderflow {
                needed: delta.unsigned_abs(),
                remaining: self.remaining(),
            });
        }
        self.pos = target;
        Ok(())
    }

    /// Total number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Bytes between the position and the end of the buffer.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Write one byte.
    #[inline]
    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    /// Read one byte.
    #[inline]
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.get_bytes(1)?[0])
    }

    /// Look at the byte `offset` bytes past the position without moving.
    pub fn peek_u8(&self, offset: usize) -> Result<u8> {
        self.buf
            .get(self.pos + offset)
            .copied()
            .ok_or(Error::StreamUnderflow {
                needed: offset + 1,
                remaining: self.remaining(),
            })
    }

    /// Write raw bytes at the position, extending the buffer if needed.
    pub fn put_bytes(&mut self, data: &[u8]) {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
    }

    /// Read `len` raw bytes.
    pub fn get_bytes(&mut self, len: usize) -> Result<&[u8]> {
        if len > self.remaining() {
            return Err(Error::StreamUnderflow {
                needed: len,
                remaining: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += len;
        Ok(&self.buf[start..self.pos])
    }

    primitive!(put_u16, get_u16, u16);
    primitive!(put_u32, get_u32, u32);
    primitive!(put_u64, get_u64, u64);
    primitive!(put_i16, get_i16, i16);
    primitive!(put_i32, get_i32, i32);
    primitive!(put_i64, get_i64, i64);
    primitive!(put_f32, get_f32, f32);
    primitive!(put_f64, get_f64, f64);

    /// The whole buffer, regardless of position.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the stream and return its buffer.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
