//! Variable-length unsigned integers.
//!
//! # Format
//! A value is split into 7-bit groups, least-significant group first, one
//! byte per group. The high bit is **clear** on every byte except the last
//! one, where it is **set** to terminate the sequence:
//!
//! ```text
//! value   bytes
//! -----   -----------------
//! 0       80
//! 127     FF
//! 128     00 81
//! 300     2C 82
//! 16384   00 00 81
//! ```
//!
//! This is the reverse of the usual LEB128 continuation bit, so the two are
//! not interchangeable.

use crate::common::{Error, Result};
use crate::encoding::EncodedStream;

/// High bit marking the terminator byte.
const TERMINATOR: u8 = 0x80;

/// Payload bits per byte.
const GROUP_MASK: u8 = 0x7F;

/// Bytes needed for `u64::MAX`.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies once encoded.
#[inline]
pub fn size_of_unsigned(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        let bits = 64 - value.leading_zeros() as usize;
        bits.div_ceil(7)
    }
}

/// Append the encoding of `value` to `out`. Returns the number of bytes written.
pub fn encode_unsigned(mut value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    loop {
        let group = (value as u8) & GROUP_MASK;
        value >>= 7;
        if value == 0 {
            out.push(group | TERMINATOR);
            return out.len() - start;
        }
        out.push(group);
    }
}

/// Decode a value from the front of `src`. Returns the value and its length.
pub fn decode_unsigned(src: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    for (index, &byte) in src.iter().enumerate() {
        value = accumulate(value, index, byte)?;
        if byte & TERMINATOR != 0 {
            return Ok((value, index + 1));
        }
    }
    Err(Error::StreamUnderflow {
        needed: src.len() + 1,
        remaining: src.len(),
    })
}

/// Write `value` at the stream's position. Returns the number of bytes written.
pub fn write_unsigned(stream: &mut EncodedStream, value: u64) -> usize {
    let mut scratch = Vec::with_capacity(MAX_VARINT_LEN);
    let written = encode_unsigned(value, &mut scratch);
    stream.put_bytes(&scratch);
    written
}

/// Read a value at the stream's position, advancing past it.
///
/// On error the position is left where it was.
pub fn read_unsigned(stream: &mut EncodedStream) -> Result<u64> {
    let start = stream.position();
    let mut value = 0u64;
    for index in 0..MAX_VARINT_LEN {
        let byte = match stream.get_u8() {
            Ok(byte) => byte,
            Err(e) => {
                stream.set_position(start)?;
                return Err(e);
            }
        };
        value = match accumulate(value, index, byte) {
            Ok(value) => value,
            Err(e) => {
                stream.set_position(start)?;
                return Err(e);
            }
        };
        if byte & TERMINATOR != 0 {
            return Ok(value);
        }
    }
    stream.set_position(start)?;
    Err(Error::VarIntOverflow)
}

/// Length of the integer stored at the stream's position.
///
/// Scans forward for the terminator byte; the stream is only borrowed, so
/// its position cannot change.
pub fn length_of_stored_integer(stream: &EncodedStream) -> Result<usize> {
    for index in 0..MAX_VARINT_LEN {
        if stream.peek_u8(index)? & TERMINATOR != 0 {
            return Ok(index + 1);
        }
    }
    Err(Error::VarIntOverflow)
}

/// Map a signed value onto an unsigned one so small magnitudes stay short.
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode`].
#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

#[inline]
fn accumulate(value: u64, index: usize, byte: u8) -> Result<u64> {
    if index >= MAX_VARINT_LEN {
        return Err(Error::VarIntOverflow);
    }
    let group = (byte & GROUP_MASK) as u64;
    let shift = 7 * index as u32;
    // The tenth group may only carry the single remaining bit.
    if index == MAX_VARINT_LEN - 1 && group > 1 {
        return Err(Error::VarIntOverflow);
    }
    Ok(value | (group << shift))
}
