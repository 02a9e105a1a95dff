//! Concrete encoders for the built-in value types.
//!
//! Fixed-size encoders write little-endian primitives. The compact and
//! length-prefixed encoders build on the [`varint`](super::varint) codec.

use crate::common::{Error, Result};
use crate::encoding::varint::{
    decode_unsigned, length_of_stored_integer, read_unsigned, size_of_unsigned, write_unsigned,
    zigzag_decode, zigzag_encode,
};
use crate::encoding::{EncodedStream, Encoder, EncoderKind, UNBOUND};

/// Size check shared by the fixed-size encoders.
fn fixed_in_stream(stream: &EncodedStream, size: usize) -> Result<usize> {
    if stream.remaining() < size {
        return Err(Error::StreamUnderflow {
            needed: size,
            remaining: stream.remaining(),
        });
    }
    Ok(size)
}

macro_rules! fixed_encoder {
    ($(#[$doc:meta])* $name:ident, $ty:ty, $kind:expr, $put:ident, $get:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, Default)]
        pub struct $name;

        impl $name {
            /// Encoded size in bytes.
            pub const SIZE: usize = std::mem::size_of::<$ty>();
        }

        impl Encoder<$ty> for $name {
            fn id(&self) -> u8 {
                $kind.id()
            }

            fn minimum_size(&self) -> usize {
                Self::SIZE
            }

            fn maximum_size(&self) -> usize {
                Self::SIZE
            }

            fn exact_size(&self, _value: &$ty) -> usize {
                Self::SIZE
            }

            fn encode(&self, value: &$ty, stream: &mut EncodedStream) -> Result<()> {
                stream.$put(*value);
                Ok(())
            }

            fn decode(&self, stream: &mut EncodedStream) -> Result<$ty> {
                stream.$get()
            }

            fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize> {
                fixed_in_stream(stream, Self::SIZE)
            }
        }
    };
}

fixed_encoder!(
    /// `i16` as 2 little-endian bytes.
    ShortEncoder, i16, EncoderKind::Short, put_i16, get_i16
);
fixed_encoder!(
    /// `i32` as 4 little-endian bytes.
    IntegerEncoder, i32, EncoderKind::Integer, put_i32, get_i32
);
fixed_encoder!(
    /// `i64` as 8 little-endian bytes.
    LongEncoder, i64, EncoderKind::Long, put_i64, get_i64
);
fixed_encoder!(
    /// `f32` as its 4-byte IEEE-754 representation.
    FloatEncoder, f32, EncoderKind::Float, put_f32, get_f32
);
fixed_encoder!(
    /// `f64` as its 8-byte IEEE-754 representation.
    DoubleEncoder, f64, EncoderKind::Double, put_f64, get_f64
);

/// `bool` as a single `0`/`1` byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanEncoder;

impl Encoder<bool> for BooleanEncoder {
    fn id(&self) -> u8 {
        EncoderKind::Boolean.id()
    }

    fn minimum_size(&self) -> usize {
        1
    }

    fn maximum_size(&self) -> usize {
        1
    }

    fn exact_size(&self, _value: &bool) -> usize {
        1
    }

    fn encode(&self, value: &bool, stream: &mut EncodedStream) -> Result<()> {
        stream.put_u8(u8::from(*value));
        Ok(())
    }

    fn decode(&self, stream: &mut EncodedStream) -> Result<bool> {
        match stream.get_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::Encoding(format!("invalid boolean byte {:#04x}", other))),
        }
    }

    fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize> {
        fixed_in_stream(stream, 1)
    }
}

/// `i8` as a single byte.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteEncoder;

impl Encoder<i8> for ByteEncoder {
    fn id(&self) -> u8 {
        EncoderKind::Byte.id()
    }

    fn minimum_size(&self) -> usize {
        1
    }

    fn maximum_size(&self) -> usize {
        1
    }

    fn exact_size(&self, _value: &i8) -> usize {
        1
    }

    fn encode(&self, value: &i8, stream: &mut EncodedStream) -> Result<()> {
        stream.put_u8(*value as u8);
        Ok(())
    }

    fn decode(&self, stream: &mut EncodedStream) -> Result<i8> {
        Ok(stream.get_u8()? as i8)
    }

    fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize> {
        fixed_in_stream(stream, 1)
    }
}

/// `i32` as a ZigZag varint: 1 to 5 bytes, small magnitudes are short.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactIntegerEncoder;

impl Encoder<i32> for CompactIntegerEncoder {
    fn id(&self) -> u8 {
        EncoderKind::CompactInteger.id()
    }

    fn version(&self) -> u32 {
        1
    }

    fn minimum_size(&self) -> usize {
        1
    }

    fn maximum_size(&self) -> usize {
        5
    }

    fn exact_size(&self, value: &i32) -> usize {
        size_of_unsigned(zigzag_encode(*value as i64))
    }

    fn encode(&self, value: &i32, stream: &mut EncodedStream) -> Result<()> {
        write_unsigned(stream, zigzag_encode(*value as i64));
        Ok(())
    }

    fn decode(&self, stream: &mut EncodedStream) -> Result<i32> {
        let raw = zigzag_decode(read_unsigned(stream)?);
        i32::try_from(raw).map_err(|_| Error::Encoding(format!("{} does not fit in i32", raw)))
    }

    fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize> {
        length_of_stored_integer(stream)
    }
}

/// `i64` as a ZigZag varint: 1 to 10 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactLongEncoder;

impl Encoder<i64> for CompactLongEncoder {
    fn id(&self) -> u8 {
        EncoderKind::CompactLong.id()
    }

    fn version(&self) -> u32 {
        1
    }

    fn minimum_size(&self) -> usize {
        1
    }

    fn maximum_size(&self) -> usize {
        10
    }

    fn exact_size(&self, value: &i64) -> usize {
        size_of_unsigned(zigzag_encode(*value))
    }

    fn encode(&self, value: &i64, stream: &mut EncodedStream) -> Result<()> {
        write_unsigned(stream, zigzag_encode(*value));
        Ok(())
    }

    fn decode(&self, stream: &mut EncodedStream) -> Result<i64> {
        Ok(zigzag_decode(read_unsigned(stream)?))
    }

    fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize> {
        length_of_stored_integer(stream)
    }
}

/// Size of a varint length prefix plus the payload it announces.
fn prefixed_in_stream(stream: &EncodedStream) -> Result<usize> {
    let (len, prefix) = decode_unsigned(&stream.as_slice()[stream.position()..])?;
    let total = prefix + len as usize;
    if stream.remaining() < total {
        return Err(Error::StreamUnderflow {
            needed: total,
            remaining: stream.remaining(),
        });
    }
    Ok(total)
}

/// Read a varint length prefix followed by that many bytes.
fn read_prefixed(stream: &mut EncodedStream) -> Result<Vec<u8>> {
    let start = stream.position();
    let len = read_unsigned(stream)? as usize;
    if stream.remaining() < len {
        let remaining = stream.remaining();
        stream.set_position(start)?;
        return Err(Error::StreamUnderflow {
            needed: len,
            remaining,
        });
    }
    Ok(stream.get_bytes(len)?.to_vec())
}

/// UTF-8 `String` with a varint byte-length prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringEncoder;

impl Encoder<String> for StringEncoder {
    fn id(&self) -> u8 {
        EncoderKind::String.id()
    }

    fn minimum_size(&self) -> usize {
        1
    }

    fn maximum_size(&self) -> usize {
        UNBOUND
    }

    fn exact_size(&self, value: &String) -> usize {
        size_of_unsigned(value.len() as u64) + value.len()
    }

    fn encode(&self, value: &String, stream: &mut EncodedStream) -> Result<()> {
        write_unsigned(stream, value.len() as u64);
        stream.put_bytes(value.as_bytes());
        Ok(())
    }

    fn decode(&self, stream: &mut EncodedStream) -> Result<String> {
        String::from_utf8(read_prefixed(stream)?)
            .map_err(|e| Error::Encoding(format!("invalid UTF-8 string: {}", e)))
    }

    fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize> {
        prefixed_in_stream(stream)
    }
}

/// Raw bytes with a varint length prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryEncoder;

impl Encoder<Vec<u8>> for BinaryEncoder {
    fn id(&self) -> u8 {
        EncoderKind::Binary.id()
    }

    fn minimum_size(&self) -> usize {
        1
    }

    fn maximum_size(&self) -> usize {
        UNBOUND
    }

    fn exact_size(&self, value: &Vec<u8>) -> usize {
        size_of_unsigned(value.len() as u64) + value.len()
    }

    fn encode(&self, value: &Vec<u8>, stream: &mut EncodedStream) -> Result<()> {
        write_unsigned(stream, value.len() as u64);
        stream.put_bytes(value);
        Ok(())
    }

    fn decode(&self, stream: &mut EncodedStream) -> Result<Vec<u8>> {
        read_prefixed(stream)
    }

    fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize> {
        prefixed_in_stream(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_to_vec;

    #[test]
    fn test_size_classes() {
        assert!(Encoder::<i32>::is_of_fixed_size(&IntegerEncoder));
        assert!(Encoder::<bool>::is_of_fixed_size(&BooleanEncoder));

        assert!(!CompactLongEncoder.is_of_fixed_size());
        assert!(CompactLongEncoder.is_of_bound_size());

        assert!(!StringEncoder.is_of_fixed_size());
        assert!(!StringEncoder.is_of_bound_size());
        assert_eq!(StringEncoder.maximum_size(), UNBOUND);
    }

    #[test]
    fn test_fixed_layout() {
        assert_eq!(encode_to_vec(&IntegerEncoder, &1i32).unwrap(), vec![1, 0, 0, 0]);
        assert_eq!(encode_to_vec(&ShortEncoder, &-1i16).unwrap(), vec![0xFF, 0xFF]);
        assert_eq!(encode_to_vec(&BooleanEncoder, &true).unwrap(), vec![1]);
        assert_eq!(encode_to_vec(&ByteEncoder, &-2i8).unwrap(), vec![0xFE]);
    }

    #[test]
    fn test_compact_long_is_short_for_small_values() {
        assert_eq!(encode_to_vec(&CompactLongEncoder, &0i64).unwrap(), vec![0x80]);
        assert_eq!(encode_to_vec(&CompactLongEncoder, &-1i64).unwrap(), vec![0x81]);
        assert_eq!(CompactLongEncoder.exact_size(&i64::MIN), 10);

        let mut stream = EncodedStream::from_bytes(encode_to_vec(&CompactLongEncoder, &-150i64).unwrap());
        assert_eq!(CompactLongEncoder.decode(&mut stream).unwrap(), -150);
    }

    #[test]
    fn test_compact_integer_rejects_wide_values() {
        let bytes = encode_to_vec(&CompactLongEncoder, &(i32::MAX as i64 + 1)).unwrap();
        let mut stream = EncodedStream::from_bytes(bytes);
        assert!(matches!(
            CompactIntegerEncoder.decode(&mut stream),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn test_string_layout() {
        let value = "héllo".to_string();
        let bytes = encode_to_vec(&StringEncoder, &value).unwrap();

        // 6 UTF-8 bytes, length prefix 6 | terminator
        assert_eq!(bytes[0], 0x86);
        assert_eq!(bytes.len(), StringEncoder.exact_size(&value));

        let mut stream = EncodedStream::from_bytes(bytes);
        assert_eq!(StringEncoder.exact_size_in_stream(&stream).unwrap(), 7);
        assert_eq!(stream.position(), 0);
        assert_eq!(StringEncoder.decode(&mut stream).unwrap(), value);
    }

    #[test]
    fn test_exact_size_in_stream_skips_values() {
        let mut stream = EncodedStream::new();
        BinaryEncoder.encode(&vec![7; 200], &mut stream).unwrap();
        LongEncoder.encode(&42i64, &mut stream).unwrap();
        stream.set_position(0).unwrap();

        let skip = BinaryEncoder.exact_size_in_stream(&stream).unwrap();
        assert_eq!(skip, 202);
        stream.seek(skip as isize).unwrap();
        assert_eq!(LongEncoder.decode(&mut stream).unwrap(), 42);
    }

    #[test]
    fn test_truncated_string() {
        let mut bytes = encode_to_vec(&StringEncoder, &"abcdef".to_string()).unwrap();
        bytes.truncate(4);

        let mut stream = EncodedStream::from_bytes(bytes);
        assert!(StringEncoder.exact_size_in_stream(&stream).is_err());
        assert!(StringEncoder.decode(&mut stream).is_err());
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_invalid_boolean() {
        let mut stream = EncodedStream::from_slice(&[2]);
        assert!(BooleanEncoder.decode(&mut stream).is_err());
    }
}
