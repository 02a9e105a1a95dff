//! The [`Encoder`] trait.

use std::fmt;

use crate::common::Result;
use crate::encoding::EncodedStream;

/// Size sentinel meaning "no upper bound".
pub const UNBOUND: usize = usize::MAX;

/// Converts values of `T` to and from an [`EncodedStream`].
///
/// Encoders are stateless and shared behind `Arc<dyn Encoder<T>>`, so one
/// instance serves every tree that uses it.
///
/// # Size bounds
/// | min | max | meaning |
/// |-----|-----|---------|
/// | n   | n   | fixed size (`is_of_fixed_size`) |
/// | a   | b   | variable but bounded (`is_of_bound_size`) |
/// | a   | [`UNBOUND`] | variable, unbounded |
pub trait Encoder<T>: Send + Sync + fmt::Debug {
    /// Identity persisted alongside encoded data.
    fn id(&self) -> u8;

    /// Format version; lets several schemes coexist for one logical type.
    fn version(&self) -> u32 {
        0
    }

    /// Smallest possible encoded size.
    fn minimum_size(&self) -> usize;

    /// Largest possible encoded size, or [`UNBOUND`].
    fn maximum_size(&self) -> usize;

    /// Whether every value encodes to the same number of bytes.
    fn is_of_fixed_size(&self) -> bool {
        self.maximum_size() != UNBOUND && self.minimum_size() == self.maximum_size()
    }

    /// Whether encoded values have an upper size bound.
    fn is_of_bound_size(&self) -> bool {
        self.maximum_size() != UNBOUND
    }

    /// Exact encoded size of `value`.
    fn exact_size(&self, value: &T) -> usize;

    /// Write `value` at the stream's position, advancing past it.
    fn encode(&self, value: &T, stream: &mut EncodedStream) -> Result<()>;

    /// Read a value at the stream's position, advancing past it.
    fn decode(&self, stream: &mut EncodedStream) -> Result<T>;

    /// Size of the value stored at the stream's position, without decoding it.
    fn exact_size_in_stream(&self, stream: &EncodedStream) -> Result<usize>;
}

/// Encode `value` into a fresh buffer.
pub fn encode_to_vec<T, E: Encoder<T> + ?Sized>(encoder: &E, value: &T) -> Result<Vec<u8>> {
    let mut stream = EncodedStream::with_capacity(encoder.exact_size(value));
    encoder.encode(value, &mut stream)?;
    Ok(stream.into_inner())
}
