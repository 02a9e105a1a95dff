//! Typed encoder framework.
//!
//! Converts typed values to and from byte streams, independent of any tree
//! logic:
//! - [`EncodedStream`] - positioned cursor over a byte buffer
//! - [`varint`] - the variable-length unsigned-integer codec
//! - [`Encoder`] - the per-type encoding contract
//! - [`primitives`] - built-in encoders
//! - [`EncoderProvider`] - static registry resolving encoders by type

mod encoder;
pub mod primitives;
mod registry;
mod stream;
pub mod varint;

pub use encoder::{encode_to_vec, Encoder, UNBOUND};
pub use registry::{Encodable, EncoderKind, EncoderProvider, SizePreference, TypeTag, ValueType};
pub use stream::EncodedStream;
