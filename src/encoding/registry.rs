//! Encoder registry.
//!
//! Maps a semantic type (plus a size preference) to a concrete encoder
//! through a static table, so callers never name an encoder type directly.
//!
//! ```text
//! TypeTag    fixed            variable
//! --------   --------------   ---------------------
//! Boolean    BooleanEncoder   -
//! Byte       ByteEncoder      -
//! Short      ShortEncoder     -
//! Integer    IntegerEncoder   CompactIntegerEncoder
//! Long       LongEncoder      CompactLongEncoder
//! Float      FloatEncoder     -
//! Double     DoubleEncoder    -
//! String     -                StringEncoder
//! Binary     -                BinaryEncoder
//! ```

use std::sync::Arc;

use crate::common::{Error, Result};
use crate::encoding::primitives::{
    BinaryEncoder, BooleanEncoder, ByteEncoder, CompactIntegerEncoder, CompactLongEncoder,
    DoubleEncoder, FloatEncoder, IntegerEncoder, LongEncoder, ShortEncoder, StringEncoder,
};
use crate::encoding::Encoder;

/// Semantic type of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Boolean,
    Byte,
    Short,
    Integer,
    Long,
    Float,
    Double,
    String,
    Binary,
}

/// Which size class the caller would rather have.
///
/// A preference the type cannot honour falls back to the other class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SizePreference {
    /// Let the registry pick (fixed when available).
    #[default]
    Auto,
    PreferFixed,
    PreferVariable,
}

/// Type descriptor shared with the rest of the storage engine.
///
/// Persisted as a single byte in tree metadata.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Boolean = 1,
    Byte = 2,
    Short = 3,
    Integer = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    String = 8,
    Binary = 9,
    /// Days since the epoch, stored as a long.
    Date = 10,
    /// Milliseconds since the epoch, stored as a long.
    DateTime = 11,
}

impl ValueType {
    /// Persisted id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Convert from a persisted id.
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            1 => ValueType::Boolean,
            2 => ValueType::Byte,
            3 => ValueType::Short,
            4 => ValueType::Integer,
            5 => ValueType::Long,
            6 => ValueType::Float,
            7 => ValueType::Double,
            8 => ValueType::String,
            9 => ValueType::Binary,
            10 => ValueType::Date,
            11 => ValueType::DateTime,
            _ => return None,
        })
    }

    /// Semantic type the descriptor is encoded as.
    pub fn type_tag(self) -> TypeTag {
        match self {
            ValueType::Boolean => TypeTag::Boolean,
            ValueType::Byte => TypeTag::Byte,
            ValueType::Short => TypeTag::Short,
            ValueType::Integer => TypeTag::Integer,
            ValueType::Long | ValueType::Date | ValueType::DateTime => TypeTag::Long,
            ValueType::Float => TypeTag::Float,
            ValueType::Double => TypeTag::Double,
            ValueType::String => TypeTag::String,
            ValueType::Binary => TypeTag::Binary,
        }
    }
}

/// Closed set of encoder implementations.
///
/// The discriminant is the encoder id persisted with encoded data.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    Boolean = 1,
    Byte = 2,
    Short = 3,
    Integer = 4,
    CompactInteger = 5,
    Long = 6,
    CompactLong = 7,
    Float = 8,
    Double = 9,
    String = 10,
    Binary = 11,
}

impl EncoderKind {
    /// Persisted encoder id.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Convert from a persisted encoder id.
    pub fn from_id(id: u8) -> Option<Self> {
        ENCODERS
            .iter()
            .flat_map(|row| [row.fixed, row.variable])
            .flatten()
            .find(|kind| kind.id() == id)
    }

    /// Semantic type this encoder handles.
    pub fn type_tag(self) -> TypeTag {
        match self {
            EncoderKind::Boolean => TypeTag::Boolean,
            EncoderKind::Byte => TypeTag::Byte,
            EncoderKind::Short => TypeTag::Short,
            EncoderKind::Integer | EncoderKind::CompactInteger => TypeTag::Integer,
            EncoderKind::Long | EncoderKind::CompactLong => TypeTag::Long,
            EncoderKind::Float => TypeTag::Float,
            EncoderKind::Double => TypeTag::Double,
            EncoderKind::String => TypeTag::String,
            EncoderKind::Binary => TypeTag::Binary,
        }
    }
}

struct Row {
    tag: TypeTag,
    fixed: Option<EncoderKind>,
    variable: Option<EncoderKind>,
}

const ENCODERS: &[Row] = &[
    Row { tag: TypeTag::Boolean, fixed: Some(EncoderKind::Boolean), variable: None },
    Row { tag: TypeTag::Byte, fixed: Some(EncoderKind::Byte), variable: None },
    Row { tag: TypeTag::Short, fixed: Some(EncoderKind::Short), variable: None },
    Row {
        tag: TypeTag::Integer,
        fixed: Some(EncoderKind::Integer),
        variable: Some(EncoderKind::CompactInteger),
    },
    Row {
        tag: TypeTag::Long,
        fixed: Some(EncoderKind::Long),
        variable: Some(EncoderKind::CompactLong),
    },
    Row { tag: TypeTag::Float, fixed: Some(EncoderKind::Float), variable: None },
    Row { tag: TypeTag::Double, fixed: Some(EncoderKind::Double), variable: None },
    Row { tag: TypeTag::String, fixed: None, variable: Some(EncoderKind::String) },
    Row { tag: TypeTag::Binary, fixed: None, variable: Some(EncoderKind::Binary) },
];

/// A Rust type the registry can produce encoders for.
pub trait Encodable: Sized + Send + Sync + 'static {
    /// Semantic type of `Self`.
    const TAG: TypeTag;

    /// Instantiate `kind` for `Self`, or `None` if it encodes another type.
    fn encoder(kind: EncoderKind) -> Option<Arc<dyn Encoder<Self>>>;
}

macro_rules! encodable {
    ($ty:ty, $tag:expr, $($kind:ident => $encoder:expr),+) => {
        impl Encodable for $ty {
            const TAG: TypeTag = $tag;

            fn encoder(kind: EncoderKind) -> Option<Arc<dyn Encoder<Self>>> {
                match kind {
                    $(EncoderKind::$kind => Some(Arc::new($encoder)),)+
                    _ => None,
                }
            }
        }
    };
}

encodable!(bool, TypeTag::Boolean, Boolean => BooleanEncoder);
encodable!(i8, TypeTag::Byte, Byte => ByteEncoder);
encodable!(i16, TypeTag::Short, Short => ShortEncoder);
encodable!(i32, TypeTag::Integer, Integer => IntegerEncoder, CompactInteger => CompactIntegerEncoder);
encodable!(i64, TypeTag::Long, Long => LongEncoder, CompactLong => CompactLongEncoder);
encodable!(f32, TypeTag::Float, Float => FloatEncoder);
encodable!(f64, TypeTag::Double, Double => DoubleEncoder);
encodable!(String, TypeTag::String, String => StringEncoder);
encodable!(Vec<u8>, TypeTag::Binary, Binary => BinaryEncoder);

/// Resolves encoders from the static table.
///
/// # Example
/// ```
/// use durabletree::encoding::{EncoderProvider, SizePreference, ValueType};
///
/// let provider = EncoderProvider::new();
///
/// let fixed = provider.encoder::<i64>(SizePreference::Auto).unwrap();
/// assert!(fixed.is_of_fixed_size());
///
/// let compact = provider.encoder::<i64>(SizePreference::PreferVariable).unwrap();
/// assert!(!compact.is_of_fixed_size());
///
/// let dates = provider
///     .encoder_for_type::<i64>(ValueType::Date, SizePreference::Auto)
///     .unwrap();
/// assert_eq!(dates.id(), fixed.id());
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct EncoderProvider;

impl EncoderProvider {
    /// Create a provider.
    pub fn new() -> Self {
        Self
    }

    /// Pick the encoder kind for `tag` honouring `preference` when possible.
    pub fn resolve(&self, tag: TypeTag, preference: SizePreference) -> Result<EncoderKind> {
        let row = ENCODERS
            .iter()
            .find(|row| row.tag == tag)
            .ok_or(Error::EncoderNotFound { tag, preference })?;

        let kind = match preference {
            SizePreference::Auto | SizePreference::PreferFixed => row.fixed.or(row.variable),
            SizePreference::PreferVariable => row.variable.or(row.fixed),
        };
        kind.ok_or(Error::EncoderNotFound { tag, preference })
    }

    /// Encoder for `T`.
    pub fn encoder<T: Encodable>(&self, preference: SizePreference) -> Result<Arc<dyn Encoder<T>>> {
        let kind = self.resolve(T::TAG, preference)?;
        T::encoder(kind).ok_or(Error::EncoderNotFound {
            tag: T::TAG,
            preference,
        })
    }

    /// Encoder for `T`, chosen through the engine's type descriptor.
    pub fn encoder_for_type<T: Encodable>(
        &self,
        value_type: ValueType,
        preference: SizePreference,
    ) -> Result<Arc<dyn Encoder<T>>> {
        if value_type.type_tag() != T::TAG {
            return Err(Error::TypeMismatch {
                expected: T::TAG,
                actual: value_type.type_tag(),
            });
        }
        self.encoder::<T>(preference)
    }

    /// Encoder for `T` identified by a persisted encoder id.
    pub fn encoder_by_id<T: Encodable>(&self, id: u8) -> Result<Arc<dyn Encoder<T>>> {
        let kind = EncoderKind::from_id(id).ok_or(Error::UnknownEncoder(id))?;
        T::encoder(kind).ok_or(Error::TypeMismatch {
            expected: T::TAG,
            actual: kind.type_tag(),
        })
    }
}
