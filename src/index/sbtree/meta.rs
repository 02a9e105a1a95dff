//! Metadata page (page 0) of a tree file.

use crate::common::{Error, Result};
use crate::encoding::{EncodedStream, ValueType};
use crate::storage::page::Page;

const MAGIC: u32 = 0x5342_5431;
const FORMAT_VERSION: u16 = 1;
const UNBOUND_KEY_SIZE: u32 = u32::MAX;

/// Encoding configuration recorded when a tree is created.
///
/// # Layout (payload bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     magic
/// 4       2     format version
/// 6       1     key encoder id
/// 7       1     value encoder id
/// 8       1     key type (ValueType id)
/// 9       4     key size (u32::MAX = unbound)
/// 13      1     null keys allowed
/// 14      4     generation
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct TreeMeta {
    pub key_encoder: u8,
    pub value_encoder: u8,
    pub key_type: ValueType,
    pub key_size: Option<usize>,
    pub null_key_allowed: bool,
    pub generation: u32,
}

impl TreeMeta {
    pub const SIZE: usize = 18;

    pub fn write_to(&self, page: &mut Page) -> Result<()> {
        let key_size = match self.key_size {
            None => UNBOUND_KEY_SIZE,
            Some(size) => u32::try_from(size)
                .ok()
                .filter(|&size| size != UNBOUND_KEY_SIZE)
                .ok_or_else(|| Error::Encoding(format!("key size {} too large", size)))?,
        };

        let mut stream = EncodedStream::with_capacity(Self::SIZE);
        stream.put_u32(MAGIC);
        stream.put_u16(FORMAT_VERSION);
        stream.put_u8(self.key_encoder);
        stream.put_u8(self.value_encoder);
        stream.put_u8(self.key_type.id());
        stream.put_u32(key_size);
        stream.put_u8(self.null_key_allowed as u8);
        stream.put_u32(self.generation);

        page.payload_mut()[..Self::SIZE].copy_from_slice(stream.as_slice());
        Ok(())
    }

    pub fn read_from(page: &Page) -> Result<Self> {
        let mut stream = EncodedStream::from_slice(&page.payload()[..Self::SIZE]);

        let magic = stream.get_u32()?;
        if magic != MAGIC {
            return Err(Error::Corrupted(format!("bad tree magic {:#010x}", magic)));
        }
        let version = stream.get_u16()?;
        if version != FORMAT_VERSION {
            return Err(Error::Corrupted(format!(
                "unsupported tree format version {}",
                version
            )));
        }

        let key_encoder = stream.get_u8()?;
        let value_encoder = stream.get_u8()?;
        let key_type_id = stream.get_u8()?;
        let key_type = ValueType::from_id(key_type_id)
            .ok_or_else(|| Error::Corrupted(format!("unknown key type {}", key_type_id)))?;
        let key_size = match stream.get_u32()? {
            UNBOUND_KEY_SIZE => None,
            size => Some(size as usize),
        };
        let null_key_allowed = stream.get_u8()? != 0;
        let generation = stream.get_u32()?;

        Ok(Self {
            key_encoder,
            value_encoder,
            key_type,
            key_size,
            null_key_allowed,
            generation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_layout() {
        let meta = TreeMeta {
            key_encoder: 4,
            value_encoder: 10,
            key_type: ValueType::Integer,
            key_size: None,
            null_key_allowed: true,
            generation: 7,
        };

        let mut page = Page::new();
        meta.write_to(&mut page).unwrap();

        let payload = page.payload();
        assert_eq!(payload[6], 4);
        assert_eq!(payload[7], 10);
        assert_eq!(payload[8], ValueType::Integer.id());
        assert_eq!(&payload[9..13], &[0xFF; 4]);
        assert_eq!(payload[13], 1);
        assert_eq!(TreeMeta::read_from(&page).unwrap(), meta);
    }

    #[test]
    fn test_zeroed_page_is_rejected() {
        assert!(matches!(
            TreeMeta::read_from(&Page::new()),
            Err(Error::Corrupted(_))
        ));
    }
}
