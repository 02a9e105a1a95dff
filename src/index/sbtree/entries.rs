//! Entry log pages (pages 1..) of a tree file.
//!
//! Every acknowledged mutation appends one record to the last entry page,
//! allocating a new page when the record does not fit. Opening a tree
//! replays the log from the first entry page.
//!
//! # Page payload
//! ```text
//! ┌──────────┬──────────┬──────────┬─────┬──────────────┐
//! │ used u16 │ record 0 │ record 1 │ ... │  free space  │
//! └──────────┴──────────┴──────────┴─────┴──────────────┘
//! record = [kind u8][key]?[value]?[crc32 u32]
//! ```
//!
//! # Interrupted appends
//! A crash during an append can leave the last page zeroed (allocated but
//! never written) or torn (partly rewritten). Records already on the page
//! keep their bytes in both images, so replay keeps every record of that
//! page whose checksum holds and [`repair`] reseals or cuts off the page.

use crate::common::{Error, FileId, PageId, Result};
use crate::encoding::{EncodedStream, Encoder};
use crate::storage::page::{Page, PageType};
use crate::storage::{AtomicOperation, PageStorage};

const USED_SIZE: usize = 2;

/// Record bytes one entry page can hold.
pub(super) const CAPACITY: usize = Page::PAYLOAD_SIZE - USED_SIZE;

const KIND_PUT: u8 = 1;
const KIND_REMOVE: u8 = 2;
const KIND_PUT_NULL: u8 = 3;
const KIND_REMOVE_NULL: u8 = 4;

/// A mutation to append.
pub(super) enum RecordRef<'a, K, V> {
    Put(&'a K, &'a V),
    Remove(&'a K),
    PutNull(&'a V),
    RemoveNull,
}

impl<K, V> RecordRef<'_, K, V> {
    pub fn encode(&self, keys: &dyn Encoder<K>, values: &dyn Encoder<V>) -> Result<Vec<u8>> {
        let mut stream = EncodedStream::new();
        match self {
            RecordRef::Put(key, value) => {
                stream.put_u8(KIND_PUT);
                keys.encode(key, &mut stream)?;
                values.encode(value, &mut stream)?;
            }
            RecordRef::Remove(key) => {
                stream.put_u8(KIND_REMOVE);
                keys.encode(key, &mut stream)?;
            }
            RecordRef::PutNull(value) => {
                stream.put_u8(KIND_PUT_NULL);
                values.encode(value, &mut stream)?;
            }
            RecordRef::RemoveNull => stream.put_u8(KIND_REMOVE_NULL),
        }
        let crc = crc32fast::hash(stream.as_slice());
        stream.put_u32(crc);

        let record = stream.into_inner();
        if record.len() > CAPACITY {
            return Err(Error::RecordTooLarge {
                size: record.len(),
                limit: CAPACITY,
            });
        }
        Ok(record)
    }
}

/// A mutation read back from the log.
#[derive(Debug, PartialEq)]
pub(super) enum Record<K, V> {
    Put(K, V),
    Remove(K),
    PutNull(V),
    RemoveNull,
}

/// Last entry page and the record bytes already used in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Tail {
    pub page: PageId,
    pub used: usize,
}

/// End of the log as found by [`replay`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct LogEnd {
    /// Where the next record goes.
    pub tail: Option<Tail>,
    /// Last page, left unsealed by an interrupted append. Its valid records
    /// end at `tail` when `tail` is on it; otherwise it has none.
    pub torn: Option<PageId>,
}

/// Append an encoded record, returning the new tail.
pub(super) fn append(
    op: &mut AtomicOperation,
    file: FileId,
    tail: Option<Tail>,
    record: &[u8],
) -> Result<Tail> {
    let (page_id, mut page, used) = match tail {
        Some(tail) if tail.used + record.len() <= CAPACITY => {
            (tail.page, op.read_page(file, tail.page)?, tail.used)
        }
        _ => (op.allocate_page(file)?, Page::new(), 0),
    };

    let start = USED_SIZE + used;
    let new_used = used + record.len();
    let payload = page.payload_mut();
    payload[start..start + record.len()].copy_from_slice(record);
    payload[..USED_SIZE].copy_from_slice(&(new_used as u16).to_le_bytes());

    page.seal(PageType::TreeEntries, page_id, op.id());
    op.write_page(file, page_id, &page)?;

    Ok(Tail {
        page: page_id,
        used: new_used,
    })
}

/// Replay every entry page of `file`, oldest first.
///
/// Every page but the last must be sealed. A last page that fails its
/// checksum is taken for an interrupted append and salvaged.
pub(super) fn replay<K, V>(
    storage: &dyn PageStorage,
    file: FileId,
    keys: &dyn Encoder<K>,
    values: &dyn Encoder<V>,
    mut apply: impl FnMut(Record<K, V>),
) -> Result<LogEnd> {
    let page_count = storage.page_count(file)?;
    let mut end = LogEnd::default();

    for n in 1..page_count {
        let page_id = PageId::new(n);
        let page = storage.read_page(file, page_id)?;

        let used = match page.expect_type(PageType::TreeEntries, file, page_id) {
            Ok(()) => replay_sealed(&page, file, page_id, keys, values, &mut apply)?,
            Err(Error::ChecksumMismatch { .. }) if n + 1 == page_count && is_unsealed(&page) => {
                end.torn = Some(page_id);
                salvage(&page, keys, values, &mut apply)
            }
            Err(e) => return Err(e),
        };
        if used > 0 || end.torn.is_none() {
            end.tail = Some(Tail {
                page: page_id,
                used,
            });
        }
    }
    Ok(end)
}

/// Reseal the page an interrupted append left behind, keeping its valid
/// records, or cut it off if it has none.
pub(super) fn repair(op: &mut AtomicOperation, file: FileId, end: &LogEnd) -> Result<()> {
    let Some(torn) = end.torn else {
        return Ok(());
    };

    match end.tail {
        Some(tail) if tail.page == torn => {
            let old = op.read_page(file, torn)?;
            let records = USED_SIZE..USED_SIZE + tail.used;

            let mut page = Page::new();
            let payload = page.payload_mut();
            payload[records.clone()].copy_from_slice(&old.payload()[records]);
            payload[..USED_SIZE].copy_from_slice(&(tail.used as u16).to_le_bytes());
            page.seal(PageType::TreeEntries, torn, op.id());
            op.write_page(file, torn, &page)
        }
        _ => op.truncate_pages(file, torn.0),
    }
}

fn replay_sealed<K, V>(
    page: &Page,
    file: FileId,
    page_id: PageId,
    keys: &dyn Encoder<K>,
    values: &dyn Encoder<V>,
    apply: &mut impl FnMut(Record<K, V>),
) -> Result<usize> {
    let payload = page.payload();
    let used = u16::from_le_bytes([payload[0], payload[1]]) as usize;
    if used > CAPACITY {
        return Err(Error::Corrupted(format!(
            "{} of {} claims {} used bytes",
            page_id, file, used
        )));
    }

    let mut stream = EncodedStream::from_slice(&payload[USED_SIZE..USED_SIZE + used]);
    while stream.remaining() > 0 {
        apply(decode_record(&mut stream, keys, values)?);
    }
    Ok(used)
}

/// Whether a page failing its checksum can be an entry page caught mid-write.
fn is_unsealed(page: &Page) -> bool {
    matches!(
        page.header().page_type,
        PageType::Invalid | PageType::TreeEntries
    )
}

/// Apply the records at the start of an unsealed page up to the first one
/// that does not decode or fails its checksum. Returns the bytes kept.
///
/// The `used` counter is not trusted here: it shares the torn write.
fn salvage<K, V>(
    page: &Page,
    keys: &dyn Encoder<K>,
    values: &dyn Encoder<V>,
    apply: &mut impl FnMut(Record<K, V>),
) -> usize {
    let mut stream = EncodedStream::from_slice(&page.payload()[USED_SIZE..]);
    let mut used = 0;
    while stream.remaining() > 0 {
        match decode_record(&mut stream, keys, values) {
            Ok(record) => {
                apply(record);
                used = stream.position();
            }
            Err(_) => break,
        }
    }
    used
}

fn decode_record<K, V>(
    stream: &mut EncodedStream,
    keys: &dyn Encoder<K>,
    values: &dyn Encoder<V>,
) -> Result<Record<K, V>> {
    let start = stream.position();
    let record = match stream.get_u8()? {
        KIND_PUT => {
            let key = decode_framed(keys, stream)?;
            let value = decode_framed(values, stream)?;
            Record::Put(key, value)
        }
        KIND_REMOVE => Record::Remove(decode_framed(keys, stream)?),
        KIND_PUT_NULL => Record::PutNull(decode_framed(values, stream)?),
        KIND_REMOVE_NULL => Record::RemoveNull,
        kind => return Err(Error::Corrupted(format!("unknown record kind {}", kind))),
    };

    let expected = crc32fast::hash(&stream.as_slice()[start..stream.position()]);
    if stream.get_u32()? != expected {
        return Err(Error::Corrupted("record checksum mismatch".into()));
    }
    Ok(record)
}

/// Decode one field, checking it spans exactly the bytes its encoder claims.
fn decode_framed<T>(encoder: &dyn Encoder<T>, stream: &mut EncodedStream) -> Result<T> {
    let size = encoder.exact_size_in_stream(stream)?;
    if size > stream.remaining() {
        return Err(Error::Corrupted(format!(
            "field of {} bytes overruns record ({} left)",
            size,
            stream.remaining()
        )));
    }

    let start = stream.position();
    let value = encoder.decode(stream)?;
    if stream.position() - start != size {
        return Err(Error::Corrupted("record field framing mismatch".into()));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::encoding::primitives::{IntegerEncoder, StringEncoder};
    use crate::storage::{AtomicOperationsManager, DiskStorage};
    use tempfile::tempdir;

    fn with_crc(body: &[u8]) -> Vec<u8> {
        let mut record = body.to_vec();
        record.extend_from_slice(&crc32fast::hash(body).to_le_bytes());
        record
    }

    fn put(key: i32, value: &str) -> Vec<u8> {
        RecordRef::<i32, String>::Put(&key, &value.to_string())
            .encode(&IntegerEncoder, &StringEncoder)
            .unwrap()
    }

    fn replay_all(storage: &dyn PageStorage, file: FileId) -> (Vec<Record<i32, String>>, LogEnd) {
        let mut records = Vec::new();
        let end = replay(storage, file, &IntegerEncoder, &StringEncoder, |r| records.push(r)).unwrap();
        (records, end)
    }

    /// A file with a metadata placeholder and `records` appended and committed.
    fn log_with(records: &[Vec<u8>]) -> (tempfile::TempDir, AtomicOperationsManager, FileId, Tail) {
        let dir = tempdir().unwrap();
        let storage: Arc<dyn PageStorage> = Arc::new(DiskStorage::open(dir.path()).unwrap());
        let manager = AtomicOperationsManager::new(storage);

        let mut op = manager.begin(true);
        let file = op.add_file("log.sbc").unwrap();
        op.allocate_page(file).unwrap();
        let mut tail = None;
        for record in records {
            tail = Some(append(&mut op, file, tail, record).unwrap());
        }
        manager.commit(op).unwrap();
        (dir, manager, file, tail.unwrap())
    }

    #[test]
    fn test_record_bytes() {
        // kind, i32 LE, varint length 1 (terminator bit set), 'a', crc
        assert_eq!(put(1, "a"), with_crc(&[KIND_PUT, 1, 0, 0, 0, 0x81, b'a']));

        let record = RecordRef::<i32, String>::RemoveNull
            .encode(&IntegerEncoder, &StringEncoder)
            .unwrap();
        assert_eq!(record, with_crc(&[KIND_REMOVE_NULL]));
    }

    #[test]
    fn test_record_checksum_checked() {
        let mut record = put(1, "a");
        record[6] = b'b';

        let mut stream = EncodedStream::from_bytes(record);
        assert!(matches!(
            decode_record(&mut stream, &IntegerEncoder, &StringEncoder),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn test_replay_sealed_log() {
        let (_dir, manager, file, tail) = log_with(&[put(1, "a"), put(2, "b")]);

        let (records, end) = replay_all(manager.storage().as_ref(), file);
        assert_eq!(
            records,
            vec![Record::Put(1, "a".to_string()), Record::Put(2, "b".to_string())]
        );
        assert_eq!(end, LogEnd { tail: Some(tail), torn: None });
    }

    #[test]
    fn test_zeroed_last_page_is_dropped() {
        let (_dir, manager, file, tail) = log_with(&[put(1, "a")]);
        let storage = manager.storage();
        let zeroed = storage.allocate_page(file).unwrap();

        let (records, end) = replay_all(storage.as_ref(), file);
        assert_eq!(records, vec![Record::Put(1, "a".to_string())]);
        assert_eq!(end, LogEnd { tail: Some(tail), torn: Some(zeroed) });

        let mut op = manager.begin(true);
        repair(&mut op, file, &end).unwrap();
        manager.commit(op).unwrap();
        assert_eq!(storage.page_count(file).unwrap(), 2);
        assert_eq!(replay_all(storage.as_ref(), file).1.torn, None);
    }

    #[test]
    fn test_torn_last_page_keeps_complete_records() {
        let (_dir, manager, file, tail) = log_with(&[put(1, "a"), put(2, "b")]);
        let storage = manager.storage();

        // Half of a third record reached the page; header and counter did not
        let third = put(3, "c");
        let mut page = storage.read_page(file, tail.page).unwrap();
        let start = USED_SIZE + tail.used;
        page.payload_mut()[start..start + 4].copy_from_slice(&third[..4]);
        storage.write_page(file, tail.page, &page).unwrap();

        let (records, end) = replay_all(storage.as_ref(), file);
        assert_eq!(records.len(), 2);
        assert_eq!(end, LogEnd { tail: Some(tail), torn: Some(tail.page) });

        let mut op = manager.begin(true);
        repair(&mut op, file, &end).unwrap();
        manager.commit(op).unwrap();

        let page = storage.read_page(file, tail.page).unwrap();
        page.expect_type(PageType::TreeEntries, file, tail.page).unwrap();
        assert!(page.payload()[start..].iter().all(|&b| b == 0));
        assert_eq!(replay_all(storage.as_ref(), file), (records, LogEnd { tail: Some(tail), torn: None }));
    }

    #[test]
    fn test_unsealed_page_before_the_last_is_an_error() {
        let (_dir, manager, file, tail) = log_with(&[put(1, "a")]);
        let storage = manager.storage();

        let mut page = storage.read_page(file, tail.page).unwrap();
        page.payload_mut()[CAPACITY] = 0xFF;
        storage.write_page(file, tail.page, &page).unwrap();
        storage.allocate_page(file).unwrap();

        let result = replay(
            storage.as_ref(),
            file,
            &IntegerEncoder,
            &StringEncoder,
            |_: Record<i32, String>| {},
        );
        assert!(matches!(result, Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_oversized_record_rejected() {
        let value = "x".repeat(CAPACITY);
        let err = RecordRef::<i32, String>::PutNull(&value)
            .encode(&IntegerEncoder, &StringEncoder)
            .unwrap_err();

        assert!(matches!(err, Error::RecordTooLarge { .. }));
    }

    #[test]
    fn test_decode_records_in_order() {
        let mut stream = EncodedStream::new();
        for record in [
            RecordRef::<i32, String>::Put(&5, &"five".to_string()),
            RecordRef::Remove(&5),
            RecordRef::PutNull(&"null".to_string()),
        ] {
            stream.put_bytes(&record.encode(&IntegerEncoder, &StringEncoder).unwrap());
        }
        stream.set_position(0).unwrap();

        let mut decoded = Vec::new();
        while stream.remaining() > 0 {
            decoded.push(decode_record(&mut stream, &IntegerEncoder, &StringEncoder).unwrap());
        }
        assert_eq!(
            decoded,
            vec![
                Record::Put(5, "five".to_string()),
                Record::Remove(5),
                Record::PutNull("null".to_string()),
            ]
        );
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let mut stream = EncodedStream::from_slice(&[KIND_PUT, 1, 0]);
        assert!(decode_record(&mut stream, &IntegerEncoder, &StringEncoder).is_err());
    }
}
