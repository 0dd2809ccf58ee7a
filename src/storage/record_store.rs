//! Append-only exam record store
//!
//! ```text
//! [header block: record count][record 0][record 1]...
//! ```
//!
//! Record ids are slot indexes, so reading by id is a single seek.

use super::codec::{FieldReader, FieldWriter, F32_LEN, U32_LEN};
use super::header::{HEADER_BLOCK_SIZE, RECORD_MAGIC};
use super::node_store::{NodeStore, SlotCodec};
use crate::config::StoreOptions;
use crate::types::{ExamRecord, RecordId, EXAM_COUNT, RESPONSES_LEN, SEQUENCE_LEN};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Header body of files whose slots are counted in the header
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub(crate) struct CountHeader {
    pub count: u64,
}

/// Open a header + slots file and check the stored count against its length.
pub(crate) fn open_counted<C: SlotCodec, P: AsRef<Path>>(
    path: P,
    codec: C,
    magic: u32,
    options: StoreOptions,
) -> Result<NodeStore<C>> {
    let mut store = NodeStore::open(path, codec, HEADER_BLOCK_SIZE, options)?;
    if store.is_new() {
        store.write_header(magic, &CountHeader { count: 0 })?;
    } else {
        let header: CountHeader = store.read_header(magic)?;
        if header.count != store.len() {
            return Err(StorageError::Corruption(format!(
                "{}: header counts {} slots, file holds {}",
                store.path().display(),
                header.count,
                store.len()
            )));
        }
    }
    Ok(store)
}

/// Append to a counted file, rewriting the header count.
pub(crate) fn append_counted<C: SlotCodec>(store: &mut NodeStore<C>, magic: u32, item: &C::Item) -> Result<RecordId> {
    let slot = store.append(item)?;
    store.write_header(magic, &CountHeader { count: store.len() })?;
    RecordId::try_from(slot)
        .map_err(|_| StorageError::InvalidArgument(format!("record id {} exceeds id space", slot)))
}

pub struct ExamRecordCodec;

impl SlotCodec for ExamRecordCodec {
    type Item = ExamRecord;

    fn slot_size(&self) -> usize {
        SEQUENCE_LEN
            + U32_LEN * 2
            + U32_LEN * EXAM_COUNT
            + F32_LEN * 5
            + RESPONSES_LEN * EXAM_COUNT
            + U32_LEN
    }

    fn encode(&self, record: &ExamRecord, buf: &mut [u8]) -> Result<()> {
        let mut w = FieldWriter::new(buf);
        w.put_str(&record.sequence, SEQUENCE_LEN)?;
        w.put_i32(record.year);
        w.put_u32(record.location_id);
        for id in record.answer_key_ids {
            w.put_u32(id);
        }
        w.put_f32(record.score_cn);
        w.put_f32(record.score_ch);
        w.put_f32(record.score_lc);
        w.put_f32(record.score_mt);
        w.put_f32(record.score_essay);
        for responses in &record.responses {
            w.put_str(responses, RESPONSES_LEN)?;
        }
        w.put_i32(record.language);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<ExamRecord> {
        let mut r = FieldReader::new(buf);
        let sequence = r.get_str(SEQUENCE_LEN)?;
        let year = r.get_i32()?;
        let location_id = r.get_u32()?;
        let mut answer_key_ids = [0; EXAM_COUNT];
        for id in answer_key_ids.iter_mut() {
            *id = r.get_u32()?;
        }
        let score_cn = r.get_f32()?;
        let score_ch = r.get_f32()?;
        let score_lc = r.get_f32()?;
        let score_mt = r.get_f32()?;
        let score_essay = r.get_f32()?;
        let responses = [
            r.get_str(RESPONSES_LEN)?,
            r.get_str(RESPONSES_LEN)?,
            r.get_str(RESPONSES_LEN)?,
            r.get_str(RESPONSES_LEN)?,
        ];
        let language = r.get_i32()?;

        Ok(ExamRecord {
            sequence,
            year,
            location_id,
            answer_key_ids,
            score_cn,
            score_ch,
            score_lc,
            score_mt,
            score_essay,
            responses,
            language,
        })
    }
}

pub struct RecordStore {
    store: NodeStore<ExamRecordCodec>,
}

impl RecordStore {
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        Ok(Self {
            store: open_counted(path, ExamRecordCodec, RECORD_MAGIC, options)?,
        })
    }

    pub fn append(&mut self, record: &ExamRecord) -> Result<RecordId> {
        append_counted(&mut self.store, RECORD_MAGIC, record)
    }

    /// `None` if no record has this id.
    pub fn read(&mut self, id: RecordId) -> Result<Option<ExamRecord>> {
        if u64::from(id) >= self.store.len() {
            return Ok(None);
        }
        self.store.read(u64::from(id)).map(Some)
    }

    pub fn len(&self) -> u64 {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// All records in id order.
    pub fn iter(&mut self) -> RecordIter<'_> {
        RecordIter { store: self, next: 0 }
    }

    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()
    }
}

pub struct RecordIter<'a> {
    store: &'a mut RecordStore,
    next: u64,
}

impl Iterator for RecordIter<'_> {
    type Item = Result<(RecordId, ExamRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.store.len() {
            return None;
        }
        let slot = self.next;
        self.next += 1;
        // slot < len, and every appended slot fit a RecordId
        let id = slot as RecordId;
        Some(self.store.store.read(slot).map(|record| (id, record)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(sequence: &str, cn: f32) -> ExamRecord {
        ExamRecord {
            sequence: sequence.to_string(),
            year: 2023,
            location_id: 3,
            answer_key_ids: [0, 1, 2, 3],
            score_cn: cn,
            score_ch: 512.25,
            score_lc: 498.0,
            score_mt: 701.5,
            score_essay: 880.0,
            responses: [
                "ABCDE".to_string(),
                "EDCBA".to_string(),
                "99999".to_string(),
                "CCCCC".to_string(),
            ],
            language: 1,
        }
    }

    #[test]
    fn test_append_and_read() {
        let temp = TempDir::new().unwrap();
        let mut store = RecordStore::open(temp.path().join("records.dat"), StoreOptions::default()).unwrap();

        let a = store.append(&sample("210001", 450.5)).unwrap();
        let b = store.append(&sample("210002", 610.0)).unwrap();
        assert_eq!((a, b), (0, 1));

        assert_eq!(store.read(b).unwrap().unwrap(), sample("210002", 610.0));
        assert!(store.read(2).unwrap().is_none());
    }

    #[test]
    fn test_overwidth_fields_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");
        let uncached = StoreOptions {
            cache_size: 0,
            ..Default::default()
        };
        {
            let mut store = RecordStore::open(&path, uncached).unwrap();
            let long_sequence = "9".repeat(SEQUENCE_LEN + 1);
            assert!(matches!(
                store.append(&sample(&long_sequence, 1.0)),
                Err(StorageError::InvalidData(_))
            ));

            let mut record = sample("210001", 1.0);
            record.responses[2] = "A".repeat(RESPONSES_LEN + 1);
            assert!(store.append(&record).is_err());
            assert_eq!(store.len(), 0);

            let full = "9".repeat(SEQUENCE_LEN);
            store.append(&sample(&full, 2.0)).unwrap();
        }

        let mut store = RecordStore::open(&path, StoreOptions::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.read(0).unwrap().unwrap(), sample(&"9".repeat(SEQUENCE_LEN), 2.0));
    }

    #[test]
    fn test_reopen_and_iter() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");
        {
            let mut store = RecordStore::open(&path, StoreOptions::default()).unwrap();
            for i in 0..4 {
                store.append(&sample(&format!("{}", 100 + i), i as f32)).unwrap();
            }
        }

        let mut store = RecordStore::open(&path, StoreOptions::default()).unwrap();
        assert_eq!(store.len(), 4);
        let sequences: Vec<String> = store.iter().map(|r| r.unwrap().1.sequence).collect();
        assert_eq!(sequences, vec!["100", "101", "102", "103"]);
    }

    #[test]
    fn test_header_count_mismatch() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("records.dat");
        {
            let mut store = RecordStore::open(&path, StoreOptions::default()).unwrap();
            store.append(&sample("1", 1.0)).unwrap();
        }

        // an extra slot that the header never counted
        let slot = ExamRecordCodec.slot_size();
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len + slot as u64).unwrap();

        assert!(matches!(
            RecordStore::open(&path, StoreOptions::default()),
            Err(StorageError::Corruption(_))
        ));
    }
}
