//! Lookup tables for values shared by many records
//!
//! School locations and answer keys repeat across thousands of rows, so each
//! distinct value is stored once and records hold its id. Uniqueness is by
//! key and checked with a linear scan, which only runs during import.

use super::codec::{FieldReader, FieldWriter};
use super::header::LOOKUP_MAGIC;
use super::node_store::{NodeStore, SlotCodec};
use super::record_store::{append_counted, open_counted};
use crate::config::StoreOptions;
use crate::types::{
    AnswerKey, RecordId, SchoolLocation, ANSWERS_LEN, CITY_LEN, EXAM_CODE_LEN, SCHOOL_CODE_LEN, STATE_LEN,
};
use crate::Result;
use std::path::Path;

/// A lookup table entry with a unique key
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for SchoolLocation {
    fn key(&self) -> &str {
        &self.school_code
    }
}

impl Keyed for AnswerKey {
    fn key(&self) -> &str {
        &self.exam_code
    }
}

pub struct LocationCodec;

impl SlotCodec for LocationCodec {
    type Item = SchoolLocation;

    fn slot_size(&self) -> usize {
        SCHOOL_CODE_LEN + CITY_LEN + STATE_LEN
    }

    fn encode(&self, item: &SchoolLocation, buf: &mut [u8]) -> Result<()> {
        let mut w = FieldWriter::new(buf);
        w.put_str(&item.school_code, SCHOOL_CODE_LEN)?;
        w.put_str(&item.city, CITY_LEN)?;
        w.put_str(&item.state, STATE_LEN)?;
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<SchoolLocation> {
        let mut r = FieldReader::new(buf);
        Ok(SchoolLocation {
            school_code: r.get_str(SCHOOL_CODE_LEN)?,
            city: r.get_str(CITY_LEN)?,
            state: r.get_str(STATE_LEN)?,
        })
    }
}

pub struct AnswerKeyCodec;

impl SlotCodec for AnswerKeyCodec {
    type Item = AnswerKey;

    fn slot_size(&self) -> usize {
        EXAM_CODE_LEN + ANSWERS_LEN
    }

    fn encode(&self, item: &AnswerKey, buf: &mut [u8]) -> Result<()> {
        let mut w = FieldWriter::new(buf);
        w.put_str(&item.exam_code, EXAM_CODE_LEN)?;
        w.put_str(&item.answers, ANSWERS_LEN)?;
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<AnswerKey> {
        let mut r = FieldReader::new(buf);
        Ok(AnswerKey {
            exam_code: r.get_str(EXAM_CODE_LEN)?,
            answers: r.get_str(ANSWERS_LEN)?,
        })
    }
}

pub struct LookupTable<C: SlotCodec> {
    store: NodeStore<C>,
}

pub type LocationTable = LookupTable<LocationCodec>;
pub type AnswerKeyTable = LookupTable<AnswerKeyCodec>;

impl<C> LookupTable<C>
where
    C: SlotCodec,
    C::Item: Keyed,
{
    pub fn open<P: AsRef<Path>>(path: P, codec: C, options: StoreOptions) -> Result<Self> {
        Ok(Self {
            store: open_counted(path, codec, LOOKUP_MAGIC, options)?,
        })
    }

    /// Id of the entry stored under `key`, by linear scan.
    pub fn find(&mut self, key: &str) -> Result<Option<RecordId>> {
        for slot in 0..self.store.len() {
            if self.store.read(slot)?.key() == key {
                return Ok(Some(slot as RecordId));
            }
        }
        Ok(None)
    }

    /// Id of the entry with `item`'s key, appending `item` if there is none.
    /// An existing entry is never updated.
    pub fn find_or_insert(&mut self, item: &C::Item) -> Result<RecordId> {
        if let Some(id) = self.find(item.key())? {
            return Ok(id);
        }
        append_counted(&mut self.store, LOOKUP_MAGIC, item)
    }

    pub fn read(&mut self, id: RecordId) -> Result<Option<C::Item>> {
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

    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use tempfile::TempDir;

    fn location(code: &str, city: &str) -> SchoolLocation {
        SchoolLocation {
            school_code: code.to_string(),
            city: city.to_string(),
            state: "RS".to_string(),
        }
    }

    #[test]
    fn test_unique_insert() {
        let temp = TempDir::new().unwrap();
        let mut table = LookupTable::open(temp.path().join("loc.dat"), LocationCodec, StoreOptions::default()).unwrap();

        let a = table.find_or_insert(&location("43000001", "Porto Alegre")).unwrap();
        let b = table.find_or_insert(&location("43000002", "Pelotas")).unwrap();
        // same key, different city: the first entry wins
        let c = table.find_or_insert(&location("43000001", "Canoas")).unwrap();

        assert_eq!((a, b, c), (0, 1, 0));
        assert_eq!(table.len(), 2);
        assert_eq!(table.read(0).unwrap().unwrap().city, "Porto Alegre");
        assert!(table.read(2).unwrap().is_none());
    }

    #[test]
    fn test_full_width_key_dedups_without_cache() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("loc.dat");
        let uncached = StoreOptions {
            cache_size: 0,
            ..Default::default()
        };
        let code = "1".repeat(SCHOOL_CODE_LEN);
        {
            let mut table = LookupTable::open(&path, LocationCodec, uncached).unwrap();
            assert_eq!(table.find_or_insert(&location(&code, "Pelotas")).unwrap(), 0);
            assert_eq!(table.find_or_insert(&location(&code, "Pelotas")).unwrap(), 0);
            assert_eq!(table.len(), 1);
        }

        let mut table = LookupTable::open(&path, LocationCodec, StoreOptions::default()).unwrap();
        assert_eq!(table.find_or_insert(&location(&code, "Pelotas")).unwrap(), 0);
        assert_eq!(table.read(0).unwrap().unwrap().school_code, code);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_overlong_key_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("loc.dat");
        let uncached = StoreOptions {
            cache_size: 0,
            ..Default::default()
        };
        let code = "12345678901234567890";
        {
            let mut table = LookupTable::open(&path, LocationCodec, uncached).unwrap();
            for _ in 0..2 {
                let result = table.find_or_insert(&location(code, "Pelotas"));
                assert!(matches!(result, Err(StorageError::InvalidData(_))));
            }
            assert_eq!(table.len(), 0);

            let long_city = "x".repeat(CITY_LEN + 1);
            assert!(table.find_or_insert(&location("43000001", &long_city)).is_err());
            assert_eq!(table.len(), 0);
        }

        // nothing half-written survives a reopen
        let mut table = LookupTable::open(&path, LocationCodec, StoreOptions::default()).unwrap();
        assert_eq!(table.len(), 0);
        assert_eq!(table.find(code).unwrap(), None);
    }

    #[test]
    fn test_answer_keys_persist() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("keys.dat");
        {
            let mut table = LookupTable::open(&path, AnswerKeyCodec, StoreOptions::default()).unwrap();
            table
                .find_or_insert(&AnswerKey {
                    exam_code: "1221".into(),
                    answers: "ABCDEABCDE".into(),
                })
                .unwrap();
        }

        let mut table = LookupTable::open(&path, AnswerKeyCodec, StoreOptions::default()).unwrap();
        assert_eq!(table.find("1221").unwrap(), Some(0));
        assert_eq!(table.find("1222").unwrap(), None);
    }
}
