//! Positional node store
//!
//! A file of fixed-size slots addressed by index: slot `i` lives at
//! `header_len + i * slot_size`. Appending writes at the current end and
//! returns the new slot index. Nodes reference each other by slot index, never
//! by in-memory pointer, so nothing outlives a single operation.
//!
//! Writes go straight to the file and are flushed (and fsynced under
//! `DurabilityLevel::Synchronous`) before returning. An optional LRU cache
//! keeps decoded nodes for repeated reads; it is updated on every write, so it
//! never holds a node newer or older than the file.

use super::codec::Position;
use super::header;
use crate::config::{DurabilityLevel, StoreOptions};
use crate::{Result, StorageError};
use lru::LruCache;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

/// Fixed-width encoding of one node type
pub trait SlotCodec {
    type Item: Clone;

    /// Encoded size of every slot, in bytes.
    fn slot_size(&self) -> usize;

    /// Encode into `buf`, which is exactly `slot_size()` bytes.
    fn encode(&self, item: &Self::Item, buf: &mut [u8]) -> Result<()>;

    fn decode(&self, buf: &[u8]) -> Result<Self::Item>;
}

/// Cache hit/miss counters
#[derive(Debug, Default, Clone, Copy)]
pub struct NodeStoreStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
}

pub struct NodeStore<C: SlotCodec> {
    file: File,
    path: PathBuf,
    codec: C,
    header_len: u64,
    slots: u64,
    is_new: bool,
    cache: Option<LruCache<Position, C::Item>>,
    durability: DurabilityLevel,
    stats: NodeStoreStats,
}

impl<C: SlotCodec> NodeStore<C> {
    /// Open or create the node file at `path`.
    ///
    /// `header_len` bytes at the start of the file are reserved for a header
    /// block (0 for files without one). A freshly created file reports
    /// `is_new()`; the caller is expected to write its header.
    pub fn open<P: AsRef<Path>>(path: P, codec: C, header_len: usize, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if codec.slot_size() == 0 {
            return Err(StorageError::InvalidArgument(format!(
                "zero-sized slots for {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let is_new = file_len == 0;
        let header_len = header_len as u64;

        let slots = if is_new {
            0
        } else {
            if file_len < header_len {
                return Err(StorageError::Corruption(format!(
                    "{}: file of {} bytes is shorter than its {} byte header",
                    path.display(),
                    file_len,
                    header_len
                )));
            }
            let body = file_len - header_len;
            let slot_size = codec.slot_size() as u64;
            if body % slot_size != 0 {
                return Err(StorageError::Corruption(format!(
                    "{}: {} bytes of node data is not a multiple of slot size {}",
                    path.display(),
                    body,
                    slot_size
                )));
            }
            body / slot_size
        };

        let cache = NonZeroUsize::new(options.cache_size).map(LruCache::new);

        Ok(Self {
            file,
            path,
            codec,
            header_len,
            slots,
            is_new,
            cache,
            durability: options.durability,
            stats: NodeStoreStats::default(),
        })
    }

    /// True if `open` created the file.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Number of slots in the file.
    pub fn len(&self) -> u64 {
        self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn stats(&self) -> NodeStoreStats {
        self.stats
    }

    fn offset(&self, slot: Position) -> u64 {
        self.header_len + slot * self.codec.slot_size() as u64
    }

    pub fn read(&mut self, slot: Position) -> Result<C::Item> {
        if slot >= self.slots {
            return Err(StorageError::Corruption(format!(
                "{}: slot {} out of range ({} slots)",
                self.path.display(),
                slot,
                self.slots
            )));
        }

        if let Some(cache) = self.cache.as_mut() {
            if let Some(item) = cache.get(&slot) {
                self.stats.cache_hits += 1;
                return Ok(item.clone());
            }
        }
        self.stats.cache_misses += 1;

        let mut buf = vec![0u8; self.codec.slot_size()];
        self.file.seek(SeekFrom::Start(self.offset(slot)))?;
        self.file.read_exact(&mut buf)?;
        let item = self.codec.decode(&buf).map_err(|e| match e {
            StorageError::Corruption(msg) => StorageError::Corruption(format!(
                "{} slot {}: {}",
                self.path.display(),
                slot,
                msg
            )),
            other => other,
        })?;

        if let Some(cache) = self.cache.as_mut() {
            cache.put(slot, item.clone());
        }
        Ok(item)
    }

    /// Overwrite slot `slot`. Writing at `len()` extends the file by one slot.
    pub fn write(&mut self, slot: Position, item: &C::Item) -> Result<()> {
        if slot > self.slots {
            return Err(StorageError::InvalidArgument(format!(
                "{}: cannot write slot {} past end ({} slots)",
                self.path.display(),
                slot,
                self.slots
            )));
        }

        let mut buf = vec![0u8; self.codec.slot_size()];
        self.codec.encode(item, &mut buf)?;

        self.file.seek(SeekFrom::Start(self.offset(slot)))?;
        self.file.write_all(&buf)?;
        persist(&mut self.file, self.durability)?;

        if slot == self.slots {
            self.slots += 1;
        }
        if let Some(cache) = self.cache.as_mut() {
            cache.put(slot, item.clone());
        }
        Ok(())
    }

    /// Write `item` into a new slot at the end of the file.
    pub fn append(&mut self, item: &C::Item) -> Result<Position> {
        let slot = self.slots;
        self.write(slot, item)?;
        Ok(slot)
    }

    pub fn read_header<B: DeserializeOwned>(&mut self, magic: u32) -> Result<B> {
        self.require_header()?;
        header::read_block(&mut self.file, magic)
    }

    pub fn write_header<B: Serialize>(&mut self, magic: u32, body: &B) -> Result<()> {
        self.require_header()?;
        header::write_block(&mut self.file, magic, body)?;
        persist(&mut self.file, self.durability)
    }

    fn require_header(&self) -> Result<()> {
        if self.header_len < header::HEADER_BLOCK_SIZE as u64 {
            return Err(StorageError::InvalidArgument(format!(
                "{} has no header block",
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Force everything written so far to the device.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }
}

/// Flush after a mutation; fsync when the durability level asks for it.
pub(crate) fn persist(file: &mut File, durability: DurabilityLevel) -> Result<()> {
    file.flush()?;
    if durability.requires_fsync() {
        file.sync_data()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::{FieldReader, FieldWriter};
    use crate::storage::header::{HEADER_BLOCK_SIZE, TRIE_MAGIC};
    use tempfile::TempDir;

    #[derive(Clone, Debug, PartialEq)]
    struct Pair {
        id: u32,
        next: Option<Position>,
    }

    struct PairCodec;

    impl SlotCodec for PairCodec {
        type Item = Pair;

        fn slot_size(&self) -> usize {
            12
        }

        fn encode(&self, item: &Pair, buf: &mut [u8]) -> Result<()> {
            let mut w = FieldWriter::new(buf);
            w.put_u32(item.id);
            w.put_pos(item.next);
            Ok(())
        }

        fn decode(&self, buf: &[u8]) -> Result<Pair> {
            let mut r = FieldReader::new(buf);
            Ok(Pair {
                id: r.get_u32()?,
                next: r.get_pos()?,
            })
        }
    }

    fn create_test_store(cache_size: usize) -> (NodeStore<PairCodec>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let options = StoreOptions {
            cache_size,
            ..Default::default()
        };
        let store = NodeStore::open(temp_dir.path().join("pairs.dat"), PairCodec, 0, options).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_append_and_read() {
        let (mut store, _temp) = create_test_store(0);
        assert!(store.is_new());
        assert!(store.is_empty());

        let a = store.append(&Pair { id: 1, next: None }).unwrap();
        let b = store.append(&Pair { id: 2, next: Some(a) }).unwrap();
        assert_eq!((a, b), (0, 1));
        assert_eq!(store.len(), 2);

        assert_eq!(store.read(b).unwrap(), Pair { id: 2, next: Some(0) });
        assert!(matches!(store.read(2), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_overwrite_updates_cache() {
        let (mut store, _temp) = create_test_store(4);
        store.append(&Pair { id: 1, next: None }).unwrap();
        store.read(0).unwrap();

        store.write(0, &Pair { id: 9, next: Some(3) }).unwrap();
        assert_eq!(store.read(0).unwrap().id, 9);
        assert!(store.stats().cache_hits >= 1);

        assert!(store.write(5, &Pair { id: 0, next: None }).is_err());
    }

    #[test]
    fn test_reopen_counts_slots() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pairs.dat");
        {
            let mut store = NodeStore::open(&path, PairCodec, HEADER_BLOCK_SIZE, StoreOptions::default()).unwrap();
            store.write_header(TRIE_MAGIC, &7u64).unwrap();
            for i in 0..5 {
                store.append(&Pair { id: i, next: None }).unwrap();
            }
        }

        let mut store = NodeStore::open(&path, PairCodec, HEADER_BLOCK_SIZE, StoreOptions::default()).unwrap();
        assert!(!store.is_new());
        assert_eq!(store.len(), 5);
        assert_eq!(store.read_header::<u64>(TRIE_MAGIC).unwrap(), 7);
        assert_eq!(store.read(4).unwrap().id, 4);
    }

    #[test]
    fn test_torn_slot_is_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("pairs.dat");
        std::fs::write(&path, vec![0u8; 13]).unwrap();

        let result = NodeStore::open(&path, PairCodec, 0, StoreOptions::default());
        assert!(matches!(result, Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_header_requires_reserved_block() {
        let (mut store, _temp) = create_test_store(0);
        assert!(store.write_header(TRIE_MAGIC, &1u64).is_err());
    }
}
