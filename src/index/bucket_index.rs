//! Hash-chained inverted index over a fixed set of keys
//!
//! ```text
//! [header block: bucket table (key, head), node_count][node 0][node 1]...
//! node: [record_id:4][next:8]
//! ```
//!
//! Each registered key owns one bucket heading a singly linked list of record
//! ids. New ids are linked at the head, so iteration yields them newest first.
//! The bucket table is fixed when the file is created.

use crate::config::StoreOptions;
use crate::storage::codec::{FieldReader, FieldWriter, Position, POS_LEN, U32_LEN};
use crate::storage::header::{BUCKET_MAGIC, HEADER_BLOCK_SIZE};
use crate::storage::{NodeStore, SlotCodec};
use crate::types::RecordId;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Brazilian federative units: 26 states and the Federal District.
pub const STATE_CODES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB", "PR", "PE", "PI",
    "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainNode {
    pub record_id: RecordId,
    pub next: Option<Position>,
}

struct ChainCodec;

impl SlotCodec for ChainCodec {
    type Item = ChainNode;

    fn slot_size(&self) -> usize {
        U32_LEN + POS_LEN
    }

    fn encode(&self, node: &ChainNode, buf: &mut [u8]) -> Result<()> {
        let mut w = FieldWriter::new(buf);
        w.put_u32(node.record_id);
        w.put_pos(node.next);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<ChainNode> {
        let mut r = FieldReader::new(buf);
        Ok(ChainNode {
            record_id: r.get_u32()?,
            next: r.get_pos()?,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Bucket {
    key: String,
    head: Option<Position>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct BucketTable {
    buckets: Vec<Bucket>,
    node_count: u64,
}

pub struct BucketIndex {
    table: BucketTable,
    nodes: NodeStore<ChainCodec>,
}

impl BucketIndex {
    /// Open the index at `path`, registering `keys` if the file is new.
    ///
    /// An existing file keeps the bucket table it was created with.
    pub fn open<P: AsRef<Path>>(path: P, keys: &[&str], options: StoreOptions) -> Result<Self> {
        let mut nodes = NodeStore::open(path, ChainCodec, HEADER_BLOCK_SIZE, options)?;

        let table = if nodes.is_new() {
            if keys.is_empty() {
                return Err(StorageError::InvalidArgument("bucket index needs at least one key".into()));
            }
            let mut buckets: Vec<Bucket> = Vec::with_capacity(keys.len());
            for &key in keys {
                if buckets.iter().any(|b| b.key == key) {
                    return Err(StorageError::InvalidArgument(format!("bucket key '{}' registered twice", key)));
                }
                buckets.push(Bucket {
                    key: key.to_string(),
                    head: None,
                });
            }
            let table = BucketTable {
                buckets,
                node_count: 0,
            };
            nodes.write_header(BUCKET_MAGIC, &table)?;
            table
        } else {
            let table: BucketTable = nodes.read_header(BUCKET_MAGIC)?;
            let heads_ok = table.buckets.iter().all(|b| b.head.map_or(true, |h| h < nodes.len()));
            if table.node_count != nodes.len() || !heads_ok {
                return Err(StorageError::Corruption(format!(
                    "{}: bucket table ({} nodes) does not match {} node slots",
                    nodes.path().display(),
                    table.node_count,
                    nodes.len()
                )));
            }
            if !keys.is_empty() && !table.buckets.iter().map(|b| b.key.as_str()).eq(keys.iter().copied()) {
                debug!(path = %nodes.path().display(), "bucket keys differ from stored table; keeping stored");
            }
            table
        };

        Ok(Self { table, nodes })
    }

    /// Open with the 27 state codes as bucket keys.
    pub fn open_states<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        Self::open(path, &STATE_CODES, options)
    }

    fn bucket(&self, key: &str) -> Result<usize> {
        self.table
            .buckets
            .iter()
            .position(|b| b.key == key)
            .ok_or_else(|| StorageError::InvalidKey(format!("unregistered bucket key '{}'", key)))
    }

    /// Link `record_id` at the head of `key`'s chain.
    pub fn insert(&mut self, key: &str, record_id: RecordId) -> Result<()> {
        let idx = self.bucket(key)?;
        let node = ChainNode {
            record_id,
            next: self.table.buckets[idx].head,
        };
        let pos = self.nodes.append(&node)?;

        self.table.buckets[idx].head = Some(pos);
        self.table.node_count = self.nodes.len();
        self.nodes.write_header(BUCKET_MAGIC, &self.table)
    }

    /// Record ids under `key`, newest first.
    pub fn iterate(&mut self, key: &str) -> Result<ChainIter<'_>> {
        let idx = self.bucket(key)?;
        let head = self.table.buckets[idx].head;
        Ok(ChainIter {
            nodes: &mut self.nodes,
            next: head,
            visited: 0,
        })
    }

    pub fn count(&mut self, key: &str) -> Result<usize> {
        let mut count = 0;
        for id in self.iterate(key)? {
            id?;
            count += 1;
        }
        Ok(count)
    }

    pub fn bucket_keys(&self) -> impl Iterator<Item = &str> {
        self.table.buckets.iter().map(|b| b.key.as_str())
    }

    pub fn node_count(&self) -> u64 {
        self.table.node_count
    }

    pub fn sync(&mut self) -> Result<()> {
        self.nodes.sync()
    }
}

/// Walks one bucket's chain. Stops after an error or a loop.
pub struct ChainIter<'a> {
    nodes: &'a mut NodeStore<ChainCodec>,
    next: Option<Position>,
    visited: u64,
}

impl Iterator for ChainIter<'_> {
    type Item = Result<RecordId>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.next.take()?;
        self.visited += 1;
        if self.visited > self.nodes.len() {
            return Some(Err(StorageError::Corruption(format!(
                "{}: chain loops at node {}",
                self.nodes.path().display(),
                pos
            ))));
        }

        match self.nodes.read(pos) {
            Ok(node) => {
                self.next = node.next;
                Some(Ok(node.record_id))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
