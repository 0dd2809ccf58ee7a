//! Digit trie for exact lookup by sequence number
//!
//! ```text
//! [header block: root, node_count][node 0][node 1]...
//! node: [child:8 x 10][terminal:1][record_id:4]
//! ```
//!
//! Nodes are created while walking a key and never removed. Inserting an
//! existing key overwrites its record id.

use crate::config::StoreOptions;
use crate::storage::codec::{FieldReader, FieldWriter, Position, BOOL_LEN, POS_LEN, U32_LEN};
use crate::storage::header::{HEADER_BLOCK_SIZE, TRIE_MAGIC};
use crate::storage::{NodeStore, SlotCodec};
use crate::types::RecordId;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const ALPHABET_SIZE: usize = 10;

/// Longest accepted key, in characters.
pub const MAX_KEY_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrieNode {
    pub children: [Option<Position>; ALPHABET_SIZE],
    pub is_terminal: bool,
    /// Meaningful only when `is_terminal`
    pub record_id: RecordId,
}

struct TrieCodec;

impl SlotCodec for TrieCodec {
    type Item = TrieNode;

    fn slot_size(&self) -> usize {
        POS_LEN * ALPHABET_SIZE + BOOL_LEN + U32_LEN
    }

    fn encode(&self, node: &TrieNode, buf: &mut [u8]) -> Result<()> {
        let mut w = FieldWriter::new(buf);
        for &child in &node.children {
            w.put_pos(child);
        }
        w.put_bool(node.is_terminal);
        w.put_u32(node.record_id);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<TrieNode> {
        let mut r = FieldReader::new(buf);
        let mut children = [None; ALPHABET_SIZE];
        for child in children.iter_mut() {
            *child = r.get_pos()?;
        }
        Ok(TrieNode {
            children,
            is_terminal: r.get_bool()?,
            record_id: r.get_u32()?,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
struct TrieHeader {
    root: Option<Position>,
    node_count: u64,
}

pub struct TrieIndex {
    header: TrieHeader,
    nodes: NodeStore<TrieCodec>,
}

/// Map each character of `key` to its digit, rejecting the key as a whole.
fn digits(key: &str) -> Result<Vec<usize>> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty sequence key".into()));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "sequence key '{}' is longer than {} characters",
            key, MAX_KEY_LEN
        )));
    }
    key.chars()
        .map(|c| {
            c.to_digit(10)
                .map(|d| d as usize)
                .ok_or_else(|| StorageError::InvalidKey(format!("non-digit '{}' in sequence key '{}'", c, key)))
        })
        .collect()
}

impl TrieIndex {
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self> {
        let mut nodes = NodeStore::open(path, TrieCodec, HEADER_BLOCK_SIZE, options)?;
        let header = if nodes.is_new() {
            let header = TrieHeader {
                root: None,
                node_count: 0,
            };
            nodes.write_header(TRIE_MAGIC, &header)?;
            header
        } else {
            let header: TrieHeader = nodes.read_header(TRIE_MAGIC)?;
            let root_ok = header.root.map_or(true, |r| r < nodes.len());
            if header.node_count != nodes.len() || !root_ok {
                return Err(StorageError::Corruption(format!(
                    "{}: header {:?} does not match {} node slots",
                    nodes.path().display(),
                    header,
                    nodes.len()
                )));
            }
            header
        };

        Ok(Self { header, nodes })
    }

    fn new_node(&mut self) -> Result<Position> {
        let pos = self.nodes.append(&TrieNode::default())?;
        self.header.node_count = self.nodes.len();
        Ok(pos)
    }

    /// Bind `key` to `record_id`. A key inserted twice keeps the last id.
    pub fn insert(&mut self, key: &str, record_id: RecordId) -> Result<()> {
        let digits = digits(key)?;
        let start_count = self.header.node_count;

        let root = match self.header.root {
            Some(root) => root,
            None => {
                let root = self.new_node()?;
                self.header.root = Some(root);
                root
            }
        };

        let mut pos = root;
        for d in digits {
            let mut node = self.nodes.read(pos)?;
            pos = match node.children[d] {
                Some(child) => child,
                None => {
                    let child = self.new_node()?;
                    node.children[d] = Some(child);
                    self.nodes.write(pos, &node)?;
                    child
                }
            };
        }

        let mut node = self.nodes.read(pos)?;
        if node.is_terminal && node.record_id != record_id {
            debug!(key, old = node.record_id, new = record_id, "sequence key rebound");
        }
        node.is_terminal = true;
        node.record_id = record_id;
        self.nodes.write(pos, &node)?;

        if self.header.node_count != start_count {
            self.nodes.write_header(TRIE_MAGIC, &self.header)?;
        }
        Ok(())
    }

    /// Record id bound to `key`, or `None` if the key was never inserted.
    pub fn lookup(&mut self, key: &str) -> Result<Option<RecordId>> {
        let digits = digits(key)?;
        let Some(mut pos) = self.header.root else {
            return Ok(None);
        };

        for d in digits {
            match self.nodes.read(pos)?.children[d] {
                Some(child) => pos = child,
                None => return Ok(None),
            }
        }

        let node = self.nodes.read(pos)?;
        Ok(node.is_terminal.then_some(node.record_id))
    }

    pub fn node_count(&self) -> u64 {
        self.header.node_count
    }

    pub fn sync(&mut self) -> Result<()> {
        self.nodes.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_trie() -> (TrieIndex, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let trie = TrieIndex::open(temp_dir.path().join("trie.dat"), StoreOptions::default()).unwrap();
        (trie, temp_dir)
    }

    #[test]
    fn test_lookup_scenario() {
        let (mut trie, _temp) = create_test_trie();
        trie.insert("0001", 10).unwrap();
        trie.insert("0002", 20).unwrap();
        trie.insert("0099", 30).unwrap();

        assert_eq!(trie.lookup("0002").unwrap(), Some(20));
        assert_eq!(trie.lookup("0099").unwrap(), Some(30));
        assert_eq!(trie.lookup("0003").unwrap(), None);
        // prefix of inserted keys, never inserted itself
        assert_eq!(trie.lookup("00").unwrap(), None);
        assert_eq!(trie.lookup("00011").unwrap(), None);
    }

    #[test]
    fn test_shared_prefix_nodes() {
        let (mut trie, _temp) = create_test_trie();
        trie.insert("0001", 1).unwrap();
        // root + 4 digits
        assert_eq!(trie.node_count(), 5);
        trie.insert("0002", 2).unwrap();
        assert_eq!(trie.node_count(), 6);
        trie.insert("0002", 3).unwrap();
        assert_eq!(trie.node_count(), 6);
        assert_eq!(trie.lookup("0002").unwrap(), Some(3));
    }

    #[test]
    fn test_invalid_keys() {
        let (mut trie, _temp) = create_test_trie();
        assert!(matches!(trie.insert("12a4", 1), Err(StorageError::InvalidKey(_))));
        assert!(matches!(trie.insert("", 1), Err(StorageError::InvalidKey(_))));
        assert!(matches!(trie.insert("1234567890123456", 1), Err(StorageError::InvalidKey(_))));
        assert!(matches!(trie.lookup("x"), Err(StorageError::InvalidKey(_))));
        // a rejected key writes nothing
        assert_eq!(trie.node_count(), 0);
    }

    #[test]
    fn test_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("trie.dat");
        {
            let mut trie = TrieIndex::open(&path, StoreOptions::default()).unwrap();
            for i in 0..200u32 {
                trie.insert(&format!("2100{:05}", i * 7), i).unwrap();
            }
        }

        let mut trie = TrieIndex::open(&path, StoreOptions::default()).unwrap();
        for i in 0..200u32 {
            assert_eq!(trie.lookup(&format!("2100{:05}", i * 7)).unwrap(), Some(i));
        }
        assert_eq!(trie.lookup("210000001").unwrap(), None);
    }
}
