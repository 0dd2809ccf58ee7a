//! B+ tree node layouts
//!
//! Both node kinds are sized by the tree order M, so every slot in a file has
//! the same width:
//!
//! ```text
//! Leaf:     [parent:8][count:4][(score:4, record_id:4) x (M-1)][next:8][prev:8]
//! Internal: [parent:8][count:4][key:4 x (M-1)][child:8 x M][points_to_leaves:1]
//! ```
//!
//! Unused entry/key/child slots are zero-filled. Null positions are
//! `u64::MAX`.

use crate::storage::codec::{FieldReader, FieldWriter, Position, BOOL_LEN, F32_LEN, POS_LEN, U32_LEN};
use crate::storage::SlotCodec;
use crate::types::RecordId;
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// One `(score, record_id)` pair stored in a leaf
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeafEntry {
    pub score: f32,
    pub record_id: RecordId,
}

const ENTRY_LEN: usize = F32_LEN + U32_LEN;

/// Data node holding up to M-1 sorted entries
#[derive(Debug, Clone, PartialEq)]
pub struct LeafNode {
    pub parent: Option<Position>,
    pub entries: Vec<LeafEntry>,
    pub next: Option<Position>,
    pub prev: Option<Position>,
}

impl LeafNode {
    pub fn new(parent: Option<Position>) -> Self {
        Self {
            parent,
            entries: Vec::new(),
            next: None,
            prev: None,
        }
    }
}

/// Index node holding up to M-1 separator keys and M children
#[derive(Debug, Clone, PartialEq)]
pub struct InternalNode {
    pub parent: Option<Position>,
    pub keys: Vec<f32>,
    pub children: Vec<Position>,
    /// Children are leaf slots rather than internal node slots
    pub points_to_leaves: bool,
}

impl InternalNode {
    /// Index of the child to descend into for `key`: left of the first key
    /// strictly greater than `key`, or the last child.
    pub fn child_index(&self, key: f32) -> usize {
        self.keys.iter().position(|&k| k > key).unwrap_or(self.keys.len())
    }

    /// Like `child_index`, but left of the first key greater than or equal
    /// to `key`, reaching the leftmost leaf that may hold `key`.
    pub fn lower_child_index(&self, key: f32) -> usize {
        self.keys.iter().position(|&k| k >= key).unwrap_or(self.keys.len())
    }
}

pub struct LeafCodec {
    order: usize,
}

impl LeafCodec {
    pub fn new(order: usize) -> Self {
        Self { order }
    }

    pub fn capacity(&self) -> usize {
        self.order - 1
    }
}

impl SlotCodec for LeafCodec {
    type Item = LeafNode;

    fn slot_size(&self) -> usize {
        POS_LEN + U32_LEN + self.capacity() * ENTRY_LEN + POS_LEN * 2
    }

    fn encode(&self, node: &LeafNode, buf: &mut [u8]) -> Result<()> {
        let capacity = self.capacity();
        if node.entries.len() > capacity {
            return Err(StorageError::InvalidData(format!(
                "leaf holds {} entries, capacity is {}",
                node.entries.len(),
                capacity
            )));
        }

        let mut w = FieldWriter::new(buf);
        w.put_pos(node.parent);
        w.put_u32(node.entries.len() as u32);
        for entry in &node.entries {
            w.put_f32(entry.score);
            w.put_u32(entry.record_id);
        }
        w.skip((capacity - node.entries.len()) * ENTRY_LEN);
        w.put_pos(node.next);
        w.put_pos(node.prev);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<LeafNode> {
        let capacity = self.capacity();
        let mut r = FieldReader::new(buf);
        let parent = r.get_pos()?;
        let count = r.get_u32()? as usize;
        if count > capacity {
            return Err(StorageError::Corruption(format!(
                "leaf entry count {} exceeds capacity {}",
                count, capacity
            )));
        }

        let mut entries = Vec::with_capacity(capacity);
        for _ in 0..count {
            let score = r.get_f32()?;
            let record_id = r.get_u32()?;
            entries.push(LeafEntry { score, record_id });
        }
        r.skip((capacity - count) * ENTRY_LEN);

        Ok(LeafNode {
            parent,
            entries,
            next: r.get_pos()?,
            prev: r.get_pos()?,
        })
    }
}

pub struct InternalCodec {
    order: usize,
}

impl InternalCodec {
    pub fn new(order: usize) -> Self {
        Self { order }
    }

    pub fn capacity(&self) -> usize {
        self.order - 1
    }
}

impl SlotCodec for InternalCodec {
    type Item = InternalNode;

    fn slot_size(&self) -> usize {
        POS_LEN + U32_LEN + self.capacity() * F32_LEN + self.order * POS_LEN + BOOL_LEN
    }

    fn encode(&self, node: &InternalNode, buf: &mut [u8]) -> Result<()> {
        let capacity = self.capacity();
        if node.keys.is_empty() || node.keys.len() > capacity || node.children.len() != node.keys.len() + 1 {
            return Err(StorageError::InvalidData(format!(
                "internal node with {} keys and {} children (capacity {})",
                node.keys.len(),
                node.children.len(),
                capacity
            )));
        }

        let mut w = FieldWriter::new(buf);
        w.put_pos(node.parent);
        w.put_u32(node.keys.len() as u32);
        for &key in &node.keys {
            w.put_f32(key);
        }
        w.skip((capacity - node.keys.len()) * F32_LEN);
        for &child in &node.children {
            w.put_pos(Some(child));
        }
        w.skip((self.order - node.children.len()) * POS_LEN);
        w.put_bool(node.points_to_leaves);
        Ok(())
    }

    fn decode(&self, buf: &[u8]) -> Result<InternalNode> {
        let capacity = self.capacity();
        let mut r = FieldReader::new(buf);
        let parent = r.get_pos()?;
        let count = r.get_u32()? as usize;
        if count == 0 || count > capacity {
            return Err(StorageError::Corruption(format!(
                "internal key count {} outside 1..={}",
                count, capacity
            )));
        }

        let mut keys = Vec::with_capacity(capacity + 1);
        for _ in 0..count {
            keys.push(r.get_f32()?);
        }
        r.skip((capacity - count) * F32_LEN);

        let mut children = Vec::with_capacity(self.order + 1);
        for i in 0..=count {
            match r.get_pos()? {
                Some(child) => children.push(child),
                None => {
                    return Err(StorageError::Corruption(format!(
                        "internal node child {} of {} is null",
                        i,
                        count + 1
                    )))
                }
            }
        }
        r.skip((self.order - children.len()) * POS_LEN);

        Ok(InternalNode {
            parent,
            keys,
            children,
            points_to_leaves: r.get_bool()?,
        })
    }
}

/// Per-tree metadata block
///
/// Either the tree is empty (no root, no leaves) or `first_leaf` and
/// `last_leaf` are the two ends of the leaf chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TreeMeta {
    pub order: u32,
    pub root: Option<Position>,
    pub root_is_leaf: bool,
    pub first_leaf: Option<Position>,
    pub last_leaf: Option<Position>,
    pub entry_count: u64,
}

impl TreeMeta {
    pub fn empty(order: usize) -> Self {
        Self {
            order: order as u32,
            root: None,
            root_is_leaf: false,
            first_leaf: None,
            last_leaf: None,
            entry_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_sizes() {
        // order 5: 4 entries / 4 keys / 5 children
        assert_eq!(LeafCodec::new(5).slot_size(), 8 + 4 + 4 * 8 + 16);
        assert_eq!(InternalCodec::new(5).slot_size(), 8 + 4 + 4 * 4 + 5 * 8 + 1);
    }

    #[test]
    fn test_leaf_layout() {
        let codec = LeafCodec::new(5);
        let node = LeafNode {
            parent: None,
            entries: vec![
                LeafEntry { score: 10.0, record_id: 7 },
                LeafEntry { score: 12.5, record_id: 2 },
            ],
            next: Some(3),
            prev: None,
        };

        let mut buf = vec![0xAAu8; codec.slot_size()];
        codec.encode(&node, &mut buf).unwrap();
        assert_eq!(&buf[..8], &u64::MAX.to_le_bytes());
        assert_eq!(&buf[8..12], &2u32.to_le_bytes());
        assert_eq!(&buf[12..16], &10.0f32.to_le_bytes());
        // unused entries are zeroed, not left over
        assert!(buf[28..44].iter().all(|&b| b == 0));

        assert_eq!(codec.decode(&buf).unwrap(), node);
    }

    #[test]
    fn test_leaf_overflow_rejected() {
        let codec = LeafCodec::new(3);
        let mut node = LeafNode::new(None);
        for i in 0..3 {
            node.entries.push(LeafEntry { score: i as f32, record_id: i });
        }
        let mut buf = vec![0u8; codec.slot_size()];
        assert!(codec.encode(&node, &mut buf).is_err());
    }

    #[test]
    fn test_internal_null_child_is_corruption() {
        let codec = InternalCodec::new(4);
        let node = InternalNode {
            parent: Some(1),
            keys: vec![5.0],
            children: vec![0, 1],
            points_to_leaves: true,
        };
        let mut buf = vec![0u8; codec.slot_size()];
        codec.encode(&node, &mut buf).unwrap();
        assert_eq!(codec.decode(&buf).unwrap(), node);

        // knock out the second child
        let second_child = 8 + 4 + 3 * 4 + 8;
        buf[second_child..second_child + 8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(codec.decode(&buf), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_child_index() {
        let node = InternalNode {
            parent: None,
            keys: vec![10.0, 20.0, 20.0],
            children: vec![0, 1, 2, 3],
            points_to_leaves: true,
        };
        assert_eq!(node.child_index(5.0), 0);
        assert_eq!(node.child_index(10.0), 1);
        assert_eq!(node.child_index(20.0), 3);
        assert_eq!(node.lower_child_index(20.0), 1);
        assert_eq!(node.lower_child_index(99.0), 3);
    }
}
