//! Persistent B+ tree over `f32` scores
//!
//! ## Layout
//! Each tree owns three files:
//! ```text
//! <name>_meta.dat   [metadata block: order, root, root_is_leaf, first/last leaf, count]
//! <name>_index.dat  [internal 0][internal 1]...
//! <name>_leaf.dat   [leaf 0][leaf 1]...
//! ```
//! Nodes reference each other by slot index in their file. Leaves form a
//! doubly linked chain in key order, so ordered scans never touch internal
//! nodes.
//!
//! ## Semantics
//! - Duplicate scores are allowed; a new entry goes after existing equal ones.
//! - Leaves hold at most M-1 entries, internal nodes at most M-1 keys.
//! - A full leaf splits into `M/2` entries (kept in place) and the rest
//!   (appended); the right half's first score is promoted.
//! - A full internal node splits around key `M/2`, which moves up.
//! - There is no delete, so the tree only grows.
//!
//! Every mutation is written through before `insert` returns, but a split and
//! its parent update are separate writes.

use super::btree_node::{InternalCodec, InternalNode, LeafCodec, LeafEntry, LeafNode, TreeMeta};
use crate::config::{DurabilityLevel, StoreOptions, MIN_BTREE_ORDER};
use crate::storage::codec::Position;
use crate::storage::header::{self, BTREE_META_MAGIC};
use crate::storage::node_store::{persist, NodeStore};
use crate::types::RecordId;
use crate::{Result, StorageError};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Two scores closer than this are considered equal by `search` and `get`.
pub const SCORE_EPSILON: f32 = 1e-4;

/// Outcome of `BPlusTree::search`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    /// Internal node whose child is the target leaf (None if the root is a leaf)
    pub internal: Option<Position>,
    /// Target leaf (None only for an empty tree)
    pub leaf: Option<Position>,
    /// Slot of the matching entry, or where the key would be inserted
    pub slot: usize,
    pub found: bool,
}

impl SearchResult {
    fn empty() -> Self {
        Self {
            internal: None,
            leaf: None,
            slot: 0,
            found: false,
        }
    }
}

/// Shape of a tree; height only grows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeState {
    Empty,
    LeafRoot,
    MultiLevel,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BTreeStats {
    pub entries: u64,
    pub leaf_nodes: u64,
    pub internal_nodes: u64,
    /// Levels from root to leaves (0 when empty)
    pub height: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

pub struct BPlusTree {
    name: String,
    order: usize,
    meta: TreeMeta,
    meta_file: File,
    meta_path: PathBuf,
    internals: NodeStore<InternalCodec>,
    leaves: NodeStore<LeafCodec>,
    durability: DurabilityLevel,
}

impl BPlusTree {
    /// Open or create the tree `name` inside `dir`.
    ///
    /// Reopening an existing tree with a different order is an error: the
    /// slot size of both node files depends on it.
    pub fn open<P: AsRef<Path>>(dir: P, name: &str, order: usize, options: StoreOptions) -> Result<Self> {
        if order < MIN_BTREE_ORDER || order > u32::MAX as usize {
            return Err(StorageError::InvalidArgument(format!(
                "B+ tree order {} is out of range (minimum {})",
                order, MIN_BTREE_ORDER
            )));
        }

        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let meta_path = dir.join(format!("{}_meta.dat", name));
        let mut meta_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&meta_path)?;

        let is_new = meta_file.metadata()?.len() == 0;
        let meta = if is_new {
            let meta = TreeMeta::empty(order);
            header::write_block(&mut meta_file, BTREE_META_MAGIC, &meta)?;
            persist(&mut meta_file, options.durability)?;
            meta
        } else {
            let meta: TreeMeta = header::read_block(&mut meta_file, BTREE_META_MAGIC)?;
            if meta.order as usize != order {
                return Err(StorageError::InvalidArgument(format!(
                    "tree '{}' was created with order {}, opened with {}",
                    name, meta.order, order
                )));
            }
            meta
        };

        let internals = NodeStore::open(
            dir.join(format!("{}_index.dat", name)),
            InternalCodec::new(order),
            0,
            options,
        )?;
        let leaves = NodeStore::open(dir.join(format!("{}_leaf.dat", name)), LeafCodec::new(order), 0, options)?;

        let tree = Self {
            name: name.to_string(),
            order,
            meta,
            meta_file,
            meta_path,
            internals,
            leaves,
            durability: options.durability,
        };
        tree.check_meta()?;

        debug!(
            tree = %tree.name,
            order,
            entries = tree.meta.entry_count,
            leaves = tree.leaves.len(),
            "opened B+ tree"
        );
        Ok(tree)
    }

    /// Positions in the metadata block must exist in the node files.
    fn check_meta(&self) -> Result<()> {
        let leaf_slots = self.leaves.len();
        let in_leaves = |pos: Option<Position>| pos.map_or(true, |p| p < leaf_slots);

        let root_ok = match self.meta.root {
            None => self.meta.first_leaf.is_none() && self.meta.last_leaf.is_none(),
            Some(root) if self.meta.root_is_leaf => root < leaf_slots,
            Some(root) => root < self.internals.len(),
        };
        let leaves_ok = in_leaves(self.meta.first_leaf)
            && in_leaves(self.meta.last_leaf)
            && (self.meta.root.is_none() || (self.meta.first_leaf.is_some() && self.meta.last_leaf.is_some()));

        if !root_ok || !leaves_ok {
            return Err(StorageError::Corruption(format!(
                "{}: metadata {:?} does not match node files ({} internal, {} leaf slots)",
                self.meta_path.display(),
                self.meta,
                self.internals.len(),
                leaf_slots
            )));
        }
        Ok(())
    }

    fn save_meta(&mut self) -> Result<()> {
        header::write_block(&mut self.meta_file, BTREE_META_MAGIC, &self.meta)?;
        persist(&mut self.meta_file, self.durability)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of entries (duplicates included).
    pub fn len(&self) -> u64 {
        self.meta.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.meta.root.is_none()
    }

    pub fn state(&self) -> TreeState {
        match self.meta.root {
            None => TreeState::Empty,
            Some(_) if self.meta.root_is_leaf => TreeState::LeafRoot,
            Some(_) => TreeState::MultiLevel,
        }
    }

    pub fn meta(&self) -> &TreeMeta {
        &self.meta
    }

    /// Descend from the root to the leaf for `key`.
    ///
    /// `lower` selects the leftmost leaf that may hold `key` instead of the
    /// leaf where `key` would be inserted.
    fn find_leaf(&mut self, key: f32, lower: bool) -> Result<Option<(Option<Position>, Position)>> {
        let Some(root) = self.meta.root else {
            return Ok(None);
        };
        if self.meta.root_is_leaf {
            return Ok(Some((None, root)));
        }

        let mut pos = root;
        // a tree taller than its node count means a cycle
        for _ in 0..=self.internals.len() {
            let node = self.internals.read(pos)?;
            let idx = if lower {
                node.lower_child_index(key)
            } else {
                node.child_index(key)
            };
            let child = node.children[idx];
            if node.points_to_leaves {
                return Ok(Some((Some(pos), child)));
            }
            pos = child;
        }

        Err(StorageError::Corruption(format!(
            "tree '{}': descent from root {} does not reach a leaf",
            self.name, root
        )))
    }

    /// Locate `key`: the leaf that holds or would hold it, and the slot.
    ///
    /// An entry within `SCORE_EPSILON` of `key` counts as found; otherwise
    /// the slot is that of the first entry greater than `key`, or the entry
    /// count if there is none.
    pub fn search(&mut self, key: f32) -> Result<SearchResult> {
        let Some((internal, leaf_pos)) = self.find_leaf(key, false)? else {
            return Ok(SearchResult::empty());
        };

        let leaf = self.leaves.read(leaf_pos)?;
        let mut slot = leaf.entries.len();
        let mut found = false;
        for (i, entry) in leaf.entries.iter().enumerate() {
            if (entry.score - key).abs() < SCORE_EPSILON {
                slot = i;
                found = true;
                break;
            }
            if entry.score > key {
                slot = i;
                break;
            }
        }

        Ok(SearchResult {
            internal,
            leaf: Some(leaf_pos),
            slot,
            found,
        })
    }

    pub fn insert(&mut self, key: f32, record_id: RecordId) -> Result<()> {
        if !key.is_finite() {
            return Err(StorageError::InvalidKey(format!(
                "tree '{}': score {} is not a finite number",
                self.name, key
            )));
        }
        let entry = LeafEntry { score: key, record_id };

        if self.meta.root.is_none() {
            let mut leaf = LeafNode::new(None);
            leaf.entries.push(entry);
            self.leaves.write(0, &leaf)?;

            self.meta.root = Some(0);
            self.meta.root_is_leaf = true;
            self.meta.first_leaf = Some(0);
            self.meta.last_leaf = Some(0);
            self.meta.entry_count = 1;
            self.save_meta()?;
            debug!(tree = %self.name, "created root leaf");
            return Ok(());
        }

        let found = self.search(key)?;
        let leaf_pos = found.leaf.ok_or_else(|| {
            StorageError::Corruption(format!("tree '{}': non-empty tree has no leaf", self.name))
        })?;
        if found.found {
            debug!(tree = %self.name, score = key, record_id, "duplicate score");
        }

        let mut leaf = self.leaves.read(leaf_pos)?;
        let slot = leaf.entries.partition_point(|e| e.score <= key);
        leaf.entries.insert(slot, entry);
        self.meta.entry_count += 1;

        if leaf.entries.len() < self.order {
            self.leaves.write(leaf_pos, &leaf)?;
        } else {
            self.split_leaf(leaf_pos, leaf)?;
        }
        self.save_meta()
    }

    /// Split an overfull leaf (M entries) held in memory.
    fn split_leaf(&mut self, leaf_pos: Position, mut leaf: LeafNode) -> Result<()> {
        let right_entries = leaf.entries.split_off(self.order / 2);
        let promoted = right_entries[0].score;

        let right = LeafNode {
            parent: leaf.parent,
            entries: right_entries,
            next: leaf.next,
            prev: Some(leaf_pos),
        };
        let right_pos = self.leaves.append(&right)?;

        if let Some(next_pos) = leaf.next {
            let mut next = self.leaves.read(next_pos)?;
            next.prev = Some(right_pos);
            self.leaves.write(next_pos, &next)?;
        }

        leaf.next = Some(right_pos);
        self.leaves.write(leaf_pos, &leaf)?;

        if self.meta.last_leaf == Some(leaf_pos) {
            self.meta.last_leaf = Some(right_pos);
        }

        debug!(tree = %self.name, left = leaf_pos, right = right_pos, promoted, "split leaf");
        self.insert_into_parent(leaf.parent, promoted, leaf_pos, right_pos, true)
    }

    /// Insert separator `key` between `left` and its new right sibling.
    fn insert_into_parent(
        &mut self,
        parent: Option<Position>,
        key: f32,
        left: Position,
        right: Position,
        points_to_leaves: bool,
    ) -> Result<()> {
        let Some(parent_pos) = parent else {
            let root = InternalNode {
                parent: None,
                keys: vec![key],
                children: vec![left, right],
                points_to_leaves,
            };
            let root_pos = self.internals.append(&root)?;
            self.set_parent(left, points_to_leaves, root_pos)?;
            self.set_parent(right, points_to_leaves, root_pos)?;

            self.meta.root = Some(root_pos);
            self.meta.root_is_leaf = false;
            debug!(tree = %self.name, root = root_pos, "new root");
            return Ok(());
        };

        let mut node = self.internals.read(parent_pos)?;
        // place the key next to the split child, not by comparison, so equal
        // separators keep their children in chain order
        let idx = node.children.iter().position(|&c| c == left).ok_or_else(|| {
            StorageError::Corruption(format!(
                "tree '{}': internal node {} does not list child {}",
                self.name, parent_pos, left
            ))
        })?;
        node.keys.insert(idx, key);
        node.children.insert(idx + 1, right);

        if node.keys.len() < self.order {
            return self.internals.write(parent_pos, &node);
        }

        // M keys, M+1 children: keys[..mid] stay, keys[mid] moves up
        let mid = self.order / 2;
        let right_keys = node.keys.split_off(mid + 1);
        let promoted = node.keys.pop().ok_or_else(|| {
            StorageError::Corruption(format!("tree '{}': empty internal split", self.name))
        })?;
        let right_children = node.children.split_off(mid + 1);

        let sibling = InternalNode {
            parent: node.parent,
            keys: right_keys,
            children: right_children,
            points_to_leaves: node.points_to_leaves,
        };
        let sibling_pos = self.internals.append(&sibling)?;
        self.internals.write(parent_pos, &node)?;

        for &child in &sibling.children {
            self.set_parent(child, sibling.points_to_leaves, sibling_pos)?;
        }

        debug!(tree = %self.name, left = parent_pos, right = sibling_pos, promoted, "split internal node");
        self.insert_into_parent(node.parent, promoted, parent_pos, sibling_pos, false)
    }

    fn set_parent(&mut self, pos: Position, is_leaf: bool, parent: Position) -> Result<()> {
        if is_leaf {
            let mut leaf = self.leaves.read(pos)?;
            leaf.parent = Some(parent);
            self.leaves.write(pos, &leaf)
        } else {
            let mut node = self.internals.read(pos)?;
            node.parent = Some(parent);
            self.internals.write(pos, &node)
        }
    }

    /// Entries in ascending score order, starting at the first leaf.
    pub fn scan_forward(&mut self) -> LeafScan<'_> {
        let start = self.meta.first_leaf;
        LeafScan::new(self, start, Direction::Forward)
    }

    /// Entries in descending score order, starting at the last leaf.
    pub fn scan_backward(&mut self) -> LeafScan<'_> {
        let start = self.meta.last_leaf;
        LeafScan::new(self, start, Direction::Backward)
    }

    /// Every entry with `low <= score <= high`, ascending.
    pub fn range(&mut self, low: f32, high: f32) -> Result<Vec<LeafEntry>> {
        let mut results = Vec::new();
        if low > high {
            return Ok(results);
        }
        let Some((_, start)) = self.find_leaf(low, true)? else {
            return Ok(results);
        };

        for entry in LeafScan::new(self, Some(start), Direction::Forward) {
            let entry = entry?;
            if entry.score > high {
                break;
            }
            if entry.score >= low {
                results.push(entry);
            }
        }
        Ok(results)
    }

    /// Record ids of every entry equal to `key` within `SCORE_EPSILON`.
    pub fn get(&mut self, key: f32) -> Result<Vec<RecordId>> {
        Ok(self
            .range(key - SCORE_EPSILON, key + SCORE_EPSILON)?
            .into_iter()
            .filter(|e| (e.score - key).abs() < SCORE_EPSILON)
            .map(|e| e.record_id)
            .collect())
    }

    pub fn stats(&mut self) -> Result<BTreeStats> {
        let mut height = 0;
        if let Some(root) = self.meta.root {
            height = 1;
            if !self.meta.root_is_leaf {
                let mut pos = root;
                loop {
                    height += 1;
                    let node = self.internals.read(pos)?;
                    if node.points_to_leaves || height > self.internals.len() as usize + 1 {
                        break;
                    }
                    pos = node.children[0];
                }
            }
        }

        let leaf_stats = self.leaves.stats();
        let internal_stats = self.internals.stats();
        Ok(BTreeStats {
            entries: self.meta.entry_count,
            leaf_nodes: self.leaves.len(),
            internal_nodes: self.internals.len(),
            height,
            cache_hits: leaf_stats.cache_hits + internal_stats.cache_hits,
            cache_misses: leaf_stats.cache_misses + internal_stats.cache_misses,
        })
    }

    /// Check the structural invariants of the whole tree.
    ///
    /// - internal nodes: `keys + 1` children, keys non-decreasing, every
    ///   child's parent pointer names this node
    /// - leaves: entries sorted and within their separators
    /// - leaf chain: same leaves in the same order as the tree walk, with
    ///   `prev`/`next` consistent and the metadata ends correct
    /// - entry count matches the metadata
    pub fn verify(&mut self) -> Result<()> {
        let Some(root) = self.meta.root else {
            if self.meta.first_leaf.is_some() || self.meta.last_leaf.is_some() || self.meta.entry_count != 0 {
                return Err(self.violation("empty tree with leaf pointers or entries".into()));
            }
            return Ok(());
        };

        let mut leaves_in_order = Vec::new();
        let mut entries = 0u64;
        if self.meta.root_is_leaf {
            let leaf = self.leaves.read(root)?;
            if leaf.parent.is_some() {
                return Err(self.violation(format!("root leaf {} has a parent", root)));
            }
            self.check_leaf(root, &leaf, None, None)?;
            entries += leaf.entries.len() as u64;
            leaves_in_order.push(root);
        } else {
            let node = self.internals.read(root)?;
            if node.parent.is_some() {
                return Err(self.violation(format!("root node {} has a parent", root)));
            }
            // (node, lower bound, upper bound), popped left to right
            let mut stack = vec![(root, None, None)];
            let mut visited = 0u64;
            while let Some((pos, low, high)) = stack.pop() {
                visited += 1;
                if visited > self.internals.len() {
                    return Err(self.violation("internal nodes form a cycle".into()));
                }
                let node = self.internals.read(pos)?;
                if node.children.len() != node.keys.len() + 1 {
                    return Err(self.violation(format!("node {} has mismatched keys and children", pos)));
                }
                if node.keys.windows(2).any(|w| w[0] > w[1]) {
                    return Err(self.violation(format!("node {} keys out of order", pos)));
                }

                let mut inner = Vec::new();
                for (i, &child) in node.children.iter().enumerate() {
                    let child_low = if i == 0 { low } else { Some(node.keys[i - 1]) };
                    let child_high = if i == node.keys.len() { high } else { Some(node.keys[i]) };
                    if node.points_to_leaves {
                        let leaf = self.leaves.read(child)?;
                        if leaf.parent != Some(pos) {
                            return Err(self.violation(format!(
                                "leaf {} parent is {:?}, listed by {}",
                                child, leaf.parent, pos
                            )));
                        }
                        self.check_leaf(child, &leaf, child_low, child_high)?;
                        entries += leaf.entries.len() as u64;
                        leaves_in_order.push(child);
                    } else {
                        let child_node = self.internals.read(child)?;
                        if child_node.parent != Some(pos) {
                            return Err(self.violation(format!(
                                "node {} parent is {:?}, listed by {}",
                                child, child_node.parent, pos
                            )));
                        }
                        inner.push((child, child_low, child_high));
                    }
                }
                stack.extend(inner.into_iter().rev());
            }
        }

        if entries != self.meta.entry_count {
            return Err(self.violation(format!(
                "{} entries in leaves, metadata counts {}",
                entries, self.meta.entry_count
            )));
        }
        self.check_chain(&leaves_in_order)
    }

    fn check_leaf(&self, pos: Position, leaf: &LeafNode, low: Option<f32>, high: Option<f32>) -> Result<()> {
        if leaf.entries.is_empty() {
            return Err(self.violation(format!("leaf {} is empty", pos)));
        }
        if leaf.entries.windows(2).any(|w| w[0].score > w[1].score) {
            return Err(self.violation(format!("leaf {} entries out of order", pos)));
        }
        let first = leaf.entries[0].score;
        let last = leaf.entries[leaf.entries.len() - 1].score;
        if low.is_some_and(|l| first < l) || high.is_some_and(|h| last > h) {
            return Err(self.violation(format!(
                "leaf {} scores {}..{} outside separators {:?}..{:?}",
                pos, first, last, low, high
            )));
        }
        Ok(())
    }

    fn check_chain(&mut self, expected: &[Position]) -> Result<()> {
        if self.meta.first_leaf != expected.first().copied() || self.meta.last_leaf != expected.last().copied() {
            return Err(self.violation(format!(
                "metadata leaf ends {:?}/{:?}, tree ends {:?}/{:?}",
                self.meta.first_leaf,
                self.meta.last_leaf,
                expected.first(),
                expected.last()
            )));
        }

        let mut prev = None;
        for (i, &pos) in expected.iter().enumerate() {
            let leaf = self.leaves.read(pos)?;
            if leaf.prev != prev {
                return Err(self.violation(format!("leaf {} prev is {:?}, expected {:?}", pos, leaf.prev, prev)));
            }
            let next = expected.get(i + 1).copied();
            if leaf.next != next {
                return Err(self.violation(format!("leaf {} next is {:?}, expected {:?}", pos, leaf.next, next)));
            }
            prev = Some(pos);
        }
        Ok(())
    }

    fn violation(&self, msg: String) -> StorageError {
        StorageError::Corruption(format!("tree '{}': {}", self.name, msg))
    }

    pub fn sync(&mut self) -> Result<()> {
        self.meta_file.sync_all()?;
        self.internals.sync()?;
        self.leaves.sync()
    }
}

/// Iterator over leaf entries following the leaf chain
///
/// Yields `Err` once and stops if a leaf cannot be read or the chain is
/// longer than the leaf file.
pub struct LeafScan<'a> {
    tree: &'a mut BPlusTree,
    direction: Direction,
    next_leaf: Option<Position>,
    buffer: std::vec::IntoIter<LeafEntry>,
    visited: u64,
}

impl<'a> LeafScan<'a> {
    fn new(tree: &'a mut BPlusTree, start: Option<Position>, direction: Direction) -> Self {
        Self {
            tree,
            direction,
            next_leaf: start,
            buffer: Vec::new().into_iter(),
            visited: 0,
        }
    }
}

impl Iterator for LeafScan<'_> {
    type Item = Result<LeafEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(entry) = self.buffer.next() {
                return Some(Ok(entry));
            }

            let pos = self.next_leaf.take()?;
            self.visited += 1;
            if self.visited > self.tree.leaves.len() {
                return Some(Err(self.tree.violation(format!("leaf chain loops at {}", pos))));
            }

            let leaf = match self.tree.leaves.read(pos) {
                Ok(leaf) => leaf,
                Err(e) => return Some(Err(e)),
            };
            let mut entries = leaf.entries;
            match self.direction {
                Direction::Forward => self.next_leaf = leaf.next,
                Direction::Backward => {
                    entries.reverse();
                    self.next_leaf = leaf.prev;
                }
            }
            self.buffer = entries.into_iter();
        }
    }
}
