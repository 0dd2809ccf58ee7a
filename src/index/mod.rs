//! Secondary indexes
//!
//! - `btree`: on-disk B+ tree from score to record id, one per score field
//! - `trie`: digit trie from sequence number to record id
//! - `bucket_index`: hash-chained inverted index from state code to record ids
//! - `manager`: the set of all indexes of one database

pub mod btree;
pub mod btree_node;
pub mod bucket_index;
pub mod manager;
pub mod trie;

pub use btree::{BPlusTree, BTreeStats, LeafScan, SearchResult, TreeState, SCORE_EPSILON};
pub use btree_node::{LeafEntry, TreeMeta};
pub use bucket_index::{BucketIndex, ChainIter, STATE_CODES};
pub use manager::{IndexOutcome, IndexSet};
pub use trie::TrieIndex;
