//! examdb storage engine
//!
//! File-backed multi-index store for exam result records.
//!
//! ## Architecture
//! - Storage: fixed-size slots addressed by position, checksummed header blocks
//! - Indexes: B+ tree per score field, digit trie by sequence number,
//!   hash-chained inverted index by state
//! - Database: CSV import driver and queries over all of the above

pub mod config;
pub mod database;
pub mod index;
pub mod storage;
pub mod types;

mod error;

pub use config::{DBConfig, DurabilityLevel, StoreOptions};
pub use error::{Result, StorageError};

pub use database::{DatabaseStats, ExamDB, ExamRow, ImportReport};
pub use index::{BPlusTree, BucketIndex, IndexSet, LeafEntry, TrieIndex};
pub use types::{AnswerKey, ExamRecord, RecordId, SchoolLocation, ScoreField, SortOrder};
