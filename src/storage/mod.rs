//! Storage layer
//!
//! Flat files of fixed-size slots addressed by position, with checksummed
//! header blocks for per-file bookkeeping.

pub mod checksum;
pub mod codec;
pub mod header;
pub mod lookup;
pub mod node_store;
pub mod record_store;

pub use checksum::{Checksum, ChecksumError};
pub use codec::{FieldReader, FieldWriter, Position, NULL_POSITION};
pub use lookup::{AnswerKeyCodec, AnswerKeyTable, Keyed, LocationCodec, LocationTable, LookupTable};
pub use node_store::{NodeStore, NodeStoreStats, SlotCodec};
pub use record_store::{ExamRecordCodec, RecordIter, RecordStore};
