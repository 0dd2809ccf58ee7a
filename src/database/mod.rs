//! Database module
//!
//! # Module Structure
//! - `core`: ExamDB struct, open, clear, stats
//! - `import`: CSV parsing and the per-record build path
//! - `query`: lookups and ranked listings

pub mod core;
pub mod import;
pub mod query;

pub use core::{DatabaseStats, ExamDB};
pub use import::{ExamRow, ImportReport};
