//! Database core: ExamDB structure, open and clear
//!
//! All files live directly in `config.data_dir`:
//! - `records.dat`: exam records
//! - `locations.dat`, `answer_keys.dat`: lookup tables
//! - `score_<field>_{meta,index,leaf}.dat`: one B+ tree per score field
//! - `sequence_trie.dat`, `state_index.dat`: sequence and state indexes

use crate::config::DBConfig;
use crate::index::manager::{SEQUENCE_INDEX_FILE, STATE_INDEX_FILE};
use crate::index::{BTreeStats, IndexSet};
use crate::storage::{AnswerKeyCodec, AnswerKeyTable, LocationCodec, LocationTable, LookupTable, RecordStore};
use crate::types::ScoreField;
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::info;

pub const RECORDS_FILE: &str = "records.dat";
pub const LOCATIONS_FILE: &str = "locations.dat";
pub const ANSWER_KEYS_FILE: &str = "answer_keys.dat";

/// Database statistics
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub records: u64,
    pub locations: u64,
    pub answer_keys: u64,
    pub trie_nodes: u64,
    pub state_nodes: u64,
    pub trees: Vec<(ScoreField, BTreeStats)>,
}

/// Exam result database: record store, lookup tables and every index
pub struct ExamDB {
    pub(crate) config: DBConfig,
    pub(crate) records: RecordStore,
    pub(crate) locations: LocationTable,
    pub(crate) answer_keys: AnswerKeyTable,
    pub(crate) indexes: IndexSet,
}

impl ExamDB {
    /// Open the database in `config.data_dir`, creating missing files.
    pub fn open(config: DBConfig) -> Result<Self> {
        config.validate()?;
        let dir = config.data_dir.clone();
        std::fs::create_dir_all(&dir)?;

        let options = config.store_options();
        let records = RecordStore::open(dir.join(RECORDS_FILE), options)?;
        let locations = LookupTable::open(dir.join(LOCATIONS_FILE), LocationCodec, options)?;
        let answer_keys = LookupTable::open(dir.join(ANSWER_KEYS_FILE), AnswerKeyCodec, options)?;
        let indexes = IndexSet::open(&dir, &config)?;

        info!(
            data_dir = %dir.display(),
            records = records.len(),
            order = config.btree_order,
            "opened exam database"
        );

        Ok(Self {
            config,
            records,
            locations,
            answer_keys,
            indexes,
        })
    }

    /// Open with default settings in `data_dir`.
    pub fn open_dir<P: Into<PathBuf>>(data_dir: P) -> Result<Self> {
        Self::open(DBConfig::with_data_dir(data_dir))
    }

    pub fn config(&self) -> &DBConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Rows per page for listings; changeable at runtime.
    pub fn set_records_per_page(&mut self, per_page: usize) -> Result<()> {
        let mut config = self.config.clone();
        config.records_per_page = per_page;
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Every file this database owns.
    pub fn data_files(config: &DBConfig) -> Vec<PathBuf> {
        let dir = &config.data_dir;
        let mut files = vec![
            dir.join(RECORDS_FILE),
            dir.join(LOCATIONS_FILE),
            dir.join(ANSWER_KEYS_FILE),
            dir.join(SEQUENCE_INDEX_FILE),
            dir.join(STATE_INDEX_FILE),
        ];
        for field in ScoreField::ALL {
            let name = field.tree_name();
            for suffix in ["meta", "index", "leaf"] {
                files.push(dir.join(format!("{}_{}.dat", name, suffix)));
            }
        }
        files
    }

    /// Delete every data and index file and reopen empty.
    pub fn clear(self) -> Result<Self> {
        let config = self.config.clone();
        // close every file before removing it
        drop(self);

        let mut removed = 0;
        for path in Self::data_files(&config) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(data_dir = %config.data_dir.display(), removed, "cleared exam database");

        Self::open(config)
    }

    pub fn stats(&mut self) -> Result<DatabaseStats> {
        Ok(DatabaseStats {
            records: self.records.len(),
            locations: self.locations.len(),
            answer_keys: self.answer_keys.len(),
            trie_nodes: self.indexes.sequences().node_count(),
            state_nodes: self.indexes.states().node_count(),
            trees: self.indexes.tree_stats()?,
        })
    }

    /// Structural check of every score tree.
    pub fn verify(&mut self) -> Result<()> {
        self.indexes.verify()
    }

    /// Force every file to the device.
    pub fn sync(&mut self) -> Result<()> {
        self.records.sync()?;
        self.locations.sync()?;
        self.answer_keys.sync()?;
        self.indexes.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_every_file() {
        let temp = TempDir::new().unwrap();
        let config = DBConfig::for_testing(temp.path());
        let mut db = ExamDB::open(config.clone()).unwrap();

        for path in ExamDB::data_files(&config) {
            // node files without a header stay empty until first insert
            assert!(path.exists(), "{} missing", path.display());
        }
        let stats = db.stats().unwrap();
        assert_eq!(stats.records, 0);
        assert_eq!(stats.trees.len(), 5);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let temp = TempDir::new().unwrap();
        let mut config = DBConfig::for_testing(temp.path());
        config.btree_order = 1;
        assert!(matches!(ExamDB::open(config), Err(StorageError::InvalidArgument(_))));
    }

    #[test]
    fn test_records_per_page() {
        let temp = TempDir::new().unwrap();
        let mut db = ExamDB::open(DBConfig::for_testing(temp.path())).unwrap();
        db.set_records_per_page(20).unwrap();
        assert_eq!(db.config().records_per_page, 20);
        assert!(db.set_records_per_page(0).is_err());
        assert_eq!(db.config().records_per_page, 20);
    }
}
