//! Index set: every secondary index of one database, opened together

use super::btree::{BPlusTree, BTreeStats};
use super::bucket_index::BucketIndex;
use super::trie::TrieIndex;
use crate::config::DBConfig;
use crate::types::{ExamRecord, RecordId, ScoreField};
use crate::Result;
use std::path::Path;
use tracing::warn;

pub const SEQUENCE_INDEX_FILE: &str = "sequence_trie.dat";
pub const STATE_INDEX_FILE: &str = "state_index.dat";

/// Malformed-input rejections while indexing one record
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexOutcome {
    /// The state code is not a registered bucket
    pub state_rejected: bool,
    /// The sequence number is not a valid trie key
    pub sequence_rejected: bool,
}

impl IndexOutcome {
    pub fn is_clean(&self) -> bool {
        !self.state_rejected && !self.sequence_rejected
    }
}

/// Five score trees (one per `ScoreField`), the sequence trie and the state
/// index. Owns every index file until dropped.
pub struct IndexSet {
    trees: Vec<BPlusTree>,
    sequences: TrieIndex,
    states: BucketIndex,
}

impl IndexSet {
    pub fn open<P: AsRef<Path>>(dir: P, config: &DBConfig) -> Result<Self> {
        let dir = dir.as_ref();
        let options = config.store_options();

        let trees = ScoreField::ALL
            .iter()
            .map(|field| BPlusTree::open(dir, &field.tree_name(), config.btree_order, options))
            .collect::<Result<Vec<_>>>()?;
        let sequences = TrieIndex::open(dir.join(SEQUENCE_INDEX_FILE), options)?;
        let states = BucketIndex::open_states(dir.join(STATE_INDEX_FILE), options)?;

        Ok(Self {
            trees,
            sequences,
            states,
        })
    }

    /// Feed a stored record to every index.
    ///
    /// The score trees come first. A rejected state code or sequence number
    /// skips only that index and is reported in the outcome; I/O errors
    /// propagate.
    pub fn insert_record(&mut self, id: RecordId, record: &ExamRecord, state: &str) -> Result<IndexOutcome> {
        for field in ScoreField::ALL {
            self.trees[field.index()].insert(record.score(field), id)?;
        }

        let mut outcome = IndexOutcome::default();
        if let Err(e) = self.states.insert(state, id) {
            if !e.is_malformed_input() {
                return Err(e);
            }
            warn!(record_id = id, state, error = %e, "state index insert skipped");
            outcome.state_rejected = true;
        }
        if let Err(e) = self.sequences.insert(&record.sequence, id) {
            if !e.is_malformed_input() {
                return Err(e);
            }
            warn!(record_id = id, sequence = %record.sequence, error = %e, "sequence index insert skipped");
            outcome.sequence_rejected = true;
        }
        Ok(outcome)
    }

    pub fn tree(&mut self, field: ScoreField) -> &mut BPlusTree {
        &mut self.trees[field.index()]
    }

    pub fn sequences(&mut self) -> &mut TrieIndex {
        &mut self.sequences
    }

    pub fn states(&mut self) -> &mut BucketIndex {
        &mut self.states
    }

    pub fn tree_stats(&mut self) -> Result<Vec<(ScoreField, BTreeStats)>> {
        ScoreField::ALL
            .iter()
            .map(|&field| Ok((field, self.trees[field.index()].stats()?)))
            .collect()
    }

    /// Structural check of all five trees.
    pub fn verify(&mut self) -> Result<()> {
        for tree in &mut self.trees {
            tree.verify()?;
        }
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        for tree in &mut self.trees {
            tree.sync()?;
        }
        self.sequences.sync()?;
        self.states.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageError;
    use tempfile::TempDir;

    fn record(sequence: &str, base: f32) -> ExamRecord {
        ExamRecord {
            sequence: sequence.to_string(),
            year: 2023,
            location_id: 0,
            answer_key_ids: [0; 4],
            score_cn: base,
            score_ch: base + 1.0,
            score_lc: base + 2.0,
            score_mt: base + 3.0,
            score_essay: base + 4.0,
            responses: Default::default(),
            language: 0,
        }
    }

    #[test]
    fn test_insert_feeds_every_index() {
        let temp = TempDir::new().unwrap();
        let mut set = IndexSet::open(temp.path(), &DBConfig::for_testing(temp.path())).unwrap();

        assert!(set.insert_record(0, &record("100", 500.0), "RS").unwrap().is_clean());
        assert!(set.insert_record(1, &record("101", 600.0), "RS").unwrap().is_clean());

        for field in ScoreField::ALL {
            assert_eq!(set.tree(field).len(), 2);
        }
        assert_eq!(set.tree(ScoreField::Essay).get(604.0).unwrap(), vec![1]);
        assert_eq!(set.sequences().lookup("101").unwrap(), Some(1));
        assert_eq!(set.states().count("RS").unwrap(), 2);
        set.verify().unwrap();
    }

    #[test]
    fn test_rejections_skip_only_their_index() {
        let temp = TempDir::new().unwrap();
        let mut set = IndexSet::open(temp.path(), &DBConfig::for_testing(temp.path())).unwrap();

        let outcome = set.insert_record(0, &record("12A", 450.0), "ZZ").unwrap();
        assert!(outcome.state_rejected);
        assert!(outcome.sequence_rejected);

        assert_eq!(set.tree(ScoreField::Cn).len(), 1);
        assert_eq!(set.states().node_count(), 0);
        assert_eq!(set.sequences().node_count(), 0);
    }

    #[test]
    fn test_nan_score_is_fatal_for_the_row() {
        let temp = TempDir::new().unwrap();
        let mut set = IndexSet::open(temp.path(), &DBConfig::for_testing(temp.path())).unwrap();
        let result = set.insert_record(0, &record("1", f32::NAN), "RS");
        assert!(matches!(result, Err(StorageError::InvalidKey(_))));
    }
}
