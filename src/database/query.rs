//! Read paths: lookups by sequence and state, ranked listings

use super::core::ExamDB;
use crate::index::{LeafEntry, LeafScan};
use crate::storage::RecordIter;
use crate::types::{AnswerKey, ExamRecord, RecordId, SchoolLocation, ScoreField, SortOrder};
use crate::{Result, StorageError};

impl ExamDB {
    pub fn record(&mut self, id: RecordId) -> Result<Option<ExamRecord>> {
        self.records.read(id)
    }

    fn indexed_record(&mut self, id: RecordId) -> Result<ExamRecord> {
        self.records.read(id)?.ok_or_else(|| {
            StorageError::Corruption(format!("index points at record {} beyond the record store", id))
        })
    }

    pub fn record_count(&self) -> u64 {
        self.records.len()
    }

    /// All records in id order.
    pub fn records(&mut self) -> RecordIter<'_> {
        self.records.iter()
    }

    pub fn find_by_sequence(&mut self, sequence: &str) -> Result<Option<(RecordId, ExamRecord)>> {
        match self.indexes.sequences().lookup(sequence)? {
            Some(id) => Ok(Some((id, self.indexed_record(id)?))),
            None => Ok(None),
        }
    }

    /// Records of one state, most recently imported first.
    pub fn list_by_state(&mut self, state: &str) -> Result<Vec<(RecordId, ExamRecord)>> {
        let ids = self.indexes.states().iterate(state)?.collect::<Result<Vec<_>>>()?;
        ids.into_iter()
            .map(|id| Ok((id, self.indexed_record(id)?)))
            .collect()
    }

    /// Lazy walk over one field's leaf chain in `order`.
    pub fn ranked_scan(&mut self, field: ScoreField, order: SortOrder) -> LeafScan<'_> {
        let tree = self.indexes.tree(field);
        match order {
            SortOrder::Ascending => tree.scan_forward(),
            SortOrder::Descending => tree.scan_backward(),
        }
    }

    /// Every `(score, record_id)` of one field, sorted by score.
    pub fn ranked(&mut self, field: ScoreField, order: SortOrder) -> Result<Vec<LeafEntry>> {
        self.ranked_scan(field, order).collect()
    }

    /// At most `limit` ranked entries starting at rank `offset`. Only the
    /// leaves up to the end of the page are read.
    pub fn ranked_page(
        &mut self,
        field: ScoreField,
        order: SortOrder,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LeafEntry>> {
        let mut page = Vec::with_capacity(limit);
        if limit == 0 {
            return Ok(page);
        }
        for (rank, entry) in self.ranked_scan(field, order).enumerate() {
            let entry = entry?;
            if rank < offset {
                continue;
            }
            page.push(entry);
            if page.len() == limit {
                break;
            }
        }
        Ok(page)
    }

    /// Entries in one field's tree.
    pub fn score_count(&mut self, field: ScoreField) -> u64 {
        self.indexes.tree(field).len()
    }

    /// Entries of one field with `low <= score <= high`, ascending.
    pub fn score_range(&mut self, field: ScoreField, low: f32, high: f32) -> Result<Vec<LeafEntry>> {
        self.indexes.tree(field).range(low, high)
    }

    pub fn location(&mut self, id: RecordId) -> Result<Option<SchoolLocation>> {
        self.locations.read(id)
    }

    pub fn answer_key(&mut self, id: RecordId) -> Result<Option<AnswerKey>> {
        self.answer_keys.read(id)
    }
}
