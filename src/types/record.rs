//! Exam result records

use super::score::ScoreField;
use serde::{Deserialize, Serialize};

/// Index of a record in the record store
pub type RecordId = u32;

/// Number of objective exams (CN, CH, LC, MT) per record.
pub const EXAM_COUNT: usize = 4;

/// Maximum byte lengths of the fixed-width text fields.
pub const SEQUENCE_LEN: usize = 15;
pub const RESPONSES_LEN: usize = 50;

/// One participant's exam result
///
/// Location and answer keys are stored once in their lookup tables and
/// referenced here by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExamRecord {
    /// Participant sequence number (digits only)
    pub sequence: String,
    pub year: i32,
    pub location_id: RecordId,
    /// Answer key ids, in CN, CH, LC, MT order
    pub answer_key_ids: [RecordId; EXAM_COUNT],
    pub score_cn: f32,
    pub score_ch: f32,
    pub score_lc: f32,
    pub score_mt: f32,
    pub score_essay: f32,
    /// Marked answers, in CN, CH, LC, MT order
    pub responses: [String; EXAM_COUNT],
    /// Foreign language option (0 = English, 1 = Spanish)
    pub language: i32,
}

impl ExamRecord {
    pub fn score(&self, field: ScoreField) -> f32 {
        match field {
            ScoreField::Cn => self.score_cn,
            ScoreField::Ch => self.score_ch,
            ScoreField::Lc => self.score_lc,
            ScoreField::Mt => self.score_mt,
            ScoreField::Essay => self.score_essay,
        }
    }

    pub fn language_name(&self) -> &'static str {
        match self.language {
            0 => "English",
            1 => "Spanish",
            _ => "unknown",
        }
    }
}
