//! Domain types for exam result records

mod location;
mod record;
mod score;

pub use location::{
    AnswerKey, SchoolLocation, ANSWERS_LEN, CITY_LEN, EXAM_CODE_LEN, SCHOOL_CODE_LEN, STATE_LEN,
};
pub use record::{ExamRecord, RecordId, EXAM_COUNT, RESPONSES_LEN, SEQUENCE_LEN};
pub use score::{ScoreField, SortOrder};
