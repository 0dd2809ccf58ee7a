//! Lookup table entries shared by many records

use serde::{Deserialize, Serialize};

pub const SCHOOL_CODE_LEN: usize = 15;
pub const CITY_LEN: usize = 40;
pub const STATE_LEN: usize = 20;
pub const EXAM_CODE_LEN: usize = 15;
pub const ANSWERS_LEN: usize = 60;

/// School location, unique by school code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchoolLocation {
    pub school_code: String,
    pub city: String,
    pub state: String,
}

/// Answer key of one exam booklet, unique by exam code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerKey {
    pub exam_code: String,
    pub answers: String,
}
