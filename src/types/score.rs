//! Score fields and sort order

use crate::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the five indexed scores of an exam record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScoreField {
    /// Natural sciences
    Cn,
    /// Human sciences
    Ch,
    /// Languages and codes
    Lc,
    /// Mathematics
    Mt,
    /// Essay
    Essay,
}

impl ScoreField {
    pub const ALL: [ScoreField; 5] = [
        ScoreField::Cn,
        ScoreField::Ch,
        ScoreField::Lc,
        ScoreField::Mt,
        ScoreField::Essay,
    ];

    /// Short name used on the command line and in file names.
    pub fn code(&self) -> &'static str {
        match self {
            ScoreField::Cn => "cn",
            ScoreField::Ch => "ch",
            ScoreField::Lc => "lc",
            ScoreField::Mt => "mt",
            ScoreField::Essay => "red",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ScoreField::Cn => "natural sciences",
            ScoreField::Ch => "human sciences",
            ScoreField::Lc => "languages",
            ScoreField::Mt => "mathematics",
            ScoreField::Essay => "essay",
        }
    }

    /// Position in `ALL`.
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Base name of this field's B+ tree files.
    pub fn tree_name(&self) -> String {
        format!("score_{}", self.code())
    }
}

impl fmt::Display for ScoreField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ScoreField {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ScoreField::ALL
            .into_iter()
            .find(|field| field.code() == lower)
            .ok_or_else(|| StorageError::UnknownField(s.to_string()))
    }
}

/// Direction of a ranked listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl FromStr for SortOrder {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Ascending),
            "desc" | "descending" => Ok(SortOrder::Descending),
            other => Err(StorageError::InvalidArgument(format!("unknown sort order '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field() {
        assert_eq!("cn".parse::<ScoreField>().unwrap(), ScoreField::Cn);
        assert_eq!("RED".parse::<ScoreField>().unwrap(), ScoreField::Essay);
        assert!(matches!("xx".parse::<ScoreField>(), Err(StorageError::UnknownField(_))));
    }

    #[test]
    fn test_index_matches_all() {
        for (i, field) in ScoreField::ALL.iter().enumerate() {
            assert_eq!(field.index(), i);
        }
        assert_eq!(ScoreField::Mt.tree_name(), "score_mt");
    }

    #[test]
    fn test_parse_order() {
        assert_eq!("desc".parse::<SortOrder>().unwrap(), SortOrder::Descending);
        assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::Ascending);
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
