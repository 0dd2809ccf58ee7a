//! Error types for the examdb storage engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Key rejected by an index: non-digit trie key, unregistered bucket key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unknown score field: {0}")]
    UnknownField(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl StorageError {
    /// Malformed input the import driver logs and skips instead of aborting.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, StorageError::InvalidKey(_) | StorageError::InvalidData(_))
    }
}
