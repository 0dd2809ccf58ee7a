//! CRC32 framing for header blocks
//!
//! Header blocks (tree metadata, trie header, bucket table, record count) are
//! rewritten in place on every mutation, so a torn or stale block must be
//! detectable on open.
//!
//! Frame format: `[data_len: u32][data: [u8]][crc32: u32]`, little-endian.

use crc32fast::Hasher;

pub struct Checksum;

impl Checksum {
    pub fn compute(data: &[u8]) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    pub fn verify(data: &[u8], expected: u32) -> Result<(), ChecksumError> {
        let actual = Self::compute(data);
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                expected,
                actual,
                data_len: data.len(),
            });
        }
        Ok(())
    }

    /// Length of the frame built around `data_len` payload bytes.
    pub fn framed_len(data_len: usize) -> usize {
        4 + data_len + 4
    }

    pub fn encode_with_checksum(data: &[u8]) -> Vec<u8> {
        let checksum = Self::compute(data);
        let mut encoded = Vec::with_capacity(Self::framed_len(data.len()));
        encoded.extend_from_slice(&(data.len() as u32).to_le_bytes());
        encoded.extend_from_slice(data);
        encoded.extend_from_slice(&checksum.to_le_bytes());
        encoded
    }

    /// Decodes a frame at the start of `block`. Trailing padding is ignored.
    pub fn decode_with_checksum(block: &[u8]) -> Result<&[u8], ChecksumError> {
        if block.len() < 8 {
            return Err(ChecksumError::InvalidFormat("block too short".to_string()));
        }

        let data_len = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as usize;
        let frame_len = Self::framed_len(data_len);
        if block.len() < frame_len {
            return Err(ChecksumError::InvalidFormat(format!(
                "frame claims {} bytes, block holds {}",
                frame_len,
                block.len()
            )));
        }

        let data = &block[4..4 + data_len];
        let crc = &block[4 + data_len..frame_len];
        let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
        Self::verify(data, expected)?;

        Ok(data)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x} (data_len={data_len})")]
    Mismatch {
        expected: u32,
        actual: u32,
        data_len: usize,
    },

    #[error("Invalid checksum format: {0}")]
    InvalidFormat(String),
}

impl From<ChecksumError> for crate::StorageError {
    fn from(err: ChecksumError) -> Self {
        crate::StorageError::Corruption(err.to_string())
    }
}
