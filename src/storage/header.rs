//! Checksummed header blocks
//!
//! Every file that needs persistent bookkeeping (B+ tree metadata, trie root,
//! bucket table, record counts) starts with one fixed-size block:
//!
//! ```text
//! [data_len: u32][bincode(FileHeader<B>)][crc32: u32][zero padding ... 4096]
//! ```
//!
//! `FileHeader` carries a per-file-kind magic number and the format version,
//! so opening the wrong file or an incompatible version fails loudly.

use super::checksum::Checksum;
use crate::{Result, StorageError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Size of the header block at the start of each file.
pub const HEADER_BLOCK_SIZE: usize = 4096;

/// On-disk format version shared by every file kind.
pub const FORMAT_VERSION: u32 = 1;

/// Magic numbers, one per file kind.
pub const BTREE_META_MAGIC: u32 = 0x4250_4D54; // "BPMT"
pub const TRIE_MAGIC: u32 = 0x5452_4945; // "TRIE"
pub const BUCKET_MAGIC: u32 = 0x4255_434B; // "BUCK"
pub const RECORD_MAGIC: u32 = 0x5245_4344; // "RECD"
pub const LOOKUP_MAGIC: u32 = 0x4C4B_5550; // "LKUP"

#[derive(Serialize, Deserialize, Debug, Clone)]
struct FileHeader<B> {
    magic: u32,
    version: u32,
    body: B,
}

/// Serialize `body` into a full header block.
pub fn encode_block<B: Serialize>(magic: u32, body: &B) -> Result<Vec<u8>> {
    let header = FileHeader {
        magic,
        version: FORMAT_VERSION,
        body,
    };
    let data = bincode::serialize(&header)?;

    if Checksum::framed_len(data.len()) > HEADER_BLOCK_SIZE {
        return Err(StorageError::InvalidArgument(format!(
            "header of {} bytes does not fit a {} byte block",
            data.len(),
            HEADER_BLOCK_SIZE
        )));
    }

    let mut block = Checksum::encode_with_checksum(&data);
    block.resize(HEADER_BLOCK_SIZE, 0);
    Ok(block)
}

/// Decode a header block, checking checksum, magic and version.
pub fn decode_block<B: DeserializeOwned>(magic: u32, block: &[u8]) -> Result<B> {
    let data = Checksum::decode_with_checksum(block)?;
    if data.is_empty() {
        return Err(StorageError::Corruption("empty header block".into()));
    }

    let header: FileHeader<B> = bincode::deserialize(data)
        .map_err(|e| StorageError::Corruption(format!("failed to deserialize header: {}", e)))?;

    if header.magic != magic {
        return Err(StorageError::Corruption(format!(
            "invalid magic number: expected 0x{:08X}, got 0x{:08X}",
            magic, header.magic
        )));
    }
    if header.version != FORMAT_VERSION {
        return Err(StorageError::Corruption(format!(
            "unsupported format version: {}",
            header.version
        )));
    }

    Ok(header.body)
}

/// Write a header block at offset 0. Does not flush.
pub fn write_block<B: Serialize>(file: &mut File, magic: u32, body: &B) -> Result<()> {
    let block = encode_block(magic, body)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&block)?;
    Ok(())
}

/// Read the header block at offset 0.
pub fn read_block<B: DeserializeOwned>(file: &mut File, magic: u32) -> Result<B> {
    let mut block = vec![0u8; HEADER_BLOCK_SIZE];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut block).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StorageError::Corruption("truncated header block".into())
        } else {
            StorageError::Io(e)
        }
    })?;
    decode_block(magic, &block)
}
