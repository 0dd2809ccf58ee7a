//! Fixed-width little-endian field codec
//!
//! Every on-disk node is a sequence of fixed-width fields written in a fixed
//! order, so a slot's size depends only on its layout and never on content.
//!
//! ```text
//! u32 / i32 / f32 : 4 bytes LE
//! u64 / position  : 8 bytes LE (null position = u64::MAX)
//! bool            : 1 byte (0 / 1)
//! str(width)      : at most `width` bytes, UTF-8, NUL padded
//! ```

use crate::{Result, StorageError};

/// Slot index of a node inside its backing file.
pub type Position = u64;

/// On-disk encoding of an absent position.
pub const NULL_POSITION: u64 = u64::MAX;

pub const U32_LEN: usize = 4;
pub const U64_LEN: usize = 8;
pub const F32_LEN: usize = 4;
pub const POS_LEN: usize = 8;
pub const BOOL_LEN: usize = 1;

/// Sequential writer over a slot buffer
pub struct FieldWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> FieldWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.offset..self.offset + bytes.len()].copy_from_slice(bytes);
        self.offset += bytes.len();
    }

    pub fn put_u32(&mut self, v: u32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_i32(&mut self, v: i32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_f32(&mut self, v: f32) {
        self.put(&v.to_le_bytes());
    }

    pub fn put_bool(&mut self, v: bool) {
        self.put(&[v as u8]);
    }

    pub fn put_pos(&mut self, pos: Option<Position>) {
        self.put_u64(pos.unwrap_or(NULL_POSITION));
    }

    /// Writes `s` into a `width`-byte field, NUL padded. A string longer
    /// than the field, or holding a NUL, is `InvalidData`; nothing is cut.
    pub fn put_str(&mut self, s: &str, width: usize) -> Result<()> {
        if s.contains('\0') {
            return Err(StorageError::InvalidData(format!("NUL byte in string field '{}'", s.escape_debug())));
        }
        if s.len() > width {
            return Err(StorageError::InvalidData(format!(
                "'{}' is {} bytes, field holds {}",
                s,
                s.len(),
                width
            )));
        }
        let field = &mut self.buf[self.offset..self.offset + width];
        field.fill(0);
        field[..s.len()].copy_from_slice(s.as_bytes());
        self.offset += width;
        Ok(())
    }

    /// Zero-fills `len` bytes (unused array slots).
    pub fn skip(&mut self, len: usize) {
        self.buf[self.offset..self.offset + len].fill(0);
        self.offset += len;
    }
}

/// Sequential reader over a slot buffer
pub struct FieldReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.offset + N;
        if end > self.buf.len() {
            return Err(StorageError::Corruption(format!(
                "field at offset {} overruns slot of {} bytes",
                self.offset,
                self.buf.len()
            )));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.offset..end]);
        self.offset = end;
        Ok(out)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take::<4>()?))
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take::<4>()?))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take::<8>()?))
    }

    pub fn get_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take::<4>()?))
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        match self.take::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StorageError::Corruption(format!("invalid bool byte {}", other))),
        }
    }

    pub fn get_pos(&mut self) -> Result<Option<Position>> {
        let raw = self.get_u64()?;
        Ok((raw != NULL_POSITION).then_some(raw))
    }

    pub fn get_str(&mut self, width: usize) -> Result<String> {
        let end = self.offset + width;
        if end > self.buf.len() {
            return Err(StorageError::Corruption(format!(
                "string field of {} bytes overruns slot",
                width
            )));
        }
        let field = &self.buf[self.offset..end];
        self.offset = end;
        let used = field.iter().position(|&b| b == 0).unwrap_or(width);
        String::from_utf8(field[..used].to_vec())
            .map_err(|e| StorageError::Corruption(format!("invalid UTF-8 in string field: {}", e)))
    }

    pub fn skip(&mut self, len: usize) {
        self.offset += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_position_encoding() {
        let mut buf = [0u8; 16];
        let mut w = FieldWriter::new(&mut buf);
        w.put_pos(None);
        w.put_pos(Some(7));
        assert_eq!(&buf[..8], &u64::MAX.to_le_bytes());

        let mut r = FieldReader::new(&buf);
        assert_eq!(r.get_pos().unwrap(), None);
        assert_eq!(r.get_pos().unwrap(), Some(7));
    }

    #[test]
    fn test_string_fills_field_exactly() {
        let mut buf = [0xffu8; 6];
        let mut w = FieldWriter::new(&mut buf);
        // 'ã' and 'õ' are two bytes each
        w.put_str("aãõ", 5).unwrap();
        assert_eq!(w.offset(), 5);

        let mut r = FieldReader::new(&buf);
        assert_eq!(r.get_str(5).unwrap(), "aãõ");
    }

    #[test]
    fn test_overlong_string_rejected() {
        let mut buf = [0xffu8; 4];
        let mut w = FieldWriter::new(&mut buf);
        assert!(matches!(w.put_str("aãõ", 4), Err(StorageError::InvalidData(_))));
        assert_eq!(w.offset(), 0);
        assert_eq!(buf, [0xff; 4]);
        let mut w = FieldWriter::new(&mut buf);
        assert!(w.put_str("a\0b", 4).is_err());
    }

    #[test]
    fn test_invalid_bool_is_corruption() {
        let buf = [2u8];
        let mut r = FieldReader::new(&buf);
        assert!(matches!(r.get_bool(), Err(StorageError::Corruption(_))));
    }

    #[test]
    fn test_read_past_end_is_corruption() {
        let buf = [0u8; 3];
        let mut r = FieldReader::new(&buf);
        assert!(r.get_u32().is_err());
    }
}
