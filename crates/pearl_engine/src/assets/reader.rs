//! Little-endian cursor over an in-memory file

use super::{AssetError, AssetResult};

pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub(crate) const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    pub(crate) fn take(&mut self, len: usize) -> AssetResult<&'a [u8]> {
        let end = self.offset.checked_add(len).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(AssetError::UnexpectedEof { offset: self.offset, needed: len });
        };
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> AssetResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Check the four-byte label that opens every format
    pub(crate) fn expect_label(&mut self, expected: [u8; 4]) -> AssetResult<()> {
        let found = self.array::<4>()?;
        if found == expected {
            Ok(())
        } else {
            Err(AssetError::BadLabel { expected, found })
        }
    }

    pub(crate) fn u32(&mut self) -> AssetResult<u32> {
        self.array().map(u32::from_le_bytes)
    }

    pub(crate) fn i32(&mut self) -> AssetResult<i32> {
        self.array().map(i32::from_le_bytes)
    }

    pub(crate) fn f32(&mut self) -> AssetResult<f32> {
        self.array().map(f32::from_le_bytes)
    }

    pub(crate) fn f64(&mut self) -> AssetResult<f64> {
        self.array().map(f64::from_le_bytes)
    }

    /// Count field, rejected when it could not possibly fit in the remaining bytes
    pub(crate) fn count(&mut self, what: &'static str, min_item_size: usize) -> AssetResult<usize> {
        let value = self.u32()?;
        let count = value as usize;
        if count.saturating_mul(min_item_size) > self.remaining() {
            return Err(AssetError::TooLarge { what, value: u64::from(value) });
        }
        Ok(count)
    }

    /// String stored as a `u32` length followed by that many bytes
    pub(crate) fn len_string(&mut self, max_len: usize) -> AssetResult<String> {
        let offset = self.offset;
        let len = self.u32()? as usize;
        if len > max_len {
            return Err(AssetError::TooLarge { what: "string length", value: len as u64 });
        }
        let raw = self.take(len)?;
        decode_str(raw, offset)
    }

    /// String stored in a fixed-size, NUL-padded field
    pub(crate) fn fixed_string(&mut self, field_len: usize) -> AssetResult<String> {
        let offset = self.offset;
        let raw = self.take(field_len)?;
        decode_str(raw, offset)
    }

    pub(crate) const fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

fn decode_str(raw: &[u8], offset: usize) -> AssetResult<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end])
        .map(str::to_string)
        .map_err(|_| AssetError::InvalidString { offset })
}

/// Little-endian writer used to produce asset files
#[derive(Default)]
pub(crate) struct ByteWriter {
    bytes: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn label(&mut self, label: [u8; 4]) -> &mut Self {
        self.bytes.extend_from_slice(&label);
        self
    }

    pub(crate) fn u32(&mut self, value: u32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn i32(&mut self, value: i32) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn f64(&mut self, value: f64) -> &mut Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_read_reports_offset() {
        let mut reader = ByteReader::new(&[1, 0, 0, 0, 7]);
        assert_eq!(reader.u32().unwrap(), 1);
        match reader.u32() {
            Err(AssetError::UnexpectedEof { offset, needed }) => {
                assert_eq!(offset, 4);
                assert_eq!(needed, 4);
            }
            other => panic!("expected eof, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_string_trims_padding() {
        let mut field = [0u8; 8];
        field[..4].copy_from_slice(b"slug");
        let mut reader = ByteReader::new(&field);
        assert_eq!(reader.fixed_string(8).unwrap(), "slug");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_count_rejects_impossible_sizes() {
        let bytes = u32::MAX.to_le_bytes();
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(reader.count("rooms", 8), Err(AssetError::TooLarge { .. })));
    }
}
