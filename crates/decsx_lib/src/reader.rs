use byteorder::{ByteOrder, LittleEndian};

use crate::DecsxError;

/// Little-endian cursor over a borrowed byte range.
///
/// Every Section decoder and every decompile task gets its own `Reader`, so the
/// underlying bytes are shared read-only and only the position is private.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Cursor over `buf` positioned at `offset`.
    pub fn at(buf: &'a [u8], offset: usize) -> Result<Self, DecsxError> {
        if offset > buf.len() {
            return Err(DecsxError::OffsetOutOfRange { offset, len: buf.len() });
        }
        Ok(Self { buf, pos: offset })
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn data(&self) -> &'a [u8] {
        self.buf
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    fn need(&self, n: usize) -> Result<(), DecsxError> {
        if self.remaining() < n {
            return Err(DecsxError::Eof {
                pos: self.pos,
                need: n,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8, DecsxError> {
        self.need(1)?;
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn get_u16(&mut self) -> Result<u16, DecsxError> {
        self.need(2)?;
        let v = LittleEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn get_u32(&mut self) -> Result<u32, DecsxError> {
        self.need(4)?;
        let v = LittleEndian::read_u32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(v)
    }

    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], DecsxError> {
        self.need(n)?;
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N], DecsxError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.get_bytes(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecsxError> {
        self.need(n)?;
        self.pos += n;
        Ok(())
    }

    /// `count` followed by `count` u32 values.
    pub fn get_u32_list(&mut self) -> Result<Vec<u32>, DecsxError> {
        let count = self.get_u32()?;
        self.get_u32_array(count)
    }

    pub fn get_u32_array(&mut self, count: u32) -> Result<Vec<u32>, DecsxError> {
        let len = checked_len(count, 4, self)?;
        let bytes = self.get_bytes(len)?;
        Ok(bytes.chunks_exact(4).map(LittleEndian::read_u32).collect())
    }

    /// Length-prefixed UTF-16LE string: u32 code unit count, then the units.
    /// Unpaired surrogates decode to U+FFFD.
    pub fn get_utf16_string(&mut self) -> Result<String, DecsxError> {
        let units = self.get_u32()?;
        let len = checked_len(units, 2, self)?;
        let bytes = self.get_bytes(len)?;
        let units = bytes.chunks_exact(2).map(LittleEndian::read_u16);
        Ok(char::decode_utf16(units)
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect())
    }
}

// Element counts come straight from the file; reject ones that cannot fit before
// allocating anything for them.
fn checked_len(count: u32, width: usize, r: &Reader<'_>) -> Result<usize, DecsxError> {
    match (count as usize).checked_mul(width) {
        Some(len) if len <= r.remaining() => Ok(len),
        _ => Err(DecsxError::InvalidLength {
            pos: r.pos(),
            count,
            remaining: r.remaining(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(s: &str) -> Vec<u8> {
        let units: Vec<u16> = s.encode_utf16().collect();
        let mut out = (units.len() as u32).to_le_bytes().to_vec();
        for u in units {
            out.extend_from_slice(&u.to_le_bytes());
        }
        out
    }

    #[test]
    fn reads_little_endian_integers() {
        let mut r = Reader::new(&[0x34, 0x12, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(r.get_u16().unwrap(), 0x1234);
        assert_eq!(r.get_u32().unwrap(), 0x1234_5678);
        assert!(r.is_at_end());
    }

    #[test]
    fn eof_reports_position_and_shortfall() {
        let mut r = Reader::new(&[1, 2, 3]);
        r.get_u8().unwrap();
        match r.get_u32() {
            Err(DecsxError::Eof { pos, need, remaining }) => {
                assert_eq!((pos, need, remaining), (1, 4, 2));
            }
            other => panic!("expected Eof, got {other:?}"),
        }
        // a failed read does not move the cursor
        assert_eq!(r.pos(), 1);
    }

    #[test]
    fn decodes_utf16_strings_including_non_ascii() {
        let bytes = utf16("メイン");
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_utf16_string().unwrap(), "メイン");
        assert!(r.is_at_end());
    }

    #[test]
    fn unpaired_surrogate_becomes_replacement_char() {
        let bytes = [1, 0, 0, 0, 0x00, 0xD8];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_utf16_string().unwrap(), "\u{FFFD}");
    }

    #[test]
    fn oversized_string_length_is_rejected() {
        let mut r = Reader::new(&[0xff, 0xff, 0xff, 0xff, b'a', 0]);
        assert!(matches!(r.get_utf16_string(), Err(DecsxError::InvalidLength { count: 0xffff_ffff, .. })));
    }

    #[test]
    fn u32_list_reads_count_then_values() {
        let bytes = [2, 0, 0, 0, 0x10, 0, 0, 0, 0x20, 0, 0, 0];
        let mut r = Reader::new(&bytes);
        assert_eq!(r.get_u32_list().unwrap(), vec![0x10, 0x20]);
    }

    #[test]
    fn at_rejects_offsets_past_the_end() {
        let data = [0u8; 4];
        assert!(Reader::at(&data, 4).is_ok());
        assert!(matches!(
            Reader::at(&data, 5),
            Err(DecsxError::OffsetOutOfRange { offset: 5, len: 4 })
        ));
    }
}
