//! # Binary Cursor
//!
//! Sequential, forward-only reads over a frame payload with an internal
//! cursor. Every read is bounds-checked; running past the end of the
//! payload yields [`ProtocolError::TruncatedFrame`], which the dispatch
//! loop treats as a defect in the handler that raised it rather than a
//! transport failure.
//!
//! Integers are little-endian throughout. String fields occur in two
//! encodings on this protocol, plain ASCII and UTF-8, selected per field
//! by the caller.

use crate::error::{ProtocolError, Result};

/// Text encodings used by string fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Ascii,
    Utf8,
}

/// Forward-only reader over a byte slice.
#[derive(Debug)]
pub struct BinaryCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Current cursor position from the start of the payload.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(ProtocolError::TruncatedFrame {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(i64::from_le_bytes(raw))
    }

    /// Exactly `n` raw bytes.
    pub fn read_fixed_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Raw bytes up to (not including) the `0x00` terminator; the cursor
    /// advances past the terminator.
    pub fn read_null_terminated_bytes(&mut self) -> Result<&'a [u8]> {
        let rest = &self.data[self.pos..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            // No terminator before the payload ran out.
            ProtocolError::TruncatedFrame {
                needed: rest.len() + 1,
                remaining: rest.len(),
            }
        })?;
        let slice = &rest[..end];
        self.pos += end + 1;
        Ok(slice)
    }

    /// Null-terminated string decoded with the given encoding.
    pub fn read_cstring(&mut self, encoding: Encoding) -> Result<String> {
        let bytes = self.read_null_terminated_bytes()?;
        match encoding {
            Encoding::Ascii => {
                if let Some(bad) = bytes.iter().find(|b| !b.is_ascii()) {
                    return Err(ProtocolError::InvalidText {
                        encoding: "ASCII",
                        detail: format!("byte {bad:#04x}"),
                    });
                }
                // ASCII is a UTF-8 subset; checked above.
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
            Encoding::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|e| {
                ProtocolError::InvalidText {
                    encoding: "UTF-8",
                    detail: e.to_string(),
                }
            }),
        }
    }

    /// Four bytes interpreted as a 4-character code.
    ///
    /// Some codes (product tags in particular) are stored byte-reversed
    /// relative to their textual form; `reverse` restores the textual order
    /// before the bytes are treated as ASCII.
    pub fn read_dword_string(&mut self, reverse: bool) -> Result<String> {
        let b = self.take(4)?;
        let mut code = [b[0], b[1], b[2], b[3]];
        if reverse {
            code.reverse();
        }
        if let Some(bad) = code.iter().find(|b| !b.is_ascii()) {
            return Err(ProtocolError::InvalidText {
                encoding: "ASCII",
                detail: format!("byte {bad:#04x} in dword string"),
            });
        }
        Ok(code.iter().map(|&b| b as char).collect())
    }

    /// Advance the cursor by `n` bytes without interpreting them.
    pub fn seek(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// Non-consuming single-byte lookahead.
    pub fn peek(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(ProtocolError::TruncatedFrame {
                needed: 1,
                remaining: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let data = [
            0x2A, // u8
            0x34, 0x12, // u16
            0x78, 0x56, 0x34, 0x12, // u32
            0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // i64
        ];
        let mut cursor = BinaryCursor::new(&data);
        assert_eq!(cursor.read_u8().unwrap(), 0x2A);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_u32().unwrap(), 0x12345678);
        assert_eq!(cursor.read_i64().unwrap(), -1);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn truncated_read_reports_shortfall() {
        let mut cursor = BinaryCursor::new(&[0x01, 0x02]);
        let err = cursor.read_u32().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::TruncatedFrame {
                needed: 4,
                remaining: 2
            }
        ));
        // A failed read consumes nothing.
        assert_eq!(cursor.read_u16().unwrap(), 0x0201);
    }

    #[test]
    fn cstring_stops_at_terminator() {
        let data = b"tester\0rest";
        let mut cursor = BinaryCursor::new(data);
        assert_eq!(cursor.read_cstring(Encoding::Ascii).unwrap(), "tester");
        assert_eq!(cursor.position(), 7);
        assert_eq!(cursor.peek().unwrap(), b'r');
    }

    #[test]
    fn unterminated_cstring_is_truncated() {
        let mut cursor = BinaryCursor::new(b"no-null");
        assert!(matches!(
            cursor.read_cstring(Encoding::Ascii),
            Err(ProtocolError::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn non_ascii_rejected_in_ascii_fields() {
        let mut cursor = BinaryCursor::new(&[0x74, 0xC3, 0xA9, 0x00]);
        assert!(matches!(
            cursor.read_cstring(Encoding::Ascii),
            Err(ProtocolError::InvalidText { .. })
        ));
        let mut cursor = BinaryCursor::new("té\0".as_bytes());
        assert_eq!(cursor.read_cstring(Encoding::Utf8).unwrap(), "té");
    }

    #[test]
    fn dword_string_reversal() {
        // A product tag stored byte-reversed on the wire.
        let mut cursor = BinaryCursor::new(b"3RAW");
        assert_eq!(cursor.read_dword_string(true).unwrap(), "WAR3");

        let mut cursor = BinaryCursor::new(b"IX86");
        assert_eq!(cursor.read_dword_string(false).unwrap(), "IX86");
    }

    #[test]
    fn seek_and_fixed_bytes() {
        let data = [0u8, 1, 2, 3, 4, 5];
        let mut cursor = BinaryCursor::new(&data);
        cursor.seek(2).unwrap();
        assert_eq!(cursor.read_fixed_bytes(3).unwrap(), &[2, 3, 4]);
        assert!(cursor.seek(2).is_err());
    }
}
