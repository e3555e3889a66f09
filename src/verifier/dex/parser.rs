/*!
 * Byte Cursor
 * Bounds-checked little-endian reads over a DEX image
 */

use crate::core::errors::{SandboxError, SandboxResult};

/// Cursor over a borrowed byte buffer
///
/// Every read is bounds checked; running off the end is reported as
/// `CorruptFormat` with the offending offset.
pub struct DexReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> DexReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    /// Cursor positioned at `offset`
    pub fn at(data: &'a [u8], offset: usize) -> SandboxResult<Self> {
        let mut reader = Self::new(data);
        reader.seek(offset)?;
        Ok(reader)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Move to an absolute offset; the end of the buffer is a valid position
    pub fn seek(&mut self, pos: usize) -> SandboxResult<()> {
        if pos > self.data.len() {
            return Err(out_of_bounds(pos, self.data.len()));
        }
        self.position = pos;
        Ok(())
    }

    pub fn advance_by(&mut self, step: usize) -> SandboxResult<()> {
        let target = self
            .position
            .checked_add(step)
            .ok_or_else(|| out_of_bounds(usize::MAX, self.data.len()))?;
        self.seek(target)
    }

    pub fn read_bytes(&mut self, count: usize) -> SandboxResult<&'a [u8]> {
        let end = self
            .position
            .checked_add(count)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| out_of_bounds(self.position.saturating_add(count), self.data.len()))?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> SandboxResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> SandboxResult<u16> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> SandboxResult<u32> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Unsigned LEB128, at most five bytes
    pub fn read_uleb128(&mut self) -> SandboxResult<u32> {
        let start = self.position;
        let mut result: u32 = 0;
        for index in 0..5 {
            let byte = self.read_u8()?;
            let chunk = u32::from(byte & 0x7f);
            if index == 4 && chunk > 0x0f {
                return Err(SandboxError::CorruptFormat(format!(
                    "uleb128 at offset {:#x} overflows 32 bits",
                    start
                )));
            }
            result |= chunk << (7 * index);
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(SandboxError::CorruptFormat(format!(
            "uleb128 at offset {:#x} is longer than five bytes",
            start
        )))
    }

    /// Bytes up to (not including) the next NUL; the cursor moves past the NUL
    pub fn read_until_nul(&mut self) -> SandboxResult<&'a [u8]> {
        let rest = &self.data[self.position..];
        let len = rest.iter().position(|b| *b == 0).ok_or_else(|| {
            SandboxError::CorruptFormat(format!(
                "unterminated string at offset {:#x}",
                self.position
            ))
        })?;
        let bytes = &rest[..len];
        self.position += len + 1;
        Ok(bytes)
    }
}

fn out_of_bounds(offset: usize, len: usize) -> SandboxError {
    SandboxError::CorruptFormat(format!(
        "read past end of image (offset {:#x}, size {:#x})",
        offset, len
    ))
}
