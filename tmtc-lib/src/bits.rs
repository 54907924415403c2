//! Bit-exact field extraction.
//!
//! Fields inside packets are packed most significant bit first and need not be byte aligned.
//! [BitCursor] walks a byte slice and hands out fields of 1 to 64 bits.
use crate::CursorError;

/// Sequential reader over a byte buffer at bit granularity.
///
/// # Example
/// ```
/// use tmtc::BitCursor;
///
/// let mut cursor = BitCursor::new(&[0b1011_0001, 0xff]);
/// assert_eq!(cursor.read_uint(3).unwrap(), 0b101);
/// assert_eq!(cursor.read_int(5).unwrap(), -15);
/// assert_eq!(cursor.remaining_bits(), 8);
/// ```
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    buf: &'a [u8],
    pos: u64,
}

impl<'a> BitCursor<'a> {
    pub const MAX_WIDTH: u8 = 64;

    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        BitCursor { buf, pos: 0 }
    }

    /// Read `bits` bits as an unsigned big-endian integer and advance past them.
    ///
    /// # Errors
    /// [CursorError::InvalidWidth] if `bits` is 0 or greater than 64, or
    /// [CursorError::OutOfBounds] if fewer than `bits` bits remain. The cursor does not move
    /// on error.
    pub fn read_uint(&mut self, bits: u8) -> Result<u64, CursorError> {
        if bits == 0 || bits > Self::MAX_WIDTH {
            return Err(CursorError::InvalidWidth(bits));
        }
        let available = self.remaining_bits();
        if u64::from(bits) > available {
            return Err(CursorError::OutOfBounds {
                position: self.pos,
                requested: bits,
                available,
            });
        }

        let mut value: u64 = 0;
        let mut needed = u32::from(bits);
        let mut pos = self.pos;
        while needed > 0 {
            let byte = u64::from(self.buf[(pos / 8) as usize]);
            let left_in_byte = 8 - (pos % 8) as u32;
            let take = left_in_byte.min(needed);
            let chunk = (byte >> (left_in_byte - take)) & ((1u64 << take) - 1);
            value = (value << take) | chunk;
            needed -= take;
            pos += u64::from(take);
        }
        self.pos = pos;

        Ok(value)
    }

    /// Read `bits` bits as a two's complement signed integer.
    ///
    /// # Errors
    /// Same as [BitCursor::read_uint].
    pub fn read_int(&mut self, bits: u8) -> Result<i64, CursorError> {
        let raw = self.read_uint(bits)?;
        let shift = u32::from(Self::MAX_WIDTH - bits);
        #[allow(clippy::cast_possible_wrap)]
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Total bits left to read.
    #[must_use]
    pub fn remaining_bits(&self) -> u64 {
        (self.buf.len() as u64 * 8).saturating_sub(self.pos)
    }

    /// Index of the byte holding the next unread bit.
    #[must_use]
    pub fn byte_position(&self) -> usize {
        (self.pos / 8) as usize
    }

    /// Bits consumed so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes touched so far, counting a partially read byte as consumed.
    #[must_use]
    pub fn consumed_bytes(&self) -> usize {
        self.pos.div_ceil(8) as usize
    }
}
