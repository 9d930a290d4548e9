use crate::error::IoError;
use crate::format::tiff::ByteOrder;

// =============================================================================
// Endian Helper Functions
// =============================================================================
//
// Camera files mix little-endian and big-endian structures, sometimes within
// a single file (maker notes, JPEG segments). These helpers are used by the
// cursor and by the container parser once a range has been validated.

/// Read a little-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_le(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Read a big-endian u16 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 2 bytes.
#[inline]
pub fn read_u16_be(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Read a little-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_le(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a big-endian u32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_u32_be(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_le(bytes: &[u8]) -> u64 {
    u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Read a big-endian u64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_u64_be(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Borrow `len` bytes at `offset`, failing instead of reading past the end.
#[inline]
pub fn checked_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], IoError> {
    match offset.checked_add(len) {
        Some(end) if end <= data.len() => Ok(&data[offset..end]),
        _ => Err(IoError::OutOfBounds {
            offset: offset as u64,
            requested: len as u64,
            size: data.len() as u64,
        }),
    }
}

// =============================================================================
// ByteCursor
// =============================================================================

/// A bounds-checked read cursor over a borrowed byte range.
///
/// The cursor owns no memory. Every read validates that the requested bytes
/// lie inside the borrowed slice, so a corrupt offset can never reach
/// adjacent memory; it surfaces as `IoError::OutOfBounds` instead.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor at position 0.
    pub fn new(data: &'a [u8], order: ByteOrder) -> Self {
        Self {
            data,
            pos: 0,
            order,
        }
    }

    /// Create a cursor over `data[offset..offset + len]`.
    pub fn sub(data: &'a [u8], offset: usize, len: usize, order: ByteOrder) -> Result<Self, IoError> {
        Ok(Self::new(checked_slice(data, offset, len)?, order))
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    #[inline]
    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    /// The whole borrowed range, independent of position.
    #[inline]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left between the position and the end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Bytes from the current position to the end.
    #[inline]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos.min(self.data.len())..]
    }

    /// Move to an absolute position. Seeking to exactly `len()` is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<(), IoError> {
        if pos > self.data.len() {
            return Err(IoError::OutOfBounds {
                offset: pos as u64,
                requested: 0,
                size: self.data.len() as u64,
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), IoError> {
        let target = self.pos.checked_add(n).ok_or(IoError::OutOfBounds {
            offset: self.pos as u64,
            requested: n as u64,
            size: self.data.len() as u64,
        })?;
        self.seek(target)
    }

    /// Borrow the next `n` bytes and advance.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], IoError> {
        let bytes = checked_slice(self.data, self.pos, n)?;
        self.pos += n;
        Ok(bytes)
    }

    /// Borrow `n` bytes at the position without advancing.
    pub fn peek_bytes(&self, n: usize) -> Result<&'a [u8], IoError> {
        checked_slice(self.data, self.pos, n)
    }

    pub fn get_u8(&mut self) -> Result<u8, IoError> {
        Ok(self.get_bytes(1)?[0])
    }

    pub fn peek_u8(&self) -> Result<u8, IoError> {
        Ok(self.peek_bytes(1)?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16, IoError> {
        let order = self.order;
        Ok(order.read_u16(self.get_bytes(2)?))
    }

    pub fn get_u32(&mut self) -> Result<u32, IoError> {
        let order = self.order;
        Ok(order.read_u32(self.get_bytes(4)?))
    }

    pub fn get_i16(&mut self) -> Result<i16, IoError> {
        Ok(self.get_u16()? as i16)
    }

    pub fn get_i32(&mut self) -> Result<i32, IoError> {
        Ok(self.get_u32()? as i32)
    }

    pub fn get_f32(&mut self) -> Result<f32, IoError> {
        Ok(f32::from_bits(self.get_u32()?))
    }

    pub fn get_f64(&mut self) -> Result<f64, IoError> {
        let order = self.order;
        Ok(f64::from_bits(order.read_u64(self.get_bytes(8)?)))
    }

    /// Read a u16 at an absolute offset without moving the cursor.
    pub fn u16_at(&self, offset: usize) -> Result<u16, IoError> {
        Ok(self.order.read_u16(checked_slice(self.data, offset, 2)?))
    }

    /// Read a u32 at an absolute offset without moving the cursor.
    pub fn u32_at(&self, offset: usize) -> Result<u32, IoError> {
        Ok(self.order.read_u32(checked_slice(self.data, offset, 4)?))
    }
}
