//! Directory entries and typed value access.
//!
//! An entry's payload is resolved once, while its directory is parsed:
//! inline values are sliced out of the 4-byte value slot and larger values
//! are sliced from the referenced offset. After that every read is a
//! bounds-checked decode of the payload bytes, so an accessor can never
//! read outside `count * type_size` bytes.

use bytes::Bytes;

use crate::error::TiffError;

use super::parser::ByteOrder;
use super::tags::{tag_name, FieldType};

// =============================================================================
// Entry
// =============================================================================

/// A single directory entry with its resolved payload.
#[derive(Debug, Clone)]
pub struct Entry {
    tag: u16,
    field_type: FieldType,
    count: u32,
    data: Bytes,
    byte_order: ByteOrder,
    data_offset: usize,
}

impl Entry {
    /// Build an entry from an already-validated payload.
    ///
    /// `data` must be exactly `count * field_type.size_in_bytes()` bytes.
    pub(crate) fn new(
        tag: u16,
        field_type: FieldType,
        count: u32,
        data: Bytes,
        byte_order: ByteOrder,
        data_offset: usize,
    ) -> Self {
        debug_assert_eq!(data.len(), count as usize * field_type.size_in_bytes());
        Self {
            tag,
            field_type,
            count,
            data,
            byte_order,
            data_offset,
        }
    }

    #[inline]
    pub fn tag(&self) -> u16 {
        self.tag
    }

    #[inline]
    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    /// Number of values (not bytes).
    #[inline]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The raw payload bytes.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The payload as a shared buffer.
    #[inline]
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Absolute offset of the payload in the file it was parsed from.
    #[inline]
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    #[inline]
    pub fn is_int(&self) -> bool {
        self.field_type.is_int()
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        self.field_type.is_float()
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        self.field_type == FieldType::Ascii
    }

    fn invalid(&self, message: impl Into<String>) -> TiffError {
        TiffError::InvalidTagValue {
            tag: tag_name(self.tag),
            message: message.into(),
        }
    }

    /// Bytes of the `index`-th element.
    fn element(&self, index: usize) -> Result<&[u8], TiffError> {
        if index >= self.count as usize {
            return Err(self.invalid(format!(
                "index {} out of range for count {}",
                index, self.count
            )));
        }
        let size = self.field_type.size_in_bytes();
        let start = index * size;
        self.data
            .get(start..start + size)
            .ok_or_else(|| self.invalid("payload shorter than declared count"))
    }

    // -------------------------------------------------------------------------
    // Scalar Access
    // -------------------------------------------------------------------------

    /// Read the `index`-th value as an unsigned integer.
    ///
    /// Accepts every integer type; signed values are reinterpreted.
    pub fn get_u32(&self, index: usize) -> Result<u32, TiffError> {
        let bytes = self.element(index)?;
        let order = self.byte_order;
        match self.field_type {
            FieldType::Byte | FieldType::Undefined | FieldType::Ascii => Ok(bytes[0] as u32),
            FieldType::SByte => Ok(bytes[0] as i8 as i32 as u32),
            FieldType::Short => Ok(order.read_u16(bytes) as u32),
            FieldType::SShort => Ok(order.read_u16(bytes) as i16 as i32 as u32),
            FieldType::Long | FieldType::SLong | FieldType::Ifd => Ok(order.read_u32(bytes)),
            other => Err(self.invalid(format!("expected integer, got {}", other.name()))),
        }
    }

    /// Read the `index`-th value truncated to 16 bits.
    pub fn get_u16(&self, index: usize) -> Result<u16, TiffError> {
        Ok(self.get_u32(index)? as u16)
    }

    /// Read the `index`-th value as a signed integer.
    pub fn get_i32(&self, index: usize) -> Result<i32, TiffError> {
        let bytes = self.element(index)?;
        let order = self.byte_order;
        match self.field_type {
            FieldType::Byte | FieldType::Undefined | FieldType::Ascii => Ok(bytes[0] as i32),
            FieldType::SByte => Ok(bytes[0] as i8 as i32),
            FieldType::Short => Ok(order.read_u16(bytes) as i32),
            FieldType::SShort => Ok(order.read_u16(bytes) as i16 as i32),
            FieldType::Long | FieldType::Ifd => Ok(order.read_u32(bytes) as i32),
            FieldType::SLong => Ok(order.read_u32(bytes) as i32),
            other => Err(self.invalid(format!("expected integer, got {}", other.name()))),
        }
    }

    /// Read the `index`-th value as numerator and denominator.
    pub fn get_rational(&self, index: usize) -> Result<(i64, i64), TiffError> {
        let bytes = self.element(index)?;
        let order = self.byte_order;
        let num = order.read_u32(&bytes[0..4]);
        let den = order.read_u32(&bytes[4..8]);
        match self.field_type {
            FieldType::Rational => Ok((num as i64, den as i64)),
            FieldType::SRational => Ok((num as i32 as i64, den as i32 as i64)),
            other => Err(self.invalid(format!("expected rational, got {}", other.name()))),
        }
    }

    /// Read the `index`-th value as a float.
    ///
    /// Rationals with a zero denominator read as 0.
    pub fn get_f32(&self, index: usize) -> Result<f32, TiffError> {
        let order = self.byte_order;
        match self.field_type {
            FieldType::Float => Ok(f32::from_bits(order.read_u32(self.element(index)?))),
            FieldType::Double => Ok(f64::from_bits(order.read_u64(self.element(index)?)) as f32),
            FieldType::Rational | FieldType::SRational => {
                let (num, den) = self.get_rational(index)?;
                Ok(if den == 0 { 0.0 } else { num as f32 / den as f32 })
            }
            FieldType::SByte | FieldType::SShort | FieldType::SLong => {
                Ok(self.get_i32(index)? as f32)
            }
            ft if ft.is_int() => Ok(self.get_u32(index)? as f32),
            other => Err(self.invalid(format!("expected number, got {}", other.name()))),
        }
    }

    // -------------------------------------------------------------------------
    // Array Access
    // -------------------------------------------------------------------------

    /// All values as unsigned integers.
    pub fn get_u32_array(&self) -> Result<Vec<u32>, TiffError> {
        (0..self.count as usize).map(|i| self.get_u32(i)).collect()
    }

    /// All values truncated to 16 bits.
    pub fn get_u16_array(&self) -> Result<Vec<u16>, TiffError> {
        (0..self.count as usize).map(|i| self.get_u16(i)).collect()
    }

    /// All values as floats.
    pub fn get_f32_array(&self) -> Result<Vec<f32>, TiffError> {
        (0..self.count as usize).map(|i| self.get_f32(i)).collect()
    }

    /// The payload as a string, cut at the first NUL.
    ///
    /// Vendors put non-ASCII bytes into UNDEFINED "strings"; those are
    /// decoded lossily.
    pub fn get_string(&self) -> String {
        let end = self
            .data
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.data.len());
        String::from_utf8_lossy(&self.data[..end]).into_owned()
    }

    /// Short human-readable preview of the first few values.
    pub fn preview(&self, max_values: usize) -> String {
        if self.is_string() {
            let mut s = self.get_string();
            if s.len() > 40 {
                s.truncate(40);
                s.push_str("...");
            }
            return format!("\"{}\"", s);
        }
        let n = (self.count as usize).min(max_values);
        let mut parts: Vec<String> = (0..n)
            .map(|i| match self.field_type {
                FieldType::Rational | FieldType::SRational => self
                    .get_rational(i)
                    .map(|(a, b)| format!("{}/{}", a, b))
                    .unwrap_or_default(),
                FieldType::Float | FieldType::Double => {
                    self.get_f32(i).map(|v| v.to_string()).unwrap_or_default()
                }
                FieldType::SByte | FieldType::SShort | FieldType::SLong => {
                    self.get_i32(i).map(|v| v.to_string()).unwrap_or_default()
                }
                _ => self.get_u32(i).map(|v| v.to_string()).unwrap_or_default(),
            })
            .collect();
        if (self.count as usize) > n {
            parts.push("...".to_string());
        }
        parts.join(" ")
    }
}

// =============================================================================
// Tests
// =============================================================================
