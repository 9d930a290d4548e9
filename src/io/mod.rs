//! Byte-level access to file buffers.
//!
//! Everything that reads the input file goes through [`ByteCursor`] or
//! [`checked_slice`], so out-of-range offsets become errors instead of
//! reads of adjacent memory.

mod byte_cursor;

pub use byte_cursor::{
    checked_slice, read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le,
    ByteCursor,
};
