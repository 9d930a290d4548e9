//! Bit-level readers over a byte buffer.
//!
//! Compressed camera streams are read a few bits at a time. The readers here
//! differ only in how bytes are assembled into the bit window:
//!
//! - [`PlainPump`]: memory order, least significant bit first
//! - [`MsbPump`]: most significant bit first, one byte at a time
//! - [`Msb16Pump`]: MSB first over little-endian 16-bit words
//! - [`Msb32Pump`]: MSB first over little-endian 32-bit words
//! - [`JpegPump`]: MSB first with JPEG `FF 00` byte stuffing; a marker ends the data
//!
//! All readers pad with zero bits past the end of the buffer so lookahead
//! (`peek_bits`) is always safe. Consuming padding is what signals
//! truncation: `get_bits`/`skip_bits` fail with [`DecodeError::Truncated`]
//! once the consumed position passes the last real bit.

mod msb;
mod plain;

pub use msb::{JpegPump, Msb16Pump, Msb32Pump, MsbPump};
pub use plain::PlainPump;

use crate::error::DecodeError;

/// Largest bit count a single `peek_bits`/`get_bits` call may request.
pub const MAX_BITS_PER_CALL: u32 = 32;

/// Low `n` bits set.
#[inline]
pub(crate) fn mask(n: u32) -> u64 {
    if n == 0 {
        0
    } else {
        u64::MAX >> (64 - n)
    }
}

pub(crate) fn truncated() -> DecodeError {
    DecodeError::Truncated("bit stream ran past the end of its data".to_string())
}

/// Common interface of all bit readers.
pub trait BitPump {
    /// Look at the next `n` bits (`n <= 32`) without consuming them.
    fn peek_bits(&mut self, n: u32) -> u32;

    /// Consume `n` bits.
    fn skip_bits(&mut self, n: u32) -> Result<(), DecodeError>;

    /// Reposition to an absolute bit index from the start of the buffer.
    fn set_absolute_bit_offset(&mut self, bit: u64) -> Result<(), DecodeError>;

    /// Fail if the reader has consumed bits past the end of its data.
    fn check_position(&self) -> Result<(), DecodeError>;

    /// Number of whole bytes consumed so far.
    fn byte_position(&self) -> usize;

    /// Consume and return `n` bits (`n <= 32`).
    #[inline]
    fn get_bits(&mut self, n: u32) -> Result<u32, DecodeError> {
        let value = self.peek_bits(n);
        self.skip_bits(n)?;
        Ok(value)
    }

    #[inline]
    fn get_bit(&mut self) -> Result<u32, DecodeError> {
        self.get_bits(1)
    }

    /// Skip whole bytes; usable for distances larger than one peek.
    fn skip_bytes(&mut self, n: usize) -> Result<(), DecodeError> {
        let mut left = n as u64 * 8;
        while left > 0 {
            let step = left.min(MAX_BITS_PER_CALL as u64) as u32;
            self.skip_bits(step)?;
            left -= step as u64;
        }
        Ok(())
    }
}
