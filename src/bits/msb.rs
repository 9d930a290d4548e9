//! Most-significant-bit-first readers.

use crate::error::DecodeError;

use super::{mask, truncated, BitPump};

// =============================================================================
// Word-granular MSB reader
// =============================================================================

/// MSB-first reader loading `W`-byte little-endian words into the window.
///
/// `W = 1` is plain byte order; `W = 2` and `W = 4` reproduce the 16-bit and
/// 32-bit word layouts some cameras write.
#[derive(Debug, Clone)]
pub struct WordMsbPump<'a, const W: usize> {
    data: &'a [u8],
    pos: usize,
    cache: u64,
    bits: u32,
    padding: u32,
}

/// MSB-first reader over bytes.
pub type MsbPump<'a> = WordMsbPump<'a, 1>;

/// MSB-first reader over little-endian 16-bit words.
pub type Msb16Pump<'a> = WordMsbPump<'a, 2>;

/// MSB-first reader over little-endian 32-bit words.
pub type Msb32Pump<'a> = WordMsbPump<'a, 4>;

impl<'a, const W: usize> WordMsbPump<'a, W> {
    const WORD_BITS: u32 = (W * 8) as u32;

    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            cache: 0,
            bits: 0,
            padding: 0,
        }
    }

    /// Bits consumed from the start of the buffer.
    pub fn bit_position(&self) -> u64 {
        self.pos as u64 * 8 - u64::from(self.bits)
    }

    fn fill(&mut self) {
        while self.bits + Self::WORD_BITS <= 64 {
            let mut word = 0u64;
            let mut missing = 0u32;
            for i in 0..W {
                match self.data.get(self.pos + i) {
                    Some(&b) => word |= (b as u64) << (8 * i),
                    None => missing += 8,
                }
            }
            // A partial last word keeps its real bytes ahead of the padding
            if missing > 0 && missing < Self::WORD_BITS {
                word <<= missing;
            }
            // Little-endian word, consumed from its top bit down
            self.cache = if Self::WORD_BITS == 64 {
                word
            } else {
                (self.cache << Self::WORD_BITS) | word
            };
            self.bits += Self::WORD_BITS;
            self.padding += missing;
            self.pos += W;
        }
    }
}

impl<const W: usize> BitPump for WordMsbPump<'_, W> {
    #[inline]
    fn peek_bits(&mut self, n: u32) -> u32 {
        debug_assert!(n <= super::MAX_BITS_PER_CALL);
        if n == 0 {
            return 0;
        }
        if self.bits < n {
            self.fill();
        }
        ((self.cache >> (self.bits - n)) & mask(n)) as u32
    }

    #[inline]
    fn skip_bits(&mut self, n: u32) -> Result<(), DecodeError> {
        if self.bits < n {
            self.fill();
        }
        self.bits -= n;
        if self.bits < self.padding {
            return Err(truncated());
        }
        Ok(())
    }

    fn set_absolute_bit_offset(&mut self, bit: u64) -> Result<(), DecodeError> {
        let byte = (bit / 8) as usize;
        let aligned = byte / W * W;
        if aligned > self.data.len() {
            return Err(truncated());
        }
        self.pos = aligned;
        self.cache = 0;
        self.bits = 0;
        self.padding = 0;
        let mut left = bit - aligned as u64 * 8;
        while left > 0 {
            let step = left.min(32) as u32;
            self.skip_bits(step)?;
            left -= step as u64;
        }
        Ok(())
    }

    fn check_position(&self) -> Result<(), DecodeError> {
        if self.bits < self.padding {
            Err(truncated())
        } else {
            Ok(())
        }
    }

    fn byte_position(&self) -> usize {
        (self.pos * 8 - self.bits as usize) / 8
    }
}

// =============================================================================
// JPEG byte-stuffed reader
// =============================================================================

/// MSB-first reader over entropy-coded JPEG data.
///
/// `FF 00` decodes to a single `FF` data byte. Any other byte after `FF` is a
/// marker; it and everything after it read as zero padding.
#[derive(Debug, Clone)]
pub struct JpegPump<'a> {
    data: &'a [u8],
    pos: usize,
    cache: u64,
    bits: u32,
    padding: u32,
    hit_marker: bool,
}

impl<'a> JpegPump<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            cache: 0,
            bits: 0,
            padding: 0,
            hit_marker: false,
        }
    }

    fn next_byte(&mut self) -> Option<u8> {
        if self.hit_marker {
            return None;
        }
        let b = *self.data.get(self.pos)?;
        if b != 0xFF {
            self.pos += 1;
            return Some(b);
        }
        if self.data.get(self.pos + 1) == Some(&0x00) {
            self.pos += 2;
            Some(0xFF)
        } else {
            self.hit_marker = true;
            None
        }
    }

    fn fill(&mut self) {
        while self.bits <= 56 {
            let byte = match self.next_byte() {
                Some(b) => b,
                None => {
                    self.padding += 8;
                    0
                }
            };
            self.cache = (self.cache << 8) | byte as u64;
            self.bits += 8;
        }
    }

    /// Whether the reader has run into a marker.
    pub fn hit_marker(&self) -> bool {
        self.hit_marker
    }
}

impl BitPump for JpegPump<'_> {
    #[inline]
    fn peek_bits(&mut self, n: u32) -> u32 {
        debug_assert!(n <= super::MAX_BITS_PER_CALL);
        if n == 0 {
            return 0;
        }
        if self.bits < n {
            self.fill();
        }
        ((self.cache >> (self.bits - n)) & mask(n)) as u32
    }

    #[inline]
    fn skip_bits(&mut self, n: u32) -> Result<(), DecodeError> {
        if self.bits < n {
            self.fill();
        }
        self.bits -= n;
        if self.bits < self.padding {
            return Err(truncated());
        }
        Ok(())
    }

    fn set_absolute_bit_offset(&mut self, bit: u64) -> Result<(), DecodeError> {
        let byte = (bit / 8) as usize;
        if byte > self.data.len() {
            return Err(truncated());
        }
        self.pos = byte;
        self.cache = 0;
        self.bits = 0;
        self.padding = 0;
        self.hit_marker = false;
        self.skip_bits((bit % 8) as u32)
    }

    fn check_position(&self) -> Result<(), DecodeError> {
        if self.bits < self.padding {
            Err(truncated())
        } else {
            Ok(())
        }
    }

    fn byte_position(&self) -> usize {
        // Approximate under stuffing: unconsumed cached bytes are backed out.
        let cached_real = (self.bits.saturating_sub(self.padding) / 8) as usize;
        self.pos.saturating_sub(cached_real)
    }
}
