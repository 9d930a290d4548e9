use crate::error::DecodeError;

use super::{mask, truncated, BitPump};

/// Least-significant-bit-first reader in memory order.
#[derive(Debug, Clone)]
pub struct PlainPump<'a> {
    data: &'a [u8],
    pos: usize,
    cache: u64,
    bits: u32,
    padding: u32,
}

impl<'a> PlainPump<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            cache: 0,
            bits: 0,
            padding: 0,
        }
    }

    fn fill(&mut self) {
        while self.bits <= 56 {
            let byte = match self.data.get(self.pos) {
                Some(&b) => b,
                None => {
                    self.padding += 8;
                    0
                }
            };
            self.cache |= (byte as u64) << self.bits;
            self.bits += 8;
            self.pos += 1;
        }
    }
}

impl BitPump for PlainPump<'_> {
    #[inline]
    fn peek_bits(&mut self, n: u32) -> u32 {
        debug_assert!(n <= super::MAX_BITS_PER_CALL);
        if self.bits < n {
            self.fill();
        }
        (self.cache & mask(n)) as u32
    }

    #[inline]
    fn skip_bits(&mut self, n: u32) -> Result<(), DecodeError> {
        if self.bits < n {
            self.fill();
        }
        self.cache = if n >= 64 { 0 } else { self.cache >> n };
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
        (self.pos * 8 - self.bits as usize) / 8
    }
}
