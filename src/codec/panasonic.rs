//! Panasonic RW2 codec.
//!
//! The stream is read through 0x4000-byte blocks whose two halves are
//! swapped at a split given by the "load flags". Rows are made of
//! 14-pixel blocks of 16 bytes, so a band can seek straight to its first
//! row.

use std::sync::Mutex;

use crate::error::DecodeError;
use crate::image::PlaneMut;

const BLOCK: usize = 0x4000;

/// Pixels per coded block.
pub const PIXELS_PER_BLOCK: usize = 14;
/// Bytes per coded block.
pub const BYTES_PER_BLOCK: usize = 16;

/// Bit reader over swapped blocks.
struct PanaBitPump<'a> {
    input: &'a [u8],
    buf: Box<[u8; BLOCK + 1]>,
    vbits: u32,
    load_flags: usize,
}

impl<'a> PanaBitPump<'a> {
    fn new(input: &'a [u8], load_flags: usize) -> Self {
        Self {
            input,
            buf: Box::new([0; BLOCK + 1]),
            vbits: 0,
            load_flags: load_flags.min(BLOCK),
        }
    }

    fn load(&mut self) {
        let lf = self.load_flags;
        let tail = &mut self.buf[lf..BLOCK];
        let n = tail.len().min(self.input.len());
        tail[..n].copy_from_slice(&self.input[..n]);
        tail[n..].fill(0);
        self.input = &self.input[n..];

        let n = lf.min(self.input.len());
        self.buf[..n].copy_from_slice(&self.input[..n]);
        self.buf[n..lf].fill(0);
        self.input = &self.input[n..];
    }

    fn get_bits(&mut self, n: u32) -> u32 {
        if self.vbits == 0 {
            self.load();
        }
        self.vbits = self.vbits.wrapping_sub(n) & 0x1ffff;
        let byte = ((self.vbits >> 3) ^ 0x3ff0) as usize;
        let word = u32::from(self.buf[byte]) | (u32::from(self.buf[byte + 1]) << 8);
        (word >> (self.vbits & 7)) & ((1 << n) - 1)
    }

    fn skip_bytes(&mut self, mut n: usize) {
        let blocks = n / BLOCK;
        if blocks > 0 {
            let skip = (blocks * BLOCK).min(self.input.len());
            self.input = &self.input[skip..];
            n -= blocks * BLOCK;
        }
        for _ in 0..n {
            self.get_bits(8);
        }
    }
}

/// Decoder state shared by all bands of one image.
#[derive(Debug)]
pub struct PanasonicDecoder<'a> {
    input: &'a [u8],
    load_flags: usize,
    zero_is_bad: bool,
    bad_pixels: Mutex<Vec<(usize, usize)>>,
}

impl<'a> PanasonicDecoder<'a> {
    pub fn new(input: &'a [u8], load_flags: usize, zero_is_bad: bool) -> Self {
        Self {
            input,
            load_flags,
            zero_is_bad,
            bad_pixels: Mutex::new(Vec::new()),
        }
    }

    /// Decode the rows of `plane`.
    pub fn decode_band(&self, plane: &mut PlaneMut<'_>) -> Result<(), DecodeError> {
        let width = plane.width();
        if width % PIXELS_PER_BLOCK != 0 {
            return Err(DecodeError::unsupported(format!(
                "RW2 width {width} is not a multiple of {PIXELS_PER_BLOCK}"
            )));
        }
        let row_bytes = width / PIXELS_PER_BLOCK * BYTES_PER_BLOCK;
        let first = plane.y_offset();
        let mut pump = PanaBitPump::new(self.input, self.load_flags);
        pump.skip_bytes(first * row_bytes);
        let mut zeros = Vec::new();

        for y in 0..plane.height() {
            if (first + y + 1) * row_bytes > self.input.len() {
                return Err(DecodeError::Truncated(format!(
                    "RW2 data ends before row {}",
                    first + y
                )));
            }
            let row = plane.row_mut(y);
            let mut sh: i32 = 0;
            for (bx, block) in row.chunks_exact_mut(PIXELS_PER_BLOCK).enumerate() {
                let mut pred = [0i32; 2];
                let mut nonz = [0i32; 2];
                let mut u = 0;
                for (i, px) in block.iter_mut().enumerate() {
                    if u == 2 {
                        sh = 4 >> (3 - pump.get_bits(2));
                        u = -1;
                    }
                    let p = i & 1;
                    if nonz[p] != 0 {
                        let j = pump.get_bits(8) as i32;
                        if j != 0 {
                            pred[p] -= 0x80 << sh;
                            if pred[p] < 0 || sh == 4 {
                                pred[p] &= (1 << sh) - 1;
                            }
                            pred[p] += j << sh;
                        }
                    } else {
                        nonz[p] = pump.get_bits(8) as i32;
                        if nonz[p] != 0 || i > 11 {
                            pred[p] = (nonz[p] << 4) | pump.get_bits(4) as i32;
                        }
                    }
                    *px = pred[p] as u16;
                    if self.zero_is_bad && pred[p] == 0 {
                        zeros.push((bx * PIXELS_PER_BLOCK + i, first + y));
                    }
                    u += 1;
                }
            }
        }

        if !zeros.is_empty() {
            if let Ok(mut bad) = self.bad_pixels.lock() {
                bad.extend(zeros);
            }
        }
        Ok(())
    }

    /// Positions of zero samples found so far, as `(x, y)`.
    pub fn take_bad_pixels(&self) -> Vec<(usize, usize)> {
        self.bad_pixels
            .lock()
            .map(|mut bad| std::mem::take(&mut *bad))
            .unwrap_or_default()
    }
}
