//! 16-bit lookup tables used for linearization and vendor curves.

use crate::error::DecodeError;

const TABLE_SIZE: usize = 65536;

/// A 65536-entry value map, optionally dithered.
///
/// Dithered tables store, for each input, a base value and the distance
/// between its neighbours; lookups add a pseudo-random fraction of that
/// distance so that expanded curves do not posterize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    base: Vec<u16>,
    delta: Vec<u16>,
    dither: bool,
}

impl LookupTable {
    /// Build from the first `curve.len()` entries of a curve; inputs past
    /// the end map to the last entry.
    pub fn new(curve: &[u16], dither: bool) -> Result<Self, DecodeError> {
        let filled = curve.len().min(TABLE_SIZE);
        if filled == 0 {
            return Err(DecodeError::corrupt("empty lookup table"));
        }
        let last = curve[filled - 1];
        let mut base = vec![last; TABLE_SIZE];
        let mut delta = vec![0u16; TABLE_SIZE];

        if !dither {
            base[..filled].copy_from_slice(&curve[..filled]);
        } else {
            for i in 0..filled {
                let center = i32::from(curve[i]);
                let lower = if i > 0 { i32::from(curve[i - 1]) } else { center };
                let upper = if i + 1 < filled {
                    i32::from(curve[i + 1])
                } else {
                    center
                };
                let spread = upper - lower;
                base[i] = (center - (spread + 2) / 4).clamp(0, 65535) as u16;
                delta[i] = spread.clamp(0, 65535) as u16;
            }
        }

        Ok(Self {
            base,
            delta,
            dither,
        })
    }

    #[inline]
    pub fn is_dithered(&self) -> bool {
        self.dither
    }

    /// Plain lookup without dithering.
    #[inline]
    pub fn lookup(&self, value: u16) -> u16 {
        self.base[value as usize]
    }

    /// Map one row in place. `seed` identifies the row so results are
    /// reproducible regardless of which thread handles it.
    pub fn apply_row(&self, row: &mut [u16], seed: u32) {
        if !self.dither {
            for px in row.iter_mut() {
                *px = self.base[*px as usize];
            }
            return;
        }
        let mut v = seed ^ 0x4569_4584;
        for px in row.iter_mut() {
            let i = *px as usize;
            let base = u32::from(self.base[i]);
            let delta = u32::from(self.delta[i]);
            v = 15700u32
                .wrapping_mul(v & 65535)
                .wrapping_add(v >> 16);
            let out = base + ((delta * (v & 2047) + 1024) >> 12);
            *px = out.min(65535) as u16;
        }
    }
}
