//! Canonical Huffman tables for JPEG-style difference coding.
//!
//! Tables are built from the 16 code-length counts and the symbol list of a
//! JPEG DHT segment (or a vendor table expressed the same way). Symbols are
//! bit lengths of the following difference, which is sign-extended the JPEG
//! way.

use crate::bits::BitPump;
use crate::error::DecodeError;

/// Bits resolved by a single table lookup.
const LOOKUP_BITS: u32 = 14;

/// Entry layout in the lookup table: code length in the low 5 bits,
/// symbol above. A zero length marks a code longer than `LOOKUP_BITS`.
const LEN_MASK: u16 = 0x1f;

#[derive(Debug, Clone)]
pub struct HuffmanTable {
    values: Vec<u8>,
    mincode: [i32; 17],
    maxcode: [i32; 17],
    valptr: [usize; 17],
    lookup: Vec<u16>,
    /// DNG streams store a full 16-bit difference after the 16 symbol
    dng_compatible: bool,
}

impl HuffmanTable {
    /// Build from code-length counts (`counts[i]` codes of length `i + 1`)
    /// and the symbols in code order.
    pub fn new(counts: &[u8], values: &[u8], dng_compatible: bool) -> Result<Self, DecodeError> {
        if counts.len() != 16 {
            return Err(DecodeError::corrupt("Huffman table needs 16 length counts"));
        }
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if total > 256 || values.len() < total {
            return Err(DecodeError::corrupt("invalid Huffman table"));
        }

        // Canonical code assignment (JPEG Annex C)
        let mut codes = Vec::with_capacity(total);
        let mut code: u32 = 0;
        for (i, &count) in counts.iter().enumerate() {
            let len = i as u32 + 1;
            for _ in 0..count {
                codes.push((code, len));
                code += 1;
            }
            if code > (1 << len) {
                return Err(DecodeError::corrupt("Huffman code space overflow"));
            }
            code <<= 1;
        }

        let mut mincode = [0i32; 17];
        let mut maxcode = [-1i32; 17];
        let mut valptr = [0usize; 17];
        let mut p = 0usize;
        for (i, &count) in counts.iter().enumerate() {
            let len = i + 1;
            if count == 0 {
                continue;
            }
            valptr[len] = p;
            mincode[len] = codes[p].0 as i32;
            p += count as usize;
            maxcode[len] = codes[p - 1].0 as i32;
        }

        let mut lookup = vec![0u16; 1 << LOOKUP_BITS];
        for (&(code, len), &symbol) in codes.iter().zip(values) {
            if len > LOOKUP_BITS {
                continue;
            }
            let shift = LOOKUP_BITS - len;
            let start = (code << shift) as usize;
            let entry = (u16::from(symbol) << 5) | len as u16;
            lookup[start..start + (1 << shift)].fill(entry);
        }

        Ok(Self {
            values: values[..total].to_vec(),
            mincode,
            maxcode,
            valptr,
            lookup,
            dng_compatible,
        })
    }

    /// Decode the next symbol.
    pub fn decode_symbol(&self, pump: &mut impl BitPump) -> Result<u32, DecodeError> {
        let entry = self.lookup[pump.peek_bits(LOOKUP_BITS) as usize];
        let len = u32::from(entry & LEN_MASK);
        if len != 0 {
            pump.skip_bits(len)?;
            return Ok(u32::from(entry >> 5));
        }

        let mut code: i32 = 0;
        for len in 1..=16 {
            code = (code << 1) | pump.get_bit()? as i32;
            if self.maxcode[len] >= 0 && code <= self.maxcode[len] && code >= self.mincode[len] {
                let index = self.valptr[len] + (code - self.mincode[len]) as usize;
                return Ok(u32::from(self.values[index]));
            }
        }
        Err(DecodeError::corrupt("bad Huffman code"))
    }

    /// Decode a symbol and the sign-extended difference that follows it.
    pub fn decode_diff(&self, pump: &mut impl BitPump) -> Result<i32, DecodeError> {
        let len = self.decode_symbol(pump)?;
        match len {
            0 => Ok(0),
            16 => {
                if self.dng_compatible {
                    pump.skip_bits(16)?;
                }
                Ok(-32768)
            }
            1..=15 => {
                let bits = pump.get_bits(len)? as i32;
                Ok(extend(bits, len))
            }
            _ => Err(DecodeError::corrupt(format!(
                "Huffman difference of {len} bits"
            ))),
        }
    }
}

/// JPEG sign extension of a `len`-bit difference.
#[inline]
pub fn extend(bits: i32, len: u32) -> i32 {
    if len == 0 {
        0
    } else if bits & (1 << (len - 1)) == 0 {
        bits - ((1 << len) - 1)
    } else {
        bits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::MsbPump;

    /// Lengths 2..=9 covering symbols 0..=16.
    const COUNTS: [u8; 16] = [0, 1, 4, 2, 2, 2, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0];
    const VALUES: [u8; 17] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

    fn pack(bits: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut acc = 0u8;
        let mut n = 0;
        for c in bits.chars().filter(|c| !c.is_whitespace()) {
            acc = (acc << 1) | u8::from(c == '1');
            n += 1;
            if n == 8 {
                out.push(acc);
                acc = 0;
                n = 0;
            }
        }
        if n > 0 {
            out.push(acc << (8 - n));
        }
        out.extend_from_slice(&[0, 0, 0, 0]);
        out
    }

    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    #[test]
    fn test_rejects_overfull_code_space() {
        let mut counts = [0u8; 16];
        counts[0] = 3;
        assert!(HuffmanTable::new(&counts, &[0, 1, 2], false).is_err());
    }

    #[test]
    fn test_rejects_short_value_list() {
        assert!(HuffmanTable::new(&COUNTS, &VALUES[..10], false).is_err());
        assert!(HuffmanTable::new(&COUNTS[..8], &VALUES, false).is_err());
    }

    // -------------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_symbols() {
        let table = HuffmanTable::new(&COUNTS, &VALUES, false).unwrap();
        let data = pack("00 010 101 1101 111111101");
        let mut pump = MsbPump::new(&data);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 0);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 1);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 4);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 6);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 16);
    }

    #[test]
    fn test_long_codes_use_slow_path() {
        // one code of each length 1..=16, the 16-bit one needs the canonical walk
        let counts = [1u8; 16];
        let values: Vec<u8> = (0..16).collect();
        let table = HuffmanTable::new(&counts, &values, false).unwrap();
        let data = pack("1111111111111110 0");
        let mut pump = MsbPump::new(&data);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 15);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 0);
    }

    #[test]
    fn test_unassigned_code_is_corrupt() {
        let counts = [1u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let table = HuffmanTable::new(&counts, &[3], false).unwrap();
        let data = pack("1111111111111111 1111");
        let mut pump = MsbPump::new(&data);
        assert!(matches!(
            table.decode_symbol(&mut pump),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // Differences
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_diff_sign_extension() {
        let table = HuffmanTable::new(&COUNTS, &VALUES, false).unwrap();
        let data = pack("100 101  100 010  00");
        let mut pump = MsbPump::new(&data);
        assert_eq!(table.decode_diff(&mut pump).unwrap(), 5);
        assert_eq!(table.decode_diff(&mut pump).unwrap(), -5);
        assert_eq!(table.decode_diff(&mut pump).unwrap(), 0);
    }

    #[test]
    fn test_sixteen_bit_difference() {
        let plain = HuffmanTable::new(&COUNTS, &VALUES, false).unwrap();
        let data = pack("111111101 010 1");
        let mut pump = MsbPump::new(&data);
        assert_eq!(plain.decode_diff(&mut pump).unwrap(), -32768);
        assert_eq!(plain.decode_diff(&mut pump).unwrap(), 1);

        let dng = HuffmanTable::new(&COUNTS, &VALUES, true).unwrap();
        let data = pack("111111101 0000000000000000 010 1");
        let mut pump = MsbPump::new(&data);
        assert_eq!(dng.decode_diff(&mut pump).unwrap(), -32768);
        assert_eq!(dng.decode_diff(&mut pump).unwrap(), 1);
    }

    #[test]
    fn test_extend() {
        assert_eq!(extend(0, 1), -1);
        assert_eq!(extend(1, 1), 1);
        assert_eq!(extend(0, 8), -255);
        assert_eq!(extend(200, 8), 200);
    }
}
