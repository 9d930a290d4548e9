//! Pentax PEF Huffman codec.
//!
//! Standard JPEG difference coding with Nikon-style predictors: each row
//! starts from a vertical predictor per row parity, then runs a horizontal
//! predictor per column parity. The tree is either a fixed default or
//! rebuilt from maker-note tag 0x220.

use crate::bits::{BitPump, MsbPump};
use crate::error::DecodeError;
use crate::image::PlaneMut;

use super::huffman::HuffmanTable;

const DEFAULT_COUNTS: [u8; 16] = [0, 2, 3, 1, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0, 0];
const DEFAULT_VALUES: [u8; 13] = [3, 4, 2, 5, 1, 6, 0, 7, 8, 9, 10, 11, 12];

/// The tree used when the maker note does not carry one.
pub fn default_table() -> Result<HuffmanTable, DecodeError> {
    HuffmanTable::new(&DEFAULT_COUNTS, &DEFAULT_VALUES, false)
}

/// Build the tree stored in maker-note tag 0x220.
///
/// The entry holds the code count, each code's 12-bit left-aligned value
/// and its length. Symbols are the code indices ordered by code value.
pub fn table_from_makernote(data: &[u8]) -> Result<HuffmanTable, DecodeError> {
    let short = || DecodeError::Truncated("Pentax Huffman table entry too short".to_string());
    let depth = ((*data.get(1).ok_or_else(short)? as usize) + 12) & 0xf;
    if data.len() < 46 + depth {
        return Err(short());
    }

    let mut counts = [0u8; 16];
    let mut codes = [0u32; 16];
    for i in 0..depth {
        let v0 = u32::from(u16::from_be_bytes([data[14 + 2 * i], data[15 + 2 * i]]));
        let v1 = u32::from(data[46 + i]);
        if v1 == 0 || v1 > 12 {
            return Err(DecodeError::corrupt(format!(
                "Pentax Huffman code length {v1}"
            )));
        }
        codes[i] = v0 >> (12 - v1);
        counts[v1 as usize - 1] += 1;
    }

    let mut values = Vec::with_capacity(depth);
    for _ in 0..depth {
        let mut smallest = u32::MAX;
        let mut index = 0;
        for (j, &code) in codes.iter().enumerate().take(depth) {
            if code <= smallest {
                smallest = code;
                index = j;
            }
        }
        values.push(index as u8);
        codes[index] = u32::MAX;
    }

    HuffmanTable::new(&counts, &values, false)
}

/// Decode a PEF stream into the whole plane.
pub fn decode_pef(plane: &mut PlaneMut<'_>, input: &[u8], table: &HuffmanTable) -> Result<(), DecodeError> {
    let width = plane.width();
    if width % 2 != 0 {
        return Err(DecodeError::unsupported("compressed PEF with odd width"));
    }
    let mut pump = MsbPump::new(input);
    let mut up1 = [0i32; 2];
    let mut up2 = [0i32; 2];

    for y in 0..plane.height() {
        pump.check_position()?;
        let row = plane.row_mut(y);
        up1[y & 1] += table.decode_diff(&mut pump)?;
        up2[y & 1] += table.decode_diff(&mut pump)?;
        let mut left1 = up1[y & 1];
        let mut left2 = up2[y & 1];
        row[0] = left1 as u16;
        row[1] = left2 as u16;
        for x in 1..width / 2 {
            left1 += table.decode_diff(&mut pump)?;
            left2 += table.decode_diff(&mut pump)?;
            row[x * 2] = left1 as u16;
            row[x * 2 + 1] = left2 as u16;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{RawImage, SampleType};

    fn pack(bits: &str) -> Vec<u8> {
        let bits: Vec<u8> = bits.bytes().filter(|b| *b != b' ').map(|b| b - b'0').collect();
        let mut out: Vec<u8> = bits
            .chunks(8)
            .map(|c| c.iter().enumerate().fold(0u8, |acc, (i, &b)| acc | (b << (7 - i))))
            .collect();
        out.extend_from_slice(&[0; 8]);
        out
    }

    fn makernote_entry(codes: &[(u16, u8)]) -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[1] = ((codes.len() + 4) & 0xf) as u8;
        for (i, &(value, len)) in codes.iter().enumerate() {
            data[14 + 2 * i..16 + 2 * i].copy_from_slice(&value.to_be_bytes());
            data[46 + i] = len;
        }
        data
    }

    // -------------------------------------------------------------------------
    // Tables
    // -------------------------------------------------------------------------

    #[test]
    fn test_makernote_table_orders_by_code() {
        // stored codes 1, 00, 01: symbols ordered 1, 2, 0 on canonical codes
        let data = makernote_entry(&[(0x800, 1), (0x000, 2), (0x400, 2)]);
        let table = table_from_makernote(&data).unwrap();
        let bits = pack("0 10 11");
        let mut pump = MsbPump::new(&bits);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 1);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 2);
        assert_eq!(table.decode_symbol(&mut pump).unwrap(), 0);
    }

    #[test]
    fn test_makernote_bad_length() {
        let data = makernote_entry(&[(0x800, 13)]);
        assert!(table_from_makernote(&data).is_err());
        assert!(table_from_makernote(&[0u8; 10]).is_err());
    }

    // -------------------------------------------------------------------------
    // Stream
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_predictors() {
        // default tree: 3 "00", 4 "01", 2 "100", 1 "110", 0 "11110"
        let table = default_table().unwrap();
        // row 0: +7 +8 | -7 0 ; row 1: +1 +2 | 0 0
        let bits = "00 111  01 1000  00 000  11110 \
                    110 1  100 10  11110  11110";
        let mut img = RawImage::new(4, 2, 1, SampleType::U16).unwrap();
        decode_pef(&mut img.plane_mut().unwrap(), &pack(bits), &table).unwrap();
        let row0: Vec<u16> = (0..4).map(|x| img.get_u16(x, 0, 0).unwrap()).collect();
        let row1: Vec<u16> = (0..4).map(|x| img.get_u16(x, 1, 0).unwrap()).collect();
        assert_eq!(row0, [7, 8, 0, 8]);
        assert_eq!(row1, [1, 2, 1, 2]);
    }
}
