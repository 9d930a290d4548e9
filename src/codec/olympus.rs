//! Olympus ORF codec.
//!
//! Pixels come in pairs of columns, each column parity carrying its own
//! adaptive state. A difference is coded as a unary-ish high part, a
//! variable number of low bits and two extra low bits. The predictor
//! picks between left, up and their average from the gradients around
//! the pixel.
//!
//! The stream has no row offsets and every row predicts from the rows
//! above it, so a band cannot start mid-stream. Decoding runs on one
//! thread rather than through `decode_bands`.

use crate::bits::{BitPump, MsbPump};
use crate::error::DecodeError;
use crate::image::PlaneMut;

/// Bytes before the first coded row.
const HEADER_BYTES: usize = 7;

/// Position of the highest set bit of a 12-bit value, counted from bit 11.
fn bittable() -> [u8; 4096] {
    let mut table = [12u8; 4096];
    for (i, entry) in table.iter_mut().enumerate() {
        if let Some(high) = (0..12).find(|&h| (i >> (11 - h)) & 1 != 0) {
            *entry = high as u8;
        }
    }
    table
}

/// Decode an ORF stream into the whole plane.
pub fn decode_orf(plane: &mut PlaneMut<'_>, input: &[u8]) -> Result<(), DecodeError> {
    let width = plane.width();
    if width % 2 != 0 {
        return Err(DecodeError::unsupported("ORF with odd width"));
    }
    let data = input
        .get(HEADER_BYTES..)
        .ok_or_else(|| DecodeError::Truncated("ORF stream shorter than its header".into()))?;
    let table = bittable();
    let mut pump = MsbPump::new(data);
    let (height, pitch) = (plane.height(), plane.pitch());
    let out = plane.data_mut();

    for y in 0..height {
        let mut carry = [[0i32; 3]; 2];
        let y_border = y < 2;
        let mut border = true;
        let mut left = [0i32; 2];
        let mut nw = [0i32; 2];

        for x in (0..width).step_by(2) {
            pump.check_position()?;
            for c in 0..2 {
                let state = &mut carry[c];
                let i = if state[2] < 3 { 2 } else { 0 };
                let mut nbits = 2 + i;
                while nbits < 16 && ((state[0] as u16 as u32) >> (nbits + i)) != 0 {
                    nbits += 1;
                }

                let b = pump.peek_bits(15) as i32;
                let sign = -(b >> 14);
                let low = (b >> 12) & 3;
                let mut high = i32::from(table[(b & 4095) as usize]);
                if high == 12 {
                    pump.skip_bits(15)?;
                    high = (pump.get_bits(16 - nbits)? >> 1) as i32;
                } else {
                    pump.skip_bits(high as u32 + 4)?;
                }

                state[0] = (high << nbits) | pump.get_bits(nbits)? as i32;
                let diff = (state[0] ^ sign) + state[1];
                state[1] = (diff * 3 + state[1]) >> 5;
                state[2] = if state[0] > 16 { 0 } else { state[2] + 1 };

                let value = (diff << 2) | low;
                let px = x + c;
                let dest = y * pitch + px;
                let pred = if border {
                    if y_border && px < 2 {
                        0
                    } else if y_border {
                        left[c]
                    } else {
                        let up = i32::from(out[dest - 2 * pitch]);
                        nw[c] = up;
                        up
                    }
                } else {
                    let up = i32::from(out[dest - 2 * pitch]);
                    let left_minus_nw = left[c] - nw[c];
                    let up_minus_nw = up - nw[c];
                    let p = if left_minus_nw * up_minus_nw < 0 {
                        if left_minus_nw.abs() > 32 || up_minus_nw.abs() > 32 {
                            left[c] + up_minus_nw
                        } else {
                            (left[c] + up) >> 1
                        }
                    } else if left_minus_nw.abs() > up_minus_nw.abs() {
                        left[c]
                    } else {
                        up
                    };
                    nw[c] = up;
                    p
                };

                let sample = (pred + value) as u16;
                out[dest] = sample;
                left[c] = i32::from(sample);
            }
            border = y_border;
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
        let mut out = vec![0u8; HEADER_BYTES];
        out.extend(
            bits.chunks(8)
                .map(|c| c.iter().enumerate().fold(0u8, |acc, (i, &b)| acc | (b << (7 - i)))),
        );
        out.extend_from_slice(&[0; 8]);
        out
    }

    #[test]
    fn test_bittable() {
        let table = bittable();
        assert_eq!(table[0], 12);
        assert_eq!(table[0x800], 0);
        assert_eq!(table[0x400], 1);
        assert_eq!(table[1], 11);
        assert_eq!(table[0xfff], 0);
    }

    #[test]
    fn test_first_pixels_use_zero_prediction() {
        // pixel 0: sign 0, low 01, high 0 ("1"), nbits 4 value 0011
        //   carry0 = 3, diff = 3, value = 13
        // pixel 1: sign 0, low 10, high 0, value bits 0000 -> value 2
        let data = pack("0 01 1 0011  0 10 1 0000");
        let mut img = RawImage::new(2, 1, 1, SampleType::U16).unwrap();
        decode_orf(&mut img.plane_mut().unwrap(), &data).unwrap();
        assert_eq!(img.get_u16(0, 0, 0), Some(13));
        assert_eq!(img.get_u16(1, 0, 0), Some(2));
    }

    #[test]
    fn test_top_rows_predict_from_left() {
        // four zero-difference codes with low bits 1, 2, 3, 0
        let data = pack("0 01 1 0000  0 10 1 0000  0 11 1 0000  0 00 1 0000");
        let mut img = RawImage::new(4, 1, 1, SampleType::U16).unwrap();
        decode_orf(&mut img.plane_mut().unwrap(), &data).unwrap();
        let row: Vec<u16> = (0..4).map(|x| img.get_u16(x, 0, 0).unwrap()).collect();
        assert_eq!(row, [1, 2, 4, 2]);
    }

    #[test]
    fn test_odd_width_rejected() {
        let mut img = RawImage::new(3, 1, 1, SampleType::U16).unwrap();
        assert!(decode_orf(&mut img.plane_mut().unwrap(), &pack("")).is_err());
    }

    #[test]
    fn test_missing_header() {
        let mut img = RawImage::new(2, 1, 1, SampleType::U16).unwrap();
        let result = decode_orf(&mut img.plane_mut().unwrap(), &[0; 3]);
        assert!(matches!(result, Err(DecodeError::Truncated(_))));
    }
}
