//! Nikon NEF compressed and small-NEF codecs.
//!
//! Compressed NEF is a Huffman-coded difference stream with a two-row
//! vertical predictor per column parity and a horizontal predictor within
//! the row. The maker note carries the initial predictors, the linearization
//! curve and optionally a row at which the coder switches to a second tree.

use tracing::debug;

use crate::bits::{BitPump, MsbPump};
use crate::error::DecodeError;
use crate::format::tiff::ByteOrder;
use crate::image::PlaneMut;
use crate::io::ByteCursor;

use super::huffman::HuffmanTable;

/// Code-length counts (16) followed by symbols for each tree.
const TREES: [(&[u8; 16], &[u8]); 6] = [
    // 12-bit lossy
    (
        &[0, 1, 5, 1, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0, 0],
        &[5, 4, 3, 6, 2, 7, 1, 0, 8, 9, 11, 10, 12, 0],
    ),
    // 12-bit lossy after split
    (
        &[0, 1, 5, 1, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0, 0],
        &[0x39, 0x5a, 0x38, 0x27, 0x16, 5, 4, 3, 2, 1, 0, 11, 12, 12],
    ),
    // 12-bit lossless
    (
        &[0, 1, 4, 2, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0],
        &[5, 4, 6, 3, 7, 2, 8, 1, 9, 0, 10, 11, 12],
    ),
    // 14-bit lossy
    (
        &[0, 1, 4, 3, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0, 0],
        &[5, 6, 4, 7, 8, 3, 9, 2, 1, 0, 10, 11, 12, 13, 14],
    ),
    // 14-bit lossy after split
    (
        &[0, 1, 5, 1, 1, 1, 1, 1, 1, 1, 2, 0, 0, 0, 0, 0],
        &[8, 0x5c, 0x4b, 0x3a, 0x29, 7, 6, 5, 4, 3, 2, 1, 0, 13, 14],
    ),
    // 14-bit lossless
    (
        &[0, 1, 4, 2, 2, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0],
        &[7, 6, 8, 5, 9, 4, 10, 3, 11, 12, 2, 0, 1, 13, 14],
    ),
];

fn tree(index: usize) -> Result<HuffmanTable, DecodeError> {
    let (counts, values) = TREES
        .get(index)
        .ok_or_else(|| DecodeError::corrupt(format!("Nikon Huffman tree {index}")))?;
    HuffmanTable::new(&counts[..], values, false)
}

/// Decompression parameters from the maker note (tag 0x96, else 0x8c).
#[derive(Debug, Clone)]
pub struct NikonMeta {
    tree: usize,
    /// Row at which the second tree takes over, 0 for never
    split: usize,
    pred_up1: [i32; 2],
    pred_up2: [i32; 2],
    /// Linearization curve, `max` entries long
    pub curve: Vec<u16>,
}

impl NikonMeta {
    pub fn parse(data: &[u8], order: ByteOrder, bits: u32) -> Result<Self, DecodeError> {
        let mut cursor = ByteCursor::new(data, order);
        let v0 = cursor.get_u8()?;
        let v1 = cursor.get_u8()?;
        if v0 == 73 || v1 == 88 {
            cursor.skip(2110)?;
        }
        let mut tree = if v0 == 70 { 2 } else { 0 };
        if bits == 14 {
            tree += 3;
        }

        let pred_up1 = [i32::from(cursor.get_u16()?), i32::from(cursor.get_u16()?)];
        let pred_up2 = [i32::from(cursor.get_u16()?), i32::from(cursor.get_u16()?)];

        let mut curve: Vec<u16> = (0..=0xffffu32).map(|i| i.min(0x7fff) as u16).collect();
        let mut max = (1usize << bits) & 0x7fff;
        let csize = cursor.get_u16()? as usize;
        let step = if csize > 1 { max / (csize - 1) } else { 0 };
        let mut split = 0;

        if v0 == 68 && v1 == 32 && step > 0 {
            for i in 0..csize {
                curve[i * step] = cursor.get_u16()?;
            }
            for i in 0..max {
                let base = i - i % step;
                let lo = u32::from(curve[base]);
                let hi = u32::from(curve.get(base + step).copied().unwrap_or(0));
                let frac = (i % step) as u32;
                curve[i] = ((lo * (step as u32 - frac) + hi * frac) / step as u32) as u16;
            }
            cursor.seek(562)?;
            split = cursor.get_u16()? as usize;
        } else if v0 != 70 && csize <= 0x4001 {
            for value in curve.iter_mut().take(csize) {
                *value = cursor.get_u16()?;
            }
            max = csize;
        }
        if max == 0 {
            return Err(DecodeError::corrupt("Nikon curve is empty"));
        }
        curve.truncate(max);
        debug!(v0, v1, tree, split, curve = max, "Nikon decompression parameters");

        Ok(Self {
            tree,
            split,
            pred_up1,
            pred_up2,
            curve,
        })
    }

    /// White point implied by the curve.
    pub fn white(&self) -> u32 {
        self.curve.last().map_or(0, |&v| u32::from(v))
    }

    /// Black level implied by the curve.
    pub fn black(&self) -> i32 {
        self.curve.first().map_or(0, |&v| i32::from(v))
    }
}

/// Decode the next difference. Symbols carry a length in the low nibble and
/// a left shift in the high nibble.
fn nikon_diff(table: &HuffmanTable, pump: &mut MsbPump<'_>) -> Result<i32, DecodeError> {
    let symbol = table.decode_symbol(pump)?;
    if symbol == 16 {
        return Ok(-32768);
    }
    let len = symbol & 15;
    let shl = symbol >> 4;
    if len == 0 {
        return Ok(0);
    }
    if shl > len {
        return Err(DecodeError::corrupt("Nikon difference shift exceeds length"));
    }
    let raw = pump.get_bits(len - shl)? as i32;
    let mut diff = (((raw << 1) + 1) << shl) >> 1;
    if diff & (1 << (len - 1)) == 0 {
        diff -= (1 << len) - i32::from(shl == 0);
    }
    Ok(diff)
}

/// Decode a compressed NEF stream into the whole plane. Values are the
/// uncorrected codes; the curve is applied later as the image table.
pub fn decode_nef(plane: &mut PlaneMut<'_>, input: &[u8], meta: &NikonMeta) -> Result<(), DecodeError> {
    let width = plane.width();
    if width % 2 != 0 {
        return Err(DecodeError::unsupported("compressed NEF with odd width"));
    }
    let mut table = tree(meta.tree)?;
    let mut pump = MsbPump::new(input);
    let mut up1 = meta.pred_up1;
    let mut up2 = meta.pred_up2;

    for y in 0..plane.height() {
        if meta.split != 0 && y == meta.split {
            table = tree(meta.tree + 1)?;
        }
        let row = plane.row_mut(y);
        up1[y & 1] += nikon_diff(&table, &mut pump)?;
        up2[y & 1] += nikon_diff(&table, &mut pump)?;
        let mut left1 = up1[y & 1];
        let mut left2 = up2[y & 1];
        row[0] = left1.clamp(0, 0x7fff) as u16;
        row[1] = left2.clamp(0, 0x7fff) as u16;
        for x in 1..width / 2 {
            pump.check_position()?;
            left1 += nikon_diff(&table, &mut pump)?;
            left2 += nikon_diff(&table, &mut pump)?;
            row[x * 2] = left1.clamp(0, 0x7fff) as u16;
            row[x * 2 + 1] = left2.clamp(0, 0x7fff) as u16;
        }
    }
    Ok(())
}

// =============================================================================
// Small NEF
// =============================================================================

/// Tone curve Nikon applies to small-NEF luma, as measured by LibRaw.
fn snef_curve(v: f32) -> f32 {
    let (b1, b2, b3, b4): (f32, f32, f32, f32) = (5.793_422e-2, 3.281_635_5, -8.431_36, 10.353_318);
    let x = v / 4096.0;
    let y = 1.0 - (b1 * x - b2 * x * x - b3 * x * x * x - b4 * x * x * x * x).exp();
    y * 16383.0
}

/// Decode small-NEF YCbCr data (two 12-bit lumas and one chroma pair per six
/// bytes) to RGB, undoing the red and blue gains the camera applied.
pub fn decode_snef(
    plane: &mut PlaneMut<'_>,
    input: &[u8],
    wb_red: f32,
    wb_blue: f32,
) -> Result<usize, DecodeError> {
    let width = plane.width();
    let line = width * 3;
    let mut rows = plane.height();
    if input.len() < line * rows {
        if input.len() > line {
            rows = input.len() / line - 1;
        } else {
            return Err(DecodeError::Truncated(
                "not enough data to decode a single line".to_string(),
            ));
        }
    }
    let inv_r = 1.0 / wb_red;
    let inv_b = 1.0 / wb_blue;
    let clamp = |v: f32| v.clamp(0.0, 65535.0) as u16;

    for y in 0..rows {
        let src = &input[y * line..(y + 1) * line];
        let row = plane.row_mut(y);
        for x in (0..line).step_by(6) {
            let g = &src[x..x + 6];
            let (g1, g2, g3, g4, g5, g6) = (
                u32::from(g[0]),
                u32::from(g[1]),
                u32::from(g[2]),
                u32::from(g[3]),
                u32::from(g[4]),
                u32::from(g[5]),
            );
            let mut y1 = (g1 | ((g2 & 0x0f) << 8)) as f32;
            let mut y2 = ((g2 >> 4) | (g3 << 4)) as f32;
            let cb = (g4 | ((g5 & 0x0f) << 8)) as f32;
            let cr = ((g5 >> 4) | (g6 << 4)) as f32;

            let (mut cb2, mut cr2) = (cb, cr);
            if x + 6 < line {
                let n5 = u32::from(src[x + 10]);
                let n6 = u32::from(src[x + 11]);
                cb2 = ((g4 | ((n5 & 0x0f) << 8)) as f32 + cb) * 0.5;
                cr2 = (((n5 >> 4) | (n6 << 4)) as f32 + cr) * 0.5;
            }

            y1 *= 4096.0 / 2549.0;
            y2 *= 4096.0 / 2549.0;
            let scale = |c: f32| (c - 2048.0) * (2048.0 / 1280.0);
            let (cb, cr, cb2, cr2) = (scale(cb), scale(cr), scale(cb2), scale(cr2));

            row[x] = clamp(inv_r * snef_curve(y1 + 1.402 * cr));
            row[x + 1] = clamp(snef_curve(y1 - 0.34414 * cb - 0.71414 * cr));
            row[x + 2] = clamp(inv_b * snef_curve(y1 + 1.772 * cb));
            row[x + 3] = clamp(inv_r * snef_curve(y2 + 1.402 * cr2));
            row[x + 4] = clamp(snef_curve(y2 - 0.34414 * cb2 - 0.71414 * cr2));
            row[x + 5] = clamp(inv_b * snef_curve(y2 + 1.772 * cb2));
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{RawImage, SampleType};

    fn meta_bytes(v0: u8, v1: u8, preds: [u16; 4], curve: &[u16]) -> Vec<u8> {
        let mut out = vec![v0, v1];
        for p in preds {
            out.extend_from_slice(&p.to_be_bytes());
        }
        out.extend_from_slice(&(curve.len() as u16).to_be_bytes());
        for c in curve {
            out.extend_from_slice(&c.to_be_bytes());
        }
        out
    }

    fn pack(bits: &str) -> Vec<u8> {
        let bits: Vec<u8> = bits.bytes().filter(|b| *b != b' ').map(|b| b - b'0').collect();
        let mut out: Vec<u8> = bits
            .chunks(8)
            .map(|c| c.iter().enumerate().fold(0u8, |acc, (i, &b)| acc | (b << (7 - i))))
            .collect();
        out.extend_from_slice(&[0; 8]);
        out
    }

    // -------------------------------------------------------------------------
    // Meta
    // -------------------------------------------------------------------------

    #[test]
    fn test_all_trees_build() {
        for i in 0..TREES.len() {
            assert!(tree(i).is_ok(), "tree {i}");
        }
    }

    #[test]
    fn test_meta_with_explicit_curve() {
        let data = meta_bytes(0x46, 0x30, [1, 2, 3, 4], &[]);
        let meta = NikonMeta::parse(&data, ByteOrder::BigEndian, 12).unwrap();
        // v0 70 selects the lossless tree and ignores the curve
        assert_eq!(meta.tree, 2);
        assert_eq!(meta.pred_up1, [1, 2]);
        assert_eq!(meta.pred_up2, [3, 4]);
        assert_eq!(meta.curve.len(), 4096);
        assert_eq!(meta.white(), 4095);
        assert_eq!(meta.black(), 0);

        let data = meta_bytes(0x44, 0x10, [0; 4], &[10, 20, 30]);
        let meta = NikonMeta::parse(&data, ByteOrder::BigEndian, 14).unwrap();
        assert_eq!(meta.tree, 3);
        assert_eq!(meta.curve, vec![10, 20, 30]);
        assert_eq!(meta.white(), 30);
        assert_eq!(meta.black(), 10);
    }

    #[test]
    fn test_meta_interpolated_curve_and_split() {
        // 3 knots over 12 bits: step 2048
        let mut data = meta_bytes(68, 32, [0; 4], &[0, 1000, 4000]);
        data.resize(562, 0);
        data.extend_from_slice(&7u16.to_be_bytes());
        let meta = NikonMeta::parse(&data, ByteOrder::BigEndian, 12).unwrap();
        assert_eq!(meta.split, 7);
        assert_eq!(meta.curve.len(), 4096);
        assert_eq!(meta.curve[0], 0);
        assert_eq!(meta.curve[1024], 500);
        assert_eq!(meta.curve[2048], 1000);
        assert_eq!(meta.curve[3072], 2500);
    }

    #[test]
    fn test_meta_truncated() {
        assert!(NikonMeta::parse(&[0x44, 0x20, 0], ByteOrder::BigEndian, 12).is_err());
    }

    // -------------------------------------------------------------------------
    // Stream
    // -------------------------------------------------------------------------

    #[test]
    fn test_decode_lossless_rows() {
        // 12-bit lossless tree: symbol 5 is "00", symbol 4 "010", symbol 0 "11110"
        let meta = NikonMeta {
            tree: 2,
            split: 0,
            pred_up1: [100, 200],
            pred_up2: [300, 400],
            curve: vec![0, 1],
        };
        // row 0: +21 +21 | 0 -21 ; row 1: 0 0 | +10 +10
        let bits = "00 10101  00 10101  11110  00 01010 \
                    11110  11110  010 1010  010 1010";
        let mut img = RawImage::new(4, 2, 1, SampleType::U16).unwrap();
        decode_nef(&mut img.plane_mut().unwrap(), &pack(bits), &meta).unwrap();
        let row0: Vec<u16> = (0..4).map(|x| img.get_u16(x, 0, 0).unwrap()).collect();
        let row1: Vec<u16> = (0..4).map(|x| img.get_u16(x, 1, 0).unwrap()).collect();
        assert_eq!(row0, [121, 321, 121, 300]);
        assert_eq!(row1, [200, 400, 210, 410]);
    }

    #[test]
    fn test_shifted_symbol() {
        // 12-bit lossy split tree, 0x39: length 9, shift 3, 6 stored bits
        let table = tree(1).unwrap();
        let data = pack("00 111111 0");
        let mut pump = MsbPump::new(&data);
        let diff = nikon_diff(&table, &mut pump).unwrap();
        assert_eq!(diff, (((0b111111 << 1) + 1) << 3) >> 1);
    }

    #[test]
    fn test_odd_width_rejected() {
        let meta = NikonMeta {
            tree: 0,
            split: 0,
            pred_up1: [0; 2],
            pred_up2: [0; 2],
            curve: vec![0],
        };
        let mut img = RawImage::new(3, 1, 1, SampleType::U16).unwrap();
        assert!(decode_nef(&mut img.plane_mut().unwrap(), &[0; 16], &meta).is_err());
    }

    // -------------------------------------------------------------------------
    // Small NEF
    // -------------------------------------------------------------------------

    #[test]
    fn test_snef_neutral_grey() {
        // Y = 0x400, Cb = Cr = 0x800 (zero chroma)
        let group = [0x00, 0x04, 0x40, 0x00, 0x08, 0x80];
        let mut data = group.repeat(2);
        data.extend_from_slice(&[0; 6]);
        let mut img = RawImage::new(4, 1, 3, SampleType::U16).unwrap();
        let rows = decode_snef(&mut img.plane_mut().unwrap(), &data, 1.0, 1.0).unwrap();
        assert_eq!(rows, 1);
        let r = img.get_u16(0, 0, 0).unwrap();
        let g = img.get_u16(0, 0, 1).unwrap();
        let b = img.get_u16(0, 0, 2).unwrap();
        assert!(r > 0);
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn test_snef_too_short() {
        let mut img = RawImage::new(4, 2, 3, SampleType::U16).unwrap();
        let result = decode_snef(&mut img.plane_mut().unwrap(), &[0; 10], 1.0, 1.0);
        assert!(matches!(result, Err(DecodeError::Truncated(_))));
    }
}
