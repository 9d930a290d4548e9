//! Sigma X3F codecs.
//!
//! Foveon sensors record three full colour layers, so the output has three
//! components per pixel and no CFA. Two codings exist:
//!
//! - **TRUE** (formats 30 and 35): each layer is its own stream of
//!   difference codes with a 256-entry prefix table. Format 35 stores the
//!   top two layers at half resolution; they are expanded afterwards
//!   using the detail of the full-resolution bottom layer.
//! - **Huffman** (format 6): pixels interleave the three layers, each
//!   difference looked up in a 1024-entry curve. A table at the end of the
//!   data gives the start of every row.

use tracing::debug;

use crate::bits::{BitPump, MsbPump};
use crate::error::DecodeError;
use crate::format::tiff::ByteOrder;
use crate::image::RawImage;
use crate::io::ByteCursor;
use crate::threading::{collect_band_errors, decode_bands, run_tasks};

/// Full-resolution TRUE layers.
pub const FORMAT_TRUE: u32 = 30;

/// TRUE with the top two layers at half resolution.
pub const FORMAT_TRUE_QUATTRO: u32 = 35;

/// Huffman-coded layers with a value curve.
pub const FORMAT_HUFFMAN: u32 = 6;

// =============================================================================
// TRUE prefix table
// =============================================================================

/// Bits looked up at once by [`TrueTable`].
const TRUE_LOOKUP_BITS: u32 = 14;

const NO_CODE: u8 = 0xFF;
const SLOW_PATH: i32 = 0xF;

/// Prefix table of a TRUE stream.
///
/// Entry `i` of the header is the code for a difference of `i` bits. The
/// byte table maps the top 8 bits of the stream to `(bits << 4) | length`.
/// The lookup table decodes code and difference together when both fit in
/// 14 bits.
struct TrueTable {
    codes: [u8; 256],
    lookup: Vec<i32>,
}

impl TrueTable {
    /// Build from `(length, code)` byte pairs.
    fn new(pairs: &[u8]) -> Result<Self, DecodeError> {
        let mut codes = [NO_CODE; 256];
        for (i, pair) in pairs.chunks_exact(2).enumerate() {
            let (len, code) = (u32::from(pair[0]), usize::from(pair[1]));
            if len > 8 {
                return Err(DecodeError::corrupt(format!(
                    "X3F code of {len} bits, at most 8 allowed"
                )));
            }
            for j in 0..1usize << (8 - len) {
                codes[code | j] = ((i << 4) as u32 | len) as u8;
            }
        }

        let lookup = (0..1u32 << TRUE_LOOKUP_BITS)
            .map(|i| {
                let entry = codes[(i >> 6) as usize];
                if entry == NO_CODE {
                    return SLOW_PATH;
                }
                let code_bits = u32::from(entry & 0xF);
                let value_bits = u32::from(entry >> 4);
                if code_bits + value_bits >= TRUE_LOOKUP_BITS {
                    return SLOW_PATH;
                }
                let low = TRUE_LOOKUP_BITS - code_bits - value_bits;
                let value = difference((i >> low) & ((1 << value_bits) - 1), value_bits);
                (value << 8) | (code_bits + value_bits) as i32
            })
            .collect();
        Ok(Self { codes, lookup })
    }

    fn decode(&self, pump: &mut MsbPump<'_>) -> Result<i32, DecodeError> {
        let code = pump.peek_bits(TRUE_LOOKUP_BITS);
        let fast = self.lookup[code as usize];
        if fast != SLOW_PATH {
            pump.skip_bits((fast & 0xFF) as u32)?;
            return Ok(fast >> 8);
        }
        let entry = self.codes[(code >> 6) as usize];
        if entry == NO_CODE {
            return Err(DecodeError::corrupt("invalid X3F Huffman code"));
        }
        pump.skip_bits(u32::from(entry & 0xF))?;
        let value_bits = u32::from(entry >> 4);
        if value_bits == 0 {
            return Ok(0);
        }
        Ok(difference(pump.get_bits(value_bits)?, value_bits))
    }
}

/// A `bits`-bit difference: values with the top bit clear are negative.
fn difference(raw: u32, bits: u32) -> i32 {
    if bits == 0 {
        return 0;
    }
    let v = raw as i32;
    if v & (1 << (bits - 1)) == 0 {
        v - ((1 << bits) - 1)
    } else {
        v
    }
}

// =============================================================================
// TRUE decoding
// =============================================================================

/// Parsed header of a TRUE section.
struct TrueHeader {
    /// Width and height of each layer as stored
    planes: [(usize, usize); 3],
    /// Starting value of each layer
    pred: [i32; 3],
    table: TrueTable,
    /// Section offsets of the layer streams
    offsets: [usize; 3],
}

impl TrueHeader {
    fn parse(section: &[u8], format: u32, width: usize, height: usize) -> Result<Self, DecodeError> {
        let mut cursor = ByteCursor::new(section, ByteOrder::LittleEndian);
        let quattro = format == FORMAT_TRUE_QUATTRO;

        let mut planes = [(width, height); 3];
        if quattro {
            for plane in &mut planes {
                let w = cursor.get_u16()? as usize;
                let h = cursor.get_u16()? as usize;
                *plane = (w, h);
            }
        }
        let mut pred = [0i32; 3];
        for p in &mut pred {
            *p = i32::from(cursor.get_u16()?);
        }
        cursor.skip(2)?;
        let codes = if quattro { 15 } else { 13 };
        let table = TrueTable::new(cursor.get_bytes(codes * 2)?)?;
        cursor.skip(if quattro { 6 } else { 2 })?;

        let mut offsets = [0usize; 3];
        offsets[0] = cursor.position() + 12;
        for i in 0..3 {
            let size = cursor.get_u32()? as usize;
            // layers are 16-byte aligned
            if i < 2 {
                offsets[i + 1] = offsets[i].saturating_add(size.div_ceil(16) * 16);
            }
        }
        Ok(Self {
            planes,
            pred,
            table,
            offsets,
        })
    }
}

/// One decoded layer, possibly at half resolution.
struct Layer {
    values: Vec<u16>,
    columns: usize,
    /// 1 for half-resolution layers
    shift: usize,
}

impl TrueHeader {
    /// Decode layer `i` into a buffer clipped to the image.
    ///
    /// The buffer holds what was decoded when the stream fails part way.
    fn decode_layer(
        &self,
        section: &[u8],
        i: usize,
        shift: usize,
        width: usize,
        height: usize,
    ) -> (Layer, Result<(), DecodeError>) {
        let (stored_w, stored_h) = self.planes[i];
        let columns = stored_w.min(width.div_ceil(1 << shift));
        let rows = stored_h.min(height.div_ceil(1 << shift));
        let mut layer = Layer {
            values: vec![0; columns * rows],
            columns,
            shift,
        };
        let result = self.fill_layer(section, i, &mut layer, stored_w, rows);
        (layer, result)
    }

    fn fill_layer(
        &self,
        section: &[u8],
        i: usize,
        layer: &mut Layer,
        stored_w: usize,
        rows: usize,
    ) -> Result<(), DecodeError> {
        let data = section.get(self.offsets[i]..).ok_or_else(|| {
            DecodeError::Truncated(format!("X3F layer {i} starts past the end of the data"))
        })?;
        let mut pump = MsbPump::new(data);
        let mut up = [self.pred[i]; 4];
        let columns = layer.columns;

        for y in 0..rows {
            let row = &mut layer.values[y * columns..(y + 1) * columns];
            let mut left = [0i32; 2];
            for x in (0..stored_w).step_by(2) {
                let d1 = self.table.decode(&mut pump)?;
                let d2 = self.table.decode(&mut pump)?;
                if x == 0 {
                    // first pair of a row predicts from the same parity two rows up
                    up[y & 1] = up[y & 1].wrapping_add(d1);
                    up[(y & 1) + 2] = up[(y & 1) + 2].wrapping_add(d2);
                    left = [up[y & 1], up[(y & 1) + 2]];
                } else {
                    left[0] = left[0].wrapping_add(d1);
                    left[1] = left[1].wrapping_add(d2);
                }
                if let Some(px) = row.get_mut(x) {
                    *px = left[0] as u16;
                }
                if let Some(px) = row.get_mut(x + 1) {
                    *px = left[1] as u16;
                }
            }
        }
        Ok(())
    }
}

/// Decode a TRUE section into a three-component image.
///
/// A layer whose stream fails is recorded on the image; the call fails
/// only when all three do.
pub fn decode_true(
    image: &mut RawImage,
    section: &[u8],
    format: u32,
    threads: usize,
) -> Result<(), DecodeError> {
    if image.cpp() != 3 {
        return Err(DecodeError::unsupported("X3F output needs three components"));
    }
    let (width, height) = (image.width(), image.height());
    let header = TrueHeader::parse(section, format, width, height)?;
    let quattro = format == FORMAT_TRUE_QUATTRO;
    debug!(format, planes = ?header.planes, "decoding X3F TRUE layers");

    let decoded = run_tasks(threads, 3, |i| {
        let shift = usize::from(quattro && i < 2);
        header.decode_layer(section, i, shift, width, height)
    });

    let pitch = image.pitch();
    let mut results = Vec::with_capacity(3);
    {
        let pixels = image.pixels_u16_mut()?;
        for (c, (layer, result)) in decoded.into_iter().enumerate() {
            write_layer(pixels, pitch, width, height, c, &layer);
            results.push(result);
        }
    }
    collect_band_errors(image, results)?;

    if quattro {
        let (w, h) = header.planes[0];
        let pixels = image.pixels_u16_mut()?;
        for c in 0..2 {
            expand_layer(pixels, pitch, width, height, c, w, h);
        }
    }
    Ok(())
}

/// Copy a layer into component `c`, one sample per `1 << shift` pixels.
fn write_layer(pixels: &mut [u16], pitch: usize, width: usize, height: usize, c: usize, layer: &Layer) {
    if layer.columns == 0 {
        return;
    }
    for (y, row) in layer.values.chunks_exact(layer.columns).enumerate() {
        let out_y = y << layer.shift;
        if out_y >= height {
            break;
        }
        for (x, &v) in row.iter().enumerate() {
            let out_x = x << layer.shift;
            if out_x < width {
                pixels[out_y * pitch + out_x * 3 + c] = v;
            }
        }
    }
}

/// Fill each 2x2 block of half-resolution component `c` from its stored
/// top-left sample plus the local detail of component 2.
fn expand_layer(
    pixels: &mut [u16],
    pitch: usize,
    width: usize,
    height: usize,
    c: usize,
    layer_w: usize,
    layer_h: usize,
) {
    let at = |x: usize, y: usize, c: usize| y * pitch + x * 3 + c;
    for by in 0..layer_h.min(height.div_ceil(2)) {
        for bx in 0..layer_w.min(width.div_ceil(2)) {
            let cells: Vec<(usize, usize)> = [(0, 0), (1, 0), (0, 1), (1, 1)]
                .iter()
                .map(|&(dx, dy)| (bx * 2 + dx, by * 2 + dy))
                .filter(|&(x, y)| x < width && y < height)
                .collect();
            let n = cells.len() as i32;
            let sum: i32 = cells.iter().map(|&(x, y)| i32::from(pixels[at(x, y, 2)])).sum();
            let mid = (sum + n / 2) / n;
            let avg = i32::from(pixels[at(bx * 2, by * 2, c)]);
            for &(x, y) in &cells {
                let blue = i32::from(pixels[at(x, y, 2)]);
                pixels[at(x, y, c)] = (blue - mid + avg).clamp(0, 0xFFFF) as u16;
            }
        }
    }
}

// =============================================================================
// Huffman decoding
// =============================================================================

/// Bytes of curve and code table in front of the row data.
const HUFFMAN_HEADER_SIZE: usize = 1024 * 2 + 1024 * 4;

/// Longest code a Huffman section may declare.
const MAX_HUFFMAN_BITS: u32 = 26;

/// Bits looked up at once by [`CurveTable`].
const CURVE_LOOKUP_BITS: u32 = 12;

const NO_ENTRY: u16 = 0xFFFF;

/// Prefix table of a Huffman section mapping codes to curve indices.
///
/// Codes up to 12 bits resolve through one lookup of `(index << 5) |
/// length`; longer codes are matched one by one.
struct CurveTable {
    lookup_bits: u32,
    lookup: Vec<u16>,
    /// `(length, code, index)` of codes longer than the lookup
    long: Vec<(u32, u32, u16)>,
}

impl CurveTable {
    /// Build from 1024 words of `length << 27 | code`.
    fn new(words: &[u32]) -> Result<Self, DecodeError> {
        let max_len = words.iter().map(|w| w >> 27).max().unwrap_or(0);
        if max_len > MAX_HUFFMAN_BITS {
            return Err(DecodeError::corrupt(format!(
                "X3F code length {max_len} exceeds {MAX_HUFFMAN_BITS}"
            )));
        }
        let lookup_bits = max_len.min(CURVE_LOOKUP_BITS);
        let mut lookup = vec![NO_ENTRY; 1 << lookup_bits];
        let mut long = Vec::new();

        for (index, &word) in words.iter().enumerate() {
            let len = word >> 27;
            if len == 0 {
                continue;
            }
            let code = word & ((1 << len) - 1);
            if len > lookup_bits {
                long.push((len, code, index as u16));
                continue;
            }
            let spare = lookup_bits - len;
            let first = (code << spare) as usize;
            for slot in &mut lookup[first..first + (1 << spare)] {
                *slot = ((index as u16) << 5) | len as u16;
            }
        }
        long.sort_by_key(|&(len, _, _)| len);
        Ok(Self {
            lookup_bits,
            lookup,
            long,
        })
    }

    fn decode(&self, pump: &mut MsbPump<'_>) -> Result<usize, DecodeError> {
        let entry = self.lookup[pump.peek_bits(self.lookup_bits) as usize];
        if entry != NO_ENTRY {
            pump.skip_bits(u32::from(entry & 31))?;
            return Ok(usize::from(entry >> 5));
        }
        for &(len, code, index) in &self.long {
            if pump.peek_bits(len) == code {
                pump.skip_bits(len)?;
                return Ok(usize::from(index));
            }
        }
        Err(DecodeError::corrupt("invalid X3F Huffman value"))
    }
}

/// Decode a Huffman section into a three-component image.
///
/// `section` must be the whole section; the row table sits at its end.
pub fn decode_huffman(image: &mut RawImage, section: &[u8], threads: usize) -> Result<(), DecodeError> {
    if image.cpp() != 3 {
        return Err(DecodeError::unsupported("X3F output needs three components"));
    }
    let (width, height) = (image.width(), image.height());
    let mut cursor = ByteCursor::new(section, ByteOrder::LittleEndian);
    let curve = (0..1024)
        .map(|_| cursor.get_i16().map(i32::from))
        .collect::<Result<Vec<_>, _>>()?;
    let words = (0..1024)
        .map(|_| cursor.get_u32())
        .collect::<Result<Vec<_>, _>>()?;
    let table = CurveTable::new(&words)?;

    let rows_at = section
        .len()
        .checked_sub(height * 4)
        .filter(|&p| p >= HUFFMAN_HEADER_SIZE)
        .ok_or_else(|| {
            DecodeError::Truncated(format!("X3F section too short for {height} row offsets"))
        })?;
    cursor.seek(rows_at)?;
    let rows = (0..height)
        .map(|_| cursor.get_u32().map(|o| HUFFMAN_HEADER_SIZE.saturating_add(o as usize)))
        .collect::<Result<Vec<_>, _>>()?;

    decode_bands(image, threads, |plane| {
        for y in 0..plane.height() {
            let start = rows[plane.y_offset() + y];
            let data = section.get(start..).ok_or_else(|| {
                DecodeError::Truncated(format!("X3F row {} starts past the end", plane.y_offset() + y))
            })?;
            let mut pump = MsbPump::new(data);
            let mut pred = [0i32; 3];
            let row = plane.row_mut(y);
            for x in 0..width {
                for (c, p) in pred.iter_mut().enumerate() {
                    *p = p.wrapping_add(curve[table.decode(&mut pump)?]);
                    row[x * 3 + c] = (*p).clamp(0, 0xFFFF) as u16;
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::SampleType;

    /// MSB-first bit writer.
    #[derive(Default)]
    struct Bits {
        out: Vec<u8>,
        acc: u64,
        n: u32,
    }

    impl Bits {
        fn put(&mut self, value: u32, bits: u32) {
            for i in (0..bits).rev() {
                self.acc = (self.acc << 1) | u64::from((value >> i) & 1);
                self.n += 1;
                if self.n == 8 {
                    self.out.push(self.acc as u8);
                    self.acc = 0;
                    self.n = 0;
                }
            }
        }

        fn finish(mut self) -> Vec<u8> {
            if self.n > 0 {
                self.out.push((self.acc << (8 - self.n)) as u8);
            }
            self.out
        }
    }

    /// `(length, code)` of difference sizes 0 to 8; larger sizes share 0xFF.
    const CODES: [(u8, u8); 9] = [
        (2, 0x00),
        (2, 0x40),
        (2, 0x80),
        (3, 0xC0),
        (4, 0xE0),
        (5, 0xF0),
        (6, 0xF8),
        (7, 0xFC),
        (8, 0xFE),
    ];

    fn table_bytes(count: usize) -> Vec<u8> {
        (0..count)
            .flat_map(|i| {
                let (len, code) = CODES.get(i).copied().unwrap_or((8, 0xFF));
                [len, code]
            })
            .collect()
    }

    fn put_diff(bits: &mut Bits, d: i32) {
        let size = 32 - d.unsigned_abs().leading_zeros();
        let (len, code) = CODES[size as usize];
        bits.put(u32::from(code) >> (8 - len), u32::from(len));
        let raw = if d < 0 { d + (1 << size) - 1 } else { d };
        bits.put(raw as u32, size);
    }

    fn stream(diffs: &[i32]) -> Vec<u8> {
        let mut bits = Bits::default();
        for &d in diffs {
            put_diff(&mut bits, d);
        }
        bits.finish()
    }

    fn pad16(mut data: Vec<u8>) -> Vec<u8> {
        data.resize(data.len().div_ceil(16) * 16, 0);
        data
    }

    fn true_section(dims: Option<[(u16, u16); 3]>, pred: [u16; 3], layers: [Vec<u8>; 3]) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(dims) = dims {
            for (w, h) in dims {
                out.extend_from_slice(&w.to_le_bytes());
                out.extend_from_slice(&h.to_le_bytes());
            }
        }
        for p in pred {
            out.extend_from_slice(&p.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0]);
        out.extend(table_bytes(if dims.is_some() { 15 } else { 13 }));
        out.extend(vec![0u8; if dims.is_some() { 6 } else { 2 }]);
        for layer in &layers {
            out.extend_from_slice(&(layer.len() as u32).to_le_bytes());
        }
        for layer in layers {
            out.extend(pad16(layer));
        }
        out
    }

    fn image(width: usize, height: usize) -> RawImage {
        RawImage::new(width, height, 3, SampleType::U16).unwrap()
    }

    fn component(img: &RawImage, c: usize, y: usize) -> Vec<u16> {
        (0..img.width()).map(|x| img.get_u16(x, y, c).unwrap()).collect()
    }

    // -------------------------------------------------------------------------
    // Tables
    // -------------------------------------------------------------------------

    #[test]
    fn test_difference_sign() {
        assert_eq!(difference(0, 2), -3);
        assert_eq!(difference(1, 2), -2);
        assert_eq!(difference(2, 2), 2);
        assert_eq!(difference(3, 2), 3);
        assert_eq!(difference(0, 0), 0);
    }

    #[test]
    fn test_true_table_fast_and_slow_codes() {
        let table = TrueTable::new(&table_bytes(13)).unwrap();
        // 200 and -255 need 8 value bits behind an 8-bit code, past the lookup
        let diffs = [0, 1, -1, 3, -2, 17, 200, -255, 0];
        let data = stream(&diffs);
        let mut pump = MsbPump::new(&data);
        for &d in &diffs {
            assert_eq!(table.decode(&mut pump).unwrap(), d);
        }
    }

    #[test]
    fn test_true_table_rejects_long_codes() {
        let mut pairs = table_bytes(13);
        pairs[0] = 9;
        assert!(matches!(TrueTable::new(&pairs), Err(DecodeError::Corrupt { .. })));
    }

    #[test]
    fn test_true_table_unknown_code() {
        // only 00 and 01 prefixes are assigned
        let table = TrueTable::new(&[2, 0x00, 2, 0x40]).unwrap();
        let mut pump = MsbPump::new(&[0xFF, 0xFF, 0xFF]);
        assert!(matches!(table.decode(&mut pump), Err(DecodeError::Corrupt { .. })));
    }

    // -------------------------------------------------------------------------
    // TRUE
    // -------------------------------------------------------------------------

    #[test]
    fn test_true_layers() {
        let layer = || stream(&[1, 2, 3, 4, -1, 0, 5, -5]);
        let section = true_section(None, [100, 200, 300], [layer(), layer(), layer()]);
        let mut img = image(4, 2);
        decode_true(&mut img, &section, FORMAT_TRUE, 2).unwrap();

        for (c, p) in [100u16, 200, 300].into_iter().enumerate() {
            assert_eq!(component(&img, c, 0), [p + 1, p + 2, p + 4, p + 6]);
            assert_eq!(component(&img, c, 1), [p - 1, p, p + 4, p - 5]);
        }
        assert!(img.errors().is_empty());
    }

    #[test]
    fn test_true_rows_predict_from_same_parity() {
        // row 2 continues from row 0, row 3 from row 1
        let diffs = [10, 20, 0, 0, 30, 40, 0, 0, 1, 1, 0, 0, 2, 2, 0, 0];
        let layer = || stream(&diffs);
        let section = true_section(None, [0, 0, 0], [layer(), layer(), layer()]);
        let mut img = image(4, 4);
        decode_true(&mut img, &section, FORMAT_TRUE, 1).unwrap();
        assert_eq!(component(&img, 0, 2), [11, 21, 11, 21]);
        assert_eq!(component(&img, 0, 3), [32, 42, 32, 42]);
    }

    #[test]
    fn test_truncated_layer_is_recorded() {
        let layer = stream(&[1, 2, 3, 4, -1, 0, 5, -5]);
        let mut section = true_section(None, [100, 200, 300], [layer.clone(), layer.clone(), layer]);
        // the last layer loses all but its first byte
        let keep = section.len() - 15;
        section.truncate(keep);
        let mut img = image(4, 2);
        decode_true(&mut img, &section, FORMAT_TRUE, 1).unwrap();
        assert_eq!(img.errors().len(), 1);
        assert_eq!(component(&img, 0, 1), [99, 100, 104, 95]);
    }

    #[test]
    fn test_quattro_expands_half_resolution_layers() {
        let top = stream(&[1, 2, 3, 4]);
        let middle = stream(&[0, 0, 0, 0]);
        // bottom layer: one bright sample in each of the top two blocks
        let bottom = stream(&[
            10, 0, 0, 0, //
            0, 0, 0, 0, //
            -10, 0, 0, 0, //
            0, 0, 0, 0,
        ]);
        let dims = [(2, 2), (2, 2), (4, 4)];
        let section = true_section(Some(dims), [100, 200, 500], [top, middle, bottom]);
        let mut img = image(4, 4);
        decode_true(&mut img, &section, FORMAT_TRUE_QUATTRO, 3).unwrap();

        assert_eq!(component(&img, 2, 0), [510, 500, 510, 500]);
        // block mean of the bottom layer is 503 in the top blocks
        assert_eq!(component(&img, 0, 0), [108, 98, 109, 99]);
        assert_eq!(component(&img, 0, 1), [98, 98, 99, 99]);
        assert_eq!(component(&img, 0, 2), [103, 103, 104, 104]);
        assert_eq!(component(&img, 1, 0), [207, 197, 207, 197]);
    }

    #[test]
    fn test_true_needs_three_components() {
        let mut img = RawImage::new(4, 2, 1, SampleType::U16).unwrap();
        assert!(decode_true(&mut img, &[], FORMAT_TRUE, 1).is_err());
    }

    // -------------------------------------------------------------------------
    // Huffman
    // -------------------------------------------------------------------------

    fn huffman_section(rows: &[Vec<u8>]) -> Vec<u8> {
        let mut curve = [0i16; 1024];
        curve[1] = 5;
        curve[2] = -3;
        curve[3] = 1000;
        let mut words = [0u32; 1024];
        words[0] = 1 << 27;
        words[1] = (2 << 27) | 0b10;
        words[2] = (3 << 27) | 0b110;
        words[3] = (20 << 27) | (0b111 << 17) | 1;

        let mut out: Vec<u8> = curve.iter().flat_map(|v| v.to_le_bytes()).collect();
        out.extend(words.iter().flat_map(|w| w.to_le_bytes()));
        let mut offsets = Vec::new();
        for row in rows {
            offsets.push((out.len() - HUFFMAN_HEADER_SIZE) as u32);
            out.extend_from_slice(row);
        }
        out.extend(offsets.iter().flat_map(|o| o.to_le_bytes()));
        out
    }

    fn huffman_row(indices: &[u32]) -> Vec<u8> {
        let mut bits = Bits::default();
        for &i in indices {
            match i {
                0 => bits.put(0, 1),
                1 => bits.put(0b10, 2),
                2 => bits.put(0b110, 3),
                _ => bits.put((0b111 << 17) | 1, 20),
            }
        }
        bits.finish()
    }

    #[test]
    fn test_curve_table_long_codes() {
        let mut words = [0u32; 1024];
        words[0] = 1 << 27;
        words[7] = (20 << 27) | (0b111 << 17) | 1;
        let table = CurveTable::new(&words).unwrap();
        assert_eq!(table.lookup_bits, CURVE_LOOKUP_BITS);
        assert_eq!(table.long.len(), 1);

        let data = huffman_row(&[0, 3]);
        let mut pump = MsbPump::new(&data);
        assert_eq!(table.decode(&mut pump).unwrap(), 0);
        assert_eq!(table.decode(&mut pump).unwrap(), 7);
    }

    #[test]
    fn test_curve_table_rejects_long_lengths() {
        let mut words = [0u32; 1024];
        words[0] = 27 << 27;
        assert!(matches!(CurveTable::new(&words), Err(DecodeError::Corrupt { .. })));
    }

    #[test]
    fn test_huffman_rows() {
        let section = huffman_section(&[
            huffman_row(&[1, 3, 0, 1, 2, 2]),
            huffman_row(&[1, 1, 1, 1, 1, 1]),
        ]);
        let mut img = image(2, 2);
        decode_huffman(&mut img, &section, 2).unwrap();

        let px = |x, y| [0, 1, 2].map(|c| img.get_u16(x, y, c).unwrap());
        assert_eq!(px(0, 0), [5, 1000, 0]);
        // the running value goes negative and is clamped
        assert_eq!(px(1, 0), [10, 997, 0]);
        assert_eq!(px(0, 1), [5, 5, 5]);
        assert_eq!(px(1, 1), [10, 10, 10]);
    }

    #[test]
    fn test_huffman_missing_row_table() {
        let mut img = image(2, 2);
        let err = decode_huffman(&mut img, &vec![0u8; HUFFMAN_HEADER_SIZE + 4], 1).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated(_)));
    }
}
