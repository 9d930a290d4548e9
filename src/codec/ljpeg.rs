//! Lossless JPEG (ITU T.81 process 14) decoder.
//!
//! Supports predictor 1 (left neighbour), 1 to 4 components, chroma
//! subsampling and vendor slice layouts. With slices, the JPEG stream is
//! the image cut into vertical slices and laid out one slice after the
//! other: consecutive stream groups fill a slice row by row before moving
//! to the next slice. The predictor still resets at each JPEG row, to the
//! first group of the previous JPEG row.
//!
//! Frames larger than the output (right or bottom edge) are decoded and the
//! excess discarded.

use tracing::debug;

use crate::bits::{BitPump, JpegPump};
use crate::error::DecodeError;
use crate::image::PlaneMut;
use crate::io::ByteCursor;
use crate::format::tiff::ByteOrder;

use super::huffman::HuffmanTable;

const M_SOF3: u8 = 0xC3;
const M_DHT: u8 = 0xC4;
const M_SOI: u8 = 0xD8;
const M_EOI: u8 = 0xD9;
const M_SOS: u8 = 0xDA;
const M_DQT: u8 = 0xDB;
const M_DRI: u8 = 0xDD;

/// One component of a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameComponent {
    pub id: u8,
    /// Horizontal sampling factor
    pub h: usize,
    /// Vertical sampling factor
    pub v: usize,
    table: usize,
}

/// The SOF3 frame header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SofInfo {
    pub width: usize,
    pub height: usize,
    pub precision: u32,
    pub components: Vec<FrameComponent>,
}

impl SofInfo {
    /// Components per sample group.
    pub fn cps(&self) -> usize {
        self.components.len()
    }

    pub fn is_subsampled(&self) -> bool {
        self.components.iter().any(|c| c.h != 1 || c.v != 1)
    }

    /// Largest horizontal sampling factor.
    pub fn max_h(&self) -> usize {
        self.components.iter().map(|c| c.h).max().unwrap_or(1)
    }

    pub fn max_v(&self) -> usize {
        self.components.iter().map(|c| c.v).max().unwrap_or(1)
    }
}

// =============================================================================
// Marker parsing
// =============================================================================

fn expect_soi(cursor: &mut ByteCursor<'_>) -> Result<(), DecodeError> {
    if cursor.get_u8()? != 0xFF || cursor.get_u8()? != M_SOI {
        return Err(DecodeError::corrupt(
            "image did not start with SOI, probably not lossless JPEG",
        ));
    }
    Ok(())
}

/// Advance to the next marker and return its code.
fn next_marker(cursor: &mut ByteCursor<'_>) -> Result<u8, DecodeError> {
    loop {
        if cursor.get_u8()? != 0xFF {
            continue;
        }
        let mut code = cursor.get_u8()?;
        while code == 0xFF {
            code = cursor.get_u8()?;
        }
        if code != 0x00 {
            return Ok(code);
        }
    }
}

fn parse_sof(cursor: &mut ByteCursor<'_>) -> Result<SofInfo, DecodeError> {
    let length = cursor.get_u16()? as usize;
    let precision = u32::from(cursor.get_u8()?);
    let height = cursor.get_u16()? as usize;
    let width = cursor.get_u16()? as usize;
    let cps = cursor.get_u8()? as usize;

    if precision > 16 || precision < 2 {
        return Err(DecodeError::unsupported(format!(
            "lossless JPEG precision of {precision} bits"
        )));
    }
    if cps == 0 || cps > 4 {
        return Err(DecodeError::unsupported(format!(
            "lossless JPEG with {cps} components"
        )));
    }
    if length != 8 + cps * 3 {
        return Err(DecodeError::corrupt("lossless JPEG frame header size mismatch"));
    }

    let mut components = Vec::with_capacity(cps);
    for _ in 0..cps {
        let id = cursor.get_u8()?;
        let sampling = cursor.get_u8()?;
        if cursor.get_u8()? != 0 {
            return Err(DecodeError::unsupported("quantized lossless JPEG components"));
        }
        components.push(FrameComponent {
            id,
            h: (sampling >> 4) as usize,
            v: (sampling & 0xF) as usize,
            table: 0,
        });
    }
    if components.iter().any(|c| c.h == 0 || c.v == 0 || c.h > 4 || c.v > 4) {
        return Err(DecodeError::corrupt("invalid sampling factors"));
    }

    Ok(SofInfo {
        width,
        height,
        precision,
        components,
    })
}

fn parse_dht(
    cursor: &mut ByteCursor<'_>,
    tables: &mut [Option<HuffmanTable>; 4],
    dng_compatible: bool,
) -> Result<(), DecodeError> {
    let mut remaining = (cursor.get_u16()? as usize)
        .checked_sub(2)
        .ok_or_else(|| DecodeError::corrupt("invalid DHT length"))?;
    while remaining > 0 {
        let b = cursor.get_u8()?;
        if b >> 4 != 0 {
            return Err(DecodeError::unsupported("AC Huffman table in lossless JPEG"));
        }
        let slot = (b & 0xF) as usize;
        if slot > 3 {
            return Err(DecodeError::corrupt("invalid Huffman table destination"));
        }
        if tables[slot].is_some() {
            return Err(DecodeError::corrupt("duplicate Huffman table definition"));
        }
        let counts = cursor.get_bytes(16)?;
        let total: usize = counts.iter().map(|&c| c as usize).sum();
        if remaining < 1 + 16 + total {
            return Err(DecodeError::corrupt("invalid DHT table length"));
        }
        let values = cursor.get_bytes(total)?;
        tables[slot] = Some(HuffmanTable::new(counts, values, dng_compatible)?);
        remaining -= 1 + 16 + total;
    }
    Ok(())
}

fn skip_segment(cursor: &mut ByteCursor<'_>) -> Result<(), DecodeError> {
    let length = cursor.get_u16()? as usize;
    cursor.skip(length.saturating_sub(2))?;
    Ok(())
}

/// Read the frame header of a lossless JPEG stream without decoding it.
pub fn get_sof(data: &[u8]) -> Result<SofInfo, DecodeError> {
    let mut cursor = ByteCursor::new(data, ByteOrder::BigEndian);
    expect_soi(&mut cursor)?;
    loop {
        match next_marker(&mut cursor)? {
            M_SOF3 => return parse_sof(&mut cursor),
            M_EOI => return Err(DecodeError::corrupt("could not locate start of frame")),
            M_SOI | 0xD0..=0xD7 => {}
            _ => skip_segment(&mut cursor)?,
        }
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// Lossless JPEG decoder over one compressed stream.
#[derive(Debug, Clone)]
pub struct LJpegDecoder<'a> {
    data: &'a [u8],
    slices: Vec<usize>,
    dng_compatible: bool,
    cfa: bool,
    specialised: bool,
}

/// One row of one slice: where it starts in the output and how many groups
/// it holds.
#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    groups: usize,
}

impl<'a> LJpegDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            slices: Vec::new(),
            dng_compatible: true,
            cfa: true,
            specialised: true,
        }
    }

    /// Slice widths in output samples, left to right.
    pub fn with_slices(mut self, slices: Vec<usize>) -> Self {
        self.slices = slices;
        self
    }

    /// Whether a 16-bit difference symbol is followed by 16 stored bits.
    pub fn dng_compatible(mut self, value: bool) -> Self {
        self.dng_compatible = value;
        self
    }

    /// Whether the output is single-component CFA data.
    pub fn cfa(mut self, value: bool) -> Self {
        self.cfa = value;
        self
    }

    #[cfg(test)]
    fn generic_only(mut self) -> Self {
        self.specialised = false;
        self
    }

    /// Decode the first scan into `plane` at pixel offset (`off_x`, `off_y`).
    ///
    /// Rows written before a stream error are kept; the error is returned
    /// for the caller to record or propagate.
    pub fn decode(
        &self,
        plane: &mut PlaneMut<'_>,
        off_x: usize,
        off_y: usize,
    ) -> Result<SofInfo, DecodeError> {
        if off_x >= plane.width() {
            return Err(DecodeError::corrupt("lossless JPEG x offset outside of image"));
        }
        if off_y >= plane.height() {
            return Err(DecodeError::corrupt("lossless JPEG y offset outside of image"));
        }

        let mut cursor = ByteCursor::new(self.data, ByteOrder::BigEndian);
        expect_soi(&mut cursor)?;
        let mut sof: Option<SofInfo> = None;
        let mut tables: [Option<HuffmanTable>; 4] = [None, None, None, None];

        loop {
            match next_marker(&mut cursor)? {
                M_SOF3 => sof = Some(parse_sof(&mut cursor)?),
                M_DHT => parse_dht(&mut cursor, &mut tables, self.dng_compatible)?,
                M_DQT => return Err(DecodeError::unsupported("quantization table in lossless JPEG")),
                M_SOS => {
                    let mut frame = sof
                        .take()
                        .ok_or_else(|| DecodeError::corrupt("scan before frame header"))?;
                    let (predictor, point_transform) = parse_sos(&mut cursor, &mut frame, &tables)?;
                    let entropy = cursor.rest();
                    self.decode_scan(plane, &frame, &tables, predictor, point_transform, entropy, off_x, off_y)?;
                    return Ok(frame);
                }
                M_EOI => return Err(DecodeError::corrupt("no scan in lossless JPEG stream")),
                M_DRI => return Err(DecodeError::unsupported("restart intervals in lossless JPEG")),
                M_SOI | 0xD0..=0xD7 => {}
                _ => skip_segment(&mut cursor)?,
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn decode_scan(
        &self,
        plane: &mut PlaneMut<'_>,
        frame: &SofInfo,
        tables: &[Option<HuffmanTable>; 4],
        predictor: u8,
        point_transform: u32,
        entropy: &[u8],
        off_x: usize,
        off_y: usize,
    ) -> Result<(), DecodeError> {
        if frame.width == 0 || frame.height == 0 {
            return Err(DecodeError::corrupt("lossless JPEG frame has zero size"));
        }
        if predictor != 1 {
            return Err(DecodeError::unsupported(format!(
                "lossless JPEG predictor {predictor}"
            )));
        }
        let cps = frame.cps();
        let cpp = plane.cpp();
        let subsampled = frame.is_subsampled();
        if subsampled {
            if self.cfa {
                return Err(DecodeError::unsupported(
                    "cannot decode subsampled image to CFA data",
                ));
            }
            if cpp != cps {
                return Err(DecodeError::unsupported(
                    "subsampled component count does not match image",
                ));
            }
        }
        if point_transform + 1 >= frame.precision {
            return Err(DecodeError::corrupt("point transform exceeds precision"));
        }

        let huff = frame
            .components
            .iter()
            .map(|c| tables[c.table].as_ref())
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DecodeError::corrupt("scan refers to an undefined Huffman table"))?;

        let max_h = frame.max_h();
        let max_v = frame.max_v();
        let group = max_h * cps;
        let out_row = plane.width() * cpp;

        // Columns and rows of the frame that fall outside the output
        let needed = frame.width * cps + off_x * cpp;
        let skip_x = if needed > out_row { (needed - out_row) / cps } else { 0 };
        let skip_y = (frame.height + off_y).saturating_sub(plane.height());
        if skip_x > 0 && subsampled {
            return Err(DecodeError::unsupported(
                "subsampled lossless JPEG wider than the image",
            ));
        }

        let mut slices = self.slices.clone();
        if slices.len() <= 1 {
            slices = vec![frame.width * cps];
        }
        if skip_x > 0 {
            let last = slices
                .last_mut()
                .ok_or_else(|| DecodeError::corrupt("no slices"))?;
            *last = last
                .checked_sub(skip_x * cps)
                .ok_or_else(|| DecodeError::corrupt("slice narrower than the cropped edge"))?;
        }

        let rows = frame.height - skip_y;
        let pitch = plane.pitch();
        let mut segments = Vec::with_capacity(slices.len() * rows.div_ceil(max_v));
        let mut col = off_x * cpp;
        for &width in &slices {
            let mut t_y = 0;
            while t_y < rows {
                segments.push(Segment {
                    start: (off_y + t_y) * pitch + col,
                    groups: width / group,
                });
                t_y += max_v;
            }
            col += width;
        }
        debug!(
            width = frame.width,
            height = frame.height,
            cps,
            slices = slices.len(),
            skip_x,
            skip_y,
            "decoding lossless JPEG scan"
        );

        let scan = Scan {
            segments,
            groups_per_row: (frame.width - skip_x) / max_h,
            rows,
            skip_x,
            pitch,
            base: 1i32 << (frame.precision - point_transform - 1),
        };
        let out = plane.data_mut();
        let mut pump = JpegPump::new(entropy);

        if !self.specialised {
            return scan.generic(frame, &huff, out, &mut pump);
        }
        let sampling: Vec<(usize, usize)> = frame.components.iter().map(|c| (c.h, c.v)).collect();
        match sampling.as_slice() {
            [(1, 1)] => scan.interleaved::<1>(&huff, out, &mut pump),
            [(1, 1), (1, 1)] => scan.interleaved::<2>(&huff, out, &mut pump),
            [(1, 1), (1, 1), (1, 1)] => scan.interleaved::<3>(&huff, out, &mut pump),
            [(1, 1), (1, 1), (1, 1), (1, 1)] => scan.interleaved::<4>(&huff, out, &mut pump),
            [(2, 1), (1, 1), (1, 1)] => scan.subsampled::<2, 1>(&huff, out, &mut pump),
            [(2, 2), (1, 1), (1, 1)] => scan.subsampled::<2, 2>(&huff, out, &mut pump),
            _ => scan.generic(frame, &huff, out, &mut pump),
        }
    }
}

// =============================================================================
// Scan loops
// =============================================================================

/// Output layout of one scan, shared by the generic and specialised loops.
#[derive(Debug)]
struct Scan {
    segments: Vec<Segment>,
    groups_per_row: usize,
    rows: usize,
    /// Groups decoded and discarded at the end of every row
    skip_x: usize,
    pitch: usize,
    /// Initial predictor
    base: i32,
}

fn next_segment(segments: &mut std::slice::Iter<'_, Segment>) -> Result<Segment, DecodeError> {
    let seg = segments
        .next()
        .ok_or_else(|| DecodeError::corrupt("ran out of slices"))?;
    if seg.groups == 0 {
        return Err(DecodeError::corrupt("empty lossless JPEG slice"));
    }
    Ok(*seg)
}

fn write_outside() -> DecodeError {
    DecodeError::corrupt("lossless JPEG write outside of image")
}

impl Scan {
    /// Any sampling layout, one component sample at a time.
    fn generic(
        &self,
        frame: &SofInfo,
        huff: &[&HuffmanTable],
        out: &mut [u16],
        pump: &mut JpegPump<'_>,
    ) -> Result<(), DecodeError> {
        let cps = frame.cps();
        let max_v = frame.max_v();
        let group = frame.max_h() * cps;
        let mut pred = [self.base; 4];

        let mut segments = self.segments.iter();
        let mut dest = 0usize;
        let mut remaining = 0usize;
        let mut row_start = 0usize;
        let mut y = 0;
        while y < self.rows {
            for g in 0..self.groups_per_row {
                if remaining == 0 {
                    let seg = next_segment(&mut segments)?;
                    dest = seg.start;
                    remaining = seg.groups;
                }
                if g == 0 {
                    row_start = dest;
                }
                for (i, comp) in frame.components.iter().enumerate() {
                    for y2 in 0..comp.v {
                        for x2 in 0..comp.h {
                            pred[i] = pred[i].wrapping_add(huff[i].decode_diff(pump)?);
                            let idx = dest + x2 * cps + y2 * self.pitch + i;
                            *out.get_mut(idx).ok_or_else(write_outside)? = pred[i] as u16;
                        }
                    }
                }
                dest += group;
                remaining -= 1;
            }

            for _ in 0..self.skip_x {
                for table in huff {
                    table.decode_diff(pump)?;
                }
            }

            for (i, p) in pred.iter_mut().enumerate().take(cps) {
                *p = i32::from(out[row_start + i]);
            }
            pump.check_position()?;
            y += max_v;
        }
        Ok(())
    }

    /// `N` components without subsampling.
    fn interleaved<const N: usize>(
        &self,
        huff: &[&HuffmanTable],
        out: &mut [u16],
        pump: &mut JpegPump<'_>,
    ) -> Result<(), DecodeError> {
        let huff = <[&HuffmanTable; N]>::try_from(huff)
            .map_err(|_| DecodeError::corrupt("Huffman table count mismatch"))?;
        let mut pred = [self.base; N];

        let mut segments = self.segments.iter();
        let mut dest = 0usize;
        let mut remaining = 0usize;
        let mut row_start = 0usize;
        for _ in 0..self.rows {
            for g in 0..self.groups_per_row {
                if remaining == 0 {
                    let seg = next_segment(&mut segments)?;
                    dest = seg.start;
                    remaining = seg.groups;
                }
                if g == 0 {
                    row_start = dest;
                }
                let pixel = out.get_mut(dest..dest + N).ok_or_else(write_outside)?;
                for ((p, table), sample) in pred.iter_mut().zip(huff).zip(pixel) {
                    *p = p.wrapping_add(table.decode_diff(pump)?);
                    *sample = *p as u16;
                }
                dest += N;
                remaining -= 1;
            }

            for _ in 0..self.skip_x {
                for table in huff {
                    table.decode_diff(pump)?;
                }
            }

            for (i, p) in pred.iter_mut().enumerate() {
                *p = i32::from(out[row_start + i]);
            }
            pump.check_position()?;
        }
        Ok(())
    }

    /// Three components where the first is sampled `H` x `V` times per
    /// group: 4:2:2 is `<2, 1>`, 4:2:0 is `<2, 2>`. Chroma lands after the
    /// first luma sample and the remaining slots are left for the caller
    /// to interpolate.
    fn subsampled<const H: usize, const V: usize>(
        &self,
        huff: &[&HuffmanTable],
        out: &mut [u16],
        pump: &mut JpegPump<'_>,
    ) -> Result<(), DecodeError> {
        let [luma, cb, cr] = <[&HuffmanTable; 3]>::try_from(huff)
            .map_err(|_| DecodeError::corrupt("Huffman table count mismatch"))?;
        let group = H * 3;
        let pitch = self.pitch;
        let mut pred = [self.base; 3];

        let mut segments = self.segments.iter();
        let mut dest = 0usize;
        let mut remaining = 0usize;
        let mut row_start = 0usize;
        for _ in (0..self.rows).step_by(V) {
            for g in 0..self.groups_per_row {
                if remaining == 0 {
                    let seg = next_segment(&mut segments)?;
                    dest = seg.start;
                    remaining = seg.groups;
                }
                if g == 0 {
                    row_start = dest;
                }
                if dest + (V - 1) * pitch + (H - 1) * 3 >= out.len() {
                    return Err(write_outside());
                }
                for y2 in 0..V {
                    for x2 in 0..H {
                        pred[0] = pred[0].wrapping_add(luma.decode_diff(pump)?);
                        out[dest + x2 * 3 + y2 * pitch] = pred[0] as u16;
                    }
                }
                pred[1] = pred[1].wrapping_add(cb.decode_diff(pump)?);
                out[dest + 1] = pred[1] as u16;
                pred[2] = pred[2].wrapping_add(cr.decode_diff(pump)?);
                out[dest + 2] = pred[2] as u16;
                dest += group;
                remaining -= 1;
            }

            for (i, p) in pred.iter_mut().enumerate() {
                *p = i32::from(out[row_start + i]);
            }
            pump.check_position()?;
        }
        Ok(())
    }
}

/// Parse a scan header; returns (predictor, point transform).
fn parse_sos(
    cursor: &mut ByteCursor<'_>,
    frame: &mut SofInfo,
    tables: &[Option<HuffmanTable>; 4],
) -> Result<(u8, u32), DecodeError> {
    let _length = cursor.get_u16()?;
    let count = cursor.get_u8()? as usize;
    if count != frame.cps() {
        return Err(DecodeError::corrupt("scan component count mismatch"));
    }
    for _ in 0..count {
        let selector = cursor.get_u8()?;
        let comp = frame
            .components
            .iter_mut()
            .find(|c| c.id == selector)
            .ok_or_else(|| DecodeError::corrupt("invalid component selector"))?;
        let td = (cursor.get_u8()? >> 4) as usize;
        if td > 3 || tables[td].is_none() {
            return Err(DecodeError::corrupt("invalid Huffman table selection"));
        }
        comp.table = td;
    }
    let predictor = cursor.get_u8()?;
    if predictor > 7 {
        return Err(DecodeError::corrupt("invalid predictor mode"));
    }
    cursor.skip(1)?;
    let point_transform = u32::from(cursor.get_u8()? & 0xF);
    Ok((predictor, point_transform))
}
