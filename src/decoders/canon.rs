//! Canon CR2 decoder.
//!
//! CR2 pixel data is lossless JPEG cut into vertical slices (tag 0xC640).
//! sRAW and mRAW files carry subsampled YCbCr instead of CFA data and are
//! converted to RGB after decoding. Pre-CR2 bodies listed with the
//! `old_format` hint store a single JPEG whose geometry sits in the stream
//! header.

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::codec::{get_sof, LJpegDecoder};
use crate::error::DecodeError;
use crate::format::tiff::{FieldType, Ifd, TiffRoot, TiffTag};
use crate::image::{CfaColor, ColorFilterArray, Point, RawImage, SampleType};
use crate::io::read_u16_be;

use super::{iso_speed, make_model, RawDecoder, Session};

const TAG_SHOT_INFO: u16 = 0x0004;
const TAG_MODEL_ID: u16 = 0x0010;
const TAG_POWERSHOT_G9_WB: u16 = 0x0029;
const TAG_OLD_WB: u16 = 0x00A4;
const TAG_COLOR_DATA: u16 = 0x4001;
/// Raw data location of the legacy layout.
const TAG_OLD_OFFSET: u16 = 0x0081;
const TAG_OLD_CURVE: u16 = 0x0123;
/// Marks the raw directory.
const TAG_RAW_MARKER: u16 = 0xC5D8;
/// 4 for sRAW/mRAW.
const TAG_SRAW_TYPE: u16 = 0xC6C5;
/// Slice count, slice width and last slice width.
const TAG_CR2_SLICE: u16 = 0xC640;

const MAX_SLICES: usize = 15;
/// Default byte offset of the white balance levels in the color data.
const DEFAULT_WB_OFFSET: usize = 126;
/// Short index of the sRAW reconstruction coefficients in the color data.
const SRAW_COEFF_INDEX: usize = 78;

pub(super) struct Cr2Decoder;

impl RawDecoder for Cr2Decoder {
    fn version(&self) -> u32 {
        7
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        let (make, model) = make_model(session.root)?;
        let is_sraw = raw_directory(session.root)
            .and_then(|raw| raw.get_entry(TAG_SRAW_TYPE))
            .and_then(|e| e.get_u32(0).ok())
            == Some(4);
        let mode = if is_sraw { "sRaw1" } else { "" };
        session.check_camera_supported(&make, &model, mode, self.version())?;
        Ok(())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        if session.has_hint("old_format") {
            return decode_old_format(session);
        }
        decode_slices(session)
    }

    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError> {
        image.cfa = ColorFilterArray::new_2x2(
            CfaColor::Red,
            CfaColor::Green,
            CfaColor::Green,
            CfaColor::Blue,
        );
        let (make, model) = make_model(session.root)?;
        let mode = match (image.metadata.subsampling.x, image.metadata.subsampling.y) {
            (2, 2) => "sRaw1",
            (2, 1) => "sRaw2",
            _ => "",
        };
        match white_balance(session) {
            Ok(Some(wb)) => image.metadata.wb_coeffs = Some(wb),
            Ok(None) => {}
            Err(err) => image.add_error(format!("white balance: {err}")),
        }
        session.set_metadata(image, &make, &model, mode, iso_speed(session.root));
        Ok(())
    }
}

fn raw_directory(root: &TiffRoot) -> Option<&Ifd> {
    root.get_ifds_with_tag(TAG_RAW_MARKER).into_iter().next()
}

// =============================================================================
// Sliced CR2
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Slice {
    offset: u32,
    count: u32,
    /// Width in samples
    width: usize,
    y: usize,
}

fn decode_slices(session: &Session<'_>) -> Result<RawImage, DecodeError> {
    let raw = raw_directory(session.root)
        .ok_or_else(|| DecodeError::MissingRequiredTag("CR2 raw directory".to_string()))?;
    let offsets = raw.entry(TiffTag::StripOffsets)?.get_u32_array()?;
    let counts = raw.entry(TiffTag::StripByteCounts)?.get_u32_array()?;
    let file_len = session.file.len() as u64;

    let mut slices: Vec<Slice> = Vec::new();
    let mut complete_height = 0;
    let mut double_height = false;
    for (&offset, &count) in offsets.iter().zip(&counts) {
        let data = match session.stream(offset, count) {
            Ok(data) => data,
            Err(err) => {
                warn!(offset, error = %err, "skipping CR2 slice");
                continue;
            }
        };
        let sof = get_sof(data)?;
        let width = sof.width * sof.cps();
        if sof.cps() == 4 && width > sof.height * 4 {
            double_height = true;
        }
        if let Some(first) = slices.first() {
            if first.width != width {
                return Err(DecodeError::corrupt("CR2: slice width does not match"));
            }
        }
        if offset as u64 + count as u64 <= file_len {
            slices.push(Slice {
                offset,
                count,
                width,
                y: complete_height,
            });
        }
        complete_height += sof.height;
    }
    if let Some(value) = session.hint("canon_double_height") {
        double_height = value == "true";
    }
    let first = *slices
        .first()
        .ok_or_else(|| DecodeError::Truncated("CR2: no slices found".to_string()))?;
    if double_height {
        return Err(DecodeError::unsupported("CR2 double height slices"));
    }

    let sraw = raw
        .get_entry(TAG_SRAW_TYPE)
        .and_then(|e| e.get_u32(0).ok())
        .is_some_and(|v| v == 4);
    let cpp = if sraw { 3 } else { 1 };
    if sraw && session.has_hint("wrapped_cr2_slices") {
        return Err(DecodeError::unsupported("CR2 wrapped sRAW slices"));
    }
    let width = first.width / cpp;
    if raw.has_entry(TAG_SRAW_TYPE) && width < complete_height {
        return Err(DecodeError::unsupported("CR2 with flipped dimensions"));
    }

    let slice_widths = match raw.get_entry(TAG_CR2_SLICE) {
        Some(entry) => {
            let count = entry.get_u32(0)? as usize;
            if count + 1 > MAX_SLICES {
                return Err(DecodeError::unsupported(format!(
                    "CR2: {} slices, at most {MAX_SLICES} supported",
                    count + 1
                )));
            }
            let mut widths = vec![entry.get_u32(1)? as usize; count];
            widths.push(entry.get_u32(2)? as usize);
            widths
        }
        None => vec![first.width],
    };
    debug!(width, height = complete_height, cpp, slices = ?slice_widths, "CR2 geometry");

    let mut image = session.allocate(width, complete_height, cpp, SampleType::U16)?;
    image.is_cfa = !sraw;
    for (i, slice) in slices.iter().enumerate() {
        let result = session.stream(slice.offset, slice.count).and_then(|data| {
            let decoder = LJpegDecoder::new(data)
                .with_slices(slice_widths.clone())
                .dng_compatible(false)
                .cfa(!sraw);
            let mut plane = image.plane_mut()?;
            decoder.decode(&mut plane, 0, slice.y)
        });
        match result {
            Ok(sof) => {
                image.metadata.subsampling = Point::new(sof.max_h() as i64, sof.max_v() as i64);
            }
            Err(err) if i == 0 && !err.is_recoverable() => return Err(err),
            Err(err) => image.add_error(err.to_string()),
        }
    }

    let sub = image.metadata.subsampling;
    if sub.x > 1 || sub.y > 1 {
        let params = sraw_params(session, sub)?;
        match (sub.x, sub.y) {
            (2, 1) => interpolate_422(&mut image, &params)?,
            (2, 2) => interpolate_420(&mut image, &params)?,
            _ => {
                return Err(DecodeError::unsupported(format!(
                    "CR2 subsampling {}x{}",
                    sub.x, sub.y
                )))
            }
        }
    }
    Ok(image)
}

// =============================================================================
// Legacy layout
// =============================================================================

fn decode_old_format(session: &Session<'_>) -> Result<RawImage, DecodeError> {
    let root = session.root;
    let offset = match root.get_entry_recursive(TAG_OLD_OFFSET) {
        Some(entry) => entry.get_u32(0)?,
        None => root
            .get_ifds_with_tag(TiffTag::CfaPattern)
            .into_iter()
            .next()
            .and_then(|ifd| ifd.get_entry(TiffTag::StripOffsets))
            .ok_or_else(|| DecodeError::MissingRequiredTag("CR2 raw data offset".to_string()))?
            .get_u32(0)?,
    };
    let data = session.stream_from(offset)?;
    let geometry = data.get(41..45).ok_or_else(|| {
        DecodeError::Truncated("CR2 legacy header runs past the end of the file".to_string())
    })?;
    let height = read_u16_be(&geometry[0..2]) as usize;
    let width = read_u16_be(&geometry[2..4]) as usize;
    let double_line = session.has_hint("double_line_ljpeg");

    // Two lines may be coded as one double-width line
    let mut image = session.allocate(width * 2, height, 1, SampleType::U16)?;
    let result = image.plane_mut().and_then(|mut plane| {
        LJpegDecoder::new(data)
            .dng_compatible(false)
            .decode(&mut plane, 0, 0)
            .map(|_| ())
    });
    match result {
        Ok(()) => {}
        Err(err) if err.is_recoverable() => image.add_error(err.to_string()),
        Err(err) => return Err(err),
    }

    if double_line {
        image = unfold_double_lines(&image, width, height * 2)?;
    }

    if let Some(curve) = root.get_entry_recursive(TAG_OLD_CURVE) {
        if curve.field_type() == FieldType::Short && curve.count() == 4096 {
            session.set_table(&mut image, &curve.get_u16_array()?)?;
        }
    }
    Ok(image)
}

/// Split each double-width line back into an even and an odd line.
fn unfold_double_lines(
    folded: &RawImage,
    width: usize,
    height: usize,
) -> Result<RawImage, DecodeError> {
    let mut image = RawImage::new(width, height, 1, SampleType::U16)?;
    for error in folded.errors() {
        image.add_error(error.clone());
    }
    let src = folded.pixels_u16()?;
    let src_pitch = folded.pitch();
    let dst_pitch = image.pitch();
    let dst = image.pixels_u16_mut()?;
    for y in 0..height {
        let start = (y / 2) * src_pitch + if y % 2 == 0 { 0 } else { width };
        dst[y * dst_pitch..y * dst_pitch + width].copy_from_slice(&src[start..start + width]);
    }
    Ok(image)
}

// =============================================================================
// White balance
// =============================================================================

fn white_balance(session: &Session<'_>) -> Result<Option<[f32; 3]>, DecodeError> {
    let root = session.root;
    if let Some(color) = root.get_entry_recursive(TAG_COLOR_DATA) {
        let offset = match session.hint("wb_offset") {
            Some(value) => value.trim().parse().map_err(|_| {
                DecodeError::corrupt(format!("invalid wb_offset hint '{value}'"))
            })?,
            None => DEFAULT_WB_OFFSET,
        } / 2;
        return Ok(Some([
            f32::from(color.get_u16(offset)?),
            f32::from(color.get_u16(offset + 1)?),
            f32::from(color.get_u16(offset + 3)?),
        ]));
    }

    if let (Some(shot), Some(g9)) = (
        root.get_entry_recursive(TAG_SHOT_INFO),
        root.get_entry_recursive(TAG_POWERSHOT_G9_WB),
    ) {
        let index = shot.get_u16(7)? as usize;
        let offset = g9_wb_slot(index) * 8 + 2;
        let level = |i: usize| g9.get_u32(offset + i).map(|v| v as f32);
        return Ok(Some([
            level(1)?,
            (level(0)? + level(3)?) / 2.0,
            level(2)?,
        ]));
    }

    if let Some(wb) = root.get_entry_recursive(TAG_OLD_WB) {
        if wb.count() >= 3 {
            return Ok(Some([wb.get_f32(0)?, wb.get_f32(1)?, wb.get_f32(2)?]));
        }
    }
    Ok(None)
}

/// Slot of the PowerShot G9 level table for a white balance index.
fn g9_wb_slot(index: usize) -> usize {
    const SLOTS: &[u8] = b"012347800000005896";
    SLOTS.get(index).map_or(0, |&c| usize::from(c - b'0'))
}

// =============================================================================
// sRAW conversion
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SrawFormula {
    Standard,
    /// 40D
    Old,
    /// 5D Mark III and later
    New,
}

#[derive(Debug, Clone, Copy)]
struct SrawParams {
    coeffs: [i64; 3],
    /// Chroma bias, subtracted from Cb and Cr
    hue: i32,
    formula: SrawFormula,
}

impl SrawParams {
    #[inline]
    fn to_rgb(&self, y: i32, cb: i32, cr: i32) -> [u16; 3] {
        let (y, cb, cr) = (i64::from(y), i64::from(cb), i64::from(cr));
        let [c0, c1, c2] = self.coeffs;
        let (r, g, b) = match self.formula {
            SrawFormula::Standard => (
                c0 * (y + ((50 * cb + 22929 * cr) >> 12)),
                c1 * (y + ((-5640 * cb - 11751 * cr) >> 12)),
                c2 * (y + ((29040 * cb - 101 * cr) >> 12)),
            ),
            SrawFormula::Old => (
                c0 * (y + cr - 512),
                c1 * (y + ((-778 * cb - (cr << 11)) >> 12) - 512),
                c2 * (y + (cb - 512)),
            ),
            SrawFormula::New => (
                c0 * (y + cr),
                c1 * (y + ((-778 * cb - (cr << 11)) >> 12)),
                c2 * (y + cb),
            ),
        };
        let clamp = |v: i64| (v >> 8).clamp(0, 65535) as u16;
        [clamp(r), clamp(g), clamp(b)]
    }
}

fn sraw_params(session: &Session<'_>, sub: Point) -> Result<SrawParams, DecodeError> {
    let color = session
        .root
        .get_ifds_with_tag(TAG_COLOR_DATA)
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::MissingRequiredTag("CR2 sRAW color data".to_string()))?
        .entry(TAG_COLOR_DATA)?;
    let short = |i: usize| color.get_u16(SRAW_COEFF_INDEX + i).map(i64::from);
    let mut coeffs = [short(0)?, (short(1)? + short(2)? + 1) >> 1, short(3)?];
    if session.has_hint("invert_sraw_wb") {
        for i in [0, 2] {
            if coeffs[i] != 0 {
                coeffs[i] = (1024.0 / (coeffs[i] as f32 / 1024.0)) as i64;
            }
        }
    }

    let formula = if session.has_hint("sraw_new") {
        SrawFormula::New
    } else if session.has_hint("sraw_40d") && sub.y == 1 {
        SrawFormula::Old
    } else {
        SrawFormula::Standard
    };
    let hue = 16384 - sraw_hue(session, sub);
    debug!(?coeffs, hue, ?formula, "sRAW parameters");
    Ok(SrawParams {
        coeffs,
        hue,
        formula,
    })
}

/// Chroma offset correction; newer bodies round it differently.
fn sraw_hue(session: &Session<'_>, sub: Point) -> i32 {
    let area = (sub.x * sub.y) as i32;
    if session.has_hint("old_sraw_hue") {
        return area;
    }
    let Some(model_id) = session
        .root
        .get_entry_recursive(TAG_MODEL_ID)
        .and_then(|e| e.get_u32(0).ok())
    else {
        return 0;
    };
    if model_id >= 0x8000_0281 || model_id == 0x8000_0218 || session.has_hint("force_new_sraw_hue") {
        (area - 1) >> 1
    } else {
        area
    }
}

/// Chroma pairs of one full-chroma line, bias removed.
fn line_chroma(row: &[u16], pairs: usize, hue: i32) -> Vec<(i32, i32)> {
    (0..pairs)
        .map(|k| (i32::from(row[k * 6 + 1]) - hue, i32::from(row[k * 6 + 2]) - hue))
        .collect()
}

#[inline]
fn average(a: (i32, i32), b: (i32, i32)) -> (i32, i32) {
    ((a.0 + b.0) >> 1, (a.1 + b.1) >> 1)
}

#[inline]
fn store(row: &mut [u16], pixel: usize, params: &SrawParams, chroma: (i32, i32)) {
    let p = pixel * 3;
    let rgb = params.to_rgb(i32::from(row[p]), chroma.0, chroma.1);
    row[p..p + 3].copy_from_slice(&rgb);
}

fn check_sraw_geometry(image: &RawImage, rows_multiple: usize) -> Result<usize, DecodeError> {
    if image.cpp() != 3 || image.width() < 2 || image.width() % 2 != 0 {
        return Err(DecodeError::unsupported(format!(
            "sRAW image {}x{} with {} components",
            image.width(),
            image.height(),
            image.cpp()
        )));
    }
    if image.height() % rows_multiple != 0 {
        return Err(DecodeError::unsupported("sRAW 4:2:0 image with odd height"));
    }
    Ok(image.width() / 2)
}

/// 4:2:2: chroma on even pixels, odd pixels take the mean of their
/// neighbours.
fn interpolate_422(image: &mut RawImage, params: &SrawParams) -> Result<(), DecodeError> {
    let pairs = check_sraw_geometry(image, 1)?;
    let pitch = image.pitch();
    let data = image.pixels_u16_mut()?;
    data.par_chunks_mut(pitch).for_each(|row| {
        let chroma = line_chroma(row, pairs, params.hue);
        for (k, &c) in chroma.iter().enumerate() {
            let right = chroma.get(k + 1).map_or(c, |&n| average(c, n));
            store(row, k * 2, params, c);
            store(row, k * 2 + 1, params, right);
        }
    });
    Ok(())
}

/// 4:2:0: chroma on even pixels of even lines, interpolated from up to
/// four neighbours elsewhere. The last line pair repeats its chroma.
fn interpolate_420(image: &mut RawImage, params: &SrawParams) -> Result<(), DecodeError> {
    let pairs = check_sraw_geometry(image, 2)?;
    let pitch = image.pitch();
    let data = image.pixels_u16_mut()?;
    let chroma: Vec<Vec<(i32, i32)>> = data
        .chunks(pitch * 2)
        .map(|lines| line_chroma(lines, pairs, params.hue))
        .collect();

    data.par_chunks_mut(pitch * 2)
        .enumerate()
        .for_each(|(j, lines)| {
            let (even, odd) = lines.split_at_mut(pitch);
            let cur = &chroma[j];
            let below = chroma.get(j + 1);
            for (k, &c) in cur.iter().enumerate() {
                let Some(below) = below else {
                    for pixel in [k * 2, k * 2 + 1] {
                        store(even, pixel, params, c);
                        store(odd, pixel, params, c);
                    }
                    continue;
                };
                let right = cur.get(k + 1).map_or(c, |&n| average(c, n));
                let down = average(c, below[k]);
                let diagonal = match (cur.get(k + 1), below.get(k + 1)) {
                    (Some(_), Some(&d)) => (
                        (c.0 + right.0 + down.0 + d.0) >> 2,
                        (c.1 + right.1 + down.1 + d.1) >> 2,
                    ),
                    _ => down,
                };
                store(even, k * 2, params, c);
                store(even, k * 2 + 1, params, right);
                store(odd, k * 2, params, down);
                store(odd, k * 2 + 1, params, diagonal);
            }
        });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(formula: SrawFormula) -> SrawParams {
        SrawParams {
            coeffs: [256, 256, 256],
            hue: 16384,
            formula,
        }
    }

    // -------------------------------------------------------------------------
    // YCbCr conversion
    // -------------------------------------------------------------------------

    #[test]
    fn test_neutral_chroma_gives_grey() {
        let p = params(SrawFormula::Standard);
        assert_eq!(p.to_rgb(1000, 0, 0), [1000, 1000, 1000]);
        let p = params(SrawFormula::New);
        assert_eq!(p.to_rgb(1000, 0, 0), [1000, 1000, 1000]);
    }

    #[test]
    fn test_old_formula_offsets() {
        let p = params(SrawFormula::Old);
        // green: 1000 + ((-778 * 512 - (512 << 11)) >> 12) - 512
        assert_eq!(p.to_rgb(1000, 512, 512), [1000, 134, 1000]);
    }

    #[test]
    fn test_conversion_clamps() {
        let p = params(SrawFormula::Standard);
        assert_eq!(p.to_rgb(0, -4000, -4000)[0], 0);
        assert_eq!(p.to_rgb(65535, 4000, 4000)[0], 65535);
    }

    #[test]
    fn test_g9_wb_slot() {
        assert_eq!(g9_wb_slot(0), 0);
        assert_eq!(g9_wb_slot(6), 8);
        assert_eq!(g9_wb_slot(17), 6);
        assert_eq!(g9_wb_slot(40), 0);
    }

    // -------------------------------------------------------------------------
    // Interpolation
    // -------------------------------------------------------------------------

    fn sraw_image(width: usize, height: usize, samples: &[[u16; 3]]) -> RawImage {
        let mut image = RawImage::new(width, height, 3, SampleType::U16).unwrap();
        let pitch = image.pitch();
        let data = image.pixels_u16_mut().unwrap();
        for (i, s) in samples.iter().enumerate() {
            let (x, y) = (i % width, i / width);
            data[y * pitch + x * 3..y * pitch + x * 3 + 3].copy_from_slice(s);
        }
        image
    }

    #[test]
    fn test_422_interpolates_odd_pixels() {
        let p = params(SrawFormula::New);
        // Y, Cb, Cr with a bias of 16384; odd pixels carry only Y
        let mut image = sraw_image(
            4,
            1,
            &[[1000, 16384 + 100, 16384], [1000, 0, 0], [1000, 16384 + 300, 16384], [1000, 0, 0]],
        );
        interpolate_422(&mut image, &p).unwrap();
        // blue = Y + Cb
        assert_eq!(image.get_u16(0, 0, 2), Some(1100));
        assert_eq!(image.get_u16(1, 0, 2), Some(1200));
        assert_eq!(image.get_u16(2, 0, 2), Some(1300));
        assert_eq!(image.get_u16(3, 0, 2), Some(1300));
    }

    #[test]
    fn test_420_interpolates_from_line_below() {
        let p = params(SrawFormula::New);
        let blank = [1000, 0, 0];
        let mut image = sraw_image(
            2,
            4,
            &[
                [1000, 16384 + 100, 16384],
                blank,
                blank,
                blank,
                [1000, 16384 + 300, 16384],
                blank,
                blank,
                blank,
            ],
        );
        interpolate_420(&mut image, &p).unwrap();
        assert_eq!(image.get_u16(0, 0, 2), Some(1100));
        assert_eq!(image.get_u16(0, 1, 2), Some(1200));
        // last line pair repeats its own chroma
        assert_eq!(image.get_u16(1, 3, 2), Some(1300));
    }

    #[test]
    fn test_420_rejects_odd_height() {
        let mut image = RawImage::new(2, 3, 3, SampleType::U16).unwrap();
        assert!(interpolate_420(&mut image, &params(SrawFormula::Standard)).is_err());
    }

    // -------------------------------------------------------------------------
    // Legacy layout
    // -------------------------------------------------------------------------

    #[test]
    fn test_unfold_double_lines() {
        let mut folded = RawImage::new(4, 1, 1, SampleType::U16).unwrap();
        folded.pixels_u16_mut().unwrap()[..4].copy_from_slice(&[1, 2, 3, 4]);
        let image = unfold_double_lines(&folded, 2, 2).unwrap();
        assert_eq!(image.get_u16(1, 0, 0), Some(2));
        assert_eq!(image.get_u16(0, 1, 0), Some(3));
    }
}
