//! Adobe DNG decoder.
//!
//! DNG describes everything the other decoders take from the camera
//! database: CFA layout, levels, crop and linearization all live in the
//! raw directory. Pixel data is plain strips, lossless JPEG strips or
//! tiles, or lossy JPEG tiles.

use std::io::Cursor;

use image::{ImageFormat, ImageReader};
use tracing::{debug, info, warn};

use crate::codec::{read_uncompressed, BitOrder, LJpegDecoder, StripLayout};
use crate::error::DecodeError;
use crate::format::tiff::{ByteOrder, FieldType, Ifd, TiffTag};
use crate::image::{
    BlackArea, CfaColor, ColorFilterArray, OpcodeList, PlaneMut, RawImage, Rect, SampleType,
};
use crate::threading::decode_bands_of;

use super::{dimensions, iso_speed, RawDecoder, Session};

const COMPRESSION_NONE: u32 = 1;
const COMPRESSION_LJPEG: u32 = 7;
const COMPRESSION_LOSSY: u32 = 0x884C;

const SAMPLE_FORMAT_UINT: u32 = 1;
const SAMPLE_FORMAT_FLOAT: u32 = 3;

const PHOTOMETRIC_CFA: u32 = 32803;

pub(super) struct DngDecoder;

impl RawDecoder for DngDecoder {
    fn version(&self) -> u32 {
        0
    }

    /// DNG files decode unless the database explicitly says otherwise, so
    /// an unlisted camera is never an error here.
    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        let version = dng_version(session)?;
        if version[0] != 1 {
            return Err(DecodeError::unsupported(format!(
                "DNG version {}.{}.{}.{}",
                version[0], version[1], version[2], version[3]
            )));
        }

        let (make, model) = match camera_names(session) {
            Some(names) => names,
            None => return Ok(()),
        };
        if session.has_camera(&make, &model, "dng") {
            session.check_camera_supported(&make, &model, "dng", self.version())?;
        }
        Ok(())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let raw = raw_directory(session)?;
        let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
        let bps = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)?;
        let sample_format = match raw.get_entry(TiffTag::SampleFormat) {
            Some(e) => e.get_u32(0)?,
            None => SAMPLE_FORMAT_UINT,
        };
        let sample = match sample_format {
            SAMPLE_FORMAT_UINT if bps <= 16 => SampleType::U16,
            SAMPLE_FORMAT_FLOAT if bps == 32 => SampleType::F32,
            SAMPLE_FORMAT_UINT => {
                return Err(DecodeError::unsupported(format!(
                    "DNG: {bps}-bit integer samples"
                )))
            }
            SAMPLE_FORMAT_FLOAT => {
                return Err(DecodeError::unsupported(format!(
                    "DNG: {bps}-bit floating point samples"
                )))
            }
            other => {
                return Err(DecodeError::unsupported(format!(
                    "DNG: sample format {other}"
                )))
            }
        };

        let (width, height) = dimensions(raw)?;
        let cpp = raw
            .get_entry(TiffTag::SamplesPerPixel)
            .map(|e| e.get_u32(0))
            .transpose()?
            .unwrap_or(1) as usize;
        let is_cfa = raw
            .get_entry(TiffTag::PhotometricInterpretation)
            .and_then(|e| e.get_u32(0).ok())
            == Some(PHOTOMETRIC_CFA);

        let mut image = if compression == COMPRESSION_LOSSY {
            // DCT data has no lower bound on bytes per sample
            RawImage::new(width, height, cpp, sample)?
        } else {
            session.allocate(width, height, cpp, sample)?
        };
        image.is_cfa = is_cfa;
        if is_cfa {
            image.cfa = read_cfa(raw)?;
        }
        debug!(width, height, cpp, bps, compression, is_cfa, "DNG raw directory");

        match compression {
            COMPRESSION_NONE => decode_strips(session, raw, &mut image, bps)?,
            COMPRESSION_LJPEG | COMPRESSION_LOSSY => {
                if sample != SampleType::U16 {
                    return Err(DecodeError::unsupported(
                        "DNG: compressed data must be 16-bit unsigned",
                    ));
                }
                let fix_ljpeg = dng_version(session)?[1] < 1;
                decode_compressed(session, raw, &mut image, compression, fix_ljpeg)?;
            }
            other => {
                return Err(DecodeError::UnsupportedCompression {
                    decoder: "DNG",
                    compression: other,
                })
            }
        }

        apply_crop(session, raw, &mut image)?;

        if session.options.apply_stage1_opcodes {
            if let Some(entry) = raw.get_entry(TiffTag::OpcodeList1) {
                let result = OpcodeList::parse(entry.data(), &image)
                    .and_then(|list| list.apply(&mut image));
                if let Err(err) = result {
                    image.add_error(format!("opcode list 1: {err}"));
                }
            }
        }

        if let Some(table) = raw.get_entry(TiffTag::LinearizationTable) {
            session.set_table(&mut image, &table.get_u16_array()?)?;
        }

        image.white_point = match raw.get_entry(TiffTag::WhiteLevel) {
            Some(white) if white.is_int() => white.get_u32(0)?,
            _ => ((1u64 << bps.min(32)) - 1) as u32,
        };
        set_black(raw, &mut image)?;
        Ok(image)
    }

    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError> {
        let root = session.root;
        image.metadata.iso = iso_speed(root);

        if let Some(neutral) = root.get_entry_recursive(TiffTag::AsShotNeutral) {
            if neutral.count() == 3 {
                let values = neutral.get_f32_array()?;
                image.metadata.wb_coeffs = wb_from_neutral(&values);
            }
        }

        let (Some(make), Some(model)) = (
            root.get_entry_recursive(TiffTag::Make),
            root.get_entry_recursive(TiffTag::Model),
        ) else {
            return Ok(());
        };
        let make = make.get_string().trim().to_string();
        let model = model.get_string().trim().to_string();

        let cameras = &session.options.cameras;
        let camera = cameras
            .find(&make, &model, "dng")
            .or_else(|| cameras.find(&make, &model, ""));
        match camera {
            Some(camera) => {
                image.metadata.canonical_make =
                    camera.canonical_make.clone().unwrap_or_else(|| make.clone());
                image.metadata.canonical_model =
                    camera.canonical_model.clone().unwrap_or_else(|| model.clone());
            }
            None => {
                image.metadata.canonical_make = make.clone();
                image.metadata.canonical_model = model.clone();
            }
        }
        image.metadata.make = make;
        image.metadata.model = model;
        image.metadata.mode = "dng".to_string();
        Ok(())
    }
}

fn dng_version(session: &Session<'_>) -> Result<[u8; 4], DecodeError> {
    let entry = session
        .root
        .get_entry_recursive(TiffTag::DngVersion)
        .ok_or_else(|| DecodeError::MissingRequiredTag("DNGVersion".to_string()))?;
    match entry.data() {
        [a, b, c, d, ..] => Ok([*a, *b, *c, *d]),
        _ => Err(DecodeError::corrupt("DNGVersion has fewer than 4 bytes")),
    }
}

/// Make and model, or the unique camera model for both when they are
/// missing.
fn camera_names(session: &Session<'_>) -> Option<(String, String)> {
    let root = session.root;
    if let Some(ifd) = root.get_ifds_with_tag(TiffTag::Model).into_iter().next() {
        if let Some(make) = ifd.get_entry(TiffTag::Make) {
            let model = ifd.get_entry(TiffTag::Model)?.get_string();
            return Some((make.get_string(), model));
        }
    }
    let unique = root.get_entry_recursive(TiffTag::UniqueCameraModel)?.get_string();
    Some((unique.clone(), unique))
}

/// First full-resolution directory with a supported compression.
fn raw_directory<'r>(session: &Session<'r>) -> Result<&'r Ifd, DecodeError> {
    let candidates = session.root.get_ifds_with_tag(TiffTag::Compression);
    if candidates.is_empty() {
        return Err(DecodeError::MissingRequiredTag("Compression".to_string()));
    }
    let mut usable = candidates.into_iter().filter(|ifd| {
        let compression = ifd
            .get_entry(TiffTag::Compression)
            .and_then(|e| e.get_u32(0).ok());
        let reduced = ifd
            .get_entry(TiffTag::NewSubFileType)
            .and_then(|e| e.get_u32(0).ok())
            .is_some_and(|v| v & 1 != 0);
        matches!(
            compression,
            Some(COMPRESSION_NONE | COMPRESSION_LJPEG | COMPRESSION_LOSSY)
        ) && !reduced
    });
    let raw = usable
        .next()
        .ok_or_else(|| DecodeError::unsupported("DNG: no raw image data found"))?;
    if usable.next().is_some() {
        debug!("multiple raw images, using the first");
    }
    Ok(raw)
}

fn read_cfa(raw: &Ifd) -> Result<ColorFilterArray, DecodeError> {
    if let Some(layout) = raw.get_entry(TiffTag::CfaLayout) {
        let layout = layout.get_u32(0)?;
        if layout != 1 {
            return Err(DecodeError::unsupported(format!("DNG: CFA layout {layout}")));
        }
    }
    let dim = raw.entry(TiffTag::CfaRepeatPatternDim)?;
    if dim.count() != 2 {
        return Err(DecodeError::corrupt("DNG: CFA pattern dimension needs 2 values"));
    }
    let rows = dim.get_u32(0)? as usize;
    let cols = dim.get_u32(1)? as usize;
    cfa_from_codes(cols, rows, raw.entry(TiffTag::CfaPattern)?.data())
}

/// Build the CFA from EXIF color codes stored row by row.
fn cfa_from_codes(
    width: usize,
    height: usize,
    codes: &[u8],
) -> Result<ColorFilterArray, DecodeError> {
    if width * height != codes.len() {
        return Err(DecodeError::corrupt(format!(
            "DNG: {width}x{height} CFA with {} pattern entries",
            codes.len()
        )));
    }
    let colors = codes
        .iter()
        .map(|&code| match CfaColor::from_exif(code) {
            CfaColor::Unknown => Err(DecodeError::unsupported(format!(
                "DNG: CFA color code {code}"
            ))),
            color => Ok(color),
        })
        .collect::<Result<Vec<_>, _>>()?;
    ColorFilterArray::from_colors(width, height, colors)
        .ok_or_else(|| DecodeError::corrupt("DNG: invalid CFA pattern size"))
}

// =============================================================================
// Pixel data
// =============================================================================

fn strip_entries(raw: &Ifd) -> Result<(Vec<u32>, Vec<u32>), DecodeError> {
    let offsets = raw.entry(TiffTag::StripOffsets)?.get_u32_array()?;
    let counts = raw.entry(TiffTag::StripByteCounts)?.get_u32_array()?;
    if offsets.len() != counts.len() {
        return Err(DecodeError::corrupt(format!(
            "DNG: {} byte counts for {} strips",
            counts.len(),
            offsets.len()
        )));
    }
    Ok((offsets, counts))
}

fn starts_in_file(session: &Session<'_>, offset: u32) -> bool {
    (offset as usize) < session.file.len()
}

/// Uncompressed strips. Depths other than 8 and 16 bits are always packed
/// big-endian.
fn decode_strips(
    session: &Session<'_>,
    raw: &Ifd,
    image: &mut RawImage,
    bps: u32,
) -> Result<(), DecodeError> {
    let (offsets, counts) = strip_entries(raw)?;
    let (width, height) = (image.width(), image.height());
    let rows_per_strip = raw
        .get_entry(TiffTag::RowsPerStrip)
        .map(|e| e.get_u32(0))
        .transpose()?
        .map_or(height, |r| r as usize)
        .max(1);

    let (order, byte_order) = match bps {
        8 | 16 | 32 => (BitOrder::Plain, raw.byte_order()),
        _ => (BitOrder::Msb, ByteOrder::BigEndian),
    };
    let input_pitch = image.cpp() * width * bps as usize / 8;

    let mut decoded = 0;
    for (i, (&offset, &count)) in offsets.iter().zip(&counts).enumerate() {
        let y = i * rows_per_strip;
        if y >= height {
            break;
        }
        if !starts_in_file(session, offset) {
            warn!(strip = i, offset, count, "strip outside of file, skipped");
            image.add_error(format!("DNG: strip {i} starts outside of the file"));
            continue;
        }
        let layout = StripLayout {
            x: 0,
            y,
            width,
            height: rows_per_strip.min(height - y),
            input_pitch,
            bits: bps,
        };
        let result = session
            .stream(offset, count)
            .and_then(|input| read_uncompressed(image, input, layout, order, byte_order));
        match result {
            Ok(()) => {}
            Err(err) if decoded > 0 && err.is_recoverable() => image.add_error(err.to_string()),
            Err(err) => return Err(err),
        }
        decoded += 1;
    }
    if decoded == 0 {
        return Err(DecodeError::Truncated("DNG: no valid strips".to_string()));
    }
    Ok(())
}

/// One compressed tile or strip.
#[derive(Debug, Clone, Copy)]
struct Tile {
    offset: u32,
    count: u32,
    x: usize,
}

/// Tiles grouped by tile row, plus the height of one row.
fn tile_grid(raw: &Ifd, image: &RawImage) -> Result<(Vec<Vec<Tile>>, usize), DecodeError> {
    let (width, height) = (image.width(), image.height());

    if raw.has_entry(TiffTag::TileOffsets) {
        let tile_w = raw.entry(TiffTag::TileWidth)?.get_u32(0)? as usize;
        let tile_h = raw.entry(TiffTag::TileLength)?.get_u32(0)? as usize;
        if tile_w == 0 || tile_h == 0 {
            return Err(DecodeError::corrupt("DNG: invalid tile size"));
        }
        let across = width.div_ceil(tile_w);
        let down = height.div_ceil(tile_h);
        let offsets = raw.entry(TiffTag::TileOffsets)?.get_u32_array()?;
        let counts = raw.entry(TiffTag::TileByteCounts)?.get_u32_array()?;
        if offsets.len() != counts.len() || offsets.len() != across * down {
            return Err(DecodeError::corrupt(format!(
                "DNG: {} tile offsets, {} byte counts, {} tiles expected",
                offsets.len(),
                counts.len(),
                across * down
            )));
        }
        let rows = (0..down)
            .map(|ty| {
                (0..across)
                    .map(|tx| {
                        let i = ty * across + tx;
                        Tile {
                            offset: offsets[i],
                            count: counts[i],
                            x: tx * tile_w,
                        }
                    })
                    .collect()
            })
            .collect();
        return Ok((rows, tile_h));
    }

    let (offsets, counts) = strip_entries(raw)?;
    let rows_per_strip = raw.entry(TiffTag::RowsPerStrip)?.get_u32(0)? as usize;
    if rows_per_strip == 0 || rows_per_strip > height {
        return Err(DecodeError::corrupt(format!(
            "DNG: {rows_per_strip} rows per strip for a {height} row image"
        )));
    }
    let rows = offsets
        .iter()
        .zip(&counts)
        .map(|(&offset, &count)| vec![Tile { offset, count, x: 0 }])
        .collect();
    Ok((rows, rows_per_strip))
}

/// Lossless or lossy JPEG tiles, one worker band per tile row.
fn decode_compressed(
    session: &Session<'_>,
    raw: &Ifd,
    image: &mut RawImage,
    compression: u32,
    fix_ljpeg: bool,
) -> Result<(), DecodeError> {
    let (grid, tile_h) = tile_grid(raw, image)?;
    let valid = grid
        .iter()
        .flatten()
        .filter(|t| starts_in_file(session, t.offset))
        .count();
    if valid == 0 {
        return Err(DecodeError::Truncated("DNG: no valid slices".to_string()));
    }
    debug!(tiles = valid, tile_rows = grid.len(), tile_h, compression, "DNG tiles");

    let is_cfa = image.is_cfa;
    decode_bands_of(image, session.options.threads, tile_h, |plane| {
        let Some(row) = grid.get(plane.y_offset() / tile_h) else {
            return Ok(());
        };
        let mut first_error = None;
        for tile in row {
            let result = session.stream(tile.offset, tile.count).and_then(|input| {
                if compression == COMPRESSION_LOSSY {
                    decode_lossy_tile(plane, input, tile.x)
                } else {
                    LJpegDecoder::new(input)
                        .dng_compatible(fix_ljpeg)
                        .cfa(is_cfa)
                        .decode(plane, tile.x, 0)
                        .map(|_| ())
                }
            });
            if let Err(err) = result {
                if !err.is_recoverable() {
                    return Err(err);
                }
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    })
}

/// Baseline JPEG tile, 8-bit samples widened to 16 bits.
fn decode_lossy_tile(plane: &mut PlaneMut<'_>, input: &[u8], x: usize) -> Result<(), DecodeError> {
    let decoded = ImageReader::with_format(Cursor::new(input), ImageFormat::Jpeg)
        .decode()
        .map_err(|e| DecodeError::corrupt(format!("lossy DNG tile: {e}")))?;
    let cpp = plane.cpp();
    let (samples, tile_w, tile_h) = match cpp {
        1 => {
            let gray = decoded.into_luma8();
            let (w, h) = gray.dimensions();
            (gray.into_raw(), w as usize, h as usize)
        }
        3 => {
            let rgb = decoded.into_rgb8();
            let (w, h) = rgb.dimensions();
            (rgb.into_raw(), w as usize, h as usize)
        }
        other => {
            return Err(DecodeError::unsupported(format!(
                "lossy DNG with {other} components"
            )))
        }
    };
    if x >= plane.width() {
        return Err(DecodeError::corrupt("lossy DNG tile outside of image"));
    }
    let copy_w = tile_w.min(plane.width() - x) * cpp;
    for y in 0..tile_h.min(plane.height()) {
        let src = &samples[y * tile_w * cpp..][..copy_w];
        let dst = &mut plane.row_mut(y)[x * cpp..][..copy_w];
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = u16::from(s);
        }
    }
    Ok(())
}

// =============================================================================
// Crop and levels
// =============================================================================

fn apply_crop(session: &Session<'_>, raw: &Ifd, image: &mut RawImage) -> Result<(), DecodeError> {
    if let Some(active) = raw.get_entry(TiffTag::ActiveArea) {
        if active.count() != 4 {
            return Err(DecodeError::corrupt(format!(
                "DNG: active area has {} values instead of 4",
                active.count()
            )));
        }
        let c = active.get_u32_array()?;
        let (top, left, bottom, right) = (c[0] as i64, c[1] as i64, c[2] as i64, c[3] as i64);
        let (w, h) = (image.width() as i64, image.height() as i64);
        if left <= w && top <= h && right <= w && bottom <= h {
            image.sub_frame(Rect::from_corners(left, top, right, bottom));
        }
    }

    if !session.options.apply_crop {
        return Ok(());
    }
    let (Some(origin), Some(size)) = (
        raw.get_entry(TiffTag::DefaultCropOrigin),
        raw.get_entry(TiffTag::DefaultCropSize),
    ) else {
        return Ok(());
    };
    let rect = default_crop(
        [origin.get_f32(0)?, origin.get_f32(1)?],
        [size.get_f32(0)?, size.get_f32(1)?],
        image.cropped_width() as i64,
        image.cropped_height() as i64,
    );
    if !rect.has_positive_area() {
        return Err(DecodeError::corrupt("DNG: no positive crop area"));
    }
    image.crop_with_cfa_shift(rect);
    Ok(())
}

/// Default crop relative to the active area. An origin or size that does
/// not fit falls back to the full area.
fn default_crop(origin: [f32; 2], size: [f32; 2], width: i64, height: i64) -> Rect {
    let (mut x, mut y) = (origin[0] as i64, origin[1] as i64);
    if x < 0 || y < 0 || x > width || y > height {
        x = 0;
        y = 0;
    }
    let (w, h) = (size[0] as i64, size[1] as i64);
    if w >= 0 && h >= 0 && x + w <= width && y + h <= height {
        Rect::new(x, y, w, h)
    } else {
        Rect::new(x, y, width - x, height - y)
    }
}

/// Masked areas when present, otherwise BlackLevel with the delta tags.
fn set_black(raw: &Ifd, image: &mut RawImage) -> Result<(), DecodeError> {
    if let Some(masked) = raw.get_entry(TiffTag::MaskedAreas) {
        if matches!(masked.field_type(), FieldType::Short | FieldType::Long) {
            let areas = masked_black_areas(&masked.get_u32_array()?, image.crop());
            if !areas.is_empty() {
                image.black_areas = areas;
                return Ok(());
            }
        }
    }

    image.black_level_separate = [0; 4];
    let Some(black) = raw.get_entry(TiffTag::BlackLevel) else {
        return Ok(());
    };
    let (rx, ry) = match raw.get_entry(TiffTag::BlackLevelRepeatDim) {
        Some(dim) if dim.count() == 2 => (dim.get_u32(0)? as usize, dim.get_u32(1)? as usize),
        Some(_) => return Ok(()),
        None => (1, 1),
    };
    if rx == 0 || ry == 0 || image.cpp() != 1 {
        return Ok(());
    }
    if (black.count() as usize) < rx * ry {
        return Err(DecodeError::corrupt("DNG: BlackLevel entry is too small"));
    }

    let values = black.get_f32_array()?;
    let delta_v = raw
        .get_entry(TiffTag::BlackLevelDeltaV)
        .map(|e| e.get_f32_array())
        .transpose()?;
    let delta_h = raw
        .get_entry(TiffTag::BlackLevelDeltaH)
        .map(|e| e.get_f32_array())
        .transpose()?;
    image.black_level_separate = black_levels(
        &values,
        rx,
        ry,
        delta_v.as_deref(),
        delta_h.as_deref(),
        image.cropped_width(),
        image.cropped_height(),
    )?;
    Ok(())
}

/// Masked rectangles that span the whole active width become horizontal
/// black areas, ones spanning the whole active height vertical areas.
fn masked_black_areas(rects: &[u32], crop: Rect) -> Vec<BlackArea> {
    rects
        .chunks_exact(4)
        .filter_map(|r| {
            let (top, left, bottom, right) = (r[0] as i64, r[1] as i64, r[2] as i64, r[3] as i64);
            if left <= crop.x && right >= crop.right() {
                Some(BlackArea::new(top, bottom - top, false))
            } else if top <= crop.y && bottom >= crop.bottom() {
                Some(BlackArea::new(left, right - left, true))
            } else {
                None
            }
        })
        .collect()
}

/// Per-cell black levels from a `rx` by `ry` repeat pattern, corrected by
/// the average of the row and column deltas for each parity.
fn black_levels(
    values: &[f32],
    rx: usize,
    ry: usize,
    delta_v: Option<&[f32]>,
    delta_h: Option<&[f32]>,
    width: usize,
    height: usize,
) -> Result<[i32; 4], DecodeError> {
    let mut levels = [0i32; 4];
    for y in 0..2 {
        for x in 0..2 {
            let value = if rx < 2 || ry < 2 {
                values[0]
            } else {
                values[y * rx + x]
            };
            levels[y * 2 + x] = value as i32;
        }
    }

    if let Some(delta) = delta_v {
        if delta.len() < height {
            return Err(DecodeError::corrupt("DNG: BlackLevelDeltaV is too small"));
        }
        let mut sum = [0f32; 2];
        for (i, &d) in delta[..height].iter().enumerate() {
            sum[i & 1] += d;
        }
        for (i, level) in levels.iter_mut().enumerate() {
            *level += (sum[i >> 1] / height as f32 * 2.0) as i32;
        }
    }
    if let Some(delta) = delta_h {
        if delta.len() < width {
            return Err(DecodeError::corrupt("DNG: BlackLevelDeltaH is too small"));
        }
        let mut sum = [0f32; 2];
        for (i, &d) in delta[..width].iter().enumerate() {
            sum[i & 1] += d;
        }
        for (i, level) in levels.iter_mut().enumerate() {
            *level += (sum[i & 1] / width as f32 * 2.0) as i32;
        }
    }
    Ok(levels)
}

/// White balance multipliers are the inverse of the neutral point.
fn wb_from_neutral(neutral: &[f32]) -> Option<[f32; 3]> {
    match neutral {
        [r, g, b] if *r > 0.0 && *g > 0.0 && *b > 0.0 => Some([1.0 / r, 1.0 / g, 1.0 / b]),
        _ => {
            info!(?neutral, "ignoring unusable AsShotNeutral");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // CFA
    // -------------------------------------------------------------------------

    #[test]
    fn test_cfa_from_codes() {
        let cfa = cfa_from_codes(2, 2, &[1, 0, 2, 1]).unwrap();
        assert_eq!(cfa.describe(), "GRBG");
    }

    #[test]
    fn test_cfa_count_mismatch() {
        assert!(matches!(
            cfa_from_codes(2, 2, &[0, 1, 2]),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_cfa_unknown_color() {
        assert!(matches!(
            cfa_from_codes(2, 2, &[0, 1, 9, 2]),
            Err(DecodeError::UnsupportedFormat { .. })
        ));
    }

    // -------------------------------------------------------------------------
    // Levels
    // -------------------------------------------------------------------------

    #[test]
    fn test_single_black_value_fills_all_cells() {
        let levels = black_levels(&[64.0], 1, 1, None, None, 10, 10).unwrap();
        assert_eq!(levels, [64; 4]);
    }

    #[test]
    fn test_black_repeat_pattern() {
        let levels = black_levels(&[1.0, 2.0, 3.0, 4.0], 2, 2, None, None, 10, 10).unwrap();
        assert_eq!(levels, [1, 2, 3, 4]);
    }

    #[test]
    fn test_black_deltas() {
        // even rows +4 on average, odd rows 0; columns +2 on odd only
        let delta_v = [4.0, 0.0, 4.0, 0.0];
        let delta_h = [0.0, 2.0, 0.0, 2.0];
        let levels =
            black_levels(&[100.0], 1, 1, Some(&delta_v), Some(&delta_h), 4, 4).unwrap();
        assert_eq!(levels, [104, 106, 100, 102]);
    }

    #[test]
    fn test_black_delta_too_short() {
        let result = black_levels(&[100.0], 1, 1, Some(&[1.0]), None, 4, 4);
        assert!(result.is_err());
    }

    #[test]
    fn test_masked_areas() {
        let crop = Rect::new(10, 4, 100, 50);
        let rects = [
            0, 0, 4, 110, // top strip over the full width
            4, 0, 54, 10, // left strip over the full height
            0, 20, 2, 30, // partial, ignored
        ];
        let areas = masked_black_areas(&rects, crop);
        assert_eq!(
            areas,
            vec![BlackArea::new(0, 4, false), BlackArea::new(0, 10, true)]
        );
    }

    // -------------------------------------------------------------------------
    // Crop and white balance
    // -------------------------------------------------------------------------

    #[test]
    fn test_default_crop() {
        assert_eq!(
            default_crop([8.0, 8.0], [100.0, 60.0], 120, 80),
            Rect::new(8, 8, 100, 60)
        );
        // size does not fit, keep the rest of the image
        assert_eq!(
            default_crop([8.0, 8.0], [200.0, 60.0], 120, 80),
            Rect::new(8, 8, 112, 72)
        );
        // origin outside, start at the corner
        assert_eq!(
            default_crop([500.0, 8.0], [100.0, 60.0], 120, 80),
            Rect::new(0, 0, 100, 60)
        );
    }

    #[test]
    fn test_wb_from_neutral() {
        assert_eq!(wb_from_neutral(&[0.5, 1.0, 0.25]), Some([2.0, 1.0, 4.0]));
        assert_eq!(wb_from_neutral(&[0.5, 0.0, 0.25]), None);
        assert_eq!(wb_from_neutral(&[0.5, 1.0]), None);
    }
}
