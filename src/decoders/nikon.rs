//! Nikon NEF decoder.
//!
//! Most NEFs use the Huffman difference code of [`crate::codec::nikon`].
//! Firmware bugs make the compression tag unreliable, so the byte count of
//! the first strip decides between compressed, plain and small-NEF data.

use tracing::debug;

use crate::bits::{BitPump, Msb32Pump, MsbPump};
use crate::codec::nikon::{decode_nef, decode_snef, NikonMeta};
use crate::codec::{decode_packed, read_uncompressed, BitOrder, Packing, StripLayout};
use crate::error::DecodeError;
use crate::format::tiff::{ByteOrder, FieldType, Ifd, TiffRoot, TiffTag};
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};

use super::{dimensions, first_ifd_with, iso_speed, make_model, tolerate, RawDecoder, Session};

/// Rational white balance in the maker note.
const TAG_WB_LEVELS: u16 = 0x000C;
/// Pre-2004 color balance block.
const TAG_COLOR_BALANCE_OLD: u16 = 0x0014;
/// Versioned color balance block.
const TAG_COLOR_BALANCE: u16 = 0x0097;
/// Linearization table and predictor seeds.
const TAG_LINEARIZATION: u16 = 0x008C;
const TAG_DECOMPRESSION: u16 = 0x0096;

const COMPRESSION_NIKON: u32 = 34713;

const MAX_WIDTH: usize = 8288;
const MAX_HEIGHT: usize = 5520;

/// The D100 misreports its geometry and compression.
const D100_MODEL: &str = "NIKON D100";
const D100_WIDTH: usize = 3040;
const D100_HEIGHT: usize = 2024;

pub(super) struct NefDecoder;

impl RawDecoder for NefDecoder {
    fn version(&self) -> u32 {
        5
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        let (make, model) = make_model(session.root)?;
        let mode = camera_mode(session, &make, &model)?;
        session.check_camera_supported(&make, &model, &mode, self.version())?;
        Ok(())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let root = session.root;
        let raw = first_ifd_with(root, TiffTag::CfaPattern)?;
        let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
        let (_, model) = make_model(root)?;

        let offsets = raw.entry(TiffTag::StripOffsets)?;
        let counts = raw.entry(TiffTag::StripByteCounts)?;
        let first_offset = offsets.get_u32(0)?;

        if model == D100_MODEL && !d100_is_compressed(&session.file, first_offset)? {
            return decode_d100(session);
        }
        if compression == 1 || session.has_hint("force_uncompressed") || is_uncompressed(raw)? {
            return decode_plain(session);
        }
        if is_uncompressed_rgb(raw)? {
            return decode_small(session);
        }

        if offsets.count() != 1 {
            return Err(DecodeError::unsupported(format!(
                "NEF: {} strips in compressed data",
                offsets.count()
            )));
        }
        if counts.count() != offsets.count() {
            return Err(DecodeError::corrupt(format!(
                "NEF: {} byte counts for {} strips",
                counts.count(),
                offsets.count()
            )));
        }
        if compression != COMPRESSION_NIKON {
            return Err(DecodeError::UnsupportedCompression {
                decoder: "NEF",
                compression,
            });
        }

        let (width, height) = dimensions(raw)?;
        let bps = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)?;
        let note = root
            .get_ifds_with_tag(TAG_LINEARIZATION)
            .into_iter()
            .next()
            .ok_or_else(|| DecodeError::MissingRequiredTag("NEF decompression info".to_string()))?;
        let meta_entry = match note.get_entry(TAG_DECOMPRESSION) {
            Some(entry) => entry,
            None => note.entry(TAG_LINEARIZATION)?,
        };
        let meta = NikonMeta::parse(meta_entry.data(), meta_entry.byte_order(), bps)?;
        debug!(width, height, bps, white = meta.white(), black = meta.black(), "NEF compressed");

        let mut image = session.allocate(width, height, 1, SampleType::U16)?;
        let input = session.stream(first_offset, counts.get_u32(0)?)?;
        let result = image.plane_mut().and_then(|mut plane| decode_nef(&mut plane, input, &meta));
        tolerate(&mut image, result)?;

        session.set_table(&mut image, &meta.curve)?;
        image.white_point = meta.white();
        Ok(image)
    }

    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError> {
        let root = session.root;
        image.cfa = ColorFilterArray::new_2x2(
            CfaColor::Red,
            CfaColor::Green,
            CfaColor::Green,
            CfaColor::Blue,
        );
        let white = image.white_point;
        let black = image.black_level;
        let (make, model) = make_model(root)?;

        if let Some(wb) = white_balance(root)? {
            image.metadata.wb_coeffs = Some(wb);
        }

        let mode = camera_mode(session, &make, &model)?;
        session.set_metadata(image, &make, &model, &mode, iso_speed(root));

        if white != 65536 {
            image.white_point = white;
        }
        if black >= 0 && !session.has_hint("nikon_override_auto_black") {
            image.black_level = black;
        }
        Ok(())
    }
}

// =============================================================================
// Layout detection
// =============================================================================

/// The D100 tags plain data as compressed; compressed data has non-zero
/// bytes at the end of every 16-byte group of the first 256.
fn d100_is_compressed(file: &[u8], offset: u32) -> Result<bool, DecodeError> {
    let start = offset as usize;
    let head = file.get(start..start.saturating_add(256)).ok_or_else(|| {
        DecodeError::Truncated("NEF: image data outside of file".to_string())
    })?;
    Ok(head.iter().skip(15).step_by(16).any(|&b| b != 0))
}

/// Some firmware tags plain data as compressed; the byte count tells.
fn is_uncompressed(raw: &Ifd) -> Result<bool, DecodeError> {
    let count = raw.entry(TiffTag::StripByteCounts)?.get_u32(0)? as u64;
    let (width, height) = dimensions(raw)?;
    let bps = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)? as u64;
    Ok(count == width as u64 * height as u64 * bps / 8)
}

fn is_uncompressed_rgb(raw: &Ifd) -> Result<bool, DecodeError> {
    let count = raw.entry(TiffTag::StripByteCounts)?.get_u32(0)? as u64;
    let (width, height) = dimensions(raw)?;
    Ok(count == width as u64 * height as u64 * 3)
}

/// The widest directory with a CFA pattern.
fn best_image(root: &TiffRoot) -> Result<&Ifd, DecodeError> {
    let mut best: Option<(usize, &Ifd)> = None;
    for ifd in root.get_ifds_with_tag(TiffTag::CfaPattern) {
        let width = ifd.entry(TiffTag::ImageWidth)?.get_u32(0)? as usize;
        if best.map_or(true, |(w, _)| width > w) {
            best = Some((width, ifd));
        }
    }
    best.map(|(_, ifd)| ifd)
        .ok_or_else(|| DecodeError::MissingRequiredTag("NEF image directory".to_string()))
}

/// Storage mode string, e.g. `12bit-compressed`.
fn storage_mode(raw: &Ifd) -> Result<String, DecodeError> {
    if is_uncompressed_rgb(raw)? {
        return Ok("sNEF-uncompressed".to_string());
    }
    let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
    let bps = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)?;
    if compression == 1 || is_uncompressed(raw)? {
        Ok(format!("{bps}bit-uncompressed"))
    } else {
        Ok(format!("{bps}bit-compressed"))
    }
}

/// The most specific mode the database lists: size and storage, storage
/// alone, or none.
fn camera_mode(session: &Session<'_>, make: &str, model: &str) -> Result<String, DecodeError> {
    let mode = storage_mode(best_image(session.root)?)?;
    let (width, height) = dimensions(first_ifd_with(session.root, TiffTag::CfaPattern)?)?;
    let extended = format!("{width}x{height}-{mode}");
    if session.has_camera(make, model, &extended) {
        Ok(extended)
    } else if session.has_camera(make, model, &mode) {
        Ok(mode)
    } else {
        Ok(String::new())
    }
}

// =============================================================================
// Plain layouts
// =============================================================================

fn decode_d100(session: &Session<'_>) -> Result<RawImage, DecodeError> {
    let raw = session
        .root
        .get_ifds_with_tag(TiffTag::StripOffsets)
        .into_iter()
        .nth(1)
        .ok_or_else(|| DecodeError::MissingRequiredTag("D100 image directory".to_string()))?;
    let offset = raw.entry(TiffTag::StripOffsets)?.get_u32(0)?;
    let mut image = session.allocate(D100_WIDTH, D100_HEIGHT, 1, SampleType::U16)?;
    let input = session.stream_from(offset)?;
    let result = decode_packed(&mut image, input, D100_WIDTH, D100_HEIGHT, Packing::Be12Control);
    tolerate(&mut image, result)?;
    Ok(image)
}

#[derive(Debug, Clone, Copy)]
struct Slice {
    offset: u32,
    count: u32,
    y: usize,
    rows: usize,
}

fn decode_plain(session: &Session<'_>) -> Result<RawImage, DecodeError> {
    let raw = best_image(session.root)?;
    let (width, height) = dimensions(raw)?;
    if width > MAX_WIDTH || height > MAX_HEIGHT {
        return Err(DecodeError::unsupported(format!(
            "NEF: uncompressed image {width}x{height} too large"
        )));
    }
    let offsets = raw.entry(TiffTag::StripOffsets)?.get_u32_array()?;
    let counts = raw.entry(TiffTag::StripByteCounts)?.get_u32_array()?;
    let rows_per_strip = raw
        .get_entry(TiffTag::RowsPerStrip)
        .and_then(|e| e.get_u32(0).ok())
        .map(|r| r as usize)
        .filter(|&r| r > 0)
        .unwrap_or(height);

    let file_len = session.file.len() as u64;
    let mut slices = Vec::new();
    let mut y = 0;
    for (&offset, &count) in offsets.iter().zip(&counts) {
        let rows = rows_per_strip.min(height - y);
        if rows > 0 && offset as u64 + count as u64 <= file_len {
            slices.push(Slice { offset, count, y, rows });
        }
        y = (y + rows_per_strip).min(height);
    }
    let Some(first) = slices.first().copied() else {
        return Err(DecodeError::Truncated(
            "NEF: no valid slices found".to_string(),
        ));
    };

    let mut bps = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)?;
    if bps == 14 && width * first.rows * 2 == first.count as usize {
        bps = 16;
    }
    if let Some(real) = session.hint("real_bpp") {
        bps = real.trim().parse().map_err(|_| {
            DecodeError::corrupt(format!("invalid real_bpp hint '{real}'"))
        })?;
    }
    let order = match session.hint("msb_override") {
        Some(value) if value != "true" => BitOrder::Plain,
        _ => BitOrder::Msb,
    };
    let pitch = width * bps as usize / 8;
    debug!(width, height = y, bps, slices = slices.len(), ?order, "NEF uncompressed");

    let mut image = session.allocate(width, y, 1, SampleType::U16)?;
    for (i, slice) in slices.iter().enumerate() {
        let result = session.stream(slice.offset, slice.count).and_then(|input| {
            if session.has_hint("coolpixmangled") {
                read_coolpix_mangled(&mut image, input, slice.y, slice.rows, pitch)
            } else if session.has_hint("coolpixsplit") {
                read_coolpix_split(&mut image, input, slice.y, slice.rows, pitch)
            } else {
                let layout = StripLayout {
                    x: 0,
                    y: slice.y,
                    width,
                    height: slice.rows,
                    input_pitch: pitch,
                    bits: bps,
                };
                read_uncompressed(&mut image, input, layout, order, raw.byte_order())
            }
        });
        match result {
            Ok(()) => {}
            Err(err) if i > 0 && err.is_recoverable() => image.add_error(err.to_string()),
            Err(err) => return Err(err),
        }
    }
    Ok(image)
}

/// Complete lines available, keeping one line in reserve when short.
fn coolpix_rows(available: usize, pitch: usize, rows: usize) -> Result<usize, DecodeError> {
    if available >= pitch * rows {
        Ok(rows)
    } else if available > pitch {
        Ok(available / pitch - 1)
    } else {
        Err(DecodeError::Truncated(
            "not enough data to decode a single line".to_string(),
        ))
    }
}

/// 12-bit samples read over 32-bit words.
fn read_coolpix_mangled(
    image: &mut RawImage,
    input: &[u8],
    y0: usize,
    rows: usize,
    pitch: usize,
) -> Result<(), DecodeError> {
    let rows = coolpix_rows(input.len(), pitch, rows)?.min(image.height() - y0);
    let width = image.width();
    let out_pitch = image.pitch();
    let out = image.pixels_u16_mut()?;
    let mut pump = Msb32Pump::new(input);
    for y in y0..y0 + rows {
        for px in &mut out[y * out_pitch..y * out_pitch + width] {
            *px = pump.get_bits(12)? as u16;
        }
    }
    Ok(())
}

/// 12-bit samples stored as two fields: even lines, then odd lines.
fn read_coolpix_split(
    image: &mut RawImage,
    input: &[u8],
    y0: usize,
    rows: usize,
    pitch: usize,
) -> Result<(), DecodeError> {
    let rows = coolpix_rows(input.len(), pitch, rows)?.min(image.height() - y0);
    let width = image.width();
    let out_pitch = image.pitch();
    let out = image.pixels_u16_mut()?;
    let mut pump = MsbPump::new(input);
    let half = rows / 2;
    for field in 0..2 {
        for i in 0..half {
            let y = y0 + i * 2 + field;
            for px in &mut out[y * out_pitch..y * out_pitch + width] {
                *px = pump.get_bits(12)? as u16;
            }
        }
    }
    Ok(())
}

// =============================================================================
// Small NEF
// =============================================================================

fn decode_small(session: &Session<'_>) -> Result<RawImage, DecodeError> {
    let raw = best_image(session.root)?;
    let offset = raw.entry(TiffTag::StripOffsets)?.get_u32(0)?;
    let (width, height) = dimensions(raw)?;
    let (wb_red, wb_blue) = small_nef_gains(session.root)?;

    let mut image = session.allocate(width, height, 3, SampleType::U16)?;
    image.is_cfa = false;
    let input = session.stream_from(offset)?;
    let result = image
        .plane_mut()
        .and_then(|mut plane| decode_snef(&mut plane, input, wb_red, wb_blue));
    match result {
        Ok(rows) if rows < height => image.add_error("Image truncated (file is too short)"),
        Ok(_) => {}
        Err(err) => tolerate(&mut image, Err(err))?,
    }
    Ok(image)
}

/// Red and blue gains the camera applied before encoding.
fn small_nef_gains(root: &TiffRoot) -> Result<(f32, f32), DecodeError> {
    let missing = || DecodeError::MissingRequiredTag("sNEF white balance".to_string());
    let note = root
        .get_ifds_with_tag(TAG_WB_LEVELS)
        .into_iter()
        .next()
        .ok_or_else(missing)?;
    let wb = note.entry(TAG_WB_LEVELS)?;
    if wb.count() != 4 || wb.field_type() != FieldType::Rational {
        return Err(missing());
    }
    let ratio = |i: usize| -> Result<f32, DecodeError> {
        let (num, den) = wb.get_rational(i)?;
        if den == 0 {
            return Err(DecodeError::corrupt("sNEF white balance has a zero denominator"));
        }
        Ok(num as f32 / den as f32)
    };
    Ok((ratio(0)?, ratio(1)?))
}

// =============================================================================
// White balance
// =============================================================================

fn white_balance(root: &TiffRoot) -> Result<Option<[f32; 3]>, DecodeError> {
    if let Some(note) = root.get_ifds_with_tag(TAG_WB_LEVELS).into_iter().next() {
        let wb = note.entry(TAG_WB_LEVELS)?;
        if wb.count() == 4 && wb.field_type() == FieldType::Rational {
            let ratio = |i: usize| -> Result<f32, DecodeError> {
                let (num, den) = wb.get_rational(i)?;
                Ok(if den == 0 { 0.0 } else { num as f32 / den as f32 })
            };
            let green = ratio(2)?;
            let green = if green == 0.0 { 1.0 } else { green };
            return Ok(Some([ratio(0)?, green, ratio(1)?]));
        }
        return Ok(None);
    }
    if let Some(wb) = root.get_entry_recursive(TAG_COLOR_BALANCE) {
        if wb.count() > 4 && wb.field_type() == FieldType::Undefined {
            return Ok(versioned_color_balance(wb.data(), wb.byte_order()));
        }
        return Ok(None);
    }
    if let Some(wb) = root.get_entry_recursive(TAG_COLOR_BALANCE_OLD) {
        if wb.count() == 2560 && wb.field_type() == FieldType::Undefined {
            return Ok(old_color_balance(wb.data()));
        }
        return Ok(nrw_color_balance(wb.data()));
    }
    Ok(None)
}

/// Four ASCII digits read as nibbles, e.g. `"0103"` is 0x103.
fn balance_version(data: &[u8]) -> u32 {
    data.iter()
        .take(4)
        .fold(0u32, |v, &b| (v << 4).wrapping_add(u32::from(b).wrapping_sub(u32::from(b'0'))))
}

fn versioned_color_balance(data: &[u8], order: ByteOrder) -> Option<[f32; 3]> {
    let short = |i: usize| data.get(i * 2..i * 2 + 2).map(|b| f32::from(order.read_u16(b)));
    match balance_version(data) {
        0x100 if data.len() >= 80 => Some([short(36)?, short(38)?, short(37)?]),
        0x103 if data.len() >= 26 => Some([short(10)?, short(11)?, short(12)?]),
        version => {
            debug!(version = format_args!("{version:#x}"), "unhandled NEF color balance");
            None
        }
    }
}

fn old_color_balance(data: &[u8]) -> Option<[f32; 3]> {
    let red = u16::from_be_bytes([*data.get(1248)?, *data.get(1249)?]);
    let blue = u16::from_be_bytes([*data.get(1250)?, *data.get(1251)?]);
    Some([f32::from(red) / 256.0, 1.0, f32::from(blue) / 256.0])
}

/// Coolpix NRW levels, little-endian words at a version dependent offset.
fn nrw_color_balance(data: &[u8]) -> Option<[f32; 3]> {
    if !data.starts_with(b"NRW ") {
        return None;
    }
    let offset = if data.get(4..8) != Some(b"0100".as_slice()) && data.len() > 72 {
        56
    } else if data.len() > 1572 {
        1556
    } else {
        return None;
    };
    let word = |i: usize| {
        data.get(offset + i * 4..offset + i * 4 + 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    };
    Some([
        (word(0)? << 2) as f32,
        (word(1)? + word(2)?) as f32,
        (word(3)? << 2) as f32,
    ])
}
