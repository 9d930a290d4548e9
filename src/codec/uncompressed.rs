//! Uncompressed and fixed bit-packed sample readers.
//!
//! Two families live here: a generic strip reader that pulls `bits` bits per
//! sample from any [`BitPump`], and byte-level unpackers for the fixed
//! layouts (12 bits in 3 bytes, control bytes, interlaced fields) that
//! vendors use without entropy coding.
//!
//! Short input is handled the same way everywhere: if at least one full row
//! is present, the complete rows are decoded and a recoverable error is
//! recorded on the image; otherwise the call fails with `Truncated`.

use crate::bits::{BitPump, Msb16Pump, Msb32Pump, MsbPump, PlainPump};
use crate::error::DecodeError;
use crate::format::tiff::ByteOrder;
use crate::image::{PixelData, RawImage};

/// Bit order of a packed stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// LSB first, memory order
    Plain,
    /// MSB first, byte at a time
    Msb,
    /// MSB first over little-endian 16-bit words
    Msb16,
    /// MSB first over little-endian 32-bit words
    Msb32,
}

impl BitOrder {
    /// Parse the names used in the camera database.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "plain" => Some(BitOrder::Plain),
            "msb" | "jpeg" => Some(BitOrder::Msb),
            "msb16" | "jpeg16" => Some(BitOrder::Msb16),
            "msb32" | "jpeg32" => Some(BitOrder::Msb32),
            _ => None,
        }
    }
}

/// Rows that fit in `available` bytes, recording a truncation on the image.
fn usable_rows(
    image: &mut RawImage,
    available: usize,
    row_bytes: usize,
    rows: usize,
) -> Result<usize, DecodeError> {
    if row_bytes == 0 || available >= row_bytes.saturating_mul(rows) {
        return Ok(rows);
    }
    if available >= row_bytes {
        image.add_error("Image truncated (file is too short)");
        return Ok(available / row_bytes);
    }
    Err(DecodeError::Truncated(
        "not enough data to decode a single line".to_string(),
    ))
}

// =============================================================================
// Generic strip reader
// =============================================================================

/// Geometry of one uncompressed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripLayout {
    /// Destination column of the first pixel
    pub x: usize,
    /// Destination row of the first line
    pub y: usize,
    pub width: usize,
    pub height: usize,
    /// Bytes from one input line to the next
    pub input_pitch: usize,
    pub bits: u32,
}

/// Read `layout.height` lines of `layout.width * cpp` samples.
///
/// 16-bit little-endian plain data and 32-bit floats are copied directly;
/// everything else goes through a bit reader with the given order.
pub fn read_uncompressed(
    image: &mut RawImage,
    input: &[u8],
    layout: StripLayout,
    order: BitOrder,
    byte_order: ByteOrder,
) -> Result<(), DecodeError> {
    let cpp = image.cpp();
    if layout.x + layout.width > image.width() {
        return Err(DecodeError::corrupt("uncompressed strip: invalid x offset"));
    }
    if layout.y > image.height() {
        return Err(DecodeError::corrupt("uncompressed strip: invalid y offset"));
    }
    let rows = usable_rows(image, input.len(), layout.input_pitch, layout.height)?;
    let rows = rows.min(image.height() - layout.y);
    let samples = layout.width * cpp;
    let pitch = image.pitch();

    if let PixelData::F32(_) = image.data() {
        if layout.bits != 32 {
            return Err(DecodeError::unsupported(
                "only 32-bit floating point samples are supported",
            ));
        }
        let out = image.pixels_f32_mut()?;
        for row in 0..rows {
            let src = &input[row * layout.input_pitch..];
            let dst_start = (layout.y + row) * pitch + layout.x * cpp;
            let dst = &mut out[dst_start..dst_start + samples];
            for (d, s) in dst.iter_mut().zip(src.chunks_exact(4)) {
                *d = f32::from_bits(byte_order.read_u32(s));
            }
        }
        return Ok(());
    }

    if layout.bits > 16 {
        return Err(DecodeError::unsupported(format!(
            "uncompressed bit depth {}",
            layout.bits
        )));
    }

    let out = image.pixels_u16_mut()?;
    if order == BitOrder::Plain && layout.bits == 16 {
        for row in 0..rows {
            let src = &input[row * layout.input_pitch..];
            let dst_start = (layout.y + row) * pitch + layout.x * cpp;
            let dst = &mut out[dst_start..dst_start + samples];
            for (d, s) in dst.iter_mut().zip(src.chunks_exact(2)) {
                *d = byte_order.read_u16(s);
            }
        }
        return Ok(());
    }

    let mut write_rows = |pump: &mut dyn BitPump| -> Result<(), DecodeError> {
        for row in 0..rows {
            pump.set_absolute_bit_offset((row * layout.input_pitch) as u64 * 8)?;
            let dst_start = (layout.y + row) * pitch + layout.x * cpp;
            for d in &mut out[dst_start..dst_start + samples] {
                *d = pump.get_bits(layout.bits)? as u16;
            }
        }
        Ok(())
    };
    match order {
        BitOrder::Plain => write_rows(&mut PlainPump::new(input)),
        BitOrder::Msb => write_rows(&mut MsbPump::new(input)),
        BitOrder::Msb16 => write_rows(&mut Msb16Pump::new(input)),
        BitOrder::Msb32 => write_rows(&mut Msb32Pump::new(input)),
    }
}

// =============================================================================
// Fixed packings
// =============================================================================

/// Byte layouts of fixed-width packed samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    /// Two 12-bit samples in 3 bytes, low nibble first
    Le12,
    /// `Le12` with a padding byte after every 10 pixels
    Le12Control,
    /// Two 12-bit samples in 3 bytes, high bits first
    Be12,
    /// `Be12` with a padding byte after every 10 pixels
    Be12Control,
    /// `Be12` with even rows first, odd rows from the next 2048-byte boundary
    Be12Interlaced,
    /// One 12-bit sample per big-endian 16-bit word, right aligned
    Be12Unpacked,
    /// One 12-bit sample per big-endian 16-bit word, left aligned
    Be12UnpackedLeftAligned,
    /// One 12-bit sample per little-endian 16-bit word, left aligned
    Le12UnpackedLeftAligned,
    /// One 14-bit sample per big-endian 16-bit word
    Be14Unpacked,
    Le16,
    Be16,
}

impl Packing {
    /// Input bytes per line of `width` pixels.
    pub fn line_bytes(self, width: usize) -> usize {
        match self {
            Packing::Le12 | Packing::Be12 | Packing::Be12Interlaced => width * 12 / 8,
            Packing::Le12Control | Packing::Be12Control => width * 12 / 8 + (width + 2) / 10,
            _ => width * 2,
        }
    }
}

#[inline]
fn unpack_le12(g: &[u8]) -> (u16, u16) {
    let (g1, g2, g3) = (u16::from(g[0]), u16::from(g[1]), u16::from(g[2]));
    (g1 | ((g2 & 0xf) << 8), (g2 >> 4) | (g3 << 4))
}

#[inline]
fn unpack_be12(g: &[u8]) -> (u16, u16) {
    let (g1, g2, g3) = (u16::from(g[0]), u16::from(g[1]), u16::from(g[2]));
    ((g1 << 4) | (g2 >> 4), ((g2 & 0x0f) << 8) | g3)
}

/// Decode one line of 12-bit pairs, skipping a byte after every 10 pixels
/// when `control` is set.
fn unpack_pairs(row: &mut [u16], src: &[u8], control: bool, unpack: fn(&[u8]) -> (u16, u16)) {
    let mut pos = 0;
    for (i, pair) in row.chunks_mut(2).enumerate() {
        let Some(group) = src.get(pos..pos + 3) else {
            return;
        };
        let (a, b) = unpack(group);
        pair[0] = a;
        if let Some(second) = pair.get_mut(1) {
            *second = b;
        }
        pos += 3;
        if control && (i * 2) % 10 == 8 {
            pos += 1;
        }
    }
}

/// Decode a `width` x `height` block at the image origin.
pub fn decode_packed(
    image: &mut RawImage,
    input: &[u8],
    width: usize,
    height: usize,
    packing: Packing,
) -> Result<(), DecodeError> {
    if width > image.width() || height > image.height() {
        return Err(DecodeError::corrupt("packed data larger than image"));
    }
    let line = packing.line_bytes(width);
    let rows = usable_rows(image, input.len(), line, height)?;
    let pitch = image.pitch();
    let out = image.pixels_u16_mut()?;

    if packing == Packing::Be12Interlaced {
        return decode_interlaced(out, pitch, input, width, rows);
    }

    for y in 0..rows {
        let src = &input[y * line..(y + 1) * line];
        let row = &mut out[y * pitch..y * pitch + width];
        match packing {
            Packing::Le12 => unpack_pairs(row, src, false, unpack_le12),
            Packing::Le12Control => unpack_pairs(row, src, true, unpack_le12),
            Packing::Be12 => unpack_pairs(row, src, false, unpack_be12),
            Packing::Be12Control => unpack_pairs(row, src, true, unpack_be12),
            _ => {
                for (d, s) in row.iter_mut().zip(src.chunks_exact(2)) {
                    let (g1, g2) = (u16::from(s[0]), u16::from(s[1]));
                    *d = match packing {
                        Packing::Be12Unpacked => ((g1 & 0x0f) << 8) | g2,
                        Packing::Be12UnpackedLeftAligned => ((g1 << 8) | (g2 & 0xf0)) >> 4,
                        Packing::Le12UnpackedLeftAligned => ((g2 << 8) | g1) >> 4,
                        Packing::Be14Unpacked => ((g1 & 0x3f) << 8) | g2,
                        Packing::Le16 => (g2 << 8) | g1,
                        _ => (g1 << 8) | g2,
                    };
                }
            }
        }
    }
    Ok(())
}

fn decode_interlaced(
    out: &mut [u16],
    pitch: usize,
    input: &[u8],
    width: usize,
    rows: usize,
) -> Result<(), DecodeError> {
    let line = width * 12 / 8;
    let half = (rows + 1) >> 1;
    let second_field = ((half * width * 3 / 2 >> 11) + 1) << 11;
    if rows > 1 && second_field > input.len() {
        return Err(DecodeError::Truncated(format!(
            "second interlaced field at {second_field} is past the end of the data"
        )));
    }

    for row in 0..rows {
        let y = row % half * 2 + row / half;
        let start = if row < half {
            row * line
        } else {
            second_field + (row - half) * line
        };
        let Some(src) = input.get(start..start + line) else {
            return Err(DecodeError::Truncated(format!(
                "interlaced row {y} is past the end of the data"
            )));
        };
        unpack_pairs(&mut out[y * pitch..y * pitch + width], src, false, unpack_be12);
    }
    Ok(())
}
