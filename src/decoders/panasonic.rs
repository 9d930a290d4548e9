//! Panasonic and Leica RW2/RWL decoder.
//!
//! The raw directory of an RW2 file uses Panasonic's own tag numbers for
//! geometry, levels and the strip offset. The database mode is the aspect
//! ratio closest to the sensor size, since the same body writes several.

use tracing::debug;

use crate::codec::panasonic::PanasonicDecoder;
use crate::codec::{read_uncompressed, BitOrder, StripLayout};
use crate::error::DecodeError;
use crate::format::tiff::{Ifd, TiffTag};
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};
use crate::threading::decode_bands;

use super::{make_model, RawDecoder, Session};

const TAG_SENSOR_WIDTH: u16 = 0x0002;
const TAG_SENSOR_HEIGHT: u16 = 0x0003;
const TAG_WB_RED_OLD: u16 = 0x0011;
const TAG_WB_BLUE_OLD: u16 = 0x0012;
const TAG_ISO: u16 = 0x0017;
const TAG_BLACK_RED: u16 = 0x001C;
const TAG_BLACK_GREEN: u16 = 0x001D;
const TAG_BLACK_BLUE: u16 = 0x001E;
const TAG_WB_RED: u16 = 0x0024;
const TAG_WB_GREEN: u16 = 0x0025;
const TAG_WB_BLUE: u16 = 0x0026;
const TAG_STRIP_OFFSET: u16 = 0x0118;

/// Split point of the swapped stream blocks.
const LOAD_FLAGS: usize = 0x2008;
/// Stored black levels are this much below the real ones.
const BLACK_OFFSET: i32 = 15;

pub(super) struct Rw2Decoder;

impl RawDecoder for Rw2Decoder {
    fn version(&self) -> u32 {
        2
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        let (make, model) = make_model(session.root)?;
        let mode = raw_directory(session)
            .ok()
            .and_then(|(raw, _)| sensor_size(raw).ok())
            .map_or("", |(w, h)| guess_mode(w, h));
        let mode = if session.has_camera(&make, &model, mode) { mode } else { "" };
        session.check_camera_supported(&make, &model, mode, self.version())?;
        Ok(())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let (raw, old_style) = raw_directory(session)?;
        let (width, height) = sensor_size(raw)?;
        let mut image = session.allocate(width, height, 1, SampleType::U16)?;

        if old_style {
            decode_old_style(session, raw, &mut image)?;
            return Ok(image);
        }

        let offsets = raw.entry(TAG_STRIP_OFFSET)?;
        if offsets.count() != 1 {
            return Err(DecodeError::unsupported(format!(
                "RW2: {} strips",
                offsets.count()
            )));
        }
        let input = session.stream_from(offsets.get_u32(0)?)?;
        let decoder = PanasonicDecoder::new(input, LOAD_FLAGS, session.has_hint("zero_is_bad"));
        decode_bands(&mut image, session.options.threads, |plane| {
            decoder.decode_band(plane)
        })?;

        let bad = decoder.take_bad_pixels();
        if !bad.is_empty() {
            debug!(count = bad.len(), "zero samples marked bad");
        }
        for (x, y) in bad {
            image.mark_bad_pixel(x, y);
        }
        Ok(image)
    }

    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError> {
        image.cfa = ColorFilterArray::new_2x2(
            CfaColor::Blue,
            CfaColor::Green,
            CfaColor::Green,
            CfaColor::Red,
        );
        let (make, model) = make_model(session.root)?;
        let (raw, _) = raw_directory(session)?;
        let iso = raw
            .get_entry(TAG_ISO)
            .and_then(|e| e.get_u32(0).ok())
            .unwrap_or(0);

        let mode = guess_mode(image.width(), image.height());
        if session.has_camera(&make, &model, mode) {
            session.set_metadata(image, &make, &model, mode, iso);
        } else {
            session.set_metadata(image, &make, &model, "", iso);
            image.metadata.mode = mode.to_string();
        }

        if let (Some(red), Some(green), Some(blue)) = (
            raw.get_entry(TAG_BLACK_RED),
            raw.get_entry(TAG_BLACK_GREEN),
            raw.get_entry(TAG_BLACK_BLUE),
        ) {
            let black = [
                red.get_u32(0)? as i32 + BLACK_OFFSET,
                green.get_u32(0)? as i32 + BLACK_OFFSET,
                blue.get_u32(0)? as i32 + BLACK_OFFSET,
            ];
            apply_black(image, black);
        }

        if let (Some(r), Some(g), Some(b)) = (
            raw.get_entry(TAG_WB_RED),
            raw.get_entry(TAG_WB_GREEN),
            raw.get_entry(TAG_WB_BLUE),
        ) {
            image.metadata.wb_coeffs =
                Some([r.get_u32(0)? as f32, g.get_u32(0)? as f32, b.get_u32(0)? as f32]);
        } else if let (Some(r), Some(b)) =
            (raw.get_entry(TAG_WB_RED_OLD), raw.get_entry(TAG_WB_BLUE_OLD))
        {
            image.metadata.wb_coeffs = Some([r.get_u32(0)? as f32, 256.0, b.get_u32(0)? as f32]);
        }
        Ok(())
    }
}

/// The raw directory, and whether it is the old plain-strip layout.
fn raw_directory<'r>(session: &Session<'r>) -> Result<(&'r Ifd, bool), DecodeError> {
    if let Some(raw) = session.root.get_ifds_with_tag(TAG_STRIP_OFFSET).into_iter().next() {
        return Ok((raw, false));
    }
    match session.root.get_ifds_with_tag(TiffTag::StripOffsets).into_iter().next() {
        Some(raw) => Ok((raw, true)),
        None => Err(DecodeError::MissingRequiredTag("PanasonicStripOffset".to_string())),
    }
}

fn sensor_size(raw: &Ifd) -> Result<(usize, usize), DecodeError> {
    let width = raw.entry(TAG_SENSOR_WIDTH)?.get_u32(0)? as usize;
    let height = raw.entry(TAG_SENSOR_HEIGHT)?.get_u32(0)? as usize;
    Ok((width, height))
}

/// Early bodies store plain 16-bit little-endian samples.
fn decode_old_style(
    session: &Session<'_>,
    raw: &Ifd,
    image: &mut RawImage,
) -> Result<(), DecodeError> {
    let offsets = raw.entry(TiffTag::StripOffsets)?;
    if offsets.count() != 1 {
        return Err(DecodeError::unsupported(format!(
            "RW2: {} strips in an old-style file",
            offsets.count()
        )));
    }
    let (width, height) = (image.width(), image.height());
    let count = raw.entry(TiffTag::StripByteCounts)?.get_u32(0)?;
    if count as usize != width * height * 2 {
        return Err(DecodeError::corrupt(format!(
            "RW2: {count} bytes for a {width}x{height} 16-bit image"
        )));
    }
    let input = session.stream(offsets.get_u32(0)?, count)?;
    let layout = StripLayout {
        x: 0,
        y: 0,
        width,
        height,
        input_pitch: width * 2,
        bits: 16,
    };
    read_uncompressed(image, input, layout, BitOrder::Plain, raw.byte_order())
}

/// Aspect ratio name closest to `width / height`.
fn guess_mode(width: usize, height: usize) -> &'static str {
    if height == 0 {
        return "";
    }
    let ratio = width as f32 / height as f32;
    let candidates = [
        ("16:9", 16.0 / 9.0),
        ("3:2", 3.0 / 2.0),
        ("4:3", 4.0 / 3.0),
        ("1:1", 1.0),
    ];
    let mut best = candidates[0];
    for candidate in candidates {
        if (ratio - candidate.1).abs() < (ratio - best.1).abs() {
            best = candidate;
        }
    }
    best.0
}

/// Spread red, green and blue black levels over the 2x2 CFA.
fn apply_black(image: &mut RawImage, black: [i32; 3]) {
    for y in 0..2 {
        for x in 0..2 {
            let level = match image.cfa.color_at(x, y) {
                CfaColor::Red => black[0],
                CfaColor::Green => black[1],
                CfaColor::Blue => black[2],
                _ => continue,
            };
            image.black_level_separate[y * 2 + x] = level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guess_mode() {
        assert_eq!(guess_mode(4000, 3000), "4:3");
        assert_eq!(guess_mode(4000, 2667), "3:2");
        assert_eq!(guess_mode(4000, 2250), "16:9");
        assert_eq!(guess_mode(3000, 3000), "1:1");
        assert_eq!(guess_mode(10, 0), "");
    }

    #[test]
    fn test_black_follows_cfa() {
        let mut image = RawImage::new(4, 4, 1, SampleType::U16).unwrap();
        image.cfa = ColorFilterArray::new_2x2(
            CfaColor::Blue,
            CfaColor::Green,
            CfaColor::Green,
            CfaColor::Red,
        );
        apply_black(&mut image, [140, 141, 142]);
        assert_eq!(image.black_level_separate, [142, 141, 141, 140]);
    }
}
