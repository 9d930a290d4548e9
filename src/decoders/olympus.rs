//! Olympus ORF decoder.

use tracing::debug;

use crate::codec::olympus::decode_orf;
use crate::codec::{decode_packed, Packing};
use crate::error::DecodeError;
use crate::format::tiff::{ByteOrder, Ifd, TiffRoot, TiffTag};
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};

use super::{
    check_default_support, dimensions, first_ifd_with, iso_speed, make_model, tolerate,
    RawDecoder, Session,
};

const TAG_RED_MULTIPLIER: u16 = 0x1017;
const TAG_BLUE_MULTIPLIER: u16 = 0x1018;
/// Image processing directory inside the maker note.
const TAG_IMAGE_PROCESSING: u16 = 0x2040;
/// Red and blue levels in the image processing directory.
const TAG_IP_WB_LEVELS: u16 = 0x0100;
/// RGGB black levels in the image processing directory.
const TAG_IP_BLACK_LEVEL: u16 = 0x0600;

/// The codec reads a few bytes past the declared strip.
const STREAM_SLACK: u32 = 3;

pub(super) struct OrfDecoder;

impl RawDecoder for OrfDecoder {
    fn version(&self) -> u32 {
        2
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        check_default_support(session, self.version())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let raw = first_ifd_with(session.root, TiffTag::StripOffsets)?;
        let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
        if compression != 1 {
            return Err(DecodeError::UnsupportedCompression {
                decoder: "ORF",
                compression,
            });
        }

        let offsets = raw.entry(TiffTag::StripOffsets)?;
        let counts = raw.entry(TiffTag::StripByteCounts)?;
        if offsets.count() != 1 {
            return decode_old(session, raw);
        }
        if counts.count() != offsets.count() {
            return Err(DecodeError::corrupt(format!(
                "ORF: {} byte counts for {} strips",
                counts.count(),
                offsets.count()
            )));
        }

        let (width, height) = dimensions(raw)?;
        let offset = offsets.get_u32(0)?;
        let count = counts.get_u32(0)?;
        if offset as u64 + count as u64 > session.file.len() as u64 {
            return Err(DecodeError::Truncated(
                "ORF: strip runs past the end of the file".to_string(),
            ));
        }

        let mut image = session.allocate(width, height, 1, SampleType::U16)?;
        if session.has_hint("force_uncompressed") {
            let input = session.stream_from(offset)?;
            let result = decode_packed(&mut image, input, width, height, Packing::Le12Control);
            tolerate(&mut image, result)?;
            return Ok(image);
        }

        let input = session.stream(offset, count.saturating_add(STREAM_SLACK))?;
        let result = image.plane_mut().and_then(|mut plane| decode_orf(&mut plane, input));
        tolerate(&mut image, result)?;
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
        let (make, model) = make_model(root)?;
        session.set_metadata(image, &make, &model, "", iso_speed(root));

        if let (Some(red), Some(blue)) = (
            root.get_entry_recursive(TAG_RED_MULTIPLIER),
            root.get_entry_recursive(TAG_BLUE_MULTIPLIER),
        ) {
            image.metadata.wb_coeffs = Some([
                f32::from(red.get_u16(0)?),
                256.0,
                f32::from(blue.get_u16(0)?),
            ]);
            return Ok(());
        }

        let Some(processing) = image_processing(root) else {
            return Ok(());
        };
        if let Some(wb) = processing.get_entry(TAG_IP_WB_LEVELS) {
            if wb.count() == 2 || wb.count() == 4 {
                image.metadata.wb_coeffs =
                    Some([f32::from(wb.get_u16(0)?), 256.0, f32::from(wb.get_u16(1)?)]);
            }
        }
        if let Some(black) = processing.get_entry(TAG_IP_BLACK_LEVEL) {
            if black.count() == 4 {
                let levels = [
                    black.get_u16(0)?,
                    black.get_u16(1)?,
                    black.get_u16(2)?,
                    black.get_u16(3)?,
                ];
                apply_black_levels(image, levels);
            }
        }
        Ok(())
    }
}

/// Multi-strip files from early bodies: packing is told apart by size.
fn decode_old(session: &Session<'_>, raw: &Ifd) -> Result<RawImage, DecodeError> {
    let (width, height) = dimensions(raw)?;
    let offset = raw.entry(TiffTag::StripOffsets)?.get_u32(0)?;
    let input = session.stream_from(offset)?;
    let packing = if input.len() >= width * height * 2 {
        match raw.byte_order() {
            ByteOrder::LittleEndian => Packing::Le12UnpackedLeftAligned,
            ByteOrder::BigEndian => Packing::Be12UnpackedLeftAligned,
        }
    } else if input.len() >= width * height * 3 / 2 {
        Packing::Be12Interlaced
    } else {
        return Err(DecodeError::unsupported(
            "ORF: unknown encoding of multi-strip image",
        ));
    };
    debug!(width, height, ?packing, "old ORF layout");

    let mut image = session.allocate(width, height, 1, SampleType::U16)?;
    let result = decode_packed(&mut image, input, width, height, packing);
    tolerate(&mut image, result)?;
    Ok(image)
}

fn image_processing(root: &TiffRoot) -> Option<&Ifd> {
    root.all_ifds()
        .into_iter()
        .find(|ifd| ifd.parent_tag() == Some(TAG_IMAGE_PROCESSING))
}

/// Spread RGGB black levels over the CFA and lower the white point by
/// the same amount the black level moved.
fn apply_black_levels(image: &mut RawImage, black: [u16; 4]) {
    for i in 0..4 {
        let level = match image.cfa.color_at(i & 1, i >> 1) {
            CfaColor::Red => black[0],
            CfaColor::Blue => black[3],
            CfaColor::Green if i < 2 => black[1],
            CfaColor::Green => black[2],
            _ => continue,
        };
        image.black_level_separate[i] = i32::from(level);
    }
    let shift = i64::from(image.black_level) - i64::from(image.black_level_separate[0]);
    image.white_point = (i64::from(image.white_point) - shift).clamp(0, i64::from(u32::MAX)) as u32;
}
