//! Samsung SRW decoder.

use tracing::debug;

use crate::codec::samsung::{decode_v1, decode_v2, decode_v3, parse_v3_header};
use crate::codec::BitOrder;
use crate::error::DecodeError;
use crate::format::tiff::{Ifd, TiffRoot, TiffTag};
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};

use super::{
    check_default_support, decode_uncompressed, dimensions, first_ifd_with, iso_speed,
    make_model, tolerate, RawDecoder, Session,
};

const COMPRESSION_UNCOMPRESSED: u32 = 32769;
const COMPRESSION_V1: u32 = 32770;
const COMPRESSION_V2: u32 = 32772;
const COMPRESSION_V3: u32 = 32773;

/// Offset of the per-row offset table of v1 streams.
const TAG_LINE_TABLE: u16 = 0xA010;
const TAG_WB_RGGB_LEVELS_UNCORRECTED: u16 = 0xA021;
const TAG_WB_RGGB_LEVELS_BLACK: u16 = 0xA028;

pub(super) struct SrwDecoder;

impl RawDecoder for SrwDecoder {
    fn version(&self) -> u32 {
        3
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        check_default_support(session, self.version())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let raw = first_ifd_with(session.root, TiffTag::StripOffsets)?;
        let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
        let bits = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)?;
        debug!(compression, bits, "SRW raw directory");

        match compression {
            COMPRESSION_UNCOMPRESSED => {
                decode_uncompressed(session, raw, bit_order(session, false))
            }
            COMPRESSION_V1 if !raw.has_entry(TAG_LINE_TABLE) => {
                decode_uncompressed(session, raw, bit_order(session, bits == 12))
            }
            COMPRESSION_V1 => {
                require_single_strip(raw)?;
                let (width, height) = dimensions(raw)?;
                let offset = raw.entry(TiffTag::StripOffsets)?.get_u32(0)?;
                let table_offset = raw.entry(TAG_LINE_TABLE)?.get_u32(0)?;
                let line_table = session.stream_from(table_offset)?;

                let mut image = session.allocate(width, height, 1, SampleType::U16)?;
                let file = &session.file[..];
                let result = image
                    .plane_mut()
                    .and_then(|mut plane| decode_v1(&mut plane, file, offset as usize, line_table));
                tolerate(&mut image, result)?;
                Ok(image)
            }
            COMPRESSION_V2 => {
                require_single_strip(raw)?;
                let (width, height) = dimensions(raw)?;
                let offset = raw.entry(TiffTag::StripOffsets)?.get_u32(0)?;
                let input = session.stream_from(offset)?;

                let mut image = session.allocate(width, height, 1, SampleType::U16)?;
                let result = image
                    .plane_mut()
                    .and_then(|mut plane| decode_v2(&mut plane, input, bits));
                tolerate(&mut image, result)?;
                Ok(image)
            }
            COMPRESSION_V3 => {
                let offset = raw.entry(TiffTag::StripOffsets)?.get_u32(0)?;
                let input = session.stream_from(offset)?;
                let header = parse_v3_header(input)?;
                debug!(?header, "SRW v3 stream header");

                let mut image = session.allocate(header.width, header.height, 1, SampleType::U16)?;
                let result = image
                    .plane_mut()
                    .and_then(|mut plane| decode_v3(&mut plane, input, &header));
                tolerate(&mut image, result)?;
                Ok(image)
            }
            other => Err(DecodeError::UnsupportedCompression {
                decoder: "SRW",
                compression: other,
            }),
        }
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
        if !session.has_camera(&make, &model, "") {
            if let Some(cfa) = file_cfa(root)? {
                image.cfa = cfa;
            }
        }
        session.set_metadata(image, &make, &model, "", iso_speed(root));

        if let (Some(levels), Some(black)) = (
            root.get_entry_recursive(TAG_WB_RGGB_LEVELS_UNCORRECTED),
            root.get_entry_recursive(TAG_WB_RGGB_LEVELS_BLACK),
        ) {
            if levels.count() == 4 && black.count() == 4 {
                let levels = levels.get_u32_array()?;
                let black = black.get_u32_array()?;
                image.metadata.wb_coeffs = Some(white_balance(&levels, &black));
            }
        }
        Ok(())
    }
}

/// `msb_override` forces the bit order either way.
fn bit_order(session: &Session<'_>, msb_default: bool) -> BitOrder {
    let msb = session
        .hint("msb_override")
        .map_or(msb_default, |v| v == "true");
    if msb {
        BitOrder::Msb
    } else {
        BitOrder::Plain
    }
}

fn require_single_strip(raw: &Ifd) -> Result<(), DecodeError> {
    let strips = raw.entry(TiffTag::StripOffsets)?.count();
    if strips != 1 {
        return Err(DecodeError::unsupported(format!(
            "SRW: only one slice supported, found {strips}"
        )));
    }
    Ok(())
}

/// CFA from the EXIF pattern tags, used for cameras the database lacks.
fn file_cfa(root: &TiffRoot) -> Result<Option<ColorFilterArray>, DecodeError> {
    let Some(ifd) = root.get_ifds_with_tag(TiffTag::CfaPattern).into_iter().next() else {
        return Ok(None);
    };
    let Some(dim) = ifd.get_entry(TiffTag::CfaRepeatPatternDim) else {
        return Ok(None);
    };
    let (rows, cols) = (dim.get_u16(0)? as usize, dim.get_u16(1)? as usize);
    if rows != 2 || cols != 2 {
        return Err(DecodeError::unsupported(format!(
            "SRW: {cols}x{rows} CFA pattern"
        )));
    }
    let codes = ifd.entry(TiffTag::CfaPattern)?.data();
    if codes.len() != 4 {
        return Err(DecodeError::corrupt(format!(
            "SRW: 2x2 CFA with {} pattern entries",
            codes.len()
        )));
    }
    let mut colors = [CfaColor::Unknown; 4];
    for (slot, &code) in colors.iter_mut().zip(codes) {
        *slot = match code {
            0..=2 => CfaColor::from_exif(code),
            _ => {
                return Err(DecodeError::unsupported(format!(
                    "SRW: CFA color code {code}"
                )))
            }
        };
    }
    Ok(Some(ColorFilterArray::new_2x2(
        colors[0], colors[1], colors[2], colors[3],
    )))
}

/// RGGB levels minus their black offsets, second green dropped.
fn white_balance(levels: &[u32], black: &[u32]) -> [f32; 3] {
    let level = |i: usize| levels[i] as f32 - black[i] as f32;
    [level(0), level(1), level(3)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_white_balance_subtracts_black() {
        let wb = white_balance(&[2048, 1024, 1030, 1800], &[64, 64, 64, 64]);
        assert_eq!(wb, [1984.0, 960.0, 1736.0]);
    }
}
