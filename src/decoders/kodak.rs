//! Kodak DCR/KDC decoder.
//!
//! Covers the TIFF-based bodies storing plain strips or a single lossless
//! JPEG strip. Kodak's own 65000 compression is rejected.

use crate::codec::{BitOrder, LJpegDecoder};
use crate::error::DecodeError;
use crate::format::tiff::{Ifd, TiffTag};
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};

use super::{
    check_default_support, decode_uncompressed, dimensions, iso_speed, make_model, tolerate,
    RawDecoder, Session,
};

const COMPRESSION_LJPEG: u32 = 7;
/// Kodak tone curve in the maker note.
const TAG_LINEARIZATION: u16 = 0x090D;

pub(super) struct DcrDecoder;

impl RawDecoder for DcrDecoder {
    fn version(&self) -> u32 {
        0
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        check_default_support(session, self.version())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let raw = raw_directory(session)?;
        let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
        let mut image = match compression {
            1 => {
                let bps = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)?;
                let order = if bps == 16 { BitOrder::Plain } else { BitOrder::Msb };
                decode_uncompressed(session, raw, order)?
            }
            COMPRESSION_LJPEG => decode_ljpeg(session, raw)?,
            other => {
                return Err(DecodeError::UnsupportedCompression {
                    decoder: "DCR",
                    compression: other,
                })
            }
        };

        if let Some(curve) = session.root.get_entry_recursive(TAG_LINEARIZATION) {
            let curve = curve.get_u16_array()?;
            if !curve.is_empty() {
                session.set_table(&mut image, &curve)?;
            }
        }
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
        if let Some(cfa) = file_cfa(raw_directory(session)?)? {
            image.cfa = cfa;
        }
        let (make, model) = make_model(root)?;
        session.set_metadata(image, &make, &model, "", iso_speed(root));
        Ok(())
    }
}

/// First directory describing the sensor data.
fn raw_directory<'r>(session: &Session<'r>) -> Result<&'r Ifd, DecodeError> {
    let root = session.root;
    root.get_ifds_with_tag(TiffTag::CfaPattern)
        .into_iter()
        .find(|ifd| ifd.has_entry(TiffTag::StripOffsets))
        .or_else(|| root.get_ifds_with_tag(TiffTag::StripOffsets).into_iter().next())
        .ok_or_else(|| DecodeError::MissingRequiredTag("StripOffsets".to_string()))
}

fn decode_ljpeg(session: &Session<'_>, raw: &Ifd) -> Result<RawImage, DecodeError> {
    let offsets = raw.entry(TiffTag::StripOffsets)?;
    let counts = raw.entry(TiffTag::StripByteCounts)?;
    if offsets.count() != 1 || counts.count() != 1 {
        return Err(DecodeError::unsupported(format!(
            "DCR: {} lossless JPEG strips",
            offsets.count()
        )));
    }
    let (width, height) = dimensions(raw)?;
    let mut image = session.allocate(width, height, 1, SampleType::U16)?;
    let input = session.stream(offsets.get_u32(0)?, counts.get_u32(0)?)?;
    let result = image.plane_mut().and_then(|mut plane| {
        LJpegDecoder::new(input)
            .dng_compatible(false)
            .decode(&mut plane, 0, 0)
            .map(|_| ())
    });
    tolerate(&mut image, result)?;
    Ok(image)
}

/// 2x2 pattern from the EXIF CFA tags, if present and well formed.
fn file_cfa(raw: &Ifd) -> Result<Option<ColorFilterArray>, DecodeError> {
    let (Some(dim), Some(pattern)) = (
        raw.get_entry(TiffTag::CfaRepeatPatternDim),
        raw.get_entry(TiffTag::CfaPattern),
    ) else {
        return Ok(None);
    };
    let (rows, cols) = (dim.get_u16(0)? as usize, dim.get_u16(1)? as usize);
    let colors = pattern
        .data()
        .iter()
        .map(|&code| CfaColor::from_exif(code))
        .collect();
    Ok(ColorFilterArray::from_colors(cols, rows, colors))
}
