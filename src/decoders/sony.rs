//! Sony ARW decoder.
//!
//! Three pixel layouts share the container: plain strips, ARW1 (the
//! column-major difference code, recognised by a byte count that does not
//! match the declared geometry) and ARW2 (8-bit block code or 12-bit
//! packed). White balance lives in the encrypted SR2 sub-directory.

use bytes::Bytes;
use tracing::debug;

use crate::codec::sony::{decode_arw1, decode_arw2_band, sony_curve};
use crate::codec::{decode_packed, BitOrder, Packing};
use crate::error::DecodeError;
use crate::format::tiff::{parse_ifd_at, sony_decrypt, Ifd, TiffTag};
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};
use crate::threading::decode_bands;

use super::{
    check_default_support, decode_uncompressed, dimensions, iso_speed, make_model, tolerate,
    RawDecoder, Session,
};

/// Tone curve knots of the raw directory.
const TAG_SONY_CURVE: u16 = 0x7010;
/// SR2 sub-directory location, length and decryption key.
const TAG_SR2_SUB_IFD_OFFSET: u16 = 0x7200;
const TAG_SR2_SUB_IFD_LENGTH: u16 = 0x7201;
const TAG_SR2_SUB_IFD_KEY: u16 = 0x7221;
/// White balance levels inside the decrypted SR2 directory.
const TAG_SONY_GRBG_LEVELS: u16 = 0x7303;
const TAG_SONY_RGGB_LEVELS: u16 = 0x7313;
/// Per-channel black levels inside the decrypted SR2 directory.
const TAG_SONY_BLACK_LEVEL: u16 = 0x7310;

/// The A100 stores its ARW1 stream behind the SubIFDs pointer.
const A100_MODEL: &str = "DSLR-A100";
const A100_WIDTH: usize = 3881;
const A100_HEIGHT: usize = 2608;

pub(super) struct ArwDecoder;

impl RawDecoder for ArwDecoder {
    fn version(&self) -> u32 {
        1
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        check_default_support(session, self.version())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let root = session.root;
        let Some(raw) = root.get_ifds_with_tag(TiffTag::StripOffsets).into_iter().next() else {
            return decode_a100(session);
        };

        let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
        if compression == 1 {
            return decode_uncompressed(session, raw, BitOrder::Plain);
        }
        if compression != 32767 {
            return Err(DecodeError::UnsupportedCompression {
                decoder: "ARW",
                compression,
            });
        }

        let offsets = raw.entry(TiffTag::StripOffsets)?;
        if offsets.count() != 1 {
            return Err(DecodeError::unsupported(format!(
                "ARW: {} strips",
                offsets.count()
            )));
        }
        let count = raw.entry(TiffTag::StripByteCounts)?.get_u32(0)?;
        let (width, mut height) = dimensions(raw)?;
        let mut bps = raw.entry(TiffTag::BitsPerSample)?.get_u32(0)?;

        // The NEX-3/5 mark 8-bit data as 12-bit; they carry a second Make
        let makes = root.get_ifds_with_tag(TiffTag::Make);
        if makes.len() > 1
            && makes.iter().any(|ifd| {
                ifd.get_entry(TiffTag::Make)
                    .is_some_and(|e| e.get_string().trim() == "SONY")
            })
        {
            bps = 8;
        }

        let arw1 = count as u64 * 8 != width as u64 * height as u64 * bps as u64;
        if arw1 {
            height += 8;
        }
        debug!(width, height, bps, arw1, "ARW geometry");

        let mut image = session.allocate(width, height, 1, SampleType::U16)?;
        if let Some(knots) = raw.get_entry(TAG_SONY_CURVE) {
            session.set_table(&mut image, &sony_curve(&knots.get_u16_array()?))?;
        }

        let input = session.stream(offsets.get_u32(0)?, count)?;
        if arw1 {
            let result = image.plane_mut().and_then(|mut plane| decode_arw1(&mut plane, input));
            tolerate(&mut image, result)?;
            return Ok(image);
        }
        match bps {
            8 => decode_bands(&mut image, session.options.threads, |plane| {
                decode_arw2_band(plane, input)
            })?,
            12 => {
                let result = decode_packed(&mut image, input, width, height, Packing::Le12);
                tolerate(&mut image, result)?;
            }
            other => {
                return Err(DecodeError::unsupported(format!(
                    "ARW2 with {other} bits per sample"
                )))
            }
        }
        Ok(image)
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
        session.set_metadata(image, &make, &model, "", iso_speed(session.root));

        if model == A100_MODEL {
            return Ok(());
        }
        if session.root.has_entry_recursive(TiffTag::DngPrivateData) {
            let sr2 = sr2_directory(session)?;
            apply_sr2(&sr2, image)?;
        }
        Ok(())
    }
}

fn decode_a100(session: &Session<'_>) -> Result<RawImage, DecodeError> {
    let (_, model) = make_model(session.root)?;
    if model != A100_MODEL {
        if session.has_hint("srf_format") {
            return Err(DecodeError::unsupported("SRF files are not supported"));
        }
        return Err(DecodeError::MissingRequiredTag("StripOffsets".to_string()));
    }
    let offset = session
        .root
        .get_entry_recursive(TiffTag::SubIfds)
        .ok_or_else(|| DecodeError::MissingRequiredTag("SubIFDs".to_string()))?
        .get_u32(0)?;
    let mut image = session.allocate(A100_WIDTH, A100_HEIGHT, 1, SampleType::U16)?;
    let input = session.stream_from(offset)?;
    let result = image.plane_mut().and_then(|mut plane| decode_arw1(&mut plane, input));
    tolerate(&mut image, result)?;
    Ok(image)
}

/// Locate, decrypt and parse the SR2 sub-directory.
fn sr2_directory(session: &Session<'_>) -> Result<Ifd, DecodeError> {
    let order = session.root.byte_order();
    let private = session
        .root
        .get_entry_recursive(TiffTag::DngPrivateData)
        .ok_or_else(|| DecodeError::MissingRequiredTag("SR2Private".to_string()))?
        .get_u32(0)?;
    let sr2_private = parse_ifd_at(session.file.clone(), order, 0, private)?;

    let missing = |name: &str| DecodeError::MissingRequiredTag(format!("SR2 {name}"));
    let offset = sr2_private
        .get_entry_recursive(TAG_SR2_SUB_IFD_OFFSET)
        .ok_or_else(|| missing("SubIFDOffset"))?
        .get_u32(0)?;
    let length = sr2_private
        .get_entry_recursive(TAG_SR2_SUB_IFD_LENGTH)
        .ok_or_else(|| missing("SubIFDLength"))?
        .get_u32(0)?;
    let key = sr2_private
        .get_entry_recursive(TAG_SR2_SUB_IFD_KEY)
        .ok_or_else(|| missing("SubIFDKey"))?;
    let key = match key.data() {
        [a, b, c, d] => u32::from_le_bytes([*a, *b, *c, *d]),
        other => {
            return Err(DecodeError::corrupt(format!(
                "SR2 key has {} bytes instead of 4",
                other.len()
            )))
        }
    };

    let start = offset as usize;
    let end = start.saturating_add(length as usize);
    let block = session.file.get(start..end).ok_or_else(|| {
        DecodeError::Truncated("SR2 block runs past the end of the file".to_string())
    })?;
    let decrypted = Bytes::from(sony_decrypt(block, key));
    Ok(parse_ifd_at(decrypted, order, offset, offset)?)
}

fn apply_sr2(sr2: &Ifd, image: &mut RawImage) -> Result<(), DecodeError> {
    if let Some(wb) = sr2.get_entry(TAG_SONY_GRBG_LEVELS) {
        if wb.count() != 4 {
            return Err(DecodeError::corrupt(format!(
                "SR2 white balance has {} entries instead of 4",
                wb.count()
            )));
        }
        image.metadata.wb_coeffs = Some([wb.get_f32(1)?, wb.get_f32(0)?, wb.get_f32(2)?]);
    } else if let Some(wb) = sr2.get_entry(TAG_SONY_RGGB_LEVELS) {
        if wb.count() != 4 {
            return Err(DecodeError::corrupt(format!(
                "SR2 white balance has {} entries instead of 4",
                wb.count()
            )));
        }
        image.metadata.wb_coeffs = Some([wb.get_f32(0)?, wb.get_f32(1)?, wb.get_f32(3)?]);
    }

    if let Some(black) = sr2.get_entry(TAG_SONY_BLACK_LEVEL) {
        if black.count() == 4 && image.black_areas.is_empty() {
            for (i, slot) in image.black_level_separate.iter_mut().enumerate() {
                *slot = black.get_i32(i)?;
            }
        }
    }
    Ok(())
}
