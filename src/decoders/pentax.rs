//! Pentax and Ricoh PEF decoder.

use crate::codec::pentax::{decode_pef, default_table, table_from_makernote};
use crate::codec::BitOrder;
use crate::error::DecodeError;
use crate::format::tiff::TiffTag;
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};

use super::{
    check_default_support, decode_uncompressed, dimensions, first_ifd_with, iso_speed,
    make_model, tolerate, RawDecoder, Session,
};

const COMPRESSION_PENTAX: u32 = 65535;

/// Huffman tree of the compressed stream, in the maker note.
const TAG_HUFFMAN_TABLE: u16 = 0x0220;
/// RGGB black levels in the maker note.
const TAG_BLACK_LEVEL: u16 = 0x0200;
/// RGGB white balance levels in the maker note.
const TAG_WB_LEVELS: u16 = 0x0201;

pub(super) struct PefDecoder;

impl RawDecoder for PefDecoder {
    fn version(&self) -> u32 {
        0
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        check_default_support(session, self.version())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let raw = first_ifd_with(session.root, TiffTag::StripOffsets)?;
        let compression = raw.entry(TiffTag::Compression)?.get_u32(0)?;
        match compression {
            1 | 32773 => return decode_uncompressed(session, raw, BitOrder::Msb),
            COMPRESSION_PENTAX => {}
            other => {
                return Err(DecodeError::UnsupportedCompression {
                    decoder: "PEF",
                    compression: other,
                })
            }
        }

        let offsets = raw.entry(TiffTag::StripOffsets)?;
        let counts = raw.entry(TiffTag::StripByteCounts)?;
        if offsets.count() != 1 {
            return Err(DecodeError::unsupported(format!(
                "PEF: {} strips in a compressed image",
                offsets.count()
            )));
        }
        if counts.count() != offsets.count() {
            return Err(DecodeError::corrupt(format!(
                "PEF: {} byte counts for {} strips",
                counts.count(),
                offsets.count()
            )));
        }
        let (offset, count) = (offsets.get_u32(0)?, counts.get_u32(0)?);
        if offset as u64 + count as u64 > session.file.len() as u64 {
            return Err(DecodeError::Truncated(
                "PEF: strip runs past the end of the file".to_string(),
            ));
        }

        let table = match session.root.get_entry_recursive(TAG_HUFFMAN_TABLE) {
            Some(entry) => table_from_makernote(entry.data())?,
            None => default_table()?,
        };

        let (width, height) = dimensions(raw)?;
        let mut image = session.allocate(width, height, 1, SampleType::U16)?;
        let input = session.stream(offset, count)?;
        let result = image
            .plane_mut()
            .and_then(|mut plane| decode_pef(&mut plane, input, &table));
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

        if let Some(black) = root.get_entry_recursive(TAG_BLACK_LEVEL) {
            if black.count() == 4 {
                for (i, slot) in image.black_level_separate.iter_mut().enumerate() {
                    *slot = black.get_u32(i)? as i32;
                }
            }
        }
        if let Some(wb) = root.get_entry_recursive(TAG_WB_LEVELS) {
            if wb.count() == 4 {
                image.metadata.wb_coeffs = Some([
                    wb.get_u32(0)? as f32,
                    wb.get_u32(1)? as f32,
                    wb.get_u32(3)? as f32,
                ]);
            }
        }
        Ok(())
    }
}
