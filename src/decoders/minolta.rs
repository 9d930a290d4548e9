//! Minolta MRW decoder.

use crate::codec::{decode_packed, Packing};
use crate::error::DecodeError;
use crate::format::mrw::MrwHeader;
use crate::image::{CfaColor, ColorFilterArray, RawImage, SampleType};

use super::{check_default_support, iso_speed, make_model, tolerate, RawDecoder, Session};

pub(super) struct MrwDecoder;

impl RawDecoder for MrwDecoder {
    fn version(&self) -> u32 {
        0
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        check_default_support(session, self.version())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let header = MrwHeader::parse(&session.file)?;
        let (width, height) = (header.width, header.height);
        let mut image = session.allocate(width, height, 1, SampleType::U16)?;
        let input = session.file.get(header.data_offset..).unwrap_or_default();
        let packing = if header.packed {
            Packing::Be12
        } else {
            Packing::Be12Unpacked
        };
        let result = decode_packed(&mut image, input, width, height, packing);
        tolerate(&mut image, result)?;
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

        let header = MrwHeader::parse(&session.file)?;
        if let Some(wb) = header.wb {
            image.metadata.wb_coeffs = Some(wb);
        }
        Ok(())
    }
}
