//! Headerless sensor dumps.
//!
//! Nothing in the file identifies the camera; the database maps the exact
//! file size to the geometry, bit depth and bit order.

use crate::camera::NakedCamera;
use crate::codec::{read_uncompressed, StripLayout};
use crate::error::DecodeError;
use crate::format::tiff::ByteOrder;
use crate::image::{RawImage, SampleType};

use super::{RawDecoder, Session};

pub(super) struct NakedDecoder;

impl RawDecoder for NakedDecoder {
    fn version(&self) -> u32 {
        0
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        let camera = naked_camera(session)?;
        let (make, model) = (camera.make.clone(), camera.model.clone());
        session.check_camera_supported(&make, &model, "", self.version())?;
        Ok(())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let camera = naked_camera(session)?;
        let order = camera.bit_order().ok_or_else(|| {
            DecodeError::unsupported(format!("unknown bit order '{}'", camera.order))
        })?;
        if camera.bits == 0 || camera.bits > 16 {
            return Err(DecodeError::unsupported(format!(
                "{} bits per sample in a headerless file",
                camera.bits
            )));
        }

        let mut image = session.allocate(camera.width, camera.height, 1, SampleType::U16)?;
        let offset = u32::try_from(camera.offset)
            .map_err(|_| DecodeError::corrupt("headerless data offset out of range"))?;
        let input = session.stream_from(offset)?;
        let layout = StripLayout {
            x: 0,
            y: 0,
            width: camera.width,
            height: camera.height,
            input_pitch: camera.width * camera.bits as usize / 8,
            bits: camera.bits,
        };
        read_uncompressed(&mut image, input, layout, order, ByteOrder::LittleEndian)?;
        Ok(image)
    }

    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError> {
        let camera = naked_camera(session)?;
        session.set_metadata(image, &camera.make, &camera.model, "", 0);
        Ok(())
    }
}

fn naked_camera<'a>(session: &Session<'a>) -> Result<&'a NakedCamera, DecodeError> {
    let cameras: &'a crate::camera::CameraDb = &session.options.cameras;
    cameras
        .find_naked(session.file.len() as u64)
        .ok_or_else(|| DecodeError::NotThisFormat("no headerless camera of this file size".to_string()))
}
