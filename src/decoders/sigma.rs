//! Sigma X3F decoder.
//!
//! The camera name comes from the `CAMMANUF`/`CAMMODEL` properties, or
//! from the preview's EXIF TIFF on models that no longer write them.

use tracing::debug;

use crate::codec::sigma::{decode_huffman, decode_true, FORMAT_HUFFMAN, FORMAT_TRUE, FORMAT_TRUE_QUATTRO};
use crate::error::DecodeError;
use crate::format::tiff::TiffRoot;
use crate::format::x3f::X3fFile;
use crate::image::{RawImage, SampleType};

use super::{make_model, RawDecoder, Session};

pub(super) struct X3fDecoder;

fn camera_name(x3f: &X3fFile, root: &TiffRoot) -> Option<(String, String)> {
    x3f.make_model().or_else(|| make_model(root).ok())
}

impl RawDecoder for X3fDecoder {
    fn version(&self) -> u32 {
        1
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        let x3f = X3fFile::parse(&session.file)?;
        if let Some((make, model)) = camera_name(&x3f, session.root) {
            session.check_camera_supported(&make, &model, "", self.version())?;
            return Ok(());
        }
        // without a name only the TRUE layouts identify the sensor
        match x3f.raw_image() {
            Some(raw) if raw.format == FORMAT_TRUE || raw.format == FORMAT_TRUE_QUATTRO => Ok(()),
            _ => Err(DecodeError::unsupported("X3F: unable to determine the camera name")),
        }
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let x3f = X3fFile::parse(&session.file)?;
        let raw = *x3f
            .raw_image()
            .ok_or_else(|| DecodeError::MissingRequiredTag("X3F raw image section".to_string()))?;
        debug!(format = raw.format, width = raw.width, height = raw.height, "X3F raw section");

        let mut image = session.allocate(raw.width, raw.height, 3, SampleType::U16)?;
        let file = &session.file;
        let end = raw.data_offset.saturating_add(raw.data_size);
        let threads = session.options.threads;
        match raw.format {
            FORMAT_TRUE | FORMAT_TRUE_QUATTRO => {
                let section = file.get(raw.data_offset..end.min(file.len())).ok_or_else(|| {
                    DecodeError::Truncated("X3F image data starts past the end of the file".to_string())
                })?;
                decode_true(&mut image, section, raw.format, threads)?;
            }
            FORMAT_HUFFMAN => {
                // the row table is at the end of the section
                let section = file.get(raw.data_offset..end).ok_or_else(|| {
                    DecodeError::Truncated("X3F image data ends past the end of the file".to_string())
                })?;
                decode_huffman(&mut image, section, threads)?;
            }
            compression => {
                return Err(DecodeError::UnsupportedCompression {
                    decoder: "X3F",
                    compression,
                })
            }
        }
        Ok(image)
    }

    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError> {
        let x3f = X3fFile::parse(&session.file)?;
        let Some((make, model)) = camera_name(&x3f, session.root) else {
            return Ok(());
        };
        let iso = x3f
            .property("ISO")
            .and_then(|iso| iso.trim().parse().ok())
            .unwrap_or(0);
        session.set_metadata(image, &make, &model, "", iso);
        Ok(())
    }
}
