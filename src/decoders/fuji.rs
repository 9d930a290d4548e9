//! Fujifilm RAF decoder.
//!
//! Only uncompressed data is supported. Newer bodies describe the strip in
//! the Fuji private directory of the raw TIFF; older ones store the sensor
//! dump bare, sized by the Fuji directory of the RAF header.

use tracing::debug;

use crate::codec::{decode_packed, read_uncompressed, BitOrder, Packing, StripLayout};
use crate::error::DecodeError;
use crate::format::raf::{fuji_tag, FujiDirectory, RafHeader};
use crate::format::tiff::{ByteOrder, Ifd};
use crate::image::{RawImage, Rect, SampleType};

use super::{check_default_support, iso_speed, make_model, tolerate, RawDecoder, Session};

/// Tags of the Fuji private directory inside the raw TIFF.
const TAG_RAW_WIDTH: u16 = 0xF001;
const TAG_RAW_HEIGHT: u16 = 0xF002;
const TAG_BITS_PER_SAMPLE: u16 = 0xF003;
const TAG_STRIP_OFFSETS: u16 = 0xF007;
const TAG_STRIP_BYTE_COUNTS: u16 = 0xF008;
const TAG_BLACK_LEVEL: u16 = 0xF00A;
const TAG_WB_GRB_LEVELS: u16 = 0xF00E;

/// Below this many bits per pixel the strip is compressed.
const MIN_UNCOMPRESSED_BITS: usize = 10;

pub(super) struct RafDecoder;

/// Where the sensor data sits and how it is laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RawStrip {
    offset: u32,
    count: u32,
    width: usize,
    height: usize,
    bps: u32,
    order: ByteOrder,
}

impl RawDecoder for RafDecoder {
    fn version(&self) -> u32 {
        1
    }

    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError> {
        check_default_support(session, self.version())
    }

    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError> {
        let header = RafHeader::parse(&session.file)?;
        let directory = FujiDirectory::parse(&session.file, header.directory_offset)?;
        let strip = locate_strip(session, &header, &directory)?;
        debug!(?strip, "RAF raw strip");

        if strip.width == 0 || strip.height == 0 {
            return Err(DecodeError::MissingRequiredTag("RawImageFullSize".to_string()));
        }
        if (strip.count as usize) * 8 / (strip.width * strip.height) < MIN_UNCOMPRESSED_BITS {
            return Err(DecodeError::unsupported("compressed RAF data"));
        }

        let double_width = session.has_hint("double_width_unpacked");
        let width = if double_width { strip.width * 2 } else { strip.width };
        let mut image = session.allocate(width, strip.height, 1, SampleType::U16)?;
        let input = session.stream(strip.offset, strip.count)?;

        if double_width {
            let result = decode_packed(&mut image, input, width, strip.height, Packing::Le16);
            tolerate(&mut image, result)?;
        } else if strip.order == ByteOrder::BigEndian {
            let result = decode_packed(&mut image, input, width, strip.height, Packing::Be16);
            tolerate(&mut image, result)?;
        } else {
            let order = if session.has_hint("jpeg32_bitorder") {
                BitOrder::Msb32
            } else {
                BitOrder::Plain
            };
            let layout = StripLayout {
                x: 0,
                y: 0,
                width,
                height: strip.height,
                input_pitch: width * strip.bps as usize / 8,
                bits: strip.bps,
            };
            read_uncompressed(&mut image, input, layout, order, strip.order)?;
        }
        Ok(image)
    }

    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError> {
        let root = session.root;
        let (make, model) = make_model(root)?;
        let known = session.has_camera(&make, &model, "");
        session.set_metadata(image, &make, &model, "", iso_speed(root));

        let header = RafHeader::parse(&session.file)?;
        let directory = FujiDirectory::parse(&session.file, header.directory_offset)?;

        if !known {
            if let Some(black) = root.get_entry_recursive(TAG_BLACK_LEVEL) {
                image.black_level = black.get_u32(0)? as i32;
            }
            if session.options.apply_crop {
                if let Some(rect) = directory_crop(&directory) {
                    if !image.crop_with_cfa_shift(rect) {
                        image.add_error(format!("RAF crop {rect:?} does not fit the image"));
                    }
                }
            }
        }

        let levels = directory
            .shorts(fuji_tag::WB_GRB_LEVELS)
            .filter(|v| v.len() >= 3)
            .map(|v| [v[0] as u32, v[1] as u32, v[2] as u32]);
        let levels = match levels {
            Some(levels) => Some(levels),
            None => match root.get_entry_recursive(TAG_WB_GRB_LEVELS) {
                Some(e) if e.count() >= 3 => Some([e.get_u32(0)?, e.get_u32(1)?, e.get_u32(2)?]),
                _ => None,
            },
        };
        if let Some(grb) = levels {
            image.metadata.wb_coeffs = Some(wb_from_grb(grb));
        }
        Ok(())
    }
}

/// The raw strip from the Fuji private directory, or the bare raw block
/// sized by the header directory.
fn locate_strip(
    session: &Session<'_>,
    header: &RafHeader,
    directory: &FujiDirectory,
) -> Result<RawStrip, DecodeError> {
    let full_size = directory
        .shorts(fuji_tag::RAW_IMAGE_FULL_SIZE)
        .filter(|v| v.len() >= 2)
        .map(|v| (v[1] as usize, v[0] as usize));

    let Some(raw) = session
        .root
        .get_ifds_with_tag(TAG_STRIP_OFFSETS)
        .into_iter()
        .next()
    else {
        let (width, height) = full_size.unwrap_or((0, 0));
        return Ok(RawStrip {
            offset: header.raw_offset,
            count: header.raw_length,
            width,
            height,
            bps: 16,
            order: ByteOrder::BigEndian,
        });
    };

    let offsets = raw.entry(TAG_STRIP_OFFSETS)?;
    let counts = raw.entry(TAG_STRIP_BYTE_COUNTS)?;
    if offsets.count() != 1 || counts.count() != 1 {
        return Err(DecodeError::unsupported(format!(
            "RAF: {} strips with {} byte counts",
            offsets.count(),
            counts.count()
        )));
    }
    let (width, height) = match full_size {
        Some(size) => size,
        None => private_size(raw)?,
    };
    // 14-bit data is stored unpacked
    let bps = match raw.get_entry(TAG_BITS_PER_SAMPLE) {
        Some(e) if e.get_u32(0)? == 14 => 16,
        Some(e) => e.get_u32(0)?,
        None => 16,
    };
    Ok(RawStrip {
        offset: header.raw_offset.saturating_add(offsets.get_u32(0)?),
        count: counts.get_u32(0)?,
        width,
        height,
        bps,
        order: raw.byte_order(),
    })
}

fn private_size(raw: &Ifd) -> Result<(usize, usize), DecodeError> {
    let width = raw.entry(TAG_RAW_WIDTH)?.get_u32(0)? as usize;
    let height = raw.entry(TAG_RAW_HEIGHT)?.get_u32(0)? as usize;
    Ok((width, height))
}

/// Crop from the header directory: origin (top, left), size (height, width).
fn directory_crop(directory: &FujiDirectory) -> Option<Rect> {
    let origin = directory.shorts(fuji_tag::RAW_IMAGE_CROP_TOP_LEFT)?;
    let size = directory.shorts(fuji_tag::RAW_IMAGE_CROPPED_SIZE)?;
    match (origin.as_slice(), size.as_slice()) {
        ([top, left, ..], [height, width, ..]) => Some(Rect::new(
            i64::from(*left),
            i64::from(*top),
            i64::from(*width),
            i64::from(*height),
        )),
        _ => None,
    }
}

/// Green-first levels to red, green, blue multipliers.
fn wb_from_grb(grb: [u32; 3]) -> [f32; 3] {
    [grb[1] as f32, grb[0] as f32, grb[2] as f32]
}
