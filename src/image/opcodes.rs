//! DNG opcode lists.
//!
//! An opcode list is a big-endian count followed by records of
//! `(id, version, flags, size, parameters)`. Only opcodes that correct the
//! raw values in place are supported; an unknown opcode is skipped when
//! flagged optional and rejected otherwise.
//!
//! Coordinates in opcode parameters are relative to the current crop.

use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::format::tiff::ByteOrder;
use crate::io::ByteCursor;

use super::{PixelData, RawImage, Rect};

/// Flag bit marking an opcode that may be ignored by readers that do not
/// know it.
const FLAG_OPTIONAL: u32 = 1;

/// Largest MapTable accepted.
const MAX_TABLE: usize = 65536;

/// Largest MapPolynomial degree accepted.
const MAX_DEGREE: u32 = 8;

/// Region, planes and sampling pitch an area opcode applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AreaSpec {
    rect: Rect,
    first_plane: usize,
    planes: usize,
    row_pitch: usize,
    col_pitch: usize,
}

impl AreaSpec {
    fn parse(cursor: &mut ByteCursor<'_>, width: i64, height: i64, cpp: usize) -> Result<Self, DecodeError> {
        let top = i64::from(cursor.get_u32()?);
        let left = i64::from(cursor.get_u32()?);
        let bottom = i64::from(cursor.get_u32()?);
        let right = i64::from(cursor.get_u32()?);
        let rect = Rect::from_corners(left, top, right, bottom);
        if !rect.is_inside(width, height) || rect.width < 0 || rect.height < 0 {
            return Err(DecodeError::corrupt(format!(
                "opcode area {rect:?} outside a {width}x{height} image"
            )));
        }

        let first_plane = cursor.get_u32()? as usize;
        let planes = cursor.get_u32()? as usize;
        let row_pitch = cursor.get_u32()? as usize;
        let col_pitch = cursor.get_u32()? as usize;
        if planes == 0 || first_plane + planes > cpp {
            return Err(DecodeError::corrupt(format!(
                "opcode planes {first_plane}+{planes} with {cpp} components"
            )));
        }
        if row_pitch == 0 || col_pitch == 0 {
            return Err(DecodeError::corrupt("opcode with zero pitch"));
        }
        Ok(Self {
            rect,
            first_plane,
            planes,
            row_pitch,
            col_pitch,
        })
    }

    /// Rows the area samples.
    fn rows(&self) -> usize {
        (self.rect.height as usize).div_ceil(self.row_pitch)
    }

    /// Columns the area samples.
    fn cols(&self) -> usize {
        (self.rect.width as usize).div_ceil(self.col_pitch)
    }

    /// Visit every sample index in the area with its (row, col) step
    /// within the area.
    fn for_each(&self, image: &RawImage, mut f: impl FnMut(usize, usize, usize)) {
        let crop = image.crop();
        let (pitch, cpp) = (image.pitch(), image.cpp());
        for (ry, y) in (self.rect.y..self.rect.bottom())
            .step_by(self.row_pitch)
            .enumerate()
        {
            let row = (crop.y + y) as usize * pitch;
            for (rx, x) in (self.rect.x..self.rect.right())
                .step_by(self.col_pitch)
                .enumerate()
            {
                let px = row + (crop.x + x) as usize * cpp;
                for p in self.first_plane..self.first_plane + self.planes {
                    f(px + p, ry, rx);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Opcode {
    FixBadPixelsConstant { value: u32 },
    FixBadPixelsList { points: Vec<(i64, i64)>, rects: Vec<Rect> },
    TrimBounds(Rect),
    /// MapTable and MapPolynomial, both expanded to a full lookup
    Map { area: AreaSpec, lookup: Vec<u16> },
    DeltaPerRow { area: AreaSpec, deltas: Vec<f32> },
    DeltaPerColumn { area: AreaSpec, deltas: Vec<f32> },
    ScalePerRow { area: AreaSpec, scales: Vec<f32> },
    ScalePerColumn { area: AreaSpec, scales: Vec<f32> },
}

/// A parsed opcode list, validated against the image it will modify.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OpcodeList {
    ops: Vec<Opcode>,
}

impl OpcodeList {
    /// Parse an opcode list for `image`.
    pub fn parse(data: &[u8], image: &RawImage) -> Result<Self, DecodeError> {
        let mut cursor = ByteCursor::new(data, ByteOrder::BigEndian);
        let count = cursor.get_u32()?;
        let mut ops = Vec::new();

        for _ in 0..count {
            let code = cursor.get_u32()?;
            let _version = cursor.get_u32()?;
            let flags = cursor.get_u32()?;
            let size = cursor.get_u32()? as usize;
            let params = cursor.get_bytes(size)?;

            let mut reader = ByteCursor::new(params, ByteOrder::BigEndian);
            let op = match code {
                4 => Some(parse_fix_constant(&mut reader, image)?),
                5 => Some(parse_fix_list(&mut reader)?),
                6 => Some(parse_trim(&mut reader, image)?),
                7 => Some(parse_map_table(&mut reader, image)?),
                8 => Some(parse_map_polynomial(&mut reader, image)?),
                10 | 11 | 12 | 13 => Some(parse_per_line(&mut reader, image, code)?),
                _ if flags & FLAG_OPTIONAL != 0 => {
                    debug!(code, "skipping optional DNG opcode");
                    None
                }
                _ => {
                    return Err(DecodeError::unsupported(format!(
                        "DNG opcode {code} is not supported"
                    )))
                }
            };
            if let Some(op) = op {
                if reader.remaining() != 0 {
                    return Err(DecodeError::corrupt(format!(
                        "DNG opcode {code} declares {size} bytes but uses {}",
                        reader.position()
                    )));
                }
                ops.push(op);
            }
        }
        Ok(Self { ops })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every opcode in order.
    pub fn apply(&self, image: &mut RawImage) -> Result<(), DecodeError> {
        for op in &self.ops {
            apply_op(op, image)?;
        }
        Ok(())
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn cropped_size(image: &RawImage) -> (i64, i64) {
    (image.cropped_width() as i64, image.cropped_height() as i64)
}

fn require_u16_mono(image: &RawImage, name: &str) -> Result<(), DecodeError> {
    if image.cpp() != 1 || !matches!(image.data(), PixelData::U16(_)) {
        return Err(DecodeError::unsupported(format!(
            "{name} only supports single-component 16-bit images"
        )));
    }
    Ok(())
}

fn parse_fix_constant(reader: &mut ByteCursor<'_>, image: &RawImage) -> Result<Opcode, DecodeError> {
    require_u16_mono(image, "FixBadPixelsConstant")?;
    let value = reader.get_u32()?;
    let _phase = reader.get_u32()?;
    Ok(Opcode::FixBadPixelsConstant { value })
}

fn parse_fix_list(reader: &mut ByteCursor<'_>) -> Result<Opcode, DecodeError> {
    let _phase = reader.get_u32()?;
    let point_count = reader.get_u32()? as usize;
    let rect_count = reader.get_u32()? as usize;
    // each point takes 8 bytes and each rectangle 16
    if point_count * 8 + rect_count * 16 > reader.remaining() {
        return Err(DecodeError::Truncated(
            "FixBadPixelsList entries run past the opcode".to_string(),
        ));
    }
    let mut points = Vec::with_capacity(point_count);
    for _ in 0..point_count {
        let row = i64::from(reader.get_u32()?);
        let col = i64::from(reader.get_u32()?);
        points.push((col, row));
    }
    let mut rects = Vec::with_capacity(rect_count);
    for _ in 0..rect_count {
        let top = i64::from(reader.get_u32()?);
        let left = i64::from(reader.get_u32()?);
        let bottom = i64::from(reader.get_u32()?);
        let right = i64::from(reader.get_u32()?);
        rects.push(Rect::from_corners(left, top, right, bottom));
    }
    Ok(Opcode::FixBadPixelsList { points, rects })
}

fn parse_trim(reader: &mut ByteCursor<'_>, image: &RawImage) -> Result<Opcode, DecodeError> {
    let top = i64::from(reader.get_u32()?);
    let left = i64::from(reader.get_u32()?);
    let bottom = i64::from(reader.get_u32()?);
    let right = i64::from(reader.get_u32()?);
    let rect = Rect::from_corners(left, top, right, bottom);
    let (width, height) = cropped_size(image);
    if !rect.has_positive_area() || !rect.is_inside(width, height) {
        return Err(DecodeError::corrupt(format!(
            "TrimBounds {rect:?} outside a {width}x{height} image"
        )));
    }
    Ok(Opcode::TrimBounds(rect))
}

fn parse_area(reader: &mut ByteCursor<'_>, image: &RawImage) -> Result<AreaSpec, DecodeError> {
    let (width, height) = cropped_size(image);
    AreaSpec::parse(reader, width, height, image.cpp())
}

fn parse_map_table(reader: &mut ByteCursor<'_>, image: &RawImage) -> Result<Opcode, DecodeError> {
    let area = parse_area(reader, image)?;
    let size = reader.get_u32()? as usize;
    if size == 0 || size > MAX_TABLE {
        return Err(DecodeError::corrupt(format!("MapTable of {size} entries")));
    }
    let mut table = Vec::with_capacity(size);
    for _ in 0..size {
        table.push(reader.get_u16()?);
    }
    let lookup = (0..MAX_TABLE).map(|i| table[i.min(size - 1)]).collect();
    Ok(Opcode::Map { area, lookup })
}

fn parse_map_polynomial(reader: &mut ByteCursor<'_>, image: &RawImage) -> Result<Opcode, DecodeError> {
    let area = parse_area(reader, image)?;
    let degree = reader.get_u32()?;
    if degree > MAX_DEGREE {
        return Err(DecodeError::corrupt(format!("MapPolynomial of degree {degree}")));
    }
    let mut coefficients = Vec::with_capacity(degree as usize + 1);
    for _ in 0..=degree {
        coefficients.push(reader.get_f64()?);
    }
    let lookup = (0..MAX_TABLE)
        .map(|i| {
            let x = i as f64 / 65536.0;
            let mut value = coefficients[0];
            let mut power = 1.0;
            for c in &coefficients[1..] {
                power *= x;
                value += c * power;
            }
            (value * 65535.5).clamp(0.0, 65535.0) as u16
        })
        .collect();
    Ok(Opcode::Map { area, lookup })
}

fn parse_per_line(
    reader: &mut ByteCursor<'_>,
    image: &RawImage,
    code: u32,
) -> Result<Opcode, DecodeError> {
    let area = parse_area(reader, image)?;
    let per_row = code == 10 || code == 12;
    let expected = if per_row { area.rows() } else { area.cols() };
    let count = reader.get_u32()? as usize;
    if count != expected {
        return Err(DecodeError::corrupt(format!(
            "DNG opcode {code} has {count} values for {expected} lines"
        )));
    }
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(reader.get_f32()?);
    }
    Ok(match code {
        10 => Opcode::DeltaPerRow { area, deltas: values },
        11 => Opcode::DeltaPerColumn { area, deltas: values },
        12 => Opcode::ScalePerRow { area, scales: values },
        _ => Opcode::ScalePerColumn { area, scales: values },
    })
}

// =============================================================================
// Application
// =============================================================================

fn apply_op(op: &Opcode, image: &mut RawImage) -> Result<(), DecodeError> {
    let crop = image.crop();
    match op {
        Opcode::FixBadPixelsConstant { value } => {
            let (pitch, w, h) = (image.pitch(), image.cropped_width(), image.cropped_height());
            let mut bad = Vec::new();
            let pixels = image.pixels_u16()?;
            for y in 0..h {
                let uy = crop.y as usize + y;
                for x in 0..w {
                    let ux = crop.x as usize + x;
                    if u32::from(pixels[uy * pitch + ux]) == *value {
                        bad.push((ux, uy));
                    }
                }
            }
            for (x, y) in bad {
                image.mark_bad_pixel(x, y);
            }
        }
        Opcode::FixBadPixelsList { points, rects } => {
            for &(x, y) in points {
                if x < crop.width && y < crop.height {
                    image.mark_bad_pixel((crop.x + x) as usize, (crop.y + y) as usize);
                }
            }
            for rect in rects {
                let inside = rect.overlap(&Rect::new(0, 0, crop.width, crop.height));
                for y in inside.y..inside.bottom() {
                    for x in inside.x..inside.right() {
                        image.mark_bad_pixel((crop.x + x) as usize, (crop.y + y) as usize);
                    }
                }
            }
        }
        Opcode::TrimBounds(rect) => {
            if !image.sub_frame(*rect) {
                warn!(?rect, "TrimBounds not applied");
            }
        }
        Opcode::Map { area, lookup } => {
            let mut indices = Vec::new();
            area.for_each(image, |i, _, _| indices.push(i));
            let pixels = image.pixels_u16_mut()?;
            for i in indices {
                pixels[i] = lookup[pixels[i] as usize];
            }
        }
        Opcode::DeltaPerRow { area, deltas } => apply_per_line(image, area, deltas, true, false),
        Opcode::DeltaPerColumn { area, deltas } => apply_per_line(image, area, deltas, false, false),
        Opcode::ScalePerRow { area, scales } => apply_per_line(image, area, scales, true, true),
        Opcode::ScalePerColumn { area, scales } => apply_per_line(image, area, scales, false, true),
    }
    Ok(())
}

fn apply_per_line(image: &mut RawImage, area: &AreaSpec, values: &[f32], per_row: bool, scale: bool) {
    let mut targets = Vec::new();
    area.for_each(image, |i, ry, rx| {
        targets.push((i, if per_row { ry } else { rx }));
    });

    match image.data() {
        PixelData::U16(_) => {
            // integer forms of the factors, rows truncate and columns round
            let factors: Vec<i32> = values
                .iter()
                .map(|&v| {
                    if scale {
                        (1024.0 * v) as i32
                    } else if per_row {
                        (65535.0 * v) as i32
                    } else {
                        (65535.0 * v + 0.5) as i32
                    }
                })
                .collect();
            if let Ok(pixels) = image.pixels_u16_mut() {
                for (i, line) in targets {
                    let v = i32::from(pixels[i]);
                    let out = if scale {
                        (factors[line] * v + 512) >> 10
                    } else {
                        v + factors[line]
                    };
                    pixels[i] = out.clamp(0, 65535) as u16;
                }
            }
        }
        PixelData::F32(_) => {
            if let Ok(pixels) = image.pixels_f32_mut() {
                for (i, line) in targets {
                    if scale {
                        pixels[i] *= values[line];
                    } else {
                        pixels[i] += values[line];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::SampleType;

    /// Builds a big-endian opcode list.
    struct ListBuilder {
        ops: Vec<u8>,
        count: u32,
    }

    impl ListBuilder {
        fn new() -> Self {
            Self { ops: Vec::new(), count: 0 }
        }

        fn op(mut self, code: u32, flags: u32, params: &[u8]) -> Self {
            for v in [code, 1, flags, params.len() as u32] {
                self.ops.extend_from_slice(&v.to_be_bytes());
            }
            self.ops.extend_from_slice(params);
            self.count += 1;
            self
        }

        fn build(self) -> Vec<u8> {
            let mut out = self.count.to_be_bytes().to_vec();
            out.extend(self.ops);
            out
        }
    }

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_be_bytes()).collect()
    }

    /// Area header covering `top, left, bottom, right` on plane 0.
    fn area(top: u32, left: u32, bottom: u32, right: u32) -> Vec<u8> {
        words(&[top, left, bottom, right, 0, 1, 1, 1])
    }

    fn image_with(values: &[u16], width: usize) -> RawImage {
        let height = values.len() / width;
        let mut img = RawImage::new(width, height, 1, SampleType::U16).unwrap();
        let pitch = img.pitch();
        let pixels = img.pixels_u16_mut().unwrap();
        for (i, &v) in values.iter().enumerate() {
            pixels[(i / width) * pitch + i % width] = v;
        }
        img
    }

    // -------------------------------------------------------------------------
    // List structure
    // -------------------------------------------------------------------------

    #[test]
    fn test_empty_list() {
        let img = image_with(&[0; 4], 2);
        let list = OpcodeList::parse(&0u32.to_be_bytes(), &img).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_unknown_opcode_optional_or_fatal() {
        let img = image_with(&[0; 4], 2);
        let optional = ListBuilder::new().op(99, 1, &[0; 4]).build();
        assert!(OpcodeList::parse(&optional, &img).unwrap().is_empty());

        let required = ListBuilder::new().op(99, 0, &[0; 4]).build();
        assert!(matches!(
            OpcodeList::parse(&required, &img),
            Err(DecodeError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_declared_size_must_match() {
        let img = image_with(&[0; 4], 2);
        let mut params = words(&[0, 0, 2, 2]);
        params.extend_from_slice(&[0; 4]);
        let list = ListBuilder::new().op(6, 0, &params).build();
        assert!(matches!(
            OpcodeList::parse(&list, &img),
            Err(DecodeError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_truncated_list() {
        let img = image_with(&[0; 4], 2);
        let mut list = ListBuilder::new().op(6, 0, &words(&[0, 0, 2, 2])).build();
        list.truncate(list.len() - 3);
        assert!(matches!(
            OpcodeList::parse(&list, &img),
            Err(DecodeError::Truncated(_))
        ));
    }

    // -------------------------------------------------------------------------
    // Opcodes
    // -------------------------------------------------------------------------

    #[test]
    fn test_trim_bounds() {
        let mut img = image_with(&[0; 16], 4);
        let list = ListBuilder::new().op(6, 0, &words(&[1, 1, 3, 4])).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        assert_eq!(img.crop(), Rect::new(1, 1, 3, 2));
    }

    #[test]
    fn test_trim_bounds_outside_image() {
        let img = image_with(&[0; 16], 4);
        let list = ListBuilder::new().op(6, 0, &words(&[0, 0, 5, 4])).build();
        assert!(OpcodeList::parse(&list, &img).is_err());
    }

    #[test]
    fn test_fix_bad_pixels_constant() {
        let mut img = image_with(&[5, 0, 5, 7, 1, 2], 3);
        let list = ListBuilder::new().op(4, 0, &words(&[5, 0])).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        assert_eq!(img.bad_pixel_count(), 2);
    }

    #[test]
    fn test_fix_bad_pixels_list_points_and_rects() {
        let mut img = image_with(&[0; 16], 4);
        // one point at row 0 col 3, one 2x2 rectangle at rows 2..4 cols 0..2
        let params = words(&[0, 1, 1, 0, 3, 2, 0, 4, 2]);
        let list = ListBuilder::new().op(5, 0, &params).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        assert_eq!(img.bad_pixel_count(), 5);
    }

    #[test]
    fn test_map_table_clamps_to_last_entry() {
        let mut img = image_with(&[0, 1, 2, 9], 2);
        let mut params = area(0, 0, 2, 2);
        params.extend(words(&[3]));
        for v in [100u16, 200, 300] {
            params.extend_from_slice(&v.to_be_bytes());
        }
        let list = ListBuilder::new().op(7, 0, &params).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        let values: Vec<u16> = (0..4).map(|i| img.get_u16(i % 2, i / 2, 0).unwrap()).collect();
        assert_eq!(values, [100, 200, 300, 300]);
    }

    #[test]
    fn test_map_polynomial_identity_and_offset() {
        let mut img = image_with(&[0, 32768], 2);
        let mut params = area(0, 0, 1, 2);
        params.extend(words(&[1]));
        params.extend_from_slice(&0.25f64.to_be_bytes());
        params.extend_from_slice(&0.5f64.to_be_bytes());
        let list = ListBuilder::new().op(8, 0, &params).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        // 0.25 * 65535.5 and (0.25 + 0.25) * 65535.5
        assert_eq!(img.get_u16(0, 0, 0), Some(16383));
        assert_eq!(img.get_u16(1, 0, 0), Some(32767));
    }

    #[test]
    fn test_delta_per_row_relative_to_area() {
        let mut img = image_with(&[1000; 6], 2);
        let mut params = area(1, 0, 3, 2);
        params.extend(words(&[2]));
        params.extend_from_slice(&0.5f32.to_be_bytes());
        params.extend_from_slice(&(-1.0f32).to_be_bytes());
        let list = ListBuilder::new().op(10, 0, &params).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        assert_eq!(img.get_u16(0, 0, 0), Some(1000));
        assert_eq!(img.get_u16(1, 1, 0), Some(1000 + 32767));
        assert_eq!(img.get_u16(0, 2, 0), Some(0));
    }

    #[test]
    fn test_scale_per_column() {
        let mut img = image_with(&[1000, 1000], 2);
        let mut params = area(0, 0, 1, 2);
        params.extend(words(&[2]));
        params.extend_from_slice(&2.0f32.to_be_bytes());
        params.extend_from_slice(&0.5f32.to_be_bytes());
        let list = ListBuilder::new().op(13, 0, &params).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        assert_eq!(img.get_u16(0, 0, 0), Some(2000));
        assert_eq!(img.get_u16(1, 0, 0), Some(500));
    }

    #[test]
    fn test_delta_count_must_match_area() {
        let img = image_with(&[0; 4], 2);
        let mut params = area(0, 0, 2, 2);
        params.extend(words(&[1]));
        params.extend_from_slice(&0.0f32.to_be_bytes());
        let list = ListBuilder::new().op(10, 0, &params).build();
        assert!(OpcodeList::parse(&list, &img).is_err());
    }

    #[test]
    fn test_float_delta() {
        let mut img = RawImage::new(2, 1, 1, SampleType::F32).unwrap();
        let mut params = area(0, 0, 1, 2);
        params.extend(words(&[2]));
        params.extend_from_slice(&0.25f32.to_be_bytes());
        params.extend_from_slice(&0.5f32.to_be_bytes());
        let list = ListBuilder::new().op(11, 0, &params).build();
        OpcodeList::parse(&list, &img).unwrap().apply(&mut img).unwrap();
        assert_eq!(img.cropped_value(1, 0, 0), Some(0.5));
    }
}
