//! Decoded pixel buffer and the metadata needed to interpret it.
//!
//! A [`RawImage`] is allocated once its geometry is known and never resized.
//! Codecs write into it through [`PlaneMut`] views; cropping only changes
//! the addressable sub-rectangle.

mod cfa;
mod geometry;
pub mod opcodes;
mod table;

pub use cfa::{CfaColor, ColorFilterArray};
pub use geometry::{Point, Rect};
pub use opcodes::OpcodeList;
pub use table::LookupTable;

use tracing::{debug, warn};

use crate::error::DecodeError;

/// Largest width or height accepted for an allocation.
pub const MAX_DIMENSION: usize = 65535;

/// Largest buffer accepted for an allocation, in samples including row
/// padding. Holds a 150 megapixel three-component image.
pub const MAX_SAMPLES: usize = 1 << 29;

/// Row pitch alignment in bytes.
const PITCH_ALIGN: usize = 16;

fn zeroed<T: Clone>(len: usize, zero: T) -> Result<Vec<T>, DecodeError> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|err| {
        DecodeError::unsupported(format!("cannot allocate {len} samples: {err}"))
    })?;
    data.resize(len, zero);
    Ok(data)
}

// =============================================================================
// Pixel storage
// =============================================================================

/// Element type of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U16,
    F32,
}

impl SampleType {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::U16 => 2,
            SampleType::F32 => 4,
        }
    }
}

/// Backing storage for the pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum PixelData {
    U16(Vec<u16>),
    F32(Vec<f32>),
}

impl PixelData {
    pub fn sample_type(&self) -> SampleType {
        match self {
            PixelData::U16(_) => SampleType::U16,
            PixelData::F32(_) => SampleType::F32,
        }
    }
}

/// A mutable view over a band of 16-bit rows.
///
/// `y_offset` is the image row of the band's first row, so workers that
/// receive a band can compute their stream position.
#[derive(Debug)]
pub struct PlaneMut<'a> {
    data: &'a mut [u16],
    pitch: usize,
    width: usize,
    height: usize,
    cpp: usize,
    y_offset: usize,
}

impl<'a> PlaneMut<'a> {
    pub(crate) fn new(
        data: &'a mut [u16],
        pitch: usize,
        width: usize,
        cpp: usize,
        y_offset: usize,
    ) -> Self {
        let height = if pitch == 0 { 0 } else { data.len() / pitch };
        Self {
            data,
            pitch,
            width,
            height,
            cpp,
            y_offset,
        }
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Rows in this band.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn cpp(&self) -> usize {
        self.cpp
    }

    /// Row stride in samples.
    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    #[inline]
    pub fn y_offset(&self) -> usize {
        self.y_offset
    }

    /// The `width * cpp` samples of band row `y`.
    #[inline]
    pub fn row_mut(&mut self, y: usize) -> &mut [u16] {
        let start = y * self.pitch;
        &mut self.data[start..start + self.width * self.cpp]
    }

    /// The whole band including row padding.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u16] {
        self.data
    }

    /// Split into bands of at most `rows` rows each.
    pub fn into_bands(self, rows: usize) -> Vec<PlaneMut<'a>> {
        let rows = rows.max(1);
        let (pitch, width, cpp, y0) = (self.pitch, self.width, self.cpp, self.y_offset);
        self.data
            .chunks_mut(pitch * rows)
            .enumerate()
            .map(|(i, chunk)| PlaneMut::new(chunk, pitch, width, cpp, y0 + i * rows))
            .collect()
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// A masked sensor strip used to measure the black level.
///
/// `vertical` areas span columns `offset..offset+size`, horizontal ones
/// span rows. A negative offset is relative to the right or bottom edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackArea {
    pub offset: i64,
    pub size: i64,
    pub vertical: bool,
}

impl BlackArea {
    pub fn new(offset: i64, size: i64, vertical: bool) -> Self {
        Self {
            offset,
            size,
            vertical,
        }
    }
}

/// Camera and capture information attached to a decoded image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageMetadata {
    pub make: String,
    pub model: String,
    pub canonical_make: String,
    pub canonical_model: String,
    pub mode: String,
    pub iso: u32,
    /// Red, green and blue multipliers as stored by the camera
    pub wb_coeffs: Option<[f32; 3]>,
    /// Chroma subsampling of YCbCr data (1x1 for full resolution)
    pub subsampling: Point,
    pub pixel_aspect_ratio: f64,
}

impl Default for ImageMetadata {
    fn default() -> Self {
        Self {
            make: String::new(),
            model: String::new(),
            canonical_make: String::new(),
            canonical_model: String::new(),
            mode: String::new(),
            iso: 0,
            wb_coeffs: None,
            subsampling: Point::new(1, 1),
            pixel_aspect_ratio: 1.0,
        }
    }
}

impl ImageMetadata {
    /// White balance, falling back to neutral multipliers.
    pub fn wb_or_neutral(&self) -> [f32; 3] {
        self.wb_coeffs.unwrap_or([1.0, 1.0, 1.0])
    }
}

/// One bit per pixel marking defects to interpolate.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BadPixelMap {
    pitch: usize,
    bits: Vec<u8>,
}

impl BadPixelMap {
    fn new(width: usize, height: usize) -> Self {
        let pitch = width.div_ceil(8);
        Self {
            pitch,
            bits: vec![0; pitch * height],
        }
    }

    #[inline]
    fn set(&mut self, x: usize, y: usize) {
        self.bits[y * self.pitch + (x >> 3)] |= 1 << (x & 7);
    }

    #[inline]
    fn is_bad(&self, x: usize, y: usize) -> bool {
        (self.bits[y * self.pitch + (x >> 3)] >> (x & 7)) & 1 == 1
    }

    fn count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }
}

// =============================================================================
// RawImage
// =============================================================================

/// A decoded RAW image: sensor values plus interpretation metadata.
#[derive(Debug, Clone)]
pub struct RawImage {
    width: usize,
    height: usize,
    cpp: usize,
    pitch: usize,
    data: PixelData,
    crop: Rect,
    bad_pixels: Option<BadPixelMap>,
    errors: Vec<String>,

    pub is_cfa: bool,
    pub cfa: ColorFilterArray,
    /// Global black level, -1 when unknown
    pub black_level: i32,
    /// Per-CFA-cell black levels in row-major 2x2 order, -1 when unknown
    pub black_level_separate: [i32; 4],
    pub white_point: u32,
    pub black_areas: Vec<BlackArea>,
    pub metadata: ImageMetadata,
    /// Curve to apply to every sample, if the values are not linear yet
    pub table: Option<LookupTable>,
}

impl RawImage {
    /// Allocate a zeroed buffer.
    ///
    /// # Errors
    /// Zero or oversized dimensions, more than four components and buffers
    /// above [`MAX_SAMPLES`] are rejected before allocating. A failed
    /// allocation is returned as `UnsupportedFormat`.
    pub fn new(
        width: usize,
        height: usize,
        cpp: usize,
        sample: SampleType,
    ) -> Result<Self, DecodeError> {
        if width == 0 || height == 0 {
            return Err(DecodeError::unsupported(format!(
                "invalid image dimensions {width}x{height}"
            )));
        }
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            return Err(DecodeError::unsupported(format!(
                "image dimensions {width}x{height} too large"
            )));
        }
        if cpp == 0 || cpp > 4 {
            return Err(DecodeError::unsupported(format!(
                "{cpp} components per pixel"
            )));
        }

        let bps = sample.bytes_per_sample();
        let pitch = (width * cpp * bps).div_ceil(PITCH_ALIGN) * PITCH_ALIGN / bps;
        let len = pitch * height;
        if len > MAX_SAMPLES {
            return Err(DecodeError::unsupported(format!(
                "image of {width}x{height}x{cpp} samples too large"
            )));
        }
        let data = match sample {
            SampleType::U16 => PixelData::U16(zeroed(len, 0)?),
            SampleType::F32 => PixelData::F32(zeroed(len, 0.0)?),
        };

        Ok(Self {
            width,
            height,
            cpp,
            pitch,
            data,
            crop: Rect::new(0, 0, width as i64, height as i64),
            bad_pixels: None,
            errors: Vec::new(),
            is_cfa: cpp == 1,
            cfa: ColorFilterArray::default(),
            black_level: -1,
            black_level_separate: [-1; 4],
            white_point: 65536,
            black_areas: Vec::new(),
            metadata: ImageMetadata::default(),
            table: None,
        })
    }

    // -------------------------------------------------------------------------
    // Geometry
    // -------------------------------------------------------------------------

    /// Uncropped width in pixels.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Uncropped height in pixels.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Components per pixel.
    #[inline]
    pub fn cpp(&self) -> usize {
        self.cpp
    }

    /// Row stride in samples.
    #[inline]
    pub fn pitch(&self) -> usize {
        self.pitch
    }

    #[inline]
    pub fn sample_type(&self) -> SampleType {
        self.data.sample_type()
    }

    /// Addressable region in uncropped coordinates.
    #[inline]
    pub fn crop(&self) -> Rect {
        self.crop
    }

    pub fn cropped_width(&self) -> usize {
        self.crop.width as usize
    }

    pub fn cropped_height(&self) -> usize {
        self.crop.height as usize
    }

    /// Restrict the addressable region. `rect` is relative to the current crop.
    ///
    /// Empty, negative or out-of-bounds rectangles are rejected with a
    /// warning and leave the crop untouched.
    pub fn sub_frame(&mut self, rect: Rect) -> bool {
        if rect.x < 0 || rect.y < 0 || !rect.has_positive_area() {
            warn!(?rect, "negative or empty crop, skipped");
            return false;
        }
        if !rect.is_inside(self.crop.width, self.crop.height) {
            warn!(?rect, "crop larger than image, skipped");
            return false;
        }
        self.crop = Rect::new(
            self.crop.x + rect.x,
            self.crop.y + rect.y,
            rect.width,
            rect.height,
        );
        true
    }

    /// Crop and move the CFA phase so it still starts at the crop origin.
    pub fn crop_with_cfa_shift(&mut self, rect: Rect) -> bool {
        if !self.sub_frame(rect) {
            return false;
        }
        if self.is_cfa {
            if rect.x % 2 == 1 {
                self.cfa.shift_left(1);
            }
            if rect.y % 2 == 1 {
                self.cfa.shift_down(1);
            }
        }
        true
    }

    /// dcraw `filters` word for the CFA, 0 for non-CFA images.
    pub fn filters(&self) -> u32 {
        if self.is_cfa {
            self.cfa.dcraw_filters()
        } else {
            0
        }
    }

    // -------------------------------------------------------------------------
    // Pixel access
    // -------------------------------------------------------------------------

    pub fn data(&self) -> &PixelData {
        &self.data
    }

    pub fn pixels_u16(&self) -> Result<&[u16], DecodeError> {
        match &self.data {
            PixelData::U16(v) => Ok(v),
            PixelData::F32(_) => Err(DecodeError::unsupported("expected 16-bit image data")),
        }
    }

    pub fn pixels_u16_mut(&mut self) -> Result<&mut [u16], DecodeError> {
        match &mut self.data {
            PixelData::U16(v) => Ok(v),
            PixelData::F32(_) => Err(DecodeError::unsupported("expected 16-bit image data")),
        }
    }

    pub fn pixels_f32_mut(&mut self) -> Result<&mut [f32], DecodeError> {
        match &mut self.data {
            PixelData::F32(v) => Ok(v),
            PixelData::U16(_) => Err(DecodeError::unsupported("expected float image data")),
        }
    }

    /// Mutable view over the whole uncropped 16-bit buffer.
    pub fn plane_mut(&mut self) -> Result<PlaneMut<'_>, DecodeError> {
        let (pitch, width, cpp) = (self.pitch, self.width, self.cpp);
        let data = self.pixels_u16_mut()?;
        Ok(PlaneMut::new(data, pitch, width, cpp, 0))
    }

    /// Sample at uncropped position.
    pub fn get_u16(&self, x: usize, y: usize, c: usize) -> Option<u16> {
        if x >= self.width || y >= self.height || c >= self.cpp {
            return None;
        }
        match &self.data {
            PixelData::U16(v) => v.get(y * self.pitch + x * self.cpp + c).copied(),
            PixelData::F32(_) => None,
        }
    }

    /// Sample at a position relative to the crop origin, as `f32`.
    pub fn cropped_value(&self, x: usize, y: usize, c: usize) -> Option<f32> {
        if x >= self.cropped_width() || y >= self.cropped_height() || c >= self.cpp {
            return None;
        }
        let ux = self.crop.x as usize + x;
        let uy = self.crop.y as usize + y;
        let idx = uy * self.pitch + ux * self.cpp + c;
        match &self.data {
            PixelData::U16(v) => v.get(idx).map(|&p| f32::from(p)),
            PixelData::F32(v) => v.get(idx).copied(),
        }
    }

    // -------------------------------------------------------------------------
    // Recoverable errors
    // -------------------------------------------------------------------------

    /// Record a non-fatal decode problem.
    pub fn add_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(%message, "recoverable decode error");
        self.errors.push(message);
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    // -------------------------------------------------------------------------
    // Black level estimation
    // -------------------------------------------------------------------------

    /// Estimate per-cell black levels from the masked areas.
    ///
    /// Each 2x2 cell gets the median of its samples inside the areas.
    /// Non-CFA images use the average of the four medians. Without any
    /// area pixels every cell falls back to the global black level.
    pub fn calculate_black_areas(&mut self) -> Result<(), DecodeError> {
        let pixels = match &self.data {
            PixelData::U16(v) => v,
            PixelData::F32(_) => return Ok(()),
        };

        let mut histogram = vec![0u32; 4 * 65536];
        let mut total: u64 = 0;
        let crop = self.crop;

        for area in &self.black_areas {
            let size = area.size - (area.size & 1);
            let mut offset = area.offset;
            if offset < 0 {
                offset += if area.vertical {
                    self.width as i64
                } else {
                    self.height as i64
                };
            }

            if area.vertical {
                if offset < 0 || offset + size > self.width as i64 {
                    return Err(DecodeError::corrupt(
                        "black area offset + size is larger than image width",
                    ));
                }
                for y in crop.y..crop.bottom() {
                    let row = y as usize * self.pitch;
                    for x in offset..offset + size {
                        let v = pixels[row + x as usize * self.cpp] as usize;
                        histogram[(((y & 1) * 2 + (x & 1)) as usize) * 65536 + v] += 1;
                    }
                }
                total += (size * crop.height) as u64;
            } else {
                if offset < 0 || offset + size > self.height as i64 {
                    return Err(DecodeError::corrupt(
                        "black area offset + size is larger than image height",
                    ));
                }
                for y in offset..offset + size {
                    let row = y as usize * self.pitch;
                    for x in crop.x..crop.right() {
                        let v = pixels[row + x as usize * self.cpp] as usize;
                        histogram[(((y & 1) * 2 + (x & 1)) as usize) * 65536 + v] += 1;
                    }
                }
                total += (size * crop.width) as u64;
            }
        }

        if total == 0 {
            self.black_level_separate = [self.black_level; 4];
            return Ok(());
        }

        let half_cell = total / 8;
        for (i, cell) in histogram.chunks_exact(65536).enumerate() {
            let mut acc = u64::from(cell[0]);
            let mut value = 0usize;
            while acc <= half_cell && value < 65535 {
                value += 1;
                acc += u64::from(cell[value]);
            }
            self.black_level_separate[i] = value as i32;
        }

        if !self.is_cfa {
            let sum: i32 = self.black_level_separate.iter().sum();
            self.black_level_separate = [(sum + 2) >> 2; 4];
        }
        debug!(levels = ?self.black_level_separate, "black levels from masked areas");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Bad pixels
    // -------------------------------------------------------------------------

    /// Flag a pixel (uncropped coordinates) for interpolation.
    pub fn mark_bad_pixel(&mut self, x: usize, y: usize) {
        if x >= self.width || y >= self.height {
            return;
        }
        let (w, h) = (self.width, self.height);
        self.bad_pixels
            .get_or_insert_with(|| BadPixelMap::new(w, h))
            .set(x, y);
    }

    pub fn bad_pixel_count(&self) -> usize {
        self.bad_pixels.as_ref().map_or(0, BadPixelMap::count)
    }

    /// Replace every flagged pixel with a distance-weighted average of the
    /// nearest unflagged pixels of the same CFA color in each direction.
    pub fn fix_bad_pixels(&mut self) -> Result<(), DecodeError> {
        let Some(map) = self.bad_pixels.take() else {
            return Ok(());
        };
        let (width, height, pitch, cpp) = (self.width, self.height, self.pitch, self.cpp);
        let step = if self.is_cfa { 2 } else { 1 };
        let pixels = self.pixels_u16_mut()?;

        for y in 0..height {
            for x in 0..width {
                if !map.is_bad(x, y) {
                    continue;
                }
                for c in 0..cpp {
                    let at = |px: usize, py: usize| i64::from(pixels[py * pitch + px * cpp + c]);
                    // left, right, up, down as (value, distance)
                    let mut found: [Option<(i64, i64)>; 4] = [None; 4];

                    let mut xf = x as i64 - step;
                    while xf >= 0 {
                        if !map.is_bad(xf as usize, y) {
                            found[0] = Some((at(xf as usize, y), x as i64 - xf));
                            break;
                        }
                        xf -= step;
                    }
                    let mut xf = x as i64 + step;
                    while xf < width as i64 {
                        if !map.is_bad(xf as usize, y) {
                            found[1] = Some((at(xf as usize, y), xf - x as i64));
                            break;
                        }
                        xf += step;
                    }
                    let mut yf = y as i64 - step;
                    while yf >= 0 {
                        if !map.is_bad(x, yf as usize) {
                            found[2] = Some((at(x, yf as usize), y as i64 - yf));
                            break;
                        }
                        yf -= step;
                    }
                    let mut yf = y as i64 + step;
                    while yf < height as i64 {
                        if !map.is_bad(x, yf as usize) {
                            found[3] = Some((at(x, yf as usize), yf - y as i64));
                            break;
                        }
                        yf += step;
                    }

                    let value = interpolate_pair(found[0], found[1])
                        .into_iter()
                        .chain(interpolate_pair(found[2], found[3]))
                        .collect::<Vec<_>>();
                    if value.is_empty() {
                        continue;
                    }
                    let sum: i64 = value.iter().sum();
                    let fixed = (sum >> (8 + (value.len() as u32 - 1))).clamp(0, 65535);
                    pixels[y * pitch + x * cpp + c] = fixed as u16;
                }
            }
        }
        debug!(count = map.count(), "interpolated bad pixels");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Lookup tables
    // -------------------------------------------------------------------------

    /// Map every sample through `self.table` and drop the table.
    pub fn apply_table(&mut self) -> Result<(), DecodeError> {
        let Some(table) = self.table.take() else {
            return Ok(());
        };
        let (pitch, width, cpp) = (self.pitch, self.width, self.cpp);
        let pixels = self.pixels_u16_mut()?;
        for (y, row) in pixels.chunks_exact_mut(pitch).enumerate() {
            table.apply_row(&mut row[..width * cpp], (width + y * 13) as u32);
        }
        Ok(())
    }
}

/// Weighted sum (scaled by 256) of the two neighbours along one axis.
fn interpolate_pair(a: Option<(i64, i64)>, b: Option<(i64, i64)>) -> Option<i64> {
    match (a, b) {
        (Some((va, da)), Some((vb, db))) => {
            let total = da + db;
            let wa = db * 256 / total;
            Some(va * wa + vb * (256 - wa))
        }
        (Some((v, _)), None) | (None, Some((v, _))) => Some(v * 256),
        (None, None) => None,
    }
}
