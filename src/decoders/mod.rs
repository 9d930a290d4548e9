//! Per-manufacturer decoders and the dispatch between them.
//!
//! Decoding a file goes through the same steps for every vendor:
//!
//! 1. **Identify**: [`identify`] picks a [`DecoderKind`] from the DNG
//!    version tag or the `Make` string of the parsed container.
//! 2. **Check support**: the decoder looks its camera up in the
//!    [`CameraDb`]; unknown cameras are decoded anyway unless
//!    [`DecodeOptions::fail_on_unknown`] is set.
//! 3. **Decode**: the decoder locates strips, tiles or slices, picks a
//!    codec and fills a [`RawImage`].
//! 4. **Finalize**: tone tables are applied, bad pixels interpolated.
//! 5. **Metadata**: CFA, levels, crop and white balance. Failures here are
//!    recorded on the image and never fail the decode.
//!
//! Each vendor implements the small [`RawDecoder`] trait; [`DecoderKind`]
//! is the closed set of implementations.

mod canon;
mod dng;
mod fuji;
mod kodak;
mod minolta;
mod naked;
mod nikon;
mod olympus;
mod panasonic;
mod pentax;
mod samsung;
mod sigma;
mod sony;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::camera::{Camera, CameraDb};
use crate::codec::{read_uncompressed, BitOrder, StripLayout};
use crate::error::DecodeError;
use crate::format::tiff::{Ifd, TiffRoot, TiffTag};
use crate::format::{parse_container, ContainerKind};
use crate::image::{LookupTable, RawImage, SampleType};

// =============================================================================
// DecoderKind
// =============================================================================

/// The decoder families this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecoderKind {
    /// Canon CR2, including sRAW/mRAW and the older TIFF-wrapped format
    Canon,
    /// Sony ARW and SR2
    Sony,
    /// Nikon NEF and NRW
    Nikon,
    /// Olympus ORF
    Olympus,
    /// Pentax and Ricoh PEF
    Pentax,
    /// Panasonic and Leica RW2/RWL
    Panasonic,
    /// Fujifilm RAF
    Fuji,
    /// Kodak DCR/KDC
    Kodak,
    /// Samsung SRW
    Samsung,
    /// Minolta MRW
    Minolta,
    /// Sigma X3F
    Sigma,
    /// Adobe DNG
    Dng,
    /// Headerless files recognised by size
    Naked,
}

impl DecoderKind {
    /// Short human-readable name.
    pub const fn name(&self) -> &'static str {
        match self {
            DecoderKind::Canon => "CR2",
            DecoderKind::Sony => "ARW",
            DecoderKind::Nikon => "NEF",
            DecoderKind::Olympus => "ORF",
            DecoderKind::Pentax => "PEF",
            DecoderKind::Panasonic => "RW2",
            DecoderKind::Fuji => "RAF",
            DecoderKind::Kodak => "DCR",
            DecoderKind::Samsung => "SRW",
            DecoderKind::Minolta => "MRW",
            DecoderKind::Sigma => "X3F",
            DecoderKind::Dng => "DNG",
            DecoderKind::Naked => "Naked",
        }
    }
}

impl std::fmt::Display for DecoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// DecodeOptions
// =============================================================================

/// Caller-controlled decode behaviour.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Worker threads for banded codecs, 0 for one per core
    pub threads: usize,
    /// Refuse cameras missing from the database
    pub fail_on_unknown: bool,
    /// Apply the crop from the database or the file
    pub apply_crop: bool,
    /// Run DNG opcode list 1
    pub apply_stage1_opcodes: bool,
    /// Keep tone tables on the image instead of applying them
    pub uncorrected_raw_values: bool,
    /// Interpolate pixels marked bad during decode
    pub interpolate_bad_pixels: bool,
    /// Read-only camera lookup
    pub cameras: Arc<CameraDb>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            threads: 0,
            fail_on_unknown: false,
            apply_crop: true,
            apply_stage1_opcodes: true,
            uncorrected_raw_values: false,
            interpolate_bad_pixels: true,
            cameras: Arc::new(CameraDb::empty()),
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// State shared by the steps of one decode.
#[derive(Debug)]
pub struct Session<'a> {
    pub root: &'a TiffRoot,
    pub file: Bytes,
    pub options: &'a DecodeOptions,
    hints: HashMap<String, String>,
}

impl<'a> Session<'a> {
    pub fn new(root: &'a TiffRoot, file: Bytes, options: &'a DecodeOptions) -> Self {
        Self {
            root,
            file,
            options,
            hints: HashMap::new(),
        }
    }

    /// A hint adopted from the camera database entry.
    pub fn hint(&self, name: &str) -> Option<&str> {
        self.hints.get(name).map(String::as_str)
    }

    pub fn has_hint(&self, name: &str) -> bool {
        self.hints.contains_key(name)
    }

    fn camera(&self, make: &str, model: &str, mode: &str) -> Option<&'a Camera> {
        let cameras: &'a CameraDb = &self.options.cameras;
        cameras.find(make, model, mode)
    }

    /// Whether the database lists this exact make, model and mode.
    pub fn has_camera(&self, make: &str, model: &str, mode: &str) -> bool {
        self.camera(make.trim(), model.trim(), mode).is_some()
    }

    /// Check the camera against the database and adopt its hints.
    ///
    /// Returns `Ok(false)` for a camera that is not listed, so decoders can
    /// retry with another mode string.
    ///
    /// # Errors
    /// `CameraNotSupported` for unlisted cameras when `fail_on_unknown` is
    /// set, for entries marked unsupported, and for entries that need a
    /// newer decoder.
    pub fn check_camera_supported(
        &mut self,
        make: &str,
        model: &str,
        mode: &str,
        decoder_version: u32,
    ) -> Result<bool, DecodeError> {
        let (make, model) = (make.trim(), model.trim());
        let not_supported = || DecodeError::CameraNotSupported {
            make: make.to_string(),
            model: model.to_string(),
            mode: mode.to_string(),
        };

        let Some(camera) = self.camera(make, model, mode) else {
            if mode.is_empty() {
                warn!(make, model, "camera not in database");
            }
            if self.options.fail_on_unknown {
                return Err(not_supported());
            }
            return Ok(false);
        };
        if !camera.supported {
            info!(make, model, mode, "camera explicitly unsupported");
            return Err(not_supported());
        }
        if camera.decoder_version > decoder_version {
            info!(
                make,
                model,
                required = camera.decoder_version,
                available = decoder_version,
                "camera needs a newer decoder"
            );
            return Err(not_supported());
        }
        self.hints = camera.hints.clone();
        Ok(true)
    }

    /// Apply the database entry for the camera to `image`.
    ///
    /// Make and model are always recorded; the rest only when the camera
    /// is listed.
    pub fn set_metadata(
        &self,
        image: &mut RawImage,
        make: &str,
        model: &str,
        mode: &str,
        iso: u32,
    ) {
        let (make, model) = (make.trim(), model.trim());
        image.metadata.iso = iso;
        image.metadata.make = make.to_string();
        image.metadata.model = model.to_string();

        let Some(camera) = self.camera(make, model, mode) else {
            debug!(make, model, mode, "no database entry for metadata");
            return;
        };

        match camera.cfa_pattern() {
            Ok(Some(cfa)) => image.cfa = cfa,
            Ok(None) => {}
            Err(message) => image.add_error(format!("camera CFA: {message}")),
        }
        image.metadata.canonical_make =
            camera.canonical_make.clone().unwrap_or_else(|| make.to_string());
        image.metadata.canonical_model =
            camera.canonical_model.clone().unwrap_or_else(|| model.to_string());
        image.metadata.mode = mode.to_string();

        if self.options.apply_crop {
            if let Some(crop) = camera.crop {
                let rect = crop.resolve(image.width() as i64, image.height() as i64);
                if !image.crop_with_cfa_shift(rect) {
                    image.add_error(format!("camera crop {rect:?} does not fit the image"));
                }
            }
        }

        if let Some(sensor) = camera.sensor_for_iso(iso) {
            image.black_level = sensor.black;
            image.white_point = sensor.white.max(0) as u32;
            image.black_areas = camera.black_areas.iter().map(|&a| a.into()).collect();
            let cells = if image.is_cfa { image.cfa.area() } else { image.cpp() };
            if image.black_areas.is_empty()
                && !sensor.black_separate.is_empty()
                && cells <= sensor.black_separate.len()
            {
                for (slot, &v) in image
                    .black_level_separate
                    .iter_mut()
                    .zip(&sensor.black_separate)
                    .take(cells)
                {
                    *slot = v;
                }
            }
        } else {
            image.black_areas = camera.black_areas.iter().map(|&a| a.into()).collect();
        }

        if let Some(values) = camera.hint("override_cfa_black") {
            match parse_list::<i32>(values, 4) {
                Some(v) => image.black_level_separate.copy_from_slice(&v),
                None => image.add_error(
                    "expected 4 values '10,20,30,20' for the override_cfa_black hint",
                ),
            }
        }
        if let Some(values) = camera.hint("override_whitebalance") {
            match parse_list::<f32>(values, 3) {
                Some(v) => image.metadata.wb_coeffs = Some([v[0], v[1], v[2]]),
                None => image.add_error(
                    "expected 3 values '1.5,1.0,2.0' for the override_whitebalance hint",
                ),
            }
        }
    }

    /// Attach a tone curve to the image. The curve is dithered when it
    /// will be applied here rather than by the caller.
    pub fn set_table(&self, image: &mut RawImage, curve: &[u16]) -> Result<(), DecodeError> {
        image.table = Some(LookupTable::new(curve, !self.options.uncorrected_raw_values)?);
        Ok(())
    }

    /// Bytes `offset..offset + count`, cut short at the end of the file.
    ///
    /// # Errors
    /// `Truncated` when `offset` is at or past the end of the file.
    pub fn stream(&self, offset: u32, count: u32) -> Result<&[u8], DecodeError> {
        let start = offset as usize;
        if start >= self.file.len() {
            return Err(DecodeError::Truncated(format!(
                "data offset {start} is past the end of the file ({} bytes)",
                self.file.len()
            )));
        }
        let end = start.saturating_add(count as usize).min(self.file.len());
        Ok(&self.file[start..end])
    }

    /// Bytes from `offset` to the end of the file.
    pub fn stream_from(&self, offset: u32) -> Result<&[u8], DecodeError> {
        self.stream(offset, u32::MAX)
    }

    /// Allocate the output image once its geometry is known.
    ///
    /// # Errors
    /// `Truncated` when the whole file is too small to hold that many
    /// samples in the densest supported encoding, then the errors of
    /// [`RawImage::new`].
    pub fn allocate(
        &self,
        width: usize,
        height: usize,
        cpp: usize,
        sample: SampleType,
    ) -> Result<RawImage, DecodeError> {
        let samples = width.saturating_mul(height).saturating_mul(cpp);
        if samples > self.file.len().saturating_mul(MAX_SAMPLES_PER_BYTE) {
            return Err(DecodeError::Truncated(format!(
                "{width}x{height}x{cpp} samples cannot fit in {} bytes",
                self.file.len()
            )));
        }
        RawImage::new(width, height, cpp, sample)
    }
}

/// Most samples any supported entropy-coded or packed stream stores per
/// byte. SRW v3 groups reach about 14.
const MAX_SAMPLES_PER_BYTE: usize = 16;

fn parse_list<T: std::str::FromStr>(values: &str, expected: usize) -> Option<Vec<T>> {
    let parsed: Vec<T> = values
        .split(',')
        .map(|v| v.trim().parse().ok())
        .collect::<Option<_>>()?;
    (parsed.len() == expected).then_some(parsed)
}

// =============================================================================
// RawDecoder
// =============================================================================

/// One manufacturer family.
pub trait RawDecoder {
    /// Compared against `decoder_version` of database entries.
    fn version(&self) -> u32;

    /// Reject files this build must not decode.
    fn check_support(&self, session: &mut Session<'_>) -> Result<(), DecodeError>;

    /// Locate the pixel data and decode it.
    fn decode(&self, session: &Session<'_>) -> Result<RawImage, DecodeError>;

    /// Fill CFA, levels, crop and white balance.
    fn extract_metadata(
        &self,
        session: &Session<'_>,
        image: &mut RawImage,
    ) -> Result<(), DecodeError>;
}

fn run<D: RawDecoder>(decoder: &D, session: &mut Session<'_>) -> Result<RawImage, DecodeError> {
    decoder.check_support(session)?;
    let mut image = decoder.decode(session)?;
    finalize_pixels(session, &mut image)?;

    if let Err(err) = decoder.extract_metadata(session, &mut image) {
        image.add_error(format!("metadata: {err}"));
    }
    if image.black_level_separate[0] < 0 {
        if let Err(err) = image.calculate_black_areas() {
            image.add_error(format!("black areas: {err}"));
        }
    }
    Ok(image)
}

/// Apply the tone table and repair bad pixels.
fn finalize_pixels(session: &Session<'_>, image: &mut RawImage) -> Result<(), DecodeError> {
    if !session.options.uncorrected_raw_values {
        image.apply_table()?;
    }
    if let Some(ratio) = session.hint("pixel_aspect_ratio") {
        match ratio.trim().parse::<f64>() {
            Ok(r) if r > 0.0 => image.metadata.pixel_aspect_ratio = r,
            _ => warn!(ratio, "ignoring invalid pixel_aspect_ratio hint"),
        }
    }
    if session.options.interpolate_bad_pixels && image.bad_pixel_count() > 0 {
        image.fix_bad_pixels()?;
    }
    Ok(())
}

// =============================================================================
// Dispatch
// =============================================================================

/// Pick the decoder for a detected container.
///
/// # Errors
/// `NotThisFormat` from [`identify`] for TIFF files no decoder claims.
pub fn decoder_for(container: ContainerKind, root: &TiffRoot) -> Result<DecoderKind, DecodeError> {
    match container {
        ContainerKind::Tiff => identify(root),
        ContainerKind::Raf => Ok(DecoderKind::Fuji),
        ContainerKind::Mrw => Ok(DecoderKind::Minolta),
        ContainerKind::X3f => Ok(DecoderKind::Sigma),
        ContainerKind::Naked => Ok(DecoderKind::Naked),
    }
}

/// Pick the decoder for a parsed TIFF-family container.
///
/// # Errors
/// `NotThisFormat` when neither a DNG version nor a known `Make` is present.
pub fn identify(root: &TiffRoot) -> Result<DecoderKind, DecodeError> {
    let is_dng = root
        .get_ifds_with_tag(TiffTag::DngVersion)
        .iter()
        .filter_map(|ifd| ifd.get_entry(TiffTag::DngVersion))
        .any(|e| e.data().first() == Some(&1));
    if is_dng {
        return Ok(DecoderKind::Dng);
    }

    for ifd in root.get_ifds_with_tag(TiffTag::Make) {
        let Some(make) = ifd.get_entry(TiffTag::Make).map(|e| e.get_string()) else {
            continue;
        };
        if let Some(kind) = kind_for_make(make.trim()) {
            debug!(make = make.trim(), decoder = %kind, "decoder selected");
            return Ok(kind);
        }
    }
    Err(DecodeError::NotThisFormat(
        "no decoder for this TIFF-based file".to_string(),
    ))
}

fn kind_for_make(make: &str) -> Option<DecoderKind> {
    let kind = match make {
        "Canon" => DecoderKind::Canon,
        "FUJIFILM" => DecoderKind::Fuji,
        "NIKON CORPORATION" | "NIKON" => DecoderKind::Nikon,
        "SONY" => DecoderKind::Sony,
        "PENTAX Corporation" | "RICOH IMAGING COMPANY, LTD." | "PENTAX" => DecoderKind::Pentax,
        "Panasonic" | "LEICA" => DecoderKind::Panasonic,
        "SAMSUNG" => DecoderKind::Samsung,
        "Kodak" | "EASTMAN KODAK COMPANY" => DecoderKind::Kodak,
        "Minolta" | "KONICA MINOLTA" => DecoderKind::Minolta,
        m if m.starts_with("OLYMPUS") => DecoderKind::Olympus,
        _ => return None,
    };
    Some(kind)
}

/// Decode a complete camera file with default options.
pub fn decode(file: &[u8]) -> Result<RawImage, DecodeError> {
    decode_bytes(Bytes::copy_from_slice(file), &DecodeOptions::default())
}

/// Decode a complete camera file.
pub fn decode_bytes(file: Bytes, options: &DecodeOptions) -> Result<RawImage, DecodeError> {
    let (container, root) = parse_container(file.clone(), &options.cameras)?;
    let kind = decoder_for(container, &root)?;
    info!(container = container.name(), decoder = %kind, bytes = file.len(), "decoding");
    decode_kind(kind, &root, file, options)
}

/// Decode with an explicitly chosen decoder and default options.
pub fn decode_with(kind: DecoderKind, root: &TiffRoot, file: &[u8]) -> Result<RawImage, DecodeError> {
    decode_kind(kind, root, Bytes::copy_from_slice(file), &DecodeOptions::default())
}

/// Decode with an explicitly chosen decoder.
pub fn decode_kind(
    kind: DecoderKind,
    root: &TiffRoot,
    file: Bytes,
    options: &DecodeOptions,
) -> Result<RawImage, DecodeError> {
    let mut session = Session::new(root, file, options);
    match kind {
        DecoderKind::Canon => run(&canon::Cr2Decoder, &mut session),
        DecoderKind::Sony => run(&sony::ArwDecoder, &mut session),
        DecoderKind::Nikon => run(&nikon::NefDecoder, &mut session),
        DecoderKind::Olympus => run(&olympus::OrfDecoder, &mut session),
        DecoderKind::Pentax => run(&pentax::PefDecoder, &mut session),
        DecoderKind::Panasonic => run(&panasonic::Rw2Decoder, &mut session),
        DecoderKind::Fuji => run(&fuji::RafDecoder, &mut session),
        DecoderKind::Kodak => run(&kodak::DcrDecoder, &mut session),
        DecoderKind::Samsung => run(&samsung::SrwDecoder, &mut session),
        DecoderKind::Minolta => run(&minolta::MrwDecoder, &mut session),
        DecoderKind::Sigma => run(&sigma::X3fDecoder, &mut session),
        DecoderKind::Dng => run(&dng::DngDecoder, &mut session),
        DecoderKind::Naked => run(&naked::NakedDecoder, &mut session),
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Make and model from the first directory carrying a `Make` tag.
pub(crate) fn make_model(root: &TiffRoot) -> Result<(String, String), DecodeError> {
    let ifd = root
        .get_ifds_with_tag(TiffTag::Make)
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::MissingRequiredTag("Make".to_string()))?;
    let make = ifd.entry(TiffTag::Make)?.get_string();
    let model = ifd
        .get_entry(TiffTag::Model)
        .map(|e| e.get_string())
        .unwrap_or_default();
    Ok((make.trim().to_string(), model.trim().to_string()))
}

/// ISO speed from the EXIF directory, 0 when absent.
pub(crate) fn iso_speed(root: &TiffRoot) -> u32 {
    root.get_entry_recursive(TiffTag::IsoSpeedRatings)
        .and_then(|e| e.get_u32(0).ok())
        .unwrap_or(0)
}

/// Check the camera with an empty mode string.
pub(crate) fn check_default_support(
    session: &mut Session<'_>,
    version: u32,
) -> Result<(), DecodeError> {
    let (make, model) = make_model(session.root)?;
    session.check_camera_supported(&make, &model, "", version)?;
    Ok(())
}

/// First directory with `tag`.
pub(crate) fn first_ifd_with<'r>(root: &'r TiffRoot, tag: TiffTag) -> Result<&'r Ifd, DecodeError> {
    root.get_ifds_with_tag(tag)
        .into_iter()
        .next()
        .ok_or_else(|| DecodeError::MissingRequiredTag(format!("{tag:?}")))
}

/// Width and height of a directory as `usize`.
pub(crate) fn dimensions(ifd: &Ifd) -> Result<(usize, usize), DecodeError> {
    let width = ifd.entry(TiffTag::ImageWidth)?.get_u32(0)? as usize;
    let height = ifd.entry(TiffTag::ImageLength)?.get_u32(0)? as usize;
    Ok((width, height))
}

/// Decode the plain strips of `ifd`.
///
/// The bit depth of each strip is derived from its byte count. The first
/// strip failing is fatal, later ones are recorded on the image.
pub(crate) fn decode_uncompressed(
    session: &Session<'_>,
    ifd: &Ifd,
    order: BitOrder,
) -> Result<RawImage, DecodeError> {
    let (width, height) = dimensions(ifd)?;
    let bps = ifd.entry(TiffTag::BitsPerSample)?.get_u32(0)?;
    let offsets = ifd.entry(TiffTag::StripOffsets)?.get_u32_array()?;
    let counts = ifd.entry(TiffTag::StripByteCounts)?.get_u32_array()?;
    let rows_per_strip = ifd
        .get_entry(TiffTag::RowsPerStrip)
        .and_then(|e| e.get_u32(0).ok())
        .map(|r| r as usize)
        .filter(|&r| r > 0)
        .unwrap_or(height);
    if width == 0 || height == 0 || bps == 0 || bps > 16 {
        return Err(DecodeError::unsupported(format!(
            "uncompressed image {width}x{height} at {bps} bits"
        )));
    }
    if offsets.len() != counts.len() {
        return Err(DecodeError::corrupt(format!(
            "{} strip offsets but {} byte counts",
            offsets.len(),
            counts.len()
        )));
    }

    let mut image = session.allocate(width, height, 1, SampleType::U16)?;
    image.white_point = (1 << bps) - 1;
    let mut y = 0;
    for (i, (&offset, &count)) in offsets.iter().zip(&counts).enumerate() {
        if y >= height {
            break;
        }
        let rows = rows_per_strip.min(height - y);
        let result = session.stream(offset, count).and_then(|input| {
            let bits = (count as usize * 8 / (rows * width)) as u32;
            let bits = if (1..=16).contains(&bits) { bits } else { bps };
            let layout = StripLayout {
                x: 0,
                y,
                width,
                height: rows,
                input_pitch: width * bits as usize / 8,
                bits,
            };
            read_uncompressed(&mut image, input, layout, order, ifd.byte_order())
        });
        match result {
            Ok(()) => {}
            Err(err) if i > 0 && err.is_recoverable() => image.add_error(err.to_string()),
            Err(err) => return Err(err),
        }
        y += rows;
    }
    Ok(image)
}

/// Record a recoverable codec error on the image, propagate anything else.
pub(crate) fn tolerate(image: &mut RawImage, result: Result<(), DecodeError>) -> Result<(), DecodeError> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.is_recoverable() => {
            image.add_error(err.to_string());
            Ok(())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraDb;

    // -------------------------------------------------------------------------
    // Option parsing helpers
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list::<i32>("10, 20,30,20", 4), Some(vec![10, 20, 30, 20]));
        assert_eq!(parse_list::<i32>("10,20", 4), None);
        assert_eq!(parse_list::<f32>("1.5,x,2", 3), None);
    }

    #[test]
    fn test_kind_for_make() {
        assert_eq!(kind_for_make("NIKON CORPORATION"), Some(DecoderKind::Nikon));
        assert_eq!(kind_for_make("OLYMPUS IMAGING CORP."), Some(DecoderKind::Olympus));
        assert_eq!(kind_for_make("RICOH IMAGING COMPANY, LTD."), Some(DecoderKind::Pentax));
        assert_eq!(kind_for_make("Hasselblad"), None);
    }

    // -------------------------------------------------------------------------
    // Camera support
    // -------------------------------------------------------------------------

    const DB: &str = r#"{
        "cameras": [
            {
                "make": "SONY", "model": "DSLR-A700",
                "crop": {"x": 1, "y": 0, "width": -2, "height": 0},
                "cfa": ["RED", "GREEN", "GREEN", "BLUE"], "cfa_width": 2, "cfa_height": 2,
                "sensors": [{"black": 512, "white": 16300}],
                "hints": {"override_cfa_black": "1,2,3,4", "pixel_aspect_ratio": "2.0"}
            },
            {"make": "SONY", "model": "DSLR-A900", "supported": false},
            {"make": "SONY", "model": "ILCE-9", "decoder_version": 99}
        ]
    }"#;

    fn options(fail_on_unknown: bool) -> DecodeOptions {
        DecodeOptions {
            fail_on_unknown,
            cameras: Arc::new(CameraDb::from_json(DB).unwrap()),
            ..DecodeOptions::default()
        }
    }

    #[test]
    fn test_unknown_camera_is_allowed_by_default() {
        let root = TiffRoot::empty();
        let opts = options(false);
        let mut session = Session::new(&root, Bytes::new(), &opts);
        assert!(!session.check_camera_supported("SONY", "NEX-X", "", 1).unwrap());
    }

    #[test]
    fn test_unknown_camera_rejected_when_strict() {
        let root = TiffRoot::empty();
        let opts = options(true);
        let mut session = Session::new(&root, Bytes::new(), &opts);
        let err = session.check_camera_supported("SONY", "NEX-X", "", 1).unwrap_err();
        assert!(matches!(err, DecodeError::CameraNotSupported { .. }));
    }

    #[test]
    fn test_disabled_and_too_new_cameras_rejected() {
        let root = TiffRoot::empty();
        let opts = options(false);
        let mut session = Session::new(&root, Bytes::new(), &opts);
        assert!(session.check_camera_supported("SONY", "DSLR-A900", "", 1).is_err());
        assert!(session.check_camera_supported("SONY", "ILCE-9", "", 1).is_err());
    }

    #[test]
    fn test_hints_adopted_and_metadata_applied() {
        let root = TiffRoot::empty();
        let opts = options(false);
        let mut session = Session::new(&root, Bytes::new(), &opts);
        assert!(session.check_camera_supported(" SONY ", "DSLR-A700 ", "", 1).unwrap());
        assert_eq!(session.hint("pixel_aspect_ratio"), Some("2.0"));

        let mut image = RawImage::new(8, 4, 1, SampleType::U16).unwrap();
        session.set_metadata(&mut image, "SONY ", "DSLR-A700", "", 200);
        assert_eq!(image.metadata.model, "DSLR-A700");
        assert_eq!(image.metadata.iso, 200);
        assert_eq!(image.black_level, 512);
        assert_eq!(image.white_point, 16300);
        assert_eq!(image.black_level_separate, [1, 2, 3, 4]);
        assert_eq!(image.crop().x, 1);
        assert_eq!(image.cropped_width(), 5);
        // odd x origin moves the pattern one column
        assert_eq!(image.cfa.describe(), "GRBG");
    }

    #[test]
    fn test_stream_is_clamped_to_file() {
        let root = TiffRoot::empty();
        let opts = DecodeOptions::default();
        let session = Session::new(&root, Bytes::from_static(&[1, 2, 3, 4]), &opts);
        assert_eq!(session.stream(1, 100).unwrap(), &[2, 3, 4]);
        assert!(matches!(session.stream(4, 1), Err(DecodeError::Truncated(_))));
    }

    #[test]
    fn test_allocate_rejects_geometry_larger_than_file() {
        let root = TiffRoot::empty();
        let opts = DecodeOptions::default();
        let session = Session::new(&root, Bytes::from(vec![0u8; 142]), &opts);

        let err = session.allocate(65535, 65535, 1, SampleType::U16).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated(_)), "{err}");
        // SRW v3 header dimensions
        let err = session.allocate(58112, 58176, 1, SampleType::U16).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated(_)), "{err}");

        let image = session.allocate(16, 142, 1, SampleType::U16).unwrap();
        assert_eq!((image.width(), image.height()), (16, 142));
    }

    #[test]
    fn test_identify_without_make_is_not_this_format() {
        let err = identify(&TiffRoot::empty()).unwrap_err();
        assert!(matches!(err, DecodeError::NotThisFormat(_)));
    }
}
