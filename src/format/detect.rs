//! Container detection for camera RAW files.
//!
//! This module identifies the outer container of a file by its magic bytes
//! and parses it into a [`TiffRoot`]:
//!
//! - **TIFF family**: `II*\0`, `MM\0*` and the vendor variants (Panasonic
//!   `IIU\0`, Olympus `IIRO`/`IIRS`/`MMOR`)
//! - **Fujifilm RAF**: `FUJIFILM` header with embedded TIFF blocks
//! - **Minolta MRW**: `\0MRM` block container with an embedded TIFF
//! - **Sigma X3F**: `FOVb` section directory; the TIFF comes from the EXIF
//!   segment of the preview, when there is one
//! - **Naked**: no header at all, recognised by exact file size through the
//!   camera database
//!
//! Files matching none of these return `NotThisFormat`.

use bytes::Bytes;
use tracing::debug;

use crate::camera::CameraDb;
use crate::error::DecodeError;

use super::mrw::{MrwHeader, MRW_MAGIC};
use super::raf::{parse_raf, RAF_MAGIC};
use super::tiff::{ByteOrder, TiffRoot, TIFF_HEADER_SIZE};
use super::x3f::{X3fFile, X3F_MAGIC};

// =============================================================================
// ContainerKind
// =============================================================================

/// Detected outer container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    /// TIFF or one of its vendor variants
    Tiff,

    /// Fujifilm RAF
    Raf,

    /// Minolta MRW
    Mrw,

    /// Sigma X3F
    X3f,

    /// Headerless file matched by size
    Naked,
}

impl ContainerKind {
    /// Get a human-readable name for the container.
    pub const fn name(&self) -> &'static str {
        match self {
            ContainerKind::Tiff => "TIFF",
            ContainerKind::Raf => "Fujifilm RAF",
            ContainerKind::Mrw => "Minolta MRW",
            ContainerKind::X3f => "Sigma X3F",
            ContainerKind::Naked => "Naked",
        }
    }
}

// =============================================================================
// Detection
// =============================================================================

/// TIFF version markers accepted at offset 2.
const TIFF_VERSIONS: [u16; 6] = [42, 0x55, 0x4F52, 0x5352, 0x524F, 0x5253];

/// Identify the container from the leading bytes.
///
/// Returns `None` when no magic matches; headerless files can only be
/// recognised through [`parse_container`] and the camera database.
pub fn detect_container(data: &[u8]) -> Option<ContainerKind> {
    if data.starts_with(RAF_MAGIC) {
        return Some(ContainerKind::Raf);
    }
    if data.starts_with(MRW_MAGIC) {
        return Some(ContainerKind::Mrw);
    }
    if data.starts_with(X3F_MAGIC) {
        return Some(ContainerKind::X3f);
    }
    if is_tiff_header(data) {
        return Some(ContainerKind::Tiff);
    }
    None
}

/// Check if bytes start with a TIFF header or one of its vendor variants.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < TIFF_HEADER_SIZE {
        return false;
    }
    let Some(order) = ByteOrder::from_mark(&bytes[0..2]) else {
        return false;
    };
    TIFF_VERSIONS.contains(&order.read_u16(&bytes[2..4]))
}

/// Detect the container and parse its directory tree.
///
/// # Errors
/// - `NotThisFormat` if no container magic matches and no naked camera has
///   this file size
/// - errors from the container parser for recognised but broken files
pub fn parse_container(
    data: Bytes,
    cameras: &CameraDb,
) -> Result<(ContainerKind, TiffRoot), DecodeError> {
    let kind = match detect_container(&data) {
        Some(kind) => kind,
        None if cameras.find_naked(data.len() as u64).is_some() => ContainerKind::Naked,
        None => {
            return Err(DecodeError::NotThisFormat(format!(
                "no known container signature in {} bytes",
                data.len()
            )))
        }
    };
    debug!(container = kind.name(), "container detected");

    let root = match kind {
        ContainerKind::Tiff => TiffRoot::parse(data)?,
        ContainerKind::Raf => parse_raf(data)?,
        ContainerKind::Mrw => MrwHeader::parse(&data)?.parse_tiff(&data)?,
        ContainerKind::X3f => X3fFile::parse(&data)?.parse_exif(&data),
        ContainerKind::Naked => TiffRoot::empty(),
    };
    Ok((kind, root))
}

// =============================================================================
// Tests
// =============================================================================
