//! Fujifilm RAF container.
//!
//! A RAF file starts with a fixed big-endian header holding three blocks:
//!
//! - a JPEG preview whose EXIF segment carries the usual TIFF directories
//!   (make, model, ISO)
//! - a Fuji directory of `(tag, length, bytes)` records with sensor size,
//!   layout and white balance
//! - the raw data, which newer models wrap in a TIFF with a Fuji private
//!   sub-directory (tag 0xF000) and older models store bare
//!
//! Offsets inside each embedded TIFF are relative to that TIFF's start.

use std::collections::BTreeMap;

use bytes::Bytes;
use tracing::debug;

use crate::error::DecodeError;
use crate::io::read_u32_be;

use super::tiff::TiffRoot;

/// Leading bytes of every RAF file.
pub const RAF_MAGIC: &[u8] = b"FUJIFILM";

/// Bytes of the fixed header read by [`RafHeader::parse`].
const HEADER_SIZE: usize = 0x6C;

/// Distance from the JPEG start to the TIFF header of its EXIF segment.
const EXIF_TIFF_OFFSET: u32 = 12;

/// Upper bound on records in the Fuji directory.
const MAX_DIRECTORY_ENTRIES: u32 = 255;

// =============================================================================
// RafHeader
// =============================================================================

/// Block offsets from the RAF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RafHeader {
    pub jpeg_offset: u32,
    pub directory_offset: u32,
    pub raw_offset: u32,
    pub raw_length: u32,
}

impl RafHeader {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if !data.starts_with(RAF_MAGIC) {
            return Err(DecodeError::NotThisFormat("missing FUJIFILM signature".to_string()));
        }
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated(format!(
                "RAF header needs {HEADER_SIZE} bytes, file has {}",
                data.len()
            )));
        }
        Ok(Self {
            jpeg_offset: read_u32_be(&data[0x54..]),
            directory_offset: read_u32_be(&data[0x5C..]),
            raw_offset: read_u32_be(&data[0x64..]),
            raw_length: read_u32_be(&data[0x68..]),
        })
    }
}

/// Parse the TIFF directories of a RAF file.
///
/// The EXIF TIFF of the preview and the TIFF wrapping the raw data are
/// merged into one root. Either may be missing; older models store bare
/// raw data where newer ones have the TIFF.
pub fn parse_raf(data: Bytes) -> Result<TiffRoot, DecodeError> {
    let header = RafHeader::parse(&data)?;
    let mut root = TiffRoot::empty();

    let exif = header.jpeg_offset.saturating_add(EXIF_TIFF_OFFSET) as usize;
    if exif < data.len() {
        match TiffRoot::parse(data.slice(exif..)) {
            Ok(tiff) => root = tiff,
            Err(err) => debug!(error = %err, "RAF preview has no usable EXIF TIFF"),
        }
    }

    let raw = header.raw_offset as usize;
    if raw < data.len() {
        match TiffRoot::parse(data.slice(raw..)) {
            Ok(tiff) => root.merge(tiff),
            Err(err) => debug!(error = %err, "RAF raw block is not a TIFF"),
        }
    }
    Ok(root)
}

// =============================================================================
// FujiDirectory
// =============================================================================

/// Fuji directory tags.
pub mod fuji_tag {
    /// Sensor height and width as two big-endian shorts
    pub const RAW_IMAGE_FULL_SIZE: u16 = 0x100;
    /// Crop origin (top, left)
    pub const RAW_IMAGE_CROP_TOP_LEFT: u16 = 0x110;
    /// Cropped height and width
    pub const RAW_IMAGE_CROPPED_SIZE: u16 = 0x111;
    /// Bit 7 of the first byte clear marks the alternate layout
    pub const LAYOUT: u16 = 0x130;
    /// White balance levels, green first
    pub const WB_GRB_LEVELS: u16 = 0x2FF0;
}

/// The `(tag, bytes)` records of the Fuji directory.
#[derive(Debug, Clone, Default)]
pub struct FujiDirectory {
    entries: BTreeMap<u16, Bytes>,
}

impl FujiDirectory {
    /// Parse the directory at `offset`.
    pub fn parse(data: &Bytes, offset: u32) -> Result<Self, DecodeError> {
        let truncated = || DecodeError::Truncated("Fuji directory runs past the end of the file".to_string());
        let mut pos = offset as usize;
        let count = data.get(pos..pos + 4).map(read_u32_be).ok_or_else(truncated)?;
        if count > MAX_DIRECTORY_ENTRIES {
            return Err(DecodeError::corrupt(format!(
                "Fuji directory claims {count} entries"
            )));
        }
        pos += 4;

        let mut entries = BTreeMap::new();
        for _ in 0..count {
            let head = data.get(pos..pos + 4).ok_or_else(truncated)?;
            let tag = u16::from_be_bytes([head[0], head[1]]);
            let len = u16::from_be_bytes([head[2], head[3]]) as usize;
            pos += 4;
            if pos + len > data.len() {
                return Err(truncated());
            }
            entries.insert(tag, data.slice(pos..pos + len));
            pos += len;
        }
        Ok(Self { entries })
    }

    pub fn get(&self, tag: u16) -> Option<&[u8]> {
        self.entries.get(&tag).map(|b| &b[..])
    }

    /// Record `tag` read as big-endian shorts.
    pub fn shorts(&self, tag: u16) -> Option<Vec<u16>> {
        self.get(tag).map(|b| {
            b.chunks_exact(2)
                .map(|c| u16::from_be_bytes([c[0], c[1]]))
                .collect()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(jpeg: u32, dir: u32, raw: u32, raw_len: u32) -> Vec<u8> {
        let mut data = b"FUJIFILMCCD-RAW 0201".to_vec();
        data.resize(HEADER_SIZE, 0);
        data[0x54..0x58].copy_from_slice(&jpeg.to_be_bytes());
        data[0x5C..0x60].copy_from_slice(&dir.to_be_bytes());
        data[0x64..0x68].copy_from_slice(&raw.to_be_bytes());
        data[0x68..0x6C].copy_from_slice(&raw_len.to_be_bytes());
        data
    }

    #[test]
    fn test_header_offsets() {
        let data = header(0x100, 0x200, 0x300, 0x40);
        let h = RafHeader::parse(&data).unwrap();
        assert_eq!(h.jpeg_offset, 0x100);
        assert_eq!(h.directory_offset, 0x200);
        assert_eq!(h.raw_offset, 0x300);
        assert_eq!(h.raw_length, 0x40);
    }

    #[test]
    fn test_short_header_is_truncated() {
        let err = RafHeader::parse(b"FUJIFILMCCD").unwrap_err();
        assert!(matches!(err, DecodeError::Truncated(_)));
    }

    #[test]
    fn test_bare_raw_data_gives_empty_root() {
        let mut data = header(0x1000, 0, 0x70, 4);
        data.extend_from_slice(&[0u8; 8]);
        let root = parse_raf(Bytes::from(data)).unwrap();
        assert!(root.ifds.is_empty());
    }

    #[test]
    fn test_directory_records() {
        let mut data = vec![0u8; 4];
        data.extend_from_slice(&2u32.to_be_bytes());
        data.extend_from_slice(&0x100u16.to_be_bytes());
        data.extend_from_slice(&4u16.to_be_bytes());
        data.extend_from_slice(&[0x00, 0x10, 0x00, 0x20]);
        data.extend_from_slice(&0x130u16.to_be_bytes());
        data.extend_from_slice(&1u16.to_be_bytes());
        data.push(0x80);

        let dir = FujiDirectory::parse(&Bytes::from(data), 4).unwrap();
        assert_eq!(dir.len(), 2);
        assert_eq!(dir.shorts(fuji_tag::RAW_IMAGE_FULL_SIZE), Some(vec![16, 32]));
        assert_eq!(dir.get(fuji_tag::LAYOUT), Some(&[0x80u8][..]));
    }

    #[test]
    fn test_directory_record_past_end() {
        let mut data = 1u32.to_be_bytes().to_vec();
        data.extend_from_slice(&0x100u16.to_be_bytes());
        data.extend_from_slice(&40u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);
        assert!(FujiDirectory::parse(&Bytes::from(data), 0).is_err());
    }
}
