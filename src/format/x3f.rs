//! Sigma X3F container.
//!
//! An X3F file is little-endian throughout. It opens with a `FOVb` header
//! and ends with the offset of a `SECd` directory. Each directory entry
//! names one section by offset, length and a four-character id:
//!
//! - `IMAG`/`IMA2`: a `SECi` image section; the raw data and the JPEG
//!   preview are both stored this way, told apart by type and format
//! - `PROP`: a `SECp` list of UTF-16 key/value properties (`CAMMANUF`,
//!   `CAMMODEL`, `ISO`, ...)
//!
//! Later models drop the make and model properties; their preview JPEG
//! carries an EXIF TIFF with the usual `Make`/`Model` tags instead.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::debug;

use crate::error::DecodeError;
use crate::io::ByteCursor;

use super::tiff::{ByteOrder, TiffRoot};

/// Leading bytes of every X3F file.
pub const X3F_MAGIC: &[u8] = b"FOVb";

/// Oldest header, directory, image and property version understood.
const MIN_VERSION: u32 = 0x0002_0000;

/// Bytes of a `SECi` header in front of the image data.
const IMAGE_HEADER_SIZE: usize = 28;

/// Upper bound on entries in the directory and the property list.
const MAX_ENTRIES: u32 = 1000;

/// Image section type of a JPEG preview.
const TYPE_PREVIEW: u32 = 2;

/// Image format of a JPEG preview.
const FORMAT_JPEG: u32 = 0x12;

/// Distance from the JPEG start to the `Exif` identifier and to its TIFF.
const EXIF_ID_OFFSET: usize = 6;
const EXIF_TIFF_OFFSET: usize = 12;

// =============================================================================
// X3fImage
// =============================================================================

/// One `SECi` image section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X3fImage {
    /// 1 and 3 are raw data, 2 is a preview
    pub kind: u32,
    /// Coding of the data: 6 is the Huffman/curve format, 30 and 35 the
    /// TRUE plane formats, 0x12 JPEG
    pub format: u32,
    pub width: usize,
    pub height: usize,
    /// Bytes per row, 0 when rows vary in length
    pub pitch: usize,
    /// File offset of the data behind the section header
    pub data_offset: usize,
    pub data_size: usize,
}

impl X3fImage {
    fn parse(data: &[u8], offset: usize, length: usize) -> Result<Self, DecodeError> {
        let mut cursor = ByteCursor::new(data, ByteOrder::LittleEndian);
        cursor.seek(offset)?;
        if cursor.get_bytes(4)? != b"SECi" {
            return Err(DecodeError::corrupt(format!(
                "X3F image section at {offset} has no SECi signature"
            )));
        }
        check_version(cursor.get_u32()?, "image section")?;
        let kind = cursor.get_u32()?;
        let format = cursor.get_u32()?;
        let width = cursor.get_u32()? as usize;
        let height = cursor.get_u32()? as usize;
        let pitch = cursor.get_u32()? as usize;

        let data_size = length.checked_sub(IMAGE_HEADER_SIZE).ok_or_else(|| {
            DecodeError::corrupt(format!("X3F image section of {length} bytes"))
        })?;
        Ok(Self {
            kind,
            format,
            width,
            height,
            pitch: if pitch == data_size { 0 } else { pitch },
            data_offset: offset + IMAGE_HEADER_SIZE,
            data_size,
        })
    }

    /// Whether this section holds sensor data rather than a preview.
    pub fn is_raw(&self) -> bool {
        self.kind == 1 || self.kind == 3
    }
}

// =============================================================================
// X3fFile
// =============================================================================

/// Sections and properties of an X3F file.
#[derive(Debug, Clone, Default)]
pub struct X3fFile {
    pub images: Vec<X3fImage>,
    pub properties: HashMap<String, String>,
}

impl X3fFile {
    /// Parse the header and the section directory.
    ///
    /// # Errors
    /// - `NotThisFormat` without the `FOVb` signature
    /// - `UnsupportedFormat` for file or section versions before 2.0
    /// - `Truncated` or `Corrupt` for directories and sections that do not
    ///   fit the file
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if !data.starts_with(X3F_MAGIC) {
            return Err(DecodeError::NotThisFormat("missing FOVb signature".to_string()));
        }
        let mut cursor = ByteCursor::new(data, ByteOrder::LittleEndian);
        cursor.seek(4)?;
        check_version(cursor.get_u32()?, "file")?;

        let end = data.len().checked_sub(4).ok_or_else(|| {
            DecodeError::Truncated("X3F file too short for a directory".to_string())
        })?;
        let directory = cursor.u32_at(end)? as usize;
        cursor.seek(directory)?;
        if cursor.get_bytes(4)? != b"SECd" {
            return Err(DecodeError::corrupt(format!(
                "no X3F directory at offset {directory}"
            )));
        }
        check_version(cursor.get_u32()?, "directory")?;
        let count = cursor.get_u32()?;
        if count > MAX_ENTRIES {
            return Err(DecodeError::corrupt(format!("X3F directory claims {count} entries")));
        }

        let mut file = Self::default();
        for _ in 0..count {
            let offset = cursor.get_u32()? as usize;
            let length = cursor.get_u32()? as usize;
            let id = cursor.get_bytes(4)?;
            match id {
                b"IMAG" | b"IMA2" => file.images.push(X3fImage::parse(data, offset, length)?),
                b"PROP" => file.read_properties(data, offset)?,
                other => debug!(section = ?String::from_utf8_lossy(other), offset, "skipping X3F section"),
            }
        }
        debug!(images = file.images.len(), properties = file.properties.len(), "X3F directory parsed");
        Ok(file)
    }

    fn read_properties(&mut self, data: &[u8], offset: usize) -> Result<(), DecodeError> {
        let mut cursor = ByteCursor::new(data, ByteOrder::LittleEndian);
        cursor.seek(offset)?;
        if cursor.get_bytes(4)? != b"SECp" {
            return Err(DecodeError::corrupt(format!(
                "X3F property section at {offset} has no SECp signature"
            )));
        }
        check_version(cursor.get_u32()?, "property section")?;
        let entries = cursor.get_u32()?;
        if entries == 0 {
            return Ok(());
        }
        if entries > MAX_ENTRIES {
            return Err(DecodeError::corrupt(format!("X3F property list claims {entries} entries")));
        }
        let encoding = cursor.get_u32()?;
        if encoding != 0 {
            return Err(DecodeError::unsupported(format!(
                "X3F property character encoding {encoding}"
            )));
        }
        // reserved word and total length
        cursor.skip(8)?;

        let strings = cursor.position() + entries as usize * 8;
        for _ in 0..entries {
            let key = cursor.get_u32()? as usize;
            let value = cursor.get_u32()? as usize;
            let key = utf16_at(data, strings + key * 2)?;
            let value = utf16_at(data, strings + value * 2)?;
            self.properties.insert(key, value);
        }
        Ok(())
    }

    /// The first section holding sensor data.
    pub fn raw_image(&self) -> Option<&X3fImage> {
        self.images.iter().find(|image| image.is_raw())
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Make and model from the `CAMMANUF` and `CAMMODEL` properties.
    pub fn make_model(&self) -> Option<(String, String)> {
        let make = self.property("CAMMANUF")?;
        let model = self.property("CAMMODEL")?;
        Some((make.trim().to_string(), model.trim().to_string()))
    }

    /// Parse the EXIF TIFF of the JPEG preview, or an empty root when the
    /// file has none.
    pub fn parse_exif(&self, data: &Bytes) -> TiffRoot {
        let preview = self.images.iter().find(|image| {
            image.kind == TYPE_PREVIEW && image.format == FORMAT_JPEG && image.data_size > 100
        });
        let Some(preview) = preview else {
            return TiffRoot::empty();
        };
        let start = preview.data_offset;
        let end = start.saturating_add(preview.data_size);
        let id = data.get(start + EXIF_ID_OFFSET..start + EXIF_ID_OFFSET + 4);
        if end > data.len() || id != Some(&b"Exif"[..]) {
            return TiffRoot::empty();
        }
        match TiffRoot::parse(data.slice(start + EXIF_TIFF_OFFSET..end)) {
            Ok(root) => root,
            Err(err) => {
                debug!(error = %err, "X3F preview has no usable EXIF TIFF");
                TiffRoot::empty()
            }
        }
    }
}

fn check_version(version: u32, what: &str) -> Result<(), DecodeError> {
    if version < MIN_VERSION {
        return Err(DecodeError::unsupported(format!(
            "X3F {what} version {:#x} is too old",
            version
        )));
    }
    Ok(())
}

/// Nul-terminated UTF-16LE string at `offset`.
fn utf16_at(data: &[u8], offset: usize) -> Result<String, DecodeError> {
    let bytes = data.get(offset..).ok_or_else(|| {
        DecodeError::Truncated(format!("X3F property string at {offset} is past the end"))
    })?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}
