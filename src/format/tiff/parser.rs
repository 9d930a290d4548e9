//! TIFF header and directory-chain parsing.
//!
//! Every supported camera container is a TIFF derivative, sometimes with a
//! private version marker.
//!
//! # TIFF Header Structure
//!
//! ```text
//! Bytes 0-1: Byte order (0x4949 = little-endian "II", 0x4D4D = big-endian "MM")
//! Bytes 2-3: Version (42; 0x55 for Panasonic RW2; "RO"/"RS" for Olympus ORF)
//! Bytes 4-7: Offset to first IFD (4 bytes)
//! ```

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::{read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le};

use super::ifd::{Ifd, IfdParser, ParseContext};
use super::values::Entry;

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes indicating little-endian byte order ("II" for Intel)
const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;

/// Magic bytes indicating big-endian byte order ("MM" for Motorola)
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;

/// Version number for classic TIFF
const VERSION_TIFF: u16 = 42;

/// Panasonic RW2 ("IIU\0")
const VERSION_PANASONIC: u16 = 0x0055;

/// Olympus ORF ("IIRO" / "MMOR")
const VERSION_OLYMPUS_RO: u16 = 0x4F52;

/// Olympus ORF, older bodies ("IIRS")
const VERSION_OLYMPUS_RS: u16 = 0x5352;

/// Size of the TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

// =============================================================================
// ByteOrder
// =============================================================================

/// Byte order (endianness) of a TIFF structure.
///
/// Selected once per file from the header, and switched locally by maker
/// notes that embed their own byte-order mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    /// Little-endian ("II" = Intel)
    LittleEndian,
    /// Big-endian ("MM" = Motorola)
    BigEndian,
}

impl ByteOrder {
    /// Byte order from a two-byte "II"/"MM" mark.
    pub fn from_mark(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x49, 0x49, ..] => Some(ByteOrder::LittleEndian),
            [0x4D, 0x4D, ..] => Some(ByteOrder::BigEndian),
            _ => None,
        }
    }

    /// Read a u16 from a byte slice using this byte order.
    #[inline]
    pub fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::LittleEndian => read_u16_le(bytes),
            ByteOrder::BigEndian => read_u16_be(bytes),
        }
    }

    /// Read a u32 from a byte slice using this byte order.
    #[inline]
    pub fn read_u32(self, bytes: &[u8]) -> u32 {
        match self {
            ByteOrder::LittleEndian => read_u32_le(bytes),
            ByteOrder::BigEndian => read_u32_be(bytes),
        }
    }

    /// Read a u64 from a byte slice using this byte order.
    #[inline]
    pub fn read_u64(self, bytes: &[u8]) -> u64 {
        match self {
            ByteOrder::LittleEndian => read_u64_le(bytes),
            ByteOrder::BigEndian => read_u64_be(bytes),
        }
    }
}

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    /// Byte order for all multi-byte values in the file
    pub byte_order: ByteOrder,

    /// Raw version marker (42 for plain TIFF)
    pub version: u16,

    /// Offset to the first IFD in the file
    pub first_ifd_offset: u32,
}

impl TiffHeader {
    /// Parse a TIFF header from raw bytes.
    ///
    /// # Arguments
    /// * `bytes` - Raw header bytes (at least 8)
    /// * `file_size` - Total file size (used to validate the IFD offset)
    ///
    /// # Errors
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if the version marker is not a known TIFF variant
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(bytes: &[u8], file_size: u64) -> Result<Self, TiffError> {
        if bytes.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: bytes.len() as u64,
            });
        }

        // Read as little-endian: we're checking for specific byte patterns
        let magic = u16::from_le_bytes([bytes[0], bytes[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&bytes[2..4]);
        match version {
            VERSION_TIFF | VERSION_PANASONIC | VERSION_OLYMPUS_RO | VERSION_OLYMPUS_RS => {}
            // "MMOR" reads as 0x4F52 big-endian, "MMRO" would be 0x524F
            0x524F | 0x5253 => {}
            _ => return Err(TiffError::InvalidVersion(version)),
        }

        let first_ifd_offset = byte_order.read_u32(&bytes[4..8]);
        if first_ifd_offset as u64 >= file_size {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset as u64));
        }

        Ok(TiffHeader {
            byte_order,
            version,
            first_ifd_offset,
        })
    }

    /// Whether the version marker is a vendor variant rather than 42.
    #[inline]
    pub fn is_vendor_variant(&self) -> bool {
        self.version != VERSION_TIFF
    }
}

// =============================================================================
// TiffRoot
// =============================================================================

/// The root directory chain of a parsed container.
///
/// Each element is one IFD of the top-level "next IFD" chain with its
/// sub-directories attached. Lookups walk the whole tree depth-first.
#[derive(Debug, Clone)]
pub struct TiffRoot {
    pub header: TiffHeader,
    pub ifds: Vec<Ifd>,
}

impl TiffRoot {
    /// Parse a container starting at the beginning of `data`.
    ///
    /// # Errors
    /// Header errors map to `NotThisFormat` at the decode layer. A broken
    /// first IFD is fatal; a broken IFD later in the chain ends the chain.
    pub fn parse(data: Bytes) -> Result<Self, TiffError> {
        let header = TiffHeader::parse(&data, data.len() as u64)?;
        let mut parser = IfdParser::new();
        let ctx = ParseContext::new(data, header.byte_order);

        let mut ifds = Vec::new();
        let mut offset = header.first_ifd_offset;
        while offset != 0 {
            match parser.parse_ifd(&ctx, offset, 0) {
                Ok(ifd) => {
                    offset = ifd.next_offset();
                    ifds.push(ifd);
                }
                Err(e) if ifds.is_empty() => return Err(e),
                Err(e) => {
                    debug!(offset, error = %e, "stopping IFD chain");
                    break;
                }
            }
        }

        Ok(TiffRoot { header, ifds })
    }

    /// A root without directories, for headerless files.
    pub fn empty() -> Self {
        TiffRoot {
            header: TiffHeader {
                byte_order: ByteOrder::LittleEndian,
                version: VERSION_TIFF,
                first_ifd_offset: 0,
            },
            ifds: Vec::new(),
        }
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Append the chain of another container (e.g. the second TIFF of a RAF).
    pub fn merge(&mut self, other: TiffRoot) {
        self.ifds.extend(other.ifds);
    }

    /// Depth-first search for a tag across the whole chain and tree.
    pub fn get_entry_recursive(&self, tag: impl Into<u16>) -> Option<&Entry> {
        let tag = tag.into();
        self.ifds.iter().find_map(|ifd| ifd.get_entry_recursive(tag))
    }

    /// Whether any directory contains `tag`.
    pub fn has_entry_recursive(&self, tag: impl Into<u16>) -> bool {
        self.get_entry_recursive(tag).is_some()
    }

    /// Every directory, at any depth, containing `tag`, in depth-first order.
    pub fn get_ifds_with_tag(&self, tag: impl Into<u16>) -> Vec<&Ifd> {
        let tag = tag.into();
        let mut out = Vec::new();
        for ifd in &self.ifds {
            ifd.collect_ifds_with_tag(tag, &mut out);
        }
        out
    }

    /// Directories containing `tag` whose value equals `value`.
    pub fn get_ifds_with_tag_where(&self, tag: impl Into<u16>, value: u32) -> Vec<&Ifd> {
        let tag = tag.into();
        self.get_ifds_with_tag(tag)
            .into_iter()
            .filter(|ifd| {
                ifd.get_entry(tag)
                    .and_then(|e| e.get_u32(0).ok())
                    .is_some_and(|v| v == value)
            })
            .collect()
    }

    /// All directories in depth-first order.
    pub fn all_ifds(&self) -> Vec<&Ifd> {
        let mut out = Vec::new();
        for ifd in &self.ifds {
            ifd.collect_all(&mut out);
        }
        out
    }
}

// =============================================================================
// Tests
// =============================================================================
