//! TIFF tag and field type definitions.
//!
//! This module defines the vocabulary of the container grammar:
//! - Field types that determine how values are encoded
//! - Tag IDs shared by TIFF, EXIF and DNG
//!
//! Vendor-private tags (maker-note payloads) live next to the decoder that
//! interprets them, since their meaning is directory-local.

// =============================================================================
// TIFF Field Types
// =============================================================================

/// TIFF field types that determine how values are encoded.
///
/// Each field type has a fixed element size, which decides whether a value
/// fits inline in the 4-byte value slot of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FieldType {
    /// Unsigned 8-bit integer
    Byte = 1,

    /// 8-bit ASCII character, NUL terminated
    Ascii = 2,

    /// Unsigned 16-bit integer
    Short = 3,

    /// Unsigned 32-bit integer
    Long = 4,

    /// Two Longs: numerator and denominator
    Rational = 5,

    /// Signed 8-bit integer
    SByte = 6,

    /// Opaque bytes
    Undefined = 7,

    /// Signed 16-bit integer
    SShort = 8,

    /// Signed 32-bit integer
    SLong = 9,

    /// Two SLongs: numerator and denominator
    SRational = 10,

    /// IEEE single precision
    Float = 11,

    /// IEEE double precision
    Double = 12,

    /// 32-bit offset of a sub-directory
    Ifd = 13,
}

impl FieldType {
    /// Size of a single value of this type in bytes.
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            FieldType::Byte | FieldType::Ascii | FieldType::SByte | FieldType::Undefined => 1,
            FieldType::Short | FieldType::SShort => 2,
            FieldType::Long | FieldType::SLong | FieldType::Float | FieldType::Ifd => 4,
            FieldType::Rational | FieldType::SRational | FieldType::Double => 8,
        }
    }

    /// Create a FieldType from its numeric value.
    ///
    /// Returns `None` for unknown type values.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(FieldType::Byte),
            2 => Some(FieldType::Ascii),
            3 => Some(FieldType::Short),
            4 => Some(FieldType::Long),
            5 => Some(FieldType::Rational),
            6 => Some(FieldType::SByte),
            7 => Some(FieldType::Undefined),
            8 => Some(FieldType::SShort),
            9 => Some(FieldType::SLong),
            10 => Some(FieldType::SRational),
            11 => Some(FieldType::Float),
            12 => Some(FieldType::Double),
            13 => Some(FieldType::Ifd),
            _ => None,
        }
    }

    /// Maximum bytes stored inline in an IFD entry.
    pub const INLINE_THRESHOLD: usize = 4;

    /// Check if `count` values of this type fit inline in an entry.
    #[inline]
    pub fn fits_inline(self, count: u64) -> bool {
        self.size_in_bytes() as u64 * count <= Self::INLINE_THRESHOLD as u64
    }

    /// Integer-valued types readable through the integer accessors.
    #[inline]
    pub const fn is_int(self) -> bool {
        matches!(
            self,
            FieldType::Byte
                | FieldType::Short
                | FieldType::Long
                | FieldType::SByte
                | FieldType::SShort
                | FieldType::SLong
                | FieldType::Undefined
                | FieldType::Ifd
        )
    }

    /// Types readable through the floating point accessors.
    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(
            self,
            FieldType::Float | FieldType::Double | FieldType::Rational | FieldType::SRational
        ) || self.is_int()
    }

    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Byte => "BYTE",
            FieldType::Ascii => "ASCII",
            FieldType::Short => "SHORT",
            FieldType::Long => "LONG",
            FieldType::Rational => "RATIONAL",
            FieldType::SByte => "SBYTE",
            FieldType::Undefined => "UNDEFINED",
            FieldType::SShort => "SSHORT",
            FieldType::SLong => "SLONG",
            FieldType::SRational => "SRATIONAL",
            FieldType::Float => "FLOAT",
            FieldType::Double => "DOUBLE",
            FieldType::Ifd => "IFD",
        }
    }
}

// =============================================================================
// TIFF Tags
// =============================================================================

/// Standard TIFF, EXIF and DNG tag IDs used by the decoders.
///
/// Lookups accept either a `TiffTag` or a raw `u16`, so vendor tags do not
/// need a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum TiffTag {
    // -------------------------------------------------------------------------
    // Basic Image Structure
    // -------------------------------------------------------------------------
    NewSubFileType = 0x00FE,
    ImageWidth = 0x0100,
    ImageLength = 0x0101,
    BitsPerSample = 0x0102,
    Compression = 0x0103,
    PhotometricInterpretation = 0x0106,
    FillOrder = 0x010A,
    ImageDescription = 0x010E,
    Make = 0x010F,
    Model = 0x0110,
    StripOffsets = 0x0111,
    Orientation = 0x0112,
    SamplesPerPixel = 0x0115,
    RowsPerStrip = 0x0116,
    StripByteCounts = 0x0117,
    PlanarConfiguration = 0x011C,
    Predictor = 0x013D,
    SubIfds = 0x014A,
    SampleFormat = 0x0153,

    // -------------------------------------------------------------------------
    // Tile Organization
    // -------------------------------------------------------------------------
    TileWidth = 0x0142,
    TileLength = 0x0143,
    TileOffsets = 0x0144,
    TileByteCounts = 0x0145,

    // -------------------------------------------------------------------------
    // EXIF
    // -------------------------------------------------------------------------
    CfaRepeatPatternDim = 0x828D,
    CfaPattern = 0x828E,
    ExifIfdPointer = 0x8769,
    IsoSpeedRatings = 0x8827,
    MakerNote = 0x927C,
    /// Maker note stored in an embedded preview's EXIF block
    MakerNoteAlt = 0x002E,

    // -------------------------------------------------------------------------
    // DNG
    // -------------------------------------------------------------------------
    DngVersion = 0xC612,
    UniqueCameraModel = 0xC614,
    CfaPlaneColor = 0xC616,
    CfaLayout = 0xC617,
    LinearizationTable = 0xC618,
    BlackLevelRepeatDim = 0xC619,
    BlackLevel = 0xC61A,
    BlackLevelDeltaH = 0xC61B,
    BlackLevelDeltaV = 0xC61C,
    WhiteLevel = 0xC61D,
    DefaultScale = 0xC61E,
    DefaultCropOrigin = 0xC61F,
    DefaultCropSize = 0xC620,
    AsShotNeutral = 0xC628,
    /// Adobe private data in DNG; SR2 private pointer in ARW
    DngPrivateData = 0xC634,
    ActiveArea = 0xC68D,
    MaskedAreas = 0xC68E,
    OpcodeList1 = 0xC740,
    OpcodeList2 = 0xC741,
    OpcodeList3 = 0xC74E,

    // -------------------------------------------------------------------------
    // Vendor pointers parsed as sub-directories
    // -------------------------------------------------------------------------
    /// Fuji raw sub-directory inside the RAF payload TIFF
    FujiRawIfd = 0xF000,
}

impl TiffTag {
    /// Create a TiffTag from its numeric value.
    ///
    /// Returns `None` for tags without a variant; they are still parsed and
    /// reachable by number.
    pub fn from_u16(value: u16) -> Option<Self> {
        use TiffTag::*;
        const ALL: &[TiffTag] = &[
            NewSubFileType,
            ImageWidth,
            ImageLength,
            BitsPerSample,
            Compression,
            PhotometricInterpretation,
            FillOrder,
            ImageDescription,
            Make,
            Model,
            StripOffsets,
            Orientation,
            SamplesPerPixel,
            RowsPerStrip,
            StripByteCounts,
            PlanarConfiguration,
            Predictor,
            SubIfds,
            SampleFormat,
            TileWidth,
            TileLength,
            TileOffsets,
            TileByteCounts,
            CfaRepeatPatternDim,
            CfaPattern,
            ExifIfdPointer,
            IsoSpeedRatings,
            MakerNote,
            MakerNoteAlt,
            DngVersion,
            UniqueCameraModel,
            CfaPlaneColor,
            CfaLayout,
            LinearizationTable,
            BlackLevelRepeatDim,
            BlackLevel,
            BlackLevelDeltaH,
            BlackLevelDeltaV,
            WhiteLevel,
            DefaultScale,
            DefaultCropOrigin,
            DefaultCropSize,
            AsShotNeutral,
            DngPrivateData,
            ActiveArea,
            MaskedAreas,
            OpcodeList1,
            OpcodeList2,
            OpcodeList3,
            FujiRawIfd,
        ];
        ALL.iter().copied().find(|t| t.as_u16() == value)
    }

    /// Get the numeric tag ID.
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }
}

impl From<TiffTag> for u16 {
    #[inline]
    fn from(tag: TiffTag) -> u16 {
        tag.as_u16()
    }
}

/// Readable name for a tag number, falling back to hex.
pub fn tag_name(tag: u16) -> String {
    match TiffTag::from_u16(tag) {
        Some(t) => format!("{:?}", t),
        None => format!("0x{:04X}", tag),
    }
}

// =============================================================================
// Compression Values
// =============================================================================

/// Compression codes that select a codec engine.
///
/// Vendor codes reuse the TIFF compression tag with private values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// No compression, bit-packed samples
    None,

    /// Old-style JPEG; Kodak stores 12-bit packed or lossless JPEG here
    OldJpeg,

    /// Lossless JPEG (DNG, Canon, Kodak)
    LosslessJpeg,

    /// Lossy JPEG tiles in DNG 1.4
    LossyJpeg,

    /// Kodak private (unsupported)
    Kodak65000,

    /// Sony ARW packed or Huffman
    Sony,

    /// Nikon NEF Huffman
    Nikon,

    /// Pentax Huffman
    Pentax,

    /// Samsung SRW v1/v2/v3
    Samsung(u32),

    /// Anything else; the decoder decides
    Other(u32),
}

impl Compression {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Compression::None,
            6 => Compression::OldJpeg,
            7 => Compression::LosslessJpeg,
            0x884C => Compression::LossyJpeg,
            65000 => Compression::Kodak65000,
            32767 => Compression::Sony,
            34713 => Compression::Nikon,
            65535 => Compression::Pentax,
            32769 | 32770 | 32772 | 32773 => Compression::Samsung(value),
            other => Compression::Other(other),
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Compression::None => 1,
            Compression::OldJpeg => 6,
            Compression::LosslessJpeg => 7,
            Compression::LossyJpeg => 0x884C,
            Compression::Kodak65000 => 65000,
            Compression::Sony => 32767,
            Compression::Nikon => 34713,
            Compression::Pentax => 65535,
            Compression::Samsung(v) | Compression::Other(v) => v,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
