use thiserror::Error;

/// Errors raised by the bounds-checked byte cursor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// Requested range exceeds the buffer bounds
    #[error("Range out of bounds: requested {requested} bytes at offset {offset}, size is {size}")]
    OutOfBounds {
        offset: u64,
        requested: u64,
        size: u64,
    },

    /// A bit or byte stream ran past its end
    #[error("Stream truncated: {0}")]
    Truncated(String),
}

/// Errors that can occur when parsing the TIFF-derived container
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TiffError {
    /// I/O error while reading the file
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Invalid TIFF magic bytes (not II or MM)
    #[error("Invalid TIFF magic bytes: expected 0x4949 (II) or 0x4D4D (MM), got 0x{0:04X}")]
    InvalidMagic(u16),

    /// Invalid TIFF version marker
    #[error("Invalid TIFF version: got 0x{0:04X}")]
    InvalidVersion(u16),

    /// File is too small to contain a valid TIFF header
    #[error("File too small: need at least {required} bytes, got {actual}")]
    FileTooSmall { required: u64, actual: u64 },

    /// Invalid IFD offset (points outside file or to invalid location)
    #[error("Invalid IFD offset: {0}")]
    InvalidIfdOffset(u64),

    /// Required tag is missing from IFD
    #[error("Missing required tag: {0}")]
    MissingTag(String),

    /// Tag has unexpected type or count
    #[error("Invalid tag value for {tag}: {message}")]
    InvalidTagValue { tag: String, message: String },

    /// Unknown field type in IFD entry
    #[error("Unknown field type: {0}")]
    UnknownFieldType(u16),

    /// The file declares more directories than we are willing to walk
    #[error("Too many IFDs (limit is {0})")]
    TooManyIfds(usize),

    /// Directory nesting went deeper than allowed
    #[error("IFD nesting deeper than {0} levels")]
    DepthExceeded(usize),

    /// An IFD offset was visited twice
    #[error("IFD loop detected at offset {0}")]
    IfdLoop(u64),
}

/// Errors returned by `decode` and the per-vendor decoders.
///
/// This is the public error taxonomy. `Truncated` and `Corrupt` raised
/// inside a codec are downgraded to recoverable errors on the image
/// whenever a usable partial image exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Header mismatch; the bytes are not in a format this decoder understands
    #[error("Not a recognized RAW format: {0}")]
    NotThisFormat(String),

    /// Ran out of bytes while an entry or stream expected more
    #[error("File truncated: {0}")]
    Truncated(String),

    /// The container was recognized but the compression scheme is not
    #[error("{decoder}: unsupported compression {compression}")]
    UnsupportedCompression {
        decoder: &'static str,
        compression: u32,
    },

    /// The container was recognized but this specific encoding is not
    #[error("Unsupported format: {reason}")]
    UnsupportedFormat { reason: String },

    /// Geometry or offsets could not be determined
    #[error("Missing required tag: {0}")]
    MissingRequiredTag(String),

    /// Unknown or explicitly disabled make/model
    #[error("Camera '{make}' '{model}', mode '{mode}' not supported")]
    CameraNotSupported {
        make: String,
        model: String,
        mode: String,
    },

    /// The stream is internally inconsistent
    #[error("Corrupt data: {reason}")]
    Corrupt { reason: String },
}

/// Errors loading the camera database.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraDbError {
    /// The database file could not be read
    #[error("Failed to read camera database {path}: {message}")]
    Read { path: String, message: String },

    /// The database is not valid JSON or does not match the schema
    #[error("Invalid camera database: {0}")]
    Parse(String),

    /// An entry is well-formed JSON but describes an impossible camera
    #[error("Invalid camera entry '{make} {model}': {message}")]
    InvalidEntry {
        make: String,
        model: String,
        message: String,
    },
}

impl DecodeError {
    /// Shorthand for `DecodeError::Corrupt`.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        DecodeError::Corrupt {
            reason: reason.into(),
        }
    }

    /// Shorthand for `DecodeError::UnsupportedFormat`.
    pub fn unsupported(reason: impl Into<String>) -> Self {
        DecodeError::UnsupportedFormat {
            reason: reason.into(),
        }
    }

    /// Whether a codec may leave usable rows behind after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::Truncated(_) | DecodeError::Corrupt { .. })
    }
}

impl From<IoError> for DecodeError {
    fn from(err: IoError) -> Self {
        DecodeError::Truncated(err.to_string())
    }
}

impl From<TiffError> for DecodeError {
    fn from(err: TiffError) -> Self {
        match err {
            TiffError::InvalidMagic(_) | TiffError::InvalidVersion(_) => {
                DecodeError::NotThisFormat(err.to_string())
            }
            TiffError::FileTooSmall { .. } => DecodeError::NotThisFormat(err.to_string()),
            TiffError::Io(io) => io.into(),
            TiffError::MissingTag(tag) => DecodeError::MissingRequiredTag(tag),
            other => DecodeError::corrupt(other.to_string()),
        }
    }
}
