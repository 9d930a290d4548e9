//! TIFF-derived container parser for camera RAW files.
//!
//! Nearly every RAW format is a TIFF variant, so this module is the
//! foundation for all decoders.
//!
//! # Key Concepts
//!
//! - **Byte order**: files declare their endianness (II = little-endian,
//!   MM = big-endian) in the header. Maker notes may switch it locally.
//!
//! - **IFD (Image File Directory)**: a tag-keyed set of typed entries. RAW
//!   files typically chain a preview IFD, the raw IFD (often as a SubIFD),
//!   the EXIF IFD and a vendor maker note.
//!
//! - **Inline vs offset values**: values of 4 bytes or less are stored in
//!   the entry itself, larger values at an offset pointed to by the entry.
//!
//! - **Graceful degradation**: entries that point to sub-structures are
//!   parsed as child directories when possible, otherwise kept as opaque
//!   entries. Malformed optional entries are dropped rather than failing
//!   the whole parse.

mod ifd;
mod makernote;
mod parser;
mod sony;
mod tags;
mod values;

pub use ifd::{parse_ifd_at, Ifd, IFD_ENTRY_SIZE, MAX_DEPTH, MAX_IFDS};
pub use parser::{ByteOrder, TiffHeader, TiffRoot, TIFF_HEADER_SIZE};
pub use sony::decrypt as sony_decrypt;
pub use tags::{tag_name, Compression, FieldType, TiffTag};
pub use values::Entry;
