//! # rawdecode
//!
//! A camera RAW decoding engine. It turns vendor RAW files into a
//! sensor-referred pixel buffer plus the metadata needed to interpret it.
//!
//! Decoding stops at the sensor data: no demosaicing, color management or
//! encoding happens here.
//!
//! ## Features
//!
//! - **Container parsing**: TIFF and its vendor variants, maker notes, DNG
//!   private data, Sony SR2 encrypted blocks, Fujifilm RAF, Minolta MRW and
//!   Sigma X3F
//! - **Codecs**: lossless JPEG, Nikon, Sony, Pentax, Olympus, Panasonic,
//!   Samsung and Sigma compressed streams, plus packed and unpacked integer
//!   layouts
//! - **Camera database**: per-model crop, levels, CFA and decoder hints
//!   loaded from JSON
//! - **Parallel decoding**: banded codecs run on a `rayon` pool
//!
//! ## Architecture
//!
//! - [`io`] - byte cursor and endian helpers
//! - [`mod@format`] - container detection and directory parsing
//! - [`bits`] - bit pumps over compressed streams
//! - [`codec`] - compression engines writing into a [`RawImage`]
//! - [`decoders`] - per-manufacturer decoders and dispatch
//! - [`image`] - the decoded pixel buffer and its metadata
//! - [`camera`] - the camera database
//! - [`config`] - command-line configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use rawdecode::{decode_bytes, CameraDb, DecodeOptions};
//! use std::sync::Arc;
//!
//! let file = std::fs::read("IMG_0001.CR2").unwrap();
//! let options = DecodeOptions {
//!     cameras: Arc::new(CameraDb::load("cameras.json").unwrap()),
//!     ..DecodeOptions::default()
//! };
//! let image = decode_bytes(file.into(), &options).unwrap();
//! println!("{}x{} {}", image.cropped_width(), image.cropped_height(), image.cfa.describe());
//! ```

pub mod bits;
pub mod camera;
pub mod codec;
pub mod config;
pub mod decoders;
pub mod error;
pub mod format;
pub mod image;
pub mod io;
pub mod threading;

// Re-export commonly used types
pub use camera::{Camera, CameraDb, NakedCamera};
pub use config::{Cli, Command, DecodeConfig, DumpConfig, IdentifyConfig, OutputFormat};
pub use decoders::{
    decode, decode_bytes, decode_kind, decode_with, decoder_for, identify, DecodeOptions,
    DecoderKind, RawDecoder,
};
pub use error::{CameraDbError, DecodeError, IoError, TiffError};
pub use format::tiff::{ByteOrder, Entry, FieldType, Ifd, TiffRoot, TiffTag};
pub use format::{detect_container, parse_container, ContainerKind};
pub use image::{
    BlackArea, CfaColor, ColorFilterArray, ImageMetadata, Point, RawImage, Rect, SampleType,
};
