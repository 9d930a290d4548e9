//! Container parsers for camera RAW files.
//!
//! Almost every RAW format is a TIFF variant; the [`tiff`] module parses
//! that grammar including vendor maker notes. Two vendors wrap it in their
//! own box layout ([`raf`], [`mrw`]); Sigma has a section directory of its
//! own ([`x3f`]).
//!
//! # Container Detection
//!
//! Use [`detect::parse_container`] to identify a file and parse its
//! directories. Supported containers:
//!
//! - **TIFF family**: plain TIFF and the Panasonic/Olympus header variants
//! - **Fujifilm RAF** and **Minolta MRW**
//! - **Sigma X3F**
//! - **Naked**: headerless files known to the camera database by size

pub mod detect;
pub mod mrw;
pub mod raf;
pub mod tiff;
pub mod x3f;

pub use detect::{detect_container, is_tiff_header, parse_container, ContainerKind};
