//! Pixel stream decoders.
//!
//! Every codec writes into a [`PlaneMut`](crate::image::PlaneMut) or a
//! [`RawImage`](crate::image::RawImage) and knows nothing about the
//! container it came from. Decoders in [`crate::decoders`] locate the
//! stream, pick the codec and handle the metadata.
//!
//! - [`ljpeg`]: lossless JPEG with vendor slice layouts
//! - [`uncompressed`]: bit-packed and byte-packed plain samples
//! - [`sony`], [`nikon`], [`pentax`], [`panasonic`], [`olympus`],
//!   [`samsung`], [`sigma`]: vendor entropy coders

pub mod huffman;
pub mod ljpeg;
pub mod nikon;
pub mod olympus;
pub mod panasonic;
pub mod pentax;
pub mod samsung;
pub mod sigma;
pub mod sony;
pub mod uncompressed;

pub use huffman::HuffmanTable;
pub use ljpeg::{get_sof, LJpegDecoder, SofInfo};
pub use uncompressed::{decode_packed, read_uncompressed, BitOrder, Packing, StripLayout};

/// Sign-extend the low `bits` bits of `value`.
#[inline]
pub(crate) fn sign_extend(value: u32, bits: u32) -> i32 {
    if bits == 0 {
        0
    } else if bits >= 32 {
        value as i32
    } else {
        ((value << (32 - bits)) as i32) >> (32 - bits)
    }
}
