//! Property tests over damaged input.
//!
//! Properties:
//! - A file cut inside its pixel data fails with `Truncated` or
//!   `MissingRequiredTag`, or decodes with the loss reported on the image
//! - Any prefix or single corrupted byte never panics
//! - Declared geometry larger than the file is an error, not an allocation
//! - Random bytes behind a TIFF header never panic
//! - Decoding is deterministic

use bytes::Bytes;
use proptest::prelude::*;

use rawdecode::{decode, decode_bytes, DecodeError, DecodeOptions, RawImage};

use super::test_utils::{
    create_arw2_file, create_arw2_file_data_last, create_ljpeg_dng, create_ljpeg_dng_data_last,
    create_plain_sony_file,
};

fn samples(image: &RawImage) -> Option<Vec<u16>> {
    let mut out = Vec::new();
    for y in 0..image.height() {
        for x in 0..image.width() {
            out.push(image.get_u16(x, y, 0)?);
        }
    }
    Some(out)
}

fn pixels(file: &[u8]) -> Option<Vec<u16>> {
    samples(&decode(file).ok()?)
}

/// Outcome allowed for `file` cut at `cut` bytes inside its pixel data.
fn check_truncated(file: &[u8], cut: usize) -> Result<(), TestCaseError> {
    let complete = pixels(file);
    match decode(&file[..cut]) {
        Err(err) => {
            prop_assert!(
                matches!(err, DecodeError::Truncated(_) | DecodeError::MissingRequiredTag(_)),
                "cut at {}: {}",
                cut,
                err
            );
        }
        // only trailing bytes nothing reads were cut when no error is reported
        Ok(image) => {
            prop_assert!(
                !image.errors().is_empty() || samples(&image) == complete,
                "cut at {} lost data silently",
                cut
            );
        }
    }
    Ok(())
}

proptest! {
    /// Property: an ARW cut inside its strip fails as truncated.
    #[test]
    fn prop_truncated_arw_data(offset in 0usize..16) {
        let (file, start) = create_arw2_file_data_last();
        let cut = (start + offset).min(file.len() - 1);
        check_truncated(&file, cut)?;
    }

    /// Property: a DNG cut inside its tiles fails as truncated or reports
    /// the lost tiles.
    #[test]
    fn prop_truncated_dng_data(fraction in 0.0f64..1.0) {
        let (file, start) = create_ljpeg_dng_data_last(8, 8, 4);
        let cut = start + ((file.len() - start) as f64 * fraction) as usize;
        check_truncated(&file, cut)?;
    }

    /// Property: any prefix of an ARW never panics.
    #[test]
    fn prop_truncated_arw(len in 0usize..256) {
        let file = create_arw2_file();
        let cut = len.min(file.len());
        let _ = decode(&file[..cut]);
    }

    /// Property: any prefix of a DNG never panics.
    #[test]
    fn prop_truncated_dng(fraction in 0.0f64..1.0) {
        let file = create_ljpeg_dng(8, 8, 4);
        let cut = (file.len() as f64 * fraction) as usize;
        let _ = decode(&file[..cut]);
    }

    /// Property: a single corrupted byte anywhere in the file never panics.
    #[test]
    fn prop_corrupt_dng_byte(index in 0usize..4096, value in any::<u8>()) {
        let mut file = create_ljpeg_dng(8, 8, 4);
        let index = index % file.len();
        file[index] = value;
        let _ = decode(&file);
    }

    /// Property: geometry the file cannot hold is rejected before allocating.
    #[test]
    fn prop_oversized_geometry_is_an_error(
        width in 4096u32..=65535,
        height in 4096u32..=65535,
        strip in 0usize..64,
    ) {
        let file = create_plain_sony_file(width, height, vec![0x55; strip + 1]);
        let err = decode(&file).unwrap_err();
        prop_assert!(matches!(err, DecodeError::Truncated(_)), "{}", err);
    }

    /// Property: arbitrary directory bytes behind a valid header never panic.
    #[test]
    fn prop_random_body(body in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut file = b"II*\0\x08\0\0\0".to_vec();
        file.extend_from_slice(&body);
        let _ = decode_bytes(Bytes::from(file), &DecodeOptions::default());
    }

    /// Property: decoding the same file twice gives the same pixels.
    #[test]
    fn prop_decode_is_deterministic(size in 1usize..4) {
        let file = create_ljpeg_dng(size * 8, size * 8, 4);
        let first = pixels(&file);
        prop_assert!(first.is_some());
        prop_assert_eq!(first, pixels(&file));
    }
}
