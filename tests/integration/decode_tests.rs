//! End-to-end decode tests over synthetic camera files.
//!
//! Tests verify:
//! - ARW2 8-bit strips decode to the expected sensor values
//! - Camera database crops and levels are applied after decode
//! - Tiled lossless JPEG DNGs decode identically on one or many threads
//! - Headerless files are recognised by size through the database
//! - Sigma X3F files decode to three components with their properties
//! - Missing tags and unknown cameras fail with the matching error

use std::sync::Arc;

use bytes::Bytes;

use rawdecode::{decode, decode_bytes, CameraDb, DecodeError, DecodeOptions, RawImage, SampleType};

use super::test_utils::{
    arw2_group, arw2_group_expected, create_arw2_file, create_ljpeg_dng,
    create_ljpeg_dng_data_last, create_plain_sony_file, create_x3f_file, ljpeg_dng_tiles,
    naked_dump, raster, tag, IfdBuilder, TiffBuilder,
};

fn options_with(json: &str) -> DecodeOptions {
    DecodeOptions {
        cameras: Arc::new(CameraDb::from_json(json).unwrap()),
        ..DecodeOptions::default()
    }
}

fn row(image: &RawImage, y: usize) -> Vec<u16> {
    (0..image.width())
        .map(|x| image.get_u16(x, y, 0).unwrap())
        .collect()
}

// =============================================================================
// Sony ARW
// =============================================================================

#[test]
fn test_arw2_strip_decodes() {
    let image = decode(&create_arw2_file()).unwrap();

    assert_eq!(image.width(), 16);
    assert_eq!(image.height(), 1);
    assert_eq!(image.cpp(), 1);
    assert_eq!(image.sample_type(), SampleType::U16);
    assert_eq!(row(&image, 0), arw2_group_expected());

    assert_eq!(image.metadata.make, "SONY");
    assert_eq!(image.metadata.model, "DSLR-A700");
    assert_eq!(image.cfa.describe(), "RGGB");
}

#[test]
fn test_arw2_camera_crop_and_levels() {
    let options = options_with(
        r#"{ "cameras": [ {
            "make": "SONY", "model": "DSLR-A700",
            "crop": { "x": 2, "y": 0, "width": 8, "height": 0 },
            "sensors": [ { "black": 128, "white": 4000 } ]
        } ] }"#,
    );
    let image = decode_bytes(Bytes::from(create_arw2_file()), &options).unwrap();

    assert_eq!(image.cropped_width(), 8);
    assert_eq!(image.cropped_height(), 1);
    assert_eq!(image.white_point, 4000);
    assert_eq!(image.black_level, 128);

    let expected = arw2_group_expected();
    for x in 0..8 {
        assert_eq!(image.cropped_value(x, 0, 0), Some(f32::from(expected[x + 2])));
    }
    assert_eq!(image.cropped_value(8, 0, 0), None);
}

#[test]
fn test_arw2_crop_ignored_without_apply_crop() {
    let mut options = options_with(
        r#"{ "cameras": [ {
            "make": "SONY", "model": "DSLR-A700",
            "crop": { "x": 2, "y": 0, "width": 8, "height": 0 }
        } ] }"#,
    );
    options.apply_crop = false;
    let image = decode_bytes(Bytes::from(create_arw2_file()), &options).unwrap();
    assert_eq!(image.cropped_width(), 16);
}

#[test]
fn test_missing_width_is_missing_required_tag() {
    let file = TiffBuilder::new()
        .add_ifd(
            IfdBuilder::new()
                .ascii(tag::MAKE, "SONY")
                .ascii(tag::MODEL, "DSLR-A700")
                .long(tag::IMAGE_LENGTH, &[1])
                .short(tag::BITS_PER_SAMPLE, &[8])
                .short(tag::COMPRESSION, &[32767])
                .strip(arw2_group()),
        )
        .build();

    let err = decode(&file).unwrap_err();
    assert!(
        matches!(err, DecodeError::MissingRequiredTag(_)),
        "unexpected error: {err}"
    );
}

#[test]
fn test_unknown_camera_fails_when_strict() {
    let options = DecodeOptions {
        fail_on_unknown: true,
        ..DecodeOptions::default()
    };
    let err = decode_bytes(Bytes::from(create_arw2_file()), &options).unwrap_err();
    assert!(matches!(err, DecodeError::CameraNotSupported { .. }));
}

#[test]
fn test_unsupported_camera_entry_fails() {
    let options = options_with(
        r#"{ "cameras": [ { "make": "SONY", "model": "DSLR-A700", "supported": false } ] }"#,
    );
    let err = decode_bytes(Bytes::from(create_arw2_file()), &options).unwrap_err();
    assert!(matches!(err, DecodeError::CameraNotSupported { .. }));
}

#[test]
fn test_unknown_compression() {
    let file = TiffBuilder::new()
        .add_ifd(
            IfdBuilder::new()
                .ascii(tag::MAKE, "SONY")
                .ascii(tag::MODEL, "DSLR-A700")
                .long(tag::IMAGE_WIDTH, &[16])
                .long(tag::IMAGE_LENGTH, &[1])
                .short(tag::BITS_PER_SAMPLE, &[8])
                .short(tag::COMPRESSION, &[5])
                .strip(arw2_group()),
        )
        .build();

    let err = decode(&file).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::UnsupportedCompression { compression: 5, .. }
    ));
}

// =============================================================================
// DNG
// =============================================================================

#[test]
fn test_ljpeg_dng_tiles() {
    let image = decode(&create_ljpeg_dng(8, 8, 4)).unwrap();

    assert_eq!((image.width(), image.height()), (8, 8));
    assert!(image.is_cfa);
    assert_eq!(image.cfa.describe(), "RGGB");
    assert_eq!(image.white_point, 4095);
    assert_eq!(image.black_level_separate, [0; 4]);

    let expected = raster(8, 8);
    for y in 0..8 {
        assert_eq!(row(&image, y), expected[y * 8..(y + 1) * 8], "row {y}");
    }
}

#[test]
fn test_ljpeg_dng_metadata() {
    let image = decode(&create_ljpeg_dng(8, 8, 4)).unwrap();

    assert_eq!(image.metadata.make, "Example");
    assert_eq!(image.metadata.model, "Synthetic One");
    assert_eq!(image.metadata.canonical_make, "Example");
    assert_eq!(image.metadata.mode, "dng");
    assert_eq!(image.metadata.wb_coeffs, Some([2.0, 1.0, 4.0]));
    assert!(image.errors().is_empty(), "errors: {:?}", image.errors());
}

#[test]
fn test_thread_count_does_not_change_pixels() {
    let file = Bytes::from(create_ljpeg_dng(16, 16, 4));
    let single = DecodeOptions {
        threads: 1,
        ..DecodeOptions::default()
    };
    let many = DecodeOptions {
        threads: 4,
        ..DecodeOptions::default()
    };

    let a = decode_bytes(file.clone(), &single).unwrap();
    let b = decode_bytes(file, &many).unwrap();
    for y in 0..16 {
        assert_eq!(row(&a, y), row(&b, y), "row {y}");
    }
    assert_eq!(row(&a, 15), raster(16, 16)[15 * 16..]);
}

#[test]
fn test_truncated_dng_fails() {
    let mut file = create_ljpeg_dng(8, 8, 4);
    // the directory follows the tiles and is cut off
    file.truncate(16);
    assert!(decode(&file).is_err());
}

#[test]
fn test_lost_tiles_are_reported() {
    let (mut file, _) = create_ljpeg_dng_data_last(8, 8, 4);
    // drop the last tile row
    let last_row: usize = ljpeg_dng_tiles(8, 8, 4)[2..].iter().map(Vec::len).sum();
    file.truncate(file.len() - last_row);

    let image = decode(&file).unwrap();
    assert!(!image.errors().is_empty());
    assert_eq!(row(&image, 0), raster(8, 8)[..8]);
}

// =============================================================================
// Declared geometry
// =============================================================================

#[test]
fn test_huge_declared_size_is_an_error() {
    let file = create_plain_sony_file(65535, 65535, vec![0; 16]);
    assert!(file.len() < 200);
    let err = decode(&file).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated(_)), "{err}");
}

#[test]
fn test_declared_size_matching_data_decodes() {
    let strip: Vec<u8> = (0..32u16).flat_map(|v| (v * 100).to_le_bytes()).collect();
    let image = decode(&create_plain_sony_file(16, 2, strip)).unwrap();
    assert_eq!(row(&image, 1)[0], 1600);
}

// =============================================================================
// Headerless files
// =============================================================================

const NAKED_DB: &str = r#"{ "naked": [ {
    "make": "Example", "model": "Dump 16", "file_size": 16,
    "width": 4, "height": 2, "bits": 16
} ] }"#;

#[test]
fn test_naked_file_by_size() {
    let samples = [100, 200, 300, 400, 500, 600, 700, 800];
    let options = options_with(NAKED_DB);
    let image = decode_bytes(Bytes::from(naked_dump(&samples)), &options).unwrap();

    assert_eq!((image.width(), image.height()), (4, 2));
    assert_eq!(row(&image, 0), [100u16, 200, 300, 400]);
    assert_eq!(row(&image, 1), [500u16, 600, 700, 800]);
    assert_eq!(image.metadata.make, "Example");
    assert_eq!(image.metadata.model, "Dump 16");
}

#[test]
fn test_naked_file_of_other_size_is_not_recognised() {
    let options = options_with(NAKED_DB);
    let file = naked_dump(&[100, 200, 300]);
    let err = decode_bytes(Bytes::from(file), &options).unwrap_err();
    assert!(matches!(err, DecodeError::NotThisFormat(_)));
}

// =============================================================================
// Sigma X3F
// =============================================================================

const SD9: [(&str, &str); 3] = [("CAMMANUF", "SIGMA"), ("CAMMODEL", "SIGMA SD9"), ("ISO", "400")];

fn x3f_samples(width: usize, height: usize) -> Vec<u16> {
    (0..height)
        .flat_map(|y| (0..width).flat_map(move |x| (0..3).map(move |c| (x * 100 + y * 10 + c) as u16)))
        .collect()
}

#[test]
fn test_x3f_decodes_three_layers() {
    let file = create_x3f_file(4, 2, &x3f_samples(4, 2), &SD9);
    let image = decode(&file).unwrap();

    assert_eq!((image.width(), image.height(), image.cpp()), (4, 2, 3));
    assert!(!image.is_cfa);
    assert_eq!(image.get_u16(0, 0, 0), Some(0));
    assert_eq!(image.get_u16(3, 1, 2), Some(312));
    assert_eq!(image.get_u16(2, 0, 1), Some(201));
    assert_eq!(image.metadata.make, "SIGMA");
    assert_eq!(image.metadata.model, "SIGMA SD9");
    assert_eq!(image.metadata.iso, 400);
    assert!(image.errors().is_empty());
}

#[test]
fn test_x3f_decodes_identically_on_many_threads() {
    let file = Bytes::from(create_x3f_file(6, 5, &x3f_samples(6, 5), &SD9));
    let single = DecodeOptions {
        threads: 1,
        ..DecodeOptions::default()
    };
    let many = DecodeOptions {
        threads: 4,
        ..DecodeOptions::default()
    };
    let a = decode_bytes(file.clone(), &single).unwrap();
    let b = decode_bytes(file, &many).unwrap();
    assert_eq!(a.pixels_u16().unwrap(), b.pixels_u16().unwrap());
}

#[test]
fn test_x3f_unknown_camera_rejected_when_strict() {
    let file = create_x3f_file(2, 2, &x3f_samples(2, 2), &SD9);
    let options = DecodeOptions {
        fail_on_unknown: true,
        ..DecodeOptions::default()
    };
    let err = decode_bytes(Bytes::from(file), &options).unwrap_err();
    assert!(matches!(err, DecodeError::CameraNotSupported { .. }));
}

#[test]
fn test_x3f_without_name_needs_a_true_layout() {
    // no properties and no preview: the Huffman layout alone is not trusted
    let file = create_x3f_file(2, 2, &x3f_samples(2, 2), &[]);
    let err = decode(&file).unwrap_err();
    assert!(matches!(err, DecodeError::UnsupportedFormat { .. }), "{err}");
}

#[test]
fn test_x3f_cut_inside_row_table_is_truncated() {
    let mut file = create_x3f_file(4, 2, &x3f_samples(4, 2), &SD9);
    // grow the image section past the end of the file
    let directory = u32::from_le_bytes(file[file.len() - 4..].try_into().unwrap()) as usize;
    let length_at = directory + 12 + 4;
    file[length_at..length_at + 4].copy_from_slice(&100_000u32.to_le_bytes());
    let err = decode(&file).unwrap_err();
    assert!(matches!(err, DecodeError::Truncated(_)), "{err}");
}
