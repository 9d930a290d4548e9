//! Container parsing and decoder selection tests.
//!
//! Tests verify:
//! - Little- and big-endian TIFF chains parse to the same entries
//! - Decoder identification from Make and DNGVersion
//! - Garbage and empty input are rejected as not-this-format

use bytes::Bytes;

use rawdecode::{
    detect_container, identify, parse_container, CameraDb, ContainerKind, DecodeError,
    DecoderKind, TiffRoot, TiffTag,
};

use super::test_utils::{
    create_arw2_file, create_ljpeg_dng, tag, ByteOrderType, IfdBuilder, TiffBuilder,
};

fn two_ifd_file(order: ByteOrderType) -> Vec<u8> {
    TiffBuilder::new()
        .with_byte_order(order)
        .add_ifd(
            IfdBuilder::new()
                .ascii(tag::MAKE, "NIKON CORPORATION")
                .ascii(tag::MODEL, "NIKON D1")
                .long(tag::IMAGE_WIDTH, &[160])
                .short(tag::BITS_PER_SAMPLE, &[8, 8, 8]),
        )
        .add_ifd(
            IfdBuilder::new()
                .long(tag::IMAGE_WIDTH, &[4000])
                .short(tag::CFA_REPEAT_PATTERN_DIM, &[2, 2]),
        )
        .build()
}

// =============================================================================
// TIFF Parsing
// =============================================================================

#[test]
fn test_chain_parses_in_both_byte_orders() {
    for order in [ByteOrderType::LittleEndian, ByteOrderType::BigEndian] {
        let root = TiffRoot::parse(Bytes::from(two_ifd_file(order))).unwrap();
        assert_eq!(root.ifds.len(), 2, "{order:?}");

        let first = &root.ifds[0];
        assert_eq!(first.entry(TiffTag::Make).unwrap().get_string().trim(), "NIKON CORPORATION");
        assert_eq!(first.entry(TiffTag::ImageWidth).unwrap().get_u32(0).unwrap(), 160);
        assert_eq!(
            first.entry(TiffTag::BitsPerSample).unwrap().get_u16_array().unwrap(),
            vec![8, 8, 8]
        );

        let second = &root.ifds[1];
        assert_eq!(second.entry(TiffTag::ImageWidth).unwrap().get_u32(0).unwrap(), 4000);
        assert!(!second.has_entry(TiffTag::Make));
    }
}

#[test]
fn test_tag_lookup_across_chain() {
    let root = TiffRoot::parse(Bytes::from(two_ifd_file(ByteOrderType::LittleEndian))).unwrap();

    assert_eq!(root.get_ifds_with_tag(TiffTag::ImageWidth).len(), 2);
    assert_eq!(root.get_ifds_with_tag(TiffTag::CfaRepeatPatternDim).len(), 1);
    assert!(root.has_entry_recursive(TiffTag::Model));
    assert!(root.get_entry_recursive(TiffTag::DngVersion).is_none());
    assert_eq!(root.all_ifds().len(), 2);
}

// =============================================================================
// Identification
// =============================================================================

#[test]
fn test_identify_by_make() {
    let root = TiffRoot::parse(Bytes::from(two_ifd_file(ByteOrderType::BigEndian))).unwrap();
    assert_eq!(identify(&root).unwrap(), DecoderKind::Nikon);

    let root = TiffRoot::parse(Bytes::from(create_arw2_file())).unwrap();
    assert_eq!(identify(&root).unwrap(), DecoderKind::Sony);
}

#[test]
fn test_dng_version_wins_over_make() {
    let root = TiffRoot::parse(Bytes::from(create_ljpeg_dng(8, 8, 4))).unwrap();
    assert_eq!(identify(&root).unwrap(), DecoderKind::Dng);
}

#[test]
fn test_unknown_make_is_not_this_format() {
    let file = TiffBuilder::new()
        .add_ifd(IfdBuilder::new().ascii(tag::MAKE, "Hasselblad"))
        .build();
    let root = TiffRoot::parse(Bytes::from(file)).unwrap();
    assert!(matches!(identify(&root), Err(DecodeError::NotThisFormat(_))));
}

// =============================================================================
// Container detection
// =============================================================================

#[test]
fn test_detect_container() {
    assert_eq!(detect_container(&create_arw2_file()), Some(ContainerKind::Tiff));
    assert_eq!(detect_container(b"FUJIFILMCCD-RAW 0201"), Some(ContainerKind::Raf));
    assert_eq!(detect_container(b"plain text"), None);
    assert_eq!(detect_container(&[]), None);
}

#[test]
fn test_garbage_is_not_this_format() {
    let cameras = CameraDb::empty();
    for data in [Vec::new(), b"not a raw file at all".to_vec(), vec![0u8; 64]] {
        let err = parse_container(Bytes::from(data), &cameras).unwrap_err();
        assert!(matches!(err, DecodeError::NotThisFormat(_)), "{err}");
    }
    assert!(rawdecode::decode(&[0u8; 3]).is_err());
}

#[test]
fn test_header_pointing_past_end() {
    let mut file = b"II*\0".to_vec();
    file.extend_from_slice(&1000u32.to_le_bytes());
    let cameras = CameraDb::empty();
    assert!(parse_container(Bytes::from(file), &cameras).is_err());
}
