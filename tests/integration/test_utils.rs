//! Test utilities for integration tests.
//!
//! This module provides builders for synthetic camera files: a TIFF writer
//! with a chain of directories and attached pixel payloads, and a small
//! lossless JPEG encoder.

#![allow(dead_code)]

// =============================================================================
// TIFF File Builders
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrderType {
    LittleEndian,
    BigEndian,
}

/// TIFF field type codes used by the builder.
pub mod field {
    pub const BYTE: u16 = 1;
    pub const ASCII: u16 = 2;
    pub const SHORT: u16 = 3;
    pub const LONG: u16 = 4;
    pub const RATIONAL: u16 = 5;
    pub const UNDEFINED: u16 = 7;
}

/// Tag numbers used by the tests.
pub mod tag {
    pub const NEW_SUBFILE_TYPE: u16 = 254;
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const PHOTOMETRIC: u16 = 262;
    pub const MAKE: u16 = 271;
    pub const MODEL: u16 = 272;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const CFA_REPEAT_PATTERN_DIM: u16 = 33421;
    pub const CFA_PATTERN: u16 = 33422;
    pub const DNG_VERSION: u16 = 50706;
    pub const WHITE_LEVEL: u16 = 50717;
    pub const AS_SHOT_NEUTRAL: u16 = 50728;
}

/// A value to be encoded in the file's byte order.
#[derive(Clone, Debug)]
enum Value {
    Bytes(u16, Vec<u8>),
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rational(Vec<(u32, u32)>),
    /// Offsets of the payloads attached to the directory, in order
    PayloadOffsets,
    /// Byte counts of the payloads attached to the directory, in order
    PayloadCounts,
}

impl Value {
    fn field_type(&self) -> u16 {
        match self {
            Value::Bytes(t, _) => *t,
            Value::Ascii(_) => field::ASCII,
            Value::Short(_) => field::SHORT,
            Value::Long(_) | Value::PayloadOffsets | Value::PayloadCounts => field::LONG,
            Value::Rational(_) => field::RATIONAL,
        }
    }
}

/// Builder for creating test TIFF files.
///
/// Layout: header, payloads of every directory, then the directory chain
/// with each directory's out-of-line values right after its entries.
/// With [`TiffBuilder::payloads_last`] the chain comes first, the way
/// cameras write files.
pub struct TiffBuilder {
    byte_order: ByteOrderType,
    ifds: Vec<IfdBuilder>,
    payloads_last: bool,
}

impl TiffBuilder {
    pub fn new() -> Self {
        Self {
            byte_order: ByteOrderType::LittleEndian,
            ifds: Vec::new(),
            payloads_last: false,
        }
    }

    pub fn with_byte_order(mut self, order: ByteOrderType) -> Self {
        self.byte_order = order;
        self
    }

    /// Place the payloads after the directory chain.
    pub fn payloads_last(mut self) -> Self {
        self.payloads_last = true;
        self
    }

    /// Total size of all payloads, which end the file when
    /// [`TiffBuilder::payloads_last`] is set.
    pub fn payload_len(&self) -> usize {
        self.ifds.iter().flat_map(|ifd| &ifd.payloads).map(Vec::len).sum()
    }

    pub fn add_ifd(mut self, ifd: IfdBuilder) -> Self {
        self.ifds.push(ifd);
        self
    }

    /// Build the TIFF file data.
    pub fn build(self) -> Vec<u8> {
        let order = self.byte_order;
        let mut data = match order {
            ByteOrderType::LittleEndian => b"II".to_vec(),
            ByteOrderType::BigEndian => b"MM".to_vec(),
        };
        write_value(&mut data, order, 42, 2);
        let first_ifd_pos = data.len();
        write_value(&mut data, order, 0, 4);

        if self.payloads_last {
            // Entry sizes do not depend on the offsets, so a dry run with
            // zeros sizes the chain
            let zeros: Vec<Vec<u32>> =
                self.ifds.iter().map(|ifd| vec![0; ifd.payloads.len()]).collect();
            let mut sized = data.clone();
            self.write_chain(&mut sized, first_ifd_pos, &zeros);

            let mut pos = sized.len() as u32;
            let mut offsets = Vec::new();
            for ifd in &self.ifds {
                let mut ifd_offsets = Vec::new();
                for payload in &ifd.payloads {
                    ifd_offsets.push(pos);
                    pos += payload.len() as u32;
                }
                offsets.push(ifd_offsets);
            }
            self.write_chain(&mut data, first_ifd_pos, &offsets);
            for payload in self.ifds.iter().flat_map(|ifd| &ifd.payloads) {
                data.extend_from_slice(payload);
            }
            return data;
        }

        // Payloads
        let mut payload_offsets: Vec<Vec<u32>> = Vec::new();
        for ifd in &self.ifds {
            let mut offsets = Vec::new();
            for payload in &ifd.payloads {
                offsets.push(data.len() as u32);
                data.extend_from_slice(payload);
            }
            payload_offsets.push(offsets);
        }
        if data.len() % 2 == 1 {
            data.push(0);
        }

        self.write_chain(&mut data, first_ifd_pos, &payload_offsets);
        data
    }

    /// Append the directory chain, linking it from `first_ifd_pos`.
    fn write_chain(&self, data: &mut Vec<u8>, first_ifd_pos: usize, payload_offsets: &[Vec<u32>]) {
        let mut next_pos = first_ifd_pos;
        for (ifd, offsets) in self.ifds.iter().zip(payload_offsets) {
            let start = data.len() as u32;
            patch_u32(data, self.byte_order, next_pos, start);
            next_pos = ifd.write_to(data, self.byte_order, offsets);
        }
    }
}

impl Default for TiffBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one directory.
#[derive(Clone, Debug, Default)]
pub struct IfdBuilder {
    entries: Vec<(u16, Value)>,
    payloads: Vec<Vec<u8>>,
}

impl IfdBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn short(mut self, tag: u16, values: &[u16]) -> Self {
        self.entries.push((tag, Value::Short(values.to_vec())));
        self
    }

    pub fn long(mut self, tag: u16, values: &[u32]) -> Self {
        self.entries.push((tag, Value::Long(values.to_vec())));
        self
    }

    pub fn ascii(mut self, tag: u16, value: &str) -> Self {
        self.entries.push((tag, Value::Ascii(value.to_string())));
        self
    }

    pub fn bytes(mut self, tag: u16, values: &[u8]) -> Self {
        self.entries.push((tag, Value::Bytes(field::BYTE, values.to_vec())));
        self
    }

    pub fn rational(mut self, tag: u16, values: &[(u32, u32)]) -> Self {
        self.entries.push((tag, Value::Rational(values.to_vec())));
        self
    }

    /// Attach payloads and point `offsets_tag`/`counts_tag` at them.
    pub fn payloads(mut self, offsets_tag: u16, counts_tag: u16, payloads: Vec<Vec<u8>>) -> Self {
        self.entries.push((offsets_tag, Value::PayloadOffsets));
        self.entries.push((counts_tag, Value::PayloadCounts));
        self.payloads = payloads;
        self
    }

    /// Attach a single strip.
    pub fn strip(self, payload: Vec<u8>) -> Self {
        self.payloads(tag::STRIP_OFFSETS, tag::STRIP_BYTE_COUNTS, vec![payload])
    }

    /// Remove an entry, to build files missing a required tag.
    pub fn without(mut self, tag: u16) -> Self {
        self.entries.retain(|(t, _)| *t != tag);
        self
    }

    /// Write the directory at the end of `data`; returns the position of
    /// its next-directory pointer.
    fn write_to(&self, data: &mut Vec<u8>, order: ByteOrderType, payload_offsets: &[u32]) -> usize {
        let mut entries = self.entries.clone();
        entries.sort_by_key(|(t, _)| *t);

        let encoded: Vec<(u16, u16, u32, Vec<u8>)> = entries
            .iter()
            .map(|(t, v)| {
                let (count, bytes) = encode(v, order, payload_offsets, &self.payloads);
                (*t, v.field_type(), count, bytes)
            })
            .collect();

        let table_start = data.len();
        let mut extra_pos = table_start + 2 + encoded.len() * 12 + 4;
        let mut extra = Vec::new();

        write_value(data, order, encoded.len() as u64, 2);
        for (t, field_type, count, bytes) in &encoded {
            write_value(data, order, u64::from(*t), 2);
            write_value(data, order, u64::from(*field_type), 2);
            write_value(data, order, u64::from(*count), 4);
            if bytes.len() <= 4 {
                let mut inline = bytes.clone();
                inline.resize(4, 0);
                data.extend_from_slice(&inline);
            } else {
                write_value(data, order, extra_pos as u64, 4);
                extra.extend_from_slice(bytes);
                extra_pos += bytes.len();
                if bytes.len() % 2 == 1 {
                    extra.push(0);
                    extra_pos += 1;
                }
            }
        }
        let next_pos = data.len();
        write_value(data, order, 0, 4);
        data.extend_from_slice(&extra);
        next_pos
    }
}

fn encode(
    value: &Value,
    order: ByteOrderType,
    payload_offsets: &[u32],
    payloads: &[Vec<u8>],
) -> (u32, Vec<u8>) {
    let mut out = Vec::new();
    let count = match value {
        Value::Bytes(_, v) => {
            out.extend_from_slice(v);
            v.len()
        }
        Value::Ascii(s) => {
            out.extend_from_slice(s.as_bytes());
            out.push(0);
            s.len() + 1
        }
        Value::Short(v) => {
            for &x in v {
                write_value(&mut out, order, u64::from(x), 2);
            }
            v.len()
        }
        Value::Long(v) => {
            for &x in v {
                write_value(&mut out, order, u64::from(x), 4);
            }
            v.len()
        }
        Value::Rational(v) => {
            for &(n, d) in v {
                write_value(&mut out, order, u64::from(n), 4);
                write_value(&mut out, order, u64::from(d), 4);
            }
            v.len()
        }
        Value::PayloadOffsets => {
            for &x in payload_offsets {
                write_value(&mut out, order, u64::from(x), 4);
            }
            payload_offsets.len()
        }
        Value::PayloadCounts => {
            for p in payloads {
                write_value(&mut out, order, p.len() as u64, 4);
            }
            payloads.len()
        }
    };
    (count as u32, out)
}

fn write_value(data: &mut Vec<u8>, byte_order: ByteOrderType, value: u64, size: usize) {
    match byte_order {
        ByteOrderType::LittleEndian => match size {
            1 => data.push(value as u8),
            2 => data.extend(&(value as u16).to_le_bytes()),
            4 => data.extend(&(value as u32).to_le_bytes()),
            _ => {}
        },
        ByteOrderType::BigEndian => match size {
            1 => data.push(value as u8),
            2 => data.extend(&(value as u16).to_be_bytes()),
            4 => data.extend(&(value as u32).to_be_bytes()),
            _ => {}
        },
    }
}

fn patch_u32(data: &mut [u8], order: ByteOrderType, pos: usize, value: u32) {
    let bytes = match order {
        ByteOrderType::LittleEndian => value.to_le_bytes(),
        ByteOrderType::BigEndian => value.to_be_bytes(),
    };
    data[pos..pos + 4].copy_from_slice(&bytes);
}

// =============================================================================
// Lossless JPEG
// =============================================================================

/// MSB-first bit writer with JPEG byte stuffing.
struct BitWriter {
    bytes: Vec<u8>,
    acc: u32,
    n: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self {
            bytes: Vec::new(),
            acc: 0,
            n: 0,
        }
    }

    fn put(&mut self, value: u32, bits: u32) {
        for i in (0..bits).rev() {
            self.acc = (self.acc << 1) | ((value >> i) & 1);
            self.n += 1;
            if self.n == 8 {
                let b = self.acc as u8;
                self.bytes.push(b);
                if b == 0xFF {
                    self.bytes.push(0);
                }
                self.acc = 0;
                self.n = 0;
            }
        }
    }

    /// One difference with the fixed table: symbol `n` is the 5-bit code `n`.
    fn diff(&mut self, d: i32) {
        let len = 32 - d.unsigned_abs().leading_zeros();
        self.put(len, 5);
        if len > 0 && len < 16 {
            let v = if d < 0 { d + (1 << len) - 1 } else { d };
            self.put(v as u32, len);
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.n > 0 {
            let pad = 8 - self.n;
            self.put((1 << pad) - 1, pad);
        }
        self.bytes
    }
}

/// Encode `w` x `h` groups of `cps` interleaved samples as a predictor-1
/// lossless JPEG stream of the given precision.
pub fn encode_ljpeg(w: usize, h: usize, cps: usize, precision: u8, samples: &[u16]) -> Vec<u8> {
    assert_eq!(samples.len(), w * h * cps);
    let mut out = vec![0xFF, 0xD8];

    // DHT: 17 symbols with 5-bit codes
    out.extend_from_slice(&[0xFF, 0xC4, 0, (2 + 1 + 16 + 17) as u8, 0x00]);
    let mut counts = [0u8; 16];
    counts[4] = 17;
    out.extend_from_slice(&counts);
    out.extend(0u8..17);

    // SOF3
    out.extend_from_slice(&[0xFF, 0xC3, 0, (8 + cps * 3) as u8, precision]);
    out.extend_from_slice(&(h as u16).to_be_bytes());
    out.extend_from_slice(&(w as u16).to_be_bytes());
    out.push(cps as u8);
    for i in 0..cps {
        out.extend_from_slice(&[i as u8 + 1, 0x11, 0]);
    }

    // SOS, predictor 1
    out.extend_from_slice(&[0xFF, 0xDA, 0, (6 + cps * 2) as u8, cps as u8]);
    for i in 0..cps {
        out.extend_from_slice(&[i as u8 + 1, 0x00]);
    }
    out.extend_from_slice(&[1, 0, 0]);

    let mut enc = BitWriter::new();
    let at = |x: usize, y: usize, c: usize| i32::from(samples[(y * w + x) * cps + c]);
    for y in 0..h {
        for x in 0..w {
            for c in 0..cps {
                let pred = if x > 0 {
                    at(x - 1, y, c)
                } else if y > 0 {
                    at(0, y - 1, c)
                } else {
                    1 << (precision - 1)
                };
                enc.diff(at(x, y, c) - pred);
            }
        }
    }
    out.extend(enc.finish());
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

// =============================================================================
// Sony ARW2
// =============================================================================

/// LSB-first bit writer matching the ARW2 block layout.
pub struct LsbWriter {
    pub out: Vec<u8>,
    acc: u64,
    n: u32,
}

impl LsbWriter {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            acc: 0,
            n: 0,
        }
    }

    pub fn put(&mut self, value: u32, bits: u32) {
        self.acc |= u64::from(value) << self.n;
        self.n += bits;
        while self.n >= 8 {
            self.out.push(self.acc as u8);
            self.acc >>= 8;
            self.n -= 8;
        }
    }
}

impl Default for LsbWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// One 16-pixel ARW2 group: max 2047 at position 3, min 0 at position 7,
/// and the residuals 0..14 in the remaining slots.
pub fn arw2_group() -> Vec<u8> {
    let mut w = LsbWriter::new();
    w.put(2047, 11);
    w.put(0, 11);
    w.put(3, 4);
    w.put(7, 4);
    for r in 0..14 {
        w.put(r, 7);
    }
    w.out
}

/// Decoded values of [`arw2_group`]: range 2047 gives a residual shift
/// of 4, and every value is doubled on output.
pub fn arw2_group_expected() -> Vec<u16> {
    let mut residual = 0u16;
    (0..16)
        .map(|i| match i {
            3 => 2047 << 1,
            7 => 0,
            _ => {
                let v = (residual << 4).min(0x7ff) << 1;
                residual += 1;
                v
            }
        })
        .collect()
}

fn arw2_builder() -> TiffBuilder {
    TiffBuilder::new().add_ifd(
        IfdBuilder::new()
            .ascii(tag::MAKE, "SONY")
            .ascii(tag::MODEL, "DSLR-A700")
            .long(tag::IMAGE_WIDTH, &[16])
            .long(tag::IMAGE_LENGTH, &[1])
            .short(tag::BITS_PER_SAMPLE, &[8])
            .short(tag::COMPRESSION, &[32767])
            .strip(arw2_group()),
    )
}

/// A minimal 8-bit ARW: one 16x1 strip holding [`arw2_group`].
pub fn create_arw2_file() -> Vec<u8> {
    arw2_builder().build()
}

/// [`create_arw2_file`] with the strip at the end; also returns the strip
/// offset.
pub fn create_arw2_file_data_last() -> (Vec<u8>, usize) {
    with_data_last(arw2_builder())
}

fn with_data_last(builder: TiffBuilder) -> (Vec<u8>, usize) {
    let builder = builder.payloads_last();
    let payload_len = builder.payload_len();
    let file = builder.build();
    let start = file.len() - payload_len;
    (file, start)
}

/// A 16-bit uncompressed Sony file declaring `width` x `height` pixels
/// over `strip`.
pub fn create_plain_sony_file(width: u32, height: u32, strip: Vec<u8>) -> Vec<u8> {
    TiffBuilder::new()
        .add_ifd(
            IfdBuilder::new()
                .ascii(tag::MAKE, "SONY")
                .ascii(tag::MODEL, "DSLR-A700")
                .long(tag::IMAGE_WIDTH, &[width])
                .long(tag::IMAGE_LENGTH, &[height])
                .short(tag::BITS_PER_SAMPLE, &[16])
                .short(tag::COMPRESSION, &[1])
                .strip(strip),
        )
        .build()
}

// =============================================================================
// DNG
// =============================================================================

/// Deterministic test raster.
pub fn raster(width: usize, height: usize) -> Vec<u16> {
    (0..width * height)
        .map(|i| (1000 + (i * 37) % 900 + (i / width) * 3) as u16)
        .collect()
}

/// A CFA DNG of `width` x `height` in `tile` x `tile` LJPEG tiles.
///
/// Each tile codes two interleaved components of half the tile width, the
/// way cameras lay out Bayer rows.
pub fn create_ljpeg_dng(width: usize, height: usize, tile: usize) -> Vec<u8> {
    ljpeg_dng_builder(width, height, tile).build()
}

/// [`create_ljpeg_dng`] with the tiles at the end; also returns the offset
/// of the first tile.
pub fn create_ljpeg_dng_data_last(width: usize, height: usize, tile: usize) -> (Vec<u8>, usize) {
    with_data_last(ljpeg_dng_builder(width, height, tile))
}

/// The LJPEG tiles of [`create_ljpeg_dng`], row by row.
pub fn ljpeg_dng_tiles(width: usize, height: usize, tile: usize) -> Vec<Vec<u8>> {
    let pixels = raster(width, height);
    let mut tiles = Vec::new();
    for ty in 0..height / tile {
        for tx in 0..width / tile {
            let mut samples = Vec::with_capacity(tile * tile);
            for y in 0..tile {
                let row = (ty * tile + y) * width + tx * tile;
                samples.extend_from_slice(&pixels[row..row + tile]);
            }
            tiles.push(encode_ljpeg(tile / 2, tile, 2, 16, &samples));
        }
    }
    tiles
}

fn ljpeg_dng_builder(width: usize, height: usize, tile: usize) -> TiffBuilder {
    let tiles = ljpeg_dng_tiles(width, height, tile);
    TiffBuilder::new().add_ifd(
        IfdBuilder::new()
            .long(tag::NEW_SUBFILE_TYPE, &[0])
            .ascii(tag::MAKE, "Example")
            .ascii(tag::MODEL, "Synthetic One")
            .bytes(tag::DNG_VERSION, &[1, 4, 0, 0])
            .long(tag::IMAGE_WIDTH, &[width as u32])
            .long(tag::IMAGE_LENGTH, &[height as u32])
            .short(tag::BITS_PER_SAMPLE, &[16])
            .short(tag::COMPRESSION, &[7])
            .short(tag::PHOTOMETRIC, &[32803])
            .short(tag::SAMPLES_PER_PIXEL, &[1])
            .long(tag::TILE_WIDTH, &[tile as u32])
            .long(tag::TILE_LENGTH, &[tile as u32])
            .short(tag::CFA_REPEAT_PATTERN_DIM, &[2, 2])
            .bytes(tag::CFA_PATTERN, &[0, 1, 1, 2])
            .long(tag::WHITE_LEVEL, &[4095])
            .rational(tag::AS_SHOT_NEUTRAL, &[(1, 2), (1, 1), (1, 4)])
            .payloads(tag::TILE_OFFSETS, tag::TILE_BYTE_COUNTS, tiles),
    )
}

/// Little-endian 16-bit samples of a headerless dump.
pub fn naked_dump(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

// =============================================================================
// Sigma X3F
// =============================================================================

/// X3F Huffman code word: `length << 27 | code`. Every curve index has a
/// 10-bit code equal to the index, and curve value `index - 512`.
fn x3f_huffman_header() -> Vec<u8> {
    let mut out: Vec<u8> = (0..1024i16).flat_map(|k| (k - 512).to_le_bytes()).collect();
    out.extend((0..1024u32).flat_map(|k| ((10 << 27) | k).to_le_bytes()));
    out
}

/// One row of three-component samples as 10-bit curve indices.
fn x3f_huffman_row(samples: &[u16]) -> Vec<u8> {
    let mut pred = [0i32; 3];
    let (mut acc, mut n) = (0u32, 0u32);
    let mut out = Vec::new();
    for (i, &s) in samples.iter().enumerate() {
        let c = i % 3;
        let diff = i32::from(s) - pred[c];
        assert!((-512..512).contains(&diff), "difference {diff} needs a longer code");
        pred[c] = i32::from(s);
        acc = (acc << 10) | (diff + 512) as u32;
        n += 10;
        while n >= 8 {
            out.push((acc >> (n - 8)) as u8);
            n -= 8;
        }
        acc &= (1 << n) - 1;
    }
    if n > 0 {
        out.push((acc << (8 - n)) as u8);
    }
    out
}

fn x3f_section(id: &[u8], words: &[u32], body: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    for w in words {
        out.extend_from_slice(&w.to_le_bytes());
    }
    out.extend_from_slice(body);
    out
}

/// Sigma X3F file holding a Huffman-coded image of `samples`, three per
/// pixel, and the given properties.
pub fn create_x3f_file(width: u32, height: u32, samples: &[u16], properties: &[(&str, &str)]) -> Vec<u8> {
    let mut data = x3f_huffman_header();
    let mut offsets = Vec::new();
    for row in samples.chunks(width as usize * 3) {
        offsets.push((data.len() - 6144) as u32);
        data.extend(x3f_huffman_row(row));
    }
    data.extend(offsets.iter().flat_map(|o| o.to_le_bytes()));
    let image = x3f_section(b"SECi", &[0x0002_0000, 3, 6, width, height, 0], &data);

    let mut strings = Vec::new();
    let mut table = Vec::new();
    for (key, value) in properties {
        for s in [key, value] {
            table.extend_from_slice(&((strings.len() / 2) as u32).to_le_bytes());
            strings.extend(s.encode_utf16().chain([0]).flat_map(u16::to_le_bytes));
        }
    }
    table.extend(strings);
    let props = x3f_section(
        b"SECp",
        &[0x0002_0000, properties.len() as u32, 0, 0, 0],
        &table,
    );

    let mut file = b"FOVb".to_vec();
    file.extend_from_slice(&0x0002_0002u32.to_le_bytes());
    file.resize(40, 0);
    let mut directory = Vec::new();
    for (id, section) in [(b"IMA2", image), (b"PROP", props)] {
        directory.extend_from_slice(&(file.len() as u32).to_le_bytes());
        directory.extend_from_slice(&(section.len() as u32).to_le_bytes());
        directory.extend_from_slice(id);
        file.extend(section);
    }
    let directory_offset = file.len() as u32;
    file.extend(x3f_section(b"SECd", &[0x0002_0000, 2], &directory));
    file.extend_from_slice(&directory_offset.to_le_bytes());
    file
}
