//! Samsung SRW codecs.
//!
//! Three generations share the container but not the stream:
//!
//! - v1 (compression 32770 with a line table): per-row streams of 16-pixel
//!   groups predicted from the left or from the rows above
//! - v2 (32772): one stream of prefix-coded differences with a
//!   vertical/horizontal predictor per color
//! - v3 (32773): 16-byte aligned rows, each 16-pixel group copying a
//!   reference block from the rows above before adding differences

use crate::bits::{BitPump, Msb32Pump, MsbPump};
use crate::error::DecodeError;
use crate::image::PlaneMut;
use crate::io::read_u32_le;

use super::huffman::extend;
use super::sign_extend;

/// Pixels per coded group in v1 and v3.
const GROUP: usize = 16;

fn require_group_width(width: usize) -> Result<(), DecodeError> {
    if width % GROUP != 0 {
        return Err(DecodeError::unsupported(format!(
            "SRW width {width} is not a multiple of {GROUP}"
        )));
    }
    Ok(())
}

// =============================================================================
// v1
// =============================================================================

/// Decode a v1 image.
///
/// `line_table` holds one little-endian offset per row, relative to
/// `strip_offset` in `file`.
pub fn decode_v1(
    plane: &mut PlaneMut<'_>,
    file: &[u8],
    strip_offset: usize,
    line_table: &[u8],
) -> Result<(), DecodeError> {
    let (width, height, pitch) = (plane.width(), plane.height(), plane.pitch());
    require_group_width(width)?;
    let out = plane.data_mut();

    for y in 0..height {
        let entry = line_table
            .get(4 * y..4 * y + 4)
            .ok_or_else(|| DecodeError::Truncated(format!("SRW line table ends before row {y}")))?;
        let line_offset = strip_offset + read_u32_le(entry) as usize;
        let stream = file.get(line_offset..).filter(|s| !s.is_empty()).ok_or_else(|| {
            DecodeError::Truncated(format!("SRW row {y} starts outside the file"))
        })?;
        let mut pump = Msb32Pump::new(stream);

        let initial = if y < 2 { 7 } else { 4 };
        let mut len = [initial; 4];
        let row = y * pitch;
        let up = y.saturating_sub(1) * pitch;
        let up2 = y.saturating_sub(2) * pitch;

        for x in (0..width).step_by(GROUP) {
            let dir = pump.get_bit()? == 1;
            let mut op = [0u32; 4];
            for o in op.iter_mut() {
                *o = pump.get_bits(2)?;
            }
            for (l, o) in len.iter_mut().zip(op) {
                match o {
                    3 => *l = pump.get_bits(4)? as i32,
                    2 => *l -= 1,
                    1 => *l += 1,
                    _ => {}
                }
                if !(0..=16).contains(&*l) {
                    return Err(DecodeError::corrupt(format!("SRW bit length {l}")));
                }
            }

            if dir {
                for c in (0..GROUP).step_by(2) {
                    let b = len[c >> 3] as u32;
                    let adj = sign_extend(pump.get_bits(b)?, b);
                    out[row + x + c] = (adj + i32::from(out[up + x + c])) as u16;
                }
                for c in (1..GROUP).step_by(2) {
                    let b = len[2 | (c >> 3)] as u32;
                    let adj = sign_extend(pump.get_bits(b)?, b);
                    out[row + x + c] = (adj + i32::from(out[up2 + x + c])) as u16;
                }
            } else {
                let pred = if x > 0 { i32::from(out[row + x - 2]) } else { 128 };
                for c in (0..GROUP).step_by(2) {
                    let b = len[c >> 3] as u32;
                    let adj = sign_extend(pump.get_bits(b)?, b);
                    out[row + x + c] = (adj + pred) as u16;
                }
                let pred = if x > 0 { i32::from(out[row + x - 1]) } else { 128 };
                for c in (1..GROUP).step_by(2) {
                    let b = len[2 | (c >> 3)] as u32;
                    let adj = sign_extend(pump.get_bits(b)?, b);
                    out[row + x + c] = (adj + pred) as u16;
                }
            }
            pump.check_position()?;
        }
    }

    // red and blue are stored swapped within each 2x2 block
    for y in (0..height.saturating_sub(1)).step_by(2) {
        for x in (0..width - 1).step_by(2) {
            out.swap(y * pitch + x + 1, (y + 1) * pitch + x);
        }
    }
    Ok(())
}

// =============================================================================
// v2
// =============================================================================

/// (prefix length, difference length) for each prefix code, in code order.
const V2_CODES: [(u8, u8); 14] = [
    (3, 4),
    (3, 7),
    (2, 6),
    (2, 5),
    (4, 3),
    (6, 0),
    (7, 9),
    (8, 10),
    (9, 11),
    (10, 12),
    (10, 13),
    (5, 1),
    (4, 8),
    (4, 2),
];

fn v2_table() -> Vec<(u8, u8)> {
    let mut table = Vec::with_capacity(1024);
    for &(enc, diff) in &V2_CODES {
        table.extend(std::iter::repeat((enc, diff)).take(1024 >> enc));
    }
    table
}

/// Decode a v2 image of `bits`-bit samples.
pub fn decode_v2(plane: &mut PlaneMut<'_>, input: &[u8], bits: u32) -> Result<(), DecodeError> {
    let table = v2_table();
    let mut pump = MsbPump::new(input);
    let mut vpred = [[0u16; 2]; 2];
    let mut hpred = [0u16; 2];

    for y in 0..plane.height() {
        let row = plane.row_mut(y);
        for (x, px) in row.iter_mut().enumerate() {
            let (enc, len) = table[pump.peek_bits(10) as usize];
            pump.skip_bits(u32::from(enc))?;
            let len = u32::from(len);
            let diff = extend(pump.get_bits(len)? as i32, len) as u16;

            if x < 2 {
                vpred[y & 1][x] = vpred[y & 1][x].wrapping_add(diff);
                hpred[x] = vpred[y & 1][x];
            } else {
                hpred[x & 1] = hpred[x & 1].wrapping_add(diff);
            }
            let value = hpred[x & 1];
            if bits < 16 && value >> bits != 0 {
                return Err(DecodeError::corrupt(format!(
                    "SRW value out of bounds at {x}:{y}"
                )));
            }
            *px = value;
        }
    }
    Ok(())
}

// =============================================================================
// v3
// =============================================================================

/// Fields of the v3 stream header used by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V3Header {
    pub bit_depth: u32,
    pub width: usize,
    pub height: usize,
    pub init_value: u16,
    /// Header length in bytes
    pub size: usize,
}

pub fn parse_v3_header(data: &[u8]) -> Result<V3Header, DecodeError> {
    let mut pump = Msb32Pump::new(data);
    pump.skip_bits(16)?; // version
    pump.skip_bits(4)?; // image format
    let bit_depth = pump.get_bits(4)? + 1;
    pump.skip_bits(8)?; // blocks per unit, compression ratio
    let width = pump.get_bits(16)? as usize;
    let height = pump.get_bits(16)? as usize;
    pump.skip_bits(16)?; // tile width
    pump.skip_bits(8)?;
    pump.skip_bits(8)?; // overlap width
    pump.skip_bits(8)?;
    pump.skip_bits(8)?; // increment
    pump.skip_bits(2)?;
    let init_value = pump.get_bits(14)? as u16;
    Ok(V3Header {
        bit_depth,
        width,
        height,
        init_value,
        size: pump.bit_position().div_ceil(8) as usize,
    })
}

const MOTION_OFFSET: [i64; 7] = [-4, -2, -2, 0, 0, 2, 4];
const MOTION_AVERAGE: [bool; 7] = [false, false, true, false, true, false, false];

/// Decode a v3 image. `data` starts at the stream header.
pub fn decode_v3(
    plane: &mut PlaneMut<'_>,
    data: &[u8],
    header: &V3Header,
) -> Result<(), DecodeError> {
    let (width, height, pitch) = (plane.width(), plane.height(), plane.pitch());
    require_group_width(width)?;
    let out = plane.data_mut();
    let max_bits = header.bit_depth as i32 + 1;
    let mut line_offset = header.size;

    for row in 0..height {
        line_offset = line_offset.next_multiple_of(16);
        let stream = data.get(line_offset..).ok_or_else(|| {
            DecodeError::Truncated(format!("SRW row {row} starts outside the data"))
        })?;
        let mut pump = Msb32Pump::new(stream);

        let base = row * pitch;
        let initial = if row < 2 { 7 } else { 4 };
        let mut modes = [[initial; 2]; 3];
        let mut motion = 7usize;

        for col in (0..width).step_by(GROUP) {
            if pump.get_bit()? == 0 {
                motion = pump.get_bits(3)? as usize;
            }
            if motion == 7 {
                for i in 0..GROUP {
                    out[base + col + i] = if col == 0 {
                        header.init_value
                    } else {
                        out[base + col + i - 2]
                    };
                }
            } else {
                if row < 2 {
                    return Err(DecodeError::corrupt(format!(
                        "SRW row {row} refers to rows above the image"
                    )));
                }
                let slide = MOTION_OFFSET[motion];
                let average = MOTION_AVERAGE[motion];
                for i in 0..GROUP {
                    let (ref_row, x) = if (row + i) & 1 == 1 {
                        (row - 2, (col + i) as i64 + slide)
                    } else {
                        let side = if i % 2 == 1 { -1 } else { 1 };
                        (row - 1, (col + i) as i64 + slide + side)
                    };
                    let reach = if average { 2 } else { 0 };
                    if x < 0 || x + reach >= width as i64 {
                        return Err(DecodeError::corrupt(format!(
                            "SRW reference pixel outside row at {col}:{row}"
                        )));
                    }
                    let at = ref_row * pitch + x as usize;
                    out[base + col + i] = if average {
                        ((u32::from(out[at]) + u32::from(out[at + 2]) + 1) >> 1) as u16
                    } else {
                        out[at]
                    };
                }
            }

            let mut flags = [0u32; 4];
            for f in flags.iter_mut() {
                *f = pump.get_bits(2)?;
            }
            let mut diff_bits = [0i32; 4];
            for (i, &flag) in flags.iter().enumerate() {
                // 0 green, 1 blue, 2 red
                let color = if row % 2 != 0 { i >> 1 } else { ((i >> 1) + 2) % 3 };
                diff_bits[i] = match flag {
                    0 => modes[color][0],
                    1 => modes[color][0] + 1,
                    2 => modes[color][0] - 1,
                    _ => pump.get_bits(4)? as i32,
                };
                modes[color][0] = modes[color][1];
                modes[color][1] = diff_bits[i];
                if diff_bits[i] < 0 || diff_bits[i] > max_bits {
                    return Err(DecodeError::corrupt(format!(
                        "SRW difference of {} bits",
                        diff_bits[i]
                    )));
                }
            }

            for i in 0..GROUP {
                let len = diff_bits[i >> 2] as u32;
                let mut diff = pump.get_bits(len)? as i32;
                if len > 0 && diff >> (len - 1) != 0 {
                    diff -= 1 << len;
                }
                let idx = if row % 2 != 0 {
                    ((i & 7) << 1) + 1 - (i >> 3)
                } else {
                    ((i & 7) << 1) + (i >> 3)
                };
                let px = &mut out[base + col + idx];
                *px = (i32::from(*px) + diff) as u16;
            }
        }
        line_offset += pump.bit_position().div_ceil(8) as usize;
    }
    Ok(())
}
