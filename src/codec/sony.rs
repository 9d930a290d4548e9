//! Sony ARW pixel codecs.
//!
//! ARW1 is a column-major stream of variable-length differences. ARW2
//! packs each row in 16-pixel groups: an 11-bit maximum and minimum, the
//! positions of those two literals, and 7-bit residuals scaled by a shift
//! derived from the group's range. ARW2 rows have a fixed byte length, so
//! bands of rows decode independently.

use crate::bits::{BitPump, MsbPump, PlainPump};
use crate::error::DecodeError;
use crate::image::PlaneMut;

use super::huffman::extend;

/// Pixels per ARW2 group.
const GROUP: usize = 16;

/// Expand the four knots of the ARW tone curve (tag 0x7010) into a
/// 0x4001-entry table. Each segment doubles the step of the previous one.
pub fn sony_curve(knots: &[u16]) -> Vec<u16> {
    let mut points = [0usize, 0, 0, 0, 0, 4095];
    for (i, &k) in knots.iter().take(4).enumerate() {
        points[i + 1] = usize::from((k >> 2) & 0xfff);
    }
    let mut curve: Vec<u16> = (0..=0x4000u16).collect();
    for i in 0..5 {
        for j in points[i] + 1..=points[i + 1] {
            curve[j] = curve[j - 1].wrapping_add(1 << i);
        }
    }
    curve
}

// =============================================================================
// ARW1
// =============================================================================

/// Decode an ARW1 stream into the whole plane.
///
/// Columns are coded right to left; within a column even rows come first,
/// then odd rows. A single running sum serves as predictor.
pub fn decode_arw1(plane: &mut PlaneMut<'_>, input: &[u8]) -> Result<(), DecodeError> {
    let (width, height, pitch) = (plane.width(), plane.height(), plane.pitch());
    let out = plane.data_mut();
    let mut pump = MsbPump::new(input);
    let mut sum: i32 = 0;

    for x in (0..width).rev() {
        let mut y = 0;
        while y < height + 1 {
            if y == height {
                y = 1;
            }
            pump.check_position()?;
            let mut len = 4 - pump.get_bits(2)?;
            if len == 3 && pump.get_bit()? == 1 {
                len = 0;
            }
            if len == 4 {
                while len < 17 && pump.get_bit()? == 0 {
                    len += 1;
                }
            }
            let diff = extend(pump.get_bits(len)? as i32, len);
            sum = sum.wrapping_add(diff);
            if y < height {
                out[y * pitch + x] = sum as u16;
            }
            y += 2;
        }
    }
    Ok(())
}

// =============================================================================
// ARW2
// =============================================================================

/// Decode one 16-pixel group, writing every `stride`-th sample of `out`.
fn decode_group(
    pump: &mut PlainPump<'_>,
    out: &mut [u16],
    stride: usize,
) -> Result<(), DecodeError> {
    let max = pump.get_bits(11)? as i32;
    let min = pump.get_bits(11)? as i32;
    let imax = pump.get_bits(4)? as usize;
    let imin = pump.get_bits(4)? as usize;

    let mut sh = 0;
    while sh < 4 && (0x80 << sh) <= max - min {
        sh += 1;
    }

    for i in 0..GROUP {
        let p = if i == imax {
            max
        } else if i == imin {
            min
        } else {
            ((pump.get_bits(7)? as i32) << sh).saturating_add(min).min(0x7ff)
        };
        out[i * stride] = (p << 1) as u16;
    }
    Ok(())
}

/// Decode the rows of `plane` from an ARW2 8-bit stream.
///
/// Every row takes `width` bytes. Full 32-pixel blocks hold two groups
/// interleaved by column parity; a trailing 16 pixels form one contiguous
/// group.
pub fn decode_arw2_band(plane: &mut PlaneMut<'_>, input: &[u8]) -> Result<(), DecodeError> {
    let width = plane.width();
    if width % GROUP != 0 {
        return Err(DecodeError::unsupported(format!(
            "ARW2 width {width} is not a multiple of {GROUP}"
        )));
    }
    let first = plane.y_offset();

    for y in 0..plane.height() {
        let start = (first + y) * width;
        let data = input.get(start..).ok_or_else(|| {
            DecodeError::Truncated(format!("ARW2 row {} starts past the end of the data", first + y))
        })?;
        let mut pump = PlainPump::new(data);
        let row = plane.row_mut(y);

        let mut x = 0;
        while x + 2 * GROUP <= width {
            decode_group(&mut pump, &mut row[x..], 2)?;
            decode_group(&mut pump, &mut row[x + 1..], 2)?;
            x += 2 * GROUP;
        }
        if x + GROUP <= width {
            decode_group(&mut pump, &mut row[x..], 1)?;
        }
        pump.check_position()?;
    }
    Ok(())
}
