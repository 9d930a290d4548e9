//! Minolta MRW container.
//!
//! An MRW file is a `\0MRM` block whose payload is a list of sub-blocks,
//! each a 4-byte name and a big-endian length. The raw data follows the
//! outer block. The sub-blocks used here:
//!
//! - `\0PRD`: sensor geometry and storage (packed 12-bit or 16-bit words)
//! - `\0WBG`: white balance gains
//! - `\0TTW`: a TIFF with the usual EXIF directories

use bytes::Bytes;
use tracing::debug;

use crate::error::DecodeError;
use crate::io::{read_u16_be, read_u32_be};

use super::tiff::TiffRoot;

/// Leading bytes of every MRW file.
pub const MRW_MAGIC: &[u8] = b"\0MRM";

const BLOCK_PRD: &[u8] = b"\0PRD";
const BLOCK_WBG: &[u8] = b"\0WBG";
const BLOCK_TTW: &[u8] = b"\0TTW";

/// Parsed MRW block layout.
#[derive(Debug, Clone, PartialEq)]
pub struct MrwHeader {
    /// File offset of the raw data
    pub data_offset: usize,
    pub width: usize,
    pub height: usize,
    /// 12-bit samples packed two per three bytes, else one per 16-bit word
    pub packed: bool,
    /// Red, green and blue gains from `\0WBG`
    pub wb: Option<[f32; 3]>,
    /// Byte range of the embedded TIFF
    pub tiff: Option<(usize, usize)>,
}

impl MrwHeader {
    pub fn parse(data: &[u8]) -> Result<Self, DecodeError> {
        if !data.starts_with(MRW_MAGIC) {
            return Err(DecodeError::NotThisFormat("missing MRM signature".to_string()));
        }
        let truncated = || DecodeError::Truncated("MRW header runs past the end of the file".to_string());
        let outer = data.get(4..8).map(read_u32_be).ok_or_else(truncated)? as usize;
        let data_offset = outer.checked_add(8).ok_or_else(truncated)?;
        if data_offset > data.len() {
            return Err(truncated());
        }

        let mut geometry = None;
        let mut wb = None;
        let mut tiff = None;
        let mut pos = 8;
        while pos + 8 <= data_offset {
            let name = &data[pos..pos + 4];
            let len = read_u32_be(&data[pos + 4..pos + 8]) as usize;
            let start = pos + 8;
            let end = start.checked_add(len).filter(|&e| e <= data.len()).ok_or_else(truncated)?;
            let block = &data[start..end];

            match name {
                BLOCK_PRD => {
                    if block.len() < 17 {
                        return Err(truncated());
                    }
                    let height = read_u16_be(&block[8..]) as usize;
                    let width = read_u16_be(&block[10..]) as usize;
                    geometry = Some((width, height, block[16] == 12));
                }
                BLOCK_WBG if block.len() >= 12 => {
                    let gain = |i: usize| f32::from(read_u16_be(&block[4 + 2 * i..]));
                    wb = Some([gain(0), gain(1), gain(3)]);
                }
                BLOCK_TTW => tiff = Some((start, end)),
                other => debug!(block = ?String::from_utf8_lossy(other), len, "skipping MRW block"),
            }
            pos = end;
        }

        let (width, height, packed) =
            geometry.ok_or_else(|| DecodeError::MissingRequiredTag("MRW PRD block".to_string()))?;
        Ok(Self {
            data_offset,
            width,
            height,
            packed,
            wb,
            tiff,
        })
    }

    /// Parse the embedded TIFF, or an empty root when there is none.
    pub fn parse_tiff(&self, data: &Bytes) -> Result<TiffRoot, DecodeError> {
        match self.tiff {
            Some((start, end)) => Ok(TiffRoot::parse(data.slice(start..end))?),
            None => Ok(TiffRoot::empty()),
        }
    }
}
