//! Maker-note and private-data sub-parsers.
//!
//! Maker notes are vendor directories stored inside an EXIF entry. Most start
//! with a vendor signature; some embed their own byte-order mark or a whole
//! TIFF header, and some resolve offsets relative to the note itself rather
//! than the file. Each known header picks the directory position, byte order
//! and offset base; anything else is tried in place with the parent's order.

use tracing::debug;

use crate::error::TiffError;
use crate::io::{checked_slice, read_u32_be, read_u32_le};

use super::ifd::{Ifd, IfdParser, ParseContext};
use super::parser::ByteOrder;
use super::values::Entry;

/// DNG private blocks pointing past this original offset are ignored.
const MAX_PRIVATE_ORIGINAL_OFFSET: u64 = 300 * 1024 * 1024;

const FUJI_SIGNATURE: &[u8] = b"FUJIFILM\x0c\x00\x00\x00";

/// Where a maker note's directory lives and how to read it.
#[derive(Debug)]
struct NoteLayout {
    ctx: ParseContext,
    ifd_offset: u32,
}

/// Parse a maker note found at buffer position `pos` of `ctx`.
///
/// # Errors
/// Any failure; the caller keeps the entry as opaque data.
pub(crate) fn parse_maker_note(
    parser: &mut IfdParser,
    ctx: &ParseContext,
    pos: usize,
    depth: usize,
) -> Result<Ifd, TiffError> {
    let layout = locate(ctx, pos)?;
    debug!(
        offset = ctx.origin + pos,
        order = ?layout.ctx.order,
        "parsing maker note"
    );
    parser.parse_ifd(&layout.ctx, layout.ifd_offset, depth)
}

/// Work out the directory position for a maker note at `pos`.
fn locate(ctx: &ParseContext, pos: usize) -> Result<NoteLayout, TiffError> {
    let head = checked_slice(&ctx.data, pos, 14usize.min(ctx.data.len().saturating_sub(pos)))?;
    if head.len() < 6 {
        return Err(TiffError::InvalidIfdOffset((ctx.origin + pos) as u64));
    }
    let starts = |sig: &[u8]| head.starts_with(sig);
    // Offsets of plain notes are declared in the parent's offset space
    let in_place = |skip: usize, order: ByteOrder| -> Result<NoteLayout, TiffError> {
        let declared = u32::try_from(pos + skip)
            .ok()
            .and_then(|p| p.checked_add(ctx.rebase))
            .ok_or(TiffError::InvalidIfdOffset((pos + skip) as u64))?;
        let mut c = ctx.clone();
        c.order = order;
        Ok(NoteLayout {
            ctx: c,
            ifd_offset: declared,
        })
    };

    // Pentax: "AOC\0" optionally followed by a byte-order mark
    if starts(b"AOC\0") {
        return match ByteOrder::from_mark(&head[4..]) {
            Some(order) => in_place(6, order),
            None => in_place(4, ctx.order),
        };
    }

    // Pentax: "PENTAX \0" + mark at +8, offsets relative to the note
    if starts(b"PENTAX") {
        let order = ByteOrder::from_mark(&head[8..])
            .ok_or_else(|| invalid_note("Pentax maker note without byte order"))?;
        return Ok(NoteLayout {
            ctx: ctx.sub(pos, order)?,
            ifd_offset: 10,
        });
    }

    // Fuji: little-endian, offsets relative to the note, IFD offset at +8
    if starts(FUJI_SIGNATURE) {
        let note = ctx.sub(pos, ByteOrder::LittleEndian)?;
        let ifd_offset = read_u32_le(checked_slice(&note.data, 8, 4)?);
        return Ok(NoteLayout {
            ctx: note,
            ifd_offset,
        });
    }

    // Nikon type 3: complete TIFF header at +10
    if starts(b"Nikon\0\x02") {
        let header = checked_slice(&ctx.data, pos + 10, 8)?;
        let order = ByteOrder::from_mark(header)
            .ok_or_else(|| invalid_note("Nikon maker note without byte order"))?;
        let ifd_offset = order.read_u32(&header[4..8]);
        return Ok(NoteLayout {
            ctx: ctx.sub(pos + 10, order)?,
            ifd_offset,
        });
    }

    // Nikon type 1: directory at +8 in the parent's space
    if starts(b"Nikon\0\x01") {
        return in_place(8, ctx.order);
    }

    // Embedded JPEG APP1 block ("....Exif\0\0" + TIFF header at +12)
    if head.len() >= 14 && &head[6..10] == b"Exif" {
        let header = checked_slice(&ctx.data, pos + 12, 8)?;
        let order = ByteOrder::from_mark(header)
            .ok_or_else(|| invalid_note("embedded EXIF without byte order"))?;
        let ifd_offset = order.read_u32(&header[4..8]);
        return Ok(NoteLayout {
            ctx: ctx.sub(pos + 12, order)?,
            ifd_offset,
        });
    }

    // Olympus new style: "OLYMPUS\0" + mark, offsets relative to the note
    if starts(b"OLYMPUS\0") {
        let order = ByteOrder::from_mark(&head[8..]).unwrap_or(ctx.order);
        return Ok(NoteLayout {
            ctx: ctx.sub(pos, order)?,
            ifd_offset: 12,
        });
    }

    if starts(b"OLYMP\0") || starts(b"EPSON\0") {
        return in_place(8, ctx.order);
    }

    if starts(b"Panasonic\0") || starts(b"SONY DSC \0") {
        return in_place(12, ctx.order);
    }

    if let Some(order) = ByteOrder::from_mark(head) {
        return in_place(2, order);
    }

    in_place(0, ctx.order)
}

fn invalid_note(message: &str) -> TiffError {
    TiffError::InvalidTagValue {
        tag: "MakerNote".to_string(),
        message: message.to_string(),
    }
}

/// Parse the maker note carried in a DNG `DNGPrivateData` entry.
///
/// Layout: `"Adobe\0"`, `"MakN"`, BE u32 length, original byte-order mark,
/// BE u32 original file offset, then the verbatim maker note. The note's
/// internal offsets refer to the original file, so it is parsed with a
/// rebase equal to that original offset.
///
/// # Errors
/// Fails for anything that is not an Adobe maker-note block; the caller keeps
/// the entry as opaque data (ARW files reuse this tag for a plain offset).
pub(crate) fn parse_dng_private_data(
    parser: &mut IfdParser,
    entry: &Entry,
    depth: usize,
) -> Result<Ifd, TiffError> {
    let data = entry.data();
    if !data.starts_with(b"Adobe\0") {
        return Err(invalid_private("not Adobe private data"));
    }
    if checked_slice(data, 6, 4)? != b"MakN" {
        return Err(invalid_private("not a maker note"));
    }
    let count = read_u32_be(checked_slice(data, 10, 4)?) as usize;
    let order = ByteOrder::from_mark(checked_slice(data, 14, 2)?)
        .ok_or_else(|| invalid_private("cannot determine maker note byte order"))?;
    let original_offset = read_u32_be(checked_slice(data, 16, 4)?);
    if original_offset as u64 + count as u64 > MAX_PRIVATE_ORIGINAL_OFFSET {
        return Err(invalid_private("original maker note offset is past 300MB"));
    }
    checked_slice(data, 20, count)?;

    let ctx = ParseContext {
        data: entry.bytes().slice(20..20 + count),
        order,
        rebase: original_offset,
        origin: entry.data_offset() + 20,
    };
    let note = locate(&ctx, 0)?;
    parser.parse_ifd(&note.ctx, note.ifd_offset, depth)
}

fn invalid_private(message: &str) -> TiffError {
    TiffError::InvalidTagValue {
        tag: "DngPrivateData".to_string(),
        message: message.to_string(),
    }
}
