//! Image File Directory parsing.
//!
//! A directory is a count followed by 12-byte entry records and a 4-byte
//! "next IFD" offset. Entries that point to sub-structures (SubIFDs, EXIF,
//! maker notes, DNG private data, IFD-typed values) are parsed into child
//! directories; when that fails the entry is kept as an ordinary opaque
//! entry instead.

use std::collections::{BTreeMap, HashSet};

use bytes::Bytes;
use tracing::debug;

use crate::error::TiffError;
use crate::io::{checked_slice, ByteCursor};

use super::makernote;
use super::parser::ByteOrder;
use super::tags::{tag_name, FieldType, TiffTag};
use super::values::Entry;

// =============================================================================
// Constants
// =============================================================================

/// Size of one directory entry record
pub const IFD_ENTRY_SIZE: usize = 12;

/// Upper bound on directories parsed from one file
pub const MAX_IFDS: usize = 100;

/// Upper bound on directory nesting
pub const MAX_DEPTH: usize = 10;

// =============================================================================
// ParseContext
// =============================================================================

/// The buffer a directory is parsed from and how its offsets resolve.
///
/// Maker notes and private blocks are often parsed relative to their own
/// start, or were copied out of the original file; `rebase` is subtracted
/// from every declared offset and `origin` maps buffer positions back to
/// absolute file offsets.
#[derive(Debug, Clone)]
pub(crate) struct ParseContext {
    pub data: Bytes,
    pub order: ByteOrder,
    pub rebase: u32,
    pub origin: usize,
}

impl ParseContext {
    pub fn new(data: Bytes, order: ByteOrder) -> Self {
        Self {
            data,
            order,
            rebase: 0,
            origin: 0,
        }
    }

    /// A context whose offset 0 is `pos` in this one.
    pub fn sub(&self, pos: usize, order: ByteOrder) -> Result<Self, TiffError> {
        if pos > self.data.len() {
            return Err(TiffError::InvalidIfdOffset(pos as u64));
        }
        Ok(Self {
            data: self.data.slice(pos..),
            order,
            rebase: 0,
            origin: self.origin + pos,
        })
    }

    /// Buffer position of a declared offset.
    #[inline]
    pub fn resolve(&self, declared: u32) -> Option<usize> {
        declared
            .checked_sub(self.rebase)
            .map(|p| p as usize)
            .filter(|&p| p <= self.data.len())
    }
}

// =============================================================================
// Ifd
// =============================================================================

/// A parsed directory: tag-keyed entries plus child directories.
#[derive(Debug, Clone)]
pub struct Ifd {
    entries: BTreeMap<u16, Entry>,
    sub_ifds: Vec<Ifd>,
    byte_order: ByteOrder,
    next_offset: u32,
    offset: usize,
    parent_tag: Option<u16>,
}

impl Ifd {
    /// Look up an entry in this directory only.
    #[inline]
    pub fn get_entry(&self, tag: impl Into<u16>) -> Option<&Entry> {
        self.entries.get(&tag.into())
    }

    /// Look up a required entry in this directory.
    ///
    /// # Errors
    /// `MissingTag` naming the tag when it is absent.
    pub fn entry(&self, tag: impl Into<u16>) -> Result<&Entry, TiffError> {
        let tag = tag.into();
        self.entries
            .get(&tag)
            .ok_or_else(|| TiffError::MissingTag(tag_name(tag)))
    }

    #[inline]
    pub fn has_entry(&self, tag: impl Into<u16>) -> bool {
        self.entries.contains_key(&tag.into())
    }

    /// Depth-first search in this directory and its children.
    pub fn get_entry_recursive(&self, tag: impl Into<u16>) -> Option<&Entry> {
        let tag = tag.into();
        self.entries
            .get(&tag)
            .or_else(|| self.sub_ifds.iter().find_map(|s| s.get_entry_recursive(tag)))
    }

    /// Every directory at or below this one containing `tag`.
    pub fn get_ifds_with_tag(&self, tag: impl Into<u16>) -> Vec<&Ifd> {
        let mut out = Vec::new();
        self.collect_ifds_with_tag(tag.into(), &mut out);
        out
    }

    pub(crate) fn collect_ifds_with_tag<'a>(&'a self, tag: u16, out: &mut Vec<&'a Ifd>) {
        if self.entries.contains_key(&tag) {
            out.push(self);
        }
        for sub in &self.sub_ifds {
            sub.collect_ifds_with_tag(tag, out);
        }
    }

    pub(crate) fn collect_all<'a>(&'a self, out: &mut Vec<&'a Ifd>) {
        out.push(self);
        for sub in &self.sub_ifds {
            sub.collect_all(out);
        }
    }

    /// Entries in ascending tag order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    #[inline]
    pub fn sub_ifds(&self) -> &[Ifd] {
        &self.sub_ifds
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Declared offset of the next directory in the chain (0 = none).
    #[inline]
    pub fn next_offset(&self) -> u32 {
        self.next_offset
    }

    /// Absolute file offset of this directory.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The tag of the entry that pointed at this directory, if any.
    #[inline]
    pub fn parent_tag(&self) -> Option<u16> {
        self.parent_tag
    }
}

// =============================================================================
// IfdParser
// =============================================================================

/// Walks directories while enforcing the directory budget and loop checks.
#[derive(Debug, Default)]
pub(crate) struct IfdParser {
    parsed: usize,
    visited: HashSet<usize>,
}

impl IfdParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one directory at a declared offset.
    ///
    /// # Errors
    /// - `TooManyIfds` / `DepthExceeded` when the limits are hit
    /// - `IfdLoop` when an absolute offset is revisited
    /// - `InvalidIfdOffset` / `Io` when the directory lies outside the buffer
    pub fn parse_ifd(
        &mut self,
        ctx: &ParseContext,
        offset: u32,
        depth: usize,
    ) -> Result<Ifd, TiffError> {
        if depth > MAX_DEPTH {
            return Err(TiffError::DepthExceeded(MAX_DEPTH));
        }
        if self.parsed >= MAX_IFDS {
            return Err(TiffError::TooManyIfds(MAX_IFDS));
        }
        let pos = ctx
            .resolve(offset)
            .ok_or(TiffError::InvalidIfdOffset(offset as u64))?;
        if !self.visited.insert(ctx.origin + pos) {
            return Err(TiffError::IfdLoop((ctx.origin + pos) as u64));
        }
        self.parsed += 1;

        let mut cursor = ByteCursor::new(&ctx.data, ctx.order);
        cursor.seek(pos)?;
        let count = cursor.get_u16()? as usize;
        let records = cursor.get_bytes(count * IFD_ENTRY_SIZE)?;
        // A missing "next" pointer just ends the chain
        let next_offset = cursor.get_u32().unwrap_or(0);

        let mut ifd = Ifd {
            entries: BTreeMap::new(),
            sub_ifds: Vec::new(),
            byte_order: ctx.order,
            next_offset,
            offset: ctx.origin + pos,
            parent_tag: None,
        };

        for (i, record) in records.chunks_exact(IFD_ENTRY_SIZE).enumerate() {
            let record_pos = pos + 2 + i * IFD_ENTRY_SIZE;
            let Some((entry, payload_pos)) = read_entry(ctx, record, record_pos) else {
                continue;
            };
            self.attach(ctx, &mut ifd, entry, payload_pos, depth);
        }

        Ok(ifd)
    }

    /// File an entry either as a child directory or as a plain entry.
    fn attach(
        &mut self,
        ctx: &ParseContext,
        ifd: &mut Ifd,
        entry: Entry,
        payload_pos: usize,
        depth: usize,
    ) {
        let tag = entry.tag();
        let parsed = if tag == TiffTag::DngPrivateData.as_u16() {
            makernote::parse_dng_private_data(self, &entry, depth + 1).map(|s| vec![s])
        } else if tag == TiffTag::MakerNote.as_u16() || tag == TiffTag::MakerNoteAlt.as_u16() {
            makernote::parse_maker_note(self, ctx, payload_pos, depth + 1).map(|s| vec![s])
        } else if tag == TiffTag::SubIfds.as_u16()
            || tag == TiffTag::ExifIfdPointer.as_u16()
            || tag == TiffTag::FujiRawIfd.as_u16()
            || entry.field_type() == FieldType::Ifd
        {
            self.parse_pointer_list(ctx, &entry, depth + 1)
        } else {
            ifd.entries.insert(tag, entry);
            return;
        };

        match parsed {
            Ok(subs) => ifd.sub_ifds.extend(subs.into_iter().map(|mut s| {
                s.parent_tag = Some(tag);
                s
            })),
            Err(e) => {
                debug!(tag = %tag_name(tag), error = %e, "keeping unparsable sub-structure as entry");
                ifd.entries.insert(tag, entry);
            }
        }
    }

    fn parse_pointer_list(
        &mut self,
        ctx: &ParseContext,
        entry: &Entry,
        depth: usize,
    ) -> Result<Vec<Ifd>, TiffError> {
        let mut subs = Vec::with_capacity(entry.count() as usize);
        for offset in entry.get_u32_array()? {
            subs.push(self.parse_ifd(ctx, offset, depth)?);
        }
        Ok(subs)
    }
}

/// Decode one 12-byte record and resolve its payload.
///
/// Returns `None` for entries with an unknown type or an out-of-range
/// payload; those are treated as absent.
fn read_entry(ctx: &ParseContext, record: &[u8], record_pos: usize) -> Option<(Entry, usize)> {
    let order = ctx.order;
    let tag = order.read_u16(&record[0..2]);
    let raw_type = order.read_u16(&record[2..4]);
    let count = order.read_u32(&record[4..8]);

    let Some(mut field_type) = FieldType::from_u16(raw_type) else {
        debug!(tag = %tag_name(tag), raw_type, "skipping entry with unknown field type");
        return None;
    };
    // Fuji writes its raw IFD pointer with type 13 but means a Long
    if tag == TiffTag::FujiRawIfd.as_u16() && field_type == FieldType::Ifd {
        field_type = FieldType::Long;
    }

    let size = field_type.size_in_bytes() as u64 * count as u64;
    let payload_pos = if size <= FieldType::INLINE_THRESHOLD as u64 {
        record_pos + 8
    } else {
        let declared = order.read_u32(&record[8..12]);
        match ctx.resolve(declared) {
            Some(p) => p,
            None => {
                debug!(tag = %tag_name(tag), declared, "skipping entry with payload outside buffer");
                return None;
            }
        }
    };
    let size = usize::try_from(size).ok()?;
    if checked_slice(&ctx.data, payload_pos, size).is_err() {
        debug!(tag = %tag_name(tag), count, "skipping entry with truncated payload");
        return None;
    }

    let data = ctx.data.slice(payload_pos..payload_pos + size);
    let entry = Entry::new(tag, field_type, count, data, order, ctx.origin + payload_pos);
    Some((entry, payload_pos))
}

/// Parse a single directory from a standalone buffer.
///
/// Used for blocks that are not reachable from the header chain: Sony SR2
/// sub-directories (after decryption), and directories inside vendor boxes.
/// `rebase` is the file offset the buffer was taken from, so absolute
/// offsets inside the block resolve correctly.
pub fn parse_ifd_at(
    data: Bytes,
    order: ByteOrder,
    rebase: u32,
    offset: u32,
) -> Result<Ifd, TiffError> {
    let ctx = ParseContext {
        data,
        order,
        rebase,
        origin: rebase as usize,
    };
    IfdParser::new().parse_ifd(&ctx, offset, 0)
}

// =============================================================================
// Tests
// =============================================================================
