// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Indexes an existing container so its entries can be carried into a new one.
//!
//! Only the directory structures are read. Entry data is never decompressed,
//! it's handed out as the raw compressed byte range for verbatim copying.

use std::io::Cursor;
use std::ops::Range;

use byteorder::{LittleEndian, ReadBytesExt};
use webapk_common::*;

use crate::header::*;
use crate::records::*;

/// What the appending writer needs to know about an existing container.
pub trait SourceArchive {
    /// Entries in central directory order.
    fn entries(&self) -> &[SourceEntry];
    /// Byte offset where new entries can be written, overwriting the old
    /// central directory.
    fn append_offset(&self) -> u64;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub header: FileHeader,
    /// Where this entry's local file header starts
    pub header_offset: u64,
    /// Where this entry's compressed data starts
    pub data_offset: u64
}

impl SourceEntry {
    /// Saturates instead of overflowing, so a bogus size yields a range
    /// past the end of any buffer.
    pub fn compressed_range(&self) -> Range<u64> {
        self.data_offset..self.data_offset.saturating_add(self.header.compressed_size64)
    }
}

#[derive(Debug, Default)]
pub struct ArchiveIndex {
    entries: Vec<SourceEntry>,
    directory_offset: u64
}

// Where the central directory lives, from the end records
struct DirectoryLocation {
    records: u64,
    offset: u64
}

impl ArchiveIndex {
    /// Reads the central directory of the container held in `zip_buf`.
    pub fn parse(zip_buf: &[u8]) -> Result<ArchiveIndex> {
        let eocd_start = find_end_record(zip_buf)?;
        let location = read_directory_location(zip_buf, eocd_start)?;

        let mut entries = vec![];
        let mut pos = location.offset;
        for _ in 0..location.records {
            let (entry, next) = read_central_record(zip_buf, pos)?;
            entries.push(entry);
            pos = next;
        }

        Ok(ArchiveIndex {
            entries,
            directory_offset: location.offset
        })
    }

    pub fn by_name(&self, name: &str) -> Option<&SourceEntry> {
        self.entries.iter().find(|entry| entry.header.name == name)
    }

    /// The still-compressed bytes of `entry` within `zip_buf`.
    pub fn compressed_data<'a>(&self, zip_buf: &'a [u8], entry: &SourceEntry) -> Result<&'a [u8]> {
        let range = entry.compressed_range();
        zip_buf
            .get(range.start as usize..range.end as usize)
            .ok_or(WebApkError::ZipParsingFailed("entry data out of range"))
    }
}

impl SourceArchive for ArchiveIndex {
    fn entries(&self) -> &[SourceEntry] {
        &self.entries
    }

    fn append_offset(&self) -> u64 {
        self.directory_offset
    }
}

fn slice_at<'a>(zip_buf: &'a [u8], pos: u64, len: usize, what: &'static str) -> Result<&'a [u8]> {
    let start = usize::try_from(pos).map_err(|_| WebApkError::ZipParsingFailed(what))?;
    zip_buf
        .get(start..start.saturating_add(len))
        .ok_or(WebApkError::ZipParsingFailed(what))
}

fn find_end_record(zip_buf: &[u8]) -> Result<usize> {
    let magic = END_OF_CENTRAL_DIRECTORY_SIGNATURE.to_le_bytes();
    if zip_buf.len() < END_OF_CENTRAL_DIRECTORY_LEN {
        return Err(WebApkError::ZipParsingFailed("end of central directory not found"));
    }
    // The record can be followed by a comment of up to 64KiB
    let last = zip_buf.len() - END_OF_CENTRAL_DIRECTORY_LEN;
    let first = last.saturating_sub(u16::MAX as usize);
    (first..=last)
        .rev()
        .find(|&i| zip_buf[i..i + 4] == magic)
        .ok_or(WebApkError::ZipParsingFailed("end of central directory not found"))
}

fn read_directory_location(zip_buf: &[u8], eocd_start: usize) -> Result<DirectoryLocation> {
    let eocd = &zip_buf[eocd_start..eocd_start + END_OF_CENTRAL_DIRECTORY_LEN];
    let mut cursor = Cursor::new(&eocd[10..]);
    let records = cursor.read_u16::<LittleEndian>()? as u64;
    let _size = cursor.read_u32::<LittleEndian>()?;
    let offset = cursor.read_u32::<LittleEndian>()? as u64;

    // A ZIP64 locator sits right before the classic record when present
    if eocd_start >= ZIP64_END_LOCATOR_LEN {
        let locator_start = (eocd_start - ZIP64_END_LOCATOR_LEN) as u64;
        let locator = slice_at(zip_buf, locator_start, ZIP64_END_LOCATOR_LEN, "zip64 locator")?;
        let mut cursor = Cursor::new(locator);
        if cursor.read_u32::<LittleEndian>()? == ZIP64_END_LOCATOR_SIGNATURE {
            let _disk = cursor.read_u32::<LittleEndian>()?;
            let end_record_offset = cursor.read_u64::<LittleEndian>()?;
            return read_zip64_end_record(zip_buf, end_record_offset);
        }
    }

    Ok(DirectoryLocation { records, offset })
}

fn read_zip64_end_record(zip_buf: &[u8], pos: u64) -> Result<DirectoryLocation> {
    let record = slice_at(
        zip_buf,
        pos,
        ZIP64_END_OF_CENTRAL_DIRECTORY_LEN,
        "zip64 end of central directory truncated"
    )?;
    let mut cursor = Cursor::new(record);
    if cursor.read_u32::<LittleEndian>()? != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
        return Err(WebApkError::ZipParsingFailed("bad zip64 end of central directory signature"));
    }
    cursor.set_position(32);
    let records = cursor.read_u64::<LittleEndian>()?;
    let _size = cursor.read_u64::<LittleEndian>()?;
    let offset = cursor.read_u64::<LittleEndian>()?;
    Ok(DirectoryLocation { records, offset })
}

// Returns the entry and the position of the next record
fn read_central_record(zip_buf: &[u8], pos: u64) -> Result<(SourceEntry, u64)> {
    let fixed = slice_at(zip_buf, pos, CENTRAL_DIRECTORY_LEN, "central directory truncated")?;
    let mut cursor = Cursor::new(fixed);
    if cursor.read_u32::<LittleEndian>()? != CENTRAL_DIRECTORY_SIGNATURE {
        return Err(WebApkError::ZipParsingFailed("bad central directory signature"));
    }
    let mut header = FileHeader {
        creator_version: cursor.read_u16::<LittleEndian>()?,
        reader_version: cursor.read_u16::<LittleEndian>()?,
        flags: cursor.read_u16::<LittleEndian>()?,
        method: cursor.read_u16::<LittleEndian>()?,
        modified_time: cursor.read_u16::<LittleEndian>()?,
        modified_date: cursor.read_u16::<LittleEndian>()?,
        crc32: cursor.read_u32::<LittleEndian>()?,
        compressed_size: cursor.read_u32::<LittleEndian>()?,
        uncompressed_size: cursor.read_u32::<LittleEndian>()?,
        ..Default::default()
    };
    let name_length = cursor.read_u16::<LittleEndian>()? as usize;
    let extra_length = cursor.read_u16::<LittleEndian>()? as usize;
    let comment_length = cursor.read_u16::<LittleEndian>()? as usize;
    // Disk number start and internal attributes
    cursor.set_position(38);
    header.external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut header_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut pos = pos + CENTRAL_DIRECTORY_LEN as u64;
    let name = slice_at(zip_buf, pos, name_length, "entry name truncated")?;
    pos += name_length as u64;
    let extra = slice_at(zip_buf, pos, extra_length, "extra field truncated")?;
    pos += extra_length as u64;
    let comment = slice_at(zip_buf, pos, comment_length, "entry comment truncated")?;
    pos += comment_length as u64;

    header.name = String::from_utf8_lossy(name).into_owned();
    header.comment = String::from_utf8_lossy(comment).into_owned();
    header.compressed_size64 = header.compressed_size as u64;
    header.uncompressed_size64 = header.uncompressed_size as u64;
    header.extra = resolve_zip64_extra(extra, &mut header, &mut header_offset)?;

    let data_offset = read_data_offset(zip_buf, header_offset)?;
    match data_offset.checked_add(header.compressed_size64) {
        Some(data_end) if data_end <= zip_buf.len() as u64 => {}
        _ => return Err(WebApkError::ZipParsingFailed("entry data out of range"))
    }
    let entry = SourceEntry {
        header,
        header_offset,
        data_offset
    };
    Ok((entry, pos))
}

// Fills in 64-bit values from a ZIP64 extra block and returns the remaining
// extra bytes. The block is dropped since the writer adds its own when needed.
fn resolve_zip64_extra(
    extra: &[u8],
    header: &mut FileHeader,
    header_offset: &mut u64
) -> Result<Vec<u8>> {
    let mut kept = vec![];
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let mut cursor = Cursor::new(&extra[pos..]);
        let id = cursor.read_u16::<LittleEndian>()?;
        let size = cursor.read_u16::<LittleEndian>()? as usize;
        let end = (pos + 4 + size).min(extra.len());
        if id != ZIP64_EXTRA_ID {
            kept.extend(&extra[pos..end]);
            pos = end;
            continue;
        }

        // Only the fields that overflowed are present, in this order
        let mut values = Cursor::new(&extra[pos + 4..end]);
        if header.uncompressed_size as u64 == UINT32_MAX {
            header.uncompressed_size64 = values.read_u64::<LittleEndian>()?;
        }
        if header.compressed_size as u64 == UINT32_MAX {
            header.compressed_size64 = values.read_u64::<LittleEndian>()?;
        }
        if *header_offset == UINT32_MAX {
            *header_offset = values.read_u64::<LittleEndian>()?;
        }
        pos = end;
    }
    // Trailing bytes too short to be a block, eg. alignment padding
    kept.extend(&extra[pos..]);
    Ok(kept)
}

fn read_data_offset(zip_buf: &[u8], header_offset: u64) -> Result<u64> {
    let local = slice_at(zip_buf, header_offset, LOCAL_FILE_HEADER_LEN, "local header truncated")?;
    let mut cursor = Cursor::new(local);
    if cursor.read_u32::<LittleEndian>()? != LOCAL_FILE_HEADER_SIGNATURE {
        return Err(WebApkError::ZipParsingFailed("bad local file header signature"));
    }
    cursor.set_position(26);
    let name_length = cursor.read_u16::<LittleEndian>()? as u64;
    let extra_length = cursor.read_u16::<LittleEndian>()? as u64;
    Ok(header_offset + LOCAL_FILE_HEADER_LEN as u64 + name_length + extra_length)
}
