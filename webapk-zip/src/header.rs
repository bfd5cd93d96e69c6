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

use tracing::debug;
use webapk_common::*;

use crate::records::LOCAL_FILE_HEADER_LEN;

/// Compression method: bytes are stored as-is.
pub const STORE: u16 = 0;
/// Compression method: raw DEFLATE.
pub const DEFLATE: u16 = 8;

pub const UINT16_MAX: u64 = 0xFFFF;
pub const UINT32_MAX: u64 = 0xFFFF_FFFF;

// Minimum versions needed to extract
pub const ZIP_VERSION_20: u16 = 20; // 2.0, data descriptors
pub const ZIP_VERSION_45: u16 = 45; // 4.5, ZIP64 extensions

/// General purpose flag bit 3: CRC and sizes follow the data in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x8;

// Upper byte of the creator version
const CREATOR_UNIX: u16 = 3 << 8;

/// Metadata for one entry in a container.
///
/// Sizes exist twice: the 32-bit fields are what goes in classic records, the
/// 64-bit fields are the truth. When either true size doesn't fit, the 32-bit
/// fields hold the sentinel `0xFFFFFFFF`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileHeader {
    /// Relative path inside the container, forward-slash separated.
    pub name: String,
    pub comment: String,
    pub creator_version: u16,
    pub reader_version: u16,
    pub flags: u16,
    pub method: u16,
    /// MS-DOS time
    pub modified_time: u16,
    /// MS-DOS date
    pub modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub compressed_size64: u64,
    pub uncompressed_size64: u64,
    pub extra: Vec<u8>,
    pub external_attrs: u32
}

impl FileHeader {
    /// A header for a DEFLATE-compressed entry with no other metadata set.
    pub fn new(name: impl Into<String>) -> FileHeader {
        FileHeader {
            name: name.into(),
            method: DEFLATE,
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: u16) -> FileHeader {
        self.method = method;
        self
    }

    pub fn set_dos_time(&mut self, time: u16, date: u16) {
        self.modified_time = time;
        self.modified_date = date;
    }

    /// Records Unix permission bits in the external attributes and marks the
    /// creator as Unix so readers know how to interpret them.
    pub fn set_unix_mode(&mut self, mode: u32) {
        self.creator_version = CREATOR_UNIX | (self.creator_version & 0xFF);
        self.external_attrs = mode << 16;
    }

    /// Whether either size needs the 64-bit representation.
    pub fn is_zip64(&self) -> bool {
        self.compressed_size64 >= UINT32_MAX || self.uncompressed_size64 >= UINT32_MAX
    }

    /// Derives the 32-bit size fields from the 64-bit ones, using the
    /// sentinel and raising the reader version when ZIP64 is needed.
    pub(crate) fn settle_sizes(&mut self) {
        if self.is_zip64() {
            self.compressed_size = UINT32_MAX as u32;
            self.uncompressed_size = UINT32_MAX as u32;
            self.reader_version = self.reader_version.max(ZIP_VERSION_45);
        } else {
            self.compressed_size = self.compressed_size64 as u32;
            self.uncompressed_size = self.uncompressed_size64 as u32;
        }
    }

    /// Whether the payload is stored without compression, going by its sizes.
    pub fn is_uncompressed(&self) -> bool {
        self.compressed_size64 == self.uncompressed_size64
    }

    /// Pads the extra field with null bytes so that the entry's data, which
    /// follows the local header, name and extra field, starts on a multiple
    /// of `alignment` when the local header is written at `header_offset`.
    ///
    /// This is what `zipalign` does for uncompressed entries so Android can
    /// mmap them directly. Compressed entries are left untouched, aligning
    /// them would gain nothing.
    ///
    /// Returns the number of bytes of padding added.
    pub fn pad_extra_for_alignment(&mut self, header_offset: u64, alignment: u16) -> usize {
        if alignment <= 1 {
            return 0;
        }
        if !self.is_uncompressed() {
            debug!(name = %self.name, size = self.uncompressed_size64, "compressed, not padding");
            return 0;
        }
        let alignment = alignment as u64;
        let data_start = header_offset
            + LOCAL_FILE_HEADER_LEN as u64
            + self.name.len() as u64
            + self.extra.len() as u64;
        let padding = ((alignment - data_start % alignment) % alignment) as usize;
        self.extra.resize(self.extra.len() + padding, 0);
        debug!(name = %self.name, padding, "padded extra field for alignment");
        padding
    }
}

/// Checks that `name` is a relative, forward-slash separated path short
/// enough for the 16-bit name length.
pub fn validate_entry_name(name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    let has_drive_letter = bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':';
    let too_long = bytes.len() > u16::MAX as usize;
    if name.is_empty() || too_long || name.starts_with('/') || name.contains('\\') || has_drive_letter {
        return Err(WebApkError::ZipInvalidEntryName(name.into()));
    }
    Ok(())
}
