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

// On-disk records of the ZIP format, see APPNOTE.TXT sections 4.3.7 - 4.3.16.
// Every record is a fixed-size prefix of little-endian integers, sometimes
// followed by variable-length name/extra/comment bytes.
use deku::prelude::*;
use webapk_common::*;

use crate::header::*;

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x02014b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x08074b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06054b50;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x06064b50;
pub const ZIP64_END_LOCATOR_SIGNATURE: u32 = 0x07064b50;

pub const ZIP64_EXTRA_ID: u16 = 0x0001;

pub const LOCAL_FILE_HEADER_LEN: usize = 30;
pub const CENTRAL_DIRECTORY_LEN: usize = 46;
pub const END_OF_CENTRAL_DIRECTORY_LEN: usize = 22;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_LEN: usize = 56;
pub const ZIP64_END_LOCATOR_LEN: usize = 20;

#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct LocalFileHeader {
    pub signature: u32,
    pub reader_version: u16,
    pub flags: u16,
    pub method: u16,
    pub modified_time: u16,
    pub modified_date: u16,
    // These three are always zero, the data descriptor carries the real values
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_length: u16,
    pub extra_length: u16,
    pub name: Vec<u8>,
    pub extra: Vec<u8>
}

#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct DataDescriptor {
    pub signature: u32,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32
}

#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct DataDescriptor64 {
    pub signature: u32,
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64
}

#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct CentralDirectoryRecord {
    pub signature: u32,
    pub creator_version: u16,
    pub reader_version: u16,
    pub flags: u16,
    pub method: u16,
    pub modified_time: u16,
    pub modified_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_length: u16,
    pub extra_length: u16,
    pub comment_length: u16,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_header_offset: u32,
    pub name: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>
}

// Goes in the central directory's extra field when sizes or the offset overflow
#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct Zip64ExtraField {
    pub id: u16,
    // Size of the three u64s below
    pub size: u16,
    pub uncompressed_size: u64,
    pub compressed_size: u64,
    pub local_header_offset: u64
}

#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct Zip64EndOfCentralDirectory {
    pub signature: u32,
    // Length of the record MINUS the signature and this field
    pub record_size: u64,
    pub creator_version: u16,
    pub reader_version: u16,
    pub disk_number: u32,
    pub directory_disk: u32,
    pub records_on_disk: u64,
    pub records: u64,
    pub directory_size: u64,
    pub directory_offset: u64
}

#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct Zip64EndLocator {
    pub signature: u32,
    pub end_record_disk: u32,
    pub end_record_offset: u64,
    pub total_disks: u32
}

#[derive(Debug, PartialEq, DekuWrite)]
#[deku(endian = "little")]
pub struct EndOfCentralDirectory {
    pub signature: u32,
    pub disk_number: u16,
    pub directory_disk: u16,
    pub records_on_disk: u16,
    pub records: u16,
    pub directory_size: u32,
    pub directory_offset: u32,
    // We never write an archive comment
    pub comment_length: u16
}

// Variable-length fields carry a 16-bit length
fn field_length(bytes: &[u8], field: &'static str) -> Result<u16> {
    u16::try_from(bytes.len()).map_err(|_| WebApkError::ZipFieldTooLong(field))
}

/// Local file header for an entry whose CRC and sizes aren't known yet.
pub fn encode_local_header(header: &FileHeader) -> Result<Vec<u8>> {
    let record = LocalFileHeader {
        signature: LOCAL_FILE_HEADER_SIGNATURE,
        reader_version: header.reader_version,
        flags: header.flags,
        method: header.method,
        modified_time: header.modified_time,
        modified_date: header.modified_date,
        crc32: 0,
        compressed_size: 0,
        uncompressed_size: 0,
        name_length: field_length(header.name.as_bytes(), "name")?,
        extra_length: field_length(&header.extra, "extra")?,
        name: header.name.as_bytes().to_vec(),
        extra: header.extra.clone()
    };
    Ok(record.to_bytes()?)
}

/// Trailer following an entry's data.
///
/// 64-bit sizes are written when needed without adding a ZIP64 extra to the
/// local header, which has already been written by this point.
pub fn encode_data_descriptor(header: &FileHeader) -> Result<Vec<u8>> {
    if header.is_zip64() {
        Ok(DataDescriptor64 {
            signature: DATA_DESCRIPTOR_SIGNATURE,
            crc32: header.crc32,
            compressed_size: header.compressed_size64,
            uncompressed_size: header.uncompressed_size64
        }
        .to_bytes()?)
    } else {
        Ok(DataDescriptor {
            signature: DATA_DESCRIPTOR_SIGNATURE,
            crc32: header.crc32,
            compressed_size: header.compressed_size,
            uncompressed_size: header.uncompressed_size
        }
        .to_bytes()?)
    }
}

/// Central directory record for an entry whose local header is at `offset`.
///
/// If the sizes or offset don't fit in 32 bits, the fixed fields hold the
/// sentinel and a ZIP64 extra block with the real values is appended after
/// the entry's own extra bytes.
pub fn encode_central_record(header: &FileHeader, offset: u64) -> Result<Vec<u8>> {
    let mut extra = header.extra.clone();
    let (compressed_size, uncompressed_size, local_header_offset) =
        if header.is_zip64() || offset >= UINT32_MAX {
            extra.extend(
                Zip64ExtraField {
                    id: ZIP64_EXTRA_ID,
                    size: 24,
                    uncompressed_size: header.uncompressed_size64,
                    compressed_size: header.compressed_size64,
                    local_header_offset: offset
                }
                .to_bytes()?
            );
            let sentinel = UINT32_MAX as u32;
            (sentinel, sentinel, sentinel)
        } else {
            (header.compressed_size, header.uncompressed_size, offset as u32)
        };

    let record = CentralDirectoryRecord {
        signature: CENTRAL_DIRECTORY_SIGNATURE,
        creator_version: header.creator_version,
        reader_version: header.reader_version,
        flags: header.flags,
        method: header.method,
        modified_time: header.modified_time,
        modified_date: header.modified_date,
        crc32: header.crc32,
        compressed_size,
        uncompressed_size,
        name_length: field_length(header.name.as_bytes(), "name")?,
        extra_length: field_length(&extra, "extra")?,
        comment_length: field_length(header.comment.as_bytes(), "comment")?,
        disk_number_start: 0,
        internal_attrs: 0,
        external_attrs: header.external_attrs,
        local_header_offset,
        name: header.name.as_bytes().to_vec(),
        extra,
        comment: header.comment.as_bytes().to_vec()
    };
    Ok(record.to_bytes()?)
}

/// Everything after the last central directory record.
///
/// `directory_end` is where the central directory stopped, which is also where
/// a ZIP64 end record would start.
pub fn encode_directory_end(
    records: u64,
    directory_offset: u64,
    directory_end: u64
) -> Result<Vec<u8>> {
    let mut records = records;
    let mut size = directory_end - directory_offset;
    let mut offset = directory_offset;
    let mut out = vec![];

    if records >= UINT16_MAX || size >= UINT32_MAX || offset >= UINT32_MAX {
        out.extend(
            Zip64EndOfCentralDirectory {
                signature: ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE,
                record_size: (ZIP64_END_OF_CENTRAL_DIRECTORY_LEN - 12) as u64,
                creator_version: ZIP_VERSION_45,
                reader_version: ZIP_VERSION_45,
                disk_number: 0,
                directory_disk: 0,
                records_on_disk: records,
                records,
                directory_size: size,
                directory_offset: offset
            }
            .to_bytes()?
        );
        out.extend(
            Zip64EndLocator {
                signature: ZIP64_END_LOCATOR_SIGNATURE,
                end_record_disk: 0,
                end_record_offset: directory_end,
                total_disks: 1
            }
            .to_bytes()?
        );

        // Max values in the classic record tell readers to use the ZIP64 ones
        records = UINT16_MAX;
        size = UINT32_MAX;
        offset = UINT32_MAX;
    }

    out.extend(
        EndOfCentralDirectory {
            signature: END_OF_CENTRAL_DIRECTORY_SIGNATURE,
            disk_number: 0,
            directory_disk: 0,
            records_on_disk: records as u16,
            records: records as u16,
            directory_size: size as u32,
            directory_offset: offset as u32,
            comment_length: 0
        }
        .to_bytes()?
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(buf: &[u8], at: usize) -> u16 {
        u16::from_le_bytes([buf[at], buf[at + 1]])
    }

    fn u32_at(buf: &[u8], at: usize) -> u32 {
        u32::from_le_bytes(buf[at..at + 4].try_into().unwrap())
    }

    fn u64_at(buf: &[u8], at: usize) -> u64 {
        u64::from_le_bytes(buf[at..at + 8].try_into().unwrap())
    }

    fn finished_header(name: &str, compressed: u64, uncompressed: u64) -> FileHeader {
        let mut header = FileHeader::new(name);
        header.crc32 = 0xDEADBEEF;
        header.compressed_size64 = compressed;
        header.uncompressed_size64 = uncompressed;
        header.compressed_size = compressed.min(UINT32_MAX) as u32;
        header.uncompressed_size = uncompressed.min(UINT32_MAX) as u32;
        header
    }

    #[test]
    fn local_header_zeroes_crc_and_sizes() {
        let mut header = finished_header("a.txt", 4, 2);
        header.flags = FLAG_DATA_DESCRIPTOR;
        header.extra = vec![1, 2];
        let bytes = encode_local_header(&header).unwrap();
        assert_eq!(bytes.len(), LOCAL_FILE_HEADER_LEN + 5 + 2);
        assert_eq!(u32_at(&bytes, 0), LOCAL_FILE_HEADER_SIGNATURE);
        assert_eq!(u16_at(&bytes, 6), FLAG_DATA_DESCRIPTOR);
        assert_eq!(u16_at(&bytes, 8), DEFLATE);
        assert_eq!(&bytes[14..26], &[0; 12]);
        assert_eq!(u16_at(&bytes, 26), 5);
        assert_eq!(u16_at(&bytes, 28), 2);
        assert_eq!(&bytes[30..35], b"a.txt");
    }

    #[test]
    fn data_descriptor_widens_for_large_entries() {
        let small = encode_data_descriptor(&finished_header("a", 3, 5)).unwrap();
        assert_eq!(small.len(), 16);
        assert_eq!(u32_at(&small, 0), DATA_DESCRIPTOR_SIGNATURE);
        assert_eq!(u32_at(&small, 8), 3);
        assert_eq!(u32_at(&small, 12), 5);

        let large = encode_data_descriptor(&finished_header("a", 3, 5 << 32)).unwrap();
        assert_eq!(large.len(), 24);
        assert_eq!(u64_at(&large, 8), 3);
        assert_eq!(u64_at(&large, 16), 5 << 32);
    }

    #[test]
    fn central_record_without_zip64() {
        let header = finished_header("a.txt", 4, 2);
        let bytes = encode_central_record(&header, 1234).unwrap();
        assert_eq!(bytes.len(), CENTRAL_DIRECTORY_LEN + 5);
        assert_eq!(u32_at(&bytes, 0), CENTRAL_DIRECTORY_SIGNATURE);
        assert_eq!(u32_at(&bytes, 16), 0xDEADBEEF);
        assert_eq!(u32_at(&bytes, 20), 4);
        assert_eq!(u32_at(&bytes, 24), 2);
        assert_eq!(u16_at(&bytes, 30), 0);
        assert_eq!(u32_at(&bytes, 42), 1234);
    }

    #[test]
    fn central_record_for_huge_entry_uses_sentinels_and_extra() {
        let size = (5u64 << 32) + 7;
        let mut header = finished_header("huge.bin", size - 100, size);
        header.extra = vec![0xAA];
        let bytes = encode_central_record(&header, 64).unwrap();

        assert_eq!(u32_at(&bytes, 20), 0xFFFF_FFFF);
        assert_eq!(u32_at(&bytes, 24), 0xFFFF_FFFF);
        assert_eq!(u32_at(&bytes, 42), 0xFFFF_FFFF);
        assert_eq!(u16_at(&bytes, 30), 1 + 28);

        // Own extra bytes come first, then the ZIP64 block
        let extra = &bytes[CENTRAL_DIRECTORY_LEN + 8..];
        assert_eq!(extra[0], 0xAA);
        assert_eq!(u16_at(extra, 1), ZIP64_EXTRA_ID);
        assert_eq!(u16_at(extra, 3), 24);
        assert_eq!(u64_at(extra, 5), size);
        assert_eq!(u64_at(extra, 13), size - 100);
        assert_eq!(u64_at(extra, 21), 64);
        // The header itself is left alone
        assert_eq!(header.extra, vec![0xAA]);
    }

    #[test]
    fn central_record_for_far_offset_uses_zip64() {
        let header = finished_header("late.txt", 1, 1);
        let bytes = encode_central_record(&header, 6 << 30).unwrap();
        assert_eq!(u32_at(&bytes, 42), 0xFFFF_FFFF);
        let extra = &bytes[CENTRAL_DIRECTORY_LEN + 8..];
        assert_eq!(u64_at(extra, 4), 1);
        assert_eq!(u64_at(extra, 20), 6 << 30);
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let mut header = finished_header("a.txt", 4, 2);
        header.extra = vec![0; 70_000];
        assert!(matches!(encode_local_header(&header), Err(WebApkError::ZipFieldTooLong("extra"))));

        let mut header = finished_header("a.txt", 4, 2);
        header.comment = "c".repeat(70_000);
        assert!(matches!(
            encode_central_record(&header, 0),
            Err(WebApkError::ZipFieldTooLong("comment"))
        ));
    }

    #[test]
    fn zip64_block_must_fit_in_the_extra_field() {
        let mut header = finished_header("big.bin", 1, 5 << 32);
        header.extra = vec![0; u16::MAX as usize - 27];
        assert!(matches!(
            encode_central_record(&header, 0),
            Err(WebApkError::ZipFieldTooLong("extra"))
        ));

        header.extra.truncate(u16::MAX as usize - 28);
        let bytes = encode_central_record(&header, 0).unwrap();
        assert_eq!(u16_at(&bytes, 30), u16::MAX);
    }

    #[test]
    fn exactly_max_records_switch_to_zip64_end() {
        let bytes = encode_directory_end(UINT16_MAX - 1, 100, 200).unwrap();
        assert_eq!(bytes.len(), END_OF_CENTRAL_DIRECTORY_LEN);
        assert_eq!(u16_at(&bytes, 10), 0xFFFE);

        // 0xFFFF in the classic record means "look for ZIP64", so a real
        // count of 65535 has to go there too
        let bytes = encode_directory_end(UINT16_MAX, 100, 200).unwrap();
        assert_eq!(
            bytes.len(),
            ZIP64_END_OF_CENTRAL_DIRECTORY_LEN + ZIP64_END_LOCATOR_LEN + END_OF_CENTRAL_DIRECTORY_LEN
        );
        assert_eq!(u64_at(&bytes, 32), 65_535);
        let end = &bytes[ZIP64_END_OF_CENTRAL_DIRECTORY_LEN + ZIP64_END_LOCATOR_LEN..];
        assert_eq!(u16_at(end, 10), 0xFFFF);
    }

    #[test]
    fn small_directory_gets_classic_end_only() {
        let bytes = encode_directory_end(3, 100, 250).unwrap();
        assert_eq!(bytes.len(), END_OF_CENTRAL_DIRECTORY_LEN);
        assert_eq!(u32_at(&bytes, 0), END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        assert_eq!(u16_at(&bytes, 8), 3);
        assert_eq!(u16_at(&bytes, 10), 3);
        assert_eq!(u32_at(&bytes, 12), 150);
        assert_eq!(u32_at(&bytes, 16), 100);
    }

    #[test]
    fn many_records_force_zip64_end() {
        let bytes = encode_directory_end(70_000, 100, 5_000_100).unwrap();
        assert_eq!(
            bytes.len(),
            ZIP64_END_OF_CENTRAL_DIRECTORY_LEN + ZIP64_END_LOCATOR_LEN + END_OF_CENTRAL_DIRECTORY_LEN
        );
        assert_eq!(u32_at(&bytes, 0), ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE);
        assert_eq!(u64_at(&bytes, 4), 44);
        assert_eq!(u64_at(&bytes, 32), 70_000);
        assert_eq!(u64_at(&bytes, 40), 5_000_000);
        assert_eq!(u64_at(&bytes, 48), 100);

        let locator = &bytes[ZIP64_END_OF_CENTRAL_DIRECTORY_LEN..];
        assert_eq!(u32_at(locator, 0), ZIP64_END_LOCATOR_SIGNATURE);
        assert_eq!(u64_at(locator, 8), 5_000_100);
        assert_eq!(u32_at(locator, 16), 1);

        let end = &bytes[ZIP64_END_OF_CENTRAL_DIRECTORY_LEN + ZIP64_END_LOCATOR_LEN..];
        assert_eq!(u16_at(end, 10), 0xFFFF);
        assert_eq!(u32_at(end, 12), 0xFFFF_FFFF);
        assert_eq!(u32_at(end, 16), 0xFFFF_FFFF);
    }
}
