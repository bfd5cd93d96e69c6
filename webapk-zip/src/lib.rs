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

//! # webapk-zip
//!
//! Streams entries into a ZIP container the way APKs need them: every entry
//! ends in a data descriptor, ZIP64 records appear only once a limit is
//! crossed, and uncompressed entries can be 4-byte aligned.
//!
//! ```
//! use webapk_zip::ContainerWriter;
//!
//! let mut apk = vec![];
//! let mut zip = ContainerWriter::new(&mut apk);
//! zip.create("assets/index.html")?.write_all(b"<html></html>")?;
//! zip.finish()?;
//! # Ok::<(), webapk_common::WebApkError>(())
//! ```
//!
//! Existing containers are patched by indexing them with [ArchiveIndex] and
//! continuing with [ContainerWriter::append_to], or rebuilt entry by entry
//! with [ContainerWriter::copy].

use std::io::Write;

use webapk_common::*;

mod compress;
mod header;
mod index;
mod records;
mod writer;

pub use compress::{builtin_compressor, Compressor, Deflated, EntryCompressor, Stored};
pub use header::{validate_entry_name, FileHeader, DEFLATE, FLAG_DATA_DESCRIPTOR, STORE};
pub use index::{ArchiveIndex, SourceArchive, SourceEntry};
pub use records::{
    encode_central_record, encode_data_descriptor, encode_directory_end, encode_local_header
};
pub use writer::{ContainerWriter, CountingWriter, EntryWriter};

pub struct File {
    pub path: String,
    pub data: Vec<u8>
}

const UNCOMPRESSED_FILES: &[&str] = &["resources.arsc"];

/// Writes `files` as a 4-byte aligned container.
// Output can be a file *or* a buffer in memory
pub fn zip_apk<T: Write>(files: &[File], output: T) -> Result<()> {
    let mut zip = ContainerWriter::new(output);
    zip.set_alignment(Some(4));

    for file in files {
        // Some files in APKs are not allowed to be compressed
        let method = if UNCOMPRESSED_FILES.contains(&&file.path[..]) {
            STORE
        } else {
            DEFLATE
        };
        let mut entry = zip.create_header(FileHeader::new(file.path.clone()).with_method(method))?;
        entry.write_all(&file.data)?;
    }

    zip.finish()
}
