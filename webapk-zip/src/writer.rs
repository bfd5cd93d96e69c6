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

use std::collections::HashMap;
use std::io::{self, BufWriter, Read, Write};

use tracing::debug;
use webapk_common::*;

use crate::compress::{builtin_compressor, Compressor, EntryCompressor};
use crate::header::*;
use crate::index::SourceArchive;
use crate::records::*;

/// Passes writes through to `inner`, counting how many bytes made it.
pub struct CountingWriter<W: Write> {
    inner: W,
    count: u64
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> CountingWriter<W> {
        CountingWriter { inner, count: 0 }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.count += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// A slot in the central directory. `None` once superseded by a later entry
// with the same name, so indices of the remaining slots never move.
struct DirectoryEntry {
    header: FileHeader,
    offset: u64
}

// State of the entry currently being written
struct EntrySession {
    index: usize,
    compressor: Option<Box<dyn EntryCompressor>>,
    crc32: crc32fast::Hasher,
    // Bytes fed in, before compression
    raw_count: u64,
    // Stream position where compressed data starts
    data_start: u64,
    closed: bool
}

/// Writes a ZIP container to any byte sink.
///
/// Entries are written one at a time with [ContainerWriter::create] or
/// [ContainerWriter::create_header], each returning an [EntryWriter] for its
/// contents. Sizes and CRCs are never known up front, so every entry gets a
/// trailing data descriptor. Nothing is valid until [ContainerWriter::finish]
/// has written the central directory.
///
/// Not safe to share between threads; use one writer per container.
pub struct ContainerWriter<W: Write> {
    out: CountingWriter<BufWriter<W>>,
    dir: Vec<Option<DirectoryEntry>>,
    names: HashMap<String, usize>,
    last: Option<EntrySession>,
    closed: bool,
    compressors: HashMap<u16, Compressor>,
    alignment: Option<u16>
}

impl<W: Write> ContainerWriter<W> {
    pub fn new(sink: W) -> ContainerWriter<W> {
        ContainerWriter {
            out: CountingWriter::new(BufWriter::new(sink)),
            dir: vec![],
            names: HashMap::new(),
            last: None,
            closed: false,
            compressors: HashMap::new(),
            alignment: None
        }
    }

    /// Starts a writer that adds to an existing container.
    ///
    /// `sink` must already hold the source's bytes up to
    /// [SourceArchive::append_offset], since the source's entries are kept
    /// where they are and only listed again in the new central directory.
    /// An entry named `reserved_name` is left out so a replacement can be
    /// written later.
    pub fn append_to<A: SourceArchive>(
        source: &A,
        sink: W,
        reserved_name: Option<&str>
    ) -> ContainerWriter<W> {
        let mut writer = ContainerWriter::new(sink);
        writer.out.count = source.append_offset();
        writer.dir.reserve(source.entries().len() * 3 / 2);
        for entry in source.entries() {
            if reserved_name == Some(entry.header.name.as_str()) {
                debug!(name = %entry.header.name, "leaving out reserved entry");
                continue;
            }
            writer.push_entry(entry.header.clone(), entry.header_offset);
        }
        writer
    }

    /// Sets where the container starts within the sink, for containers
    /// written after other data such as an executable stub.
    ///
    /// # Panics
    ///
    /// If any bytes have already been written.
    pub fn set_offset(&mut self, offset: u64) {
        assert_eq!(self.out.count, 0, "set_offset called after data was written");
        self.out.count = offset;
    }

    /// Uses `compressor` for entries with `method`, overriding built-ins.
    pub fn register_compressor(&mut self, method: u16, compressor: Compressor) {
        self.compressors.insert(method, compressor);
    }

    /// Aligns the data of uncompressed entries to `alignment` bytes as they
    /// are written. `None` turns it off again.
    pub fn set_alignment(&mut self, alignment: Option<u16>) {
        self.alignment = alignment;
    }

    /// Current position in the output stream.
    pub fn offset(&self) -> u64 {
        self.out.count()
    }

    /// Adds a DEFLATE-compressed entry called `name`.
    pub fn create(&mut self, name: &str) -> Result<EntryWriter<'_, W>> {
        self.create_header(FileHeader::new(name))
    }

    /// Adds an entry described by `header`. Any entry still open is closed
    /// first. An earlier entry with the same name is dropped from the
    /// central directory.
    pub fn create_header(&mut self, mut header: FileHeader) -> Result<EntryWriter<'_, W>> {
        self.close_last()?;
        validate_entry_name(&header.name)?;

        header.flags |= FLAG_DATA_DESCRIPTOR;
        // Keep the compatibility byte
        header.creator_version = (header.creator_version & 0xFF00) | ZIP_VERSION_20;
        header.reader_version = ZIP_VERSION_20;

        let compressor = self.compressor(header.method)?;
        let offset = self.out.count();
        if let Some(alignment) = self.alignment {
            if header.method == STORE {
                header.pad_extra_for_alignment(offset, alignment);
            }
        }
        self.out.write_all(&encode_local_header(&header)?)?;

        debug!(name = %header.name, method = header.method, offset, "opened entry");
        let index = self.push_entry(header, offset);
        self.last = Some(EntrySession {
            index,
            compressor: Some(compressor),
            crc32: crc32fast::Hasher::new(),
            raw_count: 0,
            data_start: self.out.count(),
            closed: false
        });
        Ok(EntryWriter { container: self })
    }

    /// Copies an entry from another container without recompressing it.
    ///
    /// `compressed` must yield exactly the entry's compressed bytes. The CRC
    /// and sizes in `source` are trusted as they are.
    pub fn copy<R: Read>(&mut self, source: &FileHeader, compressed: R) -> Result<()> {
        self.close_last()?;
        validate_entry_name(&source.name)?;

        let mut header = source.clone();
        header.flags |= FLAG_DATA_DESCRIPTOR;
        // The 64-bit sizes are the ones trusted, the 32-bit ones are derived
        header.settle_sizes();
        let offset = self.out.count();
        if let Some(alignment) = self.alignment {
            header.pad_extra_for_alignment(offset, alignment);
        }
        self.out.write_all(&encode_local_header(&header)?)?;

        let expected = header.compressed_size64;
        let copied = io::copy(&mut compressed.take(expected), &mut self.out)?;
        if copied != expected {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} ended after {copied} of {expected} bytes", header.name)
            )
            .into());
        }
        self.out.write_all(&encode_data_descriptor(&header)?)?;

        debug!(name = %header.name, offset, size = expected, "copied entry");
        self.push_entry(header, offset);
        Ok(())
    }

    /// Flushes buffered output to the sink.
    pub fn flush(&mut self) -> Result<()> {
        Ok(self.out.flush()?)
    }

    /// Finishes the container by writing the central directory and end
    /// records. It does not close the sink itself.
    pub fn finish(&mut self) -> Result<()> {
        self.close_last()?;
        if self.closed {
            return Err(WebApkError::ZipWriterClosedTwice);
        }
        self.closed = true;

        let directory_offset = self.out.count();
        let mut records = 0;
        // Superseded slots are skipped
        for entry in self.dir.iter().flatten() {
            records += 1;
            let record = encode_central_record(&entry.header, entry.offset)?;
            self.out.write_all(&record)?;
        }
        let directory_end = self.out.count();

        let end = encode_directory_end(records, directory_offset, directory_end)?;
        self.out.write_all(&end)?;
        debug!(records, directory_offset, "finished container");
        self.flush()
    }

    /// Hands back the sink, flushing anything still buffered.
    pub fn into_inner(self) -> Result<W> {
        self.out
            .inner
            .into_inner()
            .map_err(|err| err.into_error().into())
    }

    fn compressor(&self, method: u16) -> Result<Box<dyn EntryCompressor>> {
        match self.compressors.get(&method) {
            Some(make) => Ok(make()?),
            None => builtin_compressor(method).ok_or(WebApkError::ZipUnsupportedCompression(method))
        }
    }

    // Adds a directory slot, retiring any earlier slot with the same name
    fn push_entry(&mut self, header: FileHeader, offset: u64) -> usize {
        let index = self.dir.len();
        if let Some(previous) = self.names.insert(header.name.clone(), index) {
            debug!(name = %header.name, previous, "superseding earlier entry");
            self.dir[previous] = None;
        }
        self.dir.push(Some(DirectoryEntry { header, offset }));
        index
    }

    fn close_last(&mut self) -> Result<()> {
        let open = matches!(&self.last, Some(session) if !session.closed);
        if open {
            self.close_entry()?;
        }
        Ok(())
    }

    fn write_entry(&mut self, data: &[u8]) -> Result<()> {
        let session = match self.last.as_mut() {
            Some(session) if !session.closed => session,
            _ => return Err(WebApkError::ZipWriteToClosedEntry)
        };
        let Some(compressor) = session.compressor.as_mut() else {
            return Err(WebApkError::ZipWriteToClosedEntry);
        };
        session.crc32.update(data);
        session.raw_count += data.len() as u64;
        let compressed = compressor.compress(data)?;
        self.out.write_all(&compressed)?;
        Ok(())
    }

    fn close_entry(&mut self) -> Result<()> {
        let session = match self.last.as_mut() {
            Some(session) if !session.closed => session,
            _ => return Err(WebApkError::ZipEntryClosedTwice)
        };
        session.closed = true;
        if let Some(compressor) = session.compressor.take() {
            self.out.write_all(&compressor.finish()?)?;
        }

        let crc32 = session.crc32.clone().finalize();
        let compressed_size = self.out.count() - session.data_start;
        let uncompressed_size = session.raw_count;
        let Some(entry) = self.dir.get_mut(session.index).and_then(Option::as_mut) else {
            // Only a later entry can supersede this one, and that closes us first
            unreachable!("open entry was superseded")
        };

        let header = &mut entry.header;
        header.crc32 = crc32;
        header.compressed_size64 = compressed_size;
        header.uncompressed_size64 = uncompressed_size;
        header.settle_sizes();
        debug!(name = %header.name, crc32, compressed_size, uncompressed_size, "closed entry");

        let descriptor = encode_data_descriptor(header)?;
        self.out.write_all(&descriptor)?;
        Ok(())
    }
}

/// Handle for writing the contents of one entry.
///
/// The entry is closed by [EntryWriter::close], or implicitly when the next
/// entry is created or the container is finished.
pub struct EntryWriter<'a, W: Write> {
    container: &'a mut ContainerWriter<W>
}

impl<W: Write> EntryWriter<'_, W> {
    /// Compresses `data` into the entry.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.container.write_entry(data)
    }

    /// Finishes the entry, writing its data descriptor. Closing twice is an
    /// error.
    pub fn close(&mut self) -> Result<()> {
        self.container.close_entry()
    }
}

impl<W: Write> Write for EntryWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.container.write_entry(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(self.container.flush()?)
    }
}
