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

use std::io::{self, Write};
use std::mem;

use flate2::{write::DeflateEncoder, Compression};

use crate::header::{DEFLATE, STORE};

/// A compression stream for a single entry.
///
/// Output is handed back to the caller as it becomes available rather than
/// written somewhere, so the container writer stays the only owner of the
/// byte sink.
pub trait EntryCompressor {
    /// Feeds `data` in and returns whatever compressed bytes are ready.
    fn compress(&mut self, data: &[u8]) -> io::Result<Vec<u8>>;
    /// Ends the stream and returns the remaining compressed bytes.
    fn finish(self: Box<Self>) -> io::Result<Vec<u8>>;
}

/// Creates a fresh [EntryCompressor] for each entry that uses its method.
pub type Compressor = Box<dyn Fn() -> io::Result<Box<dyn EntryCompressor>>>;

pub struct Stored;

impl EntryCompressor for Stored {
    fn compress(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        Ok(vec![])
    }
}

pub struct Deflated(DeflateEncoder<Vec<u8>>);

impl Deflated {
    pub fn new(level: Compression) -> Deflated {
        Deflated(DeflateEncoder::new(vec![], level))
    }
}

impl EntryCompressor for Deflated {
    fn compress(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        self.0.write_all(data)?;
        // The encoder only ever appends to its writer, so taking what's there is safe
        Ok(mem::take(self.0.get_mut()))
    }

    fn finish(self: Box<Self>) -> io::Result<Vec<u8>> {
        let Deflated(encoder) = *self;
        encoder.finish()
    }
}

/// Compressors available on every writer without registration.
pub fn builtin_compressor(method: u16) -> Option<Box<dyn EntryCompressor>> {
    match method {
        STORE => Some(Box::new(Stored)),
        DEFLATE => Some(Box::new(Deflated::new(Compression::default()))),
        _ => None
    }
}
