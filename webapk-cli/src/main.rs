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

use input_dir::read_input_dir;
use std::io::Write;
use std::path::Path;
use std::{env, fs};
use tracing::info;
use tracing_subscriber::EnvFilter;
use webapk_common::{Result, WebApkError};
use webapk_sign::{HashAlgorithm, KeyAlgorithm, SigningCertificate, SigningKey};
use webapk_zip::{zip_apk, ArchiveIndex, ContainerWriter, SourceArchive};

pub mod input_dir;

const MANIFEST: &str = "AndroidManifest.xml";

const USAGE: &str = "usage:
    webapk-cli pack <dir> <out.apk>
    webapk-cli patch <in.apk> <out.apk> <entry>=<file>...
    webapk-cli align <in.apk> <out.apk>
    webapk-cli sign <key.pem> <cert.pem> <input> <out.sig>";

/// Builds, patches, aligns and signs APK containers.
///
/// ```
/// $ ls ./webapp
/// AndroidManifest.xml resources.arsc assets/
/// $ webapk-cli pack ./webapp app.apk
/// $ webapk-cli patch app.apk patched.apk AndroidManifest.xml=./NewManifest.xml
/// $ webapk-cli sign key.pem cert.pem patched.apk patched.sig
/// ```
///
/// Set `RUST_LOG=debug` to follow entries as they're written.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        return Err(WebApkError::Cli(USAGE.into()));
    };

    match (command.as_str(), rest) {
        ("pack", [dir, out]) => pack(Path::new(dir), Path::new(out)),
        ("patch", [input, out, replacements @ ..]) if !replacements.is_empty() => {
            patch(Path::new(input), Path::new(out), replacements)
        }
        ("align", [input, out]) => align(Path::new(input), Path::new(out)),
        ("sign", [key, cert, input, out]) => sign(key, cert, Path::new(input), Path::new(out)),
        _ => Err(WebApkError::Cli(USAGE.into()))
    }
}

fn pack(dir: &Path, out: &Path) -> Result<()> {
    let files = read_input_dir(dir)?;
    let apk = fs::File::create(out)?;
    zip_apk(&files, apk)?;
    println!("Wrote {} entries to {:?}", files.len(), out);
    Ok(())
}

/// Appends replacement entries after the existing ones and writes a new
/// central directory, leaving the original entry bytes untouched.
fn patch(input: &Path, out: &Path, replacements: &[String]) -> Result<()> {
    let mut files = vec![];
    for replacement in replacements {
        let (name, path) = replacement
            .split_once('=')
            .ok_or_else(|| WebApkError::Cli(format!("Expected <entry>=<file>, got {replacement}")))?;
        files.push((name, fs::read(path)?));
    }

    let apk = fs::read(input)?;
    let index = ArchiveIndex::parse(&apk)?;
    let mut sink = fs::File::create(out)?;
    sink.write_all(&apk[..index.append_offset() as usize])?;

    let reserved = files
        .iter()
        .any(|(name, _)| *name == MANIFEST)
        .then_some(MANIFEST);
    let mut zip = ContainerWriter::append_to(&index, sink, reserved);
    for (name, data) in &files {
        info!(name, "replacing entry");
        zip.create(name)?.write_all(data)?;
    }
    zip.finish()?;

    println!("Patched {} entries into {:?}", files.len(), out);
    Ok(())
}

/// Rebuilds the container with every uncompressed entry 4-byte aligned.
fn align(input: &Path, out: &Path) -> Result<()> {
    let apk = fs::read(input)?;
    let index = ArchiveIndex::parse(&apk)?;

    let mut zip = ContainerWriter::new(fs::File::create(out)?);
    zip.set_alignment(Some(4));
    for entry in index.entries() {
        zip.copy(&entry.header, index.compressed_data(&apk, entry)?)?;
    }
    zip.finish()?;

    println!("Aligned {} entries into {:?}", index.entries().len(), out);
    Ok(())
}

fn sign(key: &str, cert: &str, input: &Path, out: &Path) -> Result<()> {
    let signing_key = SigningKey::from_path(key, KeyAlgorithm::Rsa, HashAlgorithm::Sha256);
    let mut signer = SigningCertificate::from_path(signing_key, cert);
    signer.resolve()?;

    let signature = signer.sign(&fs::read(input)?, HashAlgorithm::Sha256)?;
    fs::write(out, signature)?;

    println!("Signed with certificate {}", signer.cert_hash().unwrap_or_default());
    Ok(())
}
