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

use std::{io, path::PathBuf, rc::Rc};

use deku::prelude::*;
use rsa::{pkcs1, pkcs8};

/// Common error type making it easier to share `Result`s between webapk crates.
///
/// In general designed to avoid needing utilities like `map_err`.
#[derive(Debug, Clone)]
pub enum WebApkError {
    /// webapk-cli encountered an error while processing something specific to
    /// the command line implementation. For example, not enough arguments were
    /// passed via the shell.
    Cli(String),
    /// Reading or writing the underlying storage or byte sink failed. The
    /// original [io::Error] is kept as-is so callers can tell transport
    /// failures apart from format or trust failures.
    FileIoError(Rc<io::Error>),
    /// A fixed-layout binary record failed to serialise. See [DekuError].
    ByteSerialisationFailed(DekuError),

    /// Entry names must be relative, forward-slash separated paths without a
    /// leading slash or drive letter.
    ZipInvalidEntryName(String),
    /// No compressor is registered on the writer or built in for this method.
    ZipUnsupportedCompression(u16),
    /// An entry's name, extra field or comment doesn't fit its 16-bit length
    /// field. Holds which of them.
    ZipFieldTooLong(&'static str),
    /// An entry write session was closed a second time.
    ///
    /// **This is a bug in the calling code, retrying won't help.**
    ZipEntryClosedTwice,
    /// Bytes were written to an entry after its session was closed.
    ///
    /// **This is a bug in the calling code, retrying won't help.**
    ZipWriteToClosedEntry,
    /// The container was finalised a second time.
    ///
    /// **This is a bug in the calling code, retrying won't help.**
    ZipWriterClosedTwice,
    /// An existing container couldn't be indexed. The message names the
    /// structure that was missing or malformed.
    ZipParsingFailed(&'static str),

    /// Only RSA signing keys are supported.
    SignerUnsupportedKeyAlgorithm(String),
    /// Only SHA-256 and SHA-512 are supported for signing.
    SignerUnsupportedHashAlgorithm(String),
    /// A key or certificate path resolved to a directory.
    SignerSourceIsDirectory(PathBuf),
    /// Key or certificate bytes don't contain a PEM block.
    SignerPemParsingFailed(Rc<pem::PemError>),
    /// The first PEM block didn't have the tag we expected, eg. a certificate
    /// was passed where a private key belongs.
    SignerUnexpectedPemTag(String),
    /// The `PRIVATE KEY` block couldn't be read as a PKCS#1 RSA key.
    SignerRsaPkcs1ParsingFailed(pkcs1::Error),
    /// The `PRIVATE KEY` block couldn't be read as a PKCS#8 RSA key.
    SignerRsaPrivateKeyParsingFailed(pkcs8::Error),
    /// A signing operation was attempted before `resolve()` succeeded.
    ///
    /// **This is a bug in the calling code, retrying won't help.**
    SignerKeyNotResolved,
    /// The digest passed for signing doesn't have the length the hash
    /// algorithm produces.
    SignerDigestLengthMismatch { expected: usize, actual: usize },
    /// An error occurred while signing a hash, see [rsa::Error].
    SignerRsaSigningFailed(Rc<rsa::Error>),
    /// An error occurred while serialising the RSA key, see
    /// [pkcs8::spki::Error].
    SignerRsaKeySerialisationFailed(pkcs8::spki::Error),
    /// The signing certificate couldn't be decoded as X.509 DER.
    SignerCertificateDecodingFailed(Rc<rasn::error::DecodeError>),
    /// Part of the signing certificate couldn't be re-encoded.
    SignerCertificateEncodingFailed(Rc<rasn::error::EncodeError>),
    /// The key was RSA but the certificate carries some other kind of
    /// public key.
    SignerCertificateKeyTypeMismatch,
    /// The certificate's public key is not the public half of the private
    /// key. Never ignore this one.
    SignerCertificateKeyMismatch,
    /// Self-signing a throwaway testing certificate failed.
    SignerTestingCertificateFailed(String)
}

/// Result type where the error is always [WebApkError].
pub type Result<T> = std::result::Result<T, WebApkError>;

impl WebApkError {
    /// True for errors caused by using an API out of order. These are bugs in
    /// the caller rather than problems with the data or the environment.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            WebApkError::ZipEntryClosedTwice
                | WebApkError::ZipWriteToClosedEntry
                | WebApkError::ZipWriterClosedTwice
                | WebApkError::SignerKeyNotResolved
        )
    }
}

impl From<WebApkError> for String {
    fn from(value: WebApkError) -> Self {
        format!("{:?}", value)
    }
}

/// Lets [WebApkError] travel through `std::io::Write` implementations.
impl From<WebApkError> for io::Error {
    fn from(value: WebApkError) -> Self {
        match value {
            WebApkError::FileIoError(err) => io::Error::new(err.kind(), err.to_string()),
            misuse if misuse.is_misuse() => {
                io::Error::new(io::ErrorKind::InvalidInput, String::from(misuse))
            }
            other => io::Error::other(String::from(other))
        }
    }
}

// Automatic conversion from other types of error to WebApkError makes the rest of the code cleaner
impl From<io::Error> for WebApkError {
    fn from(value: io::Error) -> Self {
        WebApkError::FileIoError(value.into())
    }
}

impl From<DekuError> for WebApkError {
    fn from(value: DekuError) -> Self {
        WebApkError::ByteSerialisationFailed(value)
    }
}

impl From<pem::PemError> for WebApkError {
    fn from(value: pem::PemError) -> Self {
        WebApkError::SignerPemParsingFailed(value.into())
    }
}

impl From<pkcs1::Error> for WebApkError {
    fn from(value: pkcs1::Error) -> Self {
        WebApkError::SignerRsaPkcs1ParsingFailed(value)
    }
}

impl From<pkcs8::Error> for WebApkError {
    fn from(value: pkcs8::Error) -> Self {
        WebApkError::SignerRsaPrivateKeyParsingFailed(value)
    }
}

impl From<rsa::Error> for WebApkError {
    fn from(value: rsa::Error) -> Self {
        WebApkError::SignerRsaSigningFailed(value.into())
    }
}

impl From<pkcs8::spki::Error> for WebApkError {
    fn from(value: pkcs8::spki::Error) -> Self {
        WebApkError::SignerRsaKeySerialisationFailed(value)
    }
}

impl From<rasn::error::DecodeError> for WebApkError {
    fn from(value: rasn::error::DecodeError) -> Self {
        WebApkError::SignerCertificateDecodingFailed(value.into())
    }
}

impl From<rasn::error::EncodeError> for WebApkError {
    fn from(value: rasn::error::EncodeError) -> Self {
        WebApkError::SignerCertificateEncodingFailed(value.into())
    }
}
