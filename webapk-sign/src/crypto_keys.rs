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

use std::{
    fs,
    path::{Path, PathBuf}
};

use crate::{
    crypto::{sign_data, sign_digest},
    signing_types::{HashAlgorithm, KeyAlgorithm}
};
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePublicKey},
    RsaPrivateKey, RsaPublicKey
};
use tracing::debug;
use webapk_common::*;

/// PEM tags accepted for RSA private keys.
const RSA_KEY_TAGS: &[&str] = &["RSA PRIVATE KEY", "PRIVATE KEY"];

type KeyParser = fn(&[u8]) -> Result<RsaPrivateKey>;

/// Encodings tried in order until one accepts the key.
const PRIVATE_KEY_PARSERS: &[(&str, KeyParser)] = &[("PKCS#1", parse_pkcs1), ("PKCS#8", parse_pkcs8)];

fn parse_pkcs1(der: &[u8]) -> Result<RsaPrivateKey> {
    Ok(RsaPrivateKey::from_pkcs1_der(der)?)
}

fn parse_pkcs8(der: &[u8]) -> Result<RsaPrivateKey> {
    Ok(RsaPrivateKey::from_pkcs8_der(der)?)
}

/// A private key used for signing, described by where it comes from and
/// which algorithms it's used with.
///
/// Nothing is read or parsed until [resolve](SigningKey::resolve) is called.
/// The source is either `key_path`, when set, or `key_bytes`.
pub struct SigningKey {
    pub key_path: Option<PathBuf>,
    /// PEM text, used when there's no `key_path`.
    pub key_bytes: Vec<u8>,
    pub key_type: KeyAlgorithm,
    pub hash: HashAlgorithm,
    key: Option<RsaPrivateKey>
}

impl SigningKey {
    pub fn from_path(path: impl Into<PathBuf>, key_type: KeyAlgorithm, hash: HashAlgorithm) -> Self {
        SigningKey {
            key_path: Some(path.into()),
            key_bytes: vec![],
            key_type,
            hash,
            key: None
        }
    }

    pub fn from_pem(pem: impl Into<Vec<u8>>, key_type: KeyAlgorithm, hash: HashAlgorithm) -> Self {
        SigningKey {
            key_path: None,
            key_bytes: pem.into(),
            key_type,
            hash,
            key: None
        }
    }

    /// Wraps a key that's already been parsed. Resolving it only checks the
    /// algorithms.
    pub fn from_private_key(key: RsaPrivateKey, hash: HashAlgorithm) -> Self {
        SigningKey {
            key_path: None,
            key_bytes: vec![],
            key_type: KeyAlgorithm::Rsa,
            hash,
            key: Some(key)
        }
    }

    /// Checks the algorithms, then loads and parses the key.
    ///
    /// The first PEM block in the source is the only one looked at, anything
    /// after it is ignored. For RSA it must be tagged `RSA PRIVATE KEY` or
    /// `PRIVATE KEY` and is read as PKCS#1, falling back to PKCS#8. When both
    /// fail the PKCS#8 error is returned.
    pub fn resolve(&mut self) -> Result<()> {
        self.key_type.require_supported()?;
        self.hash.require_supported()?;

        if self.key_path.is_none() && self.key.is_some() {
            return Ok(());
        }

        let source = match &self.key_path {
            Some(path) => load_source(path)?,
            None => self.key_bytes.clone()
        };

        let block = pem::parse(&source)?;
        if !RSA_KEY_TAGS.contains(&block.tag()) {
            return Err(WebApkError::SignerUnexpectedPemTag(block.tag().into()));
        }

        self.key = Some(parse_rsa_private_key(block.contents())?);
        Ok(())
    }

    /// The parsed key, once resolved.
    pub fn key(&self) -> Option<&RsaPrivateKey> {
        self.key.as_ref()
    }

    pub fn public_key(&self) -> Result<RsaPublicKey> {
        Ok(self.resolved()?.to_public_key())
    }

    /// Returns the public key encoded as ASN.1 DER SubjectPublicKeyInfo.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.public_key()?.to_public_key_der()?.as_ref().to_vec())
    }

    /// Hashes `data` with `hash` and signs the digest with PKCS#1 v1.5.
    pub fn sign(&self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        sign_data(self.resolved()?, data, hash)
    }

    /// Signs a digest computed elsewhere. Its length must match `hash`.
    pub fn sign_prehashed(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        sign_digest(self.resolved()?, digest, hash)
    }

    fn resolved(&self) -> Result<&RsaPrivateKey> {
        self.key.as_ref().ok_or(WebApkError::SignerKeyNotResolved)
    }
}

fn parse_rsa_private_key(der: &[u8]) -> Result<RsaPrivateKey> {
    let mut result = Err(WebApkError::SignerRsaPrivateKeyParsingFailed(
        rsa::pkcs8::Error::KeyMalformed
    ));
    for (encoding, parse) in PRIVATE_KEY_PARSERS {
        result = parse(der);
        match &result {
            Ok(_) => break,
            Err(err) => debug!(encoding, ?err, "private key isn't in this encoding")
        }
    }
    result
}

/// Reads a key or certificate file. Paths are made absolute first so errors
/// name the file that was actually looked at.
pub(crate) fn load_source(path: &Path) -> Result<Vec<u8>> {
    let path = std::path::absolute(path)?;
    let metadata = fs::metadata(&path).inspect_err(|err| {
        debug!(path = %path.display(), %err, "couldn't stat signing source");
    })?;
    if metadata.is_dir() {
        return Err(WebApkError::SignerSourceIsDirectory(path));
    }
    Ok(fs::read(&path)?)
}

/// PEM text for a randomly generated RSA key and a certificate self-signed
/// with it.
#[cfg(feature = "cert-gen")]
pub struct TestingPem {
    /// PKCS#8, tagged `PRIVATE KEY`
    pub private_key: String,
    pub certificate: String
}

/// Randomly generates a 2048-bit RSA key and a self-signed certificate for it.
///
/// Only enabled with the "cert-gen" feature (on by default), since rcgen pulls
/// in a non-trivial amount of crypto code.
///
/// Generating the key takes a noticeable amount of time. Never sign anything
/// you intend to publish with these, updates must be signed with the same key.
#[cfg(feature = "cert-gen")]
pub fn generate_random_testing_pem() -> Result<TestingPem> {
    // These dependencies only exist when compiled with cert-gen
    use rand::thread_rng;
    use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
    use rsa::pkcs8::{EncodePrivateKey, LineEnding};

    tracing::warn!("Randomly generating a placeholder signing key. This is slow!");

    let private_key = RsaPrivateKey::new(&mut thread_rng(), 2048)?;
    let private_key_pem = private_key.to_pkcs8_pem(LineEnding::LF)?.to_string();

    let failed = |err: rcgen::Error| WebApkError::SignerTestingCertificateFailed(err.to_string());
    let key_pair = KeyPair::from_pem(&private_key_pem).map_err(failed)?;
    // Testing certificates are issued to our crate name
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(DnType::CommonName, env!("CARGO_PKG_NAME"));
    let mut cert_params = CertificateParams::new(vec![]).map_err(failed)?;
    cert_params.distinguished_name = distinguished_name;
    let cert = cert_params.self_signed(&key_pair).map_err(failed)?;

    Ok(TestingPem {
        private_key: private_key_pem,
        certificate: cert.pem()
    })
}
