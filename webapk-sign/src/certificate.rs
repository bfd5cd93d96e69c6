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

use std::path::PathBuf;

use crate::{
    crypto_keys::{load_source, SigningKey},
    signing_types::{HashAlgorithm, KeyAlgorithm}
};
use rasn::Decode;
use rasn_pkix::Certificate;
use rsa::{pkcs8::DecodePublicKey, traits::PublicKeyParts, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use webapk_common::*;

struct Resolved {
    certificate: Certificate,
    der: Vec<u8>,
    hash: String
}

/// A [SigningKey] paired with the X.509 certificate that vouches for it.
///
/// The certificate comes from `cert_bytes` when set, otherwise from
/// `cert_path`. [resolve](SigningCertificate::resolve) must succeed before
/// the certificate or its fingerprint can be read.
pub struct SigningCertificate {
    pub signing_key: SigningKey,
    pub cert_path: Option<PathBuf>,
    /// PEM text
    pub cert_bytes: Option<Vec<u8>>,
    resolved: Option<Resolved>
}

impl SigningCertificate {
    pub fn from_path(signing_key: SigningKey, cert_path: impl Into<PathBuf>) -> Self {
        SigningCertificate {
            signing_key,
            cert_path: Some(cert_path.into()),
            cert_bytes: None,
            resolved: None
        }
    }

    pub fn from_pem(signing_key: SigningKey, cert_pem: impl Into<Vec<u8>>) -> Self {
        SigningCertificate {
            signing_key,
            cert_path: None,
            cert_bytes: Some(cert_pem.into()),
            resolved: None
        }
    }

    /// Resolves the key, then loads the certificate and checks that it
    /// carries the key's public half.
    ///
    /// Errors from the key are returned unchanged. Only the first PEM block of
    /// the certificate source is decoded.
    pub fn resolve(&mut self) -> Result<()> {
        self.signing_key.resolve()?;

        let source = match (&self.cert_bytes, &self.cert_path) {
            (Some(bytes), _) => bytes.clone(),
            (None, Some(path)) => load_source(path)?,
            (None, None) => vec![]
        };
        let block = pem::parse(&source)?;
        let der = block.into_contents();
        let certificate = Certificate::decode(&mut rasn::ber::de::Decoder::new(
            &der,
            rasn::ber::de::DecoderOptions::der()
        ))?;
        let hash = format!("{:x}", Sha256::digest(&der));
        debug!(%hash, "decoded signing certificate");

        match self.signing_key.key_type {
            KeyAlgorithm::Rsa => {
                let private_key = self
                    .signing_key
                    .key()
                    .ok_or(WebApkError::SignerKeyNotResolved)?;
                check_rsa_key(&certificate, private_key)?;
            }
            KeyAlgorithm::Ec => {
                return Err(WebApkError::SignerUnsupportedKeyAlgorithm(
                    "elliptic curve keys are not supported".into()
                ));
            }
        }

        self.resolved = Some(Resolved {
            certificate,
            der,
            hash
        });
        Ok(())
    }

    pub fn certificate(&self) -> Option<&Certificate> {
        self.resolved.as_ref().map(|resolved| &resolved.certificate)
    }

    /// The certificate in ASN.1 DER form, as it was read.
    pub fn certificate_der(&self) -> Option<&[u8]> {
        self.resolved.as_ref().map(|resolved| &resolved.der[..])
    }

    /// Lowercase hex SHA-256 of [certificate_der](SigningCertificate::certificate_der).
    pub fn cert_hash(&self) -> Option<&str> {
        self.resolved.as_ref().map(|resolved| &resolved.hash[..])
    }

    pub fn key(&self) -> Option<&RsaPrivateKey> {
        self.signing_key.key()
    }

    pub fn sign(&self, data: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        self.signing_key.sign(data, hash)
    }

    pub fn sign_prehashed(&self, digest: &[u8], hash: HashAlgorithm) -> Result<Vec<u8>> {
        self.signing_key.sign_prehashed(digest, hash)
    }
}

fn check_rsa_key(certificate: &Certificate, private_key: &RsaPrivateKey) -> Result<()> {
    let spki = rasn::der::encode(&certificate.tbs_certificate.subject_public_key_info)?;
    let public_key = match RsaPublicKey::from_public_key_der(&spki) {
        Ok(public_key) => public_key,
        Err(rsa::pkcs8::spki::Error::OidUnknown { .. }) => {
            return Err(WebApkError::SignerCertificateKeyTypeMismatch);
        }
        Err(err) => return Err(err.into())
    };

    if public_key.n() != private_key.n() || public_key.e() != private_key.e() {
        warn!(
            certificate_exponent = %public_key.e(),
            key_exponent = %private_key.e(),
            "certificate public key doesn't belong to the signing key"
        );
        return Err(WebApkError::SignerCertificateKeyMismatch);
    }
    Ok(())
}
