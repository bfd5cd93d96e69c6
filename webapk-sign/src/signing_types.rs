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

use rsa::Pkcs1v15Sign;
use sha2::{Digest, Sha256, Sha512};
use webapk_common::*;

/// Kind of key a [SigningKey](crate::SigningKey) holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    Rsa,
    /// Recognised so it can be rejected clearly. Not implemented.
    Ec
}

impl KeyAlgorithm {
    pub(crate) fn require_supported(self) -> Result<()> {
        match self {
            KeyAlgorithm::Rsa => Ok(()),
            KeyAlgorithm::Ec => Err(WebApkError::SignerUnsupportedKeyAlgorithm(
                "elliptic curve keys are not supported".into()
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha224,
    Sha256,
    Sha384,
    Sha512
}

impl HashAlgorithm {
    /// Only SHA-256 and SHA-512 may be used for signing.
    pub(crate) fn require_supported(self) -> Result<()> {
        match self {
            HashAlgorithm::Sha256 | HashAlgorithm::Sha512 => Ok(()),
            other => Err(WebApkError::SignerUnsupportedHashAlgorithm(format!("{other:?}")))
        }
    }

    /// Length in bytes of this algorithm's digests.
    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha224 => 28,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64
        }
    }

    /// Hashes `data`. Fails for algorithms that can't be used for signing.
    pub fn digest(self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            HashAlgorithm::Sha256 => Ok(Sha256::digest(data).to_vec()),
            HashAlgorithm::Sha512 => Ok(Sha512::digest(data).to_vec()),
            other => Err(WebApkError::SignerUnsupportedHashAlgorithm(format!("{other:?}")))
        }
    }

    /// PKCS#1 v1.5 padding carrying this algorithm's OID.
    pub(crate) fn pkcs1v15(self) -> Result<Pkcs1v15Sign> {
        match self {
            HashAlgorithm::Sha256 => Ok(Pkcs1v15Sign::new::<Sha256>()),
            HashAlgorithm::Sha512 => Ok(Pkcs1v15Sign::new::<Sha512>()),
            other => Err(WebApkError::SignerUnsupportedHashAlgorithm(format!("{other:?}")))
        }
    }
}
