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

use crate::signing_types::HashAlgorithm;
use rand::thread_rng;
use rsa::RsaPrivateKey;
use webapk_common::*;

/// PKCS#1 v1.5 signature over an already computed digest.
pub(crate) fn sign_digest(
    private_key: &RsaPrivateKey,
    digest: &[u8],
    hash: HashAlgorithm
) -> Result<Vec<u8>> {
    let padding = hash.pkcs1v15()?;
    if digest.len() != hash.digest_len() {
        return Err(WebApkError::SignerDigestLengthMismatch {
            expected: hash.digest_len(),
            actual: digest.len()
        });
    }
    Ok(private_key.sign_with_rng(&mut thread_rng(), padding, digest)?)
}

/// Hashes `data` with `hash` and signs the digest.
pub(crate) fn sign_data(
    private_key: &RsaPrivateKey,
    data: &[u8],
    hash: HashAlgorithm
) -> Result<Vec<u8>> {
    let digest = hash.digest(data)?;
    sign_digest(private_key, &digest, hash)
}
