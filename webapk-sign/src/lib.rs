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

//! # webapk-sign
//!
//! Loads RSA signing keys and the X.509 certificates that go with them, and
//! produces PKCS#1 v1.5 signatures with SHA-256 or SHA-512.
//!
//! Keys and certificates are described first and resolved later, so a
//! misconfigured path is reported at the point it's used:
//!
//! ```no_run
//! use webapk_sign::*;
//!
//! let key = SigningKey::from_path("key.pem", KeyAlgorithm::Rsa, HashAlgorithm::Sha256);
//! let mut signer = SigningCertificate::from_path(key, "cert.pem");
//! signer.resolve()?;
//! let signature = signer.sign(b"payload", HashAlgorithm::Sha256)?;
//! # Ok::<(), webapk_common::WebApkError>(())
//! ```

mod certificate;
mod crypto;
mod crypto_keys;
mod signing_types;

pub use certificate::SigningCertificate;
#[cfg(feature = "cert-gen")]
pub use crypto_keys::{generate_random_testing_pem, TestingPem};
pub use crypto_keys::SigningKey;
pub use rasn_pkix::Certificate;
pub use signing_types::{HashAlgorithm, KeyAlgorithm};
