// Copyright 2024 RisingWave Labs
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

use std::fmt;

/// Opaque wrapper around a secret value, so a stray `{:?}` or log line never
/// leaks a key. Decryption itself is out of scope (spec.md §1); this only
/// guarantees the ciphertext/plaintext boundary is explicit in the type
/// system.
#[derive(Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Ciphertext(String);

impl Ciphertext {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Ciphertext(..)")
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString(..)")
    }
}

/// Decrypts a `Ciphertext` into a usable secret. Credentials arrive
/// pre-resolved in the real system (spec.md §1); the only implementation
/// here is the no-op used by tests and by configs that already carry
/// plaintext in non-production environments.
pub trait SecretDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<SecretString, crate::error::IngestError>;
}

pub struct NoopDecryptor;

impl SecretDecryptor for NoopDecryptor {
    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<SecretString, crate::error::IngestError> {
        Ok(SecretString::new(ciphertext.as_str().to_string()))
    }
}
