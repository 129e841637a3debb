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

use thiserror::Error;

/// Error taxonomy for the ingestion pipeline, one variant per class in the
/// error handling design: each maps to a distinct recovery behavior in the
/// reader's batch cycle, never to an exception that escapes to the scheduler.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Network-level failure against the source, the bus, or the Coordinator.
    /// Retried by the next tick; never advances progress.
    #[error("transient network error: {0}")]
    Transient(#[source] anyhow::Error),

    /// The source reported the partition or object does not exist, or the
    /// requested log range is not yet satisfiable (HTTP 404 / 416). Resolves
    /// to an empty result, not a failure.
    #[error("not found: {0}")]
    NotFound(String),

    /// A log record or response body could not be parsed. Logged and the
    /// batch is aborted; recurs on the next tick if deterministic.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// The Coordinator (etcd) is unreachable or a CAS write failed after
    /// retries. Fatal to the current batch only.
    #[error("coordinator unavailable: {0}")]
    CoordinatorUnavailable(#[source] anyhow::Error),

    /// The bus producer failed to accept a batch. The whole batch is
    /// aborted; the Coordinator offset is left untouched so the next batch
    /// re-reads and re-publishes (at-least-once).
    #[error("publish failed: {0}")]
    PublishFailed(#[source] anyhow::Error),

    /// Credentials could not be decrypted at reader setup. The reader
    /// refuses to start.
    #[error("secret decryption failed: {0}")]
    SecretDecryption(String),
}

impl From<reqwest::Error> for IngestError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status.as_u16() == 404 || status.as_u16() == 416 {
                return IngestError::NotFound(e.to_string());
            }
        }
        IngestError::Transient(e.into())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::Malformed(e.to_string())
    }
}

pub type IngestResult<T> = std::result::Result<T, IngestError>;
