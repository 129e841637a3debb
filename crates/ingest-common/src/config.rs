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

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, IngestResult};
use crate::secret::Ciphertext;

/// `queuePopulator.*` block (spec.md §6).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueuePopulatorConfig {
    /// Root path for this pipeline's progress/backlog state on the Coordinator.
    #[serde(rename = "zookeeperPath")]
    pub coordinator_root: String,
    #[serde(rename = "batchMaxRead")]
    pub batch_max_read: u32,
    /// Tick interval expressed as a cron rule in the original system; kept
    /// as an opaque string and resolved to a `Duration` by the scheduler
    /// (ingest-cli) rather than parsed here.
    #[serde(rename = "cronRule")]
    pub cron_rule: String,
    #[serde(default = "default_max_parallel_readers")]
    pub max_parallel_readers: usize,
    #[serde(default = "default_metadata_fanout")]
    pub metadata_fanout: usize,
    /// Topic every bucket in this process publishes to.
    pub topic: String,
    /// Coordinator (etcd) endpoints. Not part of spec.md's minimal
    /// `queuePopulator` block but required ambient wiring for a runnable
    /// process — the Coordinator's own address has to come from somewhere.
    #[serde(rename = "coordinatorEndpoints")]
    pub coordinator_endpoints: Vec<String>,
    /// Message bus bootstrap servers, same rationale as above.
    #[serde(rename = "busBootstrapServers")]
    pub bus_bootstrap_servers: String,
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

fn default_publish_timeout_ms() -> u64 {
    30_000
}

fn default_max_parallel_readers() -> usize {
    5
}

fn default_metadata_fanout() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceAuthConfig {
    #[serde(rename = "accessKey")]
    pub access_key: String,
    #[serde(rename = "secretKey")]
    pub secret_key: Ciphertext,
}

/// One entry of the per-source list in spec.md §6: `{name, bucket, host,
/// port, https, locationConstraint, auth}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceBucketConfig {
    pub name: String,
    pub bucket: String,
    pub host: String,
    pub port: u16,
    #[serde(rename = "https")]
    pub use_tls: bool,
    #[serde(rename = "locationConstraint")]
    pub location_constraint: Option<String>,
    pub auth: SourceAuthConfig,
}

impl SourceBucketConfig {
    /// Canonical string form of the editable fields compared on refresh
    /// (spec.md §9): `accessKey`, `secretKey`, `host`, `port`, `useTLS`.
    /// `locationConstraint` and `bucket`/`name` are identity, not editable
    /// connection state, so they are excluded.
    pub fn editable_fingerprint(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}",
            self.auth.access_key,
            self.auth.secret_key.as_str(),
            self.host,
            self.port,
            self.use_tls
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestionConfig {
    #[serde(rename = "queuePopulator")]
    pub queue_populator: QueuePopulatorConfig,
    pub sources: Vec<SourceBucketConfig>,
}

impl IngestionConfig {
    pub fn load(path: impl AsRef<Path>) -> IngestResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| IngestError::Malformed(format!("reading config: {e}")))?;
        serde_yaml::from_str(&raw).map_err(|e| IngestError::Malformed(format!("parsing config: {e}")))
    }

    pub fn sources_by_bucket(&self) -> HashMap<String, &SourceBucketConfig> {
        self.sources.iter().map(|s| (s.bucket.clone(), s)).collect()
    }
}
