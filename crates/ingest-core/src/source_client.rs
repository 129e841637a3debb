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

//! Source Client (C2, spec.md §4.2, §6).
//!
//! Typed operations over the source cluster's extended S3-compatible API.
//! All operations are stateless except for the shared keep-alive
//! connection pool held by the inner `reqwest::Client`.

use ingest_common::error::{IngestError, IngestResult};
use ingest_common::secret::SecretString;
use serde::Deserialize;

use crate::log_stream::LogRecordStream;
use crate::types::{LogResponseHeader, ObjectMetadata};

#[derive(Debug, Clone)]
pub struct SourceClientConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub access_key: String,
    pub secret_key: SecretString,
}

impl SourceClientConfig {
    fn base_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// A page of object listing results plus an optional continuation pair,
/// resolving the snapshot pagination Open Question in spec.md §9 / SPEC_FULL §C.
#[derive(Debug, Clone, Default)]
pub struct ListObjectsPage {
    pub keys: Vec<String>,
    pub next_key_marker: Option<String>,
    pub next_version_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListObjectsResponse {
    #[serde(rename = "Contents", default)]
    contents: Vec<ListObjectsContent>,
    #[serde(rename = "NextKeyMarker")]
    next_key_marker: Option<String>,
    #[serde(rename = "NextVersionIdMarker")]
    next_version_marker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListObjectsContent {
    #[serde(rename = "key")]
    key: String,
}

#[derive(Debug, Deserialize)]
struct LookupPartitionResponse(Vec<i64>);

/// Shared keep-alive HTTP client talking to one source cluster. Rebuilt
/// wholesale on credential/endpoint refresh (spec.md §4.7 Refresh state,
/// §9 "Configuration refresh").
#[derive(Clone)]
pub struct SourceClient {
    http: reqwest::Client,
    config: SourceClientConfig,
}

impl SourceClient {
    pub fn new(config: SourceClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .expect("reqwest client build is infallible for default TLS backend");
        Self { http, config }
    }

    fn auth_header_value(&self) -> String {
        format!(
            "AWS4-HMAC-SHA256 Credential={}, SecretKey={}",
            self.config.access_key,
            self.config.secret_key.expose()
        )
    }

    /// `GET /?raftId={bucket}` — resolves which log partition carries a bucket.
    pub async fn lookup_partition(&self, bucket: &str) -> IngestResult<Option<i64>> {
        let url = format!("{}/", self.config.base_url());
        let resp = self
            .http
            .get(&url)
            .query(&[("raftId", bucket)])
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(IngestError::from)?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = resp.error_for_status().map_err(IngestError::from)?;
        let ids: LookupPartitionResponse = resp.json().await.map_err(IngestError::from)?;
        Ok(ids.0.first().copied())
    }

    /// `GET /{bucket}?list-type=...` — one page of current object keys.
    pub async fn list_objects(
        &self,
        bucket: &str,
        key_marker: Option<&str>,
        version_marker: Option<&str>,
    ) -> IngestResult<ListObjectsPage> {
        let url = format!("{}/{}", self.config.base_url(), bucket);
        let mut query = vec![("list-type", "2".to_string())];
        if let Some(k) = key_marker {
            query.push(("key-marker", k.to_string()));
        }
        if let Some(v) = version_marker {
            query.push(("version-id-marker", v.to_string()));
        }

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(IngestError::from)?
            .error_for_status()
            .map_err(IngestError::from)?;

        let parsed: ListObjectsResponse = resp.json().await.map_err(IngestError::from)?;
        Ok(ListObjectsPage {
            keys: parsed.contents.into_iter().map(|c| c.key).collect(),
            next_key_marker: parsed.next_key_marker,
            next_version_marker: parsed.next_version_marker,
        })
    }

    /// `GET /{bucket}/{key}?metadata` — fetch metadata for one object.
    /// Missing metadata (404) is surfaced as `Ok(None)`: "logged and
    /// skipped, not fatal" per the Snapshot Producer contract.
    pub async fn get_object_metadata(
        &self,
        bucket: &str,
        key: &str,
    ) -> IngestResult<Option<ObjectMetadata>> {
        let url = format!("{}/{}/{}", self.config.base_url(), bucket, key);
        let resp = self
            .http
            .get(&url)
            .query(&[("metadata", "")])
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(IngestError::from)?;

        if resp.status().as_u16() == 404 {
            return Ok(None);
        }
        let resp = resp.error_for_status().map_err(IngestError::from)?;
        let metadata: ObjectMetadata = resp.json().await.map_err(IngestError::from)?;
        Ok(Some(metadata))
    }

    /// `GET /_/raftLog?logId={id}&begin={n}&end={n}&targetLeader={bool}`.
    ///
    /// 404 (no such partition) and 416 (range not yet satisfiable) are not
    /// errors: both resolve as an empty header with no stream (spec.md §4.2,
    /// §4.3).
    pub async fn read_log(
        &self,
        partition_id: i64,
        begin: i64,
        end: i64,
        target_leader: bool,
    ) -> IngestResult<(LogResponseHeader, Option<LogRecordStream>)> {
        let url = format!("{}/_/raftLog", self.config.base_url());
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("logId", partition_id.to_string()),
                ("begin", begin.to_string()),
                ("end", end.to_string()),
                ("targetLeader", target_leader.to_string()),
            ])
            .header("Authorization", self.auth_header_value())
            .send()
            .await
            .map_err(IngestError::from)?;

        let status = resp.status().as_u16();
        if status == 404 || status == 416 {
            return Ok((LogResponseHeader::empty(), None));
        }
        let resp = resp.error_for_status().map_err(IngestError::from)?;
        let body = resp.bytes_stream();
        let (header, stream) = LogRecordStream::parse(body).await?;
        Ok((header, Some(stream)))
    }
}
