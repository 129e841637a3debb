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

//! Progress Store (C6, spec.md §4.6).
//!
//! Durable per-bucket `(phase, markers, log offset)` on the Coordinator, at
//! `<ingestionRoot>/<targetBucket>/{init,logState/raft_<id>/logOffset}`.

use std::sync::Arc;

use ingest_common::error::IngestResult;

use crate::coordinator::Coordinator;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitState {
    pub is_status_complete: bool,
    pub key_marker: Option<String>,
    pub version_marker: Option<String>,
    /// `cseq` captured at the *original* start of the current snapshot
    /// attempt. Not part of the minimal tuple in spec.md §3, but required
    /// to resolve the Open Question in §9 / SPEC_FULL §C: a crash mid-
    /// snapshot must resume pagination without re-capturing `cseq`, since
    /// a fresh capture could miss mutations that landed between the
    /// original start and the restart.
    pub cseq: Option<i64>,
}

pub struct ProgressStore {
    coordinator: Arc<dyn Coordinator>,
    bucket_root: String,
}

fn encode_bool(b: bool) -> Vec<u8> {
    vec![b as u8]
}

fn decode_bool(v: &[u8]) -> bool {
    v.first().map(|b| *b != 0).unwrap_or(false)
}

/// `None` encodes as an empty node; `Some(s)` (even `Some("")`) is tagged so
/// the two never collide on read.
fn encode_optional_string(value: Option<&str>) -> Vec<u8> {
    match value {
        None => Vec::new(),
        Some(s) => {
            let mut buf = Vec::with_capacity(s.len() + 1);
            buf.push(1u8);
            buf.extend_from_slice(s.as_bytes());
            buf
        }
    }
}

fn decode_optional_string(v: &[u8]) -> Option<String> {
    let (tag, rest) = v.split_first()?;
    if *tag != 1 {
        return None;
    }
    String::from_utf8(rest.to_vec()).ok()
}

impl ProgressStore {
    pub fn new(coordinator: Arc<dyn Coordinator>, ingestion_root: &str, target_bucket: &str) -> Self {
        Self {
            coordinator,
            bucket_root: format!("{ingestion_root}/{target_bucket}"),
        }
    }

    fn init_complete_path(&self) -> String {
        format!("{}/init/isStatusComplete", self.bucket_root)
    }

    fn init_key_marker_path(&self) -> String {
        format!("{}/init/keyMarker", self.bucket_root)
    }

    fn init_version_marker_path(&self) -> String {
        format!("{}/init/versionMarker", self.bucket_root)
    }

    fn init_cseq_path(&self) -> String {
        format!("{}/init/cseq", self.bucket_root)
    }

    fn log_offset_path(&self, raft_id: i64) -> String {
        format!("{}/logState/raft_{raft_id}/logOffset", self.bucket_root)
    }

    fn raft_id_path(&self) -> String {
        format!("{}/raftId", self.bucket_root)
    }

    /// Resolves (and persists, on first call) the partition id assigned to
    /// this bucket. `raftId` "is set exactly once per bucket, at first
    /// setup" (spec.md §3) — if a value already exists it wins over
    /// `discovered`.
    pub async fn resolve_raft_id(&self, discovered: i64) -> IngestResult<i64> {
        self.coordinator
            .mkdirp(&self.bucket_root)
            .await?;
        self.coordinator
            .create_if_absent(&self.raft_id_path(), discovered.to_string().into_bytes())
            .await?;
        let raw = self.coordinator.get(&self.raft_id_path()).await?;
        let stored = raw
            .and_then(|v| String::from_utf8(v).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(discovered);
        Ok(stored)
    }

    /// "If any node is absent, create it and return the tuple with the
    /// absent fields as `null`."
    pub async fn read_init(&self) -> IngestResult<InitState> {
        self.coordinator.mkdirp(&format!("{}/init", self.bucket_root)).await?;

        let complete = match self.coordinator.get(&self.init_complete_path()).await? {
            Some(v) => decode_bool(&v),
            None => {
                self.coordinator
                    .create_if_absent(&self.init_complete_path(), encode_bool(false))
                    .await?;
                false
            }
        };
        let key_marker = self
            .coordinator
            .get(&self.init_key_marker_path())
            .await?
            .and_then(|v| decode_optional_string(&v));
        let version_marker = self
            .coordinator
            .get(&self.init_version_marker_path())
            .await?
            .and_then(|v| decode_optional_string(&v));
        let cseq = self
            .coordinator
            .get(&self.init_cseq_path())
            .await?
            .and_then(|v| decode_optional_string(&v))
            .and_then(|s| s.parse::<i64>().ok());

        Ok(InitState {
            is_status_complete: complete,
            key_marker,
            version_marker,
            cseq,
        })
    }

    /// No-op if `state` is `None` (the cycle did not pass through snapshot).
    pub async fn write_init(&self, state: Option<&InitState>) -> IngestResult<()> {
        let Some(state) = state else { return Ok(()) };

        let current = self.coordinator.get(&self.init_complete_path()).await?;
        self.coordinator
            .compare_and_set(&self.init_complete_path(), current.as_deref(), encode_bool(state.is_status_complete))
            .await?;

        write_optional_string(&*self.coordinator, &self.init_key_marker_path(), state.key_marker.as_deref()).await?;
        write_optional_string(
            &*self.coordinator,
            &self.init_version_marker_path(),
            state.version_marker.as_deref(),
        )
        .await?;
        write_optional_string(
            &*self.coordinator,
            &self.init_cseq_path(),
            state.cseq.map(|v| v.to_string()).as_deref(),
        )
        .await?;
        Ok(())
    }

    pub async fn read_log_offset(&self, raft_id: i64) -> IngestResult<i64> {
        let path = self.log_offset_path(raft_id);
        self.coordinator.mkdirp(&format!("{}/logState/raft_{raft_id}", self.bucket_root)).await?;
        Ok(self
            .coordinator
            .get(&path)
            .await?
            .and_then(|v| String::from_utf8(v).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0))
    }

    /// Writes only when strictly increasing (spec.md §4.6, §8: "`logOffset`
    /// is monotonically non-decreasing").
    pub async fn write_log_offset(&self, raft_id: i64, next: i64) -> IngestResult<()> {
        let path = self.log_offset_path(raft_id);
        let current_bytes = self.coordinator.get(&path).await?;
        let current = current_bytes
            .as_deref()
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<i64>().ok())
            .unwrap_or(0);
        if next <= current {
            return Ok(());
        }
        self.coordinator
            .compare_and_set(&path, current_bytes.as_deref(), next.to_string().into_bytes())
            .await?;
        Ok(())
    }
}

async fn write_optional_string(
    coordinator: &(dyn Coordinator),
    path: &str,
    value: Option<&str>,
) -> IngestResult<()> {
    let current = coordinator.get(path).await?;
    let new_value = encode_optional_string(value);
    coordinator.compare_and_set(path, current.as_deref(), new_value).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::FakeCoordinator;

    fn store() -> ProgressStore {
        ProgressStore::new(Arc::new(FakeCoordinator::new()), "/ingest", "zenkobucket-bucket1")
    }

    #[tokio::test]
    async fn read_init_creates_absent_nodes_as_null() {
        let s = store();
        let init = s.read_init().await.unwrap();
        assert!(!init.is_status_complete);
        assert!(init.key_marker.is_none());
        assert!(init.version_marker.is_none());
    }

    #[tokio::test]
    async fn raft_id_is_set_exactly_once() {
        let s = store();
        assert_eq!(s.resolve_raft_id(3).await.unwrap(), 3);
        assert_eq!(s.resolve_raft_id(99).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn log_offset_is_monotonic() {
        let s = store();
        s.write_log_offset(3, 10).await.unwrap();
        s.write_log_offset(3, 5).await.unwrap();
        assert_eq!(s.read_log_offset(3).await.unwrap(), 10);
        s.write_log_offset(3, 20).await.unwrap();
        assert_eq!(s.read_log_offset(3).await.unwrap(), 20);
    }

    #[tokio::test]
    async fn write_init_roundtrips_markers() {
        let s = store();
        let state = InitState {
            is_status_complete: false,
            key_marker: Some("k1".into()),
            version_marker: None,
            cseq: Some(42),
        };
        s.write_init(Some(&state)).await.unwrap();
        let read_back = s.read_init().await.unwrap();
        assert_eq!(read_back.key_marker.as_deref(), Some("k1"));
        assert_eq!(read_back.version_marker, None);
        assert_eq!(read_back.cseq, Some(42));
    }

    #[tokio::test]
    async fn absent_marker_stays_null_after_a_later_checkpoint() {
        let s = store();
        s.write_init(Some(&InitState {
            is_status_complete: false,
            key_marker: Some("k1".into()),
            version_marker: Some("v1".into()),
            cseq: Some(1),
        }))
        .await
        .unwrap();

        s.write_init(Some(&InitState {
            is_status_complete: false,
            key_marker: Some("k2".into()),
            version_marker: None,
            cseq: Some(1),
        }))
        .await
        .unwrap();

        let read_back = s.read_init().await.unwrap();
        assert_eq!(read_back.key_marker.as_deref(), Some("k2"));
        assert_eq!(read_back.version_marker, None, "null marker must not come back as Some(\"\")");
    }
}
