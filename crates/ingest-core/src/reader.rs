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

//! Ingestion Reader (C7, spec.md §4.7) — the per-bucket state machine.
//!
//! One instance per configured bucket: `Uninitialized` → `setup()` →
//! `Ready`; each scheduler tick drives exactly one four-phase batch cycle
//! (read records, prepare entries, publish, checkpoint) and returns to
//! `Ready`. `Refresh` is orthogonal — it can run at any time via
//! [`IngestionReader::refresh`] and only ever touches the Source Client.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use ingest_common::error::{IngestError, IngestResult};
use ingest_common::metrics::IngestMetrics;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::bus::{BusMessage, BusProducer};
use crate::event::{CanonicalEvent, EventType, METASTORE, USERS_BUCKET, USERS_BUCKET_KEY_SEP};
use crate::extension::{EntryBatch, Extension};
use crate::progress::{InitState, ProgressStore};
use crate::snapshot::SnapshotProducer;
use crate::source_client::SourceClient;
use crate::tail::TailProducer;
use crate::types::LogRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Uninitialized,
    Ready,
    Batch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    Published { events: usize },
    NoOp,
}

/// Static per-bucket settings, derived once from `SourceBucketConfig` plus
/// the `queuePopulator` block (spec.md §6) and never mutated.
pub struct ReaderConfig {
    pub source_bucket: String,
    pub target_bucket: String,
    pub topic: String,
    pub batch_max_read: i64,
    pub metadata_fanout: usize,
    pub publish_timeout: Duration,
}

pub struct IngestionReader {
    cfg: ReaderConfig,
    state: RwLock<ReaderState>,
    batch_in_progress: AtomicBool,
    raft_id: RwLock<Option<i64>>,
    client: RwLock<SourceClient>,
    fingerprint: RwLock<String>,
    progress: ProgressStore,
    bus: Arc<dyn BusProducer>,
    extensions: Vec<Arc<dyn Extension>>,
    metrics: Arc<IngestMetrics>,
}

impl IngestionReader {
    pub fn new(
        cfg: ReaderConfig,
        client: SourceClient,
        fingerprint: String,
        progress: ProgressStore,
        bus: Arc<dyn BusProducer>,
        extensions: Vec<Arc<dyn Extension>>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            cfg,
            state: RwLock::new(ReaderState::Uninitialized),
            batch_in_progress: AtomicBool::new(false),
            raft_id: RwLock::new(None),
            client: RwLock::new(client),
            fingerprint: RwLock::new(fingerprint),
            progress,
            bus,
            extensions,
            metrics,
        }
    }

    pub async fn state(&self) -> ReaderState {
        *self.state.read().await
    }

    /// `Uninitialized` → `Ready`: resolves `raftId` via the Source Client
    /// and persists it on first setup (spec.md §3, §4.7).
    #[instrument(skip(self), fields(bucket = %self.cfg.source_bucket))]
    pub async fn setup(&self) -> IngestResult<()> {
        let discovered = {
            let client = self.client.read().await;
            client.lookup_partition(&self.cfg.source_bucket).await?
        }
        .ok_or_else(|| IngestError::NotFound(format!("no partition for bucket {}", self.cfg.source_bucket)))?;
        let resolved = self.progress.resolve_raft_id(discovered).await?;
        *self.raft_id.write().await = Some(resolved);
        *self.state.write().await = ReaderState::Ready;
        Ok(())
    }

    /// Orthogonal `Refresh`: rebuilds the Source Client when the editable
    /// connection fields change (spec.md §9); progress is untouched.
    /// Returns whether a rebuild happened.
    pub async fn refresh(&self, new_fingerprint: String, new_client: SourceClient) -> bool {
        let changed = *self.fingerprint.read().await != new_fingerprint;
        if changed {
            *self.client.write().await = new_client;
            *self.fingerprint.write().await = new_fingerprint;
            info!(bucket = %self.cfg.source_bucket, "source client rebuilt after credential refresh");
        }
        changed
    }

    /// One scheduler tick. Returns `Ok(BatchOutcome::NoOp)` without error
    /// if a batch is already in progress for this bucket, guaranteeing
    /// at-most-one concurrent batch per bucket (spec.md §5).
    #[instrument(skip(self), fields(bucket = %self.cfg.source_bucket))]
    pub async fn tick(&self) -> IngestResult<BatchOutcome> {
        if self.batch_in_progress.swap(true, Ordering::AcqRel) {
            return Ok(BatchOutcome::NoOp);
        }
        let _guard = BatchGuard(&self.batch_in_progress);
        *self.state.write().await = ReaderState::Batch;

        let timer = self
            .metrics
            .batch_latency_seconds
            .with_label_values(&[&self.cfg.target_bucket, "batch"])
            .start_timer();
        let result = self.run_batch().await;
        timer.observe_duration();

        *self.state.write().await = ReaderState::Ready;
        let outcome_label = if result.is_ok() { "ok" } else { "error" };
        self.metrics
            .batches_total
            .with_label_values(&[&self.cfg.target_bucket, outcome_label])
            .inc();
        if let Err(e) = &result {
            warn!(bucket = %self.cfg.source_bucket, error = %e, "batch aborted");
        }
        result
    }

    async fn raft_id(&self) -> IngestResult<i64> {
        self.raft_id
            .read()
            .await
            .ok_or_else(|| IngestError::Malformed(format!("reader for {} not set up", self.cfg.source_bucket)))
    }

    /// The four-phase batch cycle. Any error propagated here leaves
    /// progress untouched: the tick scheduler retries on the next cycle
    /// (spec.md §4.7 "Errors abort the cycle ... without advancing
    /// progress").
    async fn run_batch(&self) -> IngestResult<BatchOutcome> {
        let raft_id = self.raft_id().await?;
        let init = self.progress.read_init().await?;
        let current_log_offset = self.progress.read_log_offset(raft_id).await?;

        let (events, next_init, next_log_offset) = if init.is_status_complete {
            self.run_tail_phase(raft_id, current_log_offset).await?
        } else {
            self.run_snapshot_phase(raft_id, &init).await?
        };

        let staged = if events.is_empty() {
            Vec::new()
        } else {
            self.run_extensions(events).await?
        };

        if !staged.is_empty() {
            self.publish(&staged).await?;
        }

        // Checkpoint runs even when nothing was staged: a snapshot page
        // with zero surviving objects (e.g. every key 404s on metadata
        // fetch) must still advance its continuation markers, or
        // pagination could never progress past that page.
        self.checkpoint(raft_id, next_init.as_ref(), current_log_offset, next_log_offset)
            .await?;

        if staged.is_empty() {
            Ok(BatchOutcome::NoOp)
        } else {
            self.metrics
                .events_published_total
                .with_label_values(&[&self.cfg.target_bucket])
                .inc_by(staged.len() as u64);
            Ok(BatchOutcome::Published { events: staged.len() })
        }
    }

    async fn run_snapshot_phase(
        &self,
        raft_id: i64,
        init: &InitState,
    ) -> IngestResult<(Vec<CanonicalEvent>, Option<InitState>, i64)> {
        let client = self.client.read().await.clone();
        let producer = SnapshotProducer::new(client, self.cfg.metadata_fanout);
        let page = producer
            .produce_page(&self.cfg.source_bucket, &self.cfg.target_bucket, raft_id, init)
            .await?;
        let next_log_offset = page.next_state.cseq.unwrap_or(0);
        Ok((page.events, Some(page.next_state), next_log_offset))
    }

    async fn run_tail_phase(
        &self,
        raft_id: i64,
        current_log_offset: i64,
    ) -> IngestResult<(Vec<CanonicalEvent>, Option<InitState>, i64)> {
        let client = self.client.read().await.clone();
        let tail = TailProducer::new(client);
        let (header, stream) = tail
            .read_batch(raft_id, current_log_offset, self.cfg.batch_max_read)
            .await?;

        // `info.start == null` (the graceful 404/416 shape): no records
        // were read, batch completes without advancing (spec.md §4.7).
        let Some(start) = header.start else {
            return Ok((Vec::new(), None, current_log_offset));
        };

        let mut events = Vec::new();
        let mut nb_log_records_read: i64 = 0;
        if let Some(mut stream) = stream {
            while let Some(record) = stream.next().await {
                let record = record?;
                nb_log_records_read += 1;
                events.extend(self.rewrite_tail_record(&record));
            }
        }

        let next_log_offset = start + nb_log_records_read;
        Ok((events, None, next_log_offset))
    }

    /// Applies the §3 `db`-based key/bucket rewrite, then the
    /// `db == sourceBucket` containment filter — in that order, per the
    /// precedence Open Question resolved in SPEC_FULL §D ("rewrite first,
    /// then filter passes the rewritten key to extensions"). `db` absent
    /// marks a legacy put-style record for this bucket (spec.md §3).
    fn rewrite_tail_record(&self, record: &LogRecord) -> Vec<CanonicalEvent> {
        let db = record.db.as_deref();
        let is_source_bucket = db.is_none() || db == Some(self.cfg.source_bucket.as_str());
        let is_users_bucket = db == Some(USERS_BUCKET);
        let is_metastore = db == Some(METASTORE);
        if !(is_source_bucket || is_users_bucket || is_metastore) {
            return Vec::new();
        }

        record
            .entries
            .iter()
            // "entries where neither key nor type is set are dropped"
            .filter(|e| e.key.is_some() || e.entry_type.is_some())
            .map(|entry| {
                let raw_key = entry.key.as_deref().unwrap_or("");
                if is_users_bucket {
                    let owner = raw_key.split(USERS_BUCKET_KEY_SEP).next().unwrap_or(raw_key);
                    CanonicalEvent::bucket_listing_put(owner, &self.cfg.target_bucket, entry.value.clone())
                } else if is_metastore {
                    let dir = raw_key.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
                    let target = format!("{dir}/{}", self.cfg.target_bucket);
                    CanonicalEvent::bucket_metadata_put(&target, entry.value.clone())
                } else if entry.effective_type() == "del" {
                    CanonicalEvent::object_delete(&self.cfg.target_bucket, raw_key)
                } else {
                    CanonicalEvent::object_put(&self.cfg.target_bucket, raw_key, entry.value.clone())
                }
            })
            .collect()
    }

    /// Runs the configured extensions over one batch's events via the
    /// shared `EntryBatch` handle (spec.md §6, §9). A bucket with no
    /// extensions configured publishes events unfiltered — there is
    /// nothing else that could stage them.
    async fn run_extensions(&self, events: Vec<CanonicalEvent>) -> IngestResult<Vec<CanonicalEvent>> {
        if self.extensions.is_empty() {
            return Ok(events);
        }

        let handle = EntryBatch::new();
        for ext in &self.extensions {
            ext.set_entry_batch(handle.clone());
        }

        let mut first_error = None;
        for event in &events {
            for ext in &self.extensions {
                if let Err(e) = ext.filter(event).await {
                    first_error = Some(e);
                    break;
                }
            }
            if first_error.is_some() {
                break;
            }
        }

        for ext in &self.extensions {
            ext.unset_entry_batch();
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(handle.drain_events()),
        }
    }

    async fn publish(&self, events: &[CanonicalEvent]) -> IngestResult<()> {
        let messages: Vec<BusMessage> = events
            .iter()
            .map(|e| BusMessage {
                key: e.key.clone(),
                value: serde_json::to_string(e).expect("CanonicalEvent serialization is infallible"),
            })
            .collect();
        self.bus
            .publish_batch(&self.cfg.topic, &messages, self.cfg.publish_timeout)
            .await
    }

    async fn checkpoint(
        &self,
        raft_id: i64,
        init: Option<&InitState>,
        current_log_offset: i64,
        next_log_offset: i64,
    ) -> IngestResult<()> {
        self.progress.write_init(init).await?;
        if next_log_offset > current_log_offset {
            self.progress.write_log_offset(raft_id, next_log_offset).await?;
            self.metrics
                .log_offset
                .with_label_values(&[&self.cfg.target_bucket])
                .set(next_log_offset);
        }
        Ok(())
    }
}

struct BatchGuard<'a>(&'a AtomicBool);

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FakeBusProducer;
    use crate::coordinator::FakeCoordinator;
    use crate::source_client::SourceClientConfig;
    use ingest_common::secret::SecretString;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> SourceClient {
        let url = server.uri();
        let url = url.strip_prefix("http://").unwrap();
        let (host, port) = url.split_once(':').unwrap();
        SourceClient::new(SourceClientConfig {
            host: host.to_string(),
            port: port.parse().unwrap(),
            use_tls: false,
            access_key: "ak".into(),
            secret_key: SecretString::new("sk"),
        })
    }

    fn reader_with_coordinator(
        client: SourceClient,
        bus: Arc<FakeBusProducer>,
        coordinator: Arc<FakeCoordinator>,
    ) -> IngestionReader {
        let progress = ProgressStore::new(coordinator, "/ingest", "zenkobucket-bucket1");
        IngestionReader::new(
            ReaderConfig {
                source_bucket: "bucket1".into(),
                target_bucket: "zenkobucket-bucket1".into(),
                topic: "ingestion-topic".into(),
                batch_max_read: 1000,
                metadata_fanout: 10,
                publish_timeout: Duration::from_secs(5),
            },
            client,
            "fp".into(),
            progress,
            bus,
            Vec::new(),
            Arc::new(IngestMetrics::new()),
        )
    }

    /// Scenario 1 (spec.md §8): cold start, one object.
    #[tokio::test]
    async fn cold_start_one_object_publishes_put_and_completes_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([3])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_/raftLog"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"info":{"start":null,"cseq":7,"prune":0},"log":null}"#,
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bucket1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Contents": [{"key": "object1"}],
                "NextKeyMarker": null,
                "NextVersionIdMarker": null,
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bucket1/object1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"size": 10})))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let bus = Arc::new(FakeBusProducer::new());
        let r = reader_with_coordinator(client, bus.clone(), Arc::new(FakeCoordinator::new()));
        r.setup().await.unwrap();

        let outcome = r.tick().await.unwrap();
        assert_eq!(outcome, BatchOutcome::Published { events: 1 });

        let published = bus.published("ingestion-topic").await;
        assert_eq!(published.len(), 1);
        let event: CanonicalEvent = serde_json::from_str(&published[0].value).unwrap();
        assert_eq!(event.bucket, "zenkobucket-bucket1");
        assert_eq!(event.key, "object1");
        assert_eq!(event.event_type, EventType::Put);
    }

    /// Scenario 3 (spec.md §8): empty tail (416) completes without events
    /// and without advancing the offset.
    #[tokio::test]
    async fn empty_tail_completes_without_advancing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([3])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/_/raftLog"))
            .respond_with(ResponseTemplate::new(416))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let bus = Arc::new(FakeBusProducer::new());
        let coordinator = Arc::new(FakeCoordinator::new());

        // Seed progress as if the snapshot phase already completed, so this
        // tick enters the tail phase directly.
        let seed = ProgressStore::new(coordinator.clone(), "/ingest", "zenkobucket-bucket1");
        seed.write_init(Some(&InitState {
            is_status_complete: true,
            key_marker: None,
            version_marker: None,
            cseq: Some(7),
        }))
        .await
        .unwrap();

        let r = reader_with_coordinator(client, bus.clone(), coordinator);
        r.setup().await.unwrap();

        let outcome = r.tick().await.unwrap();
        assert_eq!(outcome, BatchOutcome::NoOp);
        assert!(bus.published("ingestion-topic").await.is_empty());
    }
}
