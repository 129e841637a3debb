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

//! Snapshot Producer (C4, spec.md §4.4, SPEC_FULL §C).
//!
//! Turns the current content of a source bucket into a finite sequence of
//! synthetic put events, one page of `listObjects` at a time. `cseq` is
//! captured once, before the first page is requested, and is carried
//! unchanged through every subsequent page until the listing completes.

use std::sync::Arc;

use futures::future::join_all;
use ingest_common::error::IngestResult;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::event::CanonicalEvent;
use crate::progress::InitState;
use crate::source_client::SourceClient;

/// One page's worth of work: the events it produced and the `InitState` to
/// persist afterwards.
pub struct SnapshotPage {
    pub events: Vec<CanonicalEvent>,
    pub next_state: InitState,
}

pub struct SnapshotProducer {
    client: SourceClient,
    metadata_fanout: usize,
}

impl SnapshotProducer {
    pub fn new(client: SourceClient, metadata_fanout: usize) -> Self {
        Self {
            client,
            metadata_fanout: metadata_fanout.max(1),
        }
    }

    /// Produces one page of the snapshot. `current` is the `InitState`
    /// persisted from the previous cycle (or the all-`None`/`false` default
    /// on first call for this bucket).
    pub async fn produce_page(
        &self,
        source_bucket: &str,
        target_bucket: &str,
        partition_id: i64,
        current: &InitState,
    ) -> IngestResult<SnapshotPage> {
        let cseq = match current.cseq {
            Some(v) => v,
            None => self.capture_cseq(partition_id).await?,
        };

        let page = self
            .client
            .list_objects(
                source_bucket,
                current.key_marker.as_deref(),
                current.version_marker.as_deref(),
            )
            .await?;

        let semaphore = Arc::new(Semaphore::new(self.metadata_fanout));
        let fetches = page.keys.iter().map(|key| {
            let client = self.client.clone();
            let semaphore = semaphore.clone();
            let bucket = source_bucket.to_string();
            let key = key.clone();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
                let metadata = client.get_object_metadata(&bucket, &key).await;
                (key, metadata)
            }
        });

        // `join_all` preserves input order, so events come out in original
        // list order even though metadata fetches race each other
        // (spec.md §5 "Ordering": "list order then metadata-fetch
        // completion order reassembled by original list position").
        let mut events = Vec::with_capacity(page.keys.len());
        for (key, metadata) in join_all(fetches).await {
            match metadata {
                Ok(Some(metadata)) => {
                    let metadata_json = serde_json::to_string(&metadata).map_err(|e| {
                        ingest_common::error::IngestError::Malformed(e.to_string())
                    })?;
                    events.push(CanonicalEvent::object_put(target_bucket, &key, Some(metadata_json)));
                }
                Ok(None) => {
                    warn!(bucket = source_bucket, key = %key, "object metadata missing, skipped");
                }
                Err(e) => return Err(e),
            }
        }

        let is_status_complete =
            page.next_key_marker.is_none() && page.next_version_marker.is_none();

        Ok(SnapshotPage {
            events,
            next_state: InitState {
                is_status_complete,
                key_marker: page.next_key_marker,
                version_marker: page.next_version_marker,
                cseq: Some(cseq),
            },
        })
    }

    /// Peeks the tail log's current head without consuming any records
    /// (`limit = 0`), so `cseq` reflects the log position at the moment the
    /// snapshot starts (spec.md §4.4 "why capture cseq first").
    async fn capture_cseq(&self, partition_id: i64) -> IngestResult<i64> {
        let (header, _stream) = self.client.read_log(partition_id, 0, 0, false).await?;
        Ok(header.cseq.unwrap_or(0))
    }
}
