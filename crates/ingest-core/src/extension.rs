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

//! Extension (plug-in filter) contract (spec.md §6, §9).
//!
//! Extensions are the seam the out-of-scope collaborators (the MongoDB
//! materializer, the cross-region replication queue processor) would hang
//! off of; only the interface is modeled here; no concrete extension beyond
//! a trivial identity pass-through used in tests is implemented.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ingest_common::error::IngestResult;

use crate::event::CanonicalEvent;

/// Ordered sequence of events staged for publish by the extensions that
/// ran over the current batch. Conceptually a mapping from target bucket
/// to events (spec.md §6: "push into `handle[targetBucket]`") — collapsed
/// to a single push-order list here because the reader always publishes
/// the whole batch together regardless of which bucket each event targets,
/// and a flat list is what preserves the "events within one published
/// batch preserve source order" invariant (spec.md §3) without depending
/// on hash-map iteration order. Scoped to exactly one batch; the reader
/// owns the only `Arc` an extension is handed, so nothing can leak across
/// batches (spec.md §9).
#[derive(Default)]
pub struct EntryBatch {
    staged: Mutex<Vec<CanonicalEvent>>,
}

impl EntryBatch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, _target_bucket: &str, event: CanonicalEvent) {
        self.staged.lock().unwrap().push(event);
    }

    pub fn drain_events(&self) -> Vec<CanonicalEvent> {
        std::mem::take(&mut *self.staged.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.staged.lock().unwrap().is_empty()
    }
}

#[async_trait]
pub trait Extension: Send + Sync {
    /// Called once before the reader starts iterating a batch's records.
    fn set_entry_batch(&self, handle: Arc<EntryBatch>);

    /// Called once after iteration completes, successfully or not.
    fn unset_entry_batch(&self);

    /// Inspects one canonical event (already key/bucket-rewritten for tail
    /// records, per SPEC_FULL §D) and stages zero or more events via the
    /// batch handle passed to `set_entry_batch`.
    async fn filter(&self, event: &CanonicalEvent) -> IngestResult<()>;
}

/// Stages the event unchanged onto its own bucket. Used by reader tests to
/// exercise the batch-handle plumbing without a real downstream extension.
pub struct IdentityExtension {
    handle: Mutex<Option<Arc<EntryBatch>>>,
}

impl IdentityExtension {
    pub fn new() -> Self {
        Self {
            handle: Mutex::new(None),
        }
    }
}

impl Default for IdentityExtension {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extension for IdentityExtension {
    fn set_entry_batch(&self, handle: Arc<EntryBatch>) {
        *self.handle.lock().unwrap() = Some(handle);
    }

    fn unset_entry_batch(&self) {
        *self.handle.lock().unwrap() = None;
    }

    async fn filter(&self, event: &CanonicalEvent) -> IngestResult<()> {
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.push(&event.bucket, event.clone());
        }
        Ok(())
    }
}
