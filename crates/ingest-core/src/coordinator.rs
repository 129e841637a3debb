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

//! The Coordinator contract (spec.md §6) and an etcd-backed implementation.
//!
//! The spec treats the Coordinator as a generic strongly-consistent
//! hierarchical KV store with watches and ephemeral nodes; the ingestion
//! pipeline only needs create-if-absent, get, list-children, and
//! compare-and-set, so that is all the trait exposes. etcd is the real
//! backend (the teacher configures an etcd backend for its own meta store,
//! see `src/meta/src/lib.rs`'s `--etcd-endpoints`), used here as a flat
//! key-value namespace with `/`-delimited paths standing in for the
//! original ZooKeeper hierarchy.

use async_trait::async_trait;
use ingest_common::error::{IngestError, IngestResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn get(&self, path: &str) -> IngestResult<Option<Vec<u8>>>;

    /// Creates `path` with `value` only if absent. Returns `true` if this
    /// call created it, `false` if it already existed (no-op).
    async fn create_if_absent(&self, path: &str, value: Vec<u8>) -> IngestResult<bool>;

    /// Compare-and-set: writes `new_value` only if the current value
    /// equals `expected` (`None` means "must not exist"). Returns `true`
    /// on success. A failed CAS is not an error — the caller retries on
    /// the next batch cycle (spec.md §4.6).
    async fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> IngestResult<bool>;

    async fn list_children(&self, path: &str) -> IngestResult<Vec<String>>;

    /// Ensures every ancestor path segment exists, creating it with an
    /// empty marker value if absent. Never deletes anything.
    async fn mkdirp(&self, path: &str) -> IngestResult<()> {
        let mut built = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            built.push('/');
            built.push_str(segment);
            self.create_if_absent(&built, Vec::new()).await?;
        }
        Ok(())
    }
}

/// etcd-backed Coordinator. One client, shared process-wide (spec.md §5
/// "Shared resources").
pub struct EtcdCoordinator {
    client: etcd_client::Client,
}

impl EtcdCoordinator {
    pub async fn connect(endpoints: &[String]) -> IngestResult<Self> {
        let client = etcd_client::Client::connect(endpoints, None)
            .await
            .map_err(|e| IngestError::CoordinatorUnavailable(e.into()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Coordinator for EtcdCoordinator {
    async fn get(&self, path: &str) -> IngestResult<Option<Vec<u8>>> {
        let mut client = self.client.kv_client();
        let resp = client
            .get(path, None)
            .await
            .map_err(|e| IngestError::CoordinatorUnavailable(e.into()))?;
        Ok(resp.kvs().first().map(|kv| kv.value().to_vec()))
    }

    async fn create_if_absent(&self, path: &str, value: Vec<u8>) -> IngestResult<bool> {
        let mut client = self.client.kv_client();
        let txn = etcd_client::Txn::new()
            .when(vec![etcd_client::Compare::version(
                path,
                etcd_client::CompareOp::Equal,
                0,
            )])
            .and_then(vec![etcd_client::TxnOp::put(path, value, None)]);
        let resp = client
            .txn(txn)
            .await
            .map_err(|e| IngestError::CoordinatorUnavailable(e.into()))?;
        Ok(resp.succeeded())
    }

    async fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> IngestResult<bool> {
        let mut client = self.client.kv_client();
        let compare = match expected {
            Some(v) => etcd_client::Compare::value(path, etcd_client::CompareOp::Equal, v),
            None => etcd_client::Compare::version(path, etcd_client::CompareOp::Equal, 0),
        };
        let txn = etcd_client::Txn::new()
            .when(vec![compare])
            .and_then(vec![etcd_client::TxnOp::put(path, new_value, None)]);
        let resp = client
            .txn(txn)
            .await
            .map_err(|e| IngestError::CoordinatorUnavailable(e.into()))?;
        Ok(resp.succeeded())
    }

    async fn list_children(&self, path: &str) -> IngestResult<Vec<String>> {
        let mut client = self.client.kv_client();
        let prefix = format!("{path}/");
        let resp = client
            .get(
                prefix.clone(),
                Some(etcd_client::GetOptions::new().with_prefix()),
            )
            .await
            .map_err(|e| IngestError::CoordinatorUnavailable(e.into()))?;
        Ok(resp
            .kvs()
            .iter()
            .filter_map(|kv| {
                let key = kv.key_str().ok()?;
                key.strip_prefix(&prefix).map(|s| s.to_string())
            })
            .collect())
    }
}

/// In-memory fake used by the reader/progress-store/backlog tests. A CAS
/// against an absent path behaves like `expected == None`.
#[derive(Default, Clone)]
pub struct FakeCoordinator {
    state: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl FakeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Coordinator for FakeCoordinator {
    async fn get(&self, path: &str) -> IngestResult<Option<Vec<u8>>> {
        Ok(self.state.lock().await.get(path).cloned())
    }

    async fn create_if_absent(&self, path: &str, value: Vec<u8>) -> IngestResult<bool> {
        let mut guard = self.state.lock().await;
        if guard.contains_key(path) {
            Ok(false)
        } else {
            guard.insert(path.to_string(), value);
            Ok(true)
        }
    }

    async fn compare_and_set(
        &self,
        path: &str,
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> IngestResult<bool> {
        let mut guard = self.state.lock().await;
        let current = guard.get(path).map(|v| v.as_slice());
        if current == expected {
            guard.insert(path.to_string(), new_value);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn list_children(&self, path: &str) -> IngestResult<Vec<String>> {
        let prefix = format!("{path}/");
        let guard = self.state.lock().await;
        Ok(guard
            .keys()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(|s| s.to_string()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_if_absent_is_idempotent() {
        let c = FakeCoordinator::new();
        assert!(c.create_if_absent("/a", b"1".to_vec()).await.unwrap());
        assert!(!c.create_if_absent("/a", b"2".to_vec()).await.unwrap());
        assert_eq!(c.get("/a").await.unwrap(), Some(b"1".to_vec()));
    }

    #[tokio::test]
    async fn cas_only_succeeds_on_match() {
        let c = FakeCoordinator::new();
        c.create_if_absent("/x", b"1".to_vec()).await.unwrap();
        assert!(!c
            .compare_and_set("/x", Some(b"2"), b"3".to_vec())
            .await
            .unwrap());
        assert!(c
            .compare_and_set("/x", Some(b"1"), b"3".to_vec())
            .await
            .unwrap());
        assert_eq!(c.get("/x").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn mkdirp_creates_every_ancestor() {
        let c = FakeCoordinator::new();
        c.mkdirp("/ingest/bucket1/init").await.unwrap();
        assert!(c.get("/ingest").await.unwrap().is_some());
        assert!(c.get("/ingest/bucket1").await.unwrap().is_some());
        assert!(c.get("/ingest/bucket1/init").await.unwrap().is_some());
    }
}
