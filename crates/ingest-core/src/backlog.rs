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

//! Backlog Metrics (C8, spec.md §4.8, §8).
//!
//! Tracks, for each `(topic, partition)` on the bus, a high-watermark, a
//! per-group committed consumer offset, and named topic-offset snapshots,
//! all on the Coordinator. Runs independently of the Ingestion Reader,
//! alongside whatever actually consumes the bus downstream.

use std::sync::Arc;

use async_trait::async_trait;
use ingest_common::error::IngestResult;
use ingest_common::metrics::IngestMetrics;

use crate::bus::BusProducer;
use crate::coordinator::Coordinator;

/// The thing that knows a consumer group's current read position per
/// partition — spec.md's `consumer` argument to `publishConsumerBacklog`.
/// Kept as a seam rather than a concrete rdkafka consumer group client so
/// the downstream consumer (out of scope here) can supply its own.
#[async_trait]
pub trait ConsumerOffsetSource: Send + Sync {
    async fn position(&self, topic: &str, partition: i32) -> IngestResult<i64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagCheckResult {
    WithinBound,
    Exceeded { partition: i32, lag: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressCheckResult {
    Progressed,
    Behind {
        partition: i32,
        consumer_offset: i64,
        target_offset: i64,
    },
}

pub struct BacklogMetrics {
    coordinator: Arc<dyn Coordinator>,
    bus: Arc<dyn BusProducer>,
    root: String,
    metrics: Arc<IngestMetrics>,
}

impl BacklogMetrics {
    pub fn new(coordinator: Arc<dyn Coordinator>, bus: Arc<dyn BusProducer>, root: &str, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            coordinator,
            bus,
            root: root.to_string(),
            metrics,
        }
    }

    fn topic_offset_path(&self, topic: &str, partition: i32) -> String {
        format!("{}/{topic}/{partition}", self.root)
    }

    fn consumer_path(&self, topic: &str, partition: i32, group_id: &str) -> String {
        format!("{}/{topic}/consumers/{partition}/{group_id}", self.root)
    }

    fn consumers_dir(&self, topic: &str, partition: i32) -> String {
        format!("{}/{topic}/consumers/{partition}", self.root)
    }

    fn snapshot_path(&self, topic: &str, partition: i32, name: &str) -> String {
        format!("{}/{topic}/snapshots/{partition}/{name}", self.root)
    }

    async fn write_int(&self, path: &str, value: i64) -> IngestResult<()> {
        let current = self.coordinator.get(path).await?;
        // Best-effort upsert: a lost race just means the next periodic
        // publish call (this is a polling metric, not the reader's
        // checkpoint) overwrites it on the next invocation.
        self.coordinator
            .compare_and_set(path, current.as_deref(), value.to_string().into_bytes())
            .await?;
        Ok(())
    }

    async fn read_int(&self, path: &str) -> IngestResult<Option<i64>> {
        Ok(self
            .coordinator
            .get(path)
            .await?
            .and_then(|v| String::from_utf8(v).ok())
            .and_then(|s| s.parse::<i64>().ok()))
    }

    /// Writes the topic offset before the consumer offset so a reader
    /// never observes a consumer offset newer than its topic offset
    /// (spec.md §4.8).
    pub async fn publish_consumer_backlog(
        &self,
        consumer: &dyn ConsumerOffsetSource,
        topic: &str,
        group_id: &str,
    ) -> IngestResult<()> {
        for partition in self.bus.partitions(topic)? {
            let topic_offset = self.bus.high_watermark(topic, partition).await?;
            self.write_int(&self.topic_offset_path(topic, partition), topic_offset)
                .await?;

            let consumer_offset = consumer.position(topic, partition).await?;
            self.write_int(&self.consumer_path(topic, partition, group_id), consumer_offset)
                .await?;
        }
        Ok(())
    }

    pub async fn snapshot_topic_offsets(&self, topic: &str, name: &str) -> IngestResult<()> {
        for partition in self.bus.partitions(topic)? {
            let offset = self.bus.high_watermark(topic, partition).await?;
            self.write_int(&self.snapshot_path(topic, partition, name), offset)
                .await?;
        }
        Ok(())
    }

    async fn consumer_offsets_for_partition(
        &self,
        topic: &str,
        partition: i32,
        group_id: Option<&str>,
    ) -> IngestResult<Vec<(String, i64)>> {
        match group_id {
            Some(group) => {
                let offset = self
                    .read_int(&self.consumer_path(topic, partition, group))
                    .await?
                    .unwrap_or(0);
                Ok(vec![(group.to_string(), offset)])
            }
            None => {
                let groups = self
                    .coordinator
                    .list_children(&self.consumers_dir(topic, partition))
                    .await?;
                let mut out = Vec::with_capacity(groups.len());
                for group in groups {
                    let offset = self
                        .read_int(&self.consumer_path(topic, partition, &group))
                        .await?
                        .unwrap_or(0);
                    out.push((group, offset));
                }
                Ok(out)
            }
        }
    }

    /// `lag = max(0, topicOffset - consumerOffset)`. Returns the first
    /// partition (in `bus.partitions` order) exceeding `max_lag`, recording
    /// every lag it computes along the way on the `ingest_consumer_lag`
    /// gauge (one series per `(topic, partition, group)`).
    pub async fn check_consumer_lag(
        &self,
        topic: &str,
        group_id: Option<&str>,
        max_lag: i64,
    ) -> IngestResult<LagCheckResult> {
        for partition in self.bus.partitions(topic)? {
            let topic_offset = self.read_int(&self.topic_offset_path(topic, partition)).await?.unwrap_or(0);
            for (group, consumer_offset) in self
                .consumer_offsets_for_partition(topic, partition, group_id)
                .await?
            {
                let lag = (topic_offset - consumer_offset).max(0);
                self.metrics
                    .consumer_lag
                    .with_label_values(&[topic, &partition.to_string(), &group])
                    .set(lag);
                if lag > max_lag {
                    return Ok(LagCheckResult::Exceeded { partition, lag });
                }
            }
        }
        Ok(LagCheckResult::WithinBound)
    }

    /// Like `check_consumer_lag` but compares against a named snapshot with
    /// `maxLag = 0`. "A missing snapshot node is treated as *progressed*,
    /// because no messages were ever produced" at that partition when the
    /// snapshot was taken.
    pub async fn check_consumer_progress(
        &self,
        topic: &str,
        group_id: Option<&str>,
        snapshot_name: &str,
    ) -> IngestResult<ProgressCheckResult> {
        for partition in self.bus.partitions(topic)? {
            let target_offset = match self.read_int(&self.snapshot_path(topic, partition, snapshot_name)).await? {
                Some(v) => v,
                None => continue,
            };
            for (_group, consumer_offset) in self
                .consumer_offsets_for_partition(topic, partition, group_id)
                .await?
            {
                if consumer_offset < target_offset {
                    return Ok(ProgressCheckResult::Behind {
                        partition,
                        consumer_offset,
                        target_offset,
                    });
                }
            }
        }
        Ok(ProgressCheckResult::Progressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::FakeBusProducer;
    use crate::coordinator::FakeCoordinator;

    struct FakeConsumer(std::collections::HashMap<i32, i64>);

    #[async_trait]
    impl ConsumerOffsetSource for FakeConsumer {
        async fn position(&self, _topic: &str, partition: i32) -> IngestResult<i64> {
            Ok(*self.0.get(&partition).unwrap_or(&0))
        }
    }

    fn metrics(bus: Arc<FakeBusProducer>) -> BacklogMetrics {
        BacklogMetrics::new(Arc::new(FakeCoordinator::new()), bus, "/backlog", Arc::new(IngestMetrics::new()))
    }

    #[tokio::test]
    async fn consumer_lag_flags_first_exceeding_partition() {
        let bus = Arc::new(FakeBusProducer::new());
        bus.set_partitions("T", vec![0, 1]);
        bus.set_watermark("T", 0, 100).await;
        bus.set_watermark("T", 1, 200).await;
        let m = metrics(bus.clone());
        let consumer = FakeConsumer([(0, 90), (1, 195)].into_iter().collect());

        m.publish_consumer_backlog(&consumer, "T", "G").await.unwrap();
        let result = m.check_consumer_lag("T", Some("G"), 5).await.unwrap();
        assert_eq!(result, LagCheckResult::Exceeded { partition: 0, lag: 10 });
        assert_eq!(m.metrics.consumer_lag.with_label_values(&["T", "0", "G"]).get(), 10);
    }

    #[tokio::test]
    async fn consumer_lag_within_bound_is_ok() {
        let bus = Arc::new(FakeBusProducer::new());
        bus.set_partitions("T", vec![0]);
        bus.set_watermark("T", 0, 100).await;
        let m = metrics(bus.clone());
        let consumer = FakeConsumer([(0, 98)].into_iter().collect());
        m.publish_consumer_backlog(&consumer, "T", "G").await.unwrap();
        assert_eq!(
            m.check_consumer_lag("T", Some("G"), 5).await.unwrap(),
            LagCheckResult::WithinBound
        );
    }

    #[tokio::test]
    async fn progress_check_flags_behind_partition() {
        let bus = Arc::new(FakeBusProducer::new());
        bus.set_partitions("T", vec![0, 1]);
        bus.set_watermark("T", 0, 100).await;
        bus.set_watermark("T", 1, 200).await;
        let m = metrics(bus.clone());
        m.snapshot_topic_offsets("T", "S").await.unwrap();

        let consumer = FakeConsumer([(0, 100), (1, 199)].into_iter().collect());
        m.publish_consumer_backlog(&consumer, "T", "G").await.unwrap();

        let result = m.check_consumer_progress("T", Some("G"), "S").await.unwrap();
        assert_eq!(
            result,
            ProgressCheckResult::Behind {
                partition: 1,
                consumer_offset: 199,
                target_offset: 200
            }
        );
    }

    #[tokio::test]
    async fn missing_snapshot_counts_as_progressed() {
        let bus = Arc::new(FakeBusProducer::new());
        bus.set_partitions("T", vec![0]);
        let m = metrics(bus);
        let consumer = FakeConsumer(Default::default());
        assert_eq!(
            m.check_consumer_progress("T", Some("G"), "never-taken").await.unwrap(),
            ProgressCheckResult::Progressed
        );
        let _ = consumer;
    }
}
