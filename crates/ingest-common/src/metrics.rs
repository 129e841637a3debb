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

use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};

/// Process-wide metrics registry and the handful of series every reader and
/// the backlog checker update. Mirrors the teacher's practice of one
/// `IngestMetrics` struct registered once and cloned (cheaply, behind `Arc`
/// internals) into every worker.
#[derive(Clone)]
pub struct IngestMetrics {
    pub registry: Registry,
    pub batches_total: IntCounterVec,
    pub events_published_total: IntCounterVec,
    pub batch_latency_seconds: HistogramVec,
    pub log_offset: IntGaugeVec,
    pub consumer_lag: IntGaugeVec,
}

impl IngestMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let batches_total = IntCounterVec::new(
            prometheus::Opts::new(
                "ingest_batches_total",
                "Batch cycles completed per bucket, labeled by outcome",
            ),
            &["bucket", "outcome"],
        )
        .unwrap();

        let events_published_total = IntCounterVec::new(
            prometheus::Opts::new(
                "ingest_events_published_total",
                "Canonical events published to the bus per bucket",
            ),
            &["bucket"],
        )
        .unwrap();

        let batch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "ingest_batch_latency_seconds",
                "Wall-clock duration of one batch cycle",
            ),
            &["bucket", "phase"],
        )
        .unwrap();

        let log_offset = IntGaugeVec::new(
            prometheus::Opts::new("ingest_log_offset", "Last checkpointed tail log offset"),
            &["bucket"],
        )
        .unwrap();

        let consumer_lag = IntGaugeVec::new(
            prometheus::Opts::new(
                "ingest_consumer_lag",
                "topicOffset - consumerOffset per partition",
            ),
            &["topic", "partition", "group"],
        )
        .unwrap();

        for c in [
            Box::new(batches_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(events_published_total.clone()),
            Box::new(batch_latency_seconds.clone()),
            Box::new(log_offset.clone()),
            Box::new(consumer_lag.clone()),
        ] {
            registry.register(c).expect("metric name collision");
        }

        Self {
            registry,
            batches_total,
            events_published_total,
            batch_latency_seconds,
            log_offset,
            consumer_lag,
        }
    }
}

impl Default for IngestMetrics {
    fn default() -> Self {
        Self::new()
    }
}
