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

//! Process entrypoint: loads configuration, builds one [`IngestionReader`]
//! per configured source bucket, and runs the tick [`Scheduler`] (spec.md §2).

mod cron;
mod scheduler;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ingest_common::config::{IngestionConfig, SourceBucketConfig};
use ingest_common::metrics::IngestMetrics;
use ingest_common::secret::{NoopDecryptor, SecretDecryptor};
use ingest_core::coordinator::EtcdCoordinator;
use ingest_core::bus::KafkaBusProducer;
use ingest_core::progress::ProgressStore;
use ingest_core::reader::ReaderConfig;
use ingest_core::source_client::{SourceClient, SourceClientConfig};
use ingest_core::IngestionReader;
use tracing::{info, warn};

use crate::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "ingest-cli", about = "Bucket ingestion pipeline")]
struct Args {
    /// Path to the YAML configuration file (spec.md §6).
    #[arg(long, env = "INGEST_CONFIG", default_value = "config.yaml")]
    config: String,
}

fn build_source_client(source: &SourceBucketConfig, decryptor: &dyn SecretDecryptor) -> Result<SourceClient> {
    let secret_key = decryptor
        .decrypt(&source.auth.secret_key)
        .map_err(|e| anyhow::anyhow!("decrypting secret for bucket {}: {e}", source.bucket))?;
    Ok(SourceClient::new(SourceClientConfig {
        host: source.host.clone(),
        port: source.port,
        use_tls: source.use_tls,
        access_key: source.auth.access_key.clone(),
        secret_key,
    }))
}

async fn build_reader(
    source: &SourceBucketConfig,
    cfg: &IngestionConfig,
    coordinator: Arc<EtcdCoordinator>,
    bus: Arc<KafkaBusProducer>,
    metrics: Arc<IngestMetrics>,
    decryptor: &dyn SecretDecryptor,
) -> Result<(String, Arc<IngestionReader>)> {
    let client = build_source_client(source, decryptor)?;
    let fingerprint = source.editable_fingerprint();
    let progress = ProgressStore::new(
        coordinator,
        &cfg.queue_populator.coordinator_root,
        &source.name,
    );

    let reader = IngestionReader::new(
        ReaderConfig {
            source_bucket: source.bucket.clone(),
            target_bucket: source.name.clone(),
            topic: cfg.queue_populator.topic.clone(),
            batch_max_read: cfg.queue_populator.batch_max_read as i64,
            metadata_fanout: cfg.queue_populator.metadata_fanout,
            publish_timeout: std::time::Duration::from_millis(cfg.queue_populator.publish_timeout_ms),
        },
        client,
        fingerprint,
        progress,
        bus,
        Vec::new(),
        metrics,
    );

    reader
        .setup()
        .await
        .with_context(|| format!("setting up reader for bucket {}", source.bucket))?;

    Ok((source.bucket.clone(), Arc::new(reader)))
}

async fn run() -> Result<()> {
    let args = Args::parse();
    let cfg = IngestionConfig::load(&args.config).with_context(|| format!("loading {}", args.config))?;

    info!(sources = cfg.sources.len(), "loaded configuration");

    let coordinator = Arc::new(
        EtcdCoordinator::connect(&cfg.queue_populator.coordinator_endpoints)
            .await
            .context("connecting to coordinator")?,
    );
    let bus = Arc::new(
        KafkaBusProducer::new(&cfg.queue_populator.bus_bootstrap_servers).context("constructing bus producer")?,
    );
    let metrics = Arc::new(IngestMetrics::new());
    let decryptor = NoopDecryptor;

    let mut readers = Vec::with_capacity(cfg.sources.len());
    for source in &cfg.sources {
        match build_reader(source, &cfg, coordinator.clone(), bus.clone(), metrics.clone(), &decryptor).await {
            Ok(entry) => readers.push(entry),
            Err(e) => warn!(bucket = %source.bucket, error = %e, "skipping bucket, setup failed"),
        }
    }

    let schedule = cron::TickSchedule::parse(&cfg.queue_populator.cron_rule)
        .context("parsing queuePopulator.cronRule")?;
    let scheduler = Scheduler::new(readers, schedule, cfg.queue_populator.max_parallel_readers);

    scheduler
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    ingest_common::logging::init_logger();
    run().await
}
