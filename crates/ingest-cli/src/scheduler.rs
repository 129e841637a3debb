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

//! Top-level tick scheduler (spec.md §2, §5).
//!
//! Fires on `queuePopulator.cronRule`'s occurrences; for every configured
//! bucket, it spawns one batch-cycle attempt bounded by a process-wide
//! semaphore sized `maxParallelReaders`. A reader whose previous batch is
//! still running just returns `BatchOutcome::NoOp` (`IngestionReader::tick`
//! guards that internally), so an overlapping tick never queues work twice
//! for the same bucket.

use std::sync::Arc;

use chrono::Utc;
use ingest_core::IngestionReader;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::cron::TickSchedule;

pub struct Scheduler {
    readers: Vec<(String, Arc<IngestionReader>)>,
    schedule: TickSchedule,
    max_parallel: usize,
}

impl Scheduler {
    pub fn new(readers: Vec<(String, Arc<IngestionReader>)>, schedule: TickSchedule, max_parallel: usize) -> Self {
        Self {
            readers,
            schedule,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Runs until `shutdown` resolves. Each tick fans out across buckets
    /// with bounded concurrency (spec.md §5 "Fan-out": "Bucket-level
    /// parallelism is bounded by `maxParallelReaders`").
    pub async fn run(&self, shutdown: impl std::future::Future<Output = ()>) {
        tokio::pin!(shutdown);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        loop {
            let delay = match self.schedule.next_delay(Utc::now()) {
                Ok(d) => d,
                Err(e) => {
                    error!(error = %e, "computing next cron occurrence, retrying in 60s");
                    std::time::Duration::from_secs(60)
                }
            };

            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler shutting down");
                    return;
                }
                _ = tokio::time::sleep(delay) => {
                    self.fire_tick(&semaphore).await;
                }
            }
        }
    }

    async fn fire_tick(&self, semaphore: &Arc<Semaphore>) {
        let mut handles = Vec::with_capacity(self.readers.len());
        for (bucket, reader) in &self.readers {
            let bucket = bucket.clone();
            let reader = reader.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("semaphore closed, skipping tick");
                        return;
                    }
                };
                if let Err(e) = reader.tick().await {
                    error!(bucket = %bucket, error = %e, "batch cycle aborted");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}
