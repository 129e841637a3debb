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

//! Tail Producer (C5, spec.md §4.5).
//!
//! A thin wrapper over `SourceClient::read_log`: calls the source's
//! log-read endpoint in one bounded window and hands the header plus the
//! Log Record Stream back to the caller.

use ingest_common::error::IngestResult;

use crate::log_stream::LogRecordStream;
use crate::source_client::SourceClient;
use crate::types::LogResponseHeader;

pub struct TailProducer {
    client: SourceClient,
}

impl TailProducer {
    pub fn new(client: SourceClient) -> Self {
        Self { client }
    }

    /// `readLog(partitionId, startSeq, startSeq + limit, targetLeader=false)`.
    pub async fn read_batch(
        &self,
        partition_id: i64,
        start_seq: i64,
        limit: i64,
    ) -> IngestResult<(LogResponseHeader, Option<LogRecordStream>)> {
        self.client
            .read_log(partition_id, start_seq, start_seq + limit, false)
            .await
    }
}
