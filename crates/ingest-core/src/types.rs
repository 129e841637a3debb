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

//! Wire types shared by the Source Client and the Log Record Stream
//! (spec.md §3, §6).

use serde::{Deserialize, Serialize};

/// One `entries[]` element of a log record batch.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub entry_type: Option<String>,
    pub key: Option<String>,
    pub value: Option<String>,
}

impl LogEntry {
    /// "Every `entry` with no `type` field is treated as `type = "put"`."
    pub fn effective_type(&self) -> &str {
        self.entry_type.as_deref().unwrap_or("put")
    }
}

/// A batch `{ db?, entries[] }` (spec.md §3).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogRecord {
    pub db: Option<String>,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
}

/// The `info` header of a `readLog` response.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LogResponseHeader {
    pub start: Option<i64>,
    pub cseq: Option<i64>,
    pub prune: Option<i64>,
}

impl LogResponseHeader {
    pub fn empty() -> Self {
        Self {
            start: None,
            cseq: None,
            prune: None,
        }
    }
}

/// Object metadata as returned by `getObjectMetadata`; opaque to the
/// pipeline beyond needing to be re-serialized as the canonical event's
/// `value`.
pub type ObjectMetadata = serde_json::Value;
