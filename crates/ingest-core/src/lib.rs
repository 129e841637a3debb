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

pub mod backlog;
pub mod bus;
pub mod coordinator;
pub mod event;
pub mod extension;
pub mod json_scan;
pub mod log_stream;
pub mod progress;
pub mod reader;
pub mod snapshot;
pub mod source_client;
pub mod tail;
pub mod types;

pub use event::CanonicalEvent;
pub use reader::{IngestionReader, ReaderConfig};
