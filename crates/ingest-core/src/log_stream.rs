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

//! Log Record Stream (C3, spec.md §4.3).
//!
//! Consumes a streaming JSON response of shape `{info:{...}, log:[...]}`
//! and produces a lazy, forward-only sequence of log records. Parsing is
//! incremental: only as many bytes as are needed to locate the next
//! complete value are ever held in memory.

use futures::{Stream, StreamExt};
use ingest_common::error::{IngestError, IngestResult};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::json_scan::{find_byte, find_substr, scan_value, skip_ws};
use crate::types::{LogRecord, LogResponseHeader};

const RECORD_CHANNEL_CAPACITY: usize = 64;

pub struct LogRecordStream {
    inner: ReceiverStream<IngestResult<LogRecord>>,
}

impl Stream for LogRecordStream {
    type Item = IngestResult<LogRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl LogRecordStream {
    /// Empty, already-finished stream — used for the graceful 404/416
    /// completion before any record is delivered.
    pub fn empty() -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// Parses a `readLog` response body. Awaits only until the `info`
    /// header is located (which the caller needs immediately to compute
    /// the next offset); the `log` array is then drained lazily by a
    /// background task as the caller polls the returned stream.
    pub async fn parse<B, E>(mut body: B) -> IngestResult<(LogResponseHeader, Self)>
    where
        B: Stream<Item = Result<bytes::Bytes, E>> + Unpin + Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let mut buf: Vec<u8> = Vec::new();
        let (header, info_end) = loop {
            if let Some(info_key) = find_substr(&buf, 0, b"\"info\"") {
                if let Some(colon) = find_byte(&buf, info_key + 6, b':') {
                    let value_start = skip_ws(&buf, colon + 1);
                    if let Some(end) = scan_value(&buf, value_start) {
                        let header: LogResponseHeader = serde_json::from_slice(&buf[value_start..end])?;
                        break (header, end);
                    }
                }
            }
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Err(IngestError::Transient(e.into())),
                None => {
                    return Err(IngestError::Malformed(
                        "log stream ended before info header was seen".into(),
                    ))
                }
            }
        };

        let (tx, rx) = mpsc::channel(RECORD_CHANNEL_CAPACITY);
        let remainder = buf[info_end..].to_vec();
        tokio::spawn(drain_log_array(body, remainder, tx));

        Ok((
            header,
            Self {
                inner: ReceiverStream::new(rx),
            },
        ))
    }
}

async fn drain_log_array<B, E>(
    mut body: B,
    mut buf: Vec<u8>,
    tx: mpsc::Sender<IngestResult<LogRecord>>,
) where
    B: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    macro_rules! refill_or_finish {
        () => {
            match body.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    let _ = tx.send(Err(IngestError::Transient(e.into()))).await;
                    return;
                }
                None => {
                    let _ = tx
                        .send(Err(IngestError::Malformed(
                            "log stream ended mid-array".into(),
                        )))
                        .await;
                    return;
                }
            }
        };
    }

    // Locate the "log" key, its colon, and the start of its value.
    let mut cursor = 0usize;
    let array_start = loop {
        if let Some(log_key) = find_substr(&buf, cursor, b"\"log\"") {
            if let Some(colon) = find_byte(&buf, log_key + 5, b':') {
                let value_start = skip_ws(&buf, colon + 1);
                if value_start < buf.len() {
                    break value_start;
                }
            }
            cursor = log_key;
        }
        refill_or_finish!();
    };

    if buf[array_start] == b'n' {
        // `"log": null` — graceful empty completion (404/416 shape).
        return;
    }
    if buf[array_start] != b'[' {
        let _ = tx
            .send(Err(IngestError::Malformed(format!(
                "expected '[' or null for \"log\", found byte {:#x}",
                buf[array_start]
            ))))
            .await;
        return;
    }

    let mut pos = array_start + 1;
    loop {
        pos = skip_ws(&buf, pos);
        while pos >= buf.len() {
            refill_or_finish!();
            pos = skip_ws(&buf, pos);
        }
        if buf[pos] == b']' {
            return;
        }
        let end = loop {
            if let Some(end) = scan_value(&buf, pos) {
                break end;
            }
            refill_or_finish!();
        };
        match serde_json::from_slice::<LogRecord>(&buf[pos..end]) {
            Ok(record) => {
                if tx.send(Ok(record)).await.is_err() {
                    return; // receiver dropped; caller stopped reading.
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e.into())).await;
                return;
            }
        }
        pos = end;
        pos = skip_ws(&buf, pos);
        while pos >= buf.len() {
            refill_or_finish!();
            pos = skip_ws(&buf, pos);
        }
        if buf[pos] == b',' {
            pos += 1;
        } else if buf[pos] == b']' {
            return;
        } else {
            let _ = tx
                .send(Err(IngestError::Malformed(
                    "expected ',' or ']' after log record".into(),
                )))
                .await;
            return;
        }
        // Bound memory growth: drop bytes already fully consumed.
        if pos > 1 << 16 {
            buf.drain(0..pos);
            pos = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<bytes::Bytes, std::io::Error>> + Unpin {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(bytes::Bytes::from(p.as_bytes().to_vec())))
                .collect::<Vec<_>>(),
        )
    }

    #[tokio::test]
    async fn parses_header_then_records_across_chunk_boundaries() {
        let body = chunks(&[
            r#"{"info":{"start":7,"cseq":10,"prune":0},"#,
            r#""log":[{"db":"b1","entries":[{"key":"a","value":"1"}]},"#,
            r#"{"db":"b1","entries":[{"type":"del","key":"b"}]}]}"#,
        ]);
        let (header, mut stream) = LogRecordStream::parse(body).await.unwrap();
        assert_eq!(header.start, Some(7));
        assert_eq!(header.cseq, Some(10));

        let r1 = stream.next().await.unwrap().unwrap();
        assert_eq!(r1.db.as_deref(), Some("b1"));
        assert_eq!(r1.entries[0].effective_type(), "put");

        let r2 = stream.next().await.unwrap().unwrap();
        assert_eq!(r2.entries[0].effective_type(), "del");

        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn null_log_array_completes_empty() {
        let body = chunks(&[r#"{"info":{"start":null,"cseq":null,"prune":null},"log":null}"#]);
        let (header, mut stream) = LogRecordStream::parse(body).await.unwrap();
        assert!(header.start.is_none());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn malformed_record_yields_single_error() {
        let body = chunks(&[r#"{"info":{"start":1},"log":[{"db":1}"#, r#"]}"#]);
        let (_header, mut stream) = LogRecordStream::parse(body).await.unwrap();
        let err = stream.next().await.unwrap();
        assert!(err.is_err());
    }
}
