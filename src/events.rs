//! Incremental reader for newline-delimited workflow event streams.
//!
//! Backends report long-running flows as a body of JSON objects, one per
//! line, tagged by `type`. Chunks arrive at arbitrary boundaries, so the
//! reader keeps a byte buffer and only decodes complete lines. Whatever is
//! left when the transport ends is parsed as one final line.

use crate::error::StudioError;
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream::BoxStream};
use serde::Deserialize;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::{debug, warn};

const LOG_PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Progress {
        step: String,
        status: ProgressStatus,
    },
    Result {
        #[serde(default)]
        data: Value,
    },
    Error {
        #[serde(rename = "error")]
        message: String,
    },
}

/// Splits raw chunks into complete lines and parses each into an event.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the events from every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<WorkflowEvent> {
        self.buffer.extend_from_slice(chunk);
        let Some(last_newline) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return Vec::new();
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);
        complete
            .split(|b| *b == b'\n')
            .filter_map(parse_line)
            .collect()
    }

    /// Parses whatever is still buffered after the transport ended.
    pub fn finish(&mut self) -> Option<WorkflowEvent> {
        let remaining = std::mem::take(&mut self.buffer);
        parse_line(&remaining)
    }
}

fn parse_line(raw: &[u8]) -> Option<WorkflowEvent> {
    let line = match std::str::from_utf8(raw) {
        Ok(line) => line.trim(),
        Err(err) => {
            warn!(target = "studio.stream", error = %err, "skipping non-utf8 event line");
            return None;
        }
    };
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<WorkflowEvent>(line) {
        Ok(event) => Some(event),
        Err(err) => {
            let preview: String = line.chars().take(LOG_PREVIEW_CHARS).collect();
            warn!(target = "studio.stream", error = %err, line = %preview, "skipping malformed event line");
            None
        }
    }
}

pub type ChunkStream = BoxStream<'static, Result<Bytes, StudioError>>;

/// Lazy, single-pass sequence of events over a chunked body.
pub struct EventStream {
    chunks: ChunkStream,
    decoder: LineDecoder,
    pending: VecDeque<WorkflowEvent>,
    exhausted: bool,
}

impl EventStream {
    pub fn new<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, StudioError>> + Send + 'static,
    {
        Self {
            chunks: chunks.boxed(),
            decoder: LineDecoder::new(),
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Yields the next event, `Ok(None)` once the body is drained, or the
    /// transport error that cut the body short.
    pub async fn next_event(&mut self) -> Result<Option<WorkflowEvent>, StudioError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.exhausted {
                return Ok(None);
            }
            match self.chunks.next().await {
                Some(Ok(chunk)) => self.pending.extend(self.decoder.push(&chunk)),
                Some(Err(err)) => {
                    self.exhausted = true;
                    return Err(err);
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }

    /// Drains the stream, handing every event to `on_event`, and resolves
    /// to the terminal payload.
    pub async fn collect_with<F>(mut self, mut on_event: F) -> Result<Option<Value>, StudioError>
    where
        F: FnMut(&WorkflowEvent),
    {
        let mut outcome = StreamOutcome::default();
        while let Some(event) = self.next_event().await? {
            on_event(&event);
            outcome.record(event);
        }
        outcome.finish()
    }
}

/// Folds events into the terminal value of a stream. An `error` event wins
/// over any `result`, whichever arrived first.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    result: Option<Value>,
    error: Option<String>,
}

impl StreamOutcome {
    pub fn record(&mut self, event: WorkflowEvent) {
        match event {
            WorkflowEvent::Progress { .. } => {}
            WorkflowEvent::Result { data } => {
                if self.result.is_some() {
                    debug!(target = "studio.stream", "replacing earlier result event");
                }
                self.result = Some(data);
            }
            WorkflowEvent::Error { message } => {
                if self.error.is_none() {
                    self.error = Some(message);
                }
            }
        }
    }

    pub fn finish(self) -> Result<Option<Value>, StudioError> {
        match self.error {
            Some(message) => Err(StudioError::Remote(message)),
            None => Ok(self.result),
        }
    }
}
