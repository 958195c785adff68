//! Append-only event log
//!
//! A single writer assigns sequence numbers; history is never mutated or
//! truncated. Subscribers get live events over a broadcast channel and can
//! backfill from any sequence number. An optional newline-delimited JSON
//! sink mirrors the stream to disk for external tailers.

use chrono::Utc;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use tokio::sync::broadcast;

use super::{Event, EventKind};
use crate::error::Result;

const BROADCAST_CAPACITY: usize = 1024;

struct LogInner {
    history: Vec<Event>,
    next_sequence: u64,
}

/// The kernel's only history
pub struct EventLog {
    inner: Mutex<LogInner>,
    live: broadcast::Sender<Event>,
    sink: Option<Mutex<File>>,
}

impl EventLog {
    /// In-memory log with no disk sink
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Mutex::new(LogInner {
                history: Vec::new(),
                next_sequence: 0,
            }),
            live,
            sink: None,
        }
    }

    /// Log mirrored to an append-only NDJSON file
    pub fn with_sink<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let mut log = Self::new();
        log.sink = Some(Mutex::new(file));
        Ok(log)
    }

    /// Record one outcome and hand back the stamped envelope
    pub fn append(
        &self,
        kind: EventKind,
        principal: impl Into<String>,
        data: serde_json::Value,
    ) -> Event {
        let event = {
            let mut inner = self.inner.lock();
            let event = Event {
                sequence: inner.next_sequence,
                timestamp: Utc::now(),
                kind,
                principal: principal.into(),
                data,
            };
            inner.next_sequence += 1;
            inner.history.push(event.clone());
            event
        };

        if let Some(sink) = &self.sink {
            // Sink write failure must never fail the mutation it records.
            if let Err(err) = write_line(&mut sink.lock(), &event) {
                tracing::warn!(sequence = event.sequence, %err, "event sink write failed");
            }
        }

        let _ = self.live.send(event.clone());
        event
    }

    /// Subscribe to events appended after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.live.subscribe()
    }

    /// All events with `sequence >= from`, in order
    pub fn replay_from(&self, from: u64) -> Vec<Event> {
        let inner = self.inner.lock();
        match inner.history.binary_search_by_key(&from, |e| e.sequence) {
            Ok(idx) | Err(idx) => inner.history[idx..].to_vec(),
        }
    }

    /// Sequence number the next event will receive
    pub fn next_sequence(&self) -> u64 {
        self.inner.lock().next_sequence
    }

    pub fn len(&self) -> usize {
        self.inner.lock().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().history.is_empty()
    }

    /// Count of recorded events matching a predicate
    pub fn count_matching(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.inner.lock().history.iter().filter(|e| predicate(e)).count()
    }

    /// Snapshot of the kinds recorded so far, in sequence order
    pub fn kinds(&self) -> Vec<EventKind> {
        self.inner.lock().history.iter().map(|e| e.kind).collect()
    }

    /// Skip the counter forward when restoring a kernel snapshot.
    ///
    /// Restored kernels keep assigning numbers above everything the original
    /// kernel emitted; history before the snapshot lives in the sink file.
    pub(crate) fn fast_forward(&self, next_sequence: u64) {
        let mut inner = self.inner.lock();
        if next_sequence > inner.next_sequence {
            inner.next_sequence = next_sequence;
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

fn write_line(file: &mut File, event: &Event) -> std::io::Result<()> {
    let line = serde_json::to_string(event).map_err(std::io::Error::other)?;
    writeln!(file, "{line}")?;
    file.flush()
}
