use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Where a console line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineSource {
    Stdout,
    RconResponse,
    System,
}

/// One immutable console record. `seq` is a per-server monotonic cursor that
/// survives eviction, so pollers can resume from where they left off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleLine {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub source: LineSource,
    pub text: String,
}

struct Inner {
    lines: VecDeque<ConsoleLine>,
    next_seq: u64,
}

/// Bounded per-server console log: a FIFO ring buffer guarded by its own
/// mutex (never shared across servers) plus a broadcast feed for live tails.
pub struct ConsoleBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    feed: broadcast::Sender<ConsoleLine>,
}

impl ConsoleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (feed, _) = broadcast::channel(capacity);
        Self {
            capacity,
            inner: Mutex::new(Inner {
                lines: VecDeque::with_capacity(capacity),
                next_seq: 1,
            }),
            feed,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The only mutator. Evicts the oldest line once the buffer is full.
    pub fn append(&self, source: LineSource, text: impl Into<String>) -> ConsoleLine {
        let line = {
            let mut inner = self.inner.lock();
            let line = ConsoleLine {
                seq: inner.next_seq,
                timestamp: Utc::now(),
                source,
                text: text.into(),
            };
            inner.next_seq += 1;
            if inner.lines.len() == self.capacity {
                inner.lines.pop_front();
            }
            inner.lines.push_back(line.clone());
            line
        };
        // Nobody tailing is fine.
        let _ = self.feed.send(line.clone());
        line
    }

    /// The most recent `limit` lines, oldest first.
    pub fn snapshot(&self, limit: usize) -> Vec<ConsoleLine> {
        let inner = self.inner.lock();
        let skip = inner.lines.len().saturating_sub(limit);
        inner.lines.iter().skip(skip).cloned().collect()
    }

    /// Every retained line with a sequence number after `cursor`.
    pub fn lines_since(&self, cursor: u64) -> Vec<ConsoleLine> {
        let inner = self.inner.lock();
        inner
            .lines
            .iter()
            .filter(|line| line.seq > cursor)
            .cloned()
            .collect()
    }

    /// Sequence number of the newest line, 0 when empty.
    pub fn last_seq(&self) -> u64 {
        self.inner.lock().next_seq - 1
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live tail starting from now; history is served by `snapshot`.
    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleLine> {
        self.feed.subscribe()
    }
}
