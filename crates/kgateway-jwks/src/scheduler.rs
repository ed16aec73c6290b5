//! Fetch scheduling for JWKS sources
//!
//! A min-heap of due times. Entries hold a shared handle to their source;
//! removing a source only flags the handle as deleted and the stale entry
//! is dropped when it reaches the top of the heap.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Failed fetches are retried at most this many times before waiting a full TTL
pub const MAX_RETRIES: u32 = 5;

/// Delay unit for retries: attempt `k` waits `RETRY_BASE * (k + 1)`
pub const RETRY_BASE: Duration = Duration::from_secs(5);

/// A remote keyset to keep fresh
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JwksSource {
    /// Keyset URL
    pub url: String,
    /// Refresh interval after a successful fetch
    pub ttl: Duration,
}

impl JwksSource {
    /// Create a source
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            ttl,
        }
    }
}

/// Live registration of a source, shared with its heap entries
#[derive(Debug)]
pub struct SourceDescriptor {
    /// The source being tracked
    pub source: JwksSource,
    deleted: AtomicBool,
}

impl SourceDescriptor {
    /// Register a source
    pub fn new(source: JwksSource) -> Arc<Self> {
        Arc::new(Self {
            source,
            deleted: AtomicBool::new(false),
        })
    }

    /// Tombstone this registration
    pub fn mark_deleted(&self) {
        self.deleted.store(true, AtomicOrdering::Release);
    }

    /// Whether the registration was removed or replaced
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(AtomicOrdering::Acquire)
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.source.url
    }

    /// Source TTL
    pub fn ttl(&self) -> Duration {
        self.source.ttl
    }
}

/// One pending fetch
#[derive(Clone)]
pub struct ScheduledFetch {
    /// When the fetch becomes due
    pub due_at: Instant,
    /// Source to fetch
    pub descriptor: Arc<SourceDescriptor>,
    /// Failed attempts since the last success or TTL wait
    pub retry: u32,
    seq: u64,
}

impl fmt::Debug for ScheduledFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledFetch")
            .field("url", &self.descriptor.url())
            .field("due_at", &self.due_at)
            .field("retry", &self.retry)
            .finish()
    }
}

impl PartialEq for ScheduledFetch {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledFetch {}

impl PartialOrd for ScheduledFetch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledFetch {
    // Insertion order breaks ties between equal due times
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due_at, self.seq).cmp(&(other.due_at, other.seq))
    }
}

/// When to try again after a failed fetch at `now`.
///
/// Retries back off linearly until [`MAX_RETRIES`], after which the source
/// waits a full TTL and the count starts over.
pub fn after_failure(now: Instant, retry: u32, ttl: Duration) -> (Instant, u32) {
    if retry < MAX_RETRIES {
        (now + RETRY_BASE * (retry + 1), retry + 1)
    } else {
        (now + ttl, 0)
    }
}

/// Min-heap of pending fetches
#[derive(Debug, Default)]
pub struct Scheduler {
    heap: BinaryHeap<Reverse<ScheduledFetch>>,
    next_seq: u64,
}

impl Scheduler {
    /// Create an empty scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a fetch
    pub fn push(&mut self, descriptor: Arc<SourceDescriptor>, due_at: Instant, retry: u32) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(ScheduledFetch {
            due_at,
            descriptor,
            retry: retry.min(MAX_RETRIES),
            seq,
        }));
    }

    /// Earliest due time, tombstones included
    pub fn peek_due_at(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(entry)| entry.due_at)
    }

    /// Pop the earliest live entry due at or before `now`.
    ///
    /// Tombstoned entries met on the way are discarded.
    pub fn pop_due(&mut self, now: Instant) -> Option<ScheduledFetch> {
        loop {
            if self.peek_due_at()? > now {
                return None;
            }
            let Reverse(entry) = self.heap.pop()?;
            if !entry.descriptor.is_deleted() {
                return Some(entry);
            }
        }
    }

    /// Live entries for a URL, earliest first
    pub fn pending(&self, url: &str) -> Vec<&ScheduledFetch> {
        let mut entries: Vec<_> = self
            .heap
            .iter()
            .map(|Reverse(entry)| entry)
            .filter(|entry| entry.descriptor.url() == url && !entry.descriptor.is_deleted())
            .collect();
        entries.sort();
        entries
    }

    /// Number of queued entries, tombstones included
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
