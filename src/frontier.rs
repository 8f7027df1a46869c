//! Bounded in-memory URL frontier.
//!
//! A min-heap keyed on `depth * 1000 + creation_unix_seconds` (lower
//! pops first) with a hard capacity. Callers route overflow to the
//! backlog store; when a pop leaves the heap under 20% of capacity a
//! single refill task pulls backlog entries back in. Push and pop never
//! block.

use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

use crate::config::Config;
use crate::models::UrlTask;
use crate::storage::Storage;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
}

#[derive(PartialEq, Eq)]
struct HeapItem {
    priority: i64,
    /// Insertion sequence; makes equal priorities pop in admission order
    seq: u64,
    task: UrlTask,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.seq).cmp(&(other.priority, other.seq))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct FrontierInner {
    heap: BinaryHeap<Reverse<HeapItem>>,
    refilling: bool,
}

/// Priority frontier backed by the persistent store for overflow.
pub struct PriorityFrontier {
    inner: Mutex<FrontierInner>,
    storage: Arc<Storage>,
    max_size: usize,
    refill_threshold: usize,
    seq: AtomicU64,
    /// Handle to ourselves for spawning the refill task from `pop`
    self_ref: Weak<PriorityFrontier>,
}

impl PriorityFrontier {
    pub fn new(storage: Arc<Storage>) -> Arc<Self> {
        Self::with_capacity(storage, Config::MAX_QUEUE_SIZE)
    }

    pub fn with_capacity(storage: Arc<Storage>, max_size: usize) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            inner: Mutex::new(FrontierInner {
                heap: BinaryHeap::new(),
                refilling: false,
            }),
            storage,
            max_size,
            refill_threshold: (max_size as f64 * Config::REFILL_THRESHOLD).ceil() as usize,
            seq: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        })
    }

    /// Non-blocking push; `QueueError::Full` tells the caller to spill
    /// the task to the backlog store instead.
    pub fn push(&self, task: UrlTask) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();

        if inner.heap.len() >= self.max_size {
            return Err(QueueError::Full);
        }

        let item = HeapItem {
            priority: task.priority(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            task,
        };
        inner.heap.push(Reverse(item));

        Ok(())
    }

    /// Non-blocking pop. Dropping under the refill threshold spawns a
    /// single refill from the backlog; the `refilling` flag under the
    /// queue lock keeps it a singleton.
    pub fn pop(&self) -> Result<UrlTask, QueueError> {
        let mut inner = self.inner.lock();

        let item = inner.heap.pop().ok_or(QueueError::Empty)?;

        if inner.heap.len() < self.refill_threshold && !inner.refilling {
            // Refill needs a live Arc and a runtime to spawn on; without
            // either the next qualifying pop tries again
            if let (Some(frontier), Ok(handle)) = (
                self.self_ref.upgrade(),
                tokio::runtime::Handle::try_current(),
            ) {
                inner.refilling = true;
                drop(inner);

                handle.spawn(async move {
                    frontier.refill_from_storage();
                });
            }
        }

        Ok(item.0.task)
    }

    pub fn size(&self) -> usize {
        self.inner.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.max_size
    }

    /// Rough heap footprint for the memory gauge.
    pub fn memory_usage_mb(&self) -> f64 {
        (self.size() * Config::BYTES_PER_TASK) as f64 / 1024.0 / 1024.0
    }

    fn refill_from_storage(&self) {
        // Always clear the flag, even on storage errors
        let result = self.do_refill();
        self.inner.lock().refilling = false;

        if let Err(e) = result {
            tracing::warn!("frontier refill failed: {}", e);
        }
    }

    fn do_refill(&self) -> Result<(), crate::storage::StorageError> {
        let needed = self.max_size.saturating_sub(self.size());
        if needed == 0 {
            return Ok(());
        }

        let tasks = self.storage.fetch_urls(needed)?;
        tracing::debug!("refilling frontier with {} backlog tasks", tasks.len());

        let mut overflow = Vec::new();
        let mut full = false;
        for task in tasks {
            if full {
                overflow.push(task);
                continue;
            }
            if let Err(QueueError::Full) = self.push(task.clone()) {
                full = true;
                overflow.push(task);
            }
        }

        // fetch_urls deleted these keys; put what did not fit back
        for task in &overflow {
            if let Err(e) = self.storage.store_url(task) {
                tracing::warn!("failed to re-store overflow task {}: {}", task.url, e);
            }
        }

        Ok(())
    }
}
