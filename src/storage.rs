//! Persistent store over two sled databases: the URL backlog (overflow
//! for the in-memory frontier) and the findings log.
//!
//! Keys are UTF-8, values serde JSON. Backlog keys are `url:<URL>` so a
//! re-stored URL overwrites its previous entry; result keys carry a
//! unix-second suffix so repeat visits never collide. Cumulative finding
//! counters ride along in the backlog database under a dedicated key and
//! survive restarts.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::models::{now_unix, CrawlMetrics, CrawlMode, CrawlResult, UrlTask};

const URL_PREFIX: &str = "url:";
const RESULT_PREFIX: &str = "result:";
const METRICS_KEY: &str = "metrics";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("failed to open database: {0}")]
    Open(sled::Error),
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted slice of the counters; everything else in [`CrawlMetrics`]
/// is recomputed on read.
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedCounters {
    urls_processed: u64,
    emails_found: u64,
    keywords_found: u64,
    dead_links_found: u64,
    dead_domains_found: u64,
    errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    urls_processed: AtomicU64,
    emails_found: AtomicU64,
    keywords_found: AtomicU64,
    dead_links_found: AtomicU64,
    dead_domains_found: AtomicU64,
    errors: AtomicU64,
}

/// One raw database entry, as served by the database view.
#[derive(Debug, Clone, Serialize)]
pub struct DbEntry {
    pub namespace: String,
    pub key: String,
    pub value: serde_json::Value,
}

/// Dual-namespace persistent store shared by the engine (writer), the
/// dashboard (reader) and the offline explorer.
pub struct Storage {
    url_db: sled::Db,
    results_db: sled::Db,
    counters: Counters,
    start_time: Mutex<u64>,
    allocated_memory_mb: f64,
}

impl Storage {
    /// Open (or create) both databases under `data_dir`, splitting the
    /// memory ceiling 40% backlog / 30% findings; the remaining 30% is
    /// left for the bloom filter, HTTP buffers and the frontier.
    pub fn open<P: AsRef<Path>>(
        data_dir: P,
        mode: CrawlMode,
        max_memory_mb: u64,
    ) -> Result<Self, StorageError> {
        let data_path = data_dir.as_ref();
        std::fs::create_dir_all(data_path)
            .map_err(|e| StorageError::Open(sled::Error::Io(e)))?;

        let total_bytes = max_memory_mb * 1024 * 1024;
        let url_cache = total_bytes * Config::BACKLOG_CACHE_PCT / 100;
        let result_cache = total_bytes * Config::FINDS_CACHE_PCT / 100;

        let url_db = sled::Config::new()
            .path(data_path.join("urls"))
            .cache_capacity(url_cache)
            .open()
            .map_err(StorageError::Open)?;

        let results_db = sled::Config::new()
            .path(data_path.join(mode.finds_dir_name()))
            .cache_capacity(result_cache)
            .open()
            .map_err(StorageError::Open)?;

        let storage = Self {
            url_db,
            results_db,
            counters: Counters::default(),
            start_time: Mutex::new(now_unix()),
            allocated_memory_mb: max_memory_mb as f64 * 0.7,
        };

        storage.load_counters();

        Ok(storage)
    }

    /// Persist a backlog task. Same URL, same key: storing twice is an
    /// overwrite, which collapses duplicate admissions.
    pub fn store_url(&self, task: &UrlTask) -> Result<(), StorageError> {
        let key = format!("{}{}", URL_PREFIX, task.url);
        let value = serde_json::to_vec(task)?;
        self.url_db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    /// Read up to `limit` backlog tasks in key order and delete them in
    /// one batch. Destructive: the caller owns the returned tasks.
    pub fn fetch_urls(&self, limit: usize) -> Result<Vec<UrlTask>, StorageError> {
        let mut tasks = Vec::new();
        let mut batch = sled::Batch::default();

        for entry in self.url_db.scan_prefix(URL_PREFIX.as_bytes()) {
            if tasks.len() >= limit {
                break;
            }

            let (key, value) = entry?;
            match serde_json::from_slice::<UrlTask>(&value) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    // Malformed entries are dropped with their keys so
                    // they cannot poison every future refill
                    tracing::warn!("skipping malformed backlog entry: {}", e);
                }
            }
            batch.remove(key);
        }

        if !tasks.is_empty() {
            self.url_db.apply_batch(batch)?;
        }

        Ok(tasks)
    }

    /// Append a result record and bump the cumulative finding counters.
    pub fn store_result(&self, result: &CrawlResult) -> Result<(), StorageError> {
        let key = format!("{}{}_{}", RESULT_PREFIX, result.url, result.processed_at);
        let value = serde_json::to_vec(result)?;
        self.results_db.insert(key.as_bytes(), value)?;

        self.counters.urls_processed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .emails_found
            .fetch_add(result.emails.len() as u64, Ordering::Relaxed);
        let keyword_hits: u64 = result.keywords.values().sum();
        self.counters
            .keywords_found
            .fetch_add(keyword_hits, Ordering::Relaxed);
        self.counters
            .dead_links_found
            .fetch_add(result.dead_links.len() as u64, Ordering::Relaxed);
        self.counters
            .dead_domains_found
            .fetch_add(result.dead_domains.len() as u64, Ordering::Relaxed);
        if result.error.is_some() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }

        Ok(())
    }

    /// Read up to `limit` results in key order. `CrawlMode::All` returns
    /// everything; a specific mode returns records carrying that finding
    /// kind. Malformed records are logged and skipped.
    pub fn read_results(
        &self,
        mode: CrawlMode,
        limit: usize,
    ) -> Result<Vec<CrawlResult>, StorageError> {
        let mut results = Vec::new();

        for entry in self.results_db.scan_prefix(RESULT_PREFIX.as_bytes()) {
            if results.len() >= limit {
                break;
            }

            let (_, value) = entry?;
            let result = match serde_json::from_slice::<CrawlResult>(&value) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("skipping malformed result entry: {}", e);
                    continue;
                }
            };

            let keep = match mode {
                CrawlMode::All => true,
                CrawlMode::Email => !result.emails.is_empty(),
                CrawlMode::Keywords => !result.keywords.is_empty(),
                CrawlMode::Domains => {
                    !result.dead_links.is_empty() || !result.dead_domains.is_empty()
                }
            };

            if keep {
                results.push(result);
            }
        }

        Ok(results)
    }

    /// Count backlog entries by prefix scan. Linear in backlog size.
    pub fn count_backlog(&self) -> u64 {
        self.url_db.scan_prefix(URL_PREFIX.as_bytes()).count() as u64
    }

    /// Count stored result records.
    pub fn count_results(&self) -> u64 {
        self.results_db.scan_prefix(RESULT_PREFIX.as_bytes()).count() as u64
    }

    /// Raw entries from both namespaces for the database view: up to
    /// `limit` from each, values parsed as JSON where possible.
    pub fn dump_entries(&self, limit: usize) -> Result<Vec<DbEntry>, StorageError> {
        let mut entries = Vec::new();

        for (namespace, db, prefix) in [
            ("urls", &self.url_db, URL_PREFIX),
            ("finds", &self.results_db, RESULT_PREFIX),
        ] {
            let mut taken = 0;
            for entry in db.scan_prefix(prefix.as_bytes()) {
                if taken >= limit {
                    break;
                }
                let (key, value) = entry?;
                entries.push(DbEntry {
                    namespace: namespace.to_string(),
                    key: String::from_utf8_lossy(&key).into_owned(),
                    value: serde_json::from_slice(&value)
                        .unwrap_or_else(|_| serde_json::Value::String("<unreadable>".into())),
                });
                taken += 1;
            }
        }

        Ok(entries)
    }

    /// Counters plus a fresh backlog count and derived rate.
    pub fn snapshot_metrics(&self) -> CrawlMetrics {
        let start_time = *self.start_time.lock();
        let now = now_unix();
        let processed = self.counters.urls_processed.load(Ordering::Relaxed);
        let elapsed = now.saturating_sub(start_time).max(1);

        CrawlMetrics {
            urls_processed: processed,
            urls_in_db: self.count_backlog(),
            emails_found: self.counters.emails_found.load(Ordering::Relaxed),
            keywords_found: self.counters.keywords_found.load(Ordering::Relaxed),
            dead_links_found: self.counters.dead_links_found.load(Ordering::Relaxed),
            dead_domains_found: self.counters.dead_domains_found.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            urls_per_second: processed as f64 / elapsed as f64,
            start_time,
            last_update_time: now,
            ..Default::default()
        }
    }

    /// Background flush loop; sled compacts incrementally, so a periodic
    /// flush is the whole maintenance story.
    pub fn spawn_flush_task(self: Arc<Self>, cancel: CancellationToken) {
        let storage = self;

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(Config::STORE_FLUSH_INTERVAL_SECS));
            ticker.tick().await; // First tick fires immediately; skip it

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = storage.flush() {
                            tracing::warn!("periodic store flush failed: {}", e);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.url_db.flush()?;
        self.results_db.flush()?;
        Ok(())
    }

    /// Persist counters and flush both databases. Call after workers
    /// have joined.
    pub fn close(&self) -> Result<(), StorageError> {
        self.save_counters()?;
        self.flush()
    }

    /// Configured memory cap for both databases, in MiB.
    pub fn memory_usage_mb(&self) -> f64 {
        self.allocated_memory_mb
    }

    fn load_counters(&self) {
        let Ok(Some(value)) = self.url_db.get(METRICS_KEY.as_bytes()) else {
            return;
        };

        match serde_json::from_slice::<PersistedCounters>(&value) {
            Ok(saved) => {
                self.counters
                    .urls_processed
                    .store(saved.urls_processed, Ordering::Relaxed);
                self.counters
                    .emails_found
                    .store(saved.emails_found, Ordering::Relaxed);
                self.counters
                    .keywords_found
                    .store(saved.keywords_found, Ordering::Relaxed);
                self.counters
                    .dead_links_found
                    .store(saved.dead_links_found, Ordering::Relaxed);
                self.counters
                    .dead_domains_found
                    .store(saved.dead_domains_found, Ordering::Relaxed);
                self.counters.errors.store(saved.errors, Ordering::Relaxed);
            }
            Err(e) => tracing::warn!("discarding unreadable persisted counters: {}", e),
        }
    }

    fn save_counters(&self) -> Result<(), StorageError> {
        let saved = PersistedCounters {
            urls_processed: self.counters.urls_processed.load(Ordering::Relaxed),
            emails_found: self.counters.emails_found.load(Ordering::Relaxed),
            keywords_found: self.counters.keywords_found.load(Ordering::Relaxed),
            dead_links_found: self.counters.dead_links_found.load(Ordering::Relaxed),
            dead_domains_found: self.counters.dead_domains_found.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        };

        let value = serde_json::to_vec(&saved)?;
        self.url_db.insert(METRICS_KEY.as_bytes(), value)?;
        Ok(())
    }
}

impl Drop for Storage {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
