//! Thread-safe metrics collection for crawl progress monitoring.
//!
//! Counters are plain atomics bumped from the hot path; the composite
//! snapshot is a best-effort copy, not a transaction. A background
//! ticker refreshes the gauges (active workers, queue size, backlog
//! count) every few seconds.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::bloom::UrlBloom;
use crate::config::Config;
use crate::frontier::PriorityFrontier;
use crate::models::{now_unix, CrawlMetrics, MemoryBreakdown};
use crate::storage::Storage;

/// References used to attribute memory to components in the snapshot.
struct MemoryTrackers {
    bloom: Arc<UrlBloom>,
    storage: Arc<Storage>,
    frontier: Arc<PriorityFrontier>,
}

struct RateWindow {
    last_check: Instant,
    last_count: u64,
    last_rate: f64,
}

pub struct MetricsCollector {
    urls_processed: AtomicU64,
    emails_found: AtomicU64,
    keywords_found: AtomicU64,
    dead_links_found: AtomicU64,
    dead_domains_found: AtomicU64,
    links_checked: AtomicU64,
    errors: AtomicU64,
    active_workers: AtomicU64,
    urls_in_queue: AtomicU64,
    urls_in_db: AtomicU64,
    start_time: u64,
    started: Instant,
    window: Mutex<RateWindow>,
    trackers: Mutex<Option<MemoryTrackers>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            urls_processed: AtomicU64::new(0),
            emails_found: AtomicU64::new(0),
            keywords_found: AtomicU64::new(0),
            dead_links_found: AtomicU64::new(0),
            dead_domains_found: AtomicU64::new(0),
            links_checked: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
            urls_in_queue: AtomicU64::new(0),
            urls_in_db: AtomicU64::new(0),
            start_time: now_unix(),
            started: Instant::now(),
            window: Mutex::new(RateWindow {
                last_check: Instant::now(),
                last_count: 0,
                last_rate: 0.0,
            }),
            trackers: Mutex::new(None),
        }
    }

    /// Wire the component memory reporters once at startup.
    pub fn set_memory_trackers(
        &self,
        bloom: Arc<UrlBloom>,
        storage: Arc<Storage>,
        frontier: Arc<PriorityFrontier>,
    ) {
        *self.trackers.lock() = Some(MemoryTrackers {
            bloom,
            storage,
            frontier,
        });
    }

    pub fn add_urls_processed(&self, delta: u64) {
        self.urls_processed.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_emails_found(&self, delta: u64) {
        self.emails_found.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_keywords_found(&self, delta: u64) {
        self.keywords_found.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_dead_links_found(&self, delta: u64) {
        self.dead_links_found.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_dead_domains_found(&self, delta: u64) {
        self.dead_domains_found.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_links_checked(&self, delta: u64) {
        self.links_checked.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn add_errors(&self, delta: u64) {
        self.errors.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.active_workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_stopped(&self) {
        self.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_workers(&self) -> u64 {
        self.active_workers.load(Ordering::Relaxed)
    }

    pub fn set_urls_in_queue(&self, count: u64) {
        self.urls_in_queue.store(count, Ordering::Relaxed);
    }

    pub fn set_urls_in_db(&self, count: u64) {
        self.urls_in_db.store(count, Ordering::Relaxed);
    }

    /// Best-effort composite snapshot with derived rate and memory
    /// breakdown.
    pub fn snapshot(&self) -> CrawlMetrics {
        let memory_breakdown = self.memory_breakdown();

        CrawlMetrics {
            urls_processed: self.urls_processed.load(Ordering::Relaxed),
            urls_in_queue: self.urls_in_queue.load(Ordering::Relaxed),
            urls_in_db: self.urls_in_db.load(Ordering::Relaxed),
            emails_found: self.emails_found.load(Ordering::Relaxed),
            keywords_found: self.keywords_found.load(Ordering::Relaxed),
            dead_links_found: self.dead_links_found.load(Ordering::Relaxed),
            dead_domains_found: self.dead_domains_found.load(Ordering::Relaxed),
            links_checked: self.links_checked.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            active_workers: self.active_workers.load(Ordering::Relaxed),
            memory_usage_mb: memory_breakdown.total_mb,
            urls_per_second: self.urls_per_second(),
            start_time: self.start_time,
            last_update_time: now_unix(),
            memory_breakdown,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn total_finds(&self) -> u64 {
        self.emails_found.load(Ordering::Relaxed)
            + self.keywords_found.load(Ordering::Relaxed)
            + self.dead_links_found.load(Ordering::Relaxed)
            + self.dead_domains_found.load(Ordering::Relaxed)
    }

    /// Fraction of processed URLs that completed without an error.
    pub fn success_rate(&self) -> f64 {
        let processed = self.urls_processed.load(Ordering::Relaxed);
        if processed == 0 {
            return 100.0;
        }
        let errors = self.errors.load(Ordering::Relaxed).min(processed);
        (processed - errors) as f64 / processed as f64 * 100.0
    }

    /// Rate over the window since the previous call, clamped to a
    /// minimum elapsed of one second; shorter gaps return the last
    /// computed value.
    fn urls_per_second(&self) -> f64 {
        let current = self.urls_processed.load(Ordering::Relaxed);
        let mut window = self.window.lock();

        let elapsed = window.last_check.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return window.last_rate;
        }

        let rate = current.saturating_sub(window.last_count) as f64 / elapsed;
        window.last_check = Instant::now();
        window.last_count = current;
        window.last_rate = rate;
        rate
    }

    fn memory_breakdown(&self) -> MemoryBreakdown {
        let mut breakdown = MemoryBreakdown::default();

        if let Some(trackers) = &*self.trackers.lock() {
            breakdown.bloom_filter_mb = trackers.bloom.memory_usage_mb();
            breakdown.database_mb = trackers.storage.memory_usage_mb();
            breakdown.queue_mb = trackers.frontier.memory_usage_mb();
        }

        let workers = self.active_workers.load(Ordering::Relaxed) as f64;
        breakdown.http_buffers_mb = workers * 2.0;
        breakdown.parsing_mb = workers * 0.5;
        breakdown.crawlers_mb = workers * 1.0;

        let accounted = breakdown.bloom_filter_mb
            + breakdown.database_mb
            + breakdown.queue_mb
            + breakdown.http_buffers_mb
            + breakdown.parsing_mb
            + breakdown.crawlers_mb;

        breakdown.total_mb = process_memory_mb().unwrap_or(accounted);
        // Estimates can overshoot the real total; never report negative
        breakdown.other_mb = (breakdown.total_mb - accounted).max(0.0);

        breakdown
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Resident set size from procfs, when the platform has one.
fn process_memory_mb() -> Option<f64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: f64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = 4096.0;
    Some(resident_pages * page_size / 1024.0 / 1024.0)
}

/// Refresh the gauges every tick until cancelled.
pub fn spawn_metrics_ticker(
    metrics: Arc<MetricsCollector>,
    frontier: Arc<PriorityFrontier>,
    storage: Arc<Storage>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(Config::METRICS_TICK_SECS));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    metrics.set_urls_in_queue(frontier.size() as u64);
                    metrics.set_urls_in_db(storage.count_backlog());
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = MetricsCollector::new();

        metrics.add_urls_processed(1);
        metrics.add_urls_processed(1);
        metrics.add_emails_found(3);
        metrics.add_errors(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.urls_processed, 2);
        assert_eq!(snapshot.emails_found, 3);
        assert_eq!(snapshot.errors, 1);
    }

    #[test]
    fn test_worker_gauge() {
        let metrics = MetricsCollector::new();

        metrics.worker_started();
        metrics.worker_started();
        assert_eq!(metrics.active_workers(), 2);

        metrics.worker_stopped();
        assert_eq!(metrics.active_workers(), 1);
    }

    #[test]
    fn test_rate_clamps_short_windows() {
        let metrics = MetricsCollector::new();
        metrics.add_urls_processed(100);

        // Immediately after start the window is under a second, so the
        // last computed value (zero) comes back
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.urls_per_second, 0.0);
    }

    #[test]
    fn test_success_rate() {
        let metrics = MetricsCollector::new();
        assert_eq!(metrics.success_rate(), 100.0);

        metrics.add_urls_processed(4);
        metrics.add_errors(1);
        assert_eq!(metrics.success_rate(), 75.0);
    }

    #[test]
    fn test_total_finds() {
        let metrics = MetricsCollector::new();
        metrics.add_emails_found(2);
        metrics.add_keywords_found(5);
        metrics.add_dead_links_found(1);
        assert_eq!(metrics.total_finds(), 8);
    }

    #[test]
    fn test_memory_breakdown_other_never_negative() {
        let metrics = MetricsCollector::new();
        for _ in 0..500 {
            metrics.worker_started();
        }

        let breakdown = metrics.snapshot().memory_breakdown;
        assert!(breakdown.other_mb >= 0.0);
        assert_eq!(breakdown.http_buffers_mb, 1000.0);
        assert_eq!(breakdown.crawlers_mb, 500.0);
    }
}
