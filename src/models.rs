use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the crawler hunts for. Derived from the CLI flags: exactly one
/// flag selects that mode, several at once select [`CrawlMode::All`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    Email,
    Keywords,
    Domains,
    All,
}

impl CrawlMode {
    /// Directory suffix for the findings database (`finds` for `all`,
    /// `finds_<mode>` otherwise).
    pub fn finds_dir_name(&self) -> String {
        match self {
            CrawlMode::All => "finds".to_string(),
            other => format!("finds_{}", other),
        }
    }
}

impl std::fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CrawlMode::Email => "email",
            CrawlMode::Keywords => "keywords",
            CrawlMode::Domains => "domains",
            CrawlMode::All => "all",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for CrawlMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(CrawlMode::Email),
            "keywords" => Ok(CrawlMode::Keywords),
            "domains" => Ok(CrawlMode::Domains),
            "all" => Ok(CrawlMode::All),
            other => Err(format!("unknown crawl mode: {}", other)),
        }
    }
}

/// A unit of crawl work. Immutable once enqueued; consumed by exactly
/// one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlTask {
    /// Absolute http(s) URL
    pub url: String,

    /// Distance from the seed (seed itself is depth 0)
    pub depth: u32,

    /// Unix seconds at creation; part of the frontier priority
    pub timestamp: u64,

    /// Retry count, reserved for future re-admission logic
    pub retries: u32,
}

impl UrlTask {
    pub fn new(url: String, depth: u32) -> Self {
        Self {
            url,
            depth,
            timestamp: now_unix(),
            retries: 0,
        }
    }

    /// Frontier priority: lower is better. Shallower pages beat deeper
    /// ones; among equals, earlier admission wins.
    pub fn priority(&self) -> i64 {
        self.depth as i64 * 1000 + self.timestamp as i64
    }
}

/// Outcome of processing one URL. Append-only once written; the same
/// URL may accumulate several records (dead-link workers write
/// auxiliary records keyed by a later timestamp).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,

    /// HTTP status, 0 when the request never completed
    #[serde(default)]
    pub status_code: u16,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub emails: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub keywords: HashMap<String, u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dead_links: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dead_domains: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub new_urls: Vec<String>,

    /// Unix seconds when processing started
    pub processed_at: u64,

    /// Wall-clock processing duration in milliseconds
    #[serde(default)]
    pub process_time_ms: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CrawlResult {
    pub fn new(url: String) -> Self {
        Self {
            url,
            processed_at: now_unix(),
            ..Default::default()
        }
    }

    /// True when this record carries at least one finding.
    pub fn has_findings(&self) -> bool {
        !self.emails.is_empty()
            || !self.keywords.is_empty()
            || !self.dead_links.is_empty()
            || !self.dead_domains.is_empty()
    }
}

/// Point-in-time metrics snapshot served by the dashboard. Counters are
/// monotonically non-decreasing; gauges move both ways.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlMetrics {
    pub urls_processed: u64,
    pub urls_in_queue: u64,
    pub urls_in_db: u64,
    pub emails_found: u64,
    pub keywords_found: u64,
    pub dead_links_found: u64,
    pub dead_domains_found: u64,
    pub links_checked: u64,
    pub errors: u64,
    pub active_workers: u64,
    pub memory_usage_mb: f64,
    pub urls_per_second: f64,
    pub start_time: u64,
    pub last_update_time: u64,
    #[serde(default)]
    pub memory_breakdown: MemoryBreakdown,
}

/// Per-component memory estimate backing the dashboard gauge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryBreakdown {
    pub bloom_filter_mb: f64,
    pub database_mb: f64,
    pub queue_mb: f64,
    pub http_buffers_mb: f64,
    pub parsing_mb: f64,
    pub crawlers_mb: f64,
    pub other_mb: f64,
    pub total_mb: f64,
}

/// Current unix time in whole seconds.
pub fn now_unix() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("email".parse::<CrawlMode>().unwrap(), CrawlMode::Email);
        assert_eq!("all".parse::<CrawlMode>().unwrap(), CrawlMode::All);
        assert!("bogus".parse::<CrawlMode>().is_err());
    }

    #[test]
    fn test_finds_dir_name() {
        assert_eq!(CrawlMode::All.finds_dir_name(), "finds");
        assert_eq!(CrawlMode::Email.finds_dir_name(), "finds_email");
        assert_eq!(CrawlMode::Domains.finds_dir_name(), "finds_domains");
    }

    #[test]
    fn test_task_priority_prefers_shallow() {
        let shallow = UrlTask {
            url: "https://a.local/".to_string(),
            depth: 0,
            timestamp: 1_000_000,
            retries: 0,
        };
        let deep = UrlTask {
            url: "https://b.local/".to_string(),
            depth: 3,
            timestamp: 1_000_000,
            retries: 0,
        };
        assert!(shallow.priority() < deep.priority());
    }

    #[test]
    fn test_result_json_field_names() {
        let mut result = CrawlResult::new("https://test.local/".to_string());
        result.status_code = 200;
        result.emails.push("a@x.io".to_string());

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["url"], "https://test.local/");
        assert_eq!(json["status_code"], 200);
        assert_eq!(json["emails"][0], "a@x.io");
        // Empty collections are omitted entirely
        assert!(json.get("dead_links").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_result_roundtrip_with_error() {
        let mut result = CrawlResult::new("https://test.local/".to_string());
        result.error = Some("blocked by robots.txt".to_string());

        let json = serde_json::to_string(&result).unwrap();
        let parsed: CrawlResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.error.as_deref(), Some("blocked by robots.txt"));
        assert_eq!(parsed.status_code, 0);
    }
}
