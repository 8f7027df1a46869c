//! Per-host robots.txt cache and compliance queries.
//!
//! Fetches `/robots.txt` over HTTPS with an HTTP fallback. Anything
//! other than a 200 body (transport error, 404, 5xx) is cached as a
//! permissive entry so an unreachable host is not probed again on every
//! URL. Path matching delegates to the `robotstxt` matcher; crawl-delay
//! and sitemap directives are parsed out of the raw body.

use dashmap::DashMap;
use robotstxt::DefaultMatcher;
use std::time::Duration;

use crate::config::Config;
use crate::models::now_unix;
use crate::url_utils;

/// One cached robots.txt. `body: None` means the fetch failed or
/// returned non-200 and the host is treated as fully permitted.
struct RobotsEntry {
    body: Option<String>,
    #[allow(dead_code)]
    fetched_at: u64,
}

pub struct RobotsPolicy {
    cache: DashMap<String, RobotsEntry>,
    client: reqwest::Client,
}

impl RobotsPolicy {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(Config::USER_AGENT)
            .timeout(Duration::from_secs(Config::ROBOTS_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            cache: DashMap::new(),
            client,
        })
    }

    /// Whether `url` may be fetched as `user_agent`. Returns true when
    /// the URL has no resolvable host rules: no cache entry obtainable,
    /// permissive entry, or no matching group.
    pub async fn can_fetch(&self, user_agent: &str, url: &str) -> bool {
        let Some(host) = url_utils::get_domain(url) else {
            return false;
        };

        self.ensure_cached(&host).await;

        match self.cache.get(&host) {
            Some(entry) => match &entry.body {
                Some(body) => {
                    let mut matcher = DefaultMatcher::default();
                    matcher.one_agent_allowed_by_robots(body, user_agent, url)
                }
                None => true,
            },
            None => true,
        }
    }

    /// Group-specific crawl delay; zero when unspecified. An explicit
    /// user-agent group wins over the `*` group.
    pub async fn crawl_delay(&self, user_agent: &str, host: &str) -> Duration {
        self.ensure_cached(host).await;

        let Some(entry) = self.cache.get(host) else {
            return Duration::ZERO;
        };
        let Some(body) = &entry.body else {
            return Duration::ZERO;
        };

        match parse_crawl_delay(body, user_agent) {
            Some(secs) => Duration::from_secs_f64(secs),
            None => Duration::ZERO,
        }
    }

    /// Sitemap URLs advertised by the host's robots.txt.
    pub async fn sitemaps(&self, host: &str) -> Vec<String> {
        self.ensure_cached(host).await;

        let Some(entry) = self.cache.get(host) else {
            return Vec::new();
        };
        let Some(body) = &entry.body else {
            return Vec::new();
        };

        body.lines()
            .filter_map(|line| {
                let value = strip_directive(line.trim(), "sitemap:")?;
                (!value.is_empty()).then(|| value.to_string())
            })
            .collect()
    }

    async fn ensure_cached(&self, host: &str) {
        if self.cache.contains_key(host) {
            return;
        }

        let body = self.fetch_robots(host).await;
        self.cache.insert(
            host.to_string(),
            RobotsEntry {
                body,
                fetched_at: now_unix(),
            },
        );
    }

    async fn fetch_robots(&self, host: &str) -> Option<String> {
        for scheme in ["https", "http"] {
            let robots_url = format!("{}://{}/robots.txt", scheme, host);
            match self.client.get(&robots_url).send().await {
                Ok(response) if response.status().as_u16() == 200 => {
                    return response.text().await.ok();
                }
                Ok(_) => return None, // Host answered; non-200 means permissive
                Err(e) => {
                    tracing::debug!("robots fetch failed for {}: {}", robots_url, e);
                }
            }
        }
        None
    }

    /// Seed the cache directly; used by tests and by callers that
    /// already hold a robots body.
    pub fn cache_robots(&self, host: &str, body: Option<String>) {
        self.cache.insert(
            host.to_string(),
            RobotsEntry {
                body,
                fetched_at: now_unix(),
            },
        );
    }

    pub fn cached_hosts(&self) -> usize {
        self.cache.len()
    }
}

/// Extract the crawl delay for a user agent, preferring its explicit
/// group over the wildcard group.
fn parse_crawl_delay(body: &str, user_agent: &str) -> Option<f64> {
    let mut in_exact = false;
    let mut in_wildcard = false;
    let mut exact_delay = None;
    let mut wildcard_delay = None;

    for line in body.lines() {
        let line = line.trim();

        if let Some(agent) = strip_directive(line, "user-agent:") {
            // A new group header resets membership; consecutive
            // user-agent lines extend the same group
            in_exact = !agent.is_empty()
                && (agent.eq_ignore_ascii_case(user_agent)
                    || user_agent
                        .to_ascii_lowercase()
                        .starts_with(&agent.to_ascii_lowercase()));
            in_wildcard = agent == "*";
        } else if let Some(value) = strip_directive(line, "crawl-delay:") {
            if let Ok(delay) = value.parse::<f64>() {
                if in_exact && exact_delay.is_none() {
                    exact_delay = Some(delay);
                }
                if in_wildcard && wildcard_delay.is_none() {
                    wildcard_delay = Some(delay);
                }
            }
        }
    }

    exact_delay.or(wildcard_delay)
}

fn strip_directive<'a>(line: &'a str, directive: &str) -> Option<&'a str> {
    let prefix = line.get(..directive.len())?;
    if prefix.eq_ignore_ascii_case(directive) {
        Some(line[directive.len()..].trim())
    } else {
        None
    }
}
