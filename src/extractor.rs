//! Transformations from an HTML body to findings: emails, keyword
//! counts, outlinks, title. Dead-link checking is sampled and handed
//! off to the async pipeline so page processing never waits on HEAD
//! probes.

use rand::seq::SliceRandom;
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::deadlink::DeadLinkPipeline;
use crate::url_utils;

pub struct ContentExtractor {
    email_regex: Regex,
    sample_rate: f64,
    dead_links: Option<Arc<DeadLinkPipeline>>,
}

impl ContentExtractor {
    pub fn new(sample_rate: f64, dead_links: Option<Arc<DeadLinkPipeline>>) -> Self {
        Self {
            email_regex: Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}")
                .expect("email regex is valid"),
            sample_rate,
            dead_links,
        }
    }

    /// Unique lowercased emails in order of first appearance.
    pub fn extract_emails(&self, content: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut emails = Vec::new();

        for m in self.email_regex.find_iter(content) {
            let email = m.as_str().to_lowercase();
            if seen.insert(email.clone()) {
                emails.push(email);
            }
        }

        emails
    }

    /// Case-insensitive substring counts; only keywords that occur at
    /// least once appear in the map.
    pub fn extract_keywords(&self, content: &str, keywords: &[String]) -> HashMap<String, u64> {
        let content_lower = content.to_lowercase();
        let mut counts = HashMap::new();

        for keyword in keywords {
            let keyword_lower = keyword.to_lowercase();
            if keyword_lower.is_empty() {
                continue;
            }

            let count = content_lower.matches(&keyword_lower).count() as u64;
            if count > 0 {
                counts.insert(keyword.clone(), count);
            }
        }

        counts
    }

    /// Absolute http(s) links from `a[href]` and any `[src]` attribute,
    /// resolved against the base URL and deduplicated within the page.
    pub fn extract_links(&self, content: &str, base_url: &str) -> Vec<String> {
        let document = Html::parse_document(content);
        let a_selector = Selector::parse("a[href]").expect("valid selector");
        let src_selector = Selector::parse("[src]").expect("valid selector");

        let mut seen = HashSet::new();
        let mut links = Vec::new();

        let mut collect = |raw: &str| {
            if let Some(absolute) = url_utils::resolve_url(raw, base_url) {
                if url_utils::is_valid_url(&absolute) && seen.insert(absolute.clone()) {
                    links.push(absolute);
                }
            }
        };

        for element in document.select(&a_selector) {
            if let Some(href) = element.value().attr("href") {
                collect(href);
            }
        }

        for element in document.select(&src_selector) {
            if let Some(src) = element.value().attr("src") {
                collect(src);
            }
        }

        links
    }

    /// Text of the first `<title>`, trimmed. Empty string when absent.
    pub fn extract_title(&self, content: &str) -> String {
        let document = Html::parse_document(content);
        let selector = Selector::parse("title").expect("valid selector");

        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }

    /// Sample outlinks into the dead-link pipeline and return
    /// immediately. Findings surface later as auxiliary result records
    /// written by the pipeline workers.
    pub fn check_dead_links(
        &self,
        links: &[String],
        source_url: &str,
    ) -> (Vec<String>, Vec<String>) {
        if let Some(pipeline) = &self.dead_links {
            for link in self.sample_links(links) {
                pipeline.enqueue(link, source_url.to_string());
            }
        }

        (Vec::new(), Vec::new())
    }

    /// Random subset of the configured fraction, at least one when any
    /// links exist.
    fn sample_links(&self, links: &[String]) -> Vec<String> {
        if links.is_empty() {
            return Vec::new();
        }
        if self.sample_rate >= 1.0 {
            return links.to_vec();
        }

        let count = ((links.len() as f64 * self.sample_rate) as usize).max(1);
        let mut shuffled: Vec<String> = links.to_vec();
        shuffled.shuffle(&mut rand::thread_rng());
        shuffled.truncate(count);
        shuffled
    }
}
