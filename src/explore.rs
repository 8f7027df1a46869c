//! Offline inspection of crawl databases.
//!
//! Opens the same store the engine writes and prints a requested view.
//! Run it only while the engine is stopped; sled holds an exclusive
//! lock on the data directory.

use std::collections::HashMap;

use crate::cli::ExploreView;
use crate::models::CrawlMode;
use crate::storage::{Storage, StorageError};

pub struct Explorer {
    storage: Storage,
}

impl Explorer {
    pub fn open(data_dir: &str, mode: CrawlMode) -> Result<Self, StorageError> {
        if !std::path::Path::new(data_dir).exists() {
            return Err(StorageError::Open(sled::Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("data directory not found: {}", data_dir),
            ))));
        }

        let storage = Storage::open(data_dir, mode, 64)?;
        Ok(Self { storage })
    }

    pub fn run(
        &self,
        view: ExploreView,
        limit: usize,
        term: Option<&str>,
        output: &str,
    ) -> Result<(), StorageError> {
        match view {
            ExploreView::Stats => self.show_stats(),
            ExploreView::Urls => self.list_urls(limit),
            ExploreView::Results => self.list_results(limit),
            ExploreView::Emails => self.show_emails(limit),
            ExploreView::DeadLinks => self.show_dead_links(limit),
            ExploreView::Search => self.search_results(term.unwrap_or_default(), limit),
            ExploreView::Export => self.export_results(output),
        }
    }

    fn show_stats(&self) -> Result<(), StorageError> {
        let metrics = self.storage.snapshot_metrics();

        println!("Database statistics");
        println!("-------------------");
        println!("Backlog URLs:       {}", self.storage.count_backlog());
        println!("Result records:     {}", self.storage.count_results());
        println!("URLs processed:     {}", metrics.urls_processed);
        println!("Emails found:       {}", metrics.emails_found);
        println!("Keywords found:     {}", metrics.keywords_found);
        println!("Dead links found:   {}", metrics.dead_links_found);
        println!("Dead domains found: {}", metrics.dead_domains_found);
        println!("Errors:             {}", metrics.errors);

        Ok(())
    }

    fn list_urls(&self, limit: usize) -> Result<(), StorageError> {
        // Peek without consuming: re-store everything fetch_urls removed
        let tasks = self.storage.fetch_urls(limit)?;
        for task in &tasks {
            self.storage.store_url(task)?;
        }

        println!("Backlog ({} shown)", tasks.len());
        for task in &tasks {
            println!("  depth={} retries={} {}", task.depth, task.retries, task.url);
        }

        Ok(())
    }

    fn list_results(&self, limit: usize) -> Result<(), StorageError> {
        let results = self.storage.read_results(CrawlMode::All, limit)?;

        println!("Results ({} shown)", results.len());
        for result in &results {
            let status = match &result.error {
                Some(e) => format!("error: {}", e),
                None => format!("status {}", result.status_code),
            };
            println!("  {} [{}] {}", result.url, status, result.title);
        }

        Ok(())
    }

    fn show_emails(&self, limit: usize) -> Result<(), StorageError> {
        let results = self.storage.read_results(CrawlMode::Email, limit)?;

        let mut by_source: HashMap<&str, Vec<&str>> = HashMap::new();
        for result in &results {
            for email in &result.emails {
                by_source.entry(&result.url).or_default().push(email);
            }
        }

        println!("Emails from {} pages", by_source.len());
        for (source, emails) in by_source {
            println!("  {}", source);
            for email in emails {
                println!("    {}", email);
            }
        }

        Ok(())
    }

    fn search_results(&self, term: &str, limit: usize) -> Result<(), StorageError> {
        if term.is_empty() {
            println!("Nothing to search for; pass --term <substring>");
            return Ok(());
        }

        let needle = term.to_lowercase();
        let results = self.storage.read_results(CrawlMode::All, usize::MAX)?;

        let mut shown = 0;
        for result in &results {
            if shown >= limit {
                break;
            }

            let haystack = format!(
                "{} {} {} {}",
                result.url,
                result.title,
                result.emails.join(" "),
                result.keywords.keys().cloned().collect::<Vec<_>>().join(" ")
            )
            .to_lowercase();

            if haystack.contains(&needle) {
                println!("  {} [{}] {}", result.url, result.status_code, result.title);
                shown += 1;
            }
        }

        println!("{} matching results for \"{}\"", shown, term);
        Ok(())
    }

    /// Write every result record as one JSON object per line.
    fn export_results(&self, output: &str) -> Result<(), StorageError> {
        use std::io::Write;

        let results = self.storage.read_results(CrawlMode::All, usize::MAX)?;

        let file = std::fs::File::create(output)
            .map_err(|e| StorageError::Open(sled::Error::Io(e)))?;
        let mut writer = std::io::BufWriter::new(file);

        for result in &results {
            let line = serde_json::to_string(result)?;
            writer
                .write_all(line.as_bytes())
                .and_then(|_| writer.write_all(b"\n"))
                .map_err(|e| StorageError::Open(sled::Error::Io(e)))?;
        }
        writer
            .flush()
            .map_err(|e| StorageError::Open(sled::Error::Io(e)))?;

        println!("Exported {} results to {}", results.len(), output);
        Ok(())
    }

    fn show_dead_links(&self, limit: usize) -> Result<(), StorageError> {
        let results = self.storage.read_results(CrawlMode::Domains, limit)?;

        println!("Dead-link findings ({} records)", results.len());
        for result in &results {
            for dead in &result.dead_links {
                println!("  dead link   {} (from {})", dead, result.url);
            }
            for domain in &result.dead_domains {
                println!("  dead domain {} (from {})", domain, result.url);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CrawlResult;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_dir_fails() {
        let result = Explorer::open("/definitely/not/a/path", CrawlMode::All);
        assert!(result.is_err());
    }

    #[test]
    fn test_views_run_against_populated_store() {
        let dir = TempDir::new().unwrap();

        {
            let storage = Storage::open(dir.path(), CrawlMode::All, 64).unwrap();
            let mut result = CrawlResult::new("https://t.local/".to_string());
            result.emails.push("a@x.io".to_string());
            result.dead_links.push("https://gone.invalid/".to_string());
            storage.store_result(&result).unwrap();
            storage
                .store_url(&crate::models::UrlTask::new("https://t.local/next".to_string(), 1))
                .unwrap();
            storage.close().unwrap();
        }

        let explorer = Explorer::open(dir.path().to_str().unwrap(), CrawlMode::All).unwrap();
        let export_path = dir.path().join("export.jsonl");
        let export = export_path.to_str().unwrap();

        for view in [
            ExploreView::Stats,
            ExploreView::Urls,
            ExploreView::Results,
            ExploreView::Emails,
            ExploreView::DeadLinks,
            ExploreView::Search,
            ExploreView::Export,
        ] {
            explorer.run(view, 10, Some("t.local"), export).unwrap();
        }

        // The urls view must not consume the backlog
        assert_eq!(explorer.storage.count_backlog(), 1);

        // The export view wrote one line per result
        let exported = std::fs::read_to_string(&export_path).unwrap();
        assert_eq!(exported.lines().count(), 1);
        let parsed: CrawlResult = serde_json::from_str(exported.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.emails, vec!["a@x.io"]);
    }
}
