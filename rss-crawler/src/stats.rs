use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Final statistics of one crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlStats {
    pub sources: usize,
    pub source_errors: usize,
    pub feed_items: usize,
    pub inserted: usize,
    pub duplicated: usize,
    pub persist_errors: usize,
    pub summarize_errors: usize,
    pub enhance_errors: usize,
}

impl CrawlStats {
    /// Items that entered the pipeline but never reached a terminal bucket.
    /// Zero for every run that was not cancelled.
    pub fn unaccounted(&self) -> usize {
        self.feed_items
            .saturating_sub(self.inserted + self.duplicated + self.persist_errors)
    }

    pub fn to_json(&self) -> crate::types::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for CrawlStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sources={} source_errors={} feed_items={} inserted={} duplicated={} persist_errors={} summarize_errors={} enhance_errors={}",
            self.sources,
            self.source_errors,
            self.feed_items,
            self.inserted,
            self.duplicated,
            self.persist_errors,
            self.summarize_errors,
            self.enhance_errors,
        )
    }
}

/// Run-scoped counters shared by every pipeline worker through an `Arc`.
#[derive(Debug, Default)]
pub struct RunAggregator {
    sources: AtomicUsize,
    source_errors: AtomicUsize,
    feed_items: AtomicUsize,
    inserted: AtomicUsize,
    duplicated: AtomicUsize,
    persist_errors: AtomicUsize,
    summarize_errors: AtomicUsize,
    enhance_errors: AtomicUsize,
}

impl RunAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sources(&self, n: usize) {
        self.sources.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_source_error(&self) {
        self.source_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_feed_items(&self, n: usize) {
        self.feed_items.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_inserted(&self) {
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_error(&self) {
        self.persist_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_summarize_error(&self) {
        self.summarize_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enhance_error(&self) {
        self.enhance_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CrawlStats {
        CrawlStats {
            sources: self.sources.load(Ordering::Relaxed),
            source_errors: self.source_errors.load(Ordering::Relaxed),
            feed_items: self.feed_items.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
            duplicated: self.duplicated.load(Ordering::Relaxed),
            persist_errors: self.persist_errors.load(Ordering::Relaxed),
            summarize_errors: self.summarize_errors.load(Ordering::Relaxed),
            enhance_errors: self.enhance_errors.load(Ordering::Relaxed),
        }
    }
}
