use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Running counters for one crawl
///
/// Counters are only informational; nothing in the pipeline branches on
/// them. They are reset together with the signals at the start of a crawl.
#[derive(Debug, Default)]
pub struct CrawlStats {
    /// Pages fetched successfully by the parser
    pub pages_fetched: AtomicU64,
    /// Pages abandoned after exhausting their retry budget
    pub pages_abandoned: AtomicU64,
    /// Tasks pushed to the downloader
    pub tasks_emitted: AtomicU64,
    /// Locators pushed back onto the parser's own queue
    pub locators_requeued: AtomicU64,
    /// Locators dropped because the parser's own queue stayed full
    pub locators_dropped: AtomicU64,
    /// Files written to storage
    pub files_written: AtomicU64,
    /// Tasks skipped because storage already had the file
    pub files_skipped: AtomicU64,
    /// Tasks abandoned by the downloader
    pub downloads_failed: AtomicU64,
}

/// Plain copy of [`CrawlStats`] at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub pages_fetched: u64,
    pub pages_abandoned: u64,
    pub tasks_emitted: u64,
    pub locators_requeued: u64,
    pub locators_dropped: u64,
    pub files_written: u64,
    pub files_skipped: u64,
    pub downloads_failed: u64,
}

impl CrawlStats {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        for counter in [
            &self.pages_fetched,
            &self.pages_abandoned,
            &self.tasks_emitted,
            &self.locators_requeued,
            &self.locators_dropped,
            &self.files_written,
            &self.files_skipped,
            &self.downloads_failed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            pages_abandoned: self.pages_abandoned.load(Ordering::Relaxed),
            tasks_emitted: self.tasks_emitted.load(Ordering::Relaxed),
            locators_requeued: self.locators_requeued.load(Ordering::Relaxed),
            locators_dropped: self.locators_dropped.load(Ordering::Relaxed),
            files_written: self.files_written.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
        }
    }
}
