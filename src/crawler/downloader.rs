//! Downloader stage
//!
//! The tail of the pipeline: downloader workers pop [`Task`]s, fetch the
//! file and persist it through a [`Storage`] backend under a sequential
//! numeric name. The downloader is also the stage that raises
//! `reach_max_num` once enough files have been kept.

use crate::crawler::extract::Task;
use crate::crawler::fetcher::{FetchError, Response, Transport};
use crate::pool::{PopError, Stage, Worker};
use crate::state::{CrawlStats, Signal, Signals};
use crate::storage::Storage;
use crate::url::file_extension;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// First numeric file index of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawOffset")]
pub enum FileIdxOffset {
    /// Start right after this index
    Fixed(usize),
    /// Start after the largest index already in storage
    Auto,
}

impl Default for FileIdxOffset {
    fn default() -> Self {
        Self::Fixed(0)
    }
}

impl fmt::Display for FileIdxOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{}", n),
            Self::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawOffset {
    Index(usize),
    Keyword(String),
}

impl TryFrom<RawOffset> for FileIdxOffset {
    type Error = String;

    fn try_from(raw: RawOffset) -> Result<Self, Self::Error> {
        match raw {
            RawOffset::Index(n) => Ok(Self::Fixed(n)),
            RawOffset::Keyword(word) if word == "auto" => Ok(Self::Auto),
            RawOffset::Keyword(word) => Err(format!(
                "file-idx-offset must be a number or \"auto\", got '{}'",
                word
            )),
        }
    }
}

/// Per-run downloader settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloaderOptions {
    /// Files to keep before raising `reach_max_num`, 0 for no limit
    pub max_num: usize,
    /// Extension used when the file URL has none
    pub default_ext: String,
    pub queue_timeout: Duration,
    pub req_timeout: Duration,
    pub max_retry: u32,
    /// Download even when storage already holds the target name
    pub overwrite: bool,
    pub file_idx_offset: FileIdxOffset,
    /// Bodies smaller than this are discarded
    pub min_size: Option<u64>,
    /// Bodies larger than this are discarded
    pub max_size: Option<u64>,
}

impl Default for DownloaderOptions {
    fn default() -> Self {
        Self {
            max_num: 0,
            default_ext: "jpg".to_string(),
            queue_timeout: Duration::from_secs(5),
            req_timeout: Duration::from_secs(5),
            max_retry: 3,
            overwrite: false,
            file_idx_offset: FileIdxOffset::Fixed(0),
            min_size: None,
            max_size: None,
        }
    }
}

/// Outcome of one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub task: Task,
    pub success: bool,
    pub filename: Option<String>,
}

impl DownloadRecord {
    fn failed(task: &Task) -> Self {
        Self {
            task: task.clone(),
            success: false,
            filename: None,
        }
    }

    fn stored(task: &Task, filename: String) -> Self {
        Self {
            task: task.clone(),
            success: true,
            filename: Some(filename),
        }
    }
}

#[derive(Debug, Default)]
struct Counter {
    fetched_num: usize,
    file_idx_offset: usize,
}

impl Counter {
    fn filename(&self, ext: &str) -> String {
        format!("{:06}.{}", self.fetched_num + self.file_idx_offset, ext)
    }

    fn reached(&self, max_num: usize) -> bool {
        max_num > 0 && self.fetched_num >= max_num
    }
}

/// Fetches tasks and writes them to storage
pub struct Downloader {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn Transport>,
    stats: Arc<CrawlStats>,
    counter: Mutex<Counter>,
}

impl Downloader {
    pub fn new(storage: Arc<dyn Storage>, transport: Arc<dyn Transport>) -> Self {
        Self {
            storage,
            transport,
            stats: CrawlStats::shared(),
            counter: Mutex::new(Counter::default()),
        }
    }

    pub fn with_stats(mut self, stats: Arc<CrawlStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.stats
    }

    /// Number of files kept (or skipped as existing) since the last start
    pub fn fetched_num(&self) -> usize {
        self.counter.lock().map(|c| c.fetched_num).unwrap_or(0)
    }

    /// Resets the counter and resolves the file index offset
    pub fn reset(&self, options: &DownloaderOptions) {
        let offset = match options.file_idx_offset {
            FileIdxOffset::Fixed(n) => n,
            FileIdxOffset::Auto => match self.storage.max_file_idx() {
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(
                        "Cannot read max file index from {}, starting at 0: {}",
                        self.storage.describe(),
                        e
                    );
                    0
                }
            },
        };

        match self.counter.lock() {
            Ok(mut counter) => {
                counter.fetched_num = 0;
                counter.file_idx_offset = offset;
            }
            Err(e) => tracing::error!("Downloader counter lock poisoned: {}", e),
        }
        tracing::debug!("file index offset is {}", offset);
    }

    fn extension(task: &Task, options: &DownloaderOptions) -> String {
        file_extension(&task.file_url).unwrap_or_else(|| options.default_ext.clone())
    }

    fn keep_file(&self, response: &Response, options: &DownloaderOptions) -> bool {
        let size = response.body.len() as u64;
        if options.min_size.is_some_and(|min| size < min) {
            tracing::info!("{} is smaller than min-size, skipped", response.url);
            return false;
        }
        if options.max_size.is_some_and(|max| size > max) {
            tracing::info!("{} is larger than max-size, skipped", response.url);
            return false;
        }
        true
    }

    /// Returns the next file name when storage already holds it
    ///
    /// A skipped file still counts toward `fetched_num`, so the next task
    /// moves on to the following index.
    fn skip_existing(&self, ext: &str) -> Option<String> {
        let mut counter = self.counter.lock().ok()?;
        counter.fetched_num += 1;
        let filename = counter.filename(ext);
        match self.storage.exists(&filename) {
            Ok(true) => Some(filename),
            Ok(false) => {
                counter.fetched_num -= 1;
                None
            }
            Err(e) => {
                tracing::warn!("Cannot check {} in storage: {}", filename, e);
                counter.fetched_num -= 1;
                None
            }
        }
    }

    /// Reserves the next file name, or `None` once the quota is reached
    fn reserve(&self, ext: &str, options: &DownloaderOptions, signals: &Signals) -> Option<String> {
        let mut counter = match self.counter.lock() {
            Ok(counter) => counter,
            Err(e) => {
                tracing::error!("Downloader counter lock poisoned: {}", e);
                return None;
            }
        };
        if signals.quota_reached() || counter.reached(options.max_num) {
            signals.set(Signal::ReachMaxNum, true);
            return None;
        }
        counter.fetched_num += 1;
        if counter.reached(options.max_num) {
            signals.set(Signal::ReachMaxNum, true);
        }
        Some(counter.filename(ext))
    }

    /// Downloads one task and writes it to storage
    pub fn download(
        &self,
        task: &Task,
        options: &DownloaderOptions,
        signals: &Signals,
    ) -> DownloadRecord {
        let ext = Self::extension(task, options);

        if !options.overwrite {
            if let Some(filename) = self.skip_existing(&ext) {
                tracing::info!("skip downloading file {}", filename);
                CrawlStats::incr(&self.stats.files_skipped);
                return DownloadRecord::failed(task);
            }
        }

        let headers = HeaderMap::new();
        for attempt in 1..=options.max_retry {
            if signals.quota_reached() {
                return DownloadRecord::failed(task);
            }
            let remaining = options.max_retry - attempt;

            let fetched = panic::catch_unwind(AssertUnwindSafe(|| {
                self.transport.fetch(&task.file_url, options.req_timeout, &headers)
            }));
            let response = match fetched.unwrap_or_else(|_| {
                Err(FetchError::Panicked {
                    url: task.file_url.clone(),
                })
            }) {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(
                        "Exception caught when downloading file {}, error: {}, remaining retry times: {}",
                        task.file_url,
                        e,
                        remaining
                    );
                    continue;
                }
            };

            if !response.is_success() {
                let error = FetchError::Status {
                    url: task.file_url.clone(),
                    status: response.status,
                };
                tracing::error!("{}", error);
                break;
            }
            if !self.keep_file(&response, options) {
                break;
            }

            let Some(filename) = self.reserve(&ext, options, signals) else {
                tracing::debug!("quota reached, {} not written", task.file_url);
                return DownloadRecord::failed(task);
            };

            let written = panic::catch_unwind(AssertUnwindSafe(|| {
                self.storage.write(&filename, &response.body)
            }));
            return match written {
                Ok(Ok(())) => {
                    CrawlStats::incr(&self.stats.files_written);
                    tracing::info!("image {}\t{}", filename, task.file_url);
                    DownloadRecord::stored(task, filename)
                }
                Ok(Err(e)) => {
                    tracing::error!("Failed to write {}: {}", filename, e);
                    CrawlStats::incr(&self.stats.downloads_failed);
                    DownloadRecord::failed(task)
                }
                Err(_) => {
                    tracing::error!("Storage panicked while writing {}", filename);
                    CrawlStats::incr(&self.stats.downloads_failed);
                    DownloadRecord::failed(task)
                }
            };
        }

        CrawlStats::incr(&self.stats.downloads_failed);
        DownloadRecord::failed(task)
    }

    fn process_meta(&self, record: &DownloadRecord) {
        tracing::debug!(
            "task {} success={} filename={:?}",
            record.task.file_url,
            record.success,
            record.filename
        );
    }
}

impl Stage for Downloader {
    type Input = Task;
    type Output = ();
    type Options = DownloaderOptions;

    fn on_start(&self, options: &DownloaderOptions) {
        self.reset(options);
    }

    fn work(&self, worker: &Worker<Task, ()>, options: &DownloaderOptions) {
        loop {
            if worker.signals().quota_reached() {
                tracing::info!(
                    "downloaded images reach max num, thread {} is ready to exit",
                    worker.name()
                );
                break;
            }

            match worker.pop(options.queue_timeout) {
                Ok(task) => {
                    let record = self.download(&task, options, worker.signals());
                    self.process_meta(&record);
                    worker.task_done();
                }
                Err(PopError::Timeout) => {
                    if worker.signals().get(Signal::ParserExited) {
                        tracing::info!("no more download task for thread {}", worker.name());
                        break;
                    }
                    tracing::info!("{} is waiting for new download tasks", worker.name());
                }
                Err(e) => {
                    tracing::error!("exception in thread {}: {}", worker.name(), e);
                    thread::sleep(options.queue_timeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WorkerPool;
    use crate::storage::SqliteStorage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Serves scripted bodies; unknown URLs get a 404
    #[derive(Default)]
    struct FakeTransport {
        files: HashMap<String, Vec<u8>>,
        errors_before_success: AtomicUsize,
        panics_before_success: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeTransport {
        fn with_file(mut self, url: &str, body: &[u8]) -> Self {
            self.files.insert(url.to_string(), body.to_vec());
            self
        }

        fn erroring(self, times: usize) -> Self {
            self.errors_before_success.store(times, Ordering::SeqCst);
            self
        }

        fn panicking(self, times: usize) -> Self {
            self.panics_before_success.store(times, Ordering::SeqCst);
            self
        }
    }

    impl Transport for FakeTransport {
        fn fetch(
            &self,
            locator: &str,
            _timeout: Duration,
            _headers: &HeaderMap,
        ) -> Result<Response, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let panics = self.panics_before_success.load(Ordering::SeqCst);
            if panics > 0 {
                self.panics_before_success.store(panics - 1, Ordering::SeqCst);
                panic!("connection pool corrupted");
            }
            let pending = self.errors_before_success.load(Ordering::SeqCst);
            if pending > 0 {
                self.errors_before_success.store(pending - 1, Ordering::SeqCst);
                return Err(FetchError::Timeout {
                    url: locator.to_string(),
                });
            }
            Ok(match self.files.get(locator) {
                Some(body) => Response::new(locator, 200, body.clone()),
                None => Response::new(locator, 404, Vec::new()),
            })
        }
    }

    fn setup(transport: FakeTransport) -> (Downloader, Arc<SqliteStorage>) {
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        let downloader = Downloader::new(storage.clone(), Arc::new(transport));
        (downloader, storage)
    }

    fn fast_options() -> DownloaderOptions {
        DownloaderOptions {
            queue_timeout: Duration::from_millis(50),
            req_timeout: Duration::from_millis(50),
            ..DownloaderOptions::default()
        }
    }

    #[test]
    fn test_sequential_filenames_with_url_extension() {
        let transport = FakeTransport::default()
            .with_file("https://example.com/a.png", b"png")
            .with_file("https://example.com/b", b"noext");
        let (downloader, storage) = setup(transport);
        let signals = Signals::new();
        let options = fast_options();
        downloader.reset(&options);

        let first = downloader.download(&Task::new("https://example.com/a.png"), &options, &signals);
        let second = downloader.download(&Task::new("https://example.com/b"), &options, &signals);

        assert_eq!(first.filename.as_deref(), Some("000001.png"));
        assert_eq!(second.filename.as_deref(), Some("000002.jpg"));
        assert_eq!(storage.read("000002.jpg").unwrap(), Some(b"noext".to_vec()));
        assert_eq!(downloader.fetched_num(), 2);
    }

    #[test]
    fn test_quota_sets_signal_and_stops_writing() {
        let mut transport = FakeTransport::default();
        for i in 0..4 {
            transport = transport.with_file(&format!("https://example.com/{}.jpg", i), b"x");
        }
        let (downloader, storage) = setup(transport);
        let signals = Signals::new();
        let options = DownloaderOptions {
            max_num: 2,
            ..fast_options()
        };
        downloader.reset(&options);

        let records: Vec<DownloadRecord> = (0..4)
            .map(|i| {
                downloader.download(
                    &Task::new(format!("https://example.com/{}.jpg", i)),
                    &options,
                    &signals,
                )
            })
            .collect();

        assert!(records[0].success && records[1].success);
        assert!(!records[2].success && !records[3].success);
        assert!(signals.quota_reached());
        assert_eq!(storage.count().unwrap(), 2);
    }

    #[test]
    fn test_existing_file_is_skipped_and_counted() {
        let transport = FakeTransport::default().with_file("https://example.com/a.jpg", b"new");
        let (downloader, storage) = setup(transport);
        storage.write("000001.jpg", b"old").unwrap();
        let signals = Signals::new();
        let options = fast_options();
        downloader.reset(&options);

        let skipped = downloader.download(&Task::new("https://example.com/a.jpg"), &options, &signals);
        assert!(!skipped.success);
        assert_eq!(storage.read("000001.jpg").unwrap(), Some(b"old".to_vec()));

        let written = downloader.download(&Task::new("https://example.com/a.jpg"), &options, &signals);
        assert_eq!(written.filename.as_deref(), Some("000002.jpg"));
    }

    #[test]
    fn test_overwrite_replaces_existing_file() {
        let transport = FakeTransport::default().with_file("https://example.com/a.jpg", b"new");
        let (downloader, storage) = setup(transport);
        storage.write("000001.jpg", b"old").unwrap();
        let signals = Signals::new();
        let options = DownloaderOptions {
            overwrite: true,
            ..fast_options()
        };
        downloader.reset(&options);

        let record = downloader.download(&Task::new("https://example.com/a.jpg"), &options, &signals);
        assert_eq!(record.filename.as_deref(), Some("000001.jpg"));
        assert_eq!(storage.read("000001.jpg").unwrap(), Some(b"new".to_vec()));
    }

    #[test]
    fn test_auto_offset_continues_after_stored_files() {
        let transport = FakeTransport::default().with_file("https://example.com/a.gif", b"gif");
        let (downloader, storage) = setup(transport);
        storage.write("000007.jpg", b"old").unwrap();
        let signals = Signals::new();
        let options = DownloaderOptions {
            file_idx_offset: FileIdxOffset::Auto,
            ..fast_options()
        };
        downloader.reset(&options);

        let record = downloader.download(&Task::new("https://example.com/a.gif"), &options, &signals);
        assert_eq!(record.filename.as_deref(), Some("000008.gif"));
    }

    #[test]
    fn test_size_limits() {
        let transport = FakeTransport::default()
            .with_file("https://example.com/tiny.jpg", b"1")
            .with_file("https://example.com/huge.jpg", &[0u8; 64])
            .with_file("https://example.com/fine.jpg", &[0u8; 16]);
        let (downloader, storage) = setup(transport);
        let signals = Signals::new();
        let options = DownloaderOptions {
            min_size: Some(8),
            max_size: Some(32),
            ..fast_options()
        };
        downloader.reset(&options);

        for name in ["tiny", "huge", "fine"] {
            downloader.download(
                &Task::new(format!("https://example.com/{}.jpg", name)),
                &options,
                &signals,
            );
        }
        assert_eq!(storage.count().unwrap(), 1);
        assert!(storage.exists("000001.jpg").unwrap());
    }

    #[test]
    fn test_error_status_is_abandoned_without_retry() {
        let transport = Arc::new(FakeTransport::default());
        let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
        let downloader = Downloader::new(storage, transport.clone());
        let options = fast_options();
        downloader.reset(&options);

        let record = downloader.download(&Task::new("https://example.com/gone.jpg"), &options, &Signals::new());
        assert!(!record.success);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(downloader.stats().snapshot().downloads_failed, 1);
    }

    #[test]
    fn test_transport_errors_are_retried() {
        let transport = FakeTransport::default()
            .with_file("https://example.com/a.jpg", b"ok")
            .erroring(2);
        let (downloader, _) = setup(transport);
        let options = fast_options();
        downloader.reset(&options);

        let record = downloader.download(&Task::new("https://example.com/a.jpg"), &options, &Signals::new());
        assert!(record.success);

        let failing = FakeTransport::default()
            .with_file("https://example.com/a.jpg", b"ok")
            .erroring(3);
        let (downloader, _) = setup(failing);
        downloader.reset(&options);
        let record = downloader.download(&Task::new("https://example.com/a.jpg"), &options, &Signals::new());
        assert!(!record.success);
    }

    #[test]
    fn test_transport_panic_counts_as_failed_attempt() {
        let transport = FakeTransport::default()
            .with_file("https://example.com/a.jpg", b"ok")
            .panicking(1);
        let (downloader, storage) = setup(transport);
        let options = fast_options();
        downloader.reset(&options);

        let record = downloader.download(&Task::new("https://example.com/a.jpg"), &options, &Signals::new());
        assert!(record.success);
        assert_eq!(storage.read("000001.jpg").unwrap(), Some(b"ok".to_vec()));
    }

    /// Storage whose writes always panic
    struct ExplodingStorage;

    impl Storage for ExplodingStorage {
        fn write(&self, id: &str, _data: &[u8]) -> crate::storage::StorageResult<()> {
            panic!("disk vanished while writing {}", id);
        }

        fn read(&self, _id: &str) -> crate::storage::StorageResult<Option<Vec<u8>>> {
            Ok(None)
        }

        fn exists(&self, _id: &str) -> crate::storage::StorageResult<bool> {
            Ok(false)
        }

        fn max_file_idx(&self) -> crate::storage::StorageResult<usize> {
            Ok(0)
        }

        fn count(&self) -> crate::storage::StorageResult<u64> {
            Ok(0)
        }

        fn describe(&self) -> String {
            "exploding storage".to_string()
        }
    }

    #[test]
    fn test_storage_panic_keeps_worker_running() {
        let mut transport = FakeTransport::default();
        for i in 0..2 {
            transport = transport.with_file(&format!("https://example.com/{}.jpg", i), b"x");
        }
        let downloader = Downloader::new(Arc::new(ExplodingStorage), Arc::new(transport));
        let signals = Signals::shared();
        let mut pool = WorkerPool::new("downloader", 1, downloader, signals.clone());

        for i in 0..2 {
            pool.input(Task::new(format!("https://example.com/{}.jpg", i)), Duration::ZERO)
                .unwrap();
        }
        signals.set(Signal::ParserExited, true);
        pool.start(fast_options()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while pool.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.reap();

        // both tasks were processed by the single worker
        assert_eq!(pool.in_queue().unfinished(), 0);
        assert_eq!(pool.stage().stats().snapshot().downloads_failed, 2);
    }

    #[test]
    fn test_pool_drains_until_parser_exits() {
        let mut transport = FakeTransport::default();
        for i in 0..5 {
            transport = transport.with_file(&format!("https://example.com/{}.jpg", i), b"x");
        }
        let (downloader, storage) = setup(transport);
        let signals = Signals::shared();
        let mut pool = WorkerPool::new("downloader", 2, downloader, signals.clone());

        for i in 0..5 {
            pool.input(Task::new(format!("https://example.com/{}.jpg", i)), Duration::ZERO)
                .unwrap();
        }
        signals.set(Signal::ParserExited, true);
        pool.start(fast_options()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while pool.is_alive() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        pool.reap();

        assert_eq!(storage.count().unwrap(), 5);
        assert_eq!(pool.in_queue().unfinished(), 0);
    }

    #[test]
    fn test_file_idx_offset_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            offset: FileIdxOffset,
        }

        let fixed: Wrapper = toml::from_str("offset = 12").unwrap();
        assert_eq!(fixed.offset, FileIdxOffset::Fixed(12));

        let auto: Wrapper = toml::from_str("offset = \"auto\"").unwrap();
        assert_eq!(auto.offset, FileIdxOffset::Auto);

        assert!(toml::from_str::<Wrapper>("offset = \"later\"").is_err());
        assert_eq!(FileIdxOffset::Auto.to_string(), "auto");
    }
}
