//! Parser stage
//!
//! Each parser worker pops a page locator, fetches it with a bounded
//! number of attempts, hands the response to the [`Extractor`] and routes
//! every emitted item: tasks go to the downloader, locators come back onto
//! the parser's own queue. A locator that finds that queue still full
//! after one `backoff` is dropped.
//!
//! A worker exits when the download quota is reached, or when its input
//! queue stays empty for one `queue_timeout` after the feeders exited.

use crate::crawler::extract::{Emitted, Extractor, Locator, Task};
use crate::crawler::fetcher::{referer_headers, FetchError, Response, Transport};
use crate::pool::{Emission, PopError, Stage, Worker};
use crate::state::{CrawlStats, Signal, Signals};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use toml::Table;

/// Per-run parser settings
#[derive(Debug, Clone, PartialEq)]
pub struct ParserOptions {
    /// How long to wait for a locator before checking the feeder state
    pub queue_timeout: Duration,
    /// Timeout of each page request
    pub req_timeout: Duration,
    /// Fetch attempts per locator
    pub max_retry: u32,
    /// Sleep between two attempts to push onto a full queue
    pub backoff: Duration,
    /// Forwarded verbatim to the extractor
    pub extra: Table,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            queue_timeout: Duration::from_secs(2),
            req_timeout: Duration::from_secs(5),
            max_retry: 3,
            backoff: Duration::from_secs(1),
            extra: Table::new(),
        }
    }
}

fn quota_reached(signals: &Signals) -> bool {
    signals.quota_reached()
}

/// Fetches pages and routes what the extractor finds in them
pub struct Parser<E: Extractor> {
    extractor: E,
    transport: Arc<dyn Transport>,
    stats: Arc<CrawlStats>,
}

impl<E: Extractor> Parser<E> {
    pub fn new(extractor: E, transport: Arc<dyn Transport>) -> Self {
        Self {
            extractor,
            transport,
            stats: CrawlStats::shared(),
        }
    }

    /// Reports into shared counters instead of private ones
    pub fn with_stats(mut self, stats: Arc<CrawlStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn stats(&self) -> &Arc<CrawlStats> {
        &self.stats
    }

    /// Fetches a page, returning `None` once every attempt has failed
    ///
    /// Any non-2xx response counts as a failed attempt, and so does a
    /// panicking transport.
    fn fetch_page(&self, locator: &str, options: &ParserOptions) -> Option<Response> {
        let headers = referer_headers(locator);

        for attempt in 1..=options.max_retry {
            let remaining = options.max_retry - attempt;
            let fetched = panic::catch_unwind(AssertUnwindSafe(|| {
                self.transport.fetch(locator, options.req_timeout, &headers)
            }));
            let error = match fetched {
                Ok(Ok(response)) if response.is_success() => return Some(response),
                Ok(Ok(response)) => FetchError::Status {
                    url: locator.to_string(),
                    status: response.status,
                },
                Ok(Err(e)) => e,
                Err(_) => FetchError::Panicked {
                    url: locator.to_string(),
                },
            };
            tracing::error!(
                "Exception caught when fetching page {}, error: {}, remaining retry times: {}",
                locator,
                error,
                remaining
            );
        }

        None
    }

    /// Routes extracted items until the sequence ends or the quota is hit
    fn route(&self, worker: &Worker<Locator, Task>, response: &Response, options: &ParserOptions) {
        let parsed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.extractor.parse(response, &options.extra)
        }));
        let mut items = match parsed {
            Ok(items) => items,
            Err(_) => {
                tracing::error!("Extractor panicked on page {}", response.url);
                return;
            }
        };

        loop {
            if worker.signals().quota_reached() {
                tracing::debug!(
                    "{}: quota reached, abandoning the rest of {}",
                    worker.name(),
                    response.url
                );
                return;
            }

            let item = match panic::catch_unwind(AssertUnwindSafe(|| items.next())) {
                Ok(Some(item)) => item,
                Ok(None) => return,
                Err(_) => {
                    tracing::error!("Extractor panicked on page {}", response.url);
                    return;
                }
            };

            let emission = match item {
                Emitted::Task(task) => {
                    let emission = worker.emit_output(task, options.backoff, quota_reached);
                    if emission == Emission::Delivered {
                        CrawlStats::incr(&self.stats.tasks_emitted);
                    }
                    emission
                }
                Emitted::Locator(locator) => {
                    let emission = worker.emit_input(locator, options.backoff, quota_reached);
                    match emission {
                        Emission::Delivered => CrawlStats::incr(&self.stats.locators_requeued),
                        Emission::Dropped => CrawlStats::incr(&self.stats.locators_dropped),
                        Emission::Stopped => {}
                    }
                    emission
                }
            };

            if emission == Emission::Stopped {
                return;
            }
        }
    }
}

impl<E: Extractor> Stage for Parser<E> {
    type Input = Locator;
    type Output = Task;
    type Options = ParserOptions;

    fn on_start(&self, _options: &ParserOptions) {
        self.extractor.reset();
    }

    fn work(&self, worker: &Worker<Locator, Task>, options: &ParserOptions) {
        loop {
            if worker.signals().quota_reached() {
                tracing::info!(
                    "downloaded image reached max num, thread {} is ready to exit",
                    worker.name()
                );
                break;
            }

            let locator = match worker.pop(options.queue_timeout) {
                Ok(locator) => locator,
                Err(PopError::Timeout) => {
                    if worker.signals().get(Signal::FeederExited) {
                        tracing::info!("no more page urls for thread {} to parse", worker.name());
                        break;
                    }
                    tracing::info!("{} is waiting for new page urls", worker.name());
                    continue;
                }
                Err(e) => {
                    tracing::error!("exception in thread {}: {}", worker.name(), e);
                    thread::sleep(options.backoff);
                    continue;
                }
            };
            tracing::debug!("start fetching page {}", locator);

            match self.fetch_page(&locator, options) {
                Some(response) => {
                    CrawlStats::incr(&self.stats.pages_fetched);
                    tracing::info!("parsing result page {}", locator);
                    self.route(worker, &response, options);
                }
                None => {
                    CrawlStats::incr(&self.stats.pages_abandoned);
                    tracing::warn!("giving up on page {}", locator);
                }
            }

            worker.task_done();
        }
    }
}
