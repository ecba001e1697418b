use crate::crawler::{DownloaderOptions, FeedOptions, FileIdxOffset, ParserOptions};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Converts a seconds value, saturating instead of panicking on overflow
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}

/// Main configuration structure for Crawlpool
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    pub storage: StorageConfig,
    pub feeder: FeederConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    #[serde(default)]
    pub downloader: DownloaderConfig,
}

/// Orchestration and HTTP session settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Seconds between two liveness checks of the pools
    pub poll_interval: f64,

    /// User-Agent header; a desktop browser string when absent
    pub user_agent: Option<String>,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 1.0,
            user_agent: None,
            headers: BTreeMap::new(),
        }
    }
}

impl CrawlerConfig {
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval)
    }
}

/// Where downloaded files are written
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// One file per download under `root-dir`
    #[serde(rename = "filesystem")]
    FileSystem {
        #[serde(rename = "root-dir")]
        root_dir: PathBuf,
    },

    /// Blobs in a SQLite database at `path`
    Sqlite { path: PathBuf },
}

/// Seed locators for the feeder pool
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FeederConfig {
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Inline list of page URLs
    #[serde(default)]
    pub urls: Vec<String>,

    /// File with one page URL per line, appended to `urls`
    #[serde(default)]
    pub url_file: Option<PathBuf>,

    /// Page URL template with `{keyword}` and `{offset}` placeholders;
    /// when set, pages are generated instead of read from `urls`
    #[serde(default)]
    pub template: Option<String>,

    #[serde(default)]
    pub keyword: String,

    #[serde(default = "default_page_step")]
    pub page_step: usize,

    /// Index of the first seed to feed
    #[serde(default)]
    pub offset: usize,

    /// Number of seeds to feed, 0 for all of them
    #[serde(default)]
    pub max_num: usize,
}

impl FeederConfig {
    pub fn to_options(&self) -> FeedOptions {
        FeedOptions {
            offset: self.offset,
            max_num: self.max_num,
            ..FeedOptions::default()
        }
    }
}

/// Page fetching and extraction settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ParserConfig {
    pub threads: usize,

    /// Seconds to wait for a page URL before checking the feeder state
    pub queue_timeout: f64,

    /// Seconds allowed for each page request
    pub req_timeout: f64,

    /// Attempts per page before it is abandoned
    pub max_retry: u32,

    /// Seconds to sleep before retrying a push onto a full queue
    pub backoff: f64,

    /// Options forwarded verbatim to the extractor
    pub extra: toml::Table,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            queue_timeout: 2.0,
            req_timeout: 5.0,
            max_retry: 3,
            backoff: 1.0,
            extra: toml::Table::new(),
        }
    }
}

impl ParserConfig {
    pub fn to_options(&self) -> ParserOptions {
        ParserOptions {
            queue_timeout: seconds(self.queue_timeout),
            req_timeout: seconds(self.req_timeout),
            max_retry: self.max_retry,
            backoff: seconds(self.backoff),
            extra: self.extra.clone(),
        }
    }
}

/// File download settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DownloaderConfig {
    pub threads: usize,

    /// Files to persist before the crawl stops, 0 for no limit
    pub max_num: usize,

    /// Extension used when a file URL has none
    pub default_ext: String,

    pub queue_timeout: f64,
    pub req_timeout: f64,
    pub max_retry: u32,

    /// Re-download files whose name already exists in storage
    pub overwrite: bool,

    /// First file index, or `"auto"` to continue after the stored maximum
    pub file_idx_offset: FileIdxOffset,

    /// Smallest body size in bytes worth keeping
    pub min_size: Option<u64>,

    /// Largest body size in bytes worth keeping
    pub max_size: Option<u64>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            max_num: 0,
            default_ext: "jpg".to_string(),
            queue_timeout: 5.0,
            req_timeout: 5.0,
            max_retry: 3,
            overwrite: false,
            file_idx_offset: FileIdxOffset::Fixed(0),
            min_size: None,
            max_size: None,
        }
    }
}

impl DownloaderConfig {
    pub fn to_options(&self) -> DownloaderOptions {
        DownloaderOptions {
            max_num: self.max_num,
            default_ext: self.default_ext.clone(),
            queue_timeout: seconds(self.queue_timeout),
            req_timeout: seconds(self.req_timeout),
            max_retry: self.max_retry,
            overwrite: self.overwrite,
            file_idx_offset: self.file_idx_offset,
            min_size: self.min_size,
            max_size: self.max_size,
        }
    }
}

fn default_threads() -> usize {
    1
}

fn default_page_step() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_range_seconds_saturate() {
        let parser = ParserConfig {
            queue_timeout: 1e30,
            backoff: f64::NAN,
            ..ParserConfig::default()
        };
        let options = parser.to_options();
        assert_eq!(options.queue_timeout, Duration::MAX);
        assert_eq!(options.backoff, Duration::ZERO);
    }
}
