use crate::config::types::{
    Config, CrawlerConfig, DownloaderConfig, FeederConfig, ParserConfig, StorageConfig,
};
use crate::ConfigError;
use url::Url;

/// Upper bound on the worker count of any single pool
const MAX_THREADS: usize = 256;

/// Upper bound on any interval or timeout, one day
const MAX_SECONDS: f64 = 86_400.0;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_storage_config(&config.storage)?;
    validate_feeder_config(&config.feeder)?;
    validate_parser_config(&config.parser)?;
    validate_downloader_config(&config.downloader)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_seconds("crawler.poll-interval", config.poll_interval)?;

    if let Some(user_agent) = &config.user_agent {
        if user_agent.trim().is_empty() {
            return Err(ConfigError::Validation(
                "crawler.user-agent cannot be empty".to_string(),
            ));
        }
    }

    for name in config.headers.keys() {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ConfigError::Validation(format!(
                "invalid header name '{}'",
                name
            )));
        }
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    let path = match config {
        StorageConfig::FileSystem { root_dir } => root_dir,
        StorageConfig::Sqlite { path } => path,
    };

    if path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "storage location cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_feeder_config(config: &FeederConfig) -> Result<(), ConfigError> {
    validate_threads("feeder", config.threads)?;

    match &config.template {
        Some(template) => {
            if !template.contains("{offset}") {
                return Err(ConfigError::Validation(format!(
                    "feeder.template must contain an {{offset}} placeholder, got '{}'",
                    template
                )));
            }
            if config.max_num == 0 {
                return Err(ConfigError::Validation(
                    "feeder.max-num must be >= 1 when a template is used".to_string(),
                ));
            }
            if config.page_step == 0 {
                return Err(ConfigError::Validation(
                    "feeder.page-step must be >= 1".to_string(),
                ));
            }
        }
        None => {
            if config.urls.is_empty() && config.url_file.is_none() {
                return Err(ConfigError::Validation(
                    "feeder needs at least one of urls, url-file or template".to_string(),
                ));
            }
        }
    }

    for seed in &config.urls {
        validate_http_url(seed)?;
    }

    Ok(())
}

fn validate_parser_config(config: &ParserConfig) -> Result<(), ConfigError> {
    validate_threads("parser", config.threads)?;
    validate_seconds("parser.queue-timeout", config.queue_timeout)?;
    validate_seconds("parser.req-timeout", config.req_timeout)?;
    validate_seconds("parser.backoff", config.backoff)?;
    validate_retry("parser", config.max_retry)?;
    Ok(())
}

fn validate_downloader_config(config: &DownloaderConfig) -> Result<(), ConfigError> {
    validate_threads("downloader", config.threads)?;
    validate_seconds("downloader.queue-timeout", config.queue_timeout)?;
    validate_seconds("downloader.req-timeout", config.req_timeout)?;
    validate_retry("downloader", config.max_retry)?;

    if !config
        .default_ext
        .chars()
        .all(|c| c.is_ascii_alphanumeric())
    {
        return Err(ConfigError::Validation(format!(
            "downloader.default-ext must be alphanumeric, got '{}'",
            config.default_ext
        )));
    }

    if let (Some(min), Some(max)) = (config.min_size, config.max_size) {
        if min > max {
            return Err(ConfigError::Validation(format!(
                "downloader.min-size ({}) exceeds max-size ({})",
                min, max
            )));
        }
    }

    Ok(())
}

fn validate_threads(stage: &str, threads: usize) -> Result<(), ConfigError> {
    if threads < 1 || threads > MAX_THREADS {
        return Err(ConfigError::Validation(format!(
            "{}.threads must be between 1 and {}, got {}",
            stage, MAX_THREADS, threads
        )));
    }
    Ok(())
}

fn validate_seconds(key: &str, value: f64) -> Result<(), ConfigError> {
    if !value.is_finite() || value <= 0.0 || value > MAX_SECONDS {
        return Err(ConfigError::Validation(format!(
            "{} must be between 0 and {} seconds, got {}",
            key, MAX_SECONDS, value
        )));
    }
    Ok(())
}

fn validate_retry(stage: &str, max_retry: u32) -> Result<(), ConfigError> {
    if max_retry < 1 {
        return Err(ConfigError::Validation(format!(
            "{}.max-retry must be >= 1",
            stage
        )));
    }
    Ok(())
}

/// Validates that a seed is an absolute HTTP(S) URL
pub fn validate_http_url(seed: &str) -> Result<(), ConfigError> {
    let url = Url::parse(seed)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid seed URL '{}': {}", seed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "Seed URL '{}' must use HTTP or HTTPS",
            seed
        )));
    }

    Ok(())
}
