use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads and parses a configuration file from the given path
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Returns
///
/// * `Ok(Config)` - Successfully loaded and validated configuration
/// * `Err(ConfigError)` - Failed to load, parse, or validate the configuration
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use crawlpool::config::load_config;
///
/// let config = load_config(Path::new("crawl.toml")).unwrap();
/// println!("Parser threads: {}", config.parser.threads);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration from TOML text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a SHA-256 hash of the configuration file content
///
/// Logged at startup so that two crawl runs can be matched to the exact
/// configuration they used.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::crawler::FileIdxOffset;
    use std::io::Write;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_full_config() {
        let config_content = r#"
[crawler]
poll-interval = 0.5
user-agent = "crawlpool-test/0.1"
headers = { Accept-Language = "en-US" }

[storage]
backend = "filesystem"
root-dir = "downloads/cats"

[feeder]
threads = 2
urls = ["https://example.com/cats?page=1", "https://example.com/cats?page=2"]
offset = 1

[parser]
threads = 4
queue-timeout = 1.5
req-timeout = 10
max-retry = 5

[parser.extra]
domains = ["example.com", "*.examplecdn.com"]
follow-links = false

[downloader]
threads = 8
max-num = 100
default-ext = "png"
file-idx-offset = "auto"
min-size = 1024
"#;

        let file = create_temp_config(config_content);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.crawler.headers["Accept-Language"], "en-US");
        assert_eq!(
            config.storage,
            StorageConfig::FileSystem {
                root_dir: PathBuf::from("downloads/cats")
            }
        );
        assert_eq!(config.feeder.threads, 2);
        assert_eq!(config.feeder.urls.len(), 2);
        assert_eq!(config.feeder.to_options().offset, 1);

        let parser = config.parser.to_options();
        assert_eq!(parser.queue_timeout, Duration::from_millis(1500));
        assert_eq!(parser.max_retry, 5);
        assert_eq!(parser.extra["follow-links"].as_bool(), Some(false));

        let downloader = config.downloader.to_options();
        assert_eq!(downloader.max_num, 100);
        assert_eq!(downloader.default_ext, "png");
        assert_eq!(downloader.file_idx_offset, FileIdxOffset::Auto);
        assert_eq!(downloader.min_size, Some(1024));
    }

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(
            r#"
[storage]
backend = "sqlite"
path = "crawl.db"

[feeder]
urls = ["https://example.com/"]
"#,
        )
        .unwrap();

        assert_eq!(config.crawler.poll_interval, 1.0);
        assert_eq!(config.parser.threads, 1);
        assert_eq!(config.parser.max_retry, 3);
        assert_eq!(config.parser.queue_timeout, 2.0);
        assert_eq!(config.downloader.queue_timeout, 5.0);
        assert_eq!(config.downloader.file_idx_offset, FileIdxOffset::Fixed(0));
        assert!(config.parser.extra.is_empty());
    }

    #[test]
    fn test_numeric_file_idx_offset() {
        let config = parse_config(
            r#"
[storage]
backend = "filesystem"
root-dir = "images"

[feeder]
urls = ["https://example.com/"]

[downloader]
file-idx-offset = 250
"#,
        )
        .unwrap();
        assert_eq!(config.downloader.file_idx_offset, FileIdxOffset::Fixed(250));
    }

    #[test]
    fn test_unknown_file_idx_keyword_rejected() {
        let result = parse_config(
            r#"
[storage]
backend = "filesystem"
root-dir = "images"

[feeder]
urls = ["https://example.com/"]

[downloader]
file-idx-offset = "sometimes"
"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result = parse_config(
            r#"
[storage]
backend = "s3"
bucket = "pictures"

[feeder]
urls = ["https://example.com/"]
"#,
        );
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/crawl.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let file = create_temp_config(
            r#"
[storage]
backend = "filesystem"
root-dir = "images"

[feeder]
urls = ["https://example.com/"]

[parser]
threads = 0
"#,
        );
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
