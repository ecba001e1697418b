//! Integration tests for the crawler
//!
//! These tests use wiremock to serve pages and images and run the full
//! feeder → parser → downloader pipeline against it. The crawler is
//! blocking, so the mock server lives on its own tokio runtime and the
//! crawl runs on the plain test thread.

use crawlpool::config::{parse_config, Config};
use crawlpool::crawler::{build_crawler, run_crawl};
use crawlpool::storage::{SqliteStorage, Storage};
use crawlpool::Signal;
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn start_server(rt: &Runtime) -> MockServer {
    rt.block_on(MockServer::start())
}

fn mount_html(rt: &Runtime, server: &MockServer, route: &str, body: String) {
    rt.block_on(
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(body),
            )
            .mount(server),
    );
}

fn mount_image(rt: &Runtime, server: &MockServer, route: &str, bytes: Vec<u8>) {
    rt.block_on(
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(bytes),
            )
            .mount(server),
    );
}

fn gallery(images: &[&str], links: &[&str]) -> String {
    let mut html = String::from("<html><body>");
    for src in images {
        html.push_str(&format!("<img src=\"{}\">", src));
    }
    for href in links {
        html.push_str(&format!("<a href=\"{}\">more</a>", href));
    }
    html.push_str("</body></html>");
    html
}

/// Builds a fast-polling configuration for the given seeds and storage
fn test_config(seeds: &[String], storage: &str, extra: &str) -> Config {
    let urls = seeds
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");

    let content = format!(
        r#"
[crawler]
poll-interval = 0.05

[storage]
{storage}

[feeder]
urls = [{urls}]

[parser]
queue-timeout = 0.2
req-timeout = 2.0
backoff = 0.05

[parser.extra]
follow-links = false

[downloader]
queue-timeout = 0.2
req-timeout = 2.0
{extra}
"#
    );

    parse_config(&content).expect("test config should be valid")
}

fn filesystem(dir: &Path) -> String {
    format!("backend = \"filesystem\"\nroot-dir = '{}'", dir.display())
}

fn sqlite(db: &Path) -> String {
    format!("backend = \"sqlite\"\npath = '{}'", db.display())
}

#[test]
fn test_three_images_persisted_to_filesystem() {
    let rt = Runtime::new().unwrap();
    let server = start_server(&rt);
    let base = server.uri();

    mount_html(
        &rt,
        &server,
        "/gallery",
        gallery(&["/img/1.jpg", "/img/2.jpg", "/img/3.jpg"], &[]),
    );
    for i in 1..=3u8 {
        mount_image(&rt, &server, &format!("/img/{}.jpg", i), vec![i; 64]);
    }

    let dir = TempDir::new().unwrap();
    let config = test_config(&[format!("{}/gallery", base)], &filesystem(dir.path()), "");

    let started = Instant::now();
    run_crawl(&config).unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    for i in 1..=3u8 {
        let file = dir.path().join(format!("{:06}.jpg", i));
        let bytes = std::fs::read(&file).unwrap();
        assert_eq!(bytes, vec![i; 64], "unexpected content in {}", file.display());
    }
}

#[test]
fn test_followed_links_persisted_to_sqlite() {
    let rt = Runtime::new().unwrap();
    let server = start_server(&rt);
    let base = server.uri();

    mount_html(&rt, &server, "/a", gallery(&["/img/a.jpg"], &["/b"]));
    mount_html(&rt, &server, "/b", gallery(&["/img/b.png"], &["/a"]));
    mount_image(&rt, &server, "/img/a.jpg", b"jpeg".to_vec());
    mount_image(&rt, &server, "/img/b.png", b"png".to_vec());

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("files.db");
    let mut config = test_config(&[format!("{}/a", base)], &sqlite(&db), "");
    config
        .parser
        .extra
        .insert("follow-links".to_string(), toml::Value::Boolean(true));

    let mut crawler = build_crawler(&config).unwrap();
    crawler
        .crawl(
            config.feeder.to_options(),
            config.parser.to_options(),
            config.downloader.to_options(),
        )
        .unwrap();

    let stats = crawler.stats().snapshot();
    assert_eq!(stats.pages_fetched, 2);
    assert_eq!(stats.locators_requeued, 1);
    drop(crawler);

    let storage = SqliteStorage::new(&db).unwrap();
    assert_eq!(storage.count().unwrap(), 2);
    assert_eq!(storage.read("000001.jpg").unwrap(), Some(b"jpeg".to_vec()));
    assert_eq!(storage.read("000002.png").unwrap(), Some(b"png".to_vec()));
}

#[test]
fn test_max_num_caps_downloads() {
    let rt = Runtime::new().unwrap();
    let server = start_server(&rt);
    let base = server.uri();

    let images: Vec<String> = (0..6).map(|i| format!("/img/{}.jpg", i)).collect();
    let refs: Vec<&str> = images.iter().map(String::as_str).collect();
    mount_html(&rt, &server, "/gallery", gallery(&refs, &[]));
    for image in &images {
        mount_image(&rt, &server, image, b"x".to_vec());
    }

    let dir = TempDir::new().unwrap();
    let db = dir.path().join("files.db");
    let config = test_config(
        &[format!("{}/gallery", base)],
        &sqlite(&db),
        "max-num = 2\nthreads = 2",
    );

    let mut crawler = build_crawler(&config).unwrap();
    crawler
        .crawl(
            config.feeder.to_options(),
            config.parser.to_options(),
            config.downloader.to_options(),
        )
        .unwrap();
    assert!(crawler.signals().get(Signal::ReachMaxNum));
    drop(crawler);

    let storage = SqliteStorage::new(&db).unwrap();
    assert_eq!(storage.count().unwrap(), 2);
}

#[test]
fn test_page_served_after_transient_errors() {
    let rt = Runtime::new().unwrap();
    let server = start_server(&rt);
    let base = server.uri();

    // two 500s, then the real page
    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server),
    );
    mount_html(&rt, &server, "/flaky", gallery(&["/img/ok.gif"], &[]));
    mount_image(&rt, &server, "/img/ok.gif", b"gif".to_vec());

    let dir = TempDir::new().unwrap();
    let config = test_config(&[format!("{}/flaky", base)], &filesystem(dir.path()), "");
    run_crawl(&config).unwrap();

    assert_eq!(std::fs::read(dir.path().join("000001.gif")).unwrap(), b"gif");
}

#[test]
fn test_unreachable_page_is_abandoned() {
    let rt = Runtime::new().unwrap();
    let server = start_server(&rt);
    let base = server.uri();

    rt.block_on(
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server),
    );

    let dir = TempDir::new().unwrap();
    let config = test_config(&[format!("{}/down", base)], &filesystem(dir.path()), "");

    let mut crawler = build_crawler(&config).unwrap();
    crawler
        .crawl(
            config.feeder.to_options(),
            config.parser.to_options(),
            config.downloader.to_options(),
        )
        .unwrap();

    let stats = crawler.stats().snapshot();
    assert_eq!(stats.pages_abandoned, 1);
    assert_eq!(stats.files_written, 0);
    rt.block_on(server.verify());
}
