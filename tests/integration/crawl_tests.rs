//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run complete
//! crawls end-to-end, from the start URL to the written archive.

use chrono::DateTime;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sumi_scroll::archive::ArchiveReader;
use sumi_scroll::config::{CrawlConfig, OutputConfig, ServiceConfig};
use sumi_scroll::crawler::{Coordinator, RunOutcome};
use sumi_scroll::logging::LogBuffer;
use sumi_scroll::storage::{open_storage, PageQuery, RunStatus, SqliteStorage, Storage};
use sumi_scroll::{Controller, FetchOutcome, ResourceKind, RunState, ScrollError};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn service(dir: &TempDir) -> ServiceConfig {
    ServiceConfig {
        output: OutputConfig {
            data_dir: dir.path().join("data").to_string_lossy().into_owned(),
            archive_dir: dir.path().join("archives").to_string_lossy().into_owned(),
        },
        ..ServiceConfig::default()
    }
}

fn crawl_config(start: &str) -> CrawlConfig {
    let mut config = CrawlConfig::new(start);
    config.request_delay = 0.0;
    config
}

async fn run(config: CrawlConfig, dir: &TempDir) -> (RunOutcome, Arc<Mutex<SqliteStorage>>) {
    run_with(config, service(dir)).await
}

async fn run_with(
    config: CrawlConfig,
    service: ServiceConfig,
) -> (RunOutcome, Arc<Mutex<SqliteStorage>>) {
    let index = Arc::new(Mutex::new(
        open_storage(&service.output.database_path()).expect("Failed to open index"),
    ));
    let coordinator =
        Coordinator::new(config, &service, Arc::clone(&index)).expect("Failed to start run");
    (coordinator.run().await, index)
}

async fn mount_html(server: &MockServer, at: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html"))
        .mount(server)
        .await;
}

fn page(title: &str, links: &[String]) -> String {
    let anchors: String = links
        .iter()
        .map(|l| format!("<a href=\"{}\">{}</a>\n", l, l))
        .collect();
    format!(
        "<html><head><title>{}</title></head><body>\n{}</body></html>",
        title, anchors
    )
}

#[tokio::test]
async fn test_five_page_scenario() {
    let home = MockServer::start().await;
    let other = MockServer::start().await;
    let other_root = format!("{}/", other.uri());

    // No robots.txt mocks: both servers answer 404, which allows everything
    mount_html(
        &home,
        "/",
        page(
            "Home",
            &[
                "/a".to_string(),
                "/b".to_string(),
                "/c".to_string(),
                other_root.clone(),
            ],
        ),
    )
    .await;
    for p in ["/a", "/b", "/c"] {
        mount_html(&home, p, page(p, &["/deeper".to_string()])).await;
    }
    mount_html(&other, "/", page("Other", &["/more".to_string()])).await;

    let dir = TempDir::new().unwrap();
    let mut config = crawl_config(&format!("{}/", home.uri()));
    config.max_depth = 1;
    config.max_pages = 5;
    config.max_pages_per_domain = 5;
    config.max_workers = 2;

    let (outcome, index) = run(config, &dir).await;
    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(outcome.error.is_none());

    let records = index.lock().unwrap().get_records(&outcome.run_id).unwrap();
    let pages: Vec<_> = records
        .iter()
        .filter(|r| r.kind == ResourceKind::Page)
        .collect();
    assert_eq!(pages.len(), 5);
    assert!(records.iter().all(|r| r.outcome == FetchOutcome::Ok));

    let cross = pages
        .iter()
        .find(|r| r.url == other_root)
        .expect("Cross-domain page missing");
    assert_eq!(cross.depth, 1);
    assert!(pages.iter().all(|r| r.depth <= 1));
    assert!(!records.iter().any(|r| r.url.ends_with("/deeper")));

    let mut urls: Vec<_> = records.iter().map(|r| r.url.as_str()).collect();
    urls.sort_unstable();
    urls.dedup();
    assert_eq!(urls.len(), records.len());

    assert_eq!(outcome.stats.total_domains, 2);
    assert_eq!(outcome.stats.pages_scraped, 5);
    assert_eq!(outcome.stats.pages_failed, 0);
}

#[tokio::test]
async fn test_page_budget_per_domain() {
    let server = MockServer::start().await;
    let links: Vec<String> = (1..=6).map(|i| format!("/p{}", i)).collect();
    mount_html(&server, "/", page("Home", &links)).await;
    for l in &links {
        mount_html(&server, l, page(l, &[])).await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = crawl_config(&format!("{}/", server.uri()));
    config.max_pages = 10;
    config.max_pages_per_domain = 3;

    let (outcome, index) = run(config, &dir).await;
    let pages = index
        .lock()
        .unwrap()
        .list_records(&outcome.run_id, &PageQuery::default().kind(ResourceKind::Page))
        .unwrap();
    assert_eq!(pages.total, 3);
}

#[tokio::test]
async fn test_robots_disallow_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"))
        .mount(&server)
        .await;
    mount_html(
        &server,
        "/",
        page("Home", &["/private".to_string(), "/public".to_string()]),
    )
    .await;
    mount_html(&server, "/public", page("Public", &[])).await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (outcome, index) = run(crawl_config(&format!("{}/", server.uri())), &dir).await;
    assert_eq!(outcome.status, RunStatus::Completed);

    let storage = index.lock().unwrap();
    let skipped = storage
        .list_records(&outcome.run_id, &PageQuery::default().outcome(FetchOutcome::Skipped))
        .unwrap();
    assert_eq!(skipped.total, 1);
    assert!(skipped.records[0].url.ends_with("/private"));
    assert!(skipped.records[0].content_hash.is_none());

    assert_eq!(outcome.stats.pages_skipped, 1);
    assert_eq!(outcome.stats.pages_scraped, 2);
    assert_eq!(outcome.stats.pages_failed, 0);
}

#[tokio::test]
async fn test_redirect_into_disallowed_path_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private"))
        .mount(&server)
        .await;
    mount_html(&server, "/", page("Home", &["/go".to_string()])).await;
    Mock::given(method("GET"))
        .and(path("/go"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/private"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("secret", "text/html"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (outcome, index) = run(crawl_config(&format!("{}/", server.uri())), &dir).await;
    assert_eq!(outcome.status, RunStatus::Completed);

    let records = index.lock().unwrap().get_records(&outcome.run_id).unwrap();
    let go = records
        .iter()
        .find(|r| r.url.ends_with("/go"))
        .expect("Redirecting page missing");
    assert_eq!(go.outcome, FetchOutcome::Skipped);
    assert!(go.content_hash.is_none());
    assert!(go
        .error_message
        .as_deref()
        .unwrap()
        .contains("disallowed by robots.txt"));
    assert!(!records.iter().any(|r| r.url.ends_with("/private")));
    assert_eq!(outcome.stats.pages_skipped, 1);
}

#[tokio::test]
async fn test_oversized_download_is_failed() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/",
        page("Home", &["/disk.iso".to_string(), "/notes".to_string()]),
    )
    .await;
    mount_html(&server, "/notes", page("Notes", &[])).await;
    Mock::given(method("GET"))
        .and(path("/disk.iso"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(vec![0u8; 64 * 1024], "application/octet-stream"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut service = service(&dir);
    service.fetch.max_body_bytes = 16 * 1024;
    let mut config = crawl_config(&format!("{}/", server.uri()));
    config.respect_robots_txt = false;

    let (outcome, index) = run_with(config, service).await;
    assert_eq!(outcome.status, RunStatus::Completed);

    let records = index.lock().unwrap().get_records(&outcome.run_id).unwrap();
    let iso = records.iter().find(|r| r.url.ends_with("/disk.iso")).unwrap();
    assert_eq!(iso.outcome, FetchOutcome::Failed);
    assert!(iso.content_hash.is_none());
    assert!(iso.error_message.as_deref().unwrap().contains("exceeds"));

    let notes = records.iter().find(|r| r.url.ends_with("/notes")).unwrap();
    assert_eq!(notes.outcome, FetchOutcome::Ok);
}

#[tokio::test]
async fn test_archive_round_trip() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/",
        "<html><head><title>Home</title><link rel=\"stylesheet\" href=\"/site.css\">\
         </head><body><a href=\"/about\">About</a></body></html>"
            .to_string(),
    )
    .await;
    mount_html(&server, "/about", page("About", &[])).await;
    Mock::given(method("GET"))
        .and(path("/site.css"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("/* site */\nbody {\n  color: black;\n}\n", "text/css"),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let (outcome, _) = run(crawl_config(&format!("{}/", server.uri())), &dir).await;
    let archive_path = outcome.archive_path().expect("No archive written");
    assert!(archive_path.ends_with(format!("{}.tar.zst", outcome.run_id)));

    let reader = ArchiveReader::open(archive_path).unwrap();
    let metadata = reader.metadata();
    assert_eq!(metadata.run_id, outcome.run_id);
    assert_eq!(metadata.records.len(), 3);
    assert_eq!(metadata.stats.pages_scraped, outcome.stats.pages_scraped);

    assert_eq!(reader.verify().unwrap(), metadata.artifact_hashes().len());
    assert!(reader.summary().unwrap().contains(&outcome.run_id));

    let extracted = TempDir::new().unwrap();
    reader.extract_to(extracted.path()).unwrap();
    assert!(extracted.path().join("metadata.json").is_file());
    for hash in metadata.artifact_hashes() {
        let object = extracted
            .path()
            .join("objects")
            .join(&hash[..2])
            .join(&hash[2..]);
        let bytes = std::fs::read(object).unwrap();
        assert_eq!(sumi_scroll::storage::ContentHash::of(&bytes).as_str(), hash);
    }

    let css = metadata
        .records
        .iter()
        .find(|r| r.kind == ResourceKind::Css)
        .unwrap();
    assert!(css.size < css.original_size);

    let index = reader.index().unwrap();
    let about = index
        .list_records(&outcome.run_id, &PageQuery::default().search("about"))
        .unwrap();
    assert_eq!(about.total, 1);
}

#[tokio::test]
async fn test_identical_content_stored_once() {
    let server = MockServer::start().await;
    mount_html(
        &server,
        "/",
        page("Home", &["/x".to_string(), "/y".to_string()]),
    )
    .await;
    let same = page("Mirror", &[]);
    mount_html(&server, "/x", same.clone()).await;
    mount_html(&server, "/y", same).await;

    let dir = TempDir::new().unwrap();
    let (outcome, _) = run(crawl_config(&format!("{}/", server.uri())), &dir).await;

    let reader = ArchiveReader::open(outcome.archive_path().unwrap()).unwrap();
    let metadata = reader.metadata();
    let x = metadata.record_for_url(&format!("{}/x", server.uri())).unwrap();
    let y = metadata.record_for_url(&format!("{}/y", server.uri())).unwrap();
    assert_eq!(x.content_hash, y.content_hash);

    let objects = reader
        .entries()
        .iter()
        .filter(|e| e.name.starts_with("objects/"))
        .count();
    assert_eq!(objects, 2);
    assert_eq!(metadata.artifact_hashes().len(), 2);
}

#[tokio::test]
async fn test_same_domain_requests_are_spaced() {
    let server = MockServer::start().await;
    let links: Vec<String> = (1..=3).map(|i| format!("/p{}", i)).collect();
    mount_html(&server, "/", page("Home", &links)).await;
    for l in &links {
        mount_html(&server, l, page(l, &[])).await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = crawl_config(&format!("{}/", server.uri()));
    config.request_delay = 0.3;
    config.max_workers = 4;
    config.respect_robots_txt = false;

    let (outcome, index) = run(config, &dir).await;
    let records = index.lock().unwrap().get_records(&outcome.run_id).unwrap();
    assert_eq!(records.len(), 4);

    let mut starts: Vec<_> = records
        .iter()
        .map(|r| DateTime::parse_from_rfc3339(&r.fetched_at).unwrap())
        .collect();
    starts.sort();
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap.num_milliseconds() >= 290,
            "requests only {}ms apart",
            gap.num_milliseconds()
        );
    }
}

#[tokio::test]
async fn test_stop_mid_run_keeps_completed_work() {
    let server = MockServer::start().await;
    let links: Vec<String> = (1..=20).map(|i| format!("/p{}", i)).collect();
    mount_html(&server, "/", page("Home", &links)).await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(page("Slow", &[]), "text/html")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = Controller::open(service(&dir), LogBuffer::default()).unwrap();
    let mut config = crawl_config(&format!("{}/", server.uri()));
    config.max_workers = 2;
    config.respect_robots_txt = false;

    controller.start(config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(controller.stop().await.unwrap());
    assert_eq!(controller.wait_idle().await.unwrap(), RunState::Stopped);

    let status = controller.status().await.unwrap();
    assert_eq!(status.state, RunState::Stopped);
    let stats = status.stats.expect("Stopped run has stats");
    assert!(stats.pages_scraped >= 1);
    assert!(stats.pages_scraped < 21);

    let reader = ArchiveReader::open(status.archive_path.expect("No archive")).unwrap();
    let ok = reader
        .metadata()
        .records
        .iter()
        .filter(|r| r.outcome == FetchOutcome::Ok)
        .count() as u64;
    assert_eq!(stats.pages_scraped, ok);
    assert_eq!(reader.metadata().status, RunStatus::Stopped);
    reader.verify().unwrap();
}

#[tokio::test]
async fn test_controller_rejects_second_start() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(page("Slow", &[]), "text/html")
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let controller = Controller::open(service(&dir), LogBuffer::default()).unwrap();
    let config = crawl_config(&format!("{}/", server.uri()));

    let first = controller.start(config.clone()).await.unwrap();
    let second = controller.start(config).await;
    assert!(matches!(second, Err(ScrollError::RunInProgress(ref id)) if *id == first));

    assert_eq!(controller.wait_idle().await.unwrap(), RunState::Completed);
}
