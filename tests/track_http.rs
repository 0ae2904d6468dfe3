//! End-to-end tracking runs against a mock PROV search endpoint.
//!
//! The client is blocking, so each run happens on a blocking thread while
//! wiremock serves from the async runtime.

use std::fs;
use std::path::PathBuf;

use serde_json::{json, Value};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use prov_harvest::config::ApiConfig;
use prov_harvest::remote::ProvClient;
use prov_harvest::{track, HarvestError, RecordType};

const SEARCH_PATH: &str = "/search/query";

fn config_for(server: &MockServer, rows: u32) -> ApiConfig {
  ApiConfig {
    base_url: format!("{}{SEARCH_PATH}", server.uri()),
    rows,
    ..ApiConfig::default()
  }
}

fn page(docs: Value, num_found: u64) -> ResponseTemplate {
  ResponseTemplate::new(200).set_body_json(json!({
    "response": { "numFound": num_found, "start": 0, "docs": docs }
  }))
}

async fn mount_page(server: &MockServer, start: &str, response: ResponseTemplate) {
  Mock::given(method("GET"))
    .and(path(SEARCH_PATH))
    .and(query_param("q", "category:(Series)"))
    .and(query_param("wt", "json"))
    .and(query_param("start", start))
    .respond_with(response)
    .expect(1)
    .mount(server)
    .await;
}

async fn run_series(config: ApiConfig, output: PathBuf) -> Result<usize, HarvestError> {
  tokio::task::spawn_blocking(move || {
    let client = ProvClient::new(config)?;
    track::run(&client, client.config(), RecordType::Series, &output, false)
  })
  .await
  .expect("harvest thread panicked")
}

#[tokio::test(flavor = "multi_thread")]
async fn pages_are_concatenated_in_server_order() {
  let server = MockServer::start().await;
  mount_page(&server, "0", page(json!([{"citation": "VPRS 5"}, {"citation": "VPRS 1"}]), 3)).await;
  mount_page(&server, "2", page(json!([{"citation": "VPRS 3"}]), 3)).await;

  let dir = tempfile::tempdir().unwrap();
  let output = dir.path().join("prov-series-2024-01-01.json");
  let count = run_series(config_for(&server, 2), output.clone()).await.unwrap();

  assert_eq!(count, 3);
  let written: Value = serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
  assert_eq!(
    written,
    json!([{"citation": "VPRS 5"}, {"citation": "VPRS 1"}, {"citation": "VPRS 3"}])
  );
}

#[tokio::test(flavor = "multi_thread")]
async fn empty_collection_writes_empty_array() {
  let server = MockServer::start().await;
  mount_page(&server, "0", page(json!([]), 0)).await;

  let dir = tempfile::tempdir().unwrap();
  let output = dir.path().join("prov-series.json");
  run_series(config_for(&server, 100), output.clone()).await.unwrap();

  assert_eq!(fs::read_to_string(&output).unwrap(), "[]");
}

#[tokio::test(flavor = "multi_thread")]
async fn server_error_on_later_page_writes_nothing() {
  let server = MockServer::start().await;
  mount_page(&server, "0", page(json!([{"citation": "VPRS 1"}]), 2)).await;
  mount_page(&server, "1", ResponseTemplate::new(503)).await;

  let dir = tempfile::tempdir().unwrap();
  let output = dir.path().join("prov-series.json");
  let err = run_series(config_for(&server, 1), output.clone()).await.unwrap_err();

  assert!(matches!(err, HarvestError::Status { status: 503, .. }));
  assert!(!output.exists());
  assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_body_is_a_request_failure() {
  let server = MockServer::start().await;
  mount_page(&server, "0", ResponseTemplate::new(200).set_body_string("<html>busy</html>")).await;

  let dir = tempfile::tempdir().unwrap();
  let output = dir.path().join("prov-series.json");
  let err = run_series(config_for(&server, 10), output.clone()).await.unwrap_err();

  assert!(err.is_request_failure());
  assert!(!output.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn rerun_against_unchanged_api_is_byte_identical() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path(SEARCH_PATH))
    .respond_with(page(json!([{"citation": "VPRS 1", "title": "Inward", "ünïcode": "ĉ"}]), 1))
    .mount(&server)
    .await;

  let dir = tempfile::tempdir().unwrap();
  let first = dir.path().join("prov-series-2024-01-01.json");
  let second = dir.path().join("prov-series-2024-01-02.json");
  run_series(config_for(&server, 10), first.clone()).await.unwrap();
  run_series(config_for(&server, 10), second.clone()).await.unwrap();

  let written = fs::read_to_string(&first).unwrap();
  assert!(written.contains(r#""\u00fcn\u00efcode": "\u0109""#));
  assert_eq!(fs::read(first).unwrap(), fs::read(second).unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn retries_recover_from_transient_failure() {
  let server = MockServer::start().await;
  Mock::given(method("GET"))
    .and(path(SEARCH_PATH))
    .respond_with(ResponseTemplate::new(429))
    .up_to_n_times(1)
    .mount(&server)
    .await;
  Mock::given(method("GET"))
    .and(path(SEARCH_PATH))
    .respond_with(page(json!([{"citation": "VPRS 1"}]), 1))
    .mount(&server)
    .await;

  let config = ApiConfig {
    retries: 1,
    retry_wait: std::time::Duration::ZERO,
    ..config_for(&server, 10)
  };
  let dir = tempfile::tempdir().unwrap();
  let count = run_series(config, dir.path().join("out.json")).await.unwrap();
  assert_eq!(count, 1);
}
