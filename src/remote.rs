use std::thread;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::HarvestError;
use crate::record::Record;

/// One decoded page of search results.
#[derive(Debug, Clone, Default)]
pub struct Page {
  pub docs: Vec<Record>,
  pub num_found: u64,
  /// `x-ratelimit-remaining-minute`, when the server sent it.
  pub rate_limit_remaining: Option<u32>,
  /// Size of the response body.
  pub content_length: usize,
  pub elapsed: Duration,
}

/// A search query against the API, without the pagination cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
  pub q: String,
  pub sort: Option<String>,
}

impl SearchQuery {
  pub fn new(q: impl Into<String>) -> Self {
    SearchQuery {
      q: q.into(),
      sort: None,
    }
  }

  pub fn sorted_by(mut self, sort: impl Into<String>) -> Self {
    self.sort = Some(sort.into());
    self
  }
}

/// Anything that can hand out pages of search results.
///
/// The harvest loops are written against this so they can be driven by an
/// in-memory source in tests.
pub trait PageSource {
  fn fetch_page(&self, query: &SearchQuery, start: u64) -> Result<Page, HarvestError>;

  /// The URL recorded as provenance for a harvest of `query`.
  fn source_url(&self, query: &SearchQuery) -> String;
}

#[derive(Deserialize)]
struct SearchEnvelope {
  response: SearchResponse,
}

#[derive(Deserialize)]
struct SearchResponse {
  #[serde(rename = "numFound")]
  num_found: u64,
  #[serde(default)]
  docs: Vec<Record>,
}

/// Blocking client for the PROV search endpoint.
pub struct ProvClient {
  client: Client,
  config: ApiConfig,
}

impl ProvClient {
  pub fn new(config: ApiConfig) -> Result<Self, HarvestError> {
    let client = Client::builder()
      .user_agent(config.user_agent.as_str())
      .timeout(config.timeout)
      .build()
      .map_err(HarvestError::Client)?;
    Ok(ProvClient { client, config })
  }

  pub fn config(&self) -> &ApiConfig {
    &self.config
  }

  /// Full request URL. Parameter order follows the API documentation.
  pub fn page_url(&self, query: &SearchQuery, start: Option<u64>) -> Result<Url, HarvestError> {
    let mut url = Url::parse(&self.config.base_url).map_err(|e| HarvestError::Url {
      url: self.config.base_url.clone(),
      message: e.to_string(),
    })?;
    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("rows", &self.config.rows.to_string());
      if let Some(start) = start {
        pairs.append_pair("start", &start.to_string());
      }
      if let Some(sort) = &query.sort {
        pairs.append_pair("sort", sort);
      }
      pairs.append_pair("wt", "json");
      pairs.append_pair("q", &query.q);
    }
    Ok(url)
  }

  fn fetch_once(&self, url: &Url) -> Result<Page, HarvestError> {
    let began = Instant::now();
    let resp = self
      .client
      .get(url.clone())
      .send()
      .map_err(|source| HarvestError::Request {
        url: url.to_string(),
        source,
      })?;
    let status = resp.status();
    if !status.is_success() {
      return Err(HarvestError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }
    let rate_limit_remaining = resp
      .headers()
      .get("x-ratelimit-remaining-minute")
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse().ok());
    let body = resp.bytes().map_err(|source| HarvestError::Request {
      url: url.to_string(),
      source,
    })?;
    let envelope: SearchEnvelope =
      serde_json::from_slice(&body).map_err(|source| HarvestError::Decode {
        url: url.to_string(),
        source,
      })?;
    Ok(Page {
      docs: envelope.response.docs,
      num_found: envelope.response.num_found,
      rate_limit_remaining,
      content_length: body.len(),
      elapsed: began.elapsed(),
    })
  }
}

impl PageSource for ProvClient {
  fn fetch_page(&self, query: &SearchQuery, start: u64) -> Result<Page, HarvestError> {
    let url = self.page_url(query, Some(start))?;
    let attempts = self.config.retries + 1;
    let mut attempt = 1;
    loop {
      debug!(%url, attempt, "fetching page");
      match self.fetch_once(&url) {
        Ok(page) => return Ok(page),
        Err(err) if attempt < attempts => {
          let wait = self.config.retry_wait * attempt;
          warn!(
            "{err}. Attempt {attempt}/{attempts}. Waiting {} seconds before retrying...",
            wait.as_secs()
          );
          thread::sleep(wait);
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }

  fn source_url(&self, query: &SearchQuery) -> String {
    self
      .page_url(query, None)
      .map(|u| u.to_string())
      .unwrap_or_else(|_| self.config.base_url.clone())
  }
}

/// Sleep between pages: always `page_delay`, plus `rate_limit_pause` when the
/// server says we are close to the per-minute cap.
pub fn pace(config: &ApiConfig, rate_limit_remaining: Option<u32>) {
  if !config.page_delay.is_zero() {
    thread::sleep(config.page_delay);
  }
  let remaining = rate_limit_remaining.unwrap_or(config.rate_limit_floor);
  if remaining < config.rate_limit_floor {
    warn!(
      "Rate limit approaching. Remaining: {remaining}. Sleeping for {} seconds...",
      config.rate_limit_pause.as_secs()
    );
    thread::sleep(config.rate_limit_pause);
  }
}
