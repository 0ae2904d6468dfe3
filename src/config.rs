//! API client settings.
//!
//! Defaults mirror the limits PROV publishes for anonymous use. Binaries
//! expose them through [`ApiArgs`] so a cron job can tune them per run.

use std::time::Duration;

use clap::Args;

pub const DEFAULT_BASE_URL: &str = "https://api.prov.vic.gov.au/search/query";
pub const DEFAULT_USER_AGENT: &str = concat!("prov-harvest/", env!("CARGO_PKG_VERSION"));
/// Requests per minute left before we start pausing between pages.
pub const RATE_LIMIT_FLOOR: u32 = 20;

#[derive(Debug, Clone)]
pub struct ApiConfig {
  pub base_url: String,
  pub rows: u32,
  pub user_agent: String,
  pub timeout: Duration,
  /// Extra attempts after the first failed request.
  pub retries: u32,
  /// Wait before retry `n` is `retry_wait * n`.
  pub retry_wait: Duration,
  /// Unconditional pause after every page that is not the last.
  pub page_delay: Duration,
  pub rate_limit_floor: u32,
  pub rate_limit_pause: Duration,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      rows: 1000,
      user_agent: DEFAULT_USER_AGENT.to_string(),
      timeout: Duration::from_secs(60),
      retries: 0,
      retry_wait: Duration::from_secs(63),
      page_delay: Duration::ZERO,
      rate_limit_floor: RATE_LIMIT_FLOOR,
      rate_limit_pause: Duration::from_secs(2),
    }
  }
}

/// Command-line options shared by the harvesting binaries.
#[derive(Debug, Clone, Args)]
pub struct ApiArgs {
  /// Search endpoint of the PROV API
  #[arg(long, env = "PROV_API_URL", default_value = DEFAULT_BASE_URL)]
  pub api_url: String,

  /// Number of rows to fetch per request
  #[arg(long, default_value_t = 1000)]
  pub rows: u32,

  /// Request timeout in seconds
  #[arg(long, default_value_t = 60)]
  pub timeout: u64,

  /// Retries per request before giving up (0 leaves retrying to the scheduler)
  #[arg(long)]
  pub retries: Option<u32>,

  /// Base wait in seconds between retries; grows linearly with each attempt
  #[arg(long, default_value_t = 63)]
  pub retry_wait: u64,
}

impl ApiArgs {
  /// Resolve into a config, starting from a binary-specific baseline.
  pub fn into_config(self, base: ApiConfig) -> ApiConfig {
    ApiConfig {
      base_url: self.api_url,
      rows: self.rows.max(1),
      timeout: Duration::from_secs(self.timeout),
      retries: self.retries.unwrap_or(base.retries),
      retry_wait: Duration::from_secs(self.retry_wait),
      ..base
    }
  }
}
