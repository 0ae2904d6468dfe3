use std::path::PathBuf;

use thiserror::Error;

/// Everything that can abort a harvest.
///
/// Request-side variants mean nothing was written; write-side variants mean
/// the harvest completed but could not be put on disk.
#[derive(Debug, Error)]
pub enum HarvestError {
  #[error("request to {url} failed: {source}")]
  Request {
    url: String,
    #[source]
    source: reqwest::Error,
  },

  #[error("request to {url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("could not decode response from {url}: {source}")]
  Decode {
    url: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("could not write {}: {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("could not read {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid JSON in {context}: {source}")]
  Json {
    context: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("could not build HTTP client: {0}")]
  Client(#[source] reqwest::Error),

  #[error("invalid API URL {url}: {message}")]
  Url { url: String, message: String },
}

impl HarvestError {
  /// True for failures on the API side of a run.
  pub fn is_request_failure(&self) -> bool {
    matches!(
      self,
      HarvestError::Request { .. } | HarvestError::Status { .. } | HarvestError::Decode { .. }
    )
  }

  pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    HarvestError::Write {
      path: path.into(),
      source,
    }
  }

  pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    HarvestError::Read {
      path: path.into(),
      source,
    }
  }
}
