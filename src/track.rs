//! The tracking harvest: every record of one type, in one snapshot.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use serde_json::Value;
use tracing::info;

use crate::config::ApiConfig;
use crate::error::HarvestError;
use crate::local::write_snapshot;
use crate::record::{HarvestResult, Record, RecordType};
use crate::remote::{pace, PageSource, SearchQuery};

pub const IDENTIFIER_KEY: &str = "identifier.PROV_ACM.id";

/// Page through `query` until the server has nothing more to give.
///
/// Stops when the cursor reaches `numFound` or a page comes back empty,
/// whichever happens first.
pub fn fetch_all(
  source: &impl PageSource,
  config: &ApiConfig,
  query: &SearchQuery,
) -> Result<Vec<Record>, HarvestError> {
  let mut records = Vec::new();
  let mut start = 0;
  loop {
    let page = source.fetch_page(query, start)?;
    let fetched = page.docs.len() as u64;
    let num_found = page.num_found;
    records.extend(page.docs);
    start += fetched;
    info!("Fetched {fetched} documents. Total: {}/{num_found}", records.len());
    if fetched == 0 || start >= num_found {
      break;
    }
    pace(config, page.rate_limit_remaining);
  }
  Ok(records)
}

/// Harvest every record of `record_type`.
pub fn harvest(
  source: &impl PageSource,
  config: &ApiConfig,
  record_type: RecordType,
) -> Result<HarvestResult, HarvestError> {
  let query = SearchQuery::new(record_type.query());
  let retrieved_at = Utc::now();
  let records = fetch_all(source, config, &query)?;
  Ok(HarvestResult {
    records,
    source_url: source.source_url(&query),
    retrieved_at,
  })
}

/// Harvest `record_type` and write it to `output`.
///
/// Nothing touches `output` unless every page was fetched.
pub fn run(
  source: &impl PageSource,
  config: &ApiConfig,
  record_type: RecordType,
  output: &Path,
  tidy: bool,
) -> Result<usize, HarvestError> {
  let mut result = harvest(source, config, record_type)?;
  if tidy {
    info!("Normalising keys...");
    normalise_keys(&mut result.records);
    info!("Sorting documents...");
    sort_by_identifier(&mut result.records);
  }
  write_snapshot(&result, output)?;
  info!("Data written to {}", output.display());
  Ok(result.records.len())
}

/// Give every record the same keys, alphabetically, filling gaps with null.
///
/// Makes line-based diffs of consecutive snapshots stable.
pub fn normalise_keys(records: &mut [Record]) {
  let keys: BTreeSet<String> = records.iter().flat_map(|r| r.keys().cloned()).collect();
  for record in records.iter_mut() {
    let mut normalised = Record::with_capacity(keys.len());
    for key in &keys {
      normalised.insert(key.clone(), record.remove(key).unwrap_or(Value::Null));
    }
    *record = normalised;
  }
}

/// Sort key of an identifier like `VPRS 515/P1` or `VA 475`.
///
/// The alphabetic prefix compares case-insensitively, then the number
/// numerically (non-numbers last), then the part suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierKey {
  prefix: String,
  number: Option<u64>,
  part: String,
}

impl IdentifierKey {
  pub fn parse(id: &str) -> Self {
    match id.split_once(' ') {
      Some((prefix, rest)) => {
        let (number, part) = match rest.split_once('/') {
          Some((number, part)) => (number, part.to_uppercase()),
          None => (rest, String::new()),
        };
        IdentifierKey {
          prefix: prefix.to_uppercase(),
          number: number.parse().ok(),
          part,
        }
      }
      None => IdentifierKey {
        prefix: id.to_uppercase(),
        number: None,
        part: String::new(),
      },
    }
  }

  pub fn of(record: &Record) -> Self {
    Self::parse(record.get(IDENTIFIER_KEY).and_then(Value::as_str).unwrap_or(""))
  }
}

impl Ord for IdentifierKey {
  fn cmp(&self, other: &Self) -> Ordering {
    let number = match (self.number, other.number) {
      (Some(a), Some(b)) => a.cmp(&b),
      (Some(_), None) => Ordering::Less,
      (None, Some(_)) => Ordering::Greater,
      (None, None) => Ordering::Equal,
    };
    self
      .prefix
      .cmp(&other.prefix)
      .then(number)
      .then_with(|| self.part.cmp(&other.part))
  }
}

impl PartialOrd for IdentifierKey {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Stable sort by [`IdentifierKey`].
pub fn sort_by_identifier(records: &mut [Record]) {
  records.sort_by_cached_key(IdentifierKey::of);
}
