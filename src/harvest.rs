//! Bulk harvesting of an arbitrary query into one large JSON array file.
//!
//! Records are streamed to disk page by page instead of being held in
//! memory, and the position reached is stored on the file itself so an
//! interrupted harvest can pick up where it stopped. With compression on,
//! every page becomes its own zstd frame; a file cut short between pages
//! still decodes.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, warn};

use crate::config::ApiConfig;
use crate::error::HarvestError;
use crate::local::{clear_progress, load_progress, save_progress, HarvestProgress};
use crate::remote::{pace, PageSource, SearchQuery};

pub const DEFAULT_QUERY: &str = "*:*";
pub const DEFAULT_SORT: &str = "identifier.PROV_ACM.id asc";
pub const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone)]
pub struct HarvestOptions {
  pub query: SearchQuery,
  pub output: PathBuf,
  pub compress: bool,
  pub resume: bool,
}

impl HarvestOptions {
  pub fn default_output(compress: bool) -> PathBuf {
    PathBuf::from(if compress {
      "output.json.zst"
    } else {
      "output.json"
    })
  }
}

/// Where a bulk harvest ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HarvestSummary {
  /// Records fetched by this invocation.
  pub fetched: u64,
  pub progress: HarvestProgress,
}

/// Stream every record of `options.query` into `options.output`.
pub fn stream_records(
  source: &impl PageSource,
  config: &ApiConfig,
  options: &HarvestOptions,
) -> Result<HarvestSummary, HarvestError> {
  let output = options.output.as_path();
  let saved = if options.resume {
    load_progress(output)
  } else {
    None
  };

  let (mut progress, mut total_docs, mut first_record) = match saved {
    Some(progress) => {
      info!("Resuming from record {}", progress.start);
      (progress, Some(progress.total_docs), false)
    }
    None => {
      if options.resume {
        warn!(
          "no saved progress on {}; starting from the beginning",
          output.display()
        );
      }
      File::create(output).map_err(|e| HarvestError::write(output, e))?;
      clear_progress(output);
      (HarvestProgress::default(), None, true)
    }
  };

  let began = Instant::now();
  let mut fetched = 0u64;
  let mut opened = !first_record;
  let mut progress_warned = false;

  while total_docs.map_or(true, |total| progress.start < total) {
    let page = source.fetch_page(&options.query, progress.start)?;
    let found = page.num_found;
    let count = page.docs.len() as u64;
    let done = count == 0 || progress.start + count >= found;

    let mut chunk = Vec::new();
    if !opened {
      chunk.push(b'[');
      opened = true;
    }
    for doc in &page.docs {
      if !first_record {
        chunk.extend_from_slice(b",\n");
      }
      first_record = false;
      serde_json::to_writer(&mut chunk, doc).map_err(|source| HarvestError::Json {
        context: output.display().to_string(),
        source,
      })?;
    }
    if done {
      chunk.push(b']');
    }
    append_chunk(output, &chunk, options.compress)?;

    progress.start += count;
    progress.total_bytes += page.content_length as u64;
    // An empty page closes the array even if `found` promised more, so the
    // saved progress has to read as finished too.
    progress.total_docs = if done { progress.start } else { found };
    total_docs = Some(progress.total_docs);
    fetched += count;

    if let Err(e) = save_progress(output, &progress) {
      if !progress_warned {
        warn!("progress cannot be saved, --resume will not work: {e}");
        progress_warned = true;
      }
    }

    let overall = began.elapsed().as_secs_f64();
    let rate = if overall > 0.0 {
      fetched as f64 / overall
    } else {
      0.0
    };
    info!(
      "Fetched {count} documents in {:.2} seconds. Total: {}/{found}. \
       Overall rate: {rate:.2} rows/second. Downloaded: {} bytes (Total: {} bytes)",
      page.elapsed.as_secs_f64(),
      progress.start,
      page.content_length,
      progress.total_bytes
    );

    if done {
      return Ok(HarvestSummary { fetched, progress });
    }
    pace(config, page.rate_limit_remaining);
  }

  info!("Nothing left to fetch for {}", output.display());
  Ok(HarvestSummary { fetched, progress })
}

fn append_chunk(path: &Path, chunk: &[u8], compress: bool) -> Result<(), HarvestError> {
  let file = OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .map_err(|e| HarvestError::write(path, e))?;
  let result = if compress {
    zstd::stream::Encoder::new(file, ZSTD_LEVEL)
      .and_then(|mut enc| {
        enc.write_all(chunk)?;
        enc.finish()
      })
      .and_then(|file| file.sync_data())
  } else {
    let mut file = file;
    file.write_all(chunk).and_then(|_| file.sync_data())
  };
  result.map_err(|e| HarvestError::write(path, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::record::Record;
  use crate::remote::Page;
  use serde_json::{json, Value};
  use std::cell::Cell;
  use std::fs;

  /// Serves `records` by offset, `rows` at a time.
  struct OffsetSource {
    records: Vec<Record>,
    rows: usize,
    fail_at: Option<u64>,
    num_found: Option<u64>,
    calls: Cell<usize>,
  }

  impl OffsetSource {
    fn new(count: usize, rows: usize) -> Self {
      let records = (0..count)
        .map(|i| json!({ "citation": format!("VPRS {i}") }).as_object().cloned().unwrap())
        .collect();
      OffsetSource {
        records,
        rows,
        fail_at: None,
        num_found: None,
        calls: Cell::new(0),
      }
    }
  }

  impl PageSource for OffsetSource {
    fn fetch_page(&self, query: &SearchQuery, start: u64) -> Result<Page, HarvestError> {
      self.calls.set(self.calls.get() + 1);
      if self.fail_at == Some(start) {
        return Err(HarvestError::Status {
          url: format!("fake://{}", query.q),
          status: 429,
        });
      }
      let from = (start as usize).min(self.records.len());
      let to = (from + self.rows).min(self.records.len());
      Ok(Page {
        docs: self.records[from..to].to_vec(),
        num_found: self.num_found.unwrap_or(self.records.len() as u64),
        content_length: 100,
        ..Page::default()
      })
    }

    fn source_url(&self, query: &SearchQuery) -> String {
      format!("fake://{}", query.q)
    }
  }

  fn options(output: PathBuf, compress: bool, resume: bool) -> HarvestOptions {
    HarvestOptions {
      query: SearchQuery::new(DEFAULT_QUERY).sorted_by(DEFAULT_SORT),
      output,
      compress,
      resume,
    }
  }

  fn citations(raw: &[u8]) -> Vec<String> {
    let parsed: Vec<Value> = serde_json::from_slice(raw).unwrap();
    parsed
      .iter()
      .map(|v| v["citation"].as_str().unwrap().to_string())
      .collect()
  }

  fn xattrs_supported(dir: &Path) -> bool {
    let check = dir.join("xattr-check");
    fs::write(&check, b"").unwrap();
    let supported = xattr::set(&check, "user.check", b"1").is_ok();
    fs::remove_file(check).unwrap();
    supported
  }

  #[test]
  fn streams_all_pages_into_one_array() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.json");
    let source = OffsetSource::new(5, 2);

    let summary = stream_records(&source, &ApiConfig::default(), &options(output.clone(), false, false)).unwrap();

    assert_eq!(summary.fetched, 5);
    assert_eq!(summary.progress.total_bytes, 300);
    assert_eq!(source.calls.get(), 3);
    let raw = fs::read(&output).unwrap();
    assert_eq!(citations(&raw), ["VPRS 0", "VPRS 1", "VPRS 2", "VPRS 3", "VPRS 4"]);
    assert!(raw.windows(2).any(|w| w == b",\n"));
  }

  #[test]
  fn empty_result_is_empty_array() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.json");
    stream_records(&OffsetSource::new(0, 10), &ApiConfig::default(), &options(output.clone(), false, false)).unwrap();
    assert_eq!(fs::read_to_string(output).unwrap(), "[]");
  }

  #[test]
  fn compressed_output_decodes_to_same_array() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.json.zst");
    stream_records(&OffsetSource::new(7, 3), &ApiConfig::default(), &options(output.clone(), true, false)).unwrap();

    let raw = zstd::stream::decode_all(File::open(&output).unwrap()).unwrap();
    assert_eq!(citations(&raw).len(), 7);
  }

  #[test]
  fn fresh_start_overwrites_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.json");
    fs::write(&output, b"stale").unwrap();
    stream_records(&OffsetSource::new(1, 10), &ApiConfig::default(), &options(output.clone(), false, false)).unwrap();
    assert_eq!(citations(&fs::read(output).unwrap()), ["VPRS 0"]);
  }

  #[test]
  fn resume_continues_after_failure() {
    let dir = tempfile::tempdir().unwrap();
    if !xattrs_supported(dir.path()) {
      eprintln!("skipping resume check: {} has no user xattrs", dir.path().display());
      return;
    }
    for compress in [false, true] {
      let output = dir.path().join(format!("resume-{compress}.json"));
      let mut failing = OffsetSource::new(6, 2);
      failing.fail_at = Some(4);
      let err = stream_records(&failing, &ApiConfig::default(), &options(output.clone(), compress, false)).unwrap_err();
      assert!(err.is_request_failure());
      assert_eq!(load_progress(&output).unwrap().start, 4);

      let healthy = OffsetSource::new(6, 2);
      let summary = stream_records(&healthy, &ApiConfig::default(), &options(output.clone(), compress, true)).unwrap();
      assert_eq!(summary.fetched, 2);
      assert_eq!(healthy.calls.get(), 1);

      let raw = if compress {
        zstd::stream::decode_all(File::open(&output).unwrap()).unwrap()
      } else {
        fs::read(&output).unwrap()
      };
      assert_eq!(citations(&raw).len(), 6);
    }
  }

  #[test]
  fn empty_page_finishes_harvest_for_later_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.json");
    let mut overstated = OffsetSource::new(3, 2);
    overstated.num_found = Some(5);

    let summary = stream_records(&overstated, &ApiConfig::default(), &options(output.clone(), false, false)).unwrap();

    assert_eq!(overstated.calls.get(), 3);
    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.progress.start, 3);
    assert_eq!(summary.progress.total_docs, 3);
    assert_eq!(citations(&fs::read(&output).unwrap()).len(), 3);

    if !xattrs_supported(dir.path()) {
      eprintln!("skipping resume check: {} has no user xattrs", dir.path().display());
      return;
    }
    assert_eq!(load_progress(&output), Some(summary.progress));

    let grown = OffsetSource::new(5, 2);
    let resumed = stream_records(&grown, &ApiConfig::default(), &options(output.clone(), false, true)).unwrap();

    assert_eq!(grown.calls.get(), 0);
    assert_eq!(resumed.fetched, 0);
    assert_eq!(
      citations(&fs::read(&output).unwrap()),
      ["VPRS 0", "VPRS 1", "VPRS 2"]
    );
  }

  #[test]
  fn resume_without_progress_starts_over() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("output.json");
    fs::write(&output, b"[{\"half\":").unwrap();
    let source = OffsetSource::new(3, 5);
    stream_records(&source, &ApiConfig::default(), &options(output.clone(), false, true)).unwrap();
    assert_eq!(citations(&fs::read(output).unwrap()).len(), 3);
  }
}
