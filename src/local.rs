use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::ser::{Formatter, PrettyFormatter};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::HarvestError;
use crate::record::{HarvestResult, RecordType};

pub const SOURCE_URL_XATTR: &str = "user.prov-api.source-url";
pub const RETRIEVED_AT_XATTR: &str = "user.prov-api.retrieved-at";
pub const PROGRESS_XATTR: &str = "user.org.gunzel.prov-api-harvester.progress";

/// `prov-<plural>.json`, the snapshot the repository keeps under version control.
pub fn latest_file_name(record_type: RecordType) -> String {
  format!("prov-{}.json", record_type.plural())
}

/// `prov-<plural>-<YYYY-MM-DD>.json`, the snapshot of one run.
pub fn dated_file_name(record_type: RecordType, date: NaiveDate) -> String {
  format!("prov-{}-{}.json", record_type.plural(), date.format("%Y-%m-%d"))
}

/// Serialize the harvest to `path`.
///
/// Contents go to a temporary file next to `path` which is renamed over it
/// only once fully written, so a failure never leaves a truncated snapshot.
/// Provenance attributes are set afterwards on a best-effort basis.
pub fn write_snapshot(result: &HarvestResult, path: &Path) -> Result<(), HarvestError> {
  let dir = match path.parent() {
    Some(parent) if !parent.as_os_str().is_empty() => parent,
    _ => Path::new("."),
  };
  let tmp = NamedTempFile::new_in(dir).map_err(|e| HarvestError::write(dir, e))?;
  {
    let mut writer = BufWriter::new(tmp.as_file());
    let mut serializer = serde_json::Serializer::with_formatter(&mut writer, AsciiPrettyFormatter::new());
    result
      .records
      .serialize(&mut serializer)
      .map_err(|source| HarvestError::Json {
        context: path.display().to_string(),
        source,
      })?;
    writer.flush().map_err(|e| HarvestError::write(path, e))?;
  }
  tmp.as_file().sync_all().map_err(|e| HarvestError::write(path, e))?;
  tmp
    .persist(path)
    .map_err(|e| HarvestError::write(path, e.error))?;
  // NamedTempFile creates 0600 files; snapshots are meant to be shared.
  set_readable(path);
  tag_provenance(path, result);
  Ok(())
}

/// Two-space pretty printing with every non-ASCII character written as a
/// `\uXXXX` escape (astral characters as a surrogate pair), the byte layout
/// of the snapshots already under version control.
pub struct AsciiPrettyFormatter {
  pretty: PrettyFormatter<'static>,
}

impl AsciiPrettyFormatter {
  pub fn new() -> Self {
    AsciiPrettyFormatter {
      pretty: PrettyFormatter::with_indent(b"  "),
    }
  }
}

impl Default for AsciiPrettyFormatter {
  fn default() -> Self {
    Self::new()
  }
}

impl Formatter for AsciiPrettyFormatter {
  fn write_string_fragment<W: ?Sized + Write>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()> {
    let mut plain_from = 0;
    for (i, ch) in fragment.char_indices() {
      if ch.is_ascii() {
        continue;
      }
      writer.write_all(fragment[plain_from..i].as_bytes())?;
      let mut units = [0u16; 2];
      for unit in ch.encode_utf16(&mut units) {
        write!(writer, "\\u{unit:04x}")?;
      }
      plain_from = i + ch.len_utf8();
    }
    writer.write_all(fragment[plain_from..].as_bytes())
  }

  fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
    self.pretty.begin_array(writer)
  }

  fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
    self.pretty.end_array(writer)
  }

  fn begin_array_value<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
    self.pretty.begin_array_value(writer, first)
  }

  fn end_array_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
    self.pretty.end_array_value(writer)
  }

  fn begin_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
    self.pretty.begin_object(writer)
  }

  fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
    self.pretty.end_object(writer)
  }

  fn begin_object_key<W: ?Sized + Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
    self.pretty.begin_object_key(writer, first)
  }

  fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
    self.pretty.begin_object_value(writer)
  }

  fn end_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
    self.pretty.end_object_value(writer)
  }
}

#[cfg(unix)]
fn set_readable(path: &Path) {
  use std::os::unix::fs::PermissionsExt;
  if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o644)) {
    debug!("could not relax permissions on {}: {e}", path.display());
  }
}

#[cfg(not(unix))]
fn set_readable(_path: &Path) {}

fn tag_provenance(path: &Path, result: &HarvestResult) {
  let attrs = [
    (SOURCE_URL_XATTR, result.source_url.clone()),
    (RETRIEVED_AT_XATTR, result.retrieved_at.to_rfc3339()),
  ];
  for (name, value) in attrs {
    if let Err(e) = xattr::set(path, name, value.as_bytes()) {
      warn!("could not set {name} on {}: {e}", path.display());
      return;
    }
  }
}

/// Provenance previously recorded on a snapshot, if the filesystem kept it.
pub fn read_provenance(path: &Path) -> Option<(String, String)> {
  let get = |name| {
    xattr::get(path, name)
      .ok()
      .flatten()
      .and_then(|v| String::from_utf8(v).ok())
  };
  Some((get(SOURCE_URL_XATTR)?, get(RETRIEVED_AT_XATTR)?))
}

/// Where a bulk harvest got to; stored on the output file itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HarvestProgress {
  pub start: u64,
  pub total_bytes: u64,
  pub total_docs: u64,
}

pub fn load_progress(path: &Path) -> Option<HarvestProgress> {
  if !path.exists() {
    return None;
  }
  match xattr::get(path, PROGRESS_XATTR) {
    Ok(Some(raw)) => serde_json::from_slice(&raw).ok(),
    Ok(None) => None,
    Err(e) => {
      debug!("no progress readable on {}: {e}", path.display());
      None
    }
  }
}

pub fn save_progress(path: &Path, progress: &HarvestProgress) -> Result<(), HarvestError> {
  let raw = serde_json::to_vec(progress).map_err(|source| HarvestError::Json {
    context: PROGRESS_XATTR.to_string(),
    source,
  })?;
  xattr::set(path, PROGRESS_XATTR, &raw).map_err(|e| HarvestError::write(path, e))
}

/// Forget saved progress, e.g. before starting a harvest over.
pub fn clear_progress(path: &Path) {
  if let Err(e) = xattr::remove(path, PROGRESS_XATTR) {
    debug!("no progress removed from {}: {e}", path.display());
  }
}

/// Resolve the output path of a tracking run.
pub fn snapshot_path(
  output: Option<PathBuf>,
  dir: &Path,
  record_type: RecordType,
  date: NaiveDate,
) -> PathBuf {
  output.unwrap_or_else(|| dir.join(dated_file_name(record_type, date)))
}
