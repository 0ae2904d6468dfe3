//! Commit messages for the scheduled snapshot job.
//!
//! Each run leaves `prov-<type>.json` (last committed) beside
//! `prov-<type>-<date>.json` (just harvested). The message leads with what
//! is new and what has opened to the public, then the full record diff.

use std::path::Path;

use chrono::{NaiveDate, Utc};
use serde_json::Value;

use crate::diff::{compare, display_value, human_text, ChangedRecord, Diff, KeyedRecords, CITATION_KEY};
use crate::error::HarvestError;
use crate::local::{dated_file_name, latest_file_name};
use crate::record::{Record, RecordType};

pub const TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S UTC %Y";

/// Section order in the message.
const SECTIONS: [(&str, RecordType); 4] = [
  ("Functions", RecordType::Function),
  ("Agencies", RecordType::Agency),
  ("Series", RecordType::Series),
  ("Consignments", RecordType::Consignment),
];

pub fn default_timestamp() -> String {
  Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

fn text_or<'a>(record: &'a Record, key: &str, fallback: &'a str) -> &'a str {
  record.get(key).and_then(Value::as_str).unwrap_or(fallback)
}

/// First entry of a list field, trimmed; a plain string counts as a list of one.
fn first_entry(record: &Record, key: &str) -> Option<String> {
  let first = match record.get(key)? {
    Value::Array(items) => items.first()?.as_str()?,
    Value::String(s) => s.as_str(),
    _ => return None,
  };
  let first = first.trim();
  (!first.is_empty()).then(|| first.to_string())
}

fn rights_display(record: &Record) -> String {
  match record.get("rights_status").map(display_value) {
    Some(status) if !status.is_empty() => status,
    _ => "Unknown".to_string(),
  }
}

fn citation(record: &Record) -> &str {
  text_or(record, CITATION_KEY, "Unknown")
}

/// One line per newly added record, shaped for its record type.
pub fn addition_line(record_type: RecordType, record: &Record) -> String {
  match record_type {
    RecordType::Function | RecordType::Agency => {
      format!("{}: {}", citation(record), text_or(record, "title", "Untitled"))
    }
    RecordType::Series => format!(
      "{}: {} ({}) [{}]",
      citation(record),
      text_or(record, "title", "Untitled"),
      first_entry(record, "creating_agents.title").unwrap_or_else(|| "Unknown Agency".into()),
      rights_display(record)
    ),
    RecordType::Consignment => format!(
      "{}: {} [{}]",
      citation(record),
      first_entry(record, "parents.titles").unwrap_or_else(|| "Unknown Series".into()),
      rights_display(record)
    ),
  }
}

/// Records already published whose access status now includes `Open`.
///
/// New records are left out; their status shows in the additions.
pub fn opening_lines(record_type: RecordType, changed: &[ChangedRecord], current: &KeyedRecords) -> Vec<String> {
  if !matches!(record_type, RecordType::Series | RecordType::Consignment) {
    return Vec::new();
  }
  changed
    .iter()
    .filter_map(|record| {
      let change = record.change("rights_status")?;
      let (old, new) = (display_value(&change.old), display_value(&change.new));
      if !new.contains("Open") || old.contains("Open") {
        return None;
      }
      let full = current.get(&record.key)?;
      let status_change = format!("{old} → {new}");
      Some(match record_type {
        RecordType::Series => format!(
          "{}: {} ({}) [{status_change}]",
          record.key,
          text_or(full, "title", "Untitled"),
          first_entry(full, "creating_agents.title").unwrap_or_else(|| "Unknown Agency".into()),
        ),
        _ => format!(
          "{}: {} [{status_change}]",
          record.key,
          first_entry(full, "parents.titles").unwrap_or_else(|| "Unknown Series".into()),
        ),
      })
    })
    .collect()
}

/// Comparison of one record type's committed and freshly harvested snapshots.
pub enum SectionOutcome {
  Missing { old: String, new: String },
  Failed { old: String, error: HarvestError },
  Compared { diff: Diff, current: KeyedRecords },
}

pub fn compare_section(dir: &Path, record_type: RecordType, date: NaiveDate) -> SectionOutcome {
  let old = latest_file_name(record_type);
  let new = dated_file_name(record_type, date);
  let (old_path, new_path) = (dir.join(&old), dir.join(&new));
  if !old_path.exists() || !new_path.exists() {
    return SectionOutcome::Missing { old, new };
  }
  let loaded = KeyedRecords::load(&old_path, CITATION_KEY)
    .and_then(|previous| Ok((previous, KeyedRecords::load(&new_path, CITATION_KEY)?)));
  match loaded {
    Ok((previous, current)) => SectionOutcome::Compared {
      diff: compare(&previous, &current),
      current,
    },
    Err(error) => SectionOutcome::Failed { old, error },
  }
}

/// Build the full commit message for the snapshots in `dir` dated `date`.
pub fn generate(dir: &Path, date: NaiveDate, timestamp: &str) -> String {
  let mut additions = Vec::new();
  let mut openings = Vec::new();
  let mut details = Vec::new();

  for (label, record_type) in SECTIONS {
    let detail = match compare_section(dir, record_type, date) {
      SectionOutcome::Missing { old, new } => format!("File not found: {old} or {new}"),
      SectionOutcome::Failed { old, error } => format!("diff failed for '{old}': {error}"),
      SectionOutcome::Compared { diff, current } => {
        if !diff.added.is_empty() {
          let lines: Vec<String> = diff.added.iter().map(|r| addition_line(record_type, r)).collect();
          additions.push((label, lines.join("\n")));
        }
        let opened = opening_lines(record_type, &diff.changed, &current);
        if !opened.is_empty() {
          openings.push((label, opened.join("\n")));
        }
        human_text(&diff, CITATION_KEY)
      }
    };
    details.push((label, detail));
  }

  let mut parts = vec![timestamp.to_string(), String::new()];

  if !additions.is_empty() {
    parts.push("## New Additions".into());
    parts.push(String::new());
    for (label, lines) in additions {
      parts.push(format!("### New {label}"));
      parts.push(String::new());
      parts.push(lines);
      parts.push(String::new());
    }
  }

  if !openings.is_empty() {
    parts.push("## Openings".into());
    parts.push(String::new());
    for (label, lines) in openings {
      parts.push(format!("### {label} Opened"));
      parts.push(String::new());
      parts.push(lines);
      parts.push(String::new());
    }
  }

  parts.push("## Detailed Changes".into());
  parts.push(String::new());
  for (label, detail) in details {
    parts.push(format!("### {label}"));
    parts.push(String::new());
    let detail = detail.trim();
    parts.push(if detail.is_empty() {
      "no changes".to_string()
    } else {
      detail.to_string()
    });
    parts.push(String::new());
  }

  parts.join("\n").trim_end().to_string()
}
