//! Record-level comparison of two snapshots.
//!
//! Records are matched on a key column (normally `citation`), so reordering
//! within a snapshot is not a change.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::warn;

use crate::error::HarvestError;
use crate::record::Record;

pub const CITATION_KEY: &str = "citation";

/// A snapshot indexed by its key column, in file order.
#[derive(Debug, Clone, Default)]
pub struct KeyedRecords {
  order: Vec<String>,
  by_key: HashMap<String, Record>,
  columns: Vec<String>,
}

impl KeyedRecords {
  pub fn from_records(records: Vec<Record>, key: &str) -> Self {
    let mut keyed = KeyedRecords::default();
    let mut seen_columns = HashSet::new();
    for record in records {
      for column in record.keys() {
        if seen_columns.insert(column.clone()) {
          keyed.columns.push(column.clone());
        }
      }
      let Some(id) = record.get(key).and_then(key_text) else {
        warn!("skipping record without {key}");
        continue;
      };
      if keyed.by_key.insert(id.clone(), record).is_none() {
        keyed.order.push(id);
      }
    }
    keyed
  }

  pub fn load(path: &Path, key: &str) -> Result<Self, HarvestError> {
    let raw = fs::read(path).map_err(|e| HarvestError::read(path, e))?;
    let records: Vec<Record> = serde_json::from_slice(&raw).map_err(|source| HarvestError::Json {
      context: path.display().to_string(),
      source,
    })?;
    Ok(Self::from_records(records, key))
  }

  pub fn get(&self, key: &str) -> Option<&Record> {
    self.by_key.get(key)
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  fn iter(&self) -> impl Iterator<Item = (&String, &Record)> {
    self.order.iter().map(move |k| (k, &self.by_key[k]))
  }
}

fn key_text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
  pub field: String,
  pub old: Value,
  pub new: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangedRecord {
  pub key: String,
  pub changes: Vec<FieldChange>,
}

impl ChangedRecord {
  pub fn change(&self, field: &str) -> Option<&FieldChange> {
    self.changes.iter().find(|c| c.field == field)
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diff {
  pub added: Vec<Record>,
  pub removed: Vec<Record>,
  pub changed: Vec<ChangedRecord>,
  pub columns_added: Vec<String>,
  pub columns_removed: Vec<String>,
}

impl Diff {
  pub fn is_empty(&self) -> bool {
    self.added.is_empty()
      && self.removed.is_empty()
      && self.changed.is_empty()
      && self.columns_added.is_empty()
      && self.columns_removed.is_empty()
  }
}

/// What happened between `old` and `new`.
///
/// Field changes are only reported for columns both snapshots have; new or
/// dropped columns are reported once, as column changes.
pub fn compare(old: &KeyedRecords, new: &KeyedRecords) -> Diff {
  let old_columns: HashSet<&String> = old.columns.iter().collect();
  let new_columns: HashSet<&String> = new.columns.iter().collect();
  let common: Vec<&String> = new
    .columns
    .iter()
    .filter(|c| old_columns.contains(c))
    .collect();

  let mut diff = Diff {
    columns_added: new
      .columns
      .iter()
      .filter(|c| !old_columns.contains(c))
      .cloned()
      .collect(),
    columns_removed: old
      .columns
      .iter()
      .filter(|c| !new_columns.contains(c))
      .cloned()
      .collect(),
    ..Diff::default()
  };

  for (key, record) in new.iter() {
    match old.get(key) {
      None => diff.added.push(record.clone()),
      Some(previous) => {
        let changes: Vec<FieldChange> = common
          .iter()
          .filter_map(|field| {
            let before = previous.get(field.as_str()).unwrap_or(&Value::Null);
            let after = record.get(field.as_str()).unwrap_or(&Value::Null);
            (before != after).then(|| FieldChange {
              field: field.to_string(),
              old: before.clone(),
              new: after.clone(),
            })
          })
          .collect();
        if !changes.is_empty() {
          diff.changed.push(ChangedRecord {
            key: key.clone(),
            changes,
          });
        }
      }
    }
  }
  for (key, record) in old.iter() {
    if new.get(key).is_none() {
      diff.removed.push(record.clone());
    }
  }
  diff
}

/// Plain rendering of a field value: strings bare, lists comma-separated,
/// anything else as compact JSON.
pub fn display_value(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(", "),
    other => other.to_string(),
  }
}

fn counted(n: usize, singular: &str, plural: &str) -> String {
  format!("{n} {}", if n == 1 { singular } else { plural })
}

fn human_row(record: &Record, key: &str) -> String {
  let mut lines = Vec::new();
  if let Some(value) = record.get(key) {
    lines.push(format!("  {key}: {}", display_value(value)));
  }
  for (field, value) in record {
    if field != key {
      lines.push(format!("  {field}: {}", display_value(value)));
    }
  }
  lines.join("\n")
}

/// Human readable report, empty when nothing changed.
pub fn human_text(diff: &Diff, key: &str) -> String {
  let mut summary = Vec::new();
  let mut blocks = Vec::new();

  for (columns, verb) in [(&diff.columns_added, "added"), (&diff.columns_removed, "removed")] {
    if columns.is_empty() {
      continue;
    }
    let fragment = format!("{} {verb}", counted(columns.len(), "column", "columns"));
    let listed: Vec<String> = columns.iter().map(|c| format!("  {c}")).collect();
    blocks.push(format!("{fragment}\n\n{}", listed.join("\n")));
    summary.push(fragment);
  }

  if !diff.changed.is_empty() {
    let fragment = format!("{} changed", counted(diff.changed.len(), "row", "rows"));
    blocks.push(fragment.clone());
    summary.push(fragment);
    for changed in &diff.changed {
      let mut block = vec![format!("  {key}: {}", changed.key)];
      for change in &changed.changes {
        block.push(format!(
          "    {}: \"{}\" => \"{}\"",
          change.field,
          display_value(&change.old),
          display_value(&change.new)
        ));
      }
      blocks.push(block.join("\n"));
    }
  }

  for (rows, verb) in [(&diff.added, "added"), (&diff.removed, "removed")] {
    if rows.is_empty() {
      continue;
    }
    let fragment = format!("{} {verb}", counted(rows.len(), "row", "rows"));
    blocks.push(fragment.clone());
    summary.push(fragment);
    let rendered: Vec<String> = rows.iter().map(|r| human_row(r, key)).collect();
    blocks.push(rendered.join("\n\n"));
  }

  if summary.is_empty() {
    return String::new();
  }
  format!("{}\n\n{}", summary.join(", "), blocks.join("\n\n"))
    .trim()
    .to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn keyed(value: Value) -> KeyedRecords {
    let records: Vec<Record> = serde_json::from_value(value).unwrap();
    KeyedRecords::from_records(records, CITATION_KEY)
  }

  #[test]
  fn finds_added_removed_and_changed() {
    let old = keyed(json!([
      {"citation": "VPRS 1", "title": "Inward"},
      {"citation": "VPRS 2", "title": "Outward"},
    ]));
    let new = keyed(json!([
      {"citation": "VPRS 3", "title": "Registers"},
      {"citation": "VPRS 1", "title": "Inward Correspondence"},
    ]));

    let diff = compare(&old, &new);

    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.added[0]["citation"], "VPRS 3");
    assert_eq!(diff.removed[0]["citation"], "VPRS 2");
    assert_eq!(diff.changed.len(), 1);
    let change = diff.changed[0].change("title").unwrap();
    assert_eq!(change.old, "Inward");
    assert_eq!(change.new, "Inward Correspondence");
  }

  #[test]
  fn reordering_is_not_a_change() {
    let old = keyed(json!([{"citation": "A", "n": 1}, {"citation": "B", "n": 2}]));
    let new = keyed(json!([{"citation": "B", "n": 2}, {"citation": "A", "n": 1}]));
    let diff = compare(&old, &new);
    assert!(diff.is_empty());
    assert_eq!(human_text(&diff, CITATION_KEY), "");
  }

  #[test]
  fn new_columns_are_not_field_changes() {
    let old = keyed(json!([{"citation": "A", "title": "x"}]));
    let new = keyed(json!([{"citation": "A", "title": "x", "rights_status": ["Open"]}]));
    let diff = compare(&old, &new);
    assert_eq!(diff.columns_added, ["rights_status"]);
    assert!(diff.changed.is_empty());
  }

  #[test]
  fn records_without_key_are_skipped() {
    let records = keyed(json!([{"title": "orphan"}, {"citation": 7}]));
    assert_eq!(records.len(), 1);
    assert!(records.get("7").is_some());
  }

  #[test]
  fn human_text_lists_each_section() {
    let old = keyed(json!([{"citation": "VA 1", "title": "Old"}]));
    let new = keyed(json!([
      {"citation": "VA 1", "title": "New"},
      {"title": "Treasury", "citation": "VA 2"},
    ]));
    let text = human_text(&compare(&old, &new), CITATION_KEY);
    assert_eq!(
      text,
      "1 row changed, 1 row added\n\n\
       1 row changed\n\n  citation: VA 1\n    title: \"Old\" => \"New\"\n\n\
       1 row added\n\n  citation: VA 2\n  title: Treasury"
    );
  }

  #[test]
  fn display_value_flattens_lists() {
    assert_eq!(display_value(&json!(["Open", "Closed"])), "Open, Closed");
    assert_eq!(display_value(&json!(12)), "12");
    assert_eq!(display_value(&Value::Null), "");
  }
}
