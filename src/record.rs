use std::fmt;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde_json::{Map, Value};

/// One metadata item exactly as the API returned it.
pub type Record = Map<String, Value>;

/// The top-level collections of the PROV API that can be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum RecordType {
  Function,
  Agency,
  Series,
  Consignment,
}

impl RecordType {
  pub const ALL: [RecordType; 4] = [
    RecordType::Function,
    RecordType::Agency,
    RecordType::Series,
    RecordType::Consignment,
  ];

  /// Search query selecting this collection.
  pub fn query(self) -> &'static str {
    match self {
      RecordType::Function => "category:(Function)",
      RecordType::Agency => "category:(Agency)",
      RecordType::Series => "category:(Series)",
      RecordType::Consignment => "category:(Consignment)",
    }
  }

  /// Plural used in file names, e.g. `prov-agencies.json`.
  pub fn plural(self) -> &'static str {
    match self {
      RecordType::Function => "functions",
      RecordType::Agency => "agencies",
      RecordType::Series => "series",
      RecordType::Consignment => "consignments",
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      RecordType::Function => "function",
      RecordType::Agency => "agency",
      RecordType::Series => "series",
      RecordType::Consignment => "consignment",
    }
  }
}

impl fmt::Display for RecordType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// All records of one run, in the order the server returned them.
#[derive(Debug, Clone)]
pub struct HarvestResult {
  pub records: Vec<Record>,
  /// Query URL without the pagination cursor.
  pub source_url: String,
  pub retrieved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn plural_forms_match_published_file_names() {
    let plurals: Vec<_> = RecordType::ALL.iter().map(|t| t.plural()).collect();
    assert_eq!(plurals, ["functions", "agencies", "series", "consignments"]);
  }

  #[test]
  fn queries_select_category() {
    assert_eq!(RecordType::Series.query(), "category:(Series)");
    assert_eq!(RecordType::Agency.query(), "category:(Agency)");
  }

  #[test]
  fn parses_cli_value() {
    let parsed = RecordType::from_str("consignment", false).unwrap();
    assert_eq!(parsed, RecordType::Consignment);
    assert!(RecordType::from_str("item", false).is_err());
  }
}
