//! Summary statistics over a harvest file.
//!
//! Harvests of the whole collection run to many gigabytes, so the array is
//! visited one record at a time and never held in memory.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use chrono::{DateTime, Datelike};
use lazy_static::lazy_static;
use regex::Regex;
use serde::de::{SeqAccess, Visitor};
use serde::{Deserializer, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::HarvestError;
use crate::record::Record;
use crate::track::IDENTIFIER_KEY;

pub const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
const UNKNOWN: &str = "Unknown";

lazy_static! {
  static ref ENTITY_SERIES_REGEX: Regex = Regex::new(r"^VPRS(\d+)/").unwrap();
  static ref CONSIGNMENT_SERIES_REGEX: Regex = Regex::new(r"^VPRS (\d+)/P").unwrap();
  static ref AGENCY_NUMBER_REGEX: Regex = Regex::new(r"VA\s*(\d+)").unwrap();
}

#[derive(Debug, Default, Clone)]
struct SeriesTally {
  title: String,
  agencies: BTreeSet<String>,
  consignments: u64,
  iiif_manifests: u64,
  images: u64,
  items: u64,
  related_entities: u64,
  units: u64,
  years: BTreeMap<String, u64>,
}

#[derive(Debug, Default, Clone)]
struct AgencyTally {
  title: String,
  series: BTreeSet<String>,
}

/// Running totals while a harvest is read.
#[derive(Debug, Default)]
pub struct Stats {
  categories: BTreeMap<String, u64>,
  series: BTreeMap<String, SeriesTally>,
  agencies: BTreeMap<String, AgencyTally>,
  years: BTreeMap<String, u64>,
  iiif_manifests: u64,
  objects: u64,
  units: u64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct StatsReport {
  pub agencies: Vec<AgencyReport>,
  pub overall: OverallReport,
  pub series: Vec<SeriesReport>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct OverallReport {
  pub categories: BTreeMap<String, u64>,
  pub iiif_manifests: u64,
  pub objects: u64,
  pub units: u64,
  pub years: BTreeMap<String, u64>,
}

// Field order is the serialized key order; keep it alphabetical.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SeriesReport {
  pub agencies: Vec<String>,
  pub consignments: u64,
  pub id: String,
  pub iiif_manifests: u64,
  pub images: u64,
  pub items: u64,
  pub related_entities: u64,
  pub title: String,
  pub units: u64,
  pub years: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct AgencyReport {
  pub consignments: u64,
  pub id: String,
  pub iiif_manifests: u64,
  pub images: u64,
  pub items: u64,
  pub series: Vec<String>,
  pub title: String,
  pub units: u64,
  pub years: BTreeMap<String, u64>,
}

fn text(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

fn str_list(record: &Record, key: &str) -> Vec<String> {
  match record.get(key) {
    Some(Value::Array(items)) => items.iter().filter_map(text).collect(),
    _ => Vec::new(),
  }
}

fn year_of(timestamp: &Value) -> Option<i32> {
  let seconds = match timestamp {
    Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
    Value::String(s) => s.trim().parse().ok()?,
    _ => return None,
  };
  DateTime::from_timestamp(seconds, 0).map(|dt| dt.year())
}

fn numeric(id: &str) -> Option<u64> {
  id.parse().ok()
}

fn agency_number(id: &str) -> Option<u64> {
  AGENCY_NUMBER_REGEX
    .captures(id)
    .and_then(|cap| cap[1].parse().ok())
}

/// Ascending by number, ids without one last, then by text.
fn by_number(ids: &mut [String], number: impl Fn(&str) -> Option<u64>) {
  ids.sort_by_cached_key(|id| (number(id).is_none(), number(id), id.clone()));
}

impl Stats {
  pub fn objects(&self) -> u64 {
    self.objects
  }

  /// Fold one record into the totals.
  pub fn add(&mut self, record: &Record) {
    self.objects += 1;
    let category = record
      .get("category")
      .and_then(Value::as_str)
      .unwrap_or(UNKNOWN);
    *self.categories.entry(category.to_string()).or_default() += 1;

    if category == "Agency" {
      let agency_id: String = record
        .get(IDENTIFIER_KEY)
        .and_then(Value::as_str)
        .unwrap_or("")
        .chars()
        .filter(|c| *c != ' ')
        .collect();
      if !agency_id.is_empty() {
        let title = record.get("title").and_then(text).unwrap_or_default();
        self.agencies.entry(agency_id).or_default().title = title;
      }
      return;
    }

    let series_id = series_id_of(category, record);

    if let Some(timestamp) = record.get("timestamp") {
      match year_of(timestamp) {
        Some(year) => {
          let year = year.to_string();
          *self.years.entry(year.clone()).or_default() += 1;
          if category != "Series" {
            let tally = self.series.entry(series_id.clone()).or_default();
            *tally.years.entry(year).or_default() += 1;
          }
        }
        None => *self.years.entry("Invalid".to_string()).or_default() += 1,
      }
    }

    let tally = self.series.entry(series_id.clone()).or_default();
    match category {
      "Consignment" => tally.consignments += 1,
      "Image" => tally.images += 1,
      "Item" => {
        tally.items += 1;
        // A unit is a box: an item that is its own container.
        if record.get("barcode") == record.get("box_barcode") {
          tally.units += 1;
          self.units += 1;
        }
      }
      "relatedEntity" => tally.related_entities += 1,
      "Series" => tally.title = record.get("title").and_then(text).unwrap_or_default(),
      _ => {}
    }

    if record.contains_key("iiif-manifest") {
      tally.iiif_manifests += 1;
      self.iiif_manifests += 1;
    }

    let agency_ids = str_list(record, "agencies.ids");
    let agency_titles = str_list(record, "agencies.titles");
    tally.agencies.extend(agency_ids.iter().cloned());
    for (i, agency_id) in agency_ids.into_iter().enumerate() {
      let agency = self.agencies.entry(agency_id).or_default();
      if let Some(title) = agency_titles.get(i) {
        agency.title = title.clone();
      }
      if series_id != UNKNOWN {
        agency.series.insert(series_id.clone());
      }
    }
  }

  pub fn report(&self) -> StatsReport {
    let overall = OverallReport {
      categories: self.categories.clone(),
      iiif_manifests: self.iiif_manifests,
      objects: self.objects,
      units: self.units,
      years: self.years.clone(),
    };

    let mut series_ids: Vec<String> = self
      .series
      .keys()
      .filter(|id| id.as_str() != UNKNOWN)
      .cloned()
      .collect();
    by_number(&mut series_ids, numeric);
    let series = series_ids
      .iter()
      .map(|id| {
        let tally = &self.series[id];
        let mut agencies: Vec<String> = tally.agencies.iter().cloned().collect();
        by_number(&mut agencies, agency_number);
        SeriesReport {
          agencies,
          consignments: tally.consignments,
          id: id.clone(),
          iiif_manifests: tally.iiif_manifests,
          images: tally.images,
          items: tally.items,
          related_entities: tally.related_entities,
          title: tally.title.clone(),
          units: tally.units,
          years: tally.years.clone(),
        }
      })
      .collect();

    let mut agency_ids: Vec<String> = self.agencies.keys().cloned().collect();
    by_number(&mut agency_ids, agency_number);
    let agencies = agency_ids
      .iter()
      .map(|id| {
        let tally = &self.agencies[id];
        let mut report = AgencyReport {
          consignments: 0,
          id: id.clone(),
          iiif_manifests: 0,
          images: 0,
          items: 0,
          series: tally.series.iter().cloned().collect(),
          title: tally.title.clone(),
          units: 0,
          years: BTreeMap::new(),
        };
        by_number(&mut report.series, numeric);
        for series in tally.series.iter().filter_map(|s| self.series.get(s)) {
          report.consignments += series.consignments;
          report.iiif_manifests += series.iiif_manifests;
          report.images += series.images;
          report.items += series.items;
          report.units += series.units;
          for (year, count) in &series.years {
            *report.years.entry(year.clone()).or_default() += count;
          }
        }
        report
      })
      .collect();

    StatsReport {
      agencies,
      overall,
      series,
    }
  }
}

fn series_id_of(category: &str, record: &Record) -> String {
  let captured = |regex: &Regex, key: &str| {
    record
      .get(key)
      .and_then(Value::as_str)
      .and_then(|s| regex.captures(s))
      .map(|cap| cap[1].to_string())
  };
  let id = match category {
    "Consignment" => captured(&CONSIGNMENT_SERIES_REGEX, IDENTIFIER_KEY),
    "relatedEntity" => captured(&ENTITY_SERIES_REGEX, "_id"),
    _ => record.get("series_id").and_then(text),
  };
  id.unwrap_or_else(|| UNKNOWN.to_string())
}

struct StatsVisitor<'a>(&'a mut Stats);

impl<'de, 'a> Visitor<'de> for StatsVisitor<'a> {
  type Value = ();

  fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
    formatter.write_str("a JSON array of records")
  }

  fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
    while let Some(record) = seq.next_element::<Record>()? {
      self.0.add(&record);
      if self.0.objects % 10_000 == 0 {
        info!("Processed {} objects...", self.0.objects);
      }
    }
    Ok(())
  }
}

/// Fold every record of the JSON array in `reader` into `stats`.
pub fn read_into<R: Read>(reader: R, stats: &mut Stats) -> Result<(), serde_json::Error> {
  let mut de = serde_json::Deserializer::from_reader(reader);
  (&mut de).deserialize_seq(StatsVisitor(stats))?;
  de.end()
}

/// Wrap `reader` in a zstd decoder when the stream starts with the zstd magic.
pub fn decompressing<R: BufRead + 'static>(mut reader: R) -> io::Result<Box<dyn Read>> {
  let compressed = reader.fill_buf()?.starts_with(&ZSTD_MAGIC);
  if compressed {
    Ok(Box::new(zstd::stream::read::Decoder::with_buffer(reader)?))
  } else {
    Ok(Box::new(reader))
  }
}

/// Statistics for a harvest file, or stdin when `input` is `None`.
pub fn process(input: Option<&Path>) -> Result<Stats, HarvestError> {
  let (reader, context) = match input {
    Some(path) => {
      let file = File::open(path).map_err(|e| HarvestError::read(path, e))?;
      let reader = decompressing(BufReader::new(file)).map_err(|e| HarvestError::read(path, e))?;
      (reader, path.display().to_string())
    }
    None => {
      let reader =
        decompressing(BufReader::new(io::stdin())).map_err(|e| HarvestError::read("<stdin>", e))?;
      (reader, "<stdin>".to_string())
    }
  };
  let mut stats = Stats::default();
  read_into(reader, &mut stats).map_err(|source| HarvestError::Json { context, source })?;
  info!("Processed {} objects. Generating final stats...", stats.objects);
  Ok(stats)
}
