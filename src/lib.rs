//! Harvesting tools for the Public Record Office Victoria (PROV) search API.
//!
//! `track` pulls one record type into a dated snapshot, `harvest` streams an
//! arbitrary query into a (possibly compressed) file that can be resumed,
//! `stats` summarises a harvest, and `diff`/`commit_message` report what
//! changed between two snapshots.

pub mod commit_message;
pub mod config;
pub mod diff;
pub mod error;
pub mod harvest;
pub mod local;
pub mod logging;
pub mod record;
pub mod remote;
pub mod stats;
pub mod track;

pub use error::HarvestError;
pub use record::{Record, RecordType};
