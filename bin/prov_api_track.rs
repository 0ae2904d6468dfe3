/// Harvest one PROV record type into a dated snapshot, for the scheduled
/// tracking job. Run once per type; the job then diffs the new snapshot
/// against the committed one and moves it into place.
use std::error::Error;
use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::Parser;

use prov_harvest::config::{ApiArgs, ApiConfig};
use prov_harvest::local::snapshot_path;
use prov_harvest::logging::init_logging;
use prov_harvest::remote::ProvClient;
use prov_harvest::{track, RecordType};

#[derive(Parser)]
#[command(version, about = "Harvest data from PROV API for easy tracking.")]
struct Cli {
  /// Type of data to fetch
  #[arg(long = "type", value_enum)]
  record_type: RecordType,

  /// Output file name for JSON data (default: prov-{plural_type}-{date}.json)
  #[arg(long)]
  output: Option<PathBuf>,

  /// Directory for the dated snapshot when --output is not given
  #[arg(long, default_value = ".")]
  dir: PathBuf,

  /// Date used in the snapshot name (default: today)
  #[arg(long)]
  date: Option<NaiveDate>,

  /// Give every record the same keys and sort by identifier
  #[arg(long)]
  tidy: bool,

  #[command(flatten)]
  api: ApiArgs,

  /// Enable debug logging
  #[arg(long)]
  debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
  let cli = Cli::parse();
  init_logging(cli.debug);

  let date = cli.date.unwrap_or_else(|| Local::now().date_naive());
  let output = snapshot_path(cli.output, &cli.dir, cli.record_type, date);
  let client = ProvClient::new(cli.api.into_config(ApiConfig::default()))?;

  let count = track::run(&client, client.config(), cli.record_type, &output, cli.tidy)?;
  tracing::info!("-- harvested {count} {} records", cli.record_type);
  Ok(())
}
