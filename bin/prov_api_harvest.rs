/// Harvest everything matching a query from the PROV API into one JSON
/// array, streaming to disk so the full collection fits. Interrupted runs
/// continue with `--resume`.
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use prov_harvest::config::{ApiArgs, ApiConfig};
use prov_harvest::harvest::{stream_records, HarvestOptions, DEFAULT_QUERY, DEFAULT_SORT};
use prov_harvest::logging::init_logging;
use prov_harvest::remote::{ProvClient, SearchQuery};

#[derive(Parser)]
#[command(
  version,
  about = "Harvest data from PROV API with streaming output, resume capability, and optional zstd compression."
)]
struct Cli {
  /// Custom query to replace the default q parameter
  #[arg(long, default_value = DEFAULT_QUERY)]
  query: String,

  /// Resume from last saved progress
  #[arg(long)]
  resume: bool,

  /// Output file name (default: output.json or output.json.zst if compressed)
  #[arg(long)]
  output: Option<PathBuf>,

  /// Enable zstd compression for output
  #[arg(long)]
  compress: bool,

  /// Seconds to wait between pages
  #[arg(long, default_value_t = 6)]
  page_delay: u64,

  #[command(flatten)]
  api: ApiArgs,

  /// Enable debug mode to print additional information
  #[arg(long)]
  debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
  let cli = Cli::parse();
  init_logging(cli.debug);

  let baseline = ApiConfig {
    retries: 5,
    page_delay: Duration::from_secs(cli.page_delay),
    ..ApiConfig::default()
  };
  let client = ProvClient::new(cli.api.into_config(baseline))?;
  let options = HarvestOptions {
    query: SearchQuery::new(cli.query).sorted_by(DEFAULT_SORT),
    output: cli
      .output
      .unwrap_or_else(|| HarvestOptions::default_output(cli.compress)),
    compress: cli.compress,
    resume: cli.resume,
  };

  let summary = stream_records(&client, client.config(), &options)?;
  tracing::info!(
    "-- {} records fetched, {}/{} in {}",
    summary.fetched,
    summary.progress.start,
    summary.progress.total_docs,
    options.output.display()
  );
  Ok(())
}
