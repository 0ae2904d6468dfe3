/// Print the commit message for today's snapshots: new records first, then
/// newly opened ones, then every change.
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use clap::Parser;

use prov_harvest::commit_message::{default_timestamp, generate};
use prov_harvest::logging::init_logging;

#[derive(Parser)]
#[command(version, about = "Generate commit messages for the PROV API git-scraping workflow.")]
struct Cli {
  /// Date to use for file comparison (default: today)
  #[arg(long)]
  date: Option<NaiveDate>,

  /// Original timestamp to preserve in the commit message
  #[arg(long)]
  timestamp: Option<String>,

  /// Directory holding the snapshots
  #[arg(long, default_value = ".")]
  dir: PathBuf,
}

fn main() -> Result<(), Box<dyn Error>> {
  let cli = Cli::parse();
  init_logging(false);

  let date = cli.date.unwrap_or_else(|| Local::now().date_naive());
  let timestamp = cli.timestamp.unwrap_or_else(default_timestamp);
  let message = generate(&cli.dir, date, &timestamp);

  // A closed pipe (e.g. `| head`) is not an error.
  match writeln!(io::stdout(), "{message}") {
    Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
    other => Ok(other?),
  }
}
