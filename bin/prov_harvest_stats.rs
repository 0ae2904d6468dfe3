/// Summarise a harvest produced by `prov_api_harvest` as JSON on stdout.
/// Reads stdin when no `--input` is given; zstd input is detected.
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;

use clap::Parser;

use prov_harvest::logging::init_logging;
use prov_harvest::stats;

#[derive(Parser)]
#[command(version, about = "Process JSON data and generate statistics in JSON format.")]
struct Cli {
  /// Input JSON file path. If not provided, reads from stdin.
  #[arg(long)]
  input: Option<PathBuf>,

  /// Enable debug logging
  #[arg(long)]
  debug: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
  let cli = Cli::parse();
  init_logging(cli.debug);

  let stats = stats::process(cli.input.as_deref())?;
  let mut stdout = io::stdout().lock();
  serde_json::to_writer_pretty(&mut stdout, &stats.report())?;
  writeln!(stdout)?;
  Ok(())
}
