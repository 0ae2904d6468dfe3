use tracing_subscriber::EnvFilter;

/// Log to stderr so stdout stays free for data (stats, commit messages).
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--debug`.
pub fn init_logging(debug: bool) {
  let default = if debug {
    "debug,reqwest=info,hyper=info"
  } else {
    "info"
  };
  let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(env_filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();
}
