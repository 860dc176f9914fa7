mod cache;
mod commands;
mod config;
mod event;
mod http;
mod network;
mod worker;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "shellcache")]
#[command(about = "Offline-first request cache with versioned cache namespaces")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shellcache.yaml or $XDG_CONFIG_HOME/shellcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Application origin
  #[arg(long)]
  origin: Option<Url>,

  /// Static cache version tag (e.g. v2)
  #[arg(long)]
  static_version: Option<String>,

  /// Dynamic cache version tag
  #[arg(long)]
  dynamic_version: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = config::Config::load(args.config.as_deref())?;

  // Command line overrides
  if let Some(origin) = args.origin {
    config.origin = origin.to_string();
  }
  if let Some(version) = args.static_version {
    config.cache.static_version = version;
  }
  if let Some(version) = args.dynamic_version {
    config.cache.dynamic_version = version;
  }
  config.validate()?;

  let _guard = init_logging(&config)?;

  commands::run(args.command, &config).await
}

/// Log to stderr and to a daily file next to the cache database.
///
/// Filter with SHELLCACHE_LOG (default: info).
fn init_logging(config: &config::Config) -> Result<WorkerGuard> {
  let store_path = config.store_path()?;
  let log_dir = store_path
    .parent()
    .ok_or_else(|| eyre!("Cache path has no parent: {}", store_path.display()))?;
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (file_writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "shellcache.log"));

  let filter = EnvFilter::try_from_env("SHELLCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
