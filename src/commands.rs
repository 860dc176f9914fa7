//! CLI subcommands.

use bytes::Bytes;
use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use reqwest::Method;
use std::sync::Arc;

use crate::cache::{CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::event::{Event, EventOutcome};
use crate::http::{Request, RequestMode};
use crate::network::HttpNetwork;
use crate::worker::{LocalHost, ServiceWorker};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Pre-cache the manifest and activate the configured cache versions
  Install,
  /// Request URLs through the cache (root-relative paths resolve against the origin)
  Fetch {
    #[arg(required = true)]
    urls: Vec<String>,
    /// Treat the requests as page navigations (same as `--mode navigate`)
    #[arg(long, conflicts_with = "mode")]
    navigate: bool,
    /// Request mode: navigate, same-origin, no-cors or cors
    #[arg(long, default_value = "no-cors")]
    mode: String,
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,
  },
  /// List cache namespaces
  Caches {
    /// Also list the requests stored in each namespace
    #[arg(long)]
    entries: bool,
  },
  /// Acknowledge a background sync tag
  Sync { tag: String },
  /// Show a notification for a push payload
  Push { body: Option<String> },
}

pub async fn run(command: Command, config: &Config) -> Result<()> {
  let storage = Arc::new(SqliteStorage::open_at(&config.store_path()?)?);
  let network = Arc::new(HttpNetwork::new(config.origin_url()?)?);
  let host = Arc::new(LocalHost::new());
  let worker = ServiceWorker::new(config, storage, network, host)?;

  match command {
    Command::Install => install(&worker).await,
    Command::Fetch {
      urls,
      navigate,
      mode,
      method,
    } => {
      let mode = if navigate {
        RequestMode::Navigate
      } else {
        mode.parse()?
      };
      fetch(&worker, config, &urls, mode, &method).await
    }
    Command::Caches { entries } => caches(&worker, entries),
    Command::Sync { tag } => {
      worker.dispatch(Event::Sync { tag: tag.clone() }).await?;
      println!("sync '{}' acknowledged", tag);
      Ok(())
    }
    Command::Push { body } => {
      let data = body.map(Bytes::from);
      if let EventOutcome::Notified(notification) = worker.dispatch(Event::Push { data }).await? {
        let json = serde_json::to_string_pretty(&notification)
          .map_err(|e| eyre!("Failed to serialize notification: {}", e))?;
        println!("{}", json);
      }
      Ok(())
    }
  }
}

async fn install(worker: &ServiceWorker<SqliteStorage>) -> Result<()> {
  worker.dispatch(Event::Install).await?;
  worker.dispatch(Event::Activate).await?;

  let ns = worker.namespaces();
  let count = worker.storage().requests(&ns.static_name)?.len();
  println!(
    "installed {} ({} entries), dynamic cache {}",
    ns.static_name, count, ns.dynamic_name
  );
  Ok(())
}

async fn fetch(
  worker: &ServiceWorker<SqliteStorage>,
  config: &Config,
  urls: &[String],
  mode: RequestMode,
  method: &str,
) -> Result<()> {
  if !worker.resume().await? {
    return Err(eyre!(
      "{} is not installed; run `shellcache install` first",
      worker.namespaces().static_name
    ));
  }

  let method = Method::from_bytes(method.to_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;

  let requests = urls
    .iter()
    .map(|u| -> Result<Request> {
      Ok(
        Request::get(config.resolve(u)?)
          .with_method(method.clone())
          .with_mode(mode),
      )
    })
    .collect::<Result<Vec<_>>>()?;

  let results = join_all(
    requests
      .into_iter()
      .map(|request| async move {
        let url = request.url.clone();
        (url, worker.dispatch(Event::Fetch(request)).await)
      }),
  )
  .await;

  let mut failures = 0;
  for (url, result) in results {
    match result {
      Ok(EventOutcome::Fetched(mut outcome)) => {
        outcome.settle().await;
        println!(
          "{} {:?} {} bytes {}",
          outcome.response.status.as_u16(),
          outcome.source,
          outcome.response.body().len(),
          url
        );
      }
      Ok(_) => {}
      Err(e) => {
        failures += 1;
        println!("ERR {} {}", url, e);
      }
    }
  }

  if failures > 0 {
    return Err(eyre!("{} of {} requests failed", failures, urls.len()));
  }
  Ok(())
}

fn caches(worker: &ServiceWorker<SqliteStorage>, entries: bool) -> Result<()> {
  let storage = worker.storage();
  let ns = worker.namespaces();

  for name in storage.keys()? {
    let requests = storage.requests(&name)?;
    let marker = if ns.is_current(&name) { "*" } else { " " };
    println!("{} {} ({} entries)", marker, name, requests.len());
    if entries {
      for key in requests {
        println!("    {}", key);
      }
    }
  }
  Ok(())
}
