//! Result of handling one intercepted request.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::cache::CachedResponse;
use crate::http::Response;

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Not intercepted; straight from the network
  Passthrough,
  /// Previously stored response
  Cache,
  /// Fresh from the network
  Network,
  /// Network failed; application shell served instead
  Fallback,
}

/// A response together with metadata about how it was produced.
#[derive(Debug)]
pub struct FetchOutcome {
  pub response: Response,
  pub source: ResponseSource,
  /// When the response was stored (cache and fallback only)
  pub cached_at: Option<DateTime<Utc>>,
  /// Background write-through started for this response, if any
  pending_write: Option<JoinHandle<()>>,
}

impl FetchOutcome {
  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Passthrough,
      cached_at: None,
      pending_write: None,
    }
  }

  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
      pending_write: None,
    }
  }

  pub fn from_cache(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Cache,
      cached_at: Some(cached.cached_at),
      pending_write: None,
    }
  }

  pub fn fallback(cached: CachedResponse) -> Self {
    Self {
      response: cached.response,
      source: ResponseSource::Fallback,
      cached_at: Some(cached.cached_at),
      pending_write: None,
    }
  }

  pub fn with_write(mut self, write: JoinHandle<()>) -> Self {
    self.pending_write = Some(write);
    self
  }

  pub fn has_pending_write(&self) -> bool {
    self.pending_write.is_some()
  }

  /// Wait for any background write-through to finish.
  ///
  /// The response is usable without calling this; hosts call it to keep the
  /// process alive until the store has been updated.
  pub async fn settle(&mut self) {
    if let Some(write) = self.pending_write.take() {
      if let Err(e) = write.await {
        warn!(error = %e, "cache write task did not complete");
      }
    }
  }
}
