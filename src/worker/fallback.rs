//! What to serve when the network produced no response at all.

use color_eyre::{Report, Result};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, RequestKey};
use crate::http::Request;

/// Serves the stored application shell to failed navigations.
///
/// Sub-resource failures are never masked: the original error is returned.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
  shell: Url,
}

impl FallbackPolicy {
  pub fn new(shell: Url) -> Self {
    Self { shell }
  }

  /// Recover from a network failure for `request`, or give back `error`.
  pub fn recover<S>(&self, storage: &S, request: &Request, error: Report) -> Result<CachedResponse>
  where
    S: CacheStorage + ?Sized,
  {
    if !request.is_navigation() {
      debug!(url = %request.url, "sub-resource failed, propagating");
      return Err(error);
    }

    match storage.match_any(&RequestKey::get(&self.shell)) {
      Ok(Some(cached)) => {
        info!(url = %request.url, shell = %self.shell, "offline navigation, serving shell");
        Ok(cached)
      }
      Ok(None) => {
        warn!(url = %request.url, shell = %self.shell, "offline navigation but shell is not cached");
        Err(error)
      }
      Err(e) => {
        warn!(error = %e, "shell lookup failed");
        Err(error)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::http::Response;
  use color_eyre::eyre::eyre;
  use reqwest::StatusCode;

  fn origin() -> Url {
    Url::parse("http://localhost:8000/").unwrap()
  }

  fn storage_with_shell() -> SqliteStorage {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open("static-v1").unwrap();
    storage
      .put(
        "static-v1",
        &RequestKey::get(&origin()),
        &Response::new(StatusCode::OK, "<html>shell</html>"),
      )
      .unwrap();
    storage
  }

  #[test]
  fn test_navigation_gets_shell() {
    let policy = FallbackPolicy::new(origin());
    let request = Request::navigate(origin().join("/specs/42").unwrap());

    let cached = policy
      .recover(&storage_with_shell(), &request, eyre!("offline"))
      .unwrap();
    assert_eq!(cached.response.into_body().as_ref(), b"<html>shell</html>");
  }

  #[test]
  fn test_sub_resource_gets_original_error() {
    let policy = FallbackPolicy::new(origin());
    let request = Request::get(origin().join("/api/specs").unwrap());

    let err = policy
      .recover(&storage_with_shell(), &request, eyre!("connection refused"))
      .unwrap_err();
    assert_eq!(err.to_string(), "connection refused");
  }

  #[test]
  fn test_navigation_without_shell_gets_original_error() {
    let policy = FallbackPolicy::new(origin());
    let storage = SqliteStorage::open_in_memory().unwrap();
    let request = Request::navigate(origin());

    let err = policy.recover(&storage, &request, eyre!("offline")).unwrap_err();
    assert_eq!(err.to_string(), "offline");
  }
}
