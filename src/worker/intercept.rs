//! Cache-first request handling.

use color_eyre::Result;
use reqwest::{Method, StatusCode};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::fallback::FallbackPolicy;
use super::outcome::FetchOutcome;
use crate::cache::{CacheStorage, RequestKey};
use crate::http::{Request, Response, ResponseType};
use crate::network::Network;

/// Whether a network response may be written into the dynamic namespace.
///
/// Only complete, readable same-origin responses qualify: exactly 200 and
/// of type basic. Partial content, redirects, errors and anything opaque or
/// cross-origin pass through without being stored.
pub fn is_cacheable(response: &Response) -> bool {
  response.status == StatusCode::OK && response.kind == ResponseType::Basic
}

/// Per-request policy: serve from the store, or fetch and write through.
pub struct FetchInterceptor<S: CacheStorage> {
  storage: Arc<S>,
  network: Arc<dyn Network>,
  dynamic_name: String,
  ignored_schemes: Vec<String>,
  fallback: FallbackPolicy,
}

impl<S: CacheStorage + 'static> FetchInterceptor<S> {
  pub fn new(
    storage: Arc<S>,
    network: Arc<dyn Network>,
    dynamic_name: impl Into<String>,
    ignored_schemes: Vec<String>,
    fallback: FallbackPolicy,
  ) -> Self {
    Self {
      storage,
      network,
      dynamic_name: dynamic_name.into(),
      ignored_schemes,
      fallback,
    }
  }

  /// Only GETs outside the host's extension schemes are intercepted.
  pub fn should_intercept(&self, request: &Request) -> bool {
    request.method == Method::GET
      && !self
        .ignored_schemes
        .iter()
        .any(|scheme| scheme == request.url.scheme())
  }

  /// Handle one request.
  ///
  /// 1. Non-interceptable requests go to the network untouched
  /// 2. A stored match is returned without touching the network
  /// 3. Otherwise fetch; eligible responses are written through in the background
  /// 4. If the network fails, the fallback policy decides
  pub async fn handle(&self, request: &Request) -> Result<FetchOutcome> {
    if !self.should_intercept(request) {
      debug!(method = %request.method, url = %request.url, "passthrough");
      let response = self.network.fetch(request).await?;
      return Ok(FetchOutcome::passthrough(response));
    }

    let key = RequestKey::from_request(request);

    match self.storage.match_any(&key) {
      Ok(Some(cached)) => {
        debug!(%key, namespace = %cached.namespace, "cache hit");
        return Ok(FetchOutcome::from_cache(cached));
      }
      Ok(None) => debug!(%key, "cache miss"),
      Err(e) => warn!(%key, error = %e, "cache read failed, treating as miss"),
    }

    match self.network.fetch(request).await {
      Ok(response) => {
        if !is_cacheable(&response) {
          debug!(%key, status = %response.status, kind = response.kind.as_str(), "not cacheable");
          return Ok(FetchOutcome::from_network(response));
        }

        let write = self.write_through(key, response.duplicate());
        Ok(FetchOutcome::from_network(response).with_write(write))
      }
      Err(error) => {
        debug!(%key, error = %error, "network failed");
        let cached = self.fallback.recover(self.storage.as_ref(), request, error)?;
        Ok(FetchOutcome::fallback(cached))
      }
    }
  }

  /// Store `response` in the dynamic namespace without blocking the caller.
  ///
  /// Failures are logged and dropped.
  fn write_through(&self, key: RequestKey, response: Response) -> JoinHandle<()> {
    let storage = Arc::clone(&self.storage);
    let namespace = self.dynamic_name.clone();

    tokio::task::spawn_blocking(move || match storage.put(&namespace, &key, &response) {
      Ok(()) => debug!(%key, %namespace, "cached"),
      Err(e) => warn!(%key, %namespace, error = %e, "cache write failed"),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStorage;
  use crate::worker::testing::{url, ScriptedNetwork};
  use url::Url;

  fn interceptor() -> FetchInterceptor<SqliteStorage> {
    FetchInterceptor::new(
      Arc::new(SqliteStorage::open_in_memory().unwrap()),
      Arc::new(ScriptedNetwork::new()),
      "dynamic-v1",
      vec!["chrome-extension".to_string()],
      FallbackPolicy::new(url("/")),
    )
  }

  #[test]
  fn test_only_ok_basic_responses_are_cacheable() {
    assert!(is_cacheable(&Response::new(StatusCode::OK, "ok")));
    assert!(!is_cacheable(&Response::new(StatusCode::NO_CONTENT, "")));
    assert!(!is_cacheable(&Response::new(StatusCode::NOT_MODIFIED, "")));
    assert!(!is_cacheable(
      &Response::new(StatusCode::OK, "x").with_kind(ResponseType::Cors)
    ));
    assert!(!is_cacheable(
      &Response::new(StatusCode::OK, "").with_kind(ResponseType::Opaque)
    ));
    assert!(!is_cacheable(
      &Response::new(StatusCode::FOUND, "").with_kind(ResponseType::OpaqueRedirect)
    ));
  }

  #[test]
  fn test_should_intercept_filters_method_and_scheme() {
    let interceptor = interceptor();
    assert!(interceptor.should_intercept(&Request::get(url("/api/specs"))));
    assert!(!interceptor.should_intercept(&Request::get(url("/api/specs")).with_method(Method::PUT)));
    assert!(!interceptor.should_intercept(&Request::get(url("/")).with_method(Method::HEAD)));

    let ext = Url::parse("chrome-extension://abc/popup.html").unwrap();
    assert!(!interceptor.should_intercept(&Request::get(ext)));
  }

  #[tokio::test]
  async fn test_write_into_missing_namespace_is_swallowed() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond(&url("/a"), 200, "a");
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let interceptor = FetchInterceptor::new(
      Arc::clone(&storage),
      network,
      "dynamic-v1",
      Vec::new(),
      FallbackPolicy::new(url("/")),
    );

    let mut outcome = interceptor.handle(&Request::get(url("/a"))).await.unwrap();
    outcome.settle().await;

    assert_eq!(outcome.response.into_body().as_ref(), b"a");
    assert!(storage.keys().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_redirected_navigation_is_not_stored() {
    let network = Arc::new(ScriptedNetwork::new());
    network.respond_with_kind(&url("/login"), 302, "", ResponseType::OpaqueRedirect);
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    storage.open("dynamic-v1").unwrap();
    let interceptor = FetchInterceptor::new(
      Arc::clone(&storage),
      network,
      "dynamic-v1",
      Vec::new(),
      FallbackPolicy::new(url("/")),
    );

    let outcome = interceptor.handle(&Request::navigate(url("/login"))).await.unwrap();

    assert!(!outcome.has_pending_write());
    assert_eq!(outcome.response.kind, ResponseType::OpaqueRedirect);
    assert!(storage.requests("dynamic-v1").unwrap().is_empty());
  }
}
