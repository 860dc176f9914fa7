//! In-process doubles for worker tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStorage, CachedResponse, RequestKey, SqliteStorage};
use crate::http::{Request, Response, ResponseType};
use crate::network::Network;

pub const ORIGIN: &str = "http://localhost:8000/";

pub fn url(path: &str) -> Url {
  Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

#[derive(Clone)]
enum Route {
  Respond {
    status: StatusCode,
    body: Vec<u8>,
    kind: ResponseType,
  },
  Fail,
}

/// Network that answers from a fixed route table and records every call.
///
/// Unknown URLs fail as if the host were offline.
#[derive(Default)]
pub struct ScriptedNetwork {
  routes: Mutex<HashMap<String, Route>>,
  calls: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn respond(&self, url: &Url, status: u16, body: &str) -> &Self {
    self.respond_with_kind(url, status, body, ResponseType::Basic)
  }

  pub fn respond_with_kind(&self, url: &Url, status: u16, body: &str, kind: ResponseType) -> &Self {
    self.routes.lock().unwrap().insert(
      url.to_string(),
      Route::Respond {
        status: StatusCode::from_u16(status).unwrap(),
        body: body.as_bytes().to_vec(),
        kind,
      },
    );
    self
  }

  pub fn fail(&self, url: &Url) -> &Self {
    self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
    self
  }

  /// Drop every route so all requests fail.
  pub fn go_offline(&self) {
    self.routes.lock().unwrap().clear();
  }

  pub fn calls_to(&self, url: &Url) -> usize {
    let needle = url.to_string();
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|call| call.split_once(' ').map(|(_, u)| u == needle).unwrap_or(false))
      .count()
  }

  pub fn total_calls(&self) -> usize {
    self.calls.lock().unwrap().len()
  }
}

#[async_trait]
impl Network for ScriptedNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    self
      .calls
      .lock()
      .unwrap()
      .push(format!("{} {}", request.method, request.url));

    let route = self.routes.lock().unwrap().get(request.url.as_str()).cloned();
    match route {
      Some(Route::Respond { status, body, kind }) => Ok(
        Response::new(status, body)
          .with_kind(kind)
          .with_url(request.url.clone()),
      ),
      Some(Route::Fail) | None => Err(eyre!("network unreachable: {}", request.url)),
    }
  }
}

/// SQLite storage with switchable failures.
pub struct FlakyStorage {
  inner: SqliteStorage,
  pub fail_reads: AtomicBool,
  pub fail_writes: AtomicBool,
  pub fail_delete_of: Mutex<Option<String>>,
}

impl FlakyStorage {
  pub fn new() -> Self {
    Self {
      inner: SqliteStorage::open_in_memory().unwrap(),
      fail_reads: AtomicBool::new(false),
      fail_writes: AtomicBool::new(false),
      fail_delete_of: Mutex::new(None),
    }
  }
}

impl CacheStorage for FlakyStorage {
  fn open(&self, name: &str) -> Result<()> {
    self.inner.open(name)
  }

  fn has(&self, name: &str) -> Result<bool> {
    self.inner.has(name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.inner.keys()
  }

  fn delete(&self, name: &str) -> Result<bool> {
    if self.fail_delete_of.lock().unwrap().as_deref() == Some(name) {
      return Err(eyre!("delete denied: {}", name));
    }
    self.inner.delete(name)
  }

  fn rename(&self, from: &str, to: &str) -> Result<()> {
    self.inner.rename(from, to)
  }

  fn requests(&self, name: &str) -> Result<Vec<RequestKey>> {
    self.inner.requests(name)
  }

  fn match_in(&self, name: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(eyre!("read denied"));
    }
    self.inner.match_in(name, key)
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedResponse>> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(eyre!("read denied"));
    }
    self.inner.match_any(key)
  }

  fn put(&self, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    if self.fail_writes.load(Ordering::SeqCst) {
      return Err(eyre!("quota exceeded"));
    }
    self.inner.put(name, key, response)
  }
}
