//! Worker lifecycle: install, activate, then intercept.

use color_eyre::{eyre::eyre, Result};
use futures::future::try_join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};
use url::Url;

use super::fallback::FallbackPolicy;
use super::host::Host;
use super::intercept::FetchInterceptor;
use super::outcome::FetchOutcome;
use super::signals::{self, Notification};
use crate::cache::{CacheStorage, Namespaces, RequestKey};
use crate::config::{Config, NotificationConfig};
use crate::http::{Request, RequestMode, Response};
use crate::network::Network;

/// Lifecycle state of one worker generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Constructed, install not started
  Parsed,
  Installing,
  /// Installed, waiting to activate
  Installed,
  Activating,
  /// Controlling clients and intercepting requests
  Activated,
  /// Install failed; this generation will never activate
  Redundant,
}

/// One generation of the offline caching worker.
///
/// Owns namespace creation and deletion; the interceptor it drives only reads
/// and writes namespace contents.
pub struct ServiceWorker<S: CacheStorage> {
  namespaces: Namespaces,
  manifest: Vec<Url>,
  notifications: NotificationConfig,
  storage: Arc<S>,
  network: Arc<dyn Network>,
  host: Arc<dyn Host>,
  interceptor: FetchInterceptor<S>,
  state: Mutex<WorkerState>,
  next_notification: AtomicU64,
}

impl<S: CacheStorage + 'static> ServiceWorker<S> {
  pub fn new(
    config: &Config,
    storage: Arc<S>,
    network: Arc<dyn Network>,
    host: Arc<dyn Host>,
  ) -> Result<Self> {
    let namespaces = Namespaces::from_config(config);
    let fallback = FallbackPolicy::new(config.resolve(&config.shell)?);
    let interceptor = FetchInterceptor::new(
      Arc::clone(&storage),
      Arc::clone(&network),
      namespaces.dynamic_name.clone(),
      config.ignored_schemes.clone(),
      fallback,
    );

    Ok(Self {
      namespaces,
      manifest: config.manifest_urls()?,
      notifications: config.notifications.clone(),
      storage,
      network,
      host,
      interceptor,
      state: Mutex::new(WorkerState::Parsed),
      next_notification: AtomicU64::new(1),
    })
  }

  pub fn namespaces(&self) -> &Namespaces {
    &self.namespaces
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  pub fn state(&self) -> Result<WorkerState> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(*state)
  }

  fn set_state(&self, next: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let current = *state;
    debug!(from = ?current, to = ?next, "worker state");
    *state = next;
    Ok(())
  }

  /// Move to `next` if the current state is one of `allowed`.
  fn transition(&self, allowed: &[WorkerState], next: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let current = *state;
    if !allowed.contains(&current) {
      return Err(eyre!("Cannot move worker from {:?} to {:?}", current, next));
    }

    debug!(from = ?current, to = ?next, "worker state");
    *state = next;
    Ok(())
  }

  /// Install this generation: fetch the whole manifest into the static
  /// namespace, then ask the host to skip the waiting phase.
  ///
  /// All-or-nothing: entries are collected in a staging namespace that is
  /// promoted to the static name only after every entry has been stored. A
  /// failed install leaves no static namespace behind and marks the worker
  /// redundant.
  pub async fn install(&self) -> Result<()> {
    self.transition(
      &[WorkerState::Parsed, WorkerState::Redundant],
      WorkerState::Installing,
    )?;
    info!(namespace = %self.namespaces.static_name, entries = self.manifest.len(), "installing");

    match self.populate_static().await {
      Ok(count) => {
        self.set_state(WorkerState::Installed)?;
        info!(namespace = %self.namespaces.static_name, count, "installed");
      }
      Err(e) => {
        self.set_state(WorkerState::Redundant)?;
        error!(error = %e, "install failed");
        return Err(e);
      }
    }

    if let Err(e) = self.host.skip_waiting().await {
      warn!(error = %e, "skip waiting failed");
    }
    Ok(())
  }

  async fn populate_static(&self) -> Result<usize> {
    let staging = self.namespaces.staging_name();

    // Leftover from an interrupted install
    self.storage.delete(&staging)?;
    self.storage.open(&staging)?;

    match self.fetch_manifest(&staging).await {
      Ok(count) => {
        self.storage.rename(&staging, &self.namespaces.static_name)?;
        Ok(count)
      }
      Err(e) => {
        if let Err(cleanup) = self.storage.delete(&staging) {
          warn!(namespace = %staging, error = %cleanup, "failed to remove staging namespace");
        }
        Err(e)
      }
    }
  }

  /// Fetch every manifest entry concurrently, then store them in order.
  async fn fetch_manifest(&self, namespace: &str) -> Result<usize> {
    let fetches = self.manifest.iter().map(|url| async move {
      let request = Request::get(url.clone()).with_mode(RequestMode::Cors);
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to fetch manifest entry {}: {}", url, e))?;

      if !response.status.is_success() {
        return Err(eyre!(
          "Manifest entry {} returned {}",
          url,
          response.status
        ));
      }

      Ok::<(RequestKey, Response), color_eyre::Report>((RequestKey::from_request(&request), response))
    });

    let entries = try_join_all(fetches).await?;

    for (key, response) in &entries {
      self.storage.put(namespace, key, response)?;
    }

    Ok(entries.len())
  }

  /// Activate this generation: delete every namespace that is not one of the
  /// current pair, open the dynamic namespace, then claim open clients.
  ///
  /// A namespace that fails to delete is skipped; cleanup continues.
  pub async fn activate(&self) -> Result<()> {
    self.transition(&[WorkerState::Installed], WorkerState::Activating)?;

    let existing = match self.storage.keys() {
      Ok(names) => names,
      Err(e) => {
        warn!(error = %e, "failed to enumerate namespaces, skipping cleanup");
        Vec::new()
      }
    };

    for name in self.namespaces.stale(&existing) {
      match self.storage.delete(name) {
        Ok(_) => info!(namespace = %name, "deleted stale namespace"),
        Err(e) => warn!(namespace = %name, error = %e, "failed to delete stale namespace"),
      }
    }

    if let Err(e) = self.storage.open(&self.namespaces.dynamic_name) {
      warn!(namespace = %self.namespaces.dynamic_name, error = %e, "failed to open dynamic namespace");
    }

    self.set_state(WorkerState::Activated)?;
    info!(
      static_namespace = %self.namespaces.static_name,
      dynamic_namespace = %self.namespaces.dynamic_name,
      "activated"
    );

    if let Err(e) = self.host.claim_clients().await {
      warn!(error = %e, "failed to claim clients");
    }
    Ok(())
  }

  /// Adopt an installation made by an earlier process.
  ///
  /// If the static namespace for this generation already exists, the worker
  /// skips install and activates directly. Returns whether it did.
  pub async fn resume(&self) -> Result<bool> {
    if !self.storage.has(&self.namespaces.static_name)? {
      return Ok(false);
    }

    self.transition(&[WorkerState::Parsed], WorkerState::Installed)?;
    self.activate().await?;
    Ok(true)
  }

  /// Handle a request issued by a page.
  ///
  /// Until activation completes, pages are not controlled and requests go
  /// straight to the network.
  pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
    if self.state()? != WorkerState::Activated {
      debug!(url = %request.url, "not controlling clients yet");
      let response = self.network.fetch(request).await?;
      return Ok(FetchOutcome::passthrough(response));
    }

    self.interceptor.handle(request).await
  }

  /// Acknowledge a tagged background-sync signal.
  pub async fn sync(&self, tag: &str) -> Result<()> {
    signals::handle_sync(tag).await
  }

  /// Show a notification for a push payload.
  pub async fn push(&self, payload: Option<&[u8]>) -> Result<Notification> {
    let key = self.next_notification.fetch_add(1, Ordering::SeqCst);
    signals::handle_push(self.host.as_ref(), &self.notifications, payload, key).await
  }
}
