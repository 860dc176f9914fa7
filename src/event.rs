//! Host events and their dispatch to the worker.

use bytes::Bytes;
use color_eyre::Result;

use crate::cache::CacheStorage;
use crate::http::Request;
use crate::worker::{FetchOutcome, Notification, ServiceWorker};

/// Events delivered by the host
#[derive(Debug)]
pub enum Event {
  Install,
  Activate,
  /// A page issued a request
  Fetch(Request),
  /// Deferred background sync became possible
  Sync { tag: String },
  /// Push message arrived
  Push { data: Option<Bytes> },
}

/// What handling an event produced.
///
/// The host treats an event as handled once `dispatch` resolves.
#[derive(Debug)]
pub enum EventOutcome {
  Installed,
  Activated,
  Fetched(FetchOutcome),
  Synced,
  Notified(Notification),
}

impl<S: CacheStorage + 'static> ServiceWorker<S> {
  /// Route one host event to its handler.
  pub async fn dispatch(&self, event: Event) -> Result<EventOutcome> {
    match event {
      Event::Install => self.install().await.map(|_| EventOutcome::Installed),
      Event::Activate => self.activate().await.map(|_| EventOutcome::Activated),
      Event::Fetch(request) => self.fetch(&request).await.map(EventOutcome::Fetched),
      Event::Sync { tag } => self.sync(&tag).await.map(|_| EventOutcome::Synced),
      Event::Push { data } => self.push(data.as_deref()).await.map(EventOutcome::Notified),
    }
  }
}
