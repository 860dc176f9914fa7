//! Host primitives the worker calls back into.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::info;

use super::signals::Notification;

/// Capabilities the hosting environment provides to the worker.
#[async_trait]
pub trait Host: Send + Sync {
  /// Activate this worker without waiting for existing clients to close.
  async fn skip_waiting(&self) -> Result<()>;

  /// Take control of every open client immediately.
  async fn claim_clients(&self) -> Result<()>;

  /// Display a notification; resolves once it has been shown.
  async fn show_notification(&self, notification: Notification) -> Result<()>;
}

/// In-process host that records what the worker asked of it.
#[derive(Default)]
pub struct LocalHost {
  skipped_waiting: AtomicBool,
  claimed: AtomicBool,
  shown: Mutex<Vec<Notification>>,
}

impl LocalHost {
  pub fn new() -> Self {
    Self::default()
  }

  #[allow(dead_code)]
  pub fn skipped_waiting(&self) -> bool {
    self.skipped_waiting.load(Ordering::SeqCst)
  }

  #[allow(dead_code)]
  pub fn has_claimed_clients(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }

  /// Notifications shown so far, oldest first.
  #[allow(dead_code)]
  pub fn notifications(&self) -> Result<Vec<Notification>> {
    let shown = self
      .shown
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(shown.clone())
  }
}

#[async_trait]
impl Host for LocalHost {
  async fn skip_waiting(&self) -> Result<()> {
    self.skipped_waiting.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn claim_clients(&self) -> Result<()> {
    self.claimed.store(true, Ordering::SeqCst);
    Ok(())
  }

  async fn show_notification(&self, notification: Notification) -> Result<()> {
    info!(title = %notification.title, body = %notification.body, "showing notification");
    self
      .shown
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(notification);
    Ok(())
  }
}
