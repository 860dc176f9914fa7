//! Background sync and push notification handlers.
//!
//! Neither touches the cache; they are independent entry points that share
//! the worker's host.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info};

use super::host::Host;
use crate::config::NotificationConfig;

/// A request to display a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub vibrate: Vec<u32>,
  pub data: NotificationData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationData {
  pub date_of_arrival: DateTime<Utc>,
  pub primary_key: u64,
}

impl Notification {
  /// Build a notification from a push payload.
  ///
  /// The payload is read as UTF-8 text; an absent or blank payload falls back
  /// to the configured default body.
  pub fn from_push(config: &NotificationConfig, payload: Option<&[u8]>, primary_key: u64) -> Self {
    let body = payload
      .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
      .filter(|text| !text.is_empty())
      .unwrap_or_else(|| config.default_body.clone());

    Self {
      title: config.title.clone(),
      body,
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      vibrate: config.vibrate.clone(),
      data: NotificationData {
        date_of_arrival: Utc::now(),
        primary_key,
      },
    }
  }
}

/// Acknowledge a deferred-sync signal.
///
/// There is nothing queued for replay, so the signal resolves immediately.
pub async fn handle_sync(tag: &str) -> Result<()> {
  info!(tag, "background sync acknowledged");
  Ok(())
}

/// Turn a push payload into a displayed notification.
///
/// Returns only after the host has shown it.
pub async fn handle_push(
  host: &dyn Host,
  config: &NotificationConfig,
  payload: Option<&[u8]>,
  primary_key: u64,
) -> Result<Notification> {
  let notification = Notification::from_push(config, payload, primary_key);
  debug!(primary_key, "push received");
  host.show_notification(notification.clone()).await?;
  Ok(notification)
}
