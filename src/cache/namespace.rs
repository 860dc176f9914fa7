//! Versioned cache namespace naming.

use crate::config::Config;

/// The two namespaces a worker generation owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
  /// Bootstrap resources from the manifest
  pub static_name: String,
  /// Write-through runtime fetches
  pub dynamic_name: String,
}

impl Namespaces {
  pub fn new(static_name: impl Into<String>, dynamic_name: impl Into<String>) -> Self {
    Self {
      static_name: static_name.into(),
      dynamic_name: dynamic_name.into(),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.static_name(), config.dynamic_name())
  }

  /// Staging namespace an install fills before it is promoted to `static_name`.
  pub fn staging_name(&self) -> String {
    format!("{}-installing", self.static_name)
  }

  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name
  }

  /// Names from `existing` that do not belong to this generation.
  pub fn stale<'a>(&self, existing: &'a [String]) -> Vec<&'a str> {
    existing
      .iter()
      .map(String::as_str)
      .filter(|name| !self.is_current(name))
      .collect()
  }
}
