use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin of the application; root-relative URLs resolve against it and
  /// responses from it are classified as same-origin
  pub origin: String,
  pub cache: CacheConfig,
  /// Resources that must be fetched into the static namespace at install
  pub manifest: Vec<String>,
  /// Root document served to failed navigations
  pub shell: String,
  /// URL schemes that are never intercepted (browser extension resources)
  #[serde(deserialize_with = "deserialize_lowercase_vec")]
  pub ignored_schemes: Vec<String>,
  pub notifications: NotificationConfig,
  /// Explicit cache database path (defaults to $XDG_DATA_HOME/shellcache/cache.db)
  pub store: Option<PathBuf>,
}

fn deserialize_lowercase_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

/// Namespace naming. Bumping a version invalidates every client's copy of
/// that namespace on the next activation.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub static_prefix: String,
  pub static_version: String,
  pub dynamic_prefix: String,
  pub dynamic_version: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      static_prefix: "static".to_string(),
      static_version: "v1".to_string(),
      dynamic_prefix: "dynamic".to_string(),
      dynamic_version: "v1".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub icon: String,
  pub badge: String,
  /// Vibration pattern in milliseconds (vibrate, pause, vibrate, ...)
  pub vibrate: Vec<u32>,
  /// Body used when a push arrives without a payload
  pub default_body: String,
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "SpecStudio".to_string(),
      icon: "/assets/icons/icon-192.png".to_string(),
      badge: "/assets/icons/badge-72.png".to_string(),
      vibrate: vec![100, 50, 100],
      default_body: "New update available".to_string(),
    }
  }
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8000/".to_string(),
      cache: CacheConfig::default(),
      manifest: vec![
        "/".to_string(),
        "/assets/global.css".to_string(),
        "https://unpkg.com/htmx.org@1.9.12".to_string(),
        "https://cdn.jsdelivr.net/npm/marked/marked.min.js".to_string(),
        "https://fonts.googleapis.com/css2?family=Inter:wght@400;600&display=swap".to_string(),
      ],
      shell: "/".to_string(),
      ignored_schemes: vec![
        "chrome-extension".to_string(),
        "moz-extension".to_string(),
        "safari-web-extension".to_string(),
      ],
      notifications: NotificationConfig::default(),
      store: None,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shellcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shellcache/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => {
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("shellcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shellcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    let origin = self.origin_url()?;
    if origin.cannot_be_a_base() {
      return Err(eyre!("Origin must be an absolute URL: {}", self.origin));
    }
    if self.cache.static_version.trim().is_empty() || self.cache.dynamic_version.trim().is_empty() {
      return Err(eyre!("Cache versions must not be empty"));
    }
    if self.static_name() == self.dynamic_name() {
      return Err(eyre!(
        "Static and dynamic caches resolve to the same name: {}",
        self.static_name()
      ));
    }
    for entry in &self.manifest {
      self.resolve(entry)?;
    }
    self.resolve(&self.shell)?;
    Ok(())
  }

  pub fn static_name(&self) -> String {
    format!("{}-{}", self.cache.static_prefix, self.cache.static_version)
  }

  pub fn dynamic_name(&self) -> String {
    format!("{}-{}", self.cache.dynamic_prefix, self.cache.dynamic_version)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))
  }

  /// Resolve an absolute or root-relative URL against the origin.
  pub fn resolve(&self, url: &str) -> Result<Url> {
    self
      .origin_url()?
      .join(url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", url, e))
  }

  /// Resolved manifest, in declaration order.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    self.manifest.iter().map(|entry| self.resolve(entry)).collect()
  }

  /// Get the cache database path.
  pub fn store_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.store {
      return Ok(path.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("shellcache").join("cache.db"))
  }
}
