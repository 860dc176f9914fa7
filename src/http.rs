//! Request and response types that flow through the worker.
//!
//! These mirror the parts of the platform fetch model the caching layer
//! actually inspects: the request method, URL and mode, and the response
//! status, type and body.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use std::str::FromStr;
use url::Url;

/// Intent of a request, as reported by the page that issued it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level document load
  Navigate,
  SameOrigin,
  /// Sub-resource load without CORS (images, classic scripts)
  #[default]
  NoCors,
  Cors,
}

impl FromStr for RequestMode {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "navigate" => Ok(Self::Navigate),
      "same-origin" => Ok(Self::SameOrigin),
      "no-cors" => Ok(Self::NoCors),
      "cors" => Ok(Self::Cors),
      other => Err(eyre!("Unknown request mode: {}", other)),
    }
  }
}

/// An outgoing request issued by the page.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: HeaderMap,
}

impl Request {
  /// A sub-resource GET request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::default(),
      headers: HeaderMap::new(),
    }
  }

  /// A top-level navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_mode(RequestMode::Navigate)
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }
}

/// Platform classification of how readable a response is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseType {
  /// Same-origin, fully readable
  #[default]
  Basic,
  /// Cross-origin, readable through CORS
  Cors,
  /// Cross-origin without CORS, status and body hidden
  Opaque,
  /// Redirect returned for a manual-redirect request
  OpaqueRedirect,
  /// Network error surfaced as a response
  Error,
}

impl ResponseType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
      Self::OpaqueRedirect => "opaqueredirect",
      Self::Error => "error",
    }
  }
}

impl FromStr for ResponseType {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      "opaqueredirect" => Ok(Self::OpaqueRedirect),
      "error" => Ok(Self::Error),
      other => Err(eyre!("Unknown response type: {}", other)),
    }
  }
}

/// A response produced by the network or read back from the store.
///
/// A response is deliberately not `Clone`: handing it out moves it, and
/// its body can be taken exactly once with [`Response::into_body`]. Code
/// that needs the same payload in two places must call
/// [`Response::duplicate`] before either copy is consumed.
#[derive(Debug)]
pub struct Response {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub kind: ResponseType,
  /// Final URL after redirects, if known
  pub url: Option<Url>,
  body: Bytes,
}

impl Response {
  pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers: HeaderMap::new(),
      kind: ResponseType::Basic,
      url: None,
      body: body.into(),
    }
  }

  pub fn with_kind(mut self, kind: ResponseType) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_url(mut self, url: Url) -> Self {
    self.url = Some(url);
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    if let (Ok(name), Ok(value)) = (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      self.headers.insert(name, value);
    }
    self
  }

  /// Borrow the body without consuming it.
  pub fn body(&self) -> &Bytes {
    &self.body
  }

  /// Consume the response, yielding its body.
  pub fn into_body(self) -> Bytes {
    self.body
  }

  /// Produce an independent copy of this response before its body is read.
  pub fn duplicate(&self) -> Self {
    Self {
      status: self.status,
      headers: self.headers.clone(),
      kind: self.kind,
      url: self.url.clone(),
      body: self.body.clone(),
    }
  }

  /// Headers as name/value string pairs, for storage.
  pub fn header_pairs(&self) -> Vec<(String, String)> {
    self
      .headers
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect()
  }

  /// Rebuild a header map from stored pairs, skipping anything invalid.
  pub fn headers_from_pairs(pairs: &[(String, String)]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
      if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_bytes(value.as_bytes()),
      ) {
        headers.append(name, value);
      }
    }
    headers
  }
}
