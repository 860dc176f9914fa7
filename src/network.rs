//! Network access for the worker.

use async_trait::async_trait;
use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::ACCESS_CONTROL_ALLOW_ORIGIN;
use reqwest::redirect::Policy;
use url::Url;

use crate::http::{Request, RequestMode, Response, ResponseType};

/// Anything that can turn a request into a response.
///
/// An `Err` means no response could be obtained at all (connection refused,
/// DNS failure, blocked cross-origin read). HTTP error statuses are `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// HTTP network backed by reqwest.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  /// Navigations use manual redirects; a 3xx comes back as-is
  navigation_client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url) -> Result<Self> {
    let client = Self::builder()
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    let navigation_client = Self::builder()
      .redirect(Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      navigation_client,
      origin,
    })
  }

  fn builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder().user_agent(concat!("shellcache/", env!("CARGO_PKG_VERSION")))
  }

  /// Classify a response the way a browser would for a page on `origin`.
  fn classify(&self, request: &Request, response: &reqwest::Response) -> Result<ResponseType> {
    match request.mode {
      RequestMode::Navigate if response.status().is_redirection() => Ok(ResponseType::OpaqueRedirect),
      RequestMode::Navigate => Ok(ResponseType::Basic),
      _ if response.url().origin() == self.origin.origin() => Ok(ResponseType::Basic),
      RequestMode::NoCors => Ok(ResponseType::Opaque),
      RequestMode::SameOrigin => Err(eyre!(
        "Same-origin request to {} ended at {}",
        request.url,
        response.url()
      )),
      RequestMode::Cors => {
        let allowed = response
          .headers()
          .get(ACCESS_CONTROL_ALLOW_ORIGIN)
          .and_then(|v| v.to_str().ok())
          .map(|v| v == "*" || v == self.origin.origin().ascii_serialization())
          .unwrap_or(false);

        if allowed {
          Ok(ResponseType::Cors)
        } else {
          Err(eyre!("Cross-origin request to {} blocked", response.url()))
        }
      }
    }
  }
}

#[async_trait]
impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let client = if request.is_navigation() {
      &self.navigation_client
    } else {
      &self.client
    };

    let response = client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone())
      .send()
      .await
      .map_err(|e| eyre!("Network request to {} failed: {}", request.url, e))?;

    let kind = self.classify(request, &response)?;
    let status = response.status();
    let final_url = response.url().clone();

    if matches!(kind, ResponseType::Opaque | ResponseType::OpaqueRedirect) {
      // Opaque responses expose neither headers nor body
      return Ok(Response::new(status, Bytes::new()).with_kind(kind).with_url(final_url));
    }

    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read response body from {}: {}", final_url, e))?;

    let mut out = Response::new(status, body).with_kind(kind).with_url(final_url);
    out.headers = headers;
    Ok(out)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use reqwest::StatusCode;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn origin_of(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
  }

  #[tokio::test]
  async fn test_same_origin_response_is_basic() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/assets/global.css"))
      .respond_with(
        ResponseTemplate::new(200).set_body_raw("body { margin: 0 }", "text/css"),
      )
      .mount(&server)
      .await;

    let origin = origin_of(&server);
    let network = HttpNetwork::new(origin.clone()).unwrap();
    let request = Request::get(origin.join("/assets/global.css").unwrap());

    let response = network.fetch(&request).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.kind, ResponseType::Basic);
    assert_eq!(response.headers.get("content-type").unwrap(), "text/css");
    assert_eq!(response.into_body().as_ref(), b"body { margin: 0 }");
  }

  #[tokio::test]
  async fn test_error_status_is_not_a_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/missing"))
      .respond_with(ResponseTemplate::new(404))
      .mount(&server)
      .await;

    let origin = origin_of(&server);
    let network = HttpNetwork::new(origin.clone()).unwrap();
    let response = network
      .fetch(&Request::get(origin.join("/missing").unwrap()))
      .await
      .unwrap();
    assert_eq!(response.status, StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn test_cross_origin_no_cors_is_opaque() {
    let app = MockServer::start().await;
    let cdn = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/lib.js"))
      .respond_with(ResponseTemplate::new(200).set_body_string("secret"))
      .mount(&cdn)
      .await;

    let network = HttpNetwork::new(origin_of(&app)).unwrap();
    let request = Request::get(origin_of(&cdn).join("/lib.js").unwrap());

    let response = network.fetch(&request).await.unwrap();
    assert_eq!(response.kind, ResponseType::Opaque);
    assert!(response.into_body().is_empty());
  }

  #[tokio::test]
  async fn test_cross_origin_cors_requires_allow_origin() {
    let app = MockServer::start().await;
    let cdn = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/open.css"))
      .respond_with(
        ResponseTemplate::new(200)
          .set_body_string("ok")
          .insert_header("access-control-allow-origin", "*"),
      )
      .mount(&cdn)
      .await;
    Mock::given(method("GET"))
      .and(path("/closed.css"))
      .respond_with(ResponseTemplate::new(200).set_body_string("no"))
      .mount(&cdn)
      .await;

    let network = HttpNetwork::new(origin_of(&app)).unwrap();
    let cdn_origin = origin_of(&cdn);

    let open = Request::get(cdn_origin.join("/open.css").unwrap()).with_mode(RequestMode::Cors);
    let response = network.fetch(&open).await.unwrap();
    assert_eq!(response.kind, ResponseType::Cors);

    let closed = Request::get(cdn_origin.join("/closed.css").unwrap()).with_mode(RequestMode::Cors);
    assert!(network.fetch(&closed).await.is_err());
  }

  #[tokio::test]
  async fn test_redirected_navigation_is_opaque_redirect() {
    let app = MockServer::start().await;
    let auth = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/login"))
      .respond_with(
        ResponseTemplate::new(302).insert_header("location", format!("{}/sso", auth.uri())),
      )
      .mount(&app)
      .await;
    Mock::given(method("GET"))
      .and(path("/sso"))
      .respond_with(ResponseTemplate::new(200).set_body_string("sign in"))
      .mount(&auth)
      .await;

    let origin = origin_of(&app);
    let network = HttpNetwork::new(origin.clone()).unwrap();
    let response = network
      .fetch(&Request::navigate(origin.join("/login").unwrap()))
      .await
      .unwrap();

    assert_eq!(response.status, StatusCode::FOUND);
    assert_eq!(response.kind, ResponseType::OpaqueRedirect);
    assert!(response.into_body().is_empty());
    assert!(auth.received_requests().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_sub_resource_still_follows_redirects() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
      .and(path("/old.css"))
      .respond_with(ResponseTemplate::new(301).insert_header("location", "/new.css"))
      .mount(&server)
      .await;
    Mock::given(method("GET"))
      .and(path("/new.css"))
      .respond_with(ResponseTemplate::new(200).set_body_string("p {}"))
      .mount(&server)
      .await;

    let origin = origin_of(&server);
    let network = HttpNetwork::new(origin.clone()).unwrap();
    let response = network
      .fetch(&Request::get(origin.join("/old.css").unwrap()))
      .await
      .unwrap();

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.kind, ResponseType::Basic);
  }

  #[tokio::test]
  async fn test_unreachable_host_is_error() {
    // Bind then release a port so nothing is listening on it
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let origin = Url::parse(&format!("http://{}/", addr)).unwrap();

    let network = HttpNetwork::new(origin.clone()).unwrap();
    let result = network.fetch(&Request::get(origin.join("/").unwrap())).await;
    assert!(result.is_err());
  }
}
