//! Upstream forwarder.
//!
//! Replays a buffered request against the configured LLM API, preserving
//! method, path, query and headers, and buffers the full response so the
//! pipeline can both serve and cache it.

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, Method, header};
use thiserror::Error;

use crate::config::UPSTREAM_TIMEOUT;

/// Headers that must not cross the proxy boundary (RFC 9110 hop-by-hop
/// set, plus Host which reqwest derives from the target URL).
const HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::HOST,
];

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// A fully buffered upstream response.
#[derive(Debug)]
pub struct ProxiedResponse {
    pub status: http::StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forwards buffered requests to the upstream LLM API. Implemented by
/// [`UpstreamProxy`] in production and by fakes in tests.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxiedResponse, ProxyError>;
}

pub struct UpstreamProxy {
    client: reqwest::Client,
    base: reqwest::Url,
    api_key: Option<String>,
}

impl UpstreamProxy {
    pub fn new(upstream_url: &str, api_key: Option<String>) -> Result<Self, ProxyError> {
        let base = reqwest::Url::parse(upstream_url)
            .map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
        if !base.has_host() {
            return Err(ProxyError::InvalidUrl(format!(
                "upstream URL has no host: {upstream_url}"
            )));
        }

        let client = reqwest::Client::builder().timeout(UPSTREAM_TIMEOUT).build()?;

        Ok(Self {
            client,
            base,
            api_key,
        })
    }

    /// Join the upstream base path with the request path. A request path
    /// that already carries the base prefix is used as-is so the path is
    /// never doubled.
    fn build_url(&self, path: &str, query: Option<&str>) -> reqwest::Url {
        let base_path = self.base.path().trim_end_matches('/');

        let already_prefixed = path == base_path
            || (path.starts_with(base_path) && path.as_bytes().get(base_path.len()) == Some(&b'/'));
        let full_path = if base_path.is_empty() || already_prefixed {
            path.to_string()
        } else {
            format!("{base_path}{path}")
        };

        let mut url = self.base.clone();
        url.set_path(&full_path);
        url.set_query(query);
        url
    }
}

#[async_trait]
impl Upstream for UpstreamProxy {
    async fn forward(
        &self,
        method: Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ProxiedResponse, ProxyError> {
        let url = self.build_url(path, query);

        let mut outbound = HeaderMap::new();
        for (name, value) in headers {
            if HOP_BY_HOP_HEADERS.contains(name) {
                continue;
            }
            outbound.append(name.clone(), value.clone());
        }

        let mut request = self
            .client
            .request(method, url)
            .headers(outbound)
            .body(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(ProxiedResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_string, header, header_exists, method, path, query_param},
    };

    use super::*;

    fn request_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(header::AUTHORIZATION, "Bearer client-key".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert(header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        headers.insert(header::HOST, "gateway.local".parse().unwrap());
        headers
    }

    #[tokio::test]
    async fn forwards_body_and_mirrors_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_string(r#"{"messages":[]}"#))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("x-upstream-marker", "yes")
                    .set_body_string(r#"{"id":"chatcmpl-1"}"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let proxy = UpstreamProxy::new(&server.uri(), None).unwrap();
        let response = proxy
            .forward(
                Method::POST,
                "/v1/chat/completions",
                None,
                &request_headers(),
                Bytes::from_static(br#"{"messages":[]}"#),
            )
            .await
            .unwrap();

        assert_eq!(response.status, http::StatusCode::OK);
        assert_eq!(response.body.as_ref(), br#"{"id":"chatcmpl-1"}"#);
        assert_eq!(
            response.headers.get("x-upstream-marker").unwrap(),
            "yes"
        );
    }

    #[tokio::test]
    async fn base_path_is_prepended_but_never_doubled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let proxy = UpstreamProxy::new(&format!("{}/v1", server.uri()), None).unwrap();
        let headers = HeaderMap::new();

        // Bare path gets the base prefix.
        proxy
            .forward(
                Method::POST,
                "/chat/completions",
                None,
                &headers,
                Bytes::new(),
            )
            .await
            .unwrap();

        // Already-prefixed path is not doubled into /v1/v1/...
        proxy
            .forward(
                Method::POST,
                "/v1/chat/completions",
                None,
                &headers,
                Bytes::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn configured_api_key_overrides_client_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer server-key"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let proxy = UpstreamProxy::new(&server.uri(), Some("server-key".to_string())).unwrap();
        proxy
            .forward(
                Method::POST,
                "/chat/completions",
                None,
                &request_headers(),
                Bytes::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn client_authorization_passes_through_without_server_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer client-key"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let proxy = UpstreamProxy::new(&server.uri(), None).unwrap();
        proxy
            .forward(
                Method::POST,
                "/chat/completions",
                None,
                &request_headers(),
                Bytes::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn hop_by_hop_headers_are_stripped() {
        let server = MockServer::start().await;
        // wiremock can only assert presence; the mock matches when the
        // content type survived. The hop-by-hop set is verified by the
        // request succeeding at all: a forwarded Transfer-Encoding:
        // chunked header with a non-chunked body would be rejected.
        Mock::given(method("POST"))
            .and(header_exists("content-type"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let proxy = UpstreamProxy::new(&server.uri(), None).unwrap();
        let response = proxy
            .forward(
                Method::POST,
                "/chat/completions",
                None,
                &request_headers(),
                Bytes::from_static(b"{}"),
            )
            .await
            .unwrap();
        assert_eq!(response.status, http::StatusCode::OK);

        let received = &server.received_requests().await.unwrap()[0];
        assert!(received.headers.get("connection").is_none() || {
            // Hyper may add its own Connection header; the client value
            // must not be the one forwarded.
            received.headers.get("connection").unwrap() != "keep-alive"
        });
        assert!(received.headers.get("transfer-encoding").is_none());
    }

    #[tokio::test]
    async fn query_string_is_preserved() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(query_param("debug", "1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let proxy = UpstreamProxy::new(&server.uri(), None).unwrap();
        proxy
            .forward(
                Method::POST,
                "/chat/completions",
                Some("debug=1"),
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unreachable_upstream_is_a_transport_error() {
        // Port 1 is essentially never listening.
        let proxy = UpstreamProxy::new("http://127.0.0.1:1", None).unwrap();
        let err = proxy
            .forward(
                Method::POST,
                "/chat/completions",
                None,
                &HeaderMap::new(),
                Bytes::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Transport(_)));
    }

    #[test]
    fn rejects_invalid_upstream_url() {
        assert!(matches!(
            UpstreamProxy::new("not a url", None),
            Err(ProxyError::InvalidUrl(_))
        ));
    }
}
