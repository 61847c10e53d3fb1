use super::{CapturedResponse, DispatchOutcome, OutboundRequest, Transport};
use crate::models::{HeaderList, HttpMethod};
use anyhow::Context;
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Headers reqwest computes itself from the final URL and body
const HOP_BY_HOP: &[&str] = &["host", "content-length", "transfer-encoding"];

/// [`Transport`] backed by a shared reqwest client
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(timeout).no_proxy();
        if accept_invalid_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let client = builder.build().context("building HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> DispatchOutcome {
        let url = match resolve_url(&request.url, &request.headers) {
            Ok(url) => url,
            Err(message) => return DispatchOutcome::Failed(message),
        };

        let mut builder = self.client.request(to_reqwest_method(request.method), url);
        for header in forwarded_headers(&request.headers).iter() {
            if let Ok(name) = reqwest::header::HeaderName::try_from(header.name.as_str()) {
                if let Ok(value) = reqwest::header::HeaderValue::from_str(&header.value) {
                    builder = builder.header(name, value);
                }
            }
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url = %request.url, error = %e, "Dispatch failed");
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let headers: HeaderList = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    String::from_utf8_lossy(v.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => return DispatchOutcome::Failed(format!("reading response body: {}", e)),
        };

        DispatchOutcome::Delivered(CapturedResponse {
            status,
            headers,
            body,
            elapsed: started.elapsed(),
        })
    }
}

fn to_reqwest_method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
        HttpMethod::Head => reqwest::Method::HEAD,
        HttpMethod::Options => reqwest::Method::OPTIONS,
        HttpMethod::Connect => reqwest::Method::CONNECT,
        HttpMethod::Trace => reqwest::Method::TRACE,
    }
}

/// Absolute URLs pass through. A path-only URL is resolved against the
/// `Host` header; port 443 selects https, anything else plain http.
fn resolve_url(raw: &str, headers: &HeaderList) -> Result<reqwest::Url, String> {
    let absolute = if raw.starts_with('/') {
        let host = headers
            .get("host")
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| format!("cannot resolve '{}' without a Host header", raw))?;
        let scheme = if host.ends_with(":443") { "https" } else { "http" };
        format!("{}://{}{}", scheme, host, raw)
    } else {
        raw.to_string()
    };
    reqwest::Url::parse(&absolute).map_err(|e| format!("invalid url '{}': {}", absolute, e))
}

fn forwarded_headers(headers: &HeaderList) -> HeaderList {
    headers
        .iter()
        .filter(|h| !HOP_BY_HOP.iter().any(|skip| h.name.eq_ignore_ascii_case(skip)))
        .map(|h| (h.name.clone(), h.value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn transport() -> ReqwestTransport {
        ReqwestTransport::new(Duration::from_secs(5), false).expect("client builds")
    }

    #[test]
    fn path_only_urls_use_host_header() {
        let headers: HeaderList = [("Host", "example.com:8080")].into_iter().collect();
        let url = resolve_url("/api/test?x=1", &headers).expect("resolves");
        assert_eq!(url.as_str(), "http://example.com:8080/api/test?x=1");

        let tls: HeaderList = [("host", "secure.example.com:443")].into_iter().collect();
        let url = resolve_url("/", &tls).expect("resolves");
        assert_eq!(url.scheme(), "https");

        assert!(resolve_url("/no-host", &HeaderList::new()).is_err());
    }

    #[test]
    fn hop_by_hop_headers_are_not_forwarded() {
        let headers: HeaderList = [
            ("Host", "example.com"),
            ("Content-Length", "12"),
            ("transfer-encoding", "chunked"),
            ("X-Test", "1"),
        ]
        .into_iter()
        .collect();
        let forwarded = forwarded_headers(&headers);
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded.get("x-test"), Some("1"));
    }

    #[tokio::test]
    async fn invalid_url_is_a_failed_dispatch() {
        let request = OutboundRequest {
            method: HttpMethod::Get,
            url: "not a url".into(),
            headers: HeaderList::new(),
            body: None,
        };
        let outcome = transport().send(&request).await;
        assert!(matches!(outcome, DispatchOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn delivers_request_and_captures_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.expect("accept");
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            while !received.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.expect("read");
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(
                    b"HTTP/1.1 201 Created\r\nContent-Length: 2\r\nX-Reply: yes\r\nX-Name: caf\xc3\xa9\r\nConnection: close\r\n\r\nok",
                )
                .await
                .expect("write");
            String::from_utf8_lossy(&received).to_string()
        });

        let request = OutboundRequest {
            method: HttpMethod::Get,
            url: format!("http://{}/api/test", addr),
            headers: [("X-Test", "1"), ("Content-Length", "999")]
                .into_iter()
                .collect(),
            body: None,
        };
        let outcome = transport().send(&request).await;

        let raw_request = server.await.expect("server task");
        assert!(raw_request.starts_with("GET /api/test HTTP/1.1"));
        assert!(raw_request.to_ascii_lowercase().contains("x-test: 1"));
        assert!(!raw_request.contains("999"));

        match outcome {
            DispatchOutcome::Delivered(response) => {
                assert_eq!(response.status, 201);
                assert_eq!(response.headers.get("x-reply"), Some("yes"));
                assert_eq!(response.headers.get("x-name"), Some("café"));
                assert_eq!(response.body, b"ok".to_vec());
            }
            DispatchOutcome::Failed(message) => panic!("dispatch failed: {message}"),
        }
    }
}
