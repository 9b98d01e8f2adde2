// ABOUTME: HTTP health probe for services exposing a /health endpoint.
// ABOUTME: Plain HTTP/1.1 over a tokio TcpStream via hyper's low-level client connection.

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::Uri;
use hyper_util::rt::TokioIo;
use nonempty::NonEmpty;
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;

use crate::release::InstanceHealth;

use super::BackendError;

/// Status values a health endpoint may report for a healthy instance.
const HEALTHY_STATUSES: &[&str] = &["healthy", "ok", "pass", "up"];

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: Option<String>,
}

/// Probes one endpoint per instance; any failure marks that instance unhealthy.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    endpoints: NonEmpty<String>,
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(endpoints: NonEmpty<String>, timeout: Duration) -> Self {
        Self { endpoints, timeout }
    }

    /// Probe every endpoint concurrently, in configured order.
    pub async fn probe_all(&self) -> Vec<InstanceHealth> {
        let probes = self.endpoints.iter().map(|url| async move {
            match tokio::time::timeout(self.timeout, check(url)).await {
                Ok(Ok(health)) => health,
                Ok(Err(e)) => {
                    tracing::debug!("{}", e);
                    InstanceHealth::Unhealthy
                }
                Err(_) => {
                    tracing::debug!("Health probe to {} timed out", url);
                    InstanceHealth::Unhealthy
                }
            }
        });
        futures::future::join_all(probes).await
    }
}

/// GET one endpoint and classify the response.
pub async fn check(url: &str) -> Result<InstanceHealth, BackendError> {
    let fail = |message: String| BackendError::Http {
        url: url.to_string(),
        message,
    };

    let uri: Uri = url.parse().map_err(|e| fail(format!("invalid URL: {}", e)))?;
    if uri.scheme_str() != Some("http") {
        return Err(fail("only http:// endpoints are supported".to_string()));
    }
    let host = uri
        .host()
        .ok_or_else(|| fail("URL has no host".to_string()))?;
    let port = uri.port_u16().unwrap_or(80);
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");

    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| fail(format!("connect failed: {}", e)))?;
    let io = TokioIo::new(stream);

    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| fail(format!("HTTP handshake failed: {}", e)))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("health probe connection error: {}", e);
        }
    });

    let authority = match uri.port_u16() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let req = hyper::Request::builder()
        .method("GET")
        .uri(path)
        .header("Host", authority)
        .header("Accept", "application/json")
        .body(Empty::<Bytes>::new())
        .map_err(|e| fail(format!("failed to build request: {}", e)))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| fail(format!("request failed: {}", e)))?;

    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| fail(format!("failed to read response: {}", e)))?
        .to_bytes();

    if !status.is_success() {
        return Ok(InstanceHealth::Unhealthy);
    }
    Ok(classify_body(&body))
}

/// A 2xx body is healthy unless it is JSON with a non-healthy `status`.
fn classify_body(body: &[u8]) -> InstanceHealth {
    match serde_json::from_slice::<HealthBody>(body) {
        Ok(HealthBody {
            status: Some(status),
        }) if !HEALTHY_STATUSES.contains(&status.to_ascii_lowercase().as_str()) => {
            InstanceHealth::Unhealthy
        }
        _ => InstanceHealth::Healthy,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `responses` in order, one per connection.
    async fn serve(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for response in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{}/health", addr)
    }

    fn response(status: &str, body: &str) -> &'static str {
        Box::leak(
            format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            )
            .into_boxed_str(),
        )
    }

    #[test]
    fn body_classification() {
        assert_eq!(classify_body(br#"{"status":"healthy"}"#), InstanceHealth::Healthy);
        assert_eq!(classify_body(br#"{"status":"degraded"}"#), InstanceHealth::Unhealthy);
        assert_eq!(classify_body(b"OK"), InstanceHealth::Healthy);
        assert_eq!(classify_body(b""), InstanceHealth::Healthy);
    }

    #[tokio::test]
    async fn healthy_endpoint() {
        let url = serve(vec![response("200 OK", r#"{"status":"healthy"}"#)]).await;
        assert_eq!(check(&url).await.unwrap(), InstanceHealth::Healthy);
    }

    #[tokio::test]
    async fn server_error_is_unhealthy() {
        let url = serve(vec![response("503 Service Unavailable", "{}")]).await;
        assert_eq!(check(&url).await.unwrap(), InstanceHealth::Unhealthy);
    }

    #[tokio::test]
    async fn unreachable_endpoint_counts_as_unhealthy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/health", listener.local_addr().unwrap());
        drop(listener);

        let probe = HttpHealthProbe::new(NonEmpty::new(url), Duration::from_secs(2));
        assert_eq!(probe.probe_all().await, vec![InstanceHealth::Unhealthy]);
    }

    #[tokio::test]
    async fn rejects_https() {
        assert!(check("https://example.com/health").await.is_err());
    }
}
