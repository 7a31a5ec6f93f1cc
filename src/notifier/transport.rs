//! Where notifier data comes from.

use crate::notifier::messages::{ChatsBody, Notification, NotificationsBody};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("unexpected response body: {0}")]
    Decode(String),
}

/// Source of notifier data, polled once per cycle
pub trait Transport: Send + Sync {
    fn fetch_notifications(
        &self,
    ) -> impl Future<Output = Result<Vec<Notification>, TransportError>> + Send;

    /// Chat records changed after `since_ms` (unix milliseconds)
    fn fetch_updated_chats(
        &self,
        since_ms: i64,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send;
}

/// Polls the CRM's REST API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn notifications_url(&self) -> String {
        format!("{}/api/notifications", self.base_url)
    }

    pub fn chats_url(&self, since_ms: i64) -> String {
        format!("{}/api/chats?updated_since={}", self.base_url, since_ms)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, TransportError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

impl Transport for HttpTransport {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, TransportError> {
        let body: NotificationsBody = self.get_json(&self.notifications_url()).await?;
        Ok(body.into_vec())
    }

    async fn fetch_updated_chats(&self, since_ms: i64) -> Result<Vec<Value>, TransportError> {
        let body: ChatsBody = self.get_json(&self.chats_url(since_ms)).await?;
        Ok(body.into_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// One-request-per-connection HTTP responder. Sends each request line to `seen`.
    async fn serve(status: u16, body: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut buf = vec![0u8; 4096];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]).to_string();
                let _ = tx.send(request.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (format!("http://{}", addr), rx)
    }

    #[test]
    fn test_urls() {
        let transport = HttpTransport::new("http://crm.local/", Duration::from_secs(1)).unwrap();
        assert_eq!(transport.notifications_url(), "http://crm.local/api/notifications");
        assert_eq!(
            transport.chats_url(1700000000000),
            "http://crm.local/api/chats?updated_since=1700000000000"
        );
    }

    #[tokio::test]
    async fn test_fetch_notifications() {
        let (base, mut seen) = serve(200, r#"[{"message": "New chat", "type": "warn"}]"#).await;
        let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();

        let notifications = transport.fetch_notifications().await.unwrap();
        assert_eq!(notifications, vec![Notification::new("New chat", "warn")]);
        assert_eq!(seen.recv().await.unwrap(), "GET /api/notifications HTTP/1.1");
    }

    #[tokio::test]
    async fn test_fetch_updated_chats_sends_watermark() {
        let (base, mut seen) = serve(200, r#"{"chats": [{"id": 3}]}"#).await;
        let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();

        let chats = transport.fetch_updated_chats(42).await.unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(seen.recv().await.unwrap(), "GET /api/chats?updated_since=42 HTTP/1.1");
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let (base, _seen) = serve(503, r#"{"error": "maintenance"}"#).await;
        let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            transport.fetch_notifications().await,
            Err(TransportError::Status(503))
        ));
    }

    #[tokio::test]
    async fn test_malformed_body_is_decode_error() {
        let (base, _seen) = serve(200, "<html>login</html>").await;
        let transport = HttpTransport::new(&base, Duration::from_secs(5)).unwrap();
        assert!(matches!(
            transport.fetch_updated_chats(0).await,
            Err(TransportError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_connection_refused_is_http_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let transport =
            HttpTransport::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        assert!(matches!(
            transport.fetch_notifications().await,
            Err(TransportError::Http(_))
        ));
    }
}
