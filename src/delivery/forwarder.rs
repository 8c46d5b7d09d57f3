//! Best-effort HTTP delivery of completed pages

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::capture::{ContentKind, Page};
use crate::config::CollectorConfig;
use crate::device::Device;
use crate::error::{Error, Result};

const DOCUMENT_PATH: &str = "/api/carrefour-page";
const VISUAL_PATH: &str = "/api/carrefour-visual";
const LIST_PATH: &str = "/api/carrefour-pages";

/// Destination for completed pages
#[async_trait]
pub trait PageSink: Send + Sync {
    /// Deliver one page; returns the id the receiver assigned, if any
    async fn deliver(&self, page: &Page) -> Result<Option<String>>;
}

/// Body of `POST /api/carrefour-page`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentDelivery<'a> {
    content: &'a str,
    timestamp: DateTime<Utc>,
    device_id: &'a str,
    device_info: &'a Device,
}

/// Body of `POST /api/carrefour-visual`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VisualDelivery<'a> {
    html: &'a str,
    timestamp: DateTime<Utc>,
    device_id: &'a str,
    device_info: &'a Device,
}

/// Request for one page; `timestamp` is the time of sending
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum DeliveryBody<'a> {
    Document(DocumentDelivery<'a>),
    Visual(VisualDelivery<'a>),
}

impl<'a> DeliveryBody<'a> {
    fn for_page(page: &'a Page, sent_at: DateTime<Utc>) -> Self {
        match page.content_kind {
            ContentKind::Document => DeliveryBody::Document(DocumentDelivery {
                content: &page.content,
                timestamp: sent_at,
                device_id: &page.device_id,
                device_info: &page.device_info,
            }),
            ContentKind::Visual => DeliveryBody::Visual(VisualDelivery {
                html: &page.content,
                timestamp: sent_at,
                device_id: &page.device_id,
                device_info: &page.device_info,
            }),
        }
    }

    fn path(&self) -> &'static str {
        match self {
            DeliveryBody::Document(_) => DOCUMENT_PATH,
            DeliveryBody::Visual(_) => VISUAL_PATH,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryAck {
    #[serde(default)]
    page_id: Option<serde_json::Value>,
}

/// Posts pages to the collector, once each, with no retry
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: Client,
    base_url: String,
}

impl Forwarder {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check that the collector answers; failures are only logged
    pub async fn probe(&self) -> bool {
        let url = format!("{}{}", self.base_url, LIST_PATH);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("Collector reachable at {}", self.base_url);
                true
            }
            Ok(response) => {
                tracing::warn!(
                    "Collector at {} answered {}; pages will still be forwarded",
                    self.base_url,
                    response.status()
                );
                false
            }
            Err(e) => {
                tracing::warn!(
                    "Collector at {} unreachable ({}); pages will still be forwarded",
                    self.base_url,
                    e
                );
                false
            }
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, page: &Page, path: &str, body: &T) -> Result<Option<String>> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::forward(page.id, e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::forward(
                page.id,
                format!("HTTP {}: {}", status, detail.trim()),
            ));
        }

        // The acknowledgement body is optional
        let ack: DeliveryAck = response.json().await.unwrap_or_default();
        Ok(ack.page_id.map(|id| match id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }))
    }
}

#[async_trait]
impl PageSink for Forwarder {
    async fn deliver(&self, page: &Page) -> Result<Option<String>> {
        let body = DeliveryBody::for_page(page, Utc::now());
        let result = self.post(page, body.path(), &body).await;

        match &result {
            Ok(Some(page_id)) => tracing::info!(
                "Forwarded {} page from {} (collector id {})",
                page.content_kind,
                page.device_info.display_name,
                page_id
            ),
            Ok(None) => tracing::info!(
                "Forwarded {} page from {}",
                page.content_kind,
                page.device_info.display_name
            ),
            Err(e) => tracing::warn!("{}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(kind: ContentKind) -> Page {
        Page::new(&Device::new("emulator-5554", "sdk_gphone64", "14"), kind, "Hello")
    }

    #[test]
    fn test_document_body_shape() {
        let page = page(ContentKind::Document);
        let body = DeliveryBody::for_page(&page, Utc::now());
        assert_eq!(body.path(), "/api/carrefour-page");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["content"], "Hello");
        assert_eq!(json["deviceId"], "emulator-5554");
        assert_eq!(json["deviceInfo"]["model"], "sdk_gphone64");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_visual_body_uses_html_field() {
        let page = page(ContentKind::Visual);
        let body = DeliveryBody::for_page(&page, Utc::now());
        assert_eq!(body.path(), "/api/carrefour-visual");

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["html"], "Hello");
        assert!(json.get("content").is_none());
    }

    #[test]
    fn test_timestamp_is_send_time_not_capture_time() {
        let page = page(ContentKind::Document);
        let sent_at = page.captured_at + chrono::Duration::seconds(30);

        let json = serde_json::to_value(DeliveryBody::for_page(&page, sent_at)).unwrap();
        let timestamp: DateTime<Utc> = serde_json::from_value(json["timestamp"].clone()).unwrap();
        assert_eq!(timestamp, sent_at);
        assert_ne!(timestamp, page.captured_at);
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let config = CollectorConfig {
            base_url: "http://localhost:3001/".into(),
            ..CollectorConfig::default()
        };
        assert_eq!(Forwarder::new(&config).unwrap().base_url(), "http://localhost:3001");
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_a_forward_error() {
        let config = CollectorConfig {
            // Port 9 (discard) is closed on test hosts
            base_url: "http://127.0.0.1:9".into(),
            timeout: std::time::Duration::from_secs(2),
            ..CollectorConfig::default()
        };
        let forwarder = Forwarder::new(&config).unwrap();

        let err = forwarder.deliver(&page(ContentKind::Document)).await.unwrap_err();
        assert!(matches!(err, Error::Forward { .. }));
        assert!(!forwarder.probe().await);
    }
}
