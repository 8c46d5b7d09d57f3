//! Common test utilities: a scripted `adb`, a local collector, log line builders
#![allow(dead_code)]

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use pagecast::config::Config;
use pagecast::subprocess::MockProcessRunner;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub const RULE: &str = "==========================================";

/// Mock runner answering `adb version`, `adb devices` and `getprop`
pub fn mock_adb(devices: &[&str]) -> MockProcessRunner {
    let listing: String = devices
        .iter()
        .map(|id| format!("{id}\tdevice\n"))
        .collect();

    let mock = MockProcessRunner::new();
    mock.expect_command("adb")
        .with_args(|args| args == ["version"])
        .returns_stdout("Android Debug Bridge version 1.0.41\n")
        .finish();
    mock.expect_command("adb")
        .with_args(|args| args == ["devices"])
        .returns_stdout(&format!("List of devices attached\n{listing}\n"))
        .finish();
    mock.expect_command("adb")
        .with_args(|args| args.last().map(String::as_str) == Some("ro.product.model"))
        .returns_stdout("Pixel 7\n")
        .finish();
    mock.expect_command("adb")
        .with_args(|args| args.last().map(String::as_str) == Some("ro.build.version.release"))
        .returns_stdout("14\n")
        .finish();
    mock
}

/// Matches a logcat command for `device_id`
pub fn for_device(device_id: &str) -> impl Fn(&[String]) -> bool + Send + Sync + 'static {
    let device_id = device_id.to_string();
    move |args: &[String]| args.get(1) == Some(&device_id) && args.get(2).map(String::as_str) == Some("logcat")
}

/// A message as logcat prints it in `threadtime` format
pub fn threadtime(message: &str) -> String {
    format!("03-14 09:26:53.123  4321  4350 D OptimizedCarrefour: {message}")
}

pub fn product_lines(n: usize) -> Vec<String> {
    (1..=n)
        .map(|i| format!("Produit {i}: article en promotion cette semaine"))
        .collect()
}

/// A rule-delimited page: rule, `marker`, nine body lines, rule
pub fn rule_page(marker: &str, body: &[String]) -> Vec<String> {
    let mut messages = vec![RULE.to_string(), marker.to_string()];
    messages.extend(body.iter().cloned());
    messages.push(RULE.to_string());
    messages.iter().map(|m| threadtime(m)).collect()
}

pub fn test_config(collector_url: Option<&str>) -> Config {
    let mut config = Config::new();
    config.hub.host = "127.0.0.1".to_string();
    config.hub.port = 0;
    config.device.discovery_interval = Duration::ZERO;
    config.collector.timeout = Duration::from_secs(2);
    match collector_url {
        Some(url) => config.collector.base_url = url.to_string(),
        None => config.collector.enabled = false,
    }
    config
}

#[derive(Debug, Clone)]
pub struct Received {
    pub path: String,
    pub body: Value,
}

#[derive(Clone)]
struct CollectorState {
    received: Arc<Mutex<Vec<Received>>>,
    status: StatusCode,
}

/// In-process page collector
pub struct Collector {
    pub base_url: String,
    received: Arc<Mutex<Vec<Received>>>,
    shutdown: CancellationToken,
}

impl Collector {
    /// Start a collector answering every POST with `status`
    pub async fn spawn(status: StatusCode) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/carrefour-page", post(record))
            .route("/api/carrefour-visual", post(record))
            .route("/api/carrefour-pages", get(|| async { Json(json!([])) }))
            .with_state(CollectorState {
                received: Arc::clone(&received),
                status,
            });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();

        let stop = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
                .unwrap();
        });

        Self {
            base_url,
            received,
            shutdown,
        }
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn record(
    State(state): State<CollectorState>,
    uri: Uri,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut received = state.received.lock().unwrap();
    received.push(Received {
        path: uri.path().to_string(),
        body,
    });
    let page_id = received.len();
    (state.status, Json(json!({ "pageId": page_id })))
}

/// Poll `condition` every 10ms for up to five seconds
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
