//! Per-device pipeline: log stream, parser, segmenter, classifier, delivery.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::capture::{
    is_deliverable, Capture, ContentClassifier, Page, PageSegmenter, SegmenterSettings,
};
use crate::delivery::{spawn_delivery_task, DeliveryQueue, DeliveryStats, PageSink};
use crate::device::{Device, DeviceRegistry};
use crate::hub::BroadcastHub;
use crate::stream::{LineParser, StreamEvent, StreamReader};

/// Everything a worker needs, shared by all workers
pub struct PipelineContext {
    pub registry: DeviceRegistry,
    pub reader: StreamReader,
    pub parser: LineParser,
    pub segmenter: SegmenterSettings,
    pub classifier: ContentClassifier,
    /// Classified content at or below this many characters is discarded
    pub min_content_chars: usize,
    pub sink: Option<Arc<dyn PageSink>>,
    pub hub: Option<Arc<BroadcastHub>>,
    pub queue_capacity: usize,
    pub close_grace: Duration,
}

/// Why a worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    StreamEnded,
    StreamFailed(String),
    Unavailable(String),
}

/// Outcome of the worker runs for one device
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub device_id: String,
    /// Worker runs folded into this report
    pub runs: usize,
    pub pages: usize,
    /// Exit of the most recent run
    pub exit: WorkerExit,
    pub delivery: Option<DeliveryStats>,
}

impl WorkerReport {
    /// Fold a later run of the same device into this report
    pub fn absorb(&mut self, later: WorkerReport) {
        self.runs += later.runs;
        self.pages += later.pages;
        self.exit = later.exit;
        self.delivery = match (self.delivery, later.delivery) {
            (Some(earlier), Some(later)) => Some(earlier + later),
            (earlier, later) => earlier.or(later),
        };
    }
}

struct Delivery {
    queue: Arc<DeliveryQueue>,
    task: tokio::task::JoinHandle<DeliveryStats>,
}

pub struct DeviceWorker {
    device_id: String,
    context: Arc<PipelineContext>,
}

impl DeviceWorker {
    pub fn new(device_id: impl Into<String>, context: Arc<PipelineContext>) -> Self {
        Self {
            device_id: device_id.into(),
            context,
        }
    }

    /// Run until the stream ends or `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> WorkerReport {
        let ctx = Arc::clone(&self.context);
        let device = ctx.registry.describe(&self.device_id).await;
        tracing::info!("Capturing from {} ({})", device.display_name, device.id);

        let mut stream = match ctx.reader.open(&device.id, ctx.parser.tags()).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("{}", e);
                return WorkerReport {
                    device_id: self.device_id,
                    runs: 1,
                    pages: 0,
                    exit: WorkerExit::Unavailable(e.to_string()),
                    delivery: None,
                };
            }
        };

        let delivery = ctx.sink.as_ref().map(|sink| {
            let queue = Arc::new(DeliveryQueue::new(ctx.queue_capacity));
            let task = spawn_delivery_task(
                device.id.clone(),
                Arc::clone(&queue),
                Arc::clone(sink),
                cancel.child_token(),
            );
            Delivery { queue, task }
        });

        let mut segmenter = PageSegmenter::new(&device.id, ctx.segmenter);
        let mut pages = 0;

        let exit = loop {
            let capture = match stream.next_line(segmenter.deadline(), &cancel).await {
                Ok(StreamEvent::Line(raw)) => match ctx.parser.parse(&raw) {
                    Some(line) => segmenter.feed(&line.message, Instant::now()),
                    None => continue,
                },
                Ok(StreamEvent::Timeout) => segmenter.poll(Instant::now()),
                Ok(StreamEvent::Cancelled) => break WorkerExit::Cancelled,
                Ok(StreamEvent::EndOfStream) => {
                    tracing::warn!("Log stream for {} ended", device.display_name);
                    break WorkerExit::StreamEnded;
                }
                Err(e) => {
                    tracing::warn!("{}", e);
                    break WorkerExit::StreamFailed(e.to_string());
                }
            };

            if let Some(capture) = capture {
                if dispatch(&ctx, &device, capture, delivery.as_ref()) {
                    pages += 1;
                }
            }
        };

        segmenter.reset();
        if let Err(e) = stream.close(ctx.close_grace).await {
            tracing::debug!("Closing log stream for {} failed: {}", device.id, e);
        }

        let delivery = match delivery {
            Some(delivery) => {
                // After a stream end the backlog is still delivered; on
                // shutdown the cancelled token abandons it.
                delivery.queue.close();
                let stats = delivery.task.await.unwrap_or_else(|e| {
                    tracing::error!("Delivery task for {} panicked: {}", device.id, e);
                    DeliveryStats::default()
                });
                Some(stats)
            }
            None => None,
        };

        tracing::info!(
            "Worker for {} stopped ({:?}) after {} pages",
            device.display_name,
            exit,
            pages
        );
        WorkerReport {
            device_id: self.device_id,
            runs: 1,
            pages,
            exit,
            delivery,
        }
    }
}

/// Classify a capture and hand the page to the hub and the delivery queue
fn dispatch(
    ctx: &PipelineContext,
    device: &Device,
    capture: Capture,
    delivery: Option<&Delivery>,
) -> bool {
    let Some((kind, content)) = ctx.classifier.classify(&capture.text) else {
        tracing::debug!(
            "[{}] capture of {} lines has no recognisable content",
            device.id,
            capture.line_count
        );
        return false;
    };
    if !is_deliverable(&content, ctx.min_content_chars) {
        tracing::debug!(
            "[{}] {} page of {} chars is too short, discarded",
            device.id,
            kind,
            content.chars().count()
        );
        return false;
    }

    let page = Arc::new(Page::new(device, kind, content));
    tracing::info!(
        "Captured {} page from {} ({} chars, {:?})",
        page.content_kind,
        device.display_name,
        page.content.chars().count(),
        capture.reason
    );

    if let Some(hub) = &ctx.hub {
        let reached = hub.publish(Arc::clone(&page));
        tracing::debug!("Page {} pushed to {} subscribers", page.id, reached);
    }
    if let Some(delivery) = delivery {
        delivery.queue.push(page);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{CloseReason, ContentKind};
    use crate::config::DeviceConfig;
    use crate::device::Adb;
    use crate::subprocess::{MockProcessRunner, ProcessRunner};

    fn context(hub: &Arc<BroadcastHub>) -> PipelineContext {
        let runner: Arc<dyn ProcessRunner> = Arc::new(MockProcessRunner::new());
        let config = DeviceConfig::default();
        PipelineContext {
            registry: DeviceRegistry::new(Arc::clone(&runner), &config),
            reader: StreamReader::new(runner, Adb::from_config(&config)),
            parser: LineParser::new(config.tags.iter().cloned()),
            segmenter: SegmenterSettings::default(),
            classifier: ContentClassifier::default(),
            min_content_chars: 100,
            sink: None,
            hub: Some(Arc::clone(hub)),
            queue_capacity: 4,
            close_grace: Duration::from_secs(1),
        }
    }

    fn delivery() -> Delivery {
        Delivery {
            queue: Arc::new(DeliveryQueue::new(4)),
            task: tokio::spawn(async { DeliveryStats::default() }),
        }
    }

    fn capture(text: String) -> Capture {
        Capture {
            text,
            line_count: 2,
            reason: CloseReason::GraceElapsed,
        }
    }

    fn device() -> Device {
        Device::new("emulator-5554", "Pixel 7", "14")
    }

    #[test]
    fn test_absorb_folds_later_run() {
        let stats = DeliveryStats {
            delivered: 2,
            failed: 1,
            dropped: 0,
        };
        let mut report = WorkerReport {
            device_id: "emulator-5554".into(),
            runs: 1,
            pages: 3,
            exit: WorkerExit::StreamEnded,
            delivery: Some(stats),
        };
        report.absorb(WorkerReport {
            device_id: "emulator-5554".into(),
            runs: 1,
            pages: 1,
            exit: WorkerExit::Cancelled,
            delivery: Some(stats),
        });
        report.absorb(WorkerReport {
            device_id: "emulator-5554".into(),
            runs: 1,
            pages: 0,
            exit: WorkerExit::Unavailable("offline".into()),
            delivery: None,
        });

        assert_eq!(report.runs, 3);
        assert_eq!(report.pages, 4);
        assert_eq!(report.exit, WorkerExit::Unavailable("offline".into()));
        assert_eq!(
            report.delivery,
            Some(DeliveryStats {
                delivered: 4,
                failed: 2,
                dropped: 0,
            })
        );
    }

    #[tokio::test]
    async fn test_marker_with_short_body_is_discarded() {
        let hub = Arc::new(BroadcastHub::new(4));
        let ctx = context(&hub);
        let delivery = delivery();

        let text = format!("📄 PAGE CARREFOUR\n{}", "x".repeat(90));
        assert!(text.chars().count() > 100);

        assert!(!dispatch(&ctx, &device(), capture(text), Some(&delivery)));
        assert!(hub.latest().is_none());
        assert!(delivery.queue.is_empty());
    }

    #[tokio::test]
    async fn test_long_enough_content_reaches_hub_and_queue() {
        let hub = Arc::new(BroadcastHub::new(4));
        let ctx = context(&hub);
        let delivery = delivery();
        let body = "x".repeat(101);

        let text = format!("📄 PAGE CARREFOUR\n{body}");
        assert!(dispatch(&ctx, &device(), capture(text), Some(&delivery)));

        let latest = hub.latest().unwrap();
        assert_eq!(latest.content, body);
        assert_eq!(latest.content_kind, ContentKind::Document);
        assert_eq!(delivery.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_short_page_after_grace_is_not_delivered() {
        let hub = Arc::new(BroadcastHub::new(4));
        let ctx = context(&hub);
        let mut segmenter = PageSegmenter::new("emulator-5554", ctx.segmenter);
        let now = Instant::now();

        segmenter.feed("📄 PAGE CARREFOUR", now);
        segmenter.feed("short", now);
        let capture = segmenter.poll(now + Duration::from_secs(1)).unwrap();

        assert_eq!(
            ctx.classifier.classify(&capture.text),
            Some((ContentKind::Document, "short".to_string()))
        );
        assert!(!dispatch(&ctx, &device(), capture, None));
        assert!(hub.latest().is_none());
    }
}
