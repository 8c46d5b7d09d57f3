//! Bounded per-device delivery queue.
//!
//! Workers push completed pages without waiting; a dedicated task drains the
//! queue into a [`PageSink`]. When the queue is full the oldest pending page is
//! dropped. A closed queue is drained before the task exits; a cancelled one
//! is abandoned.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::forwarder::PageSink;
use crate::capture::Page;

pub struct DeliveryQueue {
    pending: Mutex<VecDeque<Arc<Page>>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicUsize,
    closed: AtomicBool,
}

impl DeliveryQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            dropped: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Page>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a page; returns the page that was evicted to make room
    pub fn push(&self, page: Arc<Page>) -> Option<Arc<Page>> {
        let evicted = {
            let mut pending = self.lock();
            let evicted = if pending.len() >= self.capacity {
                pending.pop_front()
            } else {
                None
            };
            pending.push_back(page);
            evicted
        };

        if let Some(old) = &evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                "Delivery queue full: dropped oldest page {} from {}",
                old.id,
                old.device_id
            );
        }
        self.notify.notify_one();
        evicted
    }

    /// No more pages will be pushed; the consumer stops once the queue is empty
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Next page, or `None` once `cancel` fires or the closed queue is empty
    pub async fn pop(&self, cancel: &CancellationToken) -> Option<Arc<Page>> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }
            if let Some(page) = self.lock().pop_front() {
                return Some(page);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = self.notify.notified() => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Pages evicted because the queue was full
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub delivered: usize,
    pub failed: usize,
    /// Evicted while full plus still queued at shutdown
    pub dropped: usize,
}

impl std::ops::Add for DeliveryStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            delivered: self.delivered + other.delivered,
            failed: self.failed + other.failed,
            dropped: self.dropped + other.dropped,
        }
    }
}

/// Drain `queue` into `sink` until it is closed and empty, or `cancel` fires.
///
/// A delivery already in flight when `cancel` fires is allowed to finish;
/// pages still queued are dropped.
pub fn spawn_delivery_task(
    device_id: String,
    queue: Arc<DeliveryQueue>,
    sink: Arc<dyn PageSink>,
    cancel: CancellationToken,
) -> JoinHandle<DeliveryStats> {
    tokio::spawn(async move {
        let mut stats = DeliveryStats::default();

        while let Some(page) = queue.pop(&cancel).await {
            match sink.deliver(&page).await {
                Ok(_) => stats.delivered += 1,
                Err(_) => stats.failed += 1,
            }
        }

        let abandoned = queue.len();
        if abandoned > 0 {
            tracing::debug!(
                "[{}] dropping {} queued deliveries at shutdown",
                device_id,
                abandoned
            );
        }
        stats.dropped = queue.dropped() + abandoned;
        tracing::debug!("[{}] delivery task finished: {:?}", device_id, stats);
        stats
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ContentKind;
    use crate::device::Device;
    use crate::error::{Error, Result};
    use async_trait::async_trait;

    fn page(content: &str) -> Arc<Page> {
        Arc::new(Page::new(
            &Device::new("emulator-5554", "sdk", "14"),
            ContentKind::Document,
            content,
        ))
    }

    #[derive(Default)]
    struct RecordingSink {
        delivered: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl PageSink for RecordingSink {
        async fn deliver(&self, page: &Page) -> Result<Option<String>> {
            if self.fail_on == Some(page.content.as_str()) {
                return Err(Error::forward(page.id, "HTTP 500"));
            }
            self.delivered.lock().unwrap().push(page.content.clone());
            Ok(None)
        }
    }

    /// Blocks every delivery until released
    #[derive(Default)]
    struct GatedSink {
        started: Notify,
        release: Notify,
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl PageSink for GatedSink {
        async fn deliver(&self, _page: &Page) -> Result<Option<String>> {
            self.started.notify_one();
            self.release.notified().await;
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let queue = DeliveryQueue::new(2);
        assert!(queue.push(page("a")).is_none());
        assert!(queue.push(page("b")).is_none());

        let evicted = queue.push(page("c")).unwrap();
        assert_eq!(evicted.content, "a");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_pages_delivered_in_order_and_failures_do_not_stop_the_task() {
        let queue = Arc::new(DeliveryQueue::new(8));
        let sink = Arc::new(RecordingSink {
            fail_on: Some("b"),
            ..Default::default()
        });
        let task = spawn_delivery_task(
            "emulator-5554".into(),
            Arc::clone(&queue),
            sink.clone(),
            CancellationToken::new(),
        );

        for content in ["a", "b", "c"] {
            queue.push(page(content));
            tokio::task::yield_now().await;
        }
        queue.close();

        let stats = task.await.unwrap();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_shutdown_finishes_in_flight_and_drops_queued() {
        let queue = Arc::new(DeliveryQueue::new(8));
        let sink = Arc::new(GatedSink::default());
        let cancel = CancellationToken::new();

        for content in ["a", "b", "c"] {
            queue.push(page(content));
        }
        let task = spawn_delivery_task(
            "emulator-5554".into(),
            Arc::clone(&queue),
            sink.clone(),
            cancel.clone(),
        );

        sink.started.notified().await;
        cancel.cancel();
        sink.release.notify_one();

        let stats = task.await.unwrap();
        assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.dropped, 2);
    }

    #[tokio::test]
    async fn test_closed_queue_is_drained_before_exit() {
        let queue = Arc::new(DeliveryQueue::new(8));
        let sink = Arc::new(RecordingSink::default());

        queue.push(page("a"));
        queue.push(page("b"));
        queue.close();

        let stats = spawn_delivery_task(
            "emulator-5554".into(),
            Arc::clone(&queue),
            sink.clone(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 0);
        assert_eq!(*sink.delivered.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_pop_is_woken_by_push() {
        let queue = DeliveryQueue::new(1);
        let cancel = CancellationToken::new();

        let mut pop = tokio_test::task::spawn(queue.pop(&cancel));
        tokio_test::assert_pending!(pop.poll());

        queue.push(page("a"));
        assert!(pop.is_woken());
        let next = tokio_test::assert_ready!(pop.poll());
        assert_eq!(next.unwrap().content, "a");
    }

    #[test]
    fn test_pop_returns_none_once_cancelled() {
        let queue = DeliveryQueue::new(1);
        let cancel = CancellationToken::new();

        let mut pop = tokio_test::task::spawn(queue.pop(&cancel));
        tokio_test::assert_pending!(pop.poll());

        cancel.cancel();
        assert!(tokio_test::assert_ready!(pop.poll()).is_none());
    }

    #[tokio::test]
    async fn test_pop_waits_for_push() {
        let queue = Arc::new(DeliveryQueue::new(1));
        let cancel = CancellationToken::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.pop(&cancel).await })
        };
        tokio::task::yield_now().await;
        queue.push(page("late"));

        assert_eq!(waiter.await.unwrap().unwrap().content, "late");
    }
}
