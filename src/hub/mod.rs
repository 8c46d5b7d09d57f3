//! Realtime fan-out of completed pages.
//!
//! [`BroadcastHub`] owns the subscriber set and the most recent page. Pushes
//! never block: every subscriber has a bounded queue and a push into a full or
//! closed queue removes that subscriber. The network side lives in
//! [`server`].

pub mod server;

pub use server::HubServer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::capture::Page;
use crate::error::Error;

/// Server-to-client envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    PageUpdate {
        data: Arc<Page>,
        timestamp: DateTime<Utc>,
    },
}

impl HubMessage {
    pub fn page_update(page: Arc<Page>) -> Self {
        HubMessage::PageUpdate {
            data: page,
            timestamp: Utc::now(),
        }
    }
}

/// Receiving side handed to a connection
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub receiver: mpsc::Receiver<HubMessage>,
}

struct SubscriberSlot {
    connected_at: DateTime<Utc>,
    sender: mpsc::Sender<HubMessage>,
}

#[derive(Default)]
struct HubState {
    latest: Option<Arc<Page>>,
    subscribers: HashMap<Uuid, SubscriberSlot>,
}

pub struct BroadcastHub {
    state: Mutex<HubState>,
    queue_capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. The latest page, if any, is queued for it alone.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let id = Uuid::new_v4();
        let connected_at = Utc::now();

        let mut state = self.lock();
        if let Some(page) = &state.latest {
            // Fresh queue with capacity >= 1, cannot be full
            let _ = sender.try_send(HubMessage::page_update(Arc::clone(page)));
        }
        state.subscribers.insert(
            id,
            SubscriberSlot {
                connected_at,
                sender,
            },
        );
        tracing::info!(
            "Subscriber {} connected ({} total)",
            id,
            state.subscribers.len()
        );

        Subscription {
            id,
            connected_at,
            receiver,
        }
    }

    /// Store `page` as the latest and push it to every subscriber.
    ///
    /// Returns the number of subscribers that accepted the push.
    pub fn publish(&self, page: Arc<Page>) -> usize {
        let message = HubMessage::page_update(Arc::clone(&page));

        let mut state = self.lock();
        state.latest = Some(page);
        state.subscribers.retain(|id, slot| match slot.sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(e) => {
                let err = Error::SubscriberPush(id.to_string());
                tracing::warn!(
                    "{} ({}), connected since {}; unregistering",
                    err,
                    e,
                    slot.connected_at.to_rfc3339()
                );
                false
            }
        });
        state.subscribers.len()
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.lock().subscribers.remove(&id).is_some();
        if removed {
            tracing::info!("Subscriber {} disconnected", id);
        }
        removed
    }

    pub fn latest(&self) -> Option<Arc<Page>> {
        self.lock().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ContentKind;
    use crate::device::Device;

    fn page(content: &str) -> Arc<Page> {
        Arc::new(Page::new(
            &Device::new("emulator-5554", "sdk", "14"),
            ContentKind::Document,
            content,
        ))
    }

    fn data(message: HubMessage) -> Arc<Page> {
        match message {
            HubMessage::PageUpdate { data, .. } => data,
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = BroadcastHub::new(4);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        let p = page("Hello");
        assert_eq!(hub.publish(Arc::clone(&p)), 2);

        assert_eq!(data(a.receiver.recv().await.unwrap()), p);
        assert_eq!(data(b.receiver.recv().await.unwrap()), p);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_page_only() {
        let hub = BroadcastHub::new(4);
        assert!(hub.latest().is_none());

        hub.publish(page("first"));
        let last = page("second");
        hub.publish(Arc::clone(&last));

        let mut late = hub.subscribe();
        assert_eq!(data(late.receiver.recv().await.unwrap()), last);
        assert!(late.receiver.try_recv().is_err());
        assert_eq!(hub.latest(), Some(last));
    }

    #[test]
    fn test_empty_hub_sends_no_catch_up() {
        let hub = BroadcastHub::new(4);
        let mut sub = hub.subscribe();
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn test_failed_push_unregisters_only_that_subscriber() {
        let hub = BroadcastHub::new(1);
        let closed = hub.subscribe();
        let mut stalled = hub.subscribe();
        let mut healthy = hub.subscribe();
        drop(closed.receiver);

        assert_eq!(hub.publish(page("one")), 2);
        assert!(healthy.receiver.try_recv().is_ok());

        // `stalled` never drains its queue of one
        assert_eq!(hub.publish(page("two")), 1);
        assert_eq!(hub.subscriber_count(), 1);
        assert!(healthy.receiver.try_recv().is_ok());
        assert!(stalled.receiver.try_recv().is_ok());
        assert!(!hub.unsubscribe(stalled.id));
        assert!(hub.unsubscribe(healthy.id));
    }

    #[test]
    fn test_envelope_shape() {
        let json = serde_json::to_value(HubMessage::page_update(page("Hello"))).unwrap();
        assert_eq!(json["type"], "page_update");
        assert_eq!(json["data"]["content"], "Hello");
        assert_eq!(json["data"]["contentKind"], "document");
        assert!(json["timestamp"].is_string());
    }
}
