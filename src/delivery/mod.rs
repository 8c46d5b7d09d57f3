//! Delivery of completed pages to the HTTP collector

pub mod forwarder;
pub mod queue;

pub use forwarder::{Forwarder, PageSink};
pub use queue::{spawn_delivery_task, DeliveryQueue, DeliveryStats};
