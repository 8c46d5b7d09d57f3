//! # pagecast
//!
//! Reconstructs application pages from tag-filtered Android log streams and
//! fans them out to an HTTP collector and to realtime WebSocket subscribers.
//!
//! ## Usage
//!
//! ```bash
//! pagecast [-v] [-c pagecast.toml] run [--collector-url URL] [--hub-port PORT]
//! pagecast devices
//! ```
//!
//! ## Modules
//!
//! - `capture` - Page segmentation state machine and content classification
//! - `config` - Layered configuration (defaults, TOML, environment)
//! - `delivery` - Best-effort collector forwarding behind a drop-oldest queue
//! - `device` - Device enumeration and metadata through `adb`
//! - `error` - Crate-wide error type
//! - `hub` - Subscriber registry, latest-page cache and WebSocket server
//! - `orchestrator` - Per-device worker lifecycle and shutdown
//! - `service` - Fatal startup checks and session teardown
//! - `stream` - Log stream reading and line parsing
//! - `subprocess` - Subprocess abstraction with a scriptable mock for tests
pub mod capture;
pub mod config;
pub mod delivery;
pub mod device;
pub mod error;
pub mod hub;
pub mod orchestrator;
pub mod service;
pub mod stream;
pub mod subprocess;

pub use error::{Error, Result};
