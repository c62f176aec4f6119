//! Core service directory functionality
//!
//! This library provides:
//! - Watch registry dispatching directory events to matching watchers
//! - Query matching over service record fields
//! - Connection handles with disconnect hooks
//! - In-memory service directory driving watcher notifications

pub mod connection;
pub mod directory;
pub mod error;
pub mod matcher;
pub mod metrics;
pub mod watcher;

pub use connection::{Connection, ConnectionId, DisconnectHook, Session};
pub use directory::{Registration, ServiceDirectory};
pub use error::{CoreError, Result};
pub use matcher::matches;
pub use metrics::WatchMetrics;
pub use watcher::{callback, WatchCallback, WatchId, WatcherHub};
