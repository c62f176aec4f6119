//! Prometheus metrics for the watch registry

use crate::Result;
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Prometheus collectors describing watch registry activity
#[derive(Clone)]
pub struct WatchMetrics {
    /// Live watches across all identities
    pub watches: IntGauge,
    /// Callbacks dispatched by notify
    pub notifications_dispatched: IntCounter,
    /// Disconnects that removed at least one watch
    pub disconnect_cleanups: IntCounter,
    /// Prometheus registry for metrics
    pub registry: Arc<Registry>,
}

impl WatchMetrics {
    /// Create a new set of collectors on a private registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let watches = IntGauge::new("directory_watches", "Live directory watches")?;
        let notifications_dispatched = IntCounter::new(
            "directory_notifications_dispatched_total",
            "Watch callbacks dispatched",
        )?;
        let disconnect_cleanups = IntCounter::new(
            "directory_disconnect_cleanups_total",
            "Disconnects that removed watches",
        )?;

        registry.register(Box::new(watches.clone()))?;
        registry.register(Box::new(notifications_dispatched.clone()))?;
        registry.register(Box::new(disconnect_cleanups.clone()))?;

        Ok(Self {
            watches,
            notifications_dispatched,
            disconnect_cleanups,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
