//! Telemetry sink injected into the manager rather than a process-wide
//! singleton, so tests and embedders can observe (or ignore) scavenger and
//! lifecycle events without reaching for global state.

use std::time::Duration;

use uuid::Uuid;

/// Observes [`crate::manager::ConnectionManager`] lifecycle events.
/// Implement this to wire the manager into whatever metrics sink the host
/// application already uses; every method has a default no-op body so
/// implementers only override what they care about.
pub trait ManagerTelemetry: Send + Sync {
    fn connection_removed(&self, _id: Uuid) {}
    fn scavenger_pass(&self, _elapsed: Duration) {}
}

/// Discards every event. The default when no telemetry is configured.
pub struct NoopTelemetry;

impl ManagerTelemetry for NoopTelemetry {}
