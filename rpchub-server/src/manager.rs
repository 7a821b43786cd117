//! The server-side connection registry and its background scavenger.
//!
//! `ConnectionManager` mints connections, hands their transport-facing
//! duplex half back to the caller (an `axum` handshake handler, typically),
//! and periodically reclaims connections nobody has touched in a while.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use rpchub_core::{create_connection_pair, DuplexHalf, PipeOptions};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ManagerError;
use crate::record::{ConnectionRecord, ConnectionStatus};
use crate::telemetry::{ManagerTelemetry, NoopTelemetry};

/// Tick cadence and idle threshold for the background scavenger.
///
/// Resolves the "should the idle threshold be configurable" question as
/// yes: the default matches the hard-coded 5 seconds, but a caller that
/// wants a tighter or looser reap window can construct its own.
#[derive(Debug, Clone, Copy)]
pub struct ScavengerConfig {
    pub tick_interval: Duration,
    pub idle_threshold: Duration,
}

impl Default for ScavengerConfig {
    fn default() -> Self {
        ScavengerConfig {
            tick_interval: Duration::from_secs(1),
            idle_threshold: Duration::from_secs(5),
        }
    }
}

/// Server-side connection registry: mints ids, hands transports back a
/// duplex half, and reclaims connections the scavenger finds idle.
pub struct ConnectionManager {
    connections: StdMutex<HashMap<Uuid, Arc<ConnectionRecord>>>,
    /// Non-blocking try-lock target serializing the scavenger against
    /// `close_connections`; at most one of the two may be mid-pass.
    execution_lock: AsyncMutex<()>,
    disposed: AtomicBool,
    scavenger: StdMutex<Option<JoinHandle<()>>>,
    config: ScavengerConfig,
    telemetry: Arc<dyn ManagerTelemetry>,
}

impl ConnectionManager {
    pub fn new(config: ScavengerConfig) -> Arc<Self> {
        Self::with_telemetry(config, Arc::new(NoopTelemetry))
    }

    pub fn with_telemetry(config: ScavengerConfig, telemetry: Arc<dyn ManagerTelemetry>) -> Arc<Self> {
        Arc::new(ConnectionManager {
            connections: StdMutex::new(HashMap::new()),
            execution_lock: AsyncMutex::new(()),
            disposed: AtomicBool::new(false),
            scavenger: StdMutex::new(None),
            config,
            telemetry,
        })
    }

    /// Mints a unique id, allocates a fresh duplex pair, and registers the
    /// record. Returns the transport-facing half for the caller to bridge
    /// to the network. Fails if the manager has already been disposed.
    pub fn create_connection(
        &self,
        transport_opts: PipeOptions,
        application_opts: PipeOptions,
    ) -> Result<(Uuid, DuplexHalf, Arc<ConnectionRecord>), ManagerError> {
        if self.is_disposed() {
            return Err(ManagerError::Disposed);
        }
        let id = Uuid::new_v4();
        let (transport, application) = create_connection_pair(transport_opts, application_opts);
        let record = Arc::new(ConnectionRecord::new(id, application));
        self.connections.lock().unwrap().insert(id, record.clone());
        info!(connection.id = %id, "connection created");
        Ok((id, transport, record))
    }

    pub fn try_get_connection(&self, id: Uuid) -> Option<Arc<ConnectionRecord>> {
        self.connections.lock().unwrap().get(&id).cloned()
    }

    /// Like [`try_get_connection`](Self::try_get_connection), but reports
    /// which id was missing instead of collapsing it to `None`.
    pub fn get_connection(&self, id: Uuid) -> Result<Arc<ConnectionRecord>, ManagerError> {
        self.try_get_connection(id).ok_or(ManagerError::UnknownConnection(id))
    }

    pub fn remove_connection(&self, id: Uuid) -> Option<Arc<ConnectionRecord>> {
        let removed = self.connections.lock().unwrap().remove(&id);
        if removed.is_some() {
            self.telemetry.connection_removed(id);
            info!(connection.id = %id, "connection removed");
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn feature(&self, id: Uuid, key: &str) -> Option<Value> {
        self.try_get_connection(id)?.feature(key)
    }

    /// Starts the scavenger. Idempotent: a second call while it is already
    /// running is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut scavenger = self.scavenger.lock().unwrap();
        if scavenger.is_some() {
            return;
        }
        let manager = self.clone();
        *scavenger = Some(tokio::spawn(async move { manager.scavenger_loop().await }));
    }

    async fn scavenger_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.tick_interval).await;

            let Ok(_guard) = self.execution_lock.try_lock() else {
                // A pass (or close_connections) is already in flight — skip
                // this tick rather than stack up concurrent passes.
                continue;
            };

            let started = Instant::now();
            let snapshot: Vec<(Uuid, Arc<ConnectionRecord>)> = self
                .connections
                .lock()
                .unwrap()
                .iter()
                .map(|(id, record)| (*id, record.clone()))
                .collect();

            for (id, record) in snapshot {
                let (status, last_seen) = record.snapshot();
                if status == ConnectionStatus::Inactive && last_seen.elapsed() > self.config.idle_threshold {
                    let manager = self.clone();
                    tokio::spawn(async move {
                        manager.dispose_and_remove(id).await;
                    });
                } else {
                    record.tick_heartbeat();
                }
            }

            let elapsed = started.elapsed();
            self.telemetry.scavenger_pass(elapsed);
            debug!(elapsed_ms = elapsed.as_millis() as u64, "scavenger pass complete");
        }
    }

    /// Disposes the connection then removes it from the registry.
    /// Removal always occurs, even if disposal itself failed. A no-op if
    /// `id` isn't registered.
    pub async fn dispose_and_remove(&self, id: Uuid) {
        let record = match self.get_connection(id) {
            Ok(record) => record,
            Err(ManagerError::UnknownConnection(id)) => {
                debug!(connection.id = %id, "dispose requested for an unregistered connection");
                return;
            }
            Err(ManagerError::Disposed) => return,
        };
        match record.dispose().await {
            Ok(()) => {}
            Err(rpchub_core::HubError::Transport(reason)) => {
                debug!(connection.id = %id, reason = %reason, "connection reset while disposing");
            }
            Err(e) => {
                error!(connection.id = %id, error = %e, "failed to dispose connection");
            }
        }
        self.remove_connection(id);
    }

    /// Marks the manager disposed, stops the scavenger, and concurrently
    /// disposes every remaining connection, waiting at most 5 seconds
    /// total before abandoning stragglers.
    pub async fn close_connections(&self) {
        let _guard = self.execution_lock.lock().await;
        self.disposed.store(true, Ordering::SeqCst);

        if let Some(handle) = self.scavenger.lock().unwrap().take() {
            handle.abort();
        }

        let ids: Vec<Uuid> = self.connections.lock().unwrap().keys().copied().collect();
        let dispose_all = futures::future::join_all(ids.into_iter().map(|id| self.dispose_and_remove(id)));

        if tokio::time::timeout(Duration::from_secs(5), dispose_all).await.is_err() {
            warn!("close_connections timed out after 5s; remaining connections abandoned");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
