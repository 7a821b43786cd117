//! The hub invocation layer: matches server replies to pending client
//! calls and routes server-initiated invocations to registered
//! handlers.
//!
//! This is the layer `HubConnection::invoke` and `HubConnection::on`
//! build on; it knows nothing about transports or wire bytes, only
//! `HubMessage` values and id bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rpchub_core::HubMessage;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::error::ConnectionError;

type PendingTx = oneshot::Sender<Result<Option<Value>, ConnectionError>>;
type Handler = Arc<dyn Fn(Vec<Value>) + Send + Sync>;

/// Pending-call table plus the server-target handler registry.
pub struct HubInvocations {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingTx>>,
    streams: Mutex<HashMap<String, mpsc::UnboundedSender<Value>>>,
    handlers: Mutex<HashMap<String, Handler>>,
}

impl HubInvocations {
    pub fn new() -> Self {
        HubInvocations {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate the next monotonically increasing invocation id.
    pub fn alloc_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Record a pending unary call, returning the receiver its
    /// `Completion` will resolve.
    pub fn register_pending(&self, id: &str) -> oneshot::Receiver<Result<Option<Value>, ConnectionError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id.to_string(), tx);
        rx
    }

    /// Record a pending streaming call, returning the channel
    /// `StreamItem`s for this id are pushed onto until the matching
    /// `Completion` arrives.
    pub fn register_stream(&self, id: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().unwrap().insert(id.to_string(), tx);
        rx
    }

    /// Register a handler invoked for server-initiated calls to `target`.
    /// A later registration for the same target replaces the former.
    pub fn on(&self, target: impl Into<String>, handler: impl Fn(Vec<Value>) + Send + Sync + 'static) {
        self.handlers.lock().unwrap().insert(target.into(), Arc::new(handler));
    }

    /// Route one incoming message to its pending call, stream, or
    /// handler. Messages with no matching registration are dropped.
    pub fn dispatch(&self, message: HubMessage) {
        match message {
            HubMessage::Invocation { target, arguments, .. } => {
                let handler = self.handlers.lock().unwrap().get(&target).cloned();
                match handler {
                    Some(handler) => handler(arguments),
                    None => tracing::debug!(target = %target, "no handler registered for hub target"),
                }
            }
            HubMessage::StreamItem { invocation_id, item } => {
                let streams = self.streams.lock().unwrap();
                if let Some(tx) = streams.get(&invocation_id) {
                    let _ = tx.send(item);
                }
            }
            HubMessage::Completion { invocation_id, result, error } => {
                self.complete(&invocation_id, result, error);
            }
        }
    }

    fn complete(&self, id: &str, result: Option<Value>, error: Option<String>) {
        let sender = self.pending.lock().unwrap().remove(id);
        self.streams.lock().unwrap().remove(id);
        if let Some(tx) = sender {
            let outcome = match error {
                Some(msg) => Err(ConnectionError::invocation_failed(msg)),
                None => Ok(result),
            };
            let _ = tx.send(outcome);
        }
    }

    /// Drop a single pending call without resolving it — used when the
    /// bytes for an invocation never made it onto the wire, so no
    /// `Completion` will ever arrive for it.
    pub fn cancel(&self, id: &str) {
        self.pending.lock().unwrap().remove(id);
        self.streams.lock().unwrap().remove(id);
    }

    /// Fail every outstanding pending call and stream with `error`.
    /// Called once per lifecycle end, after the transport stops.
    pub fn fail_all(&self, error: ConnectionError) {
        let pending = std::mem::take(&mut *self.pending.lock().unwrap());
        for (_, tx) in pending {
            let _ = tx.send(Err(error.clone()));
        }
        self.streams.lock().unwrap().clear();
    }
}

impl Default for HubInvocations {
    fn default() -> Self {
        Self::new()
    }
}
