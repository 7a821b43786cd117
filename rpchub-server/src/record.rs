//! The server-side connection record: per-connection state the manager
//! and scavenger track between handshake and teardown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use rpchub_core::{DuplexHalf, HubError};
use serde_json::Value;
use uuid::Uuid;

/// Liveness as tracked by the scavenger, not the raw socket state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Active,
    Inactive,
}

struct RecordState {
    status: ConnectionStatus,
    last_seen: Instant,
}

/// Everything the manager and scavenger need about one live connection.
///
/// `application` is the application-facing half of the duplex pair minted
/// at creation; the other half (`transport`) is handed to whatever
/// network loop is bridging this connection, so the manager never touches
/// sockets directly.
pub struct ConnectionRecord {
    pub id: Uuid,
    pub application: DuplexHalf,
    state: Mutex<RecordState>,
    features: Mutex<HashMap<String, Value>>,
}

impl ConnectionRecord {
    pub fn new(id: Uuid, application: DuplexHalf) -> Self {
        ConnectionRecord {
            id,
            application,
            state: Mutex::new(RecordState {
                status: ConnectionStatus::Active,
                last_seen: Instant::now(),
            }),
            features: Mutex::new(HashMap::new()),
        }
    }

    /// Record observed traffic: marks `Active` and resets the idle clock.
    /// Called by whatever reads bytes off this connection's transport
    /// half, never by the scavenger itself.
    pub fn touch(&self) {
        let mut state = self.state.lock().unwrap();
        state.status = ConnectionStatus::Active;
        state.last_seen = Instant::now();
    }

    /// Arms the idle clock for a connection the scavenger chose not to
    /// dispose this pass. Only demotes `Active` to `Inactive`; it never
    /// touches `last_seen`, which only [`touch`](Self::touch) resets. A
    /// connection therefore survives one full scavenger interval without
    /// traffic before it becomes eligible for disposal.
    pub fn tick_heartbeat(&self) {
        let mut state = self.state.lock().unwrap();
        if state.status == ConnectionStatus::Active {
            state.status = ConnectionStatus::Inactive;
        }
    }

    /// Snapshot status and the last-seen instant without holding the lock
    /// past the read.
    pub fn snapshot(&self) -> (ConnectionStatus, Instant) {
        let state = self.state.lock().unwrap();
        (state.status, state.last_seen)
    }

    pub fn set_feature(&self, key: impl Into<String>, value: Value) {
        self.features.lock().unwrap().insert(key.into(), value);
    }

    pub fn feature(&self, key: &str) -> Option<Value> {
        self.features.lock().unwrap().get(key).cloned()
    }

    /// Tears down this connection: completes the application writer so
    /// anything still reading `application.input` observes the close.
    pub async fn dispose(&self) -> Result<(), HubError> {
        self.application.output.complete(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpchub_core::{create_connection_pair, PipeOptions};

    fn any_record() -> ConnectionRecord {
        let (_transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        ConnectionRecord::new(Uuid::nil(), application)
    }

    #[test]
    fn starts_active() {
        let record = any_record();
        assert_eq!(record.snapshot().0, ConnectionStatus::Active);
    }

    #[test]
    fn heartbeat_demotes_active_but_not_already_inactive() {
        let record = any_record();
        record.tick_heartbeat();
        assert_eq!(record.snapshot().0, ConnectionStatus::Inactive);

        let before = record.snapshot().1;
        record.tick_heartbeat();
        assert_eq!(record.snapshot().0, ConnectionStatus::Inactive);
        assert_eq!(record.snapshot().1, before);
    }

    #[test]
    fn touch_reactivates_and_resets_the_clock() {
        let record = any_record();
        record.tick_heartbeat();
        assert_eq!(record.snapshot().0, ConnectionStatus::Inactive);

        record.touch();
        assert_eq!(record.snapshot().0, ConnectionStatus::Active);
    }

    #[test]
    fn feature_bag_round_trips() {
        let record = any_record();
        assert_eq!(record.feature("room"), None);
        record.set_feature("room", Value::String("lobby".into()));
        assert_eq!(record.feature("room"), Some(Value::String("lobby".into())));
    }

    #[tokio::test]
    async fn dispose_completes_the_application_writer() {
        let (transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        let record = ConnectionRecord::new(Uuid::nil(), application);
        record.dispose().await.unwrap();

        match transport.input.read_available().await.unwrap() {
            rpchub_core::ReadResult::Completed => {}
            rpchub_core::ReadResult::Data(_) => panic!("expected completion"),
        }
    }
}
