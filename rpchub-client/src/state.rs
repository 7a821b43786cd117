//! The connection state machine and its transition guard.
//!
//! `ConnectionState` is the ordered lifecycle every `HubConnection`
//! walks through. `StateCell` is the synchronization primitive guarding
//! it: a plain mutex for the state field itself, plus a latch recording
//! whether a `Start` is currently in flight so a concurrent `Stop` or
//! `Dispose` can wait for it to settle before touching the transport.

use std::sync::Mutex;

use tokio::sync::Notify;

use crate::error::ConnectionError;

/// The lifecycle of a single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Disposed,
}

struct Inner {
    state: ConnectionState,
    start_in_flight: bool,
}

/// Result of attempting to begin a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// There was nothing running; the caller should treat this as an
    /// already-complete no-op.
    NothingToDo,
    /// The state moved to `Disconnecting`; the caller owns tearing down
    /// the active transport.
    Proceed,
}

/// Guards `ConnectionState` transitions and the start/stop/dispose race.
pub struct StateCell {
    inner: Mutex<Inner>,
    start_settled: Notify,
}

impl StateCell {
    pub fn new() -> Self {
        StateCell {
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                start_in_flight: false,
            }),
            start_settled: Notify::new(),
        }
    }

    pub fn current(&self) -> ConnectionState {
        self.inner.lock().unwrap().state
    }

    /// Enter `Connecting` iff currently `Disconnected`. Marks a start as
    /// in flight so concurrent `Stop`/`Dispose` know to wait.
    pub fn try_begin_start(&self) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ConnectionState::Disposed {
            return Err(ConnectionError::disposed());
        }
        if inner.state != ConnectionState::Disconnected {
            return Err(ConnectionError::cannot_start());
        }
        inner.state = ConnectionState::Connecting;
        inner.start_in_flight = true;
        Ok(())
    }

    /// Settle an in-flight start: `Connected` on success, back to
    /// `Disconnected` on failure. Wakes anyone waiting in
    /// [`wait_for_start_settled`](Self::wait_for_start_settled).
    pub fn finish_start(&self, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = if success {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        };
        inner.start_in_flight = false;
        drop(inner);
        self.start_settled.notify_waiters();
    }

    /// Returns immediately if no start is in flight; otherwise waits for
    /// the running start to settle.
    pub async fn wait_for_start_settled(&self) {
        loop {
            let notified = self.start_settled.notified();
            if !self.inner.lock().unwrap().start_in_flight {
                return;
            }
            notified.await;
        }
    }

    /// Move to `Disconnecting`, but only from `Connecting` or
    /// `Connected` — a `Stop`/`Dispose` against a connection with
    /// nothing running is a no-op, not a phantom transition.
    pub fn begin_disconnecting(&self) -> DisconnectOutcome {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                inner.state = ConnectionState::Disconnecting;
                DisconnectOutcome::Proceed
            }
            _ => DisconnectOutcome::NothingToDo,
        }
    }

    /// Land back in `Disconnected` after a stop completes, unless the
    /// connection was disposed in the meantime.
    pub fn finish_stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != ConnectionState::Disposed {
            inner.state = ConnectionState::Disconnected;
        }
    }

    /// Terminal transition. Idempotent.
    pub fn dispose(&self) {
        self.inner.lock().unwrap().state = ConnectionState::Disposed;
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_only_accepted_from_disconnected() {
        let cell = StateCell::new();
        cell.try_begin_start().unwrap();
        assert_eq!(cell.current(), ConnectionState::Connecting);

        let err = cell.try_begin_start().unwrap_err();
        assert_eq!(err.to_string(), ConnectionError::CANNOT_START);
    }

    #[test]
    fn finish_start_failure_reverts_to_disconnected() {
        let cell = StateCell::new();
        cell.try_begin_start().unwrap();
        cell.finish_start(false);
        assert_eq!(cell.current(), ConnectionState::Disconnected);
        // and can be restarted
        cell.try_begin_start().unwrap();
    }

    #[test]
    fn finish_start_success_reaches_connected() {
        let cell = StateCell::new();
        cell.try_begin_start().unwrap();
        cell.finish_start(true);
        assert_eq!(cell.current(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn wait_for_start_settled_returns_immediately_when_idle() {
        let cell = StateCell::new();
        cell.wait_for_start_settled().await;
    }

    #[tokio::test]
    async fn wait_for_start_settled_unblocks_on_finish() {
        let cell = std::sync::Arc::new(StateCell::new());
        cell.try_begin_start().unwrap();

        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move {
                cell.wait_for_start_settled().await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        cell.finish_start(true);
        waiter.await.unwrap();
    }

    #[test]
    fn disconnecting_from_connected_proceeds() {
        let cell = StateCell::new();
        cell.try_begin_start().unwrap();
        cell.finish_start(true);
        assert_eq!(cell.begin_disconnecting(), DisconnectOutcome::Proceed);
        assert_eq!(cell.current(), ConnectionState::Disconnecting);
    }

    #[test]
    fn disconnecting_from_disconnected_is_a_no_op() {
        let cell = StateCell::new();
        assert_eq!(cell.begin_disconnecting(), DisconnectOutcome::NothingToDo);
        assert_eq!(cell.current(), ConnectionState::Disconnected);
    }

    #[test]
    fn dispose_is_terminal() {
        let cell = StateCell::new();
        cell.dispose();
        assert_eq!(cell.current(), ConnectionState::Disposed);
        assert!(matches!(cell.try_begin_start(), Err(ConnectionError::Disposed(_))));
    }
}
