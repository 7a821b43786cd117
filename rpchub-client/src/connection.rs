//! The client connection core: binds a logical connection to a
//! transport, mediates the duplex pipe between application and
//! transport code, serializes start/stop/dispose, and reconnects on
//! transport failure.
//!
//! `HubConnection` merges two conceptual layers onto one type: the raw
//! byte-oriented connection core (`Send`, `on_received`, `Closed`) and
//! the hub invocation layer sitting atop it (`invoke`, `on`). Real hub
//! clients want the latter; the former stays available for callers that
//! need the byte-level contract directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::{Bytes, BytesMut};
use rpchub_core::{
    create_connection_pair, encode_negotiation, DuplexHalf, HubError, HubMessage, HubProtocol,
    InvocationBinder, PipeOptions, PipeWriter, ReadResult, TransferFormat,
};
use serde_json::Value;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::invocation::HubInvocations;
use crate::reconnect::ReconnectPolicy;
use crate::state::{ConnectionState, DisconnectOutcome, StateCell};
use crate::transport::Transport;

type ReceivedHandler = Arc<dyn Fn(Bytes) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;
type ClosedHandler = Arc<dyn Fn(Option<ConnectionError>) + Send + Sync>;
type ReconnectedHandler = Arc<dyn Fn() + Send + Sync>;

/// Constructs a fresh transport instance for each connect/reconnect
/// attempt — a transport is single-use once `start` has been called.
pub type TransportFactory = Box<dyn Fn() -> Box<dyn Transport> + Send + Sync>;

/// A single logical client connection.
///
/// Build one with [`crate::builder::HubConnectionBuilder`]; it returns
/// an `Arc<HubConnection>` since the reconnect loop runs as a detached
/// background task holding its own handle back to this type.
pub struct HubConnection {
    url: String,
    requested_format: TransferFormat,
    transport_factory: TransportFactory,
    protocol: Arc<dyn HubProtocol>,
    binder: Arc<dyn InvocationBinder>,
    reconnect_policy: Option<ReconnectPolicy>,

    state: StateCell,
    op_lock: AsyncMutex<()>,
    stopping: AtomicBool,
    /// Wakes a reconnect backoff sleep early when `stopping` is set, so
    /// `stop`/`dispose` don't block for up to the backoff's max delay.
    stop_requested: Notify,

    writer: StdMutex<Option<PipeWriter>>,
    active_transport: StdMutex<Option<Arc<dyn Transport>>>,
    supervisor: StdMutex<Option<JoinHandle<()>>>,

    invocations: HubInvocations,

    on_received: StdMutex<Option<ReceivedHandler>>,
    on_closed: StdMutex<Option<ClosedHandler>>,
    on_reconnecting: StdMutex<Option<ClosedHandler>>,
    on_reconnected: StdMutex<Option<ReconnectedHandler>>,
}

impl HubConnection {
    pub(crate) fn new(
        url: String,
        requested_format: TransferFormat,
        transport_factory: TransportFactory,
        protocol: Arc<dyn HubProtocol>,
        binder: Arc<dyn InvocationBinder>,
        reconnect_policy: Option<ReconnectPolicy>,
    ) -> Arc<Self> {
        Arc::new(HubConnection {
            url,
            requested_format,
            transport_factory,
            protocol,
            binder,
            reconnect_policy,
            state: StateCell::new(),
            op_lock: AsyncMutex::new(()),
            stopping: AtomicBool::new(false),
            stop_requested: Notify::new(),
            writer: StdMutex::new(None),
            active_transport: StdMutex::new(None),
            supervisor: StdMutex::new(None),
            invocations: HubInvocations::new(),
            on_received: StdMutex::new(None),
            on_closed: StdMutex::new(None),
            on_reconnecting: StdMutex::new(None),
            on_reconnected: StdMutex::new(None),
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state.current()
    }

    /// Register the raw-bytes inbound handler. Invoked sequentially —
    /// never concurrently with itself — once per chunk the transport
    /// deposits; the application reader doesn't advance past that chunk
    /// until the handler's future completes.
    pub fn on_received<F, Fut>(&self, handler: F)
    where
        F: Fn(Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        *self.on_received.lock().unwrap() = Some(Arc::new(move |bytes| Box::pin(handler(bytes))));
    }

    /// Register a handler for a server-initiated call to `target`.
    pub fn on(&self, target: impl Into<String>, handler: impl Fn(Vec<Value>) + Send + Sync + 'static) {
        self.invocations.on(target, handler);
    }

    /// Fired exactly once per `Start` cycle that actually ran, when the
    /// connection reaches its final `Disconnected` state (no further
    /// reconnect attempt follows). Never fires for a connection that was
    /// never started.
    pub fn on_closed(&self, handler: impl Fn(Option<ConnectionError>) + Send + Sync + 'static) {
        *self.on_closed.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Fired when a recoverable transport failure triggers a reconnect
    /// attempt, before the first retry.
    pub fn on_reconnecting(&self, handler: impl Fn(Option<ConnectionError>) + Send + Sync + 'static) {
        *self.on_reconnecting.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Fired once a reconnect attempt re-establishes `Connected`.
    pub fn on_reconnected(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.on_reconnected.lock().unwrap() = Some(Arc::new(handler));
    }

    /// Start the connection. Only legal from `Disconnected`.
    pub async fn start(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.state.try_begin_start()?;
        let _guard = self.op_lock.lock().await;

        let outcome = self.connect_once().await;
        match outcome {
            Ok((transport, application)) => {
                self.stopping.store(false, Ordering::SeqCst);
                *self.writer.lock().unwrap() = Some(application.output.clone());
                *self.active_transport.lock().unwrap() = Some(transport.clone());
                self.state.finish_start(true);

                let conn = self.clone();
                let handle = tokio::spawn(async move { conn.run_loop(transport, application).await });
                *self.supervisor.lock().unwrap() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.state.finish_start(false);
                Err(e)
            }
        }
    }

    /// Establishes the transport, then writes the negotiation frame
    /// naming this connection's hub protocol before handing the
    /// application half back — the wire-codec loop in `run_loop` never
    /// runs before the remote has seen which protocol was chosen.
    async fn connect_once(&self) -> Result<(Arc<dyn Transport>, DuplexHalf), ConnectionError> {
        let (transport_half, application_half) =
            create_connection_pair(PipeOptions::default(), PipeOptions::default());
        let transport: Arc<dyn Transport> = Arc::from((self.transport_factory)());
        transport
            .start(&self.url, transport_half, self.requested_format)
            .await?;

        let mut negotiation = BytesMut::new();
        encode_negotiation(self.protocol.name(), &mut negotiation);
        application_half.output.write(&negotiation).await?;

        Ok((transport, application_half))
    }

    /// Send raw bytes. Only legal while `Connected`.
    pub async fn send_bytes(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        if self.state.current() != ConnectionState::Connected {
            return Err(ConnectionError::cannot_send());
        }
        let writer = self.writer.lock().unwrap().clone();
        match writer {
            Some(w) => w.write(bytes).await.map_err(ConnectionError::from),
            None => Err(ConnectionError::cannot_send()),
        }
    }

    /// Invoke `target` and await its `Completion`.
    pub async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<Option<Value>, ConnectionError> {
        let id = self.invocations.alloc_id();
        let rx = self.invocations.register_pending(&id);
        let message = HubMessage::Invocation {
            invocation_id: Some(id.clone()),
            target: target.to_string(),
            arguments,
            non_blocking: false,
        };
        let mut buf = BytesMut::new();
        self.protocol
            .write_message(&message, &mut buf)
            .map_err(ConnectionError::from)?;

        if let Err(e) = self.send_bytes(&buf).await {
            self.invocations.cancel(&id);
            return Err(e);
        }

        rx.await.map_err(|_| ConnectionError::Cancelled)?
    }

    /// Invoke a streaming `target`, returning a channel fed by each
    /// `StreamItem` the server sends for this call. The channel closes
    /// once the matching `Completion` arrives; an error `Completion`
    /// simply closes the channel early since an in-flight stream has no
    /// single result slot to carry that error into.
    pub async fn invoke_stream(
        &self,
        target: &str,
        arguments: Vec<Value>,
    ) -> Result<tokio::sync::mpsc::UnboundedReceiver<Value>, ConnectionError> {
        let id = self.invocations.alloc_id();
        let rx = self.invocations.register_stream(&id);
        let message = HubMessage::Invocation {
            invocation_id: Some(id.clone()),
            target: target.to_string(),
            arguments,
            non_blocking: false,
        };
        let mut buf = BytesMut::new();
        self.protocol
            .write_message(&message, &mut buf)
            .map_err(ConnectionError::from)?;

        if let Err(e) = self.send_bytes(&buf).await {
            self.invocations.cancel(&id);
            return Err(e);
        }

        Ok(rx)
    }

    /// Invoke `target` without expecting a reply.
    pub async fn send(&self, target: &str, arguments: Vec<Value>) -> Result<(), ConnectionError> {
        let message = HubMessage::Invocation {
            invocation_id: None,
            target: target.to_string(),
            arguments,
            non_blocking: true,
        };
        let mut buf = BytesMut::new();
        self.protocol
            .write_message(&message, &mut buf)
            .map_err(ConnectionError::from)?;
        self.send_bytes(&buf).await
    }

    /// Stop the connection without disposing it; it may be `Start`ed
    /// again afterward.
    pub async fn stop(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.state.wait_for_start_settled().await;
        let _guard = self.op_lock.lock().await;
        self.request_stop_and_wait().await;
        Ok(())
    }

    /// Stop (if running) and permanently dispose the connection.
    pub async fn dispose(self: &Arc<Self>) -> Result<(), ConnectionError> {
        self.state.wait_for_start_settled().await;
        let _guard = self.op_lock.lock().await;
        self.request_stop_and_wait().await;
        self.state.dispose();
        Ok(())
    }

    async fn request_stop_and_wait(&self) {
        if self.state.begin_disconnecting() == DisconnectOutcome::NothingToDo {
            return;
        }
        self.stopping.store(true, Ordering::SeqCst);
        self.stop_requested.notify_waiters();

        let transport = self.active_transport.lock().unwrap().clone();
        if let Some(transport) = transport {
            let _ = transport.stop().await;
        }

        let handle = self.supervisor.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    async fn run_loop(self: Arc<Self>, mut transport: Arc<dyn Transport>, mut application: DuplexHalf) {
        let mut backoff = self.reconnect_policy.as_ref().map(|p| p.backoff());

        loop {
            let close_reason = self.drive_receive(&transport, &application).await;

            let fail_error = close_reason
                .clone()
                .err()
                .unwrap_or(ConnectionError::TransportFailure(HubError::Closed));
            self.invocations.fail_all(fail_error);

            let user_stopped = self.stopping.swap(false, Ordering::SeqCst);
            let can_reconnect = !user_stopped
                && close_reason.as_ref().err().is_some_and(ConnectionError::is_retryable)
                && backoff.as_ref().is_some_and(|b| b.can_retry());

            if !can_reconnect {
                self.fire_closed(close_reason.err());
                self.state.finish_stop();
                break;
            }

            self.fire_reconnecting(close_reason.err());
            match self.reconnect_until_settled(&mut backoff).await {
                Some((new_transport, new_application)) => {
                    *self.active_transport.lock().unwrap() = Some(new_transport.clone());
                    *self.writer.lock().unwrap() = Some(new_application.output.clone());
                    transport = new_transport;
                    application = new_application;
                    self.fire_reconnected();
                }
                None => {
                    let user_stopped = self.stopping.swap(false, Ordering::SeqCst);
                    let error = if user_stopped {
                        None
                    } else {
                        Some(ConnectionError::TransportFailure(HubError::transport(
                            "reconnect attempts exhausted",
                        )))
                    };
                    self.fire_closed(error);
                    self.state.finish_stop();
                    break;
                }
            }
        }

        *self.writer.lock().unwrap() = None;
    }

    async fn reconnect_until_settled(
        &self,
        backoff: &mut Option<crate::reconnect::ExponentialBackoff>,
    ) -> Option<(Arc<dyn Transport>, DuplexHalf)> {
        let backoff = backoff.as_mut()?;
        while backoff.can_retry() {
            if self.stopping.load(Ordering::SeqCst) {
                return None;
            }
            // Registered before the stopping check above is revisited,
            // so a `notify_waiters` landing in between is still observed
            // rather than lost.
            let woken = self.stop_requested.notified();
            tokio::select! {
                _ = tokio::time::sleep(backoff.next_delay()) => {}
                _ = woken => {}
            }
            if self.stopping.load(Ordering::SeqCst) {
                return None;
            }
            match self.connect_once().await {
                Ok(pair) => return Some(pair),
                Err(e) => debug!(error = %e, "reconnect attempt failed"),
            }
        }
        None
    }

    /// Read chunks until the application pipe completes or errors,
    /// feeding each chunk through `on_received` and the hub protocol
    /// parser before advancing past it.
    async fn drive_receive(
        &self,
        _transport: &Arc<dyn Transport>,
        application: &DuplexHalf,
    ) -> Result<(), ConnectionError> {
        let mut recv_buffer = BytesMut::new();
        loop {
            match application.input.read_available().await {
                Ok(ReadResult::Completed) => return Ok(()),
                Err(e) => return Err(ConnectionError::from(e)),
                Ok(ReadResult::Data(bytes)) => {
                    if let Some(handler) = self.on_received.lock().unwrap().clone() {
                        handler(bytes.clone()).await;
                    }

                    recv_buffer.extend_from_slice(&bytes);
                    let mut messages = Vec::new();
                    let parsed = self
                        .protocol
                        .parse_messages(&mut recv_buffer, self.binder.as_ref(), &mut messages);
                    application.input.advance(bytes.len());

                    match parsed {
                        Ok(_) => {
                            for message in messages {
                                self.invocations.dispatch(message);
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "malformed hub message, closing connection");
                            return Err(ConnectionError::from(e));
                        }
                    }
                }
            }
        }
    }

    fn fire_closed(&self, error: Option<ConnectionError>) {
        if let Some(handler) = self.on_closed.lock().unwrap().clone() {
            handler(error);
        }
    }

    fn fire_reconnecting(&self, error: Option<ConnectionError>) {
        if let Some(handler) = self.on_reconnecting.lock().unwrap().clone() {
            handler(error);
        }
    }

    fn fire_reconnected(&self) {
        if let Some(handler) = self.on_reconnected.lock().unwrap().clone() {
            handler();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use rpchub_core::JsonHubProtocol;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn memory_connection(reconnect: Option<ReconnectPolicy>) -> Arc<HubConnection> {
        HubConnection::new(
            "ws://test".into(),
            TransferFormat::TEXT,
            Box::new(|| Box::new(MemoryTransport::new())),
            Arc::new(JsonHubProtocol),
            Arc::new(rpchub_core::PermissiveBinder),
            reconnect,
        )
    }

    #[tokio::test]
    async fn start_from_disconnected_reaches_connected() {
        let conn = memory_connection(None);
        conn.start().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn start_twice_fails_with_invalid_state_message() {
        let conn = memory_connection(None);
        conn.start().await.unwrap();
        let err = conn.start().await.unwrap_err();
        assert_eq!(err.to_string(), ConnectionError::CANNOT_START);
    }

    #[tokio::test]
    async fn send_before_connected_fails_with_invalid_state_message() {
        let conn = memory_connection(None);
        let err = conn.send_bytes(b"hi").await.unwrap_err();
        assert_eq!(err.to_string(), ConnectionError::CANNOT_SEND);
    }

    #[tokio::test]
    async fn invoke_stream_before_connected_fails_with_invalid_state_message() {
        let conn = memory_connection(None);
        let err = conn.invoke_stream("Watch", vec![]).await.unwrap_err();
        assert_eq!(err.to_string(), ConnectionError::CANNOT_SEND);
    }

    #[tokio::test]
    async fn invoke_stream_after_connect_registers_a_receiver() {
        let conn = memory_connection(None);
        conn.start().await.unwrap();
        let mut rx = conn.invoke_stream("Watch", vec![]).await.unwrap();
        // no StreamItem has arrived yet; the channel is open and empty.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dispose_on_a_fresh_connection_is_a_no_op() {
        let conn = memory_connection(None);
        let closed = Arc::new(AtomicBool::new(false));
        let sink = closed.clone();
        conn.on_closed(move |_| sink.store(true, Ordering::SeqCst));

        conn.dispose().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disposed);
        assert!(!closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_then_start_succeeds_again() {
        let conn = memory_connection(None);
        conn.start().await.unwrap();
        conn.stop().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        conn.start().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn closed_fires_exactly_once_for_a_full_lifecycle() {
        let conn = memory_connection(None);
        let count = Arc::new(AtomicU32::new(0));
        let sink = count.clone();
        conn.on_closed(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        conn.start().await.unwrap();
        conn.stop().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn start_retry_after_failure_then_success() {
        let transport_slot: Arc<StdMutex<Option<Arc<MemoryTransport>>>> = Arc::new(StdMutex::new(None));
        let slot = transport_slot.clone();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempt_count = attempts.clone();

        let conn = HubConnection::new(
            "ws://test".into(),
            TransferFormat::TEXT,
            Box::new(move || {
                let t = Arc::new(MemoryTransport::new());
                if attempt_count.fetch_add(1, Ordering::SeqCst) == 0 {
                    t.fail_next_start(ConnectionError::TransportFailure(HubError::transport("boom")));
                }
                *slot.lock().unwrap() = Some(t.clone());
                Box::new(ArcTransport(t))
            }),
            Arc::new(JsonHubProtocol),
            Arc::new(rpchub_core::PermissiveBinder),
            None,
        );

        let err = conn.start().await.unwrap_err();
        assert!(matches!(err, ConnectionError::TransportFailure(_)));
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.start().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    /// Wraps an `Arc<MemoryTransport>` so one instance can be shared
    /// with the test while still satisfying `TransportFactory`'s
    /// `Box<dyn Transport>` return type.
    struct ArcTransport(Arc<MemoryTransport>);

    impl Transport for ArcTransport {
        fn start<'a>(
            &'a self,
            url: &'a str,
            pipe: DuplexHalf,
            requested_format: TransferFormat,
        ) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + 'a>> {
            self.0.start(url, pipe, requested_format)
        }

        fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), ConnectionError>> + Send + '_>> {
            self.0.stop()
        }

        fn running(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            self.0.running()
        }

        fn mode(&self) -> Option<TransferFormat> {
            self.0.mode()
        }
    }

    #[tokio::test]
    async fn automatic_reconnect_reaches_connected_again() {
        let transport_slot: Arc<StdMutex<Option<Arc<MemoryTransport>>>> = Arc::new(StdMutex::new(None));
        let slot = transport_slot.clone();

        let conn = HubConnection::new(
            "ws://test".into(),
            TransferFormat::TEXT,
            Box::new(move || {
                let t = Arc::new(MemoryTransport::new());
                *slot.lock().unwrap() = Some(t.clone());
                Box::new(ArcTransport(t))
            }),
            Arc::new(JsonHubProtocol),
            Arc::new(rpchub_core::PermissiveBinder),
            Some(ReconnectPolicy::new().base_delay(Duration::from_millis(1))),
        );

        conn.start().await.unwrap();
        let first_transport = transport_slot.lock().unwrap().clone().unwrap();

        // simulate the remote dropping the connection
        first_transport.fail(Some(HubError::transport("reset")));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(conn.state(), ConnectionState::Connected);

        let second_transport = transport_slot.lock().unwrap().clone().unwrap();
        assert!(!Arc::ptr_eq(&first_transport, &second_transport));
    }
}
