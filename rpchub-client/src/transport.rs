//! The transport capability contract and an in-memory test double.
//!
//! A transport is deliberately small: start moving bytes, stop moving
//! bytes, report when its internal loops have exited, and report which
//! transfer format it ended up negotiating. WebSocket, long-polling and
//! server-sent-events transports are tagged variants behind this same
//! capability set rather than a class hierarchy — no inheritance
//! required.

use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;
use rpchub_core::{DuplexHalf, TransferFormat};
use tokio::sync::Notify;

use crate::error::ConnectionError;

/// Moves framed bytes between the application and the network.
///
/// `start` must return only once the transport is ready to exchange
/// bytes; on failure the connection core reverts to `Disconnected` and
/// may retry. `stop` drains in-flight sends, tears down network handles,
/// and completes `pipe.output` (the core's application-facing reader);
/// after `stop` returns, `running` must already be complete.
pub trait Transport: Send + Sync {
    fn start<'a>(
        &'a self,
        url: &'a str,
        pipe: DuplexHalf,
        requested_format: TransferFormat,
    ) -> BoxFuture<'a, Result<(), ConnectionError>>;

    fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>>;

    /// Completes when the transport's internal loops have exited,
    /// whether because `stop` was called or because the remote/network
    /// failed. Safe to await repeatedly or after it has already fired.
    fn running(&self) -> BoxFuture<'_, ()>;

    /// The negotiated transfer format, `None` until `start` returns.
    fn mode(&self) -> Option<TransferFormat>;
}

/// A one-shot completion signal multiple callers can await concurrently,
/// including after it has already fired.
#[derive(Default)]
pub struct RunningSignal {
    done: AtomicBool,
    notify: Notify,
}

impl RunningSignal {
    pub fn new() -> Self {
        RunningSignal {
            done: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    pub fn mark_done(&self) {
        self.done.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.done.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(feature = "websocket")]
pub mod websocket {
    //! A real `Transport` backed by `tokio-tungstenite`.
    //!
    //! Two tasks per connection: one drains `pipe.input` and forwards it
    //! as WebSocket frames, the other forwards incoming frames into
    //! `pipe.output`. Both exit (and complete the pipe) on the first
    //! error or close frame from either direction.

    use std::sync::{Arc, Mutex};

    use futures::{SinkExt, StreamExt};
    use rpchub_core::{HubError, ReadResult};
    use tokio::sync::Mutex as AsyncMutex;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;
    use tracing::{debug, warn};

    use super::*;

    /// Connects to a `ws://`/`wss://` URL and shuttles bytes between it
    /// and the connection core's duplex pipe.
    pub struct WebSocketTransport {
        mode: Mutex<Option<TransferFormat>>,
        running: Arc<RunningSignal>,
        tasks: AsyncMutex<Vec<JoinHandle<()>>>,
        pipe: Mutex<Option<DuplexHalf>>,
    }

    impl Default for WebSocketTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl WebSocketTransport {
        pub fn new() -> Self {
            WebSocketTransport {
                mode: Mutex::new(None),
                running: Arc::new(RunningSignal::new()),
                tasks: AsyncMutex::new(Vec::new()),
                pipe: Mutex::new(None),
            }
        }
    }

    impl Transport for WebSocketTransport {
        fn start<'a>(
            &'a self,
            url: &'a str,
            pipe: DuplexHalf,
            requested_format: TransferFormat,
        ) -> BoxFuture<'a, Result<(), ConnectionError>> {
            Box::pin(async move {
                requested_format
                    .validate()
                    .map_err(|e| ConnectionError::InvalidState(e.to_string()))?;

                let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
                    .await
                    .map_err(|e| ConnectionError::from(HubError::transport(e.to_string())))?;
                *self.mode.lock().unwrap() = Some(requested_format);
                *self.pipe.lock().unwrap() = Some(pipe.clone());

                let (mut sink, mut stream) = ws_stream.split();
                let binary = requested_format.is_binary();

                let outbound_pipe = pipe.clone();
                let outbound_done = self.running.clone();
                let outbound = tokio::spawn(async move {
                    loop {
                        match outbound_pipe.input.read_available().await {
                            Ok(ReadResult::Data(bytes)) => {
                                let frame = if binary {
                                    Message::Binary(bytes.to_vec().into())
                                } else {
                                    Message::Text(String::from_utf8_lossy(&bytes).into_owned().into())
                                };
                                let len = bytes.len();
                                if sink.send(frame).await.is_err() {
                                    break;
                                }
                                outbound_pipe.input.advance(len);
                            }
                            Ok(ReadResult::Completed) | Err(_) => break,
                        }
                    }
                    let _ = sink.close().await;
                    outbound_done.mark_done();
                });

                let inbound_pipe = pipe.clone();
                let inbound_done = self.running.clone();
                let inbound = tokio::spawn(async move {
                    while let Some(message) = stream.next().await {
                        match message {
                            Ok(Message::Text(text)) => {
                                if inbound_pipe.output.write(text.as_bytes()).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Message::Binary(data)) => {
                                if inbound_pipe.output.write(&data).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Message::Close(_)) => {
                                debug!("websocket closed by remote");
                                break;
                            }
                            Ok(_) => {}
                            Err(e) => {
                                warn!(error = %e, "websocket read error");
                                inbound_pipe
                                    .output
                                    .complete(Some(HubError::transport(e.to_string())));
                                inbound_done.mark_done();
                                return;
                            }
                        }
                    }
                    inbound_pipe.output.complete(None);
                    inbound_done.mark_done();
                });

                self.tasks.lock().await.extend([outbound, inbound]);
                Ok(())
            })
        }

        fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
            Box::pin(async move {
                let tasks = std::mem::take(&mut *self.tasks.lock().await);
                for task in tasks {
                    task.abort();
                }
                if let Some(pipe) = self.pipe.lock().unwrap().as_ref() {
                    pipe.output.complete(None);
                }
                self.running.mark_done();
                Ok(())
            })
        }

        fn running(&self) -> BoxFuture<'_, ()> {
            Box::pin(self.running.wait())
        }

        fn mode(&self) -> Option<TransferFormat> {
            *self.mode.lock().unwrap()
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    //! An in-memory transport double that loops bytes straight back to
    //! the caller without touching the network, for exercising the
    //! connection core in tests.

    use std::sync::Mutex;

    use super::*;

    pub struct MemoryTransport {
        mode: Mutex<Option<TransferFormat>>,
        running: RunningSignal,
        /// If set, `start` fails with this error instead of succeeding —
        /// simulates a first-attempt-fails, second-attempt-succeeds
        /// transport for reconnect/retry tests.
        fail_start: Mutex<Option<ConnectionError>>,
        /// The pipe handed to the most recent successful `start`, kept
        /// around so a test can simulate the remote ending the
        /// connection via [`fail`](Self::fail).
        pipe: Mutex<Option<DuplexHalf>>,
    }

    impl MemoryTransport {
        pub fn new() -> Self {
            MemoryTransport {
                mode: Mutex::new(None),
                running: RunningSignal::new(),
                fail_start: Mutex::new(None),
                pipe: Mutex::new(None),
            }
        }

        pub fn fail_next_start(&self, err: ConnectionError) {
            *self.fail_start.lock().unwrap() = Some(err);
        }

        /// Simulate the remote closing the connection: completes the
        /// pipe half this transport writes to (so the application-facing
        /// reader observes it) and marks `running` done.
        pub fn fail(&self, error: Option<rpchub_core::HubError>) {
            if let Some(pipe) = self.pipe.lock().unwrap().as_ref() {
                pipe.output.complete(error);
            }
            self.running.mark_done();
        }
    }

    impl Default for MemoryTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Transport for MemoryTransport {
        fn start<'a>(
            &'a self,
            _url: &'a str,
            pipe: DuplexHalf,
            requested_format: TransferFormat,
        ) -> BoxFuture<'a, Result<(), ConnectionError>> {
            Box::pin(async move {
                requested_format
                    .validate()
                    .map_err(|e| ConnectionError::InvalidState(e.to_string()))?;
                if let Some(err) = self.fail_start.lock().unwrap().take() {
                    return Err(err);
                }
                *self.mode.lock().unwrap() = Some(requested_format);
                *self.pipe.lock().unwrap() = Some(pipe);
                Ok(())
            })
        }

        fn stop(&self) -> BoxFuture<'_, Result<(), ConnectionError>> {
            Box::pin(async move {
                if let Some(pipe) = self.pipe.lock().unwrap().as_ref() {
                    pipe.output.complete(None);
                }
                self.running.mark_done();
                Ok(())
            })
        }

        fn running(&self) -> BoxFuture<'_, ()> {
            Box::pin(self.running.wait())
        }

        fn mode(&self) -> Option<TransferFormat> {
            *self.mode.lock().unwrap()
        }
    }
}
