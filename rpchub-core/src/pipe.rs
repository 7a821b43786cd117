//! The duplex byte pipe: two bounded, single-producer/single-consumer
//! byte queues wired back-to-back into a `(Transport, Application)` pair.
//!
//! Application code writes to one side's output and reads from its
//! input; the transport loop does the mirror image. Neither side needs
//! to know the other exists beyond this contract. Completion — clean or
//! with a terminal error — propagates from a writer to its paired
//! reader as the next read result, exactly once.

use std::sync::Arc;
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use tokio::sync::Notify;

use crate::error::HubError;

/// Pipe sizing and behavior knobs for one direction of a duplex pair.
#[derive(Debug, Clone, Copy)]
pub struct PipeOptions {
    /// Bytes buffered before `write` starts awaiting room.
    pub capacity: usize,
}

impl Default for PipeOptions {
    fn default() -> Self {
        PipeOptions { capacity: 64 * 1024 }
    }
}

#[derive(Debug)]
struct PipeState {
    buffer: BytesMut,
    capacity: usize,
    /// `None` while open; `Some(None)` once completed cleanly; `Some(Some(e))`
    /// once completed with a terminal error.
    completion: Option<Option<HubError>>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<PipeState>,
    room_available: Notify,
    data_available: Notify,
}

/// The writable half of one pipe direction.
#[derive(Debug, Clone)]
pub struct PipeWriter {
    shared: Arc<Shared>,
}

/// The readable half of one pipe direction.
#[derive(Debug, Clone)]
pub struct PipeReader {
    shared: Arc<Shared>,
}

fn bounded_pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            buffer: BytesMut::new(),
            capacity,
            completion: None,
        }),
        room_available: Notify::new(),
        data_available: Notify::new(),
    });
    (
        PipeWriter { shared: shared.clone() },
        PipeReader { shared },
    )
}

impl PipeWriter {
    /// Append `data`, awaiting room if the pipe is at capacity.
    ///
    /// Fails with [`HubError::Closed`] if `complete` was already called
    /// on this writer.
    pub async fn write(&self, data: &[u8]) -> Result<(), HubError> {
        let mut offset = 0;
        while offset < data.len() {
            let wrote = {
                let mut state = self.shared.state.lock().unwrap();
                if state.completion.is_some() {
                    return Err(HubError::Closed);
                }
                let room = state.capacity.saturating_sub(state.buffer.len());
                if room == 0 {
                    0
                } else {
                    let take = room.min(data.len() - offset);
                    state.buffer.extend_from_slice(&data[offset..offset + take]);
                    take
                }
            };
            if wrote == 0 {
                let notified = self.shared.room_available.notified();
                let still_full = {
                    let state = self.shared.state.lock().unwrap();
                    state.completion.is_none()
                        && state.buffer.len() >= state.capacity
                };
                if still_full {
                    notified.await;
                }
                continue;
            }
            offset += wrote;
            self.shared.data_available.notify_waiters();
        }
        Ok(())
    }

    /// Mark the pipe complete, optionally with a terminal error that the
    /// paired reader will observe on its next read. Idempotent: only the
    /// first call takes effect.
    pub fn complete(&self, error: Option<HubError>) {
        let mut state = self.shared.state.lock().unwrap();
        if state.completion.is_none() {
            state.completion = Some(error);
        }
        drop(state);
        self.shared.data_available.notify_waiters();
    }
}

/// What a read returned: the bytes currently available, or the terminal
/// state of the pipe.
#[derive(Debug)]
pub enum ReadResult {
    /// Bytes available to consume; call [`PipeReader::advance`] with
    /// however many were actually used.
    Data(Bytes),
    /// The writer completed cleanly with nothing left to read.
    Completed,
}

impl PipeReader {
    /// Wait until bytes are available or the pipe completes, without
    /// consuming anything.
    ///
    /// Returns the terminal error if the writer completed with one.
    /// Repeated calls without an intervening [`advance`](Self::advance)
    /// return the same unconsumed bytes.
    pub async fn read_available(&self) -> Result<ReadResult, HubError> {
        loop {
            // Register before checking: a `notify_waiters` call that
            // lands between the check and the await below must still be
            // observed, or this would be a lost wakeup.
            let notified = self.shared.data_available.notified();
            if let Some(result) = self.try_read() {
                return result;
            }
            notified.await;
        }
    }

    fn try_read(&self) -> Option<Result<ReadResult, HubError>> {
        let state = self.shared.state.lock().unwrap();
        if !state.buffer.is_empty() {
            return Some(Ok(ReadResult::Data(state.buffer.clone().freeze())));
        }
        match &state.completion {
            Some(Some(e)) => Some(Err(e.clone())),
            Some(None) => Some(Ok(ReadResult::Completed)),
            None => None,
        }
    }

    /// Drop `n` bytes from the front of the buffer, releasing room for
    /// the writer.
    pub fn advance(&self, n: usize) {
        if n == 0 {
            return;
        }
        {
            let mut state = self.shared.state.lock().unwrap();
            let n = n.min(state.buffer.len());
            let _ = state.buffer.split_to(n);
        }
        self.shared.room_available.notify_waiters();
    }
}

/// One side of a duplex pair: an application or transport reads its
/// `input` and writes to its `output`.
#[derive(Debug, Clone)]
pub struct DuplexHalf {
    pub input: PipeReader,
    pub output: PipeWriter,
}

/// Build a back-to-back duplex pair: `transport.input` reads what
/// `application.output` writes, and `application.input` reads what
/// `transport.output` writes.
pub fn create_connection_pair(
    transport_opts: PipeOptions,
    application_opts: PipeOptions,
) -> (DuplexHalf, DuplexHalf) {
    let (app_write, transport_read) = bounded_pipe(application_opts.capacity);
    let (transport_write, app_read) = bounded_pipe(transport_opts.capacity);

    let transport = DuplexHalf {
        input: transport_read,
        output: transport_write,
    };
    let application = DuplexHalf {
        input: app_read,
        output: app_write,
    };
    (transport, application)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_round_trips_in_order() {
        let (transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        application.output.write(b"hello").await.unwrap();

        match transport.input.read_available().await.unwrap() {
            ReadResult::Data(bytes) => assert_eq!(&bytes[..], b"hello"),
            ReadResult::Completed => panic!("expected data"),
        }
        transport.input.advance(5);
    }

    #[tokio::test]
    async fn advance_without_consuming_all_keeps_remainder() {
        let (transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        application.output.write(b"abcdef").await.unwrap();

        let data = match transport.input.read_available().await.unwrap() {
            ReadResult::Data(b) => b,
            ReadResult::Completed => panic!("expected data"),
        };
        assert_eq!(&data[..], b"abcdef");
        transport.input.advance(3);

        let rest = match transport.input.read_available().await.unwrap() {
            ReadResult::Data(b) => b,
            ReadResult::Completed => panic!("expected data"),
        };
        assert_eq!(&rest[..], b"def");
    }

    #[tokio::test]
    async fn complete_with_error_surfaces_on_reader() {
        let (transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        application.output.complete(Some(HubError::transport("reset")));

        let err = transport.input.read_available().await.unwrap_err();
        assert!(matches!(err, HubError::Transport(m) if m == "reset"));
    }

    #[tokio::test]
    async fn complete_clean_surfaces_as_completed() {
        let (transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        application.output.complete(None);

        match transport.input.read_available().await.unwrap() {
            ReadResult::Completed => {}
            ReadResult::Data(_) => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn write_after_complete_is_closed() {
        let (_transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        application.output.complete(None);
        let err = application.output.write(b"late").await.unwrap_err();
        assert!(matches!(err, HubError::Closed));
    }

    #[tokio::test]
    async fn complete_is_idempotent() {
        let (transport, application) = create_connection_pair(PipeOptions::default(), PipeOptions::default());
        application.output.complete(Some(HubError::transport("first")));
        application.output.complete(Some(HubError::transport("second")));

        let err = transport.input.read_available().await.unwrap_err();
        assert!(matches!(err, HubError::Transport(m) if m == "first"));
    }

    #[tokio::test]
    async fn write_blocks_until_room_then_completes() {
        let (transport, application) = create_connection_pair(
            PipeOptions { capacity: 4 },
            PipeOptions::default(),
        );
        let writer = application.output.clone();
        let handle = tokio::spawn(async move { writer.write(b"abcdefgh").await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let data = match transport.input.read_available().await.unwrap() {
            ReadResult::Data(b) => b,
            ReadResult::Completed => panic!("expected data"),
        };
        assert_eq!(&data[..], b"abcd");
        transport.input.advance(4);

        handle.await.unwrap().unwrap();
    }
}
