//! Client-side connection core for the hub RPC protocol.
//!
//! [`HubConnection`] binds a [`Transport`] to the wire codec in
//! `rpchub-core`, serializes `Start`/`Stop`/`Dispose`, and drives
//! automatic reconnect. Build one with [`HubConnectionBuilder`].
//!
//! ## Modules
//!
//! - [`builder`]: [`HubConnectionBuilder`], the fluent construction API
//! - [`connection`]: [`HubConnection`], the connection state machine
//! - [`error`]: [`ConnectionError`]
//! - [`invocation`]: the pending-call/stream/handler table `invoke`/`on` build on
//! - [`reconnect`]: [`ReconnectPolicy`] and its exponential backoff
//! - [`state`]: the [`ConnectionState`] lifecycle and its transition guard
//! - [`transport`]: the [`Transport`] trait, an in-memory test double, and
//!   a `tokio-tungstenite`-backed implementation behind the `websocket` feature

pub mod builder;
pub mod connection;
pub mod error;
pub mod invocation;
pub mod reconnect;
pub mod state;
pub mod transport;

pub use builder::{BuildError, HubConnectionBuilder};
pub use connection::{HubConnection, TransportFactory};
pub use error::ConnectionError;
pub use invocation::HubInvocations;
pub use reconnect::{ExponentialBackoff, ReconnectPolicy};
pub use state::{ConnectionState, DisconnectOutcome, StateCell};
pub use transport::{RunningSignal, Transport};

#[cfg(feature = "websocket")]
pub use transport::websocket::WebSocketTransport;

#[cfg(any(test, feature = "test-util"))]
pub use transport::memory::MemoryTransport;
