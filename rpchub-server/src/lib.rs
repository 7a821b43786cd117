//! Server-side connection registry for the hub RPC protocol.
//!
//! [`ConnectionManager`] owns every live [`ConnectionRecord`], mints ids
//! and duplex pairs on handshake, and reclaims connections nobody has
//! touched in a while via a background scavenger. [`handshake::router`]
//! wires an `axum` WebSocket endpoint straight into a manager.
//!
//! ## Modules
//!
//! - [`error`]: [`ManagerError`]
//! - [`record`]: [`ConnectionRecord`], the per-connection state the
//!   manager and scavenger track
//! - [`manager`]: [`ConnectionManager`] and [`ScavengerConfig`]
//! - [`telemetry`]: the injected [`ManagerTelemetry`] sink
//! - [`handshake`]: the `axum` negotiation endpoint

pub mod error;
pub mod handshake;
pub mod manager;
pub mod record;
pub mod telemetry;

pub use error::ManagerError;
pub use manager::{ConnectionManager, ScavengerConfig};
pub use record::{ConnectionRecord, ConnectionStatus};
pub use telemetry::{ManagerTelemetry, NoopTelemetry};
