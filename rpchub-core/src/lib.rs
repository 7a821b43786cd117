//! Shared protocol types for the hub RPC framework.
//!
//! This crate provides the wire-level pieces used by both the client
//! (`rpchub-client`) and server (`rpchub-server`) crates.
//!
//! ## Modules
//!
//! - [`pipe`]: the bounded duplex byte pipe pair
//! - [`format`]: transfer format negotiation (`Text`/`Binary`)
//! - [`framing`]: record-separator and length-prefix byte framing
//! - [`message`]: `HubMessage` and the negotiation payload
//! - [`binder`]: typed argument resolution for the JSON codec
//! - [`codec`]: the `HubProtocol` trait and its JSON/MessagePack implementations
//! - [`error`]: the shared error taxonomy

pub mod binder;
pub mod codec;
pub mod error;
pub mod format;
pub mod framing;
pub mod message;
pub mod pipe;

pub use binder::{InvocationBinder, PermissiveBinder};
pub use codec::{HubProtocol, JsonHubProtocol, MessagePackHubProtocol};
pub use error::HubError;
pub use format::{TransferFormat, TransferFormatError};
pub use message::{decode_negotiation, encode_negotiation, HubMessage, MessageType, NegotiationMessage};
pub use pipe::{create_connection_pair, DuplexHalf, PipeOptions, PipeReader, PipeWriter, ReadResult};
