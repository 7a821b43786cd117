//! Builder for [`HubConnection`].
//!
//! Configuration is all programmatic, mirroring the teacher's
//! `ClientBuilder`: a fluent chain of owned-`self` setters ending in a
//! `build()` that assembles the connection.

use std::sync::Arc;

use rpchub_core::{HubProtocol, InvocationBinder, JsonHubProtocol, PermissiveBinder};

use crate::connection::{HubConnection, TransportFactory};
use crate::reconnect::ReconnectPolicy;
use crate::transport::Transport;

/// Builds a [`HubConnection`] bound to a URL, a transport, and a hub
/// protocol.
///
/// # Example
///
/// ```ignore
/// use rpchub_client::HubConnectionBuilder;
///
/// let connection = HubConnectionBuilder::new("wss://example.test/chat")
///     .with_automatic_reconnect(Default::default())
///     .build()?;
/// ```
pub struct HubConnectionBuilder {
    url: String,
    transport_factory: Option<TransportFactory>,
    protocol: Option<Arc<dyn HubProtocol>>,
    binder: Option<Arc<dyn InvocationBinder>>,
    reconnect_policy: Option<ReconnectPolicy>,
}

impl std::fmt::Debug for HubConnectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConnectionBuilder")
            .field("url", &self.url)
            .field("transport_factory", &self.transport_factory.is_some())
            .field("protocol", &self.protocol.as_ref().map(|p| p.name()))
            .field("reconnect_policy", &self.reconnect_policy.is_some())
            .finish()
    }
}

impl HubConnectionBuilder {
    /// Start a builder for a connection to `url`.
    pub fn new<S: Into<String>>(url: S) -> Self {
        HubConnectionBuilder {
            url: url.into(),
            transport_factory: None,
            protocol: None,
            binder: None,
            reconnect_policy: None,
        }
    }

    /// Provide the transport to use for each connect/reconnect attempt.
    /// Required: `build()` fails with [`BuildError::MissingTransport`] if
    /// this is never called.
    pub fn with_transport_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Transport> + Send + Sync + 'static,
    {
        self.transport_factory = Some(Box::new(factory));
        self
    }

    /// Use the given hub protocol codec. Defaults to [`JsonHubProtocol`].
    pub fn with_protocol(mut self, protocol: Arc<dyn HubProtocol>) -> Self {
        self.protocol = Some(protocol);
        self
    }

    /// Provide argument-arity metadata for incoming invocations. Defaults
    /// to [`PermissiveBinder`], which accepts any arity.
    pub fn with_binder(mut self, binder: Arc<dyn InvocationBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    /// Enable automatic reconnect with the given backoff policy.
    /// Without this call the connection never reconnects on its own —
    /// equivalent to the spec's `allowReconnect=false`.
    pub fn with_automatic_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = Some(policy);
        self
    }

    /// Assemble the connection.
    pub fn build(self) -> Result<Arc<HubConnection>, BuildError> {
        let transport_factory = self.transport_factory.ok_or(BuildError::MissingTransport)?;
        let protocol: Arc<dyn HubProtocol> = self.protocol.unwrap_or_else(|| Arc::new(JsonHubProtocol));
        let binder: Arc<dyn InvocationBinder> = self.binder.unwrap_or_else(|| Arc::new(PermissiveBinder));
        let requested_format = protocol.transfer_format();

        Ok(HubConnection::new(
            self.url,
            requested_format,
            transport_factory,
            protocol,
            binder,
            self.reconnect_policy,
        ))
    }
}

/// Errors that can occur while building a [`HubConnection`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No transport factory was configured; a connection has nothing to
    /// move bytes over.
    #[error("no transport factory configured; call with_transport_factory()")]
    MissingTransport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use rpchub_core::MessagePackHubProtocol;

    fn any_transport_factory() -> impl Fn() -> Box<dyn Transport> + Send + Sync + 'static {
        || Box::new(MemoryTransport::new())
    }

    #[test]
    fn build_without_transport_fails() {
        let err = HubConnectionBuilder::new("ws://test").build().unwrap_err();
        assert!(matches!(err, BuildError::MissingTransport));
    }

    #[test]
    fn build_defaults_to_json_protocol() {
        let connection = HubConnectionBuilder::new("ws://test")
            .with_transport_factory(any_transport_factory())
            .build()
            .unwrap();
        assert_eq!(connection.state(), crate::state::ConnectionState::Disconnected);
    }

    #[test]
    fn build_accepts_messagepack_protocol() {
        let connection = HubConnectionBuilder::new("ws://test")
            .with_transport_factory(any_transport_factory())
            .with_protocol(Arc::new(MessagePackHubProtocol))
            .build()
            .unwrap();
        assert_eq!(connection.state(), crate::state::ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_policy_is_optional() {
        let connection = HubConnectionBuilder::new("ws://test")
            .with_transport_factory(any_transport_factory())
            .with_automatic_reconnect(ReconnectPolicy::new())
            .build()
            .unwrap();
        assert_eq!(connection.state(), crate::state::ConnectionState::Disconnected);
    }
}
