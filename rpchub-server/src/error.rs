//! Server-side connection-manager errors.

use uuid::Uuid;

/// Errors produced by [`crate::manager::ConnectionManager`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum ManagerError {
    #[error("no connection registered with id {0}")]
    UnknownConnection(Uuid),

    #[error("connection manager has been disposed")]
    Disposed,
}
