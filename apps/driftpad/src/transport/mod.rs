pub mod mock;
pub mod tcp;

use async_trait::async_trait;
use std::sync::Arc;

use crate::protocol::Packet;
use crate::protocol::wire::WireError;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("timed out waiting for the peer")]
    Timeout,
    #[error("malformed frame: {0}")]
    Codec(#[from] WireError),
    #[error("injected fault: {0}")]
    Injected(&'static str),
}

/// One framed duplex stream carrying [`Packet`]s. `send` takes `&self` so a
/// connected transport can be shared between the dispatcher's writer and the
/// session's receiver task.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, packet: &Packet) -> Result<(), TransportError>;

    /// Receive the next packet. Unknown packet kinds are degraded by the
    /// codec before they get here; an error from `recv` means the stream
    /// itself is gone.
    async fn recv(&self) -> Result<Packet, TransportError>;

    fn is_connected(&self) -> bool;

    /// Tear the stream down. Subsequent sends and a blocked `recv` fail with
    /// [`TransportError::Closed`].
    fn shutdown(&self);
}

/// Dials a fresh transport. Injected into the session channel so tests can
/// substitute scripted or counting connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self) -> Result<Arc<dyn Transport>, TransportError>;
}
