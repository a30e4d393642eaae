//! The connector seam: anything that can produce a connected transport.

use std::sync::Arc;

use async_trait::async_trait;

use uasc_core::comms::secure_channel::SecureChannel;
use uasc_core::sync::RwLock;
use uasc_types::StatusCode;

use super::{
    core::{OutgoingMessage, TransportPollResult},
    tcp::{TcpTransport, TransportConfiguration},
};

/// Producer of connected transports. The default implementation is
/// [`TcpConnector`](super::tcp::TcpConnector); tests substitute their own.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `endpoint_url`, performing the transport level handshake.
    async fn connect(
        &self,
        channel: Arc<RwLock<SecureChannel>>,
        outgoing_recv: tokio::sync::mpsc::Receiver<OutgoingMessage>,
        config: TransportConfiguration,
        endpoint_url: &str,
    ) -> Result<TcpTransport, StatusCode>;
}

/// A connected transport that must be polled to make progress.
pub trait Transport {
    /// Drive the transport one step: send, receive or time out work.
    fn poll(&mut self) -> impl std::future::Future<Output = TransportPollResult> + Send;
}
