//! Outbound ports for the dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use shared_types::{Envelope, MethodDescriptor, TransportError};

/// Callback invoked by the transport for every envelope received from a
/// remote client.
pub type InboundHandler = Arc<dyn Fn(Envelope) + Send + Sync>;

/// The external server that accepts remote connections.
///
/// Implementations own framing, encoding and connection management. The
/// dispatcher only needs to push envelopes out and be told about envelopes
/// coming in.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin accepting connections, exposing `methods` as the bindable API.
    async fn start(&self, methods: Vec<MethodDescriptor>) -> Result<(), TransportError>;

    /// Deliver an envelope to connected clients.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Install the inbound handler. Replaces any previous handler.
    fn set_inbound_handler(&self, handler: InboundHandler);

    /// Stop accepting connections. Must be idempotent.
    async fn stop(&self);

    /// Address clients connect to.
    fn url(&self) -> String;
}
