use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

/// One unit read off a hub subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubFrame {
    /// A broadcast on `target`, with its JSON body still encoded.
    Message { target: String, data: String },
    /// Liveness only; resets the idle timer.
    KeepAlive,
}

/// An open subscription. Dropping it releases the underlying transport.
pub type HubStream = BoxStream<'static, Result<HubFrame>>;

#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Performs the handshake against `endpoint` and returns the live frame stream.
    async fn connect(&self, endpoint: &str) -> Result<HubStream>;
}
