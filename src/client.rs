use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::config::ParticipantConfig;
use crate::domains::envelope::{Envelope, MessageKind};
use crate::error::{BedlamError, Result};
use crate::interfaces::transport::HubTransport;
use crate::services::connection::{
    ConnectionManager, ConnectionOptions, ConnectionState, MessageCallback,
};
use crate::services::dispatcher::{DispatchRequest, OutboundDispatcher};
use crate::services::filter::{DeliveryFilter, SharedFilter};
use crate::services::sse::SseHubTransport;

/// Sender used when the host has not supplied a participant id.
pub const DEFAULT_SENDER: &str = "table";

/// What the host hands over on every update.
#[derive(Debug, Clone, Default)]
pub struct HostInputs {
    pub endpoint_url: Option<String>,
    pub user_id: Option<String>,
    pub message_type: Option<String>,
    pub message_data: Option<String>,
    pub recipient: Option<String>,
    pub send_message: bool,
}

/// What the host reads back after a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostOutputs {
    pub message_received_type: String,
    pub message_received_sender: String,
    pub message_received_data: Option<String>,
}

impl From<&Envelope> for HostOutputs {
    fn from(envelope: &Envelope) -> Self {
        Self {
            message_received_type: envelope.kind().to_string(),
            message_received_sender: envelope.sender().to_string(),
            message_received_data: envelope.data_string(),
        }
    }
}

/// One connected game client: dispatcher, filter and hub connection wired together.
pub struct Participant {
    filter: SharedFilter,
    dispatcher: OutboundDispatcher,
    connection: ConnectionManager,
    initial_endpoint: Option<String>,
    outputs_tx: Arc<watch::Sender<Option<HostOutputs>>>,
}

impl Participant {
    pub fn new(config: &ParticipantConfig, on_message: Option<MessageCallback>) -> Result<Self> {
        let transport = Arc::new(SseHubTransport::new()?);
        Self::with_transport(config, transport, on_message)
    }

    pub fn with_transport(
        config: &ParticipantConfig,
        transport: Arc<dyn HubTransport>,
        on_message: Option<MessageCallback>,
    ) -> Result<Self> {
        let local_id = effective_id(config.local_participant_id.as_deref());
        let filter = DeliveryFilter::with_capacity(local_id, config.processed_capacity).shared();
        let dispatcher = OutboundDispatcher::new(Arc::clone(&filter), config.dispatch_timeout())?;

        let (outputs_tx, _) = watch::channel(None);
        let outputs_tx = Arc::new(outputs_tx);
        let outputs = Arc::clone(&outputs_tx);
        let callback: MessageCallback = Arc::new(move |envelope: Envelope| {
            outputs.send_replace(Some(HostOutputs::from(&envelope)));
            if let Some(on_message) = &on_message {
                on_message(envelope);
            }
        });

        let connection = ConnectionManager::new(
            transport,
            Arc::clone(&filter),
            callback,
            ConnectionOptions::from(config),
        );

        Ok(Self {
            filter,
            dispatcher,
            connection,
            initial_endpoint: config.endpoint_url.clone(),
            outputs_tx,
        })
    }

    /// Connects to the configured endpoint, if any.
    pub async fn start(&self) {
        if let Some(endpoint) = &self.initial_endpoint {
            self.connection.update_endpoint(endpoint).await;
        }
    }

    pub async fn set_endpoint(&self, endpoint: &str) {
        self.connection.update_endpoint(endpoint).await;
    }

    pub async fn local_id(&self) -> String {
        self.filter.lock().await.local_id().to_string()
    }

    pub async fn set_local_id(&self, user_id: Option<&str>) {
        self.filter.lock().await.set_local_id(effective_id(user_id));
    }

    /// Dispatches as the local participant to the current endpoint. Returns the new message id.
    pub async fn send(&self, kind: MessageKind, data: &str, recipient: Option<&str>) -> Result<String> {
        let endpoint = self
            .connection
            .endpoint()
            .await
            .ok_or_else(|| BedlamError::Config("no relay endpoint configured".to_string()))?;
        self.send_to(&endpoint, kind, data, recipient).await
    }

    /// Dispatches to `endpoint` without touching the hub connection.
    pub async fn send_to(
        &self,
        endpoint: &str,
        kind: MessageKind,
        data: &str,
        recipient: Option<&str>,
    ) -> Result<String> {
        let mut request = DispatchRequest::new(kind, self.local_id().await, data);
        if let Some(recipient) = recipient {
            request = request.to(recipient);
        }
        self.dispatcher.dispatch(endpoint, request).await
    }

    /// Applies one host update: identity, endpoint, then the send trigger.
    /// Returns the dispatched message id when something was sent.
    pub async fn update_view(&self, inputs: HostInputs) -> Result<Option<String>> {
        self.set_local_id(inputs.user_id.as_deref()).await;
        if let Some(endpoint) = inputs.endpoint_url.as_deref() {
            self.connection.update_endpoint(endpoint).await;
        }

        let data = inputs.message_data.as_deref().unwrap_or_default();
        if !inputs.send_message || data.is_empty() {
            return Ok(None);
        }
        let kind: MessageKind = inputs
            .message_type
            .as_deref()
            .unwrap_or_default()
            .parse()?;
        let message_id = self.send(kind, data, inputs.recipient.as_deref()).await?;
        debug!(message_id = %message_id, kind = %kind, "host triggered send");
        Ok(Some(message_id))
    }

    /// Last delivered message, as the host sees it.
    pub fn outputs(&self) -> Option<HostOutputs> {
        self.outputs_tx.borrow().clone()
    }

    /// Changes whenever a new message is delivered.
    pub fn watch_outputs(&self) -> watch::Receiver<Option<HostOutputs>> {
        self.outputs_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub async fn stop(&self) {
        self.connection.stop().await;
    }
}

fn effective_id(user_id: Option<&str>) -> String {
    user_id
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_SENDER)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::envelope::GameEvent;

    #[test]
    fn outputs_stringify_card_lists() {
        let envelope = Envelope::from_parts(
            "m-1",
            "dealer",
            None,
            GameEvent::ChooseWinner {
                cards: crate::domains::envelope::CardIds::new(vec![3, 7, 12]),
            },
        );
        let outputs = HostOutputs::from(&envelope);
        assert_eq!(outputs.message_received_type, "choose-winner");
        assert_eq!(outputs.message_received_sender, "dealer");
        assert_eq!(outputs.message_received_data.as_deref(), Some("3,7,12"));
    }

    #[test]
    fn missing_user_falls_back_to_table() {
        assert_eq!(effective_id(None), "table");
        assert_eq!(effective_id(Some("  ")), "table");
        assert_eq!(effective_id(Some("alice")), "alice");
    }
}
