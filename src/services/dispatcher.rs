use std::time::Duration;

use tracing::{debug, warn};

use crate::domains::envelope::{Envelope, MessageKind, PRINCIPAL_HEADER};
use crate::error::{BedlamError, Result};
use crate::services::filter::SharedFilter;

pub const MESSAGES_PATH: &str = "messages";

#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub kind: MessageKind,
    pub sender: String,
    pub recipient: Option<String>,
    pub data: String,
}

impl DispatchRequest {
    pub fn new(kind: MessageKind, sender: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            kind,
            sender: sender.into(),
            recipient: None,
            data: data.into(),
        }
    }

    pub fn to(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// Builds envelopes and posts them to the relay, fire-and-forget.
pub struct OutboundDispatcher {
    client: reqwest::Client,
    filter: SharedFilter,
}

impl OutboundDispatcher {
    pub fn new(filter: SharedFilter, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BedlamError::Runtime(e.to_string()))?;
        Ok(Self { client, filter })
    }

    /// Returns the new message id. Only envelope validation fails the call;
    /// a lost POST is logged and the id is still returned.
    pub async fn dispatch(&self, endpoint: &str, request: DispatchRequest) -> Result<String> {
        let envelope = Envelope::new(
            request.kind,
            &request.sender,
            request.recipient.as_deref(),
            &request.data,
        )?;
        let principal = self.filter.lock().await.local_id().to_string();
        self.dispatch_envelope(endpoint, &principal, &envelope).await;
        Ok(envelope.message_id().to_string())
    }

    pub async fn dispatch_envelope(&self, endpoint: &str, principal: &str, envelope: &Envelope) {
        self.filter.lock().await.record_sent(envelope.message_id());
        match self.post(endpoint, principal, envelope).await {
            Ok(()) => debug!(
                message_id = envelope.message_id(),
                kind = %envelope.kind(),
                "dispatched envelope"
            ),
            Err(err) => warn!(
                message_id = envelope.message_id(),
                kind = %envelope.kind(),
                error = %err,
                "dispatch failed; message dropped"
            ),
        }
    }

    async fn post(&self, endpoint: &str, principal: &str, envelope: &Envelope) -> Result<()> {
        let mut request = self.client.post(join_url(endpoint, MESSAGES_PATH)).json(envelope);
        if !principal.trim().is_empty() {
            request = request.header(PRINCIPAL_HEADER, principal);
        }
        let response = request
            .send()
            .await
            .map_err(|e: reqwest::Error| BedlamError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BedlamError::Http(format!("relay answered {status}")));
        }
        Ok(())
    }
}

pub(crate) fn join_url(base_url: &str, path: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
