use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ParticipantConfig;
use crate::domains::envelope::{Envelope, NEW_MESSAGE_TOPIC};
use crate::interfaces::transport::{HubFrame, HubStream, HubTransport};
use crate::services::filter::SharedFilter;

pub type MessageCallback = Arc<dyn Fn(Envelope) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// A subscription silent for this long counts as dropped.
    pub server_timeout: Duration,
    /// Covers drops after a successful connect only, never the first handshake.
    pub auto_reconnect: bool,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::from(&ParticipantConfig::default())
    }
}

impl From<&ParticipantConfig> for ConnectionOptions {
    fn from(config: &ParticipantConfig) -> Self {
        Self {
            server_timeout: config.server_timeout(),
            auto_reconnect: config.auto_reconnect,
            reconnect_delay: config.reconnect_delay(),
            max_reconnect_attempts: config.max_reconnect_attempts,
        }
    }
}

struct Session {
    endpoint: Option<String>,
    task: Option<JoinHandle<()>>,
}

/// Owns the hub subscription. At most one transport is alive per manager, and
/// every (re)connect attempt is superseded by the next endpoint change.
pub struct ConnectionManager {
    transport: Arc<dyn HubTransport>,
    filter: SharedFilter,
    on_message: MessageCallback,
    options: ConnectionOptions,
    session: Mutex<Session>,
    generation: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        filter: SharedFilter,
        on_message: MessageCallback,
        options: ConnectionOptions,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            filter,
            on_message,
            options,
            session: Mutex::new(Session {
                endpoint: None,
                task: None,
            }),
            generation: Arc::new(AtomicU64::new(0)),
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub async fn endpoint(&self) -> Option<String> {
        self.session.lock().await.endpoint.clone()
    }

    /// Same URL as the current one is a no-op; a different one replaces the
    /// current transport. A blank URL is ignored.
    pub async fn update_endpoint(&self, endpoint: &str) {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return;
        }

        let mut session = self.session.lock().await;
        if session.endpoint.as_deref() == Some(endpoint) {
            debug!(endpoint, "endpoint unchanged");
            return;
        }

        self.teardown(&mut session).await;
        let generation = self.generation.load(Ordering::SeqCst);
        session.endpoint = Some(endpoint.to_string());
        self.state_tx.send_replace(ConnectionState::Connecting);
        info!(endpoint, generation, "connecting to hub");

        let worker = Worker {
            transport: Arc::clone(&self.transport),
            filter: Arc::clone(&self.filter),
            on_message: Arc::clone(&self.on_message),
            options: self.options.clone(),
            endpoint: endpoint.to_string(),
            generation,
            current: Arc::clone(&self.generation),
            state_tx: Arc::clone(&self.state_tx),
        };
        session.task = Some(tokio::spawn(worker.run()));
    }

    /// Releases the transport and forgets the endpoint.
    pub async fn stop(&self) {
        let mut session = self.session.lock().await;
        self.teardown(&mut session).await;
        session.endpoint = None;
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }

    async fn teardown(&self, session: &mut Session) {
        // stale workers see a newer generation from here on
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = session.task.take() {
            task.abort();
            let _ = task.await;
            debug!("previous hub transport released");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = self.session.get_mut().task.take() {
            task.abort();
        }
    }
}

struct Worker {
    transport: Arc<dyn HubTransport>,
    filter: SharedFilter,
    on_message: MessageCallback,
    options: ConnectionOptions,
    endpoint: String,
    generation: u64,
    current: Arc<AtomicU64>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
}

impl Worker {
    fn is_current(&self) -> bool {
        self.current.load(Ordering::SeqCst) == self.generation
    }

    fn publish(&self, state: ConnectionState) {
        if self.is_current() {
            self.state_tx.send_replace(state);
        }
    }

    async fn run(self) {
        let mut connected_once = false;
        let mut attempt = 0u32;
        loop {
            match self.transport.connect(&self.endpoint).await {
                Ok(stream) => {
                    if !self.is_current() {
                        return;
                    }
                    connected_once = true;
                    attempt = 0;
                    self.publish(ConnectionState::Connected);
                    info!(endpoint = %self.endpoint, "hub connected");
                    let reason = self.pump(stream).await;
                    if !self.is_current() {
                        return;
                    }
                    warn!(endpoint = %self.endpoint, reason = %reason, "hub connection dropped");
                }
                Err(err) => {
                    if !self.is_current() {
                        return;
                    }
                    if !connected_once {
                        warn!(endpoint = %self.endpoint, error = %err, "hub handshake failed");
                        self.publish(ConnectionState::Disconnected);
                        return;
                    }
                    warn!(endpoint = %self.endpoint, error = %err, attempt, "hub reconnect failed");
                }
            }

            if !self.options.auto_reconnect || attempt >= self.options.max_reconnect_attempts {
                self.publish(ConnectionState::Disconnected);
                return;
            }
            attempt += 1;
            self.publish(ConnectionState::Reconnecting);
            tokio::time::sleep(self.options.reconnect_delay).await;
        }
    }

    /// Reads until the subscription ends; returns why it ended.
    async fn pump(&self, mut stream: HubStream) -> String {
        loop {
            let next = tokio::time::timeout(self.options.server_timeout, stream.next()).await;
            match next {
                Err(_) => return "server timeout elapsed".to_string(),
                Ok(None) => return "stream closed".to_string(),
                Ok(Some(Err(err))) => return err.to_string(),
                Ok(Some(Ok(HubFrame::KeepAlive))) => {}
                Ok(Some(Ok(HubFrame::Message { target, data }))) => {
                    if target == NEW_MESSAGE_TOPIC {
                        self.handle(&data).await;
                    } else {
                        debug!(target = %target, "ignoring frame for unsubscribed target");
                    }
                }
            }
        }
    }

    async fn handle(&self, data: &str) {
        let envelope = match Envelope::from_json(data) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping malformed envelope");
                return;
            }
        };
        let verdict = self.filter.lock().await.accept(&envelope);
        if !verdict.is_deliver() {
            debug!(message_id = envelope.message_id(), ?verdict, "envelope filtered");
            return;
        }
        if self.is_current() {
            (self.on_message)(envelope);
        }
    }
}
