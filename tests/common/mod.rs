#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};

use bedlam_relay::config::RelayConfig;
use bedlam_relay::domains::envelope::{Envelope, NEW_MESSAGE_TOPIC};
use bedlam_relay::error::{BedlamError, Result};
use bedlam_relay::interfaces::transport::{HubFrame, HubStream, HubTransport};
use bedlam_relay::relay;
use bedlam_relay::services::connection::{ConnectionState, MessageCallback};

#[derive(Default)]
struct MemoryHubInner {
    attempts: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
    subscribers: Mutex<Vec<(String, mpsc::UnboundedSender<Result<HubFrame>>)>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

struct CloseGuard(Arc<MemoryHubInner>);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-process hub transport that counts how many transports are opened and released.
#[derive(Clone, Default)]
pub struct MemoryHub {
    inner: Arc<MemoryHubInner>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> usize {
        self.inner.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn fail(&self, endpoint: &str) {
        self.inner
            .failing
            .lock()
            .unwrap()
            .insert(endpoint.to_string());
    }

    pub fn heal(&self, endpoint: &str) {
        self.inner.failing.lock().unwrap().remove(endpoint);
    }

    pub fn delay(&self, endpoint: &str, delay: Duration) {
        self.inner
            .delays
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), delay);
    }

    /// Sends a raw frame to every live subscriber of `endpoint`.
    pub fn push(&self, endpoint: &str, frame: HubFrame) -> usize {
        let mut subscribers = self.inner.subscribers.lock().unwrap();
        subscribers.retain(|(_, tx)| !tx.is_closed());
        subscribers
            .iter()
            .filter(|(url, _)| url == endpoint)
            .filter(|(_, tx)| tx.send(Ok(frame.clone())).is_ok())
            .count()
    }

    pub fn broadcast(&self, endpoint: &str, envelope: &Envelope) -> usize {
        self.push(
            endpoint,
            HubFrame::Message {
                target: NEW_MESSAGE_TOPIC.to_string(),
                data: envelope.to_json().unwrap(),
            },
        )
    }

    /// Ends every open subscription, as a server restart would.
    pub fn drop_connections(&self) {
        self.inner.subscribers.lock().unwrap().clear();
    }
}

#[async_trait]
impl HubTransport for MemoryHub {
    async fn connect(&self, endpoint: &str) -> Result<HubStream> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.inner.delays.lock().unwrap().get(endpoint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.inner.failing.lock().unwrap().contains(endpoint) {
            return Err(BedlamError::Http(format!("{endpoint} refused the handshake")));
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .push((endpoint.to_string(), tx));
        self.inner.opened.fetch_add(1, Ordering::SeqCst);

        let guard = CloseGuard(Arc::clone(&self.inner));
        let stream = async_stream::stream! {
            let _guard = guard;
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        Ok(stream.boxed())
    }
}

/// Callback that forwards every delivered envelope into a channel.
pub fn collector() -> (MessageCallback, mpsc::UnboundedReceiver<Envelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: MessageCallback = Arc::new(move |envelope: Envelope| {
        let _ = tx.send(envelope);
    });
    (callback, rx)
}

pub async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, state: ConnectionState) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|current| *current == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state:?}"))
        .unwrap();
}

pub async fn next_delivery(rx: &mut mpsc::UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("delivery channel closed")
}

/// Asserts nothing arrives within a short grace period.
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Envelope>) {
    let result = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(result.is_err(), "unexpected delivery: {result:?}");
}

pub struct RunningRelay {
    pub base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Drop for RunningRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Serves a relay on an ephemeral port for the duration of a test.
pub async fn spawn_relay(config: RelayConfig) -> RunningRelay {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = relay::serve_with_shutdown(listener, &config, async {
            let _ = rx.await;
        })
        .await;
    });
    RunningRelay {
        base_url: format!("http://{addr}"),
        shutdown: Some(tx),
    }
}
