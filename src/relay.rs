use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Json, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::domains::envelope::{Envelope, MessageKind, NEW_MESSAGE_TOPIC, PRINCIPAL_HEADER};
use crate::error::{BedlamError, Result};

/// One fan-out on the hub: every subscriber receives every broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct HubBroadcast {
    pub target: String,
    pub payload: Value,
}

#[derive(Clone)]
pub struct RelayState {
    pub hub: broadcast::Sender<HubBroadcast>,
    pub keep_alive: Duration,
    pub strict_validation: bool,
    closing: Arc<watch::Sender<bool>>,
}

impl RelayState {
    pub fn new(config: &RelayConfig) -> Self {
        let (hub, _) = broadcast::channel(config.channel_capacity.max(1));
        let (closing, _) = watch::channel(false);
        Self {
            hub,
            keep_alive: config.keep_alive(),
            strict_validation: config.strict_validation,
            closing: Arc::new(closing),
        }
    }

    /// Ends every open hub stream so graceful shutdown can complete.
    pub fn close(&self) {
        self.closing.send_replace(true);
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    subscribers: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/messages", post(post_message))
        .route("/hub", get(hub_stream))
        .with_state(state)
}

async fn health(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        subscribers: state.hub.receiver_count(),
    })
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn principal_name(headers: &HeaderMap) -> Option<String> {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Stamps the trusted sender and republishes. No dedup and no persistence here;
/// participants filter for themselves.
async fn post_message(State(state): State<RelayState>, headers: HeaderMap, body: Bytes) -> Response {
    let mut message: Map<String, Value> = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            return error_response(StatusCode::BAD_REQUEST, "message body must be a JSON object")
        }
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };

    if let Some(principal) = principal_name(&headers) {
        message.insert("sender".to_string(), Value::String(principal));
    }
    let payload = Value::Object(message);

    if state.strict_validation {
        match Envelope::from_value(payload.clone()) {
            Ok(envelope) if envelope.kind() != MessageKind::Unknown => {}
            Ok(envelope) => {
                return error_response(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    format!("unknown message type for {}", envelope.message_id()),
                )
            }
            Err(err) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()),
        }
    }

    let message_id = payload
        .get("messageID")
        .or_else(|| payload.get("messageId"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let subscribers = state
        .hub
        .send(HubBroadcast {
            target: NEW_MESSAGE_TOPIC.to_string(),
            payload,
        })
        .unwrap_or(0);
    debug!(message_id = %message_id, subscribers, "relayed message");

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "subscribers": subscribers})),
    )
        .into_response()
}

async fn hub_stream(State(state): State<RelayState>) -> Response {
    let mut receiver = state.hub.subscribe();
    let mut closing = state.closing.subscribe();
    let keep_alive = state.keep_alive;
    info!(subscribers = state.hub.receiver_count(), "hub subscriber joined");

    let body = Body::from_stream(async_stream::stream! {
        yield Ok::<Bytes, std::convert::Infallible>(Bytes::from_static(b": connected\n\n"));
        if *closing.borrow() {
            return;
        }
        let mut tick = tokio::time::interval_at(tokio::time::Instant::now() + keep_alive, keep_alive);
        // a dropped closer is not a close request; streams end with the hub instead
        let mut watch_closing = true;
        loop {
            let frame = tokio::select! {
                received = receiver.recv() => match received {
                    Ok(message) => {
                        let data = serde_json::to_string(&message.payload).unwrap_or_default();
                        Some(format!("event: {}\ndata: {}\n\n", message.target, data))
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "hub subscriber lagged");
                        None
                    }
                    Err(_) => break,
                },
                _ = tick.tick() => Some(": keep-alive\n\n".to_string()),
                changed = closing.changed(), if watch_closing => match changed {
                    Ok(()) if *closing.borrow() => break,
                    Ok(()) => None,
                    Err(_) => {
                        watch_closing = false;
                        None
                    }
                },
            };
            if let Some(frame) = frame {
                yield Ok(Bytes::from(frame));
            }
        }
    });

    match Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .body(body)
    {
        Ok(response) => response,
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

pub async fn run(config: &RelayConfig) -> Result<()> {
    run_with_shutdown(config, futures::future::pending::<()>()).await
}

pub async fn run_with_shutdown<F>(config: &RelayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| BedlamError::Runtime(e.to_string()))?;
    serve_with_shutdown(listener, config, shutdown).await
}

/// Serves on an already bound listener, so callers can pick port 0.
pub async fn serve_with_shutdown<F>(listener: TcpListener, config: &RelayConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener
        .local_addr()
        .map_err(|e| BedlamError::Runtime(e.to_string()))?;
    info!(%local_addr, strict = config.strict_validation, "relay listening");

    let state = RelayState::new(config);
    let closer = state.clone();
    let shutdown = async move {
        shutdown.await;
        closer.close();
    };
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| BedlamError::Runtime(e.to_string()))?;
    Ok(())
}
