//! Connection handlers for Huddle server.
//!
//! Each WebSocket connection may hold one name. Requests are decoded and
//! handed to the coordinator in order; responses and server pushes share one
//! outbound queue drained by a dedicated writer task.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use crate::peer::{Identity, WsPeer};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use huddle_core::{Coordinator, CoordinatorError};
use huddle_protocol::{codec, codes, Frame, PROTOCOL_VERSION};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The chat coordinator.
    pub coordinator: Coordinator,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            coordinator: Coordinator::with_config(config.coordinator_config()),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let addr = config.bind_addr()?;
    let state = Arc::new(AppState::new(config.clone()));

    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let app = Router::new()
        .route(&config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    let listener = TcpListener::bind(addr).await?;

    info!("Huddle server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.coordinator.stats();
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL_VERSION,
        "stats": stats,
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let max_message_size = state.config.limits.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    debug!("WebSocket connected");

    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<Frame>(state.config.limits.outbound_queue);

    // Writer: the only task touching the sink.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let data = match codec::encode(&frame) {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "Failed to encode frame");
                    metrics::record_error("encode");
                    continue;
                }
            };
            metrics::record_frame(data.len(), "outbound");
            if sink.send(Message::Binary(data.to_vec())).await.is_err() {
                break;
            }
        }
    });

    let mut identity: Option<Identity> = None;
    let mut read_buffer = BytesMut::with_capacity(4096);

    'connection: loop {
        match stream.next().await {
            Some(Ok(Message::Binary(data))) => {
                metrics::record_frame(data.len(), "inbound");
                read_buffer.extend_from_slice(&data);
            }
            Some(Ok(Message::Text(text))) => {
                metrics::record_frame(text.len(), "inbound");
                read_buffer.extend_from_slice(text.as_bytes());
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) => {
                debug!("Received close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
            None => {
                debug!("WebSocket stream ended");
                break;
            }
        }

        loop {
            let frame = match codec::decode_from(&mut read_buffer) {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Undecodable frame, closing connection");
                    metrics::record_error("protocol");
                    let _ = outbound
                        .send(Frame::error(0, codes::INVALID_FRAME, e.to_string()))
                        .await;
                    break 'connection;
                }
            };

            let start = Instant::now();
            let response = handle_frame(frame, &state, &outbound, &mut identity).await;
            metrics::record_latency(start.elapsed().as_secs_f64());
            metrics::observe(&state.coordinator.stats());

            if let Some(response) = response {
                if outbound.send(response).await.is_err() {
                    break 'connection;
                }
            }
        }
    }

    if let Some(current) = identity.take() {
        state
            .coordinator
            .disconnect(&current.name, current.session)
            .await;
        metrics::observe(&state.coordinator.stats());
    }
    writer.abort();

    debug!("WebSocket disconnected");
}

/// Handle a decoded request frame. Returns the response, if any.
pub(crate) async fn handle_frame(
    frame: Frame,
    state: &AppState,
    outbound: &mpsc::Sender<Frame>,
    identity: &mut Option<Identity>,
) -> Option<Frame> {
    metrics::record_request(format!("{:?}", frame.frame_type()));

    if identity.as_ref().is_some_and(|current| !current.is_live()) {
        debug!("Session was reaped, dropping identity");
        *identity = None;
    }

    match frame {
        Frame::Register { id, name } => {
            if let Some(current) = identity {
                return Some(Frame::error(
                    id,
                    codes::ALREADY_REGISTERED,
                    format!("Already registered as {}", current.name),
                ));
            }

            let (peer, live) = WsPeer::new(outbound.clone());
            Some(match state.coordinator.register(&name, Box::new(peer)).await {
                Ok(session) => {
                    debug!(name = %name, session, "Connection registered");
                    *identity = Some(Identity::new(name, session, live));
                    Frame::ack(id)
                }
                Err(e) => error_frame(id, &e),
            })
        }

        Frame::Unregister { id } => {
            if let Some(current) = identity.take() {
                state
                    .coordinator
                    .disconnect(&current.name, current.session)
                    .await;
            }
            Some(Frame::ack(id))
        }

        Frame::Rename { id, new_name } => {
            let Some(current) = identity.as_mut() else {
                return Some(not_registered(id));
            };
            let result = state
                .coordinator
                .rename_session(&current.name, &new_name, current.session)
                .await;
            Some(match result {
                Ok(()) => {
                    current.name = new_name;
                    Frame::ack(id)
                }
                Err(e) => respond_error(id, &e, identity),
            })
        }

        Frame::Broadcast { id, body } => {
            let Some(current) = identity.as_ref() else {
                return Some(not_registered(id));
            };
            let result = state
                .coordinator
                .broadcast_as(&current.name, current.session, &body)
                .await;
            Some(match result {
                Ok(delivery) => {
                    debug!(
                        delivered = delivery.delivered,
                        reaped = delivery.reaped.len(),
                        "Broadcast complete"
                    );
                    Frame::ack(id)
                }
                Err(e) => respond_error(id, &e, identity),
            })
        }

        Frame::SendPrivate {
            id,
            recipient,
            body,
        } => {
            let Some(current) = identity.as_ref() else {
                return Some(not_registered(id));
            };
            let result = state
                .coordinator
                .send_private_as(&current.name, current.session, &recipient, &body)
                .await;
            Some(match result {
                Ok(()) => Frame::ack(id),
                Err(e) => respond_error(id, &e, identity),
            })
        }

        Frame::ListActive { id } => Some(Frame::active_list(
            id,
            state.coordinator.list_active().await,
        )),

        Frame::Ping { timestamp } => Some(Frame::pong(timestamp)),

        Frame::Pong { .. } => None,

        other => {
            warn!(frame_type = ?other.frame_type(), "Unexpected frame type");
            metrics::record_error("unexpected_frame");
            Some(Frame::error(
                other.request_id().unwrap_or(0),
                codes::INVALID_FRAME,
                "Unexpected frame type",
            ))
        }
    }
}

fn not_registered(id: u64) -> Frame {
    Frame::error(id, codes::NOT_REGISTERED, "Register a name first")
}

/// Error response for a request made under `identity`. A session that lost
/// its name is no longer registered, whatever the liveness flag says.
fn respond_error(id: u64, err: &CoordinatorError, identity: &mut Option<Identity>) -> Frame {
    if matches!(err, CoordinatorError::NotOwner(_)) {
        debug!("Session no longer holds its name, dropping identity");
        *identity = None;
        return not_registered(id);
    }
    error_frame(id, err)
}

fn error_frame(id: u64, err: &CoordinatorError) -> Frame {
    let code = match err {
        CoordinatorError::InvalidName(_) => codes::INVALID_NAME,
        CoordinatorError::NameTaken(_) => codes::NAME_TAKEN,
        CoordinatorError::NotFound(_) => codes::NOT_FOUND,
        CoordinatorError::RecipientOffline(_) => codes::RECIPIENT_OFFLINE,
        CoordinatorError::RemoteUnavailable { .. } => codes::REMOTE_UNAVAILABLE,
        CoordinatorError::CapacityReached => codes::CAPACITY_REACHED,
        CoordinatorError::NotOwner(_) => codes::NOT_REGISTERED,
    };
    Frame::error(id, code, err.to_string())
}
