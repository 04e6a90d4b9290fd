//! `GET /ws/logs`: one live log session per connection
//!
//! Query parameters select the container (`namespace`, `pod`, `container`)
//! and optionally `since`, `filter`, `follow`, `demo` and `scenario`. Log
//! chunks arrive as plain text frames, control events as JSON frames.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::extract::rejection::QueryRejection;
use axum::response::Response;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use kubesight_logs::{SessionCommand, SessionSpec, SourceProvider};
use kubesight_types::{ControlEvent, StreamEvent, StreamParams, StreamQuery, ViewerRequest};

use crate::state::AppState;
use crate::transport::{CLOSE_INVALID_REQUEST, WsTransport};

/// Events queued for a viewer before the session waits on the socket
const EVENT_BUFFER: usize = 256;

pub(crate) async fn logs_handler(
    State(state): State<AppState>,
    query: Result<Query<StreamQuery>, QueryRejection>,
    ws: WebSocketUpgrade,
) -> Response {
    let params = match query {
        Ok(Query(query)) => StreamParams::try_from(query).map_err(|e| e.to_string()),
        Err(e) => Err(e.body_text()),
    };

    let params = match params {
        Ok(params) => params,
        Err(message) => return reject(ws, message),
    };

    let Some(provider) = state.provider_for(params.mode) else {
        return reject(
            ws,
            "no cluster connection is configured; use demo=true for a scripted stream".to_string(),
        );
    };

    ws.on_upgrade(move |socket| handle_logs_ws(socket, state, params, provider))
}

/// Report a bad request to the viewer and close without starting a session
fn reject(ws: WebSocketUpgrade, message: String) -> Response {
    tracing::debug!(error = %message, "Rejected log stream request");
    ws.on_upgrade(move |socket| async move {
        let mut transport = WsTransport::new(socket);
        transport
            .send_event(StreamEvent::Control(ControlEvent::Error(message)))
            .await;
        transport.close(CLOSE_INVALID_REQUEST, "invalid request").await;
    })
}

async fn handle_logs_ws(
    socket: WebSocket,
    state: AppState,
    params: StreamParams,
    provider: Arc<dyn SourceProvider>,
) {
    let mut transport = WsTransport::new(socket);
    let key = params.key.clone();
    let bridge = state.bridge();

    let (tx, mut events) = mpsc::channel::<StreamEvent>(EVENT_BUFFER);
    let spec = SessionSpec::new(params, provider, Arc::new(tx))
        .with_cluster(state.cluster_label.clone())
        .with_trigger(state.trigger.clone())
        .with_bridge(bridge.clone())
        .with_redactor(state.redactor.clone());
    let session_id = state.registry.start(spec).await;

    tracing::info!(
        session_id,
        namespace = %key.namespace,
        pod = %key.pod,
        container = %key.container,
        "Viewer connected"
    );

    let mut heartbeat = tokio::time::interval(state.keepalive);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the first immediate tick
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                transport.close(1001, "server shutting down").await;
                break;
            }

            event = events.recv() => match event {
                Some(event) => {
                    if !transport.send_event(event).await {
                        break;
                    }
                    heartbeat.reset();
                }
                // Session over and every analysis relayed
                None => {
                    transport.close(1000, "stream closed").await;
                    break;
                }
            },

            message = transport.recv(), if transport.is_alive() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ViewerRequest>(text.as_str()) {
                        Ok(ViewerRequest::Stop) => {
                            tracing::debug!(session_id, "Viewer requested stop");
                            state.registry.stop_session(&key, session_id).await;
                            transport.close(1000, "stopped").await;
                            break;
                        }
                        Ok(ViewerRequest::Clear) => {
                            state
                                .registry
                                .send(&key, session_id, SessionCommand::Clear)
                                .await;
                        }
                        Ok(ViewerRequest::Analyze { question }) => {
                            state
                                .registry
                                .send(&key, session_id, SessionCommand::Analyze { question })
                                .await;
                        }
                        Err(e) => {
                            tracing::debug!(session_id, error = %e, "Malformed viewer request, ignoring");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!(session_id, "Viewer disconnected");
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(session_id, error = %e, "WebSocket receive error");
                    break;
                }
                // Pings are answered by the socket itself
                Some(Ok(_)) => {}
            },

            _ = heartbeat.tick() => {
                if !transport.ping().await {
                    tracing::debug!(session_id, "Viewer gone during heartbeat ping");
                    break;
                }
            }
        }
    }

    state.registry.stop_session(&key, session_id).await;
    if let Some(bridge) = bridge {
        bridge.cancel();
    }
}
