//! Transport for kubesight
//!
//! An axum router exposing the live log WebSocket, the streamed analyze
//! endpoint and a health check.

mod analyze;
mod state;
mod transport;
mod ws;

use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use tokio::net::TcpListener;

pub use state::{AppState, ServerConfig};
pub use transport::CLOSE_INVALID_REQUEST;

/// Build the application router
///
/// Routes:
/// - `GET /ws/logs` - WebSocket stream of one container's logs
/// - `POST /api/analyze` - streamed analysis of a posted excerpt
/// - `GET /healthz` - liveness and active session count
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/logs", get(ws::logs_handler))
        .route("/api/analyze", post(analyze::analyze_handler))
        .route("/healthz", get(health))
        .with_state(state)
}

/// Serve until `state.shutdown` is cancelled, then stop every session
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    let registry = state.registry.clone();

    tracing::info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    registry.stop_all().await;
    tracing::info!("Server stopped");
    Ok(())
}

async fn health(State(state): State<AppState>) -> String {
    format!("ok sessions={}\n", state.registry.len().await)
}
