// REST API endpoints

use axum::{Router, extract::State, response::Json, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use super::DevicesResponse;
use crate::error::RouterResult;
use crate::routes::snapshot::RouteSnapshot;
use crate::trie::AddressTrie;

#[derive(Clone)]
pub struct AppState {
    trie: Arc<AddressTrie>,
    snapshot: Arc<RouteSnapshot>,
}

impl AppState {
    pub fn new(trie: Arc<AddressTrie>, snapshot: Arc<RouteSnapshot>) -> Self {
        AppState { trie, snapshot }
    }
}

pub fn create_api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/trie", get(get_trie))
        .route("/devices", get(get_devices))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Serve the status endpoints until `shutdown` fires
pub async fn serve(addr: SocketAddr, state: Arc<AppState>, shutdown: CancellationToken) -> RouterResult<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Status endpoint listening on http://{}", listener.local_addr()?);
    tracing::info!("  GET  http://{}/trie", addr);
    tracing::info!("  GET  http://{}/devices", addr);

    axum::serve(listener, create_api_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

async fn get_trie(State(state): State<Arc<AppState>>) -> String {
    state.trie.dump()
}

async fn get_devices(State(state): State<Arc<AppState>>) -> Json<DevicesResponse> {
    Json(DevicesResponse {
        hostname: get_hostname(),
        devices: state.snapshot.devices(),
        preferred: state.snapshot.preferred().to_vec(),
        refreshed_at: state.snapshot.refreshed_at().map(|t| t.to_rfc3339()),
    })
}

fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
