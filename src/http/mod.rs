//! HTTP API
//!
//! WebRTC signaling, codec and RTSP URL lookups, and the status projections:
//! - `POST /stream/webrtc`: SDP offer for a channel or an upstream URL
//! - `GET /stream/codec/:uuid`: WebRTC-capable tracks
//! - `GET /stream/rtsp/:uuid`: RTSP URL of a channel
//! - `GET /stream/api/status[/:uuid]`: channel status
//! - `GET /stream/api/server/status`: server totals

pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::ingest::IngestSupervisor;
use crate::registry::Registry;
use crate::webrtc::WebRtcGateway;

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub gateway: WebRtcGateway,
    pub supervisor: IngestSupervisor,
    /// Port advertised in RTSP URLs
    pub rtsp_port: u16,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(gateway: WebRtcGateway, supervisor: IngestSupervisor, rtsp_port: u16) -> Self {
        Self {
            gateway,
            supervisor,
            rtsp_port,
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.supervisor.registry()
    }
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS, Method::GET, Method::PUT])
        .allow_headers(Any);

    Router::new()
        .route("/stream/webrtc", post(handlers::webrtc_offer))
        .route("/stream/codec/:uuid", get(handlers::codec_info))
        .route("/stream/rtsp/:uuid", get(handlers::rtsp_url))
        .route("/stream/api/status", get(handlers::status_all))
        .route("/stream/api/status/:uuid", get(handlers::status_one))
        .route("/stream/api/server/status", get(handlers::server_status))
        .layer(cors)
        .with_state(state)
}

/// Serve the API on a bound listener until the server fails
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(addr = %addr, "HTTP server listening");
    }
    axum::serve(listener, router(state)).await
}
