//! Huddle gateway: room membership and signaling relay.
//!
//! Browsers and native clients open a WebSocket at `/ws`, join a room, and
//! exchange opaque negotiation payloads and chat through the relay. Media
//! never passes through here.

pub mod relay;
pub mod room;
pub mod security;
pub mod signal;
pub mod web;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::FromRef,
    http::{header, Method},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use huddle_common::{IceServer, DEFAULT_STUN_SERVER};

pub use relay::SignalingRelay;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Directory with the browser client; `index.html` doubles as the room page.
    pub static_dir: PathBuf,
    /// Handed to every participant in `welcome` and from `/webrtc/config`.
    pub ice_servers: Vec<IceServer>,
    /// Overrides the URL derived from the request `Host` header.
    pub ws_signaling_url: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("public"),
            ice_servers: vec![IceServer::stun(DEFAULT_STUN_SERVER)],
            ws_signaling_url: None,
        }
    }
}

/// Builds ICE server entries from URLs. An empty list falls back to the
/// public STUN server.
pub fn parse_ice_servers<S: AsRef<str>>(urls: &[S]) -> Vec<IceServer> {
    let servers: Vec<IceServer> = urls
        .iter()
        .map(|url| url.as_ref().trim())
        .filter(|url| !url.is_empty())
        .map(IceServer::stun)
        .collect();

    if servers.is_empty() {
        vec![IceServer::stun(DEFAULT_STUN_SERVER)]
    } else {
        servers
    }
}

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<SignalingRelay>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            relay: Arc::new(SignalingRelay::new()),
            config: Arc::new(config),
        }
    }
}

impl FromRef<AppState> for Arc<SignalingRelay> {
    fn from_ref(state: &AppState) -> Self {
        state.relay.clone()
    }
}

impl FromRef<AppState> for Arc<GatewayConfig> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

pub fn router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    Router::new()
        .route("/ws", get(signal::ws_handler))
        .route("/room/:room_id", get(web::room_page))
        .route("/webrtc/config", get(web::webrtc_config))
        .route("/health", get(web::health))
        .route("/metrics/runtime", get(web::health))
        .route("/metrics/prometheus", get(web::prometheus_metrics))
        .fallback_service(static_files)
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the gateway on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
