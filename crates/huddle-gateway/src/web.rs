use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use huddle_common::helpers::is_valid_room_id;
use huddle_common::IceServer;

use crate::relay::SignalingRelay;
use crate::GatewayConfig;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcConfigResponse {
    pub ws_signaling_url: String,
    pub ice_servers: Vec<IceServer>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetrics {
    pub active_connections: usize,
    pub active_rooms: usize,
    pub active_participants: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn ws_signaling_url(config: &GatewayConfig, headers: &HeaderMap) -> String {
    if let Some(url) = &config.ws_signaling_url {
        return url.clone();
    }
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost:8080");
    format!("ws://{}/ws", host)
}

pub async fn webrtc_config(
    State(config): State<Arc<GatewayConfig>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    Json(WebRtcConfigResponse {
        ws_signaling_url: ws_signaling_url(&config, &headers),
        ice_servers: config.ice_servers.clone(),
    })
}

/// Every room shares one page; the client reads the room id from the path.
pub async fn room_page(
    State(config): State<Arc<GatewayConfig>>,
    Path(room_id): Path<String>,
) -> axum::response::Response {
    if !is_valid_room_id(&room_id) {
        return error_response(StatusCode::BAD_REQUEST, "Invalid room id");
    }

    let index = config.static_dir.join("index.html");
    match tokio::fs::read_to_string(&index).await {
        Ok(body) => Html(body).into_response(),
        Err(err) => {
            warn!("room page unavailable at {}: {}", index.display(), err);
            error_response(StatusCode::NOT_FOUND, "Room page not found")
        }
    }
}

async fn runtime_metrics(relay: &SignalingRelay) -> RuntimeMetrics {
    RuntimeMetrics {
        active_connections: relay.connection_count().await,
        active_rooms: relay.room_count().await,
        active_participants: relay.participant_count().await,
    }
}

pub async fn health(State(relay): State<Arc<SignalingRelay>>) -> impl IntoResponse {
    (StatusCode::OK, Json(runtime_metrics(&relay).await))
}

pub async fn prometheus_metrics(State(relay): State<Arc<SignalingRelay>>) -> impl IntoResponse {
    let metrics = runtime_metrics(&relay).await;

    let prometheus_text = format!(
        r#"# HELP huddle_gateway_websocket_connections Active WebSocket connections
# TYPE huddle_gateway_websocket_connections gauge
huddle_gateway_websocket_connections {active_connections}
# HELP huddle_gateway_rooms Rooms with at least one member
# TYPE huddle_gateway_rooms gauge
huddle_gateway_rooms {active_rooms}
# HELP huddle_gateway_participants Participants that joined a room
# TYPE huddle_gateway_participants gauge
huddle_gateway_participants {active_participants}
"#,
        active_connections = metrics.active_connections,
        active_rooms = metrics.active_rooms,
        active_participants = metrics.active_participants,
    );

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        prometheus_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(url: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            static_dir: PathBuf::from("public"),
            ice_servers: vec![],
            ws_signaling_url: url.map(str::to_string),
        }
    }

    #[test]
    fn test_ws_url_prefers_configured_value() {
        let headers = HeaderMap::new();
        assert_eq!(
            ws_signaling_url(&config(Some("wss://huddle.example/ws")), &headers),
            "wss://huddle.example/ws"
        );
    }

    #[test]
    fn test_ws_url_from_host_header() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "10.0.0.5:9000".parse().unwrap());
        assert_eq!(
            ws_signaling_url(&config(None), &headers),
            "ws://10.0.0.5:9000/ws"
        );
    }
}
