//! HTTP request handlers

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::Error;
use crate::registry::RegistryError;
use crate::stats::{ChannelStatus, ServerStats, StatusReport};
use crate::webrtc::track_kinds;

use super::AppState;

const NOT_FOUND: &str = "Stream not found";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn error_from(e: &Error) -> Response {
    match e {
        Error::Registry(RegistryError::ChannelNotFound(_)) => error_response(StatusCode::NOT_FOUND, NOT_FOUND),
        e => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Host of the request without its port
fn request_host(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    strip_port(host).to_string()
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [v6]:port
        return match rest.find(']') {
            Some(end) => &host[..end + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

fn rtsp_base(headers: &HeaderMap, port: u16) -> String {
    format!("rtsp://{}:{}", request_host(headers), port)
}

/// Form of `POST /stream/webrtc`
#[derive(Debug, Default, Deserialize)]
pub struct WebRtcForm {
    /// Configured channel
    pub suuid: Option<String>,
    /// Upstream URL, registered on demand
    pub url: Option<String>,
    /// Base64 offer; the answer is returned as plain text
    pub data: Option<String>,
    /// Base64 offer; the answer is returned as JSON
    pub sdp64: Option<String>,
}

#[derive(Debug, Serialize)]
struct WebRtcResponse {
    tracks: Vec<&'static str>,
    sdp64: String,
}

pub async fn webrtc_offer(State(state): State<AppState>, Form(form): Form<WebRtcForm>) -> Response {
    let (offer, plain) = match (form.data.as_deref(), form.sdp64.as_deref()) {
        (Some(data), _) => (data, true),
        (None, Some(sdp64)) => (sdp64, false),
        (None, None) => return error_response(StatusCode::BAD_REQUEST, "missing offer"),
    };

    let result = match (form.suuid.as_deref(), form.url.as_deref()) {
        (Some(suuid), _) => state.gateway.offer(suuid, offer).await,
        (None, Some(url)) => state.gateway.offer_url(url, offer).await,
        (None, None) => return error_response(StatusCode::BAD_REQUEST, "missing suuid or url"),
    };

    match result {
        Ok(answer) if plain => answer.sdp64.into_response(),
        Ok(answer) => Json(WebRtcResponse {
            tracks: answer.tracks,
            sdp64: answer.sdp64,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "WebRTC offer failed");
            error_from(&e)
        }
    }
}

#[derive(Debug, Serialize)]
struct CodecInfo {
    #[serde(rename = "Type")]
    kind: &'static str,
}

pub async fn codec_info(State(state): State<AppState>, Path(uuid): Path<String>) -> Response {
    let Some(uuid) = state.registry().lookup(&uuid).await else {
        return error_response(StatusCode::NOT_FOUND, NOT_FOUND);
    };

    state.supervisor.ensure_running(&uuid).await;
    match state.registry().get_codecs(&uuid).await {
        Ok(codecs) => {
            let info: Vec<CodecInfo> = track_kinds(&codecs)
                .into_iter()
                .map(|kind| CodecInfo { kind })
                .collect();
            Json(info).into_response()
        }
        Err(e) => error_from(&e.into()),
    }
}

pub async fn rtsp_url(State(state): State<AppState>, Path(uuid): Path<String>, headers: HeaderMap) -> Response {
    let Some(uuid) = state.registry().lookup(&uuid).await else {
        return error_response(StatusCode::NOT_FOUND, NOT_FOUND);
    };

    state.supervisor.ensure_running(&uuid).await;
    let rtsp_url = format!("{}/{}", rtsp_base(&headers, state.rtsp_port), uuid);
    Json(json!({ "uuid": uuid, "rtsp_url": rtsp_url, "status": true })).into_response()
}

pub async fn status_all(State(state): State<AppState>, headers: HeaderMap) -> Json<StatusReport> {
    let base = rtsp_base(&headers, state.rtsp_port);
    Json(StatusReport::collect(state.registry(), &base).await)
}

pub async fn status_one(State(state): State<AppState>, Path(uuid): Path<String>, headers: HeaderMap) -> Response {
    match state.registry().snapshot(&uuid).await {
        Some(snapshot) => {
            let base = rtsp_base(&headers, state.rtsp_port);
            Json(ChannelStatus::from_snapshot(&snapshot, &base)).into_response()
        }
        None => error_response(StatusCode::NOT_FOUND, NOT_FOUND),
    }
}

pub async fn server_status(State(state): State<AppState>) -> Json<ServerStats> {
    Json(ServerStats::collect(state.registry(), state.started_at).await)
}
