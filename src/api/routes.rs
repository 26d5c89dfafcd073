use std::path::{Component, Path};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Redirect, Response};
use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::time::timeout;
use uuid::Uuid;

use super::{AppState, cookie, set_cookie, clear_cookie_header};
use crate::tunnel::{HttpRequestFrame, RESPONSE_DEADLINE};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.registry.stats();
    axum::Json(json!({
        "status": "ok",
        "wafs": stats.wafs,
        "clients": stats.clients,
        "allocations": state.service.allocations.len(),
    }))
}

pub async fn wafs(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.registry.wafs_portal())
}

pub async fn admin_stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !super::admin_authorized(&state, &headers).await {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    axum::Json(state.registry.admin_snapshot()).into_response()
}

#[derive(Deserialize)]
pub struct SelectWafBody {
    #[serde(rename = "wafId")]
    waf_id: String,
    #[allow(dead_code)]
    backend: Option<String>,
}

pub async fn select_waf(State(state): State<AppState>, axum::Json(body): axum::Json<SelectWafBody>) -> Response {
    if state.registry.waf(&body.waf_id).is_none() {
        return (StatusCode::NOT_FOUND, "unknown waf").into_response();
    }

    let mut response = StatusCode::OK.into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, set_cookie("waf_relay", &body.waf_id));
    response
}

#[derive(Deserialize)]
pub struct SelectQuery {
    waf: String,
    backend: Option<String>,
}

pub async fn select_redirect(State(state): State<AppState>, Query(query): Query<SelectQuery>) -> Response {
    if state.registry.waf(&query.waf).is_none() {
        return (StatusCode::NOT_FOUND, "unknown waf").into_response();
    }

    let location = match &query.backend {
        Some(backend) => format!("/__b/{backend}/"),
        None => "/".to_string(),
    };

    let mut response = Redirect::to(&location).into_response();
    response
        .headers_mut()
        .insert(header::SET_COOKIE, set_cookie("waf_relay", &query.waf));
    response
}

pub async fn clear_selection() -> Response {
    let mut response = StatusCode::OK.into_response();
    response.headers_mut().insert(header::SET_COOKIE, clear_cookie_header("waf_relay"));
    response
}

pub async fn admin_config(State(state): State<AppState>) -> impl IntoResponse {
    let idp = &state.config.identity_provider;
    let body = format!(
        "window.__IDP_CONFIG__ = {};",
        json!({
            "url": idp.url,
            "realm": idp.realm,
            "clientId": idp.client_id,
            "mockAuth": idp.mock_auth,
        })
    );
    ([(header::CONTENT_TYPE, "application/javascript")], body)
}

/// Serves `config.signal.static_dir`; `..` anywhere in the requested path
/// is rejected with 403 rather than silently normalized away.
pub async fn static_file(State(state): State<AppState>, uri: Uri) -> Response {
    let requested = uri.path().trim_start_matches("/static/");

    if Path::new(requested).components().any(|c| matches!(c, Component::ParentDir)) {
        return (StatusCode::FORBIDDEN, "forbidden").into_response();
    }

    let path = state.config.signal.static_dir.join(requested);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = guess_mime(&path);
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

fn guess_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        _ => "application/octet-stream",
    }
}

/// §4.8: everything not matched by the fixed API surface is tunneled to a
/// WAF's control channel and the response reassembled here.
pub async fn tunnel(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let sticky = cookie(&headers, "waf_relay");
    let Some(waf) = state.registry.select_waf(sticky.as_deref()) else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no waf registered").into_response();
    };

    let id = Uuid::new_v4();
    let header_pairs: Vec<(String, String)> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();

    let frame = HttpRequestFrame::new(id, method.to_string(), uri.to_string(), header_pairs, &body);
    let json = match serde_json::to_string(&frame) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to encode tunneled request: err={e}");
            return (StatusCode::BAD_GATEWAY, "encode error").into_response();
        }
    };

    // `guard` removes the pending entry on drop unless disarmed below,
    // including when this future is dropped mid-await (client disconnect).
    let (mut guard, rx) = state.tunnel.insert(id);

    if !state.registry.send_http_request(&waf.id, id, json) {
        return (StatusCode::BAD_GATEWAY, "waf channel not open").into_response();
    }

    match timeout(RESPONSE_DEADLINE, rx).await {
        Ok(Ok(response)) => {
            guard.disarm();
            build_response(&waf.id, response)
        }
        Ok(Err(_)) => {
            info!("tunnel request {id} lost its waf before a response arrived");
            (StatusCode::GATEWAY_TIMEOUT, "waf channel lost").into_response()
        }
        Err(_) => {
            (StatusCode::GATEWAY_TIMEOUT, "waf response deadline exceeded").into_response()
        }
    }
}

fn build_response(waf_id: &str, frame: crate::tunnel::HttpResponseFrame) -> Response {
    use base64::Engine;

    let status = StatusCode::from_u16(frame.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = base64::engine::general_purpose::STANDARD.decode(&frame.body).unwrap_or_default();

    let mut response = Response::builder().status(status);
    for (name, value) in &frame.headers {
        response = response.header(name.as_str(), value.as_str());
    }

    let mut response = response.body(axum::body::Body::from(body)).unwrap_or_else(|_| {
        Response::builder().status(StatusCode::BAD_GATEWAY).body(axum::body::Body::empty()).unwrap()
    });

    response.headers_mut().append(header::SET_COOKIE, set_cookie("waf_relay", waf_id));
    response
}
