//! Axum HTTP + WebSocket surface on `signal.listen` (§6): the fixed API
//! endpoints, the control-channel upgrade, and the HTTP-tunnel fallback.

mod routes;
mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::routing::{get, post};
use log::{error, info, warn};
use service::Service;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::registry::Registry;
use crate::tunnel::Tunnel;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub tunnel: Arc<Tunnel>,
    pub config: Arc<Config>,
    pub service: Service,
    http_client: reqwest::Client,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/wafs", get(routes::wafs))
        .route("/api/admin/stats", get(routes::admin_stats))
        .route("/api/select-waf", post(routes::select_waf))
        .route("/api/select", get(routes::select_redirect))
        .route("/api/clear-selection", post(routes::clear_selection))
        .route("/admin-config", get(routes::admin_config))
        .route("/static/{*path}", get(routes::static_file))
        .route("/ws", get(ws::upgrade))
        .fallback(routes::tunnel)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP/WS listener and runs it until a shutdown signal arrives.
/// TLS is enabled only when both `tls_cert` and `tls_key` are configured.
///
/// On SIGINT/SIGTERM, shuts down in the order the signaling/tunnel surface
/// must: close every WAF/client control channel with a normal-closure code,
/// tear down every TURN allocation (closing its relay socket), stop the
/// UDP/TCP transport loops (`transport_shutdown`) and this HTTP/WS listener,
/// then let `graceful_shutdown`'s timeout drain in-flight responses.
pub async fn run(
    config: Arc<Config>,
    registry: Arc<Registry>,
    tunnel: Arc<Tunnel>,
    service: Service,
    transport_shutdown: CancellationToken,
) {
    let state = AppState {
        registry: registry.clone(),
        tunnel,
        config: config.clone(),
        service: service.clone(),
        http_client: reqwest::Client::new(),
    };

    let app = router(state).into_make_service_with_connect_info::<SocketAddr>();
    let listen = config.signal.listen;

    let tls = match (&config.signal.tls_cert, &config.signal.tls_key) {
        (Some(cert), Some(key)) => match axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key).await {
            Ok(config) => Some(config),
            Err(e) => {
                error!("tls load failed: cert={}, err={e}", cert.display());
                None
            }
        },
        _ => None,
    };

    info!("signaling http/ws listening: addr={listen}, tls={}", tls.is_some());

    let handle = shutdown_handle(registry, service, transport_shutdown);

    let result = match tls {
        Some(tls) => {
            axum_server::bind_rustls(listen, tls)
                .handle(handle)
                .serve(app)
                .await
        }
        None => {
            axum_server::bind(listen)
                .handle(handle)
                .serve(app)
                .await
        }
    };

    if let Err(e) = result {
        error!("signaling http/ws listener stopped: err={e}");
    }
}

fn shutdown_handle(
    registry: Arc<Registry>,
    service: Service,
    transport_shutdown: CancellationToken,
) -> axum_server::Handle {
    let handle = axum_server::Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone(), registry, service, transport_shutdown));
    handle
}

async fn shutdown_on_signal(
    handle: axum_server::Handle,
    registry: Arc<Registry>,
    service: Service,
    transport_shutdown: CancellationToken,
) {
    let ctrl_c = async { tokio::signal::ctrl_c().await.ok() };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!("failed to install sigterm handler: err={e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, closing control channels and allocations");
    registry.shutdown();
    service.allocations.teardown_all();
    transport_shutdown.cancel();

    info!("stopping listeners, draining in-flight responses");
    handle.graceful_shutdown(Some(std::time::Duration::from_secs(10)));
}

/// Verifies an admin-API bearer credential. Always requires one: it matches
/// `signal.admin_secret` (the break-glass path), or — when an identity
/// provider is configured and not in mock mode — is accepted after the
/// provider's userinfo endpoint confirms it. `mock_auth` accepts any
/// non-empty bearer token for local development.
async fn admin_authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(token) = bearer_token(headers) else {
        return false;
    };

    if token == state.config.signal.admin_secret {
        return true;
    }

    let idp = &state.config.identity_provider;
    let Some(url) = &idp.url else {
        return false;
    };

    if idp.mock_auth {
        warn!("admin request authorized via mock identity provider");
        return true;
    }

    match state.http_client.get(format!("{url}/userinfo")).bearer_auth(token).send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            warn!("identity provider request failed: err={e}");
            false
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

fn cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn set_cookie(name: &str, value: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax"))
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn clear_cookie_header(name: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"))
        .unwrap_or_else(|_| HeaderValue::from_static(""))
}
