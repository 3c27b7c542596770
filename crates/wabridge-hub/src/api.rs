//! HTTP API server: QR page, status, send and admin endpoints.
//!
//! Endpoints:
//! - GET  /               : operator page (QR while pending, send form when ready)
//! - GET  /qr.png, /qr    : current QR as PNG, 404 when none
//! - GET  /status, /health: connection status snapshot
//! - GET|POST /send       : send a text message
//! - GET|POST /logout     : unlink the device (admin)
//! - GET|POST /restart    : restart the session (admin)

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use wabridge_core::error::{BridgeError, Result};
use wabridge_core::lifecycle::ConnectionState;

use crate::gateway::SendGateway;
use crate::manager::{ConnectionManager, ADMIN_RESTART_DELAY};
use crate::middleware::{logging_middleware, rate_limit_middleware, RateLimiter};
use crate::page::{self, PageView};
use crate::qr;

/// Shared API state.
pub struct ApiState {
    pub manager: Arc<ConnectionManager>,
    pub gateway: Arc<SendGateway>,
    pub admin_token: String,
    pub webhook_url: Option<String>,
    pub started_at: Instant,
}

type SharedState = Arc<ApiState>;

// ─── Request/Response types ────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusSnapshot {
    pub ok: bool,
    pub status: ConnectionState,
    pub ready: bool,
    pub has_qr: bool,
    pub webhook_url: Option<String>,
    pub uptime_secs: u64,
    pub reconnect_attempts: u32,
    pub last_disconnect: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub ok: bool,
    pub to: String,
    pub sent: bool,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminResponse {
    pub ok: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

type ApiResult<T> = std::result::Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            ok: false,
            error: error.into(),
        }),
    )
}

fn bridge_error(e: &BridgeError) -> (StatusCode, Json<ErrorResponse>) {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    api_error(status, e.to_string())
}

// ─── Handlers ──────────────────────────────────────────────

pub async fn status_snapshot(state: &ApiState) -> StatusSnapshot {
    let snap = state.manager.snapshot().await;
    StatusSnapshot {
        ok: true,
        status: snap.state,
        ready: snap.is_ready(),
        has_qr: snap.qr.is_some(),
        webhook_url: state.webhook_url.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        reconnect_attempts: snap.reconnect_attempts,
        last_disconnect: snap.last_reason,
    }
}

async fn status(State(state): State<SharedState>) -> Json<StatusSnapshot> {
    Json(status_snapshot(&state).await)
}

async fn index(State(state): State<SharedState>) -> Html<String> {
    let snap = state.manager.snapshot().await;
    let view = PageView {
        state: snap.state,
        qr_data_url: snap.qr.as_ref().map(|q| qr::png_data_url(&q.png)),
        last_reason: snap.last_reason.as_deref(),
        webhook_url: state.webhook_url.as_deref(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    };
    Html(page::render(&view))
}

async fn qr_png(State(state): State<SharedState>) -> Response {
    match state.manager.snapshot().await.qr {
        Some(qr) => ([(header::CONTENT_TYPE, "image/png")], qr.png).into_response(),
        None => (StatusCode::NOT_FOUND, "QR no disponible").into_response(),
    }
}

async fn do_send(state: &ApiState, req: SendRequest) -> ApiResult<SendResponse> {
    let phone = req.phone.unwrap_or_default();
    let text = req.text.unwrap_or_default();

    match state.gateway.send(&phone, &text).await {
        Ok(ok) => Ok(Json(SendResponse {
            ok: true,
            to: ok.to,
            sent: true,
            truncated: ok.truncated,
            message_id: ok.message_id,
        })),
        Err(e) => {
            warn!("Send to '{}' failed: {}", phone, e);
            Err(bridge_error(&e))
        }
    }
}

async fn send_get(
    State(state): State<SharedState>,
    Query(req): Query<SendRequest>,
) -> ApiResult<SendResponse> {
    do_send(&state, req).await
}

async fn send_post(
    State(state): State<SharedState>,
    payload: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<SendResponse> {
    let Json(req) =
        payload.map_err(|e| api_error(StatusCode::BAD_REQUEST, e.body_text()))?;
    do_send(&state, req).await
}

/// Token from `x-admin-token` or `?token=`.
fn is_admin(state: &ApiState, headers: &HeaderMap, query: &TokenQuery) -> bool {
    if state.admin_token.is_empty() {
        return false;
    }
    let supplied = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .or(query.token.as_deref());
    supplied.is_some_and(|token| constant_time_eq(token, &state.admin_token))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

async fn logout(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult<AdminResponse> {
    if !is_admin(&state, &headers, &query) {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    info!("👋 Admin logout");
    state.manager.logout().await.map_err(|e| bridge_error(&e))?;
    Ok(Json(AdminResponse {
        ok: true,
        message: "Sesión cerrada, reiniciando cliente".to_string(),
    }))
}

async fn restart(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> ApiResult<AdminResponse> {
    if !is_admin(&state, &headers, &query) {
        return Err(api_error(StatusCode::UNAUTHORIZED, "Unauthorized"));
    }
    info!("🔄 Admin restart");
    state.manager.restart_after(ADMIN_RESTART_DELAY);
    Ok(Json(AdminResponse {
        ok: true,
        message: "Reiniciando cliente".to_string(),
    }))
}

// ─── Server builder ────────────────────────────────────────

/// Build the API router.
pub fn build_router(state: ApiState, limiter: RateLimiter) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/qr.png", get(qr_png))
        .route("/qr", get(qr_png))
        .route("/status", get(status))
        .route("/health", get(status))
        .route("/send", get(send_get).post(send_post))
        .route("/logout", get(logout).post(logout))
        .route("/restart", get(restart).post(restart))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(Arc::new(state))
}

/// Serve on an already bound listener until `shutdown` resolves.
pub async fn serve(
    listener: tokio::net::TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(())
}

/// Bind `host:port` and serve the API.
pub async fn start_server(
    state: ApiState,
    limiter: RateLimiter,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| BridgeError::Config(format!("bad listen address {}:{}: {}", host, port, e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("🌐 API server listening on http://{}", addr);

    serve(listener, build_router(state, limiter), shutdown).await
}
