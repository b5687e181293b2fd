//! HTTP gateway for Forgehand.
//!
//! - `GET  /health` — liveness and session count
//! - `POST /login`  — exchange the password for a bearer token
//! - `GET  /ws?token=…` — one chat session per WebSocket connection
//!
//! Built on Axum. Login attempts are rate-limited per client IP.

pub mod ws;

use axum::extract::{ConnectInfo, DefaultBodyLimit, FromRequestParts, Query, State};
use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use forgehand_agent::SessionRegistry;
use forgehand_config::GatewayConfig;
use forgehand_core::rate_limit::RateLimiter;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Active tokens kept before the oldest is evicted.
const MAX_TOKENS: usize = 100;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub sessions: Arc<SessionRegistry>,
    password: Option<String>,
    tokens: RwLock<Vec<String>>,
    login_limiter: RateLimiter<IpAddr>,
}

impl GatewayState {
    pub fn new(config: &GatewayConfig, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            sessions,
            password: config.password.clone().filter(|p| !p.is_empty()),
            tokens: RwLock::new(Vec::new()),
            login_limiter: RateLimiter::new(config.login_limit.max_attempts, config.login_limit.window()),
        }
    }

    /// Mint a bearer token, evicting the oldest at capacity.
    pub async fn issue_token(&self) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        let mut tokens = self.tokens.write().await;
        if tokens.len() >= MAX_TOKENS {
            tokens.remove(0);
        }
        tokens.push(token.clone());
        token
    }

    pub async fn is_valid_token(&self, token: &str) -> bool {
        self.tokens.read().await.iter().any(|t| t == token)
    }

    fn password_matches(&self, candidate: &str) -> bool {
        match &self.password {
            Some(expected) => constant_time_eq(expected.as_bytes(), candidate.as_bytes()),
            None => true,
        }
    }
}

pub type SharedState = Arc<GatewayState>;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Peer address from `ConnectInfo`, unspecified when served without it.
pub struct ClientIp(pub IpAddr);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok(Self(ip))
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([axum::http::header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/login", post(login_handler))
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until `shutdown` fires.
pub async fn serve(
    config: &GatewayConfig,
    sessions: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(GatewayState::new(config, sessions));
    if state.password.is_none() {
        warn!("No gateway password set; WebSocket connections are not authenticated");
    }
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Gateway listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.sessions.len(),
    })
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

async fn login_handler(
    State(state): State<SharedState>,
    ClientIp(ip): ClientIp,
    Json(request): Json<LoginRequest>,
) -> Response {
    if let Err(retry_after) = state.login_limiter.check_at(&ip, std::time::Instant::now()) {
        warn!(client = %ip, "Login rate limit exceeded");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            format!("Too many login attempts, retry in {}s", retry_after.as_secs().max(1)),
        );
    }

    if !state.password_matches(&request.password) {
        warn!(client = %ip, "Login failed");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid password");
    }

    state.login_limiter.reset(&ip);
    let token = state.issue_token().await;
    info!(client = %ip, "Login succeeded");
    Json(LoginResponse { token }).into_response()
}

#[derive(Deserialize)]
struct WsParams {
    #[serde(default)]
    token: Option<String>,
}

async fn ws_handler(
    State(state): State<SharedState>,
    Query(params): Query<WsParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let authorized = match params.token.as_deref() {
        _ if state.password.is_none() => true,
        Some(token) => state.is_valid_token(token).await,
        None => false,
    };
    if !authorized {
        warn!("WebSocket rejected: missing or invalid token");
        return error_response(StatusCode::UNAUTHORIZED, "Missing or invalid token");
    }
    match upgrade {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| ws::handle_socket(socket, state))
            .into_response(),
        Err(rejection) => rejection.into_response(),
    }
}
