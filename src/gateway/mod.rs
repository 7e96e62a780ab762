//! Axum-based HTTP gateway with body limits, timeouts and login rate limiting.
//!
//! Routes:
//! - `GET  /health`
//! - `POST /register`, `POST /reset`: issue (or re-issue) an image for an email
//! - `POST /login`: multipart upload of `auth_image`, opens a session
//! - `GET  /dashboard`, `POST /logout`: bearer session

use crate::auth::{Session, SessionStore};
use crate::config::Config;
use crate::context::{ContextProvider, IpApiResolver, RequestContext};
use crate::delivery::DeliveryChannel;
use crate::registry::SqliteRegistry;
use crate::token::{IssueError, IssuedToken, Rejection, TokenIssuer, TokenVerifier, VerifyError};
use anyhow::{Context, Result};
use axum::{
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Form, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Sliding window used by login rate limiting.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Multipart field carrying the uploaded image.
pub const IMAGE_FIELD: &str = "auth_image";

/// How often the rate limiter sweeps stale client entries from its map.
const RATE_LIMITER_SWEEP_INTERVAL_SECS: u64 = 300; // 5 minutes

#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    limit_per_window: u32,
    window: Duration,
    requests: Mutex<(HashMap<String, Vec<Instant>>, Instant)>,
}

impl SlidingWindowRateLimiter {
    pub fn new(limit_per_window: u32, window: Duration) -> Self {
        Self {
            limit_per_window,
            window,
            requests: Mutex::new((HashMap::new(), Instant::now())),
        }
    }

    pub fn allow(&self, key: &str) -> bool {
        if self.limit_per_window == 0 {
            return true;
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or_else(Instant::now);

        let mut guard = self.requests.lock();
        let (requests, last_sweep) = &mut *guard;

        // Periodic sweep: drop clients with no recent attempts
        if last_sweep.elapsed() >= Duration::from_secs(RATE_LIMITER_SWEEP_INTERVAL_SECS) {
            requests.retain(|_, timestamps| {
                timestamps.retain(|t| *t > cutoff);
                !timestamps.is_empty()
            });
            *last_sweep = now;
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= self.limit_per_window as usize {
            return false;
        }

        entry.push(now);
        true
    }
}

/// First address in `X-Forwarded-For` / `X-Real-IP`, if any.
fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return Some(first.to_owned());
            }
        }
    }
    None
}

/// Shared state for all axum handlers
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
    pub verifier: Arc<TokenVerifier>,
    pub context: Arc<ContextProvider>,
    pub delivery: Arc<dyn DeliveryChannel>,
    pub sessions: Arc<SessionStore>,
    /// Archive directory for issued PNGs.
    pub image_dir: Option<PathBuf>,
    /// Honour proxy headers when determining the client address.
    pub trust_forwarded_for: bool,
    pub login_limiter: Arc<SlidingWindowRateLimiter>,
}

impl AppState {
    fn client_address(&self, headers: &HeaderMap, peer: SocketAddr) -> String {
        if self.trust_forwarded_for {
            if let Some(forwarded) = forwarded_client(headers) {
                return forwarded;
            }
        }
        peer.ip().to_string()
    }

    async fn request_context(&self, headers: &HeaderMap, peer: SocketAddr) -> RequestContext {
        let address = self.client_address(headers, peer);
        let user_agent = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok());
        self.context.resolve(&address, user_agent).await
    }
}

/// Wire every component from configuration.
pub fn build_state(config: &Config) -> Result<AppState> {
    let registry = Arc::new(SqliteRegistry::open(&config.storage.database_path).with_context(
        || format!("Failed to open registry {}", config.storage.database_path.display()),
    )?);
    let sessions = SessionStore::new(&config.storage.database_path, Some(config.session.ttl_secs))
        .context("Failed to open session store")?;

    let context = if config.geo.enabled {
        let resolver = IpApiResolver::new(
            &config.geo.endpoint,
            Duration::from_secs(config.geo.timeout_secs),
        )?;
        ContextProvider::new(Arc::new(resolver))
    } else {
        ContextProvider::without_geo()
    };

    if let Some(dir) = &config.storage.image_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create image dir {}", dir.display()))?;
    }

    Ok(AppState {
        issuer: Arc::new(TokenIssuer::new(registry.clone(), config.token.carrier())),
        verifier: Arc::new(
            TokenVerifier::new(registry)
                .with_retention(config.token.retention())
                .with_max_dimension(config.token.max_upload_dimension),
        ),
        context: Arc::new(context),
        delivery: config.build_delivery()?,
        sessions: Arc::new(sessions),
        image_dir: config.storage.image_dir.clone(),
        trust_forwarded_for: config.server.trust_forwarded_for,
        login_limiter: Arc::new(SlidingWindowRateLimiter::new(
            config.server.login_attempts_per_minute,
            Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
        )),
    })
}

pub fn router(state: AppState, max_upload_bytes: usize, request_timeout: Duration) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/register", post(handle_register))
        .route("/reset", post(handle_reset))
        .route("/login", post(handle_login))
        .route("/dashboard", get(handle_dashboard))
        .route("/logout", post(handle_logout))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            request_timeout,
        ))
}

/// Run the HTTP gateway until Ctrl-C.
pub async fn run_gateway(config: Config) -> Result<()> {
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind))?;

    let state = build_state(&config)?;
    let app = router(
        state,
        config.server.max_upload_bytes,
        Duration::from_secs(config.server.request_timeout_secs),
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!(addr = %listener.local_addr()?, "Gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Shutting down gateway");
    })
    .await?;

    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

/// Concrete return type for handlers (avoids `impl IntoResponse` inference issues).
type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(serde_json::json!({"error": message.into()})))
}

/// GET /health
async fn handle_health() -> ApiResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}

#[derive(Debug, Deserialize)]
struct EmailBody {
    #[serde(default)]
    email: String,
}

/// Accepts both `application/json` and form-encoded bodies.
async fn read_email(req: Request) -> Result<String, ApiResponse> {
    let is_json = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"));

    let body = if is_json {
        Json::<EmailBody>::from_request(req, &())
            .await
            .map(|Json(body)| body)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid request: {e}")))?
    } else {
        Form::<EmailBody>::from_request(req, &())
            .await
            .map(|Form(body)| body)
            .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid request: {e}")))?
    };

    let email = body.email.trim().to_string();
    if email.is_empty() || !email.contains('@') {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "A valid email address is required",
        ));
    }
    Ok(email)
}

/// Which route asked for the image; echoed back as `status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IssueKind {
    Register,
    Reset,
}

impl IssueKind {
    fn status(self) -> &'static str {
        match self {
            IssueKind::Register => "registered",
            IssueKind::Reset => "reset",
        }
    }
}

/// POST /register
async fn handle_register(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> ApiResponse {
    issue_and_deliver(state, peer, req, IssueKind::Register).await
}

/// POST /reset: same flow as registration; the new image supersedes the old one.
async fn handle_reset(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: Request,
) -> ApiResponse {
    issue_and_deliver(state, peer, req, IssueKind::Reset).await
}

async fn issue_and_deliver(
    state: AppState,
    peer: SocketAddr,
    req: Request,
    kind: IssueKind,
) -> ApiResponse {
    let headers = req.headers().clone();
    let email = match read_email(req).await {
        Ok(email) => email,
        Err(resp) => return resp,
    };
    let context = state.request_context(&headers, peer).await;

    let issuer = state.issuer.clone();
    let identity = email.clone();
    let issued = match tokio::task::spawn_blocking(move || issuer.issue(&identity, &context)).await
    {
        Ok(Ok(issued)) => issued,
        Ok(Err(IssueError::IncompleteRecord(field))) => {
            return error_response(StatusCode::BAD_REQUEST, format!("Missing {field}"));
        }
        Ok(Err(e)) => {
            tracing::error!(identity = %email, "Issuance failed: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not issue image");
        }
        Err(e) => {
            tracing::error!("Issuance task failed: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not issue image");
        }
    };

    // Any issuance supersedes the previous image, register included; the
    // sessions that image opened go with it.
    match state.sessions.revoke_all_sessions(&email) {
        Ok(0) => {}
        Ok(revoked) => tracing::info!(identity = %email, revoked, "Revoked superseded sessions"),
        Err(e) => tracing::warn!(identity = %email, "Failed to revoke sessions: {e}"),
    }

    let image_dir = state.image_dir.clone();
    let delivery = state.delivery.clone();
    let delivered = tokio::task::spawn_blocking(move || {
        archive(image_dir.as_deref(), &issued)?;
        delivery.deliver(&issued)
    })
    .await;

    match delivered {
        Ok(Ok(())) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": kind.status(),
                "email": email,
                "message": "Check your email for the authentication image",
            })),
        ),
        Ok(Err(e)) => {
            tracing::error!(identity = %email, channel = state.delivery.name(), "Delivery failed: {e:#}");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({
                    "status": kind.status(),
                    "email": email,
                    "error": "Image was issued but could not be delivered; request a reset to retry",
                })),
            )
        }
        Err(e) => {
            tracing::error!("Delivery task failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Delivery failed")
        }
    }
}

/// Write the PNG as `<image_dir>/<image_reference>` when archiving is enabled.
fn archive(image_dir: Option<&std::path::Path>, issued: &IssuedToken) -> Result<()> {
    let Some(dir) = image_dir else {
        return Ok(());
    };
    let path = dir.join(&issued.image_reference);
    std::fs::write(&path, &issued.png)
        .with_context(|| format!("Failed to archive image {}", path.display()))
}

/// Status and user-facing message for each rejection.
fn rejection_response(rejection: &Rejection) -> ApiResponse {
    let (status, message) = match rejection {
        Rejection::Malformed(_) => (StatusCode::BAD_REQUEST, "Unreadable authentication image"),
        Rejection::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid authentication image"),
        Rejection::Expired { .. } => (StatusCode::UNAUTHORIZED, "Authentication image has expired"),
        Rejection::GeoMismatch { .. } => {
            (StatusCode::UNAUTHORIZED, "Login attempt from different country")
        }
    };
    (
        status,
        Json(serde_json::json!({"error": message, "reason": rejection.kind()})),
    )
}

/// POST /login
async fn handle_login(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResponse {
    let address = state.client_address(&headers, peer);
    if !state.login_limiter.allow(&address) {
        tracing::warn!(client_address = %address, "Login rate limit exceeded");
        return error_response(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many login attempts. Please retry later.",
        );
    }

    let mut image = None;
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some(IMAGE_FIELD) => match field.bytes().await {
                Ok(bytes) => {
                    image = Some(bytes);
                    break;
                }
                Err(e) => {
                    return error_response(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}"))
                }
            },
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, format!("Invalid upload: {e}"))
            }
        }
    }

    let Some(image) = image else {
        return error_response(StatusCode::BAD_REQUEST, "No image uploaded");
    };
    if image.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No selected file");
    }

    let context = state.request_context(&headers, peer).await;
    let verifier = state.verifier.clone();
    let outcome = tokio::task::spawn_blocking(move || verifier.verify(&image, &context)).await;

    let accepted = match outcome {
        Ok(Ok(accepted)) => accepted,
        Ok(Err(VerifyError::Rejected(rejection))) => return rejection_response(&rejection),
        Ok(Err(e)) => {
            tracing::error!("Verification failed: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
        Err(e) => {
            tracing::error!("Verification task failed: {e}");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
    };

    match state.sessions.create_session(&accepted.identity, Some(&address)) {
        Ok(token) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "authenticated",
                "email": accepted.identity,
                "session_token": token,
            })),
        ),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Session creation failed: {e}"),
        ),
    }
}

/// Extract bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn require_session(state: &AppState, headers: &HeaderMap) -> Result<Session, ApiResponse> {
    let token = extract_bearer_token(headers).ok_or_else(|| {
        error_response(StatusCode::UNAUTHORIZED, "Missing Authorization header")
    })?;

    state.sessions.validate_session(token).ok_or_else(|| {
        error_response(StatusCode::UNAUTHORIZED, "Invalid or expired session token")
    })
}

/// GET /dashboard
async fn handle_dashboard(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    match require_session(&state, &headers) {
        Ok(session) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "email": session.identity,
                "expires_at": session.expires_at,
            })),
        ),
        Err(resp) => resp,
    }
}

/// POST /logout
async fn handle_logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "Missing Authorization header");
    };

    match state.sessions.revoke_session(token) {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "logged_out"})),
        ),
        Ok(false) => error_response(StatusCode::UNAUTHORIZED, "Invalid session"),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Logout failed: {e}"),
        ),
    }
}
