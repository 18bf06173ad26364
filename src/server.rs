//!
//! crmguard HTTP server
//! --------------------
//! Axum router exposing login and permission introspection for the CRM backend.
//!
//! Responsibilities:
//! - Bearer-token authentication middleware (`require_auth`) that validates the token,
//!   reloads the user's override map and stores a `RequestContext` in request extensions.
//! - Login endpoint backed by the `identity` provider, throttled per client address and email.
//! - Permission endpoints that route every decision through `AccessControl`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Path, Request, State};
use axum::http::HeaderMap;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::identity::{
    authenticate, ensure_default_admin, AccessControl, AuthProvider, InMemoryUserStore, LocalAuthProvider, LoginRequest,
    LoginResponse, PermissionTable, RateLimiter, RateScope, RequestContext, TokenService, UserStore,
};

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub access: AccessControl,
    pub users: Arc<dyn UserStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub limiter: Arc<RateLimiter>,
}

impl AppState {
    pub fn new(tokens: Arc<TokenService>, access: AccessControl, users: Arc<dyn UserStore>, limiter: RateLimiter) -> Self {
        let auth: Arc<dyn AuthProvider> = Arc::new(LocalAuthProvider::new(users.clone(), tokens.clone()));
        Self { tokens, access, users, auth, limiter: Arc::new(limiter) }
    }

    /// Build the state from configuration: token service, permission table and user store.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let tokens = TokenService::new(&cfg.token).context("configuring token service")?;
        let table = match &cfg.permissions_file {
            Some(path) => {
                info!(target: "startup", "loading permission table from {}", path.display());
                PermissionTable::from_file(path).map_err(|e| anyhow::anyhow!(e)).context("loading permission table")?
            }
            None => PermissionTable::crm_defaults(),
        };
        let users = match &cfg.users_file {
            Some(path) => InMemoryUserStore::from_file(path)?,
            None => InMemoryUserStore::new(),
        };
        ensure_default_admin(&users, &cfg.admin_email, &cfg.admin_password)?;
        info!(
            target: "startup",
            "roles={:?} default_role={} users={}",
            table.roles().collect::<Vec<_>>(),
            table.default_role(),
            users.len()
        );
        Ok(Self::new(
            Arc::new(tokens),
            AccessControl::new(Arc::new(table)),
            Arc::new(users),
            RateLimiter::new(cfg.rate_limit),
        ))
    }
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/auth/me", get(me))
        .route("/api/auth/permissions", get(permissions))
        .route("/api/auth/check", post(check))
        .route("/api/auth/roles/{role}/permissions", get(role_permissions))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(|| async { "crmguard ok" }))
        .route("/api/auth/login", post(login))
        .merge(protected)
        .with_state(state)
}

pub async fn run_with_config(cfg: AppConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&cfg)?;
    let app = router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    match authenticate(&state.tokens, state.users.as_ref(), req.headers()) {
        Ok(ctx) => {
            req.extensions_mut().insert(ctx);
            next.run(req).await
        }
        Err(e) => e.into_response(),
    }
}

/// Client address for login throttling. The forwarding headers are client-controlled, so this
/// is only meaningful when the server sits behind a proxy that overwrites them.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let ip = client_ip(&headers);
    // evaluate both so each bucket is charged
    let ip_ok = state.limiter.allow(&RateScope::Ip(ip.clone()));
    let email_ok = state.limiter.allow(&RateScope::Email(payload.email.clone()));
    if !ip_ok || !email_ok {
        warn!(target: "auth", ip = %ip, "login throttled");
        return Err(AppError::rate_limited("rate_limited", "too many login attempts"));
    }

    let auth = state.auth.clone();
    let resp = tokio::task::spawn_blocking(move || auth.login(&payload))
        .await
        .map_err(|e| AppError::internal("login_task_failed".to_string(), e.to_string()))?;
    match resp {
        Ok(resp) => {
            info!(target: "auth", subject = resp.identity.subject_id, role = %resp.identity.role, "login ok");
            Ok(Json(resp))
        }
        Err(e) => {
            warn!(target: "auth", ip = %ip, code = e.code_str(), "login failed");
            Err(e)
        }
    }
}

async fn me(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse { Json(ctx.identity) }

async fn permissions(State(state): State<AppState>, Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    let map = state.access.effective_permissions(&ctx.identity);
    Json(json!({
        "role": ctx.identity.role,
        "overridden": ctx.identity.overrides.is_some(),
        "permissions": map,
    }))
}

#[derive(Debug, Deserialize)]
struct CheckPayload {
    resource: String,
    action: String,
    #[serde(default)]
    owner_id: Option<i64>,
}

async fn check(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<CheckPayload>,
) -> impl IntoResponse {
    let allowed = state.access.can(&ctx.identity, &payload.resource, &payload.action, payload.owner_id);
    Json(json!({ "allowed": allowed, "request_id": ctx.request_id }))
}

async fn role_permissions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(role): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    state.access.require(&ctx.identity, "users", "view", None)?;
    let table = state.access.table();
    let resolved = if table.entry(&role).is_some() { role.trim().to_ascii_lowercase() } else { table.default_role().to_string() };
    let map = state.access.default_permissions(&role);
    Ok(Json(json!({ "role": role, "resolved_role": resolved, "permissions": map })))
}
