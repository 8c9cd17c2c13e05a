//! Authentication: cookie sessions resolved to a `Principal`.
//!
//! The identity gate runs once per request in `auth_middleware`. For a
//! WebSocket upgrade that single check is the only one the connection ever
//! gets; later approval changes apply to the next connection.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{Cookie, HeaderMapExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::ChatError;
use crate::metrics::ServerMetrics;
use crate::models::Principal;
use crate::repository::ChatRepository;

pub const SESSION_COOKIE: &str = "duet_session";

// =============================================================================
// Identity Gate
// =============================================================================

#[derive(Clone)]
pub struct IdentityGate {
    repository: Arc<ChatRepository>,
    metrics: Arc<ServerMetrics>,
    timeout: Duration,
}

impl IdentityGate {
    pub fn new(
        repository: Arc<ChatRepository>,
        auth_config: &AuthConfig,
        metrics: Arc<ServerMetrics>,
    ) -> Self {
        Self {
            repository,
            metrics,
            timeout: auth_config.gate_timeout,
        }
    }

    /// Resolve the session cookie on `headers` to a principal. A missing or
    /// unknown token, a store failure, or a lookup that outlives the gate
    /// timeout all yield `Unauthenticated`.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, ChatError> {
        let token = session_token(headers).ok_or(ChatError::Unauthenticated)?;

        match tokio::time::timeout(self.timeout, self.repository.get_session_principal(&token))
            .await
        {
            Ok(Ok(Some(principal))) => Ok(principal),
            Ok(Ok(None)) => Err(ChatError::Unauthenticated),
            Ok(Err(e)) => {
                warn!("Session lookup failed: {:#}", e);
                Err(ChatError::Unauthenticated)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "Session lookup timed out");
                Err(ChatError::Unauthenticated)
            }
        }
    }
}

/// Read the session token from the `Cookie` header.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .typed_get::<Cookie>()
        .and_then(|c| c.get(SESSION_COOKIE).map(str::to_string))
        .filter(|t| !t.is_empty())
}

/// `Set-Cookie` value establishing a session.
pub fn session_cookie(token: &str, auth_config: &AuthConfig) -> String {
    let secure = if auth_config.https { "; Secure" } else { "" };
    format!(
        "{SESSION_COOKIE}={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{secure}",
        auth_config.session_ttl_secs
    )
}

/// `Set-Cookie` value that clears the session.
pub fn clear_session_cookie(auth_config: &AuthConfig) -> String {
    let secure = if auth_config.https { "; Secure" } else { "" };
    format!("{SESSION_COOKIE}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{secure}")
}

// =============================================================================
// Auth Middleware
// =============================================================================

/// Auth middleware for HTTP routes.
///
/// 1. Public routes (health, metrics, sign-up, login, logout) → pass through
/// 2. Valid session cookie → `Principal` inserted into request extensions
/// 3. Everything else → 401, including WebSocket upgrades
pub async fn auth_middleware(
    State(gate): State<IdentityGate>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if is_public_route(&path) {
        return next.run(request).await;
    }

    match gate.authenticate(request.headers()).await {
        Ok(principal) => {
            debug!(user_id = %principal.id, path = %path, "request authenticated");
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            if path == "/ws" {
                debug!("Rejected unauthenticated WebSocket upgrade");
                gate.metrics.upgrade_rejected();
            }
            e.into_response()
        }
    }
}

fn is_public_route(path: &str) -> bool {
    path == "/health"
        || path.starts_with("/health/")
        || path == "/metrics"
        || path == "/signup"
        || path == "/login"
        || path == "/logout"
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extract the authenticated principal from request extensions (set by
/// middleware). Returns 401 if not present.
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ChatError::Unauthenticated)
    }
}

/// A principal whose account is approved. Pending or rejected accounts get 403.
#[derive(Debug, Clone)]
pub struct ApprovedPrincipal(pub Principal);

impl<S> FromRequestParts<S> for ApprovedPrincipal
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if principal.is_approved() {
            Ok(ApprovedPrincipal(principal))
        } else {
            Err(ChatError::forbidden("Account pending approval"))
        }
    }
}

/// An approved admin principal. Everyone else gets 403.
#[derive(Debug, Clone)]
pub struct AdminPrincipal(pub Principal);

impl<S> FromRequestParts<S> for AdminPrincipal
where
    S: Send + Sync,
{
    type Rejection = ChatError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ApprovedPrincipal(principal) = ApprovedPrincipal::from_request_parts(parts, state).await?;
        if principal.is_admin {
            Ok(AdminPrincipal(principal))
        } else {
            Err(ChatError::forbidden("Admin access required"))
        }
    }
}

/// Attach a `Set-Cookie` header to a response.
pub fn with_cookie(mut response: Response, cookie: String) -> Response {
    match header::HeaderValue::from_str(&cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => warn!("Invalid Set-Cookie value: {}", e),
    }
    response
}
