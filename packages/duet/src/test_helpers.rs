use std::sync::Arc;

use crate::AppState;
use crate::config::{AuthConfig, AuthFileConfig, ChatConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::models::Principal;
use crate::repository::ChatRepository;
use crate::ws::{PresenceRegistry, SendLanes};

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
/// Suitable for handler tests that exercise real SQL queries without I/O.
pub async fn test_app_state() -> AppState {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");

    crate::db::run_migrations(&pool).await.expect("migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("pragma");

    let metrics = Arc::new(ServerMetrics::new());

    AppState {
        auth_config: Arc::new(AuthConfig::from_file(&AuthFileConfig::default())),
        chat_config: Arc::new(ChatConfig::default()),
        metrics: metrics.clone(),
        db: Arc::new(Database { pool: pool.clone() }),
        repository: Arc::new(ChatRepository::new(pool)),
        presence: Arc::new(PresenceRegistry::new(metrics)),
        lanes: Arc::new(SendLanes::new()),
    }
}

/// Open a session for `principal` and return a ready-to-send `Cookie` header value.
pub async fn session_cookie_for(state: &AppState, principal: &Principal) -> String {
    let session = state
        .repository
        .create_session(&principal.id, 3600)
        .await
        .expect("session");
    format!("{}={}", crate::auth::SESSION_COOKIE, session.token)
}

/// Read a response body as JSON.
pub async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&body).expect("json body")
}
