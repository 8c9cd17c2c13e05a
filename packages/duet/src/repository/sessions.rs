use anyhow::{Context, Result};

use super::{ChatRepository, now_millis};
use crate::models::{Principal, Session, User};

impl ChatRepository {
    /// Issue a new session token for `user_id` valid for `ttl_secs`.
    pub async fn create_session(&self, user_id: &str, ttl_secs: u64) -> Result<Session> {
        let now = now_millis();
        let ttl_ms = i64::try_from(ttl_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        let session = Session {
            token: uuid::Uuid::new_v4().simple().to_string(),
            user_id: user_id.to_string(),
            expires_at: now.saturating_add(ttl_ms),
            created_at: now,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(session.expires_at)
        .bind(session.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to create session")?;

        Ok(session)
    }

    /// Resolve an unexpired session token to the principal that owns it.
    pub async fn get_session_principal(&self, token: &str) -> Result<Option<Principal>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT u.id, u.username, u.password_hash, u.is_admin, u.status, u.last_seen, u.created_at
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = ? AND s.expires_at > ?",
        )
        .bind(token)
        .bind(now_millis())
        .fetch_optional(&self.pool)
        .await?;
        Ok(user.as_ref().map(Principal::from))
    }

    pub async fn delete_session(&self, token: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Drop every expired session. Returns the number removed.
    pub async fn cleanup_expired_sessions(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
