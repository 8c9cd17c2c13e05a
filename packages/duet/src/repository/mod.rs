// Repository layer: each concern lives in its own file with `impl ChatRepository`.

use sqlx::sqlite::SqlitePool;

mod messages;
mod sessions;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use users::{MIN_PASSWORD_LEN, is_unique_violation};

#[derive(Clone)]
pub struct ChatRepository {
    pub(crate) pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Round-trip used by the readiness check.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

/// Current wall-clock time in Unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
