use sqlx::sqlite::SqlitePoolOptions;

use crate::models::{ApprovalStatus, Principal, User};

/// Create a fresh ChatRepository backed by an in-memory SQLite database.
/// Each call returns an isolated database with all migrations applied.
pub async fn test_repository() -> super::ChatRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");

    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("Failed to enable foreign keys");

    super::ChatRepository::new(pool)
}

/// Insert a user with a cheap fake hash and return its principal.
pub async fn seed_user(
    repo: &super::ChatRepository,
    username: &str,
    is_admin: bool,
    status: ApprovalStatus,
) -> Principal {
    let user = User {
        id: format!("u-{username}"),
        username: username.to_string(),
        password_hash: "not-a-real-hash".to_string(),
        is_admin,
        status,
        last_seen: None,
        created_at: super::now_millis(),
    };
    repo.create_user(&user).await.expect("Failed to seed user");
    Principal::from(&user)
}

/// Approved, non-admin chat member.
pub async fn seed_member(repo: &super::ChatRepository, username: &str) -> Principal {
    seed_user(repo, username, false, ApprovalStatus::Approved).await
}

pub async fn seed_admin(repo: &super::ChatRepository, username: &str) -> Principal {
    seed_user(repo, username, true, ApprovalStatus::Approved).await
}
