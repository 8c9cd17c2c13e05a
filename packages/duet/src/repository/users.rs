//! Password-backed user accounts with admin approval.

use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

use super::{ChatRepository, now_millis};
use crate::models::{ApprovalStatus, User};

pub const MIN_PASSWORD_LEN: usize = 6;

const USER_COLUMNS: &str = "id, username, password_hash, is_admin, status, last_seen, created_at";

/// Hash a password with Argon2id and a random salt.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// True when `err` came from the `users.username` UNIQUE constraint, i.e. a
/// concurrent sign-up claimed the name between lookup and insert.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    match err.downcast_ref::<sqlx::Error>() {
        Some(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}

/// Verify a password against a stored Argon2id hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("invalid password hash: {e}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

impl ChatRepository {
    pub fn hash_password(password: &str) -> Result<String> {
        hash_password(password)
    }

    pub async fn create_user(&self, user: &User) -> Result<()> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, is_admin, status, last_seen, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(user.status)
        .bind(user.last_seen)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create user {}", user.username))?;
        Ok(())
    }

    pub async fn get_user_by_id(&self, user_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Usernames are stored lowercase; callers normalize before lookup.
    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ?"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    /// Verify password against stored argon2 hash. Returns the User on success.
    pub async fn verify_user_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>> {
        let user = match self.get_user_by_username(username).await? {
            Some(u) => u,
            None => return Ok(None),
        };
        if verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    /// Change the approval status of a non-admin account. Returns false when
    /// no such account exists.
    pub async fn set_user_status(&self, user_id: &str, status: ApprovalStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE users SET status = ? WHERE id = ? AND is_admin = 0")
            .bind(status)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to update user status")?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace the password of a non-admin account.
    pub async fn set_user_password(&self, user_id: &str, password: &str) -> Result<bool> {
        let hash = hash_password(password)?;
        let result =
            sqlx::query("UPDATE users SET password_hash = ? WHERE id = ? AND is_admin = 0")
                .bind(hash)
                .bind(user_id)
                .execute(&self.pool)
                .await
                .context("Failed to reset password")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn touch_last_seen(&self, user_id: &str) -> Result<()> {
        sqlx::query("UPDATE users SET last_seen = ? WHERE id = ?")
            .bind(now_millis())
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Everyone `user_id` may talk to: approved, non-admin, not themselves.
    pub async fn list_partners(&self, user_id: &str) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id != ? AND is_admin = 0 AND status = 'approved'
             ORDER BY username ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    /// All non-admin accounts, newest first.
    pub async fn list_members(&self) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE is_admin = 0
             ORDER BY created_at DESC, username ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    pub async fn admin_exists(&self, username: &str) -> Result<bool> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = ? AND is_admin = 1")
                .bind(username)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }
}
