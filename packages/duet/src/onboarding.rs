//! First-run onboarding.
//!
//! Makes sure the configured admin account exists. Safe to run on every
//! start: an existing account is left alone.

use anyhow::Result;
use rand::Rng;
use rand::distr::Alphanumeric;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::models::{ApprovalStatus, User};
use crate::repository::{ChatRepository, now_millis};

const GENERATED_PASSWORD_LEN: usize = 16;

fn generate_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_PASSWORD_LEN)
        .map(char::from)
        .collect()
}

/// Create the bootstrap admin if it does not exist yet.
///
/// Uses `auth.admin_password` when set; otherwise a random password is
/// generated and logged once.
pub async fn ensure_admin(repository: &ChatRepository, auth_config: &AuthConfig) -> Result<()> {
    let username = auth_config.admin_username.as_str();
    if username.is_empty() {
        warn!("No admin username configured; skipping admin bootstrap");
        return Ok(());
    }

    if let Some(existing) = repository.get_user_by_username(username).await? {
        if !existing.is_admin {
            warn!(
                "Username '{}' belongs to a regular member; admin account not created",
                username
            );
        }
        return Ok(());
    }

    let (password, generated) = match &auth_config.admin_password {
        Some(p) => (p.clone(), false),
        None => (generate_password(), true),
    };

    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: username.to_string(),
        password_hash: ChatRepository::hash_password(&password)?,
        is_admin: true,
        status: ApprovalStatus::Approved,
        last_seen: None,
        created_at: now_millis(),
    };
    repository.create_user(&user).await?;

    if generated {
        warn!(
            "Created admin account '{}' with generated password: {}",
            username, password
        );
        warn!("Set auth.admin_password (or DUET_AUTH__ADMIN_PASSWORD) to choose your own");
    } else {
        info!("Created admin account '{}'", username);
    }

    Ok(())
}
