use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [websocket]
//                    outbound_buffer = 128
//
//   env var:         DUET_WEBSOCKET__OUTBOUND_BUFFER=128   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
    #[serde(default)]
    pub chat: ChatFileConfig,
    #[serde(default)]
    pub websocket: WebSocketFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Auth-related tunables (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
    #[serde(default)]
    pub https: bool,
    #[serde(default = "default_gate_timeout_ms")]
    pub gate_timeout_ms: u64,
    #[serde(default = "default_allow_registration")]
    pub allow_registration: bool,
    #[serde(default = "default_admin_username")]
    pub admin_username: String,
    #[serde(default)]
    pub admin_password: Option<String>,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl(),
            https: false,
            gate_timeout_ms: default_gate_timeout_ms(),
            allow_registration: default_allow_registration(),
            admin_username: default_admin_username(),
            admin_password: None,
        }
    }
}

/// Message store knobs (lives under `[chat]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatFileConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: i64,
    #[serde(default = "default_max_message_len")]
    pub max_message_len: usize,
}

impl Default for ChatFileConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_message_len: default_max_message_len(),
        }
    }
}

/// Real-time channel knobs (lives under `[websocket]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebSocketFileConfig {
    /// Bounded per-connection outbound queue. A connection that falls this
    /// far behind is disconnected.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Deliver `message_sent` to every connection of the sender instead of
    /// only the one that sent the message.
    #[serde(default)]
    pub confirm_to_all_sender_connections: bool,
}

impl Default for WebSocketFileConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: default_outbound_buffer(),
            confirm_to_all_sender_connections: false,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}
fn default_session_ttl() -> u64 {
    604800
}
fn default_gate_timeout_ms() -> u64 {
    5000
}
fn default_allow_registration() -> bool {
    true
}
fn default_admin_username() -> String {
    "admin".to_string()
}
fn default_history_limit() -> i64 {
    100
}
fn default_max_message_len() -> usize {
    4000
}
fn default_outbound_buffer() -> usize {
    64
}

/// Build a figment that layers: defaults → config.toml → DUET_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `DUET_SERVER__PORT=8080`  →  `server.port = 8080`
///   `DUET_AUTH__ADMIN_PASSWORD=...`  →  `auth.admin_password = "..."`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("DUET_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Authentication configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Session time-to-live in seconds (default: 7 days)
    pub session_ttl_secs: u64,
    /// Whether to set Secure flag on cookies
    pub https: bool,
    /// Upper bound on the identity check performed at connection upgrade
    pub gate_timeout: Duration,
    /// Whether new user sign-up is open
    pub allow_registration: bool,
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            session_ttl_secs: fc.session_ttl_secs,
            https: fc.https,
            gate_timeout: Duration::from_millis(fc.gate_timeout_ms.max(1)),
            allow_registration: fc.allow_registration,
            admin_username: fc.admin_username.trim().to_lowercase(),
            admin_password: fc.admin_password.clone().filter(|p| !p.is_empty()),
        }
    }
}

/// Chat runtime configuration.
#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub history_limit: i64,
    pub max_message_len: usize,
    pub outbound_buffer: usize,
    pub confirm_to_all_sender_connections: bool,
}

impl ChatConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            history_limit: fc.chat.history_limit.max(1),
            max_message_len: fc.chat.max_message_len.max(1),
            outbound_buffer: fc.websocket.outbound_buffer.max(1),
            confirm_to_all_sender_connections: fc.websocket.confirm_to_all_sender_connections,
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::from_file(&FileConfig::default())
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct DuetConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl DuetConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".duet"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("duet.db");

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            db_path,
        })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    pub fn reset_database(&self) -> Result<()> {
        if self.db_path.exists() {
            std::fs::remove_file(&self.db_path)
                .with_context(|| format!("Failed to delete database: {:?}", self.db_path))?;
            info!("Database reset: {:?}", self.db_path);

            let wal_path = self.db_path.with_extension("db-wal");
            if wal_path.exists() {
                std::fs::remove_file(&wal_path)?;
            }
            let shm_path = self.db_path.with_extension("db-shm");
            if shm_path.exists() {
                std::fs::remove_file(&shm_path)?;
            }
        }
        Ok(())
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
