use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod metrics;
mod models;
mod onboarding;
mod repository;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::auth::IdentityGate;
use crate::config::{AuthConfig, ChatConfig, DuetConfig, FileConfig};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;
use crate::ws::{ChatServices, PresenceRegistry, SendLanes};

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "Private one-to-one chat server with admin-approved membership")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.duet)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground (the default)
    Server(ServerArgs),
}

#[derive(Parser, Default)]
struct ServerArgs {
    /// Port for the web server (overrides config.toml)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config.toml)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    /// Authentication configuration
    pub auth_config: Arc<AuthConfig>,
    pub chat_config: Arc<ChatConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    pub db: Arc<Database>,
    pub repository: Arc<ChatRepository>,
    /// Live WebSocket connections per principal
    pub presence: Arc<PresenceRegistry>,
    pub lanes: Arc<SendLanes>,
}

impl AppState {
    pub fn chat_services(&self) -> ChatServices {
        ChatServices {
            repository: self.repository.clone(),
            presence: self.presence.clone(),
            lanes: self.lanes.clone(),
            chat_config: self.chat_config.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Every route, behind the identity gate, with tracing and CORS layers.
pub(crate) fn app_router(state: AppState) -> Router {
    let gate = IdentityGate::new(
        state.repository.clone(),
        &state.auth_config,
        state.metrics.clone(),
    );

    Router::new()
        // Account routes
        .route("/signup", post(handlers::signup))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/api/me", get(handlers::me))
        .route("/api/users", get(handlers::list_partners))
        // Chat routes
        .route("/chat/history/{user_id}", get(handlers::get_history))
        .route("/chat/message/{id}/delete", post(handlers::delete_message))
        .route("/chat/message/{id}/restore", post(handlers::restore_message))
        .route("/ws", get(handlers::chat_websocket_handler))
        // Admin endpoints
        .route("/admin/users", get(handlers::list_users))
        .route("/admin/users/{id}/approve", post(handlers::approve_user))
        .route("/admin/users/{id}/reject", post(handlers::reject_user))
        .route("/admin/users/{id}/password", post(handlers::reset_password))
        .route(
            "/admin/conversations/{a}/{b}",
            get(handlers::get_conversation),
        )
        .route("/admin/stats", get(handlers::get_stats))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            gate,
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = DuetConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => run_server(ServerArgs::default(), config).await,
        Some(Commands::Server(args)) => run_server(args, config).await,
    }
}

async fn run_server(args: ServerArgs, config: DuetConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "duet=debug,tower_http=debug,info"
    } else {
        "duet=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Duet");

    let file_config: FileConfig = config::load_config(&config.data_dir)
        .extract()
        .with_context(|| {
            format!(
                "Invalid configuration in {}",
                config.config_toml_path().display()
            )
        })?;

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all accounts and messages!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(ChatRepository::new(db.pool.clone()));

    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth));
    let chat_config = Arc::new(ChatConfig::from_file(&file_config));
    info!(
        "Auth: session TTL {}s, registration {}",
        auth_config.session_ttl_secs,
        if auth_config.allow_registration {
            "open"
        } else {
            "closed"
        }
    );
    info!(
        "Chat: history_limit={}, max_message_len={}, outbound_buffer={}",
        chat_config.history_limit, chat_config.max_message_len, chat_config.outbound_buffer
    );

    // First-run onboarding
    onboarding::ensure_admin(&repository, &auth_config).await?;

    let metrics = Arc::new(ServerMetrics::new());
    let presence = Arc::new(PresenceRegistry::new(metrics.clone()));

    let app_state = AppState {
        auth_config,
        chat_config,
        metrics,
        db,
        repository: repository.clone(),
        presence: presence.clone(),
        lanes: Arc::new(SendLanes::new()),
    };

    // Spawn periodic expired session cleanup
    let cleanup_repo = repository.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            interval.tick().await;
            match cleanup_repo.cleanup_expired_sessions().await {
                Ok(n) if n > 0 => info!("Cleaned up {} expired sessions", n),
                Ok(_) => {}
                Err(e) => error!("Session cleanup failed: {:#}", e),
            }
        }
    });

    let app = app_router(app_state);

    let host = args.host.unwrap_or(file_config.server.host);
    let port = args.port.unwrap_or(file_config.server.port);
    let addr = format!("{}:{}", host, port).parse::<SocketAddr>()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Duet listening on http://{}", actual_addr);
    info!("WebSocket endpoint: ws://{}/ws", actual_addr);

    // Create shutdown signal handler
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
        let closed = presence.disconnect_all();
        if closed > 0 {
            info!("Closing {} WebSocket connections", closed);
        }
    };

    let server_result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .context("Server error");

    info!("Shutdown complete");
    server_result
}
