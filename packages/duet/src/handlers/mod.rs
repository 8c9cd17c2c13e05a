pub mod admin;
pub mod auth;
pub mod chat;
pub mod health;
pub mod websocket;

// Re-export all handlers for easy route registration
pub use admin::{
    approve_user, get_conversation, get_stats, list_users, reject_user, reset_password,
};
pub use auth::{login, logout, me, signup};
pub use chat::{delete_message, get_history, list_partners, restore_message};
pub use health::{health_handler, health_live_handler, health_ready_handler, metrics_handler};
pub use websocket::chat_websocket_handler;
