//! Real-time chat channel
//!
//! One WebSocket per browser tab, bound to a principal at upgrade time:
//! - Presence registry tracks every live connection per principal
//! - Router validates events, persists, and fans out by recipient
//! - Slow connections are cut off instead of stalling senders

mod handler;
mod presence;
mod protocol;
mod router;

pub use handler::{ChatServices, handle_chat_ws};
pub use presence::{ConnectionHandle, PresenceRegistry};
pub use protocol::ServerEvent;
pub(crate) use router::broadcast_restored;
pub use router::SendLanes;
