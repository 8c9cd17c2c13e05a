use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Body shown to non-admin viewers in place of a soft-deleted message.
pub const DELETED_PLACEHOLDER: &str = "[Message deleted]";

// === User / identity models ===

/// Approval state of an account. Only `Approved` accounts may log in or be
/// messaged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_admin: bool,
    pub status: ApprovalStatus,
    pub last_seen: Option<i64>,
    pub created_at: i64,
}

/// The authenticated identity bound to a connection or request. Resolved
/// once by the identity gate and never re-checked for that connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub username: String,
    pub is_admin: bool,
    pub status: ApprovalStatus,
}

impl Principal {
    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            is_admin: user.is_admin,
            status: user.status,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: i64,
    pub created_at: i64,
}

/// A chat partner as listed in the sidebar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartnerInfo {
    pub id: String,
    pub username: String,
    pub last_seen: Option<i64>,
    pub online: bool,
}

// === Message models ===

/// A stored message row. Timestamps are Unix milliseconds.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub from_id: String,
    pub to_id: String,
    pub body: String,
    pub created_at: i64,
    pub deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_at: Option<i64>,
}

impl Message {
    /// The other party of the conversation, as seen by `user_id`.
    pub fn counterpart_of(&self, user_id: &str) -> &str {
        if self.from_id == user_id {
            &self.to_id
        } else {
            &self.from_id
        }
    }
}

/// `{id, username}` reference embedded in message payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: String,
    pub username: String,
}

/// A message with both parties resolved, in the shape clients render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub id: i64,
    pub from: UserRef,
    pub to: UserRef,
    pub message: String,
    pub timestamp: i64,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<UserRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

/// Row shape of the history query (message joined with both usernames).
#[derive(Debug, Clone, FromRow)]
pub(crate) struct MessageRow {
    pub id: i64,
    pub from_id: String,
    pub from_username: String,
    pub to_id: String,
    pub to_username: String,
    pub body: String,
    pub created_at: i64,
    pub deleted: bool,
    pub deleted_by: Option<String>,
    pub deleted_by_username: Option<String>,
    pub deleted_at: Option<i64>,
}

impl MessageRow {
    pub(crate) fn into_view(self) -> MessageView {
        let deleted_by = match (self.deleted_by, self.deleted_by_username) {
            (Some(id), Some(username)) => Some(UserRef { id, username }),
            _ => None,
        };
        MessageView {
            id: self.id,
            from: UserRef {
                id: self.from_id,
                username: self.from_username,
            },
            to: UserRef {
                id: self.to_id,
                username: self.to_username,
            },
            message: self.body,
            timestamp: self.created_at,
            deleted: self.deleted,
            deleted_by,
            deleted_at: self.deleted_at,
        }
    }
}

impl MessageView {
    /// Apply viewer visibility: non-admins get the placeholder for deleted
    /// messages and never see the original body or who deleted it.
    pub fn redacted_for(mut self, viewer_is_admin: bool) -> Self {
        if self.deleted && !viewer_is_admin {
            self.message = DELETED_PLACEHOLDER.to_string();
            self.deleted_by = None;
        }
        self
    }
}

// === Request / response bodies ===

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// `{success, error?}` / `{success, data?, error?}` shape used by the
/// delete and restore endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> MutationResponse<T> {
    pub fn ok(data: Option<T>) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
