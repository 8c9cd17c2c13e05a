//! Durable message log: append, pair history, soft delete and restore.
//!
//! Rows are never physically removed. Deletion only flips `deleted` and
//! records who/when; restore clears all three fields again.

use super::{ChatRepository, now_millis};
use crate::error::{ChatError, ChatResult};
use crate::models::{ApprovalStatus, Message, MessageRow, MessageView, Principal, User};

const VIEW_SELECT: &str = r#"
    SELECT m.id, m.from_id, f.username AS from_username,
           m.to_id, t.username AS to_username,
           m.body, m.created_at, m.deleted,
           m.deleted_by, d.username AS deleted_by_username, m.deleted_at
    FROM messages m
    JOIN users f ON f.id = m.from_id
    JOIN users t ON t.id = m.to_id
    LEFT JOIN users d ON d.id = m.deleted_by
"#;

impl ChatRepository {
    /// Persist a message from `sender` to `to_id`. The body must contain
    /// something other than whitespace and fit in `max_len` characters; the
    /// recipient must be an approved, non-admin account other than the sender.
    pub async fn append_message(
        &self,
        sender: &Principal,
        to_id: &str,
        body: &str,
        max_len: usize,
    ) -> ChatResult<MessageView> {
        if body.trim().is_empty() {
            return Err(ChatError::validation("Message cannot be empty"));
        }
        if body.chars().count() > max_len {
            return Err(ChatError::validation(format!(
                "Message exceeds {max_len} characters"
            )));
        }
        if to_id.is_empty() {
            return Err(ChatError::validation("Recipient is required"));
        }
        if to_id == sender.id {
            return Err(ChatError::validation("Cannot send a message to yourself"));
        }

        let recipient = sqlx::query_as::<_, User>(
            "SELECT id, username, password_hash, is_admin, status, last_seen, created_at
             FROM users WHERE id = ?",
        )
        .bind(to_id)
        .fetch_optional(&self.pool)
        .await?;

        match recipient {
            Some(u) if !u.is_admin && u.status == ApprovalStatus::Approved => {}
            _ => return Err(ChatError::validation("Recipient not found")),
        }

        let result = sqlx::query(
            "INSERT INTO messages (from_id, to_id, body, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&sender.id)
        .bind(to_id)
        .bind(body)
        .bind(now_millis())
        .execute(&self.pool)
        .await?;

        self.get_message_view(result.last_insert_rowid()).await
    }

    /// Up to `limit` most recent messages between `a` and `b`, oldest first.
    /// Symmetric in `a`/`b`. Non-admin viewers get deleted bodies redacted.
    pub async fn history(
        &self,
        a: &str,
        b: &str,
        viewer_is_admin: bool,
        limit: i64,
    ) -> ChatResult<Vec<MessageView>> {
        let sql = format!(
            "{VIEW_SELECT}
             WHERE (m.from_id = ? AND m.to_id = ?) OR (m.from_id = ? AND m.to_id = ?)
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT ?"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&sql)
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;

        // Reverse so oldest is first (natural reading order)
        Ok(rows
            .into_iter()
            .rev()
            .map(|r| r.into_view().redacted_for(viewer_is_admin))
            .collect())
    }

    pub async fn get_message(&self, message_id: i64) -> ChatResult<Message> {
        sqlx::query_as::<_, Message>(
            "SELECT id, from_id, to_id, body, created_at, deleted, deleted_by, deleted_at
             FROM messages WHERE id = ?",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(ChatError::NotFound)
    }

    /// Unredacted view with both parties resolved.
    pub async fn get_message_view(&self, message_id: i64) -> ChatResult<MessageView> {
        let sql = format!("{VIEW_SELECT} WHERE m.id = ?");
        sqlx::query_as::<_, MessageRow>(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?
            .map(MessageRow::into_view)
            .ok_or(ChatError::NotFound)
    }

    /// Soft-delete a message. Only its author may do this; admins have no
    /// shortcut. Deleting an already-deleted message is a no-op that keeps
    /// the original `deleted_by`/`deleted_at`.
    pub async fn soft_delete_message(
        &self,
        message_id: i64,
        requester: &Principal,
    ) -> ChatResult<Message> {
        let message = self.get_message(message_id).await?;
        if message.from_id != requester.id {
            return Err(ChatError::forbidden(
                "Not authorized to delete this message",
            ));
        }

        sqlx::query(
            "UPDATE messages SET deleted = 1, deleted_by = ?, deleted_at = ?
             WHERE id = ? AND deleted = 0",
        )
        .bind(&requester.id)
        .bind(now_millis())
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        self.get_message(message_id).await
    }

    /// Clear deletion metadata. Admin only. Returns the restored message
    /// with both parties resolved, ready to re-broadcast.
    pub async fn restore_message(
        &self,
        message_id: i64,
        requester: &Principal,
    ) -> ChatResult<MessageView> {
        if !requester.is_admin {
            return Err(ChatError::forbidden("Admin access required"));
        }

        let result = sqlx::query(
            "UPDATE messages SET deleted = 0, deleted_by = NULL, deleted_at = NULL WHERE id = ?",
        )
        .bind(message_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::NotFound);
        }

        self.get_message_view(message_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DELETED_PLACEHOLDER;
    use crate::repository::test_helpers::{self, seed_admin, seed_member, seed_user};

    const MAX: usize = 4000;

    #[tokio::test]
    async fn test_append_persists_one_live_message() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;

        let view = repo.append_message(&alice, &bob.id, "hi", MAX).await.unwrap();
        assert_eq!(view.from.username, "alice");
        assert_eq!(view.to.username, "bob");
        assert_eq!(view.message, "hi");
        assert!(!view.deleted);

        let stored = repo.get_message(view.id).await.unwrap();
        assert_eq!(stored.from_id, alice.id);
        assert_eq!(stored.to_id, bob.id);
        assert!(!stored.deleted);
        assert!(stored.deleted_by.is_none());
        assert!(stored.deleted_at.is_none());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&repo.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_append_validation() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;
        let pending = seed_user(&repo, "pat", false, ApprovalStatus::Pending).await;
        let admin = seed_admin(&repo, "admin").await;

        for (to, body) in [
            (bob.id.as_str(), ""),
            (bob.id.as_str(), "   \n"),
            ("", "hello"),
            (alice.id.as_str(), "hello"),
            ("u-ghost", "hello"),
            (pending.id.as_str(), "hello"),
            (admin.id.as_str(), "hello"),
        ] {
            let err = repo.append_message(&alice, to, body, MAX).await.unwrap_err();
            assert!(
                matches!(err, ChatError::Validation(_)),
                "expected validation error for to={to:?} body={body:?}, got {err:?}"
            );
        }

        let long = "x".repeat(11);
        let err = repo.append_message(&alice, &bob.id, &long, 10).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
    }

    #[tokio::test]
    async fn test_history_is_symmetric_and_ordered() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;
        let carol = seed_member(&repo, "carol").await;

        repo.append_message(&alice, &bob.id, "one", MAX).await.unwrap();
        repo.append_message(&bob, &alice.id, "two", MAX).await.unwrap();
        repo.append_message(&alice, &carol.id, "elsewhere", MAX)
            .await
            .unwrap();
        repo.append_message(&alice, &bob.id, "three", MAX).await.unwrap();

        let ab = repo.history(&alice.id, &bob.id, false, 100).await.unwrap();
        let ba = repo.history(&bob.id, &alice.id, false, 100).await.unwrap();

        let bodies: Vec<_> = ab.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
        let ids_ab: Vec<_> = ab.iter().map(|m| m.id).collect();
        let ids_ba: Vec<_> = ba.iter().map(|m| m.id).collect();
        assert_eq!(ids_ab, ids_ba);
    }

    #[tokio::test]
    async fn test_history_returns_most_recent_window() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;

        for i in 0..101 {
            repo.append_message(&alice, &bob.id, &format!("m{i}"), MAX)
                .await
                .unwrap();
        }

        let history = repo.history(&alice.id, &bob.id, false, 100).await.unwrap();
        assert_eq!(history.len(), 100);
        assert_eq!(history.first().unwrap().message, "m1");
        assert_eq!(history.last().unwrap().message, "m100");
    }

    #[tokio::test]
    async fn test_offline_send_shows_up_in_history() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;

        repo.append_message(&alice, &bob.id, "while you were out", MAX)
            .await
            .unwrap();
        let history = repo.history(&bob.id, &alice.id, false, 100).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "while you were out");
    }

    #[tokio::test]
    async fn test_only_author_can_delete() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;
        let admin = seed_admin(&repo, "admin").await;

        let msg = repo.append_message(&alice, &bob.id, "hi", MAX).await.unwrap();

        let err = repo.soft_delete_message(msg.id, &bob).await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        let err = repo.soft_delete_message(msg.id, &admin).await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert!(!repo.get_message(msg.id).await.unwrap().deleted);

        let deleted = repo.soft_delete_message(msg.id, &alice).await.unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.deleted_by.as_deref(), Some(alice.id.as_str()));
        assert!(deleted.deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_missing_message_is_not_found() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let admin = seed_admin(&repo, "admin").await;

        assert!(matches!(
            repo.soft_delete_message(999, &alice).await.unwrap_err(),
            ChatError::NotFound
        ));
        assert!(matches!(
            repo.restore_message(999, &admin).await.unwrap_err(),
            ChatError::NotFound
        ));
    }

    #[tokio::test]
    async fn test_redundant_delete_keeps_original_metadata() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;

        let msg = repo.append_message(&alice, &bob.id, "hi", MAX).await.unwrap();
        let first = repo.soft_delete_message(msg.id, &alice).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = repo.soft_delete_message(msg.id, &alice).await.unwrap();

        assert!(second.deleted);
        assert_eq!(second.deleted_at, first.deleted_at);
        assert_eq!(second.deleted_by, first.deleted_by);
    }

    #[tokio::test]
    async fn test_only_admin_can_restore() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;

        let msg = repo.append_message(&alice, &bob.id, "hi", MAX).await.unwrap();
        repo.soft_delete_message(msg.id, &alice).await.unwrap();

        let err = repo.restore_message(msg.id, &alice).await.unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert!(repo.get_message(msg.id).await.unwrap().deleted);
    }

    #[tokio::test]
    async fn test_delete_then_restore_round_trips_visible_history() {
        let repo = test_helpers::test_repository().await;
        let alice = seed_member(&repo, "alice").await;
        let bob = seed_member(&repo, "bob").await;
        let admin = seed_admin(&repo, "admin").await;

        let msg = repo.append_message(&alice, &bob.id, "hi", MAX).await.unwrap();
        repo.append_message(&bob, &alice.id, "hey", MAX).await.unwrap();
        let before = repo.history(&bob.id, &alice.id, false, 100).await.unwrap();

        repo.soft_delete_message(msg.id, &alice).await.unwrap();

        // Recipient sees the placeholder, admin sees the original body
        let bob_view = repo.history(&bob.id, &alice.id, false, 100).await.unwrap();
        assert_eq!(bob_view[0].message, DELETED_PLACEHOLDER);
        assert!(bob_view[0].deleted);
        let admin_view = repo.history(&alice.id, &bob.id, true, 100).await.unwrap();
        assert_eq!(admin_view[0].message, "hi");
        assert!(admin_view[0].deleted);
        assert_eq!(admin_view[0].deleted_by.as_ref().unwrap().username, "alice");

        let restored = repo.restore_message(msg.id, &admin).await.unwrap();
        assert_eq!(restored.message, "hi");
        assert_eq!(restored.from.id, alice.id);
        assert_eq!(restored.to.id, bob.id);
        assert!(!restored.deleted);

        let after = repo.history(&bob.id, &alice.id, false, 100).await.unwrap();
        let strip = |v: &[MessageView]| {
            v.iter()
                .map(|m| (m.id, m.message.clone(), m.deleted))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(&before), strip(&after));

        let stored = repo.get_message(msg.id).await.unwrap();
        assert!(stored.deleted_by.is_none());
        assert!(stored.deleted_at.is_none());
    }
}
