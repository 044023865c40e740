//! Shared application state and the messaging facade.
//!
//! `AppState` ties the database, the room broadcaster, and the in-memory
//! token registry together and enforces the messaging rules: who may send
//! into a conversation, when read-state transitions, and what gets fanned
//! out to notifications and live rooms.

use crate::db::Database;
use crate::error::{ChatError, ChatResult};
use crate::models::{AuthToken, Conversation, ConversationSummary, Message, Notification, User};
use crate::rooms::{conversation_room, user_room, RoomBroadcaster};
use crate::validation::{normalize_display_name, validate_message_text};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Application state shared across handlers
pub struct AppState {
    /// Database connection for persistent storage
    pub db: Database,
    /// Live connections and their room subscriptions
    pub rooms: RoomBroadcaster,
    /// Active authentication tokens (in-memory, expiring)
    pub auth_tokens: RwLock<HashMap<String, AuthToken>>,
    /// Server start time
    pub start_time: u64,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("db", &"<Database>")
            .field("start_time", &self.start_time)
            .finish()
    }
}

impl AppState {
    /// Create new application state with database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        let db = Database::new(db_path).await?;
        Ok(Self {
            db,
            rooms: RoomBroadcaster::new(),
            auth_tokens: RwLock::new(HashMap::new()),
            start_time: now(),
        })
    }

    /// Create new application state with in-memory database (for testing)
    pub async fn new_in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    // ── Identity operations ──

    /// Register a user and mint a session token for them.
    pub async fn register_user(&self, display_name: Option<String>) -> ChatResult<(User, String)> {
        let display_name = normalize_display_name(display_name)?;
        let user = self.db.create_user(display_name.as_deref()).await?;
        let token = self.issue_token(user.id).await;
        Ok((user, token))
    }

    async fn issue_token(&self, user_id: Uuid) -> String {
        let token = format!("tok_{}", Uuid::new_v4().simple());
        let issued_at = now();
        let auth_token = AuthToken {
            token: token.clone(),
            user_id,
            expires_at: issued_at + 86_400_000, // 24h
        };
        let mut auth_tokens = self.auth_tokens.write().await;
        // Each issue sweeps out expired entries so the registry stays
        // bounded by the number of live sessions.
        auth_tokens.retain(|_, existing| existing.expires_at > issued_at);
        auth_tokens.insert(token.clone(), auth_token);
        token
    }

    /// Resolve a token to its user, if the token is known and unexpired.
    pub async fn resolve_identity(&self, token: &str) -> Option<Uuid> {
        let auth_tokens = self.auth_tokens.read().await;
        let auth_token = auth_tokens.get(token)?;
        if auth_token.expires_at > now() {
            Some(auth_token.user_id)
        } else {
            None
        }
    }

    pub async fn authenticate(&self, token: &str) -> ChatResult<User> {
        let user_id = self
            .resolve_identity(token)
            .await
            .ok_or(ChatError::Unauthenticated)?;
        let user = self
            .db
            .get_user(user_id)
            .await?
            .ok_or(ChatError::Unauthenticated)?;
        Ok(user)
    }

    // ── Messaging operations ──

    /// Send a message from `sender_id` to `receiver_id`.
    ///
    /// With an explicit conversation id the conversation must exist and the
    /// sender and receiver must be its two participants. Without one, the
    /// conversation for the pair is resolved, created on first contact. The
    /// receiver gets a durable notification (persistence failures are logged,
    /// never surfaced to the sender) and the message is published to the
    /// receiver's personal room and the conversation room.
    pub async fn send_message(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        text: &str,
        conversation_id: Option<Uuid>,
    ) -> ChatResult<Message> {
        validate_message_text(text)?;

        let conversation = match conversation_id {
            Some(id) => {
                let conversation = self
                    .db
                    .get_conversation(id)
                    .await?
                    .ok_or(ChatError::ConversationNotFound)?;
                if !conversation.is_participant(sender_id)
                    || conversation.counterpart_of(sender_id) != receiver_id
                {
                    return Err(ChatError::NotParticipant);
                }
                conversation
            }
            None => self.resolve_conversation(sender_id, receiver_id).await?,
        };

        let message = self
            .db
            .append_message(conversation.id, sender_id, receiver_id, text)
            .await?;

        // The message is committed at this point; a notification failure
        // must not undo or fail the send.
        if let Err(err) = self
            .db
            .create_notification(
                receiver_id,
                "New message",
                &notification_preview(text),
                "message",
                Some(conversation.id),
            )
            .await
        {
            warn!("Failed to persist notification for {}: {}", receiver_id, err);
        }

        let payload = serde_json::to_value(&message).context("Failed to serialize message")?;
        self.rooms
            .publish(&user_room(receiver_id), "new_message", payload.clone())
            .await;
        self.rooms
            .publish(&conversation_room(conversation.id), "new_message", payload)
            .await;

        Ok(message)
    }

    /// Resolve the conversation for a pair of users, creating it on first
    /// contact. The title is fixed at creation from the receiver's display
    /// name and never rewritten by later resolutions.
    async fn resolve_conversation(&self, sender_id: Uuid, receiver_id: Uuid) -> ChatResult<Conversation> {
        if sender_id == receiver_id {
            return Err(ChatError::InvalidParticipants);
        }
        let receiver = self
            .db
            .get_user(receiver_id)
            .await?
            .ok_or(ChatError::ReceiverNotFound)?;

        let title = receiver.display_name.as_deref().unwrap_or("Conversation");
        let conversation = self
            .db
            .find_or_create_conversation(sender_id, receiver_id, Some(title))
            .await?;
        Ok(conversation)
    }

    /// Fetch a conversation with its full history, marking the caller's
    /// unread incoming messages as read. Outsiders are rejected before any
    /// read-state mutation.
    pub async fn conversation_history(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> ChatResult<(Conversation, Vec<Message>)> {
        let conversation = self
            .db
            .get_conversation(conversation_id)
            .await?
            .ok_or(ChatError::ConversationNotFound)?;
        if !conversation.is_participant(user_id) {
            return Err(ChatError::NotParticipant);
        }

        self.db.mark_messages_read(conversation_id, user_id).await?;
        let messages = self.db.get_conversation_messages(conversation_id).await?;
        Ok((conversation, messages))
    }

    /// List a user's conversations, most recently active first, with the
    /// last message and the caller's unread count attached to each.
    pub async fn list_conversations(
        &self,
        user_id: Uuid,
        keyword: Option<&str>,
        page: u32,
        limit: u32,
    ) -> ChatResult<(u64, Vec<ConversationSummary>)> {
        let total = self.db.count_conversations(user_id, keyword).await?;
        let conversations = self.db.list_conversations(user_id, keyword, page, limit).await?;

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let last_message = self.db.get_last_message(conversation.id).await?;
            let unread_count = self.db.count_unread_messages(conversation.id, user_id).await? as u32;
            summaries.push(ConversationSummary {
                id: conversation.id,
                title: conversation.title,
                user_a: conversation.user_a,
                user_b: conversation.user_b,
                created_at: conversation.created_at,
                updated_at: conversation.updated_at,
                last_message,
                unread_count,
            });
        }

        Ok((total, summaries))
    }

    // ── Notification operations ──

    /// List a user's notifications, newest first, with total and unread counts.
    pub async fn list_notifications(
        &self,
        user_id: Uuid,
        page: u32,
        limit: u32,
    ) -> ChatResult<(u64, u64, Vec<Notification>)> {
        let total = self.db.count_notifications(user_id).await?;
        let unread = self.db.count_unread_notifications(user_id).await?;
        let notifications = self.db.list_notifications(user_id, page, limit).await?;
        Ok((total, unread, notifications))
    }

    /// Mark one of the user's notifications as read. Someone else's
    /// notification reads as missing, not as forbidden.
    pub async fn mark_notification_read(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> ChatResult<Notification> {
        let notification = self
            .db
            .get_notification(notification_id)
            .await?
            .ok_or(ChatError::NotificationNotFound)?;
        if notification.user_id != user_id {
            return Err(ChatError::NotificationNotFound);
        }

        self.db.mark_notification_read(notification_id).await?;
        let refreshed = self
            .db
            .get_notification(notification_id)
            .await?
            .ok_or(ChatError::NotificationNotFound)?;
        Ok(refreshed)
    }

    pub async fn mark_all_notifications_read(&self, user_id: Uuid) -> ChatResult<u64> {
        Ok(self.db.mark_all_notifications_read(user_id).await?)
    }

    /// Delete one of the user's notifications. Someone else's notification
    /// reads as missing, not as forbidden.
    pub async fn delete_notification(
        &self,
        user_id: Uuid,
        notification_id: Uuid,
    ) -> ChatResult<()> {
        let notification = self
            .db
            .get_notification(notification_id)
            .await?
            .ok_or(ChatError::NotificationNotFound)?;
        if notification.user_id != user_id {
            return Err(ChatError::NotificationNotFound);
        }

        self.db.delete_notification(notification_id).await?;
        Ok(())
    }

    /// Seconds since the server started.
    pub fn uptime(&self) -> u64 {
        (now() - self.start_time) / 1000
    }
}

/// Notification bodies carry a bounded preview of the message text.
fn notification_preview(text: &str) -> String {
    const PREVIEW_CHARS: usize = 120;
    if text.chars().count() <= PREVIEW_CHARS {
        text.to_string()
    } else {
        let cut: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", cut)
    }
}

fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Shared application state type
pub type SharedState = Arc<AppState>;
