//! Data models for the Courier messaging server

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user known to the server.
///
/// Identity is external to the messaging core: this record only carries what
/// the core itself needs, a stable id and an optional display name used when
/// titling new conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub display_name: Option<String>,
    pub created_at: u64,
}

/// A 1:1 conversation between two users.
///
/// The participant pair is stored normalized (`user_a` sorts before `user_b`)
/// so that the pair is unique regardless of who initiated contact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: Option<String>,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub created_at: u64,
    /// Bumped to the creation time of every appended message.
    pub updated_at: u64,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    /// The other participant. Callers must check `is_participant` first.
    pub fn counterpart_of(&self, user_id: Uuid) -> Uuid {
        if self.user_a == user_id {
            self.user_b
        } else {
            self.user_a
        }
    }
}

/// A single message within a conversation.
///
/// Immutable once created except for `read_at`, which transitions from null
/// to a timestamp exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub text: String,
    pub created_at: u64,
    pub read_at: Option<u64>,
}

/// A durable notification record for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub body: String,
    /// Notification category, "message" for messaging fan-out.
    pub kind: String,
    /// For message notifications, the conversation the message belongs to.
    pub related_id: Option<Uuid>,
    pub created_at: u64,
    pub read_at: Option<u64>,
}

/// Authentication token minted by the identity surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: u64,
}

/// Conversation with last message preview and unread count for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub title: Option<String>,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_message: Option<Message>,
    pub unread_count: u32,
}

/// Events a live client may send over the WebSocket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to the personal room, plus a conversation room if given
    Join {
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },
    /// Unsubscribe from a conversation room
    Leave { conversation_id: Uuid },
    /// Send a message, resolving the conversation if no id is given
    Send {
        receiver_id: Uuid,
        text: String,
        #[serde(default)]
        conversation_id: Option<Uuid>,
    },
}

/// Registration request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Registration response
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user: User,
    pub token: String,
}

/// Authentication request
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

/// Authentication response
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
}

/// Query parameters for the conversation listing endpoint
#[derive(Debug, Deserialize)]
pub struct ConversationsQuery {
    pub keyword: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Response for the conversation listing endpoint
#[derive(Debug, Serialize)]
pub struct ConversationsResponse {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub conversations: Vec<ConversationSummary>,
}

/// Response for the conversation detail endpoint
#[derive(Debug, Serialize)]
pub struct ConversationDetailResponse {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Query parameters for the notification listing endpoint
#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// Response for the notification listing endpoint
#[derive(Debug, Serialize)]
pub struct NotificationsResponse {
    pub total: u64,
    pub unread: u64,
    pub page: u32,
    pub limit: u32,
    pub notifications: Vec<Notification>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(user_a: Uuid, user_b: Uuid) -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            title: None,
            user_a,
            user_b,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn participant_checks() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = conversation(a, b);

        assert!(c.is_participant(a));
        assert!(c.is_participant(b));
        assert!(!c.is_participant(Uuid::new_v4()));
        assert_eq!(c.counterpart_of(a), b);
        assert_eq!(c.counterpart_of(b), a);
    }

    #[test]
    fn client_events_deserialize() {
        let join: ClientEvent = serde_json::from_str(r#"{"event":"join"}"#).unwrap();
        assert!(matches!(join, ClientEvent::Join { conversation_id: None }));

        let id = Uuid::new_v4();
        let leave: ClientEvent =
            serde_json::from_str(&format!(r#"{{"event":"leave","conversation_id":"{}"}}"#, id))
                .unwrap();
        assert!(matches!(leave, ClientEvent::Leave { conversation_id } if conversation_id == id));

        let send: ClientEvent = serde_json::from_str(&format!(
            r#"{{"event":"send","receiver_id":"{}","text":"hi"}}"#,
            id
        ))
        .unwrap();
        match send {
            ClientEvent::Send { receiver_id, text, conversation_id } => {
                assert_eq!(receiver_id, id);
                assert_eq!(text, "hi");
                assert!(conversation_id.is_none());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
