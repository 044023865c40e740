//! Room-based broadcast registry for live WebSocket delivery.
//!
//! Connections register an outbound channel, then join and leave named
//! rooms. Publishing to a room enqueues the frame on every member's
//! channel; connections whose receiving half is gone are skipped.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Room name for a user's personal room.
pub fn user_room(user_id: Uuid) -> String {
    format!("user_{}", user_id)
}

/// Room name for a conversation room.
pub fn conversation_room(conversation_id: Uuid) -> String {
    format!("conversation_{}", conversation_id)
}

/// Registry of live connections and their room memberships.
#[derive(Default)]
pub struct RoomBroadcaster {
    connections: RwLock<HashMap<Uuid, UnboundedSender<String>>>,
    rooms: RwLock<HashMap<String, HashSet<Uuid>>>,
}

impl RoomBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and hand back the outbound frame stream.
    pub async fn register(&self, connection_id: Uuid) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(connection_id, tx);
        rx
    }

    /// Remove a connection from the registry and from every room it joined.
    /// Rooms left without members are dropped.
    pub async fn disconnect(&self, connection_id: Uuid) {
        self.connections.write().await.remove(&connection_id);
        self.rooms.write().await.retain(|_, members| {
            members.remove(&connection_id);
            !members.is_empty()
        });
    }

    /// Add a connection to a room. Returns false if it was already a member.
    pub async fn join(&self, room: &str, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room.to_string()).or_default().insert(connection_id)
    }

    /// Remove a connection from a room. Returns false if it was not a member.
    /// The room is dropped once its last member leaves.
    pub async fn leave(&self, room: &str, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Whether any connection is currently in the room.
    pub async fn has_room(&self, room: &str) -> bool {
        self.rooms.read().await.contains_key(room)
    }

    /// Publish an event frame to every member of a room.
    ///
    /// The membership lock is released before frames are enqueued, so
    /// delivery never blocks joins and leaves on other connections.
    pub async fn publish(&self, room: &str, event: &str, data: Value) {
        let members: Vec<Uuid> = {
            let rooms = self.rooms.read().await;
            match rooms.get(room) {
                Some(members) => members.iter().copied().collect(),
                None => return,
            }
        };

        let frame = envelope(event, data);
        debug!("Publishing '{}' to room {} ({} members)", event, room, members.len());

        let connections = self.connections.read().await;
        for connection_id in members {
            if let Some(sender) = connections.get(&connection_id) {
                let _ = sender.send(frame.clone());
            }
        }
    }

    /// Send an event frame to a single connection.
    pub async fn send_to_connection(&self, connection_id: Uuid, event: &str, data: Value) {
        let connections = self.connections.read().await;
        if let Some(sender) = connections.get(&connection_id) {
            let _ = sender.send(envelope(event, data));
        }
    }
}

fn envelope(event: &str, data: Value) -> String {
    json!({ "event": event, "data": data }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(frame: &str) -> Value {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn publish_reaches_all_members() {
        let rooms = RoomBroadcaster::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rx_a = rooms.register(a).await;
        let mut rx_b = rooms.register(b).await;

        rooms.join("room_1", a).await;
        rooms.join("room_1", b).await;
        rooms.publish("room_1", "ping", json!({"n": 1})).await;

        let frame = parse(&rx_a.try_recv().unwrap());
        assert_eq!(frame["event"], "ping");
        assert_eq!(frame["data"]["n"], 1);
        let frame = parse(&rx_b.try_recv().unwrap());
        assert_eq!(frame["event"], "ping");
    }

    #[tokio::test]
    async fn join_is_idempotent() {
        let rooms = RoomBroadcaster::new();
        let a = Uuid::new_v4();
        let mut rx = rooms.register(a).await;

        assert!(rooms.join("room_1", a).await);
        assert!(!rooms.join("room_1", a).await);

        rooms.publish("room_1", "ping", json!({})).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_is_idempotent_and_drops_empty_rooms() {
        let rooms = RoomBroadcaster::new();
        let a = Uuid::new_v4();
        let mut rx = rooms.register(a).await;

        rooms.join("room_1", a).await;
        assert!(rooms.has_room("room_1").await);

        assert!(rooms.leave("room_1", a).await);
        assert!(!rooms.leave("room_1", a).await);
        assert!(!rooms.leave("missing", a).await);
        assert!(!rooms.has_room("room_1").await);

        rooms.publish("room_1", "ping", json!({})).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn frames_arrive_in_publish_order() {
        let rooms = RoomBroadcaster::new();
        let a = Uuid::new_v4();
        let mut rx = rooms.register(a).await;
        rooms.join("room_1", a).await;

        for n in 0..5 {
            rooms.publish("room_1", "seq", json!({"n": n})).await;
        }
        for n in 0..5 {
            let frame = parse(&rx.try_recv().unwrap());
            assert_eq!(frame["data"]["n"], n);
        }
    }

    #[tokio::test]
    async fn dead_connections_are_skipped() {
        let rooms = RoomBroadcaster::new();
        let alive = Uuid::new_v4();
        let dead = Uuid::new_v4();
        let mut rx_alive = rooms.register(alive).await;
        let rx_dead = rooms.register(dead).await;
        drop(rx_dead);

        rooms.join("room_1", alive).await;
        rooms.join("room_1", dead).await;
        rooms.publish("room_1", "ping", json!({})).await;

        assert!(rx_alive.try_recv().is_ok());
    }

    #[tokio::test]
    async fn disconnect_removes_memberships() {
        let rooms = RoomBroadcaster::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _rx_a = rooms.register(a).await;
        let mut rx_b = rooms.register(b).await;

        rooms.join("room_1", a).await;
        rooms.join("room_1", b).await;
        rooms.join("room_2", a).await;

        rooms.disconnect(a).await;
        assert!(rooms.has_room("room_1").await);
        assert!(!rooms.has_room("room_2").await);

        rooms.publish("room_1", "ping", json!({})).await;
        assert!(rx_b.try_recv().is_ok());
    }

    #[tokio::test]
    async fn room_name_helpers() {
        let id = Uuid::new_v4();
        assert_eq!(user_room(id), format!("user_{}", id));
        assert_eq!(conversation_room(id), format!("conversation_{}", id));
    }
}
