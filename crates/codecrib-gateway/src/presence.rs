use std::collections::{HashMap, HashSet};

use uuid::Uuid;

pub type ConnectionId = Uuid;

/// What a live connection announced when it joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
}

/// In-memory map of live connections to (room, user), plus the reverse
/// room -> connections index used for fan-out.
///
/// Nothing here is persisted. After a restart every user is offline until
/// they connect and join again.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    connections: HashMap<ConnectionId, Presence>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert. A connection that was already in another room is moved.
    pub fn add(&mut self, conn_id: ConnectionId, room_id: &str, user_id: &str, user_name: &str) {
        let presence = Presence {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
        };

        if let Some(previous) = self.connections.insert(conn_id, presence) {
            if previous.room_id != room_id {
                self.detach(conn_id, &previous.room_id);
            }
        }

        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Returns the removed association; unknown connections are a no-op.
    pub fn remove(&mut self, conn_id: ConnectionId) -> Option<Presence> {
        let presence = self.connections.remove(&conn_id)?;
        self.detach(conn_id, &presence.room_id);
        Some(presence)
    }

    pub fn lookup(&self, conn_id: ConnectionId) -> Option<&Presence> {
        self.connections.get(&conn_id)
    }

    /// Users with at least one live connection in the room. Two tabs of the
    /// same user count once.
    pub fn live_user_ids_in_room(&self, room_id: &str) -> HashSet<String> {
        self.rooms
            .get(room_id)
            .map(|conns| {
                conns
                    .iter()
                    .filter_map(|c| self.connections.get(c))
                    .map(|p| p.user_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn connections_in_room(&self, room_id: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_user_live_in_room(&self, room_id: &str, user_id: &str) -> bool {
        self.rooms.get(room_id).is_some_and(|conns| {
            conns
                .iter()
                .filter_map(|c| self.connections.get(c))
                .any(|p| p.user_id == user_id)
        })
    }

    pub fn is_room_empty(&self, room_id: &str) -> bool {
        !self.rooms.contains_key(room_id)
    }

    fn detach(&mut self, conn_id: ConnectionId, room_id: &str) {
        if let Some(conns) = self.rooms.get_mut(room_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                self.rooms.remove(room_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_is_idempotent() {
        let mut tracker = PresenceTracker::new();
        let c = Uuid::new_v4();
        tracker.add(c, "r1", "u1", "Alice");
        tracker.add(c, "r1", "u1", "Alice");
        assert_eq!(tracker.connections_in_room("r1"), vec![c]);
    }

    #[test]
    fn two_connections_of_one_user_count_once() {
        let mut tracker = PresenceTracker::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        tracker.add(a, "r1", "u1", "Alice");
        tracker.add(b, "r1", "u1", "Alice");

        assert_eq!(tracker.connections_in_room("r1").len(), 2);
        assert_eq!(tracker.live_user_ids_in_room("r1").len(), 1);

        tracker.remove(a);
        assert!(tracker.is_user_live_in_room("r1", "u1"));
        tracker.remove(b);
        assert!(!tracker.is_user_live_in_room("r1", "u1"));
        assert!(tracker.is_room_empty("r1"));
    }

    #[test]
    fn rejoin_elsewhere_moves_the_connection() {
        let mut tracker = PresenceTracker::new();
        let c = Uuid::new_v4();
        tracker.add(c, "r1", "u1", "Alice");
        tracker.add(c, "r2", "u1", "Alice");

        assert!(tracker.connections_in_room("r1").is_empty());
        assert_eq!(tracker.connections_in_room("r2"), vec![c]);
        assert_eq!(tracker.lookup(c).unwrap().room_id, "r2");
    }

    #[test]
    fn removing_unknown_connection_is_a_no_op() {
        let mut tracker = PresenceTracker::new();
        assert!(tracker.remove(Uuid::new_v4()).is_none());
    }
}
