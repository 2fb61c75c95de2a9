use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use codecrib_db::Database;
use codecrib_db::models::UserRow;
use codecrib_types::CoreError;
use codecrib_types::events::RoomEvent;
use codecrib_types::models::{ChatMessage, FileRecord, Participant, Room, RosterEntry};

use crate::blocking;
use crate::presence::{ConnectionId, Presence, PresenceTracker};

/// Client events the router redistributes without touching the registry.
#[derive(Debug, Clone)]
pub enum Relay {
    /// Goes to everyone in the room except the sender
    Message(ChatMessage),
    /// The remaining variants go to everyone, sender included
    NewFile(FileRecord),
    FileRead { file_name: String },
    FileDelete { file_name: String },
}

#[derive(Debug, Clone, Copy)]
enum Audience {
    Everyone,
    AllBut(ConnectionId),
}

/// Routes real-time events between the connections of each room and keeps
/// presence in sync with the room registry.
#[derive(Clone)]
pub struct RoomRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    db: Arc<Database>,

    /// Presence and outboxes change together, so they share one lock. It is
    /// never held across an await on storage.
    connections: RwLock<Connections>,

    /// One lock per room: events of a room are handled one at a time,
    /// different rooms proceed in parallel.
    room_locks: RoomLocks,
}

type RoomLocks = std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>;

/// Exclusive turn on one room. Dropping it releases the room lock, and the
/// lock itself is forgotten once no other task holds or awaits it.
pub(crate) struct RoomTurn<'a> {
    locks: &'a RoomLocks,
    room_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RoomTurn<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // only the map still refers to it
        if locks
            .get(&self.room_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.room_id);
        }
    }
}

#[derive(Default)]
struct Connections {
    presence: PresenceTracker,
    outboxes: HashMap<ConnectionId, mpsc::UnboundedSender<RoomEvent>>,
}

impl RoomRouter {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                db,
                connections: RwLock::new(Connections::default()),
                room_locks: std::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a new unjoined connection. Returns its id and the queue of
    /// events addressed to it.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<RoomEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.connections.write().await.outboxes.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Associate a connection with a room and publish the merged roster.
    /// Failures are logged and swallowed: the real-time channel has no reply.
    ///
    /// Only users known to the identity store enter the durable roster, and
    /// their snapshot is taken from there rather than from `user_name`.
    pub async fn join(&self, conn_id: ConnectionId, room_id: &str, user_id: &str, user_name: &str) {
        match self.try_join(conn_id, room_id, user_id, user_name).await {
            Ok(()) => {}
            Err(CoreError::TransientConnectionRace(_)) => {
                debug!("Connection {} closed before joining room {}", conn_id, room_id);
            }
            Err(CoreError::InvalidInput(why)) => {
                warn!("Invalid join on connection {}: {}", conn_id, why);
            }
            Err(CoreError::NotFound(what)) => {
                warn!("Join on connection {} aborted: {} not found", conn_id, what);
            }
            Err(e) => {
                error!("Join of room {} failed: {}", room_id, e);
            }
        }
    }

    async fn try_join(
        &self,
        conn_id: ConnectionId,
        room_id: &str,
        user_id: &str,
        user_name: &str,
    ) -> Result<(), CoreError> {
        if user_id.is_empty() || user_name.is_empty() {
            return Err(CoreError::invalid(format!(
                "userId={:?} userName={:?}",
                user_id, user_name
            )));
        }

        let _turn = self.enter_room(room_id).await;

        {
            let mut conns = self.inner.connections.write().await;
            if !conns.outboxes.contains_key(&conn_id) {
                return Err(CoreError::TransientConnectionRace(conn_id));
            }
            conns.presence.add(conn_id, room_id, user_id, user_name);
        }
        info!("{} ({}) joined room {} on {}", user_name, user_id, room_id, conn_id);

        self.broadcast(
            room_id,
            Audience::AllBut(conn_id),
            RoomEvent::UserJoined {
                id: user_id.to_string(),
                name: user_name.to_string(),
                online: true,
            },
        )
        .await;

        let db = self.inner.db.clone();
        let (rid, uid) = (room_id.to_string(), user_id.to_string());
        let loaded = blocking(move || {
            if !db.room_exists(&rid)? {
                return Ok(Err(format!("room {}", rid)));
            }
            let Some(user) = db.get_user_by_id(&uid)? else {
                return Ok(Err(format!("user {}", uid)));
            };
            db.upsert_participant(
                &rid,
                &Participant {
                    user_id: user.id,
                    name: user.name,
                    profile_pic_ref: user.profile_pic,
                },
            )?;
            Ok(load_room_with_users(&db, &rid)?.ok_or_else(|| format!("room {}", rid)))
        })
        .await?;
        let (room, users) = loaded.map_err(CoreError::NotFound)?;

        let live = self.inner.connections.read().await.presence.live_user_ids_in_room(room_id);
        let roster = merge_roster(&room, &users, &live);
        debug!("Room {} roster: {} participants, {} online", room_id, roster.len(), live.len());

        self.broadcast(room_id, Audience::Everyone, RoomEvent::RoomParticipants(roster))
            .await;
        Ok(())
    }

    /// Redistribute a client event to the sender's room.
    pub async fn relay(&self, conn_id: ConnectionId, relay: Relay) {
        let Some((_turn, presence)) = self.enter_joined_room(conn_id).await else {
            warn!("Dropping {} from {}: not in a room", relay.kind(), conn_id);
            return;
        };
        let Presence { room_id, user_id, .. } = presence;

        let (audience, event) = match relay {
            Relay::Message(mut msg) => {
                msg.timestamp = Some(chrono::Utc::now());
                (Audience::AllBut(conn_id), RoomEvent::Message(msg))
            }
            Relay::NewFile(file) => (Audience::Everyone, RoomEvent::NewFile(file)),
            Relay::FileRead { file_name } => {
                (Audience::Everyone, RoomEvent::FileRead { file_name, user_id })
            }
            Relay::FileDelete { file_name } => {
                (Audience::Everyone, RoomEvent::FileDelete { file_name, user_id })
            }
        };

        self.broadcast(&room_id, audience, event).await;
    }

    /// Advisory visibility change (tab hidden/focused). Liveness itself is
    /// only ever derived from connection existence.
    pub async fn status_change(&self, conn_id: ConnectionId, online: bool) {
        let Some((_turn, presence)) = self.enter_joined_room(conn_id).await else {
            warn!("Dropping statusChange from {}: not in a room", conn_id);
            return;
        };

        self.broadcast(
            &presence.room_id,
            Audience::AllBut(conn_id),
            RoomEvent::UserStatus {
                user_id: presence.user_id,
                online,
            },
        )
        .await;
    }

    /// Tear down a connection. `user-left` is only published when the user
    /// has no other live connection in the room.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let (_turn, presence) = loop {
            if let Some(found) = self.enter_joined_room(conn_id).await {
                break found;
            }
            // retry if a join landed after the lookup
            let mut conns = self.inner.connections.write().await;
            if conns.presence.lookup(conn_id).is_none() {
                conns.outboxes.remove(&conn_id);
                debug!("Connection {} closed without joining", conn_id);
                return;
            }
        };

        let still_live = {
            let mut conns = self.inner.connections.write().await;
            conns.outboxes.remove(&conn_id);
            conns.presence.remove(conn_id);
            conns
                .presence
                .is_user_live_in_room(&presence.room_id, &presence.user_id)
        };
        info!(
            "{} ({}) left room {} from {}",
            presence.user_name, presence.user_id, presence.room_id, conn_id
        );

        if !still_live {
            self.broadcast(
                &presence.room_id,
                Audience::Everyone,
                RoomEvent::UserLeft {
                    user_id: presence.user_id,
                    name: presence.user_name,
                },
            )
            .await;
        }
    }

    /// Server-originated broadcast to every connection of a room. Returns
    /// the number of connections reached.
    pub async fn announce(&self, room_id: &str, event: RoomEvent) -> usize {
        let _turn = self.enter_room(room_id).await;
        self.broadcast(room_id, Audience::Everyone, event).await
    }

    /// Merged roster of a room, computed without broadcasting.
    pub async fn roster(&self, room_id: &str) -> Result<Vec<RosterEntry>, CoreError> {
        let db = self.inner.db.clone();
        let rid = room_id.to_string();
        let (room, users) = blocking(move || load_room_with_users(&db, &rid))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("room {}", room_id)))?;

        let live = self.inner.connections.read().await.presence.live_user_ids_in_room(room_id);
        Ok(merge_roster(&room, &users, &live))
    }

    pub async fn is_online(&self, room_id: &str, user_id: &str) -> bool {
        self.inner
            .connections
            .read()
            .await
            .presence
            .is_user_live_in_room(room_id, user_id)
    }

    async fn association(&self, conn_id: ConnectionId) -> Option<Presence> {
        self.inner
            .connections
            .read()
            .await
            .presence
            .lookup(conn_id)
            .cloned()
    }

    /// Take the turn of the room a connection is in. The association is read
    /// again once the turn is held, and followed if a re-join moved it.
    async fn enter_joined_room(&self, conn_id: ConnectionId) -> Option<(RoomTurn<'_>, Presence)> {
        let mut room_id = self.association(conn_id).await?.room_id;
        loop {
            let turn = self.enter_room(&room_id).await;
            let presence = self.association(conn_id).await?;
            if presence.room_id == room_id {
                return Some((turn, presence));
            }
            room_id = presence.room_id;
        }
    }

    pub(crate) async fn enter_room(&self, room_id: &str) -> RoomTurn<'_> {
        let lock = {
            let mut locks = self
                .inner
                .room_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(room_id.to_string()).or_default().clone()
        };
        RoomTurn {
            locks: &self.inner.room_locks,
            room_id: room_id.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Deliver under a single read snapshot of presence. Closed outboxes are
    /// skipped, they never fail the broadcast.
    async fn broadcast(&self, room_id: &str, audience: Audience, event: RoomEvent) -> usize {
        let conns = self.inner.connections.read().await;
        let mut delivered = 0;
        for target in conns.presence.connections_in_room(room_id) {
            if let Audience::AllBut(sender) = audience {
                if sender == target {
                    continue;
                }
            }
            if let Some(tx) = conns.outboxes.get(&target) {
                if tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }
}

impl Relay {
    fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::NewFile(_) => "newFile",
            Self::FileRead { .. } => "fileRead",
            Self::FileDelete { .. } => "fileDelete",
        }
    }
}

fn load_room_with_users(db: &Database, room_id: &str) -> anyhow::Result<Option<(Room, Vec<UserRow>)>> {
    let Some(room) = db.get_room(room_id)? else {
        return Ok(None);
    };
    let ids: Vec<String> = room.participants.iter().map(|p| p.user_id.clone()).collect();
    let users = db.get_users_by_ids(&ids)?;
    Ok(Some((room, users)))
}

/// One entry per historical participant, first occurrence wins. The name
/// comes from the roster snapshot; a non-empty profile image from the
/// identity store beats the snapshot.
pub fn merge_roster(room: &Room, users: &[UserRow], live: &HashSet<String>) -> Vec<RosterEntry> {
    let by_id: HashMap<&str, &UserRow> = users.iter().map(|u| (u.id.as_str(), u)).collect();
    let mut seen = HashSet::new();

    room.participants
        .iter()
        .filter(|p| seen.insert(p.user_id.as_str()))
        .map(|p| {
            let fresh_pic = by_id
                .get(p.user_id.as_str())
                .and_then(|u| u.profile_pic.clone())
                .filter(|pic| !pic.is_empty());
            RosterEntry {
                id: p.user_id.clone(),
                name: p.name.clone(),
                profile_pic_ref: fresh_pic.or_else(|| p.profile_pic_ref.clone()),
                online: live.contains(&p.user_id),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    type Outbox = mpsc::UnboundedReceiver<RoomEvent>;

    fn setup() -> (RoomRouter, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.create_room("abc123", "owner", "Rust").unwrap();
        for (id, name) in [("u1", "Alice"), ("u2", "Bob"), ("u3", "Carol")] {
            db.create_user(id, name, &format!("{}@example.com", id), "hash").unwrap();
        }
        (RoomRouter::new(db.clone()), db)
    }

    fn lock_count(router: &RoomRouter) -> usize {
        router.inner.room_locks.lock().unwrap().len()
    }

    fn drain(rx: &mut Outbox) -> Vec<RoomEvent> {
        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn entry(id: &str, name: &str, online: bool) -> RosterEntry {
        RosterEntry {
            id: id.into(),
            name: name.into(),
            profile_pic_ref: None,
            online,
        }
    }

    fn chat(text: &str) -> ChatMessage {
        ChatMessage {
            text: text.into(),
            sender: "Alice".into(),
            sender_id: "u1".into(),
            timestamp: None,
        }
    }

    async fn joined(router: &RoomRouter, user_id: &str, name: &str) -> (ConnectionId, Outbox) {
        let (conn, rx) = router.connect().await;
        router.join(conn, "abc123", user_id, name).await;
        (conn, rx)
    }

    #[tokio::test]
    async fn first_join_records_participant_and_sends_roster_to_joiner() {
        let (router, db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;

        assert_eq!(
            drain(&mut rx_a),
            vec![RoomEvent::RoomParticipants(vec![entry("u1", "Alice", true)])]
        );
        let room = db.get_room("abc123").unwrap().unwrap();
        assert_eq!(room.participants.len(), 1);
        assert_eq!(room.participants[0].user_id, "u1");
    }

    #[tokio::test]
    async fn second_join_notifies_others_and_rebroadcasts_roster() {
        let (router, _db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;
        drain(&mut rx_a);
        let (_b, mut rx_b) = joined(&router, "u2", "Bob").await;

        let roster = RoomEvent::RoomParticipants(vec![
            entry("u1", "Alice", true),
            entry("u2", "Bob", true),
        ]);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                RoomEvent::UserJoined {
                    id: "u2".into(),
                    name: "Bob".into(),
                    online: true
                },
                roster.clone(),
            ]
        );
        assert_eq!(drain(&mut rx_b), vec![roster]);
    }

    #[tokio::test]
    async fn same_user_on_two_connections_is_listed_once() {
        let (router, _db) = setup();
        let (_a1, _rx1) = joined(&router, "u1", "Alice").await;
        let (_a2, mut rx2) = joined(&router, "u1", "Alice").await;

        let events = drain(&mut rx2);
        let Some(RoomEvent::RoomParticipants(roster)) = events.last() else {
            panic!("expected roster, got {:?}", events);
        };
        assert_eq!(roster, &vec![entry("u1", "Alice", true)]);
    }

    #[tokio::test]
    async fn join_without_identity_does_nothing() {
        let (router, db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;
        drain(&mut rx_a);

        let (b, mut rx_b) = router.connect().await;
        router.join(b, "abc123", "", "Bob").await;
        router.join(b, "abc123", "u2", "").await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(db.get_room("abc123").unwrap().unwrap().participants.len(), 1);
    }

    #[tokio::test]
    async fn join_to_unknown_room_announces_but_sends_no_roster() {
        let (router, _db) = setup();
        let (a, mut rx_a) = router.connect().await;
        router.join(a, "nowhere", "u1", "Alice").await;
        let (b, mut rx_b) = router.connect().await;
        router.join(b, "nowhere", "u2", "Bob").await;

        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(
            drain(&mut rx_a),
            vec![RoomEvent::UserJoined {
                id: "u2".into(),
                name: "Bob".into(),
                online: true
            }]
        );
    }

    #[tokio::test]
    async fn message_skips_sender_and_gets_server_timestamp() {
        let (router, _db) = setup();
        let (a, mut rx_a) = joined(&router, "u1", "Alice").await;
        let (_b, mut rx_b) = joined(&router, "u2", "Bob").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        router.relay(a, Relay::Message(chat("hi"))).await;

        assert!(drain(&mut rx_a).is_empty());
        let events = drain(&mut rx_b);
        assert_eq!(events.len(), 1);
        let RoomEvent::Message(msg) = &events[0] else {
            panic!("expected message, got {:?}", events[0]);
        };
        assert_eq!(msg.text, "hi");
        assert!(msg.timestamp.is_some());
    }

    #[tokio::test]
    async fn file_events_reach_sender_too() {
        let (router, _db) = setup();
        let (a, mut rx_a) = joined(&router, "u1", "Alice").await;
        let (_b, mut rx_b) = joined(&router, "u2", "Bob").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let file = FileRecord {
            id: "f1".into(),
            name: "notes.txt".into(),
            ext: "txt".into(),
            lines: 3,
            read: false,
            content_ref: "f1-notes.txt".into(),
        };
        router.relay(a, Relay::NewFile(file.clone())).await;
        router
            .relay(a, Relay::FileRead { file_name: "notes.txt".into() })
            .await;
        router
            .relay(a, Relay::FileDelete { file_name: "notes.txt".into() })
            .await;

        let expected = vec![
            RoomEvent::NewFile(file),
            RoomEvent::FileRead {
                file_name: "notes.txt".into(),
                user_id: "u1".into(),
            },
            RoomEvent::FileDelete {
                file_name: "notes.txt".into(),
                user_id: "u1".into(),
            },
        ];
        assert_eq!(drain(&mut rx_a), expected);
        assert_eq!(drain(&mut rx_b), expected);
    }

    #[tokio::test]
    async fn unjoined_connection_is_silently_dropped() {
        let (router, _db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;
        drain(&mut rx_a);

        let (stranger, mut rx_s) = router.connect().await;
        router.relay(stranger, Relay::Message(chat("hello?"))).await;
        router
            .relay(stranger, Relay::FileRead { file_name: "x".into() })
            .await;
        router.status_change(stranger, false).await;
        router.disconnect(stranger).await;
        router.disconnect(Uuid::new_v4()).await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_s).is_empty());
    }

    #[tokio::test]
    async fn status_change_goes_to_others_only() {
        let (router, _db) = setup();
        let (a, mut rx_a) = joined(&router, "u1", "Alice").await;
        let (_b, mut rx_b) = joined(&router, "u2", "Bob").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        router.status_change(a, false).await;

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![RoomEvent::UserStatus {
                user_id: "u1".into(),
                online: false
            }]
        );
        // advisory only
        assert!(router.is_online("abc123", "u1").await);
    }

    #[tokio::test]
    async fn disconnect_of_last_connection_reports_user_left() {
        let (router, _db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;
        let (b, mut rx_b) = joined(&router, "u2", "Bob").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        router.disconnect(b).await;

        assert_eq!(
            drain(&mut rx_a),
            vec![RoomEvent::UserLeft {
                user_id: "u2".into(),
                name: "Bob".into()
            }]
        );
        assert_eq!(
            router.roster("abc123").await.unwrap(),
            vec![entry("u1", "Alice", true), entry("u2", "Bob", false)]
        );
    }

    #[tokio::test]
    async fn disconnect_with_second_tab_open_keeps_user_online() {
        let (router, _db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;
        let (b1, _rx_b1) = joined(&router, "u2", "Bob").await;
        let (_b2, _rx_b2) = joined(&router, "u2", "Bob").await;
        drain(&mut rx_a);

        router.disconnect(b1).await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(router.is_online("abc123", "u2").await);
    }

    #[tokio::test]
    async fn identity_store_profile_image_wins_over_snapshot() {
        let (router, db) = setup();
        let (_a, _rx) = joined(&router, "u1", "Alice").await;
        db.set_profile_pic("u1", "fresh.png").unwrap();

        let roster = router.roster("abc123").await.unwrap();
        assert_eq!(roster[0].profile_pic_ref.as_deref(), Some("fresh.png"));
        assert_eq!(roster[0].name, "Alice");
    }

    #[tokio::test]
    async fn chat_history_does_not_survive_a_restart() {
        let (router, db) = setup();
        let (a, _rx_a) = joined(&router, "u1", "Alice").await;
        let (_b, _rx_b) = joined(&router, "u2", "Bob").await;
        router.relay(a, Relay::Message(chat("before restart"))).await;
        drop(router);

        let restarted = RoomRouter::new(db);
        let (c, mut rx_c) = restarted.connect().await;
        restarted.join(c, "abc123", "u3", "Carol").await;

        let events = drain(&mut rx_c);
        assert!(events.iter().all(|e| !matches!(e, RoomEvent::Message(_))));
        // everyone from before the restart shows as offline
        let Some(RoomEvent::RoomParticipants(roster)) = events.last() else {
            panic!("expected roster, got {:?}", events);
        };
        assert_eq!(
            roster,
            &vec![
                entry("u1", "Alice", false),
                entry("u2", "Bob", false),
                entry("u3", "Carol", true),
            ]
        );
    }

    #[tokio::test]
    async fn announce_reaches_every_connection() {
        let (router, _db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;
        let (_b, mut rx_b) = joined(&router, "u2", "Bob").await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let event = RoomEvent::FileDelete {
            file_name: "x".into(),
            user_id: "u1".into(),
        };
        assert_eq!(router.announce("abc123", event.clone()).await, 2);
        assert_eq!(drain(&mut rx_a), vec![event.clone()]);
        assert_eq!(drain(&mut rx_b), vec![event]);
    }

    #[tokio::test]
    async fn broadcast_skips_closed_outboxes() {
        let (router, _db) = setup();
        let (_a, rx_a) = joined(&router, "u1", "Alice").await;
        let (_b, mut rx_b) = joined(&router, "u2", "Bob").await;
        drain(&mut rx_b);
        drop(rx_a);

        let event = RoomEvent::UserStatus {
            user_id: "u9".into(),
            online: true,
        };
        assert_eq!(router.announce("abc123", event).await, 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
    }

    #[tokio::test]
    async fn roster_snapshot_comes_from_identity_store() {
        let (router, db) = setup();
        let (_a, _rx_a) = joined(&router, "u1", "Mallory").await;
        let (_g, _rx_g) = joined(&router, "ghost", "Ghost").await;

        let room = db.get_room("abc123").unwrap().unwrap();
        assert_eq!(room.participants.len(), 1);
        assert_eq!(room.participants[0].name, "Alice");
        assert_eq!(
            router.roster("abc123").await.unwrap(),
            vec![entry("u1", "Alice", true)]
        );
    }

    #[tokio::test]
    async fn join_after_disconnect_is_abandoned() {
        let (router, _db) = setup();
        let (_a, mut rx_a) = joined(&router, "u1", "Alice").await;
        drain(&mut rx_a);

        let (b, mut rx_b) = router.connect().await;
        router.disconnect(b).await;
        router.join(b, "abc123", "u2", "Bob").await;

        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert!(!router.is_online("abc123", "u2").await);
        assert!(router.inner.connections.read().await.presence.lookup(b).is_none());
    }

    #[tokio::test]
    async fn room_locks_are_forgotten_when_idle() {
        let (router, _db) = setup();
        for i in 0..1000 {
            let event = RoomEvent::UserStatus {
                user_id: "u1".into(),
                online: true,
            };
            assert_eq!(router.announce(&format!("room-{}", i), event).await, 0);
        }
        assert_eq!(lock_count(&router), 0);

        let (a, _rx_a) = joined(&router, "u1", "Alice").await;
        router.relay(a, Relay::Message(chat("hi"))).await;
        router.disconnect(a).await;
        assert_eq!(lock_count(&router), 0);
    }

    #[tokio::test]
    async fn events_follow_a_connection_that_moved_while_waiting() {
        let (router, db) = setup();
        db.create_room("def456", "owner", "Rust").unwrap();
        let (a, _rx_a) = joined(&router, "u1", "Alice").await;
        let (_b, mut rx_b) = joined(&router, "u2", "Bob").await;
        let (c, mut rx_c) = router.connect().await;
        router.join(c, "def456", "u3", "Carol").await;
        drain(&mut rx_b);

        let turn = router.enter_room("abc123").await;
        let relaying = {
            let router = router.clone();
            tokio::spawn(async move { router.relay(a, Relay::Message(chat("where am i"))).await })
        };
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        router.join(a, "def456", "u1", "Alice").await;
        drain(&mut rx_c);
        drop(turn);
        relaying.await.unwrap();

        assert!(drain(&mut rx_b).iter().all(|e| !matches!(e, RoomEvent::Message(_))));
        let events = drain(&mut rx_c);
        assert!(matches!(&events[..], [RoomEvent::Message(m)] if m.text == "where am i"));
    }
}
