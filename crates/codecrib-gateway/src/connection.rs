use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use codecrib_types::events::ClientCommand;

use crate::presence::ConnectionId;
use crate::router::{Relay, RoomRouter};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one WebSocket for its whole life: forward routed events out, feed
/// client commands in, and disconnect from the router when either side ends.
///
/// `user_id` is the identity verified at upgrade time; joins claiming any
/// other user are dropped.
pub async fn handle_connection(socket: WebSocket, router: RoomRouter, user_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (conn_id, mut outbox) = router.connect().await;
    info!("Connection {} opened for user {}", conn_id, user_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Routed events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbox.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode event for {}: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout on {} (missed {} pongs), dropping connection", conn_id, missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let (command_tx, dispatch_task) = spawn_dispatcher(router.clone(), conn_id, user_id);

    // Client frames -> command queue
    let mut recv_task = tokio::spawn(read_frames(receiver, conn_id, command_tx, pong_flag_recv));

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
    // presence must be settled before the disconnect reads it
    dispatch_task.abort();
    let _ = dispatch_task.await;

    router.disconnect(conn_id).await;
    info!("Connection {} closed", conn_id);
}

/// Commands are handled in arrival order on their own task, so a join
/// waiting on a busy room never holds up Pong handling.
fn spawn_dispatcher(
    router: RoomRouter,
    conn_id: ConnectionId,
    user_id: String,
) -> (mpsc::UnboundedSender<ClientCommand>, JoinHandle<()>) {
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<ClientCommand>();
    let task = tokio::spawn(async move {
        while let Some(cmd) = command_rx.recv().await {
            dispatch(&router, conn_id, &user_id, cmd).await;
        }
    });
    (command_tx, task)
}

/// Parse client frames into the command queue and record Pongs. Returns
/// on Close, on a read error, or once the dispatcher is gone.
async fn read_frames<S>(
    mut receiver: S,
    conn_id: ConnectionId,
    commands: mpsc::UnboundedSender<ClientCommand>,
    pong_received: Arc<AtomicBool>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                Ok(cmd) => {
                    if commands.send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        "{} bad command: {} -- raw: {}",
                        conn_id,
                        e,
                        truncate(text.as_str(), 200)
                    );
                }
            },
            Message::Pong(_) => {
                pong_received.store(true, Ordering::Release);
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
}

/// Route one parsed client command for a connection authenticated as
/// `verified_user`.
pub async fn dispatch(router: &RoomRouter, conn_id: ConnectionId, verified_user: &str, cmd: ClientCommand) {
    match cmd {
        ClientCommand::Join {
            room_id,
            user_id,
            user_name,
        } => {
            let claimed = user_id.as_deref().unwrap_or_default();
            if !claimed.is_empty() && claimed != verified_user {
                warn!(
                    "Connection {} of user {} tried to join room {} as {}",
                    conn_id, verified_user, room_id, claimed
                );
                return;
            }
            router
                .join(
                    conn_id,
                    &room_id,
                    claimed,
                    user_name.as_deref().unwrap_or_default(),
                )
                .await;
        }
        ClientCommand::Message(msg) => router.relay(conn_id, Relay::Message(msg)).await,
        ClientCommand::NewFile(file) => router.relay(conn_id, Relay::NewFile(file)).await,
        ClientCommand::FileRead { file_name } => {
            router.relay(conn_id, Relay::FileRead { file_name }).await;
        }
        ClientCommand::FileDelete { file_name } => {
            router.relay(conn_id, Relay::FileDelete { file_name }).await;
        }
        ClientCommand::StatusChange { online } => router.status_change(conn_id, online).await,
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecrib_db::Database;
    use codecrib_types::events::RoomEvent;

    fn setup() -> RoomRouter {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());
        db.create_room("abc123", "owner", "Rust").unwrap();
        db.create_user("u1", "Alice", "alice@example.com", "hash").unwrap();
        db.create_user("u2", "Bob", "bob@example.com", "hash").unwrap();
        RoomRouter::new(db)
    }

    async fn send(router: &RoomRouter, conn: ConnectionId, user: &str, raw: &str) {
        let cmd: ClientCommand = serde_json::from_str(raw).unwrap();
        dispatch(router, conn, user, cmd).await;
    }

    #[tokio::test]
    async fn dispatch_routes_wire_commands() {
        let router = setup();

        let (a, mut rx_a) = router.connect().await;
        let (b, mut rx_b) = router.connect().await;
        for (conn, user, raw) in [
            (a, "u1", r#"{"type":"join","data":{"roomId":"abc123","userId":"u1","userName":"Alice"}}"#),
            (b, "u2", r#"{"type":"join","data":{"roomId":"abc123","userId":"u2","userName":"Bob"}}"#),
            (b, "u2", r#"{"type":"statusChange","data":{"online":false}}"#),
        ] {
            send(&router, conn, user, raw).await;
        }

        let mut last = None;
        while let Ok(event) = rx_a.try_recv() {
            last = Some(event);
        }
        assert_eq!(
            last,
            Some(RoomEvent::UserStatus {
                user_id: "u2".into(),
                online: false
            })
        );
        while let Ok(event) = rx_b.try_recv() {
            assert!(!matches!(event, RoomEvent::UserStatus { .. }));
        }
    }

    #[tokio::test]
    async fn join_as_someone_else_is_dropped() {
        let router = setup();
        let (a, mut rx_a) = router.connect().await;
        send(
            &router,
            a,
            "u2",
            r#"{"type":"join","data":{"roomId":"abc123","userId":"u1","userName":"Mallory"}}"#,
        )
        .await;

        assert!(rx_a.try_recv().is_err());
        assert!(!router.is_online("abc123", "u1").await);
        assert!(!router.is_online("abc123", "u2").await);
    }

    #[tokio::test]
    async fn pongs_are_recorded_while_a_join_waits_on_its_room() {
        let router = setup();
        let (conn, _rx) = router.connect().await;
        let busy = router.enter_room("abc123").await;

        let (commands, dispatcher) = spawn_dispatcher(router.clone(), conn, "u1".into());
        let frames = futures_util::stream::iter(vec![
            Ok::<_, axum::Error>(Message::Text(
                r#"{"type":"join","data":{"roomId":"abc123","userId":"u1","userName":"Alice"}}"#.into(),
            )),
            Ok(Message::Pong(Bytes::new())),
        ]);
        let pong = Arc::new(AtomicBool::new(false));
        read_frames(frames, conn, commands, pong.clone()).await;

        assert!(pong.load(Ordering::Acquire));
        assert!(!router.is_online("abc123", "u1").await);

        drop(busy);
        dispatcher.await.unwrap();
        assert!(router.is_online("abc123", "u1").await);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("hi", 200), "hi");
    }
}
