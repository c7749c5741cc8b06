//! Room actor implementation
//!
//! Each room is a worker task that owns the member sessions and the
//! message history, draining a FIFO command queue one command at a
//! time. [`Room`] is the cheap, cloneable handle used to submit
//! commands; all state access goes through message passing, so every
//! register/unregister/broadcast on a room is observed in one total
//! order while different rooms run independently.
//!
//! Member-list requests do not join that order: the worker publishes
//! the display names over a `watch` channel after every membership
//! change, and [`Room::member_snapshot`] reads the latest value without
//! queueing behind a slow fan-out.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::RoomConfig;
use crate::error::{AppError, SendError};
use crate::history::History;
use crate::message::Message;
use crate::session::ClientSession;
use crate::types::{RoomId, SessionId};

/// Point-in-time description of a room
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub id: RoomId,
    pub name: String,
    pub description: String,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub member_count: usize,
}

/// Commands processed by a room worker
#[derive(Debug)]
pub enum RoomCommand {
    /// Admit a session
    Register { session: ClientSession },
    /// Remove a session
    Unregister { session_id: SessionId },
    /// Record and deliver a message to every member
    Broadcast { message: Message },
    /// Snapshot room info
    Info { reply: oneshot::Sender<RoomInfo> },
    /// Snapshot member display names
    Members { reply: oneshot::Sender<Vec<String>> },
    /// Snapshot retained history
    History { reply: oneshot::Sender<Vec<Message>> },
}

/// Immutable room metadata shared by handle and worker
#[derive(Debug)]
struct RoomMeta {
    id: RoomId,
    name: String,
    description: String,
    creator_id: String,
    created_at: DateTime<Utc>,
}

/// Handle to a running room
#[derive(Debug, Clone)]
pub struct Room {
    meta: Arc<RoomMeta>,
    commands: mpsc::Sender<RoomCommand>,
    directory: watch::Receiver<Vec<String>>,
}

impl Room {
    /// Create a room and start its worker on the current runtime
    pub fn spawn(
        name: impl Into<String>,
        description: impl Into<String>,
        creator_id: impl Into<String>,
        config: &RoomConfig,
    ) -> Self {
        let meta = Arc::new(RoomMeta {
            id: RoomId::new(),
            name: name.into(),
            description: description.into(),
            creator_id: creator_id.into(),
            created_at: Utc::now(),
        });
        let (commands, receiver) = mpsc::channel(config.command_buffer.max(1));
        let (publisher, directory) = watch::channel(Vec::new());
        let worker = RoomWorker {
            meta: Arc::clone(&meta),
            sessions: Vec::new(),
            history: History::new(config.history_limit),
            send_timeout: config.send_timeout,
            receiver,
            directory: publisher,
        };
        tokio::spawn(worker.run());

        Self {
            meta,
            commands,
            directory,
        }
    }

    pub fn id(&self) -> RoomId {
        self.meta.id
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn creator_id(&self) -> &str {
        &self.meta.creator_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.meta.created_at
    }

    /// Admit a session; it receives the join notice and then the member list
    pub async fn register(&self, session: ClientSession) -> Result<(), AppError> {
        self.submit(RoomCommand::Register { session }).await
    }

    /// Remove a session; unknown ids are ignored
    pub async fn unregister(&self, session_id: SessionId) -> Result<(), AppError> {
        self.submit(RoomCommand::Unregister { session_id }).await
    }

    /// Record and fan out a message; the room assigns its timestamp
    pub async fn broadcast(&self, message: Message) -> Result<(), AppError> {
        self.submit(RoomCommand::Broadcast { message }).await
    }

    /// Latest published member names, without waiting on the command queue
    pub fn member_snapshot(&self) -> Vec<String> {
        self.directory.borrow().clone()
    }

    pub async fn info(&self) -> Result<RoomInfo, AppError> {
        self.query(|reply| RoomCommand::Info { reply }).await
    }

    /// Member display names in join order
    pub async fn members(&self) -> Result<Vec<String>, AppError> {
        self.query(|reply| RoomCommand::Members { reply }).await
    }

    /// Retained messages, oldest first
    pub async fn history(&self) -> Result<Vec<Message>, AppError> {
        self.query(|reply| RoomCommand::History { reply }).await
    }

    async fn submit(&self, cmd: RoomCommand) -> Result<(), AppError> {
        self.commands
            .send(cmd)
            .await
            .map_err(|_| AppError::RoomClosed)
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T, AppError> {
        let (reply, response) = oneshot::channel();
        self.submit(make(reply)).await?;
        response.await.map_err(|_| AppError::RoomClosed)
    }
}

/// The room worker
///
/// Sessions are kept in join order so member lists read naturally.
struct RoomWorker {
    meta: Arc<RoomMeta>,
    sessions: Vec<ClientSession>,
    history: History,
    send_timeout: Duration,
    receiver: mpsc::Receiver<RoomCommand>,
    directory: watch::Sender<Vec<String>>,
}

impl RoomWorker {
    /// Run the room event loop
    ///
    /// Continuously receives and processes commands until all handles are
    /// dropped. A panic inside one command is logged and the loop moves on.
    async fn run(mut self) {
        info!("Room {} ({}) started", self.meta.id, self.meta.name);

        while let Some(cmd) = self.receiver.recv().await {
            if AssertUnwindSafe(self.handle_command(cmd))
                .catch_unwind()
                .await
                .is_err()
            {
                error!("Room {} command panicked, continuing", self.meta.id);
            }
        }

        info!("Room {} shutting down", self.meta.id);
    }

    /// Process a single command
    async fn handle_command(&mut self, cmd: RoomCommand) {
        match cmd {
            RoomCommand::Register { session } => self.handle_register(session).await,
            RoomCommand::Unregister { session_id } => self.handle_unregister(session_id).await,
            RoomCommand::Broadcast { message } => {
                self.fan_out(message.stamped(Utc::now())).await;
            }
            RoomCommand::Info { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::Members { reply } => {
                let _ = reply.send(self.member_names());
            }
            RoomCommand::History { reply } => {
                let _ = reply.send(self.history.snapshot());
            }
        }
    }

    async fn handle_register(&mut self, session: ClientSession) {
        if self.position(session.id).is_some() {
            debug!("Session {} already in room {}", session.id, self.meta.id);
            return;
        }

        let session_id = session.id;
        let name = session.name.clone();
        self.sessions.push(session);
        self.publish_members();
        info!(
            "Session {} ({}) joined room {}, members: {}",
            session_id,
            name,
            self.meta.id,
            self.sessions.len()
        );

        self.fan_out(Message::joined(name)).await;
        // Stored history is deliberately not replayed to newcomers.
        self.send_user_list(session_id).await;
    }

    async fn handle_unregister(&mut self, session_id: SessionId) {
        let Some(pos) = self.position(session_id) else {
            debug!("Session {} not in room {}, nothing to remove", session_id, self.meta.id);
            return;
        };

        let session = self.sessions.remove(pos);
        self.publish_members();
        info!(
            "Session {} ({}) left room {}, members: {}",
            session.id,
            session.name,
            self.meta.id,
            self.sessions.len()
        );
        self.fan_out(Message::left(session.name)).await;
    }

    /// Append to history, then deliver to every member concurrently
    ///
    /// Members whose delivery fails are removed; the rest still receive it.
    async fn fan_out(&mut self, message: Message) {
        self.history.push(message.clone());

        let timeout = self.send_timeout;
        let deliveries = self.sessions.iter().map(|session| {
            let msg = message.clone();
            async move { (session.id, session.send(msg, timeout).await) }
        });
        let failed: Vec<(SessionId, SendError)> = join_all(deliveries)
            .await
            .into_iter()
            .filter_map(|(id, result)| result.err().map(|e| (id, e)))
            .collect();

        for (session_id, err) in failed {
            self.drop_session(session_id, &err);
        }
    }

    async fn send_user_list(&mut self, session_id: SessionId) {
        let Some(pos) = self.position(session_id) else {
            return;
        };
        let msg = Message::user_list(self.member_names());
        if let Err(err) = self.sessions[pos].send(msg, self.send_timeout).await {
            self.drop_session(session_id, &err);
        }
    }

    /// Remove a session after a failed delivery, closing its transport
    fn drop_session(&mut self, session_id: SessionId, err: &SendError) {
        if let Some(pos) = self.position(session_id) {
            let session = self.sessions.remove(pos);
            self.publish_members();
            warn!(
                "Delivery to session {} ({}) in room {} failed: {}; removed",
                session.id, session.name, self.meta.id, err
            );
        }
    }

    fn position(&self, session_id: SessionId) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == session_id)
    }

    fn publish_members(&self) {
        self.directory.send_replace(self.member_names());
    }

    fn member_names(&self) -> Vec<String> {
        self.sessions.iter().map(|s| s.name.clone()).collect()
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            id: self.meta.id,
            name: self.meta.name.clone(),
            description: self.meta.description.clone(),
            creator_id: self.meta.creator_id.clone(),
            created_at: self.meta.created_at,
            member_count: self.sessions.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::FrameType;

    fn test_config(history_limit: usize) -> RoomConfig {
        RoomConfig {
            history_limit,
            send_timeout: Duration::from_millis(50),
            command_buffer: 64,
        }
    }

    fn spawn_room() -> Room {
        Room::spawn("General", "General chat", "alice", &test_config(100))
    }

    fn kinds(history: &[Message]) -> Vec<FrameType> {
        history.iter().map(Message::kind).collect()
    }

    /// Drain everything currently queued for a session
    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_room_info() {
        let room = spawn_room();
        let info = room.info().await.unwrap();
        assert_eq!(info.id, room.id());
        assert_eq!(info.name, "General");
        assert_eq!(info.description, "General chat");
        assert_eq!(info.creator_id, "alice");
        assert_eq!(info.member_count, 0);
    }

    #[tokio::test]
    async fn test_register_sends_join_then_user_list() {
        let room = spawn_room();
        let (a, mut rx_a) = ClientSession::channel("A");
        room.register(a).await.unwrap();

        // Sync point: queries are ordered after the register
        assert_eq!(room.members().await.unwrap(), vec!["A"]);

        let received = drain(&mut rx_a);
        assert_eq!(kinds(&received), vec![FrameType::UserJoined, FrameType::UserList]);
        assert_eq!(received[1].content(), r#"["A"]"#);
    }

    #[tokio::test]
    async fn test_scenario_two_members() {
        let room = spawn_room();
        let (a, mut rx_a) = ClientSession::channel("A");
        let (b, mut rx_b) = ClientSession::channel("B");
        let b_id = b.id;

        room.register(a).await.unwrap();
        room.register(b).await.unwrap();
        assert_eq!(room.members().await.unwrap(), vec!["A", "B"]);
        assert_eq!(room.member_snapshot(), vec!["A", "B"]);

        let history = room.history().await.unwrap();
        let contents: Vec<String> = history.iter().map(Message::content).collect();
        assert_eq!(contents, vec!["A has joined the chat", "B has joined the chat"]);

        drain(&mut rx_a);
        let to_b = drain(&mut rx_b);
        assert_eq!(to_b.last().unwrap().content(), r#"["A","B"]"#);

        room.broadcast(Message::chat("A", "hi")).await.unwrap();
        room.unregister(b_id).await.unwrap();
        assert_eq!(room.members().await.unwrap(), vec!["A"]);
        assert_eq!(room.member_snapshot(), vec!["A"]);

        let to_a = drain(&mut rx_a);
        assert_eq!(kinds(&to_a), vec![FrameType::Chat, FrameType::UserLeft]);
        assert_eq!(to_a[0].sender(), "A");
        assert_eq!(to_a[0].content(), "hi");

        let to_b = drain(&mut rx_b);
        assert_eq!(kinds(&to_b), vec![FrameType::Chat]);

        let history = room.history().await.unwrap();
        assert_eq!(history.last().unwrap().content(), "B has left the chat");
        assert_eq!(history.len(), 4);
    }

    #[tokio::test]
    async fn test_register_then_unregister_pairs_messages() {
        let room = spawn_room();
        let (a, mut rx_a) = ClientSession::channel("A");
        let a_id = a.id;
        room.register(a).await.unwrap();
        room.unregister(a_id).await.unwrap();
        room.broadcast(Message::chat("X", "after")).await.unwrap();

        let history = room.history().await.unwrap();
        assert_eq!(
            kinds(&history),
            vec![FrameType::UserJoined, FrameType::UserLeft, FrameType::Chat]
        );

        // Channel is closed once the room drops the session
        let mut received = Vec::new();
        while let Some(msg) = rx_a.recv().await {
            received.push(msg);
        }
        assert!(received.iter().all(|m| m.content() != "after"));
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let room = spawn_room();
        room.unregister(SessionId::new()).await.unwrap();
        assert!(room.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_bounded() {
        let room = Room::spawn("R", "", "c", &test_config(5));
        for i in 0..12 {
            room.broadcast(Message::chat("A", i.to_string())).await.unwrap();
        }
        let contents: Vec<String> = room
            .history()
            .await
            .unwrap()
            .iter()
            .map(Message::content)
            .collect();
        assert_eq!(contents, vec!["7", "8", "9", "10", "11"]);
    }

    #[tokio::test]
    async fn test_broadcast_restamps_timestamp() {
        let room = spawn_room();
        let forged = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        room.broadcast(Message::chat("A", "hi").stamped(forged))
            .await
            .unwrap();
        let history = room.history().await.unwrap();
        assert!(history[0].timestamp() > forged);
    }

    #[tokio::test]
    async fn test_failed_delivery_removes_only_that_session() {
        let room = spawn_room();
        let (a, mut rx_a) = ClientSession::channel("A");
        let (b, rx_b) = ClientSession::channel("B");
        let (c, mut rx_c) = ClientSession::channel("C");
        room.register(a).await.unwrap();
        room.register(b).await.unwrap();
        room.register(c).await.unwrap();
        assert_eq!(room.members().await.unwrap().len(), 3);

        drop(rx_b);
        room.broadcast(Message::chat("A", "first")).await.unwrap();
        assert_eq!(room.members().await.unwrap(), vec!["A", "C"]);

        drain(&mut rx_a);
        drain(&mut rx_c);
        room.broadcast(Message::chat("A", "second")).await.unwrap();
        room.members().await.unwrap();

        for rx in [&mut rx_a, &mut rx_c] {
            let received = drain(rx);
            assert_eq!(received.len(), 1);
            assert_eq!(received[0].content(), "second");
        }
    }

    #[tokio::test]
    async fn test_stalled_session_evicted_by_broadcast() {
        let room = spawn_room();
        // Room for the join notice and member list, nothing more
        let (stalled, _rx_stalled) = ClientSession::with_buffer("Slow", 2);
        let (fast, mut rx_fast) = ClientSession::channel("Fast");
        room.register(fast).await.unwrap();
        room.register(stalled).await.unwrap();
        assert_eq!(room.members().await.unwrap(), vec!["Fast", "Slow"]);
        drain(&mut rx_fast);

        room.broadcast(Message::chat("Fast", "ping")).await.unwrap();

        assert_eq!(room.members().await.unwrap(), vec!["Fast"]);
        assert_eq!(room.member_snapshot(), vec!["Fast"]);
        let received = drain(&mut rx_fast);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].content(), "ping");
        assert_eq!(room.history().await.unwrap().last().unwrap().content(), "ping");
    }

    #[tokio::test]
    async fn test_member_snapshot_not_blocked_by_stalled_fan_out() {
        let config = RoomConfig {
            send_timeout: Duration::from_secs(2),
            ..test_config(100)
        };
        let room = Room::spawn("R", "", "c", &config);
        let (fast, _rx_fast) = ClientSession::channel("Fast");
        let (stalled, _rx_stalled) = ClientSession::with_buffer("Slow", 2);
        room.register(fast).await.unwrap();
        room.register(stalled).await.unwrap();
        room.members().await.unwrap();

        room.broadcast(Message::chat("Fast", "ping")).await.unwrap();

        // Queued reads wait behind the stalled delivery...
        let queued = tokio::time::timeout(Duration::from_millis(50), room.members()).await;
        assert!(queued.is_err());
        // ...the published member list does not
        assert_eq!(room.member_snapshot(), vec!["Fast", "Slow"]);
        assert_eq!(room.history().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_register_ignored() {
        let room = spawn_room();
        let (a, _rx_a) = ClientSession::channel("A");
        let a_id = a.id;
        room.register(a).await.unwrap();

        let (mut dup, _rx_dup) = ClientSession::channel("A again");
        dup.id = a_id;
        room.register(dup).await.unwrap();

        assert_eq!(room.members().await.unwrap(), vec!["A"]);
        assert_eq!(room.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_operations_serialize() {
        let room = spawn_room();
        let mut tasks = Vec::new();
        for i in 0..10 {
            let room = room.clone();
            tasks.push(tokio::spawn(async move {
                let name = format!("user{}", i);
                let (session, mut rx) = ClientSession::channel(name.clone());
                let id = session.id;
                room.register(session).await.unwrap();
                room.broadcast(Message::chat(name.clone(), "hello")).await.unwrap();
                room.unregister(id).await.unwrap();
                // Keep the receiver alive until the room closes it
                while rx.recv().await.is_some() {}
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let history = room.history().await.unwrap();
        assert_eq!(history.len(), 30);
        assert_eq!(room.members().await.unwrap().len(), 0);

        // Per user: joined < chat < left in the single room order
        for i in 0..10 {
            let name = format!("user{}", i);
            let joined = history
                .iter()
                .position(|m| m.content() == format!("{} has joined the chat", name))
                .unwrap();
            let chat = history
                .iter()
                .position(|m| m.kind() == FrameType::Chat && m.sender() == name)
                .unwrap();
            let left = history
                .iter()
                .position(|m| m.content() == format!("{} has left the chat", name))
                .unwrap();
            assert!(joined < chat && chat < left);
        }

        // Timestamps follow the room's order
        assert!(history.windows(2).all(|w| w[0].timestamp() <= w[1].timestamp()));
    }
}
