//! WebSocket connection handler
//!
//! Bridges one client connection to a room: resolves the room during
//! the WebSocket handshake, admits the client after its identity frame,
//! then pumps inbound frames into the room and room messages back out.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::message::{ClientFrame, FrameType, Message};
use crate::registry::RoomRegistry;
use crate::room::Room;
use crate::session::ClientSession;
use crate::types::SessionId;

/// Query parameter naming the target room
const ROOM_ID_PARAM: &str = "roomId";

/// Queue depth for replies that bypass the room
const REPLY_BUFFER_SIZE: usize = 8;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake against `/ws?roomId=<id>`, rejecting
/// unknown rooms before upgrading, then runs the session.
pub async fn handle_connection(
    stream: TcpStream,
    registry: Arc<RoomRegistry>,
    identity_timeout: Duration,
) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    let mut target: Option<Room> = None;
    let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        match resolve_room(&registry, req) {
            Ok(room) => {
                target = Some(room);
                Ok(resp)
            }
            Err(e) => {
                warn!("Rejecting handshake from {}: {}", peer_addr, e);
                Err(error_response(&e))
            }
        }
    };

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let Some(room) = target else {
        return Err(AppError::MissingRoomId);
    };

    info!("Connection from {} bound to room {}", peer_addr, room.id());
    run_session(ws_stream, room, identity_timeout).await
}

/// Run an upgraded connection against a room
///
/// The first frame must carry a non-empty `sender`; anything else closes
/// the connection without touching the room. Once admitted, the session
/// is unregistered exactly once however the connection ends.
pub async fn run_session<S>(
    ws_stream: WebSocketStream<S>,
    room: Room,
    identity_timeout: Duration,
) -> Result<(), AppError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let name = match tokio::time::timeout(identity_timeout, read_identity(&mut ws_receiver)).await
    {
        Ok(Ok(name)) => name,
        Ok(Err(e)) => {
            warn!("Admission to room {} refused: {}", room.id(), e);
            let _ = ws_sender.close().await;
            return Err(e);
        }
        Err(_) => {
            warn!("Admission to room {} timed out", room.id());
            let _ = ws_sender.close().await;
            return Err(AppError::IdentityTimeout);
        }
    };

    let (session, outbound) = ClientSession::channel(name.clone());
    let session_id = session.id;
    if let Err(e) = room.register(session).await {
        let _ = ws_sender.close().await;
        return Err(e);
    }
    let mut guard = SessionGuard::new(room.clone(), session_id);
    info!("Session {} ({}) admitted to room {}", session_id, name, room.id());

    let (reply_tx, reply_rx) = mpsc::channel(REPLY_BUFFER_SIZE);

    // Room -> WebSocket
    let mut write_task = tokio::spawn(write_loop(ws_sender, outbound, reply_rx));
    guard.track(write_task.abort_handle());

    // WebSocket -> Room
    let mut read_task = tokio::spawn(read_loop(ws_receiver, room.clone(), name, reply_tx));
    guard.track(read_task.abort_handle());

    // Wait for either task to complete
    tokio::select! {
        result = &mut read_task => {
            if let Err(e) = result {
                error!("Read task for {} failed: {}", session_id, e);
            }
            debug!("Read task completed for {}", session_id);
        }
        result = &mut write_task => {
            if let Err(e) = result {
                error!("Write task for {} failed: {}", session_id, e);
            }
            debug!("Write task completed for {}", session_id);
        }
    }

    guard.release().await;
    info!("Session {} disconnected from room {}", session_id, room.id());

    Ok(())
}

/// Read frames until the first text frame and take its sender as the display name
async fn read_identity<S>(ws_receiver: &mut SplitStream<WebSocketStream<S>>) -> Result<String, AppError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let Some(msg) = ws_receiver.next().await else {
            return Err(AppError::InvalidIdentity("connection closed".to_string()));
        };
        match msg? {
            WsMessage::Text(text) => return parse_identity(&text),
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
            WsMessage::Close(_) => {
                return Err(AppError::InvalidIdentity("connection closed".to_string()))
            }
            _ => return Err(AppError::InvalidIdentity("expected a text frame".to_string())),
        }
    }
}

fn parse_identity(text: &str) -> Result<String, AppError> {
    let frame = ClientFrame::parse(text).map_err(|e| AppError::InvalidIdentity(e.to_string()))?;
    let name = frame.sender.trim();
    if name.is_empty() {
        return Err(AppError::InvalidIdentity("missing sender".to_string()));
    }
    Ok(name.to_string())
}

async fn read_loop<S>(
    mut ws_receiver: SplitStream<WebSocketStream<S>>,
    room: Room,
    name: String,
    replies: mpsc::Sender<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(WsMessage::Text(text)) => match ClientFrame::parse(&text) {
                Ok(frame) => {
                    if let Err(e) = submit_frame(&room, &name, &replies, frame).await {
                        debug!("Ending read task for {}: {}", name, e);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Invalid frame from {}: {}", name, e);
                }
            },
            Ok(WsMessage::Close(_)) => {
                debug!("Session {} sent close frame", name);
                break;
            }
            Ok(_) => {
                // Ping/pong are answered by tungstenite; binary is ignored
            }
            Err(e) => {
                warn!("WebSocket error for {}: {}", name, e);
                break;
            }
        }
    }
    debug!("Read task ended for {}", name);
}

/// Translate one inbound frame into a room operation
///
/// Member-list refreshes are answered from the room's published snapshot
/// straight to this connection's writer, outside the room's queue.
async fn submit_frame(
    room: &Room,
    name: &str,
    replies: &mpsc::Sender<Message>,
    frame: ClientFrame,
) -> Result<(), AppError> {
    match frame.kind {
        FrameType::RefreshUserList => replies
            .send(Message::user_list(room.member_snapshot()))
            .await
            .map_err(|_| AppError::RoomClosed),
        _ => room.broadcast(Message::chat(name, frame.content)).await,
    }
}

async fn write_loop<S>(
    mut ws_sender: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outbound: mpsc::Receiver<Message>,
    mut replies: mpsc::Receiver<Message>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Ends when the room drops the session, closing `outbound`
    loop {
        let msg = tokio::select! {
            msg = outbound.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            Some(msg) = replies.recv() => msg,
        };
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                    debug!("WebSocket send failed, ending write task");
                    break;
                }
            }
            Err(e) => {
                error!("Failed to serialize message: {}", e);
            }
        }
    }
    debug!("Write task ended");

    // Send close frame when done
    let _ = ws_sender.close().await;
}

/// Unregisters its session when released or dropped, whichever comes first
///
/// Also owns the connection's read and write tasks: they are aborted on
/// release and on drop, so nothing submits to the room once the session
/// has ended.
struct SessionGuard {
    room: Room,
    session_id: SessionId,
    tasks: Vec<AbortHandle>,
    armed: bool,
}

impl SessionGuard {
    fn new(room: Room, session_id: SessionId) -> Self {
        Self {
            room,
            session_id,
            tasks: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, task: AbortHandle) {
        self.tasks.push(task);
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    async fn release(mut self) {
        self.abort_tasks();
        let result = self.room.unregister(self.session_id).await;
        self.armed = false;
        if let Err(e) = result {
            debug!("Unregister of {} skipped: {}", self.session_id, e);
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.abort_tasks();
        if !self.armed {
            return;
        }
        let room = self.room.clone();
        let session_id = self.session_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let _ = room.unregister(session_id).await;
                });
            }
            Err(_) => warn!("No runtime to unregister session {}", session_id),
        }
    }
}

fn resolve_room(registry: &RoomRegistry, req: &Request) -> Result<Room, AppError> {
    let room_id = room_id_from_query(req.uri().query()).ok_or(AppError::MissingRoomId)?;
    registry.lookup_str(room_id)
}

fn room_id_from_query(query: Option<&str>) -> Option<&str> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == ROOM_ID_PARAM)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty())
}

fn error_response(err: &AppError) -> ErrorResponse {
    let status = match err {
        AppError::MissingRoomId => StatusCode::BAD_REQUEST,
        AppError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut response = ErrorResponse::new(Some(err.to_string()));
    *response.status_mut() = status;
    response
}
