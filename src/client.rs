//! Client session state and outbound handle
//!
//! [`ClientHandle`] is the address other actors hold for a connected client:
//! identity, display name and the sending side of the outbound queue.
//! [`Session`] owns the per-connection state machine (in a lobby or not) and
//! dispatches decoded inbound frames to the lobby and server actors.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::AppError;
use crate::lobby::{LobbyCommand, LobbyHandle};
use crate::message::{Action, Inbound, Response, Status};
use crate::server::ServerCommand;
use crate::types::{ClientId, LobbyId};

/// Address of a connected client
///
/// Cloned into the server registry and lobby member sets. Holding a handle
/// confers no ownership of the connection; once the session disconnects and
/// the registries drop their clones, the outbound queue closes and the
/// write loop ends.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Unique identifier for this client
    pub id: ClientId,
    /// Display name taken from the upgrade request
    pub name: String,
    /// Sending side of the outbound payload queue
    sender: mpsc::Sender<String>,
}

impl ClientHandle {
    /// Create a new handle over the given outbound queue
    pub fn new(id: ClientId, name: String, sender: mpsc::Sender<String>) -> Self {
        Self { id, name, sender }
    }

    /// Enqueue a serialized payload without blocking
    ///
    /// A single non-blocking attempt per payload: if the queue is saturated
    /// the payload is dropped and logged. Delivery into a client's queue must
    /// never suspend a lobby or server control loop, since that loop may in
    /// turn be what the client's own read loop is waiting on.
    pub fn enqueue(&self, payload: String) {
        match self.sender.try_send(payload) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound queue of client {} full, dropping payload", self.id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("outbound queue of client {} closed", self.id);
            }
        }
    }

    /// Serialize and enqueue a response
    pub fn enqueue_response(&self, response: &Response) {
        match response.encode() {
            Ok(json) => self.enqueue(json),
            Err(e) => error!("failed to serialize response: {}", e),
        }
    }
}

/// Per-connection command dispatcher
///
/// Owned by the read loop. The lobby back-reference is a weak address:
/// sending to a lobby that already closed fails cleanly, and every failure
/// path clears the reference so the session falls back to the no-lobby state.
pub struct Session {
    handle: ClientHandle,
    server: mpsc::Sender<ServerCommand>,
    lobby: Option<LobbyHandle>,
}

impl Session {
    /// Create a session for a freshly registered client
    pub fn new(handle: ClientHandle, server: mpsc::Sender<ServerCommand>) -> Self {
        Self {
            handle,
            server,
            lobby: None,
        }
    }

    /// This client's identifier
    pub fn id(&self) -> ClientId {
        self.handle.id
    }

    /// Identifier of the lobby this session currently belongs to
    pub fn current_lobby(&self) -> Option<LobbyId> {
        self.lobby.as_ref().map(|l| l.id)
    }

    /// Decode one inbound text frame and dispatch it
    ///
    /// Malformed payloads and unknown actions are logged and dropped; neither
    /// terminates the connection.
    pub async fn handle_frame(&mut self, text: &str) {
        let inbound: Inbound = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                error!("invalid message payload from {}: {} ({})", self.handle.id, e, text);
                return;
            }
        };

        match Action::parse(&inbound.action) {
            Some(Action::SendMessage) => self.handle_send_message(inbound.content).await,
            Some(Action::CreateLobby) => self.handle_create_lobby().await,
            Some(Action::JoinLobby) => self.handle_join_lobby(&inbound.content).await,
            Some(Action::LeaveLobby) => self.handle_leave_lobby().await,
            None => warn!("unknown message action '{}'", inbound.action),
        }
    }

    /// Forward a chat message to the current lobby
    ///
    /// Silently ignored when the session is not in a lobby.
    async fn handle_send_message(&mut self, content: String) {
        let Some(lobby) = self.lobby.clone() else {
            return;
        };

        let cmd = LobbyCommand::Broadcast {
            sender: self.handle.id,
            content,
        };
        if lobby.sender.send(cmd).await.is_err() {
            debug!("lobby {} is gone, clearing membership of {}", lobby.id, self.handle.id);
            self.lobby = None;
        }
    }

    /// Ask the server for a new lobby and become its first member
    async fn handle_create_lobby(&mut self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = ServerCommand::CreateLobby {
            respond_to: reply_tx,
        };
        if self.server.send(cmd).await.is_err() {
            debug!("server actor gone, dropping create-lobby from {}", self.handle.id);
            return;
        }
        let Ok(lobby) = reply_rx.await else {
            return;
        };

        self.handle
            .enqueue_response(&Response::new(Status::LobbyCreated, lobby.id.to_string()));
        self.lobby = Some(lobby.clone());
        self.register_with(lobby).await;
    }

    /// Resolve a lobby id through the server directory and register with it
    async fn handle_join_lobby(&mut self, content: &str) {
        if let Some(lobby) = &self.lobby {
            info!("client {} is already in lobby {}", self.handle.id, lobby.id);
            self.handle
                .enqueue_response(&Response::rejection(lobby.id.to_string(), &AppError::AlreadyInLobby));
            return;
        }

        let Ok(lobby_id) = content.parse::<LobbyId>() else {
            error!("lobby id is not valid: '{}'", content);
            self.handle
                .enqueue_response(&Response::rejection(content, &AppError::InvalidLobbyId));
            return;
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let cmd = ServerCommand::LookupLobby {
            lobby_id,
            respond_to: reply_tx,
        };
        if self.server.send(cmd).await.is_err() {
            debug!("server actor gone, dropping join-lobby from {}", self.handle.id);
            return;
        }

        match reply_rx.await {
            Ok(Some(lobby)) => {
                self.lobby = Some(lobby.clone());
                self.register_with(lobby).await;
            }
            Ok(None) | Err(_) => {
                info!("lobby not found: {}", lobby_id);
                self.handle
                    .enqueue_response(&Response::rejection(lobby_id.to_string(), &AppError::LobbyNotFound));
            }
        }
    }

    /// Deregister from the current lobby, if any
    async fn handle_leave_lobby(&mut self) {
        let Some(lobby) = self.lobby.take() else {
            return;
        };

        let cmd = LobbyCommand::Deregister {
            client_id: self.handle.id,
        };
        let _ = lobby.sender.send(cmd).await;
    }

    /// Send a registration request and wait for the lobby's acknowledgment
    ///
    /// On rejection (full) or a lobby that closed before answering, the
    /// back-reference set by the caller is rolled back and the client is
    /// told why.
    async fn register_with(&mut self, lobby: LobbyHandle) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let cmd = LobbyCommand::Register {
            client: self.handle.clone(),
            respond_to: ack_tx,
        };
        let delivered = lobby.sender.send(cmd).await.is_ok();

        let outcome = if delivered { ack_rx.await.ok() } else { None };
        match outcome {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                info!("client {} rejected by lobby {}: {}", self.handle.id, lobby.id, err);
                self.lobby = None;
                self.handle
                    .enqueue_response(&Response::rejection(lobby.id.to_string(), &err));
            }
            None => {
                info!("lobby {} closed before registering {}", lobby.id, self.handle.id);
                self.lobby = None;
                self.handle
                    .enqueue_response(&Response::rejection(lobby.id.to_string(), &AppError::LobbyNotFound));
            }
        }
    }

    /// Unwind the session after the read loop ends
    ///
    /// Deregisters from the server and from the current lobby, then drops
    /// this side of the outbound queue. Consuming `self` makes a second
    /// invocation impossible.
    pub async fn disconnect(mut self) {
        let cmd = ServerCommand::DeregisterClient {
            client_id: self.handle.id,
        };
        let _ = self.server.send(cmd).await;

        if let Some(lobby) = self.lobby.take() {
            let cmd = LobbyCommand::Deregister {
                client_id: self.handle.id,
            };
            let _ = lobby.sender.send(cmd).await;
        }
    }
}
