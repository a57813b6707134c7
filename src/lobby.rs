//! Lobby actor implementation
//!
//! A lobby owns the member set of one capacity-bounded group of clients.
//! A single control loop serializes registration, deregistration and
//! broadcast requests arriving over its command channel; that loop is the
//! only code that ever touches the member map, so no lock exists.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::ClientHandle;
use crate::error::AppError;
use crate::message::{Response, Status};
use crate::server::ServerCommand;
use crate::types::{ClientId, LobbyId};

/// Smallest allowed lobby capacity
const MIN_CAPACITY: usize = 2;

/// Commands sent from client sessions to a lobby actor
#[derive(Debug)]
pub enum LobbyCommand {
    /// Add a member, acknowledged over `respond_to`
    Register {
        client: ClientHandle,
        respond_to: oneshot::Sender<Result<(), AppError>>,
    },
    /// Remove a member
    Deregister { client_id: ClientId },
    /// Deliver a message to every member except the sender
    Broadcast { sender: ClientId, content: String },
    /// Tear the lobby down
    Close,
}

/// Address of a running lobby actor
///
/// A weak reference: sending to a lobby whose control loop has exited fails
/// with a channel error instead of dangling.
#[derive(Debug, Clone)]
pub struct LobbyHandle {
    /// Lobby identifier
    pub id: LobbyId,
    /// Sending side of the lobby's command channel
    pub sender: mpsc::Sender<LobbyCommand>,
}

/// A capacity-bounded group of clients relaying messages to each other
pub struct Lobby {
    id: LobbyId,
    capacity: usize,
    clients: HashMap<ClientId, ClientHandle>,
    receiver: mpsc::Receiver<LobbyCommand>,
    server: mpsc::Sender<ServerCommand>,
}

impl Lobby {
    /// Create a lobby over the given command receiver
    ///
    /// Capacities below two make no sense for a relay and are clamped.
    pub fn new(
        capacity: usize,
        server: mpsc::Sender<ServerCommand>,
        receiver: mpsc::Receiver<LobbyCommand>,
    ) -> Self {
        let capacity = if capacity < MIN_CAPACITY {
            warn!("lobby capacity must be at least {}, clamping", MIN_CAPACITY);
            MIN_CAPACITY
        } else {
            capacity
        };

        Self {
            id: LobbyId::new(),
            capacity,
            clients: HashMap::new(),
            receiver,
            server,
        }
    }

    /// Lobby identifier
    pub fn id(&self) -> LobbyId {
        self.id
    }

    /// Effective capacity after clamping
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run the control loop until the lobby closes
    ///
    /// The lobby closes when its member set becomes empty, when it receives
    /// an explicit close command, or when every command sender is dropped.
    pub async fn run(mut self) {
        debug!("lobby {} started", self.id);

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                LobbyCommand::Register { client, respond_to } => {
                    self.register_client(client, respond_to);
                }
                LobbyCommand::Deregister { client_id } => {
                    if self.deregister_client(client_id) {
                        break;
                    }
                }
                LobbyCommand::Broadcast { sender, content } => {
                    self.broadcast_message(sender, &content);
                }
                LobbyCommand::Close => break,
            }
        }

        self.close_lobby().await;
    }

    /// Add a member unless that would exceed capacity
    ///
    /// Rejection is acknowledged to the requester, which owns surfacing the
    /// error response; the member set is left untouched.
    fn register_client(
        &mut self,
        client: ClientHandle,
        respond_to: oneshot::Sender<Result<(), AppError>>,
    ) {
        if self.clients.len() + 1 > self.capacity {
            info!(
                "client {} wasn't registered, lobby {} is at capacity {}",
                client.id, self.id, self.capacity
            );
            let _ = respond_to.send(Err(AppError::LobbyFull));
            return;
        }

        debug!("client {} registered in lobby {}", client.id, self.id);
        self.clients.insert(client.id, client);
        let _ = respond_to.send(Ok(()));
    }

    /// Remove a member; returns true once the lobby should close
    fn deregister_client(&mut self, client_id: ClientId) -> bool {
        self.clients.remove(&client_id);

        if self.clients.is_empty() {
            info!("lobby {} is empty, closing", self.id);
            return true;
        }
        false
    }

    /// Deliver a message to every member except the sender
    ///
    /// The payload is encoded once and pushed with a single non-blocking
    /// attempt per recipient, so a member with a saturated outbound queue
    /// loses the payload instead of stalling the control loop.
    fn broadcast_message(&self, sender: ClientId, content: &str) {
        let response = Response::new(Status::Ok, content);
        let payload = match response.encode() {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to encode broadcast in lobby {}: {}", self.id, e);
                return;
            }
        };

        for client in self.clients.values() {
            if client.id == sender {
                continue;
            }
            client.enqueue(payload.clone());
        }
    }

    /// Tear down: reject lingering registrations, then leave the directory
    ///
    /// The command channel closes before the directory entry goes away, so a
    /// handle obtained from a stale lookup can only fail, never register.
    async fn close_lobby(mut self) {
        self.receiver.close();
        while let Ok(cmd) = self.receiver.try_recv() {
            if let LobbyCommand::Register { respond_to, .. } = cmd {
                let _ = respond_to.send(Err(AppError::LobbyNotFound));
            }
        }
        self.clients.clear();

        let cmd = ServerCommand::DeleteLobby { lobby_id: self.id };
        let _ = self.server.send(cmd).await;

        info!("lobby {} closed", self.id);
    }
}
