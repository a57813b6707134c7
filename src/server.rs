//! RelayServer actor implementation
//!
//! The process-wide actor owning the client registry and the lobby
//! directory. Uses the Actor pattern with mpsc channels for message passing;
//! the registries are only ever touched by the control loop, so external
//! readers go through request/response commands instead of reading maps.

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::client::ClientHandle;
use crate::lobby::{Lobby, LobbyHandle};
use crate::types::{ClientId, LobbyId};

/// Member cap applied to every lobby
const LOBBY_CAPACITY: usize = 2;

/// Buffer size of each lobby's command channel
const LOBBY_BUFFER_SIZE: usize = 32;

/// Commands sent from client sessions and lobbies to the server actor
#[derive(Debug)]
pub enum ServerCommand {
    /// New client connected
    RegisterClient { client: ClientHandle },
    /// Client disconnected
    DeregisterClient { client_id: ClientId },
    /// Create a new lobby and hand back its address
    CreateLobby {
        respond_to: oneshot::Sender<LobbyHandle>,
    },
    /// Resolve a lobby id through the directory
    LookupLobby {
        lobby_id: LobbyId,
        respond_to: oneshot::Sender<Option<LobbyHandle>>,
    },
    /// Drop a closed lobby from the directory (sent by the lobby itself)
    DeleteLobby { lobby_id: LobbyId },
    /// Deliver a payload to every connected client, lobby or not
    Broadcast { payload: String },
}

/// The process-wide relay actor
///
/// Manages the client registry and the lobby directory and processes
/// commands from connection handlers and lobbies.
pub struct RelayServer {
    /// All connected clients: ClientId -> ClientHandle
    clients: HashMap<ClientId, ClientHandle>,
    /// All active lobbies: LobbyId -> LobbyHandle
    lobbies: HashMap<LobbyId, LobbyHandle>,
    /// Command sender handed to lobbies for closure callbacks
    sender: mpsc::Sender<ServerCommand>,
    /// Command receiver channel
    receiver: mpsc::Receiver<ServerCommand>,
}

impl RelayServer {
    /// Create a new server actor over the given command channel
    ///
    /// `sender` must be the sending side of `receiver`; lobbies use it to
    /// deregister themselves when they close.
    pub fn new(sender: mpsc::Sender<ServerCommand>, receiver: mpsc::Receiver<ServerCommand>) -> Self {
        Self {
            clients: HashMap::new(),
            lobbies: HashMap::new(),
            sender,
            receiver,
        }
    }

    /// Run the server event loop
    ///
    /// Continuously receives and processes commands until all senders are
    /// dropped.
    pub async fn run(mut self) {
        info!("RelayServer started");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!("RelayServer shutting down");
    }

    /// Process a single command
    fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::RegisterClient { client } => {
                self.register_client(client);
            }
            ServerCommand::DeregisterClient { client_id } => {
                self.deregister_client(client_id);
            }
            ServerCommand::CreateLobby { respond_to } => {
                let _ = respond_to.send(self.create_lobby());
            }
            ServerCommand::LookupLobby { lobby_id, respond_to } => {
                let _ = respond_to.send(self.lobbies.get(&lobby_id).cloned());
            }
            ServerCommand::DeleteLobby { lobby_id } => {
                self.delete_lobby(lobby_id);
            }
            ServerCommand::Broadcast { payload } => {
                self.broadcast_to_clients(payload);
            }
        }
    }

    /// Add a client to the registry
    fn register_client(&mut self, client: ClientHandle) {
        info!("register new client {} ({})", client.id, client.name);
        self.clients.insert(client.id, client);
        debug!(
            "total clients: {}, total lobbies: {}",
            self.clients.len(),
            self.lobbies.len()
        );
    }

    /// Drop a client from the registry
    fn deregister_client(&mut self, client_id: ClientId) {
        info!("unregister client {}", client_id);
        self.clients.remove(&client_id);
        debug!(
            "total clients: {}, total lobbies: {}",
            self.clients.len(),
            self.lobbies.len()
        );
    }

    /// Allocate a new lobby, start its control loop and file it
    fn create_lobby(&mut self) -> LobbyHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(LOBBY_BUFFER_SIZE);
        let lobby = Lobby::new(LOBBY_CAPACITY, self.sender.clone(), cmd_rx);
        let handle = LobbyHandle {
            id: lobby.id(),
            sender: cmd_tx,
        };

        tokio::spawn(lobby.run());
        self.lobbies.insert(handle.id, handle.clone());
        info!("new lobby {} created", handle.id);

        handle
    }

    /// Drop a lobby from the directory
    fn delete_lobby(&mut self, lobby_id: LobbyId) {
        self.lobbies.remove(&lobby_id);
        debug!("lobby {} removed from directory", lobby_id);
    }

    /// Push a payload into every connected client's outbound queue
    fn broadcast_to_clients(&self, payload: String) {
        for client in self.clients.values() {
            client.enqueue(payload.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Session;
    use crate::error::AppError;
    use crate::lobby::LobbyCommand;
    use std::time::Duration;

    fn spawn_server() -> mpsc::Sender<ServerCommand> {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        tokio::spawn(RelayServer::new(cmd_tx.clone(), cmd_rx).run());
        cmd_tx
    }

    async fn connect(cmd_tx: &mpsc::Sender<ServerCommand>) -> (Session, mpsc::Receiver<String>) {
        let (out_tx, out_rx) = mpsc::channel(8);
        let handle = ClientHandle::new(ClientId::new(), "tester".to_string(), out_tx);
        cmd_tx
            .send(ServerCommand::RegisterClient {
                client: handle.clone(),
            })
            .await
            .unwrap();
        (Session::new(handle, cmd_tx.clone()), out_rx)
    }

    async fn lookup(cmd_tx: &mpsc::Sender<ServerCommand>, lobby_id: LobbyId) -> Option<LobbyHandle> {
        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(ServerCommand::LookupLobby {
                lobby_id,
                respond_to: reply_tx,
            })
            .await
            .unwrap();
        reply_rx.await.unwrap()
    }

    fn created_lobby_id(payload: &str) -> LobbyId {
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["status"], "lobby-created");
        value["content"].as_str().unwrap().parse().unwrap()
    }

    #[tokio::test]
    async fn test_create_then_lookup_lobby() {
        let cmd_tx = spawn_server();

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(ServerCommand::CreateLobby {
                respond_to: reply_tx,
            })
            .await
            .unwrap();
        let handle = reply_rx.await.unwrap();

        let found = lookup(&cmd_tx, handle.id).await;
        assert_eq!(found.map(|h| h.id), Some(handle.id));
        assert!(lookup(&cmd_tx, LobbyId::new()).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_lobby_empties_directory() {
        let cmd_tx = spawn_server();

        let (reply_tx, reply_rx) = oneshot::channel();
        cmd_tx
            .send(ServerCommand::CreateLobby {
                respond_to: reply_tx,
            })
            .await
            .unwrap();
        let handle = reply_rx.await.unwrap();

        cmd_tx
            .send(ServerCommand::DeleteLobby { lobby_id: handle.id })
            .await
            .unwrap();

        assert!(lookup(&cmd_tx, handle.id).await.is_none());
    }

    #[tokio::test]
    async fn test_global_broadcast_reaches_registered_clients_only() {
        let cmd_tx = spawn_server();
        let (a, mut a_rx) = connect(&cmd_tx).await;
        let (_b, mut b_rx) = connect(&cmd_tx).await;

        cmd_tx
            .send(ServerCommand::Broadcast {
                payload: "announcement".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(a_rx.recv().await.unwrap(), "announcement");
        assert_eq!(b_rx.recv().await.unwrap(), "announcement");

        // After disconnect the registry forgets the client.
        a.disconnect().await;
        cmd_tx
            .send(ServerCommand::Broadcast {
                payload: "again".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(b_rx.recv().await.unwrap(), "again");
        assert_eq!(a_rx.recv().await, None);
    }

    // Scenario: A creates a lobby, B joins it, A's message reaches B only.
    #[tokio::test]
    async fn test_create_join_broadcast_flow() {
        let cmd_tx = spawn_server();
        let (mut a, mut a_rx) = connect(&cmd_tx).await;
        let (mut b, mut b_rx) = connect(&cmd_tx).await;

        a.handle_frame(r#"{"action": "create-lobby"}"#).await;
        let lobby_id = created_lobby_id(&a_rx.recv().await.unwrap());

        let join = format!(r#"{{"action": "join-lobby", "content": "{}"}}"#, lobby_id);
        b.handle_frame(&join).await;
        assert_eq!(b.current_lobby(), Some(lobby_id));
        assert!(b_rx.try_recv().is_err());

        a.handle_frame(r#"{"action": "send-message", "content": "hi"}"#).await;

        let payload = b_rx.recv().await.unwrap();
        assert!(payload.contains("\"status\":\"ok\""));
        assert!(payload.contains("\"content\":\"hi\""));
        assert!(a_rx.try_recv().is_err());
    }

    // Scenario: joining a full lobby is rejected and the member set is
    // left untouched.
    #[tokio::test]
    async fn test_join_full_lobby_is_rejected() {
        let cmd_tx = spawn_server();
        let (mut a, mut a_rx) = connect(&cmd_tx).await;
        let (mut b, _b_rx) = connect(&cmd_tx).await;
        let (mut d, mut d_rx) = connect(&cmd_tx).await;

        a.handle_frame(r#"{"action": "create-lobby"}"#).await;
        let lobby_id = created_lobby_id(&a_rx.recv().await.unwrap());

        let join = format!(r#"{{"action": "join-lobby", "content": "{}"}}"#, lobby_id);
        b.handle_frame(&join).await;
        d.handle_frame(&join).await;

        let payload = d_rx.recv().await.unwrap();
        assert!(payload.contains("the lobby is crowded"));
        assert!(d.current_lobby().is_none());

        // D's messages cannot reach the lobby members.
        d.handle_frame(r#"{"action": "send-message", "content": "intruder"}"#)
            .await;
        a.handle_frame(r#"{"action": "send-message", "content": "hi"}"#).await;
        assert!(a_rx.try_recv().is_err());
    }

    // Scenario: once the last member leaves, the lobby disappears from the
    // directory and later joins report it missing.
    #[tokio::test]
    async fn test_last_leave_dissolves_lobby() {
        let cmd_tx = spawn_server();
        let (mut a, mut a_rx) = connect(&cmd_tx).await;
        let (mut c, mut c_rx) = connect(&cmd_tx).await;

        a.handle_frame(r#"{"action": "create-lobby"}"#).await;
        let lobby_id = created_lobby_id(&a_rx.recv().await.unwrap());

        a.handle_frame(r#"{"action": "leave-lobby"}"#).await;
        assert!(a.current_lobby().is_none());

        // Closure flows lobby -> server asynchronously; wait for the
        // directory to catch up.
        let mut attempts = 0;
        while lookup(&cmd_tx, lobby_id).await.is_some() {
            attempts += 1;
            assert!(attempts < 100, "lobby never left the directory");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let join = format!(r#"{{"action": "join-lobby", "content": "{}"}}"#, lobby_id);
        c.handle_frame(&join).await;

        let payload = c_rx.recv().await.unwrap();
        assert!(payload.contains("lobby not found"));
        assert!(c.current_lobby().is_none());
    }

    // Scenario: disconnecting while in a lobby cleans up both registries
    // without an explicit leave-lobby.
    #[tokio::test]
    async fn test_disconnect_cleans_up_membership() {
        let cmd_tx = spawn_server();
        let (mut a, mut a_rx) = connect(&cmd_tx).await;
        let (mut b, mut b_rx) = connect(&cmd_tx).await;

        a.handle_frame(r#"{"action": "create-lobby"}"#).await;
        let lobby_id = created_lobby_id(&a_rx.recv().await.unwrap());

        let join = format!(r#"{{"action": "join-lobby", "content": "{}"}}"#, lobby_id);
        b.handle_frame(&join).await;

        b.disconnect().await;

        // B's membership is gone: a broadcast from A reaches nobody, and
        // B's outbound queue closes once the registries drop their handles.
        assert_eq!(b_rx.recv().await, None);
        a.handle_frame(r#"{"action": "send-message", "content": "anyone?"}"#)
            .await;
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_registration_after_lookup_of_closing_lobby_reports_not_found() {
        let cmd_tx = spawn_server();
        let (mut a, mut a_rx) = connect(&cmd_tx).await;
        let (mut c, mut c_rx) = connect(&cmd_tx).await;

        a.handle_frame(r#"{"action": "create-lobby"}"#).await;
        let lobby_id = created_lobby_id(&a_rx.recv().await.unwrap());

        // Grab the handle before the lobby dissolves, then dissolve it.
        let stale = lookup(&cmd_tx, lobby_id).await.unwrap();
        a.handle_frame(r#"{"action": "leave-lobby"}"#).await;

        let mut attempts = 0;
        while lookup(&cmd_tx, lobby_id).await.is_some() {
            attempts += 1;
            assert!(attempts < 100, "lobby never left the directory");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // Registration through the stale handle must fail cleanly.
        let (ack_tx, ack_rx) = oneshot::channel();
        let send_result = stale
            .sender
            .send(LobbyCommand::Register {
                client: ClientHandle::new(c.id(), "c".to_string(), mpsc::channel(8).0),
                respond_to: ack_tx,
            })
            .await;
        if send_result.is_ok() {
            assert!(matches!(ack_rx.await, Ok(Err(AppError::LobbyNotFound)) | Err(_)));
        }

        // And the normal join path reports the lobby missing.
        let join = format!(r#"{{"action": "join-lobby", "content": "{}"}}"#, lobby_id);
        c.handle_frame(&join).await;
        let payload = c_rx.recv().await.unwrap();
        assert!(payload.contains("lobby not found"));
    }
}
