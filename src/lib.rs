//! Real-Time Lobby Relay Library
//!
//! A WebSocket message relay built with tokio-tungstenite: clients hold
//! persistent connections, group themselves into capacity-bounded lobbies
//! and broadcast text messages to the other lobby members.
//!
//! # Architecture
//! Three cooperating actors bound purely by message passing:
//! - `RelayServer` owns the client registry and the lobby directory
//! - each `Lobby` owns its member set behind one control loop
//! - each connection runs a read and a write loop sharing an outbound queue
//!
//! Every mutable collection has exactly one writer - no locks anywhere.
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use lobby_relay::{handle_connection, RelayServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:1213").await.unwrap();
//!     let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//!     tokio::spawn(RelayServer::new(cmd_tx.clone(), cmd_rx).run());
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         let cmd_tx = cmd_tx.clone();
//!         tokio::spawn(handle_connection(stream, cmd_tx));
//!     }
//! }
//! ```

pub mod client;
pub mod error;
pub mod handler;
pub mod lobby;
pub mod message;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use client::{ClientHandle, Session};
pub use error::AppError;
pub use handler::handle_connection;
pub use lobby::{Lobby, LobbyCommand, LobbyHandle};
pub use message::{Action, Inbound, Response, Status};
pub use server::{RelayServer, ServerCommand};
pub use types::{ClientId, LobbyId};
