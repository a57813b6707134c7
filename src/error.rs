//! Error types for the relay
//!
//! Defines application-level errors using thiserror.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// rejections that are reported back to the requesting client.
/// The `Display` text of the rejection variants is sent verbatim
/// in the `error` field of the wire response.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Channel send error (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Client tried to join while already a lobby member
    #[error("the client is already in lobby")]
    AlreadyInLobby,

    /// Supplied lobby identifier failed to parse
    #[error("lobby id is not valid")]
    InvalidLobbyId,

    /// No lobby with the given identifier in the directory
    #[error("lobby not found")]
    LobbyNotFound,

    /// Lobby already holds its maximum number of members
    #[error("the lobby is crowded")]
    LobbyFull,
}
