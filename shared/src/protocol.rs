//! Wire protocol: UTF-8 JSON text frames carrying a closed tagged union per
//! direction. Anything that does not parse into these shapes is a protocol
//! error at the boundary, never a best-effort field access.

use serde::{Deserialize, Serialize};

use crate::{Pipe, PlayerState};

/// Roster entry for lobby broadcasts.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LobbyPlayer {
    pub id: String,
    pub nickname: String,
    pub is_ready: bool,
    pub is_dead: bool,
    pub score: u32,
}

/// Messages accepted from clients. `Collision` and `ScoreUpdate` are
/// advisory hints only; the server's own recomputation is authoritative.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Join { id: String, nickname: String },
    Ready { id: String, is_ready: bool },
    Flap { id: String, tick: u64 },
    Collision { id: String },
    ScoreUpdate { id: String, score: u32 },
    ResetReady { id: String },
}

impl ClientMessage {
    /// The actor identity this message refers to.
    pub fn identity(&self) -> &str {
        match self {
            ClientMessage::Join { id, .. }
            | ClientMessage::Ready { id, .. }
            | ClientMessage::Flap { id, .. }
            | ClientMessage::Collision { id }
            | ClientMessage::ScoreUpdate { id, .. }
            | ClientMessage::ResetReady { id } => id,
        }
    }
}

/// Messages pushed to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    LobbyUpdate {
        players: Vec<LobbyPlayer>,
    },
    StartMatch {
        players: Vec<PlayerState>,
        countdown_time: u32,
    },
    GameStateUpdate {
        tick: u64,
        players: Vec<PlayerState>,
        pipes: Vec<Pipe>,
    },
    PlayerDied {
        id: String,
        score: u32,
    },
    MatchOver {
        winner_nickname: String,
        players: Vec<PlayerState>,
    },
    Error {
        message: String,
    },
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_server_message(text: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn encode_client_message(msg: &ClientMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

pub fn encode_server_message(msg: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}
