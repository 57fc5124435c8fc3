//! Session registry: maps open transports to stable player identities and
//! fans broadcasts out to every connected transport. Sessions own only their
//! transport; gameplay entities belong to the match.

use log::{info, warn};
use shared::protocol::{encode_server_message, ServerMessage};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use tokio_tungstenite::tungstenite::Message;

pub type ConnId = u64;

/// One open transport. `identity` is bound on a successful join.
#[derive(Debug)]
pub struct Connection {
    pub tx: UnboundedSender<Message>,
    pub identity: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Same identity reconnected; the previous transport has been closed
    /// and the new one owns the actor ("latest connection wins").
    Rejoined,
    RoomFull,
}

pub struct SessionRegistry {
    conns: HashMap<ConnId, Connection>,
    /// identity -> the connection currently owning it.
    identities: HashMap<String, ConnId>,
    max_players: usize,
}

impl SessionRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            conns: HashMap::new(),
            identities: HashMap::new(),
            max_players,
        }
    }

    /// Registers a freshly accepted transport, before any join.
    pub fn open(&mut self, conn: ConnId, tx: UnboundedSender<Message>) {
        self.conns.insert(
            conn,
            Connection {
                tx,
                identity: None,
            },
        );
    }

    /// Binds an identity to a transport. On rejoin the old transport is
    /// force-closed by dropping its sender, which ends its connection task.
    pub fn join(&mut self, conn: ConnId, identity: &str) -> JoinOutcome {
        if let Some(&old_conn) = self.identities.get(identity) {
            if old_conn != conn {
                info!("Player {} reconnected, closing old transport", identity);
                self.conns.remove(&old_conn);
            }
            self.identities.insert(identity.to_string(), conn);
            if let Some(c) = self.conns.get_mut(&conn) {
                c.identity = Some(identity.to_string());
            }
            return JoinOutcome::Rejoined;
        }

        if self.identities.len() >= self.max_players {
            return JoinOutcome::RoomFull;
        }

        self.identities.insert(identity.to_string(), conn);
        if let Some(c) = self.conns.get_mut(&conn) {
            c.identity = Some(identity.to_string());
        }
        JoinOutcome::Joined
    }

    /// Drops a closed transport. Returns the identity whose session ended,
    /// if this connection still owned one (a transport replaced by a rejoin
    /// no longer does).
    pub fn close(&mut self, conn: ConnId) -> Option<String> {
        let connection = self.conns.remove(&conn)?;
        let identity = connection.identity?;
        match self.identities.get(&identity) {
            Some(&owner) if owner == conn => {
                self.identities.remove(&identity);
                Some(identity)
            }
            _ => None,
        }
    }

    /// Force-closes a transport (capacity rejection path).
    pub fn disconnect(&mut self, conn: ConnId) {
        self.conns.remove(&conn);
    }

    pub fn identity_of(&self, conn: ConnId) -> Option<&str> {
        self.conns.get(&conn).and_then(|c| c.identity.as_deref())
    }

    pub fn session_count(&self) -> usize {
        self.identities.len()
    }

    /// Sends to one transport. Failures mean the task already ended; the
    /// close event will clean up.
    pub fn send_to(&self, conn: ConnId, msg: &ServerMessage) {
        let text = match encode_server_message(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode message: {}", e);
                return;
            }
        };
        if let Some(connection) = self.conns.get(&conn) {
            let _ = connection.tx.send(Message::Text(text));
        }
    }

    /// Fans out to every connected transport, dead and lobby-bound actors
    /// included (spectators keep receiving state).
    pub fn broadcast(&self, msg: &ServerMessage) {
        let text = match encode_server_message(msg) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to encode broadcast: {}", e);
                return;
            }
        };
        for connection in self.conns.values() {
            let _ = connection.tx.send(Message::Text(text.clone()));
        }
    }
}
