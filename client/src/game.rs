//! Client-side game state: local prediction for the player's own bird and
//! reconciliation against authoritative snapshots.
//!
//! The client steps the identical physics the server runs, one prediction
//! tick per server tick, so a flap feels instant. Remote birds and pipes
//! are never predicted; they render straight from the newest snapshot.

use log::{debug, warn};
use shared::protocol::{LobbyPlayer, ServerMessage};
use shared::{Pipe, PlayerState, RECONCILE_TOLERANCE, SNAPSHOT_WINDOW};
use std::collections::VecDeque;

/// Match phase as observed from server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Lobby,
    Countdown,
    Playing,
    GameOver,
}

/// One authoritative state broadcast.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub tick: u64,
    pub players: Vec<PlayerState>,
    pub pipes: Vec<Pipe>,
}

/// Predicted position recorded at one local tick, kept for comparison when
/// the snapshot for that tick arrives.
#[derive(Debug, Clone, Copy)]
struct PredictedSample {
    tick: u64,
    y: f32,
    velocity_y: f32,
}

pub struct ClientGameState {
    id: String,
    pub phase: ClientPhase,
    /// Our own bird, stepped locally ahead of the server.
    predicted: PlayerState,
    /// Next local tick to simulate; doubles as the flap sequence number.
    prediction_tick: u64,
    history: VecDeque<PredictedSample>,
    /// Recent authoritative snapshots, newest at the back.
    snapshots: VecDeque<Snapshot>,
    pub roster: Vec<LobbyPlayer>,
    pub winner_nickname: Option<String>,
}

impl ClientGameState {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        let id = id.into();
        let predicted = PlayerState::new(id.clone(), nickname);
        Self {
            id,
            phase: ClientPhase::Lobby,
            predicted,
            prediction_tick: 0,
            history: VecDeque::new(),
            snapshots: VecDeque::new(),
            roster: Vec::new(),
            winner_nickname: None,
        }
    }

    pub fn local_player(&self) -> &PlayerState {
        &self.predicted
    }

    pub fn prediction_tick(&self) -> u64 {
        self.prediction_tick
    }

    /// Remote birds from the newest snapshot, our own excluded.
    pub fn remote_players(&self) -> Vec<PlayerState> {
        self.snapshots
            .back()
            .map(|snapshot| {
                snapshot
                    .players
                    .iter()
                    .filter(|p| p.id != self.id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn pipes(&self) -> Vec<Pipe> {
        self.snapshots
            .back()
            .map(|snapshot| snapshot.pipes.clone())
            .unwrap_or_default()
    }

    /// One local simulation step. Only our own live bird is predicted.
    pub fn predict_tick(&mut self) {
        if self.phase != ClientPhase::Playing || self.predicted.is_dead {
            return;
        }

        self.predicted.step_physics();
        self.prediction_tick += 1;
        self.history.push_back(PredictedSample {
            tick: self.prediction_tick,
            y: self.predicted.y,
            velocity_y: self.predicted.velocity_y,
        });
        while self.history.len() > SNAPSHOT_WINDOW {
            self.history.pop_front();
        }
    }

    /// Applies the flap locally and returns the sequence number to send,
    /// or `None` when flapping is not currently possible.
    pub fn flap(&mut self) -> Option<u64> {
        if self.phase != ClientPhase::Playing || self.predicted.is_dead {
            return None;
        }
        self.predicted.flap();
        Some(self.prediction_tick)
    }

    pub fn apply_server_message(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::LobbyUpdate { players } => {
                self.roster = players;
                // Mid-match roster changes must not drop us out of the
                // game view; only the post-match update returns to lobby.
                if self.phase == ClientPhase::GameOver {
                    self.phase = ClientPhase::Lobby;
                }
            }
            ServerMessage::StartMatch { players, .. } => {
                self.phase = ClientPhase::Countdown;
                self.prediction_tick = 0;
                self.history.clear();
                self.snapshots.clear();
                self.winner_nickname = None;
                self.predicted.reset_for_match();
                if let Some(me) = players.into_iter().find(|p| p.id == self.id) {
                    self.predicted = me;
                }
            }
            ServerMessage::GameStateUpdate {
                tick,
                players,
                pipes,
            } => {
                self.phase = ClientPhase::Playing;
                self.ingest_snapshot(Snapshot {
                    tick,
                    players,
                    pipes,
                });
            }
            ServerMessage::PlayerDied { id, score } => {
                if id == self.id {
                    self.predicted.is_dead = true;
                    self.predicted.score = score;
                }
            }
            ServerMessage::MatchOver {
                winner_nickname, ..
            } => {
                self.phase = ClientPhase::GameOver;
                self.winner_nickname = Some(winner_nickname);
            }
            ServerMessage::Error { message } => {
                warn!("Server error: {}", message);
            }
        }
    }

    /// Stores a snapshot and reconciles our prediction against it. Stale or
    /// duplicate ticks are discarded.
    fn ingest_snapshot(&mut self, snapshot: Snapshot) {
        if let Some(newest) = self.snapshots.back() {
            if snapshot.tick <= newest.tick {
                debug!("Discarding stale snapshot for tick {}", snapshot.tick);
                return;
            }
        }

        if let Some(me) = snapshot.players.iter().find(|p| p.id == self.id) {
            self.reconcile(snapshot.tick, &me.clone());
        }

        self.snapshots.push_back(snapshot);
        while self.snapshots.len() > SNAPSHOT_WINDOW {
            self.snapshots.pop_front();
        }
    }

    fn reconcile(&mut self, server_tick: u64, authoritative: &PlayerState) {
        // Death and score are never predicted; always take the server's.
        self.predicted.is_dead = authoritative.is_dead;
        self.predicted.score = authoritative.score;

        if server_tick >= self.prediction_tick {
            // Server is ahead of us (join, hitch, or first snapshot):
            // adopt its state outright and resume predicting from there.
            self.snap_to(authoritative);
            self.prediction_tick = server_tick;
            self.history.clear();
            return;
        }

        let Some(sample) = self.history.iter().find(|s| s.tick == server_tick) else {
            // Too old to compare against; nothing to correct.
            return;
        };

        let divergence = (authoritative.y - sample.y).abs();
        if divergence > RECONCILE_TOLERANCE {
            debug!(
                "Reconciling tick {}: diverged by {:.2}",
                server_tick, divergence
            );
            self.snap_to(authoritative);
        }

        // Confirmed history is no longer needed either way.
        self.history.retain(|s| s.tick > server_tick);
    }

    fn snap_to(&mut self, authoritative: &PlayerState) {
        self.predicted.y = authoritative.y;
        self.predicted.velocity_y = authoritative.velocity_y;
        self.predicted.angle = authoritative.angle;
    }
}
