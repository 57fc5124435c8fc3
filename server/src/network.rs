//! Server network layer: WebSocket accept loop, per-connection tasks, and
//! the single-consumer event loop that owns all gameplay mutation.
//!
//! Connection tasks only parse frames and forward them over a channel;
//! message handling and tick work interleave in one `tokio::select!` loop,
//! so nothing ever mutates the match concurrently with a tick.

use crate::game::{Match, MatchOutcome, MatchPhase};
use crate::registry::{ConnId, JoinOutcome, SessionRegistry};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::protocol::{parse_client_message, ClientMessage, ServerMessage};
use shared::{COUNTDOWN_SECS, DEFAULT_MAX_PLAYERS, DEFAULT_TICK_RATE, LOBBY_RETURN_SECS};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub tick_rate: u32,
    pub max_players: usize,
    pub countdown_secs: u32,
    pub lobby_return_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: DEFAULT_TICK_RATE,
            max_players: DEFAULT_MAX_PLAYERS,
            countdown_secs: COUNTDOWN_SECS,
            lobby_return_secs: LOBBY_RETURN_SECS,
        }
    }
}

/// Events feeding the single-consumer loop.
#[derive(Debug)]
enum ServerEvent {
    Inbound { conn: ConnId, msg: ClientMessage },
    Closed { conn: ConnId },
    CountdownElapsed { generation: u64 },
    LobbyReturnElapsed { generation: u64 },
}

enum LoopStep {
    Event(Option<ServerEvent>),
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Tick,
}

/// The match server: one room, one event loop.
pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    registry: SessionRegistry,
    game: Match,
    event_tx: UnboundedSender<ServerEvent>,
    event_rx: UnboundedReceiver<ServerEvent>,
    next_conn_id: ConnId,
    /// Armed only while Playing; cleared on any exit from that phase.
    tick_interval: Option<Interval>,
}

impl Server {
    pub async fn bind(
        addr: &str,
        config: ServerConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", listener.local_addr()?);

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            registry: SessionRegistry::new(config.max_players),
            game: Match::new(config.tick_rate),
            config,
            event_tx,
            event_rx,
            next_conn_id: 0,
            tick_interval: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Main loop: accepts transports, applies inbound events, and runs the
    /// tick while a match is playing.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        loop {
            let Self {
                listener,
                event_rx,
                tick_interval,
                ..
            } = self;

            let step = tokio::select! {
                event = event_rx.recv() => LoopStep::Event(event),
                accepted = listener.accept() => LoopStep::Accepted(accepted),
                _ = async {
                    match tick_interval.as_mut() {
                        Some(interval) => { interval.tick().await; }
                        None => std::future::pending().await,
                    }
                } => LoopStep::Tick,
            };

            match step {
                LoopStep::Event(Some(event)) => self.handle_event(event),
                LoopStep::Event(None) => {
                    info!("Event channel closed, shutting down");
                    return Ok(());
                }
                LoopStep::Accepted(Ok((stream, addr))) => self.accept_connection(stream, addr),
                LoopStep::Accepted(Err(e)) => warn!("Accept failed: {}", e),
                LoopStep::Tick => self.on_tick(),
            }
        }
    }

    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let conn = self.next_conn_id;
        self.next_conn_id += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.open(conn, tx);
        debug!("Transport {} accepted from {}", conn, addr);

        tokio::spawn(run_connection(conn, stream, addr, self.event_tx.clone(), rx));
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Inbound { conn, msg } => self.handle_message(conn, msg),
            ServerEvent::Closed { conn } => self.handle_closed(conn),
            ServerEvent::CountdownElapsed { generation } => {
                if self.game.begin_playing(generation) {
                    self.start_tick_loop();
                } else {
                    debug!("Stale countdown timer ignored");
                }
            }
            ServerEvent::LobbyReturnElapsed { generation } => {
                if self.game.return_to_lobby(generation) {
                    self.broadcast_lobby();
                } else {
                    debug!("Stale lobby-return timer ignored");
                }
            }
        }
    }

    fn handle_message(&mut self, conn: ConnId, msg: ClientMessage) {
        if let ClientMessage::Join { id, nickname } = msg {
            self.handle_join(conn, id, nickname);
            return;
        }

        // Everything past join requires a known actor; unknown identities
        // are ignored, never errors.
        if !self.game.contains_actor(msg.identity()) {
            debug!("Message for unknown player {}", msg.identity());
            return;
        }

        match msg {
            ClientMessage::Ready { id, is_ready } => {
                self.game.set_ready(&id, is_ready);
                self.broadcast_lobby();
                self.maybe_start_countdown();
            }
            ClientMessage::Flap { id, tick } => {
                // Stale sequences are silently dropped by the watermark.
                self.game.apply_flap(&id, tick);
            }
            ClientMessage::Collision { id } => {
                // Advisory only; the server's own collision pass stands.
                debug!("Collision hint from {}", id);
            }
            ClientMessage::ScoreUpdate { id, score } => {
                // Advisory upper-bound hint; never applied to the
                // authoritative score.
                debug!(
                    "Score hint {} from {} (authoritative {:?})",
                    score,
                    id,
                    self.game.actor_score(&id)
                );
            }
            ClientMessage::ResetReady { id } => {
                self.game.reset_ready(&id);
                self.broadcast_lobby();
            }
            ClientMessage::Join { .. } => unreachable!("handled above"),
        }
    }

    fn handle_join(&mut self, conn: ConnId, id: String, nickname: String) {
        let nickname = if nickname.is_empty() {
            "AnonBird".to_string()
        } else {
            nickname
        };

        match self.registry.join(conn, &id) {
            JoinOutcome::RoomFull => {
                warn!("Rejected join from {}: room full", id);
                self.registry.send_to(
                    conn,
                    &ServerMessage::Error {
                        message: "Room full.".to_string(),
                    },
                );
                self.registry.disconnect(conn);
            }
            JoinOutcome::Joined | JoinOutcome::Rejoined => {
                self.game.add_actor(&id, &nickname);
                self.broadcast_lobby();
            }
        }
    }

    fn handle_closed(&mut self, conn: ConnId) {
        let Some(identity) = self.registry.close(conn) else {
            return;
        };

        let was_lobby = self.game.phase() == MatchPhase::Lobby;
        if let Some(outcome) = self.game.remove_actor(&identity) {
            self.finish_match(outcome);
        }
        self.broadcast_lobby();

        // The departed player may have been the last unready one.
        if was_lobby {
            self.maybe_start_countdown();
        }
    }

    fn maybe_start_countdown(&mut self) {
        let Some(generation) = self.game.start_countdown() else {
            return;
        };

        self.registry.broadcast(&ServerMessage::StartMatch {
            players: self.game.player_snapshots(),
            countdown_time: self.config.countdown_secs,
        });

        let events = self.event_tx.clone();
        let delay = Duration::from_secs(self.config.countdown_secs as u64);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ServerEvent::CountdownElapsed { generation });
        });
    }

    fn start_tick_loop(&mut self) {
        let period = Duration::from_secs_f64(1.0 / self.config.tick_rate as f64);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.tick_interval = Some(interval);
    }

    fn on_tick(&mut self) {
        let report = self.game.advance_tick();

        for (id, score) in &report.deaths {
            self.registry.broadcast(&ServerMessage::PlayerDied {
                id: id.clone(),
                score: *score,
            });
        }

        self.registry.broadcast(&ServerMessage::GameStateUpdate {
            tick: report.tick,
            players: self.game.player_snapshots(),
            pipes: self.game.pipe_snapshots(),
        });

        if let Some(outcome) = report.outcome {
            self.finish_match(outcome);
        } else if report.tick % 100 == 0 {
            debug!(
                "Tick {}: {} players, {} pipes",
                report.tick,
                self.game.actor_count(),
                self.game.pipe_snapshots().len()
            );
        }
    }

    /// Exit from Playing: stop the tick loop, announce the result, and arm
    /// the generation-tagged lobby-return timer.
    fn finish_match(&mut self, outcome: MatchOutcome) {
        self.tick_interval = None;

        self.registry.broadcast(&ServerMessage::MatchOver {
            winner_nickname: outcome.winner_nickname,
            players: outcome.players,
        });

        let generation = self.game.generation();
        let events = self.event_tx.clone();
        let delay = Duration::from_secs(self.config.lobby_return_secs);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ServerEvent::LobbyReturnElapsed { generation });
        });
    }

    fn broadcast_lobby(&self) {
        self.registry.broadcast(&ServerMessage::LobbyUpdate {
            players: self.game.lobby_snapshot(),
        });
    }
}

/// Per-connection task: pumps the outbound queue and parses inbound frames.
/// Malformed frames are logged and dropped; the connection stays open.
async fn run_connection(
    conn: ConnId,
    stream: TcpStream,
    addr: SocketAddr,
    events: UnboundedSender<ServerEvent>,
    mut outbound: UnboundedReceiver<Message>,
) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            let _ = events.send(ServerEvent::Closed { conn });
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(msg) => {
                    if sink.send(msg).await.is_err() {
                        break;
                    }
                }
                None => {
                    // Registry dropped us (rejoin takeover or rejection).
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = source.next() => match inbound {
                Some(Ok(Message::Text(text))) => match parse_client_message(&text) {
                    Ok(msg) => {
                        if events.send(ServerEvent::Inbound { conn, msg }).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Protocol error from {}: {}", addr, e),
                },
                Some(Ok(Message::Ping(payload))) => {
                    let _ = sink.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Transport {} error: {}", conn, e);
                    break;
                }
            },
        }
    }

    let _ = events.send(ServerEvent::Closed { conn });
}
