//! Client network layer: WebSocket transport plus a headless pilot loop.
//!
//! The loop interleaves inbound server messages with a local prediction
//! interval running at the server's tick rate. Flaps are applied to the
//! predicted state immediately and sent tagged with the prediction tick,
//! which the server uses as the flap sequence number.

use crate::game::{ClientGameState, ClientPhase};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use shared::protocol::{encode_client_message, parse_server_message, ClientMessage};
use shared::{BIRD_X, DEFAULT_TICK_RATE, PLAY_AREA_HEIGHT};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    pub id: String,
    pub nickname: String,
    pub tick_rate: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080".to_string(),
            id: "bot".to_string(),
            nickname: "AnonBird".to_string(),
            tick_rate: DEFAULT_TICK_RATE,
        }
    }
}

pub struct Client {
    config: ClientConfig,
    state: ClientGameState,
    /// Ready was already sent for the current lobby visit.
    ready_sent: bool,
    /// Collision hint already reported for the current life.
    collision_reported: bool,
    last_reported_score: u32,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let state = ClientGameState::new(config.id.clone(), config.nickname.clone());
        Self {
            config,
            state,
            ready_sent: false,
            collision_reported: false,
            last_reported_score: 0,
        }
    }

    /// Connects, joins, and flies until the server goes away.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let (ws, _) = connect_async(&self.config.url).await?;
        info!("Connected to {}", self.config.url);
        let (mut sink, mut source) = ws.split();

        send(
            &mut sink,
            &ClientMessage::Join {
                id: self.config.id.clone(),
                nickname: self.config.nickname.clone(),
            },
        )
        .await?;

        let period = Duration::from_secs_f64(1.0 / self.config.tick_rate as f64);
        let mut prediction = interval(period);
        prediction.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        match parse_server_message(&text) {
                            Ok(msg) => self.on_server_message(&mut sink, msg).await?,
                            Err(e) => warn!("Unparseable server frame: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
                _ = prediction.tick() => {
                    self.on_prediction_tick(&mut sink).await?;
                }
            }
        }
    }

    async fn on_server_message(
        &mut self,
        sink: &mut WsSink,
        msg: shared::protocol::ServerMessage,
    ) -> Result<(), Box<dyn std::error::Error>> {
        use shared::protocol::ServerMessage;

        let was_game_over = self.state.phase == ClientPhase::GameOver;
        let is_match_over = matches!(msg, ServerMessage::MatchOver { .. });
        self.state.apply_server_message(msg);

        if is_match_over {
            if let Some(winner) = &self.state.winner_nickname {
                info!(
                    "Match over, winner: {} (our score {})",
                    winner,
                    self.state.local_player().score
                );
            }
            send(
                sink,
                &ClientMessage::ResetReady {
                    id: self.config.id.clone(),
                },
            )
            .await?;
            self.ready_sent = false;
            self.collision_reported = false;
            self.last_reported_score = 0;
            return Ok(());
        }

        if was_game_over && self.state.phase == ClientPhase::Lobby {
            debug!("Back in the lobby");
        }

        // Auto-pilot: ready up whenever we find ourselves unready in the
        // lobby, once per visit.
        if self.state.phase == ClientPhase::Lobby && !self.ready_sent {
            let unready = self
                .state
                .roster
                .iter()
                .any(|p| p.id == self.config.id && !p.is_ready);
            if unready {
                send(
                    sink,
                    &ClientMessage::Ready {
                        id: self.config.id.clone(),
                        is_ready: true,
                    },
                )
                .await?;
                self.ready_sent = true;
            }
        }

        Ok(())
    }

    async fn on_prediction_tick(
        &mut self,
        sink: &mut WsSink,
    ) -> Result<(), Box<dyn std::error::Error>> {
        self.state.predict_tick();

        if self.state.phase != ClientPhase::Playing || self.state.local_player().is_dead {
            return Ok(());
        }

        // Hover policy: flap whenever we are below the middle and falling.
        let me = self.state.local_player();
        if me.y > PLAY_AREA_HEIGHT / 2.0 && me.velocity_y > 0.0 {
            if let Some(tick) = self.state.flap() {
                send(
                    sink,
                    &ClientMessage::Flap {
                        id: self.config.id.clone(),
                        tick,
                    },
                )
                .await?;
            }
        }

        self.report_hints(sink).await
    }

    /// Advisory reports from local simulation. The server recomputes both
    /// and ignores anything that disagrees.
    async fn report_hints(&mut self, sink: &mut WsSink) -> Result<(), Box<dyn std::error::Error>> {
        let me = self.state.local_player().clone();

        if !self.collision_reported {
            let hit = me.out_of_bounds() || self.state.pipes().iter().any(|pipe| pipe.hits(&me));
            if hit {
                self.collision_reported = true;
                send(
                    sink,
                    &ClientMessage::Collision {
                        id: self.config.id.clone(),
                    },
                )
                .await?;
            }
        }

        let passed = self
            .state
            .pipes()
            .iter()
            .filter(|pipe| pipe.passed(BIRD_X))
            .count() as u32;
        if passed > self.last_reported_score {
            self.last_reported_score = passed;
            send(
                sink,
                &ClientMessage::ScoreUpdate {
                    id: self.config.id.clone(),
                    score: passed,
                },
            )
            .await?;
        }

        Ok(())
    }
}

async fn send(sink: &mut WsSink, msg: &ClientMessage) -> Result<(), Box<dyn std::error::Error>> {
    let text = encode_client_message(msg)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}
