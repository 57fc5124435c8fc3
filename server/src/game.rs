//! Authoritative match state: the lobby/countdown/playing/gameover machine,
//! the per-tick simulation, and obstacle bookkeeping. All mutation happens
//! through this aggregate from the single-consumer event loop; nothing here
//! touches the network.

use log::info;
use rand::Rng;
use shared::protocol::LobbyPlayer;
use shared::{
    pipe_step, spawn_interval_ticks, Pipe, PlayerState, BIRD_X, GAP_MARGIN, PIPE_GAP,
    PLAY_AREA_HEIGHT, PLAY_AREA_WIDTH,
};
use std::collections::{HashMap, HashSet};

/// Match lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Lobby,
    Countdown,
    Playing,
    GameOver,
}

/// One connected player's gameplay entity. The body doubles as the wire
/// snapshot; readiness and the flap watermark are server-only.
#[derive(Debug)]
pub struct Actor {
    pub state: PlayerState,
    pub is_ready: bool,
    last_flap_seq: Option<u64>,
}

impl Actor {
    fn new(id: &str, nickname: &str) -> Self {
        Self {
            state: PlayerState::new(id, nickname),
            is_ready: false,
            last_flap_seq: None,
        }
    }

    /// Applies a flap iff the sequence exceeds the watermark. Stale or
    /// duplicate sequences are dropped without effect.
    fn try_flap(&mut self, seq: u64) -> bool {
        if let Some(last) = self.last_flap_seq {
            if seq <= last {
                return false;
            }
        }
        self.last_flap_seq = Some(seq);
        self.state.flap();
        true
    }
}

/// A live pipe plus the actors already credited for passing it. The credit
/// set makes scoring idempotent per (actor, pipe) pair.
#[derive(Debug)]
struct Obstacle {
    pipe: Pipe,
    credited: HashSet<String>,
}

/// Final result of a match, ready for the `matchOver` broadcast.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub winner_nickname: String,
    pub players: Vec<PlayerState>,
}

/// What one authoritative tick produced.
#[derive(Debug)]
pub struct TickReport {
    pub tick: u64,
    pub deaths: Vec<(String, u32)>,
    pub outcome: Option<MatchOutcome>,
}

/// The single shared room. Owns every actor and obstacle; sessions own only
/// their transports.
pub struct Match {
    phase: MatchPhase,
    /// Bumped on every phase transition; scheduled timers carry the value
    /// they observed and are ignored if it no longer matches.
    generation: u64,
    tick: u64,
    tick_rate: u32,
    actors: HashMap<String, Actor>,
    obstacles: Vec<Obstacle>,
    next_pipe_id: u64,
    spawn_counter: u64,
}

impl Match {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            phase: MatchPhase::Lobby,
            generation: 0,
            tick: 0,
            tick_rate,
            actors: HashMap::new(),
            obstacles: Vec::new(),
            next_pipe_id: 0,
            spawn_counter: 0,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn contains_actor(&self, id: &str) -> bool {
        self.actors.contains_key(id)
    }

    pub fn actor_score(&self, id: &str) -> Option<u32> {
        self.actors.get(id).map(|a| a.state.score)
    }

    /// Adds an actor, or takes over the existing entity on rejoin with the
    /// nickname refreshed and gameplay state untouched. A fresh actor
    /// arriving while a match is running sits the rest of it out as a dead
    /// spectator so it cannot affect game-over accounting.
    pub fn add_actor(&mut self, id: &str, nickname: &str) {
        if let Some(actor) = self.actors.get_mut(id) {
            actor.state.nickname = nickname.to_string();
            info!("Player {} ({}) rejoined", actor.state.nickname, id);
            return;
        }

        let mut actor = Actor::new(id, nickname);
        if self.phase != MatchPhase::Lobby {
            actor.state.is_dead = true;
        }
        self.actors.insert(id.to_string(), actor);
        info!("Player {} ({}) joined", nickname, id);
    }

    /// Deletes the actor. During Playing this is death-equivalent and may
    /// end the match; during Countdown a room emptied of actors falls back
    /// to the lobby, invalidating the pending countdown timer.
    pub fn remove_actor(&mut self, id: &str) -> Option<MatchOutcome> {
        if self.actors.remove(id).is_none() {
            return None;
        }
        info!("Player {} left", id);

        match self.phase {
            MatchPhase::Playing => self.check_game_over(),
            MatchPhase::Countdown if self.actors.is_empty() => {
                self.phase = MatchPhase::Lobby;
                self.generation += 1;
                None
            }
            _ => None,
        }
    }

    /// Readiness only matters in the lobby; flips elsewhere are recorded but
    /// cannot start a match.
    pub fn set_ready(&mut self, id: &str, ready: bool) -> bool {
        match self.actors.get_mut(id) {
            Some(actor) => {
                actor.is_ready = ready;
                true
            }
            None => false,
        }
    }

    /// Post-match acknowledgment: clears readiness and per-match fields.
    /// Ignored while a match is in progress.
    pub fn reset_ready(&mut self, id: &str) -> bool {
        if matches!(self.phase, MatchPhase::Countdown | MatchPhase::Playing) {
            return false;
        }
        match self.actors.get_mut(id) {
            Some(actor) => {
                actor.is_ready = false;
                actor.state.is_dead = false;
                actor.state.score = 0;
                true
            }
            None => false,
        }
    }

    /// `lobby -> countdown` when the room is non-empty and everyone is
    /// ready. Resets all gameplay state and returns the new generation for
    /// arming the countdown timer.
    pub fn start_countdown(&mut self) -> Option<u64> {
        if self.phase != MatchPhase::Lobby {
            return None;
        }
        if self.actors.is_empty() || !self.actors.values().all(|a| a.is_ready) {
            return None;
        }

        self.tick = 0;
        self.obstacles.clear();
        self.next_pipe_id = 0;
        self.spawn_counter = 0;
        for actor in self.actors.values_mut() {
            actor.state.reset_for_match();
            actor.last_flap_seq = None;
        }

        self.phase = MatchPhase::Countdown;
        self.generation += 1;
        info!("All players ready, starting countdown");
        Some(self.generation)
    }

    /// `countdown -> playing`, guarded against a stale timer: the phase must
    /// still be Countdown and the generation must match the value observed
    /// when the timer was armed.
    pub fn begin_playing(&mut self, generation: u64) -> bool {
        if self.phase != MatchPhase::Countdown || self.generation != generation {
            return false;
        }
        self.phase = MatchPhase::Playing;
        self.generation += 1;
        info!("Match started");
        true
    }

    /// `gameover -> lobby`, with the same stale-timer guard. Obstacles are
    /// cleared and surviving actors keep identity and nickname only.
    pub fn return_to_lobby(&mut self, generation: u64) -> bool {
        if self.phase != MatchPhase::GameOver || self.generation != generation {
            return false;
        }
        self.obstacles.clear();
        for actor in self.actors.values_mut() {
            actor.is_ready = false;
            actor.state.is_dead = false;
            actor.state.score = 0;
        }
        self.phase = MatchPhase::Lobby;
        self.generation += 1;
        info!("Returning to lobby");
        true
    }

    /// Watermark-ordered flap. Stale input is silently dropped.
    pub fn apply_flap(&mut self, id: &str, seq: u64) -> bool {
        if self.phase != MatchPhase::Playing {
            return false;
        }
        match self.actors.get_mut(id) {
            Some(actor) if !actor.state.is_dead => actor.try_flap(seq),
            _ => false,
        }
    }

    /// Spawns an obstacle at the right edge with the given gap center.
    pub fn spawn_obstacle(&mut self, gap_y: f32) {
        self.obstacles.push(Obstacle {
            pipe: Pipe {
                id: self.next_pipe_id,
                x: PLAY_AREA_WIDTH,
                gap_y,
            },
            credited: HashSet::new(),
        });
        self.next_pipe_id += 1;
    }

    fn spawn_random_obstacle(&mut self) {
        let lo = GAP_MARGIN + PIPE_GAP / 2.0;
        let hi = PLAY_AREA_HEIGHT - GAP_MARGIN - PIPE_GAP / 2.0;
        let gap_y = rand::thread_rng().gen_range(lo..hi);
        self.spawn_obstacle(gap_y);
    }

    /// One authoritative simulation step: advance and retire obstacles, then
    /// integrate, collide, and score every live actor, then re-evaluate the
    /// game-over condition.
    pub fn advance_tick(&mut self) -> TickReport {
        self.tick += 1;

        self.spawn_counter += 1;
        if self.spawn_counter >= spawn_interval_ticks(self.tick_rate) {
            self.spawn_counter = 0;
            self.spawn_random_obstacle();
        }

        let step = pipe_step(self.tick_rate);
        for obstacle in &mut self.obstacles {
            obstacle.pipe.x -= step;
        }
        self.obstacles.retain(|o| !o.pipe.off_screen());

        let mut deaths = Vec::new();
        let Self {
            actors, obstacles, ..
        } = self;
        for actor in actors.values_mut() {
            if actor.state.is_dead {
                continue;
            }

            actor.state.step_physics();

            let killed = actor.state.out_of_bounds()
                || obstacles.iter().any(|o| o.pipe.hits(&actor.state));
            if killed {
                actor.state.is_dead = true;
                info!(
                    "Player {} died with score {}",
                    actor.state.nickname, actor.state.score
                );
                deaths.push((actor.state.id.clone(), actor.state.score));
                continue;
            }

            for obstacle in obstacles.iter_mut() {
                if obstacle.pipe.passed(BIRD_X) && !obstacle.credited.contains(&actor.state.id) {
                    actor.state.score += 1;
                    obstacle.credited.insert(actor.state.id.clone());
                }
            }
        }

        let outcome = self.check_game_over();
        TickReport {
            tick: self.tick,
            deaths,
            outcome,
        }
    }

    /// `playing -> gameover` once at most one actor is alive. The sole
    /// survivor wins; with zero survivors no one does.
    pub fn check_game_over(&mut self) -> Option<MatchOutcome> {
        if self.phase != MatchPhase::Playing {
            return None;
        }

        let alive: Vec<&Actor> = self.actors.values().filter(|a| !a.state.is_dead).collect();
        if alive.len() > 1 {
            return None;
        }

        let winner_nickname = match alive.first() {
            Some(actor) => actor.state.nickname.clone(),
            None => "No one".to_string(),
        };
        self.phase = MatchPhase::GameOver;
        self.generation += 1;
        info!("Match over, winner: {}", winner_nickname);

        Some(MatchOutcome {
            winner_nickname,
            players: self.player_snapshots(),
        })
    }

    pub fn lobby_snapshot(&self) -> Vec<LobbyPlayer> {
        self.actors
            .values()
            .map(|a| LobbyPlayer {
                id: a.state.id.clone(),
                nickname: a.state.nickname.clone(),
                is_ready: a.is_ready,
                is_dead: a.state.is_dead,
                score: a.state.score,
            })
            .collect()
    }

    pub fn player_snapshots(&self) -> Vec<PlayerState> {
        self.actors.values().map(|a| a.state.clone()).collect()
    }

    pub fn pipe_snapshots(&self) -> Vec<Pipe> {
        self.obstacles.iter().map(|o| o.pipe.clone()).collect()
    }
}
