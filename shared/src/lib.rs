use serde::{Deserialize, Serialize};

pub mod protocol;

// Per-tick physics constants. One tick is one authoritative simulation step;
// both server authority and client prediction apply the same formula.
pub const GRAVITY: f32 = 0.25;
pub const FLAP_STRENGTH: f32 = -5.5;
pub const ANGLE_SCALE: f32 = 0.05;
pub const MAX_ANGLE: f32 = std::f32::consts::FRAC_PI_4;

pub const PLAY_AREA_WIDTH: f32 = 910.0;
pub const PLAY_AREA_HEIGHT: f32 = 512.0;

// All birds fly in the same column; only the vertical axis is simulated.
pub const BIRD_X: f32 = 50.0;
pub const BIRD_WIDTH: f32 = 34.0;
pub const BIRD_HEIGHT: f32 = 24.0;

pub const PIPE_WIDTH: f32 = 80.0;
pub const PIPE_GAP: f32 = 150.0;
pub const GAP_MARGIN: f32 = 50.0;

// Canonical obstacle cadence is defined in real time; per-tick values are
// derived from the tick rate so client and server agree for any rate.
pub const PIPE_SPEED_PER_SEC: f32 = 120.0;
pub const PIPE_INTERVAL_SECS: f32 = 2.0;

pub const DEFAULT_TICK_RATE: u32 = 20;
pub const DEFAULT_MAX_PLAYERS: usize = 8;
pub const COUNTDOWN_SECS: u32 = 3;
pub const LOBBY_RETURN_SECS: u64 = 5;

// Client reconciliation: snap to the authoritative position once the
// divergence exceeds this, keep the prediction otherwise.
pub const RECONCILE_TOLERANCE: f32 = 5.0;
pub const SNAPSHOT_WINDOW: usize = 60;

/// Horizontal distance a pipe travels per tick at the given tick rate.
pub fn pipe_step(tick_rate: u32) -> f32 {
    PIPE_SPEED_PER_SEC / tick_rate as f32
}

/// Ticks between pipe spawns at the given tick rate.
pub fn spawn_interval_ticks(tick_rate: u32) -> u64 {
    (PIPE_INTERVAL_SECS * tick_rate as f32).round().max(1.0) as u64
}

/// Display tilt derived from vertical velocity, clamped both ways.
pub fn tilt_angle(velocity_y: f32) -> f32 {
    (velocity_y * ANGLE_SCALE).clamp(-MAX_ANGLE, MAX_ANGLE)
}

/// Gameplay state of one bird. Doubles as the per-tick wire snapshot, so
/// server simulation and client prediction run on the identical struct.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub id: String,
    pub nickname: String,
    pub y: f32,
    pub velocity_y: f32,
    pub angle: f32,
    pub is_dead: bool,
    pub score: u32,
}

impl PlayerState {
    pub fn new(id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nickname: nickname.into(),
            y: PLAY_AREA_HEIGHT / 2.0,
            velocity_y: 0.0,
            angle: 0.0,
            is_dead: false,
            score: 0,
        }
    }

    /// One tick of gravity integration plus the derived tilt.
    pub fn step_physics(&mut self) {
        self.velocity_y += GRAVITY;
        self.y += self.velocity_y;
        self.angle = tilt_angle(self.velocity_y);
    }

    /// Instantaneous upward impulse.
    pub fn flap(&mut self) {
        self.velocity_y = FLAP_STRENGTH;
    }

    /// Back to the spawn point with gameplay fields cleared. Identity and
    /// nickname survive across matches.
    pub fn reset_for_match(&mut self) {
        self.y = PLAY_AREA_HEIGHT / 2.0;
        self.velocity_y = 0.0;
        self.angle = 0.0;
        self.is_dead = false;
        self.score = 0;
    }

    /// Bird rectangle as (left, top, right, bottom).
    pub fn bounds(&self) -> (f32, f32, f32, f32) {
        (
            BIRD_X - BIRD_WIDTH / 2.0,
            self.y - BIRD_HEIGHT / 2.0,
            BIRD_X + BIRD_WIDTH / 2.0,
            self.y + BIRD_HEIGHT / 2.0,
        )
    }

    /// True once any part of the bird leaves the vertical playable band.
    pub fn out_of_bounds(&self) -> bool {
        self.y - BIRD_HEIGHT / 2.0 < 0.0 || self.y + BIRD_HEIGHT / 2.0 > PLAY_AREA_HEIGHT
    }
}

/// A paired top/bottom barrier with a passable gap. `gap_y` is the vertical
/// center of the gap; the solid regions span the rest of the play area.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Pipe {
    pub id: u64,
    pub x: f32,
    pub gap_y: f32,
}

impl Pipe {
    pub fn gap_top(&self) -> f32 {
        self.gap_y - PIPE_GAP / 2.0
    }

    pub fn gap_bottom(&self) -> f32 {
        self.gap_y + PIPE_GAP / 2.0
    }

    /// AABB test of the bird against either solid region.
    pub fn hits(&self, player: &PlayerState) -> bool {
        let (left, top, right, bottom) = player.bounds();

        let horizontal = right > self.x && left < self.x + PIPE_WIDTH;
        if !horizontal {
            return false;
        }

        top < self.gap_top() || bottom > self.gap_bottom()
    }

    /// True once the pipe's right edge has crossed the given bird column.
    pub fn passed(&self, player_x: f32) -> bool {
        self.x + PIPE_WIDTH < player_x
    }

    /// True once the pipe is fully past the left edge of the play area.
    pub fn off_screen(&self) -> bool {
        self.x + PIPE_WIDTH < 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_player_creation() {
        let player = PlayerState::new("p1", "Bird");
        assert_eq!(player.id, "p1");
        assert_eq!(player.nickname, "Bird");
        assert_eq!(player.y, PLAY_AREA_HEIGHT / 2.0);
        assert_eq!(player.velocity_y, 0.0);
        assert!(!player.is_dead);
        assert_eq!(player.score, 0);
    }

    #[test]
    fn test_physics_step_matches_closed_form() {
        // After n steps from rest: v_n = n * g, y_n = y0 + g * n(n+1)/2.
        let mut player = PlayerState::new("p1", "Bird");
        let y0 = player.y;
        let n = 40;
        for _ in 0..n {
            player.step_physics();
        }

        let nf = n as f32;
        assert_approx_eq!(player.velocity_y, nf * GRAVITY, 1e-3);
        assert_approx_eq!(player.y, y0 + GRAVITY * nf * (nf + 1.0) / 2.0, 1e-2);
    }

    #[test]
    fn test_flap_resets_velocity() {
        let mut player = PlayerState::new("p1", "Bird");
        player.velocity_y = 4.0;
        player.flap();
        assert_eq!(player.velocity_y, FLAP_STRENGTH);
    }

    #[test]
    fn test_tilt_angle_clamped() {
        assert_approx_eq!(tilt_angle(2.0), 0.1, 1e-6);
        assert_eq!(tilt_angle(100.0), MAX_ANGLE);
        assert_eq!(tilt_angle(-100.0), -MAX_ANGLE);
    }

    #[test]
    fn test_out_of_bounds_band() {
        let mut player = PlayerState::new("p1", "Bird");
        assert!(!player.out_of_bounds());

        player.y = BIRD_HEIGHT / 2.0 - 1.0;
        assert!(player.out_of_bounds());

        player.y = PLAY_AREA_HEIGHT - BIRD_HEIGHT / 2.0 + 1.0;
        assert!(player.out_of_bounds());

        player.y = BIRD_HEIGHT / 2.0;
        assert!(!player.out_of_bounds());
    }

    #[test]
    fn test_reset_for_match_preserves_identity() {
        let mut player = PlayerState::new("p1", "Bird");
        player.y = 10.0;
        player.velocity_y = 3.0;
        player.is_dead = true;
        player.score = 7;

        player.reset_for_match();

        assert_eq!(player.id, "p1");
        assert_eq!(player.nickname, "Bird");
        assert_eq!(player.y, PLAY_AREA_HEIGHT / 2.0);
        assert_eq!(player.velocity_y, 0.0);
        assert!(!player.is_dead);
        assert_eq!(player.score, 0);
    }

    #[test]
    fn test_pipe_misses_bird_in_gap() {
        let mut player = PlayerState::new("p1", "Bird");
        let pipe = Pipe {
            id: 0,
            x: BIRD_X - PIPE_WIDTH / 2.0,
            gap_y: player.y,
        };
        player.y = pipe.gap_y;
        assert!(!pipe.hits(&player));
    }

    #[test]
    fn test_pipe_hits_top_and_bottom_regions() {
        let pipe = Pipe {
            id: 0,
            x: BIRD_X - PIPE_WIDTH / 2.0,
            gap_y: PLAY_AREA_HEIGHT / 2.0,
        };

        let mut player = PlayerState::new("p1", "Bird");
        player.y = pipe.gap_top() - 1.0;
        assert!(pipe.hits(&player));

        player.y = pipe.gap_bottom() + 1.0;
        assert!(pipe.hits(&player));
    }

    #[test]
    fn test_pipe_misses_when_horizontally_clear() {
        let mut player = PlayerState::new("p1", "Bird");
        player.y = 10.0; // well inside the top solid band
        let pipe = Pipe {
            id: 0,
            x: BIRD_X + BIRD_WIDTH, // right of the bird, no overlap
            gap_y: PLAY_AREA_HEIGHT / 2.0,
        };
        assert!(!pipe.hits(&player));
    }

    #[test]
    fn test_pipe_passed_and_off_screen() {
        let mut pipe = Pipe {
            id: 0,
            x: BIRD_X - PIPE_WIDTH - 1.0,
            gap_y: 200.0,
        };
        assert!(pipe.passed(BIRD_X));
        assert!(!pipe.off_screen());

        pipe.x = -PIPE_WIDTH - 0.5;
        assert!(pipe.off_screen());
    }

    #[test]
    fn test_cadence_derivation() {
        // 20 Hz: 6 px per tick, one spawn every 40 ticks.
        assert_approx_eq!(pipe_step(20), 6.0, 1e-6);
        assert_eq!(spawn_interval_ticks(20), 40);

        // Any rate preserves the same real-time cadence.
        assert_approx_eq!(pipe_step(60) * 60.0, pipe_step(20) * 20.0, 1e-3);
        assert_eq!(spawn_interval_ticks(60), 120);
    }
}
