//! # Match Server Library
//!
//! Authoritative server for the multiplayer flappy royale game. The server
//! owns the only real copy of the game: clients predict locally, but every
//! position, death, and score that matters is computed here and broadcast
//! back as snapshots.
//!
//! ## Architecture
//!
//! ### Single-Consumer Event Loop
//! All gameplay mutation happens on one `tokio::select!` loop. Connection
//! tasks parse WebSocket frames and forward typed messages over a channel;
//! the loop applies them between ticks, so no lock ever guards the match
//! state and message handling never races the simulation.
//!
//! ### Fixed-Tick Simulation
//! While a match is playing, a fixed-rate interval drives the simulation:
//! gravity integration, obstacle movement and spawning, collision and
//! bounds checks, and pass-based scoring, in that order, once per tick.
//! The tick loop is armed on entering the playing phase and disarmed on
//! leaving it.
//!
//! ### Generation-Tagged Timers
//! Phase transitions driven by wall-clock delays (countdown, return to
//! lobby) are spawned as sleep tasks carrying the match generation at arm
//! time. A timer whose generation no longer matches is a no-op, so an
//! aborted countdown or an early restart can never fire a stale transition.
//!
//! ## Module Organization
//!
//! - [`game`]: match state machine, actors, obstacles, and the per-tick
//!   simulation. Pure and synchronous; every rule is testable without a
//!   socket.
//! - [`registry`]: session registry mapping transports to player
//!   identities, with latest-connection-wins rejoin and broadcast fan-out.
//! - [`network`]: WebSocket accept loop, per-connection tasks, and the
//!   event loop tying the other two together.

pub mod game;
pub mod network;
pub mod registry;
