//! # Game Client Library
//!
//! Client for the multiplayer flappy royale game. The client runs the same
//! per-tick physics as the server to predict its own bird, sends flaps
//! tagged with the prediction tick, and reconciles against authoritative
//! snapshots as they arrive.
//!
//! ## Module Organization
//!
//! - [`game`]: predicted local state, the bounded snapshot window, and the
//!   reconciliation rule (snap only past the divergence tolerance).
//! - [`network`]: WebSocket transport and the headless pilot loop driving
//!   prediction at the server's tick rate.

pub mod game;
pub mod network;
