//! Client-side prediction and server reconciliation for tick-based games
//!
//! A client applies its own commands to the game state immediately and keeps
//! a history of those predictions. When the authoritative server state for a
//! tick arrives, the engine diffs it against the previous server state, scores
//! the divergence, and either replays the still-pending commands on top of the
//! server state or rolls back and replays only the recent ones.
//!
//! - [`diff`]: JSON Patch style structural diff and patch over state trees
//! - [`engine`]: snapshot history, divergence scoring, predictors, reconciler
//! - [`session`]: hosting the engine behind a mutex or a channel-driven task
//! - [`sim`]: simulated authoritative server used by the `prediction-sim` binary

pub mod config;
pub mod diff;
pub mod engine;
pub mod protocol;
pub mod session;
pub mod sim;
pub mod util;
