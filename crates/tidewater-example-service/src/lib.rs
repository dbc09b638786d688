//! Tidewater example service — a tic-tac-toe aggregate wired to the engine.
//!
//! The library assembles registries, stores, services and the change-stream
//! router. The `tidewater-worker` binary runs the log reader that keeps the
//! game snapshots current.

pub mod config;
pub mod engine;
pub mod error;
pub mod tic_tac_toe;
