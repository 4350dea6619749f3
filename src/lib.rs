//! Roulette-RS Library
//!
//! An anonymous chat roulette relay: clients arriving over TCP or WebSocket
//! are paired two at a time and their bytes are relayed until either leaves.

pub mod cli;
pub mod common;
pub mod config;
pub mod io;
pub mod listeners;
pub mod matchmaker;
pub mod relay;
pub mod server;

#[cfg(feature = "metrics")]
pub mod metrics;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::Config;
pub use io::ChatStream;
pub use matchmaker::Matchmaker;
pub use relay::relay;
pub use server::ChatServer;
