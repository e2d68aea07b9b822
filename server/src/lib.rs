//! # Game Server Library
//!
//! Headless authoritative server for the multiplayer session. It hosts the
//! lobby, runs the start countdown, owns the canonical player entities and
//! broadcasts snapshots to every connected client.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Tick Loop
//! All session work happens on one fixed-rate tick. Socket I/O runs on tokio
//! tasks inside the transport, which only queue what they read; each tick
//! drains that queue, advances the lobby or the game, and moves the headless
//! world forward.
//!
//! ### Reliable Ordered Transport
//! Clients connect over TCP. Every frame carries a one-byte message type, the
//! sender's player id and a JSON payload.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! The [`network::Server`] tick loop around a `netcode::SessionManager`.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use netcode::NetConfig;
//! use server::network::Server;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new(NetConfig::default(), Duration::from_millis(16))?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod network;
