//! # Headless Game Client
//!
//! A client without a window. It connects to a server, readies up in the
//! lobby and, once the game starts, steers its player with a scripted
//! autopilot while painting behind it. Useful for filling a lobby and for
//! soak-testing a server.
//!
//! ## Module Organization
//!
//! ### Input Module (`input`)
//! [`input::Autopilot`] replays a steering pattern and reports only flag
//! changes, so the session sends an input packet only when steering changes.
//!
//! ### Network Module (`network`)
//! [`network::Client`] runs the tick loop around a `netcode::SessionManager`
//! and a `netcode::HeadlessWorld`.

pub mod input;
pub mod network;
