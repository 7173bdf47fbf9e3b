//! Transparent MITM proxy for Minecraft 1.9.4 (protocol 110)
//!
//! Sits between a vanilla client and an upstream server, owning the
//! compression and encryption the upstream negotiates so the client never
//! sees either, and rewriting Entity Velocity packets on the way through.
//!
//! Layering:
//! - `codec` / `compression` / `crypto`: wire primitives
//! - `protocol`: the handful of typed packets the proxy cares about
//! - `stream`: framed reader/writer with splice points for the negotiated state
//! - `session`: per-connection state machine and relay
//! - `velocity` / `auth` / `console`: shared state driven by the operator
//! - `server_runner`: listener and accept loop

pub mod auth;
pub mod codec;
pub mod compression;
pub mod config;
pub mod console;
pub mod crypto;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod server_runner;
pub mod session;
pub mod stream;
pub mod velocity;
