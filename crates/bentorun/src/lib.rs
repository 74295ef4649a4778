//! # Bentorun
//!
//! A function server. Clients store source code, execute it as an isolated
//! process and attach to the running instance to exchange input and output.
//!
//! Each instance writes framed output records to an append-only log. The
//! connection attached to it tails that log and forwards records as function
//! messages, tracking a delivered cursor so a client can detach and reattach
//! without losing or repeating output.

pub mod client;
pub mod config;
pub mod connection;
pub mod instance;
pub mod log;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod mock_transport;
