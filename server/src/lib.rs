//! # Relay Server Library
//!
//! This library provides the authoritative session server for the networked
//! two-dot game. It keeps track of every connected client, relays their action
//! messages to the other players, and evicts connections that fall silent.
//!
//! ## Core Responsibilities
//!
//! ### Session Management
//! Handles the complete lifecycle of client connections:
//! - Admission up to a fixed capacity, with ids that are never reused
//! - Activity tracking on every received message
//! - Graceful disconnects, peer closes and idle eviction
//!
//! ### Message Relay
//! Client messages are forwarded byte for byte. The server only reads the
//! leading type tag (and the target id of shots) to decide who receives them:
//! - `1` moves go to every other client
//! - `2` disconnects go to every other client before the sender is removed
//! - `3 <id>` shots go only to the client they hit
//!
//! ### Display Events
//! Moves and shots also nudge the opponent on the server's own display. The
//! core never owns that state; it emits [`events::GameEvent`]s on a channel
//! and whatever renders the game applies them.
//!
//! ## Architecture Design
//!
//! ### Single Owning Loop
//! One loop task owns the [`registry::SessionRegistry`]. Each tick it admits
//! at most one new connection, dispatches every message received since the
//! previous tick, then runs the idle reaper. Per-connection reader and writer
//! tasks only talk to the loop through channels, so no locking is needed.
//!
//! ### Non-Blocking Sends
//! Outbound payloads are queued with `try_send`. A peer that is gone or not
//! draining its queue is scheduled for removal instead of stalling the tick.
//!
//! ## Module Organization
//!
//! - `config`: [`config::ServerConfig`] and its protocol defaults
//! - `registry`: sessions, their links and the capacity-bounded registry
//! - `dispatcher`: per-message handling
//! - `reaper`: idle and failed-peer eviction
//! - `network`: listener, connection tasks and the server loop
//! - `events`: display events
//! - `error`: [`error::ServerError`]
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (server, mut events) = Server::bind(ServerConfig::default()).await?;
//!     let handle = server.handle();
//!
//!     tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             println!("{:?}", event);
//!         }
//!     });
//!
//!     tokio::spawn(async move {
//!         let _ = tokio::signal::ctrl_c().await;
//!         handle.shutdown();
//!     });
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod network;
pub mod reaper;
pub mod registry;
