//! # Game Server Session Library
//!
//! This library models the server side of a client connection to a
//! multiplayer game server: its protocol state, the buffering of packets that
//! arrive between ticks, keepalive and timeout policy, and the sequencing of
//! kicks, logins and player teardown.
//!
//! ## Core Responsibilities
//!
//! ### Protocol State
//! Every connection starts in the handshake phase and moves forward through
//! status or login into play. The current state picks the handler table a
//! packet is dispatched against, and decides whether a disconnect can carry a
//! structured kick message.
//!
//! ### Tick-Driven Processing
//! Packets are received asynchronously but interpreted only once per server
//! tick. All game-state mutation for a session therefore happens on the tick
//! loop, no matter which task the bytes arrived on.
//!
//! ### Player Lifecycle
//! Login, join, kick and quit are routed through [`hooks::ServerHooks`], which
//! may deny a login or cancel a kick before anything changes.
//!
//! ## Module Organization
//!
//! ### Session Module (`session`)
//! The per-connection core: state, inbound queue, keepalive bookkeeping,
//! player attachment, disconnect and disposal.
//!
//! ### Dispatch Module (`dispatch`)
//! The `DispatchTable` and `HandlerSet` seams and the standard `MessageMap`.
//!
//! ### Handlers Module (`handlers`)
//! The default handler set used by the bundled server.
//!
//! ### Transport Module (`transport`)
//! The outbound `Transport` seam, length-prefixed framing and the TCP
//! implementation with close-after-delivery semantics.
//!
//! ### Network Module (`network`)
//! Connection acceptance, per-connection reader tasks and the fixed-rate
//! tick loop that owns every session.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::bind(ServerConfig {
//!         bind_address: "127.0.0.1:25565".to_string(),
//!         tick_duration: Duration::from_millis(50), // 20 ticks per second
//!         ..Default::default()
//!     })
//!     .await?;
//!
//!     // Accepts connections, pulses every session once per tick and
//!     // removes sessions whose connections close.
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod hooks;
pub mod network;
pub mod session;
pub mod transport;
pub mod world;
