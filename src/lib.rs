//! # race-arena
//!
//! Host-authoritative multiplayer race rooms over an unreliable push channel
//! backed by polling.
//!
//! ## Features
//!
//! - **Room Service**: HTTP/SSE client, or an in-process backend for tests and offline play
//! - **Dual Feed**: Push notifications merged with a phase-paced poll loop
//! - **Host Migration**: A new host resumes a race in flight from its persisted start time
//! - **Simulation**: Tick-based free-for-all and relay races with status effects
//! - **Interpolation**: Guests ease toward host-confirmed positions every frame
//!
//! ## Example
//!
//! ```rust,ignore
//! use race_arena::{GameMode, LocalBackend, RaceSession, SessionConfig, SessionEvent};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = LocalBackend::new();
//!     let service = Arc::new(backend.service("player-1"));
//!
//!     let session =
//!         RaceSession::create(service, SessionConfig::new(), "Alice", 8, GameMode::FreeForAll)
//!             .await?;
//!     println!("Share this code: {}", session.code());
//!
//!     while let Some(event) = session.recv().await {
//!         match event {
//!             SessionEvent::Frame { racers, .. } => {
//!                 for racer in racers {
//!                     println!("{}: {:.1}", racer.id, racer.position);
//!                 }
//!             }
//!             SessionEvent::RaceFinished(results) => {
//!                 println!("Winner: {:?}", results.standings.first());
//!             }
//!             _ => {}
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod bridge;
#[cfg(feature = "http")]
pub mod client;
pub mod heartbeat;
pub mod local;
pub mod service;
pub mod session;
pub mod spawn;
pub mod sse;
pub mod time;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export core types
pub use race_arena_core::*;

#[cfg(feature = "http")]
pub use client::HttpRoomService;
pub use local::{LocalBackend, LocalRoomService};
pub use service::{PushEvent, RoomService, Subscription};
pub use session::{RaceResults, RaceSession, SessionEvent};
pub use time::RuntimeClock;
pub use types::{HttpConfig, SessionConfig};
