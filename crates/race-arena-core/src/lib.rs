//! # race-arena-core
//!
//! Runtime-free core of race-arena: the room model, the host-side race
//! simulation, host arbitration, and guest-side prediction.
//!
//! ## Features
//!
//! - **Room model**: Rooms, participants and tagged racer payloads, serde-ready
//! - **Simulation**: Fixed-tick free-for-all and relay engines with status effects
//! - **Authority**: Host detection and mid-race takeover planning
//! - **Prediction**: Smooth guest rendering toward host-confirmed positions
//! - **Lifecycle**: Status transitions, start checks, countdown and rematch
//!
//! ## Example
//!
//! ```rust,ignore
//! use race_arena_core::{RaceEngine, ResumePlan, SimTuning, generate_seed};
//!
//! let mut engine = RaceEngine::new(&room, ResumePlan::fresh(), SimTuning::default(), generate_seed())?;
//! let mut elapsed = 0;
//! while !engine.is_finished() {
//!     elapsed += 16;
//!     if engine.tick(elapsed).push {
//!         service.update_game_state(&room.code, &engine.patch(now_ms())).await?;
//!     }
//! }
//! ```

pub mod arbiter;
pub mod clock;
pub mod effects;
pub mod engine;
pub mod error;
pub mod feed;
pub mod lifecycle;
pub mod predictor;
pub mod types;

#[cfg(test)]
mod testing;

pub use arbiter::{AuthorityArbiter, AuthorityChange, resume_plan};
pub use clock::{Clock, ManualClock, SystemClock, now_ms};
pub use effects::{EffectSpec, EffectTable, Roll};
pub use engine::{RaceEngine, ResumePlan, SimTuning, TickReport};
pub use error::{ArenaError, Result};
pub use feed::{FeedSource, Merge, PollCadence, RemovalReason};
pub use lifecycle::CountdownStep;
pub use predictor::GuestPredictor;
pub use types::*;
