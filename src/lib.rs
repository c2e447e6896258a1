//! # Duel Arena
//!
//! Core of a turn-based PvP arena: rating-band matchmaking, a simultaneous
//! action battle engine and a durable rating and progression ledger.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        DUEL ARENA                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── ids.rs      - Participant and battle identifiers        │
//! │  ├── rng.rs      - Seeded Xorshift128+ combat roller         │
//! │  └── clock.rs    - System and manual clocks                  │
//! │                                                              │
//! │  battle/         - Combat (deterministic given a seed)       │
//! │  ├── fighter.rs  - Per-battle fighter state                  │
//! │  ├── engine.rs   - Round resolution and end conditions       │
//! │  ├── trace.rs    - Round summaries                           │
//! │  └── registry.rs - Active battles and the expiry sweeper     │
//! │                                                              │
//! │  matchmaking/    - Search tickets and pairing                │
//! │  rating/         - Deltas, progression and the ledger        │
//! │                                                              │
//! │  arena/          - Orchestration and transport               │
//! │  ├── service.rs  - Commands, settlement, ticker              │
//! │  ├── protocol.rs - Wire messages                             │
//! │  ├── bot.rs      - Fallback opponent                         │
//! │  ├── auth.rs     - JWT logins                                │
//! │  └── gateway.rs  - WebSocket gateway                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Consistency
//!
//! - Each battle sits behind its own mutex; a round resolves at most once
//! - Pairing removes both tickets under the queue lock
//! - A battle is settled exactly once, whoever ends it
//! - All combat randomness comes from a per-battle seed, so any battle
//!   replays identically from its seed and action log

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod battle;
pub mod matchmaking;
pub mod rating;
pub mod arena;
pub mod config;

// Re-export commonly used types
pub use core::{BattleId, ParticipantId, DeterministicRng, Clock, SystemClock, ManualClock};
pub use battle::{Action, Battle, BattleConfig, BattleOutcome, EndReason};
pub use matchmaking::{MatchmakingQueue, QueueConfig, QueueTicket};
pub use rating::{RatingConfig, RatingRecord, RatingStore};
pub use arena::{ArenaCommand, ArenaEvent, ArenaService};
pub use config::ArenaConfig;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
