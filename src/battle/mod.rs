//! Battle Module
//!
//! Fighters, the round-resolution engine and the registry of in-flight
//! battles.
//!
//! ## Module Structure
//!
//! - `fighter`: Per-battle combat state and actions
//! - `engine`: Battle state machine and combat math
//! - `trace`: Round summaries for rendering and tests
//! - `registry`: Active battles and the expiry sweeper

pub mod fighter;
pub mod engine;
pub mod trace;
pub mod registry;

// Re-export key types
pub use fighter::{Action, ComboKind, Fighter, FighterSnapshot};
pub use engine::{
    Battle, BattleConfig, BattleError, BattleOutcome, BattleResult, BattleStatus,
    EndReason, RoundResolution,
};
pub use trace::{RoundEvent, RoundSummary};
pub use registry::{ActiveBattleRegistry, BattleHandle};
