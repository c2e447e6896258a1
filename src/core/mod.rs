//! Core primitives shared by every arena component.
//!
//! Identifiers, the combat roller and the clock source.

pub mod ids;
pub mod rng;
pub mod clock;

// Re-export core types
pub use ids::{BattleId, ParticipantId};
pub use rng::{CombatRoller, DeterministicRng, derive_battle_seed};
pub use clock::{Clock, ManualClock, SystemClock, elapsed_between};
