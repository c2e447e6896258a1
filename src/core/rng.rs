//! Combat Randomness
//!
//! Every roll the battle engine makes (miss, critical, damage and heal
//! ranges) goes through [`CombatRoller`]. Live battles use a seeded
//! Xorshift128+ generator so a battle can be replayed from its seed.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

use super::ids::{BattleId, ParticipantId};

/// Source of combat rolls.
pub trait CombatRoller {
    /// Returns true with probability `percent / 100`.
    fn roll_percent(&mut self, percent: u32) -> bool;

    /// Uniform integer in `[min, max]` (inclusive).
    fn roll_range(&mut self, min: u32, max: u32) -> u32;
}

/// Deterministic PRNG using Xorshift128+ algorithm.
///
/// Given the same seed, this RNG produces the exact same sequence
/// of values on any platform.
///
/// # Example
///
/// ```
/// use duel_arena::core::rng::{CombatRoller, DeterministicRng};
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.roll_range(15, 25), b.roll_range(15, 25));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Ensure state is never all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Create the RNG for a battle from its id, fighters and a nonce.
    pub fn for_battle(battle_id: &BattleId, fighters: [ParticipantId; 2], nonce: u64) -> Self {
        Self::new(derive_battle_seed(battle_id, fighters, nonce))
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        // Simple modulo - slight bias for very large max, but acceptable
        (self.next_u64() % max as u64) as u32
    }
}

impl CombatRoller for DeterministicRng {
    #[inline]
    fn roll_percent(&mut self, percent: u32) -> bool {
        self.next_int(100) < percent
    }

    #[inline]
    fn roll_range(&mut self, min: u32, max: u32) -> u32 {
        if min >= max {
            return min;
        }
        min + self.next_int(max - min + 1)
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a battle seed.
///
/// Fighter ids are hashed in sorted order so the seed does not depend on
/// which side was listed first.
pub fn derive_battle_seed(battle_id: &BattleId, fighters: [ParticipantId; 2], nonce: u64) -> u64 {
    let mut sorted = fighters;
    sorted.sort();

    let mut hasher = Sha256::new();
    hasher.update(b"DUEL_ARENA_SEED_V1");
    hasher.update(battle_id.as_bytes());
    for id in sorted {
        hasher.update(id.0.to_le_bytes());
    }
    hasher.update(nonce.to_le_bytes());

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

/// Roller with forced outcomes.
///
/// Percent rolls pop from `chances` (false once exhausted), range rolls pop
/// from `values` clamped into the requested range (`min` once exhausted).
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct ScriptedRoller {
    pub chances: std::collections::VecDeque<bool>,
    pub values: std::collections::VecDeque<u32>,
}

#[cfg(test)]
impl ScriptedRoller {
    pub fn new(chances: &[bool], values: &[u32]) -> Self {
        Self {
            chances: chances.iter().copied().collect(),
            values: values.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
impl CombatRoller for ScriptedRoller {
    fn roll_percent(&mut self, _percent: u32) -> bool {
        self.chances.pop_front().unwrap_or(false)
    }

    fn roll_range(&mut self, min: u32, max: u32) -> u32 {
        self.values.pop_front().map(|v| v.clamp(min, max)).unwrap_or(min)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_roll_range_bounds() {
        let mut rng = DeterministicRng::new(5678);

        for _ in 0..1000 {
            let val = rng.roll_range(15, 25);
            assert!((15..=25).contains(&val));
        }

        assert_eq!(rng.roll_range(5, 5), 5);
        assert_eq!(rng.roll_range(9, 3), 9);
    }

    #[test]
    fn test_roll_percent_extremes() {
        let mut rng = DeterministicRng::new(42);

        for _ in 0..500 {
            assert!(!rng.roll_percent(0));
            assert!(rng.roll_percent(100));
        }
    }

    #[test]
    fn test_derive_battle_seed() {
        let battle = BattleId::from_bytes([1; 16]);
        let a = ParticipantId(10);
        let b = ParticipantId(20);

        let seed1 = derive_battle_seed(&battle, [a, b], 7);
        let seed2 = derive_battle_seed(&battle, [b, a], 7);
        assert_eq!(seed1, seed2);

        let seed3 = derive_battle_seed(&battle, [a, b], 8);
        assert_ne!(seed1, seed3);
    }

    #[test]
    fn test_scripted_roller_defaults() {
        let mut roller = ScriptedRoller::new(&[true], &[99]);
        assert!(roller.roll_percent(10));
        assert!(!roller.roll_percent(10));
        assert_eq!(roller.roll_range(15, 25), 25);
        assert_eq!(roller.roll_range(15, 25), 15);
    }
}
