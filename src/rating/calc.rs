//! Rating Math
//!
//! Pure functions for rating deltas and experience. Deltas are tiered by
//! the HP each side finished with; long win streaks add a bonus to the
//! winner only.

use serde::{Serialize, Deserialize};

/// Tunables for rating and progression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingConfig {
    /// Rating of a fresh record.
    pub initial_rating: u32,
    /// HP fraction above which the top tier applies.
    pub high_hp_threshold: f64,
    /// HP fraction above which the middle tier applies.
    pub low_hp_threshold: f64,
    /// Delta magnitudes for the high, middle and low tiers.
    pub tier_deltas: [i32; 3],
    /// Streak (before this win) at which the bonus starts.
    pub streak_threshold: u32,
    /// Bonus per streak step past the threshold.
    pub streak_increment: i32,
    /// Human gain for beating the fallback bot.
    pub fallback_win_delta: i32,
    /// Human loss for losing to the fallback bot.
    pub fallback_loss_delta: i32,
    /// XP for a win.
    pub xp_win: u64,
    /// XP for a draw.
    pub xp_draw: u64,
    /// XP for a loss.
    pub xp_loss: u64,
    /// XP needed per level.
    pub xp_per_level: u64,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            initial_rating: 200,
            high_hp_threshold: 0.5,
            low_hp_threshold: 0.25,
            tier_deltas: [20, 15, 10],
            streak_threshold: 3,
            streak_increment: 2,
            fallback_win_delta: 5,
            fallback_loss_delta: -5,
            xp_win: 30,
            xp_draw: 15,
            xp_loss: 10,
            xp_per_level: 100,
        }
    }
}

/// Signed rating change for a winner and a loser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDeltas {
    /// Winner's change (positive).
    pub winner: i32,
    /// Loser's change (negative).
    pub loser: i32,
}

/// Delta magnitude for an HP fraction.
pub fn tier_delta(hp_fraction: f64, config: &RatingConfig) -> i32 {
    if hp_fraction > config.high_hp_threshold {
        config.tier_deltas[0]
    } else if hp_fraction > config.low_hp_threshold {
        config.tier_deltas[1]
    } else {
        config.tier_deltas[2]
    }
}

/// Bonus for a winner whose streak before this win is `streak_before`.
pub fn streak_bonus(streak_before: u32, config: &RatingConfig) -> i32 {
    if streak_before < config.streak_threshold {
        return 0;
    }
    (streak_before - config.streak_threshold + 1) as i32 * config.streak_increment
}

/// Deltas for a decided battle.
pub fn result_deltas(
    winner_hp_fraction: f64,
    loser_hp_fraction: f64,
    winner_streak_before: u32,
    config: &RatingConfig,
) -> ResultDeltas {
    ResultDeltas {
        winner: tier_delta(winner_hp_fraction, config) + streak_bonus(winner_streak_before, config),
        loser: -tier_delta(loser_hp_fraction, config),
    }
}

/// Apply a signed delta, flooring at zero.
pub fn apply_delta(rating: u32, delta: i32) -> u32 {
    if delta >= 0 {
        rating.saturating_add(delta as u32)
    } else {
        rating.saturating_sub(delta.unsigned_abs())
    }
}

/// Add XP and roll over into levels.
///
/// Returns `(xp, level, levels_gained)`.
pub fn add_experience(xp: u64, level: u32, gain: u64, per_level: u64) -> (u64, u32, u32) {
    let mut xp = xp + gain;
    let mut level = level;
    let mut gained = 0;
    if per_level == 0 {
        return (xp, level, gained);
    }
    while xp >= per_level {
        xp -= per_level;
        level += 1;
        gained += 1;
    }
    (xp, level, gained)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tiers() {
        let config = RatingConfig::default();
        assert_eq!(tier_delta(0.6, &config), 20);
        assert_eq!(tier_delta(0.5, &config), 15);
        assert_eq!(tier_delta(0.3, &config), 15);
        assert_eq!(tier_delta(0.25, &config), 10);
        assert_eq!(tier_delta(0.0, &config), 10);
    }

    #[test]
    fn test_decisive_win_against_low_hp_loser() {
        let config = RatingConfig::default();
        let deltas = result_deltas(0.6, 0.1, 0, &config);
        assert_eq!(deltas, ResultDeltas { winner: 20, loser: -10 });
    }

    #[test]
    fn test_streak_bonus() {
        let config = RatingConfig::default();
        assert_eq!(streak_bonus(0, &config), 0);
        assert_eq!(streak_bonus(2, &config), 0);
        assert_eq!(streak_bonus(3, &config), 2);
        assert_eq!(streak_bonus(5, &config), 6);

        let deltas = result_deltas(0.6, 0.1, 4, &config);
        assert_eq!(deltas.winner, 24);
        assert_eq!(deltas.loser, -10);
    }

    #[test]
    fn test_apply_delta_floor() {
        assert_eq!(apply_delta(200, 20), 220);
        assert_eq!(apply_delta(200, -15), 185);
        assert_eq!(apply_delta(5, -10), 0);
        assert_eq!(apply_delta(0, -20), 0);
    }

    #[test]
    fn test_add_experience_levels() {
        assert_eq!(add_experience(0, 1, 30, 100), (30, 1, 0));
        assert_eq!(add_experience(90, 1, 30, 100), (20, 2, 1));
        assert_eq!(add_experience(50, 3, 250, 100), (0, 6, 3));
    }

    proptest! {
        #[test]
        fn prop_deltas_have_opposite_signs(
            w in 0.0f64..=1.0,
            l in 0.0f64..=1.0,
            streak in 0u32..50,
        ) {
            let config = RatingConfig::default();
            let deltas = result_deltas(w, l, streak, &config);
            prop_assert!(deltas.winner > 0);
            prop_assert!(deltas.loser < 0);
            prop_assert!(config.tier_deltas.contains(&-deltas.loser));
        }

        #[test]
        fn prop_rating_never_negative(rating in 0u32..5000, delta in -10_000i32..10_000) {
            let after = apply_delta(rating, delta);
            if delta < 0 {
                prop_assert!(after <= rating);
            } else {
                prop_assert!(after >= rating);
            }
        }
    }
}
