//! Fighter State
//!
//! Per-battle combat state for one side. Created when a battle starts,
//! mutated only during round resolution, dropped when the battle ends.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

use crate::core::ids::ParticipantId;

/// Length of the rolling action history used for combo detection.
pub const ACTION_HISTORY_LEN: usize = 3;

// =============================================================================
// ACTIONS
// =============================================================================

/// One of the three round actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Deal damage to the opponent.
    Attack,
    /// Reduce incoming damage this round.
    Defend,
    /// Restore own HP.
    Heal,
}

impl Action {
    /// All actions, in menu order.
    pub const ALL: [Action; 3] = [Action::Attack, Action::Defend, Action::Heal];

    /// The combo this action can build, if any.
    pub fn combo_kind(self) -> Option<ComboKind> {
        match self {
            Action::Attack => Some(ComboKind::Attack),
            Action::Heal => Some(ComboKind::Heal),
            Action::Defend => None,
        }
    }
}

/// Combo primed by three identical consecutive actions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComboKind {
    /// Next attack is empowered and inflicts bleed.
    Attack,
    /// Next heal is empowered and grants regeneration.
    Heal,
}

// =============================================================================
// FIGHTER
// =============================================================================

/// Combat state of one side of a battle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fighter {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Name shown by the presentation layer.
    pub display_name: String,
    /// Maximum HP.
    pub max_hp: u32,
    /// Current HP, always in `0..=max_hp`.
    pub current_hp: u32,
    /// Armor, decays as it absorbs damage.
    pub armor: u32,
    /// Remaining bleed turns.
    pub bleed_turns: u32,
    /// Remaining regeneration turns.
    pub regen_turns: u32,
    /// Defending this round.
    pub defending: bool,
    /// Consecutive defend actions.
    pub defend_streak: u32,
    /// Last few actions, oldest first.
    pub last_actions: VecDeque<Action>,
    /// Primed combo, consumed by the next matching action.
    pub combo_ready: Option<ComboKind>,
    /// Landed attacks counted towards the attack lock.
    pub empowered_attacks_used: u32,
    /// Turns left before attack is available again.
    pub actions_until_attack_unlocked: u32,
    /// Damage taken from the last hit.
    pub last_damage_taken: u32,
    /// Total damage dealt this battle.
    pub damage_dealt: u32,
    /// Total HP restored this battle.
    pub healing_done: u32,
    /// Controlled by the fallback bot.
    pub is_bot: bool,
}

impl Fighter {
    /// Create a fresh fighter at full HP.
    pub fn new(id: ParticipantId, display_name: impl Into<String>, max_hp: u32, armor: u32) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            max_hp,
            current_hp: max_hp,
            armor,
            bleed_turns: 0,
            regen_turns: 0,
            defending: false,
            defend_streak: 0,
            last_actions: VecDeque::with_capacity(ACTION_HISTORY_LEN),
            combo_ready: None,
            empowered_attacks_used: 0,
            actions_until_attack_unlocked: 0,
            last_damage_taken: 0,
            damage_dealt: 0,
            healing_done: 0,
            is_bot: id.is_fallback_bot(),
        }
    }

    /// Check if fighter still has HP.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.current_hp > 0
    }

    /// Current HP as a fraction of max HP.
    pub fn hp_fraction(&self) -> f64 {
        if self.max_hp == 0 {
            return 0.0;
        }
        self.current_hp as f64 / self.max_hp as f64
    }

    /// Whether the attack action is currently locked.
    #[inline]
    pub fn attack_locked(&self) -> bool {
        self.actions_until_attack_unlocked > 0
    }

    /// Actions the fighter may choose this round.
    pub fn available_actions(&self) -> Vec<Action> {
        Action::ALL
            .into_iter()
            .filter(|a| *a != Action::Attack || !self.attack_locked())
            .collect()
    }

    /// Lose HP, flooring at zero. Returns the HP actually lost.
    pub fn take_damage(&mut self, amount: u32) -> u32 {
        let lost = amount.min(self.current_hp);
        self.current_hp -= lost;
        lost
    }

    /// Gain HP, capped at max. Returns the HP actually restored.
    pub fn restore_hp(&mut self, amount: u32) -> u32 {
        let gained = amount.min(self.max_hp - self.current_hp);
        self.current_hp += gained;
        self.healing_done += gained;
        gained
    }

    /// Update defend flags from this round's action.
    pub fn record_stance(&mut self, action: Action) {
        if action == Action::Defend {
            self.defending = true;
            self.defend_streak += 1;
        } else {
            self.defending = false;
            self.defend_streak = 0;
        }
    }

    /// Push an action into the rolling history.
    ///
    /// Returns the combo primed by this action, if the history now holds
    /// three identical attack or heal actions.
    pub fn record_action(&mut self, action: Action) -> Option<ComboKind> {
        if self.last_actions.len() == ACTION_HISTORY_LEN {
            self.last_actions.pop_front();
        }
        self.last_actions.push_back(action);

        let full = self.last_actions.len() == ACTION_HISTORY_LEN;
        if full && self.last_actions.iter().all(|a| *a == action) {
            if let Some(kind) = action.combo_kind() {
                self.combo_ready = Some(kind);
                return Some(kind);
            }
        }
        None
    }

    /// Consume a primed combo of the given kind.
    ///
    /// Clears the action history so the next combo needs a fresh run of three.
    pub fn take_combo(&mut self, kind: ComboKind) -> bool {
        if self.combo_ready == Some(kind) {
            self.combo_ready = None;
            self.last_actions.clear();
            true
        } else {
            false
        }
    }

    /// Snapshot for outbound events.
    pub fn snapshot(&self) -> FighterSnapshot {
        FighterSnapshot {
            id: self.id,
            display_name: self.display_name.clone(),
            max_hp: self.max_hp,
            current_hp: self.current_hp,
            armor: self.armor,
            bleed_turns: self.bleed_turns,
            regen_turns: self.regen_turns,
            combo_ready: self.combo_ready,
            attack_locked_for: self.actions_until_attack_unlocked,
            is_bot: self.is_bot,
        }
    }
}

/// Read-only view of a fighter for the presentation layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FighterSnapshot {
    /// Participant identifier.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Maximum HP.
    pub max_hp: u32,
    /// Current HP.
    pub current_hp: u32,
    /// Remaining armor.
    pub armor: u32,
    /// Remaining bleed turns.
    pub bleed_turns: u32,
    /// Remaining regeneration turns.
    pub regen_turns: u32,
    /// Primed combo.
    pub combo_ready: Option<ComboKind>,
    /// Turns before attack unlocks.
    pub attack_locked_for: u32,
    /// Controlled by the fallback bot.
    pub is_bot: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fighter() -> Fighter {
        Fighter::new(ParticipantId(1), "Alice", 100, 0)
    }

    #[test]
    fn test_new_fighter_full_hp() {
        let f = fighter();
        assert_eq!(f.current_hp, 100);
        assert!(f.is_alive());
        assert!(!f.is_bot);
        assert_eq!(f.available_actions(), Action::ALL.to_vec());
    }

    #[test]
    fn test_take_damage_floors_at_zero() {
        let mut f = fighter();
        assert_eq!(f.take_damage(30), 30);
        assert_eq!(f.take_damage(500), 70);
        assert_eq!(f.current_hp, 0);
        assert!(!f.is_alive());
    }

    #[test]
    fn test_restore_hp_caps_at_max() {
        let mut f = fighter();
        f.take_damage(10);
        assert_eq!(f.restore_hp(25), 10);
        assert_eq!(f.current_hp, 100);
        assert_eq!(f.healing_done, 10);
    }

    #[test]
    fn test_defend_streak() {
        let mut f = fighter();
        f.record_stance(Action::Defend);
        f.record_stance(Action::Defend);
        assert!(f.defending);
        assert_eq!(f.defend_streak, 2);

        f.record_stance(Action::Heal);
        assert!(!f.defending);
        assert_eq!(f.defend_streak, 0);
    }

    #[test]
    fn test_combo_needs_three_identical() {
        let mut f = fighter();
        assert_eq!(f.record_action(Action::Attack), None);
        assert_eq!(f.record_action(Action::Attack), None);
        assert_eq!(f.record_action(Action::Attack), Some(ComboKind::Attack));
        assert_eq!(f.combo_ready, Some(ComboKind::Attack));
    }

    #[test]
    fn test_broken_run_no_combo() {
        let mut f = fighter();
        f.record_action(Action::Heal);
        f.record_action(Action::Heal);
        f.record_action(Action::Defend);
        assert_eq!(f.record_action(Action::Heal), None);
        assert_eq!(f.combo_ready, None);
        assert_eq!(f.last_actions.len(), ACTION_HISTORY_LEN);
    }

    #[test]
    fn test_defend_never_primes_combo() {
        let mut f = fighter();
        for _ in 0..3 {
            assert_eq!(f.record_action(Action::Defend), None);
        }
        assert_eq!(f.combo_ready, None);
    }

    #[test]
    fn test_take_combo_clears_history() {
        let mut f = fighter();
        for _ in 0..3 {
            f.record_action(Action::Heal);
        }
        assert!(!f.take_combo(ComboKind::Attack));
        assert!(f.take_combo(ComboKind::Heal));
        assert!(f.last_actions.is_empty());
        assert!(!f.take_combo(ComboKind::Heal));
    }

    #[test]
    fn test_locked_fighter_cannot_attack() {
        let mut f = fighter();
        f.actions_until_attack_unlocked = 2;
        assert_eq!(f.available_actions(), vec![Action::Defend, Action::Heal]);
    }
}
