//! Round Trace
//!
//! Everything that happened in one round resolution, in order. The
//! presentation layer renders it; tests assert against it.

use std::fmt;
use serde::{Serialize, Deserialize};

use crate::core::ids::ParticipantId;
use crate::battle::fighter::{Action, ComboKind};

/// A single step of round resolution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoundEvent {
    /// Bleed ticked at start of turn.
    Bleed {
        /// Bleeding fighter.
        fighter: ParticipantId,
        /// HP lost.
        damage: u32,
        /// Bleed turns remaining.
        turns_left: u32,
    },
    /// Regeneration ticked at start of turn.
    Regen {
        /// Regenerating fighter.
        fighter: ParticipantId,
        /// HP restored.
        healed: u32,
        /// Regen turns remaining.
        turns_left: u32,
    },
    /// Attack lock expired, attack is available again.
    AttackUnlocked {
        /// Unlocked fighter.
        fighter: ParticipantId,
    },
    /// A fighter chose an action.
    ActionChosen {
        /// Acting fighter.
        fighter: ParticipantId,
        /// Chosen action.
        action: Action,
    },
    /// Three identical actions primed a combo.
    ComboPrimed {
        /// Fighter holding the combo.
        fighter: ParticipantId,
        /// Combo type.
        combo: ComboKind,
    },
    /// Attack missed.
    Missed {
        /// Attacking fighter.
        attacker: ParticipantId,
        /// Target.
        defender: ParticipantId,
    },
    /// Attack landed.
    Hit {
        /// Attacking fighter.
        attacker: ParticipantId,
        /// Target.
        defender: ParticipantId,
        /// HP removed from the target.
        damage: u32,
        /// Critical roll succeeded.
        critical: bool,
        /// Attack combo consumed.
        empowered: bool,
        /// Damage soaked by armor.
        armor_blocked: u32,
        /// Target was defending.
        defended: bool,
    },
    /// Bleed inflicted by a critical or empowered hit.
    BleedInflicted {
        /// Now bleeding.
        fighter: ParticipantId,
        /// Bleed turns applied.
        turns: u32,
    },
    /// Heal applied.
    Healed {
        /// Healed fighter.
        fighter: ParticipantId,
        /// HP actually restored (after the max HP clamp).
        amount: u32,
        /// Heal combo consumed.
        empowered: bool,
    },
    /// Regeneration granted by an empowered heal.
    RegenGranted {
        /// Regenerating fighter.
        fighter: ParticipantId,
        /// Regen turns applied.
        turns: u32,
    },
    /// Attack usage cap reached, attack locked.
    AttackLocked {
        /// Locked fighter.
        fighter: ParticipantId,
        /// Actions until attack unlocks.
        turns: u32,
    },
    /// Both fighters defended; nothing happened.
    Standoff,
    /// Fighter dropped to zero HP.
    Knockout {
        /// Knocked-out fighter.
        fighter: ParticipantId,
    },
}

/// Summary of one resolved round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    /// Round number that was resolved.
    pub round: u32,
    /// Resolution steps in order.
    pub events: Vec<RoundEvent>,
    /// HP of both fighters after resolution (A, B).
    pub hp_after: [(ParticipantId, u32); 2],
}

impl RoundSummary {
    /// Start an empty summary for `round`.
    pub fn new(round: u32) -> Self {
        Self {
            round,
            events: Vec::new(),
            hp_after: [(ParticipantId(0), 0); 2],
        }
    }

    /// Append a step.
    pub fn push(&mut self, event: RoundEvent) {
        self.events.push(event);
    }

    /// Total damage a fighter took from hits this round.
    pub fn damage_to(&self, fighter: ParticipantId) -> u32 {
        self.events.iter()
            .filter_map(|e| match e {
                RoundEvent::Hit { defender, damage, .. } if *defender == fighter => Some(*damage),
                _ => None,
            })
            .sum()
    }

    /// Whether the summary contains a matching step.
    pub fn contains(&self, pred: impl Fn(&RoundEvent) -> bool) -> bool {
        self.events.iter().any(pred)
    }
}

impl fmt::Display for RoundEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundEvent::Bleed { fighter, damage, turns_left } => {
                write!(f, "{} bleeds for {} ({} turns left)", fighter, damage, turns_left)
            }
            RoundEvent::Regen { fighter, healed, turns_left } => {
                write!(f, "{} regenerates {} ({} turns left)", fighter, healed, turns_left)
            }
            RoundEvent::AttackUnlocked { fighter } => write!(f, "{} can attack again", fighter),
            RoundEvent::ActionChosen { fighter, action } => write!(f, "{} chose {:?}", fighter, action),
            RoundEvent::ComboPrimed { fighter, combo } => write!(f, "{} primed a {:?} combo", fighter, combo),
            RoundEvent::Missed { attacker, defender } => write!(f, "{} missed {}", attacker, defender),
            RoundEvent::Hit { attacker, defender, damage, critical, empowered, armor_blocked, defended } => {
                write!(f, "{} hit {} for {}", attacker, defender, damage)?;
                if *critical {
                    write!(f, " (critical)")?;
                }
                if *empowered {
                    write!(f, " (empowered)")?;
                }
                if *armor_blocked > 0 {
                    write!(f, " [armor -{}]", armor_blocked)?;
                }
                if *defended {
                    write!(f, " [defended]")?;
                }
                Ok(())
            }
            RoundEvent::BleedInflicted { fighter, turns } => write!(f, "{} starts bleeding for {} turns", fighter, turns),
            RoundEvent::Healed { fighter, amount, empowered } => {
                write!(f, "{} healed {}{}", fighter, amount, if *empowered { " (empowered)" } else { "" })
            }
            RoundEvent::RegenGranted { fighter, turns } => write!(f, "{} regenerates for {} turns", fighter, turns),
            RoundEvent::AttackLocked { fighter, turns } => write!(f, "{} cannot attack for {} turns", fighter, turns),
            RoundEvent::Standoff => write!(f, "both fighters held their guard"),
            RoundEvent::Knockout { fighter } => write!(f, "{} is knocked out", fighter),
        }
    }
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Round {}", self.round)?;
        for event in &self.events {
            writeln!(f, "  {}", event)?;
        }
        write!(
            f,
            "  HP: {} = {}, {} = {}",
            self.hp_after[0].0, self.hp_after[0].1, self.hp_after[1].0, self.hp_after[1].1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damage_to_sums_hits() {
        let a = ParticipantId(1);
        let b = ParticipantId(2);
        let mut summary = RoundSummary::new(1);
        summary.push(RoundEvent::Hit {
            attacker: a, defender: b, damage: 7,
            critical: false, empowered: false, armor_blocked: 0, defended: false,
        });
        summary.push(RoundEvent::Bleed { fighter: b, damage: 5, turns_left: 2 });
        summary.push(RoundEvent::Hit {
            attacker: b, defender: a, damage: 3,
            critical: false, empowered: false, armor_blocked: 0, defended: true,
        });

        assert_eq!(summary.damage_to(b), 7);
        assert_eq!(summary.damage_to(a), 3);
    }

    #[test]
    fn test_summary_renders_text() {
        let mut summary = RoundSummary::new(4);
        summary.push(RoundEvent::Standoff);
        summary.hp_after = [(ParticipantId(1), 80), (ParticipantId(2), 65)];

        let text = summary.to_string();
        assert!(text.starts_with("Round 4"));
        assert!(text.contains("held their guard"));
        assert!(text.contains("1 = 80"));
    }

    #[test]
    fn test_new_summary_is_empty() {
        let summary = RoundSummary::new(2);
        assert_eq!(summary.round, 2);
        assert!(summary.events.is_empty());
        assert_eq!(summary.damage_to(ParticipantId(1)), 0);
    }

    #[test]
    fn test_event_json_tagged() {
        let json = serde_json::to_string(&RoundEvent::Standoff).unwrap();
        assert_eq!(json, r#"{"kind":"standoff"}"#);
    }
}
