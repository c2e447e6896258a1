//! Fallback Opponent
//!
//! Scripted opponent offered to a participant whose search timed out.
//! It picks its action the moment the human submits, so bot battles never
//! wait on a second client.

use chrono::{DateTime, Utc};

use crate::battle::engine::{Battle, BattleConfig};
use crate::battle::fighter::{Action, Fighter};
use crate::core::ids::{BattleId, ParticipantId};
use crate::core::rng::{CombatRoller, DeterministicRng};
use crate::matchmaking::queue::QueueTicket;

/// Display name of the fallback opponent.
pub const BOT_DISPLAY_NAME: &str = "Arena Sentinel";

/// HP fraction under which the bot prefers healing.
const LOW_HP_FRACTION: f64 = 0.3;

/// Start a battle between a timed-out ticket and the fallback bot.
///
/// The human is fighter A.
pub fn start_fallback_battle(
    ticket: &QueueTicket,
    config: &BattleConfig,
    now: DateTime<Utc>,
    nonce: u64,
) -> Battle {
    let id = BattleId::new_v4();
    let rng = DeterministicRng::for_battle(&id, [ticket.participant_id, ParticipantId::FALLBACK_BOT], nonce);

    let human = Fighter::new(ticket.participant_id, ticket.display_name.clone(), config.max_hp, config.base_armor);
    let mut bot = Fighter::new(ParticipantId::FALLBACK_BOT, BOT_DISPLAY_NAME, config.max_hp, config.base_armor);
    bot.is_bot = true;

    Battle::new(id, human, bot, ticket.stake, now, config.clone(), rng)
}

/// Roller for the bot's decision in a given round.
///
/// Seeded from the battle and round so replays choose the same actions.
pub fn decision_roller(battle: &Battle) -> DeterministicRng {
    DeterministicRng::for_battle(&battle.id, battle.participants(), u64::from(battle.round))
}

/// Pick the bot's action.
pub fn choose_action<R: CombatRoller>(bot: &Fighter, opponent: &Fighter, roller: &mut R) -> Action {
    let wounded = bot.current_hp < bot.max_hp;

    if bot.hp_fraction() < LOW_HP_FRACTION && roller.roll_percent(70) {
        return Action::Heal;
    }

    if bot.attack_locked() {
        return if wounded && roller.roll_percent(50) {
            Action::Heal
        } else {
            Action::Defend
        };
    }

    // Finish a weak opponent
    if opponent.hp_fraction() < LOW_HP_FRACTION && roller.roll_percent(80) {
        return Action::Attack;
    }

    match roller.roll_range(0, 99) {
        0..=59 => Action::Attack,
        60..=84 => Action::Defend,
        _ if wounded => Action::Heal,
        _ => Action::Attack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::ScriptedRoller;
    use chrono::TimeZone;

    fn fighters() -> (Fighter, Fighter) {
        let mut bot = Fighter::new(ParticipantId::FALLBACK_BOT, BOT_DISPLAY_NAME, 100, 0);
        bot.is_bot = true;
        (bot, Fighter::new(ParticipantId(5), "Human", 100, 0))
    }

    #[test]
    fn test_low_hp_heals() {
        let (mut bot, human) = fighters();
        bot.current_hp = 20;
        let mut roller = ScriptedRoller::new(&[true], &[]);
        assert_eq!(choose_action(&bot, &human, &mut roller), Action::Heal);
    }

    #[test]
    fn test_locked_bot_never_attacks() {
        let (mut bot, human) = fighters();
        bot.actions_until_attack_unlocked = 2;

        let mut roller = ScriptedRoller::new(&[], &[]);
        assert_eq!(choose_action(&bot, &human, &mut roller), Action::Defend);

        bot.current_hp = 60;
        let mut roller = ScriptedRoller::new(&[true], &[]);
        assert_eq!(choose_action(&bot, &human, &mut roller), Action::Heal);
    }

    #[test]
    fn test_weighted_choice() {
        let (bot, human) = fighters();
        let mut roller = ScriptedRoller::new(&[], &[10]);
        assert_eq!(choose_action(&bot, &human, &mut roller), Action::Attack);

        let mut roller = ScriptedRoller::new(&[], &[70]);
        assert_eq!(choose_action(&bot, &human, &mut roller), Action::Defend);

        // Full HP never heals
        let mut roller = ScriptedRoller::new(&[], &[95]);
        assert_eq!(choose_action(&bot, &human, &mut roller), Action::Attack);
    }

    #[test]
    fn test_random_choices_are_available() {
        let (mut bot, human) = fighters();
        let mut rng = DeterministicRng::new(77);
        for round in 0..200u32 {
            bot.current_hp = 1 + round % 100;
            bot.actions_until_attack_unlocked = round % 3;
            let action = choose_action(&bot, &human, &mut rng);
            assert!(bot.available_actions().contains(&action));
        }
    }

    #[test]
    fn test_fallback_battle_layout() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let ticket = QueueTicket::new(ParticipantId(5), "Human", 300, 10, now);
        let battle = start_fallback_battle(&ticket, &BattleConfig::default(), now, 1);

        assert!(battle.vs_bot());
        assert_eq!(battle.participants(), [ParticipantId(5), ParticipantId::FALLBACK_BOT]);
        assert!(battle.fighter_b.is_bot);
        assert_eq!(battle.stake, 10);
    }
}
