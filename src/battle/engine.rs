//! Battle Engine
//!
//! Turn-resolution state machine for a single battle. Both fighters submit
//! one action per round; the round resolves once both are in, in a fixed
//! order that does not depend on who submitted first:
//!
//! 1. start-of-turn effects (bleed, regeneration, attack-lock countdown)
//! 2. stance update (defending / defend streak)
//! 3. action history and combo priming
//! 4. the action-pair matrix (heal lands before damage in mixed pairs)
//! 5. end-of-battle check
//!
//! The engine is synchronous and owns no locks; callers serialize access
//! per battle (see [`crate::battle::registry`]).

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::core::clock::elapsed_between;
use crate::core::ids::{BattleId, ParticipantId};
use crate::core::rng::{CombatRoller, DeterministicRng};
use crate::battle::fighter::{Action, ComboKind, Fighter, FighterSnapshot};
use crate::battle::trace::{RoundEvent, RoundSummary};

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Tunables for combat math and battle limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleConfig {
    /// Starting (and maximum) HP.
    pub max_hp: u32,
    /// Starting armor.
    pub base_armor: u32,
    /// Round cap.
    pub max_rounds: u32,
    /// Wall-clock budget for a whole battle.
    pub duration: Duration,
    /// Miss chance (percent).
    pub miss_chance: u32,
    /// Critical chance (percent).
    pub crit_chance: u32,
    /// Critical multiplier as a ratio (numerator, denominator).
    pub crit_multiplier: (u32, u32),
    /// Chance that a critical hit also inflicts bleed (percent).
    pub crit_bleed_chance: u32,
    /// Normal attack damage range.
    pub damage_range: (u32, u32),
    /// Empowered attack damage range.
    pub combo_damage_range: (u32, u32),
    /// Normal heal range.
    pub heal_range: (u32, u32),
    /// Empowered heal range.
    pub combo_heal_range: (u32, u32),
    /// Damage dealt per bleed turn.
    pub bleed_damage: u32,
    /// Bleed duration when inflicted.
    pub bleed_turns: u32,
    /// HP restored per regeneration turn.
    pub regen_heal: u32,
    /// Regeneration duration when granted.
    pub regen_turns: u32,
    /// Damage reduction on the first consecutive defend (percent).
    pub first_defend_reduction: u32,
    /// Damage reduction on later consecutive defends (percent).
    pub repeat_defend_reduction: u32,
    /// Landed attacks before attack locks.
    pub empowered_attack_cap: u32,
    /// Turns attack stays locked.
    pub attack_lock_turns: u32,
}

impl Default for BattleConfig {
    fn default() -> Self {
        Self {
            max_hp: 100,
            base_armor: 0,
            max_rounds: 20,
            duration: Duration::from_secs(600),
            miss_chance: 10,
            crit_chance: 8,
            crit_multiplier: (3, 2),
            crit_bleed_chance: 50,
            damage_range: (15, 25),
            combo_damage_range: (30, 40),
            heal_range: (10, 20),
            combo_heal_range: (25, 35),
            bleed_damage: 5,
            bleed_turns: 3,
            regen_heal: 5,
            regen_turns: 3,
            first_defend_reduction: 75,
            repeat_defend_reduction: 50,
            empowered_attack_cap: 3,
            attack_lock_turns: 2,
        }
    }
}

// =============================================================================
// STATUS & OUTCOME
// =============================================================================

/// Battle lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    /// Waiting for actions.
    Active,
    /// Inside a round resolution call.
    Resolving,
    /// Terminal.
    Ended,
}

/// Why a battle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// A fighter reached zero HP.
    Knockout,
    /// The wall-clock budget ran out.
    TimeExpired,
    /// The round cap was reached.
    RoundLimit,
    /// A fighter gave up.
    Forfeit,
}

/// Final result of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum BattleOutcome {
    /// One side won.
    Victory {
        /// Winning fighter.
        winner: ParticipantId,
        /// Losing fighter.
        loser: ParticipantId,
    },
    /// Equal HP at the limit.
    Draw,
}

impl BattleOutcome {
    /// Check for a draw.
    pub fn is_draw(&self) -> bool {
        matches!(self, BattleOutcome::Draw)
    }

    /// Winner, if any.
    pub fn winner(&self) -> Option<ParticipantId> {
        match self {
            BattleOutcome::Victory { winner, .. } => Some(*winner),
            BattleOutcome::Draw => None,
        }
    }

    /// Loser, if any.
    pub fn loser(&self) -> Option<ParticipantId> {
        match self {
            BattleOutcome::Victory { loser, .. } => Some(*loser),
            BattleOutcome::Draw => None,
        }
    }
}

/// Battle errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BattleError {
    /// No battle with that id.
    #[error("Battle not found")]
    NotFound,

    /// Battle already ended.
    #[error("Battle is not active")]
    NotActive,

    /// Participant is not one of the two fighters.
    #[error("Not a participant of this battle")]
    NotParticipant,

    /// Participant already has a pending action this round.
    #[error("Already acted this round")]
    AlreadyActed,
}

/// Result of a round resolution.
#[derive(Debug, Clone)]
pub struct RoundResolution {
    /// What happened.
    pub summary: RoundSummary,
    /// Set when this round ended the battle.
    pub ended: Option<(BattleOutcome, EndReason)>,
}

/// Everything settlement needs from a finished battle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleResult {
    /// Battle identifier.
    pub battle_id: BattleId,
    /// Outcome.
    pub outcome: BattleOutcome,
    /// Why it ended.
    pub reason: EndReason,
    /// Wagered amount.
    pub stake: u64,
    /// Rounds fully resolved.
    pub rounds_played: u32,
    /// Final fighter states (A, B).
    pub fighters: [FighterSnapshot; 2],
    /// Damage dealt per fighter (A, B).
    pub damage_dealt: [u32; 2],
    /// Healing done per fighter (A, B).
    pub healing_done: [u32; 2],
    /// One side is the fallback bot.
    pub vs_bot: bool,
}

impl BattleResult {
    /// HP fraction of a participant at the end.
    pub fn hp_fraction(&self, id: ParticipantId) -> f64 {
        self.fighters.iter()
            .find(|f| f.id == id)
            .filter(|f| f.max_hp > 0)
            .map(|f| f.current_hp as f64 / f.max_hp as f64)
            .unwrap_or(0.0)
    }

    /// Index of a participant in `fighters`.
    pub fn side_of(&self, id: ParticipantId) -> Option<usize> {
        self.fighters.iter().position(|f| f.id == id)
    }
}

// =============================================================================
// BATTLE
// =============================================================================

/// A single battle between two fighters.
#[derive(Debug, Clone)]
pub struct Battle {
    /// Unique battle identifier.
    pub id: BattleId,
    /// First fighter.
    pub fighter_a: Fighter,
    /// Second fighter.
    pub fighter_b: Fighter,
    /// Wagered amount (equal for both sides).
    pub stake: u64,
    /// When the battle started.
    pub started_at: DateTime<Utc>,
    /// Current round, starting at 1.
    pub round: u32,
    /// Summary of the last resolved round.
    pub last_round_summary: Option<RoundSummary>,
    pending: [Option<Action>; 2],
    status: BattleStatus,
    end: Option<(BattleOutcome, EndReason)>,
    settled: bool,
    config: BattleConfig,
    rng: DeterministicRng,
}

impl Battle {
    /// Create a new active battle at round 1.
    pub fn new(
        id: BattleId,
        fighter_a: Fighter,
        fighter_b: Fighter,
        stake: u64,
        started_at: DateTime<Utc>,
        config: BattleConfig,
        rng: DeterministicRng,
    ) -> Self {
        Self {
            id,
            fighter_a,
            fighter_b,
            stake,
            started_at,
            round: 1,
            last_round_summary: None,
            pending: [None, None],
            status: BattleStatus::Active,
            end: None,
            settled: false,
            config,
            rng,
        }
    }

    /// Battle configuration.
    pub fn config(&self) -> &BattleConfig {
        &self.config
    }

    /// Current status.
    pub fn status(&self) -> BattleStatus {
        self.status
    }

    /// Check if the battle still accepts actions.
    pub fn is_active(&self) -> bool {
        self.status == BattleStatus::Active
    }

    /// Outcome and reason, once ended.
    pub fn end_state(&self) -> Option<(BattleOutcome, EndReason)> {
        self.end
    }

    /// Whether one side is the fallback bot.
    pub fn vs_bot(&self) -> bool {
        self.fighter_a.is_bot || self.fighter_b.is_bot
    }

    /// Both participant ids (A, B).
    pub fn participants(&self) -> [ParticipantId; 2] {
        [self.fighter_a.id, self.fighter_b.id]
    }

    /// Side index of a participant.
    pub fn side_of(&self, participant: ParticipantId) -> Option<usize> {
        if self.fighter_a.id == participant {
            Some(0)
        } else if self.fighter_b.id == participant {
            Some(1)
        } else {
            None
        }
    }

    /// Fighter by side index.
    pub fn fighter(&self, side: usize) -> &Fighter {
        if side == 0 { &self.fighter_a } else { &self.fighter_b }
    }

    /// Fighter by participant id.
    pub fn fighter_by_id(&self, participant: ParticipantId) -> Option<&Fighter> {
        self.side_of(participant).map(|side| self.fighter(side))
    }

    fn fighter_mut(&mut self, side: usize) -> &mut Fighter {
        if side == 0 { &mut self.fighter_a } else { &mut self.fighter_b }
    }

    /// Split into (actor, opponent) for the given side.
    fn pair_mut(&mut self, side: usize) -> (&mut Fighter, &mut Fighter) {
        if side == 0 {
            (&mut self.fighter_a, &mut self.fighter_b)
        } else {
            (&mut self.fighter_b, &mut self.fighter_a)
        }
    }

    /// Actions a participant may choose this round.
    pub fn available_actions(&self, participant: ParticipantId) -> Result<Vec<Action>, BattleError> {
        let side = self.side_of(participant).ok_or(BattleError::NotParticipant)?;
        Ok(self.fighter(side).available_actions())
    }

    /// Pending action of a participant this round.
    pub fn pending_action(&self, participant: ParticipantId) -> Option<Action> {
        self.side_of(participant).and_then(|side| self.pending[side])
    }

    /// Whether both sides have submitted.
    pub fn ready_to_resolve(&self) -> bool {
        self.is_active() && self.pending.iter().all(Option::is_some)
    }

    /// Record an action for the current round.
    ///
    /// Does not resolve the round. A rejected submission leaves the battle
    /// untouched.
    pub fn submit_action(&mut self, participant: ParticipantId, action: Action) -> Result<(), BattleError> {
        if !self.is_active() {
            return Err(BattleError::NotActive);
        }
        let side = self.side_of(participant).ok_or(BattleError::NotParticipant)?;
        if self.pending[side].is_some() {
            return Err(BattleError::AlreadyActed);
        }
        self.pending[side] = Some(action);
        Ok(())
    }

    /// Resolve the round with the battle's own RNG, if both actions are in.
    pub fn resolve_round_if_ready(&mut self, now: DateTime<Utc>) -> Option<RoundResolution> {
        let mut rng = std::mem::take(&mut self.rng);
        let resolution = self.resolve_round_with(now, &mut rng);
        self.rng = rng;
        resolution
    }

    /// Resolve the round with an explicit roller, if both actions are in.
    ///
    /// Returns `None` (and changes nothing) unless the battle is active and
    /// both fighters have a pending action.
    pub fn resolve_round_with<R: CombatRoller>(
        &mut self,
        now: DateTime<Utc>,
        roller: &mut R,
    ) -> Option<RoundResolution> {
        if !self.ready_to_resolve() {
            return None;
        }
        let actions = [self.pending[0]?, self.pending[1]?];

        self.status = BattleStatus::Resolving;
        let config = self.config.clone();
        let mut summary = RoundSummary::new(self.round);

        // 1. Start-of-turn effects
        for side in 0..2 {
            apply_start_of_turn(self.fighter_mut(side), &config, &mut summary);
        }

        // 2-3. Stance, history, combo priming
        for (side, action) in actions.iter().enumerate() {
            let fighter = self.fighter_mut(side);
            fighter.record_stance(*action);
            summary.push(RoundEvent::ActionChosen { fighter: fighter.id, action: *action });
            if let Some(combo) = fighter.record_action(*action) {
                summary.push(RoundEvent::ComboPrimed { fighter: fighter.id, combo });
            }
        }

        // 4. Action matrix; a fighter downed by bleed does not act
        if self.fighter_a.is_alive() && self.fighter_b.is_alive() {
            self.resolve_matrix(actions, roller, &mut summary);
        }

        for side in 0..2 {
            let fighter = self.fighter(side);
            if !fighter.is_alive() {
                summary.push(RoundEvent::Knockout { fighter: fighter.id });
            }
        }
        summary.hp_after = [
            (self.fighter_a.id, self.fighter_a.current_hp),
            (self.fighter_b.id, self.fighter_b.current_hp),
        ];

        // 5. End check
        self.pending = [None, None];
        let ended = match self.check_end(now) {
            Some(reason) => Some(self.finish(reason)),
            None => {
                self.round += 1;
                self.status = BattleStatus::Active;
                None
            }
        };

        #[cfg(feature = "debug-tracing")]
        tracing::debug!("battle {} round trace:\n{}", self.id.short(), summary);

        self.last_round_summary = Some(summary.clone());
        Some(RoundResolution { summary, ended })
    }

    fn resolve_matrix<R: CombatRoller>(
        &mut self,
        actions: [Action; 2],
        roller: &mut R,
        summary: &mut RoundSummary,
    ) {
        use Action::*;

        let config = self.config.clone();
        match (actions[0], actions[1]) {
            (Attack, Attack) => {
                let (a, b) = self.pair_mut(0);
                damage(a, b, &config, roller, summary);
                let (b, a) = self.pair_mut(1);
                damage(b, a, &config, roller, summary);
            }
            (Attack, Defend) => {
                let (a, b) = self.pair_mut(0);
                damage(a, b, &config, roller, summary);
            }
            (Defend, Attack) => {
                let (b, a) = self.pair_mut(1);
                damage(b, a, &config, roller, summary);
            }
            (Attack, Heal) => {
                heal(&mut self.fighter_b, &config, roller, summary);
                let (a, b) = self.pair_mut(0);
                damage(a, b, &config, roller, summary);
            }
            (Heal, Attack) => {
                heal(&mut self.fighter_a, &config, roller, summary);
                let (b, a) = self.pair_mut(1);
                damage(b, a, &config, roller, summary);
            }
            (Defend, Defend) => summary.push(RoundEvent::Standoff),
            (Heal, Heal) => {
                heal(&mut self.fighter_a, &config, roller, summary);
                heal(&mut self.fighter_b, &config, roller, summary);
            }
            (Defend, Heal) => {
                heal(&mut self.fighter_b, &config, roller, summary);
            }
            (Heal, Defend) => {
                heal(&mut self.fighter_a, &config, roller, summary);
            }
        }
    }

    fn check_end(&self, now: DateTime<Utc>) -> Option<EndReason> {
        if !self.fighter_a.is_alive() || !self.fighter_b.is_alive() {
            Some(EndReason::Knockout)
        } else if elapsed_between(self.started_at, now) > self.config.duration {
            Some(EndReason::TimeExpired)
        } else if self.round >= self.config.max_rounds {
            Some(EndReason::RoundLimit)
        } else {
            None
        }
    }

    /// Pick the winner from current HP.
    ///
    /// Compares raw HP rather than HP fraction; both sides start with the
    /// same max HP. A double knockout (trading finishing blows, or both
    /// bleeding out) is a draw.
    pub fn decide_outcome(&self) -> BattleOutcome {
        let (a, b) = (&self.fighter_a, &self.fighter_b);
        match (a.is_alive(), b.is_alive()) {
            (true, false) => BattleOutcome::Victory { winner: a.id, loser: b.id },
            (false, true) => BattleOutcome::Victory { winner: b.id, loser: a.id },
            _ if a.current_hp > b.current_hp => BattleOutcome::Victory { winner: a.id, loser: b.id },
            _ if b.current_hp > a.current_hp => BattleOutcome::Victory { winner: b.id, loser: a.id },
            _ => BattleOutcome::Draw,
        }
    }

    fn finish(&mut self, reason: EndReason) -> (BattleOutcome, EndReason) {
        let outcome = self.decide_outcome();
        self.status = BattleStatus::Ended;
        self.pending = [None, None];
        self.end = Some((outcome, reason));
        (outcome, reason)
    }

    /// Whether the battle has outlived its time or round budget.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        elapsed_between(self.started_at, now) > self.config.duration
            || self.round > self.config.max_rounds
    }

    /// Force end-of-battle evaluation if the battle has expired.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Option<(BattleOutcome, EndReason)> {
        if !self.is_active() || !self.is_expired(now) {
            return None;
        }
        let reason = if self.round > self.config.max_rounds {
            EndReason::RoundLimit
        } else {
            EndReason::TimeExpired
        };
        Some(self.finish(reason))
    }

    /// End the battle immediately as a loss for `participant`.
    pub fn forfeit(&mut self, participant: ParticipantId) -> Result<BattleOutcome, BattleError> {
        if !self.is_active() {
            return Err(BattleError::NotActive);
        }
        let side = self.side_of(participant).ok_or(BattleError::NotParticipant)?;
        let winner = self.fighter(1 - side).id;
        let outcome = BattleOutcome::Victory { winner, loser: participant };

        self.status = BattleStatus::Ended;
        self.pending = [None, None];
        self.end = Some((outcome, EndReason::Forfeit));
        Ok(outcome)
    }

    /// Claim the right to settle this battle.
    ///
    /// Returns true exactly once, and only after the battle has ended.
    pub fn mark_settled(&mut self) -> bool {
        if self.status != BattleStatus::Ended || self.settled {
            return false;
        }
        self.settled = true;
        true
    }

    /// Whether settlement already happened.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Settlement view of an ended battle.
    pub fn result(&self) -> Option<BattleResult> {
        let (outcome, reason) = self.end?;
        let rounds_played = self.last_round_summary.as_ref().map(|s| s.round).unwrap_or(0);
        Some(BattleResult {
            battle_id: self.id,
            outcome,
            reason,
            stake: self.stake,
            rounds_played,
            fighters: [self.fighter_a.snapshot(), self.fighter_b.snapshot()],
            damage_dealt: [self.fighter_a.damage_dealt, self.fighter_b.damage_dealt],
            healing_done: [self.fighter_a.healing_done, self.fighter_b.healing_done],
            vs_bot: self.vs_bot(),
        })
    }
}

// =============================================================================
// COMBAT MATH
// =============================================================================

/// Start-of-turn effects for one fighter.
fn apply_start_of_turn(fighter: &mut Fighter, config: &BattleConfig, summary: &mut RoundSummary) {
    if fighter.bleed_turns > 0 {
        let lost = fighter.take_damage(config.bleed_damage);
        fighter.bleed_turns -= 1;
        summary.push(RoundEvent::Bleed {
            fighter: fighter.id,
            damage: lost,
            turns_left: fighter.bleed_turns,
        });
    }

    if fighter.regen_turns > 0 && fighter.is_alive() {
        let healed = fighter.restore_hp(config.regen_heal);
        fighter.regen_turns -= 1;
        summary.push(RoundEvent::Regen {
            fighter: fighter.id,
            healed,
            turns_left: fighter.regen_turns,
        });
    }

    if fighter.actions_until_attack_unlocked > 0 {
        fighter.actions_until_attack_unlocked -= 1;
        if fighter.actions_until_attack_unlocked == 0 {
            fighter.empowered_attacks_used = 0;
            summary.push(RoundEvent::AttackUnlocked { fighter: fighter.id });
        }
    }
}

/// Resolve one attack. Returns the HP the defender lost.
pub fn damage<R: CombatRoller>(
    attacker: &mut Fighter,
    defender: &mut Fighter,
    config: &BattleConfig,
    roller: &mut R,
    summary: &mut RoundSummary,
) -> u32 {
    if roller.roll_percent(config.miss_chance) {
        summary.push(RoundEvent::Missed { attacker: attacker.id, defender: defender.id });
        return 0;
    }

    let empowered = attacker.take_combo(ComboKind::Attack);
    let (min, max) = if empowered { config.combo_damage_range } else { config.damage_range };
    let mut amount = roller.roll_range(min, max);

    let critical = roller.roll_percent(config.crit_chance);
    let mut bleed = empowered;
    if critical {
        let (num, den) = config.crit_multiplier;
        amount = amount * num / den.max(1);
        if roller.roll_percent(config.crit_bleed_chance) {
            bleed = true;
        }
    }

    let blocked = defender.armor.min(amount / 2);
    amount -= blocked;
    defender.armor -= blocked;

    if defender.defending {
        let reduction = if defender.defend_streak <= 1 {
            config.first_defend_reduction
        } else {
            config.repeat_defend_reduction
        };
        amount = amount * (100 - reduction.min(100)) / 100;
    }

    let amount = amount.max(1);
    let lost = defender.take_damage(amount);
    defender.last_damage_taken = lost;
    attacker.damage_dealt += lost;

    summary.push(RoundEvent::Hit {
        attacker: attacker.id,
        defender: defender.id,
        damage: lost,
        critical,
        empowered,
        armor_blocked: blocked,
        defended: defender.defending,
    });

    if bleed {
        defender.bleed_turns = defender.bleed_turns.max(config.bleed_turns);
        summary.push(RoundEvent::BleedInflicted { fighter: defender.id, turns: defender.bleed_turns });
    }

    if attacker.empowered_attacks_used < config.empowered_attack_cap {
        attacker.empowered_attacks_used += 1;
        if attacker.empowered_attacks_used == config.empowered_attack_cap && !attacker.attack_locked() {
            attacker.actions_until_attack_unlocked = config.attack_lock_turns;
            summary.push(RoundEvent::AttackLocked {
                fighter: attacker.id,
                turns: config.attack_lock_turns,
            });
        }
    }

    lost
}

/// Resolve one heal. Returns the HP actually restored.
pub fn heal<R: CombatRoller>(
    fighter: &mut Fighter,
    config: &BattleConfig,
    roller: &mut R,
    summary: &mut RoundSummary,
) -> u32 {
    let empowered = fighter.take_combo(ComboKind::Heal);
    let (min, max) = if empowered { config.combo_heal_range } else { config.heal_range };
    let amount = roller.roll_range(min, max);
    let healed = fighter.restore_hp(amount);

    summary.push(RoundEvent::Healed { fighter: fighter.id, amount: healed, empowered });

    if empowered {
        fighter.regen_turns = fighter.regen_turns.max(config.regen_turns);
        summary.push(RoundEvent::RegenGranted { fighter: fighter.id, turns: fighter.regen_turns });
    }

    healed
}

// =============================================================================
// TESTS
// =============================================================================
