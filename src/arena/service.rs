//! Arena Service
//!
//! Orchestrates matchmaking, battles and settlement. Lock order is queue,
//! then registry, then a single battle, then the rating store; no path
//! takes them in another order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::arena::bot;
use crate::arena::protocol::{Ack, ArenaCommand, ArenaEvent, ErrorCode};
use crate::battle::engine::{Battle, BattleError, BattleOutcome, BattleResult};
use crate::battle::fighter::Action;
use crate::battle::registry::ActiveBattleRegistry;
use crate::config::ArenaConfig;
use crate::core::clock::Clock;
use crate::core::ids::{BattleId, ParticipantId};
use crate::matchmaking::queue::{MatchmakingQueue, Pairing, QueueError, QueueTicket};
use crate::rating::ledger::RatingError;
use crate::rating::store::RatingStore;

/// Capacity of the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// ERRORS
// =============================================================================

/// Arena service errors.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    /// Queue rejected the command.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Battle rejected the command.
    #[error(transparent)]
    Battle(#[from] BattleError),

    /// Rating ledger failure.
    #[error(transparent)]
    Rating(#[from] RatingError),

    /// Action exists but is locked for this fighter.
    #[error("{action:?} is locked for {locked_for} more actions")]
    ActionUnavailable {
        /// Rejected action.
        action: Action,
        /// Actions until it unlocks.
        locked_for: u32,
    },

    /// No level-up reward to claim.
    #[error("No pending reward")]
    NoPendingReward,

    /// Malformed command.
    #[error("Invalid command: {0}")]
    Invalid(String),
}

impl ArenaError {
    /// Wire error class.
    pub fn code(&self) -> ErrorCode {
        match self {
            ArenaError::Queue(QueueError::NotQueued) => ErrorCode::NotFound,
            ArenaError::Queue(_) => ErrorCode::Validation,
            ArenaError::Battle(BattleError::NotFound) => ErrorCode::NotFound,
            // Lost a race with the sweeper or the other side's finishing blow
            ArenaError::Battle(BattleError::NotActive) => ErrorCode::ConcurrencyConflict,
            ArenaError::Battle(_) => ErrorCode::Validation,
            ArenaError::Rating(_) => ErrorCode::Internal,
            ArenaError::ActionUnavailable { .. } => ErrorCode::Validation,
            ArenaError::NoPendingReward => ErrorCode::Validation,
            ArenaError::Invalid(_) => ErrorCode::Validation,
        }
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

/// Outcome of a successful join.
#[derive(Debug, Clone)]
pub struct JoinReceipt {
    /// Ticket as queued.
    pub ticket: QueueTicket,
    /// Battle started immediately, if a match was waiting.
    pub battle_id: Option<BattleId>,
}

/// Outcome of a successful action submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionReceipt {
    /// Round the action was recorded for.
    pub round: u32,
    /// Whether the round resolved.
    pub resolved: bool,
}

/// Work done by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Pairings made.
    pub paired: usize,
    /// Searches timed out.
    pub timed_out: usize,
    /// Expired battles closed.
    pub swept: usize,
}

impl TickReport {
    /// Whether the tick did nothing.
    pub fn is_idle(&self) -> bool {
        self.paired == 0 && self.timed_out == 0 && self.swept == 0
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// The arena core.
pub struct ArenaService {
    config: ArenaConfig,
    queue: Mutex<MatchmakingQueue>,
    registry: ActiveBattleRegistry,
    ratings: RatingStore,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ArenaEvent>,
    shutdown_tx: broadcast::Sender<()>,
    nonce: AtomicU64,
}

impl ArenaService {
    /// Create a service.
    pub fn new(config: ArenaConfig, ratings: RatingStore, clock: Arc<dyn Clock>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(1);
        let nonce = AtomicU64::new(config.seed.unwrap_or(0));

        Self {
            queue: Mutex::new(MatchmakingQueue::new(config.queue.clone())),
            registry: ActiveBattleRegistry::new(),
            ratings,
            clock,
            events,
            shutdown_tx,
            nonce,
            config,
        }
    }

    /// Configuration.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Rating store.
    pub fn ratings(&self) -> &RatingStore {
        &self.ratings
    }

    /// Active battles.
    pub fn registry(&self) -> &ActiveBattleRegistry {
        &self.registry
    }

    /// Current time from the service clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Subscribe to arena events.
    pub fn subscribe(&self) -> broadcast::Receiver<ArenaEvent> {
        self.events.subscribe()
    }

    /// Subscribe to the shutdown signal.
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Stop the ticker and every gateway listening for shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Rewrite the rating ledger from memory.
    pub async fn flush(&self) -> Result<(), ArenaError> {
        Ok(self.ratings.flush().await?)
    }

    /// Number of waiting tickets.
    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Dispatch a command.
    pub async fn handle(&self, command: ArenaCommand) -> Result<Ack, ArenaError> {
        match command {
            ArenaCommand::Authenticate { .. } => {
                Err(ArenaError::Invalid("authentication is handled by the gateway".to_string()))
            }
            ArenaCommand::JoinQueue { participant_id, display_name, rating, stake } => {
                let receipt = self.join_queue(participant_id, display_name, rating, stake).await?;
                Ok(Ack::Queued {
                    participant_id,
                    rating: receipt.ticket.rating,
                    battle_id: receipt.battle_id,
                })
            }
            ArenaCommand::LeaveQueue { participant_id } => {
                self.leave_queue(participant_id).await?;
                Ok(Ack::Left { participant_id })
            }
            ArenaCommand::SubmitAction { battle_id, participant_id, action } => {
                let receipt = self.submit_action(battle_id, participant_id, action).await?;
                Ok(Ack::ActionAccepted {
                    battle_id,
                    round: receipt.round,
                    resolved: receipt.resolved,
                })
            }
            ArenaCommand::Forfeit { battle_id, participant_id } => {
                self.forfeit(battle_id, participant_id).await?;
                Ok(Ack::Forfeited { battle_id })
            }
            ArenaCommand::ClaimReward { participant_id } => {
                let remaining = self.claim_reward(participant_id).await?;
                Ok(Ack::RewardClaimed { participant_id, remaining })
            }
            ArenaCommand::Tick { now } => {
                let report = self.tick(now.unwrap_or_else(|| self.clock.now())).await;
                Ok(Ack::Ticked {
                    paired: report.paired,
                    timed_out: report.timed_out,
                    swept: report.swept,
                })
            }
        }
    }

    // =========================================================================
    // MATCHMAKING
    // =========================================================================

    /// Queue a participant and pair at once if a compatible ticket waits.
    #[instrument(skip(self, display_name))]
    pub async fn join_queue(
        &self,
        participant: ParticipantId,
        display_name: String,
        rating: Option<u32>,
        stake: u64,
    ) -> Result<JoinReceipt, ArenaError> {
        if participant.is_fallback_bot() {
            return Err(QueueError::ReservedParticipant.into());
        }
        if display_name.trim().is_empty() {
            return Err(ArenaError::Invalid("display name is empty".to_string()));
        }

        let rating = match rating {
            Some(rating) => rating,
            None => self.ratings.get(participant).await.rating,
        };
        let now = self.clock.now();
        let ticket = QueueTicket::new(participant, display_name, rating, stake, now);

        let mut queue = self.queue.lock().await;
        if self.registry.battle_of(&participant).await.is_some() {
            return Err(QueueError::AlreadyInBattle.into());
        }
        queue.enqueue(ticket.clone())?;
        info!("Participant {} searching (rating {}, stake {})", participant, rating, stake);

        let battle_id = match queue.try_pair(&participant, now) {
            Some(pairing) => Some(self.start_pairing(&pairing, now).await),
            None => None,
        };
        Ok(JoinReceipt { ticket, battle_id })
    }

    /// Cancel a search.
    #[instrument(skip(self))]
    pub async fn leave_queue(&self, participant: ParticipantId) -> Result<QueueTicket, ArenaError> {
        let mut queue = self.queue.lock().await;
        let ticket = queue.cancel(&participant)?;
        info!("Participant {} stopped searching", participant);
        Ok(ticket)
    }

    async fn start_pairing(&self, pairing: &Pairing, now: DateTime<Utc>) -> BattleId {
        let battle = pairing.start_battle(&self.config.battle, now, self.next_nonce());
        self.register_battle(battle).await
    }

    async fn register_battle(&self, battle: Battle) -> BattleId {
        let id = battle.id;
        let event = ArenaEvent::BattlePaired {
            battle_id: id,
            fighter_a: battle.fighter_a.snapshot(),
            fighter_b: battle.fighter_b.snapshot(),
            stake: battle.stake,
            vs_bot: battle.vs_bot(),
        };
        let [a, b] = battle.participants();
        self.registry.register(battle).await;
        info!("Battle {} started: {} vs {}", id.short(), a, b);
        self.emit(event);
        id
    }

    fn next_nonce(&self) -> u64 {
        self.nonce.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // BATTLES
    // =========================================================================

    /// Record an action and resolve the round once both sides have one.
    #[instrument(skip(self), fields(battle = %battle_id.short()))]
    pub async fn submit_action(
        &self,
        battle_id: BattleId,
        participant: ParticipantId,
        action: Action,
    ) -> Result<ActionReceipt, ArenaError> {
        if participant.is_fallback_bot() {
            return Err(BattleError::NotParticipant.into());
        }
        let handle = self.registry.require(&battle_id).await?;
        let now = self.clock.now();

        let (receipt, resolution, result) = {
            let mut battle = handle.lock().await;
            if !battle.is_active() {
                return Err(BattleError::NotActive.into());
            }
            if !battle.available_actions(participant)?.contains(&action) {
                let locked_for = battle
                    .fighter_by_id(participant)
                    .map(|f| f.actions_until_attack_unlocked)
                    .unwrap_or(0);
                return Err(ArenaError::ActionUnavailable { action, locked_for });
            }

            let round = battle.round;
            battle.submit_action(participant, action)?;
            respond_as_bot(&mut battle)?;

            let resolution = battle.resolve_round_if_ready(now);
            let ended = resolution.as_ref().is_some_and(|r| r.ended.is_some());
            let result = if ended && battle.mark_settled() { battle.result() } else { None };
            let receipt = ActionReceipt { round, resolved: resolution.is_some() };
            (receipt, resolution, result)
        };

        if let Some(resolution) = resolution {
            debug!("Battle {} round {} resolved", battle_id.short(), resolution.summary.round);
            self.emit(ArenaEvent::RoundResolved {
                battle_id,
                round: resolution.summary.round,
                summary: resolution.summary,
            });
        }
        if let Some(result) = result {
            self.finish_battle(result).await;
        }
        Ok(receipt)
    }

    /// Concede a battle.
    #[instrument(skip(self), fields(battle = %battle_id.short()))]
    pub async fn forfeit(&self, battle_id: BattleId, participant: ParticipantId) -> Result<BattleOutcome, ArenaError> {
        if participant.is_fallback_bot() {
            return Err(BattleError::NotParticipant.into());
        }
        let handle = self.registry.require(&battle_id).await?;

        let (outcome, result) = {
            let mut battle = handle.lock().await;
            let outcome = battle.forfeit(participant)?;
            let result = if battle.mark_settled() { battle.result() } else { None };
            (outcome, result)
        };

        info!("Participant {} forfeited battle {}", participant, battle_id.short());
        if let Some(result) = result {
            self.finish_battle(result).await;
        }
        Ok(outcome)
    }

    /// Unregister, settle and announce a finished battle.
    async fn finish_battle(&self, result: BattleResult) {
        self.registry.unregister(&result.battle_id).await;

        let settlement = self.ratings.settle(&result).await;
        if !settlement.persisted {
            warn!("Battle {} settled in memory only; ledger write failed", result.battle_id.short());
        }

        info!(
            "Battle {} ended ({:?}, {:?}) after {} rounds",
            result.battle_id.short(),
            result.outcome,
            result.reason,
            result.rounds_played
        );
        self.emit(ArenaEvent::BattleEnded {
            battle_id: result.battle_id,
            participants: [result.fighters[0].id, result.fighters[1].id],
            outcome: result.outcome,
            reason: result.reason,
            rating_changes: settlement.rating_changes,
            progress: settlement.progress,
        });
    }

    // =========================================================================
    // PROGRESSION
    // =========================================================================

    /// Claim one level-up reward. Returns how many remain.
    #[instrument(skip(self))]
    pub async fn claim_reward(&self, participant: ParticipantId) -> Result<u32, ArenaError> {
        if !self.ratings.claim_pending_reward(participant).await {
            return Err(ArenaError::NoPendingReward);
        }
        Ok(self.ratings.get(participant).await.pending_level_rewards)
    }

    // =========================================================================
    // TIMERS
    // =========================================================================

    /// Pair waiting tickets, time out stale searches and close expired battles.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        {
            let mut queue = self.queue.lock().await;
            for pairing in queue.pair_all(now) {
                self.start_pairing(&pairing, now).await;
                report.paired += 1;
            }

            for ticket in queue.sweep_timeouts(now) {
                report.timed_out += 1;
                let fallback = self.config.bot_fallback
                    .then(|| bot::start_fallback_battle(&ticket, &self.config.battle, now, self.next_nonce()));

                self.emit(ArenaEvent::SearchTimedOut {
                    participant_id: ticket.participant_id,
                    fallback_battle: fallback.as_ref().map(|b| b.id),
                });
                if let Some(battle) = fallback {
                    self.register_battle(battle).await;
                }
            }
        }

        for result in self.registry.sweep_expired(now).await {
            self.finish_battle(result).await;
            report.swept += 1;
        }

        if !report.is_idle() {
            debug!("Tick: {:?}", report);
        }
        report
    }

    /// Drive `tick` on the configured interval until shutdown.
    pub async fn run_ticker(self: Arc<Self>) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("Arena ticker running every {:?}", self.config.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(self.clock.now()).await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Arena ticker stopped");
                    break;
                }
            }
        }
    }

    fn emit(&self, event: ArenaEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Let the fallback bot choose once the human has acted.
fn respond_as_bot(battle: &mut Battle) -> Result<(), BattleError> {
    let bot_id = ParticipantId::FALLBACK_BOT;
    let Some(bot_side) = battle.side_of(bot_id) else {
        return Ok(());
    };
    if !battle.is_active() || battle.pending_action(bot_id).is_some() {
        return Ok(());
    }

    let mut roller = bot::decision_roller(battle);
    let action = bot::choose_action(battle.fighter(bot_side), battle.fighter(1 - bot_side), &mut roller);
    battle.submit_action(bot_id, action)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::engine::EndReason;
    use crate::core::clock::ManualClock;
    use crate::rating::calc::RatingConfig;
    use chrono::TimeZone;
    use std::time::Duration;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn create_service(config: ArenaConfig) -> (Arc<ArenaService>, ManualClock) {
        let clock = ManualClock::new(t0());
        let ratings = RatingStore::in_memory(RatingConfig::default());
        let service = ArenaService::new(config, ratings, Arc::new(clock.clone()));
        (Arc::new(service), clock)
    }

    fn drain(rx: &mut broadcast::Receiver<ArenaEvent>) -> Vec<ArenaEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn paired_battle(service: &ArenaService) -> BattleId {
        service.join_queue(ParticipantId(1), "Ash".into(), Some(300), 0).await.unwrap();
        let receipt = service.join_queue(ParticipantId(2), "Birch".into(), Some(320), 0).await.unwrap();
        receipt.battle_id.unwrap()
    }

    #[tokio::test]
    async fn test_join_pairs_immediately() {
        let (service, _) = create_service(ArenaConfig::default());
        let mut events = service.subscribe();

        let first = service.join_queue(ParticipantId(1), "Ash".into(), Some(300), 0).await.unwrap();
        assert!(first.battle_id.is_none());
        assert_eq!(service.queue_len().await, 1);

        let second = service.join_queue(ParticipantId(2), "Birch".into(), Some(320), 0).await.unwrap();
        let battle_id = second.battle_id.unwrap();
        assert_eq!(service.queue_len().await, 0);
        assert_eq!(service.registry().battle_of(&ParticipantId(1)).await, Some(battle_id));

        match drain(&mut events).as_slice() {
            [ArenaEvent::BattlePaired { fighter_a, fighter_b, vs_bot, .. }] => {
                assert_eq!(fighter_a.id, ParticipantId(1));
                assert_eq!(fighter_b.id, ParticipantId(2));
                assert!(!vs_bot);
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_join_rejections() {
        let (service, _) = create_service(ArenaConfig::default());

        let err = service.join_queue(ParticipantId::FALLBACK_BOT, "Bot".into(), None, 0).await.unwrap_err();
        assert!(matches!(err, ArenaError::Queue(QueueError::ReservedParticipant)));
        assert_eq!(err.code(), ErrorCode::Validation);

        let err = service.join_queue(ParticipantId(1), "  ".into(), None, 0).await.unwrap_err();
        assert!(matches!(err, ArenaError::Invalid(_)));

        service.join_queue(ParticipantId(1), "Ash".into(), Some(300), 5).await.unwrap();
        let err = service.join_queue(ParticipantId(1), "Ash".into(), Some(300), 5).await.unwrap_err();
        assert!(matches!(err, ArenaError::Queue(QueueError::AlreadyQueued)));

        // Different stake never pairs
        let receipt = service.join_queue(ParticipantId(2), "Birch".into(), Some(300), 0).await.unwrap();
        assert!(receipt.battle_id.is_none());
    }

    #[tokio::test]
    async fn test_cannot_queue_while_fighting() {
        let (service, _) = create_service(ArenaConfig::default());
        paired_battle(&service).await;

        let err = service.join_queue(ParticipantId(1), "Ash".into(), None, 0).await.unwrap_err();
        assert!(matches!(err, ArenaError::Queue(QueueError::AlreadyInBattle)));
    }

    #[tokio::test]
    async fn test_rating_snapshot_defaults_to_store() {
        let (service, _) = create_service(ArenaConfig::default());
        let receipt = service.join_queue(ParticipantId(1), "Ash".into(), None, 0).await.unwrap();
        assert_eq!(receipt.ticket.rating, 200);
    }

    #[tokio::test]
    async fn test_leave_queue() {
        let (service, _) = create_service(ArenaConfig::default());
        service.join_queue(ParticipantId(1), "Ash".into(), Some(300), 0).await.unwrap();

        service.leave_queue(ParticipantId(1)).await.unwrap();
        let err = service.leave_queue(ParticipantId(1)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_scenario_c_wide_pairing_after_wait() {
        let (service, clock) = create_service(ArenaConfig::default());
        service.join_queue(ParticipantId(1), "X".into(), Some(500), 0).await.unwrap();

        clock.advance(Duration::from_secs(90));
        let receipt = service.join_queue(ParticipantId(2), "Y".into(), Some(1000), 0).await.unwrap();
        assert!(receipt.battle_id.is_some());
    }

    #[tokio::test]
    async fn test_tick_pairs_after_expansion() {
        let (service, clock) = create_service(ArenaConfig::default());
        service.join_queue(ParticipantId(1), "X".into(), Some(500), 0).await.unwrap();
        service.join_queue(ParticipantId(2), "Y".into(), Some(1000), 0).await.unwrap();

        let report = service.tick(clock.now()).await;
        assert_eq!(report.paired, 0);

        clock.advance(Duration::from_secs(61));
        let report = service.tick(clock.now()).await;
        assert_eq!(report.paired, 1);
        assert_eq!(service.registry().len().await, 1);
    }

    #[tokio::test]
    async fn test_round_resolves_after_both_submit() {
        let (service, _) = create_service(ArenaConfig::default());
        let battle_id = paired_battle(&service).await;
        let mut events = service.subscribe();

        let receipt = service.submit_action(battle_id, ParticipantId(1), Action::Defend).await.unwrap();
        assert_eq!(receipt, ActionReceipt { round: 1, resolved: false });

        let err = service.submit_action(battle_id, ParticipantId(1), Action::Heal).await.unwrap_err();
        assert!(matches!(err, ArenaError::Battle(BattleError::AlreadyActed)));

        let receipt = service.submit_action(battle_id, ParticipantId(2), Action::Defend).await.unwrap();
        assert!(receipt.resolved);

        match drain(&mut events).as_slice() {
            [ArenaEvent::RoundResolved { round, .. }] => assert_eq!(*round, 1),
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submit_rejections() {
        let (service, _) = create_service(ArenaConfig::default());
        let battle_id = paired_battle(&service).await;

        let err = service
            .submit_action(BattleId::from_bytes([9; 16]), ParticipantId(1), Action::Attack)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);

        let err = service.submit_action(battle_id, ParticipantId(3), Action::Attack).await.unwrap_err();
        assert!(matches!(err, ArenaError::Battle(BattleError::NotParticipant)));

        let err = service.submit_action(battle_id, ParticipantId::FALLBACK_BOT, Action::Attack).await.unwrap_err();
        assert!(matches!(err, ArenaError::Battle(BattleError::NotParticipant)));
    }

    #[tokio::test]
    async fn test_locked_attack_rejected() {
        let (service, _) = create_service(ArenaConfig::default());
        let battle_id = paired_battle(&service).await;

        {
            let handle = service.registry().require(&battle_id).await.unwrap();
            handle.lock().await.fighter_a.actions_until_attack_unlocked = 2;
        }

        let err = service.submit_action(battle_id, ParticipantId(1), Action::Attack).await.unwrap_err();
        assert!(matches!(err, ArenaError::ActionUnavailable { action: Action::Attack, locked_for: 2 }));
        assert_eq!(err.code(), ErrorCode::Validation);

        // Defend is still fine
        service.submit_action(battle_id, ParticipantId(1), Action::Defend).await.unwrap();
    }

    #[tokio::test]
    async fn test_forfeit_settles_once() {
        let (service, _) = create_service(ArenaConfig::default());
        let battle_id = paired_battle(&service).await;
        let mut events = service.subscribe();

        let outcome = service.forfeit(battle_id, ParticipantId(2)).await.unwrap();
        assert_eq!(outcome.winner(), Some(ParticipantId(1)));
        assert!(service.registry().is_empty().await);

        // Full HP on both sides: top tier for each
        assert_eq!(service.ratings().get(ParticipantId(1)).await.rating, 220);
        assert_eq!(service.ratings().get(ParticipantId(2)).await.rating, 180);

        let err = service.forfeit(battle_id, ParticipantId(2)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(service.ratings().get(ParticipantId(1)).await.rating, 220);

        match drain(&mut events).as_slice() {
            [ArenaEvent::BattleEnded { reason, rating_changes, progress, .. }] => {
                assert_eq!(*reason, EndReason::Forfeit);
                assert_eq!(rating_changes.len(), 2);
                assert_eq!(progress.len(), 2);
            }
            other => panic!("Unexpected events: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_expired_battle_swept_as_draw() {
        let (service, clock) = create_service(ArenaConfig::default());
        let battle_id = paired_battle(&service).await;
        let mut events = service.subscribe();

        clock.advance(Duration::from_secs(601));
        let report = service.tick(clock.now()).await;
        assert_eq!(report.swept, 1);
        assert!(service.registry().get(&battle_id).await.is_none());

        let record = service.ratings().get(ParticipantId(1)).await;
        assert_eq!(record.rating, 200);
        assert_eq!(record.games_played, 1);
        assert_eq!(record.draws, 1);
        assert_eq!(record.xp, 15);

        match drain(&mut events).as_slice() {
            [ArenaEvent::BattleEnded { outcome, reason, .. }] => {
                assert!(outcome.is_draw());
                assert_eq!(*reason, EndReason::TimeExpired);
            }
            other => panic!("Unexpected events: {:?}", other),
        }

        // Sweeping again settles nothing
        let report = service.tick(clock.now()).await;
        assert_eq!(report.swept, 0);
    }

    #[tokio::test]
    async fn test_timeout_offers_fallback_bot() {
        let mut config = ArenaConfig::default();
        config.queue.timeout = Duration::from_secs(30);
        let (service, clock) = create_service(config);
        let mut events = service.subscribe();

        service.join_queue(ParticipantId(7), "Solo".into(), Some(250), 0).await.unwrap();
        clock.advance(Duration::from_secs(31));
        let report = service.tick(clock.now()).await;
        assert_eq!(report.timed_out, 1);

        let battle_id = match drain(&mut events).as_slice() {
            [ArenaEvent::SearchTimedOut { participant_id, fallback_battle: Some(id) }, ArenaEvent::BattlePaired { vs_bot, .. }] => {
                assert_eq!(*participant_id, ParticipantId(7));
                assert!(vs_bot);
                *id
            }
            other => panic!("Unexpected events: {:?}", other),
        };

        // The bot answers at once, so every submission resolves a round
        let mut rounds = 0;
        while service.registry().get(&battle_id).await.is_some() {
            let handle = service.registry().require(&battle_id).await.unwrap();
            let action = if handle.lock().await.fighter_a.attack_locked() {
                Action::Defend
            } else {
                Action::Attack
            };
            let receipt = service.submit_action(battle_id, ParticipantId(7), action).await.unwrap();
            assert!(receipt.resolved);
            rounds += 1;
            assert!(rounds <= 20);
        }

        let record = service.ratings().get(ParticipantId(7)).await;
        assert!([195, 200, 205].contains(&record.rating));
        assert_eq!(record.games_played, 1);
        assert_eq!(service.ratings().len().await, 1);
    }

    #[tokio::test]
    async fn test_timeout_without_fallback() {
        let mut config = ArenaConfig::default();
        config.queue.timeout = Duration::from_secs(30);
        config.bot_fallback = false;
        let (service, clock) = create_service(config);
        let mut events = service.subscribe();

        service.join_queue(ParticipantId(7), "Solo".into(), Some(250), 0).await.unwrap();
        clock.advance(Duration::from_secs(31));
        service.tick(clock.now()).await;

        match drain(&mut events).as_slice() {
            [ArenaEvent::SearchTimedOut { fallback_battle: None, .. }] => {}
            other => panic!("Unexpected events: {:?}", other),
        }
        assert!(service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn test_claim_reward() {
        let (service, _) = create_service(ArenaConfig::default());
        let err = service.claim_reward(ParticipantId(1)).await.unwrap_err();
        assert!(matches!(err, ArenaError::NoPendingReward));

        service.ratings().apply_experience(ParticipantId(1), 200).await;
        assert_eq!(service.claim_reward(ParticipantId(1)).await.unwrap(), 1);
        assert_eq!(service.claim_reward(ParticipantId(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_handle_dispatch() {
        let (service, _) = create_service(ArenaConfig::default());
        let ack = service
            .handle(ArenaCommand::JoinQueue {
                participant_id: ParticipantId(1),
                display_name: "Ash".into(),
                rating: Some(300),
                stake: 0,
            })
            .await
            .unwrap();
        assert_eq!(ack, Ack::Queued { participant_id: ParticipantId(1), rating: 300, battle_id: None });

        let ack = service.handle(ArenaCommand::Tick { now: None }).await.unwrap();
        assert_eq!(ack, Ack::Ticked { paired: 0, timed_out: 0, swept: 0 });
    }

    #[tokio::test]
    async fn test_concurrent_submissions() {
        let (service, _) = create_service(ArenaConfig::default());
        let battle_id = paired_battle(&service).await;

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.submit_action(battle_id, ParticipantId(1), Action::Attack).await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.submit_action(battle_id, ParticipantId(2), Action::Attack).await })
        };
        let ra = a.await.unwrap().unwrap();
        let rb = b.await.unwrap().unwrap();

        // Exactly one of the two submissions resolved the round
        assert!(ra.resolved ^ rb.resolved);
        let handle = service.registry().require(&battle_id).await.unwrap();
        assert_eq!(handle.lock().await.round, 2);
    }

    #[tokio::test]
    async fn test_ticker_stops_on_shutdown() {
        let mut config = ArenaConfig::default();
        config.tick_interval = Duration::from_millis(10);
        let (service, _) = create_service(config);

        let ticker = tokio::spawn(service.clone().run_ticker());
        tokio::time::sleep(Duration::from_millis(30)).await;
        service.shutdown();
        tokio::time::timeout(Duration::from_secs(1), ticker).await.unwrap().unwrap();
    }
}
