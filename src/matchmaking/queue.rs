//! Matchmaking Queue
//!
//! Waiting search tickets and the pairing rule: equal stake, rating gap
//! inside the search band, closest rating first. The band widens to "any
//! opponent" once a ticket has waited past the expansion threshold.
//!
//! The queue is plain data; the caller holds it behind a single lock so a
//! pairing removes both tickets atomically.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use tracing::{debug, info};

use crate::core::clock::elapsed_between;
use crate::core::ids::{BattleId, ParticipantId};
use crate::core::rng::DeterministicRng;
use crate::battle::engine::{Battle, BattleConfig};
use crate::battle::fighter::Fighter;

/// Configuration for the matchmaking queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Allowed rating gap before expansion.
    pub narrow_band: u32,
    /// Wait after which any rating is accepted.
    pub expansion_threshold: Duration,
    /// Wait after which a ticket is dropped.
    pub timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            narrow_band: 200,
            expansion_threshold: Duration::from_secs(60),
            timeout: Duration::from_secs(3600),
        }
    }
}

/// A participant waiting for an opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTicket {
    /// Participant identifier.
    pub participant_id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Rating snapshot at enqueue time.
    pub rating: u32,
    /// Wagered amount.
    pub stake: u64,
    /// When the ticket was created.
    pub enqueued_at: DateTime<Utc>,
}

impl QueueTicket {
    /// Create a ticket.
    pub fn new(
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        rating: u32,
        stake: u64,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            participant_id,
            display_name: display_name.into(),
            rating,
            stake,
            enqueued_at,
        }
    }

    /// Time this ticket has been waiting.
    pub fn waited(&self, now: DateTime<Utc>) -> Duration {
        elapsed_between(self.enqueued_at, now)
    }
}

/// Allowed rating gap for a given wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchRange {
    /// At most this many rating points apart.
    Band(u32),
    /// Any opponent.
    Any,
}

impl SearchRange {
    /// Whether a rating gap fits the range.
    pub fn allows(self, gap: u32) -> bool {
        match self {
            SearchRange::Band(band) => gap <= band,
            SearchRange::Any => true,
        }
    }
}

/// Two tickets removed from the queue together.
#[derive(Debug, Clone)]
pub struct Pairing {
    /// The ticket that initiated the search.
    pub seeker: QueueTicket,
    /// The selected opponent.
    pub opponent: QueueTicket,
}

impl Pairing {
    /// Rating gap between the two sides.
    pub fn rating_gap(&self) -> u32 {
        self.seeker.rating.abs_diff(self.opponent.rating)
    }

    /// Create the battle for this pairing. The longer-waiting side is fighter A.
    pub fn start_battle(&self, config: &BattleConfig, now: DateTime<Utc>, nonce: u64) -> Battle {
        let (first, second) = if self.opponent.enqueued_at <= self.seeker.enqueued_at {
            (&self.opponent, &self.seeker)
        } else {
            (&self.seeker, &self.opponent)
        };
        let id = BattleId::new_v4();
        let rng = DeterministicRng::for_battle(&id, [first.participant_id, second.participant_id], nonce);

        Battle::new(
            id,
            Fighter::new(first.participant_id, first.display_name.clone(), config.max_hp, config.base_armor),
            Fighter::new(second.participant_id, second.display_name.clone(), config.max_hp, config.base_armor),
            self.seeker.stake,
            now,
            config.clone(),
            rng,
        )
    }
}

/// Queue errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// Participant already has a ticket.
    #[error("Already queued")]
    AlreadyQueued,

    /// Participant has no ticket.
    #[error("Not queued")]
    NotQueued,

    /// Id is reserved for the fallback opponent.
    #[error("Reserved participant id")]
    ReservedParticipant,

    /// Participant is already fighting.
    #[error("Already in a battle")]
    AlreadyInBattle,
}

/// Waiting tickets keyed by participant.
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    config: QueueConfig,
    tickets: BTreeMap<ParticipantId, QueueTicket>,
    pairs_made: u64,
}

impl MatchmakingQueue {
    /// Create an empty queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            tickets: BTreeMap::new(),
            pairs_made: 0,
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Add a ticket.
    pub fn enqueue(&mut self, ticket: QueueTicket) -> Result<(), QueueError> {
        if ticket.participant_id.is_fallback_bot() {
            return Err(QueueError::ReservedParticipant);
        }
        if self.tickets.contains_key(&ticket.participant_id) {
            return Err(QueueError::AlreadyQueued);
        }

        debug!(
            "Participant {} queued (rating {}, stake {})",
            ticket.participant_id, ticket.rating, ticket.stake
        );
        self.tickets.insert(ticket.participant_id, ticket);
        Ok(())
    }

    /// Remove a ticket on explicit cancel.
    pub fn cancel(&mut self, participant: &ParticipantId) -> Result<QueueTicket, QueueError> {
        let ticket = self.tickets.remove(participant).ok_or(QueueError::NotQueued)?;
        debug!("Participant {} left the queue", participant);
        Ok(ticket)
    }

    /// Check if a participant is queued.
    pub fn contains(&self, participant: &ParticipantId) -> bool {
        self.tickets.contains_key(participant)
    }

    /// Get a ticket.
    pub fn ticket(&self, participant: &ParticipantId) -> Option<&QueueTicket> {
        self.tickets.get(participant)
    }

    /// Number of waiting tickets.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Total pairings made.
    pub fn pairs_made(&self) -> u64 {
        self.pairs_made
    }

    /// Allowed rating gap after waiting `elapsed`.
    pub fn search_range(&self, elapsed: Duration) -> SearchRange {
        if elapsed >= self.config.expansion_threshold {
            SearchRange::Any
        } else {
            SearchRange::Band(self.config.narrow_band)
        }
    }

    /// Try to pair `participant` with the best compatible ticket.
    ///
    /// Candidates need an equal stake and a rating gap inside the search
    /// range of the longer wait of the two. The smallest gap wins, ties go to
    /// the earliest enqueue. On success both tickets leave the queue.
    pub fn try_pair(&mut self, participant: &ParticipantId, now: DateTime<Utc>) -> Option<Pairing> {
        let seeker = self.tickets.get(participant)?;

        let best = self.tickets.values()
            .filter(|c| c.participant_id != seeker.participant_id)
            .filter(|c| c.stake == seeker.stake)
            .filter(|c| {
                let waited = seeker.waited(now).max(c.waited(now));
                self.search_range(waited).allows(seeker.rating.abs_diff(c.rating))
            })
            .min_by_key(|c| (seeker.rating.abs_diff(c.rating), c.enqueued_at, c.participant_id))
            .map(|c| c.participant_id)?;

        let seeker = self.tickets.remove(participant)?;
        let opponent = self.tickets.remove(&best)?;
        self.pairs_made += 1;

        info!(
            "Paired {} ({}) with {} ({}), stake {}",
            seeker.participant_id, seeker.rating, opponent.participant_id, opponent.rating, seeker.stake
        );
        Some(Pairing { seeker, opponent })
    }

    /// Pair as many waiting tickets as possible, oldest first.
    pub fn pair_all(&mut self, now: DateTime<Utc>) -> Vec<Pairing> {
        let mut order: Vec<(DateTime<Utc>, ParticipantId)> = self.tickets.values()
            .map(|t| (t.enqueued_at, t.participant_id))
            .collect();
        order.sort();

        let mut pairings = Vec::new();
        for (_, participant) in order {
            if !self.contains(&participant) {
                continue;
            }
            if let Some(pairing) = self.try_pair(&participant, now) {
                pairings.push(pairing);
            }
        }
        pairings
    }

    /// Drop tickets older than the global timeout and return them.
    pub fn sweep_timeouts(&mut self, now: DateTime<Utc>) -> Vec<QueueTicket> {
        let timeout = self.config.timeout;
        let expired: Vec<ParticipantId> = self.tickets.values()
            .filter(|t| t.waited(now) > timeout)
            .map(|t| t.participant_id)
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for id in expired {
            if let Some(ticket) = self.tickets.remove(&id) {
                info!("Search for participant {} timed out", id);
                removed.push(ticket);
            }
        }
        removed
    }
}
