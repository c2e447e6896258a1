//! Protocol Messages
//!
//! Commands into the arena and events out of it. Everything is JSON
//! (internally tagged) for debugging ease; action submission also has a
//! compact bincode frame for clients on the hot path.

use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::battle::engine::{BattleOutcome, EndReason};
use crate::battle::fighter::{Action, FighterSnapshot};
use crate::battle::trace::RoundSummary;
use crate::core::ids::{BattleId, ParticipantId};
use crate::rating::store::{LevelProgress, RatingChange};

// =============================================================================
// INBOUND
// =============================================================================

/// Commands accepted by the arena service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ArenaCommand {
    /// Prove the connection's identity. Gateway only.
    Authenticate {
        /// Platform-issued JWT.
        token: String,
    },

    /// Start searching for an opponent.
    JoinQueue {
        /// Searching participant.
        participant_id: ParticipantId,
        /// Name shown to the opponent.
        display_name: String,
        /// Rating snapshot; read from the rating store when absent.
        #[serde(default)]
        rating: Option<u32>,
        /// Wager; only equal stakes pair.
        #[serde(default)]
        stake: u64,
    },

    /// Stop searching.
    LeaveQueue {
        /// Searching participant.
        participant_id: ParticipantId,
    },

    /// Choose this round's action.
    SubmitAction {
        /// Target battle.
        battle_id: BattleId,
        /// Acting fighter.
        participant_id: ParticipantId,
        /// Chosen action.
        action: Action,
    },

    /// Concede a battle.
    Forfeit {
        /// Target battle.
        battle_id: BattleId,
        /// Conceding fighter.
        participant_id: ParticipantId,
    },

    /// Consume one pending level-up reward.
    ClaimReward {
        /// Reward owner.
        participant_id: ParticipantId,
    },

    /// Drive timers and sweeps. Internal only.
    Tick {
        /// Tick time; the service clock when absent.
        #[serde(default)]
        now: Option<DateTime<Utc>>,
    },
}

impl ArenaCommand {
    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Participant the command acts for, if any.
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            ArenaCommand::JoinQueue { participant_id, .. }
            | ArenaCommand::LeaveQueue { participant_id }
            | ArenaCommand::SubmitAction { participant_id, .. }
            | ArenaCommand::Forfeit { participant_id, .. }
            | ArenaCommand::ClaimReward { participant_id } => Some(*participant_id),
            ArenaCommand::Authenticate { .. } | ArenaCommand::Tick { .. } => None,
        }
    }
}

/// Compact binary action submission.
///
/// Flat struct so bincode can encode it; tagged enums need JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionFrame {
    /// Battle id bytes.
    pub battle_id: [u8; 16],
    /// Submitting participant.
    pub participant_id: u64,
    /// 0 = attack, 1 = defend, 2 = heal.
    pub action: u8,
}

impl ActionFrame {
    /// Build a frame.
    pub fn new(battle_id: BattleId, participant_id: ParticipantId, action: Action) -> Self {
        let action = match action {
            Action::Attack => 0,
            Action::Defend => 1,
            Action::Heal => 2,
        };
        Self {
            battle_id: *battle_id.as_bytes(),
            participant_id: participant_id.0,
            action,
        }
    }

    /// Serialize to binary.
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }

    /// Convert into a submit command. None for an unknown action code.
    pub fn into_command(self) -> Option<ArenaCommand> {
        let action = match self.action {
            0 => Action::Attack,
            1 => Action::Defend,
            2 => Action::Heal,
            _ => return None,
        };
        Some(ArenaCommand::SubmitAction {
            battle_id: BattleId::from_bytes(self.battle_id),
            participant_id: ParticipantId(self.participant_id),
            action,
        })
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Events emitted by the arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArenaEvent {
    /// Two sides were matched and a battle started.
    BattlePaired {
        /// New battle.
        battle_id: BattleId,
        /// First side.
        fighter_a: FighterSnapshot,
        /// Second side.
        fighter_b: FighterSnapshot,
        /// Shared wager.
        stake: u64,
        /// Second side is the fallback opponent.
        vs_bot: bool,
    },

    /// A round resolved.
    RoundResolved {
        /// Battle.
        battle_id: BattleId,
        /// Round that resolved.
        round: u32,
        /// What happened.
        summary: RoundSummary,
    },

    /// A battle ended and was settled.
    BattleEnded {
        /// Battle.
        battle_id: BattleId,
        /// Both fighters.
        participants: [ParticipantId; 2],
        /// Winner or draw.
        outcome: BattleOutcome,
        /// Why it ended.
        reason: EndReason,
        /// Committed rating movement.
        rating_changes: Vec<RatingChange>,
        /// Committed XP awards.
        progress: Vec<LevelProgress>,
    },

    /// A search hit the global timeout.
    SearchTimedOut {
        /// Participant whose ticket expired.
        participant_id: ParticipantId,
        /// Battle against the fallback opponent, when one was started.
        fallback_battle: Option<BattleId>,
    },
}

impl ArenaEvent {
    /// Whether a participant should see this event.
    pub fn concerns(&self, participant: ParticipantId) -> bool {
        match self {
            ArenaEvent::BattlePaired { fighter_a, fighter_b, .. } => {
                fighter_a.id == participant || fighter_b.id == participant
            }
            ArenaEvent::RoundResolved { summary, .. } => {
                summary.hp_after.iter().any(|(id, _)| *id == participant)
            }
            ArenaEvent::BattleEnded { participants, .. } => participants.contains(&participant),
            ArenaEvent::SearchTimedOut { participant_id, .. } => *participant_id == participant,
        }
    }
}

/// Positive acknowledgement of a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ack", rename_all = "snake_case")]
pub enum Ack {
    /// Token accepted; the connection now acts for `participant_id`.
    Authenticated {
        /// Participant derived from the token subject.
        participant_id: ParticipantId,
    },
    /// Ticket accepted; `battle_id` is set if it paired at once.
    Queued {
        /// Ticket owner.
        participant_id: ParticipantId,
        /// Rating snapshot used for pairing.
        rating: u32,
        /// Battle started by an immediate pairing.
        battle_id: Option<BattleId>,
    },
    /// Ticket removed.
    Left {
        /// Former ticket owner.
        participant_id: ParticipantId,
    },
    /// Action recorded.
    ActionAccepted {
        /// Battle.
        battle_id: BattleId,
        /// Round the action was recorded for.
        round: u32,
        /// Whether that round resolved.
        resolved: bool,
    },
    /// Battle conceded.
    Forfeited {
        /// Conceded battle.
        battle_id: BattleId,
    },
    /// Reward consumed.
    RewardClaimed {
        /// Reward owner.
        participant_id: ParticipantId,
        /// Rewards still pending.
        remaining: u32,
    },
    /// Tick processed.
    Ticked {
        /// Battles started by pairing.
        paired: usize,
        /// Tickets that timed out.
        timed_out: usize,
        /// Battles closed by the sweeper.
        swept: usize,
    },
}

/// Error codes, one per failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Bad or duplicate action, wrong participant, reserved id.
    Validation,
    /// Unknown battle or ticket.
    NotFound,
    /// Missing or invalid credentials, or acting for someone else.
    Unauthenticated,
    /// Lost a race with another writer; safe to retry.
    ConcurrencyConflict,
    /// Server-side failure.
    Internal,
}

/// Error reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Failure class.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Arena event.
    Event(ArenaEvent),
    /// Command acknowledgement.
    Ack(Ack),
    /// Command failure.
    Error(ServerError),
    /// Server is going away.
    Shutdown {
        /// Why.
        reason: String,
    },
}

impl ServerMessage {
    /// Error reply.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError { code, message: message.into() })
    }

    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
