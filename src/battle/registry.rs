//! Active Battle Registry
//!
//! Holds every in-flight battle keyed by id. Each battle sits behind its
//! own mutex, so submissions and round resolution for one battle are
//! serialized while different battles proceed independently.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::core::ids::{BattleId, ParticipantId};
use crate::battle::engine::{Battle, BattleError, BattleResult};

/// Shared handle to one battle.
pub type BattleHandle = Arc<Mutex<Battle>>;

/// Registry of active battles.
pub struct ActiveBattleRegistry {
    /// Battles by id.
    battles: RwLock<BTreeMap<BattleId, BattleHandle>>,
    /// Participant to battle mapping.
    participant_battles: RwLock<BTreeMap<ParticipantId, BattleId>>,
}

impl ActiveBattleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            battles: RwLock::new(BTreeMap::new()),
            participant_battles: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a battle. Returns its handle.
    pub async fn register(&self, battle: Battle) -> BattleHandle {
        let id = battle.id;
        let participants = battle.participants();
        let handle = Arc::new(Mutex::new(battle));

        {
            let mut battles = self.battles.write().await;
            battles.insert(id, handle.clone());
        }
        {
            let mut by_participant = self.participant_battles.write().await;
            for participant in participants {
                if !participant.is_fallback_bot() {
                    by_participant.insert(participant, id);
                }
            }
        }

        debug!("Registered battle {}", id.short());
        handle
    }

    /// Remove a battle. Returns its handle if it was present.
    pub async fn unregister(&self, id: &BattleId) -> Option<BattleHandle> {
        let removed = {
            let mut battles = self.battles.write().await;
            battles.remove(id)
        };

        if removed.is_some() {
            let mut by_participant = self.participant_battles.write().await;
            by_participant.retain(|_, battle_id| battle_id != id);
            debug!("Unregistered battle {}", id.short());
        }
        removed
    }

    /// Get a battle by id.
    pub async fn get(&self, id: &BattleId) -> Option<BattleHandle> {
        let battles = self.battles.read().await;
        battles.get(id).cloned()
    }

    /// Get a battle by id or fail with `NotFound`.
    pub async fn require(&self, id: &BattleId) -> Result<BattleHandle, BattleError> {
        self.get(id).await.ok_or(BattleError::NotFound)
    }

    /// Battle a participant is currently fighting in.
    pub async fn battle_of(&self, participant: &ParticipantId) -> Option<BattleId> {
        let by_participant = self.participant_battles.read().await;
        by_participant.get(participant).copied()
    }

    /// Get active battle count.
    pub async fn len(&self) -> usize {
        self.battles.read().await.len()
    }

    /// Whether no battles are registered.
    pub async fn is_empty(&self) -> bool {
        self.battles.read().await.is_empty()
    }

    /// Close every battle that has outlived its time or round budget.
    ///
    /// Each closed battle is claimed for settlement and removed from the
    /// registry; its result is returned so the caller can notify both sides
    /// and commit rating changes exactly once. Battles that already ended but
    /// were never settled are collected too.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Vec<BattleResult> {
        let handles: Vec<(BattleId, BattleHandle)> = {
            let battles = self.battles.read().await;
            battles.iter().map(|(id, h)| (*id, h.clone())).collect()
        };

        let mut closed = Vec::new();
        for (id, handle) in handles {
            let result = {
                let mut battle = handle.lock().await;
                if battle.is_active() && battle.expire(now).is_none() {
                    continue;
                }
                // Settled elsewhere; drop the stale entry.
                if !battle.mark_settled() {
                    None
                } else {
                    battle.result()
                }
            };

            self.unregister(&id).await;
            if let Some(result) = result {
                info!("Swept battle {} ({:?})", id.short(), result.reason);
                closed.push(result);
            }
        }
        closed
    }
}

impl Default for ActiveBattleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
