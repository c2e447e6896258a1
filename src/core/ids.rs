//! Identifiers
//!
//! Participant ids come from the surrounding platform; battle ids are
//! minted here when a pairing succeeds.

use std::fmt;
use serde::{Serialize, Deserialize};

// =============================================================================
// PARTICIPANT ID
// =============================================================================

/// Platform-assigned participant identifier.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub u64);

impl ParticipantId {
    /// Reserved id of the scripted fallback opponent.
    pub const FALLBACK_BOT: ParticipantId = ParticipantId(0);

    /// Whether this is the scripted fallback opponent.
    pub fn is_fallback_bot(&self) -> bool {
        *self == Self::FALLBACK_BOT
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ParticipantId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

// =============================================================================
// BATTLE ID
// =============================================================================

/// Unique battle identifier (UUID v4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BattleId(pub uuid::Uuid);

impl BattleId {
    /// Mint a fresh id.
    pub fn new_v4() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Short hex form for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.as_bytes()[..4])
    }
}

impl fmt::Display for BattleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_id_ordering() {
        let mut ids = vec![ParticipantId(30), ParticipantId(1), ParticipantId(7)];
        ids.sort();
        assert_eq!(ids, vec![ParticipantId(1), ParticipantId(7), ParticipantId(30)]);
    }

    #[test]
    fn test_fallback_bot_reserved() {
        assert!(ParticipantId(0).is_fallback_bot());
        assert!(!ParticipantId(1).is_fallback_bot());
    }

    #[test]
    fn test_battle_id_short() {
        let id = BattleId::from_bytes([0xab; 16]);
        assert_eq!(id.short(), "abababab");
    }

    #[test]
    fn test_ids_serialize_transparent() {
        assert_eq!(serde_json::to_string(&ParticipantId(42)).unwrap(), "42");

        let id = BattleId::from_bytes([1; 16]);
        let json = serde_json::to_string(&id).unwrap();
        let back: BattleId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
