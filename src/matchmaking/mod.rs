//! Matchmaking
//!
//! Search tickets and rating-band pairing.

pub mod queue;

pub use queue::{MatchmakingQueue, Pairing, QueueConfig, QueueError, QueueTicket, SearchRange};
