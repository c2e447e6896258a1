//! Arena Configuration
//!
//! One struct aggregating every component's tunables. Defaults carry the
//! production constants; `from_env` overrides them from `ARENA_*`
//! variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::arena::auth::AuthConfig;
use crate::arena::gateway::GatewayConfig;
use crate::battle::engine::BattleConfig;
use crate::matchmaking::queue::QueueConfig;
use crate::rating::calc::RatingConfig;

/// Complete arena configuration.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Combat tunables.
    pub battle: BattleConfig,
    /// Matchmaking tunables.
    pub queue: QueueConfig,
    /// Rating and progression tunables.
    pub rating: RatingConfig,
    /// WebSocket gateway.
    pub gateway: GatewayConfig,
    /// How often the ticker pairs, times out and sweeps.
    pub tick_interval: Duration,
    /// Offer the fallback bot when a search times out.
    pub bot_fallback: bool,
    /// JSON ledger location; in-memory when unset.
    pub ledger_path: Option<PathBuf>,
    /// Base nonce for battle seed derivation.
    pub seed: Option<u64>,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            battle: BattleConfig::default(),
            queue: QueueConfig::default(),
            rating: RatingConfig::default(),
            gateway: GatewayConfig::default(),
            tick_interval: Duration::from_secs(1),
            bot_fallback: true,
            ledger_path: None,
            seed: None,
        }
    }
}

impl ArenaConfig {
    /// Create config from environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse("ARENA_BIND_ADDR") {
            config.gateway.bind_addr = addr;
        }
        if let Some(max) = env_parse("ARENA_MAX_CONNECTIONS") {
            config.gateway.max_connections = max;
        }
        if let Some(ms) = env_parse::<u64>("ARENA_TICK_MS") {
            config.tick_interval = Duration::from_millis(ms.max(10));
        }
        if let Some(enabled) = env_flag("ARENA_BOT_FALLBACK") {
            config.bot_fallback = enabled;
        }
        if let Some(secs) = env_parse("ARENA_EXPANSION_SECS") {
            config.queue.expansion_threshold = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse("ARENA_QUEUE_TIMEOUT_SECS") {
            config.queue.timeout = Duration::from_secs(secs);
        }
        if let Some(band) = env_parse("ARENA_RATING_BAND") {
            config.queue.narrow_band = band;
        }
        if let Some(rounds) = env_parse("ARENA_MAX_ROUNDS") {
            config.battle.max_rounds = rounds;
        }
        if let Some(secs) = env_parse("ARENA_BATTLE_SECS") {
            config.battle.duration = Duration::from_secs(secs);
        }
        config.gateway.auth = AuthConfig::from_env();
        config.ledger_path = std::env::var("ARENA_LEDGER_PATH").ok().map(PathBuf::from);
        config.seed = env_parse("ARENA_SEED");

        config
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid {}={:?}", name, raw);
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "yes" | "on"))
}
