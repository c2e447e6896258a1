//! Duel Arena Server
//!
//! Runs the arena service behind the WebSocket gateway. `--demo` plays a
//! scripted bout against the fallback opponent and exits.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use duel_arena::{
    VERSION,
    arena::{ArenaEvent, ArenaGateway, ArenaService},
    battle::Action,
    config::ArenaConfig,
    core::{Clock, ManualClock, ParticipantId, SystemClock},
    rating::{JsonFileLedger, LedgerBackend, MemoryLedger, RatingStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Duel Arena Server v{}", VERSION);
    let config = ArenaConfig::from_env();

    if std::env::args().any(|a| a == "--demo") {
        return demo_bout(config).await;
    }

    let ledger: Arc<dyn LedgerBackend> = match &config.ledger_path {
        Some(path) => {
            info!("Rating ledger: {}", path.display());
            Arc::new(JsonFileLedger::new(path))
        }
        None => {
            info!("Rating ledger: in memory");
            Arc::new(MemoryLedger::new())
        }
    };
    let ratings = RatingStore::open(config.rating.clone(), ledger).context("Failed to open rating ledger")?;

    let service = Arc::new(ArenaService::new(config.clone(), ratings, Arc::new(SystemClock)));
    let ticker = tokio::spawn(service.clone().run_ticker());

    if !config.gateway.auth.is_configured() {
        warn!("No ARENA_AUTH_SECRET or ARENA_AUTH_PUBLIC_KEY_PEM set; every login will be refused");
    }
    let gateway = ArenaGateway::new(config.gateway.clone(), service.clone());
    let shutdown = {
        let service = service.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received");
                service.shutdown();
            }
        })
    };

    gateway.run().await.context("Gateway failed")?;

    shutdown.abort();
    let _ = ticker.await;
    service.flush().await.context("Final ledger flush failed")?;
    info!("Server stopped");
    Ok(())
}

/// Play one bout against the fallback opponent on a manual clock.
async fn demo_bout(mut config: ArenaConfig) -> anyhow::Result<()> {
    info!("=== Starting Demo Bout ===");

    config.bot_fallback = true;
    config.seed = Some(config.seed.unwrap_or(12345));
    let clock = ManualClock::new(chrono::Utc::now());
    let ratings = RatingStore::in_memory(config.rating.clone());
    let service = ArenaService::new(config.clone(), ratings, Arc::new(clock.clone()));
    let mut events = service.subscribe();

    let hero = ParticipantId(1);
    service.join_queue(hero, "Hero".to_string(), None, 0).await?;

    // Nobody else is searching; run out the queue timeout
    clock.advance(config.queue.timeout + Duration::from_secs(1));
    service.tick(clock.now()).await;

    let mut battle_id = None;
    loop {
        while let Ok(event) = events.try_recv() {
            match event {
                ArenaEvent::BattlePaired { battle_id: id, fighter_b, .. } => {
                    info!("Battle {} against {}", id.short(), fighter_b.display_name);
                    battle_id = Some(id);
                }
                ArenaEvent::RoundResolved { summary, .. } => {
                    info!("{}", summary);
                }
                ArenaEvent::BattleEnded { outcome, reason, rating_changes, .. } => {
                    info!("=== Bout Over: {:?} ({:?}) ===", outcome, reason);
                    for change in rating_changes {
                        info!("Participant {}: {} -> {} ({:+})",
                              change.participant_id, change.before, change.after, change.delta);
                    }
                    let record = service.ratings().get(hero).await;
                    info!("Hero: level {}, {} XP, rank #{}",
                          record.level, record.xp, service.ratings().rank(hero).await);
                    return Ok(());
                }
                ArenaEvent::SearchTimedOut { .. } => {
                    info!("No opponent found, fallback bot steps in");
                }
            }
        }

        let Some(id) = battle_id else {
            anyhow::bail!("Fallback battle was not started");
        };
        let handle = service.registry().require(&id).await?;
        let action = {
            let battle = handle.lock().await;
            let fighter = &battle.fighter_a;
            if fighter.hp_fraction() < 0.35 {
                Action::Heal
            } else if fighter.attack_locked() {
                Action::Defend
            } else {
                Action::Attack
            }
        };
        service.submit_action(id, hero, action).await?;
        clock.advance(Duration::from_secs(5));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_demo_bout_finishes() {
        let config = ArenaConfig { seed: Some(7), ..ArenaConfig::default() };
        demo_bout(config).await.unwrap();
    }
}
