//! Shared application state: battle store, broadcast hub, timers, and clock.

pub mod battle;
pub mod broadcast;
pub mod state_machine;
pub mod timers;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    dao::battle_store::{BattleStore, InMemoryBattleStore},
};

pub use self::broadcast::ChannelHub;
pub use self::timers::TimerRegistry;

/// Cheaply clonable handle to the shared application state.
pub type SharedState = Arc<AppState>;

/// Central application state shared by request handlers and background tasks.
pub struct AppState {
    config: AppConfig,
    store: Arc<dyn BattleStore>,
    hub: ChannelHub,
    timers: TimerRegistry,
    clock: Arc<dyn Clock>,
    battle_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl AppState {
    /// Construct the production state: in-memory store and system clock.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_parts(
            config,
            Arc::new(InMemoryBattleStore::new()),
            Arc::new(SystemClock),
        )
    }

    /// Construct state from explicit collaborators. Used by tests to inject a
    /// manual clock, and available for alternative store implementations.
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn BattleStore>,
        clock: Arc<dyn Clock>,
    ) -> SharedState {
        let capacity = config.channel_capacity;
        Arc::new(Self {
            config,
            store,
            hub: ChannelHub::new(capacity),
            timers: TimerRegistry::new(),
            clock,
            battle_locks: DashMap::new(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Durable battle records.
    pub fn store(&self) -> &Arc<dyn BattleStore> {
        &self.store
    }

    /// Broadcast hub fanning events out to named channels.
    pub fn hub(&self) -> &ChannelHub {
        &self.hub
    }

    /// Pending timer handles keyed by battle.
    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Injected time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Per-battle mutation lock. Gift bursts and the end-of-battle race both
    /// serialize their read-modify-write cycles through this.
    pub fn battle_lock(&self, battle_id: Uuid) -> Arc<Mutex<()>> {
        self.battle_locks
            .entry(battle_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the lock slot of a battle that reached a terminal state.
    pub fn forget_battle_lock(&self, battle_id: Uuid) {
        self.battle_locks.remove(&battle_id);
    }
}
