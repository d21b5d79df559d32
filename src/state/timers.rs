//! Owned timer handles keyed by battle, so state changes can actively cancel
//! pending wakes instead of relying on the wake's own no-op guard.

use dashmap::DashMap;
use tokio::task::AbortHandle;
use uuid::Uuid;

/// Which deferred action a handle belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Countdown-to-active transition.
    Countdown,
    /// Round-duration expiry ending the current round.
    Round,
    /// Round-break expiry resuming play.
    RoundBreak,
    /// Auto-end supervisor wake.
    AutoEnd,
}

/// Registry of pending timer tasks, one slot per battle and kind.
#[derive(Default)]
pub struct TimerRegistry {
    handles: DashMap<(Uuid, TimerKind), AbortHandle>,
}

impl TimerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending task, aborting any previous one in the same slot.
    pub fn register(&self, battle_id: Uuid, kind: TimerKind, handle: AbortHandle) {
        if let Some(previous) = self.handles.insert((battle_id, kind), handle) {
            previous.abort();
        }
    }

    /// Abort and forget the pending task in the given slot, if any.
    pub fn cancel(&self, battle_id: Uuid, kind: TimerKind) -> bool {
        match self.handles.remove(&(battle_id, kind)) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every pending task for a battle. Called when the battle leaves
    /// the active state so stale wakes never fire.
    pub fn cancel_all(&self, battle_id: Uuid) {
        self.handles.retain(|(id, _), handle| {
            if *id == battle_id {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    /// Drop the slot without aborting; used by tasks that finished naturally.
    pub fn complete(&self, battle_id: Uuid, kind: TimerKind) {
        self.handles.remove(&(battle_id, kind));
    }

    /// Number of pending timers. Diagnostic only.
    pub fn pending_count(&self) -> usize {
        self.handles.len()
    }
}
