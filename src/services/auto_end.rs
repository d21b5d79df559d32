//! Auto-end supervisor: one self-rescheduling task per active battle that
//! guarantees the battle cannot outlive its configured duration.
//!
//! Each wake re-derives the deadline from the stored record instead of
//! trusting the delay it slept for, so host-driven timer corrections and
//! restarts of the supervisor both converge on the authoritative end time.
//! When the end operation keeps failing, the battle is force-cancelled so it
//! never lingers in the active state.

use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::engine,
    state::{
        SharedState,
        battle::{BattlePhase, BattleStatus},
        state_machine::{self, LifecycleEvent},
        timers::TimerKind,
    },
};

/// Attempts at ending the battle before the supervisor gives up.
pub const MAX_ATTEMPTS: u32 = 3;
/// Budget for one end attempt.
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(120);

/// What a supervisor wake decided to do next.
#[derive(Debug, PartialEq, Eq)]
pub enum Decision {
    /// The battle no longer needs supervision.
    Finished,
    /// The deadline has not been reached; sleep and check again.
    Sleep(Duration),
}

/// Spawn the next supervisor wake for a battle. Each wake re-derives the
/// deadline and schedules its successor itself.
///
/// The wake deregisters its own slot before entering the engine: ending the
/// battle cancels every pending timer for it, including this one, and an
/// abort landing mid-operation would lose the transition.
pub fn schedule(state: SharedState, battle_id: Uuid, delay: Duration) {
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task_state.timers().complete(battle_id, TimerKind::AutoEnd);
        match check_with_retries(&task_state, battle_id).await {
            Ok(Decision::Finished) => {}
            Ok(Decision::Sleep(next)) => schedule(task_state.clone(), battle_id, next),
            Err(err) => {
                error!(
                    battle_id = %battle_id,
                    error = %err,
                    "auto-end attempts exhausted; force-cancelling battle"
                );
                force_cancel(&task_state, battle_id).await;
            }
        }
    });
    state
        .timers()
        .register(battle_id, TimerKind::AutoEnd, handle.abort_handle());
}

/// One supervisor wake: decide whether the battle is past its deadline, and
/// end it when it is. Pure with respect to time via the injected clock.
pub async fn check(state: &SharedState, battle_id: Uuid) -> Result<Decision, ServiceError> {
    let Some(battle) = state.store().find(battle_id).await? else {
        debug!(battle_id = %battle_id, "auto-end woke for a missing battle");
        return Ok(Decision::Finished);
    };
    if battle.status != BattleStatus::Active {
        debug!(battle_id = %battle_id, status = ?battle.status, "battle already left the active state");
        return Ok(Decision::Finished);
    }

    let now = state.clock().now();
    let deadline = match battle.deadline() {
        Some(deadline) => deadline,
        None => {
            warn!(battle_id = %battle_id, "active battle has no deadline; ending it now");
            now
        }
    };
    if now < deadline {
        let remaining = (deadline - now)
            .try_into()
            .unwrap_or(Duration::from_secs(1));
        return Ok(Decision::Sleep(remaining));
    }

    let outcome = engine::end_battle(state, battle_id, true).await?;
    if outcome.success {
        info!(battle_id = %battle_id, winner = ?outcome.winner_id, "battle auto-ended at its deadline");
    } else {
        debug!(battle_id = %battle_id, message = ?outcome.message, "deadline passed but the battle was already ended");
    }
    Ok(Decision::Finished)
}

async fn check_with_retries(
    state: &SharedState,
    battle_id: Uuid,
) -> Result<Decision, ServiceError> {
    let mut last_error = None;
    for attempt in 1..=MAX_ATTEMPTS {
        match tokio::time::timeout(ATTEMPT_TIMEOUT, check(state, battle_id)).await {
            Ok(Ok(decision)) => return Ok(decision),
            Ok(Err(err)) => {
                warn!(battle_id = %battle_id, attempt, error = %err, "auto-end attempt failed");
                last_error = Some(err);
            }
            Err(_) => {
                warn!(battle_id = %battle_id, attempt, "auto-end attempt timed out");
                last_error = Some(ServiceError::InvalidState(
                    "auto-end attempt timed out".into(),
                ));
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| ServiceError::InvalidState("auto-end failed without a cause".into())))
}

/// Safety valve after exhausted retries: write the terminal state directly,
/// bypassing the engine that kept failing.
async fn force_cancel(state: &SharedState, battle_id: Uuid) {
    let found = match state.store().find(battle_id).await {
        Ok(found) => found,
        Err(err) => {
            error!(battle_id = %battle_id, error = %err, "force-cancel could not load the battle");
            return;
        }
    };
    let Some(mut battle) = found else {
        return;
    };
    if matches!(
        battle.status,
        BattleStatus::Finished | BattleStatus::Cancelled
    ) {
        return;
    }

    battle.status = BattleStatus::Cancelled;
    battle.phase = state_machine::advance(battle.phase, LifecycleEvent::Cancel)
        .unwrap_or(BattlePhase::Ended);
    battle.ended_at = Some(state.clock().now());
    match state.store().save(battle).await {
        Ok(()) => warn!(battle_id = %battle_id, "battle force-cancelled after repeated auto-end failures"),
        Err(err) => {
            error!(battle_id = %battle_id, error = %err, "force-cancel failed to persist the terminal state");
        }
    }
    state.timers().cancel_all(battle_id);
    state.forget_battle_lock(battle_id);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use time::macros::datetime;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::battle_store::{
            BattleStore, InMemoryBattleStore, StorageError, StorageResult,
        },
        state::{
            AppState,
            battle::{Battle, BattleConfig, Participant, WinCondition},
        },
    };

    fn active_battle(now: time::OffsetDateTime) -> Battle {
        let mut battle = Battle::new(
            Participant {
                user_id: Uuid::new_v4(),
                stream_id: "ch".into(),
                display_name: "host".into(),
            },
            None,
            vec![],
            300,
            5,
            1,
            5,
            BattleConfig {
                end_time: None,
                goal_threshold: 5,
                win_condition: WinCondition::Score,
                round_break_secs: 10,
            },
        );
        battle.status = BattleStatus::Active;
        battle.phase = BattlePhase::Active;
        battle.started_at = Some(now);
        battle.open_round(1);
        battle
    }

    fn test_state() -> (SharedState, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_at(datetime!(2026-01-01 12:00 UTC)));
        let state = AppState::with_parts(
            AppConfig::default(),
            Arc::new(InMemoryBattleStore::new()),
            clock.clone(),
        );
        (state, clock)
    }

    #[tokio::test]
    async fn check_sleeps_until_the_deadline() {
        let (state, _) = test_state();
        let battle = active_battle(state.clock().now());
        let id = battle.id;
        state.store().save(battle).await.unwrap();

        let decision = check(&state, id).await.unwrap();
        assert_eq!(decision, Decision::Sleep(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn check_ends_the_battle_past_the_deadline() {
        let (state, clock) = test_state();
        let battle = active_battle(state.clock().now());
        let id = battle.id;
        state.store().save(battle).await.unwrap();

        clock.advance(time::Duration::seconds(301));
        let decision = check(&state, id).await.unwrap();
        assert_eq!(decision, Decision::Finished);

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.status, BattleStatus::Finished);
        assert_eq!(battle.ended_at, Some(state.clock().now()));
    }

    #[tokio::test]
    async fn check_prefers_the_configured_end_time() {
        let (state, clock) = test_state();
        let mut battle = active_battle(state.clock().now());
        // The host extended the battle beyond started_at + duration.
        battle.config.end_time = Some(state.clock().now() + time::Duration::seconds(600));
        let id = battle.id;
        state.store().save(battle).await.unwrap();

        clock.advance(time::Duration::seconds(301));
        let decision = check(&state, id).await.unwrap();
        assert_eq!(decision, Decision::Sleep(Duration::from_secs(299)));
    }

    #[tokio::test]
    async fn check_finishes_for_missing_or_ended_battles() {
        let (state, _) = test_state();
        assert_eq!(
            check(&state, Uuid::new_v4()).await.unwrap(),
            Decision::Finished
        );

        let mut battle = active_battle(state.clock().now());
        battle.status = BattleStatus::Finished;
        let id = battle.id;
        state.store().save(battle).await.unwrap();
        assert_eq!(check(&state, id).await.unwrap(), Decision::Finished);
    }

    struct FailingStore;

    impl BattleStore for FailingStore {
        fn find(&self, _id: Uuid) -> BoxFuture<'static, StorageResult<Option<Battle>>> {
            Box::pin(async {
                Err(StorageError::unavailable(
                    "backend down".into(),
                    std::io::Error::new(std::io::ErrorKind::Other, "refused"),
                ))
            })
        }

        fn save(&self, _battle: Battle) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async {
                Err(StorageError::unavailable(
                    "backend down".into(),
                    std::io::Error::new(std::io::ErrorKind::Other, "refused"),
                ))
            })
        }

        fn find_live_by_challenger_stream(
            &self,
            _stream_id: &str,
        ) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
            Box::pin(async { Ok(None) })
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn retries_exhaust_against_a_failing_store() {
        let clock = Arc::new(ManualClock::starting_at(datetime!(2026-01-01 12:00 UTC)));
        let state = AppState::with_parts(AppConfig::default(), Arc::new(FailingStore), clock);

        let result = check_with_retries(&state, Uuid::new_v4()).await;
        assert!(matches!(result, Err(ServiceError::Unavailable(_))));
    }

    /// Store whose futures yield once before resolving, like any
    /// network-backed implementation would.
    struct YieldingStore(InMemoryBattleStore);

    impl BattleStore for YieldingStore {
        fn find(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<Battle>>> {
            let inner = self.0.find(id);
            Box::pin(async move {
                tokio::task::yield_now().await;
                inner.await
            })
        }

        fn save(&self, battle: Battle) -> BoxFuture<'static, StorageResult<()>> {
            let inner = self.0.save(battle);
            Box::pin(async move {
                tokio::task::yield_now().await;
                inner.await
            })
        }

        fn find_live_by_challenger_stream(
            &self,
            stream_id: &str,
        ) -> BoxFuture<'static, StorageResult<Option<Uuid>>> {
            self.0.find_live_by_challenger_stream(stream_id)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.0.health_check()
        }
    }

    #[tokio::test]
    async fn scheduled_wake_ends_the_battle_against_a_store_that_yields() {
        let clock = Arc::new(ManualClock::starting_at(datetime!(2026-01-01 12:00 UTC)));
        let state = AppState::with_parts(
            AppConfig::default(),
            Arc::new(YieldingStore(InMemoryBattleStore::new())),
            clock.clone(),
        );
        let battle = active_battle(state.clock().now());
        let id = battle.id;
        state.store().save(battle).await.unwrap();
        clock.advance(time::Duration::seconds(301));

        // Ending the battle cancels every timer slot for it; the wake that
        // triggers the end must survive that cleanup even when the store
        // yields mid-operation.
        schedule(state.clone(), id, Duration::ZERO);

        let finished = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let battle = state.store().find(id).await.unwrap().unwrap();
                if battle.status == BattleStatus::Finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(finished.is_ok(), "battle was never auto-ended");

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.phase, BattlePhase::Ended);
    }

    #[tokio::test]
    async fn force_cancel_writes_the_terminal_state() {
        let (state, _) = test_state();
        let battle = active_battle(state.clock().now());
        let id = battle.id;
        state.store().save(battle).await.unwrap();

        force_cancel(&state, id).await;

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.status, BattleStatus::Cancelled);
        assert_eq!(battle.phase, BattlePhase::Ended);
        assert!(battle.ended_at.is_some());
    }
}
