//! Battle engine: every state transition and scoring operation on a battle.
//!
//! All mutating operations follow the same shape: take the per-battle lock,
//! load the record, check the lifecycle guard, mutate, save, then broadcast.
//! The save always happens before the broadcast so subscribers never observe
//! an event ahead of the state it describes. Benign races (double start,
//! double end, gifts after the whistle) are absorbed into unsuccessful
//! acknowledgements rather than errors.

use std::{cmp::Ordering, time::Duration};

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dto::battle::{
        ActionResponse, BattleSummary, EndBattleResponse, GiftRequest, RoundEndResponse,
        StreamStatusRequest, TimerSyncRequest,
    },
    error::ServiceError,
    services::{auto_end, fanout},
    state::{
        SharedState,
        battle::{Battle, BattlePhase, BattleSide, BattleStatus, ParticipantRole, WinCondition},
        state_machine::{self, LifecycleEvent},
        timers::TimerKind,
    },
};

/// Acknowledgement of an engine operation that either applied or was absorbed.
#[derive(Debug, Clone)]
pub struct EngineAck {
    /// Whether the operation changed anything.
    pub success: bool,
    /// Explanation when it did not.
    pub message: Option<String>,
}

impl EngineAck {
    fn applied() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn absorbed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

impl From<EngineAck> for ActionResponse {
    fn from(ack: EngineAck) -> Self {
        ActionResponse {
            success: ack.success,
            message: ack.message,
        }
    }
}

/// Outcome of an end-round operation.
#[derive(Debug)]
pub struct RoundEndOutcome {
    /// Whether a round actually ended.
    pub success: bool,
    /// Explanation when it did not.
    pub message: Option<String>,
    /// Side that won the ended round, `None` on a tie.
    pub round_winner: Option<BattleSide>,
    /// True when the ended round was the last one and the battle finished.
    pub is_battle_finished: bool,
}

impl RoundEndOutcome {
    fn absorbed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            round_winner: None,
            is_battle_finished: false,
        }
    }
}

impl From<RoundEndOutcome> for RoundEndResponse {
    fn from(outcome: RoundEndOutcome) -> Self {
        RoundEndResponse {
            success: outcome.success,
            message: outcome.message,
            round_winner: outcome.round_winner,
            is_battle_finished: outcome.is_battle_finished,
        }
    }
}

/// Outcome of an end-battle operation.
#[derive(Debug)]
pub struct EndBattleOutcome {
    /// Whether this call performed the terminal transition.
    pub success: bool,
    /// Explanation when it did not.
    pub message: Option<String>,
    /// Winning user; `None` on a draw or when unsuccessful.
    pub winner_id: Option<Uuid>,
    /// Final snapshot when this call ended the battle.
    pub battle: Option<BattleSummary>,
}

impl EndBattleOutcome {
    fn absorbed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            winner_id: None,
            battle: None,
        }
    }
}

impl From<EndBattleOutcome> for EndBattleResponse {
    fn from(outcome: EndBattleOutcome) -> Self {
        EndBattleResponse {
            success: outcome.success,
            winner_id: outcome.winner_id,
            message: outcome.message,
            battle: outcome.battle,
        }
    }
}

/// Begin the pre-battle countdown and schedule the activation wake.
pub async fn start_battle(
    state: &SharedState,
    battle_id: Uuid,
) -> Result<EngineAck, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "start requested for unknown battle");
        return Ok(EngineAck::absorbed("battle not found"));
    };
    if battle.status != BattleStatus::Pending || battle.countdown_started_at.is_some() {
        info!(battle_id = %battle_id, status = ?battle.status, "duplicate start absorbed");
        return Ok(EngineAck::absorbed("battle already started"));
    }

    let now = state.clock().now();
    battle.countdown_started_at = Some(now);
    battle.last_activity_at = Some(now);
    let countdown_secs = battle.countdown_duration_secs;
    state.store().save(battle.clone()).await?;

    fanout::broadcast_countdown_started(state, &battle);
    schedule_activation(
        state.clone(),
        battle_id,
        Duration::from_secs(countdown_secs),
    );
    info!(battle_id = %battle_id, countdown_secs, "battle countdown started");
    Ok(EngineAck::applied())
}

/// Flip a counted-down battle to active play. Called by the countdown timer;
/// exposed so a host client can also force the flip.
pub async fn activate_battle(
    state: &SharedState,
    battle_id: Uuid,
) -> Result<EngineAck, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "activation requested for unknown battle");
        return Ok(EngineAck::absorbed("battle not found"));
    };
    if battle.status == BattleStatus::Active {
        return Ok(EngineAck::absorbed("battle already active"));
    }
    if battle.status != BattleStatus::Pending {
        info!(battle_id = %battle_id, status = ?battle.status, "activation of a terminal battle absorbed");
        return Ok(EngineAck::absorbed("battle already ended"));
    }

    battle.phase = state_machine::advance(battle.phase, LifecycleEvent::Activate)?;
    battle.status = BattleStatus::Active;
    let now = state.clock().now();
    battle.started_at = Some(now);
    battle.last_activity_at = Some(now);
    battle.config.end_time = Some(now + time::Duration::seconds(battle.duration_secs as i64));
    battle.open_round(1);
    state.store().save(battle.clone()).await?;

    fanout::broadcast_battle_started(state, &battle);
    auto_end::schedule(
        state.clone(),
        battle_id,
        Duration::from_secs(battle.duration_secs),
    );
    if battle.total_rounds > 1 {
        schedule_round_end(
            state.clone(),
            battle_id,
            Duration::from_secs(battle.round_duration_minutes * 60),
        );
    }
    info!(battle_id = %battle_id, rounds = battle.total_rounds, "battle activated");
    Ok(EngineAck::applied())
}

/// Score a gift on one side, converting accumulated shoots into a goal when
/// they cross the threshold.
pub async fn record_gift(
    state: &SharedState,
    battle_id: Uuid,
    gift: GiftRequest,
) -> Result<EngineAck, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "gift for unknown battle dropped");
        return Ok(EngineAck::absorbed("battle not found"));
    };
    if battle.status != BattleStatus::Active || battle.phase != BattlePhase::Active {
        info!(
            battle_id = %battle_id,
            status = ?battle.status,
            phase = ?battle.phase,
            "gift outside active play absorbed"
        );
        return Ok(EngineAck::absorbed("battle is not in active play"));
    }

    battle.add_gift(gift.side, gift.coin_value);
    battle.last_activity_at = Some(state.clock().now());

    let threshold = battle.config.goal_threshold;
    let shoots = gift.shoots.unwrap_or(1);
    let (challenger_score, opponent_score) = (battle.challenger_score, battle.opponent_score);
    let mut scored = false;
    if let Some(round) = battle.current_round_mut() {
        round.add_shoots(gift.side, shoots);
        round.score_a = challenger_score;
        round.score_b = opponent_score;
        scored = round.shoots(gift.side) >= threshold;
        round.recompute_ball_position(threshold);
    }
    if scored {
        apply_goal(&mut battle, gift.side);
    }
    state.store().save(battle.clone()).await?;

    fanout::broadcast_gift_received(
        state,
        &battle,
        gift.side,
        gift.sender_id,
        &gift.sender_name,
        gift.coin_value,
    );
    if scored {
        fanout::broadcast_goal_scored(state, &battle, gift.side);
    }
    Ok(EngineAck::applied())
}

/// Credit a goal directly, bypassing the shoot accumulator. Backs manual
/// adjustments from the host tooling.
pub async fn score_goal(
    state: &SharedState,
    battle_id: Uuid,
    side: BattleSide,
) -> Result<EngineAck, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "goal for unknown battle dropped");
        return Ok(EngineAck::absorbed("battle not found"));
    };
    if battle.status != BattleStatus::Active || battle.phase != BattlePhase::Active {
        return Ok(EngineAck::absorbed("battle is not in active play"));
    }

    apply_goal(&mut battle, side);
    battle.last_activity_at = Some(state.clock().now());
    state.store().save(battle.clone()).await?;

    fanout::broadcast_goal_scored(state, &battle, side);
    Ok(EngineAck::applied())
}

/// End the current round: either move the battle into its round break or, on
/// the final round, finish the battle entirely.
pub async fn end_round(
    state: &SharedState,
    battle_id: Uuid,
) -> Result<RoundEndOutcome, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "round end for unknown battle dropped");
        return Ok(RoundEndOutcome::absorbed("battle not found"));
    };
    if battle.status != BattleStatus::Active || battle.phase != BattlePhase::Active {
        info!(
            battle_id = %battle_id,
            status = ?battle.status,
            phase = ?battle.phase,
            "round end outside active play absorbed"
        );
        return Ok(RoundEndOutcome::absorbed("no round is in play"));
    }

    state.timers().cancel(battle_id, TimerKind::Round);
    let ended_round = battle.current_round;
    let round_winner = battle.current_round_ref().and_then(|round| round.winner());
    let now = state.clock().now();
    let is_battle_finished = ended_round >= battle.total_rounds;

    if is_battle_finished {
        finish(&mut battle, now)?;
        state.store().save(battle.clone()).await?;

        fanout::broadcast_round_ended(state, &battle, ended_round, round_winner, true);
        let (winner_side, _) = decide_winner(&battle);
        fanout::broadcast_battle_ended(state, &battle, winner_text(winner_side), false);
        release(state, battle_id);
        info!(battle_id = %battle_id, round = ended_round, "final round ended; battle finished");
    } else {
        battle.phase = state_machine::advance(battle.phase, LifecycleEvent::BreakRound)?;
        battle.open_round(ended_round + 1);
        battle.last_activity_at = Some(now);
        state.store().save(battle.clone()).await?;

        fanout::broadcast_round_ended(state, &battle, ended_round, round_winner, false);
        schedule_round_resume(
            state.clone(),
            battle_id,
            Duration::from_secs(battle.config.round_break_secs),
        );
        info!(battle_id = %battle_id, round = ended_round, "round ended; break started");
    }

    Ok(RoundEndOutcome {
        success: true,
        message: None,
        round_winner,
        is_battle_finished,
    })
}

/// End the battle, computing the winner under the configured win condition.
/// Duplicate calls are absorbed: only the first performs the transition and
/// broadcasts the final event.
pub async fn end_battle(
    state: &SharedState,
    battle_id: Uuid,
    is_auto: bool,
) -> Result<EndBattleOutcome, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "end requested for unknown battle");
        return Ok(EndBattleOutcome::absorbed("battle not found"));
    };
    if battle.status != BattleStatus::Active {
        info!(battle_id = %battle_id, status = ?battle.status, "duplicate end absorbed");
        return Ok(EndBattleOutcome::absorbed("battle already ended"));
    }

    let now = state.clock().now();
    let (winner_side, winner_id) = finish(&mut battle, now)?;
    state.store().save(battle.clone()).await?;

    fanout::broadcast_battle_ended(state, &battle, winner_text(winner_side), is_auto);
    release(state, battle_id);
    info!(battle_id = %battle_id, winner = ?winner_id, is_auto, "battle ended");

    Ok(EndBattleOutcome {
        success: true,
        message: None,
        winner_id,
        battle: Some((&battle).into()),
    })
}

/// Resume play after a round break. Called by the break timer.
pub(crate) async fn resume_round(
    state: &SharedState,
    battle_id: Uuid,
) -> Result<(), ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        return Ok(());
    };
    if battle.status != BattleStatus::Active || battle.phase != BattlePhase::RoundBreak {
        return Ok(());
    }

    battle.phase = state_machine::advance(battle.phase, LifecycleEvent::ResumeRound)?;
    battle.last_activity_at = Some(state.clock().now());
    state.store().save(battle.clone()).await?;

    if battle.total_rounds > 1 {
        schedule_round_end(
            state.clone(),
            battle_id,
            Duration::from_secs(battle.round_duration_minutes * 60),
        );
    }
    info!(battle_id = %battle_id, round = battle.current_round, "round resumed");
    Ok(())
}

/// Recompute the countdown remainder and push a timer correction to the host.
pub async fn sync_timer(
    state: &SharedState,
    battle_id: Uuid,
    request: TimerSyncRequest,
) -> Result<EngineAck, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "timer sync for unknown battle dropped");
        return Ok(EngineAck::absorbed("battle not found"));
    };

    let now = state.clock().now();
    let countdown_remaining_secs = match (battle.phase, battle.countdown_started_at) {
        (BattlePhase::Countdown, Some(started)) => {
            let elapsed = (now - started).whole_seconds().max(0) as u64;
            battle.countdown_duration_secs.saturating_sub(elapsed)
        }
        _ => 0,
    };
    battle.server_sync_time = Some(now);
    state.store().save(battle.clone()).await?;

    fanout::broadcast_timer_sync(state, &battle, countdown_remaining_secs, now, request.sync_data);
    Ok(EngineAck::applied())
}

/// Record a participant's stream health and notify the host. Reports from
/// non-participants are broadcast with the viewer role but never persisted.
pub async fn update_stream_status(
    state: &SharedState,
    battle_id: Uuid,
    request: StreamStatusRequest,
) -> Result<EngineAck, ServiceError> {
    let lock = state.battle_lock(battle_id);
    let _guard = lock.lock().await;

    let Some(mut battle) = load(state, battle_id).await? else {
        warn!(battle_id = %battle_id, "stream status for unknown battle dropped");
        return Ok(EngineAck::absorbed("battle not found"));
    };

    let role = battle.role_of(request.user_id);
    match role {
        ParticipantRole::Challenger => battle.challenger_stream_status = request.status,
        ParticipantRole::Opponent => battle.opponent_stream_status = request.status,
        ParticipantRole::Viewer => {}
    }
    if role != ParticipantRole::Viewer {
        battle.last_activity_at = Some(state.clock().now());
        state.store().save(battle.clone()).await?;
    }

    fanout::broadcast_stream_status(state, &battle, request.user_id, role, request.error);
    Ok(EngineAck::applied())
}

/// Localized outcome string carried in the final broadcast payload.
pub fn winner_text(winner: Option<BattleSide>) -> &'static str {
    match winner {
        Some(BattleSide::Challenger) => "Challenger Kazandı",
        Some(BattleSide::Opponent) => "Opponent Kazandı",
        None => "Berabere",
    }
}

/// Compare the sides under the battle's win condition.
pub fn decide_winner(battle: &Battle) -> (Option<BattleSide>, Option<Uuid>) {
    let (challenger, opponent) = match battle.config.win_condition {
        WinCondition::Goals => (battle.challenger_goals as u64, battle.opponent_goals as u64),
        WinCondition::Score => (
            battle.score(BattleSide::Challenger),
            battle.score(BattleSide::Opponent),
        ),
    };
    match challenger.cmp(&opponent) {
        Ordering::Greater => (
            Some(BattleSide::Challenger),
            Some(battle.challenger.user_id),
        ),
        Ordering::Less => match &battle.opponent {
            Some(opponent) => (Some(BattleSide::Opponent), Some(opponent.user_id)),
            // Cohost-only battles have no user to credit on the opposing side.
            None => (None, None),
        },
        Ordering::Equal => (None, None),
    }
}

async fn load(state: &SharedState, battle_id: Uuid) -> Result<Option<Battle>, ServiceError> {
    Ok(state.store().find(battle_id).await?)
}

fn apply_goal(battle: &mut Battle, side: BattleSide) {
    battle.add_goal(side);
    let threshold = battle.config.goal_threshold;
    if let Some(round) = battle.current_round_mut() {
        round.record_goal(side);
        round.recompute_ball_position(threshold);
    }
}

/// Apply the terminal transition and timestamps. Caller saves and broadcasts.
fn finish(
    battle: &mut Battle,
    now: time::OffsetDateTime,
) -> Result<(Option<BattleSide>, Option<Uuid>), ServiceError> {
    let (winner_side, winner_id) = decide_winner(battle);
    battle.phase = state_machine::advance(battle.phase, LifecycleEvent::End)?;
    battle.status = BattleStatus::Finished;
    battle.winner_id = winner_id;
    battle.ended_at = Some(now);
    battle.last_activity_at = Some(now);
    Ok((winner_side, winner_id))
}

/// Tear down the runtime attachments of a battle that reached a terminal
/// state: pending timers and the mutation lock slot.
fn release(state: &SharedState, battle_id: Uuid) {
    state.timers().cancel_all(battle_id);
    state.forget_battle_lock(battle_id);
}

// Timer tasks deregister their own slot BEFORE entering the engine: the
// operation they invoke may cancel that very slot (end_round cancels the
// round timer, ending a battle cancels everything), and aborting the calling
// task at its next await point would lose the transition mid-flight.

fn schedule_activation(state: SharedState, battle_id: Uuid, delay: Duration) {
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task_state.timers().complete(battle_id, TimerKind::Countdown);
        if let Err(err) = activate_battle(&task_state, battle_id).await {
            error!(battle_id = %battle_id, error = %err, "countdown activation failed");
        }
    });
    state
        .timers()
        .register(battle_id, TimerKind::Countdown, handle.abort_handle());
}

fn schedule_round_end(state: SharedState, battle_id: Uuid, delay: Duration) {
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task_state.timers().complete(battle_id, TimerKind::Round);
        if let Err(err) = end_round(&task_state, battle_id).await {
            error!(battle_id = %battle_id, error = %err, "timed round end failed");
        }
    });
    state
        .timers()
        .register(battle_id, TimerKind::Round, handle.abort_handle());
}

fn schedule_round_resume(state: SharedState, battle_id: Uuid, delay: Duration) {
    let task_state = state.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task_state.timers().complete(battle_id, TimerKind::RoundBreak);
        if let Err(err) = resume_round(&task_state, battle_id).await {
            error!(battle_id = %battle_id, error = %err, "round resume failed");
        }
    });
    state
        .timers()
        .register(battle_id, TimerKind::RoundBreak, handle.abort_handle());
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use serde_json::Value;
    use time::macros::datetime;
    use tokio::sync::broadcast::Receiver;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::battle_store::{BattleStore, InMemoryBattleStore, StorageResult},
        dto::events::ServerEvent,
        state::{
            AppState,
            battle::{BattleConfig, Participant, StreamHealth},
            broadcast::{self, ChannelScope},
        },
    };

    fn participant(stream: &str) -> Participant {
        Participant {
            user_id: Uuid::new_v4(),
            stream_id: stream.into(),
            display_name: format!("user-{stream}"),
        }
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

    fn pending_battle(
        with_opponent: bool,
        cohosts: Vec<String>,
        total_rounds: u32,
        win_condition: WinCondition,
    ) -> Battle {
        Battle::new(
            participant("ch"),
            with_opponent.then(|| participant("op")),
            cohosts,
            300,
            5,
            total_rounds,
            5,
            BattleConfig {
                end_time: None,
                goal_threshold: 5,
                win_condition,
                round_break_secs: 10,
            },
        )
    }

    async fn seed_active(state: &SharedState, mut battle: Battle) -> Uuid {
        battle.status = BattleStatus::Active;
        battle.phase = BattlePhase::Active;
        battle.started_at = Some(state.clock().now());
        battle.open_round(1);
        let id = battle.id;
        state.store().save(battle).await.unwrap();
        id
    }

    fn gift(side: BattleSide, coin_value: u64) -> GiftRequest {
        GiftRequest {
            side,
            sender_id: Uuid::new_v4(),
            sender_name: "fan".into(),
            coin_value,
            shoots: None,
        }
    }

    fn drain_types(rx: &mut Receiver<ServerEvent>) -> Vec<String> {
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let value: Value = serde_json::from_str(&event.data).unwrap();
            types.push(value["type"].as_str().unwrap().to_string());
        }
        types
    }

    fn drain_payloads(rx: &mut Receiver<ServerEvent>) -> Vec<Value> {
        let mut payloads = Vec::new();
        while let Ok(event) = rx.try_recv() {
            payloads.push(serde_json::from_str(&event.data).unwrap());
        }
        payloads
    }

    #[tokio::test]
    async fn five_gifts_convert_into_exactly_one_goal() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;
        let battle = state.store().find(id).await.unwrap().unwrap();
        let mut main = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        for _ in 0..5 {
            let ack = record_gift(&state, id, gift(BattleSide::Challenger, 10))
                .await
                .unwrap();
            assert!(ack.success);
        }

        let battle = state.store().find(battle.id).await.unwrap().unwrap();
        assert_eq!(battle.challenger_goals, 1);
        assert_eq!(battle.challenger_score, 50);
        let round = battle.current_round_ref().unwrap();
        assert_eq!(round.goals_a, 1);
        assert_eq!(round.shoots_a, 0, "goal resets the shoot counter");

        let goals = drain_types(&mut main)
            .into_iter()
            .filter(|t| t == "pk_battle_goal_scored")
            .count();
        assert_eq!(goals, 1);
    }

    #[tokio::test]
    async fn gifts_below_threshold_do_not_score() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;

        for _ in 0..4 {
            record_gift(&state, id, gift(BattleSide::Opponent, 1))
                .await
                .unwrap();
        }

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.opponent_goals, 0);
        assert_eq!(battle.current_round_ref().unwrap().shoots_b, 4);
    }

    #[tokio::test]
    async fn gift_outside_active_play_is_absorbed() {
        let (state, _) = test_state();
        let battle = pending_battle(true, vec![], 1, WinCondition::Score);
        let id = battle.id;
        state.store().save(battle).await.unwrap();

        let ack = record_gift(&state, id, gift(BattleSide::Challenger, 10))
            .await
            .unwrap();
        assert!(!ack.success);

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.challenger_score, 0);
    }

    #[tokio::test]
    async fn double_end_performs_a_single_transition_and_broadcast() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;
        record_gift(&state, id, gift(BattleSide::Challenger, 100))
            .await
            .unwrap();
        let mut main = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        let first = end_battle(&state, id, false).await.unwrap();
        let second = end_battle(&state, id, false).await.unwrap();

        assert!(first.success);
        assert!(first.winner_id.is_some());
        assert!(!second.success);
        assert_eq!(second.message.as_deref(), Some("battle already ended"));

        let ended = drain_types(&mut main)
            .into_iter()
            .filter(|t| t == "pk_battle_ended")
            .count();
        assert_eq!(ended, 1);
    }

    #[tokio::test]
    async fn equal_scores_end_in_a_draw() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;
        record_gift(&state, id, gift(BattleSide::Challenger, 100))
            .await
            .unwrap();
        record_gift(&state, id, gift(BattleSide::Opponent, 100))
            .await
            .unwrap();
        let mut main = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        let outcome = end_battle(&state, id, false).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.winner_id, None);

        let payloads = drain_payloads(&mut main);
        let ended = payloads
            .iter()
            .find(|p| p["type"] == "pk_battle_ended")
            .unwrap();
        assert_eq!(ended["winner_text"], "Berabere");
        assert!(ended.get("winner_id").is_none());
    }

    #[tokio::test]
    async fn goals_decide_the_winner_under_the_goals_condition() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Goals)).await;

        // The opponent out-earns the challenger but scores fewer goals.
        record_gift(&state, id, gift(BattleSide::Opponent, 1000))
            .await
            .unwrap();
        score_goal(&state, id, BattleSide::Challenger).await.unwrap();

        let outcome = end_battle(&state, id, false).await.unwrap();
        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(outcome.winner_id, Some(battle.challenger.user_id));
        assert_eq!(battle.status, BattleStatus::Finished);
        assert_eq!(battle.phase, BattlePhase::Ended);
    }

    #[tokio::test]
    async fn final_round_end_finishes_the_battle_in_event_order() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;
        record_gift(&state, id, gift(BattleSide::Challenger, 10))
            .await
            .unwrap();
        let mut main = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        let outcome = end_round(&state, id).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.is_battle_finished);

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.status, BattleStatus::Finished);
        assert_eq!(battle.phase, BattlePhase::Ended);
        assert_eq!(battle.winner_id, Some(battle.challenger.user_id));

        let types = drain_types(&mut main);
        assert_eq!(types, vec!["pk_battle_round_ended", "pk_battle_ended"]);
    }

    #[tokio::test]
    async fn mid_battle_round_end_enters_the_break() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 3, WinCondition::Goals)).await;
        score_goal(&state, id, BattleSide::Opponent).await.unwrap();
        let mut main = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        let outcome = end_round(&state, id).await.unwrap();
        assert!(outcome.success);
        assert!(!outcome.is_battle_finished);
        assert_eq!(outcome.round_winner, Some(BattleSide::Opponent));

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.phase, BattlePhase::RoundBreak);
        assert_eq!(battle.current_round, 2);
        assert_eq!(battle.rounds.len(), 2);

        let payloads = drain_payloads(&mut main);
        let round_ended = payloads
            .iter()
            .find(|p| p["type"] == "pk_battle_round_ended")
            .unwrap();
        assert_eq!(round_ended["round_number"], 1);
        assert_eq!(round_ended["is_battle_finished"], false);
    }

    #[tokio::test]
    async fn duplicate_start_is_absorbed() {
        let (state, _) = test_state();
        let battle = pending_battle(true, vec![], 1, WinCondition::Score);
        let id = battle.id;
        state.store().save(battle).await.unwrap();

        let first = start_battle(&state, id).await.unwrap();
        let second = start_battle(&state, id).await.unwrap();
        assert!(first.success);
        assert!(!second.success);
    }

    #[tokio::test]
    async fn countdown_fanout_reaches_every_participant_stream() {
        let (state, _) = test_state();
        let battle = pending_battle(false, vec!["S1".into(), "S2".into()], 1, WinCondition::Score);
        let id = battle.id;
        state.store().save(battle).await.unwrap();

        let mut subscribers: Vec<_> = ["ch", "S1", "S2"]
            .iter()
            .map(|stream| {
                state
                    .hub()
                    .subscribe(&broadcast::stream_channel(stream, ChannelScope::Main))
            })
            .collect();

        start_battle(&state, id).await.unwrap();

        for rx in &mut subscribers {
            let types = drain_types(rx);
            assert_eq!(types, vec!["countdown_started"]);
        }
    }

    #[tokio::test]
    async fn timer_sync_targets_only_the_challenger_channel() {
        let (state, clock) = test_state();
        let mut battle = pending_battle(false, vec!["S1".into()], 1, WinCondition::Score);
        battle.phase = BattlePhase::Countdown;
        battle.countdown_started_at = Some(state.clock().now());
        let id = battle.id;
        state.store().save(battle).await.unwrap();
        clock.advance(time::Duration::seconds(2));

        let mut challenger = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));
        let mut cohost = state
            .hub()
            .subscribe(&broadcast::stream_channel("S1", ChannelScope::Main));

        let mut sync_data = serde_json::Map::new();
        sync_data.insert("client_offset_ms".into(), Value::from(40));
        sync_timer(&state, id, TimerSyncRequest { sync_data })
            .await
            .unwrap();

        let payloads = drain_payloads(&mut challenger);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["type"], "pk_battle_timer_sync");
        assert_eq!(payloads[0]["countdown_remaining_secs"], 3);
        assert_eq!(payloads[0]["client_offset_ms"], 40);
        assert!(drain_payloads(&mut cohost).is_empty());
    }

    #[tokio::test]
    async fn stream_status_resolves_the_role_and_persists_for_participants() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;
        let battle = state.store().find(id).await.unwrap().unwrap();
        let opponent_id = battle.opponent.as_ref().unwrap().user_id;
        let mut challenger = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        update_stream_status(
            &state,
            id,
            StreamStatusRequest {
                user_id: opponent_id,
                status: StreamHealth::Degraded,
                error: Some("packet loss".into()),
            },
        )
        .await
        .unwrap();

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.opponent_stream_status, StreamHealth::Degraded);

        let payloads = drain_payloads(&mut challenger);
        assert_eq!(payloads[0]["role"], "opponent");
        assert_eq!(payloads[0]["challenger_stream_status"], "healthy");
    }

    #[tokio::test]
    async fn gift_events_land_on_the_gift_scoped_channel() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;
        let mut gifts = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Gifts));
        let mut main = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        record_gift(&state, id, gift(BattleSide::Challenger, 25))
            .await
            .unwrap();

        let payloads = drain_payloads(&mut gifts);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["type"], "pk_battle_gift_received");
        assert_eq!(payloads[0]["challenger_score"], 25);
        assert!(drain_types(&mut main).is_empty());
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
    async fn timed_round_end_completes_against_a_store_that_yields() {
        let clock = Arc::new(ManualClock::starting_at(datetime!(2026-01-01 12:00 UTC)));
        let state = AppState::with_parts(
            AppConfig::default(),
            Arc::new(YieldingStore(InMemoryBattleStore::new())),
            clock,
        );
        let id = seed_active(&state, pending_battle(true, vec![], 3, WinCondition::Goals)).await;
        let mut main = state
            .hub()
            .subscribe(&broadcast::stream_channel("ch", ChannelScope::Main));

        // The fired round timer must not be aborted by its own slot cleanup
        // inside end_round while the save is still in flight.
        schedule_round_end(state.clone(), id, Duration::ZERO);

        let reached_break = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let battle = state.store().find(id).await.unwrap().unwrap();
                if battle.phase == BattlePhase::RoundBreak {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(reached_break.is_ok(), "round break was never entered");

        let battle = state.store().find(id).await.unwrap().unwrap();
        assert_eq!(battle.current_round, 2);
        let types = drain_types(&mut main);
        assert!(types.contains(&"pk_battle_round_ended".to_string()));
    }

    #[tokio::test]
    async fn goal_events_also_reach_the_battle_channel() {
        let (state, _) = test_state();
        let id = seed_active(&state, pending_battle(true, vec![], 1, WinCondition::Score)).await;
        let mut spectators = state.hub().subscribe(&broadcast::battle_channel(id));

        score_goal(&state, id, BattleSide::Challenger).await.unwrap();

        let payloads = drain_payloads(&mut spectators);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0]["type"], "pk_battle_goal_scored");
        assert_eq!(payloads[0]["is_challenger"], true);
        assert_eq!(payloads[0]["goals_a"], 1);
    }
}
