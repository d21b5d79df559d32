//! Broadcast fan-out: compute a battle's channel set and publish events.
//!
//! Every event is serialized once and the same payload is delivered to each
//! channel, so there is a single serialization path for the whole event
//! vocabulary. Mutations are committed to the store before anything here is
//! called; publication itself is fire-and-forget.

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::{
        events::{
            BattleEndedEvent, BattleEvent, BattleStartedEvent, CountdownStartedEvent,
            GiftReceivedEvent, GoalScoredEvent, RoundEndedEvent, ServerEvent, StreamStatusEvent,
            TimerSyncEvent,
        },
        format_timestamp,
    },
    state::{
        SharedState,
        battle::{Battle, BattleSide, ParticipantRole},
        broadcast::{self, ChannelScope},
    },
};

/// Broadcast the countdown start to every participant stream.
pub fn broadcast_countdown_started(state: &SharedState, battle: &Battle) {
    let event = BattleEvent::CountdownStarted(CountdownStartedEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        countdown_duration_secs: battle.countdown_duration_secs,
        challenger_id: battle.challenger.user_id,
        challenger_name: battle.challenger.display_name.clone(),
        opponent_id: battle.opponent.as_ref().map(|o| o.user_id),
        opponent_name: battle.opponent.as_ref().map(|o| o.display_name.clone()),
        server_time: server_time(state),
    });
    publish_to_participants(state, battle, ChannelScope::Main, &event);
}

/// Broadcast the activation snapshot to every participant stream.
pub fn broadcast_battle_started(state: &SharedState, battle: &Battle) {
    let event = BattleEvent::PkBattleStarted(BattleStartedEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        battle: battle.into(),
        server_time: server_time(state),
    });
    publish_to_participants(state, battle, ChannelScope::Main, &event);
}

/// Broadcast updated tallies after a gift, on the gift-scoped channels.
pub fn broadcast_gift_received(
    state: &SharedState,
    battle: &Battle,
    side: BattleSide,
    sender_id: Uuid,
    sender_name: &str,
    coin_value: u64,
) {
    let event = BattleEvent::PkBattleGiftReceived(GiftReceivedEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        side,
        sender_id,
        sender_name: sender_name.to_string(),
        coin_value,
        challenger_score: battle.challenger_score,
        opponent_score: battle.opponent_score,
        challenger_gift_count: battle.challenger_gift_count,
        opponent_gift_count: battle.opponent_gift_count,
        total_gift_value: battle.total_gift_value,
        server_time: server_time(state),
    });
    publish_to_participants(state, battle, ChannelScope::Gifts, &event);
}

/// Broadcast a goal to every participant stream plus the battle-spectator
/// channel, for viewers not tied to any specific stream.
pub fn broadcast_goal_scored(state: &SharedState, battle: &Battle, side: BattleSide) {
    let round = battle.current_round_ref();
    let event = BattleEvent::PkBattleGoalScored(GoalScoredEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        round_number: battle.current_round,
        scorer_id: battle.side_user_id(side),
        is_challenger: side == BattleSide::Challenger,
        goals_a: round.map_or(0, |r| r.goals_a),
        goals_b: round.map_or(0, |r| r.goals_b),
        shoots_a: round.map_or(0, |r| r.shoots_a),
        shoots_b: round.map_or(0, |r| r.shoots_b),
        challenger_score: battle.challenger_score,
        opponent_score: battle.opponent_score,
        ball_position: round.map_or(0.0, |r| r.ball_position),
        server_time: server_time(state),
    });
    publish_to_participants(state, battle, ChannelScope::Main, &event);
    if let Some(server_event) = to_server_event(&event) {
        state
            .hub()
            .publish(&broadcast::battle_channel(battle.id), server_event);
    }
}

/// Broadcast the end of a round. `round_number` is the round that just ended.
pub fn broadcast_round_ended(
    state: &SharedState,
    battle: &Battle,
    round_number: u32,
    round_winner: Option<BattleSide>,
    is_battle_finished: bool,
) {
    let event = BattleEvent::PkBattleRoundEnded(RoundEndedEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        round_number,
        round_winner,
        challenger_goals: battle.challenger_goals,
        opponent_goals: battle.opponent_goals,
        is_battle_finished,
        winner_id: if is_battle_finished {
            battle.winner_id
        } else {
            None
        },
        server_time: server_time(state),
    });
    publish_to_participants(state, battle, ChannelScope::Main, &event);
}

/// Broadcast the final outcome to every participant stream.
pub fn broadcast_battle_ended(
    state: &SharedState,
    battle: &Battle,
    winner_text: &str,
    is_auto: bool,
) {
    let event = BattleEvent::PkBattleEnded(BattleEndedEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        winner_id: battle.winner_id,
        winner_text: winner_text.to_string(),
        challenger_score: battle.challenger_score,
        opponent_score: battle.opponent_score,
        total_rounds: battle.total_rounds,
        round_scores: battle.rounds.iter().map(Into::into).collect(),
        is_auto,
        server_time: server_time(state),
    });
    publish_to_participants(state, battle, ChannelScope::Main, &event);
}

/// Publish a timer correction to the challenger stream only. This is a
/// host-facing signal and is deliberately not fanned out to cohosts.
pub fn broadcast_timer_sync(
    state: &SharedState,
    battle: &Battle,
    countdown_remaining_secs: u64,
    server_sync_time: OffsetDateTime,
    sync_data: Map<String, Value>,
) {
    let event = BattleEvent::PkBattleTimerSync(TimerSyncEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        countdown_remaining_secs,
        server_sync_time: format_timestamp(server_sync_time),
        last_activity_at: battle.last_activity_at.map(format_timestamp),
        sync_data,
    });
    publish_to_challenger(state, battle, &event);
}

/// Publish both sides' stream health to the challenger stream only.
pub fn broadcast_stream_status(
    state: &SharedState,
    battle: &Battle,
    user_id: Uuid,
    role: ParticipantRole,
    error: Option<String>,
) {
    let event = BattleEvent::PkBattleStreamStatusUpdated(StreamStatusEvent {
        battle_id: battle.id,
        live_stream_id: battle.challenger.stream_id.clone(),
        user_id,
        role,
        challenger_stream_status: battle.challenger_stream_status,
        opponent_stream_status: battle.opponent_stream_status,
        error,
        server_time: server_time(state),
    });
    publish_to_challenger(state, battle, &event);
}

fn server_time(state: &SharedState) -> String {
    format_timestamp(state.clock().now())
}

fn publish_to_participants(
    state: &SharedState,
    battle: &Battle,
    scope: ChannelScope,
    event: &BattleEvent,
) {
    let Some(server_event) = to_server_event(event) else {
        return;
    };
    for stream_id in battle.participant_stream_ids() {
        state.hub().publish(
            &broadcast::stream_channel(&stream_id, scope),
            server_event.clone(),
        );
    }
}

fn publish_to_challenger(state: &SharedState, battle: &Battle, event: &BattleEvent) {
    let Some(server_event) = to_server_event(event) else {
        return;
    };
    state.hub().publish(
        &broadcast::stream_channel(&battle.challenger.stream_id, ChannelScope::Main),
        server_event,
    );
}

fn to_server_event(event: &BattleEvent) -> Option<ServerEvent> {
    match ServerEvent::json(Some(event.name().to_string()), event) {
        Ok(server_event) => Some(server_event),
        Err(err) => {
            warn!(event = event.name(), error = %err, "failed to serialize broadcast payload");
            None
        }
    }
}
