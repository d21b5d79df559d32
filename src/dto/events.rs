//! Broadcast event payloads: one tagged union with a single serialization
//! path, instead of channel-resolution logic duplicated per event class.

use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dto::battle::{BattleSummary, RoundSummary},
    state::battle::{BattleSide, ParticipantRole, StreamHealth},
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across broadcast channels.
pub struct ServerEvent {
    /// Optional event name exposed to SSE clients.
    pub event: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

/// Every event a battle can emit, discriminated by a `type` string on the wire.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BattleEvent {
    /// Pre-battle countdown began.
    CountdownStarted(CountdownStartedEvent),
    /// Countdown elapsed; the battle is live.
    PkBattleStarted(BattleStartedEvent),
    /// A gift landed on one side.
    PkBattleGiftReceived(GiftReceivedEvent),
    /// Accumulated shoots crossed the threshold.
    PkBattleGoalScored(GoalScoredEvent),
    /// A round finished.
    PkBattleRoundEnded(RoundEndedEvent),
    /// The battle is over.
    PkBattleEnded(BattleEndedEvent),
    /// Host-facing timer correction signal.
    PkBattleTimerSync(TimerSyncEvent),
    /// A participant's stream health changed.
    PkBattleStreamStatusUpdated(StreamStatusEvent),
}

impl BattleEvent {
    /// Wire discriminator, also used as the SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            BattleEvent::CountdownStarted(_) => "countdown_started",
            BattleEvent::PkBattleStarted(_) => "pk_battle_started",
            BattleEvent::PkBattleGiftReceived(_) => "pk_battle_gift_received",
            BattleEvent::PkBattleGoalScored(_) => "pk_battle_goal_scored",
            BattleEvent::PkBattleRoundEnded(_) => "pk_battle_round_ended",
            BattleEvent::PkBattleEnded(_) => "pk_battle_ended",
            BattleEvent::PkBattleTimerSync(_) => "pk_battle_timer_sync",
            BattleEvent::PkBattleStreamStatusUpdated(_) => "pk_battle_stream_status_updated",
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast when the countdown starts, carrying both participants' identities.
pub struct CountdownStartedEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// Countdown length in seconds.
    pub countdown_duration_secs: u64,
    /// Challenger user id.
    pub challenger_id: Uuid,
    /// Challenger display name.
    pub challenger_name: String,
    /// Opponent user id, when the battle has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent_id: Option<Uuid>,
    /// Opponent display name, when the battle has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent_name: Option<String>,
    /// Server timestamp, RFC 3339.
    pub server_time: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast when the battle goes live, with a full snapshot for late joiners.
pub struct BattleStartedEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// Full battle snapshot.
    pub battle: BattleSummary,
    /// Server timestamp, RFC 3339.
    pub server_time: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast on every gift with the updated cumulative tallies.
pub struct GiftReceivedEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// Side that received the gift.
    pub side: BattleSide,
    /// User who sent the gift.
    pub sender_id: Uuid,
    /// Sender display name.
    pub sender_name: String,
    /// Coin value of this gift.
    pub coin_value: u64,
    /// Updated challenger coin total.
    pub challenger_score: u64,
    /// Updated opponent coin total.
    pub opponent_score: u64,
    /// Updated challenger gift count.
    pub challenger_gift_count: u64,
    /// Updated opponent gift count.
    pub opponent_gift_count: u64,
    /// Updated combined coin value of all gifts.
    pub total_gift_value: u64,
    /// Server timestamp, RFC 3339.
    pub server_time: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast when shoots cross the goal threshold.
pub struct GoalScoredEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// Round the goal was scored in.
    pub round_number: u32,
    /// User credited with the goal, when that side has a participant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scorer_id: Option<Uuid>,
    /// True when the challenger scored.
    pub is_challenger: bool,
    /// Challenger goals this round.
    pub goals_a: u32,
    /// Opponent goals this round.
    pub goals_b: u32,
    /// Challenger shoots after the reset.
    pub shoots_a: u32,
    /// Opponent shoots.
    pub shoots_b: u32,
    /// Challenger coin total.
    pub challenger_score: u64,
    /// Opponent coin total.
    pub opponent_score: u64,
    /// Derived ball position in [-1, 1].
    pub ball_position: f32,
    /// Server timestamp, RFC 3339.
    pub server_time: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast when a round finishes.
///
/// `round_number` is the round that just ended, not the upcoming one.
pub struct RoundEndedEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// The just-finished round.
    pub round_number: u32,
    /// Side that won the round, `None` on a tie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_winner: Option<BattleSide>,
    /// Challenger goals across all rounds so far.
    pub challenger_goals: u32,
    /// Opponent goals across all rounds so far.
    pub opponent_goals: u32,
    /// True when this was the final round and the battle is over.
    pub is_battle_finished: bool,
    /// Overall winner once the battle finished, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    /// Server timestamp, RFC 3339.
    pub server_time: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast exactly once when the battle ends.
pub struct BattleEndedEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// Winning user; absent means a draw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    /// Localized human-readable outcome; part of the payload contract.
    pub winner_text: String,
    /// Final challenger coin total.
    pub challenger_score: u64,
    /// Final opponent coin total.
    pub opponent_score: u64,
    /// Number of rounds the battle was configured to play.
    pub total_rounds: u32,
    /// Full per-round score history.
    pub round_scores: Vec<RoundSummary>,
    /// True when the auto-end supervisor ended the battle.
    pub is_auto: bool,
    /// Server timestamp, RFC 3339.
    pub server_time: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Host-only timer correction; not fanned out to cohosts.
pub struct TimerSyncEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// Remaining countdown seconds; zero outside the countdown phase.
    pub countdown_remaining_secs: u64,
    /// Server timestamp, RFC 3339.
    pub server_sync_time: String,
    /// Last mutating activity on the battle, RFC 3339, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<String>,
    /// Caller-supplied sync fields merged into the payload.
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub sync_data: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
/// Broadcast to the host when a participant's stream health changes.
pub struct StreamStatusEvent {
    /// Battle this event belongs to.
    pub battle_id: Uuid,
    /// Primary (challenger) stream of the battle.
    pub live_stream_id: String,
    /// User whose stream changed.
    pub user_id: Uuid,
    /// Role the user resolved to.
    pub role: ParticipantRole,
    /// Challenger stream health.
    pub challenger_stream_status: StreamHealth,
    /// Opponent stream health.
    pub opponent_stream_status: StreamHealth,
    /// Optional error detail supplied by the reporter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Server timestamp, RFC 3339.
    pub server_time: String,
}
