//! Request and response DTOs for the battle endpoints.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::{format_timestamp, validation::validate_stream_id},
    state::battle::{
        Battle, BattlePhase, BattleSide, BattleStatus, Participant, Round, StreamHealth,
        WinCondition,
    },
};

/// Incoming participant definition for a battle bootstrap.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ParticipantInput {
    /// User behind this side.
    pub user_id: Uuid,
    /// Live stream the user hosts.
    #[validate(custom(function = "validate_stream_id"))]
    pub stream_id: String,
    /// Display name used in broadcast payloads.
    #[validate(length(min = 1, max = 64))]
    pub display_name: String,
}

/// Payload used to bootstrap a brand-new pending battle.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateBattleRequest {
    /// Mandatory challenger.
    #[validate(nested)]
    pub challenger: ParticipantInput,
    /// Optional opponent; omit for a challenger-vs-cohosts PK.
    #[validate(nested)]
    pub opponent: Option<ParticipantInput>,
    /// Viewer streams that receive battle broadcasts.
    #[serde(default)]
    pub cohost_stream_ids: Vec<String>,
    /// Total battle budget in seconds; server default when omitted.
    #[validate(range(min = 30, max = 7200))]
    pub duration_secs: Option<u64>,
    /// Countdown length in seconds; server default when omitted.
    #[validate(range(min = 1, max = 60))]
    pub countdown_secs: Option<u64>,
    /// Number of rounds; server default when omitted.
    #[validate(range(min = 1, max = 10))]
    pub total_rounds: Option<u32>,
    /// Round length in minutes; server default when omitted.
    #[validate(range(min = 1, max = 60))]
    pub round_duration_minutes: Option<u64>,
    /// Shoots needed per goal; server default when omitted.
    #[validate(range(min = 1))]
    pub goal_threshold: Option<u32>,
    /// Win condition; derived from the round count when omitted.
    pub win_condition: Option<WinCondition>,
}

/// A gift landing on one side of the battle.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct GiftRequest {
    /// Side that received the gift.
    pub side: BattleSide,
    /// User who sent the gift.
    pub sender_id: Uuid,
    /// Sender display name.
    #[validate(length(min = 1, max = 64))]
    pub sender_name: String,
    /// Coin value of the gift.
    #[validate(range(min = 1))]
    pub coin_value: u64,
    /// Shoots contributed toward the goal threshold; defaults to one.
    #[validate(range(min = 1))]
    pub shoots: Option<u32>,
}

/// Manually credit a goal to one side.
#[derive(Debug, Deserialize, ToSchema)]
pub struct GoalRequest {
    /// Side scoring the goal.
    pub side: BattleSide,
}

/// End the battle on behalf of a user or an operator.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct EndBattleRequest {
    /// Marks ends triggered by automation rather than a person.
    #[serde(default)]
    pub is_auto: bool,
}

/// Host-driven timer correction request.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TimerSyncRequest {
    /// Free-form fields merged into the broadcast payload.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub sync_data: Map<String, Value>,
}

/// Stream connectivity report for one participant.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StreamStatusRequest {
    /// User whose stream changed.
    pub user_id: Uuid,
    /// New connectivity state.
    pub status: StreamHealth,
    /// Optional error detail from the reporter.
    pub error: Option<String>,
}

/// Generic acknowledgement for engine operations.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    /// Whether the operation changed anything.
    pub success: bool,
    /// Explanation when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outcome of an end-round request.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundEndResponse {
    /// Whether a round actually ended.
    pub success: bool,
    /// Explanation when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Side that won the ended round, `None` on a tie.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_winner: Option<BattleSide>,
    /// True when the ended round was the last one.
    pub is_battle_finished: bool,
}

/// Outcome of an end-battle request.
#[derive(Debug, Serialize, ToSchema)]
pub struct EndBattleResponse {
    /// Whether this call performed the FINISHED transition.
    pub success: bool,
    /// Winning user; absent on a draw or when unsuccessful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    /// Explanation when unsuccessful.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Final battle snapshot when the call succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battle: Option<BattleSummary>,
}

/// Wire snapshot of one participant.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantSummary {
    /// User behind this side.
    pub user_id: Uuid,
    /// Live stream the user hosts.
    pub stream_id: String,
    /// Display name.
    pub display_name: String,
}

impl From<&Participant> for ParticipantSummary {
    fn from(value: &Participant) -> Self {
        Self {
            user_id: value.user_id,
            stream_id: value.stream_id.clone(),
            display_name: value.display_name.clone(),
        }
    }
}

/// Wire snapshot of one round.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RoundSummary {
    /// 1-based round position.
    pub round_number: u32,
    /// Challenger goals this round.
    pub goals_a: u32,
    /// Opponent goals this round.
    pub goals_b: u32,
    /// Challenger shoots toward the next goal.
    pub shoots_a: u32,
    /// Opponent shoots toward the next goal.
    pub shoots_b: u32,
    /// Challenger coin score as of this round.
    pub score_a: u64,
    /// Opponent coin score as of this round.
    pub score_b: u64,
    /// Derived ball position in [-1, 1].
    pub ball_position: f32,
}

impl From<&Round> for RoundSummary {
    fn from(value: &Round) -> Self {
        Self {
            round_number: value.round_number,
            goals_a: value.goals_a,
            goals_b: value.goals_b,
            shoots_a: value.shoots_a,
            shoots_b: value.shoots_b,
            score_a: value.score_a,
            score_b: value.score_b,
            ball_position: value.ball_position,
        }
    }
}

/// Full wire snapshot of a battle.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BattleSummary {
    /// Battle identifier.
    pub id: Uuid,
    /// Coarse lifecycle.
    pub status: BattleStatus,
    /// Fine-grained phase.
    pub phase: BattlePhase,
    /// Challenger side.
    pub challenger: ParticipantSummary,
    /// Opponent side, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opponent: Option<ParticipantSummary>,
    /// Viewer streams receiving broadcasts.
    pub cohost_stream_ids: Vec<String>,
    /// Countdown length in seconds.
    pub countdown_duration_secs: u64,
    /// Total battle budget in seconds.
    pub duration_secs: u64,
    /// Activation instant, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    /// End instant, RFC 3339.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    /// Authoritative deadline, RFC 3339, once activated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// Challenger coin total.
    pub challenger_score: u64,
    /// Opponent coin total.
    pub opponent_score: u64,
    /// Challenger goals across all rounds.
    pub challenger_goals: u32,
    /// Opponent goals across all rounds.
    pub opponent_goals: u32,
    /// Challenger gift count.
    pub challenger_gift_count: u64,
    /// Opponent gift count.
    pub opponent_gift_count: u64,
    /// Combined coin value of all gifts.
    pub total_gift_value: u64,
    /// 1-based current round.
    pub current_round: u32,
    /// Configured number of rounds.
    pub total_rounds: u32,
    /// Round length in minutes.
    pub round_duration_minutes: u64,
    /// Per-round score history.
    pub rounds: Vec<RoundSummary>,
    /// Winning user once finished; absent under `finished` means a draw.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner_id: Option<Uuid>,
    /// Challenger stream health.
    pub challenger_stream_status: StreamHealth,
    /// Opponent stream health.
    pub opponent_stream_status: StreamHealth,
    /// Shoots needed per goal.
    pub goal_threshold: u32,
    /// Win condition policy.
    pub win_condition: WinCondition,
}

impl From<&Battle> for BattleSummary {
    fn from(battle: &Battle) -> Self {
        Self {
            id: battle.id,
            status: battle.status,
            phase: battle.phase,
            challenger: (&battle.challenger).into(),
            opponent: battle.opponent.as_ref().map(Into::into),
            cohost_stream_ids: battle.cohost_stream_ids.clone(),
            countdown_duration_secs: battle.countdown_duration_secs,
            duration_secs: battle.duration_secs,
            started_at: battle.started_at.map(format_timestamp),
            ended_at: battle.ended_at.map(format_timestamp),
            end_time: battle.config.end_time.map(format_timestamp),
            challenger_score: battle.challenger_score,
            opponent_score: battle.opponent_score,
            challenger_goals: battle.challenger_goals,
            opponent_goals: battle.opponent_goals,
            challenger_gift_count: battle.challenger_gift_count,
            opponent_gift_count: battle.opponent_gift_count,
            total_gift_value: battle.total_gift_value,
            current_round: battle.current_round,
            total_rounds: battle.total_rounds,
            round_duration_minutes: battle.round_duration_minutes,
            rounds: battle.rounds.iter().map(Into::into).collect(),
            winner_id: battle.winner_id,
            challenger_stream_status: battle.challenger_stream_status,
            opponent_stream_status: battle.opponent_stream_status,
            goal_threshold: battle.config.goal_threshold,
            win_condition: battle.config.win_condition,
        }
    }
}
