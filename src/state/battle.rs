//! Runtime representation of a PK battle session and its rounds.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Coarse lifecycle of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    /// Created but not yet started.
    Pending,
    /// Countdown elapsed; gifts and goals are being scored.
    Active,
    /// Terminal override reached through failure or administrative action.
    Cancelled,
    /// Battle ran to completion, manually or by auto-expiry.
    Finished,
}

/// Fine-grained phase within an active battle, driving client UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BattlePhase {
    /// Pre-battle countdown is running.
    Countdown,
    /// A round is being played.
    Active,
    /// Pause between two rounds.
    RoundBreak,
    /// Battle is over.
    Ended,
}

/// Per-participant stream connectivity, used for UI warnings only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum StreamHealth {
    /// Stream is publishing normally.
    Healthy,
    /// Stream is up but struggling.
    Degraded,
    /// Stream dropped; the battle keeps running regardless.
    Disconnected,
}

/// Which competing side an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BattleSide {
    /// The battle initiator's side.
    Challenger,
    /// The opposing side.
    Opponent,
}

/// Role a user resolves to inside a given battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The challenger themselves.
    Challenger,
    /// The opponent, when the battle has one.
    Opponent,
    /// Anyone else watching.
    Viewer,
}

/// Policy deciding the winner when a battle ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum WinCondition {
    /// Compare discrete goals; the default for round-based battles.
    Goals,
    /// Compare cumulative coin scores.
    Score,
}

/// A scoring participant: the challenger or the opponent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// User behind this side of the battle.
    pub user_id: Uuid,
    /// Live stream the user is hosting.
    pub stream_id: String,
    /// Display name used to enrich broadcast payloads.
    pub display_name: String,
}

/// Per-battle tunables, including the authoritative deadline.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleConfig {
    /// Authoritative end instant computed at activation. When absent the
    /// auto-end supervisor falls back to `started_at + duration_secs`.
    pub end_time: Option<OffsetDateTime>,
    /// Accumulated shoots required to convert into one goal.
    pub goal_threshold: u32,
    /// Policy deciding the winner at battle end.
    pub win_condition: WinCondition,
    /// Pause between two rounds before play resumes.
    pub round_break_secs: u64,
}

/// One bounded sub-session of a battle with its own goal and shoot tallies.
#[derive(Debug, Clone, PartialEq)]
pub struct Round {
    /// 1-based position of this round within the battle.
    pub round_number: u32,
    /// Goals scored by the challenger this round.
    pub goals_a: u32,
    /// Goals scored by the opponent this round.
    pub goals_b: u32,
    /// Challenger shoots accumulated toward the next goal.
    pub shoots_a: u32,
    /// Opponent shoots accumulated toward the next goal.
    pub shoots_b: u32,
    /// Cumulative challenger coin score as of this round.
    pub score_a: u64,
    /// Cumulative opponent coin score as of this round.
    pub score_b: u64,
    /// UI-facing value in [-1, 1]; positive numbers push toward the opponent's goal.
    pub ball_position: f32,
}

impl Round {
    /// Open a fresh round with zeroed tallies.
    pub fn new(round_number: u32) -> Self {
        Self {
            round_number,
            goals_a: 0,
            goals_b: 0,
            shoots_a: 0,
            shoots_b: 0,
            score_a: 0,
            score_b: 0,
            ball_position: 0.0,
        }
    }

    /// Shoots accumulated by `side` this round.
    pub fn shoots(&self, side: BattleSide) -> u32 {
        match side {
            BattleSide::Challenger => self.shoots_a,
            BattleSide::Opponent => self.shoots_b,
        }
    }

    /// Add shoots for `side`.
    pub fn add_shoots(&mut self, side: BattleSide, count: u32) {
        match side {
            BattleSide::Challenger => self.shoots_a += count,
            BattleSide::Opponent => self.shoots_b += count,
        }
    }

    /// Record a goal for `side` and reset that side's shoot counter to zero.
    ///
    /// The counter is fully reset rather than decremented so clients get a
    /// clean trigger boundary for the goal animation.
    pub fn record_goal(&mut self, side: BattleSide) {
        match side {
            BattleSide::Challenger => {
                self.goals_a += 1;
                self.shoots_a = 0;
            }
            BattleSide::Opponent => {
                self.goals_b += 1;
                self.shoots_b = 0;
            }
        }
    }

    /// Side with more goals this round, or `None` on a tie.
    pub fn winner(&self) -> Option<BattleSide> {
        match self.goals_a.cmp(&self.goals_b) {
            std::cmp::Ordering::Greater => Some(BattleSide::Challenger),
            std::cmp::Ordering::Less => Some(BattleSide::Opponent),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// Recompute the derived ball position from the goal/shoot differential.
    pub fn recompute_ball_position(&mut self, goal_threshold: u32) {
        let goals = self.goals_a as f32 - self.goals_b as f32;
        let shoots = (self.shoots_a as f32 - self.shoots_b as f32) / goal_threshold.max(1) as f32;
        self.ball_position = (goals + shoots).clamp(-1.0, 1.0);
    }
}

/// Aggregate root of a PK session.
#[derive(Debug, Clone, PartialEq)]
pub struct Battle {
    /// Stable identifier for the session lifetime.
    pub id: Uuid,
    /// Mandatory battle initiator.
    pub challenger: Participant,
    /// Optional opposing participant; a PK may run challenger-only vs. cohosts.
    pub opponent: Option<Participant>,
    /// Viewer streams receiving battle broadcasts without competing.
    pub cohost_stream_ids: Vec<String>,
    /// Coarse lifecycle.
    pub status: BattleStatus,
    /// Fine-grained phase while the battle runs.
    pub phase: BattlePhase,
    /// Instant the countdown began.
    pub countdown_started_at: Option<OffsetDateTime>,
    /// Length of the pre-battle countdown.
    pub countdown_duration_secs: u64,
    /// Instant the battle went active.
    pub started_at: Option<OffsetDateTime>,
    /// Instant the battle ended, for any reason.
    pub ended_at: Option<OffsetDateTime>,
    /// Total battle budget in seconds.
    pub duration_secs: u64,
    /// Last server timestamp pushed to clients through a timer sync.
    pub server_sync_time: Option<OffsetDateTime>,
    /// Last instant any mutating operation touched this battle.
    pub last_activity_at: Option<OffsetDateTime>,
    /// Challenger coin total from gifts.
    pub challenger_score: u64,
    /// Opponent coin total from gifts.
    pub opponent_score: u64,
    /// Challenger discrete goal count across all rounds.
    pub challenger_goals: u32,
    /// Opponent discrete goal count across all rounds.
    pub opponent_goals: u32,
    /// Number of gifts received on the challenger side.
    pub challenger_gift_count: u64,
    /// Number of gifts received on the opponent side.
    pub opponent_gift_count: u64,
    /// Combined coin value of every gift in the battle.
    pub total_gift_value: u64,
    /// 1-based current round; advances past `total_rounds` only at the end.
    pub current_round: u32,
    /// Number of rounds the battle is configured to play.
    pub total_rounds: u32,
    /// Length of one round.
    pub round_duration_minutes: u64,
    /// Ordered per-round score snapshots, created lazily as rounds open.
    pub rounds: Vec<Round>,
    /// Winning user once finished; `None` under `Finished` means a draw.
    pub winner_id: Option<Uuid>,
    /// Challenger stream connectivity.
    pub challenger_stream_status: StreamHealth,
    /// Opponent stream connectivity.
    pub opponent_stream_status: StreamHealth,
    /// Per-battle tunables.
    pub config: BattleConfig,
}

impl Battle {
    /// Build a fresh pending battle.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        challenger: Participant,
        opponent: Option<Participant>,
        cohost_stream_ids: Vec<String>,
        duration_secs: u64,
        countdown_duration_secs: u64,
        total_rounds: u32,
        round_duration_minutes: u64,
        config: BattleConfig,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            challenger,
            opponent,
            cohost_stream_ids,
            status: BattleStatus::Pending,
            phase: BattlePhase::Countdown,
            countdown_started_at: None,
            countdown_duration_secs,
            started_at: None,
            ended_at: None,
            duration_secs,
            server_sync_time: None,
            last_activity_at: None,
            challenger_score: 0,
            opponent_score: 0,
            challenger_goals: 0,
            opponent_goals: 0,
            challenger_gift_count: 0,
            opponent_gift_count: 0,
            total_gift_value: 0,
            current_round: 0,
            total_rounds,
            round_duration_minutes,
            rounds: Vec::new(),
            winner_id: None,
            challenger_stream_status: StreamHealth::Healthy,
            opponent_stream_status: StreamHealth::Healthy,
            config,
        }
    }

    /// Every stream that receives battle broadcasts: challenger, opponent when
    /// present, then cohosts. Duplicates are filtered defensively even though
    /// the create path rejects them.
    pub fn participant_stream_ids(&self) -> Vec<String> {
        let mut ids = vec![self.challenger.stream_id.clone()];
        if let Some(opponent) = &self.opponent {
            if !ids.contains(&opponent.stream_id) {
                ids.push(opponent.stream_id.clone());
            }
        }
        for cohost in &self.cohost_stream_ids {
            if !ids.contains(cohost) {
                ids.push(cohost.clone());
            }
        }
        ids
    }

    /// Resolve a user to their role within this battle.
    pub fn role_of(&self, user_id: Uuid) -> ParticipantRole {
        if self.challenger.user_id == user_id {
            ParticipantRole::Challenger
        } else if self.opponent.as_ref().is_some_and(|o| o.user_id == user_id) {
            ParticipantRole::Opponent
        } else {
            ParticipantRole::Viewer
        }
    }

    /// Authoritative deadline for auto-expiry.
    pub fn deadline(&self) -> Option<OffsetDateTime> {
        self.config.end_time.or_else(|| {
            self.started_at
                .map(|started| started + time::Duration::seconds(self.duration_secs as i64))
        })
    }

    /// Mutable access to the round currently being played.
    pub fn current_round_mut(&mut self) -> Option<&mut Round> {
        let number = self.current_round;
        self.rounds
            .iter_mut()
            .find(|round| round.round_number == number)
    }

    /// The round currently being played.
    pub fn current_round_ref(&self) -> Option<&Round> {
        self.rounds
            .iter()
            .find(|round| round.round_number == self.current_round)
    }

    /// Open the next round lazily and make it current.
    pub fn open_round(&mut self, round_number: u32) {
        self.current_round = round_number;
        if !self.rounds.iter().any(|r| r.round_number == round_number) {
            self.rounds.push(Round::new(round_number));
        }
    }

    /// Coin score for `side`.
    pub fn score(&self, side: BattleSide) -> u64 {
        match side {
            BattleSide::Challenger => self.challenger_score,
            BattleSide::Opponent => self.opponent_score,
        }
    }

    /// Record a gift on `side`: coin score, gift count, and the shared total.
    pub fn add_gift(&mut self, side: BattleSide, coin_value: u64) {
        match side {
            BattleSide::Challenger => {
                self.challenger_score += coin_value;
                self.challenger_gift_count += 1;
            }
            BattleSide::Opponent => {
                self.opponent_score += coin_value;
                self.opponent_gift_count += 1;
            }
        }
        self.total_gift_value += coin_value;
    }

    /// Record a battle-level goal for `side`.
    pub fn add_goal(&mut self, side: BattleSide) {
        match side {
            BattleSide::Challenger => self.challenger_goals += 1,
            BattleSide::Opponent => self.opponent_goals += 1,
        }
    }

    /// User id of the participant on `side`, when that side exists.
    pub fn side_user_id(&self, side: BattleSide) -> Option<Uuid> {
        match side {
            BattleSide::Challenger => Some(self.challenger.user_id),
            BattleSide::Opponent => self.opponent.as_ref().map(|o| o.user_id),
        }
    }
}
