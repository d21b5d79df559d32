//! Battle bootstrap and lookup, including the create-time sanity checks that
//! the field-level validators cannot express.

use std::collections::HashSet;

use tracing::info;
use uuid::Uuid;

use crate::{
    dto::{
        battle::{BattleSummary, CreateBattleRequest, ParticipantInput},
        validation::validate_stream_id,
    },
    error::ServiceError,
    state::{
        SharedState,
        battle::{Battle, BattleConfig, Participant, WinCondition},
    },
};

/// Create a new pending battle after cross-field checks: cohost stream ids
/// must be well-formed, unique, and disjoint from the competing streams, and
/// a challenger stream can host at most one non-terminal battle at a time.
pub async fn create_battle(
    state: &SharedState,
    request: CreateBattleRequest,
) -> Result<BattleSummary, ServiceError> {
    if let Some(opponent) = &request.opponent
        && opponent.stream_id == request.challenger.stream_id
    {
        return Err(ServiceError::InvalidInput(
            "opponent and challenger cannot share a stream".into(),
        ));
    }

    let mut seen = HashSet::new();
    for stream_id in &request.cohost_stream_ids {
        validate_stream_id(stream_id).map_err(|_| {
            ServiceError::InvalidInput(format!("invalid cohost stream id `{stream_id}`"))
        })?;
        if !seen.insert(stream_id) {
            return Err(ServiceError::InvalidInput(format!(
                "duplicate cohost stream id `{stream_id}`"
            )));
        }
        if *stream_id == request.challenger.stream_id
            || request
                .opponent
                .as_ref()
                .is_some_and(|o| o.stream_id == *stream_id)
        {
            return Err(ServiceError::InvalidInput(format!(
                "cohost stream id `{stream_id}` collides with a competing stream"
            )));
        }
    }

    if let Some(existing) = state
        .store()
        .find_live_by_challenger_stream(&request.challenger.stream_id)
        .await?
    {
        return Err(ServiceError::InvalidState(format!(
            "stream `{}` already hosts battle `{existing}`",
            request.challenger.stream_id
        )));
    }

    let config = state.config();
    let total_rounds = request.total_rounds.unwrap_or(config.default_total_rounds);
    let win_condition = request
        .win_condition
        .or(config.default_win_condition)
        .unwrap_or(if total_rounds > 1 {
            WinCondition::Goals
        } else {
            WinCondition::Score
        });

    let battle = Battle::new(
        participant(request.challenger),
        request.opponent.map(participant),
        request.cohost_stream_ids,
        request.duration_secs.unwrap_or(config.default_duration_secs),
        request.countdown_secs.unwrap_or(config.countdown_secs),
        total_rounds,
        request
            .round_duration_minutes
            .unwrap_or(config.default_round_duration_minutes),
        BattleConfig {
            end_time: None,
            goal_threshold: request.goal_threshold.unwrap_or(config.goal_threshold),
            win_condition,
            round_break_secs: config.round_break_secs,
        },
    );
    state.store().save(battle.clone()).await?;

    info!(
        battle_id = %battle.id,
        challenger_stream = %battle.challenger.stream_id,
        rounds = battle.total_rounds,
        "battle created"
    );
    Ok((&battle).into())
}

/// Fetch a battle snapshot by id.
pub async fn get_battle(state: &SharedState, battle_id: Uuid) -> Result<BattleSummary, ServiceError> {
    let battle = state
        .store()
        .find(battle_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("battle `{battle_id}` does not exist")))?;
    Ok((&battle).into())
}

fn participant(input: ParticipantInput) -> Participant {
    Participant {
        user_id: input.user_id,
        stream_id: input.stream_id,
        display_name: input.display_name,
    }
}
