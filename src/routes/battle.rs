use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::battle::{
        ActionResponse, BattleSummary, CreateBattleRequest, EndBattleRequest, EndBattleResponse,
        GiftRequest, GoalRequest, RoundEndResponse, StreamStatusRequest, TimerSyncRequest,
    },
    error::AppError,
    services::{battle_service, engine},
    state::SharedState,
};

/// Routes driving the battle lifecycle and scoring.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/battles", post(create_battle))
        .route("/battles/{id}", get(get_battle))
        .route("/battles/{id}/start", post(start_battle))
        .route("/battles/{id}/gifts", post(record_gift))
        .route("/battles/{id}/goals", post(score_goal))
        .route("/battles/{id}/end-round", post(end_round))
        .route("/battles/{id}/end", post(end_battle))
        .route("/battles/{id}/timer-sync", post(sync_timer))
        .route("/battles/{id}/stream-status", post(update_stream_status))
}

/// Create a fresh pending battle.
#[utoipa::path(
    post,
    path = "/battles",
    tag = "battle",
    request_body = CreateBattleRequest,
    responses(
        (status = 200, description = "Battle created", body = BattleSummary),
        (status = 400, description = "Invalid participants or cohost streams"),
        (status = 409, description = "Challenger stream already hosts a live battle")
    )
)]
pub async fn create_battle(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateBattleRequest>>,
) -> Result<Json<BattleSummary>, AppError> {
    let summary = battle_service::create_battle(&state, payload).await?;
    Ok(Json(summary))
}

/// Fetch the current snapshot of a battle.
#[utoipa::path(
    get,
    path = "/battles/{id}",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    responses(
        (status = 200, description = "Battle snapshot", body = BattleSummary),
        (status = 404, description = "Battle not found")
    )
)]
pub async fn get_battle(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<BattleSummary>, AppError> {
    let summary = battle_service::get_battle(&state, id).await?;
    Ok(Json(summary))
}

/// Start the pre-battle countdown.
#[utoipa::path(
    post,
    path = "/battles/{id}/start",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    responses(
        (status = 200, description = "Countdown started or duplicate absorbed", body = ActionResponse)
    )
)]
pub async fn start_battle(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ActionResponse>, AppError> {
    let ack = engine::start_battle(&state, id).await?;
    Ok(Json(ack.into()))
}

/// Score a gift on one side of the battle.
#[utoipa::path(
    post,
    path = "/battles/{id}/gifts",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    request_body = GiftRequest,
    responses(
        (status = 200, description = "Gift scored or absorbed", body = ActionResponse)
    )
)]
pub async fn record_gift(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<GiftRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let ack = engine::record_gift(&state, id, payload).await?;
    Ok(Json(ack.into()))
}

/// Credit a goal directly, bypassing the shoot accumulator.
#[utoipa::path(
    post,
    path = "/battles/{id}/goals",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    request_body = GoalRequest,
    responses(
        (status = 200, description = "Goal credited or absorbed", body = ActionResponse)
    )
)]
pub async fn score_goal(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<GoalRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let ack = engine::score_goal(&state, id, payload.side).await?;
    Ok(Json(ack.into()))
}

/// End the current round, entering the break or finishing the battle.
#[utoipa::path(
    post,
    path = "/battles/{id}/end-round",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    responses(
        (status = 200, description = "Round ended or absorbed", body = RoundEndResponse)
    )
)]
pub async fn end_round(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoundEndResponse>, AppError> {
    let outcome = engine::end_round(&state, id).await?;
    Ok(Json(outcome.into()))
}

/// End the battle and compute the winner.
#[utoipa::path(
    post,
    path = "/battles/{id}/end",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    request_body = EndBattleRequest,
    responses(
        (status = 200, description = "Battle ended or duplicate absorbed", body = EndBattleResponse)
    )
)]
pub async fn end_battle(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<EndBattleRequest>>,
) -> Result<Json<EndBattleResponse>, AppError> {
    let is_auto = payload.map(|Json(body)| body.is_auto).unwrap_or(false);
    let outcome = engine::end_battle(&state, id, is_auto).await?;
    Ok(Json(outcome.into()))
}

/// Push a host-driven timer correction to the challenger stream.
#[utoipa::path(
    post,
    path = "/battles/{id}/timer-sync",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    request_body = TimerSyncRequest,
    responses(
        (status = 200, description = "Correction broadcast or absorbed", body = ActionResponse)
    )
)]
pub async fn sync_timer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<TimerSyncRequest>>,
) -> Result<Json<ActionResponse>, AppError> {
    let request = payload.map(|Json(body)| body).unwrap_or_default();
    let ack = engine::sync_timer(&state, id, request).await?;
    Ok(Json(ack.into()))
}

/// Report a participant's stream connectivity.
#[utoipa::path(
    post,
    path = "/battles/{id}/stream-status",
    tag = "battle",
    params(("id" = Uuid, Path, description = "Battle identifier")),
    request_body = StreamStatusRequest,
    responses(
        (status = 200, description = "Status recorded and broadcast", body = ActionResponse)
    )
)]
pub async fn update_stream_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StreamStatusRequest>,
) -> Result<Json<ActionResponse>, AppError> {
    let ack = engine::update_stream_status(&state, id, payload).await?;
    Ok(Json(ack.into()))
}
