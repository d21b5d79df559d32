use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, Query, State},
    response::sse::Sse,
    routing::get,
};
use futures::Stream;
use serde::Deserialize;
use tracing::info;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    dto::validation::validate_stream_id,
    error::AppError,
    services::sse_service,
    state::{SharedState, broadcast},
};

/// Scope selector for the per-stream subscription endpoint.
#[derive(Debug, Default, Clone, Copy, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct StreamEventsQuery {
    /// Channel scope: `main` (default), `chat`, or `gifts`.
    #[serde(default)]
    pub scope: ScopeParam,
}

/// Wire form of the channel scope.
#[derive(Debug, Default, Clone, Copy, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScopeParam {
    /// General battle events.
    #[default]
    Main,
    /// Chat-scoped events.
    Chat,
    /// Gift-scoped events.
    Gifts,
}

impl From<ScopeParam> for broadcast::ChannelScope {
    fn from(value: ScopeParam) -> Self {
        match value {
            ScopeParam::Main => broadcast::ChannelScope::Main,
            ScopeParam::Chat => broadcast::ChannelScope::Chat,
            ScopeParam::Gifts => broadcast::ChannelScope::Gifts,
        }
    }
}

#[utoipa::path(
    get,
    path = "/sse/stream/{stream_id}",
    tag = "sse",
    params(
        ("stream_id" = String, Path, description = "Live stream identifier"),
        StreamEventsQuery,
    ),
    responses((status = 200, description = "Per-stream SSE feed", content_type = "text/event-stream", body = String))
)]
/// Stream battle events scoped to one live stream.
pub async fn stream_events(
    State(state): State<SharedState>,
    Path(stream_id): Path<String>,
    Query(query): Query<StreamEventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>>, AppError> {
    validate_stream_id(&stream_id)
        .map_err(|_| AppError::BadRequest(format!("invalid stream id `{stream_id}`")))?;
    let channel = broadcast::stream_channel(&stream_id, query.scope.into());
    let receiver = sse_service::subscribe(&state, &channel);
    info!(channel, "new stream SSE connection");
    Ok(sse_service::to_sse_stream(receiver, channel))
}

#[utoipa::path(
    get,
    path = "/sse/battle/{battle_id}",
    tag = "sse",
    params(("battle_id" = Uuid, Path, description = "Battle identifier")),
    responses((status = 200, description = "Battle-spectator SSE feed", content_type = "text/event-stream", body = String))
)]
/// Stream battle events for spectators not tied to any live stream.
pub async fn battle_events(
    State(state): State<SharedState>,
    Path(battle_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<axum::response::sse::Event, Infallible>>> {
    let channel = broadcast::battle_channel(battle_id);
    let receiver = sse_service::subscribe(&state, &channel);
    info!(channel, "new battle SSE connection");
    sse_service::to_sse_stream(receiver, channel)
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/stream/{stream_id}", get(stream_events))
        .route("/sse/battle/{battle_id}", get(battle_events))
}
