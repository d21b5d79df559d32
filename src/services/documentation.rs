use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for PK Battle Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::battle::create_battle,
        crate::routes::battle::get_battle,
        crate::routes::battle::start_battle,
        crate::routes::battle::record_gift,
        crate::routes::battle::score_goal,
        crate::routes::battle::end_round,
        crate::routes::battle::end_battle,
        crate::routes::battle::sync_timer,
        crate::routes::battle::update_stream_status,
        crate::routes::sse::stream_events,
        crate::routes::sse::battle_events,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::battle::CreateBattleRequest,
            crate::dto::battle::ParticipantInput,
            crate::dto::battle::GiftRequest,
            crate::dto::battle::GoalRequest,
            crate::dto::battle::EndBattleRequest,
            crate::dto::battle::TimerSyncRequest,
            crate::dto::battle::StreamStatusRequest,
            crate::dto::battle::ActionResponse,
            crate::dto::battle::RoundEndResponse,
            crate::dto::battle::EndBattleResponse,
            crate::dto::battle::BattleSummary,
            crate::dto::battle::ParticipantSummary,
            crate::dto::battle::RoundSummary,
            crate::dto::events::BattleEvent,
            crate::routes::sse::ScopeParam,
            crate::state::battle::BattleStatus,
            crate::state::battle::BattlePhase,
            crate::state::battle::BattleSide,
            crate::state::battle::StreamHealth,
            crate::state::battle::WinCondition,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "battle", description = "PK battle lifecycle and scoring operations"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
