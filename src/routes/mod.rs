//! HTTP surface: route subtrees and the composed application router.

use axum::Router;

use crate::state::SharedState;

/// Battle lifecycle and scoring endpoints.
pub mod battle;
/// Swagger UI and OpenAPI document routes.
pub mod docs;
/// Health check endpoint.
pub mod health;
/// Server-Sent Events subscription endpoints.
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    health::router()
        .merge(sse::router())
        .merge(battle::router())
        .merge(docs::router())
        .with_state(state)
}
