//! Service layer: battle logic, event fan-out, and supporting services.

/// Deadline supervision and force-cancel of overrunning battles.
pub mod auto_end;
/// Battle bootstrap and lookup.
pub mod battle_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// Battle engine: lifecycle transitions, gift scoring, and round handling.
pub mod engine;
/// Broadcast fan-out of battle events onto named channels.
pub mod fanout;
/// Health check service.
pub mod health_service;
/// Server-Sent Events streaming service.
pub mod sse_service;
