//! Wire-facing data transfer objects and their validation helpers.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub mod battle;
pub mod events;
pub mod health;
pub mod validation;

/// Render a timestamp in the RFC 3339 wire format shared by every broadcast
/// payload and snapshot.
pub fn format_timestamp(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}
