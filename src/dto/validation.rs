//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_STREAM_ID_LENGTH: usize = 64;

/// Validates that a stream ID is non-empty, at most 64 characters, and made of
/// alphanumerics, dashes, and underscores.
///
/// Stream IDs become broadcast channel names (`live-stream.{id}`), so the
/// character set is kept narrow on purpose.
pub fn validate_stream_id(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_STREAM_ID_LENGTH {
        let mut err = ValidationError::new("stream_id_length");
        err.message = Some(
            format!(
                "Stream ID must be between 1 and {MAX_STREAM_ID_LENGTH} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        let mut err = ValidationError::new("stream_id_format");
        err.message =
            Some("Stream ID must contain only alphanumerics, dashes, and underscores".into());
        return Err(err);
    }

    Ok(())
}
