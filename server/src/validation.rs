use uuid::Uuid;

use crate::error::ApiError;

/// Maximum input length for meditation requests
const MAX_INPUT_LENGTH: usize = 5000;

/// Validate meditation request input
pub fn validate_meditation_request(input: &str) -> Result<(), ApiError> {
    if input.trim().is_empty() {
        return Err(ApiError::InvalidInput("Input cannot be empty".to_string()));
    }
    if input.chars().count() > MAX_INPUT_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Input too long (max {} characters)",
            MAX_INPUT_LENGTH
        )));
    }
    Ok(())
}

/// Validate a stream id from the URL
pub fn validate_stream_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id)
        .map_err(|_| ApiError::InvalidInput(format!("Invalid stream id: {}", id)))
}
