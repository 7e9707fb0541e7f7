// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Message validation module.

use regex::Regex;
use shopstatus_common::{ClientMessage, UserId};
use std::sync::LazyLock;
use thiserror::Error;

const MAX_USERNAME_LENGTH: usize = 100;

// Display names end up in every client's online list
static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^<>{}\[\];\\\p{Cc}]+$").expect("username pattern is valid"));

/// Possible validation errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid user ID: {0}")]
    InvalidUserId(String),

    #[error("Invalid username: {0}")]
    InvalidUsername(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a user identifier
pub fn validate_user_id(user_id: UserId) -> ValidationResult<UserId> {
    if user_id <= 0 {
        return Err(ValidationError::InvalidUserId(format!(
            "User ID must be positive, got {user_id}"
        )));
    }
    Ok(user_id)
}

/// Validate a display name
pub fn validate_username(username: &str) -> ValidationResult<&str> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidUsername(
            "Username must not be empty".to_string(),
        ));
    }

    if trimmed.chars().count() > MAX_USERNAME_LENGTH {
        return Err(ValidationError::InvalidUsername(format!(
            "Username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }

    if !USERNAME_REGEX.is_match(trimmed) {
        return Err(ValidationError::InvalidUsername(
            "Username contains invalid characters".to_string(),
        ));
    }

    Ok(trimmed)
}

/// Validate a client message before it reaches the hub
pub fn validate_client_message(msg: &ClientMessage) -> ValidationResult<()> {
    match msg {
        ClientMessage::Auth {
            user_id, username, ..
        } => {
            validate_user_id(*user_id)?;
            validate_username(username)?;
        },
        ClientMessage::Heartbeat { .. }
        | ClientMessage::Activity { .. }
        | ClientMessage::RequestStatus => {},
    }
    Ok(())
}
