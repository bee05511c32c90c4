//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifier Validation
// ─────────────────────────────────────────────────────────────────────────────

use crate::error::ErrorCode;
use crate::protocol_constants::IDENTIFIER_LENGTH;

/// Error returned when a `SourceItem` identifier fails the syntactic check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Identifier is not exactly [`IDENTIFIER_LENGTH`] characters.
    WrongLength(usize),
    /// Identifier contains a character outside `[A-Za-z0-9_-]`.
    InvalidCharacter(char),
}

impl ErrorCode for IdentifierError {
    fn code(&self) -> &'static str {
        "invalid_identifier"
    }
}

impl std::fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongLength(len) => write!(
                f,
                "identifier must be exactly {IDENTIFIER_LENGTH} characters, got {len}"
            ),
            Self::InvalidCharacter(c) => write!(f, "identifier contains invalid character '{c}'"),
        }
    }
}

impl std::error::Error for IdentifierError {}

/// Validates that a string is a syntactically valid opaque source identifier:
/// fixed length, alphanumeric plus `-`/`_`.
///
/// # Examples
///
/// ```
/// use relaycast_core::validate_identifier;
///
/// assert!(validate_identifier("dQw4w9WgXc").is_err()); // 10 chars, too short
/// assert!(validate_identifier("dQw4w9WgXcQ").is_ok()); // 11 chars
/// ```
pub fn validate_identifier(id: &str) -> Result<(), IdentifierError> {
    let len = id.chars().count();
    if len != IDENTIFIER_LENGTH {
        return Err(IdentifierError::WrongLength(len));
    }
    if let Some(c) = id.chars().find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_')) {
        return Err(IdentifierError::InvalidCharacter(c));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_nonzero_in_practice() {
        assert!(now_millis() > 0);
    }

    #[test]
    fn validate_identifier_accepts_exact_length() {
        assert!(validate_identifier("abcDEF12345").is_ok());
    }

    #[test]
    fn validate_identifier_rejects_short() {
        assert_eq!(
            validate_identifier("short"),
            Err(IdentifierError::WrongLength(5))
        );
    }

    #[test]
    fn validate_identifier_rejects_long() {
        assert_eq!(
            validate_identifier("waytoolongidentifier"),
            Err(IdentifierError::WrongLength(20))
        );
    }

    #[test]
    fn validate_identifier_rejects_invalid_character() {
        assert_eq!(
            validate_identifier("abc!ef12345"),
            Err(IdentifierError::InvalidCharacter('!'))
        );
    }

    #[test]
    fn validate_identifier_accepts_dash_and_underscore() {
        assert!(validate_identifier("ab-_ef12345").is_ok());
    }

    #[test]
    fn identifier_error_code_is_stable() {
        assert_eq!(IdentifierError::WrongLength(3).code(), "invalid_identifier");
    }
}
