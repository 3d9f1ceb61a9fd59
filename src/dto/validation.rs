//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest accepted room, player or track identifier.
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Validates an opaque identifier: 1 to 64 ASCII alphanumerics, `-`, `_`, `.` or `:`.
///
/// # Examples
///
/// ```ignore
/// validate_identifier("room-42")      // Ok
/// validate_identifier("spotify:123")  // Ok
/// validate_identifier("")             // Err - empty
/// validate_identifier("a b")          // Err - space
/// ```
pub fn validate_identifier(id: &str) -> Result<(), ValidationError> {
    if id.is_empty() || id.len() > MAX_IDENTIFIER_LEN {
        let mut err = ValidationError::new("identifier_length");
        err.message = Some(
            format!(
                "identifier must be 1 to {MAX_IDENTIFIER_LEN} characters (got {})",
                id.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        let mut err = ValidationError::new("identifier_format");
        err.message = Some("identifier contains unsupported characters".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_valid() {
        assert!(validate_identifier("room-42").is_ok());
        assert!(validate_identifier("player_1").is_ok());
        assert!(validate_identifier("spotify:track.9").is_ok());
        assert!(validate_identifier(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn test_validate_identifier_invalid_length() {
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_identifier_invalid_format() {
        assert!(validate_identifier("a b").is_err());
        assert!(validate_identifier("room/1").is_err());
        assert!(validate_identifier("sala-ç").is_err());
    }
}
