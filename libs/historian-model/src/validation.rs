//! Validation Utilities
//!
//! Location names end up quoted inside DDL, so they are restricted before
//! they reach any backend.

use crate::error::{ModelError, Result};

/// Maximum length of a table or metric name
pub const MAX_LOCATION_LEN: usize = 63;

/// Validate a storage location name
///
/// Rules:
/// - Length: 1-63 characters
/// - Characters: alphanumeric, underscore (_), hyphen (-)
///
/// # Examples
/// ```
/// use historian_model::validate_location_name;
///
/// assert!(validate_location_name("t_pump-01").is_ok());
/// assert!(validate_location_name("").is_err());
/// assert!(validate_location_name("t\"; drop").is_err());
/// ```
pub fn validate_location_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ModelError::InvalidLocation(
            "Location name cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_LOCATION_LEN {
        return Err(ModelError::InvalidLocation(format!(
            "Location name too long ({} characters). Maximum length is {} characters.",
            name.len(),
            MAX_LOCATION_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ModelError::InvalidLocation(format!(
            "Location name can only contain letters, numbers, underscores and hyphens: '{}'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_limit() {
        let long = "t".repeat(MAX_LOCATION_LEN + 1);
        assert!(validate_location_name(&long).is_err());
        assert!(validate_location_name(&long[1..]).is_ok());
    }
}
