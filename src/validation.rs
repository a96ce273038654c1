/// Request validation helpers
use crate::error::{ApiError, ApiResult};
use validator::Validate;

/// Validate a request DTO and flatten the field errors into the uniform
/// error envelope
pub fn validate_payload<T: Validate>(payload: &T) -> ApiResult<()> {
    payload.validate().map_err(|errors| {
        let mut messages: Vec<String> = Vec::new();

        for (field, field_errors) in errors.field_errors() {
            for error in field_errors {
                match &error.message {
                    Some(message) => messages.push(message.to_string()),
                    None => messages.push(format!("{} is invalid", field)),
                }
            }
        }

        messages.sort();
        ApiError::Validation(messages.join(", "))
    })
}

/// Passwords need at least one uppercase letter, one lowercase letter,
/// and one digit
pub fn validate_password_strength(password: &str) -> ApiResult<()> {
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());

    if !(has_upper && has_lower && has_digit) {
        return Err(ApiError::Validation(
            "Password must contain at least one uppercase letter, one lowercase letter, and one number"
                .to_string(),
        ));
    }

    Ok(())
}

/// Tag list constraints for lesson payloads
pub fn validate_tags(tags: &[String]) -> ApiResult<()> {
    if tags
        .iter()
        .any(|tag| tag.trim().is_empty() || tag.len() > 50)
    {
        return Err(ApiError::Validation(
            "Each tag must be between 1 and 50 characters".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_strength() {
        assert!(validate_password_strength("Passw0rd").is_ok());
        assert!(validate_password_strength("alllowercase1").is_err());
        assert!(validate_password_strength("ALLUPPERCASE1").is_err());
        assert!(validate_password_strength("NoDigitsHere").is_err());
    }

    #[test]
    fn test_tags() {
        assert!(validate_tags(&["rust".to_string()]).is_ok());
        assert!(validate_tags(&[]).is_ok());
        assert!(validate_tags(&["".to_string()]).is_err());
        assert!(validate_tags(&["a".repeat(51)]).is_err());
    }
}
