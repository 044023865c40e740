//! Input validation for user-supplied fields and listing parameters.

use crate::error::ChatError;

/// Maximum message body length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 4096;

/// Maximum display name length in characters.
pub const MAX_DISPLAY_NAME_LENGTH: usize = 80;

/// Default page size for listing endpoints.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page size a client may request.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Validate a message body.
///
/// Requirements:
/// - Not empty or whitespace-only
/// - At most `MAX_MESSAGE_LENGTH` characters
pub fn validate_message_text(text: &str) -> Result<(), ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyBody);
    }
    if text.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(ChatError::MessageTooLong);
    }
    Ok(())
}

/// Normalize an optional display name.
///
/// Trims surrounding whitespace and treats an empty result as unset;
/// rejects names longer than `MAX_DISPLAY_NAME_LENGTH` characters.
pub fn normalize_display_name(name: Option<String>) -> Result<Option<String>, ChatError> {
    let Some(name) = name else {
        return Ok(None);
    };
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return Err(ChatError::DisplayNameTooLong);
    }
    Ok(Some(trimmed.to_string()))
}

/// Clamp a 1-based page index, defaulting to the first page.
pub fn clamp_page(page: Option<u32>) -> u32 {
    page.unwrap_or(1).max(1)
}

/// Clamp a page size into `1..=MAX_PAGE_SIZE`, defaulting to `DEFAULT_PAGE_SIZE`.
pub fn clamp_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_text_rules() {
        assert!(validate_message_text("hello").is_ok());
        assert!(validate_message_text("  padded  ").is_ok());

        assert!(matches!(validate_message_text(""), Err(ChatError::EmptyBody)));
        assert!(matches!(validate_message_text("   "), Err(ChatError::EmptyBody)));
        assert!(matches!(validate_message_text("\n\t"), Err(ChatError::EmptyBody)));

        let long = "x".repeat(MAX_MESSAGE_LENGTH + 1);
        assert!(matches!(validate_message_text(&long), Err(ChatError::MessageTooLong)));

        let max = "x".repeat(MAX_MESSAGE_LENGTH);
        assert!(validate_message_text(&max).is_ok());
    }

    #[test]
    fn display_name_normalization() {
        assert_eq!(normalize_display_name(None).unwrap(), None);
        assert_eq!(normalize_display_name(Some("".into())).unwrap(), None);
        assert_eq!(normalize_display_name(Some("   ".into())).unwrap(), None);
        assert_eq!(
            normalize_display_name(Some("  Ada Lovelace  ".into())).unwrap(),
            Some("Ada Lovelace".to_string())
        );

        let long = "x".repeat(MAX_DISPLAY_NAME_LENGTH + 1);
        assert!(matches!(
            normalize_display_name(Some(long)),
            Err(ChatError::DisplayNameTooLong)
        ));
    }

    #[test]
    fn pagination_clamping() {
        assert_eq!(clamp_page(None), 1);
        assert_eq!(clamp_page(Some(0)), 1);
        assert_eq!(clamp_page(Some(7)), 7);

        assert_eq!(clamp_limit(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(35)), 35);
        assert_eq!(clamp_limit(Some(10_000)), MAX_PAGE_SIZE);
    }
}
