//! Input validation for the public video identifier and the upstream credential

use crate::errors::IngestionError;
use regex_lite::Regex;
use std::sync::OnceLock;

fn bvid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^BV[a-zA-Z0-9]{10}$").ok())
        .as_ref()
}

/// True iff `id` is exactly "BV" followed by 10 ASCII alphanumerics.
/// Case-sensitive, no trimming.
pub fn validate(id: &str) -> bool {
    bvid_pattern().is_some_and(|re| re.is_match(id))
}

/// Validate an identifier, mapping rejection to an error
pub fn require_valid(id: &str) -> Result<(), IngestionError> {
    if validate(id) {
        Ok(())
    } else {
        Err(IngestionError::InvalidIdentifier(id.to_string()))
    }
}

/// Reject blank or implausibly short credentials before any network access
pub fn validate_credential(credential: &str, min_len: usize) -> Result<(), IngestionError> {
    let credential = credential.trim();
    if credential.is_empty() {
        return Err(IngestionError::InvalidCredential("credential is empty".to_string()));
    }
    if credential.chars().count() < min_len {
        return Err(IngestionError::InvalidCredential(format!(
            "credential shorter than {} characters",
            min_len
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_well_formed_identifiers() {
        assert!(validate("BV1xx411c7mD"));
        assert!(validate("BV1yK2QBAEHv"));
        assert!(validate("BV0000000000"));
    }

    #[test]
    fn test_rejects_malformed_identifiers() {
        assert!(!validate("BV1yK2QBAEHvX"));
        assert!(!validate("bv1yK2QBAE"));
        assert!(!validate("bv1xx411c7mD"));
        assert!(!validate("BV1xx411c7m"));
        assert!(!validate(" BV1xx411c7mD"));
        assert!(!validate("BV1xx411c7mD "));
        assert!(!validate("BV1xx411c7-D"));
        assert!(!validate("BV1xx411c7m测"));
        assert!(!validate("av170001"));
        assert!(!validate(""));
    }

    #[test]
    fn test_require_valid() {
        tokio_test::assert_ok!(require_valid("BV1xx411c7mD"));
        assert!(matches!(
            require_valid("BV123"),
            Err(IngestionError::InvalidIdentifier(id)) if id == "BV123"
        ));
    }

    #[test]
    fn test_credential_validation() {
        assert!(validate_credential("", 50).is_err());
        assert!(validate_credential("   ", 50).is_err());
        assert!(validate_credential("SESSDATA=abc", 50).is_err());

        let cookie = format!("SESSDATA={}; bili_jct={}", "a".repeat(32), "b".repeat(32));
        tokio_test::assert_ok!(validate_credential(&cookie, 50));
    }
}
