use crate::models::Category;
use std::fmt;
use uuid::Uuid;

/// Maximum length of a staged name or batch token echoed back by a client.
pub const MAX_NAME_LEN: usize = 255;

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: &'static str,
    pub message: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validates a client-supplied staged name or batch token.
///
/// Names are used as a single component under the staging root, so anything
/// that could address another directory is rejected rather than sanitized.
pub fn validate_staged_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError {
            code: "INVALID_NAME",
            message: "Name cannot be empty".to_string(),
        });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError {
            code: "NAME_TOO_LONG",
            message: format!("Name exceeds {} bytes", MAX_NAME_LEN),
        });
    }

    if name == "." || name.contains("..") || name.contains('/') || name.contains('\\') {
        tracing::warn!("Path traversal attempt detected: {}", name);
        return Err(ValidationError {
            code: "PATH_TRAVERSAL",
            message: format!("Invalid name '{}'", name),
        });
    }

    if name.chars().any(|c| c.is_control() || c == ':' || c == '\0') {
        return Err(ValidationError {
            code: "INVALID_CHARACTERS",
            message: format!("Name '{}' contains forbidden characters", name.escape_default()),
        });
    }

    Ok(())
}

/// True for tokens in the form this service mints (lowercase hyphenated UUID).
pub fn is_minted_token(token: &str) -> bool {
    Uuid::try_parse(token).is_ok_and(|uuid| uuid.to_string() == token)
}

/// Validates a batch token echoed back by a client.
pub fn validate_batch_token(token: &str) -> Result<(), ValidationError> {
    validate_staged_name(token)?;

    if !is_minted_token(token) {
        tracing::warn!("Rejected batch token that was never issued: {}", token);
        return Err(ValidationError {
            code: "INVALID_TOKEN",
            message: format!("Invalid batch token '{}'", token),
        });
    }

    Ok(())
}

/// Validates a staged file name echoed back by a client: `{token}_{suffix}`
/// for the expected category.
pub fn validate_staged_file(category: Category, name: &str) -> Result<(), ValidationError> {
    validate_staged_name(name)?;

    let minted = name
        .strip_suffix(category.file_suffix())
        .and_then(|rest| rest.strip_suffix('_'))
        .is_some_and(is_minted_token);
    if !minted {
        tracing::warn!("Rejected {} name that was never issued: {}", category, name);
        return Err(ValidationError {
            code: "INVALID_TOKEN",
            message: format!("Invalid {} file name '{}'", category, name),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_generated_names() {
        assert!(validate_staged_name("0f8fad5b-d9cb-469f-a165-70867728950e_template.docx").is_ok());
        assert!(validate_staged_name("0f8fad5b-d9cb-469f-a165-70867728950e").is_ok());
    }

    #[test]
    fn test_rejects_traversal() {
        for name in ["../etc/passwd", "a/b", "a\\b", "..", "."] {
            let err = validate_staged_name(name).unwrap_err();
            assert_eq!(err.code, "PATH_TRAVERSAL", "{}", name);
        }
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        assert_eq!(validate_staged_name("  ").unwrap_err().code, "INVALID_NAME");
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert_eq!(validate_staged_name(&long).unwrap_err().code, "NAME_TOO_LONG");
        assert_eq!(validate_staged_name("a\nb").unwrap_err().code, "INVALID_CHARACTERS");
    }

    #[test]
    fn test_batch_tokens_must_be_minted() {
        assert!(validate_batch_token("0f8fad5b-d9cb-469f-a165-70867728950e").is_ok());
        for token in [
            "templates",
            "data",
            "other-app",
            "0F8FAD5B-D9CB-469F-A165-70867728950E",
            "0f8fad5bd9cb469fa16570867728950e",
        ] {
            assert_eq!(validate_batch_token(token).unwrap_err().code, "INVALID_TOKEN", "{}", token);
        }
    }

    #[test]
    fn test_staged_files_must_match_category() {
        let token = "0f8fad5b-d9cb-469f-a165-70867728950e";
        assert!(validate_staged_file(Category::Template, &format!("{}_template.docx", token)).is_ok());
        assert!(validate_staged_file(Category::Data, &format!("{}_diplomas.xlsx", token)).is_ok());

        let wrong_category = format!("{}_diplomas.xlsx", token);
        assert!(validate_staged_file(Category::Template, &wrong_category).is_err());
        assert!(validate_staged_file(Category::Template, "x_template.docx").is_err());
        assert!(validate_staged_file(Category::Data, "notes.txt").is_err());
    }
}
