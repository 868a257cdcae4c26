//! Validation helpers for DTOs.

use validator::ValidationError;

/// Validates algebraic square syntax: a file `a..h` followed by a rank `1..8`.
///
/// # Examples
///
/// ```ignore
/// validate_square("e2") // Ok
/// validate_square("e9") // Err - rank out of range
/// validate_square("E2") // Err - uppercase file
/// ```
pub fn validate_square(square: &str) -> Result<(), ValidationError> {
    let mut chars = square.chars();
    let valid = matches!(
        (chars.next(), chars.next(), chars.next()),
        (Some('a'..='h'), Some('1'..='8'), None)
    );

    if !valid {
        let mut err = ValidationError::new("square_syntax");
        err.message = Some(format!("`{square}` is not an algebraic square (a1..h8)").into());
        return Err(err);
    }

    Ok(())
}

/// Validates a venue table code: 2 to 16 characters, alphanumeric or dash.
pub fn validate_table_code(code: &str) -> Result<(), ValidationError> {
    let normalized = code.trim();
    if normalized.len() < 2 || normalized.len() > 16 {
        let mut err = ValidationError::new("table_code_length");
        err.message = Some(
            format!(
                "table code must be 2-16 characters (got {})",
                normalized.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !normalized
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-')
    {
        let mut err = ValidationError::new("table_code_format");
        err.message = Some("table code may contain only letters, digits and dashes".into());
        return Err(err);
    }

    Ok(())
}

/// Canonical form of a table code: trimmed and upper-cased, `None` if empty.
pub fn normalize_table_code(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_uppercase();
    (!normalized.is_empty()).then_some(normalized)
}
