//! The single chokepoint for table and database names that derive from user
//! input. Values always travel as bind parameters; identifiers must pass this
//! allowlist before appearing in SQL text.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{ServiceError, ServiceResult};

// PostgreSQL truncates longer names; reject instead of silently clipping.
const MAX_IDENT_LEN: usize = 63;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern"));

/// Validate `name` and return it double-quoted for use as a SQL identifier.
///
/// Names outside `[A-Za-z_][A-Za-z0-9_]*` are rejected rather than escaped
/// through, so quotes, spaces, and semicolons can never reach statement text.
pub fn quote_identifier(name: &str) -> ServiceResult<String> {
    if name.is_empty() || name.len() > MAX_IDENT_LEN {
        return Err(ServiceError::validation(format!(
            "identifier `{name}` must be 1-{MAX_IDENT_LEN} characters"
        )));
    }
    if !IDENT_RE.is_match(name) {
        return Err(ServiceError::validation(format!(
            "identifier `{name}` may only contain letters, digits, and underscores"
        )));
    }
    Ok(format!("\"{name}\""))
}

/// Derive the raw table name from an uploaded filename: the base name with
/// its extension stripped, validated as an identifier.
pub fn table_name_for(file_name: &str) -> ServiceResult<String> {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    // Validate without keeping the quotes; callers quote at the use site.
    quote_identifier(stem)?;
    Ok(stem.to_string())
}
