//! Identifier validation, quoting and literal escaping for PostgreSQL.
//!
//! SQL identifiers (schema, table, server and option names) cannot be passed
//! as parameters in prepared statements, so every user-supplied name goes
//! through [`quote_pg`] before it reaches statement text:
//!
//! 1. Validate the identifier (non-empty, no NUL byte, bounded length)
//! 2. Wrap it in double quotes
//! 3. Double any embedded double quote
//!
//! Values that cannot be bound either (options of utility statements such as
//! `CREATE SERVER`) are escaped with [`quote_literal`], the same escaping
//! PostgreSQL applies in `quote_literal()`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Maximum identifier length: PostgreSQL `NAMEDATALEN - 1`.
///
/// Longer names would be silently truncated by the server, which could make
/// two distinct requests address the same object.
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier for security issues.
///
/// Rejects:
/// - Empty identifiers
/// - Identifiers containing null bytes (injection vector)
/// - Identifiers exceeding [`MAX_IDENTIFIER_LENGTH`] bytes
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(ProvisionError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(ProvisionError::InvalidIdentifier(format!(
            "identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ProvisionError::InvalidIdentifier(format!(
            "identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
///
/// ```
/// use li3ds_provision::core::identifier::quote_pg;
///
/// assert_eq!(quote_pg("users").unwrap(), "\"users\"");
/// assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
/// ```
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Qualify a PostgreSQL relation name with its schema.
pub fn qualify_pg(schema: &str, name: &str) -> Result<String> {
    Ok(format!("{}.{}", quote_pg(schema)?, quote_pg(name)?))
}

/// Escape a value as a PostgreSQL string literal.
///
/// Always emits the `E'...'` form when a backslash is present so the result
/// is independent of `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> Result<String> {
    if value.contains('\0') {
        return Err(ProvisionError::InvalidOption {
            key: String::new(),
            reason: "value contains null byte".to_string(),
        });
    }

    let escaped = value.replace('\'', "''");
    if value.contains('\\') {
        Ok(format!("E'{}'", escaped.replace('\\', "\\\\")))
    } else {
        Ok(format!("'{}'", escaped))
    }
}

/// A `schema.name` pair addressing a relation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    /// Build from already separated parts, validating both.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        let qualified = Self {
            schema: schema.into(),
            name: name.into(),
        };
        validate_identifier(&qualified.schema)?;
        validate_identifier(&qualified.name)?;
        Ok(qualified)
    }

    /// Parse a dotted `schema.name` input.
    ///
    /// `kind` names the input in errors ("table", "view"). Anything other than
    /// exactly two non-empty dot-separated parts is a
    /// [`ProvisionError::MalformedName`].
    pub fn parse(kind: &'static str, input: &str) -> Result<Self> {
        let mut parts = input.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(schema), Some(name), None) if !schema.is_empty() && !name.is_empty() => {
                Self::new(schema, name)
            }
            _ => Err(ProvisionError::malformed(kind, input)),
        }
    }

    /// Derive a sibling relation in the same schema, e.g. `<name>_schema`.
    pub fn with_suffix(&self, suffix: &str) -> Result<Self> {
        Self::new(self.schema.clone(), format!("{}{}", self.name, suffix))
    }

    /// Render as `"schema"."name"`.
    pub fn quoted(&self) -> Result<String> {
        qualify_pg(&self.schema, &self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Validation tests
    // =========================================================================

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("LANDINS_20170516_075157_PP").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_length_boundary() {
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH)).is_ok());
        let result = validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1));
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    // =========================================================================
    // Quoting tests
    // =========================================================================

    #[test]
    fn test_quote_pg_escapes_double_quote() {
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
        assert_eq!(quote_pg("a\"b\"c").unwrap(), "\"a\"\"b\"\"c\"");
    }

    #[test]
    fn test_quote_pg_sql_injection_safely_quoted() {
        let result = quote_pg("\"; DROP TABLE x; --").unwrap();
        assert_eq!(result, "\"\"\"; DROP TABLE x; --\"");
    }

    #[test]
    fn test_qualify_pg() {
        assert_eq!(
            qualify_pg("public", "pointcloud_formats").unwrap(),
            "\"public\".\"pointcloud_formats\""
        );
        assert!(qualify_pg("", "users").is_err());
        assert!(qualify_pg("public", "table\0name").is_err());
    }

    #[test]
    fn test_quote_literal() {
        assert_eq!(quote_literal("/imu/data").unwrap(), "'/imu/data'");
        assert_eq!(quote_literal("it's").unwrap(), "'it''s'");
        assert_eq!(quote_literal("C:\\data\\'x").unwrap(), "E'C:\\\\data\\\\''x'");
        assert!(quote_literal("a\0b").is_err());
    }

    // =========================================================================
    // Qualified name parsing
    // =========================================================================

    #[test]
    fn test_parse_qualified_name() {
        let name = QualifiedName::parse("table", "li3ds.sbet").unwrap();
        assert_eq!(name.schema, "li3ds");
        assert_eq!(name.name, "sbet");
        assert_eq!(name.to_string(), "li3ds.sbet");
        assert_eq!(name.quoted().unwrap(), "\"li3ds\".\"sbet\"");
    }

    #[test]
    fn test_parse_rejects_wrong_shapes() {
        for input in ["onlyname", "a.b.c", ".b", "a.", ".", ""] {
            let err = QualifiedName::parse("table", input).unwrap_err();
            assert!(
                matches!(err, ProvisionError::MalformedName { kind: "table", .. }),
                "{input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_parse_injection_attempt_fails_shape_check() {
        // The dot inside the payload yields three parts.
        let err = QualifiedName::parse("table", "s.t\"; DROP TABLE x; --.y").unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedName { .. }));
    }

    #[test]
    fn test_parse_injection_without_dot_is_quoted() {
        let name = QualifiedName::parse("view", "s.v\"; DROP TABLE x; --").unwrap();
        assert_eq!(name.quoted().unwrap(), "\"s\".\"v\"\"; DROP TABLE x; --\"");
    }

    #[test]
    fn test_with_suffix() {
        let name = QualifiedName::parse("table", "li3ds.bag").unwrap();
        assert_eq!(name.with_suffix("_schema").unwrap().name, "bag_schema");
        let long = QualifiedName::new("s", "a".repeat(60)).unwrap();
        assert!(long.with_suffix("_schema").is_err());
    }
}
