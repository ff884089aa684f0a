//! Schema validation errors.

use thiserror::Error;

/// Why a message failed validation.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A required field is absent or `null`.
    #[error("field `{0}` is required")]
    MissingField(String),

    /// The message carries a field the schema does not declare.
    #[error("`{field}` is not a valid field for {schema}")]
    UnknownField {
        /// The undeclared field.
        field: String,
        /// The schema's name.
        schema: String,
    },

    /// A value cannot be cleaned into the field's type.
    #[error("field `{field}`: expected {expected}, found {found}")]
    InvalidType {
        /// Field name, or the schema name for the top-level value.
        field: String,
        /// The type the field wants.
        expected: &'static str,
        /// What was supplied.
        found: String,
    },

    /// A cleaned value was rejected by a validator.
    #[error("field `{field}`: {reason}")]
    Validation {
        /// Field name.
        field: String,
        /// What the validator objected to.
        reason: String,
    },

    /// The input was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A type alias for `Result<T, SchemaError>`.
pub type Result<T> = std::result::Result<T, SchemaError>;

impl SchemaError {
    pub(crate) fn invalid_type(field: &str, expected: &'static str, found: &serde_json::Value) -> Self {
        SchemaError::InvalidType {
            field: field.to_string(),
            expected,
            found: found.to_string(),
        }
    }

    /// The field the error is about, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            SchemaError::MissingField(field)
            | SchemaError::UnknownField { field, .. }
            | SchemaError::InvalidType { field, .. }
            | SchemaError::Validation { field, .. } => Some(field),
            SchemaError::Json(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_field_message() {
        let err = SchemaError::UnknownField {
            field: "pony".into(),
            schema: "Chat".into(),
        };
        assert_eq!(err.to_string(), "`pony` is not a valid field for Chat");
        assert_eq!(err.field(), Some("pony"));
    }

    #[test]
    fn test_invalid_type_message() {
        let err = SchemaError::invalid_type("id", "int", &json!("fourty"));
        assert_eq!(err.to_string(), r#"field `id`: expected int, found "fourty""#);
    }
}
