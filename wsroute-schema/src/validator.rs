//! Validators run against cleaned field values.
//!
//! Each validator contributes its own keys to a field's schema description,
//! so the dumped schema documents the constraints a message must meet.

use crate::error::{Result, SchemaError};
use serde_json::{Map, Value, json};

/// A constraint on a cleaned value.
///
/// # Examples
///
/// ```
/// use serde_json::{Value, json};
/// use wsroute_schema::{Field, SchemaError, Validator};
///
/// struct NoSpaces;
///
/// impl Validator for NoSpaces {
///     fn validate(&self, field: &str, value: &Value) -> Result<(), SchemaError> {
///         match value.as_str() {
///             Some(s) if s.contains(' ') => Err(SchemaError::Validation {
///                 field: field.to_string(),
///                 reason: "must not contain spaces".into(),
///             }),
///             _ => Ok(()),
///         }
///     }
/// }
///
/// let nick = Field::string("nick").validator(NoSpaces);
/// assert!(nick.validate(&json!("fred")).is_ok());
/// assert!(nick.validate(&json!("fred s")).is_err());
/// ```
pub trait Validator: Send + Sync + 'static {
    /// Checks `value`, reporting failures against `field`.
    fn validate(&self, field: &str, value: &Value) -> Result<()>;

    /// Keys merged into the field's schema description.
    fn dump_schema(&self) -> Map<String, Value> {
        Map::new()
    }
}

fn length_of(field: &str, value: &Value) -> Result<usize> {
    match value {
        Value::String(s) => Ok(s.chars().count()),
        Value::Array(items) => Ok(items.len()),
        Value::Object(fields) => Ok(fields.len()),
        other => Err(SchemaError::invalid_type(field, "a value with a length", other)),
    }
}

fn number_of(field: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| SchemaError::invalid_type(field, "a number", value))
}

fn single(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}

/// At least this many characters or items. Dumped as `min-length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinLength(pub usize);

impl Validator for MinLength {
    fn validate(&self, field: &str, value: &Value) -> Result<()> {
        let len = length_of(field, value)?;
        if len < self.0 {
            return Err(SchemaError::Validation {
                field: field.to_string(),
                reason: format!("length {len} is shorter than {}", self.0),
            });
        }
        Ok(())
    }

    fn dump_schema(&self) -> Map<String, Value> {
        single("min-length", json!(self.0))
    }
}

/// At most this many characters or items. Dumped as `max-length`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxLength(pub usize);

impl Validator for MaxLength {
    fn validate(&self, field: &str, value: &Value) -> Result<()> {
        let len = length_of(field, value)?;
        if len > self.0 {
            return Err(SchemaError::Validation {
                field: field.to_string(),
                reason: format!("length {len} is longer than {}", self.0),
            });
        }
        Ok(())
    }

    fn dump_schema(&self) -> Map<String, Value> {
        single("max-length", json!(self.0))
    }
}

/// Numeric lower bound, inclusive. Dumped as `min`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Min(pub f64);

impl Validator for Min {
    fn validate(&self, field: &str, value: &Value) -> Result<()> {
        let n = number_of(field, value)?;
        if n < self.0 {
            return Err(SchemaError::Validation {
                field: field.to_string(),
                reason: format!("{n} is less than {}", self.0),
            });
        }
        Ok(())
    }

    fn dump_schema(&self) -> Map<String, Value> {
        single("min", json!(self.0))
    }
}

/// Numeric upper bound, inclusive. Dumped as `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Max(pub f64);

impl Validator for Max {
    fn validate(&self, field: &str, value: &Value) -> Result<()> {
        let n = number_of(field, value)?;
        if n > self.0 {
            return Err(SchemaError::Validation {
                field: field.to_string(),
                reason: format!("{n} is greater than {}", self.0),
            });
        }
        Ok(())
    }

    fn dump_schema(&self) -> Map<String, Value> {
        single("max", json!(self.0))
    }
}
