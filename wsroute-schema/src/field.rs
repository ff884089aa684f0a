//! Field descriptors.
//!
//! A [`Field`] does two jobs: it cleans an incoming value into its type, and
//! it runs its validators on the cleaned result. Cleaning is permissive in
//! the way loosely typed clients expect:
//!
//! | Kind | Accepts |
//! |------|---------|
//! | `string` | strings, numbers, booleans |
//! | `int` | integers, floats (truncated), numeric strings, booleans |
//! | `float` | numbers, numeric strings, booleans |
//! | `bool` | anything, by truthiness |
//! | `array` | arrays |
//! | `date-time` | RFC 3339 strings |
//! | `object` | objects matching the nested schema |

use crate::error::{Result, SchemaError};
use crate::schema::MessageSchema;
use crate::validator::Validator;
use serde_json::{Map, Value, json};
use std::fmt;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Scalar kinds usable as typed array items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    /// Strings.
    String,
    /// Integers.
    Int,
    /// Floats.
    Float,
    /// Booleans.
    Bool,
}

impl ItemKind {
    fn type_name(self) -> &'static str {
        match self {
            ItemKind::String => "string",
            ItemKind::Int => "int",
            ItemKind::Float => "float",
            ItemKind::Bool => "bool",
        }
    }

    fn clean(self, field: &str, value: &Value) -> Result<Value> {
        match self {
            ItemKind::String => clean_string(field, value),
            ItemKind::Int => clean_int(field, value),
            ItemKind::Float => clean_float(field, value),
            ItemKind::Bool => Ok(Value::Bool(truthy(value))),
        }
    }
}

/// What a field holds.
#[derive(Clone)]
pub enum FieldKind {
    /// Text.
    String,
    /// Signed integer.
    Int,
    /// Floating point number.
    Float,
    /// Boolean.
    Bool,
    /// Array of anything.
    Array,
    /// Array with duplicates removed, first occurrence kept.
    Set,
    /// RFC 3339 timestamp, normalized on cleaning.
    DateTime,
    /// Object validated by another schema.
    Nested(Arc<MessageSchema>),
    /// Array whose items are cleaned to one scalar kind.
    TypedArray(ItemKind),
    /// Set whose items are cleaned to one scalar kind.
    TypedSet(ItemKind),
}

impl FieldKind {
    /// The type name used in dumped schemas.
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Array | FieldKind::Set | FieldKind::TypedArray(_) | FieldKind::TypedSet(_) => "array",
            FieldKind::DateTime => "date-time",
            FieldKind::Nested(_) => "object",
        }
    }
}

impl fmt::Debug for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldKind::Nested(schema) => write!(f, "Nested({})", schema.name()),
            FieldKind::TypedArray(item) => write!(f, "TypedArray({item:?})"),
            FieldKind::TypedSet(item) => write!(f, "TypedSet({item:?})"),
            other => f.write_str(other.type_name()),
        }
    }
}

/// A named, typed slot in a [`MessageSchema`].
///
/// Fields are required unless marked [`optional`](Self::optional).
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wsroute_schema::{Field, MaxLength, MinLength};
///
/// let message = Field::string("message")
///     .validator(MinLength(5))
///     .validator(MaxLength(120));
///
/// assert_eq!(message.validate(&json!("hello there")).unwrap(), json!("hello there"));
/// assert!(message.validate(&json!("hi")).is_err());
/// ```
#[derive(Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    required: bool,
    help_text: Option<String>,
    validators: Vec<Arc<dyn Validator>>,
}

impl Field {
    /// A field of any kind.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            help_text: None,
            validators: Vec::new(),
        }
    }

    /// A string field.
    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::String)
    }

    /// An integer field.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Int)
    }

    /// A float field.
    pub fn float(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Float)
    }

    /// A boolean field.
    pub fn bool(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Bool)
    }

    /// An array field.
    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Array)
    }

    /// A deduplicated array field.
    pub fn set(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Set)
    }

    /// A timestamp field.
    pub fn date_time(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::DateTime)
    }

    /// An object field validated by `schema`.
    pub fn nested(name: impl Into<String>, schema: MessageSchema) -> Self {
        Self::new(name, FieldKind::Nested(Arc::new(schema)))
    }

    /// An array field whose items are cleaned to `item`.
    pub fn typed_array(name: impl Into<String>, item: ItemKind) -> Self {
        Self::new(name, FieldKind::TypedArray(item))
    }

    /// A deduplicated array field whose items are cleaned to `item`.
    pub fn typed_set(name: impl Into<String>, item: ItemKind) -> Self {
        Self::new(name, FieldKind::TypedSet(item))
    }

    /// Lets the field be absent or `null`.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Sets the description shown in dumped schemas.
    pub fn help(mut self, text: impl Into<String>) -> Self {
        self.help_text = Some(text.into());
        self
    }

    /// Adds a validator, run after cleaning in the order added.
    pub fn validator(mut self, validator: impl Validator) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }

    /// The field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The field kind.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Returns `true` unless the field is optional.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Cleans `value` into the field's type without running validators.
    pub fn clean(&self, value: &Value) -> Result<Value> {
        let field = self.name.as_str();
        match &self.kind {
            FieldKind::String => clean_string(field, value),
            FieldKind::Int => clean_int(field, value),
            FieldKind::Float => clean_float(field, value),
            FieldKind::Bool => Ok(Value::Bool(truthy(value))),
            FieldKind::Array => array_items(field, value).map(|items| Value::Array(items.to_vec())),
            FieldKind::Set => array_items(field, value).map(|items| Value::Array(dedup(items.to_vec()))),
            FieldKind::DateTime => clean_date_time(field, value),
            FieldKind::Nested(schema) => schema.validate(value).map(Value::Object),
            FieldKind::TypedArray(item) => {
                let items = array_items(field, value)?
                    .iter()
                    .map(|v| item.clean(field, v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(items))
            }
            FieldKind::TypedSet(item) => {
                let items = array_items(field, value)?
                    .iter()
                    .map(|v| item.clean(field, v))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Array(dedup(items)))
            }
        }
    }

    /// Cleans `value` and runs every validator on the result.
    pub fn validate(&self, value: &Value) -> Result<Value> {
        let cleaned = self.clean(value)?;
        for validator in &self.validators {
            validator.validate(&self.name, &cleaned)?;
        }
        Ok(cleaned)
    }

    /// Describes the field: `type`, `required`, `description`, then any keys
    /// contributed by the kind and the validators.
    pub fn dump_schema(&self) -> Value {
        let mut schema = match &self.kind {
            FieldKind::Nested(nested) => match nested.dump_schema() {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        };

        schema.insert("type".into(), json!(self.kind.type_name()));
        schema.insert("required".into(), json!(self.required));
        schema.insert("description".into(), json!(self.help_text));

        match &self.kind {
            FieldKind::Set => {
                schema.insert("uniqueItems".into(), json!(true));
            }
            FieldKind::TypedArray(item) => {
                schema.insert("items".into(), json!({"type": item.type_name()}));
            }
            FieldKind::TypedSet(item) => {
                schema.insert("uniqueItems".into(), json!(true));
                schema.insert("items".into(), json!({"type": item.type_name()}));
            }
            _ => {}
        }

        for validator in &self.validators {
            schema.extend(validator.dump_schema());
        }
        Value::Object(schema)
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("validators", &self.validators.len())
            .finish()
    }
}

fn clean_string(field: &str, value: &Value) -> Result<Value> {
    match value {
        Value::String(_) => Ok(value.clone()),
        Value::Number(n) => Ok(Value::String(n.to_string())),
        Value::Bool(b) => Ok(Value::String(b.to_string())),
        other => Err(SchemaError::invalid_type(field, "string", other)),
    }
}

fn clean_int(field: &str, value: &Value) -> Result<Value> {
    let int = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(truncate_to_i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    };
    int.map(Value::from)
        .ok_or_else(|| SchemaError::invalid_type(field, "int", value))
}

// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
fn truncate_to_i64(f: f64) -> Option<i64> {
    let f = f.trunc();
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

fn clean_float(field: &str, value: &Value) -> Result<Value> {
    let float = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    float
        .map(Value::from)
        .ok_or_else(|| SchemaError::invalid_type(field, "float", value))
}

fn clean_date_time(field: &str, value: &Value) -> Result<Value> {
    let parsed = value
        .as_str()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .ok_or_else(|| SchemaError::invalid_type(field, "RFC 3339 date-time", value))?;
    let formatted = parsed
        .format(&Rfc3339)
        .map_err(|e| SchemaError::Validation {
            field: field.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Value::String(formatted))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
    }
}

fn array_items<'a>(field: &str, value: &'a Value) -> Result<&'a [Value]> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| SchemaError::invalid_type(field, "array", value))
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut unique: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !unique.contains(&item) {
            unique.push(item);
        }
    }
    unique
}
