//! Message schemas.

use crate::error::{Result, SchemaError};
use crate::field::Field;
use serde_json::{Map, Value, json};
use std::fmt;

/// An ordered set of named fields describing one kind of message.
///
/// A schema validates incoming messages into clean JSON objects and can
/// describe itself as a JSON document for clients.
///
/// # Examples
///
/// ```
/// use serde_json::json;
/// use wsroute_schema::{Field, MaxLength, MessageSchema, MinLength};
///
/// let chat = MessageSchema::new("ChatMessage")
///     .field(Field::int("id").help("users unique id"))
///     .field(Field::string("name"))
///     .field(Field::string("message").validator(MinLength(5)).validator(MaxLength(120)));
///
/// let clean = chat.loads(r#"{"id": "7", "name": "ada", "message": "hello there"}"#).unwrap();
/// assert_eq!(clean["id"], json!(7));
///
/// assert!(chat.loads(r#"{"id": 7, "name": "ada"}"#).is_err());
/// ```
#[derive(Clone)]
pub struct MessageSchema {
    name: String,
    fields: Vec<Field>,
}

impl MessageSchema {
    /// Creates an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Adds a field. A field with the same name replaces the earlier one in place.
    pub fn field(mut self, field: Field) -> Self {
        match self.fields.iter_mut().find(|f| f.name() == field.name()) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
        self
    }

    /// The schema's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declared fields, in declaration order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Validates `value` into an object holding every declared field.
    ///
    /// Undeclared keys are rejected. Required fields must be present and
    /// non-null; absent optional fields come back as `null`.
    pub fn validate(&self, value: &Value) -> Result<Map<String, Value>> {
        let input = value
            .as_object()
            .ok_or_else(|| SchemaError::invalid_type(&self.name, "object", value))?;

        if let Some(unknown) = input.keys().find(|key| self.get(key).is_none()) {
            return Err(SchemaError::UnknownField {
                field: unknown.clone(),
                schema: self.name.clone(),
            });
        }

        let mut clean = Map::new();
        for field in &self.fields {
            let cleaned = match input.get(field.name()) {
                Some(Value::Null) | None if field.is_required() => {
                    return Err(SchemaError::MissingField(field.name().to_string()));
                }
                Some(Value::Null) | None => Value::Null,
                Some(value) => field.validate(value)?,
            };
            clean.insert(field.name().to_string(), cleaned);
        }
        Ok(clean)
    }

    /// Parses and validates a JSON document.
    pub fn loads(&self, text: &str) -> Result<Map<String, Value>> {
        let value: Value = serde_json::from_str(text)?;
        self.validate(&value)
    }

    /// Validates `message` and serializes the clean form.
    pub fn dumps(&self, message: &Map<String, Value>) -> Result<String> {
        let clean = self.validate(&Value::Object(message.clone()))?;
        Ok(serde_json::to_string(&clean)?)
    }

    /// Describes the schema as `{"type": "object", "properties": {...}}`.
    pub fn dump_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .fields
            .iter()
            .map(|f| (f.name().to_string(), f.dump_schema()))
            .collect();
        json!({
            "type": "object",
            "properties": properties,
        })
    }
}

impl fmt::Debug for MessageSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageSchema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .finish()
    }
}
