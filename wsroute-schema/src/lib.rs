//! # wsroute-schema
//!
//! Declarative message schemas for wsroute handlers.
//!
//! A [`MessageSchema`] is an ordered list of typed [`Field`]s. It validates
//! a decoded JSON message into a clean object and can dump a JSON
//! description of itself that clients can use to build requests.
//!
//! ```
//! use serde_json::json;
//! use wsroute_schema::{Field, MessageSchema, MinLength};
//!
//! let schema = MessageSchema::new("Join")
//!     .field(Field::string("room").validator(MinLength(1)))
//!     .field(Field::date_time("at").optional());
//!
//! let clean = schema.validate(&json!({"room": "lobby"})).unwrap();
//! assert_eq!(clean["at"], json!(null));
//!
//! assert_eq!(schema.dump_schema()["properties"]["room"]["min-length"], json!(1));
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod field;
pub mod schema;
pub mod validator;

pub use error::{Result, SchemaError};
pub use field::{Field, FieldKind, ItemKind};
pub use schema::MessageSchema;
pub use validator::{Max, MaxLength, Min, MinLength, Validator};
