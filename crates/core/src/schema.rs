//! JSON Schema documents and validation.
//!
//! A [`Schema`] is compiled once when it is created and can then validate any
//! number of values. Tool inputs, tool outputs and structured responses all go
//! through it.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::SchemaError;

/// A compiled JSON Schema.
#[derive(Clone)]
pub struct Schema {
    document: Value,
    validator: Arc<jsonschema::Validator>,
}

impl Schema {
    /// Compile a schema document.
    pub fn new(document: Value) -> Result<Self, SchemaError> {
        let validator = jsonschema::validator_for(&document)
            .map_err(|e| SchemaError::InvalidSchema(e.to_string()))?;
        Ok(Self {
            document,
            validator: Arc::new(validator),
        })
    }

    /// Generate and compile the schema for a Rust type.
    pub fn for_type<T: JsonSchema>() -> Result<Self, SchemaError> {
        let generated = schemars::schema_for!(T);
        let mut document =
            serde_json::to_value(&generated).map_err(|e| SchemaError::Generation(e.to_string()))?;
        if let Value::Object(map) = &mut document {
            map.remove("$schema");
        }
        Self::new(document)
    }

    /// The raw schema document.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Validate a value, collecting every violation.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| e.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(SchemaError::Validation { errors })
        }
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Schema").field(&self.document).finish()
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}
