//! Structural payload validation.
//!
//! A [`Schema`] declares the expected shape of a decoded JSON payload: value
//! type, required fields, nested object and array shapes. Validation is pure
//! (no I/O) and fails closed: every violation is collected, not just the
//! first.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Error raised when building a [`Schema`] from a schema document.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("unknown schema type '{0}'")]
    UnknownType(String),

    #[error("invalid schema document: {0}")]
    InvalidDocument(String),
}

/// JSON value types a schema can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Integer,
    Number,
    Boolean,
    Null,
}

impl SchemaType {
    fn parse(name: &str) -> Result<Self, SchemaError> {
        match name {
            "object" => Ok(SchemaType::Object),
            "array" => Ok(SchemaType::Array),
            "string" => Ok(SchemaType::String),
            "integer" => Ok(SchemaType::Integer),
            "number" => Ok(SchemaType::Number),
            "boolean" => Ok(SchemaType::Boolean),
            "null" => Ok(SchemaType::Null),
            other => Err(SchemaError::UnknownType(other.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SchemaType::Object => "object",
            SchemaType::Array => "array",
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Null => "null",
        }
    }

    /// The schema-type name of a concrete JSON value.
    fn of(value: &Value) -> &'static str {
        match value {
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::String(_) => "string",
            Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
            Value::Number(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Null => "null",
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::Array => value.is_array(),
            SchemaType::String => value.is_string(),
            // Every integer is a number, not vice versa
            SchemaType::Integer => value.as_i64().is_some() || value.as_u64().is_some(),
            SchemaType::Number => value.is_number(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Null => value.is_null(),
        }
    }
}

/// Declarative structural schema.
///
/// Built in code:
///
/// ```
/// use messaging::Schema;
///
/// let schema = Schema::object()
///     .property("external_id", Schema::string())
///     .property("likecount", Schema::integer())
///     .required(["external_id"]);
/// ```
///
/// or loaded from a JSON-schema-style document with [`Schema::from_value`].
#[derive(Debug, Clone)]
pub struct Schema {
    schema_type: SchemaType,
    properties: BTreeMap<String, Schema>,
    required: Vec<String>,
    items: Option<Box<Schema>>,
}

impl Schema {
    fn new(schema_type: SchemaType) -> Self {
        Self {
            schema_type,
            properties: BTreeMap::new(),
            required: Vec::new(),
            items: None,
        }
    }

    pub fn object() -> Self {
        Self::new(SchemaType::Object)
    }

    pub fn string() -> Self {
        Self::new(SchemaType::String)
    }

    pub fn integer() -> Self {
        Self::new(SchemaType::Integer)
    }

    pub fn number() -> Self {
        Self::new(SchemaType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(SchemaType::Boolean)
    }

    pub fn null() -> Self {
        Self::new(SchemaType::Null)
    }

    pub fn array(items: Schema) -> Self {
        let mut schema = Self::new(SchemaType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    /// Declare a named property (object schemas).
    pub fn property(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Declare required field names (object schemas).
    pub fn required<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn schema_type(&self) -> SchemaType {
        self.schema_type
    }

    /// Build a schema from a JSON-schema-style document:
    ///
    /// ```json
    /// {
    ///   "type": "object",
    ///   "properties": { "external_id": { "type": "string" } },
    ///   "required": ["external_id"]
    /// }
    /// ```
    pub fn from_value(doc: &Value) -> Result<Self, SchemaError> {
        let obj = doc
            .as_object()
            .ok_or_else(|| SchemaError::InvalidDocument("schema must be an object".to_string()))?;

        let type_name = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SchemaError::InvalidDocument("missing \"type\"".to_string()))?;
        let mut schema = Self::new(SchemaType::parse(type_name)?);

        if let Some(properties) = obj.get("properties") {
            let map = properties.as_object().ok_or_else(|| {
                SchemaError::InvalidDocument("\"properties\" must be an object".to_string())
            })?;
            for (name, value) in map {
                schema
                    .properties
                    .insert(name.clone(), Schema::from_value(value)?);
            }
        }

        if let Some(required) = obj.get("required") {
            let list = required.as_array().ok_or_else(|| {
                SchemaError::InvalidDocument("\"required\" must be an array".to_string())
            })?;
            for entry in list {
                let field = entry.as_str().ok_or_else(|| {
                    SchemaError::InvalidDocument("\"required\" entries must be strings".to_string())
                })?;
                schema.required.push(field.to_string());
            }
        }

        if let Some(items) = obj.get("items") {
            schema.items = Some(Box::new(Schema::from_value(items)?));
        }

        Ok(schema)
    }
}

/// What a single violation is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// A required field is absent
    MissingRequired,
    /// The value has the wrong type
    TypeMismatch,
    /// The payload could not be decoded as JSON at all
    UndecodablePayload,
}

/// One field-level violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON-path-like location (`$.external_id`, `$.tags[2]`)
    pub path: String,
    pub kind: ViolationKind,
    pub message: String,
}

/// Outcome of validating one payload against a schema.
///
/// Valid iff no violations were collected. Violations are ordered by
/// document position (required-field checks before nested property checks).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationResult {
    violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    fn push(&mut self, path: String, kind: ViolationKind, message: String) {
        self.violations.push(Violation {
            path,
            kind,
            message,
        });
    }

    fn undecodable(detail: String) -> Self {
        let mut result = Self::default();
        result.push(
            "$".to_string(),
            ViolationKind::UndecodablePayload,
            detail,
        );
        result
    }
}

impl fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            return write!(f, "valid");
        }
        write!(f, "{} violation(s):", self.violations.len())?;
        for violation in &self.violations {
            write!(f, " [{} {}]", violation.path, violation.message)?;
        }
        Ok(())
    }
}

/// Validate a decoded value against a schema. Pure; collects every violation.
pub fn validate(value: &Value, schema: &Schema) -> ValidationResult {
    let mut result = ValidationResult::default();
    check(value, schema, "$", &mut result);
    result
}

fn check(value: &Value, schema: &Schema, path: &str, out: &mut ValidationResult) {
    if !schema.schema_type.accepts(value) {
        out.push(
            path.to_string(),
            ViolationKind::TypeMismatch,
            format!(
                "expected {}, found {}",
                schema.schema_type.name(),
                SchemaType::of(value)
            ),
        );
        // Shape checks below assume the declared type
        return;
    }

    match schema.schema_type {
        SchemaType::Object => {
            let Some(obj) = value.as_object() else {
                return;
            };
            for field in &schema.required {
                if !obj.contains_key(field) {
                    out.push(
                        format!("{}.{}", path, field),
                        ViolationKind::MissingRequired,
                        format!("required field '{}' is missing", field),
                    );
                }
            }
            for (name, property) in &schema.properties {
                if let Some(nested) = obj.get(name) {
                    check(nested, property, &format!("{}.{}", path, name), out);
                }
            }
        }
        SchemaType::Array => {
            if let (Some(items), Some(array)) = (&schema.items, value.as_array()) {
                for (index, element) in array.iter().enumerate() {
                    check(element, items, &format!("{}[{}]", path, index), out);
                }
            }
        }
        _ => {}
    }
}

/// Validator over raw payload bytes, attachable to a subscription.
pub trait PayloadValidator: Send + Sync {
    /// Decode and validate one payload. Undecodable payloads are invalid.
    fn validate(&self, payload: &[u8]) -> ValidationResult;

    /// Name for logging and metrics labels.
    fn name(&self) -> &'static str {
        "validator"
    }
}

/// [`PayloadValidator`] backed by a [`Schema`], decoding payloads as JSON.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: Schema,
}

impl SchemaValidator {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// Convenience constructor from a JSON-schema-style document.
    pub fn from_value(doc: &Value) -> Result<Self, SchemaError> {
        Ok(Self::new(Schema::from_value(doc)?))
    }
}

impl PayloadValidator for SchemaValidator {
    fn validate(&self, payload: &[u8]) -> ValidationResult {
        match serde_json::from_slice::<Value>(payload) {
            Ok(value) => validate(&value, &self.schema),
            Err(e) => ValidationResult::undecodable(e.to_string()),
        }
    }

    fn name(&self) -> &'static str {
        "schema_validator"
    }
}
