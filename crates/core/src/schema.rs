use serde_json::Value;
use thiserror::Error;

use crate::state::StateMap;

/// Types a structured-output field may take. Deliberately small: every
/// handler schema in this engine fits these four.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Number,
    Bool,
    StringArray,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::StringArray => value
                .as_array()
                .map(|items| items.iter().all(Value::is_string))
                .unwrap_or(false),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Bool => "bool",
            FieldKind::StringArray => "array of strings",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Enumerates what a model response must contain to be accepted.
///
/// Validation rejects rather than coerces: a missing required field or a
/// type mismatch fails the whole response, a "null" counts as absent, and
/// extra fields the schema does not mention are ignored.
#[derive(Debug, Clone, Copy)]
pub struct SchemaDescriptor {
    pub name: &'static str,
    pub fields: &'static [FieldSpec],
}

impl SchemaDescriptor {
    /// Checks `value` against this schema and returns the accepted fields.
    pub fn validate(&self, value: &Value) -> Result<StructuredOutput, SchemaError> {
        let object = value.as_object().ok_or(SchemaError::NotAnObject {
            schema: self.name,
        })?;

        let mut accepted = StateMap::new();
        for field in self.fields {
            match object.get(field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        return Err(SchemaError::MissingField {
                            schema: self.name,
                            field: field.name,
                        });
                    }
                }
                Some(found) => {
                    if !field.kind.matches(found) {
                        return Err(SchemaError::WrongType {
                            schema: self.name,
                            field: field.name,
                            expected: field.kind.name(),
                        });
                    }
                    accepted.insert(field.name.to_string(), found.clone());
                }
            }
        }
        Ok(StructuredOutput { fields: accepted })
    }

    /// One-line sketch of the expected object, embedded into prompts so
    /// the model knows the exact shape to emit.
    pub fn render(&self) -> String {
        let fields: Vec<String> = self
            .fields
            .iter()
            .map(|f| {
                let suffix = if f.required { "" } else { "?" };
                format!("\"{}\"{}: <{}>", f.name, suffix, f.kind.name())
            })
            .collect();
        format!("{{{}}}", fields.join(", "))
    }
}

/// A model response that passed schema validation. Accessors return
/// `SchemaError` for absent optionals so handlers can `?` their way
/// through required reads.
#[derive(Debug, Clone)]
pub struct StructuredOutput {
    fields: StateMap,
}

impl StructuredOutput {
    pub fn str(&self, name: &'static str) -> Result<&str, SchemaError> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .ok_or(SchemaError::MissingField {
                schema: "output",
                field: name,
            })
    }

    pub fn number(&self, name: &'static str) -> Result<f64, SchemaError> {
        self.fields
            .get(name)
            .and_then(Value::as_f64)
            .ok_or(SchemaError::MissingField {
                schema: "output",
                field: name,
            })
    }

    pub fn bool_or(&self, name: &'static str, default: bool) -> bool {
        self.fields
            .get(name)
            .and_then(Value::as_bool)
            .unwrap_or(default)
    }

    pub fn opt_str(&self, name: &'static str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn str_array(&self, name: &'static str) -> Result<Vec<String>, SchemaError> {
        let items = self
            .fields
            .get(name)
            .and_then(Value::as_array)
            .ok_or(SchemaError::MissingField {
                schema: "output",
                field: name,
            })?;
        Ok(items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("{schema}: response is not a JSON object")]
    NotAnObject { schema: &'static str },
    #[error("{schema}: missing required field `{field}`")]
    MissingField {
        schema: &'static str,
        field: &'static str,
    },
    #[error("{schema}: field `{field}` is not a {expected}")]
    WrongType {
        schema: &'static str,
        field: &'static str,
        expected: &'static str,
    },
    #[error("no JSON object found in model output")]
    NoJsonObject,
}

impl From<SchemaError> for crate::error::EngineError {
    fn from(e: SchemaError) -> Self {
        crate::error::EngineError::GenerationFailed(e.to_string())
    }
}

/// Pulls the JSON object out of raw model text.
///
/// Models wrap structured output in markdown fences or surround it with
/// prose often enough that this is the normal path, not the exception:
/// try the text as-is, then the contents of a code fence, then the
/// outermost brace-delimited slice.
pub fn extract_json(raw: &str) -> Result<Value, SchemaError> {
    let trimmed = raw.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() {
            return Ok(value);
        }
    }

    if let Some(inner) = fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            if value.is_object() {
                return Ok(value);
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                if value.is_object() {
                    return Ok(value);
                }
            }
        }
    }

    Err(SchemaError::NoJsonObject)
}

fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_ticks = &text[open + 3..];
    // Skip a language tag like `json` on the opening fence line.
    let body_start = after_ticks.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_ticks[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}
