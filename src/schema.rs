//! Structural argument schemas for tools.
//!
//! A `ParameterSchema` is the subset of JSON Schema the agency needs: a flat
//! object with typed properties, a required set and optional enum constraints.
//! The same value is rendered to the model backend and used to validate
//! arguments before a tool runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AgencyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Number => value.is_number(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Array => value.is_array(),
            ValueKind::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Integer => "integer",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default = "default_additional_properties")]
    pub additional_properties: bool,
}

fn default_additional_properties() -> bool {
    true
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            properties: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: default_additional_properties(),
        }
    }
}

impl ParameterSchema {
    /// Accepts any object.
    pub fn any() -> Self {
        Self::default()
    }

    /// An object schema that rejects unknown properties.
    pub fn strict() -> Self {
        Self {
            additional_properties: false,
            ..Self::default()
        }
    }

    pub fn required(mut self, name: impl Into<String>, kind: ValueKind, description: &str) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), property(kind, description));
        if !self.required.contains(&name) {
            self.required.push(name);
        }
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: ValueKind, description: &str) -> Self {
        self.properties.insert(name.into(), property(kind, description));
        self
    }

    /// Restrict an already declared property to a fixed set of values.
    pub fn one_of(mut self, name: &str, allowed: Vec<Value>) -> Self {
        if let Some(prop) = self.properties.get_mut(name) {
            prop.allowed = Some(allowed);
        }
        self
    }

    /// Parse a schema document from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AgencyError::config(format!("cannot read schema `{}`: {err}", path.display()))
        })?;
        let schema: Self = serde_json::from_str(&raw).map_err(|err| {
            AgencyError::config(format!("invalid schema `{}`: {err}", path.display()))
        })?;
        schema.check_consistency().map_err(|msg| {
            AgencyError::config(format!("invalid schema `{}`: {msg}", path.display()))
        })?;
        Ok(schema)
    }

    fn check_consistency(&self) -> std::result::Result<(), String> {
        match self
            .required
            .iter()
            .find(|name| !self.properties.contains_key(*name))
        {
            Some(name) => Err(format!("required property `{name}` is not declared")),
            None => Ok(()),
        }
    }

    /// JSON Schema object handed to the model backend.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, prop)| {
                let rendered = serde_json::to_value(prop).unwrap_or_else(|_| json!({}));
                (name.clone(), rendered)
            })
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
            "additionalProperties": self.additional_properties,
        })
    }

    /// Check `arguments` against the schema. `tool` only labels the error.
    pub fn validate(&self, tool: &str, arguments: &Value) -> Result<()> {
        let empty = Map::new();
        let object = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(invalid(
                    tool,
                    format!("expected an object, got {}", kind_of(other)),
                ))
            }
        };

        let mut problems = Vec::new();
        for name in &self.required {
            if !object.contains_key(name) {
                problems.push(format!("missing required field `{name}`"));
            }
        }
        for (name, value) in object {
            match self.properties.get(name) {
                Some(prop) => {
                    if !prop.kind.matches(value) {
                        problems.push(format!(
                            "field `{name}` must be {}, got {}",
                            prop.kind,
                            kind_of(value)
                        ));
                    } else if let Some(allowed) = &prop.allowed {
                        if !allowed.contains(value) {
                            problems.push(format!("field `{name}` must be one of {}", Value::from(allowed.clone())));
                        }
                    }
                }
                None if !self.additional_properties => {
                    problems.push(format!("unexpected field `{name}`"));
                }
                None => {}
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(invalid(tool, problems.join("; ")))
        }
    }
}

fn property(kind: ValueKind, description: &str) -> PropertySchema {
    PropertySchema {
        kind,
        description: (!description.is_empty()).then(|| description.to_string()),
        allowed: None,
    }
}

fn invalid(tool: &str, message: String) -> AgencyError {
    AgencyError::Validation {
        tool: tool.to_string(),
        message,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
