//! Declarative configuration schemas
//!
//! Every filter and action variant declares a schema: its `type` key plus a
//! map of allowed fields. Policy blocks are validated against these schemas
//! once, at load time; constructors assume the configuration handed to them
//! is well-formed and do not re-validate.
//!
//! Validation reports every violation found in a block, not just the first,
//! so a policy author fixes a bad block in one pass.

use crate::error::EngineError;
use serde_json::Value;
use std::collections::BTreeMap;

/// Allowed shape of a single configuration field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Boolean,
    Number,
    String,
    /// A string restricted to one of the listed values.
    Enum(Vec<String>),
    /// Any JSON value; used for nested blocks validated elsewhere.
    Any,
}

impl FieldSpec {
    /// Enum spec from a slice of allowed values.
    pub fn one_of(values: &[&str]) -> Self {
        FieldSpec::Enum(values.iter().map(|v| v.to_string()).collect())
    }

    fn check(&self, value: &Value) -> Option<String> {
        match self {
            FieldSpec::Boolean if !value.is_boolean() => Some("must be a boolean".to_string()),
            FieldSpec::Number if !value.is_number() => Some("must be a number".to_string()),
            FieldSpec::String if !value.is_string() => Some("must be a string".to_string()),
            FieldSpec::Enum(allowed) => match value.as_str() {
                Some(s) if allowed.iter().any(|a| a == s) => None,
                _ => Some(format!("must be one of: {}", allowed.join(", "))),
            },
            _ => None,
        }
    }
}

/// Schema for one filter or action variant.
#[derive(Debug, Clone)]
pub struct Schema {
    type_key: String,
    fields: BTreeMap<String, FieldSpec>,
    required: Vec<String>,
}

impl Schema {
    /// New schema for the given `type` discriminator.
    pub fn new(type_key: impl Into<String>) -> Self {
        Self {
            type_key: type_key.into(),
            fields: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// New schema reusing another schema's fields under a different `type`
    /// key. Further `field` calls override or extend the inherited set.
    pub fn inherit(type_key: impl Into<String>, base: &Schema) -> Self {
        Self {
            type_key: type_key.into(),
            fields: base.fields.clone(),
            required: base.required.clone(),
        }
    }

    /// Declare an allowed field.
    pub fn field(mut self, name: &str, spec: FieldSpec) -> Self {
        self.fields.insert(name.to_string(), spec);
        self
    }

    /// Mark a declared field as required.
    pub fn required(mut self, name: &str) -> Self {
        self.required.push(name.to_string());
        self
    }

    /// The `type` discriminator this schema validates.
    pub fn type_key(&self) -> &str {
        &self.type_key
    }

    /// Validate a configuration block. Collects all violations.
    pub fn validate(&self, config: &Value) -> Result<(), EngineError> {
        let mut violations = Vec::new();

        let Some(map) = config.as_object() else {
            return Err(EngineError::Schema {
                type_key: self.type_key.clone(),
                violations: vec!["configuration must be a mapping".to_string()],
            });
        };

        match map.get("type") {
            Some(Value::String(t)) if *t == self.type_key => {}
            Some(Value::String(t)) => {
                violations.push(format!("'type' is '{}', expected '{}'", t, self.type_key));
            }
            Some(_) => violations.push("'type' must be a string".to_string()),
            None => violations.push("missing required key 'type'".to_string()),
        }

        for req in &self.required {
            if !map.contains_key(req) {
                violations.push(format!("missing required key '{req}'"));
            }
        }

        for (key, value) in map {
            if key == "type" {
                continue;
            }
            match self.fields.get(key) {
                None => violations.push(format!("unknown key '{key}'")),
                Some(spec) => {
                    if let Some(problem) = spec.check(value) {
                        violations.push(format!("'{key}' {problem}"));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(EngineError::Schema {
                type_key: self.type_key.clone(),
                violations,
            })
        }
    }
}
