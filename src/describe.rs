//! Parameter descriptions for pluggable listener/endpoint kinds.
//!
//! Every registered kind declares the configuration it accepts up front, so that raw
//! string configuration can be validated and coerced before a builder ever runs, and so
//! that external tooling can ask what a kind needs.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::AppError;

/// The type a configuration parameter is coerced to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamType {
    String,
    Bool,
    Int,
    Url,
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Url => write!(f, "url"),
        }
    }
}

/// The declared description of one configuration parameter.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: &'static str,
    pub param_type: ParamType,
    pub required: bool,
    pub description: &'static str,
    pub default: Option<&'static str>,
    pub examples: &'static [&'static str],
}

impl Parameter {
    /// Create a new parameter description.
    pub fn new(name: &'static str, param_type: ParamType, required: bool, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            required,
            description,
            default: None,
            examples: &[],
        }
    }

    /// Set the default value applied when the parameter is absent.
    pub fn with_default(mut self, default: &'static str) -> Self {
        self.default = Some(default);
        self
    }

    /// Set example values for the parameter.
    pub fn with_examples(mut self, examples: &'static [&'static str]) -> Self {
        self.examples = examples;
        self
    }

    /// Render a human-readable description of this parameter.
    pub fn describe(&self) -> String {
        match self.default {
            Some(default) => format!(
                "{} : {} (Required : {}, Default : {}) {}, Examples {:?}",
                self.name, self.param_type, self.required, default, self.description, self.examples
            ),
            None => format!(
                "{} : {} (Required : {}) {}, Examples {:?}",
                self.name, self.param_type, self.required, self.description, self.examples
            ),
        }
    }
}

/// The full parameter spec declared by one kind.
#[derive(Clone, Debug, Default)]
pub struct Parameters(pub Vec<Parameter>);

impl Parameters {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Validate the given raw configuration against this spec, coercing each present
    /// parameter to its declared type and applying declared defaults.
    ///
    /// A missing required parameter or an un-convertible value fails with a configuration
    /// error naming the parameter.
    pub fn values(&self, config: &BTreeMap<String, String>) -> Result<Values, AppError> {
        let mut out = BTreeMap::new();
        for parameter in &self.0 {
            let raw = match config.get(parameter.name).map(String::as_str).or(parameter.default) {
                Some(raw) => raw,
                None if parameter.required => {
                    return Err(AppError::config(format!("required parameter : {} not supplied", parameter.name)))
                }
                None => continue,
            };
            let value = match parameter.param_type {
                ParamType::String => Value::String(raw.to_string()),
                ParamType::Url => {
                    if !is_valid_url(raw) {
                        return Err(AppError::config(format!("parameter : {} is not a valid url : {}", parameter.name, raw)));
                    }
                    Value::String(raw.to_string())
                }
                ParamType::Bool => raw
                    .parse::<bool>()
                    .map(Value::Bool)
                    .map_err(|_| AppError::config(format!("parameter : {} is not a valid bool : {}", parameter.name, raw)))?,
                ParamType::Int => raw
                    .parse::<i64>()
                    .map(Value::Int)
                    .map_err(|_| AppError::config(format!("parameter : {} is not a valid int : {}", parameter.name, raw)))?,
            };
            out.insert(parameter.name.to_string(), value);
        }
        Ok(Values(out))
    }
}

/// A coerced configuration value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    String(String),
    Bool(bool),
    Int(i64),
}

/// Validated, typed configuration values handed to a builder.
#[derive(Clone, Debug, Default)]
pub struct Values(BTreeMap<String, Value>);

impl Values {
    /// Get an optional string value.
    pub fn string(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::String(val)) => Some(val.as_str()),
            _ => None,
        }
    }

    /// Get a required string value.
    pub fn must_string(&self, key: &str) -> Result<&str, AppError> {
        self.string(key)
            .ok_or_else(|| AppError::config(format!("value with key : {} not found", key)))
    }

    /// Get a bool value, falling back to the given default.
    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(val)) => *val,
            _ => default,
        }
    }

    /// Get an int value, falling back to the given default.
    pub fn int_or(&self, key: &str, default: i64) -> i64 {
        match self.0.get(key) {
            Some(Value::Int(val)) => *val,
            _ => default,
        }
    }
}

/// Minimal structural check for url-typed parameters: a non-empty scheme and remainder.
fn is_valid_url(raw: &str) -> bool {
    match raw.split_once("://") {
        Some((scheme, rest)) => !scheme.is_empty() && !rest.is_empty(),
        None => false,
    }
}
