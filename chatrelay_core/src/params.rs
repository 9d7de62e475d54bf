//! Completion parameters sent along with every completion request.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("unknown role: {0}")]
    UnknownRole(String),

    #[error("parameter `{name}` expects {expected}, got {value}")]
    InvalidValue {
        name: String,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub max_tokens: u32,
    /// Parameters without a dedicated field, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 1.2,
            top_p: 1.0,
            frequency_penalty: 0.3,
            presence_penalty: 0.1,
            max_tokens: 1000,
            extra: Map::new(),
        }
    }
}

impl CompletionParams {
    /// Set a parameter by name. `engine` is accepted as an alias of `model`.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), ParamError> {
        match name {
            "model" | "engine" => {
                self.model = match &value {
                    Value::String(s) => s.clone(),
                    _ => return Err(invalid(name, "a model name", &value)),
                };
            }
            "temperature" => self.temperature = as_float(name, &value)?,
            "top_p" => self.top_p = as_float(name, &value)?,
            "frequency_penalty" => self.frequency_penalty = as_float(name, &value)?,
            "presence_penalty" => self.presence_penalty = as_float(name, &value)?,
            "max_tokens" => {
                self.max_tokens = value
                    .as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| invalid(name, "a positive integer", &value))?;
            }
            _ => {
                self.extra.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// Look a parameter up by name, as it would be sent to the provider.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        match name {
            "model" | "engine" => Some(Value::from(self.model.clone())),
            "temperature" => Some(Value::from(self.temperature)),
            "top_p" => Some(Value::from(self.top_p)),
            "frequency_penalty" => Some(Value::from(self.frequency_penalty)),
            "presence_penalty" => Some(Value::from(self.presence_penalty)),
            "max_tokens" => Some(Value::from(self.max_tokens)),
            _ => self.extra.get(name).cloned(),
        }
    }
}

fn as_float(name: &str, value: &Value) -> Result<f64, ParamError> {
    value.as_f64().ok_or_else(|| invalid(name, "a number", value))
}

fn invalid(name: &str, expected: &'static str, value: &Value) -> ParamError {
    ParamError::InvalidValue {
        name: name.to_string(),
        expected,
        value: value.to_string(),
    }
}
