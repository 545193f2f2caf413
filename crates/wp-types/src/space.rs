//! Search space definitions and resolution of raw parameter values.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::configuration::Configuration;
use crate::errors::{ResolutionError, WpResult};
use crate::validation_error;

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Human-readable parameter name (e.g. "x1").
    pub name: String,
    /// The kind of search range.
    pub kind: ParameterKind,
}

/// Describes the domain of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterKind {
    /// Continuous uniform range [low, high].
    FloatRange { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    IntRange { low: i64, high: i64 },
    /// Log-uniform range (sampled in log-space then exponentiated).
    LogUniform { low: f64, high: f64 },
    /// Categorical choices.
    Choice { values: Vec<Value> },
}

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Json(Value),
}

impl ParameterValue {
    /// JSON form used in persisted artifacts. Non-finite floats become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Int(v) => Value::from(*v),
            Self::Json(v) => v.clone(),
        }
    }
}

impl std::fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Maps raw persisted parameter values onto a resolved [`Configuration`].
///
/// Anything that can rebuild configurations for the current run implements
/// this; loads of every persisted store go through it.
pub trait ConfigurationResolver {
    fn resolve(&self, values: &Map<String, Value>) -> Result<Configuration, ResolutionError>;
}

/// The full search space: an ordered list of parameter definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: Vec<ParameterDef>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
        }
    }

    pub fn add_float(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::FloatRange { low, high },
        });
        self
    }

    pub fn add_int(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::IntRange { low, high },
        });
        self
    }

    pub fn add_log_uniform(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::LogUniform { low, high },
        });
        self
    }

    pub fn add_choice(mut self, name: impl Into<String>, values: Vec<Value>) -> Self {
        self.parameters.push(ParameterDef {
            name: name.into(),
            kind: ParameterKind::Choice { values },
        });
        self
    }

    /// Load a configuration-space file (JSON form of this struct).
    pub fn from_json_file(path: impl AsRef<Path>) -> WpResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let space: Self = serde_json::from_str(&raw)?;
        space.validate()?;
        Ok(space)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDef> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Reject empty or inverted ranges and duplicate names.
    pub fn validate(&self) -> WpResult<()> {
        let mut seen = std::collections::HashSet::new();
        for param in &self.parameters {
            if !seen.insert(param.name.as_str()) {
                return Err(validation_error!("duplicate parameter '{}'", param.name));
            }
            let ok = match &param.kind {
                ParameterKind::FloatRange { low, high } => low.is_finite() && high.is_finite() && low <= high,
                ParameterKind::IntRange { low, high } => low <= high,
                ParameterKind::LogUniform { low, high } => *low > 0.0 && low <= high && high.is_finite(),
                ParameterKind::Choice { values } => !values.is_empty(),
            };
            if !ok {
                return Err(validation_error!("parameter '{}' has an empty domain", param.name));
            }
        }
        Ok(())
    }

    /// Total number of grid points (returns `None` if any parameter is
    /// continuous without a natural grid, or the count does not fit a `usize`).
    pub fn grid_size(&self) -> Option<usize> {
        let mut total: usize = 1;
        for param in &self.parameters {
            let dim_size = match &param.kind {
                ParameterKind::IntRange { low, high } => {
                    let span = high.checked_sub(*low)?.checked_add(1)?;
                    usize::try_from(span).ok()?
                }
                ParameterKind::Choice { values } => values.len(),
                _ => return None,
            };
            total = total.checked_mul(dim_size)?;
        }
        Some(total)
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationResolver for SearchSpace {
    fn resolve(&self, values: &Map<String, Value>) -> Result<Configuration, ResolutionError> {
        if let Some(unknown) = values.keys().find(|k| self.parameter(k).is_none()) {
            return Err(ResolutionError::UnknownParameter {
                parameter: unknown.clone(),
            });
        }

        let mut resolved = BTreeMap::new();
        for param in &self.parameters {
            let raw = values
                .get(&param.name)
                .ok_or_else(|| ResolutionError::MissingParameter {
                    parameter: param.name.clone(),
                })?;
            resolved.insert(param.name.clone(), resolve_value(param, raw)?);
        }
        Ok(Configuration::new(resolved))
    }
}

fn type_name(value: &Value) -> String {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
    .to_string()
}

fn resolve_value(param: &ParameterDef, raw: &Value) -> Result<ParameterValue, ResolutionError> {
    let mismatch = |expected: &str| ResolutionError::TypeMismatch {
        parameter: param.name.clone(),
        expected: expected.to_string(),
        found: type_name(raw),
    };

    match &param.kind {
        ParameterKind::FloatRange { low, high } | ParameterKind::LogUniform { low, high } => {
            let v = raw.as_f64().ok_or_else(|| mismatch("float"))?;
            if !(v >= *low && v <= *high) {
                return Err(ResolutionError::OutOfRange {
                    parameter: param.name.clone(),
                    value: v.to_string(),
                    low: low.to_string(),
                    high: high.to_string(),
                });
            }
            Ok(ParameterValue::Float(v))
        }
        ParameterKind::IntRange { low, high } => {
            // Integral floats (e.g. `5.0`) are accepted; anything fractional is a mismatch.
            let v = match raw.as_i64() {
                Some(v) => v,
                None => match raw.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => f as i64,
                    _ => return Err(mismatch("integer")),
                },
            };
            if v < *low || v > *high {
                return Err(ResolutionError::OutOfRange {
                    parameter: param.name.clone(),
                    value: v.to_string(),
                    low: low.to_string(),
                    high: high.to_string(),
                });
            }
            Ok(ParameterValue::Int(v))
        }
        ParameterKind::Choice { values } => {
            if values.contains(raw) {
                Ok(ParameterValue::Json(raw.clone()))
            } else {
                Err(ResolutionError::InvalidChoice {
                    parameter: param.name.clone(),
                    value: raw.to_string(),
                })
            }
        }
    }
}
