use crate::CheckResult;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const RATE_NO: u8 = 0;
pub const RATE_GOOD: u8 = 127;
pub const RATE_PERFECT: u8 = 255;

/// A value flowing through plugs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    List(Vec<Value>),
    CheckResult(CheckResult),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Integer(_) => ValueType::Integer,
            Self::Float(_) => ValueType::Float,
            Self::String(_) => ValueType::String,
            Self::Boolean(_) => ValueType::Boolean,
            Self::List(_) => ValueType::List,
            Self::CheckResult(_) => ValueType::CheckResult,
        }
    }

    /// Parses a description argument: integer first, then float, then a
    /// plain string.
    pub fn parse_simple(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Ok(value) = trimmed.parse::<i64>() {
            return Self::Integer(value);
        }
        if let Ok(value) = trimmed.parse::<f64>() {
            return Self::Float(value);
        }
        Self::String(trimmed.to_string())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(value) => Some(*value as f64),
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_check_result(&self) -> Option<&CheckResult> {
        match self {
            Self::CheckResult(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_string_value(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
            Self::String(value) => write!(f, "{value:?}"),
            Self::Boolean(value) => write!(f, "{value}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::CheckResult(result) => write!(f, "{result}"),
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<CheckResult> for Value {
    fn from(value: CheckResult) -> Self {
        Self::CheckResult(value)
    }
}

/// Type lattice used for rating. `Any` is the root; `Number` groups the
/// numeric leaves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Any,
    Number,
    Integer,
    Float,
    String,
    Boolean,
    List,
    CheckResult,
}

impl ValueType {
    pub fn parent(self) -> Option<Self> {
        match self {
            Self::Any => None,
            Self::Integer | Self::Float => Some(Self::Number),
            Self::Number
            | Self::String
            | Self::Boolean
            | Self::List
            | Self::CheckResult => Some(Self::Any),
        }
    }

    /// Ancestry of this type, root first, ending with the type itself.
    pub fn lineage(self) -> Vec<Self> {
        let mut out = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent() {
            out.push(parent);
            current = parent;
        }
        out.reverse();
        out
    }

    pub fn is_subtype_of(self, other: Self) -> bool {
        self.lineage().contains(&other)
    }

    /// Rates how well a candidate type fits into a slot of this type.
    ///
    /// A candidate that is more general than `self` rates by how far down the
    /// ancestry of `self` it sits. A more specific candidate is a perfect fit
    /// unless `exact` is requested.
    pub fn rate(self, candidate: Self, exact: bool) -> u8 {
        let lineage = self.lineage();
        let rate = match lineage.iter().position(|ty| *ty == candidate) {
            Some(_) if lineage.len() == 1 => RATE_PERFECT,
            Some(index) => {
                ((index as u32 * RATE_PERFECT as u32) / (lineage.len() as u32 - 1)) as u8
            }
            None if !exact && candidate.is_subtype_of(self) => RATE_PERFECT,
            None => RATE_NO,
        };
        if exact && rate < RATE_PERFECT {
            RATE_NO
        } else {
            rate
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::CheckResult => "check_result",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
