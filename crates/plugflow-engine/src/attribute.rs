use crate::{FlowError, RATE_GOOD, RATE_NO, RATE_PERFECT, Value, ValueType};
use enumset::{EnumSet, EnumSetType};
use regex::Regex;
use std::fmt;
use std::sync::Arc;

#[derive(EnumSetType, Debug)]
pub enum AttributeFlag {
    /// Only values of exactly the declared type are accepted.
    ExactType,
    /// Values cannot be set explicitly and the plug is never a wiring target.
    ReadOnly,
    /// Values are produced by the owning process.
    Computable,
    /// Values are never stored in the shell cache.
    Uncached,
    /// The plug cannot be the destination of a connection.
    Unconnectable,
    /// Values flowing through connections and dynamic defaults are re-rated.
    CheckPassingValues,
}

pub type AttributeFlags = EnumSet<AttributeFlag>;

pub type DynamicDefault = Arc<dyn Fn() -> Value + Send + Sync>;

#[derive(Clone)]
pub enum DefaultValue {
    Static(Value),
    Dynamic(DynamicDefault),
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Metadata carried by attributes of QA check plugs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckMeta {
    pub annotation: String,
    pub implements_fix: bool,
}

/// Describes which values a plug accepts and rates candidates for it.
#[derive(Clone, Debug)]
pub struct Attribute {
    pub value_type: ValueType,
    pub flags: AttributeFlags,
    default: Option<DefaultValue>,
    pattern: Option<Regex>,
    check: Option<CheckMeta>,
}

impl Attribute {
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            flags: AttributeFlags::empty(),
            default: None,
            pattern: None,
            check: None,
        }
    }

    pub fn with_flags(mut self, flags: impl Into<AttributeFlags>) -> Self {
        self.flags |= flags.into();
        self
    }

    pub fn with_default(mut self, value: Value) -> Result<Self, FlowError> {
        if self.compatibility_rate(&value) == RATE_NO {
            return Err(FlowError::InvalidAttribute(format!(
                "default value {value} is incompatible with attribute type {}",
                self.value_type
            )));
        }
        self.default = Some(DefaultValue::Static(value));
        Ok(self)
    }

    pub fn with_dynamic_default(
        mut self,
        factory: impl Fn() -> Value + Send + Sync + 'static,
    ) -> Self {
        self.default = Some(DefaultValue::Dynamic(Arc::new(factory)));
        self
    }

    /// Restricts accepted values to those whose string form matches `pattern`.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, FlowError> {
        let regex = Regex::new(pattern).map_err(|error| {
            FlowError::InvalidAttribute(format!("invalid pattern '{pattern}': {error}"))
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    /// Attribute for a QA check plug: always computable and read-only.
    pub fn check(annotation: impl Into<String>, implements_fix: bool) -> Self {
        Self::new(ValueType::CheckResult)
            .with_flags(AttributeFlag::Computable | AttributeFlag::ReadOnly)
            .with_check_meta(CheckMeta {
                annotation: annotation.into(),
                implements_fix,
            })
    }

    pub fn with_check_meta(mut self, meta: CheckMeta) -> Self {
        self.check = Some(meta);
        self
    }

    pub fn check_meta(&self) -> Option<&CheckMeta> {
        self.check.as_ref()
    }

    pub fn has_flag(&self, flag: AttributeFlag) -> bool {
        self.flags.contains(flag)
    }

    pub fn is_readonly(&self) -> bool {
        self.has_flag(AttributeFlag::ReadOnly)
    }

    pub fn is_computable(&self) -> bool {
        self.has_flag(AttributeFlag::Computable)
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Resolves the default, invoking dynamic defaults. Returns `None` when
    /// there is no default or a checked dynamic default produced an
    /// incompatible value.
    pub fn default_value(&self) -> Option<Value> {
        match self.default.as_ref()? {
            DefaultValue::Static(value) => Some(value.clone()),
            DefaultValue::Dynamic(factory) => {
                let value = factory();
                if self.has_flag(AttributeFlag::CheckPassingValues)
                    && self.compatibility_rate(&value) == RATE_NO
                {
                    tracing::warn!(
                        value = %value,
                        value_type = %self.value_type,
                        "dynamic default produced an incompatible value"
                    );
                    return None;
                }
                Some(value)
            }
        }
    }

    /// Rates how well this attribute can hold `value`, 0 to 255.
    pub fn compatibility_rate(&self, value: &Value) -> u8 {
        let base = self.type_rate(value.value_type());
        if base == RATE_NO {
            return RATE_NO;
        }
        match &self.pattern {
            Some(pattern) if !pattern.is_match(&value.to_string_value()) => RATE_NO,
            _ => base,
        }
    }

    /// Rates a candidate type against the declared type. Integers stored in
    /// float attributes are a lossless conversion and rate as good.
    pub fn type_rate(&self, candidate: ValueType) -> u8 {
        let exact = self.has_flag(AttributeFlag::ExactType);
        if !exact && self.value_type == ValueType::Float && candidate == ValueType::Integer {
            return RATE_GOOD;
        }
        self.value_type.rate(candidate, exact)
    }

    /// How well this attribute stores values of `other`. Uses `other`'s
    /// default when available, otherwise compares the declared types.
    pub fn affinity(&self, other: &Attribute) -> u8 {
        match other.default_value() {
            Some(value) => self.compatibility_rate(&value),
            None => self.type_rate(other.value_type),
        }
    }

    /// Rating for a connection from this attribute into `destination`.
    pub fn connection_affinity(&self, destination: &Attribute) -> u8 {
        if destination.has_flag(AttributeFlag::Unconnectable) {
            return RATE_NO;
        }
        destination.affinity(self)
    }

    pub fn is_perfect(rate: u8) -> bool {
        rate == RATE_PERFECT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_rate_integer_into_float_expected_good() {
        let attr = Attribute::new(ValueType::Float);
        assert_eq!(attr.compatibility_rate(&Value::Integer(1)), RATE_GOOD);
        assert_eq!(attr.compatibility_rate(&Value::Float(1.0)), RATE_PERFECT);
        assert_eq!(attr.compatibility_rate(&Value::from("x")), RATE_NO);
    }

    #[test]
    fn compatibility_rate_exact_type_expected_rejects_subtypes() {
        let attr = Attribute::new(ValueType::Number).with_flags(AttributeFlag::ExactType);
        assert_eq!(attr.compatibility_rate(&Value::Integer(1)), RATE_NO);
        let loose = Attribute::new(ValueType::Number);
        assert_eq!(loose.compatibility_rate(&Value::Integer(1)), RATE_PERFECT);
    }

    #[test]
    fn compatibility_rate_pattern_mismatch_expected_zero() {
        let attr = Attribute::new(ValueType::String)
            .with_pattern("^asset_[a-z]+$")
            .expect("pattern should compile");
        assert_eq!(attr.compatibility_rate(&Value::from("asset_tree")), RATE_PERFECT);
        assert_eq!(attr.compatibility_rate(&Value::from("tree")), RATE_NO);
    }

    #[test]
    fn compatibility_rate_any_value_expected_within_bounds() {
        let attrs = [
            Attribute::new(ValueType::Any),
            Attribute::new(ValueType::Integer),
            Attribute::new(ValueType::Float).with_flags(AttributeFlag::ExactType),
            Attribute::new(ValueType::String),
        ];
        let values = [
            Value::Integer(3),
            Value::Float(0.5),
            Value::from("s"),
            Value::Boolean(true),
            Value::List(vec![]),
        ];
        for attr in &attrs {
            for value in &values {
                let rate = attr.compatibility_rate(value);
                assert_eq!(rate == RATE_NO, attr.type_rate(value.value_type()) == RATE_NO);
            }
        }
    }

    #[test]
    fn with_default_incompatible_static_expected_invalid_attribute() {
        let error = Attribute::new(ValueType::Integer)
            .with_default(Value::from("nope"))
            .expect_err("string default should be rejected");
        assert!(matches!(error, FlowError::InvalidAttribute(_)));
    }

    #[test]
    fn connection_affinity_unconnectable_destination_expected_zero() {
        let source = Attribute::new(ValueType::Integer);
        let destination = Attribute::new(ValueType::Number).with_flags(AttributeFlag::Unconnectable);
        assert_eq!(source.connection_affinity(&destination), RATE_NO);
        let open = Attribute::new(ValueType::Number);
        assert_eq!(source.connection_affinity(&open), RATE_PERFECT);
    }

    #[test]
    fn affinity_uses_source_default_when_present() {
        let source = Attribute::new(ValueType::Any)
            .with_default(Value::Integer(4))
            .expect("default should be valid");
        let destination = Attribute::new(ValueType::Integer);
        assert_eq!(source.connection_affinity(&destination), RATE_PERFECT);
        let untyped = Attribute::new(ValueType::Any);
        assert_eq!(untyped.connection_affinity(&destination), RATE_NO);
    }

    #[test]
    fn default_value_checked_dynamic_incompatible_expected_none() {
        let attr = Attribute::new(ValueType::Integer)
            .with_flags(AttributeFlag::CheckPassingValues)
            .with_dynamic_default(|| Value::from("bad"));
        assert_eq!(attr.default_value(), None);
        let unchecked = Attribute::new(ValueType::Integer).with_dynamic_default(|| Value::Integer(9));
        assert_eq!(unchecked.default_value(), Some(Value::Integer(9)));
    }
}
