//! Built-in process types available through `core_registry`.

use crate::{
    Attribute, AttributeFlag, CheckResult, DirtyReport, EvalContext, EvalMode, EvalModeExt,
    FlowError, Plug, Process, ProcessSpec, QaChecks, QaMode, Value, ValueType,
};
use once_cell::sync::Lazy;
use std::sync::Mutex;

static SUM_SPEC: Lazy<ProcessSpec> = Lazy::new(|| {
    ProcessSpec::new("Sum", "sum", "adds up")
        .input(
            "lhs",
            Attribute::new(ValueType::Number).with_dynamic_default(|| Value::Integer(0)),
        )
        .input(
            "rhs",
            Attribute::new(ValueType::Number).with_dynamic_default(|| Value::Integer(0)),
        )
        .output(
            "total",
            Attribute::new(ValueType::Number).with_flags(AttributeFlag::Computable),
        )
        .affects("lhs", "total")
        .affects("rhs", "total")
});

static CONCAT_SPEC: Lazy<ProcessSpec> = Lazy::new(|| {
    ProcessSpec::new("Concat", "text", "joins")
        .input(
            "head",
            Attribute::new(ValueType::String).with_dynamic_default(|| Value::from("")),
        )
        .input(
            "tail",
            Attribute::new(ValueType::String).with_dynamic_default(|| Value::from("")),
        )
        .output(
            "text",
            Attribute::new(ValueType::String).with_flags(AttributeFlag::Computable),
        )
        .affects("head", "text")
        .affects("tail", "text")
});

fn unhandled(ctx: &EvalContext<'_>, plug: &Plug) -> FlowError {
    FlowError::PlugUnhandled(ctx.shell(&plug.name))
}

/// Source node producing a fixed value on its `value` plug.
pub struct Constant {
    spec: ProcessSpec,
    value: Value,
}

impl Constant {
    pub fn new(value: Value) -> Self {
        let spec = ProcessSpec::new("Constant", "constant", "yields").output(
            "value",
            Attribute::new(value.value_type()).with_flags(AttributeFlag::Computable),
        );
        Self { spec, value }
    }
}

impl Process for Constant {
    fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn evaluate(
        &self,
        plug: &Plug,
        _mode: EvalMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, FlowError> {
        if plug.name != "value" {
            return Err(unhandled(ctx, plug));
        }
        Ok(self.value.clone())
    }
}

/// Adds `lhs` and `rhs`. Integers stay integers, anything else is summed as
/// floats.
#[derive(Default)]
pub struct Sum;

impl Sum {
    pub fn new() -> Self {
        Self
    }
}

impl Process for Sum {
    fn spec(&self) -> &ProcessSpec {
        &SUM_SPEC
    }

    fn evaluate(
        &self,
        plug: &Plug,
        _mode: EvalMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, FlowError> {
        if plug.name != "total" {
            return Err(unhandled(ctx, plug));
        }
        let lhs = ctx.input("lhs")?;
        let rhs = ctx.input("rhs")?;
        match (&lhs, &rhs) {
            (Value::Integer(left), Value::Integer(right)) => left
                .checked_add(*right)
                .map(Value::Integer)
                .ok_or_else(|| FlowError::compute_failed(format!("{left} + {right} overflows"))),
            _ => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(left), Some(right)) => Ok(Value::Float(left + right)),
                _ => Err(FlowError::compute_failed(format!(
                    "cannot add {lhs} and {rhs}"
                ))),
            },
        }
    }
}

/// Joins `head` and `tail` with a separator.
pub struct Concat {
    separator: String,
}

impl Concat {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

impl Process for Concat {
    fn spec(&self) -> &ProcessSpec {
        &CONCAT_SPEC
    }

    fn evaluate(
        &self,
        plug: &Plug,
        _mode: EvalMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, FlowError> {
        if plug.name != "text" {
            return Err(unhandled(ctx, plug));
        }
        let head = ctx.input("head")?.to_string_value();
        let tail = ctx.input("tail")?.to_string_value();
        let joined = match (head.is_empty(), tail.is_empty()) {
            (true, _) => tail,
            (_, true) => head,
            _ => format!("{head}{}{tail}", self.separator),
        };
        Ok(Value::String(joined))
    }
}

/// Holds a value in its own environment. `current` reports it; with
/// `target_state` the value given on `state` is written, with `dirty_check` a
/// pending write is reported instead.
pub struct Register {
    spec: ProcessSpec,
    environment: Mutex<Value>,
}

impl Register {
    pub fn new(initial: Value) -> Self {
        let value_type = initial.value_type();
        let spec = ProcessSpec::new("Register", "register", "holds")
            .input("state", Attribute::new(value_type))
            .output(
                "current",
                Attribute::new(value_type).with_flags(AttributeFlag::Computable),
            )
            .affects("state", "current");
        Self {
            spec,
            environment: Mutex::new(initial),
        }
    }

    pub fn current(&self) -> Value {
        self.environment
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Process for Register {
    fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn evaluate(
        &self,
        plug: &Plug,
        mode: EvalMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, FlowError> {
        if plug.name != "current" {
            return Err(unhandled(ctx, plug));
        }
        if !mode.target_state() && !mode.dirty_check() {
            if mode.is_state() {
                return Ok(self.current());
            }
            return Err(unhandled(ctx, plug));
        }

        let current = self.current();
        let Some(target) = ctx.input_opt("state")? else {
            return Ok(current);
        };
        if current == target {
            return Ok(current);
        }
        if mode.dirty_check() {
            return Err(DirtyReport::new(format!(
                "{} holds {current} but should hold {target}",
                ctx.node_id()
            ))
            .into());
        }

        let mut environment = self
            .environment
            .lock()
            .map_err(|error| FlowError::Lock(error.to_string()))?;
        tracing::debug!(node = ctx.node_id(), from = %current, to = %target, "register updated");
        *environment = target.clone();
        Ok(target)
    }
}

/// Report-only QA checks on a numeric `value` input.
pub struct BoundsCheck {
    spec: ProcessSpec,
    min: f64,
    max: f64,
}

impl BoundsCheck {
    pub fn new(min: f64, max: f64) -> Self {
        let spec = ProcessSpec::new("BoundsCheck", "bounds", "checks")
            .input("value", Attribute::new(ValueType::Number))
            .output(
                "in_range",
                Attribute::check(format!("value lies within [{min}, {max}]"), false),
            )
            .output(
                "is_integral",
                Attribute::check("value has no fractional part", false),
            )
            .affects("value", "in_range")
            .affects("value", "is_integral");
        Self { spec, min, max }
    }

}

impl QaChecks for BoundsCheck {
    fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn assure_quality(
        &self,
        check: &Plug,
        _mode: QaMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<CheckResult, FlowError> {
        let value = ctx.input("value")?;
        let number = value
            .as_f64()
            .ok_or_else(|| FlowError::compute_failed(format!("{value} is not a number")))?;
        match check.name.as_str() {
            "in_range" => {
                let result = CheckResult::new(format!(
                    "{} within [{}, {}]",
                    ctx.node_id(),
                    self.min,
                    self.max
                ));
                if (self.min..=self.max).contains(&number) {
                    Ok(result)
                } else {
                    Ok(result.with_failed([value.to_string()]))
                }
            }
            "is_integral" => {
                let result = CheckResult::new(format!("{} is integral", ctx.node_id()));
                if number.fract() == 0.0 {
                    Ok(result)
                } else {
                    Ok(result.with_failed([value.to_string()]))
                }
            }
            _ => Err(unhandled(ctx, check)),
        }
    }
}
