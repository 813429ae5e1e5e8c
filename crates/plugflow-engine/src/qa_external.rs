//! Checks implemented outside the engine.
//!
//! A host publishes its checks through a [`CheckIndex`] as a flat list of
//! `(name, description, can_fix)` triples and runs them through a
//! [`CheckRunner`], which answers with a flat list
//! `(num_fixed, header, fixed items..., failed items...)`.

use crate::{
    Attribute, CheckResult, EvalContext, FlowError, Plug, ProcessSpec, QaChecks, QaMode, Value,
};
use std::sync::Arc;

pub trait CheckIndex {
    fn list_checks(&self) -> Vec<Value>;
}

pub trait CheckRunner: Send + Sync {
    fn run_check(&self, name: &str, should_fix: bool) -> Result<Vec<Value>, FlowError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckEntry {
    pub name: String,
    pub description: String,
    pub can_fix: bool,
}

/// Checks published by a [`CheckIndex`], read once when a process type is
/// built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckCatalogue {
    pub entries: Vec<CheckEntry>,
}

impl CheckCatalogue {
    pub fn from_index(index: &[Value]) -> Self {
        if index.len() % 3 != 0 {
            tracing::warn!(
                items = index.len(),
                "check index is not a list of (name, description, can_fix) triples, ignored"
            );
            return Self::default();
        }

        let mut entries = Vec::with_capacity(index.len() / 3);
        for triple in index.chunks_exact(3) {
            let Some(name) = triple[0].as_str() else {
                tracing::warn!(name = %triple[0], "check name is not a string, skipped");
                continue;
            };
            if name.contains(' ') {
                tracing::warn!(
                    name,
                    "invalid check name, it may not contain spaces; use CamelCase or underscores"
                );
                continue;
            }
            let Some(can_fix) = flag(&triple[2]) else {
                tracing::warn!(name, can_fix = %triple[2], "check fix flag is not a boolean, skipped");
                continue;
            };
            entries.push(CheckEntry {
                name: name.to_string(),
                description: triple[1].to_string_value(),
                can_fix,
            });
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Boolean(flag) => Some(*flag),
        Value::Integer(number) => Some(*number != 0),
        Value::String(raw) => match raw.as_str() {
            "1" | "true" => Some(true),
            "0" | "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl CheckResult {
    /// Parses the flat runner encoding. An empty list is a null result.
    pub fn from_runner_output(output: &[Value]) -> Result<Self, FlowError> {
        if output.is_empty() {
            return Ok(Self::default());
        }
        if output.len() < 2 {
            return Err(FlowError::compute_failed(
                "check runner output needs at least a fix count and a header",
            ));
        }
        let num_fixed = match &output[0] {
            Value::Integer(count) => usize::try_from(*count).ok(),
            Value::String(raw) => raw.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            FlowError::compute_failed(format!("invalid fixed item count {}", output[0]))
        })?;
        let items = &output[2..];
        if num_fixed > items.len() {
            return Err(FlowError::compute_failed(format!(
                "check runner reported {num_fixed} fixed items but returned {}",
                items.len()
            )));
        }
        let (fixed, failed) = items.split_at(num_fixed);
        Ok(Self {
            header: output[1].to_string_value(),
            fixed_items: fixed.iter().map(Value::to_string_value).collect(),
            failed_items: failed.iter().map(Value::to_string_value).collect(),
        })
    }
}

/// QA checks whose plugs come from a [`CheckIndex`] and whose evaluation is
/// delegated to a [`CheckRunner`].
pub struct ExternalChecks {
    spec: ProcessSpec,
    runner: Arc<dyn CheckRunner>,
}

impl ExternalChecks {
    pub fn new(
        type_name: impl Into<String>,
        index: &dyn CheckIndex,
        runner: Arc<dyn CheckRunner>,
    ) -> Self {
        let type_name = type_name.into();
        let catalogue = CheckCatalogue::from_index(&index.list_checks());
        if catalogue.is_empty() {
            tracing::warn!(type_name = %type_name, "external check index yielded no checks");
        }
        let mut spec = ProcessSpec::new(type_name, "checks", "verifies");
        for entry in catalogue.entries {
            spec = spec.output(entry.name, Attribute::check(entry.description, entry.can_fix));
        }
        Self { spec, runner }
    }
}

impl QaChecks for ExternalChecks {
    fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn assure_quality(
        &self,
        check: &Plug,
        mode: QaMode,
        _ctx: &mut EvalContext<'_>,
    ) -> Result<CheckResult, FlowError> {
        let output = self.runner.run_check(&check.name, mode == QaMode::Fix)?;
        CheckResult::from_runner_output(&output)
    }
}
