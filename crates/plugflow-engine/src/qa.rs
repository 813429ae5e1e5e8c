//! Quality assurance on top of the workflow engine.
//!
//! A QA process exposes each check as a computable, read-only plug whose
//! attribute carries [`CheckMeta`](crate::CheckMeta). Reading such a plug in
//! query mode reports problems, reading it with `target_state` also fixes
//! them where the check supports it. [`QaWorkflow`] runs batches of checks
//! and reports their progress through [`QaEventSink`].

use crate::{
    EngineConfig, EvalContext, EvalMode, EvalModeExt, FlowError, MAKE, Plug, Process, ProcessSpec,
    QUERY, QaEvent, QaEventSink, RunControl, Shell, Value, Workflow,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of a single check. An empty header marks a check that did not
/// run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub header: String,
    #[serde(default)]
    pub fixed_items: Vec<String>,
    #[serde(default)]
    pub failed_items: Vec<String>,
}

impl CheckResult {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            ..Self::default()
        }
    }

    pub fn with_fixed(mut self, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.fixed_items.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn with_failed(mut self, items: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.failed_items.extend(items.into_iter().map(Into::into));
        self
    }

    pub fn is_null(&self) -> bool {
        self.header.is_empty() || (self.fixed_items.is_empty() && self.failed_items.is_empty())
    }

    pub fn is_successful(&self) -> bool {
        !self.header.is_empty() && self.failed_items.is_empty()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.header.is_empty() {
            return write!(f, "No check-result available");
        }
        write!(f, "{}", self.header)?;
        if !self.fixed_items.is_empty() {
            write!(f, "\nfixed: {}", self.fixed_items.join(", "))?;
        }
        if !self.failed_items.is_empty() {
            write!(f, "\nfailed: {}", self.failed_items.join(", "))?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaMode {
    #[default]
    Query,
    Fix,
}

impl QaMode {
    pub fn eval_mode(self) -> EvalMode {
        match self {
            Self::Query => QUERY,
            Self::Fix => MAKE,
        }
    }

    pub fn from_eval_mode(mode: EvalMode) -> Self {
        if mode.target_state() {
            Self::Fix
        } else {
            Self::Query
        }
    }
}

/// Check implementations behind a [`QaProcess`].
pub trait QaChecks: Send + Sync {
    fn spec(&self) -> &ProcessSpec;

    /// Runs `check`. With [`QaMode::Fix`] found issues should be fixed and
    /// reported as fixed items.
    fn assure_quality(
        &self,
        check: &Plug,
        mode: QaMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<CheckResult, FlowError>;
}

pub struct QaProcess<T> {
    checks: T,
}

impl<T: QaChecks> QaProcess<T> {
    pub fn new(checks: T) -> Self {
        Self { checks }
    }

    pub fn checks(&self) -> &T {
        &self.checks
    }
}

impl<T: QaChecks> Process for QaProcess<T> {
    fn spec(&self) -> &ProcessSpec {
        self.checks.spec()
    }

    fn evaluate(
        &self,
        plug: &Plug,
        mode: EvalMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, FlowError> {
        let Some(meta) = plug.attribute.check_meta() else {
            return Err(FlowError::PlugUnhandled(ctx.shell(&plug.name)));
        };
        let qa_mode = QaMode::from_eval_mode(mode);
        if qa_mode == QaMode::Fix && !meta.implements_fix {
            return Err(FlowError::CheckIncompatible(ctx.shell(&plug.name)));
        }
        let result = self.checks.assure_quality(plug, qa_mode, ctx)?;
        Ok(Value::CheckResult(result))
    }

    fn tracks_calls(&self) -> bool {
        false
    }
}

/// Workflow wrapper running batches of QA checks.
pub struct QaWorkflow {
    workflow: Workflow,
    events: QaEventSink,
    /// Whether the running batch stops at the first failing check. Reset to
    /// `default_abort_on_error` when a batch starts; observers may flip it.
    pub abort_on_error: bool,
    pub default_abort_on_error: bool,
    pub log_check_progress: bool,
}

impl QaWorkflow {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            events: QaEventSink::default(),
            abort_on_error: false,
            default_abort_on_error: false,
            log_check_progress: true,
        }
    }

    pub fn with_config(workflow: Workflow, config: &EngineConfig) -> Self {
        let mut qa = Self::new(workflow.with_config(config));
        qa.abort_on_error = config.abort_on_error;
        qa.default_abort_on_error = config.abort_on_error;
        qa.log_check_progress = config.log_check_progress;
        qa
    }

    pub fn with_events(mut self, events: QaEventSink) -> Self {
        self.events = events;
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn workflow_mut(&mut self) -> &mut Workflow {
        &mut self.workflow
    }

    pub fn into_workflow(self) -> Workflow {
        self.workflow
    }

    /// Nodes exposing at least one check plug, in insertion order.
    pub fn list_qa_processes(&self) -> Vec<&str> {
        self.workflow
            .nodes()
            .iter()
            .filter(|node| {
                node.process
                    .spec()
                    .plugs()
                    .iter()
                    .any(|plug| plug.attribute.check_meta().is_some())
            })
            .map(|node| node.id.as_str())
            .collect()
    }

    /// Check shells of `nodes` accepted by `predicate`.
    pub fn filter_checks(&self, nodes: &[&str], predicate: impl Fn(&Plug) -> bool) -> Vec<Shell> {
        let mut checks = Vec::new();
        for node in nodes {
            let Some(process) = self.workflow.process(node) else {
                tracing::warn!(node = %node, "qa node not found, skipped");
                continue;
            };
            checks.extend(
                process
                    .spec()
                    .plugs()
                    .iter()
                    .filter(|plug| plug.attribute.check_meta().is_some() && predicate(plug))
                    .map(|plug| Shell::new(*node, plug.name.clone())),
            );
        }
        checks
    }

    pub fn list_checks(&self, predicate: impl Fn(&Plug) -> bool) -> Vec<Shell> {
        let nodes = self.list_qa_processes();
        self.filter_checks(&nodes, predicate)
    }

    /// Runs `checks` in order and returns each with its result.
    ///
    /// A failing check is reported through a `CheckError` event. Unless
    /// `abort_on_error` is set afterwards the batch continues with a null
    /// result for that check; otherwise the error is returned and no
    /// `PostCheck` event is sent for it.
    pub fn run_checks(
        &mut self,
        checks: &[Shell],
        mode: QaMode,
        clear_result: bool,
    ) -> Result<Vec<(Shell, CheckResult)>, FlowError> {
        self.abort_on_error = self.default_abort_on_error;
        self.workflow.begin(mode.eval_mode())?;

        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            let mut control = RunControl {
                abort_on_error: self.abort_on_error,
            };
            self.events.emit(
                QaEvent::PreCheck {
                    check: check.clone(),
                },
                &mut control,
            );
            self.abort_on_error = control.abort_on_error;
            if self.log_check_progress {
                tracing::info!(check = %check, mode = ?mode, "running check");
            }

            let check_mode = self.check_mode(check, mode);
            if clear_result {
                self.workflow.clear_shell_cache(check, false);
            }

            let result = match self.workflow.get(check, check_mode.eval_mode()) {
                Ok(value) => value.as_check_result().cloned().ok_or_else(|| {
                    FlowError::compute_failed(format!(
                        "check {check} returned {value} instead of a check result"
                    ))
                }),
                Err(error) => Err(error),
            };
            let result = match result {
                Ok(result) => result,
                Err(error) => {
                    let mut control = RunControl {
                        abort_on_error: self.abort_on_error,
                    };
                    self.events.emit(
                        QaEvent::CheckError {
                            check: check.clone(),
                            error: error.to_string(),
                        },
                        &mut control,
                    );
                    self.abort_on_error = control.abort_on_error;
                    if self.abort_on_error {
                        tracing::error!(check = %check, error = %error, "check failed, aborting batch");
                        return Err(error);
                    }
                    tracing::warn!(check = %check, error = %error, "check failed");
                    CheckResult::default()
                }
            };

            if self.log_check_progress {
                let status = if result.is_successful() { "OK" } else { "FAILED" };
                tracing::info!(check = %check, status, "check finished");
            }
            let mut control = RunControl {
                abort_on_error: self.abort_on_error,
            };
            self.events.emit(
                QaEvent::PostCheck {
                    check: check.clone(),
                    result: result.clone(),
                },
                &mut control,
            );
            self.abort_on_error = control.abort_on_error;
            results.push((check.clone(), result));
        }
        Ok(results)
    }

    fn check_mode(&self, check: &Shell, mode: QaMode) -> QaMode {
        if mode != QaMode::Fix {
            return mode;
        }
        let implements_fix = self
            .workflow
            .plug(check)
            .and_then(|plug| plug.attribute.check_meta().map(|meta| meta.implements_fix))
            .unwrap_or(false);
        if implements_fix {
            QaMode::Fix
        } else {
            tracing::debug!(check = %check, "check has no fix, running as query");
            QaMode::Query
        }
    }
}
