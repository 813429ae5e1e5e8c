use crate::{CallGraph, EvalMode, FlowError, Plug, ProcessSpec, Shell, Value, Workflow};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A graph vertex with a fixed plug catalogue and an evaluation routine.
///
/// `evaluate` is invoked by the workflow dispatcher whenever an output plug of
/// the node is read and has no cached value. Implementations pull their
/// inputs through the [`EvalContext`] and must honour the mode bits: with
/// `dirty_check` set they may not mutate anything and report pending work as
/// [`FlowError::Dirty`] instead.
pub trait Process: Send + Sync {
    fn spec(&self) -> &ProcessSpec;

    fn evaluate(
        &self,
        plug: &Plug,
        mode: EvalMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, FlowError>;

    /// Called once for every node before a top-level evaluation starts.
    fn prepare(&self, _ctx: &PrepareContext) -> Result<(), FlowError> {
        Ok(())
    }

    /// Whether evaluations of this process open call graph frames.
    fn tracks_calls(&self) -> bool {
        true
    }
}

pub type SharedProcess = Arc<dyn Process>;

/// Construction arguments retained on a node so it can be re-created.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProcessArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl ProcessArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    /// Keyword argument first, then positional argument `index`.
    pub fn get(&self, index: usize, key: &str) -> Option<&Value> {
        self.kwargs.get(key).or_else(|| self.args.get(index))
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PrepareContext {
    pub mode: EvalMode,
    /// Number of frames already recorded in the owning workflow's call graph.
    pub call_graph_len: usize,
}

/// Handle given to a process while it evaluates one of its plugs.
pub struct EvalContext<'a> {
    workflow: &'a mut Workflow,
    node: String,
    mode: EvalMode,
}

impl<'a> EvalContext<'a> {
    pub(crate) fn new(workflow: &'a mut Workflow, node: impl Into<String>, mode: EvalMode) -> Self {
        Self {
            workflow,
            node: node.into(),
            mode,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node
    }

    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    pub fn global_mode(&self) -> EvalMode {
        self.workflow.mode()
    }

    pub fn shell(&self, plug: &str) -> Shell {
        Shell::new(self.node.clone(), plug)
    }

    /// Reads one of the node's own plugs, pulling through its connection or
    /// falling back to its default.
    pub fn input(&mut self, plug: &str) -> Result<Value, FlowError> {
        let shell = self.shell(plug);
        self.workflow.get_inner(&shell, None, None)
    }

    /// Like [`input`](Self::input) but returns `None` for an unconnected plug
    /// without a default.
    pub fn input_opt(&mut self, plug: &str) -> Result<Option<Value>, FlowError> {
        match self.input(plug) {
            Ok(value) => Ok(Some(value)),
            Err(FlowError::MissingDefault(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub fn has_input(&self, plug: &str) -> bool {
        self.workflow.input_of(&self.shell(plug)).is_some()
    }

    pub fn workflow(&self) -> &Workflow {
        self.workflow
    }

    /// Hands the live call graph to a nested evaluation. The caller must give
    /// it back through [`restore_call_graph`](Self::restore_call_graph).
    pub fn take_call_graph(&mut self) -> CallGraph {
        self.workflow.take_call_graph()
    }

    pub fn restore_call_graph(&mut self, call_graph: CallGraph) {
        self.workflow.restore_call_graph(call_graph);
    }
}
