use crate::{
    AttributeFlag, EvalContext, EvalMode, FlowError, Plug, PlugDirection, PrepareContext, Process,
    ProcessSpec, Shell, ShellWalk, Value, Workflow,
};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

/// A process that owns a whole workflow.
///
/// Every inner plug left open by the inner wiring is exposed as an outer plug
/// named `node.plug`: unconnected inputs become inputs, outputs without
/// consumers become outputs. Evaluation hands the caller's call graph to the
/// inner workflow so the trace stays continuous, and takes it back afterwards.
pub struct WorkflowProcess {
    spec: ProcessSpec,
    inner: Mutex<Workflow>,
    inputs: BTreeMap<String, Shell>,
    outputs: BTreeMap<String, Shell>,
}

impl WorkflowProcess {
    pub fn new(type_name: impl Into<String>, inner: Workflow) -> Result<Self, FlowError> {
        let mut spec = ProcessSpec::new(type_name, inner.name().to_string(), "computes");
        let mut inputs = BTreeMap::new();
        let mut outputs = BTreeMap::new();

        for node in inner.node_ids() {
            for shell in inner.shells(node)? {
                let Some(plug) = inner.plug(&shell) else {
                    continue;
                };
                let exposed = shell.to_string();
                if plug.provides_output() && inner.outputs_of(&shell).is_empty() {
                    let attribute = plug.attribute.clone().with_flags(AttributeFlag::Computable);
                    spec = spec.plug(Plug::new(exposed.clone(), attribute, PlugDirection::Output));
                    outputs.insert(exposed, shell);
                } else if plug.is_input() && inner.input_of(&shell).is_none() {
                    spec = spec.plug(Plug::new(
                        exposed.clone(),
                        plug.attribute.clone(),
                        PlugDirection::Input,
                    ));
                    inputs.insert(exposed, shell);
                }
            }
        }

        for (outer_input, inner_input) in &inputs {
            let reached = ShellWalk::downstream()
                .visit_once(true)
                .run(&inner, inner_input);
            for (outer_output, inner_output) in &outputs {
                if reached.contains(inner_output) {
                    spec = spec.affects(outer_input, outer_output);
                }
            }
        }

        Ok(Self {
            spec,
            inner: Mutex::new(inner),
            inputs,
            outputs,
        })
    }

    pub fn inner(&self) -> Result<MutexGuard<'_, Workflow>, FlowError> {
        self.inner
            .lock()
            .map_err(|error| FlowError::Lock(error.to_string()))
    }

    /// Inner shell behind an exposed outer plug name.
    pub fn inner_shell(&self, plug: &str) -> Option<&Shell> {
        self.inputs.get(plug).or_else(|| self.outputs.get(plug))
    }
}

impl Process for WorkflowProcess {
    fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    fn prepare(&self, ctx: &PrepareContext) -> Result<(), FlowError> {
        if ctx.call_graph_len != 0 {
            return Err(FlowError::CallGraph(format!(
                "nested workflow {} requires an empty call graph, found {} frames",
                self.spec.type_name, ctx.call_graph_len
            )));
        }
        self.inner()?.begin(ctx.mode)
    }

    fn evaluate(
        &self,
        plug: &Plug,
        mode: EvalMode,
        ctx: &mut EvalContext<'_>,
    ) -> Result<Value, FlowError> {
        let target = self
            .outputs
            .get(&plug.name)
            .ok_or_else(|| FlowError::PlugUnhandled(ctx.shell(&plug.name)))?;
        let mut inner = self.inner()?;

        for (outer_input, inner_input) in &self.inputs {
            let outer = ctx.shell(outer_input);
            if !ctx.has_input(outer_input) && !ctx.workflow().has_cache(&outer) {
                if inner.has_cache(inner_input) {
                    inner.clear_shell_cache(inner_input, true);
                }
                continue;
            }
            let value = ctx.input(outer_input)?;
            if inner.cache(inner_input).value() != Some(&value) {
                inner.set_value(inner_input, value, true)?;
            }
        }

        inner.set_mode(ctx.global_mode());
        let call_graph = ctx.take_call_graph();
        inner.set_root_depth(call_graph.stack_size());
        inner.restore_call_graph(call_graph);

        let result = inner.get(target, mode);

        ctx.restore_call_graph(inner.take_call_graph());
        inner.set_root_depth(0);
        result
    }
}
