use crate::{
    AttributeFlag, CacheSlot, CallGraph, DIRTY, DirtyReport, EngineConfig, EvalContext, EvalMode,
    FlowError, FrameStart, MAKE, Plug, PrepareContext, ProcessArgs, ProcessRegistry, QUERY,
    SharedProcess, Shell, ShellWalk, Value, ValueType,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct NodeEntry {
    pub id: String,
    pub type_name: String,
    pub args: ProcessArgs,
    pub process: SharedProcess,
}

impl fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeEntry")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirtyMode {
    /// Only the process producing the target is checked.
    #[default]
    Single,
    /// Like `Single`, then every producer in the call graph is checked too.
    Multi,
    /// Upstream processes also run their dirty checks and fail the request.
    Deep,
}

pub type TargetOutcome = (Value, Result<Value, FlowError>);
pub type DirtyEntry = (Shell, Option<DirtyReport>);

/// Graph of process nodes, their connections and the caches of their shells.
pub struct Workflow {
    name: String,
    nodes: Vec<NodeEntry>,
    inputs: BTreeMap<Shell, Shell>,
    outputs: BTreeMap<Shell, Vec<Shell>>,
    caches: BTreeMap<Shell, CacheSlot>,
    mode: EvalMode,
    call_graph: CallGraph,
    track_calls: bool,
    root_depth: usize,
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("connections", &self.inputs)
            .finish_non_exhaustive()
    }
}

impl Default for Workflow {
    fn default() -> Self {
        Self::new("workflow")
    }
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            caches: BTreeMap::new(),
            mode: QUERY,
            call_graph: CallGraph::new(),
            track_calls: true,
            root_depth: 0,
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.track_calls = config.track_calls;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn mode(&self) -> EvalMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EvalMode) {
        self.mode = mode;
    }

    // Nodes

    pub fn add_node(
        &mut self,
        id: impl Into<String>,
        type_name: impl Into<String>,
        args: ProcessArgs,
        process: SharedProcess,
    ) -> Result<(), FlowError> {
        let id = id.into();
        if self.node(&id).is_some() {
            return Err(FlowError::DuplicateNode(id));
        }
        tracing::debug!(workflow = %self.name, node = %id, "node added");
        self.nodes.push(NodeEntry {
            id,
            type_name: type_name.into(),
            args,
            process,
        });
        Ok(())
    }

    /// Adds a node whose type name is taken from the process spec.
    pub fn add_process(
        &mut self,
        id: impl Into<String>,
        process: SharedProcess,
    ) -> Result<(), FlowError> {
        let type_name = process.spec().type_name.clone();
        self.add_node(id, type_name, ProcessArgs::default(), process)
    }

    /// Removes a node together with all of its connections and caches.
    pub fn remove_node(&mut self, id: &str) -> Result<NodeEntry, FlowError> {
        let position = self
            .nodes
            .iter()
            .position(|node| node.id == id)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))?;
        for (source, destination) in self.connections(id, true, true) {
            self.disconnect(&source, &destination);
        }
        self.caches.retain(|shell, _| shell.node != id);
        Ok(self.nodes.remove(position))
    }

    pub fn node(&self, id: &str) -> Option<&NodeEntry> {
        self.nodes.iter().find(|node| node.id == id)
    }

    fn entry(&self, id: &str) -> Result<&NodeEntry, FlowError> {
        self.node(id)
            .ok_or_else(|| FlowError::NodeNotFound(id.to_string()))
    }

    pub fn nodes(&self) -> &[NodeEntry] {
        &self.nodes
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.nodes.iter().map(|node| node.id.as_str()).collect()
    }

    pub fn process(&self, id: &str) -> Option<&SharedProcess> {
        self.node(id).map(|node| &node.process)
    }

    /// Nodes taking part in at least one connection, in insertion order.
    pub fn iter_connected_nodes(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes
            .iter()
            .filter(|node| !self.connections(&node.id, true, true).is_empty())
            .map(|node| node.id.as_str())
    }

    pub fn plug(&self, shell: &Shell) -> Option<Arc<Plug>> {
        self.node(&shell.node)?
            .process
            .spec()
            .plug_named(&shell.plug)
            .cloned()
    }

    fn require_plug(&self, shell: &Shell) -> Result<Arc<Plug>, FlowError> {
        self.entry(&shell.node)?;
        self.plug(shell)
            .ok_or_else(|| FlowError::PlugNotFound(shell.clone()))
    }

    pub fn shells(&self, node: &str) -> Result<Vec<Shell>, FlowError> {
        let entry = self.entry(node)?;
        Ok(entry
            .process
            .spec()
            .plugs()
            .iter()
            .map(|plug| Shell::new(node, plug.name.clone()))
            .collect())
    }

    pub fn input_shells(&self, node: &str) -> Result<Vec<Shell>, FlowError> {
        let entry = self.entry(node)?;
        Ok(entry
            .process
            .spec()
            .input_plugs()
            .map(|plug| Shell::new(node, plug.name.clone()))
            .collect())
    }

    pub fn output_shells(&self, node: &str) -> Result<Vec<Shell>, FlowError> {
        let entry = self.entry(node)?;
        Ok(entry
            .process
            .spec()
            .output_plugs()
            .map(|plug| Shell::new(node, plug.name.clone()))
            .collect())
    }

    // Connections

    pub fn input_of(&self, shell: &Shell) -> Option<&Shell> {
        self.inputs.get(shell)
    }

    pub fn outputs_of(&self, shell: &Shell) -> &[Shell] {
        self.outputs
            .get(shell)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn is_connected(&self, shell: &Shell) -> bool {
        self.inputs.contains_key(shell) || !self.outputs_of(shell).is_empty()
    }

    /// Connects `source` to `destination`. A connected destination is only
    /// rewired when `force` is set; reconnecting the same source is a no-op.
    pub fn connect(
        &mut self,
        source: &Shell,
        destination: &Shell,
        force: bool,
    ) -> Result<(), FlowError> {
        let source_plug = self.require_plug(source)?;
        let destination_plug = self.require_plug(destination)?;
        let affinity = source_plug
            .attribute
            .connection_affinity(&destination_plug.attribute);
        if !destination_plug.provides_input() || affinity == 0 {
            return Err(FlowError::PlugIncompatible {
                from: source.clone(),
                to: destination.clone(),
            });
        }

        if let Some(existing) = self.inputs.get(destination).cloned() {
            if &existing == source {
                return Ok(());
            }
            if !force {
                return Err(FlowError::PlugAlreadyConnected {
                    from: source.clone(),
                    to: destination.clone(),
                });
            }
            tracing::debug!(
                previous = %existing,
                source = %source,
                destination = %destination,
                "forcing reconnection"
            );
            self.remove_edge(&existing, destination);
        }

        self.inputs.insert(destination.clone(), source.clone());
        self.outputs
            .entry(source.clone())
            .or_default()
            .push(destination.clone());
        self.clear_shell_cache(destination, true);
        tracing::debug!(source = %source, destination = %destination, affinity, "connected");
        Ok(())
    }

    /// Removes the connection if present and invalidates the destination.
    pub fn disconnect(&mut self, source: &Shell, destination: &Shell) -> bool {
        if self.inputs.get(destination) != Some(source) {
            return false;
        }
        self.remove_edge(source, destination);
        self.clear_shell_cache(destination, true);
        tracing::debug!(source = %source, destination = %destination, "disconnected");
        true
    }

    fn remove_edge(&mut self, source: &Shell, destination: &Shell) {
        self.inputs.remove(destination);
        if let Some(targets) = self.outputs.get_mut(source) {
            targets.retain(|shell| shell != destination);
            if targets.is_empty() {
                self.outputs.remove(source);
            }
        }
    }

    /// Edges `(source, destination)` touching `node` as destination
    /// (`inputs`) and/or as source (`outputs`).
    pub fn connections(&self, node: &str, inputs: bool, outputs: bool) -> Vec<(Shell, Shell)> {
        let mut out = Vec::new();
        if inputs {
            out.extend(
                self.inputs
                    .iter()
                    .filter(|(destination, _)| destination.node == node)
                    .map(|(destination, source)| (source.clone(), destination.clone())),
            );
        }
        if outputs {
            for (source, destinations) in &self.outputs {
                if source.node == node {
                    out.extend(
                        destinations
                            .iter()
                            .map(|destination| (source.clone(), destination.clone())),
                    );
                }
            }
        }
        out
    }

    pub fn all_connections(&self) -> Vec<(Shell, Shell)> {
        self.outputs
            .iter()
            .flat_map(|(source, destinations)| {
                destinations
                    .iter()
                    .map(move |destination| (source.clone(), destination.clone()))
            })
            .collect()
    }

    // Caches

    pub fn cache(&self, shell: &Shell) -> &CacheSlot {
        static EMPTY: CacheSlot = CacheSlot::Empty;
        self.caches.get(shell).unwrap_or(&EMPTY)
    }

    pub fn has_cache(&self, shell: &Shell) -> bool {
        matches!(self.caches.get(shell), Some(CacheSlot::Cached(_)))
    }

    /// Stores `value` after invalidating everything downstream of `shell`.
    pub fn set_cache(&mut self, shell: &Shell, value: Value) -> Result<(), FlowError> {
        let plug = self.require_plug(shell)?;
        self.store(shell, &plug, value)
    }

    fn store(&mut self, shell: &Shell, plug: &Plug, value: Value) -> Result<(), FlowError> {
        if plug.attribute.compatibility_rate(&value) == 0 {
            return Err(FlowError::IncompatibleValue {
                shell: shell.clone(),
                value: value.to_string(),
            });
        }
        if plug.attribute.has_flag(AttributeFlag::Uncached) {
            return Ok(());
        }
        self.clear_shell_cache(shell, true);
        self.caches.insert(shell.clone(), CacheSlot::Cached(value));
        Ok(())
    }

    /// Clears the cache of `shell`. With `clear_affected` the clear follows
    /// affects relations and outbound connections.
    pub fn clear_shell_cache(&mut self, shell: &Shell, clear_affected: bool) {
        if !clear_affected {
            self.caches.remove(shell);
            return;
        }
        let mut seen = BTreeSet::new();
        let mut pending = vec![shell.clone()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            self.caches.remove(&current);
            if let Some(plug) = self.plug(&current) {
                pending.extend(
                    plug.affects
                        .iter()
                        .map(|name| Shell::new(current.node.clone(), name.clone())),
                );
            }
            pending.extend(self.outputs_of(&current).iter().cloned());
        }
    }

    pub fn clear_cache(&mut self) {
        self.caches.clear();
    }

    /// Explicitly sets the value of an input shell.
    pub fn set_value(
        &mut self,
        shell: &Shell,
        value: Value,
        ignore_connection: bool,
    ) -> Result<(), FlowError> {
        let plug = self.require_plug(shell)?;
        let not_writable = |reason: String| FlowError::NotWritable {
            shell: shell.clone(),
            reason,
        };
        if plug.is_readonly() {
            return Err(not_writable("plug is read-only".to_string()));
        }
        if plug.provides_output() {
            return Err(not_writable("plug provides an output itself".to_string()));
        }
        if plug.attribute.has_flag(AttributeFlag::Uncached) {
            return Err(not_writable("uncached plugs cannot hold a value".to_string()));
        }
        if !ignore_connection {
            if let Some(source) = self.inputs.get(shell) {
                return Err(not_writable(format!("plug is connected to {source}")));
            }
        }
        self.store(shell, &plug, value)
    }

    // Evaluation

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn take_call_graph(&mut self) -> CallGraph {
        std::mem::take(&mut self.call_graph)
    }

    pub fn restore_call_graph(&mut self, call_graph: CallGraph) {
        self.call_graph = call_graph;
    }

    /// Stack depth at which a frame counts as the root of a request. Nested
    /// workflows evaluate on top of their parent's open frames.
    pub(crate) fn set_root_depth(&mut self, depth: usize) {
        self.root_depth = depth;
    }

    /// Starts a fresh top-level request: new call graph, new global mode and
    /// every process prepared.
    pub fn begin(&mut self, global_mode: EvalMode) -> Result<(), FlowError> {
        self.call_graph = CallGraph::new();
        self.mode = global_mode;
        let ctx = PrepareContext {
            mode: global_mode,
            call_graph_len: self.call_graph.len(),
        };
        let processes: Vec<SharedProcess> =
            self.nodes.iter().map(|node| Arc::clone(&node.process)).collect();
        for process in processes {
            process.prepare(&ctx)?;
        }
        Ok(())
    }

    /// Top-level request for the value of `shell` in `mode`.
    pub fn evaluate(&mut self, shell: &Shell, mode: EvalMode) -> Result<Value, FlowError> {
        self.evaluate_with(shell, mode, mode)
    }

    /// Top-level request where the requested process runs in `process_mode`
    /// and every process it pulls from runs in `global_mode`.
    pub fn evaluate_with(
        &mut self,
        shell: &Shell,
        process_mode: EvalMode,
        global_mode: EvalMode,
    ) -> Result<Value, FlowError> {
        self.begin(global_mode)?;
        let result = self.get_inner(shell, Some(process_mode), None);
        self.ensure_stack_empty(shell)?;
        result
    }

    /// Reads `shell` within the current request without resetting the call
    /// graph.
    pub fn get(&mut self, shell: &Shell, mode: EvalMode) -> Result<Value, FlowError> {
        self.get_inner(shell, Some(mode), None)
    }

    fn ensure_stack_empty(&self, shell: &Shell) -> Result<(), FlowError> {
        if self.call_graph.stack_size() != 0 {
            return Err(FlowError::CallGraph(format!(
                "call stack not empty after evaluating {shell}"
            )));
        }
        Ok(())
    }

    pub(crate) fn get_inner(
        &mut self,
        shell: &Shell,
        mode: Option<EvalMode>,
        via: Option<Shell>,
    ) -> Result<Value, FlowError> {
        if let Some(CacheSlot::Cached(value)) = self.caches.get(shell) {
            return Ok(value.clone());
        }

        let plug = self.require_plug(shell)?;
        let upstream = self.inputs.get(shell).cloned();
        if plug.provides_output() && !(plug.is_input() && upstream.is_some()) {
            return self.compute(shell, &plug, mode, via);
        }
        if !plug.is_input() {
            return Err(FlowError::PlugUnhandled(shell.clone()));
        }

        match upstream {
            Some(source) => {
                let value = self.get_inner(&source, mode, Some(shell.clone()))?;
                if plug.attribute.has_flag(AttributeFlag::CheckPassingValues)
                    && plug.attribute.compatibility_rate(&value) == 0
                {
                    return Err(FlowError::IncompatibleValue {
                        shell: shell.clone(),
                        value: value.to_string(),
                    });
                }
                Ok(value)
            }
            None => plug
                .attribute
                .default_value()
                .ok_or_else(|| FlowError::MissingDefault(shell.clone())),
        }
    }

    fn compute(
        &mut self,
        shell: &Shell,
        plug: &Arc<Plug>,
        mode: Option<EvalMode>,
        via: Option<Shell>,
    ) -> Result<Value, FlowError> {
        let process = Arc::clone(&self.entry(&shell.node)?.process);
        let effective = if self.call_graph.stack_size() == self.root_depth {
            mode.unwrap_or(self.mode)
        } else {
            self.mode
        };
        let tracked = self.track_calls && process.tracks_calls();
        if tracked {
            let spec = process.spec();
            self.call_graph.start_call(FrameStart {
                node: shell.node.clone(),
                plug: shell.plug.clone(),
                mode: effective,
                noun: spec.noun.clone(),
                verb: spec.verb.clone(),
                via,
            });
        }

        let mut result = {
            let mut ctx = EvalContext::new(self, shell.node.clone(), effective);
            process.evaluate(plug, effective, &mut ctx)
        };
        if let Ok(value) = &result {
            if plug.attribute.compatibility_rate(value) == 0 {
                result = Err(FlowError::IncompatibleValue {
                    shell: shell.clone(),
                    value: value.to_string(),
                });
            }
        }
        if tracked {
            self.call_graph.end_call(result.as_ref())?;
        }

        match &result {
            Ok(value) => self.store(shell, plug, value.clone())?,
            Err(error) => {
                tracing::debug!(shell = %shell, error = %error, "evaluation failed");
                self.caches
                    .insert(shell.clone(), CacheSlot::Error(error.to_string()));
            }
        }
        result
    }

    // Targets

    /// Best plug of `node` for `target`: input plugs when `check_inputs`,
    /// output plugs otherwise. Read-only plugs are skipped, connected plugs
    /// rate half. Ties go to the plug declared first.
    pub fn node_target_rating(
        &self,
        node: &str,
        target: &Value,
        check_inputs: bool,
    ) -> Result<(u8, Option<Shell>), FlowError> {
        let entry = self.entry(node)?;
        let mut best: Option<(u8, Shell)> = None;
        for plug in entry.process.spec().plugs() {
            let candidate = if check_inputs {
                plug.is_input()
            } else {
                plug.provides_output()
            };
            if !candidate || plug.is_readonly() {
                continue;
            }
            let mut rate = plug.attribute.compatibility_rate(target);
            if rate == 0 {
                continue;
            }
            let shell = Shell::new(node, plug.name.clone());
            if self.inputs.contains_key(&shell) {
                rate /= 2;
            }
            if best.as_ref().is_none_or(|(best_rate, _)| rate > *best_rate) {
                best = Some((rate, shell));
            }
        }
        Ok(match best {
            Some((rate, shell)) => (rate, Some(shell)),
            None => (0, None),
        })
    }

    /// Workflow-wide best input shell for `target`. Leaf nodes (without
    /// outbound connections) are preferred; several equally good picks are an
    /// error.
    pub fn target_rating(&self, target: &Value) -> Result<(u8, Option<Shell>), FlowError> {
        let mut rated: Vec<(u32, String)> = Vec::new();
        for node in &self.nodes {
            let (rate, _) = self.node_target_rating(&node.id, target, true)?;
            if rate == 0 {
                continue;
            }
            let is_leaf = self.connections(&node.id, false, true).is_empty();
            let rate = if is_leaf { rate as u32 * 2 } else { rate as u32 };
            rated.push((rate, node.id.clone()));
        }

        let Some(best) = rated.iter().map(|(rate, _)| *rate).max() else {
            return Ok((0, None));
        };
        let picks: Vec<&str> = rated
            .iter()
            .filter(|(rate, _)| *rate == best)
            .map(|(_, node)| node.as_str())
            .collect();
        if picks.len() > 1 {
            return Err(FlowError::Target(format!(
                "there should only be one suitable process for {target}, found {} ({})",
                picks.len(),
                picks.join(", ")
            )));
        }
        self.node_target_rating(picks[0], target, true)
    }

    /// Sorted set of value types any node can produce.
    pub fn target_support_list(&self) -> Vec<ValueType> {
        let types: BTreeSet<ValueType> = self
            .nodes
            .iter()
            .flat_map(|node| {
                node.process
                    .spec()
                    .output_plugs()
                    .map(|plug| plug.attribute.value_type)
                    .collect::<Vec<_>>()
            })
            .collect();
        types.into_iter().collect()
    }

    /// Feeds `target` into the best input shell and returns the output shell
    /// whose evaluation produces it.
    fn setup_target(&mut self, target: &Value, global_mode: EvalMode) -> Result<Shell, FlowError> {
        let (_, input) = self.target_rating(target)?;
        let input =
            input.ok_or_else(|| FlowError::Target(format!("cannot handle target {target}")))?;

        self.begin(global_mode)?;

        // only unconnected outputs are candidates
        let mut skipped = BTreeSet::new();
        for node in &self.nodes {
            for plug in node.process.spec().plugs() {
                let shell = Shell::new(node.id.clone(), plug.name.clone());
                if !plug.provides_output() || !self.outputs_of(&shell).is_empty() {
                    skipped.insert(shell);
                }
            }
        }
        let walk = ShellWalk::downstream()
            .visit_once(true)
            .prune(move |shell| skipped.contains(shell));
        let mut affected_nodes: Vec<String> = Vec::new();
        for shell in walk.run(self, &input) {
            if !affected_nodes.contains(&shell.node) {
                affected_nodes.push(shell.node);
            }
        }

        let mut output = None;
        for node in &affected_nodes {
            if let (_, Some(shell)) = self.node_target_rating(node, target, false)? {
                output = Some(shell);
                break;
            }
        }

        if output.is_none() {
            let input_plug = self.require_plug(&input)?;
            if input_plug.affects.is_empty() {
                return Err(FlowError::Target(format!(
                    "plug {input} takes target {target} as input, but does not affect an output plug taking the same target type"
                )));
            }
            for name in &input_plug.affects {
                let shell = Shell::new(input.node.clone(), name.clone());
                let Some(plug) = self.plug(&shell) else {
                    continue;
                };
                if plug.provides_output()
                    && self.outputs_of(&shell).is_empty()
                    && plug.attribute.compatibility_rate(target) > 0
                {
                    tracing::warn!(
                        shell = %shell,
                        "no downstream output delivers the target type, using an affected plug"
                    );
                    output = Some(shell);
                    break;
                }
            }
        }

        let output = output.ok_or_else(|| {
            FlowError::Target(format!(
                "target {target} cannot be handled by workflow {} as no computable output for {input} exists",
                self.name
            ))
        })?;
        self.set_value(&input, target.clone(), true)?;
        Ok(output)
    }

    /// Makes `target` by evaluating the workflow with `is_state|target_state`.
    pub fn make_target(&mut self, target: &Value) -> Result<Value, FlowError> {
        let output = self.setup_target(target, MAKE)?;
        let result = self.get_inner(&output, Some(MAKE), None);
        self.ensure_stack_empty(&output)?;
        result
    }

    /// Makes every target in order. Failures are logged and returned per
    /// target without stopping the batch.
    pub fn make_targets(&mut self, targets: &[Value]) -> Vec<TargetOutcome> {
        targets
            .iter()
            .map(|target| {
                let result = self.make_target(target);
                match &result {
                    Ok(value) => tracing::info!(target = %target, result = %value, "target made"),
                    Err(error) => tracing::warn!(target = %target, error = %error, "target failed"),
                }
                (target.clone(), result)
            })
            .collect()
    }

    /// Reports whether making `target` would require work, without doing it.
    pub fn make_dirty_report(
        &mut self,
        target: &Value,
        mode: DirtyMode,
    ) -> Result<Vec<DirtyEntry>, FlowError> {
        let global_mode = match mode {
            DirtyMode::Deep => DIRTY,
            DirtyMode::Single | DirtyMode::Multi => QUERY,
        };
        let output = self.setup_target(target, global_mode)?;
        let mut reports = vec![self.dirty_state(&output, DIRTY)];

        if mode == DirtyMode::Multi {
            let producers: Vec<Shell> = self
                .call_graph
                .to_call_list(false, &|_| false)
                .into_iter()
                .filter(|(_, consumer)| consumer.is_some())
                .map(|(frame, _)| frame.shell())
                .collect();
            for shell in producers {
                let entry = self.dirty_state(&shell, DIRTY);
                reports.push(entry);
            }
        }
        Ok(reports)
    }

    fn dirty_state(&mut self, shell: &Shell, mode: EvalMode) -> DirtyEntry {
        self.clear_shell_cache(shell, false);
        let report = match self.get_inner(shell, Some(mode), None) {
            Ok(_) => None,
            Err(FlowError::Dirty(report)) => Some(report),
            Err(other) => Some(DirtyReport::new(other.to_string())),
        };
        (shell.clone(), report)
    }

    /// Re-creates every node from its retained construction arguments and
    /// restores the same connections. Caches are not copied.
    pub fn duplicate(&self, registry: &ProcessRegistry) -> Result<Workflow, FlowError> {
        let mut copy = Workflow::new(self.name.clone());
        copy.mode = self.mode;
        copy.track_calls = self.track_calls;
        for node in &self.nodes {
            let process = registry.create(&node.type_name, &node.id, &node.args)?;
            copy.add_node(node.id.clone(), node.type_name.clone(), node.args.clone(), process)?;
        }
        for (source, destination) in self.all_connections() {
            copy.connect(&source, &destination, true)?;
        }
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Attribute, Constant, ProcessSpec, Register, Sum};

    fn constant(value: i64) -> SharedProcess {
        Arc::new(Constant::new(Value::Integer(value)))
    }

    fn sum_workflow() -> Workflow {
        let mut workflow = Workflow::new("sum");
        workflow.add_process("a", constant(2)).expect("a should add");
        workflow.add_process("b", constant(3)).expect("b should add");
        workflow.add_process("sum", Arc::new(Sum::new())).expect("sum should add");
        workflow
            .connect(&Shell::new("a", "value"), &Shell::new("sum", "lhs"), false)
            .expect("a should connect");
        workflow
            .connect(&Shell::new("b", "value"), &Shell::new("sum", "rhs"), false)
            .expect("b should connect");
        workflow
    }

    #[test]
    fn connect_already_connected_without_force_expected_error() {
        let mut workflow = sum_workflow();
        workflow.add_process("c", constant(9)).expect("c should add");
        let error = workflow
            .connect(&Shell::new("c", "value"), &Shell::new("sum", "lhs"), false)
            .expect_err("second inbound connection should fail");
        assert!(matches!(error, FlowError::PlugAlreadyConnected { .. }));

        workflow
            .connect(&Shell::new("c", "value"), &Shell::new("sum", "lhs"), true)
            .expect("forced connection should succeed");
        assert_eq!(
            workflow.input_of(&Shell::new("sum", "lhs")),
            Some(&Shell::new("c", "value"))
        );
        assert!(workflow.outputs_of(&Shell::new("a", "value")).is_empty());
    }

    #[test]
    fn connect_same_source_twice_expected_idempotent() {
        let mut workflow = sum_workflow();
        workflow
            .connect(&Shell::new("a", "value"), &Shell::new("sum", "lhs"), false)
            .expect("reconnecting the same source should succeed");
        assert_eq!(workflow.outputs_of(&Shell::new("a", "value")).len(), 1);
    }

    #[test]
    fn connect_incompatible_types_expected_plug_incompatible() {
        let mut workflow = sum_workflow();
        workflow
            .add_process("text", Arc::new(Constant::new(Value::from("x"))))
            .expect("text should add");
        workflow.disconnect(&Shell::new("a", "value"), &Shell::new("sum", "lhs"));
        let error = workflow
            .connect(&Shell::new("text", "value"), &Shell::new("sum", "lhs"), false)
            .expect_err("string into number should fail");
        assert!(matches!(error, FlowError::PlugIncompatible { .. }));
    }

    #[test]
    fn evaluate_sum_expected_total_and_cached_output() {
        let mut workflow = sum_workflow();
        let total = workflow
            .evaluate(&Shell::new("sum", "total"), QUERY)
            .expect("sum should evaluate");
        assert_eq!(total, Value::Integer(5));
        assert!(workflow.has_cache(&Shell::new("sum", "total")));
        assert_eq!(workflow.call_graph().len(), 3);
        assert_eq!(workflow.call_graph().stack_size(), 0);
    }

    #[test]
    fn disconnect_expected_destination_cache_cleared() {
        let mut workflow = sum_workflow();
        workflow
            .evaluate(&Shell::new("sum", "total"), QUERY)
            .expect("sum should evaluate");
        assert!(workflow.disconnect(&Shell::new("b", "value"), &Shell::new("sum", "rhs")));
        assert!(!workflow.has_cache(&Shell::new("sum", "total")));
        let total = workflow
            .evaluate(&Shell::new("sum", "total"), QUERY)
            .expect("rhs should fall back to its default");
        assert_eq!(total, Value::Integer(2));
    }

    #[test]
    fn clear_cache_then_reevaluate_expected_same_value() {
        let mut workflow = sum_workflow();
        let shell = Shell::new("sum", "total");
        let before = workflow.evaluate(&shell, QUERY).expect("first evaluation");
        workflow.clear_cache();
        let after = workflow.evaluate(&shell, QUERY).expect("second evaluation");
        assert_eq!(before, after);
    }

    #[test]
    fn set_value_output_or_connected_expected_not_writable() {
        let mut workflow = sum_workflow();
        let error = workflow
            .set_value(&Shell::new("sum", "total"), Value::Integer(1), false)
            .expect_err("outputs are not writable");
        assert!(matches!(error, FlowError::NotWritable { .. }));
        let error = workflow
            .set_value(&Shell::new("sum", "lhs"), Value::Integer(1), false)
            .expect_err("connected inputs are not writable");
        assert!(matches!(error, FlowError::NotWritable { .. }));
        workflow
            .set_value(&Shell::new("sum", "lhs"), Value::Integer(10), true)
            .expect("ignoring the connection should allow the write");
        let total = workflow
            .evaluate(&Shell::new("sum", "total"), QUERY)
            .expect("sum should evaluate");
        assert_eq!(total, Value::Integer(13));
    }

    #[test]
    fn set_value_invalidates_affected_outputs() {
        let mut workflow = Workflow::new("single");
        workflow.add_process("sum", Arc::new(Sum::new())).expect("sum should add");
        let total = Shell::new("sum", "total");
        assert_eq!(workflow.evaluate(&total, QUERY).expect("defaults"), Value::Integer(0));
        workflow
            .set_value(&Shell::new("sum", "lhs"), Value::Integer(4), false)
            .expect("lhs should be writable");
        assert!(!workflow.has_cache(&total));
        assert_eq!(workflow.evaluate(&total, QUERY).expect("updated"), Value::Integer(4));
    }

    #[test]
    fn get_unconnected_input_without_default_expected_missing_default() {
        struct NoDefault(ProcessSpec);
        impl crate::Process for NoDefault {
            fn spec(&self) -> &ProcessSpec {
                &self.0
            }
            fn evaluate(
                &self,
                _plug: &Plug,
                _mode: EvalMode,
                ctx: &mut EvalContext<'_>,
            ) -> Result<Value, FlowError> {
                ctx.input("source")
            }
        }
        let spec = ProcessSpec::new("NoDefault", "thing", "returns")
            .input("source", Attribute::new(ValueType::Integer))
            .output("out", Attribute::new(ValueType::Integer));
        let mut workflow = Workflow::new("missing");
        workflow
            .add_process("n", Arc::new(NoDefault(spec)))
            .expect("node should add");
        let error = workflow
            .evaluate(&Shell::new("n", "out"), QUERY)
            .expect_err("missing default should fail");
        assert!(matches!(error, FlowError::MissingDefault(_)));
        assert!(matches!(
            workflow.cache(&Shell::new("n", "out")),
            CacheSlot::Error(_)
        ));
        assert!(
            workflow
                .call_graph()
                .root()
                .expect("root frame should be recorded")
                .error
                .is_some()
        );
    }

    #[test]
    fn remove_node_expected_connections_dropped() {
        let mut workflow = sum_workflow();
        workflow.remove_node("a").expect("a should be removed");
        assert!(workflow.input_of(&Shell::new("sum", "lhs")).is_none());
        assert_eq!(workflow.node_ids(), vec!["b", "sum"]);
        assert_eq!(workflow.iter_connected_nodes().collect::<Vec<_>>(), vec!["b", "sum"]);
        let error = workflow.remove_node("a").expect_err("a is gone");
        assert!(matches!(error, FlowError::NodeNotFound(_)));
    }

    #[test]
    fn add_node_duplicate_id_expected_error() {
        let mut workflow = sum_workflow();
        let error = workflow
            .add_process("a", constant(1))
            .expect_err("duplicate id should fail");
        assert!(matches!(error, FlowError::DuplicateNode(_)));
    }

    #[test]
    fn node_target_rating_connected_plug_expected_halved() {
        let workflow = sum_workflow();
        let (rate, shell) = workflow
            .node_target_rating("sum", &Value::Integer(1), true)
            .expect("sum should rate");
        assert_eq!(rate, 127);
        assert_eq!(shell, Some(Shell::new("sum", "lhs")));
    }

    #[test]
    fn make_target_register_expected_state_changed() {
        let mut workflow = Workflow::new("register");
        let register = Arc::new(Register::new(Value::Integer(1)));
        workflow
            .add_process("reg", register.clone())
            .expect("register should add");

        let reports = workflow
            .make_dirty_report(&Value::Integer(8), DirtyMode::Single)
            .expect("dirty report should run");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].1.is_some());
        assert_eq!(register.current(), Value::Integer(1));

        let result = workflow
            .make_target(&Value::Integer(8))
            .expect("target should be made");
        assert_eq!(result, Value::Integer(8));
        assert_eq!(register.current(), Value::Integer(8));

        let reports = workflow
            .make_dirty_report(&Value::Integer(8), DirtyMode::Single)
            .expect("dirty report should run");
        assert!(reports[0].1.is_none());
    }

    #[test]
    fn make_targets_collects_failures() {
        let mut workflow = Workflow::new("register");
        workflow
            .add_process("reg", Arc::new(Register::new(Value::Integer(1))))
            .expect("register should add");
        let outcomes = workflow.make_targets(&[Value::Integer(2), Value::from("text")]);
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].1.is_ok());
        assert!(matches!(outcomes[1].1, Err(FlowError::Target(_))));
    }

    #[test]
    fn target_rating_two_equal_leaves_expected_ambiguity_error() {
        let mut workflow = Workflow::new("ambiguous");
        workflow
            .add_process("r1", Arc::new(Register::new(Value::Integer(0))))
            .expect("r1 should add");
        workflow
            .add_process("r2", Arc::new(Register::new(Value::Integer(0))))
            .expect("r2 should add");
        let error = workflow
            .target_rating(&Value::Integer(3))
            .expect_err("two equal picks should be ambiguous");
        assert!(matches!(error, FlowError::Target(_)));
    }

    #[test]
    fn target_support_list_expected_sorted_output_types() {
        let mut workflow = sum_workflow();
        workflow
            .add_process("text", Arc::new(Constant::new(Value::from("x"))))
            .expect("text should add");
        assert_eq!(
            workflow.target_support_list(),
            vec![ValueType::Number, ValueType::Integer, ValueType::String]
        );
    }

    #[test]
    fn duplicate_expected_same_nodes_and_connections_without_caches() {
        let mut workflow = crate::load_workflow(
            "digraph dup { a [label=\"Constant(2)\"]; s [label=\"Sum\"]; a -> s; }",
            &crate::core_registry(),
        )
        .expect("workflow should load");
        workflow
            .evaluate(&Shell::new("s", "total"), QUERY)
            .expect("sum should evaluate");
        let copy = workflow
            .duplicate(&crate::core_registry())
            .expect("duplicate should succeed");
        assert_eq!(copy.node_ids(), workflow.node_ids());
        assert_eq!(copy.all_connections(), workflow.all_connections());
        assert!(!copy.has_cache(&Shell::new("s", "total")));
    }

    #[test]
    fn shell_walk_downstream_expected_connections_and_affects() {
        let workflow = sum_workflow();
        let reached = ShellWalk::downstream().run(&workflow, &Shell::new("a", "value"));
        assert_eq!(
            reached,
            vec![Shell::new("sum", "lhs"), Shell::new("sum", "total")]
        );
        let upstream = ShellWalk::upstream()
            .visit_once(true)
            .prune(|shell| shell.node == "sum")
            .run(&workflow, &Shell::new("sum", "total"));
        assert_eq!(
            upstream,
            vec![Shell::new("a", "value"), Shell::new("b", "value")]
        );
    }
}
