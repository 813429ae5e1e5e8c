use crate::{EvalMode, FlowError, Shell, Value};
use std::time::{Duration, Instant};

/// One evaluation frame: a process asked for one of its plugs.
#[derive(Clone, Debug)]
pub struct ProcessData {
    pub node: String,
    pub plug: String,
    pub mode: EvalMode,
    pub noun: String,
    pub verb: String,
    /// Input shell that pulled this value through a connection, if any.
    pub via: Option<Shell>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    /// Position among the parent's children, in call order.
    pub index: usize,
    started: Instant,
    pub elapsed: Option<Duration>,
}

impl ProcessData {
    pub fn shell(&self) -> Shell {
        Shell::new(self.node.clone(), self.plug.clone())
    }

    pub fn result_label(&self) -> String {
        match (&self.result, &self.error) {
            (Some(value), _) => value.to_string(),
            (None, Some(error)) => format!("<error: {error}>"),
            (None, None) => "<pending>".to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct FrameStart {
    pub node: String,
    pub plug: String,
    pub mode: EvalMode,
    pub noun: String,
    pub verb: String,
    pub via: Option<Shell>,
}

/// Trace of the frames opened during one top-level evaluation. Frames are
/// opened in pull order and closed in LIFO order.
#[derive(Clone, Debug, Default)]
pub struct CallGraph {
    frames: Vec<ProcessData>,
    stack: Vec<usize>,
    root: Option<usize>,
}

impl CallGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_call(&mut self, start: FrameStart) -> usize {
        let parent = self.stack.last().copied();
        let id = self.frames.len();
        let index = match parent {
            Some(parent) => {
                let siblings = &mut self.frames[parent].children;
                siblings.push(id);
                siblings.len() - 1
            }
            None => 0,
        };
        if parent.is_none() && self.root.is_none() {
            self.root = Some(id);
        }
        tracing::debug!(
            node = %start.node,
            plug = %start.plug,
            depth = self.stack.len(),
            "call frame opened"
        );
        self.frames.push(ProcessData {
            node: start.node,
            plug: start.plug,
            mode: start.mode,
            noun: start.noun,
            verb: start.verb,
            via: start.via,
            result: None,
            error: None,
            parent,
            children: Vec::new(),
            index,
            started: Instant::now(),
            elapsed: None,
        });
        self.stack.push(id);
        id
    }

    /// Closes the innermost frame, recording the outcome.
    pub fn end_call(&mut self, outcome: Result<&Value, &FlowError>) -> Result<(), FlowError> {
        let id = self.stack.pop().ok_or_else(|| {
            FlowError::CallGraph("end_call without an open frame".to_string())
        })?;
        let frame = &mut self.frames[id];
        match outcome {
            Ok(value) => frame.result = Some(value.clone()),
            Err(error) => frame.error = Some(error.to_string()),
        }
        frame.elapsed = Some(frame.started.elapsed());
        tracing::debug!(
            node = %frame.node,
            plug = %frame.plug,
            failed = frame.error.is_some(),
            "call frame closed"
        );
        Ok(())
    }

    pub fn root(&self) -> Option<&ProcessData> {
        self.root.map(|id| &self.frames[id])
    }

    pub fn frame(&self, id: usize) -> Option<&ProcessData> {
        self.frames.get(id)
    }

    pub fn frames(&self) -> &[ProcessData] {
        &self.frames
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Flattens the tree into `(frame, consumer)` pairs.
    ///
    /// With `reverse` the list is in execution order: the children of every
    /// frame are visited from the last call to the first, each before its
    /// consumer, and the root comes last. Without `reverse` the list starts at
    /// the root. Pruned frames are dropped and their producers report to the
    /// pruned frame's consumer instead.
    pub fn to_call_list(
        &self,
        reverse: bool,
        prune: &dyn Fn(&ProcessData) -> bool,
    ) -> Vec<(&ProcessData, Option<&ProcessData>)> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.collect_predecessors(root, None, prune, &mut out);
        }
        if !reverse {
            out.reverse();
        }
        out
    }

    fn collect_predecessors<'a>(
        &'a self,
        id: usize,
        consumer: Option<usize>,
        prune: &dyn Fn(&ProcessData) -> bool,
        out: &mut Vec<(&'a ProcessData, Option<&'a ProcessData>)>,
    ) {
        let frame = &self.frames[id];
        let pruned = prune(frame);
        let next_consumer = if pruned { consumer } else { Some(id) };
        for child in frame.children.iter().rev() {
            self.collect_predecessors(*child, next_consumer, prune, out);
        }
        if !pruned {
            out.push((frame, consumer.map(|consumer| &self.frames[consumer])));
        }
    }
}
