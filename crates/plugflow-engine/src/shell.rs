use crate::{Value, Workflow};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

/// Bound reference to one plug of one node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Shell {
    pub node: String,
    pub plug: String,
}

impl Shell {
    pub fn new(node: impl Into<String>, plug: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            plug: plug.into(),
        }
    }

    /// Parses `node.plug`. The node id is everything before the first dot so
    /// nested plug names such as `inner.value` survive.
    pub fn parse(raw: &str) -> Option<Self> {
        let (node, plug) = raw.split_once('.')?;
        if node.is_empty() || plug.is_empty() {
            return None;
        }
        Some(Self::new(node, plug))
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.plug)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub enum CacheSlot {
    #[default]
    Empty,
    Cached(Value),
    Error(String),
}

impl CacheSlot {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Cached(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WalkDirection {
    Upstream,
    #[default]
    Downstream,
}

pub type ShellPredicate = Arc<dyn Fn(&Shell) -> bool + Send + Sync>;

/// Options for traversing the dataflow around a shell. Neighbours are
/// connected shells plus plugs linked through affects relations.
#[derive(Clone, Default)]
pub struct ShellWalk {
    pub direction: WalkDirection,
    pub visit_once: bool,
    pub branch_first: bool,
    stop_at: Option<ShellPredicate>,
    prune: Option<ShellPredicate>,
}

impl ShellWalk {
    pub fn upstream() -> Self {
        Self {
            direction: WalkDirection::Upstream,
            ..Self::default()
        }
    }

    pub fn downstream() -> Self {
        Self::default()
    }

    pub fn visit_once(mut self, value: bool) -> Self {
        self.visit_once = value;
        self
    }

    pub fn branch_first(mut self, value: bool) -> Self {
        self.branch_first = value;
        self
    }

    /// Shells matching the predicate are yielded but not expanded.
    pub fn stop_at(mut self, predicate: impl Fn(&Shell) -> bool + Send + Sync + 'static) -> Self {
        self.stop_at = Some(Arc::new(predicate));
        self
    }

    /// Shells matching the predicate are expanded but not yielded.
    pub fn prune(mut self, predicate: impl Fn(&Shell) -> bool + Send + Sync + 'static) -> Self {
        self.prune = Some(Arc::new(predicate));
        self
    }

    /// Walks from `start` (excluded) and returns the reached shells in visit
    /// order. Depth first unless `branch_first` is set. Cycles are always cut,
    /// `visit_once` additionally suppresses shells reachable on several paths.
    pub fn run(&self, workflow: &Workflow, start: &Shell) -> Vec<Shell> {
        let mut out = Vec::new();
        let mut seen: BTreeSet<Shell> = BTreeSet::new();
        let mut pending: VecDeque<(Shell, Vec<Shell>)> = self
            .neighbours(workflow, start)
            .into_iter()
            .map(|next| (next, vec![start.clone()]))
            .collect();

        while let Some((shell, path)) = pending.pop_front() {
            if path.contains(&shell) {
                continue;
            }
            if self.visit_once && !seen.insert(shell.clone()) {
                continue;
            }
            let pruned = self.prune.as_ref().is_some_and(|prune| prune(&shell));
            if !pruned {
                out.push(shell.clone());
            }
            if self.stop_at.as_ref().is_some_and(|stop| stop(&shell)) {
                continue;
            }

            let mut next_path = path;
            next_path.push(shell.clone());
            let neighbours = self.neighbours(workflow, &shell);
            if self.branch_first {
                for next in neighbours {
                    pending.push_back((next, next_path.clone()));
                }
            } else {
                for next in neighbours.into_iter().rev() {
                    pending.push_front((next, next_path.clone()));
                }
            }
        }
        out
    }

    fn neighbours(&self, workflow: &Workflow, shell: &Shell) -> Vec<Shell> {
        let mut out = Vec::new();
        match self.direction {
            WalkDirection::Downstream => {
                out.extend(workflow.outputs_of(shell).iter().cloned());
                if let Some(plug) = workflow.plug(shell) {
                    out.extend(
                        plug.affects
                            .iter()
                            .map(|name| Shell::new(shell.node.clone(), name.clone())),
                    );
                }
            }
            WalkDirection::Upstream => {
                if let Some(source) = workflow.input_of(shell) {
                    out.push(source.clone());
                }
                if let Some(plug) = workflow.plug(shell) {
                    out.extend(
                        plug.affected_by
                            .iter()
                            .map(|name| Shell::new(shell.node.clone(), name.clone())),
                    );
                }
            }
        }
        out
    }
}
