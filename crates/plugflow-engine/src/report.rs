use crate::{CallGraph, ProcessData};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanOrder {
    /// The requested process first, then its producers.
    #[default]
    RootFirst,
    /// Execution order: producers first, the requested process last.
    LeavesFirst,
}

/// Renders a call graph into human readable lines.
pub trait Report {
    fn make_report(&self, headline: Option<&str>) -> Vec<String>;
}

/// Plan-like description of how a value was produced.
pub struct Plan<'a> {
    call_graph: &'a CallGraph,
    order: PlanOrder,
    prune: Box<dyn Fn(&ProcessData) -> bool + 'a>,
}

impl<'a> Plan<'a> {
    pub fn new(call_graph: &'a CallGraph) -> Self {
        Self {
            call_graph,
            order: PlanOrder::default(),
            prune: Box::new(|_| false),
        }
    }

    pub fn with_order(mut self, order: PlanOrder) -> Self {
        self.order = order;
        self
    }

    /// Frames matching the predicate are left out of the plan.
    pub fn with_prune(mut self, prune: impl Fn(&ProcessData) -> bool + 'a) -> Self {
        self.prune = Box::new(prune);
        self
    }
}

impl Report for Plan<'_> {
    fn make_report(&self, headline: Option<&str>) -> Vec<String> {
        let reverse = self.order == PlanOrder::LeavesFirst;
        let calls = self.call_graph.to_call_list(reverse, self.prune.as_ref());

        let mut out = Vec::with_capacity(calls.len() + 1);
        if let Some(headline) = headline {
            out.push(headline.to_string());
        }
        for (index, (frame, consumer)) in calls.iter().enumerate() {
            let number = index + 1;
            let line = match consumer {
                Some(consumer) => {
                    let through = frame
                        .via
                        .as_ref()
                        .map(|via| via.plug.as_str())
                        .unwrap_or(frame.plug.as_str());
                    format!(
                        "{number}. {} provides {} through {} to {}",
                        frame.node,
                        frame.result_label(),
                        through,
                        consumer.noun
                    )
                }
                None => format!(
                    "{number}. {} {} {} when asked for {}",
                    frame.node,
                    frame.verb,
                    frame.result_label(),
                    frame.plug
                ),
            };
            out.push(line);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FrameStart, QUERY, Shell, Value};

    fn graph() -> CallGraph {
        let mut graph = CallGraph::new();
        graph.start_call(FrameStart {
            node: "b".to_string(),
            plug: "total".to_string(),
            mode: QUERY,
            noun: "sum".to_string(),
            verb: "adds up".to_string(),
            via: None,
        });
        graph.start_call(FrameStart {
            node: "a".to_string(),
            plug: "value".to_string(),
            mode: QUERY,
            noun: "constant".to_string(),
            verb: "yields".to_string(),
            via: Some(Shell::new("b", "lhs")),
        });
        graph.end_call(Ok(&Value::Integer(5))).expect("a should close");
        graph.end_call(Ok(&Value::Integer(5))).expect("b should close");
        graph
    }

    #[test]
    fn plan_root_first_expected_root_line_then_edge_line() {
        let graph = graph();
        let lines = Plan::new(&graph).make_report(None);
        assert_eq!(
            lines,
            vec![
                "1. b adds up 5 when asked for total".to_string(),
                "2. a provides 5 through lhs to sum".to_string(),
            ]
        );
    }

    #[test]
    fn plan_leaves_first_with_headline_expected_root_last() {
        let graph = graph();
        let lines = Plan::new(&graph)
            .with_order(PlanOrder::LeavesFirst)
            .make_report(Some("Plan for total"));
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "Plan for total");
        assert!(lines[1].starts_with("1. a provides"));
        assert!(lines[2].starts_with("2. b adds up"));
    }

    #[test]
    fn plan_pruned_frames_expected_omitted() {
        let graph = graph();
        let lines = Plan::new(&graph)
            .with_prune(|frame| frame.node == "a")
            .make_report(None);
        assert_eq!(lines, vec!["1. b adds up 5 when asked for total".to_string()]);
    }
}
