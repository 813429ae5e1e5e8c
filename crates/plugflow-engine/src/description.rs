use crate::{FlowError, ProcessArgs, ProcessRegistry, Value, Workflow, wire_nodes};
use graphviz_rust::dot_structures::{
    Attribute, Edge as DotEdge, EdgeTy, Graph as DotGraph, Id, Node as DotNode, NodeId, Stmt,
    Vertex,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const DEFAULT_WORKFLOW_NAME: &str = "workflow";

#[derive(Clone, Debug, PartialEq)]
pub struct NodeDescription {
    pub id: String,
    pub type_name: String,
    pub args: ProcessArgs,
}

/// Nodes and edges of a workflow description, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowDescription {
    pub name: String,
    pub nodes: Vec<NodeDescription>,
    pub edges: Vec<(String, String)>,
}

impl WorkflowDescription {
    /// Instantiates every node through `registry` and wires each edge.
    pub fn build(&self, registry: &ProcessRegistry) -> Result<Workflow, FlowError> {
        let mut workflow = Workflow::new(self.name.clone());
        for node in &self.nodes {
            let process = registry.create(&node.type_name, &node.id, &node.args)?;
            workflow.add_node(node.id.clone(), node.type_name.clone(), node.args.clone(), process)?;
        }
        for (source, destination) in &self.edges {
            let made = wire_nodes(&mut workflow, source, destination)?;
            tracing::debug!(
                workflow = %self.name,
                source = %source,
                destination = %destination,
                connections = made.len(),
                "edge wired"
            );
        }
        Ok(workflow)
    }
}

pub fn parse_description(source: &str) -> Result<WorkflowDescription, FlowError> {
    let graph = graphviz_rust::parse(source).map_err(FlowError::DescriptionParse)?;
    let (id, stmts) = match graph {
        DotGraph::DiGraph { id, stmts, .. } => (id, stmts),
        DotGraph::Graph { .. } => {
            return Err(FlowError::InvalidDescription(
                "only 'digraph' descriptions are supported".to_string(),
            ));
        }
    };

    let mut collector = Collector::default();
    for stmt in &stmts {
        match stmt {
            Stmt::Node(node) => collector.node(node)?,
            Stmt::Edge(edge) => collector.edge(edge)?,
            Stmt::Subgraph(_) => {
                return Err(FlowError::InvalidDescription(
                    "subgraphs are not supported in workflow descriptions".to_string(),
                ));
            }
            _ => {}
        }
    }

    let mut nodes = Vec::with_capacity(collector.order.len());
    for id in &collector.order {
        let attrs = collector.attrs.get(id).cloned().unwrap_or_default();
        nodes.push(node_description(id, &attrs)?);
    }
    for (source, destination) in &collector.edges {
        for endpoint in [source, destination] {
            if !collector.attrs.contains_key(endpoint) {
                return Err(FlowError::InvalidDescription(format!(
                    "edge references undeclared node '{endpoint}'"
                )));
            }
        }
    }

    Ok(WorkflowDescription {
        name: graph_name(&id),
        nodes,
        edges: collector.edges,
    })
}

/// Parses `source` and builds the workflow it describes.
pub fn load_workflow(source: &str, registry: &ProcessRegistry) -> Result<Workflow, FlowError> {
    parse_description(source)?.build(registry)
}

/// Like [`load_workflow`] but names the workflow after the file stem.
pub fn load_workflow_from_file(
    path: &Path,
    registry: &ProcessRegistry,
) -> Result<Workflow, FlowError> {
    let source = fs::read_to_string(path)?;
    let mut description = parse_description(&source)?;
    if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
        description.name = stem.to_string();
    }
    description.build(registry)
}

#[derive(Default)]
struct Collector {
    order: Vec<String>,
    attrs: BTreeMap<String, BTreeMap<String, String>>,
    edges: Vec<(String, String)>,
}

impl Collector {
    fn node(&mut self, node: &DotNode) -> Result<(), FlowError> {
        let id = node_id(&node.id)?;
        if !self.attrs.contains_key(&id) {
            self.order.push(id.clone());
        }
        let entry = self.attrs.entry(id).or_default();
        for Attribute(key, value) in &node.attributes {
            entry.insert(id_to_string(key)?, id_to_string(value)?);
        }
        Ok(())
    }

    fn edge(&mut self, edge: &DotEdge) -> Result<(), FlowError> {
        let vertices = match &edge.ty {
            EdgeTy::Pair(from, to) => vec![vertex_id(from)?, vertex_id(to)?],
            EdgeTy::Chain(chain) => chain
                .iter()
                .map(vertex_id)
                .collect::<Result<Vec<_>, _>>()?,
        };
        for pair in vertices.windows(2) {
            self.edges.push((pair[0].clone(), pair[1].clone()));
        }
        Ok(())
    }
}

fn node_description(
    id: &str,
    attrs: &BTreeMap<String, String>,
) -> Result<NodeDescription, FlowError> {
    let label = attrs.get("label").map(|label| label.trim()).unwrap_or_default();
    if label.is_empty() {
        return Err(FlowError::InvalidDescription(format!(
            "node '{id}' has no label naming its process type"
        )));
    }

    let (type_name, inline) = match label.split_once('(') {
        Some((name, rest)) => (name.trim(), Some(rest.trim_end().trim_end_matches(')'))),
        None => (label, None),
    };
    if type_name.is_empty() {
        return Err(FlowError::InvalidDescription(format!(
            "node '{id}' label '{label}' has an empty process type"
        )));
    }

    let mut args = ProcessArgs::default();
    match attrs.get("toplabel") {
        Some(top) => args.args = parse_positional(top),
        None => {
            if let Some(inline) = inline {
                for item in split_items(inline) {
                    match item.split_once('=') {
                        Some((key, value)) => {
                            args.kwargs.insert(key.trim().to_string(), parse_item(value));
                        }
                        None => args.args.push(parse_item(item)),
                    }
                }
            }
        }
    }
    if let Some(bottom) = attrs.get("bottomlabel") {
        for item in split_items(bottom) {
            let Some((key, value)) = item.split_once('=') else {
                tracing::warn!(node = id, item, "keyword argument without '=' ignored");
                continue;
            };
            args.kwargs.insert(key.trim().to_string(), parse_item(value));
        }
    }

    Ok(NodeDescription {
        id: id.to_string(),
        type_name: type_name.to_string(),
        args,
    })
}

fn parse_positional(raw: &str) -> Vec<Value> {
    split_items(raw).map(parse_item).collect()
}

fn split_items(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|item| !item.is_empty())
}

fn parse_item(raw: &str) -> Value {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Value::String(inner.to_string());
        }
    }
    Value::parse_simple(trimmed)
}

fn graph_name(id: &Id) -> String {
    match id {
        Id::Anonymous(_) => DEFAULT_WORKFLOW_NAME.to_string(),
        other => id_to_string(other)
            .ok()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_WORKFLOW_NAME.to_string()),
    }
}

fn vertex_id(vertex: &Vertex) -> Result<String, FlowError> {
    match vertex {
        Vertex::N(node) => node_id(node),
        Vertex::S(_) => Err(FlowError::InvalidDescription(
            "subgraph vertices in edges are not supported".to_string(),
        )),
    }
}

fn node_id(node: &NodeId) -> Result<String, FlowError> {
    if node.1.is_some() {
        return Err(FlowError::InvalidDescription(
            "ports in node identifiers are not supported".to_string(),
        ));
    }
    id_to_string(&node.0)
}

fn id_to_string(id: &Id) -> Result<String, FlowError> {
    match id {
        Id::Plain(value) | Id::Anonymous(value) => Ok(value.clone()),
        Id::Escaped(value) => {
            let unquoted = value
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
                .ok_or_else(|| {
                    FlowError::InvalidDescription(format!(
                        "escaped string '{value}' is missing quotes"
                    ))
                })?;
            Ok(unquoted.replace("\\\"", "\""))
        }
        Id::Html(_) => Err(FlowError::InvalidDescription(
            "HTML labels are not supported".to_string(),
        )),
    }
}
