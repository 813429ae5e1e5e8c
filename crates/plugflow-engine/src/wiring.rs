//! Compatibility-rated automatic wiring between two nodes.
//!
//! For every output shell of the source node, the input shells of the
//! destination node are rated with the source attribute standing in for its
//! future value. Candidates are tried best first; an already wired candidate
//! rates half and is recorded as blocked when the connection is refused.
//! When nothing connects and at least two candidates were blocked, the last
//! blocked candidate is force reconnected.

use crate::{FlowError, Shell, Workflow};

/// Wires `source_node` into `destination_node` and returns the connections
/// made, in the order they were made.
pub fn wire_nodes(
    workflow: &mut Workflow,
    source_node: &str,
    destination_node: &str,
) -> Result<Vec<(Shell, Shell)>, FlowError> {
    let destination_inputs: Vec<Shell> = workflow
        .input_shells(destination_node)?
        .into_iter()
        .filter(|shell| {
            workflow
                .plug(shell)
                .is_some_and(|plug| !plug.is_readonly() && plug.provides_input())
        })
        .collect();
    let source_outputs = workflow.output_shells(source_node)?;

    let mut made = Vec::new();
    for source in &source_outputs {
        if let Some(destination) = wire_output(workflow, source, &destination_inputs)? {
            made.push((source.clone(), destination));
        }
    }

    if made.is_empty() {
        return Err(FlowError::Wiring {
            from: source_node.to_string(),
            to: destination_node.to_string(),
        });
    }
    Ok(made)
}

fn wire_output(
    workflow: &mut Workflow,
    source: &Shell,
    destinations: &[Shell],
) -> Result<Option<Shell>, FlowError> {
    let Some(source_plug) = workflow.plug(source) else {
        return Ok(None);
    };

    let mut rated: Vec<(u8, &Shell)> = Vec::new();
    for destination in destinations {
        let Some(plug) = workflow.plug(destination) else {
            continue;
        };
        let rate = source_plug.attribute.connection_affinity(&plug.attribute);
        if rate == 0 {
            continue;
        }
        let effective = if workflow.input_of(destination).is_some() {
            rate / 2
        } else {
            rate
        };
        rated.push((effective, destination));
    }
    // stable: equal rates keep declaration order
    rated.sort_by(|left, right| right.0.cmp(&left.0));

    let mut blocked: Vec<Shell> = Vec::new();
    for (rate, destination) in &rated {
        match workflow.connect(source, destination, false) {
            Ok(()) => {
                tracing::debug!(source = %source, destination = %destination, rate, "wired");
                return Ok(Some((*destination).clone()));
            }
            Err(FlowError::PlugAlreadyConnected { .. }) => blocked.push((*destination).clone()),
            Err(FlowError::PlugIncompatible { .. }) => continue,
            Err(error) => return Err(error),
        }
    }

    if blocked.len() < 2 {
        return Ok(None);
    }
    // the last blocked candidate gives up its upstream, whatever that was
    let Some(victim) = blocked.pop() else {
        return Ok(None);
    };
    tracing::debug!(
        source = %source,
        destination = %victim,
        previous = ?workflow.input_of(&victim),
        "force reconnecting blocked input"
    );
    workflow.connect(source, &victim, true)?;
    Ok(Some(victim))
}
