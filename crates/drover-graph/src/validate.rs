use std::collections::HashMap;

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::decl::{ControllerMeta, InputKind, OutputKind};
use crate::error::GraphError;

/// Result returned by [`validate`] on success.
#[derive(Debug)]
pub struct ResolvedGraph {
    /// Controller names in dependency order (writers before readers).
    pub topo_order: Vec<String>,
}

/// Validate a set of controller declarations before the runtime starts them.
///
/// Checks:
/// 1. Controller names are unique
/// 2. At most one primary input per controller
/// 3. No two controllers claim the same output type when either claim is
///    exclusive
/// 4. The writer→reader graph is acyclic (a controller watching its own
///    output for garbage collection is not a dependency edge)
pub fn validate(controllers: &[ControllerMeta]) -> Result<ResolvedGraph, GraphError> {
    let mut errors: Vec<GraphError> = Vec::new();

    let mut seen_names: HashMap<&str, ()> = HashMap::new();
    for ctrl in controllers {
        if seen_names.insert(ctrl.name.as_str(), ()).is_some() {
            errors.push(GraphError::DuplicateController(ctrl.name.clone()));
        }
        let primaries = ctrl
            .inputs
            .iter()
            .filter(|input| input.input_kind == InputKind::Primary)
            .count();
        if primaries > 1 {
            errors.push(GraphError::MultiplePrimaryInputs { controller: ctrl.name.clone() });
        }
    }

    // Output ownership: exclusive claims conflict with any other claim.
    let mut writers: HashMap<(drover_domain::Namespace, &str), (&str, OutputKind)> =
        HashMap::new();
    for ctrl in controllers {
        for output in &ctrl.outputs {
            let key = (output.namespace, output.kind);
            match writers.get(&key) {
                Some((first, kind))
                    if *kind == OutputKind::Exclusive
                        || output.output_kind == OutputKind::Exclusive =>
                {
                    errors.push(GraphError::ExclusiveOutputConflict {
                        kind: output.kind.to_string(),
                        first: first.to_string(),
                        second: ctrl.name.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    writers.insert(key, (ctrl.name.as_str(), output.output_kind));
                }
            }
        }
    }

    if !errors.is_empty() {
        if errors.len() == 1 {
            return Err(errors.remove(0));
        }
        return Err(GraphError::Multiple(errors));
    }

    // --- Dependency graph: edge from the writer of a type to each reader ---
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let node_map: HashMap<&str, NodeIndex> = controllers
        .iter()
        .map(|c| (c.name.as_str(), graph.add_node(c.name.as_str())))
        .collect();

    for ctrl in controllers {
        for input in &ctrl.inputs {
            let Some((writer, _)) = writers.get(&(input.namespace, input.kind)) else {
                // Externally produced input; nothing to order against.
                continue;
            };
            if *writer == ctrl.name {
                continue; // own-output watch, not a dependency
            }
            graph.add_edge(node_map[writer], node_map[ctrl.name.as_str()], ());
        }
    }

    if is_cyclic_directed(&graph) {
        return Err(GraphError::CycleDetected);
    }

    let topo = petgraph::algo::toposort(&graph, None).map_err(|_| GraphError::CycleDetected)?;
    let topo_order = topo.iter().map(|idx| graph[*idx].to_string()).collect();

    Ok(ResolvedGraph { topo_order })
}
