use crate::foundation::error::{GraphError, GraphResult};
use crate::foundation::ids::{InputRef, NodeId, OutputRef};
use crate::graph::model::NodeGraph;

/// Resolved link topology of a validated graph.
#[derive(Debug, Clone)]
pub(crate) struct Topology {
    /// Per node, per input socket: the linked producer output.
    origins: Vec<Vec<Option<OutputRef>>>,
    /// Per node, per output socket: linked consumer inputs, sorted.
    targets: Vec<Vec<Vec<InputRef>>>,
    /// Nodes reachable from the requested sinks.
    reachable: Vec<bool>,
}

impl Topology {
    pub(crate) fn origin(&self, input: InputRef) -> Option<OutputRef> {
        self.origins[input.node.index()][input.socket]
    }

    pub(crate) fn origins(&self, node: NodeId) -> &[Option<OutputRef>] {
        &self.origins[node.index()]
    }

    pub(crate) fn targets(&self, output: OutputRef) -> &[InputRef] {
        &self.targets[output.node.index()][output.socket]
    }

    pub(crate) fn is_reachable(&self, node: NodeId) -> bool {
        self.reachable.get(node.index()).copied().unwrap_or(false)
    }

    /// Distinct producer nodes of `node`, in input socket order.
    pub(crate) fn dependencies(&self, node: NodeId) -> Vec<NodeId> {
        let mut deps = Vec::new();
        for o in self.origins(node).iter().flatten() {
            if !deps.contains(&o.node) {
                deps.push(o.node);
            }
        }
        deps
    }
}

enum Visit {
    Enter(NodeId),
    Exit(NodeId),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

/// Resolve socket names and reject malformed graphs.
///
/// Checks, in order: sinks exist, every link endpoint is defined, each input has at most one link,
/// linked types are convertible, nodes reachable from a sink are supported, and the reachable
/// subgraph is acyclic.
pub(crate) fn resolve_topology(graph: &NodeGraph, sinks: &[NodeId]) -> GraphResult<Topology> {
    if sinks.is_empty() {
        return Err(GraphError::structure("no sink nodes requested"));
    }
    for &s in sinks {
        if !graph.contains(s) {
            return Err(GraphError::structure(format!("undefined sink node {s}")));
        }
    }

    let n = graph.len();
    let mut origins = Vec::with_capacity(n);
    let mut targets = Vec::with_capacity(n);
    for i in 0..n {
        let decl = &graph.node(NodeId(i as u32)).declaration;
        origins.push(vec![None; decl.inputs.len()]);
        targets.push(vec![Vec::new(); decl.outputs.len()]);
    }

    for link in graph.links() {
        for end in [link.from, link.to] {
            if !graph.contains(end) {
                return Err(GraphError::structure(format!(
                    "link {}.{} -> {}.{} references undefined node {end}",
                    link.from, link.from_socket, link.to, link.to_socket
                )));
            }
        }
        let from_decl = &graph.node(link.from).declaration;
        let to_decl = &graph.node(link.to).declaration;
        let out_socket = from_decl.output_index(&link.from_socket).ok_or_else(|| {
            GraphError::structure(format!(
                "node {} has no output socket '{}'",
                link.from, link.from_socket
            ))
        })?;
        let in_socket = to_decl.input_index(&link.to_socket).ok_or_else(|| {
            GraphError::structure(format!(
                "node {} has no input socket '{}'",
                link.to, link.to_socket
            ))
        })?;

        let slot = &mut origins[link.to.index()][in_socket];
        if slot.is_some() {
            return Err(GraphError::structure(format!(
                "input {}.{} is linked more than once",
                link.to, link.to_socket
            )));
        }
        let from_ty = from_decl.outputs[out_socket].ty;
        let to_ty = to_decl.inputs[in_socket].descriptor.expected_type;
        if !from_ty.can_convert_to(to_ty) {
            return Err(GraphError::structure(format!(
                "link {}.{} -> {}.{} cannot convert {from_ty:?} to {to_ty:?}",
                link.from, link.from_socket, link.to, link.to_socket
            )));
        }
        let from = OutputRef {
            node: link.from,
            socket: out_socket,
        };
        *slot = Some(from);
        targets[link.from.index()][out_socket].push(InputRef {
            node: link.to,
            socket: in_socket,
        });
    }
    for per_node in &mut targets {
        for t in per_node.iter_mut() {
            t.sort_unstable();
        }
    }

    let mut topo = Topology {
        origins,
        targets,
        reachable: vec![false; n],
    };
    mark_reachable(&mut topo, sinks);

    for i in 0..n {
        let id = NodeId(i as u32);
        if !topo.is_reachable(id) {
            continue;
        }
        let node = graph.node(id);
        if !node.kernel.is_supported() {
            return Err(GraphError::structure(format!(
                "node {id} ('{}') of kind '{}' is not supported",
                node.label,
                node.kernel.name()
            )));
        }
    }

    check_acyclic(&topo, sinks)?;
    Ok(topo)
}

fn mark_reachable(topo: &mut Topology, sinks: &[NodeId]) {
    let mut stack: Vec<NodeId> = sinks.to_vec();
    while let Some(node) = stack.pop() {
        if topo.reachable[node.index()] {
            continue;
        }
        topo.reachable[node.index()] = true;
        stack.extend(topo.origins[node.index()].iter().flatten().map(|o| o.node));
    }
}

fn check_acyclic(topo: &Topology, sinks: &[NodeId]) -> GraphResult<()> {
    let mut marks = vec![Mark::New; topo.origins.len()];
    let mut stack = Vec::<Visit>::new();
    for &sink in sinks {
        stack.push(Visit::Enter(sink));
        while let Some(v) = stack.pop() {
            match v {
                Visit::Enter(node) => match marks[node.index()] {
                    Mark::Done => {}
                    Mark::Active => {
                        return Err(GraphError::structure(format!(
                            "cycle detected through node {node}"
                        )));
                    }
                    Mark::New => {
                        marks[node.index()] = Mark::Active;
                        stack.push(Visit::Exit(node));
                        for dep in topo.dependencies(node).into_iter().rev() {
                            match marks[dep.index()] {
                                Mark::Active => {
                                    return Err(GraphError::structure(format!(
                                        "cycle detected through node {dep}"
                                    )));
                                }
                                Mark::New => stack.push(Visit::Enter(dep)),
                                Mark::Done => {}
                            }
                        }
                    }
                },
                Visit::Exit(node) => marks[node.index()] = Mark::Done,
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/unit/graph/validate.rs"]
mod tests;
