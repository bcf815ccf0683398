use crate::foundation::error::GraphResult;
use crate::foundation::ids::NodeId;
use crate::graph::model::NodeGraph;
use crate::graph::validate::{Topology, resolve_topology};
use std::collections::{HashMap, HashSet};

/// Linear execution order over the nodes needed by a set of sinks.
///
/// Every node appears after all of its dependencies. Among independent dependencies the one with
/// the smaller estimated number of simultaneously live buffers is scheduled first; ties go to the
/// smaller node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    order: Vec<NodeId>,
    position: HashMap<NodeId, usize>,
}

impl Schedule {
    /// Nodes in execution order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.order
    }

    /// Position of `node`, or `None` when no sink needs it.
    pub fn position(&self, node: NodeId) -> Option<usize> {
        self.position.get(&node).copied()
    }

    /// Return `true` when `node` is scheduled.
    pub fn contains(&self, node: NodeId) -> bool {
        self.position.contains_key(&node)
    }

    /// Number of scheduled nodes.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Return `true` when nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Validate `graph` and compute the schedule for `sinks`.
///
/// Pure function of its arguments.
pub fn compute_schedule(graph: &NodeGraph, sinks: &[NodeId]) -> GraphResult<Schedule> {
    let topo = resolve_topology(graph, sinks)?;
    Ok(schedule_topology(graph, &topo, sinks))
}

pub(crate) fn schedule_topology(graph: &NodeGraph, topo: &Topology, sinks: &[NodeId]) -> Schedule {
    let needs = estimate_buffer_needs(graph, topo, sinks);
    let order = post_order(topo, sinks, |deps| {
        deps.sort_by_key(|d| (needs.get(d).copied().unwrap_or(0), *d));
    });
    let position = order.iter().enumerate().map(|(i, &n)| (n, i)).collect();
    Schedule { order, position }
}

/// Estimate how many buffers are live at once while evaluating each node's subtree.
///
/// Dependencies are visited in increasing need order, as [`schedule_topology`] does, which keeps
/// `need(dep_i) + i` buffers live while the `i`-th dependency is computed; the node then needs
/// its own outputs as well.
fn estimate_buffer_needs(
    graph: &NodeGraph,
    topo: &Topology,
    sinks: &[NodeId],
) -> HashMap<NodeId, usize> {
    let order = post_order(topo, sinks, |deps| deps.sort_unstable());
    let mut needs = HashMap::<NodeId, usize>::with_capacity(order.len());
    for node in order {
        let mut dep_needs = topo
            .dependencies(node)
            .iter()
            .map(|d| needs.get(d).copied().unwrap_or(0))
            .collect::<Vec<_>>();
        dep_needs.sort_unstable();
        let subtree = dep_needs
            .iter()
            .enumerate()
            .map(|(i, n)| n + i)
            .max()
            .unwrap_or(0);
        let own = graph.node(node).declaration.outputs.len();
        needs.insert(node, subtree.max(own));
    }
    needs
}

enum Work {
    Enter(NodeId),
    Exit(NodeId),
}

/// Iterative dependency-first post-order from `sinks`. `order_deps` sorts the dependencies of a
/// node into visiting order. Requires an acyclic topology.
fn post_order(
    topo: &Topology,
    sinks: &[NodeId],
    order_deps: impl Fn(&mut Vec<NodeId>),
) -> Vec<NodeId> {
    let mut out = Vec::new();
    let mut entered = HashSet::<NodeId>::new();
    let mut stack = Vec::<Work>::new();
    for &sink in sinks {
        stack.push(Work::Enter(sink));
        while let Some(w) = stack.pop() {
            match w {
                Work::Enter(node) => {
                    if !entered.insert(node) {
                        continue;
                    }
                    stack.push(Work::Exit(node));
                    let mut deps = topo.dependencies(node);
                    order_deps(&mut deps);
                    for d in deps.into_iter().rev() {
                        if !entered.contains(&d) {
                            stack.push(Work::Enter(d));
                        }
                    }
                }
                Work::Exit(node) => out.push(node),
            }
        }
    }
    out
}

#[cfg(test)]
#[path = "../tests/unit/schedule.rs"]
mod tests;
