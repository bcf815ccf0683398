use crate::domain::{Domain, Size};
use crate::foundation::ids::{InputRef, NodeId, OutputRef, ResultId};
use crate::graph::model::NodeGraph;
use crate::graph::validate::Topology;
use crate::result::ResultStore;
use std::collections::HashMap;

/// Read-only context for fusion decisions.
pub(crate) struct CompileView<'a> {
    pub(crate) graph: &'a NodeGraph,
    pub(crate) topo: &'a Topology,
    pub(crate) results: &'a ResultStore,
    pub(crate) compositing_size: Size,
}

/// In-progress compile unit plus the output-to-result maps of everything compiled so far.
#[derive(Debug, Default)]
pub(crate) struct CompileState {
    node_results: HashMap<OutputRef, ResultId>,
    pixel_results: HashMap<OutputRef, ResultId>,
    unit: Vec<NodeId>,
    unit_single_value: bool,
    unit_domain: Option<Domain>,
}

impl CompileState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn unit(&self) -> &[NodeId] {
        &self.unit
    }

    pub(crate) fn unit_is_single_value(&self) -> bool {
        self.unit_single_value
    }

    pub(crate) fn unit_domain(&self) -> Option<Domain> {
        self.unit_domain
    }

    /// Whether the current unit must be compiled before `node` is handled.
    ///
    /// Pure: it never mutates the state.
    pub(crate) fn should_flush(&self, node: NodeId, view: &CompileView<'_>) -> bool {
        if self.unit.is_empty() {
            return false;
        }
        if !view.graph.node(node).is_pixel() {
            return true;
        }
        if self.unit_single_value != self.node_is_single_value(node, view) {
            return true;
        }
        let node_domain = self.compute_node_domain(node, view);
        let unit_domain = self.unit_domain.unwrap_or_else(Domain::identity);
        !node_domain.is_identity() && !unit_domain.is_identity() && node_domain != unit_domain
    }

    /// Append a per-pixel node to the unit.
    pub(crate) fn add(&mut self, node: NodeId, view: &CompileView<'_>) {
        let node_domain = self.compute_node_domain(node, view);
        if self.unit.is_empty() {
            self.unit_single_value = self.node_is_single_value(node, view);
        }
        self.unit.push(node);
        if self.unit_domain.is_none_or(|d| d.is_identity()) {
            self.unit_domain = Some(node_domain);
        }
    }

    /// Hand out the unit and start an empty one.
    pub(crate) fn take_unit(&mut self) -> (Vec<NodeId>, bool) {
        let unit = std::mem::take(&mut self.unit);
        let single = std::mem::replace(&mut self.unit_single_value, false);
        self.unit_domain = None;
        (unit, single)
    }

    pub(crate) fn map_node_output(&mut self, output: OutputRef, result: ResultId) {
        self.node_results.insert(output, result);
    }

    pub(crate) fn map_pixel_output(&mut self, output: OutputRef, result: ResultId) {
        self.pixel_results.insert(output, result);
    }

    /// Result of a producer output, whether it was compiled standalone or fused.
    pub(crate) fn result_from_output(&self, output: OutputRef) -> Option<ResultId> {
        self.node_results
            .get(&output)
            .or_else(|| self.pixel_results.get(&output))
            .copied()
    }

    /// A node computes a single value when every input does: unit members follow the unit,
    /// compiled producers follow their results, unlinked inputs are single unless implicit.
    pub(crate) fn node_is_single_value(&self, node: NodeId, view: &CompileView<'_>) -> bool {
        let decl = &view.graph.node(node).declaration;
        for (socket, input) in decl.inputs.iter().enumerate() {
            match view.topo.origin(InputRef { node, socket }) {
                Some(o) if self.unit.contains(&o.node) => {
                    if !self.unit_single_value {
                        return false;
                    }
                }
                Some(o) => match self.result_from_output(o) {
                    Some(r) if view.results.is_single_value(r) => {}
                    _ => return false,
                },
                None => {
                    if input.descriptor.implicit_fallback.is_some() {
                        return false;
                    }
                }
            }
        }
        true
    }

    /// Domain a node would infer if it were materialized as an operation now.
    pub(crate) fn compute_node_domain(&self, node: NodeId, view: &CompileView<'_>) -> Domain {
        let decl = &view.graph.node(node).declaration;
        let mut best: Option<(u32, Domain)> = None;
        for (socket, input) in decl.inputs.iter().enumerate() {
            if !input.descriptor.drives_domain() {
                continue;
            }
            let domain = match view.topo.origin(InputRef { node, socket }) {
                Some(o) if self.unit.contains(&o.node) => {
                    if self.unit_single_value {
                        continue;
                    }
                    self.unit_domain.unwrap_or_else(Domain::identity)
                }
                Some(o) => match self.result_from_output(o) {
                    Some(r) if !view.results.is_single_value(r) => view.results.domain(r),
                    _ => continue,
                },
                None if input.descriptor.implicit_fallback.is_some() => {
                    Domain::new(view.compositing_size).unwrap_or_else(|_| Domain::identity())
                }
                None => continue,
            };
            let priority = input.descriptor.domain_priority;
            if best.is_none_or(|(p, _)| priority < p) {
                best = Some((priority, domain));
            }
        }
        best.map_or_else(Domain::identity, |(_, d)| d)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/state.rs"]
mod tests;
