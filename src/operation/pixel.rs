use crate::backend::{
    ExecutionTarget, InputBinding, Kernel, KernelBindings, KernelGraph, KernelNode, KernelOperand,
    KernelOutput, OperandSource, OutputBinding,
};
use crate::domain::{Domain, Size};
use crate::foundation::error::{GraphError, GraphResult};
use crate::foundation::ids::{InputRef, NodeId, OutputRef, ResultId};
use crate::graph::model::NodeGraph;
use crate::graph::validate::Topology;
use crate::operation::descriptor::{ImplicitInput, InputDescriptor, InputRealizationMode};
use crate::operation::{EvalEnv, OperationInput};
use crate::result::value::{ImageBuffer, ResultType, Value};
use crate::schedule::Schedule;
use std::collections::HashMap;
use std::sync::Arc;

/// What a declared input of a fused unit is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum DeclaredInputKey {
    /// An output of a node outside the unit.
    Output(OutputRef),
    /// A synthesized implicit input.
    Implicit(ImplicitInput),
}

#[derive(Clone, Debug)]
pub(crate) struct DeclaredInput {
    pub(crate) key: DeclaredInputKey,
    pub(crate) name: String,
    pub(crate) descriptor: InputDescriptor,
    /// Sockets inside the unit reading this input.
    pub(crate) internal_count: u32,
}

#[derive(Clone, Debug)]
pub(crate) struct DeclaredOutput {
    pub(crate) source: OutputRef,
    pub(crate) ty: ResultType,
    /// Consumer sockets outside the unit, plus one for a preview.
    pub(crate) reference_count: u32,
}

/// Boundary bookkeeping and kernel description of one compile unit.
#[derive(Debug)]
pub(crate) struct PixelPlan {
    pub(crate) nodes: Vec<NodeId>,
    pub(crate) inputs: Vec<DeclaredInput>,
    pub(crate) outputs: Vec<DeclaredOutput>,
    /// Previewed nodes and the declared output holding their first output.
    pub(crate) previews: Vec<(NodeId, usize)>,
    pub(crate) kernel: KernelGraph,
}

// Socket priorities are packed below the unit position.
const POSITION_SHIFT: u32 = 16;

impl PixelPlan {
    /// Classify every link touching `unit`.
    ///
    /// Outside-to-inside links become declared inputs keyed by the producer output, so internal
    /// consumers of one external output share one input. Inside-to-outside links, and previews,
    /// become declared outputs. Inside links are wired within the kernel.
    pub(crate) fn build(
        graph: &NodeGraph,
        topo: &Topology,
        schedule: &Schedule,
        unit: &[NodeId],
        single_value: bool,
    ) -> GraphResult<Self> {
        let position: HashMap<NodeId, usize> =
            unit.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let mut inputs = Vec::<DeclaredInput>::new();
        let mut input_index = HashMap::<DeclaredInputKey, usize>::new();
        let mut kernel = KernelGraph {
            single_value,
            ..KernelGraph::default()
        };

        for (pos, &node) in unit.iter().enumerate() {
            let gnode = graph.node(node);
            let function = gnode.pixel.clone().ok_or_else(|| {
                GraphError::evaluation(format!("node {node} in a compile unit is not per-pixel"))
            })?;
            let mut operands = Vec::with_capacity(gnode.declaration.inputs.len());
            for (socket, decl) in gnode.declaration.inputs.iter().enumerate() {
                let ty = decl.descriptor.expected_type;
                let origin = topo.origin(InputRef { node, socket });
                let key = match origin {
                    Some(o) if position.contains_key(&o.node) => {
                        operands.push(KernelOperand {
                            source: OperandSource::Node {
                                node: position[&o.node],
                                output: o.socket,
                            },
                            ty,
                        });
                        continue;
                    }
                    Some(o) => DeclaredInputKey::Output(o),
                    None => match decl.descriptor.implicit_fallback {
                        Some(implicit) => DeclaredInputKey::Implicit(implicit),
                        None => {
                            operands.push(KernelOperand {
                                source: OperandSource::Constant(decl.default),
                                ty,
                            });
                            continue;
                        }
                    },
                };

                let priority = ((pos as u32) << POSITION_SHIFT)
                    | decl.descriptor.domain_priority.min((1 << POSITION_SHIFT) - 1);
                let index = *input_index.entry(key).or_insert_with(|| {
                    let (name, source_ty) = match key {
                        DeclaredInputKey::Output(o) => {
                            let producer = graph.node(o.node);
                            let out = &producer.declaration.outputs[o.socket];
                            (format!("{}.{}", producer.label, out.name), out.ty)
                        }
                        DeclaredInputKey::Implicit(i) => (format!("{i:?}"), ResultType::Vector2),
                    };
                    inputs.push(DeclaredInput {
                        key,
                        name,
                        descriptor: InputDescriptor {
                            expected_type: source_ty,
                            realization_mode: InputRealizationMode::None,
                            domain_priority: priority,
                            expects_single_value: decl.descriptor.expects_single_value,
                            implicit_fallback: None,
                            skip_type_conversion: true,
                        },
                        internal_count: 0,
                    });
                    kernel.inputs.push(source_ty);
                    inputs.len() - 1
                });
                let declared = &mut inputs[index];
                declared.internal_count += 1;
                let d = &mut declared.descriptor;
                d.realization_mode = d.realization_mode.max(decl.descriptor.realization_mode);
                d.domain_priority = d.domain_priority.min(priority);
                d.expects_single_value &= decl.descriptor.expects_single_value;
                operands.push(KernelOperand {
                    source: OperandSource::Input(index),
                    ty,
                });
            }
            kernel.nodes.push(KernelNode {
                node,
                label: gnode.label.clone(),
                function,
                operands,
                output_types: gnode.declaration.outputs.iter().map(|o| o.ty).collect(),
            });
        }

        let mut outputs = Vec::<DeclaredOutput>::new();
        let mut previews = Vec::new();
        for (pos, &node) in unit.iter().enumerate() {
            let gnode = graph.node(node);
            for (socket, decl) in gnode.declaration.outputs.iter().enumerate() {
                let out = OutputRef { node, socket };
                let external = topo
                    .targets(out)
                    .iter()
                    .filter(|t| schedule.contains(t.node) && !position.contains_key(&t.node))
                    .count() as u32;
                let preview = gnode.preview && socket == 0;
                if external == 0 && !preview {
                    continue;
                }
                if preview {
                    previews.push((node, outputs.len()));
                }
                kernel.outputs.push(KernelOutput {
                    node: pos,
                    socket,
                    ty: decl.ty,
                });
                outputs.push(DeclaredOutput {
                    source: out,
                    ty: decl.ty,
                    reference_count: external + u32::from(preview),
                });
            }
        }

        Ok(Self {
            nodes: unit.to_vec(),
            inputs,
            outputs,
            previews,
            kernel,
        })
    }
}

/// Operation running one fused compile unit as a single kernel dispatch.
pub(crate) struct PixelOperation {
    nodes: Vec<NodeId>,
    kernel: Arc<dyn Kernel>,
    target: ExecutionTarget,
    internal_counts: Vec<u32>,
    previews: Vec<(NodeId, usize)>,
}

impl PixelOperation {
    pub(crate) fn new(plan: &PixelPlan, kernel: Arc<dyn Kernel>, target: ExecutionTarget) -> Self {
        Self {
            nodes: plan.nodes.clone(),
            kernel,
            target,
            internal_counts: plan.inputs.iter().map(|i| i.internal_count).collect(),
            previews: plan.previews.clone(),
        }
    }

    pub(crate) fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub(crate) fn target(&self) -> ExecutionTarget {
        self.target
    }

    pub(crate) fn previews(&self) -> &[(NodeId, usize)] {
        &self.previews
    }

    /// Number of sockets inside the unit that read declared input `input`.
    pub(crate) fn internal_reference_count(&self, input: usize) -> u32 {
        self.internal_counts.get(input).copied().unwrap_or(0)
    }

    pub(crate) fn internal_reference_counts(&self) -> &[u32] {
        &self.internal_counts
    }

    pub(crate) fn execute(
        &self,
        label: &str,
        domain: Domain,
        inputs: &[OperationInput],
        outputs: &[ResultId],
        env: &mut EvalEnv<'_>,
    ) -> GraphResult<()> {
        let sources = inputs
            .iter()
            .map(|i| {
                i.processed().ok_or_else(|| {
                    GraphError::evaluation(format!("input '{}' of '{label}' is unmapped", i.name))
                })
            })
            .collect::<GraphResult<Vec<_>>>()?;
        let single = sources.iter().all(|&id| env.results.is_single_value(id));

        for &o in outputs {
            if single {
                env.results.allocate_single_value(o)?;
            } else {
                env.results
                    .allocate_image(o, domain, env.opts.pooled_intermediates)?;
            }
        }
        let size = if single { Size::new(1, 1) } else { domain.size() };

        let mut images: Vec<Option<ImageBuffer>> =
            outputs.iter().map(|&o| env.results.take_image(o)).collect();
        let mut singles: Vec<Value> = outputs
            .iter()
            .map(|&o| Value::zero(env.results.ty(o)))
            .collect();

        let outcome = (|| {
            let input_bindings = sources
                .iter()
                .map(|&id| match env.results.single_value(id) {
                    Some(v) => Ok(InputBinding::Single(v)),
                    None => env
                        .results
                        .image(id)
                        .map(InputBinding::Image)
                        .ok_or_else(|| {
                            GraphError::evaluation(format!("input {id:?} of '{label}' is unallocated"))
                        }),
                })
                .collect::<GraphResult<Vec<_>>>()?;
            let output_bindings = images
                .iter_mut()
                .zip(singles.iter_mut())
                .map(|(img, v)| match img {
                    Some(img) => OutputBinding::Image(img),
                    None => OutputBinding::Single(v),
                })
                .collect();
            let mut bindings = KernelBindings {
                size,
                inputs: input_bindings,
                outputs: output_bindings,
            };
            self.kernel.dispatch(&mut bindings)
        })();

        for (&o, img) in outputs.iter().zip(images) {
            if let Some(img) = img {
                env.results.restore_image(o, img);
            }
        }
        let report = outcome?;
        if single {
            for (&o, v) in outputs.iter().zip(singles) {
                env.results.set_single_value(o, v)?;
            }
        }
        for &failed in &report.failed_outputs {
            if let Some(&o) = outputs.get(failed) {
                tracing::debug!(op = label, output = failed, "fused output degraded to invalid");
                env.results.allocate_invalid(o)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/operation/pixel.rs"]
mod tests;
