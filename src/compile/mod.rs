//! Compilation of a scheduled graph into an operation stream.
//!
//! Compilation and execution are interleaved: each operation is evaluated as soon as it is
//! appended, because later fusion decisions read the results of earlier operations.

pub(crate) mod fingerprint;
pub(crate) mod state;
pub(crate) mod stream;

use crate::backend::{ExecutionBackend, ExecutionTarget, Kernel};
use crate::compile::fingerprint::fingerprint_kernel;
use crate::compile::state::{CompileState, CompileView};
use crate::compile::stream::OperationStream;
use crate::evaluator::{CancelToken, EvaluatorStats};
use crate::foundation::error::{GraphError, GraphResult};
use crate::foundation::ids::{InputRef, NodeId, OutputRef, ResultId};
use crate::graph::model::{InputDeclaration, NodeGraph};
use crate::graph::validate::Topology;
use crate::operation::descriptor::ImplicitInput;
use crate::operation::node::NodeOperation;
use crate::operation::pixel::{DeclaredInputKey, PixelOperation, PixelPlan};
use crate::operation::{EvalEnv, Operation, OperationKind};
use crate::result::value::ResultType;
use crate::schedule::Schedule;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) type KernelCache = HashMap<u64, Arc<dyn Kernel>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompileOutcome {
    Completed,
    Cancelled,
}

pub(crate) struct Compiler<'a> {
    pub(crate) graph: &'a NodeGraph,
    pub(crate) topo: &'a Topology,
    pub(crate) schedule: &'a Schedule,
    pub(crate) backend: &'a dyn ExecutionBackend,
    pub(crate) kernels: &'a mut KernelCache,
    pub(crate) env: EvalEnv<'a>,
    pub(crate) stream: &'a mut OperationStream,
    pub(crate) cancel: &'a CancelToken,
    pub(crate) stats: &'a mut EvaluatorStats,
    pub(crate) state: CompileState,
}

impl Compiler<'_> {
    /// Walk the schedule, flushing and filling compile units, until done or cancelled.
    pub(crate) fn run(mut self) -> GraphResult<CompileOutcome> {
        let schedule = self.schedule;
        for &node in schedule.nodes() {
            if self.cancel.is_cancelled() {
                return Ok(CompileOutcome::Cancelled);
            }
            let view = CompileView {
                graph: self.graph,
                topo: self.topo,
                results: &*self.env.results,
                compositing_size: self.env.opts.compositing_size,
            };
            if self.state.should_flush(node, &view) {
                tracing::debug!(
                    before = %node,
                    unit = self.state.unit().len(),
                    single_value = self.state.unit_is_single_value(),
                    domain = ?self.state.unit_domain().map(|d| d.size()),
                    "flushing compile unit"
                );
                self.compile_unit()?;
            }
            if self.graph.node(node).is_pixel() {
                let view = CompileView {
                    graph: self.graph,
                    topo: self.topo,
                    results: &*self.env.results,
                    compositing_size: self.env.opts.compositing_size,
                };
                self.state.add(node, &view);
            } else {
                self.compile_node(node)?;
            }
        }
        if !self.state.unit().is_empty() {
            self.compile_unit()?;
        }
        Ok(CompileOutcome::Completed)
    }

    fn append(&mut self, op: Operation) -> GraphResult<()> {
        let op = self.stream.push(op);
        op.evaluate(&mut self.env)
    }

    fn create_result(&mut self, ty: ResultType, reference_count: u32) -> ResultId {
        let id = self.env.results.create(ty, self.env.opts.precision);
        self.env.results.set_initial_reference_count(id, reference_count);
        id
    }

    /// Consumer sockets among scheduled nodes, plus one for a preview.
    fn output_reference_count(&self, output: OutputRef) -> u32 {
        let consumers = self
            .topo
            .targets(output)
            .iter()
            .filter(|t| self.schedule.contains(t.node))
            .count() as u32;
        let preview = self.graph.node(output.node).preview && output.socket == 0;
        consumers + u32::from(preview)
    }

    fn compile_node(&mut self, node: NodeId) -> GraphResult<()> {
        let graph = self.graph;
        let gnode = graph.node(node);
        let decl = &gnode.declaration;

        let outputs = (0..decl.outputs.len())
            .map(|socket| {
                let rc = self.output_reference_count(OutputRef { node, socket });
                self.create_result(decl.outputs[socket].ty, rc)
            })
            .collect::<Vec<_>>();
        let kind = OperationKind::Node(NodeOperation {
            node,
            kernel: Arc::clone(&gnode.kernel),
            output_names: decl.outputs.iter().map(|o| o.name.clone()).collect(),
            preview: gnode.preview,
        });
        let mut op = Operation::new(
            gnode.label.clone(),
            kind,
            decl.inputs.iter().map(|i| (i.name.clone(), i.descriptor)),
            outputs.iter().copied(),
        );

        for (socket, input) in decl.inputs.iter().enumerate() {
            let result = match self.topo.origin(InputRef { node, socket }) {
                Some(origin) => self.result_from_output(origin)?,
                None => self.compile_unlinked_input(&gnode.label, input)?,
            };
            op.map_input(socket, result);
        }
        for (socket, &r) in outputs.iter().enumerate() {
            self.state.map_node_output(OutputRef { node, socket }, r);
        }
        self.append(op)
    }

    fn result_from_output(&self, output: OutputRef) -> GraphResult<ResultId> {
        self.state.result_from_output(output).ok_or_else(|| {
            GraphError::evaluation(format!(
                "output {}:{} was consumed before it was compiled",
                output.node, output.socket
            ))
        })
    }

    /// Unlinked inputs read their default value or a synthesized implicit input.
    fn compile_unlinked_input(&mut self, label: &str, input: &InputDeclaration) -> GraphResult<ResultId> {
        if let Some(implicit) = input.descriptor.implicit_fallback {
            return self.compile_implicit_input(implicit, &format!("{label}:{}", input.name));
        }
        let out = self.create_result(input.default.ty(), 1);
        self.append(Operation::new(
            format!("{label}:{}", input.name),
            OperationKind::InputSingleValue(input.default),
            [],
            [out],
        ))?;
        Ok(out)
    }

    fn compile_implicit_input(&mut self, implicit: ImplicitInput, label: &str) -> GraphResult<ResultId> {
        let ty = match implicit {
            ImplicitInput::TextureCoordinates => ResultType::Vector2,
        };
        let out = self.create_result(ty, 1);
        self.append(Operation::new(
            label.to_owned(),
            OperationKind::ImplicitInput(implicit),
            [],
            [out],
        ))?;
        Ok(out)
    }

    /// Compile the current unit, halving it until every part fits the backend output cap.
    ///
    /// Halving can itself add boundary outputs, so the split point is the midpoint rather than
    /// the node where the cap was exceeded.
    #[tracing::instrument(level = "debug", skip(self), fields(nodes = self.state.unit().len()))]
    fn compile_unit(&mut self) -> GraphResult<()> {
        let (unit, single_value) = self.state.take_unit();
        let mut work = vec![unit];
        while let Some(unit) = work.pop() {
            let plan = PixelPlan::build(self.graph, self.topo, self.schedule, &unit, single_value)?;
            if let Some(cap) = self.backend.max_kernel_outputs()
                && plan.outputs.len() > cap
            {
                if unit.len() < 2 {
                    return Err(GraphError::structure(format!(
                        "node {} needs {} kernel outputs, backend '{}' allows {cap}",
                        unit[0],
                        plan.outputs.len(),
                        self.backend.name()
                    )));
                }
                let mid = unit.len() / 2;
                tracing::debug!(outputs = plan.outputs.len(), cap, mid, "splitting compile unit");
                self.stats.unit_splits += 1;
                work.push(unit[mid..].to_vec());
                work.push(unit[..mid].to_vec());
                continue;
            }
            self.compile_plan(plan)?;
        }
        Ok(())
    }

    fn kernel_for(&mut self, plan: &PixelPlan, target: ExecutionTarget) -> GraphResult<Arc<dyn Kernel>> {
        let fingerprint = fingerprint_kernel(&plan.kernel, target);
        if let Some(kernel) = self.kernels.get(&fingerprint) {
            tracing::debug!(fingerprint = format_args!("{fingerprint:016x}"), "kernel cache hit");
            self.stats.kernel_cache_hits += 1;
            return Ok(Arc::clone(kernel));
        }
        let kernel = match target {
            ExecutionTarget::Host => self.backend.compile_procedure(&plan.kernel)?,
            ExecutionTarget::Accelerated => self.backend.compile_kernel(&plan.kernel)?,
        };
        self.stats.kernels_compiled += 1;
        self.kernels.insert(fingerprint, Arc::clone(&kernel));
        Ok(kernel)
    }

    fn compile_plan(&mut self, plan: PixelPlan) -> GraphResult<()> {
        let target = if plan.kernel.single_value || self.backend.prefers_host() {
            ExecutionTarget::Host
        } else {
            ExecutionTarget::Accelerated
        };
        let kernel = self.kernel_for(&plan, target)?;

        let outputs = plan
            .outputs
            .iter()
            .map(|o| self.create_result(o.ty, o.reference_count))
            .collect::<Vec<_>>();
        let label = format!(
            "pixel[{}]",
            plan.nodes
                .iter()
                .map(|&n| self.graph.node(n).label.as_str())
                .collect::<Vec<_>>()
                .join(",")
        );
        let pixel = PixelOperation::new(&plan, kernel, target);
        let mut op = Operation::new(
            label.clone(),
            OperationKind::Pixel(pixel),
            plan.inputs.iter().map(|i| (i.name.clone(), i.descriptor)),
            outputs.iter().copied(),
        );

        for (index, input) in plan.inputs.iter().enumerate() {
            let result = match input.key {
                DeclaredInputKey::Output(origin) => self.result_from_output(origin)?,
                DeclaredInputKey::Implicit(implicit) => {
                    self.compile_implicit_input(implicit, &format!("{label}:{}", input.name))?
                }
            };
            op.map_input(index, result);
        }

        // Producer counts were taken per consumer socket; collapse them to one per declared input.
        if let OperationKind::Pixel(pixel) = op.kind() {
            for (index, input) in plan.inputs.iter().enumerate() {
                if !matches!(input.key, DeclaredInputKey::Output(_)) {
                    continue;
                }
                let extra = pixel.internal_reference_count(index).saturating_sub(1);
                if let Some(source) = op.inputs()[index].source {
                    self.env.results.decrement_reference_count(source, extra)?;
                }
            }
        }

        for (declared, &r) in plan.outputs.iter().zip(&outputs) {
            self.state.map_pixel_output(declared.source, r);
        }
        self.append(op)
    }
}
