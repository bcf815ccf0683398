//! Operations: typed units of work over results.
//!
//! Every operation runs the same state machine on `evaluate`: build the input processors once,
//! run them, reset the outputs, execute, compute previews, then release each input exactly once.

pub(crate) mod descriptor;
pub(crate) mod node;
pub(crate) mod pixel;
pub(crate) mod preview;
pub(crate) mod processors;

use crate::backend::ExecutionTarget;
use crate::domain::{Domain, Size};
use crate::evaluator::EvaluatorOpts;
use crate::foundation::error::{GraphError, GraphResult};
use crate::foundation::ids::{NodeId, ResultId};
use crate::operation::descriptor::{ImplicitInput, InputDescriptor, InputRealizationMode};
use crate::operation::node::{NodeOperation, PublishedResult};
use crate::operation::pixel::PixelOperation;
use crate::operation::preview::Preview;
use crate::result::ResultStore;
use crate::result::value::{ResultType, Value};
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// Mutable evaluation state shared by every operation of a pass.
pub(crate) struct EvalEnv<'a> {
    pub(crate) results: &'a mut ResultStore,
    pub(crate) opts: &'a EvaluatorOpts,
    pub(crate) published: &'a mut BTreeMap<String, PublishedResult>,
    pub(crate) previews: &'a mut BTreeMap<NodeId, Preview>,
}

pub(crate) enum OperationKind {
    Node(NodeOperation),
    Pixel(PixelOperation),
    InputSingleValue(Value),
    ImplicitInput(ImplicitInput),
    Conversion,
    Realization { target: Domain },
}

pub(crate) struct OperationInput {
    pub(crate) name: String,
    pub(crate) descriptor: InputDescriptor,
    pub(crate) source: Option<ResultId>,
    pub(crate) processors: Vec<Operation>,
}

impl OperationInput {
    /// Result the operation reads: the end of the processor chain, or the mapped source.
    pub(crate) fn processed(&self) -> Option<ResultId> {
        match self.processors.last() {
            Some(p) => p.outputs.first().copied(),
            None => self.source,
        }
    }
}

pub(crate) struct Operation {
    label: String,
    kind: OperationKind,
    inputs: SmallVec<[OperationInput; 4]>,
    outputs: SmallVec<[ResultId; 2]>,
    processors_built: bool,
}

impl Operation {
    pub(crate) fn new(
        label: impl Into<String>,
        kind: OperationKind,
        inputs: impl IntoIterator<Item = (String, InputDescriptor)>,
        outputs: impl IntoIterator<Item = ResultId>,
    ) -> Self {
        Self {
            label: label.into(),
            kind,
            inputs: inputs
                .into_iter()
                .map(|(name, descriptor)| OperationInput {
                    name,
                    descriptor,
                    source: None,
                    processors: Vec::new(),
                })
                .collect(),
            outputs: outputs.into_iter().collect(),
            processors_built: false,
        }
    }

    /// One-input, one-output operation inserted in front of an input.
    fn processor(label: String, kind: OperationKind, source: ResultId, output: ResultId, ty: ResultType) -> Self {
        let descriptor = InputDescriptor::new(ty)
            .with_realization(InputRealizationMode::None)
            .skipping_conversion();
        let mut op = Self::new(label, kind, [("Input".to_owned(), descriptor)], [output]);
        op.inputs[0].source = Some(source);
        op.processors_built = true;
        op
    }

    pub(crate) fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub(crate) fn inputs(&self) -> &[OperationInput] {
        &self.inputs
    }

    pub(crate) fn outputs(&self) -> &[ResultId] {
        &self.outputs
    }

    pub(crate) fn map_input(&mut self, index: usize, result: ResultId) {
        self.inputs[index].source = Some(result);
    }

    #[tracing::instrument(level = "trace", skip_all, fields(op = %self.label))]
    pub(crate) fn evaluate(&mut self, env: &mut EvalEnv<'_>) -> GraphResult<()> {
        if !self.processors_built {
            self.build_processors(env)?;
            self.processors_built = true;
        }
        for input in &mut self.inputs {
            for p in &mut input.processors {
                p.evaluate(env)?;
            }
        }

        let domain = self.compute_domain(env, true)?;
        for &o in &self.outputs {
            env.results.reset(o);
        }
        self.execute(domain, env)?;
        self.compute_previews(env)?;
        self.release_inputs(env)?;
        for &o in &self.outputs {
            env.results.release_unneeded(o);
        }
        Ok(())
    }

    /// Operation domain: overridden by the kind, or inferred from the inputs.
    ///
    /// Inference ignores single-value inputs and inputs that do not realize onto the operation
    /// domain. The lowest priority value wins; ties keep declaration order.
    fn compute_domain(&self, env: &EvalEnv<'_>, processed: bool) -> GraphResult<Domain> {
        match &self.kind {
            OperationKind::InputSingleValue(_) => return Ok(Domain::identity()),
            OperationKind::ImplicitInput(_) => {
                return Domain::new(env.opts.compositing_size);
            }
            OperationKind::Realization { target } => return Ok(*target),
            OperationKind::Conversion => {
                let src = self.input_result(0, processed)?;
                return Ok(env.results.domain(src));
            }
            OperationKind::Node(_) | OperationKind::Pixel(_) => {}
        }

        let mut best: Option<(u32, Domain)> = None;
        for (i, input) in self.inputs.iter().enumerate() {
            if !input.descriptor.drives_domain() {
                continue;
            }
            let src = self.input_result(i, processed)?;
            if env.results.is_single_value(src) {
                continue;
            }
            let priority = input.descriptor.domain_priority;
            if best.is_none_or(|(p, _)| priority < p) {
                best = Some((priority, env.results.domain(src)));
            }
        }
        Ok(best.map_or_else(Domain::identity, |(_, d)| d))
    }

    fn input_result(&self, index: usize, processed: bool) -> GraphResult<ResultId> {
        let input = &self.inputs[index];
        let id = if processed {
            input.processed()
        } else {
            input.source
        };
        id.ok_or_else(|| {
            GraphError::evaluation(format!(
                "input '{}' of operation '{}' is not mapped to a result",
                input.name, self.label
            ))
        })
    }

    /// Insert conversion and realization processors in front of mismatching inputs.
    fn build_processors(&mut self, env: &mut EvalEnv<'_>) -> GraphResult<()> {
        let domain = self.compute_domain(env, false)?;
        for i in 0..self.inputs.len() {
            let mut current = self.input_result(i, false)?;
            let label = format!("{}:{}", self.label, self.inputs[i].name);
            let input = &mut self.inputs[i];
            let descriptor = input.descriptor;

            let ty = env.results.ty(current);
            if ty != descriptor.expected_type && !descriptor.skip_type_conversion {
                if !ty.can_convert_to(descriptor.expected_type) {
                    return Err(GraphError::structure(format!(
                        "no conversion from {ty:?} to {:?} for input '{label}'",
                        descriptor.expected_type
                    )));
                }
                let precision = env.results.precision(current);
                let out = env.results.create(descriptor.expected_type, precision);
                env.results.set_initial_reference_count(out, 1);
                input.processors.push(Self::processor(
                    format!("{label}:convert"),
                    OperationKind::Conversion,
                    current,
                    out,
                    ty,
                ));
                current = out;
            }

            if descriptor.expects_single_value || env.results.is_single_value(current) {
                continue;
            }
            let input_domain = env.results.domain(current);
            let target = match descriptor.realization_mode {
                InputRealizationMode::None => continue,
                InputRealizationMode::TransformOnly => input_domain.realized_transformation_domain(),
                InputRealizationMode::FullDomain => domain,
            };
            if target == input_domain {
                continue;
            }
            let out_ty = env.results.ty(current);
            let precision = env.results.precision(current);
            let out = env.results.create(out_ty, precision);
            env.results.set_initial_reference_count(out, 1);
            input.processors.push(Self::processor(
                format!("{label}:realize"),
                OperationKind::Realization { target },
                current,
                out,
                out_ty,
            ));
        }
        Ok(())
    }

    fn execute(&self, domain: Domain, env: &mut EvalEnv<'_>) -> GraphResult<()> {
        match &self.kind {
            OperationKind::Node(n) => n.execute(&self.label, domain, &self.inputs, &self.outputs, env),
            OperationKind::Pixel(p) => p.execute(&self.label, domain, &self.inputs, &self.outputs, env),
            OperationKind::InputSingleValue(value) => {
                let out = self.outputs[0];
                env.results.allocate_single_value(out)?;
                env.results.set_single_value(out, *value)
            }
            OperationKind::ImplicitInput(ImplicitInput::TextureCoordinates) => {
                processors::texture_coordinates(env, self.outputs[0], domain)
            }
            OperationKind::Conversion => {
                let src = self.input_result(0, true)?;
                processors::convert(env, src, self.outputs[0])
            }
            OperationKind::Realization { target } => {
                let src = self.input_result(0, true)?;
                processors::realize(env, src, self.outputs[0], *target)
            }
        }
    }

    fn compute_previews(&self, env: &mut EvalEnv<'_>) -> GraphResult<()> {
        let targets: SmallVec<[(NodeId, ResultId); 2]> = match &self.kind {
            OperationKind::Node(n) if n.preview => match self.outputs.first() {
                Some(&o) => SmallVec::from_slice(&[(n.node, o)]),
                None => SmallVec::new(),
            },
            OperationKind::Pixel(p) => p
                .previews()
                .iter()
                .map(|&(node, out)| (node, self.outputs[out]))
                .collect(),
            _ => SmallVec::new(),
        };
        for (node, out) in targets {
            if let Some(preview) = preview::compute_preview(env.results, out, env.opts.preview_max_size) {
                env.previews.insert(node, preview);
            }
            env.results.release(out)?;
        }
        Ok(())
    }

    fn release_inputs(&self, env: &mut EvalEnv<'_>) -> GraphResult<()> {
        for i in 0..self.inputs.len() {
            let id = self.input_result(i, true)?;
            env.results.release(id)?;
        }
        Ok(())
    }

    pub(crate) fn nodes(&self) -> Vec<NodeId> {
        match &self.kind {
            OperationKind::Node(n) => vec![n.node],
            OperationKind::Pixel(p) => p.nodes().to_vec(),
            _ => Vec::new(),
        }
    }

    /// Public view of this operation.
    pub(crate) fn summary(&self, results: &ResultStore) -> OperationSummary {
        let (kind, target, internal) = match &self.kind {
            OperationKind::Node(_) => (OperationKindTag::Node, None, None),
            OperationKind::Pixel(p) => (
                OperationKindTag::Pixel,
                Some(p.target()),
                Some(p.internal_reference_counts()),
            ),
            OperationKind::InputSingleValue(_) => (OperationKindTag::InputSingleValue, None, None),
            OperationKind::ImplicitInput(_) => (OperationKindTag::ImplicitInput, None, None),
            OperationKind::Conversion => (OperationKindTag::Conversion, None, None),
            OperationKind::Realization { .. } => (OperationKindTag::Realization, None, None),
        };
        OperationSummary {
            label: self.label.clone(),
            kind,
            nodes: self.nodes(),
            inputs: self
                .inputs
                .iter()
                .enumerate()
                .map(|(i, input)| InputSummary {
                    name: input.name.clone(),
                    internal_reference_count: internal.map_or(1, |c| c[i]),
                    processors: input
                        .processors
                        .iter()
                        .map(|p| match &p.kind {
                            OperationKind::Realization { target } => {
                                ProcessorSummary::Realization { size: target.size() }
                            }
                            _ => ProcessorSummary::Conversion {
                                to: results.ty(p.outputs[0]),
                            },
                        })
                        .collect(),
                })
                .collect(),
            outputs: self.outputs.len(),
            target,
        }
    }
}

/// Kind of a compiled operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKindTag {
    /// One standalone graph node.
    Node,
    /// A fused compile unit.
    Pixel,
    /// Default value of an unlinked input.
    InputSingleValue,
    /// Synthesized implicit input.
    ImplicitInput,
    /// Type-conversion processor.
    Conversion,
    /// Domain-realization processor.
    Realization,
}

/// An input processor in front of an operation input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessorSummary {
    /// Converts to `to`.
    Conversion {
        /// Target type.
        to: ResultType,
    },
    /// Resamples onto a domain of `size`.
    Realization {
        /// Target size.
        size: Size,
    },
}

/// An operation input as compiled.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputSummary {
    /// Input name.
    pub name: String,
    /// Sockets inside a fused unit that read this input; `1` for other operations.
    pub internal_reference_count: u32,
    /// Processor chain, in order.
    pub processors: Vec<ProcessorSummary>,
}

/// Introspection record of one operation in the compiled stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationSummary {
    /// Operation label.
    pub label: String,
    /// Operation kind.
    pub kind: OperationKindTag,
    /// Graph nodes covered, in unit order.
    pub nodes: Vec<NodeId>,
    /// Inputs in declaration order.
    pub inputs: Vec<InputSummary>,
    /// Number of outputs.
    pub outputs: usize,
    /// Execution target of fused operations.
    pub target: Option<ExecutionTarget>,
}
