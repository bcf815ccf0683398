use crate::domain::{Domain, RealizationOptions, Size};
use crate::foundation::error::{GraphError, GraphResult, NumericError};
use crate::foundation::ids::{NodeId, ResultId};
use crate::graph::model::NodeKernel;
use crate::operation::{EvalEnv, OperationInput};
use crate::result::ResultStore;
use crate::result::value::{ImageBuffer, ResultType, Value};
use crate::evaluator::EvaluatorOpts;
use kurbo::Affine;
use published::snapshot;
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::Arc;

pub use published::{PublishedResult, PublishedValue};

/// Operation running exactly one standalone graph node.
pub(crate) struct NodeOperation {
    pub(crate) node: NodeId,
    pub(crate) kernel: Arc<dyn NodeKernel>,
    pub(crate) output_names: SmallVec<[String; 2]>,
    pub(crate) preview: bool,
}

impl NodeOperation {
    pub(crate) fn execute(
        &self,
        label: &str,
        domain: Domain,
        inputs: &[OperationInput],
        outputs: &[ResultId],
        env: &mut EvalEnv<'_>,
    ) -> GraphResult<()> {
        let bound_inputs = inputs
            .iter()
            .map(|i| {
                i.processed().map(|r| (i.name.as_str(), r)).ok_or_else(|| {
                    GraphError::evaluation(format!("input '{}' of '{label}' is unmapped", i.name))
                })
            })
            .collect::<GraphResult<SmallVec<[(&str, ResultId); 4]>>>()?;
        let bound_outputs = self
            .output_names
            .iter()
            .map(String::as_str)
            .zip(outputs.iter().copied())
            .collect::<SmallVec<[(&str, ResultId); 2]>>();

        let mut ctx = ExecuteContext {
            node: self.node,
            label,
            domain,
            opts: env.opts,
            results: &mut *env.results,
            published: &mut *env.published,
            inputs: &bound_inputs,
            outputs: &bound_outputs,
        };
        self.kernel.execute(&mut ctx)?;

        for &(name, id) in bound_outputs.iter() {
            if !env.results.is_allocated(id) {
                return Err(GraphError::evaluation(format!(
                    "node '{label}' left output '{name}' unallocated"
                )));
            }
        }
        Ok(())
    }
}

/// Everything a standalone [`NodeKernel`] may do while executing.
///
/// Inputs arrive converted and realized according to their descriptors. Every output must be
/// allocated, passed through, stolen into or wrapped before `execute` returns.
pub struct ExecuteContext<'a> {
    node: NodeId,
    label: &'a str,
    domain: Domain,
    opts: &'a EvaluatorOpts,
    results: &'a mut ResultStore,
    published: &'a mut BTreeMap<String, PublishedResult>,
    inputs: &'a [(&'a str, ResultId)],
    outputs: &'a [(&'a str, ResultId)],
}

impl<'a> ExecuteContext<'a> {
    /// Node being executed.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Node label.
    pub fn label(&self) -> &str {
        self.label
    }

    /// Operation domain inferred from the inputs.
    pub fn domain(&self) -> Domain {
        self.domain
    }

    /// Size of the compositing region.
    pub fn compositing_size(&self) -> Size {
        self.opts.compositing_size
    }

    /// Read access to all inputs.
    pub fn inputs(&self) -> Inputs<'_> {
        Inputs {
            results: self.results,
            inputs: self.inputs,
            label: self.label,
        }
    }

    /// Read access to one input.
    pub fn input(&self, name: &str) -> GraphResult<InputReader<'_>> {
        self.inputs().get(name)
    }

    fn output_id(&self, name: &str) -> GraphResult<ResultId> {
        self.outputs
            .iter()
            .find(|(n, _)| *n == name)
            .map(|&(_, id)| id)
            .ok_or_else(|| {
                GraphError::evaluation(format!("node '{}' has no output '{name}'", self.label))
            })
    }

    fn input_id(&self, name: &str) -> GraphResult<ResultId> {
        lookup(self.inputs, name, self.label)
    }

    /// Whether anything consumes `output`. Unconsumed outputs still need an allocation, which
    /// is served as a cheap dummy.
    pub fn should_compute(&self, output: &str) -> GraphResult<bool> {
        Ok(self.results.should_compute(self.output_id(output)?))
    }

    /// Allocate `output` as an image over the operation domain.
    pub fn allocate_image(&mut self, output: &str) -> GraphResult<()> {
        self.allocate_image_on(output, self.domain)
    }

    /// Allocate `output` as an image over `domain`.
    pub fn allocate_image_on(&mut self, output: &str, domain: Domain) -> GraphResult<()> {
        let id = self.output_id(output)?;
        self.results
            .allocate_image(id, domain, self.opts.pooled_intermediates)
    }

    /// Allocate `output` as a single value.
    pub fn allocate_single_value(&mut self, output: &str, value: Value) -> GraphResult<()> {
        let id = self.output_id(output)?;
        self.results.allocate_single_value(id)?;
        self.results.set_single_value(id, value)
    }

    /// Degrade `output` to its zero value.
    pub fn allocate_invalid(&mut self, output: &str) -> GraphResult<()> {
        let id = self.output_id(output)?;
        self.results.allocate_invalid(id)
    }

    /// Write the already allocated image of `output` while reading inputs.
    ///
    /// A [`NumericError`] from `f` degrades the output to an invalid value instead of failing
    /// the pass.
    pub fn write_image<F>(&mut self, output: &str, f: F) -> GraphResult<()>
    where
        F: FnOnce(&Inputs<'_>, &mut ImageBuffer) -> Result<(), NumericError>,
    {
        let id = self.output_id(output)?;
        let mut image = self.results.take_image(id).ok_or_else(|| {
            GraphError::evaluation(format!(
                "output '{output}' of '{}' is not an allocated image",
                self.label
            ))
        })?;
        let outcome = f(
            &Inputs {
                results: self.results,
                inputs: self.inputs,
                label: self.label,
            },
            &mut image,
        );
        self.results.restore_image(id, image);
        if let Err(err) = outcome {
            tracing::debug!(node = %self.node, output, %err, "output degraded to invalid");
            self.results.allocate_invalid(id)?;
        }
        Ok(())
    }

    /// Share the storage of `input` with `output` without copying.
    pub fn pass_through(&mut self, input: &str, output: &str) -> GraphResult<()> {
        let src = self.input_id(input)?;
        let dst = self.output_id(output)?;
        self.results.pass_through(src, dst)
    }

    /// Pre-multiply `transform` onto the domain of `output`.
    pub fn transform_output(&mut self, output: &str, transform: Affine) -> GraphResult<()> {
        let id = self.output_id(output)?;
        let domain = self.results.domain(id).transformed(transform);
        self.results.set_domain(id, domain);
        Ok(())
    }

    /// Replace the realization options carried by the domain of `output`.
    pub fn set_output_realization(&mut self, output: &str, options: RealizationOptions) -> GraphResult<()> {
        let id = self.output_id(output)?;
        let mut domain = self.results.domain(id);
        domain.set_realization_options(options);
        self.results.set_domain(id, domain);
        Ok(())
    }

    /// Move the storage of `input` into `output`. Only allowed when this node is the last
    /// consumer of the input.
    pub fn steal(&mut self, input: &str, output: &str) -> GraphResult<()> {
        let src = self.input_id(input)?;
        let dst = self.output_id(output)?;
        if self.results.reference_count(src) != 1 {
            return Err(GraphError::evaluation(format!(
                "node '{}' cannot steal input '{input}' still referenced by other consumers",
                self.label
            )));
        }
        self.results.steal(dst, src)
    }

    /// Attach host-owned image storage to `output`.
    pub fn wrap_external_image(&mut self, output: &str, image: ImageBuffer, domain: Domain) -> GraphResult<()> {
        let id = self.output_id(output)?;
        self.check_type(id, image.ty())?;
        self.results.wrap_external_image(id, image, domain)
    }

    /// Attach a host-owned single value to `output`.
    pub fn wrap_external_value(&mut self, output: &str, value: Value) -> GraphResult<()> {
        let id = self.output_id(output)?;
        self.check_type(id, value.ty())?;
        self.results.wrap_external_value(id, value)
    }

    fn check_type(&self, id: ResultId, ty: ResultType) -> GraphResult<()> {
        let expected = self.results.ty(id);
        if expected != ty {
            return Err(GraphError::evaluation(format!(
                "node '{}' wraps a {ty:?} value into a {expected:?} output",
                self.label
            )));
        }
        Ok(())
    }

    /// Snapshot `input` for the host under `label`.
    pub fn publish(&mut self, label: impl Into<String>, input: &str) -> GraphResult<()> {
        let id = self.input_id(input)?;
        let snap = snapshot(self.results, id)?;
        self.published.insert(label.into(), snap);
        Ok(())
    }
}

fn lookup(inputs: &[(&str, ResultId)], name: &str, label: &str) -> GraphResult<ResultId> {
    inputs
        .iter()
        .find(|(n, _)| *n == name)
        .map(|&(_, id)| id)
        .ok_or_else(|| GraphError::evaluation(format!("node '{label}' has no input '{name}'")))
}

/// Read-only view of the processed inputs of a standalone node.
pub struct Inputs<'a> {
    results: &'a ResultStore,
    inputs: &'a [(&'a str, ResultId)],
    label: &'a str,
}

impl<'a> Inputs<'a> {
    /// Reader for input `name`.
    pub fn get(&self, name: &str) -> GraphResult<InputReader<'a>> {
        let id = lookup(self.inputs, name, self.label)?;
        Ok(InputReader {
            results: self.results,
            id,
        })
    }
}

/// Read access to one processed input.
#[derive(Clone, Copy)]
pub struct InputReader<'a> {
    results: &'a ResultStore,
    id: ResultId,
}

impl<'a> InputReader<'a> {
    /// Value type.
    pub fn ty(&self) -> ResultType {
        self.results.ty(self.id)
    }

    /// Domain of the input.
    pub fn domain(&self) -> Domain {
        self.results.domain(self.id)
    }

    /// Return `true` for single-value inputs.
    pub fn is_single_value(&self) -> bool {
        self.results.is_single_value(self.id)
    }

    /// Value of a single-value input.
    pub fn single_value(&self) -> Option<Value> {
        self.results.single_value(self.id)
    }

    /// Image of an image input.
    pub fn image(&self) -> Option<&'a ImageBuffer> {
        self.results.image(self.id)
    }

    /// Value at `(x, y)`: the single value, or the clamped pixel.
    pub fn value_at(&self, x: u32, y: u32) -> Value {
        if let Some(v) = self.single_value() {
            return v;
        }
        self.image()
            .map_or_else(|| Value::zero(self.ty()), |img| img.pixel(x, y))
    }
}

mod published {
    use crate::domain::Domain;
    use crate::foundation::error::{GraphError, GraphResult};
    use crate::foundation::ids::ResultId;
    use crate::result::ResultStore;
    use crate::result::value::{ImageBuffer, Value};

    /// Published payload.
    #[derive(Clone, Debug, PartialEq)]
    pub enum PublishedValue {
        /// Single value.
        Single(Value),
        /// Image copy.
        Image(ImageBuffer),
    }

    /// Result snapshot readable by the host after evaluation.
    #[derive(Clone, Debug, PartialEq)]
    pub struct PublishedResult {
        /// Domain of the snapshot.
        pub domain: Domain,
        /// Payload.
        pub value: PublishedValue,
    }

    impl PublishedResult {
        /// Value of a single-value snapshot, or the first pixel of an image snapshot.
        pub fn first_value(&self) -> Value {
            match &self.value {
                PublishedValue::Single(v) => *v,
                PublishedValue::Image(img) => img.pixel(0, 0),
            }
        }
    }

    pub(crate) fn snapshot(results: &ResultStore, id: ResultId) -> GraphResult<PublishedResult> {
        let domain = results.domain(id);
        if let Some(v) = results.single_value(id) {
            return Ok(PublishedResult {
                domain,
                value: PublishedValue::Single(v),
            });
        }
        let img = results
            .image(id)
            .ok_or_else(|| GraphError::evaluation(format!("cannot publish unallocated {id:?}")))?;
        Ok(PublishedResult {
            domain,
            value: PublishedValue::Image(img.clone()),
        })
    }
}
