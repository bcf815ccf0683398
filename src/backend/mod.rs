//! Execution backend contract for fused pixel kernels.
//!
//! The core hands a backend an explicit [`KernelGraph`] value and gets back an invocable
//! [`Kernel`]. The backend never calls back into the evaluator.

pub(crate) mod cpu;

use crate::domain::Size;
use crate::foundation::error::GraphResult;
use crate::foundation::ids::NodeId;
use crate::graph::model::PixelFunction;
use crate::result::value::{ImageBuffer, ResultType, Value};
use std::sync::Arc;

/// Where a fused kernel runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExecutionTarget {
    /// Host procedure; used for single-value units and host-preferring backends.
    Host,
    /// Combined kernel dispatched to the accelerated path.
    Accelerated,
}

/// Where a kernel node operand comes from.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OperandSource {
    /// Declared kernel input, by index.
    Input(usize),
    /// Output `output` of an earlier kernel node.
    Node {
        /// Index into [`KernelGraph::nodes`].
        node: usize,
        /// Output socket of that node.
        output: usize,
    },
    /// Value baked into the kernel.
    Constant(Value),
}

/// One operand of a kernel node; the value is converted to `ty` before the node reads it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KernelOperand {
    /// Operand origin.
    pub source: OperandSource,
    /// Type the node expects.
    pub ty: ResultType,
}

/// One fused graph node.
#[derive(Clone)]
pub struct KernelNode {
    /// Graph node this kernel node was built from.
    pub node: NodeId,
    /// Node label, for dumps.
    pub label: String,
    /// Per-pixel computation.
    pub function: Arc<dyn PixelFunction>,
    /// Operands in input socket order.
    pub operands: Vec<KernelOperand>,
    /// Output types in output socket order.
    pub output_types: Vec<ResultType>,
}

impl std::fmt::Debug for KernelNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelNode")
            .field("node", &self.node)
            .field("label", &self.label)
            .field("function", &format_args!("{:#018x}", self.function.fingerprint()))
            .field("operands", &self.operands)
            .field("output_types", &self.output_types)
            .finish()
    }
}

/// A declared kernel output: one output socket of one kernel node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KernelOutput {
    /// Index into [`KernelGraph::nodes`].
    pub node: usize,
    /// Output socket of that node.
    pub socket: usize,
    /// Stored type.
    pub ty: ResultType,
}

/// Pure-data description of a fused kernel.
///
/// Nodes are topologically ordered: operands only reference earlier nodes.
#[derive(Clone, Debug, Default)]
pub struct KernelGraph {
    /// Types of the declared inputs, in binding order.
    pub inputs: Vec<ResultType>,
    /// Fused nodes.
    pub nodes: Vec<KernelNode>,
    /// Declared outputs, in binding order.
    pub outputs: Vec<KernelOutput>,
    /// Every input and output is a single value.
    pub single_value: bool,
}

/// A bound kernel input.
#[derive(Clone, Copy, Debug)]
pub enum InputBinding<'a> {
    /// Uniform value.
    Single(Value),
    /// Image read at the same pixel, clamped to its bounds.
    Image(&'a ImageBuffer),
}

/// A bound kernel output.
#[derive(Debug)]
pub enum OutputBinding<'a> {
    /// Uniform value.
    Single(&'a mut Value),
    /// Image covering the dispatch size.
    Image(&'a mut ImageBuffer),
}

/// Buffers bound for one dispatch.
#[derive(Debug)]
pub struct KernelBindings<'a> {
    /// Dispatch size in pixels; `1x1` for single-value dispatches.
    pub size: Size,
    /// Inputs, matching [`KernelGraph::inputs`].
    pub inputs: Vec<InputBinding<'a>>,
    /// Outputs, matching [`KernelGraph::outputs`].
    pub outputs: Vec<OutputBinding<'a>>,
}

/// Outcome of one dispatch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KernelReport {
    /// Outputs that hit a numeric failure; the caller degrades them to invalid values.
    pub failed_outputs: Vec<usize>,
}

/// Compiled, invocable kernel.
pub trait Kernel: Send + Sync {
    /// Run the kernel over `bindings`. Returns after all outputs are written.
    fn dispatch(&self, bindings: &mut KernelBindings<'_>) -> GraphResult<KernelReport>;
}

/// Kernel compiler collaborator.
pub trait ExecutionBackend: Send {
    /// Backend name, for diagnostics.
    fn name(&self) -> &str;

    /// Cap on declared outputs per fused kernel.
    fn max_kernel_outputs(&self) -> Option<usize> {
        None
    }

    /// Compile every unit as a host procedure.
    fn prefers_host(&self) -> bool {
        false
    }

    /// Compile a combined kernel for the accelerated path.
    fn compile_kernel(&self, graph: &KernelGraph) -> GraphResult<Arc<dyn Kernel>>;

    /// Compile a host procedure.
    fn compile_procedure(&self, graph: &KernelGraph) -> GraphResult<Arc<dyn Kernel>>;
}
