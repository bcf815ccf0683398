//! Node-graph compilation and execution core of the Wavyte compositor.
//!
//! A [`NodeGraph`] of host-supplied [`NodeKernel`]s is validated, scheduled and compiled into a
//! stream of operations by an [`Evaluator`]:
//!
//! - Per-pixel nodes with compatible domains are fused into one kernel per compile unit and
//!   handed to an [`ExecutionBackend`] as an explicit [`KernelGraph`]
//! - Other nodes run standalone through an [`ExecuteContext`]
//! - Intermediate results are reference counted and freed at their last use
//!
//! The compiled stream is replayed on later evaluations until [`Evaluator::invalidate`].
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

pub(crate) mod backend;
pub(crate) mod compile;
/// Diagnostics sinks.
pub mod diagnostics;
/// Domain algebra: buffer sizes, placement transforms and realization options.
pub mod domain;
pub(crate) mod evaluator;
pub(crate) mod graph;
pub(crate) mod operation;
pub(crate) mod result;
pub(crate) mod schedule;

pub use crate::foundation::error::{GraphError, GraphResult, NumericError};
pub use crate::foundation::ids::NodeId;

pub use crate::backend::cpu::{CpuBackend, CpuBackendOpts};
pub use crate::backend::{
    ExecutionBackend, ExecutionTarget, InputBinding, Kernel, KernelBindings, KernelGraph,
    KernelNode, KernelOperand, KernelOutput, KernelReport, OperandSource, OutputBinding,
};
pub use crate::diagnostics::{
    Diagnostic, DiagnosticsSink, MemoryDiagnostics, Severity, TracingDiagnostics,
};
pub use crate::domain::{Domain, ExtensionMode, Interpolation, RealizationOptions, Size};
pub use crate::evaluator::{
    CancelToken, EvaluationStatus, Evaluator, EvaluatorOpts, EvaluatorStats,
};
pub use crate::graph::model::{
    InputDeclaration, Link, NodeDeclaration, NodeGraph, NodeKernel, OutputDeclaration,
    PixelFunction,
};
pub use crate::operation::descriptor::{ImplicitInput, InputDescriptor, InputRealizationMode};
pub use crate::operation::node::{
    ExecuteContext, InputReader, Inputs, PublishedResult, PublishedValue,
};
pub use crate::operation::preview::Preview;
pub use crate::operation::{InputSummary, OperationKindTag, OperationSummary, ProcessorSummary};
pub use crate::result::ResultStats;
pub use crate::result::pool::{
    BufferDesc, BufferPool, BufferPoolOpts, BufferPoolStats, ResourceAllocator,
};
pub use crate::result::value::{ImageBuffer, Precision, ResultType, Value};
pub use crate::schedule::{Schedule, compute_schedule};

#[cfg(test)]
#[path = "../tests/unit/kernels.rs"]
pub(crate) mod test_kernels;
