use crate::backend::ExecutionBackend;
use crate::backend::cpu::CpuBackend;
use crate::compile::state::CompileState;
use crate::compile::stream::OperationStream;
use crate::compile::{CompileOutcome, Compiler, KernelCache};
use crate::diagnostics::{Diagnostic, DiagnosticsSink, TracingDiagnostics};
use crate::domain::Size;
use crate::foundation::error::{GraphError, GraphResult};
use crate::foundation::ids::NodeId;
use crate::graph::model::NodeGraph;
use crate::graph::validate::resolve_topology;
use crate::operation::node::PublishedResult;
use crate::operation::preview::Preview;
use crate::operation::{EvalEnv, OperationSummary};
use crate::result::pool::{BufferPool, ResourceAllocator};
use crate::result::value::Precision;
use crate::result::{ResultStats, ResultStore};
use crate::schedule::schedule_topology;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Options controlling evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EvaluatorOpts {
    /// Size of the compositing region; the domain of implicit inputs.
    pub compositing_size: Size,
    /// Longest side of preview thumbnails.
    pub preview_max_size: u32,
    /// Serve intermediate images from the allocator pool.
    pub pooled_intermediates: bool,
    /// Storage precision of compiled results.
    pub precision: Precision,
}

impl Default for EvaluatorOpts {
    fn default() -> Self {
        Self {
            compositing_size: Size::new(1920, 1080),
            preview_max_size: 128,
            pooled_intermediates: true,
            precision: Precision::Full,
        }
    }
}

/// Cooperative cancellation signal, checked before each node is compiled.
///
/// Clones share the same flag, so a node kernel or another thread may hold one.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the running compilation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested and not yet acted on.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Outcome of a successful [`Evaluator::evaluate`] call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvaluationStatus {
    /// Every scheduled operation ran.
    Completed,
    /// Compilation stopped on request; every in-flight result was freed.
    Cancelled,
}

/// Evaluator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EvaluatorStats {
    /// Completed compilations.
    pub compilations: u64,
    /// Replays of a cached operation stream.
    pub replays: u64,
    /// Kernels compiled by the backend.
    pub kernels_compiled: u64,
    /// Fused units served from the kernel cache.
    pub kernel_cache_hits: u64,
    /// Midpoint splits of compile units over the backend output cap.
    pub unit_splits: u64,
    /// Compilations stopped by cancellation.
    pub cancellations: u64,
}

/// Compiles a [`NodeGraph`] into an operation stream and runs it.
///
/// The first [`Evaluator::evaluate`] validates, schedules and compiles, running each operation
/// as it is appended. Later calls replay the cached stream until [`Evaluator::invalidate`].
pub struct Evaluator {
    graph: NodeGraph,
    sinks: Vec<NodeId>,
    opts: EvaluatorOpts,
    backend: Box<dyn ExecutionBackend>,
    diagnostics: Box<dyn DiagnosticsSink>,
    results: ResultStore,
    stream: Option<OperationStream>,
    kernels: KernelCache,
    published: BTreeMap<String, PublishedResult>,
    previews: BTreeMap<NodeId, Preview>,
    cancel: CancelToken,
    stats: EvaluatorStats,
}

impl Evaluator {
    /// Evaluator for `sinks` of `graph` with the CPU backend, a default buffer pool and
    /// `tracing` diagnostics.
    pub fn new(graph: NodeGraph, sinks: impl IntoIterator<Item = NodeId>, opts: EvaluatorOpts) -> Self {
        Self {
            graph,
            sinks: sinks.into_iter().collect(),
            opts,
            backend: Box::new(CpuBackend::default()),
            diagnostics: Box::new(TracingDiagnostics),
            results: ResultStore::new(Box::new(BufferPool::default())),
            stream: None,
            kernels: KernelCache::new(),
            published: BTreeMap::new(),
            previews: BTreeMap::new(),
            cancel: CancelToken::new(),
            stats: EvaluatorStats::default(),
        }
    }

    /// Replace the execution backend. Drops the stream and the kernel cache.
    pub fn with_backend(mut self, backend: impl ExecutionBackend + 'static) -> Self {
        self.backend = Box::new(backend);
        self.kernels.clear();
        self.invalidate();
        self
    }

    /// Replace the resource allocator.
    pub fn with_allocator(mut self, allocator: impl ResourceAllocator + 'static) -> Self {
        self.invalidate();
        self.results.set_allocator(Box::new(allocator));
        self
    }

    /// Replace the diagnostics sink.
    pub fn with_diagnostics(mut self, sink: impl DiagnosticsSink + 'static) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    /// Use an externally created cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Graph being evaluated.
    pub fn graph(&self) -> &NodeGraph {
        &self.graph
    }

    /// Mutable access to the graph. Invalidates the compiled stream.
    pub fn graph_mut(&mut self) -> &mut NodeGraph {
        self.invalidate();
        &mut self.graph
    }

    /// Replace the requested sinks. Invalidates the compiled stream.
    pub fn set_sinks(&mut self, sinks: impl IntoIterator<Item = NodeId>) {
        self.invalidate();
        self.sinks = sinks.into_iter().collect();
    }

    /// Options in effect.
    pub fn opts(&self) -> &EvaluatorOpts {
        &self.opts
    }

    /// Change options. Invalidates the compiled stream.
    pub fn set_opts(&mut self, opts: EvaluatorOpts) {
        self.invalidate();
        self.opts = opts;
    }

    /// Token cancelling the next or running compilation.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Whether a compiled stream is cached.
    pub fn is_compiled(&self) -> bool {
        self.stream.is_some()
    }

    /// Compile on first use, replay the cached stream afterwards.
    ///
    /// Structural, allocation and backend errors tear down every in-flight result, drop any
    /// partial stream and are reported to the diagnostics sink before they are returned.
    #[tracing::instrument(skip(self), fields(compiled = self.stream.is_some(), sinks = self.sinks.len()))]
    pub fn evaluate(&mut self) -> GraphResult<EvaluationStatus> {
        self.published.clear();
        self.previews.clear();
        if self.stream.is_some() {
            self.replay()
        } else {
            self.compile()
        }
    }

    /// Discard the compiled stream and free every result. The kernel cache is kept.
    #[tracing::instrument(skip(self))]
    pub fn invalidate(&mut self) {
        self.stream = None;
        self.results.release_all();
    }

    fn replay(&mut self) -> GraphResult<EvaluationStatus> {
        let outcome = match self.stream.as_mut() {
            Some(stream) => {
                let mut env = EvalEnv {
                    results: &mut self.results,
                    opts: &self.opts,
                    published: &mut self.published,
                    previews: &mut self.previews,
                };
                stream.iter_mut().try_for_each(|op| op.evaluate(&mut env))
            }
            None => Err(GraphError::evaluation("no compiled stream to replay")),
        };
        match outcome {
            Ok(()) => {
                self.stats.replays += 1;
                Ok(EvaluationStatus::Completed)
            }
            Err(err) => Err(self.abort(err)),
        }
    }

    fn compile(&mut self) -> GraphResult<EvaluationStatus> {
        self.results.release_all();
        let topo = match resolve_topology(&self.graph, &self.sinks) {
            Ok(topo) => topo,
            Err(err) => {
                self.diagnostics.report(Diagnostic::error(err.to_string()));
                return Err(err);
            }
        };
        let schedule = schedule_topology(&self.graph, &topo, &self.sinks);
        tracing::debug!(nodes = schedule.len(), "schedule computed");

        let mut stream = OperationStream::new();
        let outcome = Compiler {
            graph: &self.graph,
            topo: &topo,
            schedule: &schedule,
            backend: self.backend.as_ref(),
            kernels: &mut self.kernels,
            env: EvalEnv {
                results: &mut self.results,
                opts: &self.opts,
                published: &mut self.published,
                previews: &mut self.previews,
            },
            stream: &mut stream,
            cancel: &self.cancel,
            stats: &mut self.stats,
            state: CompileState::new(),
        }
        .run();

        match outcome {
            Ok(CompileOutcome::Completed) => {
                tracing::debug!(operations = stream.len(), "compilation finished");
                self.stream = Some(stream);
                self.stats.compilations += 1;
                Ok(EvaluationStatus::Completed)
            }
            Ok(CompileOutcome::Cancelled) => {
                let appended = stream.len();
                drop(stream);
                self.results.release_all();
                self.published.clear();
                self.previews.clear();
                self.cancel.clear();
                self.stats.cancellations += 1;
                tracing::warn!(appended, "compilation cancelled");
                self.diagnostics.report(Diagnostic::info(format!(
                    "evaluation cancelled after {appended} operations"
                )));
                Ok(EvaluationStatus::Cancelled)
            }
            Err(err) => {
                drop(stream);
                Err(self.abort(err))
            }
        }
    }

    fn abort(&mut self, err: GraphError) -> GraphError {
        tracing::warn!(%err, "evaluation aborted, releasing all results");
        self.stream = None;
        self.results.release_all();
        self.published.clear();
        self.previews.clear();
        self.cancel.clear();
        self.diagnostics.report(Diagnostic::error(err.to_string()));
        err
    }

    /// Snapshot published under `label` during the last evaluation.
    pub fn published(&self, label: &str) -> Option<&PublishedResult> {
        self.published.get(label)
    }

    /// Preview of `node` from the last evaluation.
    pub fn preview(&self, node: NodeId) -> Option<&Preview> {
        self.previews.get(&node)
    }

    /// Summaries of the compiled stream; empty when uncompiled.
    pub fn operations(&self) -> Vec<OperationSummary> {
        self.stream
            .as_ref()
            .map(|s| s.summaries(&self.results))
            .unwrap_or_default()
    }

    /// Deterministic text dump of the compiled stream.
    pub fn stream_dump(&self) -> Option<String> {
        self.stream.as_ref().map(OperationStream::dump)
    }

    /// Evaluator counters.
    pub fn stats(&self) -> EvaluatorStats {
        self.stats
    }

    /// Allocation counters of the result store.
    pub fn result_stats(&self) -> ResultStats {
        self.results.stats()
    }
}

impl std::fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluator")
            .field("graph", &self.graph)
            .field("sinks", &self.sinks)
            .field("opts", &self.opts)
            .field("backend", &self.backend.name())
            .field("compiled", &self.stream.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}
