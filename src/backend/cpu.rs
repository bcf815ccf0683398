use crate::backend::{
    ExecutionBackend, InputBinding, Kernel, KernelBindings, KernelGraph, KernelReport,
    OperandSource, OutputBinding,
};
use crate::foundation::error::{GraphError, GraphResult};
use crate::result::value::Value;
use rayon::prelude::*;
use smallvec::SmallVec;
use std::sync::Arc;

/// Reference CPU backend configuration.
#[derive(Clone, Copy, Debug)]
pub struct CpuBackendOpts {
    /// Run accelerated kernels row-parallel on the rayon pool.
    pub parallel: bool,
    /// Cap on declared outputs per fused kernel.
    pub max_kernel_outputs: Option<usize>,
    /// Compile every unit as a host procedure.
    pub prefer_host: bool,
}

impl Default for CpuBackendOpts {
    fn default() -> Self {
        Self {
            parallel: true,
            max_kernel_outputs: None,
            prefer_host: false,
        }
    }
}

/// Interpreting backend: kernels evaluate the fused node functions pixel by pixel.
///
/// Accelerated kernels run rows in parallel; host procedures run sequentially.
#[derive(Debug, Default, Clone)]
pub struct CpuBackend {
    opts: CpuBackendOpts,
}

impl CpuBackend {
    /// Create a backend.
    pub fn new(opts: CpuBackendOpts) -> Self {
        Self { opts }
    }

    fn compile(&self, graph: &KernelGraph, parallel: bool) -> GraphResult<Arc<dyn Kernel>> {
        check_kernel_graph(graph)?;
        Ok(Arc::new(CpuKernel {
            graph: graph.clone(),
            parallel,
        }))
    }
}

impl ExecutionBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn max_kernel_outputs(&self) -> Option<usize> {
        self.opts.max_kernel_outputs
    }

    fn prefers_host(&self) -> bool {
        self.opts.prefer_host
    }

    #[tracing::instrument(skip_all, fields(nodes = graph.nodes.len(), outputs = graph.outputs.len()))]
    fn compile_kernel(&self, graph: &KernelGraph) -> GraphResult<Arc<dyn Kernel>> {
        self.compile(graph, self.opts.parallel)
    }

    #[tracing::instrument(skip_all, fields(nodes = graph.nodes.len(), outputs = graph.outputs.len()))]
    fn compile_procedure(&self, graph: &KernelGraph) -> GraphResult<Arc<dyn Kernel>> {
        self.compile(graph, false)
    }
}

fn check_kernel_graph(graph: &KernelGraph) -> GraphResult<()> {
    for (ni, node) in graph.nodes.iter().enumerate() {
        for op in &node.operands {
            match op.source {
                OperandSource::Input(i) if i >= graph.inputs.len() => {
                    return Err(GraphError::backend(format!(
                        "kernel node {ni} reads undeclared input {i}"
                    )));
                }
                OperandSource::Node { node: src, output }
                    if src >= ni || output >= graph.nodes[src].output_types.len() =>
                {
                    return Err(GraphError::backend(format!(
                        "kernel node {ni} reads node {src} output {output} out of order"
                    )));
                }
                _ => {}
            }
        }
    }
    for (oi, out) in graph.outputs.iter().enumerate() {
        let valid = graph
            .nodes
            .get(out.node)
            .is_some_and(|n| out.socket < n.output_types.len());
        if !valid {
            return Err(GraphError::backend(format!(
                "kernel output {oi} references missing node output"
            )));
        }
    }
    Ok(())
}

struct CpuKernel {
    graph: KernelGraph,
    parallel: bool,
}

struct RowResult {
    channels: Vec<Vec<f32>>,
    failed: Vec<bool>,
}

impl CpuKernel {
    fn eval_row(&self, inputs: &[InputBinding<'_>], y: u32, width: u32) -> RowResult {
        let g = &self.graph;
        let mut channels = g
            .outputs
            .iter()
            .map(|o| vec![0.0f32; width as usize * o.ty.channel_count()])
            .collect::<Vec<_>>();
        let mut failed = vec![false; g.outputs.len()];
        let mut values: Vec<SmallVec<[Value; 2]>> = vec![SmallVec::new(); g.nodes.len()];
        let mut tainted = vec![false; g.nodes.len()];
        let mut args = SmallVec::<[Value; 4]>::new();

        for x in 0..width {
            for (ni, node) in g.nodes.iter().enumerate() {
                args.clear();
                let mut bad = false;
                for op in &node.operands {
                    let v = match op.source {
                        OperandSource::Input(i) => read_input(&inputs[i], x, y),
                        OperandSource::Node { node: src, output } => {
                            bad |= tainted[src];
                            values[src][output]
                        }
                        OperandSource::Constant(v) => v,
                    };
                    args.push(v.convert(op.ty).unwrap_or_else(|| Value::zero(op.ty)));
                }
                let mut outs = node
                    .output_types
                    .iter()
                    .map(|&t| Value::zero(t))
                    .collect::<SmallVec<[Value; 2]>>();
                if node.function.evaluate(&args, &mut outs).is_err() {
                    bad = true;
                }
                values[ni] = outs;
                tainted[ni] = bad;
            }
            for (oi, out) in g.outputs.iter().enumerate() {
                failed[oi] |= tainted[out.node];
                let c = out.ty.channel_count();
                let v = values[out.node][out.socket]
                    .convert(out.ty)
                    .unwrap_or_else(|| Value::zero(out.ty));
                let at = x as usize * c;
                v.write_channels(&mut channels[oi][at..at + c]);
            }
        }
        RowResult { channels, failed }
    }
}

fn read_input(binding: &InputBinding<'_>, x: u32, y: u32) -> Value {
    match binding {
        InputBinding::Single(v) => *v,
        InputBinding::Image(img) => img.pixel(x, y),
    }
}

impl Kernel for CpuKernel {
    fn dispatch(&self, bindings: &mut KernelBindings<'_>) -> GraphResult<KernelReport> {
        let g = &self.graph;
        if bindings.inputs.len() != g.inputs.len() || bindings.outputs.len() != g.outputs.len() {
            return Err(GraphError::backend(format!(
                "kernel expects {} inputs and {} outputs, got {} and {}",
                g.inputs.len(),
                g.outputs.len(),
                bindings.inputs.len(),
                bindings.outputs.len()
            )));
        }
        let size = bindings.size;
        for (oi, out) in bindings.outputs.iter().enumerate() {
            if let OutputBinding::Image(img) = out
                && (img.size() != size || img.ty() != g.outputs[oi].ty)
            {
                return Err(GraphError::backend(format!(
                    "output {oi} is bound to a {}x{} {:?} buffer, dispatch is {}x{} {:?}",
                    img.size().width,
                    img.size().height,
                    img.ty(),
                    size.width,
                    size.height,
                    g.outputs[oi].ty
                )));
            }
        }
        if g.outputs.is_empty() {
            return Ok(KernelReport::default());
        }

        let inputs = &bindings.inputs;
        let rows: Vec<RowResult> = if self.parallel && size.height > 1 {
            (0..size.height)
                .into_par_iter()
                .map(|y| self.eval_row(inputs, y, size.width))
                .collect()
        } else {
            (0..size.height)
                .map(|y| self.eval_row(inputs, y, size.width))
                .collect()
        };

        let mut report = KernelReport::default();
        for (oi, out) in bindings.outputs.iter_mut().enumerate() {
            if rows.iter().any(|r| r.failed[oi]) {
                report.failed_outputs.push(oi);
            }
            match out {
                OutputBinding::Single(v) => {
                    let ty = g.outputs[oi].ty;
                    **v = rows
                        .first()
                        .map(|r| Value::from_channels(ty, &r.channels[oi]))
                        .unwrap_or_else(|| Value::zero(ty));
                }
                OutputBinding::Image(img) => {
                    let row_len = img.row_len();
                    for (dst, row) in img.data_mut().chunks_exact_mut(row_len).zip(&rows) {
                        dst.copy_from_slice(&row.channels[oi]);
                    }
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/backend/cpu.rs"]
mod tests;
