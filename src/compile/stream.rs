use crate::operation::{Operation, OperationKind, OperationSummary};
use crate::result::ResultStore;
use smallvec::SmallVec;

/// Compiled operations in execution order; replayed verbatim until invalidated.
#[derive(Default)]
pub(crate) struct OperationStream {
    ops: Vec<Operation>,
}

impl OperationStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, op: Operation) -> &mut Operation {
        self.ops.push(op);
        let last = self.ops.len() - 1;
        &mut self.ops[last]
    }

    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, Operation> {
        self.ops.iter_mut()
    }

    pub(crate) fn summaries(&self, results: &ResultStore) -> Vec<OperationSummary> {
        self.ops.iter().map(|op| op.summary(results)).collect()
    }

    /// Deterministic text dump of the stream.
    pub(crate) fn dump(&self) -> String {
        let mut s = String::new();
        s.push_str("OperationStream\n");
        s.push_str(&format!("operations: {}\n", self.ops.len()));
        for (i, op) in self.ops.iter().enumerate() {
            let kind = match op.kind() {
                OperationKind::Node(_) => "node".to_owned(),
                OperationKind::Pixel(p) => format!("pixel[{:?}]", p.target()),
                OperationKind::InputSingleValue(v) => format!("value[{v:?}]"),
                OperationKind::ImplicitInput(k) => format!("implicit[{k:?}]"),
                OperationKind::Conversion => "convert".to_owned(),
                OperationKind::Realization { target } => {
                    format!("realize[{}x{}]", target.size().width, target.size().height)
                }
            };
            s.push_str(&format!(
                "  O{}: {} '{}' nodes={:?} outputs={:?}\n",
                i,
                kind,
                op.label(),
                op.nodes().iter().map(|n| n.0).collect::<SmallVec<[u32; 4]>>(),
                op.outputs().iter().map(|r| r.0).collect::<SmallVec<[u32; 2]>>(),
            ));
            for input in op.inputs() {
                s.push_str(&format!(
                    "    in '{}' <- {:?} processors={}\n",
                    input.name,
                    input.source.map(|r| r.0),
                    input.processors.len()
                ));
            }
        }
        s
    }
}
