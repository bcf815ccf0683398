use crate::backend::{ExecutionTarget, KernelGraph, OperandSource};
use crate::result::value::{ResultType, Value};
use xxhash_rust::xxh3::Xxh3;

const XXH3_SEED: u64 = 0x3f1c_9a27_d84e_b605;

/// Stable identity of a fused kernel: topology, types, constants, function fingerprints and
/// target. Labels and node ids are not part of it.
pub(crate) fn fingerprint_kernel(graph: &KernelGraph, target: ExecutionTarget) -> u64 {
    let mut h = StableHasher::new();
    h.write_u8(match target {
        ExecutionTarget::Host => 0,
        ExecutionTarget::Accelerated => 1,
    });
    h.write_bool(graph.single_value);
    h.write_u32(graph.inputs.len() as u32);
    for &ty in &graph.inputs {
        write_type(&mut h, ty);
    }
    h.write_u32(graph.nodes.len() as u32);
    for node in &graph.nodes {
        h.write_u64(node.function.fingerprint());
        h.write_u32(node.operands.len() as u32);
        for op in &node.operands {
            write_type(&mut h, op.ty);
            match op.source {
                OperandSource::Input(i) => {
                    h.write_u8(0);
                    h.write_u32(i as u32);
                }
                OperandSource::Node { node, output } => {
                    h.write_u8(1);
                    h.write_u32(node as u32);
                    h.write_u32(output as u32);
                }
                OperandSource::Constant(v) => {
                    h.write_u8(2);
                    write_value(&mut h, v);
                }
            }
        }
        h.write_u32(node.output_types.len() as u32);
        for &ty in &node.output_types {
            write_type(&mut h, ty);
        }
    }
    h.write_u32(graph.outputs.len() as u32);
    for out in &graph.outputs {
        h.write_u32(out.node as u32);
        h.write_u32(out.socket as u32);
        write_type(&mut h, out.ty);
    }
    h.finish()
}

struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        }
    }

    fn write_bytes(&mut self, b: &[u8]) {
        self.inner.update(b);
    }

    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    fn finish(self) -> u64 {
        self.inner.digest()
    }
}

fn write_type(h: &mut StableHasher, ty: ResultType) {
    h.write_u8(match ty {
        ResultType::Float => 0,
        ResultType::Int => 1,
        ResultType::Bool => 2,
        ResultType::Color => 3,
        ResultType::Vector2 => 4,
        ResultType::Vector3 => 5,
        ResultType::Vector4 => 6,
        ResultType::Menu => 7,
    });
}

fn write_value(h: &mut StableHasher, v: Value) {
    write_type(h, v.ty());
    let mut channels = [0.0f32; 4];
    v.write_channels(&mut channels);
    for c in &channels[..v.ty().channel_count()] {
        h.write_f32(*c);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/compile/fingerprint.rs"]
mod tests;
