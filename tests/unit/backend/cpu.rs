use super::*;
use crate::backend::{KernelNode, KernelOperand, KernelOutput};
use crate::domain::Size;
use crate::foundation::ids::NodeId;
use crate::graph::model::PixelFunction;
use crate::result::value::{ImageBuffer, Precision, ResultType};
use crate::test_kernels::DivideFn;
use crate::NumericError;

struct AddFn;

impl PixelFunction for AddFn {
    fn fingerprint(&self) -> u64 {
        0xadd
    }

    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) -> Result<(), NumericError> {
        let a = inputs[0].as_float().unwrap_or(0.0);
        let b = inputs[1].as_float().unwrap_or(0.0);
        outputs[0] = Value::Float(a + b);
        Ok(())
    }
}

fn operand(source: OperandSource) -> KernelOperand {
    KernelOperand {
        source,
        ty: ResultType::Float,
    }
}

fn node(i: u32, function: Arc<dyn PixelFunction>, operands: Vec<KernelOperand>) -> KernelNode {
    KernelNode {
        node: NodeId(i),
        label: format!("n{i}"),
        function,
        operands,
        output_types: vec![ResultType::Float],
    }
}

/// `out0 = in0 + 1`, `out1 = (in0 + 1) / in1`.
fn add_then_divide() -> KernelGraph {
    KernelGraph {
        inputs: vec![ResultType::Float, ResultType::Float],
        nodes: vec![
            node(
                0,
                Arc::new(AddFn),
                vec![
                    operand(OperandSource::Input(0)),
                    operand(OperandSource::Constant(Value::Float(1.0))),
                ],
            ),
            node(
                1,
                Arc::new(DivideFn),
                vec![
                    operand(OperandSource::Node { node: 0, output: 0 }),
                    operand(OperandSource::Input(1)),
                ],
            ),
        ],
        outputs: vec![
            KernelOutput {
                node: 0,
                socket: 0,
                ty: ResultType::Float,
            },
            KernelOutput {
                node: 1,
                socket: 0,
                ty: ResultType::Float,
            },
        ],
        single_value: false,
    }
}

fn ramp(size: Size) -> ImageBuffer {
    let mut img = ImageBuffer::new(size, ResultType::Float, Precision::Full);
    for y in 0..size.height {
        for x in 0..size.width {
            img.set_pixel(x, y, Value::Float((y * size.width + x) as f32));
        }
    }
    img
}

fn run(
    kernel: &dyn Kernel,
    size: Size,
    inputs: Vec<InputBinding<'_>>,
) -> (ImageBuffer, ImageBuffer, KernelReport) {
    let mut a = ImageBuffer::new(size, ResultType::Float, Precision::Full);
    let mut b = ImageBuffer::new(size, ResultType::Float, Precision::Full);
    let report = {
        let mut bindings = KernelBindings {
            size,
            inputs,
            outputs: vec![OutputBinding::Image(&mut a), OutputBinding::Image(&mut b)],
        };
        kernel.dispatch(&mut bindings).unwrap()
    };
    (a, b, report)
}

#[test]
fn accelerated_and_host_kernels_agree() {
    let backend = CpuBackend::default();
    let graph = add_then_divide();
    let size = Size::new(5, 4);
    let input = ramp(size);

    let fast = backend.compile_kernel(&graph).unwrap();
    let host = backend.compile_procedure(&graph).unwrap();
    let bind = || vec![InputBinding::Image(&input), InputBinding::Single(Value::Float(2.0))];
    let (fa, fb, freport) = run(fast.as_ref(), size, bind());
    let (ha, hb, hreport) = run(host.as_ref(), size, bind());

    assert_eq!(fa, ha);
    assert_eq!(fb, hb);
    assert!(freport.failed_outputs.is_empty());
    assert!(hreport.failed_outputs.is_empty());
    assert_eq!(fa.pixel(3, 2), Value::Float(14.0));
    assert_eq!(fb.pixel(3, 2), Value::Float(7.0));
}

#[test]
fn numeric_failures_taint_only_downstream_outputs() {
    let backend = CpuBackend::default();
    let kernel = backend.compile_kernel(&add_then_divide()).unwrap();
    let size = Size::new(3, 3);
    let input = ramp(size);
    let (a, _, report) = run(
        kernel.as_ref(),
        size,
        vec![InputBinding::Image(&input), InputBinding::Single(Value::Float(0.0))],
    );
    assert_eq!(report.failed_outputs, vec![1]);
    assert_eq!(a.pixel(1, 0), Value::Float(2.0));
}

#[test]
fn single_value_dispatch_writes_values() {
    let mut graph = add_then_divide();
    graph.single_value = true;
    let kernel = CpuBackend::default().compile_procedure(&graph).unwrap();
    let mut sum = Value::Float(0.0);
    let mut quotient = Value::Float(0.0);
    let report = kernel
        .dispatch(&mut KernelBindings {
            size: Size::new(1, 1),
            inputs: vec![
                InputBinding::Single(Value::Float(3.0)),
                InputBinding::Single(Value::Float(8.0)),
            ],
            outputs: vec![
                OutputBinding::Single(&mut sum),
                OutputBinding::Single(&mut quotient),
            ],
        })
        .unwrap();
    assert!(report.failed_outputs.is_empty());
    assert_eq!(sum, Value::Float(4.0));
    assert_eq!(quotient, Value::Float(0.5));
}

#[test]
fn rejects_malformed_graphs() {
    let backend = CpuBackend::default();
    let mut graph = add_then_divide();
    graph.nodes[0].operands[0] = operand(OperandSource::Node { node: 1, output: 0 });
    assert!(matches!(
        backend.compile_kernel(&graph),
        Err(GraphError::Backend(_))
    ));

    let mut graph = add_then_divide();
    graph.nodes[1].operands[1] = operand(OperandSource::Input(5));
    assert!(backend.compile_procedure(&graph).is_err());

    let mut graph = add_then_divide();
    graph.outputs[0].socket = 3;
    assert!(backend.compile_kernel(&graph).is_err());
}

#[test]
fn rejects_mismatched_bindings() {
    let kernel = CpuBackend::default()
        .compile_kernel(&add_then_divide())
        .unwrap();
    let size = Size::new(2, 2);
    let input = ramp(size);
    let mut small = ImageBuffer::new(Size::new(1, 1), ResultType::Float, Precision::Full);
    let mut other = ImageBuffer::new(size, ResultType::Float, Precision::Full);
    let err = kernel
        .dispatch(&mut KernelBindings {
            size,
            inputs: vec![InputBinding::Image(&input), InputBinding::Single(Value::Float(1.0))],
            outputs: vec![OutputBinding::Image(&mut small), OutputBinding::Image(&mut other)],
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::Backend(_)));

    let err = kernel
        .dispatch(&mut KernelBindings {
            size,
            inputs: vec![InputBinding::Image(&input)],
            outputs: Vec::new(),
        })
        .unwrap_err();
    assert!(matches!(err, GraphError::Backend(_)));
}

#[test]
fn options_are_reported() {
    let backend = CpuBackend::new(CpuBackendOpts {
        parallel: false,
        max_kernel_outputs: Some(3),
        prefer_host: true,
    });
    assert_eq!(backend.name(), "cpu");
    assert_eq!(backend.max_kernel_outputs(), Some(3));
    assert!(backend.prefers_host());
    assert_eq!(CpuBackend::default().max_kernel_outputs(), None);
}
