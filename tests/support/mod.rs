#![allow(dead_code)]

mod kernels;

pub use kernels::*;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use wavyte_graph::{
    CancelToken, Domain, ExecuteContext, GraphResult, ImplicitInput, InputDeclaration,
    InputRealizationMode, NodeDeclaration, NodeKernel, NumericError, PixelFunction, ResultType,
    Size, Value,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub const RED: Value = Value::Color([1.0, 0.0, 0.0, 1.0]);
pub const BLUE: Value = Value::Color([0.0, 0.0, 1.0, 1.0]);

/// [`Fill`] that cancels `token` once it has run `after` times in total.
pub struct CancellingFill {
    pub fill: Fill,
    pub token: CancelToken,
    pub runs: Arc<AtomicUsize>,
    pub after: usize,
}

impl NodeKernel for CancellingFill {
    fn name(&self) -> &str {
        "cancelling_fill"
    }

    fn declare(&self) -> NodeDeclaration {
        self.fill.declare()
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        self.fill.execute(ctx)?;
        if self.runs.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.token.cancel();
        }
        Ok(())
    }
}

/// Standalone sink publishing its input under `label`.
pub struct Viewer {
    pub label: &'static str,
    pub default: Value,
}

impl Viewer {
    pub fn color(label: &'static str) -> Self {
        Self {
            label,
            default: Value::Color([0.0; 4]),
        }
    }

    pub fn float(label: &'static str) -> Self {
        Self {
            label,
            default: Value::Float(0.0),
        }
    }
}

impl NodeKernel for Viewer {
    fn name(&self) -> &str {
        "viewer"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new().input(InputDeclaration::new("Image", self.default))
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.publish(self.label, "Image")
    }
}

/// Standalone node moving its input by `offset` without copying pixels.
pub struct Translate(pub f64, pub f64);

impl NodeKernel for Translate {
    fn name(&self) -> &str {
        "translate"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new()
            .input(
                InputDeclaration::new("Image", Value::Color([0.0; 4]))
                    .realization(InputRealizationMode::None),
            )
            .output("Image", ResultType::Color)
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.pass_through("Image", "Image")?;
        ctx.transform_output("Image", kurbo::Affine::translate((self.0, self.1)))
    }
}

/// Standalone node inverting colors in place, reusing its input storage.
pub struct Invert;

impl NodeKernel for Invert {
    fn name(&self) -> &str {
        "invert"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new()
            .input(
                InputDeclaration::new("Image", Value::Color([0.0; 4]))
                    .realization(InputRealizationMode::None),
            )
            .output("Image", ResultType::Color)
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        if ctx.input("Image")?.is_single_value() {
            let v = ctx.input("Image")?.single_value().unwrap_or(Value::Color([0.0; 4]));
            return ctx.allocate_single_value("Image", invert(v));
        }
        ctx.steal("Image", "Image")?;
        ctx.write_image("Image", |_, img| {
            let size = img.size();
            for y in 0..size.height {
                for x in 0..size.width {
                    img.set_pixel(x, y, invert(img.pixel(x, y)));
                }
            }
            Ok(())
        })
    }
}

fn invert(v: Value) -> Value {
    match v {
        Value::Color([r, g, b, a]) => Value::Color([1.0 - r, 1.0 - g, 1.0 - b, a]),
        other => other,
    }
}

/// Standalone node with `count` color inputs, forwarding the first one.
pub struct Gather(pub usize);

impl NodeKernel for Gather {
    fn name(&self) -> &str {
        "gather"
    }

    fn declare(&self) -> NodeDeclaration {
        (0..self.0)
            .fold(NodeDeclaration::new(), |decl, i| {
                decl.input(
                    InputDeclaration::new(format!("Input{i}"), Value::Color([0.0; 4]))
                        .realization(InputRealizationMode::None),
                )
            })
            .output("Image", ResultType::Color)
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.pass_through("Input0", "Image")
    }
}

/// Per-pixel `mix(A, B, Factor)`; `A` has domain priority 0, `B` priority 1.
pub struct Mix;

struct MixFn;

impl PixelFunction for MixFn {
    fn fingerprint(&self) -> u64 {
        0x6d69_7800
    }

    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) -> Result<(), NumericError> {
        let (Value::Color(a), Value::Color(b), Value::Float(t)) = (inputs[0], inputs[1], inputs[2])
        else {
            return Err(NumericError::new("mix expects color, color, float"));
        };
        outputs[0] = Value::Color(std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t));
        Ok(())
    }
}

impl NodeKernel for Mix {
    fn name(&self) -> &str {
        "mix"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new()
            .input(InputDeclaration::new("A", Value::Color([0.0; 4])).priority(0))
            .input(InputDeclaration::new("B", Value::Color([0.0; 4])).priority(1))
            .input(InputDeclaration::new("Factor", Value::Float(0.5)).priority(2))
            .output("Result", ResultType::Color)
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(MixFn))
    }
}

/// Per-pixel scale of a color by a baked factor.
pub struct Scale(pub f32);

struct ScaleFn(f32);

impl PixelFunction for ScaleFn {
    fn fingerprint(&self) -> u64 {
        0x5ca1_e000_0000_0000 | u64::from(self.0.to_bits())
    }

    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) -> Result<(), NumericError> {
        let Value::Color(c) = inputs[0] else {
            return Err(NumericError::new("scale expects a color"));
        };
        outputs[0] = Value::Color(c.map(|v| v * self.0));
        Ok(())
    }
}

impl NodeKernel for Scale {
    fn name(&self) -> &str {
        "scale"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new()
            .input(InputDeclaration::new("Color", Value::Color([0.0; 4])))
            .output("Result", ResultType::Color)
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(ScaleFn(self.0)))
    }
}

/// Per-pixel float division; a zero divisor is a numeric failure.
pub struct Divide;

struct DivideFn;

impl PixelFunction for DivideFn {
    fn fingerprint(&self) -> u64 {
        0xd1d1_0000
    }

    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) -> Result<(), NumericError> {
        let (Some(a), Some(b)) = (inputs[0].as_float(), inputs[1].as_float()) else {
            return Err(NumericError::new("divide expects scalars"));
        };
        if b == 0.0 {
            return Err(NumericError::new("division by zero"));
        }
        outputs[0] = Value::Float(a / b);
        Ok(())
    }
}

impl NodeKernel for Divide {
    fn name(&self) -> &str {
        "divide"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new()
            .input(InputDeclaration::new("A", Value::Float(1.0)))
            .input(InputDeclaration::new("B", Value::Float(1.0)))
            .output("Value", ResultType::Float)
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(DivideFn))
    }
}

/// Per-pixel passthrough of texture coordinates, synthesized when unlinked.
pub struct Coordinates;

struct CoordinatesFn;

impl PixelFunction for CoordinatesFn {
    fn fingerprint(&self) -> u64 {
        0xc00d_0000
    }

    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) -> Result<(), NumericError> {
        outputs[0] = inputs[0];
        Ok(())
    }
}

impl NodeKernel for Coordinates {
    fn name(&self) -> &str {
        "coordinates"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new()
            .input(
                InputDeclaration::new("Vector", Value::Vector2([0.0; 2]))
                    .implicit(ImplicitInput::TextureCoordinates),
            )
            .output("Vector", ResultType::Vector2)
    }

    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        Some(Arc::new(CoordinatesFn))
    }
}

pub fn assert_color_near(actual: Value, expected: [f32; 4]) {
    let Value::Color(c) = actual else {
        panic!("expected a color, got {actual:?}");
    };
    for (a, e) in c.iter().zip(expected) {
        assert!((a - e).abs() < 1e-5, "got {c:?}, expected {expected:?}");
    }
}
