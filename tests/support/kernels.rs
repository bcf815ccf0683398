//! Node kernels used by both the unit tests and the integration tests.
//!
//! Graph API names come from the including module.

#![allow(dead_code)]

use super::*;
use std::sync::Arc;

/// Standalone source filling an image of `size` with `value`.
pub struct Fill {
    pub size: Size,
    pub value: Value,
}

impl Fill {
    pub fn new(width: u32, height: u32, value: Value) -> Self {
        Self {
            size: Size::new(width, height),
            value,
        }
    }
}

impl NodeKernel for Fill {
    fn name(&self) -> &str {
        "fill"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new().output("Image", self.value.ty())
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.allocate_image_on("Image", Domain::new(self.size)?)?;
        let value = self.value;
        ctx.write_image("Image", |_, img| {
            let size = img.size();
            for y in 0..size.height {
                for x in 0..size.width {
                    img.set_pixel(x, y, value);
                }
            }
            Ok(())
        })
    }
}

/// Standalone single-value source.
pub struct Constant(pub Value);

impl NodeKernel for Constant {
    fn name(&self) -> &str {
        "constant"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new().output("Value", self.0.ty())
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.allocate_single_value("Value", self.0)
    }
}

/// Standalone source whose pixel pass always fails, degrading its output.
pub struct FailingFill(pub Fill);

impl NodeKernel for FailingFill {
    fn name(&self) -> &str {
        "failing_fill"
    }

    fn declare(&self) -> NodeDeclaration {
        self.0.declare()
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.allocate_image_on("Image", Domain::new(self.0.size)?)?;
        ctx.write_image("Image", |_, _| Err(NumericError::new("source pixels are not finite")))
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

pub struct DivideFn;

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
