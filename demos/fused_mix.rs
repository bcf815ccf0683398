use std::sync::Arc;
use wavyte_graph::{
    Domain, EvaluatorOpts, Evaluator, ExecuteContext, GraphResult, InputDeclaration,
    NodeDeclaration, NodeGraph, NodeKernel, NumericError, PixelFunction, ResultType, Size, Value,
};

struct Fill(Size, [f32; 4]);

impl NodeKernel for Fill {
    fn name(&self) -> &str {
        "fill"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new().output("Image", ResultType::Color)
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.allocate_image_on("Image", Domain::new(self.0)?)?;
        let color = Value::Color(self.1);
        ctx.write_image("Image", |_, img| {
            for y in 0..img.size().height {
                for x in 0..img.size().width {
                    img.set_pixel(x, y, color);
                }
            }
            Ok(())
        })
    }
}

struct MixFn;

impl PixelFunction for MixFn {
    fn fingerprint(&self) -> u64 {
        1
    }

    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) -> Result<(), NumericError> {
        let (Value::Color(a), Value::Color(b), Some(t)) = (inputs[0], inputs[1], inputs[2].as_float())
        else {
            return Err(NumericError::new("mix expects two colors and a factor"));
        };
        outputs[0] = Value::Color(std::array::from_fn(|i| a[i] + (b[i] - a[i]) * t));
        Ok(())
    }
}

struct Mix;

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

struct Viewer;

impl NodeKernel for Viewer {
    fn name(&self) -> &str {
        "viewer"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new().input(InputDeclaration::new("Image", Value::Color([0.0; 4])))
    }

    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        ctx.publish("viewer", "Image")
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut g = NodeGraph::new();
    let red = g.add_node("red", Fill(Size::new(64, 64), [1.0, 0.0, 0.0, 1.0]));
    let blue = g.add_node("blue", Fill(Size::new(32, 32), [0.0, 0.0, 1.0, 1.0]));
    let first = g.add_node("first", Mix);
    let second = g.add_node("second", Mix);
    let viewer = g.add_node("viewer", Viewer);
    g.link(red, "Image", first, "A");
    g.link(blue, "Image", first, "B");
    g.link(first, "Result", second, "A");
    g.link(red, "Image", second, "B");
    g.link(second, "Result", viewer, "Image");
    g.set_default(second, "Factor", Value::Float(0.25))?;
    g.set_preview(first, true)?;

    let mut eval = Evaluator::new(g, [viewer], EvaluatorOpts::default());
    for pass in 0..3 {
        let status = eval.evaluate()?;
        let center = eval.published("viewer").map(|p| match &p.value {
            wavyte_graph::PublishedValue::Image(img) => img.pixel(32, 32),
            wavyte_graph::PublishedValue::Single(v) => *v,
        });
        println!("pass {pass}: {status:?}, center = {center:?}");
    }

    if let Some(dump) = eval.stream_dump() {
        print!("{dump}");
    }
    println!("{:?}", eval.stats());
    println!("{:?}", eval.result_stats());
    Ok(())
}
