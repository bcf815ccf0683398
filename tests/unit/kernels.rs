//! Node kernels for the unit tests: the shared fixtures plus unit-only kinds.

use crate::{
    Domain, ExecuteContext, GraphResult, ImplicitInput, InputDeclaration, NodeDeclaration,
    NodeKernel, NumericError, PixelFunction, ResultType, Size, Value,
};

#[path = "../support/kernels.rs"]
mod shared;

pub(crate) use shared::{Constant, Coordinates, Divide, DivideFn, Fill, Mix, Scale};

/// Standalone consumer of one color input, with no outputs.
pub(crate) struct Viewer;

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

/// A node kind the backend cannot run.
pub(crate) struct Unsupported;

impl NodeKernel for Unsupported {
    fn name(&self) -> &str {
        "unsupported"
    }

    fn declare(&self) -> NodeDeclaration {
        NodeDeclaration::new().output("Image", ResultType::Color)
    }

    fn is_supported(&self) -> bool {
        false
    }
}
