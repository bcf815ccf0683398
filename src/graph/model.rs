use crate::foundation::error::{GraphError, GraphResult, NumericError};
use crate::foundation::ids::NodeId;
use crate::operation::descriptor::{ImplicitInput, InputDescriptor, InputRealizationMode};
use crate::operation::node::ExecuteContext;
use crate::result::value::{ResultType, Value};
use std::sync::Arc;

/// Behavior of one graph node, supplied by the host.
///
/// Per-pixel nodes return a [`PixelFunction`] and are fused into compile units; every other node
/// runs standalone through [`NodeKernel::execute`].
pub trait NodeKernel: Send + Sync {
    /// Kind name used in diagnostics and dumps.
    fn name(&self) -> &str;

    /// Sockets of this node. Called once when the node is added to a graph.
    fn declare(&self) -> NodeDeclaration;

    /// Unsupported nodes reachable from a sink fail graph validation.
    fn is_supported(&self) -> bool {
        true
    }

    /// Per-pixel function for fusible nodes.
    fn pixel_function(&self) -> Option<Arc<dyn PixelFunction>> {
        None
    }

    /// Compute the outputs of a standalone node.
    fn execute(&self, ctx: &mut ExecuteContext<'_>) -> GraphResult<()> {
        Err(GraphError::evaluation(format!(
            "node kind '{}' cannot execute standalone (node {})",
            self.name(),
            ctx.node()
        )))
    }
}

/// Per-pixel computation of a fusible node.
pub trait PixelFunction: Send + Sync {
    /// Stable identity of the computation, including any parameters baked into it.
    fn fingerprint(&self) -> u64;

    /// Compute one pixel. `inputs` follow the declared input order converted to the declared
    /// types; `outputs` arrive zeroed with the declared output types.
    fn evaluate(&self, inputs: &[Value], outputs: &mut [Value]) -> Result<(), NumericError>;
}

/// Declared input socket.
#[derive(Clone, Debug, PartialEq)]
pub struct InputDeclaration {
    /// Socket name, unique per node.
    pub name: String,
    /// Value used when the socket is unlinked.
    pub default: Value,
    /// Operation-level metadata.
    pub descriptor: InputDescriptor,
}

impl InputDeclaration {
    /// Input expecting the type of `default`.
    pub fn new(name: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            default,
            descriptor: InputDescriptor::new(default.ty()),
        }
    }

    /// Set the domain priority.
    pub fn priority(mut self, priority: u32) -> Self {
        self.descriptor = self.descriptor.with_priority(priority);
        self
    }

    /// Set the realization mode.
    pub fn realization(mut self, mode: InputRealizationMode) -> Self {
        self.descriptor = self.descriptor.with_realization(mode);
        self
    }

    /// Mark the input as single-value only.
    pub fn single_value(mut self) -> Self {
        self.descriptor = self.descriptor.single_value();
        self
    }

    /// Synthesize `implicit` when unlinked.
    pub fn implicit(mut self, implicit: ImplicitInput) -> Self {
        self.descriptor = self.descriptor.with_implicit(implicit);
        self
    }
}

/// Declared output socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputDeclaration {
    /// Socket name, unique per node.
    pub name: String,
    /// Produced type.
    pub ty: ResultType,
}

/// Input and output sockets of a node, in socket order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeDeclaration {
    /// Inputs.
    pub inputs: Vec<InputDeclaration>,
    /// Outputs.
    pub outputs: Vec<OutputDeclaration>,
}

impl NodeDeclaration {
    /// Empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an input.
    pub fn input(mut self, input: InputDeclaration) -> Self {
        self.inputs.push(input);
        self
    }

    /// Append an output.
    pub fn output(mut self, name: impl Into<String>, ty: ResultType) -> Self {
        self.outputs.push(OutputDeclaration {
            name: name.into(),
            ty,
        });
        self
    }

    pub(crate) fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|i| i.name == name)
    }

    pub(crate) fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|o| o.name == name)
    }
}

/// A link between two sockets, by name. Names are resolved during validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Link {
    /// Producing node.
    pub from: NodeId,
    /// Output socket name on `from`.
    pub from_socket: String,
    /// Consuming node.
    pub to: NodeId,
    /// Input socket name on `to`.
    pub to_socket: String,
}

pub(crate) struct GraphNode {
    pub(crate) label: String,
    pub(crate) kernel: Arc<dyn NodeKernel>,
    pub(crate) declaration: NodeDeclaration,
    pub(crate) pixel: Option<Arc<dyn PixelFunction>>,
    pub(crate) preview: bool,
}

impl GraphNode {
    pub(crate) fn is_pixel(&self) -> bool {
        self.pixel.is_some()
    }
}

/// Directed graph of processing nodes.
///
/// Nodes are identified by insertion order. Links are stored unresolved so a malformed graph can
/// be built and rejected at compilation time.
#[derive(Default)]
pub struct NodeGraph {
    nodes: Vec<GraphNode>,
    links: Vec<Link>,
}

impl NodeGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node and return its id.
    pub fn add_node(&mut self, label: impl Into<String>, kernel: impl NodeKernel + 'static) -> NodeId {
        self.add_shared_node(label, Arc::new(kernel))
    }

    /// Add a node whose kernel is shared with other graphs.
    pub fn add_shared_node(&mut self, label: impl Into<String>, kernel: Arc<dyn NodeKernel>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let declaration = kernel.declare();
        let pixel = kernel.pixel_function();
        self.nodes.push(GraphNode {
            label: label.into(),
            kernel,
            declaration,
            pixel,
            preview: false,
        });
        id
    }

    /// Link `from.from_socket` to `to.to_socket`.
    pub fn link(
        &mut self,
        from: NodeId,
        from_socket: impl Into<String>,
        to: NodeId,
        to_socket: impl Into<String>,
    ) {
        self.links.push(Link {
            from,
            from_socket: from_socket.into(),
            to,
            to_socket: to_socket.into(),
        });
    }

    /// Override the default value of an input socket.
    pub fn set_default(&mut self, node: NodeId, socket: &str, value: Value) -> GraphResult<()> {
        let n = self
            .nodes
            .get_mut(node.index())
            .ok_or_else(|| GraphError::structure(format!("undefined node {node}")))?;
        let input = n
            .declaration
            .inputs
            .iter_mut()
            .find(|i| i.name == socket)
            .ok_or_else(|| {
                GraphError::structure(format!("node {node} has no input socket '{socket}'"))
            })?;
        input.default = value.convert(input.descriptor.expected_type).ok_or_else(|| {
            GraphError::structure(format!(
                "default for {node}.{socket} cannot convert from {:?} to {:?}",
                value.ty(),
                input.descriptor.expected_type
            ))
        })?;
        Ok(())
    }

    /// Request a preview thumbnail of the node's first output.
    pub fn set_preview(&mut self, node: NodeId, enabled: bool) -> GraphResult<()> {
        let n = self
            .nodes
            .get_mut(node.index())
            .ok_or_else(|| GraphError::structure(format!("undefined node {node}")))?;
        n.preview = enabled;
        Ok(())
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Return `true` when the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Links in insertion order.
    pub fn links(&self) -> &[Link] {
        &self.links
    }

    /// Label of `node`.
    pub fn label(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node.index()).map(|n| n.label.as_str())
    }

    /// Declared sockets of `node`.
    pub fn declaration(&self, node: NodeId) -> Option<&NodeDeclaration> {
        self.nodes.get(node.index()).map(|n| &n.declaration)
    }

    pub(crate) fn node(&self, node: NodeId) -> &GraphNode {
        &self.nodes[node.index()]
    }

    pub(crate) fn contains(&self, node: NodeId) -> bool {
        node.index() < self.nodes.len()
    }
}

impl std::fmt::Debug for NodeGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeGraph")
            .field(
                "nodes",
                &self
                    .nodes
                    .iter()
                    .map(|n| (n.label.as_str(), n.kernel.name()))
                    .collect::<Vec<_>>(),
            )
            .field("links", &self.links)
            .finish()
    }
}
