/// Identifier of a node inside a [`crate::NodeGraph`], assigned in insertion order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
pub struct NodeId(pub u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ResultId(pub(crate) u32);

impl ResultId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// An output socket of a node, by socket position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct OutputRef {
    pub(crate) node: NodeId,
    pub(crate) socket: usize,
}

/// An input socket of a node, by socket position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct InputRef {
    pub(crate) node: NodeId,
    pub(crate) socket: usize,
}
