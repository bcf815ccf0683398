/// Convenience result type used across the graph core.
pub type GraphResult<T> = Result<T, GraphError>;

/// Top-level error taxonomy for compiling and evaluating node graphs.
///
/// Every variant is fatal to the evaluation pass that raised it. Per-pixel numeric failures are
/// reported separately through [`NumericError`] and never unwind.
#[derive(thiserror::Error, Debug)]
pub enum GraphError {
    /// Malformed graph: cycles, undefined nodes or sockets, unsupported node kinds.
    #[error("graph structure error: {0}")]
    Structure(String),

    /// Backing storage for a result could not be acquired.
    #[error("allocation error: {0}")]
    Allocation(String),

    /// The execution backend failed to compile or dispatch a kernel.
    #[error("backend error: {0}")]
    Backend(String),

    /// Contract violations while running an operation stream.
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Wrapped lower-level error from collaborator implementations.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GraphError {
    /// Build a [`GraphError::Structure`] value.
    pub fn structure(msg: impl Into<String>) -> Self {
        Self::Structure(msg.into())
    }

    /// Build a [`GraphError::Allocation`] value.
    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }

    /// Build a [`GraphError::Backend`] value.
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Build a [`GraphError::Evaluation`] value.
    pub fn evaluation(msg: impl Into<String>) -> Self {
        Self::Evaluation(msg.into())
    }
}

/// A node could not compute a value for some input combination.
///
/// Handled locally: the affected output degrades to an invalid (zero) single value.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("numeric failure: {0}")]
pub struct NumericError(pub String);

impl NumericError {
    /// Build a [`NumericError`] from a message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
