use crate::result::value::ResultType;

/// How an input whose domain differs from the operation domain is reconciled.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize,
    serde::Deserialize,
)]
pub enum InputRealizationMode {
    /// Consume the input as is.
    None,
    /// Bake rotation and scale into an axis-aligned buffer, keeping the translation.
    TransformOnly,
    /// Resample onto the operation domain.
    #[default]
    FullDomain,
}

/// Well-known inputs synthesized by the evaluator when a socket is left unlinked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub enum ImplicitInput {
    /// Normalized pixel-center coordinates over the compositing region.
    TextureCoordinates,
}

/// Per-input metadata of an operation, fixed at construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct InputDescriptor {
    /// Type the operation reads; mismatching inputs get a conversion processor.
    pub expected_type: ResultType,
    /// Domain reconciliation policy.
    pub realization_mode: InputRealizationMode,
    /// Domain inference rank, `0` is the highest priority.
    pub domain_priority: u32,
    /// The input is always consumed as a single value and never drives the domain.
    pub expects_single_value: bool,
    /// Input synthesized when the socket is unlinked.
    pub implicit_fallback: Option<ImplicitInput>,
    /// Leave type conversion to the operation itself.
    pub skip_type_conversion: bool,
}

impl InputDescriptor {
    /// Descriptor with default policies for `expected_type`.
    pub fn new(expected_type: ResultType) -> Self {
        Self {
            expected_type,
            realization_mode: InputRealizationMode::FullDomain,
            domain_priority: 0,
            expects_single_value: false,
            implicit_fallback: None,
            skip_type_conversion: false,
        }
    }

    /// Set the realization mode.
    pub fn with_realization(mut self, mode: InputRealizationMode) -> Self {
        self.realization_mode = mode;
        self
    }

    /// Set the domain priority.
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.domain_priority = priority;
        self
    }

    /// Mark the input as single-value only.
    pub fn single_value(mut self) -> Self {
        self.expects_single_value = true;
        self
    }

    /// Synthesize `implicit` when the socket is unlinked.
    pub fn with_implicit(mut self, implicit: ImplicitInput) -> Self {
        self.implicit_fallback = Some(implicit);
        self
    }

    /// Skip the type-conversion processor.
    pub fn skipping_conversion(mut self) -> Self {
        self.skip_type_conversion = true;
        self
    }

    /// Whether an input described this way takes part in domain inference.
    pub(crate) fn drives_domain(&self) -> bool {
        self.realization_mode == InputRealizationMode::FullDomain && !self.expects_single_value
    }
}
