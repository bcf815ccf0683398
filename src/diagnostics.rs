use std::sync::{Arc, Mutex, PoisonError};

/// Importance of a [`Diagnostic`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Informational, e.g. a cancelled pass.
    Info,
    /// Something was torn down.
    Warning,
    /// The pass failed.
    Error,
}

/// Human-readable message about one evaluation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// Message text.
    pub message: String,
}

impl Diagnostic {
    /// Informational diagnostic.
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    /// Warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    /// Error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// Receiver of validation failures, teardown notices and cancellations.
///
/// Owned by one [`crate::Evaluator`]; there is no process-wide hook.
pub trait DiagnosticsSink: Send {
    /// Accept one diagnostic.
    fn report(&self, diagnostic: Diagnostic);
}

/// Default sink forwarding diagnostics to `tracing` events.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Info => tracing::info!(detail = %diagnostic.message, "graph diagnostic"),
            Severity::Warning => tracing::warn!(detail = %diagnostic.message, "graph diagnostic"),
            Severity::Error => tracing::error!(detail = %diagnostic.message, "graph diagnostic"),
        }
    }
}

/// Sink collecting diagnostics in memory. Clones share the same buffer.
#[derive(Clone, Debug, Default)]
pub struct MemoryDiagnostics {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl MemoryDiagnostics {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Diagnostics received so far, oldest first.
    pub fn entries(&self) -> Vec<Diagnostic> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop every collected diagnostic.
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl DiagnosticsSink for MemoryDiagnostics {
    fn report(&self, diagnostic: Diagnostic) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(diagnostic);
    }
}
