// Vesper Compiler Diagnostics
// Errors and warnings are pushed to a handler as they are found

use crate::error::Span;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub span: Span,
}

/// Receives compile-time problems with their source position
pub trait DiagnosticHandler {
    fn error(&mut self, span: Span, message: &str);
    fn warn(&mut self, span: Span, message: &str);
}

/// Default handler: forwards diagnostics to `tracing`
#[derive(Debug, Default)]
pub struct TracingDiagnostics;

impl DiagnosticHandler for TracingDiagnostics {
    fn error(&mut self, span: Span, message: &str) {
        tracing::error!(line = span.start.line, column = span.start.column, "{}", message);
    }

    fn warn(&mut self, span: Span, message: &str) {
        tracing::warn!(line = span.start.line, column = span.start.column, "{}", message);
    }
}

/// Collects diagnostics; clones share one list
#[derive(Debug, Clone, Default)]
pub struct DiagnosticCollector {
    items: Arc<Mutex<Vec<Diagnostic>>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.items.lock().clone()
    }

    pub fn errors(&self) -> Vec<Diagnostic> {
        self.by_severity(Severity::Error)
    }

    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.by_severity(Severity::Warning)
    }

    fn by_severity(&self, severity: Severity) -> Vec<Diagnostic> {
        self.items
            .lock()
            .iter()
            .filter(|d| d.severity == severity)
            .cloned()
            .collect()
    }

    fn push(&self, severity: Severity, span: Span, message: &str) {
        self.items.lock().push(Diagnostic {
            severity,
            message: message.to_string(),
            span,
        });
    }
}

impl DiagnosticHandler for DiagnosticCollector {
    fn error(&mut self, span: Span, message: &str) {
        self.push(Severity::Error, span, message);
    }

    fn warn(&mut self, span: Span, message: &str) {
        self.push(Severity::Warning, span, message);
    }
}
