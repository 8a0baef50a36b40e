use std::fmt;

use thiserror::Error;

use crate::ast::{RuleId, SourcePos};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// the rule can never produce an accepting path
    EmptyLanguage,
    /// the rule's pattern matches the empty string
    MatchesEmpty,
    /// every string the rule matches is claimed by an earlier rule
    UnreachableRule,
    /// neither the head nor the trailing context has a fixed length
    VariableTrailingContext,
    /// `$` combined with a trailing context
    AnchorWithContext,
    UnknownStartCondition(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub rule: Option<RuleId>,
    pub position: SourcePos,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        write!(f, "{}: {}: {}", self.position, severity, self.message)
    }
}

/// Sink for specification diagnostics.
///
/// Stages record problems here and keep going with a best-effort automaton,
/// so one run can surface many errors; the pipeline checks `has_errors`
/// between stages.
pub trait ErrorReporter {
    fn report(&mut self, diagnostic: Diagnostic);
    fn has_errors(&self) -> bool;
}

/// Collects every diagnostic in report order.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics { items: Vec::new() }
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(|d| d.severity == Severity::Warning)
    }
}

impl ErrorReporter for Diagnostics {
    fn report(&mut self, diagnostic: Diagnostic) {
        self.items.push(diagnostic);
    }

    fn has_errors(&self) -> bool {
        self.items.iter().any(|d| d.severity == Severity::Error)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("specification has errors, stopped before {stage}")]
    Specification { stage: &'static str },
}
