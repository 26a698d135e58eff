// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Diagnostics engine.
//!
//! Every stage reports problems here instead of returning early, so that
//! independent errors in one compilation are all collected in a single pass.
//!
//! # Module Structure
//!
//! - `source`: source files, spans and line/column mapping
//! - `render`: caret rendering with Unicode-aware truncation

mod render;
mod source;

pub use render::{RenderedDiagnostic, Renderer};
pub use source::{LineCol, SourceFile, Span};

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::Error;

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    /// Supplementary information
    Note,
    /// Does not prevent bytecode from being produced
    Warning,
    /// The affected function produces no usable bytecode
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Coarse classification of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DiagnosticCode {
    /// Reported by the external parser; aborts the file
    SyntaxError,
    /// Invalid assignment or update target
    InvalidLhs,
    /// `eval`/`arguments` declared in strict code
    CannotDeclareReservedName,
    /// Read of an undeclared global in strict code
    UndeclaredVariable,
    /// `break`/`continue`/`return` outside of a valid target
    InvalidJump,
    /// Construct the engine does not implement
    Unsupported,
    /// Other strict mode restrictions
    StrictModeViolation,
    /// Conflicting lexical declarations
    Redeclaration,
}

/// The specific problem a diagnostic describes. Its `Display` is the
/// user-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiagnosticKind {
    /// Message forwarded from the parser
    #[error("{0}")]
    Syntax(String),
    /// `eval = 0`, `1 = 2`, `for (arguments in o)`
    #[error("invalid assignment left-hand side")]
    InvalidAssignmentTarget,
    /// `eval++`, `++f()`
    #[error("invalid operand in update operation")]
    InvalidUpdateOperand,
    /// `function f(eval) { "use strict" }`
    #[error("cannot declare '{0}'")]
    CannotDeclareReservedName(String),
    /// Strict-mode read of an unknown global
    #[error("the variable \"{name}\" was not declared in function \"{function}\"")]
    UndeclaredVariable {
        /// The identifier that was read
        name: String,
        /// The function containing the read
        function: String,
    },
    /// `break` outside of a loop, switch or label
    #[error("'break' not within a loop or a switch")]
    BreakOutsideLoop,
    /// `continue` outside of a loop
    #[error("'continue' not within a loop")]
    ContinueOutsideLoop,
    /// `break foo` with no enclosing `foo:`
    #[error("label '{0}' is not defined")]
    UndefinedLabel(String),
    /// `continue foo` where `foo:` labels a non-loop
    #[error("continue label '{0}' is not a loop label")]
    ContinueToNonLoop(String),
    /// `return` at the top level
    #[error("'return' not in a function")]
    ReturnOutsideFunction,
    /// `with` in strict code
    #[error("with statement is not allowed in strict mode")]
    WithInStrictMode,
    /// `with` in sloppy code
    #[error("with statement is not supported")]
    WithUnsupported,
    /// `delete x` in strict code
    #[error("'delete' of a variable is not allowed in strict mode")]
    DeleteOfVariable,
    /// `function f(a, a) { "use strict" }`
    #[error("cannot declare duplicate parameter '{0}' in strict mode")]
    DuplicateParameter(String),
    /// `let x; let x;`
    #[error("Identifier '{0}' is already declared")]
    Redeclaration(String),
    /// `async function f() {}`
    #[error("async functions are not supported")]
    AsyncFunction,
    /// `function* f() {}`
    #[error("generator functions are not supported")]
    GeneratorFunction,
}

impl DiagnosticKind {
    /// The coarse classification of this kind.
    pub fn code(&self) -> DiagnosticCode {
        match self {
            DiagnosticKind::Syntax(_) => DiagnosticCode::SyntaxError,
            DiagnosticKind::InvalidAssignmentTarget | DiagnosticKind::InvalidUpdateOperand => {
                DiagnosticCode::InvalidLhs
            }
            DiagnosticKind::CannotDeclareReservedName(_) => {
                DiagnosticCode::CannotDeclareReservedName
            }
            DiagnosticKind::UndeclaredVariable { .. } => DiagnosticCode::UndeclaredVariable,
            DiagnosticKind::BreakOutsideLoop
            | DiagnosticKind::ContinueOutsideLoop
            | DiagnosticKind::UndefinedLabel(_)
            | DiagnosticKind::ContinueToNonLoop(_)
            | DiagnosticKind::ReturnOutsideFunction => DiagnosticCode::InvalidJump,
            DiagnosticKind::WithUnsupported
            | DiagnosticKind::AsyncFunction
            | DiagnosticKind::GeneratorFunction => DiagnosticCode::Unsupported,
            DiagnosticKind::WithInStrictMode
            | DiagnosticKind::DeleteOfVariable
            | DiagnosticKind::DuplicateParameter(_) => DiagnosticCode::StrictModeViolation,
            DiagnosticKind::Redeclaration(_) => DiagnosticCode::Redeclaration,
        }
    }

    /// The severity this kind is reported with.
    pub fn severity(&self) -> Severity {
        match self {
            DiagnosticKind::UndeclaredVariable { .. } => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// A single finding attached to a source span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Error, warning or note
    pub severity: Severity,
    /// What went wrong
    pub kind: DiagnosticKind,
    /// Where it went wrong
    pub span: Span,
}

impl Diagnostic {
    /// Creates a diagnostic with the kind's default severity.
    pub fn new(kind: DiagnosticKind, span: Span) -> Self {
        Self {
            severity: kind.severity(),
            kind,
            span,
        }
    }

    /// The coarse classification.
    pub fn code(&self) -> DiagnosticCode {
        self.kind.code()
    }

    /// The user-facing message.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// Whether this diagnostic is an error.
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Collects diagnostics in the order they are detected.
#[derive(Debug, Default)]
pub struct DiagnosticEngine {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    warnings: usize,
}

impl DiagnosticEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic of `kind` at `span`.
    pub fn report(&mut self, kind: DiagnosticKind, span: Span) {
        self.push(Diagnostic::new(kind, span));
    }

    /// Records an already-built diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Error => self.errors += 1,
            Severity::Warning => self.warnings += 1,
            Severity::Note => {}
        }
        tracing::debug!(
            severity = %diagnostic.severity,
            start = diagnostic.span.start,
            "{}",
            diagnostic.kind
        );
        self.diagnostics.push(diagnostic);
    }

    /// Number of errors reported so far.
    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Number of warnings reported so far.
    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    /// Whether any error was reported.
    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    /// All diagnostics in report order.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Consumes the engine, returning its diagnostics.
    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

/// The result of a compilation that keeps going after recoverable errors.
///
/// `findings` holds every recoverable diagnostic in report order; `fatal` is
/// set when compilation could not produce anything at all.
#[derive(Debug)]
pub struct Outcome<T> {
    value: Option<T>,
    findings: Vec<Diagnostic>,
    fatal: Option<Diagnostic>,
}

impl<T> Outcome<T> {
    /// A produced value plus the recoverable findings met on the way.
    pub fn success(value: T, findings: Vec<Diagnostic>) -> Self {
        Self {
            value: Some(value),
            findings,
            fatal: None,
        }
    }

    /// An unrecoverable failure.
    pub fn failure(fatal: Diagnostic, findings: Vec<Diagnostic>) -> Self {
        Self {
            value: None,
            findings,
            fatal: Some(fatal),
        }
    }

    /// The produced value, if any.
    pub fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Mutable access to the produced value.
    pub fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    /// Consumes the outcome, returning the value.
    pub fn into_value(self) -> Option<T> {
        self.value
    }

    /// Recoverable findings in report order.
    pub fn findings(&self) -> &[Diagnostic] {
        &self.findings
    }

    /// The unrecoverable failure, if any.
    pub fn fatal(&self) -> Option<&Diagnostic> {
        self.fatal.as_ref()
    }

    /// Every diagnostic: findings first, then the fatal one.
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.findings.iter().chain(self.fatal.iter())
    }

    /// Number of error-severity diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics().filter(|d| d.is_error()).count()
    }

    /// Number of warnings.
    pub fn warning_count(&self) -> usize {
        self.diagnostics()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }

    /// Whether any error-severity diagnostic was reported.
    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Process exit status for a command-line harness.
    pub fn exit_code(&self) -> i32 {
        if self.has_errors() { 1 } else { 0 }
    }

    /// Renders every diagnostic against `source`.
    pub fn render(&self, source: &SourceFile, renderer: &Renderer) -> Vec<RenderedDiagnostic> {
        self.diagnostics()
            .map(|d| renderer.render(source, d))
            .collect()
    }

    /// Converts into a `Result`, failing if any error was reported.
    pub fn into_result(self) -> Result<T, Error> {
        if let Some(fatal) = self.fatal {
            return Err(Error::SyntaxError(fatal.message()));
        }
        let errors = self.findings.iter().filter(|d| d.is_error()).count();
        match self.value {
            Some(value) if errors == 0 => Ok(value),
            _ => Err(Error::CompilationFailed(errors)),
        }
    }

    /// Maps the produced value, keeping the diagnostics.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: self.value.map(f),
            findings: self.findings,
            fatal: self.fatal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(
            DiagnosticKind::CannotDeclareReservedName("eval".into()).to_string(),
            "cannot declare 'eval'"
        );
        assert_eq!(
            DiagnosticKind::UndeclaredVariable {
                name: "y".into(),
                function: "global".into(),
            }
            .to_string(),
            "the variable \"y\" was not declared in function \"global\""
        );
    }

    #[test]
    fn test_invalid_lhs_codes() {
        assert_eq!(
            DiagnosticKind::InvalidAssignmentTarget.code(),
            DiagnosticCode::InvalidLhs
        );
        assert_eq!(
            DiagnosticKind::InvalidUpdateOperand.code(),
            DiagnosticCode::InvalidLhs
        );
    }

    #[test]
    fn test_engine_counts() {
        let mut engine = DiagnosticEngine::new();
        engine.report(DiagnosticKind::InvalidAssignmentTarget, Span::new(0, 4));
        engine.report(
            DiagnosticKind::UndeclaredVariable {
                name: "y".into(),
                function: "global".into(),
            },
            Span::new(8, 9),
        );
        assert_eq!(engine.error_count(), 1);
        assert_eq!(engine.warning_count(), 1);
        assert!(engine.has_errors());
        assert_eq!(engine.diagnostics()[0].span, Span::new(0, 4));
    }

    #[test]
    fn test_outcome_with_only_warnings_succeeds() {
        let warning = Diagnostic::new(
            DiagnosticKind::UndeclaredVariable {
                name: "y".into(),
                function: "global".into(),
            },
            Span::new(8, 9),
        );
        let outcome = Outcome::success(7, vec![warning]);
        assert!(!outcome.has_errors());
        assert_eq!(outcome.exit_code(), 0);
        assert_eq!(outcome.into_result(), Ok(7));
    }

    #[test]
    fn test_outcome_with_errors_fails() {
        let error = Diagnostic::new(DiagnosticKind::InvalidAssignmentTarget, Span::new(0, 4));
        let outcome = Outcome::success((), vec![error]);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.into_result(), Err(Error::CompilationFailed(1)));
    }

    #[test]
    fn test_fatal_outcome() {
        let fatal = Diagnostic::new(DiagnosticKind::Syntax("';' expected".into()), Span::new(7, 8));
        let outcome: Outcome<()> = Outcome::failure(fatal, Vec::new());
        assert!(outcome.value().is_none());
        assert_eq!(outcome.error_count(), 1);
        assert_eq!(
            outcome.into_result(),
            Err(Error::SyntaxError("';' expected".into()))
        );
    }
}
