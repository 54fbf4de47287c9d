//! Diagnostics produced by the optimizer
//!
//! Diagnostics are collected in a `DiagnosticSink` in emission order and
//! can be rendered against the source they were lowered from.

use codespan_reporting::diagnostic::{Diagnostic as CsDiagnostic, Label, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use ossa_ir::Span;
use serde::Serialize;
use termcolor::{ColorChoice, StandardStream, WriteColor};

/// What went wrong
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InlineDiagnosticKind {
    /// A must-inline call closes a cycle of must-inline functions
    CircularInlining,
    /// Trace entry for an enclosing call on the failing chain
    WhileInlining,
}

impl InlineDiagnosticKind {
    pub fn message(&self) -> &'static str {
        match self {
            InlineDiagnosticKind::CircularInlining => "circular transparent inlining",
            InlineDiagnosticKind::WhileInlining => "while inlining",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            InlineDiagnosticKind::CircularInlining => Severity::Error,
            InlineDiagnosticKind::WhileInlining => Severity::Note,
        }
    }
}

/// A diagnostic attached to a call site
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineDiagnostic {
    pub kind: InlineDiagnosticKind,
    /// Location of the call site, when the IR carries one
    pub span: Option<Span>,
    /// Function containing the call site
    pub function: String,
}

impl InlineDiagnostic {
    pub fn circular(function: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            kind: InlineDiagnosticKind::CircularInlining,
            span,
            function: function.into(),
        }
    }

    pub fn while_inlining(function: impl Into<String>, span: Option<Span>) -> Self {
        Self {
            kind: InlineDiagnosticKind::WhileInlining,
            span,
            function: function.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind.severity() == Severity::Error
    }

    pub fn message(&self) -> &'static str {
        self.kind.message()
    }

    /// Convert to a codespan diagnostic labelled in `file_id`
    pub fn to_codespan(&self, file_id: usize) -> CsDiagnostic<usize> {
        let diag = CsDiagnostic::new(self.kind.severity()).with_message(self.message());
        match self.span {
            Some(span) => diag.with_labels(vec![
                Label::primary(file_id, span.range()).with_message(format!("in '{}'", self.function))
            ]),
            None => diag.with_notes(vec![format!("in '{}'", self.function)]),
        }
    }
}

impl std::fmt::Display for InlineDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = if self.is_error() { "error" } else { "note" };
        write!(f, "{}: {} (in '{}'", level, self.message(), self.function)?;
        if let Some(span) = self.span {
            write!(f, " at {}", span)?;
        }
        write!(f, ")")
    }
}

/// Ordered collection of diagnostics
#[derive(Debug, Clone, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<InlineDiagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: InlineDiagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[InlineDiagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.is_error()).count()
    }

    pub fn note_count(&self) -> usize {
        self.diagnostics.len() - self.error_count()
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.is_error())
    }

    /// Remove and return everything collected so far
    pub fn take(&mut self) -> Vec<InlineDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Render every diagnostic to `writer`
    pub fn emit_to(
        &self,
        writer: &mut dyn WriteColor,
        files: &SimpleFiles<String, String>,
        file_id: usize,
    ) -> Result<(), codespan_reporting::files::Error> {
        let config = term::Config::default();
        for diagnostic in &self.diagnostics {
            term::emit(writer, &config, files, &diagnostic.to_codespan(file_id))?;
        }
        Ok(())
    }

    /// Render every diagnostic to stderr with colors
    pub fn emit(
        &self,
        files: &SimpleFiles<String, String>,
        file_id: usize,
    ) -> Result<(), codespan_reporting::files::Error> {
        let mut writer = StandardStream::stderr(ColorChoice::Auto);
        self.emit_to(&mut writer, files, file_id)
    }
}
