// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by every pass of the type
// engine, plus the table of stable diagnostic codes.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ast::Span;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`, `W0200`).
///
/// Codes are `&'static str` constants defined in the `codes` module.
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagnostic code table, grouped by category.
pub mod codes {
    use super::DiagCode;

    // ── Resolution ──
    pub const E0001: DiagCode = DiagCode("E0001"); // unknown box or net
    pub const E0002: DiagCode = DiagCode("E0002"); // duplicate definition
    pub const E0003: DiagCode = DiagCode("E0003"); // no top-level network
    pub const E0004: DiagCode = DiagCode("E0004"); // internal net without body

    // ── Type inference ──
    pub const E0100: DiagCode = DiagCode("E0100"); // no downstream branch accepts output
    pub const E0101: DiagCode = DiagCode("E0101"); // star/feedback iteration limit
    pub const E0102: DiagCode = DiagCode("E0102"); // conflicting branch declarations

    // ── Type checking ──
    pub const E0200: DiagCode = DiagCode("E0200"); // observed output not declared
    pub const E0201: DiagCode = DiagCode("E0201"); // component rejects probe
    pub const E0202: DiagCode = DiagCode("E0202"); // initializer outputs mismatch
    pub const E0203: DiagCode = DiagCode("E0203"); // split input lacks index tag
    pub const W0200: DiagCode = DiagCode("W0200"); // declared output never produced

    // ── Signatures ──
    pub const E0300: DiagCode = DiagCode("E0300"); // conflicting declarations for one input
    pub const E0301: DiagCode = DiagCode("E0301"); // external net without signature
    pub const E0302: DiagCode = DiagCode("E0302"); // recursive network reference
    pub const E0303: DiagCode = DiagCode("E0303"); // internal: missing cached signature

    // ── Initializers ──
    pub const E0400: DiagCode = DiagCode("E0400"); // initializer-only operand
    pub const E0401: DiagCode = DiagCode("E0401"); // top-level network is initializer-only
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Related span ─────────────────────────────────────────────────────────

/// A secondary source location providing context for a diagnostic.
#[derive(Debug, Clone)]
pub struct RelatedSpan {
    pub span: Span,
    pub label: String,
}

// ── Cause record ─────────────────────────────────────────────────────────

/// One link in a cause chain explaining a propagated type failure.
#[derive(Debug, Clone)]
pub struct CauseRecord {
    pub message: String,
    pub span: Option<Span>,
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
    pub related_spans: Vec<RelatedSpan>,
    pub cause_chain: Vec<CauseRecord>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code, hint, related spans, or causes.
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
            related_spans: Vec::new(),
            cause_chain: Vec::new(),
        }
    }

    pub fn error(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, span, message).with_code(code)
    }

    pub fn warning(code: DiagCode, span: Span, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, span, message).with_code(code)
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach a related span.
    pub fn with_related(mut self, span: Span, label: impl Into<String>) -> Self {
        self.related_spans.push(RelatedSpan {
            span,
            label: label.into(),
        });
        self
    }

    /// Attach a cause record to the chain.
    pub fn with_cause(mut self, message: impl Into<String>, span: Option<Span>) -> Self {
        self.cause_chain.push(CauseRecord {
            message: message.into(),
            span,
        });
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        for cause in &self.cause_chain {
            write!(f, "\n  caused by: {}", cause.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// Count error-level diagnostics.
pub fn error_count(diags: &[Diagnostic]) -> usize {
    diags.iter().filter(|d| d.is_error()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_span() -> Span {
        Span::new(0, 1)
    }

    #[test]
    fn display_without_code() {
        let d = Diagnostic::new(DiagLevel::Error, dummy_span(), "something failed");
        assert_eq!(format!("{d}"), "error: something failed");
    }

    #[test]
    fn display_with_code() {
        let d = Diagnostic::warning(codes::W0200, dummy_span(), "output never produced");
        assert_eq!(format!("{d}"), "warning[W0200]: output never produced");
    }

    #[test]
    fn display_with_cause_and_hint() {
        let d = Diagnostic::error(codes::E0100, dummy_span(), "no branch accepts {b}")
            .with_cause("produced by box 'A'", None)
            .with_hint("add a filter");
        assert_eq!(
            format!("{d}"),
            "error[E0100]: no branch accepts {b}\n  caused by: produced by box 'A'\n  hint: add a filter"
        );
    }

    #[test]
    fn builder_chain() {
        let d = Diagnostic::error(codes::E0200, dummy_span(), "type mismatch")
            .with_hint("declare the output")
            .with_related(dummy_span(), "network declared here")
            .with_cause("observed {a}", Some(dummy_span()));

        assert_eq!(d.code, Some(codes::E0200));
        assert_eq!(d.hint.as_deref(), Some("declare the output"));
        assert_eq!(d.related_spans.len(), 1);
        assert_eq!(d.cause_chain.len(), 1);
    }

    #[test]
    fn error_count_ignores_warnings() {
        let diags = vec![
            Diagnostic::error(codes::E0100, dummy_span(), "a"),
            Diagnostic::warning(codes::W0200, dummy_span(), "b"),
            Diagnostic::error(codes::E0201, dummy_span(), "c"),
        ];
        assert_eq!(error_count(&diags), 2);
    }
}
