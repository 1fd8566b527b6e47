use miette::Diagnostic;
use thiserror::Error;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseDiagnosticSeverity {
    Warning,
}

/// Non-fatal diagnostic produced while parsing an annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub code: String,
    pub severity: ParseDiagnosticSeverity,
    pub message: String,
    pub suggestion: Option<String>,
    pub span: Option<Span>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ParseError {
    #[error("Syntax error: {message}")]
    #[diagnostic(code(scribble::parse::syntax))]
    Syntax {
        message: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Invalid type width in '{type_name}'")]
    #[diagnostic(
        code(scribble::parse::invalid_width),
        help("integer widths are multiples of 8 between 8 and 256; bytes widths between 1 and 32")
    )]
    InvalidWidth {
        type_name: String,
        #[label("unsupported width")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Number literal '{literal}' out of range")]
    #[diagnostic(code(scribble::parse::overflow))]
    NumberOverflow {
        literal: String,
        #[label("too large")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Malformed parse tree: missing {context}")]
    #[diagnostic(code(scribble::parse::missing_node))]
    MissingNode { context: String },
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, span: Span, source: &str, filename: &str) -> Self {
        ParseError::Syntax {
            message: message.into(),
            span: (span.start, span.end.saturating_sub(span.start)).into(),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn invalid_width(type_name: impl Into<String>, span: Span) -> Self {
        ParseError::InvalidWidth {
            type_name: type_name.into(),
            span: (span.start, span.end.saturating_sub(span.start)).into(),
            src: miette::NamedSource::new("", String::new()),
        }
    }

    pub fn overflow(literal: impl Into<String>, span: Span) -> Self {
        ParseError::NumberOverflow {
            literal: literal.into(),
            span: (span.start, span.end.saturating_sub(span.start)).into(),
            src: miette::NamedSource::new("", String::new()),
        }
    }

    /// The error's span, when it carries one.
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::Syntax { span, .. }
            | ParseError::InvalidWidth { span, .. }
            | ParseError::NumberOverflow { span, .. } => {
                Some(Span::new(span.offset(), span.offset() + span.len()))
            }
            ParseError::MissingNode { .. } => None,
        }
    }

    /// Shift the carried span by `delta` bytes. The extractor uses this to
    /// lift parser-local offsets into file coordinates before rendering.
    pub fn offset_span(self, delta: usize) -> Self {
        fn shift(span: miette::SourceSpan, delta: usize) -> miette::SourceSpan {
            (span.offset() + delta, span.len()).into()
        }
        match self {
            ParseError::Syntax { message, span, src } => ParseError::Syntax {
                message,
                span: shift(span, delta),
                src,
            },
            ParseError::InvalidWidth {
                type_name,
                span,
                src,
            } => ParseError::InvalidWidth {
                type_name,
                span: shift(span, delta),
                src,
            },
            ParseError::NumberOverflow { literal, span, src } => ParseError::NumberOverflow {
                literal,
                span: shift(span, delta),
                src,
            },
            other => other,
        }
    }

    /// Attach source text and filename so miette can render a snippet.
    pub fn with_source_context(self, source: &str, filename: &str) -> Self {
        let named = || miette::NamedSource::new(filename, source.to_owned());
        match self {
            ParseError::Syntax { message, span, .. } => ParseError::Syntax {
                message,
                span,
                src: named(),
            },
            ParseError::InvalidWidth {
                type_name, span, ..
            } => ParseError::InvalidWidth {
                type_name,
                span,
                src: named(),
            },
            ParseError::NumberOverflow { literal, span, .. } => ParseError::NumberOverflow {
                literal,
                span,
                src: named(),
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_syntax_error() {
        let err = ParseError::syntax("unexpected EOF", Span::new(0, 5), "hello", "a.sol");
        assert_eq!(err.to_string(), "Syntax error: unexpected EOF");
    }

    #[test]
    fn span_accessor_reports_lifted_range() {
        let err = ParseError::syntax("bad", Span::new(5, 10), "", "");
        let err = err.offset_span(100);
        assert_eq!(err.span(), Some(Span::new(105, 110)));
    }

    #[test]
    fn with_source_context_replaces_named_source() {
        let err = ParseError::invalid_width("uint7", Span::new(0, 5));
        match err.with_source_context("uint7 x", "b.sol") {
            ParseError::InvalidWidth { src, .. } => assert_eq!(src.name(), "b.sol"),
            _ => panic!("expected InvalidWidth"),
        }
    }

    #[test]
    fn missing_node_has_no_span() {
        let err = ParseError::MissingNode {
            context: "primary".into(),
        };
        assert_eq!(err.span(), None);
    }
}
