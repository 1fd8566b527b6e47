use miette::Diagnostic;
use thiserror::Error;

use scribble_spec::ast::Span;
use scribble_spec::errors::ParseError;

/// Errors surfaced while extracting annotations from doc-comments.
#[derive(Debug, Error, Diagnostic)]
pub enum ExtractError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Syntax(#[from] ParseError),

    #[error("'{kind}' is not a valid annotation for {target_desc}")]
    #[diagnostic(code(scribble::extract::target_mismatch))]
    TargetMismatch {
        kind: String,
        target_desc: String,
        #[label("annotation here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("annotations on free-standing functions are not supported")]
    #[diagnostic(code(scribble::extract::free_function))]
    FreeFunctionAnnotation {
        #[label("annotation here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

impl ExtractError {
    pub fn target_mismatch(
        kind: &str,
        target_desc: &str,
        span: Span,
        source: &str,
        filename: &str,
    ) -> Self {
        ExtractError::TargetMismatch {
            kind: kind.to_string(),
            target_desc: target_desc.to_string(),
            span: (span.start, span.len()).into(),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }

    pub fn free_function(span: Span, source: &str, filename: &str) -> Self {
        ExtractError::FreeFunctionAnnotation {
            span: (span.start, span.len()).into(),
            src: miette::NamedSource::new(filename, source.to_owned()),
        }
    }
}

/// Type- and semantic-checking errors. Spans are file coordinates, already
/// lifted through the annotation's offset table.
#[derive(Debug, Error, Diagnostic)]
pub enum TypeError {
    #[error("Unknown name '{name}'")]
    #[diagnostic(code(scribble::check::unknown_name))]
    UnknownName {
        name: String,
        #[label("not in scope")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("'{name}' expects {expected} argument(s), found {found}")]
    #[diagnostic(code(scribble::check::arity_mismatch))]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
        #[label("call here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Incompatible types: {lhs} vs {rhs} {context}")]
    #[diagnostic(code(scribble::check::incompatible_types))]
    IncompatibleTypes {
        lhs: String,
        rhs: String,
        context: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Mixed signed/unsigned arithmetic")]
    #[diagnostic(
        code(scribble::check::mixed_sign),
        help("cast one operand so both sides share a signedness")
    )]
    MixedSignArithmetic {
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("old() is only valid inside if_succeeds annotations")]
    #[diagnostic(code(scribble::check::forbidden_old))]
    ForbiddenOld {
        #[label("old() here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Call to non-pure function '{name}' in a pure context")]
    #[diagnostic(code(scribble::check::non_pure_call))]
    NonPureCall {
        name: String,
        #[label("mutating call")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Quantifier ranges must be finite")]
    #[diagnostic(
        code(scribble::check::infinite_quantifier),
        help("iterate an integer range `low...high` or an array; bare mappings have no finite key set")
    )]
    InfiniteQuantifier {
        #[label("infinite range")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Recursive use of define '{name}'")]
    #[diagnostic(code(scribble::check::recursive_define))]
    RecursiveDefine {
        name: String,
        #[label("recursive call")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },

    #[error("Expression of type {found} is not {expected}")]
    #[diagnostic(code(scribble::check::wrong_type))]
    WrongType {
        expected: String,
        found: String,
        #[label("here")]
        span: miette::SourceSpan,
        #[source_code]
        src: miette::NamedSource<String>,
    },
}

pub(crate) fn source_span(span: Span) -> miette::SourceSpan {
    (span.start, span.len()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_stable() {
        let src = miette::NamedSource::new("a.sol", "uint x;".to_owned());
        let err = TypeError::UnknownName {
            name: "y".into(),
            span: (0, 1).into(),
            src,
        };
        assert_eq!(err.to_string(), "Unknown name 'y'");
    }

    #[test]
    fn target_mismatch_names_kind_and_target() {
        let err = ExtractError::target_mismatch(
            "invariant",
            "a function",
            Span::new(0, 9),
            "source",
            "a.sol",
        );
        assert_eq!(
            err.to_string(),
            "'invariant' is not a valid annotation for a function"
        );
    }
}
