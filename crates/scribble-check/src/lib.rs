//! Annotation extraction and specification checking.
//!
//! The extractor walks doc-comments on contracts, functions, and state
//! variables, routes annotation bodies to the spec parser, and lifts every
//! span to file coordinates. The checker resolves names against the host
//! program, assigns types, and records semantic metadata (state reads,
//! old-accesses, external calls) used by the instrumenter.

pub mod errors;
pub mod extractor;
pub mod typecheck;

pub use errors::{ExtractError, TypeError};
pub use extractor::{extract_annotations, AnnotationFilter, ExtractedAnnotation};
pub use typecheck::{
    check_annotation, check_annotations, SemanticInfo, SemanticMap, TypeEnv, UserFunction,
};
