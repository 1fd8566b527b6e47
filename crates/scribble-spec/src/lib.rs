//! Specification-language front-end for the Scribble annotation compiler.
//!
//! Defines the spec AST (expressions, types, annotations), the pest-based
//! parsers for annotations, bare expressions, and host-compiler type strings,
//! and the parse diagnostics surfaced to the CLI.

pub mod ast;
pub mod errors;
pub mod parser;

pub use parser::{
    parse_annotation, parse_annotation_with_diagnostics, parse_expression, parse_type_string,
};
