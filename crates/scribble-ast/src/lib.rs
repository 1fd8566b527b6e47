#![recursion_limit = "256"]
//! Host-language AST layer for the Scribble annotation compiler.
//!
//! This crate owns the arena representation of host ASTs, the node factory,
//! the standard-JSON decoder fed by the host-compiler oracle, the multi-unit
//! merger, the inheritance and call-graph analyses, the flattener/renamer,
//! and the source emitter.

pub mod builder;
pub mod cha;
pub mod factory;
pub mod flatten;
pub mod merge;
pub mod nodes;
pub mod printer;

pub use builder::{decode_group, decode_source_unit, HostAstError};
pub use cha::{contracts_needing_instrumentation, linearize, CallGraph, Cha, ChaError};
pub use flatten::{flatten, topo_sort, FlattenError, FlattenedOutput};
pub use merge::{merge, sanity_check, MergeError};
pub use nodes::{
    AstContext, ContractKind, FunctionKind, LiteralKind, Mutability, Node, NodeId, NodeKind,
    SourceRange, Visibility,
};
pub use printer::{print_unit, PrintedUnit};
