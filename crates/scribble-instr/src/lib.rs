//! Instrumentation back-end for the Scribble annotation compiler.
//!
//! Synthesises the utilities unit, lowers checked annotations into host-AST
//! check code, wraps target functions with interposers, and emits the
//! property map plus the instrumented↔original source map.

pub mod codegen;
pub mod context;
pub mod metadata;
pub mod utils;
pub mod wrapper;

pub use codegen::{lower_predicate, LoweredPredicate};
pub use context::{
    AssertionMode, InstrError, InstrumentationContext, InstrumentationOptions,
    InstrumentationResult, OutputMode, UtilsUnit, WrapState,
};
pub use metadata::{build_metadata, InstrumentationMetadata, PropertyRecord};
pub use utils::{synthesize_utils, UTILS_CONTRACT_NAME};
pub use wrapper::instrument;
