//! Instrumentation context: the single mutable surface of the instrumenter
//! pass. Holds the node factory (the arena itself), the analyses, the option
//! set, and the bookkeeping maps the metadata emitter consumes.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use scribble_ast::{AstContext, CallGraph, Cha, NodeId};
use scribble_check::{ExtractedAnnotation, TypeEnv};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionMode {
    /// Emit an `AssertionFailed` event on violation.
    Log,
    /// Write the magic value to memory slot 0 and revert.
    Mstore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Flat,
    Files,
    Json,
}

#[derive(Debug, Clone)]
pub struct InstrumentationOptions {
    pub assertion_mode: AssertionMode,
    pub no_assert: bool,
    pub debug_events: bool,
    /// Full path of the synthesised utilities unit, referenced by generated
    /// imports.
    pub utils_path: String,
    pub output_mode: OutputMode,
}

impl Default for InstrumentationOptions {
    fn default() -> Self {
        Self {
            assertion_mode: AssertionMode::Log,
            no_assert: false,
            debug_events: false,
            utils_path: "__scribble_ReentrancyUtils.sol".to_string(),
            output_mode: OutputMode::Files,
        }
    }
}

#[derive(Debug, Error)]
pub enum InstrError {
    #[error("cannot declare a local of spec type {0}")]
    UndeclarableType(String),
    #[error("annotation {0} lost its checked type during lowering")]
    MissingType(usize),
    #[error("internal instrumentation error: {0}")]
    Internal(String),
}

/// Wrapping progress per `(contract, function)`. Transitions are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapState {
    Unannotated,
    WrappingStarted,
    PrologueReady,
    Instrumented,
}

/// Ids of the pieces of the synthesised utilities unit.
#[derive(Debug, Clone, Copy)]
pub struct UtilsUnit {
    pub unit: NodeId,
    pub contract: NodeId,
    pub sentinel: NodeId,
    pub assertion_failed_event: NodeId,
    pub assert_fn: NodeId,
}

pub struct InstrumentationContext<'a> {
    /// The factory minting new host-AST nodes.
    pub host: &'a mut AstContext,
    pub env: &'a TypeEnv,
    pub cha: Cha,
    pub call_graph: CallGraph,
    pub options: InstrumentationOptions,
    pub utils: Option<UtilsUnit>,
    /// Annotation id → prelude statements (old captures, quantifier loops).
    pub evaluation_statements: IndexMap<usize, Vec<NodeId>>,
    /// Annotation id → the final check condition node.
    pub instrumented_check: IndexMap<usize, NodeId>,
    /// Annotation id → debug event definition in the utilities unit.
    pub debug_event_of: IndexMap<usize, NodeId>,
    /// Property id → general instrumentation nodes (assert statements,
    /// sentinel plumbing, per-base invariant copies).
    pub general_instrumentation: IndexMap<usize, Vec<NodeId>>,
    pub wrap_states: IndexMap<(NodeId, NodeId), WrapState>,
    pub(crate) emitted_defines: IndexMap<(NodeId, String), NodeId>,
    pub(crate) fresh_counter: usize,
}

impl<'a> InstrumentationContext<'a> {
    pub fn new(
        host: &'a mut AstContext,
        env: &'a TypeEnv,
        options: InstrumentationOptions,
    ) -> Self {
        let cha = Cha::build(host);
        let call_graph = CallGraph::build(host, &cha);
        Self {
            host,
            env,
            cha,
            call_graph,
            options,
            utils: None,
            evaluation_statements: IndexMap::new(),
            instrumented_check: IndexMap::new(),
            debug_event_of: IndexMap::new(),
            general_instrumentation: IndexMap::new(),
            wrap_states: IndexMap::new(),
            emitted_defines: IndexMap::new(),
            fresh_counter: 0,
        }
    }

    pub fn fresh_name(&mut self, base: &str) -> String {
        let n = self.fresh_counter;
        self.fresh_counter += 1;
        format!("{base}{n}")
    }

    /// Advance the wrap state machine; re-entering a reached state is a no-op.
    pub fn transition(&mut self, contract: NodeId, function: NodeId, next: WrapState) -> bool {
        let entry = self
            .wrap_states
            .entry((contract, function))
            .or_insert(WrapState::Unannotated);
        let rank = |s: WrapState| match s {
            WrapState::Unannotated => 0,
            WrapState::WrappingStarted => 1,
            WrapState::PrologueReady => 2,
            WrapState::Instrumented => 3,
        };
        if rank(next) <= rank(*entry) {
            return false;
        }
        *entry = next;
        true
    }

    pub fn record_evaluation(&mut self, annotation: usize, stmts: &[NodeId]) {
        self.evaluation_statements
            .entry(annotation)
            .or_default()
            .extend(stmts);
    }

    pub fn record_check(&mut self, annotation: usize, condition: NodeId) {
        self.instrumented_check.entry(annotation).or_insert(condition);
    }

    pub fn record_general(&mut self, annotation: usize, nodes: &[NodeId]) {
        self.general_instrumentation
            .entry(annotation)
            .or_default()
            .extend(nodes);
    }
}

/// Everything the metadata emitter and the output phase need after the
/// instrumenter dies.
#[derive(Debug)]
pub struct InstrumentationResult {
    pub annotations: Vec<ExtractedAnnotation>,
    pub evaluation_statements: IndexMap<usize, Vec<NodeId>>,
    pub instrumented_check: IndexMap<usize, NodeId>,
    pub general_instrumentation: IndexMap<usize, Vec<NodeId>>,
    pub utils_unit: NodeId,
    pub instrumented_contracts: IndexSet<NodeId>,
}
