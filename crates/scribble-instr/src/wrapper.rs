//! Function-level wrapping and contract-level integration.
//!
//! Every externally visible, state-mutating, non-constructor, non-fallback
//! function of an instrumented contract is split: the original body moves
//! into an internal `<fn>_original`, and the public `<fn>` becomes an
//! interposer running the reentrancy bookkeeping, the old-capture prologue,
//! the call, the post-conditions, and (outermost call only) the contract
//! invariants. Constructors get invariant checks at their end, never on
//! entry. Interfaces and libraries never receive invariant machinery.

use indexmap::IndexSet;

use scribble_ast::{
    cha::contracts_needing_instrumentation, AstContext, ContractKind, FunctionKind, Mutability,
    NodeId, NodeKind, Visibility,
};
use scribble_check::{ExtractedAnnotation, TypeEnv};
use scribble_spec::ast::AnnotationKind;

use crate::codegen::lower_predicate;
use crate::context::{
    InstrError, InstrumentationContext, InstrumentationOptions, InstrumentationResult, UtilsUnit,
    WrapState,
};
use crate::utils::{synthesize_utils, ASSERT_FN_NAME, SENTINEL_NAME};

const ENTRY_LOCAL: &str = "__scribble_entry";

/// Run the full instrumenter pass over a merged program.
pub fn instrument(
    host: &mut AstContext,
    env: &TypeEnv,
    mut annotations: Vec<ExtractedAnnotation>,
    options: InstrumentationOptions,
) -> Result<InstrumentationResult, InstrError> {
    let mut ictx = InstrumentationContext::new(host, env, options);
    let utils = synthesize_utils(&mut ictx, &mut annotations);
    let mut other: Vec<NodeId> = Vec::new();

    // Contracts carrying at least one property annotation.
    let mut annotated: Vec<NodeId> = Vec::new();
    for a in &annotations {
        if !a.is_property() {
            continue;
        }
        let c = ictx
            .host
            .enclosing_contract(a.target)
            .unwrap_or(a.target);
        if !annotated.contains(&c) {
            annotated.push(c);
        }
    }
    let component = contracts_needing_instrumentation(&ictx.cha, &annotated);

    // Deterministic processing order: CHA-DFS (children before parents).
    let mut order: Vec<NodeId> = Vec::new();
    ictx.cha.dfs(|c| order.push(c));

    // Contract invariants never land on interfaces or libraries.
    let inv_contracts: IndexSet<NodeId> = order
        .iter()
        .copied()
        .filter(|c| {
            component.contains(c)
                && matches!(
                    &ictx.host.node(*c).kind,
                    NodeKind::ContractDefinition {
                        kind: ContractKind::Contract,
                        ..
                    }
                )
        })
        .collect();

    // Per-contract invariant check functions, emitted before any wrapping so
    // interposers can call them.
    for &c in &inv_contracts {
        emit_invariant_checker(&mut ictx, c, &annotations, utils, &mut other)?;
        integrate_contract(&mut ictx, c, utils);
    }

    // Function wrapping.
    for &c in &order {
        let members = ictx.host.children(c);
        for f in members {
            let (kind, visibility, mutability, has_body) = match &ictx.host.node(f).kind {
                NodeKind::FunctionDefinition {
                    kind,
                    visibility,
                    mutability,
                    body,
                    ..
                } => (*kind, *visibility, *mutability, body.is_some()),
                _ => continue,
            };
            if !has_body {
                continue;
            }
            match kind {
                FunctionKind::Function => {}
                FunctionKind::Constructor => {
                    if inv_contracts.contains(&c) {
                        instrument_constructor(&mut ictx, c, f, &mut other);
                    }
                    continue;
                }
                // No stable external signature to interpose on.
                FunctionKind::Fallback | FunctionKind::Receive => continue,
            }
            let fn_annots: Vec<usize> = annotations
                .iter()
                .filter(|a| a.kind() == AnnotationKind::IfSucceeds && a.target == f)
                .map(|a| a.id)
                .collect();
            let needs_invariants = inv_contracts.contains(&c)
                && visibility.is_externally_visible()
                && mutability.is_mutating();
            if fn_annots.is_empty() && !needs_invariants {
                continue;
            }
            wrap_function(
                &mut ictx,
                c,
                f,
                &annotations,
                &fn_annots,
                needs_invariants,
                utils,
                &mut other,
            )?;
        }
    }

    let utils_unit = utils.unit;
    let InstrumentationContext {
        evaluation_statements,
        instrumented_check,
        general_instrumentation,
        ..
    } = ictx;
    let mut general_instrumentation = general_instrumentation;
    for node in other {
        // Nodes not attributable to a single annotation surface under the
        // reserved key.
        general_instrumentation
            .entry(crate::metadata::UNATTRIBUTED)
            .or_default()
            .push(node);
    }
    Ok(InstrumentationResult {
        annotations,
        evaluation_statements,
        instrumented_check,
        general_instrumentation,
        utils_unit,
        instrumented_contracts: inv_contracts,
    })
}

fn invariant_checker_name(ctx: &AstContext, contract: NodeId) -> String {
    format!(
        "__scribble_check_state_invariants_{}",
        ctx.definition_name(contract).unwrap_or("contract")
    )
}

/// Emit `__scribble_check_state_invariants_<C>` holding every invariant
/// applicable to `contract` (its own plus inherited ones, via the linearized
/// base list). The CHA-DFS processing order guarantees each contract is
/// handled exactly once even across diamond paths.
fn emit_invariant_checker(
    ictx: &mut InstrumentationContext<'_>,
    contract: NodeId,
    annotations: &[ExtractedAnnotation],
    utils: UtilsUnit,
    other: &mut Vec<NodeId>,
) -> Result<(), InstrError> {
    let linearized = match &ictx.host.node(contract).kind {
        NodeKind::ContractDefinition { linearized, .. } => linearized.clone(),
        _ => vec![contract],
    };
    let mut stmts = Vec::new();
    for a in annotations {
        if a.kind() != AnnotationKind::Invariant || !linearized.contains(&a.target) {
            continue;
        }
        let lowered = lower_predicate(
            ictx,
            contract,
            a.annotation_range.file,
            a.parsed.expression(),
            false,
        )?;
        let check_stmts = emit_check(ictx, a, lowered.condition, utils);
        if a.target == contract {
            ictx.record_evaluation(a.id, &lowered.eval_prelude);
            ictx.record_check(a.id, lowered.condition);
            ictx.record_general(a.id, &check_stmts);
        } else {
            // Inherited copy: attribute the whole sequence as general
            // instrumentation of the originating annotation.
            let mut all = lowered.eval_prelude.clone();
            all.extend(&check_stmts);
            ictx.record_general(a.id, &all);
        }
        stmts.extend(lowered.eval_prelude);
        stmts.extend(check_stmts);
    }
    let body = ictx.host.mk_block(stmts);
    let name = invariant_checker_name(ictx.host, contract);
    let checker = ictx.host.mk_function(
        &name,
        FunctionKind::Function,
        Visibility::Internal,
        Mutability::NonPayable,
        vec![],
        vec![],
        Some(body),
    );
    ictx.host.append_member(contract, checker);
    other.push(checker);
    Ok(())
}

/// Add the utilities base contract and the utilities import to an
/// instrumented contract.
fn integrate_contract(ictx: &mut InstrumentationContext<'_>, contract: NodeId, utils: UtilsUnit) {
    let utils_contract = utils.contract;
    if let NodeKind::ContractDefinition {
        bases, linearized, ..
    } = &mut ictx.host.node_mut(contract).kind
    {
        if !bases.contains(&utils_contract) {
            bases.push(utils_contract);
            linearized.push(utils_contract);
        }
    }
    if let Some(unit) = ictx.host.enclosing_unit(contract) {
        if unit == utils.unit {
            return;
        }
        let already = ictx.host.children(unit).into_iter().any(|m| {
            matches!(
                &ictx.host.node(m).kind,
                NodeKind::ImportDirective { unit: Some(u), .. } if *u == utils.unit
            )
        });
        if !already {
            let path = ictx.options.utils_path.clone();
            let import = ictx.host.mk_import(&path, Some(utils.unit));
            ictx.host.prepend_member(unit, import);
        }
    }
}

/// Constructors: invariants checked at the end only, never on entry.
fn instrument_constructor(
    ictx: &mut InstrumentationContext<'_>,
    contract: NodeId,
    ctor: NodeId,
    other: &mut Vec<NodeId>,
) {
    let body = match &ictx.host.node(ctor).kind {
        NodeKind::FunctionDefinition { body: Some(b), .. } => *b,
        _ => return,
    };
    let name = invariant_checker_name(ictx.host, contract);
    let callee = ictx.host.mk_identifier(&name, None);
    let call = ictx.host.mk_call(callee, vec![]);
    let stmt = ictx.host.mk_expr_stmt(call);
    ictx.host.append_statement(body, stmt);
    other.push(stmt);
}

/// The check sequence for one lowered condition: bind it to a fresh local,
/// optionally emit the per-property debug event, then invoke the assertion
/// primitive.
fn emit_check(
    ictx: &mut InstrumentationContext<'_>,
    annot: &ExtractedAnnotation,
    condition: NodeId,
    _utils: UtilsUnit,
) -> Vec<NodeId> {
    let mut stmts = Vec::new();
    if ictx.options.no_assert && !ictx.options.debug_events {
        return stmts;
    }
    let local_name = ictx.fresh_name("__scribble_check_");
    let bool_type = ictx.host.mk_elementary_type_name("bool");
    let local = ictx
        .host
        .mk_var_decl(&local_name, "bool", Some(bool_type), false);
    let decl_stmt = ictx.host.mk_var_decl_stmt(vec![local], Some(condition));
    stmts.push(decl_stmt);

    if ictx.options.debug_events {
        if let Some(&event) = ictx.debug_event_of.get(&annot.id) {
            let cond_ref = ictx.host.mk_identifier(&local_name, Some(local));
            let not_cond = ictx.host.mk_unary("!", cond_ref);
            let event_name = ictx
                .host
                .definition_name(event)
                .unwrap_or("AssertionFailed")
                .to_string();
            let callee = ictx.host.mk_identifier(&event_name, Some(event));
            let call = ictx.host.mk_call(callee, vec![]);
            let emit = ictx.host.mk_emit(call);
            let body = ictx.host.mk_block(vec![emit]);
            let guard = ictx.host.mk_if(not_cond, body, None);
            stmts.push(guard);
        }
    }
    if !ictx.options.no_assert {
        let message = match annot.label() {
            Some(label) => format!("P{}: {}", annot.id, label),
            None => format!("P{}: {}", annot.id, annot.original_text.trim()),
        };
        let cond_ref = ictx.host.mk_identifier(&local_name, Some(local));
        let msg = ictx.host.mk_string(&message);
        let callee = ictx.host.mk_identifier(ASSERT_FN_NAME, None);
        let call = ictx.host.mk_call(callee, vec![cond_ref, msg]);
        let stmt = ictx.host.mk_expr_stmt(call);
        stmts.push(stmt);
    }
    stmts
}

#[allow(clippy::too_many_arguments)]
fn wrap_function(
    ictx: &mut InstrumentationContext<'_>,
    contract: NodeId,
    function: NodeId,
    annotations: &[ExtractedAnnotation],
    fn_annot_ids: &[usize],
    with_invariants: bool,
    utils: UtilsUnit,
    other: &mut Vec<NodeId>,
) -> Result<(), InstrError> {
    if !ictx.transition(contract, function, WrapState::WrappingStarted) {
        return Ok(());
    }

    let (name, mutability, params, returns, body) = match &ictx.host.node(function).kind {
        NodeKind::FunctionDefinition {
            name,
            mutability,
            params,
            returns,
            body: Some(body),
            ..
        } => (
            name.clone(),
            *mutability,
            params.clone(),
            returns.clone(),
            *body,
        ),
        _ => return Ok(()),
    };

    // Lower post-conditions first: old-captures form the prologue.
    let mut old_prelude = Vec::new();
    let mut checks = Vec::new();
    for &id in fn_annot_ids {
        let annot = annotations
            .iter()
            .find(|a| a.id == id)
            .expect("annotation ids are stable");
        let lowered = lower_predicate(
            ictx,
            contract,
            annot.annotation_range.file,
            annot.parsed.expression(),
            true,
        )?;
        let mut eval = lowered.old_prelude.clone();
        eval.extend(&lowered.eval_prelude);
        ictx.record_evaluation(id, &eval);
        ictx.record_check(id, lowered.condition);
        old_prelude.extend(lowered.old_prelude);
        checks.push((id, lowered.eval_prelude, lowered.condition));
    }
    ictx.transition(contract, function, WrapState::PrologueReady);

    // Move the original into `<fn>_original`.
    let orig_name = format!("{name}_original");
    let orig_fn = ictx.host.mk_function(
        &orig_name,
        FunctionKind::Function,
        Visibility::Internal,
        mutability,
        params.clone(),
        returns.clone(),
        Some(body),
    );
    ictx.host.append_member(contract, orig_fn);
    other.push(orig_fn);

    // Fresh interposer signature mirroring the original names and types.
    let mut new_params = Vec::with_capacity(params.len());
    for &p in &params {
        new_params.push(clone_declaration(ictx.host, p, None));
    }
    let mut new_returns = Vec::with_capacity(returns.len());
    for (i, &r) in returns.iter().enumerate() {
        let fallback = format!("RET_{i}");
        new_returns.push(clone_declaration(ictx.host, r, Some(&fallback)));
    }

    let mut stmts = Vec::new();
    let mut entry_local = None;
    if with_invariants {
        // bool __scribble_entry = __scribble_out_of_contract;
        // __scribble_out_of_contract = false;
        let bool_type = ictx.host.mk_elementary_type_name("bool");
        let local = ictx
            .host
            .mk_var_decl(ENTRY_LOCAL, "bool", Some(bool_type), false);
        let sentinel_ref = ictx.host.mk_identifier(SENTINEL_NAME, Some(utils.sentinel));
        let decl = ictx.host.mk_var_decl_stmt(vec![local], Some(sentinel_ref));
        let sentinel_lhs = ictx.host.mk_identifier(SENTINEL_NAME, Some(utils.sentinel));
        let f = ictx.host.mk_bool(false);
        let clear = ictx.host.mk_assignment(sentinel_lhs, f);
        let clear_stmt = ictx.host.mk_expr_stmt(clear);
        stmts.push(decl);
        stmts.push(clear_stmt);
        other.push(decl);
        other.push(clear_stmt);
        entry_local = Some(local);
    }

    stmts.extend(old_prelude);

    // Call the original through the interposer's parameters.
    let args: Vec<NodeId> = new_params
        .iter()
        .map(|&p| ictx.host.mk_identifier_for(p))
        .collect();
    let callee = ictx.host.mk_identifier(&orig_name, Some(orig_fn));
    let call = ictx.host.mk_call(callee, args);
    let call_stmt = if new_returns.is_empty() {
        ictx.host.mk_expr_stmt(call)
    } else if new_returns.len() == 1 {
        let target = ictx.host.mk_identifier_for(new_returns[0]);
        let assign = ictx.host.mk_assignment(target, call);
        ictx.host.mk_expr_stmt(assign)
    } else {
        let targets: Vec<NodeId> = new_returns
            .iter()
            .map(|&r| ictx.host.mk_identifier_for(r))
            .collect();
        let tuple = ictx.host.mk_tuple(targets);
        let assign = ictx.host.mk_assignment(tuple, call);
        ictx.host.mk_expr_stmt(assign)
    };
    stmts.push(call_stmt);
    other.push(call_stmt);

    for (id, eval, condition) in checks {
        stmts.extend(&eval);
        let annot = annotations
            .iter()
            .find(|a| a.id == id)
            .expect("annotation ids are stable");
        let check_stmts = emit_check(ictx, annot, condition, utils);
        ictx.record_general(id, &check_stmts);
        stmts.extend(check_stmts);
    }

    if let Some(entry) = entry_local {
        // if (__scribble_entry) { check invariants; restore sentinel; }
        let checker = invariant_checker_name(ictx.host, contract);
        let callee = ictx.host.mk_identifier(&checker, None);
        let call = ictx.host.mk_call(callee, vec![]);
        let call_stmt = ictx.host.mk_expr_stmt(call);
        let sentinel_lhs = ictx.host.mk_identifier(SENTINEL_NAME, Some(utils.sentinel));
        let t = ictx.host.mk_bool(true);
        let restore = ictx.host.mk_assignment(sentinel_lhs, t);
        let restore_stmt = ictx.host.mk_expr_stmt(restore);
        let body = ictx.host.mk_block(vec![call_stmt, restore_stmt]);
        let entry_ref = ictx.host.mk_identifier_for(entry);
        let guard = ictx.host.mk_if(entry_ref, body, None);
        stmts.push(guard);
        other.push(guard);
    }

    let new_body = ictx.host.mk_block(stmts);
    if let NodeKind::FunctionDefinition {
        params: p,
        returns: r,
        body: b,
        ..
    } = &mut ictx.host.node_mut(function).kind
    {
        *p = new_params.clone();
        *r = new_returns.clone();
        *b = Some(new_body);
    }
    for &n in new_params.iter().chain(new_returns.iter()) {
        ictx.host.node_mut(n).parent = Some(function);
    }
    ictx.host.node_mut(new_body).parent = Some(function);

    ictx.transition(contract, function, WrapState::Instrumented);
    Ok(())
}

/// Mirror a parameter/return declaration for the interposer signature.
/// Unnamed declarations receive `fallback` so the wrapper can reference them.
fn clone_declaration(host: &mut AstContext, decl: NodeId, fallback: Option<&str>) -> NodeId {
    let (name, type_string) = match &host.node(decl).kind {
        NodeKind::VariableDeclaration {
            name, type_string, ..
        } => (name.clone(), type_string.clone()),
        _ => (String::new(), String::new()),
    };
    let name = if name.is_empty() {
        fallback.unwrap_or_default().to_string()
    } else {
        name
    };
    host.mk_var_decl(&name, &type_string, None, false)
}
