//! Synthesis of the utilities unit: the reentrancy sentinel, the assertion
//! primitive, and per-annotation debug events.
//!
//! Instrumented contracts inherit `__scribble_ReentrancyUtils`, so the
//! sentinel lives in ordinary contract storage. Under delegatecall the
//! delegated body therefore reads and writes the *calling* contract's
//! sentinel slot, which is the intended semantics for both assertion modes.

use scribble_ast::{ContractKind, FunctionKind, Mutability, NodeId, NodeKind, Visibility};
use scribble_check::ExtractedAnnotation;

use crate::context::{AssertionMode, InstrumentationContext, UtilsUnit};

pub const UTILS_CONTRACT_NAME: &str = "__scribble_ReentrancyUtils";
pub const SENTINEL_NAME: &str = "__scribble_out_of_contract";
pub const ASSERT_FN_NAME: &str = "__scribble_assert";
pub const ASSERTION_FAILED_EVENT: &str = "AssertionFailed";

/// Build the utilities unit once per run and register per-annotation debug
/// events. Fills each property annotation's debug-event signature.
pub fn synthesize_utils(
    ictx: &mut InstrumentationContext<'_>,
    annotations: &mut [ExtractedAnnotation],
) -> UtilsUnit {
    let path = ictx.options.utils_path.clone();

    let message_param = ictx.host.mk_var_decl("message", "string", None, false);
    let event = ictx
        .host
        .mk_event(ASSERTION_FAILED_EVENT, vec![message_param]);

    let sentinel_type = ictx.host.mk_elementary_type_name("bool");
    let sentinel = ictx
        .host
        .mk_var_decl(SENTINEL_NAME, "bool", Some(sentinel_type), true);
    let init = ictx.host.mk_bool(true);
    if let NodeKind::VariableDeclaration { value, .. } = &mut ictx.host.node_mut(sentinel).kind {
        *value = Some(init);
    }
    ictx.host.node_mut(init).parent = Some(sentinel);

    let assert_fn = synthesize_assert_fn(ictx);

    let mut members = vec![event, sentinel, assert_fn];

    // One debug event per property annotation, emitted under --debug-events.
    for annot in annotations.iter_mut() {
        if !annot.is_property() {
            continue;
        }
        let signature = format!("P{}()", annot.id);
        annot.debug_event_signature = Some(signature);
        if ictx.options.debug_events {
            let event = ictx.host.mk_event(&format!("P{}", annot.id), vec![]);
            ictx.debug_event_of.insert(annot.id, event);
            members.push(event);
        }
    }

    let contract = ictx
        .host
        .mk_contract(UTILS_CONTRACT_NAME, ContractKind::Contract, members);
    let pragma = ictx
        .host
        .mk_pragma(vec!["solidity".to_string(), "^0.8.0".to_string()]);
    let unit = ictx.host.mk_source_unit(&path, vec![pragma, contract]);

    let utils = UtilsUnit {
        unit,
        contract,
        sentinel,
        assertion_failed_event: event,
        assert_fn,
    };
    ictx.utils = Some(utils);
    utils
}

/// `function __scribble_assert(bool condition, string memory message)
/// internal`, lowered per the configured assertion mode.
fn synthesize_assert_fn(ictx: &mut InstrumentationContext<'_>) -> NodeId {
    let cond_type = ictx.host.mk_elementary_type_name("bool");
    let cond_param = ictx
        .host
        .mk_var_decl("condition", "bool", Some(cond_type), false);
    let msg_param = ictx.host.mk_var_decl("message", "string memory", None, false);

    let not_cond = {
        let c = ictx.host.mk_identifier("condition", Some(cond_param));
        ictx.host.mk_unary("!", c)
    };
    let failure_body = match ictx.options.assertion_mode {
        AssertionMode::Log => {
            let callee = ictx.host.mk_identifier(ASSERTION_FAILED_EVENT, None);
            let msg_ref = ictx.host.mk_identifier("message", Some(msg_param));
            let call = ictx.host.mk_call(callee, vec![msg_ref]);
            let emit = ictx.host.mk_emit(call);
            ictx.host.mk_block(vec![emit])
        }
        AssertionMode::Mstore => {
            let asm = ictx.host.add(
                NodeKind::InlineAssembly {
                    body: "mstore(0x0, 0x0cafe)\nrevert(0x0, 0x20)".to_string(),
                },
                None,
            );
            ictx.host.mk_block(vec![asm])
        }
    };
    let guard = ictx.host.mk_if(not_cond, failure_body, None);
    let body = ictx.host.mk_block(vec![guard]);
    ictx.host.mk_function(
        ASSERT_FN_NAME,
        FunctionKind::Function,
        Visibility::Internal,
        Mutability::NonPayable,
        vec![cond_param, msg_param],
        vec![],
        Some(body),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{InstrumentationOptions, OutputMode};
    use scribble_ast::{print_unit, AstContext};
    use scribble_check::TypeEnv;

    fn options(mode: AssertionMode, debug_events: bool) -> InstrumentationOptions {
        InstrumentationOptions {
            assertion_mode: mode,
            no_assert: false,
            debug_events,
            utils_path: "utils/__scribble_ReentrancyUtils.sol".to_string(),
            output_mode: OutputMode::Files,
        }
    }

    #[test]
    fn log_mode_emits_assertion_failed_event() {
        let mut host = AstContext::new();
        let env = TypeEnv::default();
        let mut ictx =
            InstrumentationContext::new(&mut host, &env, options(AssertionMode::Log, false));
        let utils = synthesize_utils(&mut ictx, &mut []);
        let printed = print_unit(ictx.host, utils.unit);
        assert!(printed.text.contains("contract __scribble_ReentrancyUtils {"));
        assert!(printed.text.contains("event AssertionFailed(string message);"));
        assert!(printed.text.contains("bool __scribble_out_of_contract = true;"));
        assert!(printed.text.contains("emit AssertionFailed(message);"));
        assert!(!printed.text.contains("assembly"));
    }

    #[test]
    fn mstore_mode_writes_magic_value_and_reverts() {
        let mut host = AstContext::new();
        let env = TypeEnv::default();
        let mut ictx =
            InstrumentationContext::new(&mut host, &env, options(AssertionMode::Mstore, false));
        let utils = synthesize_utils(&mut ictx, &mut []);
        let printed = print_unit(ictx.host, utils.unit);
        assert!(printed.text.contains("assembly {"));
        assert!(printed.text.contains("mstore(0x0, 0x0cafe)"));
        assert!(printed.text.contains("revert(0x0, 0x20)"));
    }

    #[test]
    fn debug_events_get_one_event_per_property() {
        use scribble_ast::{ContractKind, SourceRange};
        use scribble_check::{extract_annotations, AnnotationFilter};

        let mut host = AstContext::new();
        let file = host.register_file("t.sol");
        let doc = host.add(
            NodeKind::StructuredDocumentation {
                text: "#invariant x >= 0;".into(),
            },
            None,
        );
        let x = host.mk_var_decl("x", "uint256", None, true);
        let c = host.mk_contract("Foo", ContractKind::Contract, vec![x]);
        if let NodeKind::ContractDefinition { documentation, .. } = &mut host.node_mut(c).kind {
            *documentation = Some(doc);
        }
        host.node_mut(doc).parent = Some(c);
        let unit = host.mk_source_unit("t.sol", vec![c]);
        host.node_mut(unit).src = Some(SourceRange::new(0, 0, file));
        let (mut annots, _) =
            extract_annotations(&host, &[String::new()], &AnnotationFilter::none())
                .expect("extraction failed");

        let env = TypeEnv::default();
        let mut ictx =
            InstrumentationContext::new(&mut host, &env, options(AssertionMode::Log, true));
        let utils = synthesize_utils(&mut ictx, &mut annots);
        assert_eq!(annots[0].debug_event_signature.as_deref(), Some("P0()"));
        assert_eq!(ictx.debug_event_of.len(), 1);
        let printed = print_unit(ictx.host, utils.unit);
        assert!(printed.text.contains("event P0();"));
    }
}
