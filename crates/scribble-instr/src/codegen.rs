//! Lowering of checked specification expressions into host-AST nodes.
//!
//! The translation is structural. Quantifiers unroll into host `for` loops
//! accumulating into a fresh boolean; `old(e)` lifts into a prologue capture
//! local evaluated before the wrapped body runs; let-bindings become locals;
//! user-function calls compile to one emitted internal host function per
//! `define` per contract, shared by every use site.

use scribble_ast::{FunctionKind, Mutability, NodeId, NodeKind, Visibility};
use scribble_check::UserFunction;
use scribble_spec::ast::{Expr, ExprKind, QuantRange, Quantifier, SpecType, UnaryOp};

use crate::context::{InstrError, InstrumentationContext};

/// A lowered predicate ready for splicing.
#[derive(Debug)]
pub struct LoweredPredicate {
    /// Old-capture statements, inserted before the wrapped body executes.
    pub old_prelude: Vec<NodeId>,
    /// Evaluation statements (quantifier loops, let locals), inserted
    /// immediately before the check.
    pub eval_prelude: Vec<NodeId>,
    /// The check condition node.
    pub condition: NodeId,
}

pub fn lower_predicate(
    ictx: &mut InstrumentationContext<'_>,
    contract: NodeId,
    file: usize,
    expr: &Expr,
    capture_old: bool,
) -> Result<LoweredPredicate, InstrError> {
    let mut lowering = Lowering {
        ictx,
        contract,
        file,
        capture_old,
        binders: Vec::new(),
        old_prelude: Vec::new(),
    };
    let mut eval_prelude = Vec::new();
    let condition = lowering.lower(&mut eval_prelude, expr)?;
    Ok(LoweredPredicate {
        old_prelude: lowering.old_prelude,
        eval_prelude,
        condition,
    })
}

struct Lowering<'a, 'b> {
    ictx: &'a mut InstrumentationContext<'b>,
    contract: NodeId,
    file: usize,
    capture_old: bool,
    /// Spec binder name → host local declaration.
    binders: Vec<(String, NodeId)>,
    old_prelude: Vec<NodeId>,
}

impl Lowering<'_, '_> {
    fn lower(&mut self, prelude: &mut Vec<NodeId>, e: &Expr) -> Result<NodeId, InstrError> {
        match &e.kind {
            ExprKind::NumberLit(n) => Ok(self.ictx.host.mk_number(&n.to_string())),
            ExprKind::BoolLit(b) => Ok(self.ictx.host.mk_bool(*b)),
            ExprKind::AddressLit(hex) => {
                let lit = self.ictx.host.mk_number(hex);
                Ok(self.ictx.host.mk_cast("address", lit))
            }
            ExprKind::StringLit(s) => Ok(self.ictx.host.mk_string(s)),
            ExprKind::Ident(name) => Ok(self.resolve_ident(name)),
            ExprKind::Index { base, index } => {
                let b = self.lower(prelude, base)?;
                let i = self.lower(prelude, index)?;
                Ok(self.ictx.host.mk_index(b, i))
            }
            ExprKind::Member { base, member } => {
                let b = self.lower(prelude, base)?;
                Ok(self.ictx.host.mk_member(b, member, None))
            }
            ExprKind::Call { callee, args } => self.lower_call(prelude, callee, args),
            ExprKind::Unary { op, operand } => {
                let sub = self.lower(prelude, operand)?;
                let op = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                };
                Ok(self.ictx.host.mk_unary(op, sub))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.lower(prelude, lhs)?;
                let r = self.lower(prelude, rhs)?;
                Ok(self.ictx.host.mk_binary(&op.to_string(), l, r))
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let c = self.lower(prelude, cond)?;
                let t = self.lower(prelude, then_branch)?;
                let f = self.lower(prelude, else_branch)?;
                Ok(self.ictx.host.mk_conditional(c, t, f))
            }
            ExprKind::Old(inner) => self.lower_old(inner, e),
            ExprKind::Let { name, bound, body } => {
                let value = self.lower(prelude, bound)?;
                let ty = self.type_of(bound)?;
                let (rendered, type_node) = self.local_type(&ty)?;
                let local_name = self.ictx.fresh_name(&format!("_let_{name}_"));
                let decl = self
                    .ictx
                    .host
                    .mk_var_decl(&local_name, &rendered, Some(type_node), false);
                let stmt = self.ictx.host.mk_var_decl_stmt(vec![decl], Some(value));
                prelude.push(stmt);
                self.binders.push((name.clone(), decl));
                let result = self.lower(prelude, body);
                self.binders.pop();
                result
            }
            ExprKind::Quantified {
                quantifier,
                var_type,
                var,
                range,
                body,
            } => self.lower_quantifier(prelude, *quantifier, var_type, var, range, body),
            ExprKind::Tuple(items) => {
                let lowered: Vec<NodeId> = items
                    .iter()
                    .map(|i| self.lower(prelude, i))
                    .collect::<Result<_, _>>()?;
                Ok(self.ictx.host.mk_tuple(lowered))
            }
            ExprKind::Cast { ty, expr } => {
                let inner = self.lower(prelude, expr)?;
                Ok(self.ictx.host.mk_cast(&ty.to_string(), inner))
            }
        }
    }

    fn resolve_ident(&mut self, name: &str) -> NodeId {
        for (binder, decl) in self.binders.iter().rev() {
            if binder == name {
                let decl = *decl;
                let local_name = self
                    .ictx
                    .host
                    .definition_name(decl)
                    .unwrap_or(name)
                    .to_string();
                return self.ictx.host.mk_identifier(&local_name, Some(decl));
            }
        }
        // State variables through the linearized base list keep their referent
        // so the flattener can track them.
        let linearized = match &self.ictx.host.node(self.contract).kind {
            NodeKind::ContractDefinition { linearized, .. } => linearized.clone(),
            _ => vec![self.contract],
        };
        for c in linearized {
            for member in self.ictx.host.children(c) {
                if let NodeKind::VariableDeclaration {
                    name: vname,
                    is_state_var: true,
                    ..
                } = &self.ictx.host.node(member).kind
                {
                    if vname == name {
                        return self.ictx.host.mk_identifier(name, Some(member));
                    }
                }
            }
        }
        self.ictx.host.mk_identifier(name, None)
    }

    fn lower_old(&mut self, inner: &Expr, whole: &Expr) -> Result<NodeId, InstrError> {
        if !self.capture_old {
            return Err(InstrError::Internal(format!(
                "old() survived checking in a pre-state-free position at {}..{}",
                whole.span.start, whole.span.end
            )));
        }
        let mut capture_prelude = Vec::new();
        let value = self.lower(&mut capture_prelude, inner)?;
        let ty = self.type_of(inner)?;
        let (rendered, type_node) = self.local_type(&ty)?;
        let local_name = self.ictx.fresh_name("_original_");
        let decl = self
            .ictx
            .host
            .mk_var_decl(&local_name, &rendered, Some(type_node), false);
        let stmt = self.ictx.host.mk_var_decl_stmt(vec![decl], Some(value));
        self.old_prelude.extend(capture_prelude);
        self.old_prelude.push(stmt);
        Ok(self.ictx.host.mk_identifier(&local_name, Some(decl)))
    }

    fn lower_quantifier(
        &mut self,
        prelude: &mut Vec<NodeId>,
        quantifier: Quantifier,
        var_type: &SpecType,
        var: &str,
        range: &QuantRange,
        body: &Expr,
    ) -> Result<NodeId, InstrError> {
        let forall = quantifier == Quantifier::ForAll;
        let acc_name = self.ictx.fresh_name("_quant_ok_");
        let bool_type = self.ictx.host.mk_elementary_type_name("bool");
        let acc_decl = self
            .ictx
            .host
            .mk_var_decl(&acc_name, "bool", Some(bool_type), false);
        let acc_init = self.ictx.host.mk_bool(forall);
        let acc_stmt = self
            .ictx
            .host
            .mk_var_decl_stmt(vec![acc_decl], Some(acc_init));
        prelude.push(acc_stmt);

        let (rendered, type_node) = self.local_type(var_type)?;
        let loop_decl = self
            .ictx
            .host
            .mk_var_decl(var, &rendered, Some(type_node), false);
        let (init, cond) = match range {
            QuantRange::IntRange { low, high } => {
                let low_node = self.lower(prelude, low)?;
                let high_node = self.lower(prelude, high)?;
                let init = self
                    .ictx
                    .host
                    .mk_var_decl_stmt(vec![loop_decl], Some(low_node));
                let loop_ref = self.ictx.host.mk_identifier(var, Some(loop_decl));
                let cond = self.ictx.host.mk_binary("<=", loop_ref, high_node);
                (init, cond)
            }
            QuantRange::Iterable(range_expr) => {
                let zero = self.ictx.host.mk_number("0");
                let init = self.ictx.host.mk_var_decl_stmt(vec![loop_decl], Some(zero));
                let array = self.lower(prelude, range_expr)?;
                let length = self.ictx.host.mk_member(array, "length", None);
                let loop_ref = self.ictx.host.mk_identifier(var, Some(loop_decl));
                let cond = self.ictx.host.mk_binary("<", loop_ref, length);
                (init, cond)
            }
        };
        let incr = {
            let loop_ref = self.ictx.host.mk_identifier(var, Some(loop_decl));
            self.ictx.host.add(
                NodeKind::UnaryOperation {
                    operator: "++".to_string(),
                    prefix: false,
                    sub: loop_ref,
                },
                None,
            )
        };

        self.binders.push((var.to_string(), loop_decl));
        let mut body_stmts = Vec::new();
        let body_cond = self.lower(&mut body_stmts, body);
        self.binders.pop();
        let body_cond = body_cond?;

        let acc_ref = self.ictx.host.mk_identifier(&acc_name, Some(acc_decl));
        let joined = self
            .ictx
            .host
            .mk_binary(if forall { "&&" } else { "||" }, acc_ref, body_cond);
        let acc_target = self.ictx.host.mk_identifier(&acc_name, Some(acc_decl));
        let accumulate = self.ictx.host.mk_assignment(acc_target, joined);
        body_stmts.push(self.ictx.host.mk_expr_stmt(accumulate));
        let loop_body = self.ictx.host.mk_block(body_stmts);
        let for_stmt = self
            .ictx
            .host
            .mk_for(Some(init), Some(cond), Some(incr), loop_body);
        prelude.push(for_stmt);
        Ok(self.ictx.host.mk_identifier(&acc_name, Some(acc_decl)))
    }

    fn lower_call(
        &mut self,
        prelude: &mut Vec<NodeId>,
        callee: &Expr,
        args: &[Expr],
    ) -> Result<NodeId, InstrError> {
        if let ExprKind::Ident(name) = &callee.kind {
            let user_fn = self
                .ictx
                .env
                .lookup_function(self.ictx.host, self.contract, name)
                .cloned();
            if let Some(uf) = user_fn {
                let target = self.ensure_define(&uf)?;
                let lowered_args: Vec<NodeId> = args
                    .iter()
                    .map(|a| self.lower(prelude, a))
                    .collect::<Result<_, _>>()?;
                let fn_name = self
                    .ictx
                    .host
                    .definition_name(target)
                    .unwrap_or(name)
                    .to_string();
                let callee_node = self.ictx.host.mk_identifier(&fn_name, Some(target));
                return Ok(self.ictx.host.mk_call(callee_node, lowered_args));
            }
        }
        let callee_node = self.lower(prelude, callee)?;
        let lowered_args: Vec<NodeId> = args
            .iter()
            .map(|a| self.lower(prelude, a))
            .collect::<Result<_, _>>()?;
        Ok(self.ictx.host.mk_call(callee_node, lowered_args))
    }

    /// At most one emitted internal function per `define` per contract; every
    /// use site calls the shared emission.
    fn ensure_define(&mut self, uf: &UserFunction) -> Result<NodeId, InstrError> {
        let key = (uf.contract, uf.def.name.clone());
        if let Some(&emitted) = self.ictx.emitted_defines.get(&key) {
            return Ok(emitted);
        }
        let mut params = Vec::with_capacity(uf.def.params.len());
        let mut saved_binders = std::mem::take(&mut self.binders);
        for (pname, pty) in &uf.def.params {
            let (rendered, type_node) = self.local_type(pty)?;
            let decl = self
                .ictx
                .host
                .mk_var_decl(pname, &rendered, Some(type_node), false);
            self.binders.push((pname.clone(), decl));
            params.push(decl);
        }
        let saved_contract = self.contract;
        let saved_capture = self.capture_old;
        self.contract = uf.contract;
        self.capture_old = false;

        let mut body_stmts = Vec::new();
        let lowered_body = self.lower(&mut body_stmts, &uf.def.body);

        self.contract = saved_contract;
        self.capture_old = saved_capture;
        std::mem::swap(&mut self.binders, &mut saved_binders);
        let lowered_body = lowered_body?;

        let (ret_rendered, ret_type_node) = self.local_type(&uf.def.return_type)?;
        let ret_decl = self
            .ictx
            .host
            .mk_var_decl("", &ret_rendered, Some(ret_type_node), false);
        body_stmts.push(self.ictx.host.mk_return(Some(lowered_body)));
        let body = self.ictx.host.mk_block(body_stmts);
        let emitted = self.ictx.host.mk_function(
            &format!("__scribble_def_{}", uf.def.name),
            FunctionKind::Function,
            Visibility::Internal,
            Mutability::View,
            params,
            vec![ret_decl],
            Some(body),
        );
        self.ictx.host.append_member(uf.contract, emitted);
        self.ictx.emitted_defines.insert(key, emitted);
        Ok(emitted)
    }

    fn type_of(&self, e: &Expr) -> Result<SpecType, InstrError> {
        self.ictx
            .env
            .type_of(self.file, e)
            .cloned()
            .ok_or_else(|| {
                InstrError::Internal(format!(
                    "no checked type for expression at {}..{}",
                    e.span.start, e.span.end
                ))
            })
    }

    /// Render a spec type as a host local-declaration type. Reference types
    /// get an explicit data location; mappings and meta-types cannot be
    /// declared as locals.
    fn local_type(&mut self, ty: &SpecType) -> Result<(String, NodeId), InstrError> {
        let rendered = render_local_type(ty)?;
        let node = self.ictx.host.mk_elementary_type_name(&rendered);
        Ok((rendered, node))
    }
}

fn render_local_type(ty: &SpecType) -> Result<String, InstrError> {
    let rendered = match ty {
        SpecType::Int { .. } | SpecType::Bool | SpecType::Address => ty.to_string(),
        SpecType::Bytes { size: Some(_) } => ty.to_string(),
        SpecType::String => "string memory".to_string(),
        SpecType::Bytes { size: None } => "bytes memory".to_string(),
        SpecType::DynArray { elem } => format!("{}[] memory", render_element_type(elem)?),
        SpecType::FixedArray { elem, size } => {
            format!("{}[{size}] memory", render_element_type(elem)?)
        }
        SpecType::Struct { name } => format!("{name} memory"),
        SpecType::Contract { name } => name.clone(),
        SpecType::Enum { name } => name.clone(),
        other => return Err(InstrError::UndeclarableType(other.to_string())),
    };
    Ok(rendered)
}

fn render_element_type(ty: &SpecType) -> Result<String, InstrError> {
    match ty {
        SpecType::Int { .. }
        | SpecType::Bool
        | SpecType::Address
        | SpecType::Bytes { size: Some(_) }
        | SpecType::Contract { .. }
        | SpecType::Enum { .. } => Ok(ty.to_string()),
        SpecType::Struct { name } => Ok(name.clone()),
        other => Err(InstrError::UndeclarableType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::InstrumentationOptions;
    use scribble_ast::{AstContext, ContractKind, SourceRange};
    use scribble_check::{
        check_annotations, extract_annotations, AnnotationFilter, ExtractedAnnotation,
        SemanticMap, TypeEnv,
    };

    fn checked_host(contract_doc: &str) -> (AstContext, TypeEnv, Vec<ExtractedAnnotation>) {
        checked_host_with_fn(contract_doc, "")
    }

    fn checked_host_with_fn(
        contract_doc: &str,
        fn_doc: &str,
    ) -> (AstContext, TypeEnv, Vec<ExtractedAnnotation>) {
        let mut ctx = AstContext::new();
        let file = ctx.register_file("t.sol");
        let x = ctx.mk_var_decl("x", "uint256", None, true);
        let arr = ctx.mk_var_decl("arr", "uint256[]", None, true);
        let body = ctx.mk_block(vec![]);
        let inc = ctx.mk_function(
            "inc",
            scribble_ast::FunctionKind::Function,
            scribble_ast::Visibility::Public,
            Mutability::NonPayable,
            vec![],
            vec![],
            Some(body),
        );
        if !fn_doc.is_empty() {
            let doc = ctx.add(
                NodeKind::StructuredDocumentation {
                    text: fn_doc.to_string(),
                },
                None,
            );
            if let NodeKind::FunctionDefinition { documentation, .. } = &mut ctx.node_mut(inc).kind
            {
                *documentation = Some(doc);
            }
            ctx.node_mut(doc).parent = Some(inc);
        }
        let c = ctx.mk_contract("Foo", ContractKind::Contract, vec![x, arr, inc]);
        if !contract_doc.is_empty() {
            let doc = ctx.add(
                NodeKind::StructuredDocumentation {
                    text: contract_doc.to_string(),
                },
                None,
            );
            if let NodeKind::ContractDefinition { documentation, .. } = &mut ctx.node_mut(c).kind {
                *documentation = Some(doc);
            }
            ctx.node_mut(doc).parent = Some(c);
        }
        let unit = ctx.mk_source_unit("t.sol", vec![c]);
        ctx.node_mut(unit).src = Some(SourceRange::new(0, 0, file));

        let (annots, _) = extract_annotations(&ctx, &[String::new()], &AnnotationFilter::none())
            .expect("extraction failed");
        let mut env = TypeEnv::default();
        let mut sem = SemanticMap::default();
        check_annotations(&ctx, &annots, &mut env, &mut sem, &[String::new()])
            .expect("check failed");
        (ctx, env, annots)
    }

    fn contract_of(ctx: &AstContext) -> NodeId {
        ctx.source_units()
            .into_iter()
            .flat_map(|u| ctx.children(u))
            .find(|&m| matches!(ctx.node(m).kind, NodeKind::ContractDefinition { .. }))
            .expect("contract")
    }

    #[test]
    fn plain_predicate_lowers_without_preludes() {
        let (mut ctx, env, annots) = checked_host("#invariant x + 1 >= x;");
        let contract = contract_of(&ctx);
        let mut ictx =
            InstrumentationContext::new(&mut ctx, &env, InstrumentationOptions::default());
        let lowered = lower_predicate(
            &mut ictx,
            contract,
            0,
            annots[0].parsed.expression(),
            false,
        )
        .expect("lowering failed");
        assert!(lowered.old_prelude.is_empty());
        assert!(lowered.eval_prelude.is_empty());
        assert!(matches!(
            ictx.host.node(lowered.condition).kind,
            NodeKind::BinaryOperation { .. }
        ));
    }

    #[test]
    fn old_capture_lifts_into_a_prologue_local() {
        let (mut ctx, env, annots) =
            checked_host_with_fn("", "#if_succeeds old(x) + 1 == x;");
        let contract = contract_of(&ctx);
        let mut ictx =
            InstrumentationContext::new(&mut ctx, &env, InstrumentationOptions::default());
        let lowered = lower_predicate(
            &mut ictx,
            contract,
            0,
            annots[0].parsed.expression(),
            true,
        )
        .expect("lowering failed");
        assert_eq!(lowered.old_prelude.len(), 1);
        assert!(matches!(
            ictx.host.node(lowered.old_prelude[0]).kind,
            NodeKind::VariableDeclarationStatement { .. }
        ));
        // The post-state check reads the capture local, not old().
        match &ictx.host.node(lowered.condition).kind {
            NodeKind::BinaryOperation { operator, left, .. } => {
                assert_eq!(operator, "==");
                match &ictx.host.node(*left).kind {
                    NodeKind::BinaryOperation { left: inner, .. } => {
                        assert!(matches!(
                            &ictx.host.node(*inner).kind,
                            NodeKind::Identifier { name, .. } if name.starts_with("_original_")
                        ));
                    }
                    other => panic!("expected addition, got {other:?}"),
                }
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn quantifier_unrolls_into_accumulator_and_loop() {
        let (mut ctx, env, annots) =
            checked_host("#invariant forall (uint256 i in 0...10) i <= 10;");
        let contract = contract_of(&ctx);
        let mut ictx =
            InstrumentationContext::new(&mut ctx, &env, InstrumentationOptions::default());
        let lowered = lower_predicate(
            &mut ictx,
            contract,
            0,
            annots[0].parsed.expression(),
            false,
        )
        .expect("lowering failed");
        assert_eq!(lowered.eval_prelude.len(), 2);
        assert!(matches!(
            ictx.host.node(lowered.eval_prelude[0]).kind,
            NodeKind::VariableDeclarationStatement { .. }
        ));
        assert!(matches!(
            ictx.host.node(lowered.eval_prelude[1]).kind,
            NodeKind::ForStatement { .. }
        ));
        assert!(matches!(
            &ictx.host.node(lowered.condition).kind,
            NodeKind::Identifier { name, .. } if name.starts_with("_quant_ok_")
        ));
    }

    #[test]
    fn array_quantifier_iterates_indices() {
        let (mut ctx, env, annots) =
            checked_host("#invariant forall (uint256 i in arr) arr[i] >= 0;");
        let contract = contract_of(&ctx);
        let mut ictx =
            InstrumentationContext::new(&mut ctx, &env, InstrumentationOptions::default());
        let lowered = lower_predicate(
            &mut ictx,
            contract,
            0,
            annots[0].parsed.expression(),
            false,
        )
        .expect("lowering failed");
        let for_stmt = lowered.eval_prelude[1];
        match &ictx.host.node(for_stmt).kind {
            NodeKind::ForStatement {
                condition: Some(cond),
                ..
            } => match &ictx.host.node(*cond).kind {
                NodeKind::BinaryOperation { operator, right, .. } => {
                    assert_eq!(operator, "<");
                    assert!(matches!(
                        &ictx.host.node(*right).kind,
                        NodeKind::MemberAccess { member, .. } if member == "length"
                    ));
                }
                other => panic!("expected comparison, got {other:?}"),
            },
            other => panic!("expected for statement, got {other:?}"),
        }
    }

    #[test]
    fn define_emits_exactly_one_internal_function() {
        let (mut ctx, env, annots) = checked_host(
            "#define nonZero(uint256 v) bool = v > 0;\n#invariant nonZero(x) && nonZero(x + 1);",
        );
        let contract = contract_of(&ctx);
        let before = ctx.children(contract).len();
        let mut ictx =
            InstrumentationContext::new(&mut ctx, &env, InstrumentationOptions::default());
        let invariant = &annots[1];
        lower_predicate(&mut ictx, contract, 0, invariant.parsed.expression(), false)
            .expect("lowering failed");
        assert_eq!(ictx.emitted_defines.len(), 1);
        let after = ictx.host.children(contract).len();
        assert_eq!(after, before + 1);
        let emitted = *ictx.emitted_defines.values().next().unwrap();
        assert_eq!(
            ictx.host.definition_name(emitted),
            Some("__scribble_def_nonZero")
        );
    }

    #[test]
    fn state_variable_references_carry_referents() {
        let (mut ctx, env, annots) = checked_host("#invariant x >= 0;");
        let contract = contract_of(&ctx);
        let x_decl = ctx
            .children(contract)
            .into_iter()
            .find(|&m| ctx.definition_name(m) == Some("x"))
            .unwrap();
        let mut ictx =
            InstrumentationContext::new(&mut ctx, &env, InstrumentationOptions::default());
        let lowered = lower_predicate(
            &mut ictx,
            contract,
            0,
            annots[0].parsed.expression(),
            false,
        )
        .expect("lowering failed");
        match &ictx.host.node(lowered.condition).kind {
            NodeKind::BinaryOperation { left, .. } => {
                assert_eq!(ictx.host.referenced_declaration(*left), Some(x_decl));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }
}
