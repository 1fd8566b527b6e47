//! Node factory: the minting surface used by the instrumenter.
//!
//! Generated nodes carry no source range; the printer assigns output ranges
//! and the metadata emitter attributes them back to annotations.

use crate::nodes::*;

impl AstContext {
    pub fn mk_identifier(&mut self, name: &str, referent: Option<NodeId>) -> NodeId {
        self.add(
            NodeKind::Identifier {
                name: name.to_string(),
                referenced_declaration: referent,
            },
            None,
        )
    }

    /// Identifier referring to an existing definition, named after it.
    pub fn mk_identifier_for(&mut self, decl: NodeId) -> NodeId {
        let name = self
            .definition_name(decl)
            .unwrap_or_default()
            .to_string();
        self.mk_identifier(&name, Some(decl))
    }

    pub fn mk_number(&mut self, value: &str) -> NodeId {
        self.add(
            NodeKind::Literal {
                kind: LiteralKind::Number,
                value: value.to_string(),
            },
            None,
        )
    }

    pub fn mk_bool(&mut self, value: bool) -> NodeId {
        self.add(
            NodeKind::Literal {
                kind: LiteralKind::Bool,
                value: value.to_string(),
            },
            None,
        )
    }

    pub fn mk_string(&mut self, value: &str) -> NodeId {
        self.add(
            NodeKind::Literal {
                kind: LiteralKind::Str,
                value: value.to_string(),
            },
            None,
        )
    }

    pub fn mk_binary(&mut self, operator: &str, left: NodeId, right: NodeId) -> NodeId {
        self.add(
            NodeKind::BinaryOperation {
                operator: operator.to_string(),
                left,
                right,
            },
            None,
        )
    }

    pub fn mk_unary(&mut self, operator: &str, sub: NodeId) -> NodeId {
        self.add(
            NodeKind::UnaryOperation {
                operator: operator.to_string(),
                prefix: true,
                sub,
            },
            None,
        )
    }

    pub fn mk_conditional(&mut self, condition: NodeId, t: NodeId, f: NodeId) -> NodeId {
        self.add(
            NodeKind::Conditional {
                condition,
                true_expression: t,
                false_expression: f,
            },
            None,
        )
    }

    pub fn mk_member(&mut self, expression: NodeId, member: &str, referent: Option<NodeId>) -> NodeId {
        self.add(
            NodeKind::MemberAccess {
                expression,
                member: member.to_string(),
                referenced_declaration: referent,
            },
            None,
        )
    }

    pub fn mk_index(&mut self, base: NodeId, index: NodeId) -> NodeId {
        self.add(NodeKind::IndexAccess { base, index }, None)
    }

    pub fn mk_call(&mut self, expression: NodeId, arguments: Vec<NodeId>) -> NodeId {
        self.add(
            NodeKind::FunctionCall {
                expression,
                arguments,
            },
            None,
        )
    }

    pub fn mk_assignment(&mut self, left: NodeId, right: NodeId) -> NodeId {
        self.add(
            NodeKind::Assignment {
                operator: "=".to_string(),
                left,
                right,
            },
            None,
        )
    }

    pub fn mk_tuple(&mut self, components: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::TupleExpression { components }, None)
    }

    pub fn mk_cast(&mut self, type_name: &str, expr: NodeId) -> NodeId {
        let callee = self.add(
            NodeKind::ElementaryTypeNameExpression {
                name: type_name.to_string(),
            },
            None,
        );
        self.mk_call(callee, vec![expr])
    }

    pub fn mk_expr_stmt(&mut self, expression: NodeId) -> NodeId {
        self.add(NodeKind::ExpressionStatement { expression }, None)
    }

    pub fn mk_block(&mut self, statements: Vec<NodeId>) -> NodeId {
        self.add(NodeKind::Block { statements }, None)
    }

    pub fn mk_if(&mut self, condition: NodeId, true_body: NodeId, false_body: Option<NodeId>) -> NodeId {
        self.add(
            NodeKind::IfStatement {
                condition,
                true_body,
                false_body,
            },
            None,
        )
    }

    pub fn mk_for(
        &mut self,
        init: Option<NodeId>,
        condition: Option<NodeId>,
        loop_expression: Option<NodeId>,
        body: NodeId,
    ) -> NodeId {
        self.add(
            NodeKind::ForStatement {
                init,
                condition,
                loop_expression,
                body,
            },
            None,
        )
    }

    pub fn mk_return(&mut self, expression: Option<NodeId>) -> NodeId {
        self.add(NodeKind::Return { expression }, None)
    }

    pub fn mk_emit(&mut self, event_call: NodeId) -> NodeId {
        self.add(NodeKind::EmitStatement { event_call }, None)
    }

    pub fn mk_elementary_type_name(&mut self, name: &str) -> NodeId {
        self.add(
            NodeKind::ElementaryTypeName {
                name: name.to_string(),
            },
            None,
        )
    }

    pub fn mk_var_decl(
        &mut self,
        name: &str,
        type_string: &str,
        type_name: Option<NodeId>,
        is_state_var: bool,
    ) -> NodeId {
        self.add(
            NodeKind::VariableDeclaration {
                name: name.to_string(),
                type_string: type_string.to_string(),
                type_name,
                is_state_var,
                is_constant: false,
                visibility: Visibility::Internal,
                value: None,
                documentation: None,
            },
            None,
        )
    }

    pub fn mk_var_decl_stmt(&mut self, declarations: Vec<NodeId>, initial_value: Option<NodeId>) -> NodeId {
        self.add(
            NodeKind::VariableDeclarationStatement {
                declarations,
                initial_value,
            },
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn mk_function(
        &mut self,
        name: &str,
        kind: FunctionKind,
        visibility: Visibility,
        mutability: Mutability,
        params: Vec<NodeId>,
        returns: Vec<NodeId>,
        body: Option<NodeId>,
    ) -> NodeId {
        self.add(
            NodeKind::FunctionDefinition {
                name: name.to_string(),
                kind,
                visibility,
                mutability,
                is_virtual: false,
                overrides: false,
                params,
                returns,
                body,
                documentation: None,
            },
            None,
        )
    }

    pub fn mk_event(&mut self, name: &str, params: Vec<NodeId>) -> NodeId {
        self.add(
            NodeKind::EventDefinition {
                name: name.to_string(),
                params,
            },
            None,
        )
    }

    pub fn mk_contract(&mut self, name: &str, kind: ContractKind, members: Vec<NodeId>) -> NodeId {
        let id = self.add(
            NodeKind::ContractDefinition {
                name: name.to_string(),
                kind,
                bases: vec![],
                linearized: vec![],
                members,
                documentation: None,
            },
            None,
        );
        // A contract with no bases linearizes to itself.
        if let NodeKind::ContractDefinition { linearized, .. } = &mut self.node_mut(id).kind {
            if linearized.is_empty() {
                *linearized = vec![id];
            }
        }
        id
    }

    pub fn mk_import(&mut self, path: &str, unit: Option<NodeId>) -> NodeId {
        self.add(
            NodeKind::ImportDirective {
                path: path.to_string(),
                unit,
                symbol_aliases: vec![],
            },
            None,
        )
    }

    pub fn mk_pragma(&mut self, literals: Vec<String>) -> NodeId {
        self.add(NodeKind::PragmaDirective { literals }, None)
    }

    pub fn mk_source_unit(&mut self, path: &str, members: Vec<NodeId>) -> NodeId {
        self.register_file(path);
        self.add(
            NodeKind::SourceUnit {
                path: path.to_string(),
                members,
            },
            None,
        )
    }

    // ---------------------------------------------------------------
    // Mutation helpers
    // ---------------------------------------------------------------

    /// Append a member to a contract or source unit.
    pub fn append_member(&mut self, parent: NodeId, member: NodeId) {
        match &mut self.node_mut(parent).kind {
            NodeKind::ContractDefinition { members, .. }
            | NodeKind::SourceUnit { members, .. } => members.push(member),
            other => panic!("append_member on non-container {other:?}"),
        }
        self.node_mut(member).parent = Some(parent);
    }

    /// Insert a member at the front of a contract or source unit.
    pub fn prepend_member(&mut self, parent: NodeId, member: NodeId) {
        match &mut self.node_mut(parent).kind {
            NodeKind::ContractDefinition { members, .. }
            | NodeKind::SourceUnit { members, .. } => members.insert(0, member),
            other => panic!("prepend_member on non-container {other:?}"),
        }
        self.node_mut(member).parent = Some(parent);
    }

    pub fn append_statement(&mut self, block: NodeId, stmt: NodeId) {
        match &mut self.node_mut(block).kind {
            NodeKind::Block { statements } => statements.push(stmt),
            other => panic!("append_statement on non-block {other:?}"),
        }
        self.node_mut(stmt).parent = Some(block);
    }

    pub fn prepend_statement(&mut self, block: NodeId, stmt: NodeId) {
        match &mut self.node_mut(block).kind {
            NodeKind::Block { statements } => statements.insert(0, stmt),
            other => panic!("prepend_statement on non-block {other:?}"),
        }
        self.node_mut(stmt).parent = Some(block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_nodes_carry_no_source_range() {
        let mut ctx = AstContext::new();
        let a = ctx.mk_identifier("a", None);
        let b = ctx.mk_number("1");
        let bin = ctx.mk_binary(">=", a, b);
        assert!(ctx.node(bin).src.is_none());
        assert_eq!(ctx.children(bin), vec![a, b]);
    }

    #[test]
    fn append_statement_reparents() {
        let mut ctx = AstContext::new();
        let block = ctx.mk_block(vec![]);
        let e = ctx.mk_bool(true);
        let stmt = ctx.mk_expr_stmt(e);
        ctx.append_statement(block, stmt);
        assert_eq!(ctx.node(stmt).parent, Some(block));
        assert_eq!(ctx.children(block), vec![stmt]);
    }

    #[test]
    fn lone_contract_linearizes_to_itself() {
        let mut ctx = AstContext::new();
        let c = ctx.mk_contract("C", ContractKind::Contract, vec![]);
        match &ctx.node(c).kind {
            NodeKind::ContractDefinition { linearized, .. } => assert_eq!(linearized, &vec![c]),
            _ => unreachable!(),
        }
    }
}
