//! Arena representation of the host-language AST.
//!
//! Nodes own nothing by pointer: every edge is a `NodeId` into the
//! context-owned table, so the cyclic parent/child and reference edges need no
//! interior mutability. Rebinding a child slot is an exhaustive per-variant
//! pattern match (`replace_child`), never runtime property enumeration.

use serde::{Deserialize, Serialize};

pub type NodeId = usize;

/// Byte range of a node in its originating file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRange {
    pub offset: usize,
    pub length: usize,
    pub file: usize,
}

impl SourceRange {
    pub fn new(offset: usize, length: usize, file: usize) -> Self {
        Self {
            offset,
            length,
            file,
        }
    }

    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractKind {
    Contract,
    Interface,
    Library,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
}

impl Visibility {
    pub fn is_externally_visible(self) -> bool {
        matches!(self, Visibility::Public | Visibility::External)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::External => "external",
            Visibility::Internal => "internal",
            Visibility::Private => "private",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutability {
    Pure,
    View,
    NonPayable,
    Payable,
}

impl Mutability {
    pub fn is_mutating(self) -> bool {
        matches!(self, Mutability::NonPayable | Mutability::Payable)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Function,
    Constructor,
    Fallback,
    Receive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Number,
    Bool,
    Str,
    HexStr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    SourceUnit {
        path: String,
        members: Vec<NodeId>,
    },
    PragmaDirective {
        literals: Vec<String>,
    },
    ImportDirective {
        path: String,
        /// The imported source unit, once resolved.
        unit: Option<NodeId>,
        /// `(symbol, alias)` pairs for `import {a as b} from …`.
        symbol_aliases: Vec<(String, Option<String>)>,
    },
    ContractDefinition {
        name: String,
        kind: ContractKind,
        /// Direct base contract definitions, in declaration order.
        bases: Vec<NodeId>,
        /// C3-linearized bases, most-derived (self) first.
        linearized: Vec<NodeId>,
        members: Vec<NodeId>,
        documentation: Option<NodeId>,
    },
    StructuredDocumentation {
        text: String,
    },
    FunctionDefinition {
        name: String,
        kind: FunctionKind,
        visibility: Visibility,
        mutability: Mutability,
        is_virtual: bool,
        overrides: bool,
        params: Vec<NodeId>,
        returns: Vec<NodeId>,
        body: Option<NodeId>,
        documentation: Option<NodeId>,
    },
    VariableDeclaration {
        name: String,
        /// The host compiler's external type representation.
        type_string: String,
        type_name: Option<NodeId>,
        is_state_var: bool,
        is_constant: bool,
        visibility: Visibility,
        value: Option<NodeId>,
        documentation: Option<NodeId>,
    },
    EventDefinition {
        name: String,
        params: Vec<NodeId>,
    },
    StructDefinition {
        name: String,
        members: Vec<NodeId>,
    },
    EnumDefinition {
        name: String,
        values: Vec<String>,
    },

    // Type names
    ElementaryTypeName {
        name: String,
    },
    UserDefinedTypeName {
        name: String,
        referenced_declaration: Option<NodeId>,
    },
    ArrayTypeName {
        base: NodeId,
        length: Option<NodeId>,
    },
    MappingTypeName {
        key: NodeId,
        value: NodeId,
    },

    // Statements
    Block {
        statements: Vec<NodeId>,
    },
    ExpressionStatement {
        expression: NodeId,
    },
    VariableDeclarationStatement {
        declarations: Vec<NodeId>,
        initial_value: Option<NodeId>,
    },
    IfStatement {
        condition: NodeId,
        true_body: NodeId,
        false_body: Option<NodeId>,
    },
    ForStatement {
        init: Option<NodeId>,
        condition: Option<NodeId>,
        loop_expression: Option<NodeId>,
        body: NodeId,
    },
    Return {
        expression: Option<NodeId>,
    },
    EmitStatement {
        event_call: NodeId,
    },
    /// Opaque assembly block; only ever synthesized (mstore assertion mode).
    InlineAssembly {
        body: String,
    },

    // Expressions
    Identifier {
        name: String,
        referenced_declaration: Option<NodeId>,
    },
    MemberAccess {
        expression: NodeId,
        member: String,
        referenced_declaration: Option<NodeId>,
    },
    IndexAccess {
        base: NodeId,
        index: NodeId,
    },
    FunctionCall {
        expression: NodeId,
        arguments: Vec<NodeId>,
    },
    BinaryOperation {
        operator: String,
        left: NodeId,
        right: NodeId,
    },
    UnaryOperation {
        operator: String,
        prefix: bool,
        sub: NodeId,
    },
    Conditional {
        condition: NodeId,
        true_expression: NodeId,
        false_expression: NodeId,
    },
    Assignment {
        operator: String,
        left: NodeId,
        right: NodeId,
    },
    TupleExpression {
        components: Vec<NodeId>,
    },
    Literal {
        kind: LiteralKind,
        value: String,
    },
    ElementaryTypeNameExpression {
        name: String,
    },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub src: Option<SourceRange>,
    pub kind: NodeKind,
}

/// The arena. One per compilation (and one for the merged program).
#[derive(Debug, Default, Clone)]
pub struct AstContext {
    nodes: Vec<Node>,
    /// File paths by file index, registration order.
    pub files: Vec<String>,
}

impl AstContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn register_file(&mut self, path: &str) -> usize {
        if let Some(idx) = self.files.iter().position(|f| f == path) {
            return idx;
        }
        self.files.push(path.to_string());
        self.files.len() - 1
    }

    /// Mint a node. Children must already exist; their parent links are set
    /// here.
    pub fn add(&mut self, kind: NodeKind, src: Option<SourceRange>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: None,
            src,
            kind,
        });
        for child in self.children(id) {
            self.nodes[child].parent = Some(id);
        }
        id
    }

    /// Push a node without touching parent links. The merger uses this while
    /// child ids are still group-local; it restores parents after remapping.
    pub(crate) fn push_raw(&mut self, kind: NodeKind, src: Option<SourceRange>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            parent: None,
            src,
            kind,
        });
        id
    }

    /// All source units in the arena, in creation order.
    pub fn source_units(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| matches!(n.kind, NodeKind::SourceUnit { .. }))
            .map(|n| n.id)
            .collect()
    }

    /// Child slots of a node, in syntactic order.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        match &self.nodes[id].kind {
            NodeKind::SourceUnit { members, .. } => members.clone(),
            NodeKind::PragmaDirective { .. } => Vec::new(),
            NodeKind::ImportDirective { .. } => Vec::new(),
            NodeKind::ContractDefinition {
                members,
                documentation,
                ..
            } => {
                let mut out: Vec<NodeId> = documentation.iter().copied().collect();
                out.extend(members);
                out
            }
            NodeKind::StructuredDocumentation { .. } => Vec::new(),
            NodeKind::FunctionDefinition {
                params,
                returns,
                body,
                documentation,
                ..
            } => {
                let mut out: Vec<NodeId> = documentation.iter().copied().collect();
                out.extend(params);
                out.extend(returns);
                out.extend(body.iter());
                out
            }
            NodeKind::VariableDeclaration {
                type_name,
                value,
                documentation,
                ..
            } => {
                let mut out: Vec<NodeId> = documentation.iter().copied().collect();
                out.extend(type_name.iter());
                out.extend(value.iter());
                out
            }
            NodeKind::EventDefinition { params, .. } => params.clone(),
            NodeKind::StructDefinition { members, .. } => members.clone(),
            NodeKind::EnumDefinition { .. } => Vec::new(),
            NodeKind::ElementaryTypeName { .. } => Vec::new(),
            NodeKind::UserDefinedTypeName { .. } => Vec::new(),
            NodeKind::ArrayTypeName { base, length } => {
                let mut out = vec![*base];
                out.extend(length.iter());
                out
            }
            NodeKind::MappingTypeName { key, value } => vec![*key, *value],
            NodeKind::Block { statements } => statements.clone(),
            NodeKind::ExpressionStatement { expression } => vec![*expression],
            NodeKind::VariableDeclarationStatement {
                declarations,
                initial_value,
            } => {
                let mut out = declarations.clone();
                out.extend(initial_value.iter());
                out
            }
            NodeKind::IfStatement {
                condition,
                true_body,
                false_body,
            } => {
                let mut out = vec![*condition, *true_body];
                out.extend(false_body.iter());
                out
            }
            NodeKind::ForStatement {
                init,
                condition,
                loop_expression,
                body,
            } => {
                let mut out: Vec<NodeId> = init.iter().copied().collect();
                out.extend(condition.iter());
                out.extend(loop_expression.iter());
                out.push(*body);
                out
            }
            NodeKind::Return { expression } => expression.iter().copied().collect(),
            NodeKind::EmitStatement { event_call } => vec![*event_call],
            NodeKind::InlineAssembly { .. } => Vec::new(),
            NodeKind::Identifier { .. } => Vec::new(),
            NodeKind::MemberAccess { expression, .. } => vec![*expression],
            NodeKind::IndexAccess { base, index } => vec![*base, *index],
            NodeKind::FunctionCall {
                expression,
                arguments,
            } => {
                let mut out = vec![*expression];
                out.extend(arguments);
                out
            }
            NodeKind::BinaryOperation { left, right, .. } => vec![*left, *right],
            NodeKind::UnaryOperation { sub, .. } => vec![*sub],
            NodeKind::Conditional {
                condition,
                true_expression,
                false_expression,
            } => vec![*condition, *true_expression, *false_expression],
            NodeKind::Assignment { left, right, .. } => vec![*left, *right],
            NodeKind::TupleExpression { components } => components.clone(),
            NodeKind::Literal { .. } => Vec::new(),
            NodeKind::ElementaryTypeNameExpression { .. } => Vec::new(),
        }
    }

    /// Depth-first preorder walk of a subtree.
    pub fn walk(&self, root: NodeId, visit: &mut impl FnMut(NodeId)) {
        visit(root);
        for child in self.children(root) {
            self.walk(child, visit);
        }
    }

    /// Rebind the slot of `parent` currently holding `old` to `new`. Returns
    /// false when no slot of `parent` holds `old`.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) -> bool {
        fn swap(slot: &mut NodeId, old: NodeId, new: NodeId) -> bool {
            if *slot == old {
                *slot = new;
                true
            } else {
                false
            }
        }
        fn swap_opt(slot: &mut Option<NodeId>, old: NodeId, new: NodeId) -> bool {
            if *slot == Some(old) {
                *slot = Some(new);
                true
            } else {
                false
            }
        }
        fn swap_vec(slots: &mut [NodeId], old: NodeId, new: NodeId) -> bool {
            for slot in slots {
                if swap(slot, old, new) {
                    return true;
                }
            }
            false
        }

        let replaced = match &mut self.nodes[parent].kind {
            NodeKind::SourceUnit { members, .. } => swap_vec(members, old, new),
            NodeKind::PragmaDirective { .. }
            | NodeKind::ImportDirective { .. }
            | NodeKind::StructuredDocumentation { .. }
            | NodeKind::EnumDefinition { .. }
            | NodeKind::ElementaryTypeName { .. }
            | NodeKind::UserDefinedTypeName { .. }
            | NodeKind::InlineAssembly { .. }
            | NodeKind::Identifier { .. }
            | NodeKind::Literal { .. }
            | NodeKind::ElementaryTypeNameExpression { .. } => false,
            NodeKind::ContractDefinition {
                members,
                documentation,
                ..
            } => swap_opt(documentation, old, new) || swap_vec(members, old, new),
            NodeKind::FunctionDefinition {
                params,
                returns,
                body,
                documentation,
                ..
            } => {
                swap_opt(documentation, old, new)
                    || swap_vec(params, old, new)
                    || swap_vec(returns, old, new)
                    || swap_opt(body, old, new)
            }
            NodeKind::VariableDeclaration {
                type_name,
                value,
                documentation,
                ..
            } => {
                swap_opt(documentation, old, new)
                    || swap_opt(type_name, old, new)
                    || swap_opt(value, old, new)
            }
            NodeKind::EventDefinition { params, .. } => swap_vec(params, old, new),
            NodeKind::StructDefinition { members, .. } => swap_vec(members, old, new),
            NodeKind::ArrayTypeName { base, length } => {
                swap(base, old, new) || swap_opt(length, old, new)
            }
            NodeKind::MappingTypeName { key, value } => {
                swap(key, old, new) || swap(value, old, new)
            }
            NodeKind::Block { statements } => swap_vec(statements, old, new),
            NodeKind::ExpressionStatement { expression } => swap(expression, old, new),
            NodeKind::VariableDeclarationStatement {
                declarations,
                initial_value,
            } => swap_vec(declarations, old, new) || swap_opt(initial_value, old, new),
            NodeKind::IfStatement {
                condition,
                true_body,
                false_body,
            } => {
                swap(condition, old, new)
                    || swap(true_body, old, new)
                    || swap_opt(false_body, old, new)
            }
            NodeKind::ForStatement {
                init,
                condition,
                loop_expression,
                body,
            } => {
                swap_opt(init, old, new)
                    || swap_opt(condition, old, new)
                    || swap_opt(loop_expression, old, new)
                    || swap(body, old, new)
            }
            NodeKind::Return { expression } => swap_opt(expression, old, new),
            NodeKind::EmitStatement { event_call } => swap(event_call, old, new),
            NodeKind::MemberAccess { expression, .. } => swap(expression, old, new),
            NodeKind::IndexAccess { base, index } => {
                swap(base, old, new) || swap(index, old, new)
            }
            NodeKind::FunctionCall {
                expression,
                arguments,
            } => swap(expression, old, new) || swap_vec(arguments, old, new),
            NodeKind::BinaryOperation { left, right, .. } => {
                swap(left, old, new) || swap(right, old, new)
            }
            NodeKind::UnaryOperation { sub, .. } => swap(sub, old, new),
            NodeKind::Conditional {
                condition,
                true_expression,
                false_expression,
            } => {
                swap(condition, old, new)
                    || swap(true_expression, old, new)
                    || swap(false_expression, old, new)
            }
            NodeKind::Assignment { left, right, .. } => {
                swap(left, old, new) || swap(right, old, new)
            }
            NodeKind::TupleExpression { components } => swap_vec(components, old, new),
        };
        if replaced {
            self.nodes[new].parent = Some(parent);
            self.nodes[old].parent = None;
        }
        replaced
    }

    /// The referent edge of a node, for the variants that carry one.
    pub fn referenced_declaration(&self, id: NodeId) -> Option<NodeId> {
        match &self.nodes[id].kind {
            NodeKind::Identifier {
                referenced_declaration,
                ..
            }
            | NodeKind::MemberAccess {
                referenced_declaration,
                ..
            }
            | NodeKind::UserDefinedTypeName {
                referenced_declaration,
                ..
            } => *referenced_declaration,
            NodeKind::ImportDirective { unit, .. } => *unit,
            _ => None,
        }
    }

    /// Rewrite the referent edge of a node. Returns false for variants that
    /// carry none.
    pub fn set_referenced_declaration(&mut self, id: NodeId, target: NodeId) -> bool {
        match &mut self.nodes[id].kind {
            NodeKind::Identifier {
                referenced_declaration,
                ..
            }
            | NodeKind::MemberAccess {
                referenced_declaration,
                ..
            }
            | NodeKind::UserDefinedTypeName {
                referenced_declaration,
                ..
            } => {
                *referenced_declaration = Some(target);
                true
            }
            NodeKind::ImportDirective { unit, .. } => {
                *unit = Some(target);
                true
            }
            _ => false,
        }
    }

    /// The name of a definition node, when it has one.
    pub fn definition_name(&self, id: NodeId) -> Option<&str> {
        match &self.nodes[id].kind {
            NodeKind::ContractDefinition { name, .. }
            | NodeKind::FunctionDefinition { name, .. }
            | NodeKind::VariableDeclaration { name, .. }
            | NodeKind::EventDefinition { name, .. }
            | NodeKind::StructDefinition { name, .. }
            | NodeKind::EnumDefinition { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn set_definition_name(&mut self, id: NodeId, new_name: &str) -> bool {
        match &mut self.nodes[id].kind {
            NodeKind::ContractDefinition { name, .. }
            | NodeKind::FunctionDefinition { name, .. }
            | NodeKind::VariableDeclaration { name, .. }
            | NodeKind::EventDefinition { name, .. }
            | NodeKind::StructDefinition { name, .. }
            | NodeKind::EnumDefinition { name, .. } => {
                *name = new_name.to_string();
                true
            }
            _ => false,
        }
    }

    /// The enclosing contract of a node, if any.
    pub fn enclosing_contract(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if matches!(self.nodes[n].kind, NodeKind::ContractDefinition { .. }) {
                return Some(n);
            }
            cur = self.nodes[n].parent;
        }
        None
    }

    /// The source unit a node belongs to.
    pub fn enclosing_unit(&self, id: NodeId) -> Option<NodeId> {
        let mut cur = Some(id);
        while let Some(n) = cur {
            if matches!(self.nodes[n].kind, NodeKind::SourceUnit { .. }) {
                return Some(n);
            }
            cur = self.nodes[n].parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(ctx: &mut AstContext, name: &str) -> NodeId {
        ctx.add(
            NodeKind::Identifier {
                name: name.into(),
                referenced_declaration: None,
            },
            None,
        )
    }

    #[test]
    fn add_sets_parent_links() {
        let mut ctx = AstContext::new();
        let a = ident(&mut ctx, "a");
        let b = ident(&mut ctx, "b");
        let bin = ctx.add(
            NodeKind::BinaryOperation {
                operator: "+".into(),
                left: a,
                right: b,
            },
            None,
        );
        assert_eq!(ctx.node(a).parent, Some(bin));
        assert_eq!(ctx.node(b).parent, Some(bin));
        assert_eq!(ctx.children(bin), vec![a, b]);
    }

    #[test]
    fn replace_child_rebinds_the_right_slot() {
        let mut ctx = AstContext::new();
        let a = ident(&mut ctx, "a");
        let b = ident(&mut ctx, "b");
        let bin = ctx.add(
            NodeKind::BinaryOperation {
                operator: "+".into(),
                left: a,
                right: b,
            },
            None,
        );
        let c = ident(&mut ctx, "c");
        assert!(ctx.replace_child(bin, b, c));
        assert_eq!(ctx.children(bin), vec![a, c]);
        assert_eq!(ctx.node(c).parent, Some(bin));
        assert_eq!(ctx.node(b).parent, None);
        assert!(!ctx.replace_child(bin, b, c));
    }

    #[test]
    fn referent_edges_are_settable_only_on_reference_variants() {
        let mut ctx = AstContext::new();
        let decl = ctx.add(
            NodeKind::VariableDeclaration {
                name: "x".into(),
                type_string: "uint256".into(),
                type_name: None,
                is_state_var: true,
                is_constant: false,
                visibility: Visibility::Internal,
                value: None,
                documentation: None,
            },
            None,
        );
        let id = ident(&mut ctx, "x");
        assert!(ctx.set_referenced_declaration(id, decl));
        assert_eq!(ctx.referenced_declaration(id), Some(decl));
        let lit = ctx.add(
            NodeKind::Literal {
                kind: LiteralKind::Number,
                value: "1".into(),
            },
            None,
        );
        assert!(!ctx.set_referenced_declaration(lit, decl));
    }

    #[test]
    fn enclosing_contract_walks_parents() {
        let mut ctx = AstContext::new();
        let x = ident(&mut ctx, "x");
        let stmt = ctx.add(NodeKind::ExpressionStatement { expression: x }, None);
        let body = ctx.add(
            NodeKind::Block {
                statements: vec![stmt],
            },
            None,
        );
        let f = ctx.add(
            NodeKind::FunctionDefinition {
                name: "f".into(),
                kind: FunctionKind::Function,
                visibility: Visibility::Public,
                mutability: Mutability::NonPayable,
                is_virtual: false,
                overrides: false,
                params: vec![],
                returns: vec![],
                body: Some(body),
                documentation: None,
            },
            None,
        );
        let c = ctx.add(
            NodeKind::ContractDefinition {
                name: "C".into(),
                kind: ContractKind::Contract,
                bases: vec![],
                linearized: vec![],
                members: vec![f],
                documentation: None,
            },
            None,
        );
        assert_eq!(ctx.enclosing_contract(x), Some(c));
        assert_eq!(ctx.enclosing_contract(c), Some(c));
    }

    #[test]
    fn register_file_is_idempotent() {
        let mut ctx = AstContext::new();
        let a = ctx.register_file("a.sol");
        let b = ctx.register_file("b.sol");
        assert_eq!(ctx.register_file("a.sol"), a);
        assert_ne!(a, b);
    }
}
