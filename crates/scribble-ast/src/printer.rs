//! Source emitter: prints a unit back to target-language text and records the
//! byte range every node occupies in the output. The metadata emitter joins
//! these ranges with original source ranges to build the bidirectional map.

use indexmap::IndexMap;

use crate::nodes::{
    AstContext, ContractKind, FunctionKind, LiteralKind, Mutability, NodeId, NodeKind, Visibility,
};

#[derive(Debug)]
pub struct PrintedUnit {
    pub text: String,
    /// Node → (offset, length) in `text`.
    pub ranges: IndexMap<NodeId, (usize, usize)>,
}

pub fn print_unit(ctx: &AstContext, unit: NodeId) -> PrintedUnit {
    let mut p = Printer {
        ctx,
        out: String::new(),
        ranges: IndexMap::new(),
        indent: 0,
    };
    p.emit(unit);
    if !p.out.ends_with('\n') {
        p.out.push('\n');
    }
    PrintedUnit {
        text: p.out,
        ranges: p.ranges,
    }
}

struct Printer<'a> {
    ctx: &'a AstContext,
    out: String,
    ranges: IndexMap<NodeId, (usize, usize)>,
    indent: usize,
}

impl<'a> Printer<'a> {
    fn push(&mut self, s: &str) {
        self.out.push_str(s);
    }

    fn newline(&mut self) {
        self.out.push('\n');
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
    }

    fn emit(&mut self, id: NodeId) {
        let start = self.out.len();
        self.emit_inner(id);
        self.ranges.insert(id, (start, self.out.len() - start));
    }

    fn emit_inner(&mut self, id: NodeId) {
        // Detach the arena borrow from `self` so arms can emit while holding
        // pattern bindings.
        let ctx = self.ctx;
        match &ctx.node(id).kind {
            NodeKind::SourceUnit { members, .. } => {
                let members = members.clone();
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        self.newline();
                        self.newline();
                    }
                    self.emit(*m);
                }
            }
            NodeKind::PragmaDirective { literals } => {
                self.push("pragma ");
                let joined = literals.join(" ");
                self.push(&joined);
                self.push(";");
            }
            NodeKind::ImportDirective {
                path,
                symbol_aliases,
                ..
            } => {
                if symbol_aliases.is_empty() {
                    self.push(&format!("import \"{path}\";"));
                } else {
                    let list = symbol_aliases
                        .iter()
                        .map(|(sym, alias)| match alias {
                            Some(a) => format!("{sym} as {a}"),
                            None => sym.clone(),
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.push(&format!("import {{{list}}} from \"{path}\";"));
                }
            }
            NodeKind::ContractDefinition {
                name,
                kind,
                bases,
                members,
                documentation,
                ..
            } => {
                let (name, kind, bases, members, documentation) = (
                    name.clone(),
                    *kind,
                    bases.clone(),
                    members.clone(),
                    *documentation,
                );
                if let Some(doc) = documentation {
                    self.emit(doc);
                    self.newline();
                }
                let keyword = match kind {
                    ContractKind::Contract => "contract",
                    ContractKind::Interface => "interface",
                    ContractKind::Library => "library",
                };
                self.push(&format!("{keyword} {name}"));
                if !bases.is_empty() {
                    let list = bases
                        .iter()
                        .map(|&b| {
                            self.ctx
                                .definition_name(b)
                                .unwrap_or("<anonymous>")
                                .to_string()
                        })
                        .collect::<Vec<_>>()
                        .join(", ");
                    self.push(&format!(" is {list}"));
                }
                self.push(" {");
                self.indent += 1;
                for m in &members {
                    self.newline();
                    self.emit(*m);
                }
                self.indent -= 1;
                self.newline();
                self.push("}");
            }
            NodeKind::StructuredDocumentation { text } => {
                let lines: Vec<String> =
                    text.lines().map(|l| format!("/// {}", l.trim())).collect();
                for (i, line) in lines.iter().enumerate() {
                    if i > 0 {
                        self.newline();
                    }
                    self.push(line);
                }
            }
            NodeKind::FunctionDefinition {
                name,
                kind,
                visibility,
                mutability,
                is_virtual,
                overrides,
                params,
                returns,
                body,
                documentation,
            } => {
                let (name, kind, visibility, mutability, is_virtual, overrides) = (
                    name.clone(),
                    *kind,
                    *visibility,
                    *mutability,
                    *is_virtual,
                    *overrides,
                );
                let (params, returns, body, documentation) =
                    (params.clone(), returns.clone(), *body, *documentation);
                if let Some(doc) = documentation {
                    self.emit(doc);
                    self.newline();
                }
                match kind {
                    FunctionKind::Function => self.push(&format!("function {name}(")),
                    FunctionKind::Constructor => self.push("constructor("),
                    FunctionKind::Fallback => self.push("fallback("),
                    FunctionKind::Receive => self.push("receive("),
                }
                self.emit_comma_separated(&params);
                self.push(")");
                if !matches!(kind, FunctionKind::Constructor) || visibility != Visibility::Public {
                    self.push(&format!(" {}", visibility.as_str()));
                }
                match mutability {
                    Mutability::Pure => self.push(" pure"),
                    Mutability::View => self.push(" view"),
                    Mutability::Payable => self.push(" payable"),
                    Mutability::NonPayable => {}
                }
                if is_virtual {
                    self.push(" virtual");
                }
                if overrides {
                    self.push(" override");
                }
                if !returns.is_empty() {
                    self.push(" returns (");
                    self.emit_comma_separated(&returns);
                    self.push(")");
                }
                match body {
                    Some(b) => {
                        self.push(" ");
                        self.emit(b);
                    }
                    None => self.push(";"),
                }
            }
            NodeKind::VariableDeclaration {
                name,
                type_string,
                type_name,
                is_state_var,
                is_constant,
                visibility,
                value,
                ..
            } => {
                let (name, type_string, type_name, is_state_var, is_constant, visibility, value) = (
                    name.clone(),
                    type_string.clone(),
                    *type_name,
                    *is_state_var,
                    *is_constant,
                    *visibility,
                    *value,
                );
                match type_name {
                    Some(t) => self.emit(t),
                    None => self.push(&type_string),
                }
                if is_state_var {
                    match visibility {
                        Visibility::Public => self.push(" public"),
                        Visibility::Private => self.push(" private"),
                        Visibility::Internal | Visibility::External => {}
                    }
                    if is_constant {
                        self.push(" constant");
                    }
                }
                if !name.is_empty() {
                    self.push(&format!(" {name}"));
                }
                if let Some(v) = value {
                    self.push(" = ");
                    self.emit(v);
                }
                if is_state_var {
                    self.push(";");
                }
            }
            NodeKind::EventDefinition { name, params } => {
                let (name, params) = (name.clone(), params.clone());
                self.push(&format!("event {name}("));
                self.emit_comma_separated(&params);
                self.push(");");
            }
            NodeKind::StructDefinition { name, members } => {
                let (name, members) = (name.clone(), members.clone());
                self.push(&format!("struct {name} {{"));
                self.indent += 1;
                for m in &members {
                    self.newline();
                    self.emit(*m);
                    self.push(";");
                }
                self.indent -= 1;
                self.newline();
                self.push("}");
            }
            NodeKind::EnumDefinition { name, values } => {
                self.push(&format!("enum {name} {{ {} }}", values.join(", ")));
            }
            NodeKind::ElementaryTypeName { name } => self.push(&name.clone()),
            NodeKind::UserDefinedTypeName { name, .. } => self.push(&name.clone()),
            NodeKind::ArrayTypeName { base, length } => {
                let (base, length) = (*base, *length);
                self.emit(base);
                self.push("[");
                if let Some(l) = length {
                    self.emit(l);
                }
                self.push("]");
            }
            NodeKind::MappingTypeName { key, value } => {
                let (key, value) = (*key, *value);
                self.push("mapping(");
                self.emit(key);
                self.push(" => ");
                self.emit(value);
                self.push(")");
            }
            NodeKind::Block { statements } => {
                let statements = statements.clone();
                self.push("{");
                self.indent += 1;
                for s in &statements {
                    self.newline();
                    self.emit(*s);
                }
                self.indent -= 1;
                self.newline();
                self.push("}");
            }
            NodeKind::ExpressionStatement { expression } => {
                let expression = *expression;
                self.emit(expression);
                self.push(";");
            }
            NodeKind::VariableDeclarationStatement {
                declarations,
                initial_value,
            } => {
                let (declarations, initial_value) = (declarations.clone(), *initial_value);
                if declarations.len() == 1 {
                    self.emit(declarations[0]);
                } else {
                    self.push("(");
                    self.emit_comma_separated(&declarations);
                    self.push(")");
                }
                if let Some(v) = initial_value {
                    self.push(" = ");
                    self.emit(v);
                }
                self.push(";");
            }
            NodeKind::IfStatement {
                condition,
                true_body,
                false_body,
            } => {
                let (condition, true_body, false_body) = (*condition, *true_body, *false_body);
                self.push("if (");
                self.emit(condition);
                self.push(") ");
                self.emit(true_body);
                if let Some(f) = false_body {
                    self.push(" else ");
                    self.emit(f);
                }
            }
            NodeKind::ForStatement {
                init,
                condition,
                loop_expression,
                body,
            } => {
                let (init, condition, loop_expression, body) =
                    (*init, *condition, *loop_expression, *body);
                self.push("for (");
                if let Some(i) = init {
                    // The init slot prints as a statement and carries its own
                    // semicolon.
                    self.emit(i);
                } else {
                    self.push(";");
                }
                self.push(" ");
                if let Some(c) = condition {
                    self.emit(c);
                }
                self.push("; ");
                if let Some(l) = loop_expression {
                    self.emit(l);
                }
                self.push(") ");
                self.emit(body);
            }
            NodeKind::Return { expression } => {
                let expression = *expression;
                self.push("return");
                if let Some(e) = expression {
                    self.push(" ");
                    self.emit(e);
                }
                self.push(";");
            }
            NodeKind::EmitStatement { event_call } => {
                let event_call = *event_call;
                self.push("emit ");
                self.emit(event_call);
                self.push(";");
            }
            NodeKind::InlineAssembly { body } => {
                let lines: Vec<String> = body.lines().map(str::to_string).collect();
                self.push("assembly {");
                self.indent += 1;
                for line in &lines {
                    self.newline();
                    self.push(line);
                }
                self.indent -= 1;
                self.newline();
                self.push("}");
            }
            NodeKind::Identifier { name, .. } => self.push(&name.clone()),
            NodeKind::MemberAccess {
                expression, member, ..
            } => {
                let (expression, member) = (*expression, member.clone());
                self.emit_operand(expression);
                self.push(&format!(".{member}"));
            }
            NodeKind::IndexAccess { base, index } => {
                let (base, index) = (*base, *index);
                self.emit_operand(base);
                self.push("[");
                self.emit(index);
                self.push("]");
            }
            NodeKind::FunctionCall {
                expression,
                arguments,
            } => {
                let (expression, arguments) = (*expression, arguments.clone());
                self.emit_operand(expression);
                self.push("(");
                self.emit_comma_separated(&arguments);
                self.push(")");
            }
            NodeKind::BinaryOperation {
                operator,
                left,
                right,
            } => {
                let (operator, left, right) = (operator.clone(), *left, *right);
                self.emit_operand(left);
                self.push(&format!(" {operator} "));
                self.emit_operand(right);
            }
            NodeKind::UnaryOperation {
                operator,
                prefix,
                sub,
            } => {
                let (operator, prefix, sub) = (operator.clone(), *prefix, *sub);
                if prefix {
                    self.push(&operator);
                    self.emit_operand(sub);
                } else {
                    self.emit_operand(sub);
                    self.push(&operator);
                }
            }
            NodeKind::Conditional {
                condition,
                true_expression,
                false_expression,
            } => {
                let (condition, true_expression, false_expression) =
                    (*condition, *true_expression, *false_expression);
                self.push("(");
                self.emit_operand(condition);
                self.push(" ? ");
                self.emit_operand(true_expression);
                self.push(" : ");
                self.emit_operand(false_expression);
                self.push(")");
            }
            NodeKind::Assignment {
                operator,
                left,
                right,
            } => {
                let (operator, left, right) = (operator.clone(), *left, *right);
                self.emit(left);
                self.push(&format!(" {operator} "));
                self.emit(right);
            }
            NodeKind::TupleExpression { components } => {
                let components = components.clone();
                self.push("(");
                self.emit_comma_separated(&components);
                self.push(")");
            }
            NodeKind::Literal { kind, value } => {
                let (kind, value) = (*kind, value.clone());
                match kind {
                    LiteralKind::Str => self.push(&format!("\"{}\"", escape(&value))),
                    LiteralKind::HexStr => self.push(&format!("hex\"{value}\"")),
                    LiteralKind::Number | LiteralKind::Bool => self.push(&value),
                }
            }
            NodeKind::ElementaryTypeNameExpression { name } => self.push(&name.clone()),
        }
    }

    /// Emit an expression operand, parenthesized when its printed form could
    /// regroup under an enclosing operator.
    fn emit_operand(&mut self, id: NodeId) {
        let needs_parens = matches!(
            self.ctx.node(id).kind,
            NodeKind::BinaryOperation { .. } | NodeKind::Assignment { .. }
        );
        if needs_parens {
            let start = self.out.len();
            self.push("(");
            self.emit_inner(id);
            self.push(")");
            self.ranges.insert(id, (start, self.out.len() - start));
        } else {
            self.emit(id);
        }
    }

    fn emit_comma_separated(&mut self, ids: &[NodeId]) {
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.emit(*id);
        }
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::*;

    #[test]
    fn prints_a_minimal_contract() {
        let mut ctx = AstContext::new();
        let t = ctx.mk_elementary_type_name("uint256");
        let var = ctx.mk_var_decl("x", "uint256", Some(t), true);
        let x1 = ctx.mk_identifier("x", Some(var));
        let one = ctx.mk_number("1");
        let assign = ctx.mk_assignment(x1, one);
        let stmt = ctx.mk_expr_stmt(assign);
        let body = ctx.mk_block(vec![stmt]);
        let f = ctx.mk_function(
            "set",
            FunctionKind::Function,
            Visibility::Public,
            Mutability::NonPayable,
            vec![],
            vec![],
            Some(body),
        );
        let c = ctx.mk_contract("C", ContractKind::Contract, vec![var, f]);
        let unit = ctx.mk_source_unit("c.sol", vec![c]);
        let printed = print_unit(&ctx, unit);
        let expected = "contract C {\n    uint256 x;\n    function set() public {\n        x = 1;\n    }\n}\n";
        assert_eq!(printed.text, expected);
    }

    #[test]
    fn every_emitted_node_range_matches_its_slice() {
        let mut ctx = AstContext::new();
        let a = ctx.mk_identifier("a", None);
        let b = ctx.mk_number("2");
        let sum = ctx.mk_binary("+", a, b);
        let c = ctx.mk_identifier("c", None);
        let cmp = ctx.mk_binary("==", sum, c);
        let stmt = ctx.mk_expr_stmt(cmp);
        let body = ctx.mk_block(vec![stmt]);
        let f = ctx.mk_function(
            "f",
            FunctionKind::Function,
            Visibility::Public,
            Mutability::View,
            vec![],
            vec![],
            Some(body),
        );
        let contract = ctx.mk_contract("C", ContractKind::Contract, vec![f]);
        let unit = ctx.mk_source_unit("c.sol", vec![contract]);
        let printed = print_unit(&ctx, unit);
        assert!(printed.text.contains("(a + 2) == c;"));
        for (&id, &(off, len)) in &printed.ranges {
            assert!(off + len <= printed.text.len(), "range escapes output");
            let slice = &printed.text[off..off + len];
            if let NodeKind::Identifier { name, .. } = &ctx.node(id).kind {
                assert_eq!(slice, name);
            }
        }
        let (off, len) = printed.ranges[&sum];
        assert_eq!(&printed.text[off..off + len], "(a + 2)");
    }

    #[test]
    fn prints_imports_and_pragmas() {
        let mut ctx = AstContext::new();
        let pragma = ctx.mk_pragma(vec!["solidity".into(), "^0.8.17".into()]);
        let import = ctx.mk_import("./other.sol", None);
        let unit = ctx.mk_source_unit("a.sol", vec![pragma, import]);
        let printed = print_unit(&ctx, unit);
        assert!(printed.text.starts_with("pragma solidity ^0.8.17;"));
        assert!(printed.text.contains("import \"./other.sol\";"));
    }

    #[test]
    fn doc_comment_lines_render_as_triple_slash() {
        let mut ctx = AstContext::new();
        let doc = ctx.add(
            NodeKind::StructuredDocumentation {
                text: "#invariant x >= 0;".into(),
            },
            None,
        );
        let c = ctx.mk_contract("C", ContractKind::Contract, vec![]);
        if let NodeKind::ContractDefinition { documentation, .. } = &mut ctx.node_mut(c).kind {
            *documentation = Some(doc);
        }
        ctx.node_mut(doc).parent = Some(c);
        let unit = ctx.mk_source_unit("c.sol", vec![c]);
        let printed = print_unit(&ctx, unit);
        assert!(printed.text.contains("/// #invariant x >= 0;"));
    }
}
