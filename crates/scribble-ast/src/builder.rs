//! Decoder from a host-compiler standard-JSON AST document into the arena.
//!
//! The host compiler is an oracle: it hands back a tree of node objects with
//! `nodeType`, `id`, `src` (`offset:length:file`), and resolved
//! `referencedDeclaration` edges. Decoding is two-phase: allocate arena nodes
//! while recording host ids, then rewrite referent edges through the id map.
//! Referents pointing outside the decoded group (host built-ins carry
//! negative ids) are dropped.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::nodes::{
    AstContext, ContractKind, FunctionKind, LiteralKind, Mutability, NodeId, NodeKind, SourceRange,
    Visibility,
};

#[derive(Debug, Error)]
pub enum HostAstError {
    #[error("host AST node of unsupported type '{0}'")]
    UnsupportedNode(String),
    #[error("malformed host AST: {0}")]
    Malformed(String),
}

enum Fixup {
    Referent(i64),
    ImportUnit(i64),
    Bases(Vec<i64>),
    Linearized(Vec<i64>),
}

struct Decoder<'a> {
    ctx: &'a mut AstContext,
    host_ids: HashMap<i64, NodeId>,
    fixups: Vec<(NodeId, Fixup)>,
    file_map: HashMap<usize, usize>,
}

/// Decode one compilation group: a list of source-unit JSON documents
/// produced by a single host-compiler run.
pub fn decode_group(units: &[Value]) -> Result<AstContext, HostAstError> {
    let mut ctx = AstContext::new();
    let mut dec = Decoder {
        ctx: &mut ctx,
        host_ids: HashMap::new(),
        fixups: Vec::new(),
        file_map: HashMap::new(),
    };
    for unit in units {
        dec.decode(unit)?;
    }
    dec.apply_fixups();
    Ok(ctx)
}

/// Decode a single source unit into an existing arena.
pub fn decode_source_unit(ctx: &mut AstContext, unit: &Value) -> Result<NodeId, HostAstError> {
    let mut dec = Decoder {
        ctx,
        host_ids: HashMap::new(),
        fixups: Vec::new(),
        file_map: HashMap::new(),
    };
    let id = dec.decode(unit)?;
    dec.apply_fixups();
    Ok(id)
}

fn str_of<'v>(v: &'v Value, key: &str) -> Option<&'v str> {
    v.get(key).and_then(Value::as_str)
}

fn bool_of(v: &Value, key: &str) -> bool {
    v.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn node_type(v: &Value) -> Result<&str, HostAstError> {
    str_of(v, "nodeType").ok_or_else(|| HostAstError::Malformed("node without nodeType".into()))
}

impl Decoder<'_> {
    fn decode(&mut self, v: &Value) -> Result<NodeId, HostAstError> {
        let nt = node_type(v)?.to_string();
        let kind = self.decode_kind(&nt, v)?;
        let src = self.decode_src(v);
        let id = self.ctx.add(kind, src);
        if let Some(host_id) = v.get("id").and_then(Value::as_i64) {
            self.host_ids.insert(host_id, id);
        }
        self.queue_fixups(id, &nt, v);
        Ok(id)
    }

    fn decode_src(&mut self, v: &Value) -> Option<SourceRange> {
        let src = str_of(v, "src")?;
        let mut parts = src.split(':');
        let offset: usize = parts.next()?.parse().ok()?;
        let length: usize = parts.next()?.parse().ok()?;
        let host_file: usize = parts.next()?.parse().ok()?;
        let file = *self.file_map.get(&host_file)?;
        Some(SourceRange::new(offset, length, file))
    }

    fn decode_children(&mut self, v: &Value, key: &str) -> Result<Vec<NodeId>, HostAstError> {
        match v.get(key) {
            Some(Value::Array(items)) => items.iter().map(|i| self.decode(i)).collect(),
            _ => Ok(Vec::new()),
        }
    }

    fn decode_opt(&mut self, v: &Value, key: &str) -> Result<Option<NodeId>, HostAstError> {
        match v.get(key) {
            Some(child) if !child.is_null() => Ok(Some(self.decode(child)?)),
            _ => Ok(None),
        }
    }

    /// Parameter lists nest under a `ParameterList` wrapper node; we flatten
    /// them to the declarations themselves.
    fn decode_params(&mut self, v: &Value, key: &str) -> Result<Vec<NodeId>, HostAstError> {
        match v.get(key) {
            Some(list) if !list.is_null() => self.decode_children(list, "parameters"),
            _ => Ok(Vec::new()),
        }
    }

    fn decode_documentation(&mut self, v: &Value) -> Result<Option<NodeId>, HostAstError> {
        match v.get("documentation") {
            Some(Value::String(text)) => Ok(Some(self.ctx.add(
                NodeKind::StructuredDocumentation { text: text.clone() },
                None,
            ))),
            Some(doc) if doc.is_object() => Ok(Some(self.decode(doc)?)),
            _ => Ok(None),
        }
    }

    fn decode_kind(&mut self, nt: &str, v: &Value) -> Result<NodeKind, HostAstError> {
        match nt {
            "SourceUnit" => {
                let path = str_of(v, "absolutePath").unwrap_or("<stdin>").to_string();
                // The unit's own src names the host file index every child
                // shares; bind it before children decode their ranges.
                if let Some(src) = str_of(v, "src") {
                    if let Some(host_file) = src.split(':').nth(2).and_then(|f| f.parse().ok()) {
                        let registered = self.ctx.register_file(&path);
                        self.file_map.insert(host_file, registered);
                    }
                }
                let members = self.decode_children(v, "nodes")?;
                Ok(NodeKind::SourceUnit { path, members })
            }
            "PragmaDirective" => {
                let literals = v
                    .get("literals")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(NodeKind::PragmaDirective {
                    literals: normalize_pragma(literals),
                })
            }
            "ImportDirective" => {
                let path = str_of(v, "absolutePath")
                    .or_else(|| str_of(v, "file"))
                    .unwrap_or_default()
                    .to_string();
                let symbol_aliases = v
                    .get("symbolAliases")
                    .and_then(Value::as_array)
                    .map(|aliases| {
                        aliases
                            .iter()
                            .filter_map(|a| {
                                let sym = a
                                    .get("foreign")
                                    .and_then(|f| str_of(f, "name"))
                                    .map(str::to_string)?;
                                let local = str_of(a, "local").map(str::to_string);
                                Some((sym, local))
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(NodeKind::ImportDirective {
                    path,
                    unit: None,
                    symbol_aliases,
                })
            }
            "ContractDefinition" => {
                let name = str_of(v, "name").unwrap_or_default().to_string();
                let kind = match str_of(v, "contractKind") {
                    Some("interface") => ContractKind::Interface,
                    Some("library") => ContractKind::Library,
                    _ => ContractKind::Contract,
                };
                let documentation = self.decode_documentation(v)?;
                let members = self.decode_children(v, "nodes")?;
                Ok(NodeKind::ContractDefinition {
                    name,
                    kind,
                    bases: Vec::new(),
                    linearized: Vec::new(),
                    members,
                    documentation,
                })
            }
            "StructuredDocumentation" => Ok(NodeKind::StructuredDocumentation {
                text: str_of(v, "text").unwrap_or_default().to_string(),
            }),
            "FunctionDefinition" => {
                let name = str_of(v, "name").unwrap_or_default().to_string();
                let kind = match str_of(v, "kind") {
                    Some("constructor") => FunctionKind::Constructor,
                    Some("fallback") => FunctionKind::Fallback,
                    Some("receive") => FunctionKind::Receive,
                    _ => FunctionKind::Function,
                };
                let visibility = decode_visibility(v);
                let mutability = match str_of(v, "stateMutability") {
                    Some("pure") => Mutability::Pure,
                    Some("view") => Mutability::View,
                    Some("payable") => Mutability::Payable,
                    _ => Mutability::NonPayable,
                };
                let documentation = self.decode_documentation(v)?;
                let params = self.decode_params(v, "parameters")?;
                let returns = self.decode_params(v, "returnParameters")?;
                let body = self.decode_opt(v, "body")?;
                Ok(NodeKind::FunctionDefinition {
                    name,
                    kind,
                    visibility,
                    mutability,
                    is_virtual: bool_of(v, "virtual"),
                    overrides: v.get("overrides").map(|o| !o.is_null()).unwrap_or(false),
                    params,
                    returns,
                    body,
                    documentation,
                })
            }
            "VariableDeclaration" => {
                let name = str_of(v, "name").unwrap_or_default().to_string();
                let type_string = v
                    .get("typeDescriptions")
                    .and_then(|d| str_of(d, "typeString"))
                    .unwrap_or_default()
                    .to_string();
                let documentation = self.decode_documentation(v)?;
                let type_name = self.decode_opt(v, "typeName")?;
                let value = self.decode_opt(v, "value")?;
                Ok(NodeKind::VariableDeclaration {
                    name,
                    type_string,
                    type_name,
                    is_state_var: bool_of(v, "stateVariable"),
                    is_constant: bool_of(v, "constant"),
                    visibility: decode_visibility(v),
                    value,
                    documentation,
                })
            }
            "EventDefinition" => {
                let name = str_of(v, "name").unwrap_or_default().to_string();
                let params = self.decode_params(v, "parameters")?;
                Ok(NodeKind::EventDefinition { name, params })
            }
            "StructDefinition" => {
                let name = str_of(v, "name").unwrap_or_default().to_string();
                let members = self.decode_children(v, "members")?;
                Ok(NodeKind::StructDefinition { name, members })
            }
            "EnumDefinition" => {
                let name = str_of(v, "name").unwrap_or_default().to_string();
                let values = v
                    .get("members")
                    .and_then(Value::as_array)
                    .map(|ms| {
                        ms.iter()
                            .filter_map(|m| str_of(m, "name"))
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(NodeKind::EnumDefinition { name, values })
            }
            "ElementaryTypeName" => Ok(NodeKind::ElementaryTypeName {
                name: str_of(v, "name").unwrap_or_default().to_string(),
            }),
            "UserDefinedTypeName" => {
                let name = str_of(v, "name")
                    .map(str::to_string)
                    .or_else(|| {
                        v.get("pathNode")
                            .and_then(|p| str_of(p, "name"))
                            .map(str::to_string)
                    })
                    .unwrap_or_default();
                Ok(NodeKind::UserDefinedTypeName {
                    name,
                    referenced_declaration: None,
                })
            }
            "ArrayTypeName" => {
                let base = self
                    .decode_opt(v, "baseType")?
                    .ok_or_else(|| HostAstError::Malformed("array type without base".into()))?;
                let length = self.decode_opt(v, "length")?;
                Ok(NodeKind::ArrayTypeName { base, length })
            }
            "Mapping" => {
                let key = self
                    .decode_opt(v, "keyType")?
                    .ok_or_else(|| HostAstError::Malformed("mapping without key type".into()))?;
                let value = self
                    .decode_opt(v, "valueType")?
                    .ok_or_else(|| HostAstError::Malformed("mapping without value type".into()))?;
                Ok(NodeKind::MappingTypeName { key, value })
            }
            "Block" => Ok(NodeKind::Block {
                statements: self.decode_children(v, "statements")?,
            }),
            "ExpressionStatement" => {
                let expression = self
                    .decode_opt(v, "expression")?
                    .ok_or_else(|| HostAstError::Malformed("statement without expression".into()))?;
                Ok(NodeKind::ExpressionStatement { expression })
            }
            "VariableDeclarationStatement" => {
                let declarations = self.decode_children(v, "declarations")?;
                let initial_value = self.decode_opt(v, "initialValue")?;
                Ok(NodeKind::VariableDeclarationStatement {
                    declarations,
                    initial_value,
                })
            }
            "IfStatement" => {
                let condition = self
                    .decode_opt(v, "condition")?
                    .ok_or_else(|| HostAstError::Malformed("if without condition".into()))?;
                let true_body = self
                    .decode_opt(v, "trueBody")?
                    .ok_or_else(|| HostAstError::Malformed("if without body".into()))?;
                let false_body = self.decode_opt(v, "falseBody")?;
                Ok(NodeKind::IfStatement {
                    condition,
                    true_body,
                    false_body,
                })
            }
            "ForStatement" => {
                let init = self.decode_opt(v, "initializationExpression")?;
                let condition = self.decode_opt(v, "condition")?;
                let loop_expression = self.decode_opt(v, "loopExpression")?;
                let body = self
                    .decode_opt(v, "body")?
                    .ok_or_else(|| HostAstError::Malformed("for without body".into()))?;
                Ok(NodeKind::ForStatement {
                    init,
                    condition,
                    loop_expression,
                    body,
                })
            }
            "Return" => Ok(NodeKind::Return {
                expression: self.decode_opt(v, "expression")?,
            }),
            "EmitStatement" => {
                let event_call = self
                    .decode_opt(v, "eventCall")?
                    .ok_or_else(|| HostAstError::Malformed("emit without call".into()))?;
                Ok(NodeKind::EmitStatement { event_call })
            }
            "Identifier" => Ok(NodeKind::Identifier {
                name: str_of(v, "name").unwrap_or_default().to_string(),
                referenced_declaration: None,
            }),
            "MemberAccess" => {
                let expression = self
                    .decode_opt(v, "expression")?
                    .ok_or_else(|| HostAstError::Malformed("member access without base".into()))?;
                Ok(NodeKind::MemberAccess {
                    expression,
                    member: str_of(v, "memberName").unwrap_or_default().to_string(),
                    referenced_declaration: None,
                })
            }
            "IndexAccess" => {
                let base = self
                    .decode_opt(v, "baseExpression")?
                    .ok_or_else(|| HostAstError::Malformed("index access without base".into()))?;
                let index = self
                    .decode_opt(v, "indexExpression")?
                    .ok_or_else(|| HostAstError::Malformed("index access without index".into()))?;
                Ok(NodeKind::IndexAccess { base, index })
            }
            "FunctionCall" => {
                let expression = self
                    .decode_opt(v, "expression")?
                    .ok_or_else(|| HostAstError::Malformed("call without callee".into()))?;
                let arguments = self.decode_children(v, "arguments")?;
                Ok(NodeKind::FunctionCall {
                    expression,
                    arguments,
                })
            }
            "BinaryOperation" => {
                let left = self
                    .decode_opt(v, "leftExpression")?
                    .ok_or_else(|| HostAstError::Malformed("binary without lhs".into()))?;
                let right = self
                    .decode_opt(v, "rightExpression")?
                    .ok_or_else(|| HostAstError::Malformed("binary without rhs".into()))?;
                Ok(NodeKind::BinaryOperation {
                    operator: str_of(v, "operator").unwrap_or_default().to_string(),
                    left,
                    right,
                })
            }
            "UnaryOperation" => {
                let sub = self
                    .decode_opt(v, "subExpression")?
                    .ok_or_else(|| HostAstError::Malformed("unary without operand".into()))?;
                Ok(NodeKind::UnaryOperation {
                    operator: str_of(v, "operator").unwrap_or_default().to_string(),
                    prefix: bool_of(v, "prefix") || v.get("prefix").is_none(),
                    sub,
                })
            }
            "Conditional" => {
                let condition = self
                    .decode_opt(v, "condition")?
                    .ok_or_else(|| HostAstError::Malformed("conditional without cond".into()))?;
                let true_expression = self
                    .decode_opt(v, "trueExpression")?
                    .ok_or_else(|| HostAstError::Malformed("conditional without true".into()))?;
                let false_expression = self
                    .decode_opt(v, "falseExpression")?
                    .ok_or_else(|| HostAstError::Malformed("conditional without false".into()))?;
                Ok(NodeKind::Conditional {
                    condition,
                    true_expression,
                    false_expression,
                })
            }
            "Assignment" => {
                let left = self
                    .decode_opt(v, "leftHandSide")?
                    .ok_or_else(|| HostAstError::Malformed("assignment without lhs".into()))?;
                let right = self
                    .decode_opt(v, "rightHandSide")?
                    .ok_or_else(|| HostAstError::Malformed("assignment without rhs".into()))?;
                Ok(NodeKind::Assignment {
                    operator: str_of(v, "operator").unwrap_or("=").to_string(),
                    left,
                    right,
                })
            }
            "TupleExpression" => Ok(NodeKind::TupleExpression {
                components: self.decode_children(v, "components")?,
            }),
            "Literal" => {
                let kind = match str_of(v, "kind") {
                    Some("bool") => LiteralKind::Bool,
                    Some("string") => LiteralKind::Str,
                    Some("hexString") => LiteralKind::HexStr,
                    _ => LiteralKind::Number,
                };
                Ok(NodeKind::Literal {
                    kind,
                    value: str_of(v, "value").unwrap_or_default().to_string(),
                })
            }
            "ElementaryTypeNameExpression" => {
                let name = str_of(v, "typeName")
                    .map(str::to_string)
                    .or_else(|| {
                        v.get("typeName")
                            .and_then(|t| str_of(t, "name"))
                            .map(str::to_string)
                    })
                    .unwrap_or_default();
                Ok(NodeKind::ElementaryTypeNameExpression { name })
            }
            other => Err(HostAstError::UnsupportedNode(other.to_string())),
        }
    }

    fn queue_fixups(&mut self, id: NodeId, nt: &str, v: &Value) {
        if let Some(referent) = v.get("referencedDeclaration").and_then(Value::as_i64) {
            self.fixups.push((id, Fixup::Referent(referent)));
        }
        match nt {
            "ImportDirective" => {
                if let Some(unit) = v.get("sourceUnit").and_then(Value::as_i64) {
                    self.fixups.push((id, Fixup::ImportUnit(unit)));
                }
            }
            "ContractDefinition" => {
                let bases: Vec<i64> = v
                    .get("baseContracts")
                    .and_then(Value::as_array)
                    .map(|bs| {
                        bs.iter()
                            .filter_map(|b| {
                                b.get("baseName")
                                    .and_then(|n| n.get("referencedDeclaration"))
                                    .and_then(Value::as_i64)
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                if !bases.is_empty() {
                    self.fixups.push((id, Fixup::Bases(bases)));
                }
                let linearized: Vec<i64> = v
                    .get("linearizedBaseContracts")
                    .and_then(Value::as_array)
                    .map(|ls| ls.iter().filter_map(Value::as_i64).collect())
                    .unwrap_or_default();
                if !linearized.is_empty() {
                    self.fixups.push((id, Fixup::Linearized(linearized)));
                }
            }
            _ => {}
        }
    }

    fn apply_fixups(&mut self) {
        for (id, fixup) in std::mem::take(&mut self.fixups) {
            match fixup {
                Fixup::Referent(host) => {
                    if let Some(&target) = self.host_ids.get(&host) {
                        self.ctx.set_referenced_declaration(id, target);
                    }
                }
                Fixup::ImportUnit(host) => {
                    if let Some(&target) = self.host_ids.get(&host) {
                        self.ctx.set_referenced_declaration(id, target);
                    }
                }
                Fixup::Bases(hosts) => {
                    let mapped: Vec<NodeId> = hosts
                        .iter()
                        .filter_map(|h| self.host_ids.get(h).copied())
                        .collect();
                    if let NodeKind::ContractDefinition { bases, .. } =
                        &mut self.ctx.node_mut(id).kind
                    {
                        *bases = mapped;
                    }
                }
                Fixup::Linearized(hosts) => {
                    let mapped: Vec<NodeId> = hosts
                        .iter()
                        .filter_map(|h| self.host_ids.get(h).copied())
                        .collect();
                    if let NodeKind::ContractDefinition { linearized, .. } =
                        &mut self.ctx.node_mut(id).kind
                    {
                        *linearized = mapped;
                    }
                }
            }
        }
        // A contract the host never linearized (single compilation of a
        // base-less contract) linearizes to itself.
        for id in 0..self.ctx.len() {
            if let NodeKind::ContractDefinition { linearized, .. } = &mut self.ctx.node_mut(id).kind
            {
                if linearized.is_empty() {
                    *linearized = vec![id];
                }
            }
        }
    }
}

fn decode_visibility(v: &Value) -> Visibility {
    match str_of(v, "visibility") {
        Some("public") => Visibility::Public,
        Some("external") => Visibility::External,
        Some("private") => Visibility::Private,
        _ => Visibility::Internal,
    }
}

/// The host splits pragma payloads into raw tokens (`["solidity", "^", "0.8",
/// ".17"]`); rejoin everything after the pragma name.
fn normalize_pragma(literals: Vec<String>) -> Vec<String> {
    match literals.split_first() {
        Some((name, rest)) if !rest.is_empty() => {
            vec![name.clone(), rest.concat()]
        }
        _ => literals,
    }
}
