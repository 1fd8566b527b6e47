//! Type environment and checker for specification expressions.
//!
//! Expressions are walked bottom-up against a typing context
//! `(units, contract, function?)`. Name resolution proceeds innermost to
//! outermost: quantifier/let binders, function parameters, contract state
//! through the linearized base list, unit-level constants, top-level type
//! names, built-ins. Every node receives exactly one type; assignment is
//! idempotent.

use indexmap::IndexMap;

use scribble_ast::{cha::resolve_function, AstContext, Mutability, NodeId, NodeKind, Visibility};
use scribble_spec::ast::{
    AnnotationBody, AnnotationKind, BinaryOp, Expr, ExprKind, QuantRange, Span, SpecType, UnaryOp,
    UserFunctionDef,
};
use scribble_spec::parse_type_string;

use crate::errors::{source_span, TypeError};
use crate::extractor::ExtractedAnnotation;

/// Stable key for a spec expression: file index plus its lifted byte span.
pub type ExprKey = (usize, usize, usize);

fn key_of(file: usize, e: &Expr) -> ExprKey {
    (file, e.span.start, e.span.end)
}

/// Semantic flags recorded per expression node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SemanticInfo {
    pub reads_state: bool,
    pub reads_old: bool,
    pub calls_external: bool,
}

impl SemanticInfo {
    pub fn is_pure(&self) -> bool {
        !self.reads_state && !self.calls_external
    }

    fn join(self, other: SemanticInfo) -> SemanticInfo {
        SemanticInfo {
            reads_state: self.reads_state || other.reads_state,
            reads_old: self.reads_old || other.reads_old,
            calls_external: self.calls_external || other.calls_external,
        }
    }
}

#[derive(Debug, Default)]
pub struct SemanticMap {
    info: IndexMap<ExprKey, SemanticInfo>,
}

impl SemanticMap {
    pub fn get(&self, file: usize, e: &Expr) -> Option<SemanticInfo> {
        self.info.get(&key_of(file, e)).copied()
    }
}

/// A registered `define` helper, keyed by `(contract, name)` in the env.
#[derive(Debug, Clone)]
pub struct UserFunction {
    pub def: UserFunctionDef,
    pub contract: NodeId,
    pub annotation_id: usize,
    /// Whether the body reaches a state-mutating host call, directly or
    /// through another helper. Such helpers stay callable from `if_succeeds`
    /// but are rejected at `invariant` call sites.
    pub calls_mutating: bool,
}

#[derive(Debug, Default)]
pub struct TypeEnv {
    types: IndexMap<ExprKey, SpecType>,
    user_functions: IndexMap<(NodeId, String), UserFunction>,
}

impl TypeEnv {
    pub fn type_of(&self, file: usize, e: &Expr) -> Option<&SpecType> {
        self.types.get(&key_of(file, e))
    }

    pub fn assignments(&self) -> &IndexMap<ExprKey, SpecType> {
        &self.types
    }

    pub fn register_function(&mut self, uf: UserFunction) {
        self.user_functions
            .insert((uf.contract, uf.def.name.clone()), uf);
    }

    /// User-function lookup traverses the linearized base-contract list of
    /// the query scope.
    pub fn lookup_function(
        &self,
        host: &AstContext,
        contract: NodeId,
        name: &str,
    ) -> Option<&UserFunction> {
        let linearized = match &host.node(contract).kind {
            NodeKind::ContractDefinition { linearized, .. } => linearized.clone(),
            _ => vec![contract],
        };
        linearized
            .into_iter()
            .find_map(|c| self.user_functions.get(&(c, name.to_string())))
    }

    pub fn user_functions(&self) -> impl Iterator<Item = &UserFunction> {
        self.user_functions.values()
    }
}

/// Check one annotation, updating the environment and semantic map.
/// `define` annotations register their helper on success.
pub fn check_annotation(
    host: &AstContext,
    annot: &ExtractedAnnotation,
    env: &mut TypeEnv,
    sem: &mut SemanticMap,
    sources: &[String],
) -> Result<SpecType, TypeError> {
    let contract = host
        .enclosing_contract(annot.target)
        .unwrap_or(annot.target);
    let function = matches!(
        &host.node(annot.target).kind,
        NodeKind::FunctionDefinition { .. }
    )
    .then_some(annot.target);
    let file = annot.annotation_range.file;
    let source = sources.get(file).cloned().unwrap_or_default();
    let path = host.files.get(file).cloned().unwrap_or_default();

    let mut checker = Checker {
        host,
        env,
        sem,
        contract,
        function,
        file,
        source,
        path,
        allow_old: annot.kind() == AnnotationKind::IfSucceeds,
        // Only invariants forbid state-mutating calls. A define may wrap one;
        // the restriction re-applies wherever an invariant calls the helper.
        require_pure: annot.kind() == AnnotationKind::Invariant,
        defining: None,
        saw_mutating_call: false,
        binders: Vec::new(),
    };

    match &annot.parsed.body {
        AnnotationBody::Predicate(expr) => {
            let (ty, _) = checker.infer(expr)?;
            if ty != SpecType::Bool {
                return Err(checker.wrong_type("a boolean predicate", &ty, expr.span));
            }
            Ok(ty)
        }
        AnnotationBody::Definition(def) => {
            checker.defining = Some(def.name.clone());
            for (name, ty) in &def.params {
                checker.binders.push((name.clone(), ty.clone()));
            }
            let (ty, _) = checker.infer(&def.body)?;
            if !assignable(&ty, &def.return_type) {
                return Err(checker.wrong_type(
                    &format!("the declared return type {}", def.return_type),
                    &ty,
                    def.body.span,
                ));
            }
            let calls_mutating = checker.saw_mutating_call;
            checker.env.register_function(UserFunction {
                def: def.clone(),
                contract,
                annotation_id: annot.id,
                calls_mutating,
            });
            Ok(def.return_type.clone())
        }
    }
}

/// Check a run's annotations in source order; later annotations may call
/// helpers defined earlier.
pub fn check_annotations(
    host: &AstContext,
    annots: &[ExtractedAnnotation],
    env: &mut TypeEnv,
    sem: &mut SemanticMap,
    sources: &[String],
) -> Result<(), TypeError> {
    for annot in annots {
        check_annotation(host, annot, env, sem, sources)?;
    }
    Ok(())
}

struct Checker<'a> {
    host: &'a AstContext,
    env: &'a mut TypeEnv,
    sem: &'a mut SemanticMap,
    contract: NodeId,
    function: Option<NodeId>,
    file: usize,
    source: String,
    path: String,
    allow_old: bool,
    require_pure: bool,
    defining: Option<String>,
    /// Set when the walked expression reaches a state-mutating call; recorded
    /// on `define` registration for call-site purity checks.
    saw_mutating_call: bool,
    binders: Vec<(String, SpecType)>,
}

impl Checker<'_> {
    fn named_source(&self) -> miette::NamedSource<String> {
        miette::NamedSource::new(&self.path, self.source.clone())
    }

    fn unknown(&self, name: &str, span: Span) -> TypeError {
        TypeError::UnknownName {
            name: name.to_string(),
            span: source_span(span),
            src: self.named_source(),
        }
    }

    fn wrong_type(&self, expected: &str, found: &SpecType, span: Span) -> TypeError {
        TypeError::WrongType {
            expected: expected.to_string(),
            found: found.to_string(),
            span: source_span(span),
            src: self.named_source(),
        }
    }

    fn incompatible(&self, lhs: &SpecType, rhs: &SpecType, context: &str, span: Span) -> TypeError {
        TypeError::IncompatibleTypes {
            lhs: lhs.to_string(),
            rhs: rhs.to_string(),
            context: context.to_string(),
            span: source_span(span),
            src: self.named_source(),
        }
    }

    fn infer(&mut self, e: &Expr) -> Result<(SpecType, SemanticInfo), TypeError> {
        let (ty, info) = self.infer_inner(e)?;
        self.env
            .types
            .insert(key_of(self.file, e), ty.clone());
        self.sem.info.insert(key_of(self.file, e), info);
        Ok((ty, info))
    }

    fn infer_inner(&mut self, e: &Expr) -> Result<(SpecType, SemanticInfo), TypeError> {
        let span = e.span;
        match &e.kind {
            ExprKind::NumberLit(n) => Ok((
                SpecType::Int {
                    signed: *n < 0,
                    bits: 256,
                },
                SemanticInfo::default(),
            )),
            ExprKind::BoolLit(_) => Ok((SpecType::Bool, SemanticInfo::default())),
            ExprKind::StringLit(_) => Ok((SpecType::String, SemanticInfo::default())),
            ExprKind::AddressLit(_) => Ok((SpecType::Address, SemanticInfo::default())),
            ExprKind::Ident(name) => self.resolve_name(name, span),
            ExprKind::Index { base, index } => {
                let (base_ty, base_info) = self.infer(base)?;
                let (index_ty, index_info) = self.infer(index)?;
                let info = base_info.join(index_info);
                match base_ty {
                    SpecType::DynArray { elem } | SpecType::FixedArray { elem, .. } => {
                        if !index_ty.is_numeric() {
                            return Err(self.wrong_type("a numeric index", &index_ty, index.span));
                        }
                        Ok(((*elem).clone(), info))
                    }
                    SpecType::Mapping { key, value } => {
                        if !assignable(&index_ty, &key) {
                            return Err(self.incompatible(
                                &index_ty,
                                &key,
                                "as mapping key",
                                index.span,
                            ));
                        }
                        Ok(((*value).clone(), info))
                    }
                    SpecType::Bytes { size: None } => Ok((
                        SpecType::Int {
                            signed: false,
                            bits: 8,
                        },
                        info,
                    )),
                    other => Err(self.wrong_type("an indexable type", &other, base.span)),
                }
            }
            ExprKind::Member { base, member } => self.infer_member(base, member, span),
            ExprKind::Call { callee, args } => self.infer_call(callee, args, span),
            ExprKind::Unary { op, operand } => {
                let (ty, info) = self.infer(operand)?;
                match op {
                    UnaryOp::Not => {
                        if ty != SpecType::Bool {
                            return Err(self.wrong_type("bool", &ty, operand.span));
                        }
                        Ok((SpecType::Bool, info))
                    }
                    UnaryOp::Neg => match ty {
                        SpecType::Int { bits, .. } => {
                            Ok((SpecType::Int { signed: true, bits }, info))
                        }
                        other => Err(self.wrong_type("a numeric operand", &other, operand.span)),
                    },
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let (lt, li) = self.infer(lhs)?;
                let (rt, ri) = self.infer(rhs)?;
                let info = li.join(ri);
                if op.is_arithmetic() {
                    match promote(&lt, &rt) {
                        Some(ty) => Ok((ty, info)),
                        None if both_numeric(&lt, &rt) => {
                            Err(TypeError::MixedSignArithmetic {
                                span: source_span(span),
                                src: self.named_source(),
                            })
                        }
                        None => Err(self.incompatible(&lt, &rt, "in arithmetic", span)),
                    }
                } else if op.is_comparison() {
                    let equality = matches!(op, BinaryOp::Eq | BinaryOp::Ne);
                    if comparable(&lt, &rt, equality) {
                        Ok((SpecType::Bool, info))
                    } else if both_numeric(&lt, &rt) {
                        Err(TypeError::MixedSignArithmetic {
                            span: source_span(span),
                            src: self.named_source(),
                        })
                    } else {
                        Err(self.incompatible(&lt, &rt, "in comparison", span))
                    }
                } else {
                    if lt != SpecType::Bool {
                        return Err(self.wrong_type("bool", &lt, lhs.span));
                    }
                    if rt != SpecType::Bool {
                        return Err(self.wrong_type("bool", &rt, rhs.span));
                    }
                    Ok((SpecType::Bool, info))
                }
            }
            ExprKind::Conditional {
                cond,
                then_branch,
                else_branch,
            } => {
                let (ct, ci) = self.infer(cond)?;
                if ct != SpecType::Bool {
                    return Err(self.wrong_type("bool", &ct, cond.span));
                }
                let (tt, ti) = self.infer(then_branch)?;
                let (et, ei) = self.infer(else_branch)?;
                let info = ci.join(ti).join(ei);
                if tt == et {
                    Ok((tt, info))
                } else if let Some(ty) = promote(&tt, &et) {
                    Ok((ty, info))
                } else {
                    Err(self.incompatible(&tt, &et, "in conditional branches", span))
                }
            }
            ExprKind::Old(inner) => {
                if !self.allow_old {
                    return Err(TypeError::ForbiddenOld {
                        span: source_span(span),
                        src: self.named_source(),
                    });
                }
                let (ty, info) = self.infer(inner)?;
                Ok((
                    ty,
                    SemanticInfo {
                        reads_old: true,
                        ..info
                    },
                ))
            }
            ExprKind::Let { name, bound, body } => {
                let (bt, bi) = self.infer(bound)?;
                self.binders.push((name.clone(), bt));
                let result = self.infer(body);
                self.binders.pop();
                let (ty, info) = result?;
                Ok((ty, bi.join(info)))
            }
            ExprKind::Quantified {
                var_type,
                var,
                range,
                body,
                ..
            } => {
                if !var_type.is_numeric() {
                    return Err(self.wrong_type("a numeric binder", var_type, span));
                }
                let mut info = SemanticInfo::default();
                match range {
                    QuantRange::IntRange { low, high } => {
                        let (lt, li) = self.infer(low)?;
                        let (ht, hi) = self.infer(high)?;
                        info = info.join(li).join(hi);
                        if !lt.is_numeric() {
                            return Err(self.wrong_type("a numeric bound", &lt, low.span));
                        }
                        if !ht.is_numeric() {
                            return Err(self.wrong_type("a numeric bound", &ht, high.span));
                        }
                    }
                    QuantRange::Iterable(range_expr) => {
                        let (rt, ri) = self.infer(range_expr)?;
                        info = info.join(ri);
                        match rt {
                            SpecType::DynArray { .. } | SpecType::FixedArray { .. } => {}
                            SpecType::Mapping { .. } => {
                                return Err(TypeError::InfiniteQuantifier {
                                    span: source_span(range_expr.span),
                                    src: self.named_source(),
                                });
                            }
                            other => {
                                return Err(self.wrong_type(
                                    "an iterable range",
                                    &other,
                                    range_expr.span,
                                ));
                            }
                        }
                    }
                }
                self.binders.push((var.clone(), var_type.clone()));
                let result = self.infer(body);
                self.binders.pop();
                let (bt, bi) = result?;
                if bt != SpecType::Bool {
                    return Err(self.wrong_type("a boolean body", &bt, body.span));
                }
                Ok((SpecType::Bool, info.join(bi)))
            }
            ExprKind::Tuple(items) => {
                let mut tys = Vec::with_capacity(items.len());
                let mut info = SemanticInfo::default();
                for item in items {
                    let (t, i) = self.infer(item)?;
                    tys.push(t);
                    info = info.join(i);
                }
                Ok((SpecType::Tuple(tys), info))
            }
            ExprKind::Cast { ty, expr } => {
                let (inner, info) = self.infer(expr)?;
                let ok = match (ty, &inner) {
                    (SpecType::Int { .. }, SpecType::Int { .. }) => true,
                    (SpecType::Int { signed: false, bits: 160 }, SpecType::Address) => true,
                    (SpecType::Address, SpecType::Int { signed: false, .. }) => true,
                    (SpecType::Address, SpecType::Contract { .. }) => true,
                    (SpecType::Bytes { .. }, SpecType::Int { signed: false, .. }) => true,
                    (a, b) => a == b,
                };
                if !ok {
                    return Err(self.incompatible(ty, &inner, "in cast", span));
                }
                Ok((ty.clone(), info))
            }
        }
    }

    // ---------------------------------------------------------------
    // Name resolution
    // ---------------------------------------------------------------

    fn resolve_name(
        &mut self,
        name: &str,
        span: Span,
    ) -> Result<(SpecType, SemanticInfo), TypeError> {
        // 1. Quantifier/let binders, innermost first.
        for (binder, ty) in self.binders.iter().rev() {
            if binder == name {
                return Ok((ty.clone(), SemanticInfo::default()));
            }
        }
        // 2. Function parameters and named returns.
        if let Some(function) = self.function {
            if let NodeKind::FunctionDefinition {
                params, returns, ..
            } = &self.host.node(function).kind
            {
                for &decl in params.iter().chain(returns.iter()) {
                    if self.host.definition_name(decl) == Some(name) {
                        return Ok((self.declared_type(decl, span)?, SemanticInfo::default()));
                    }
                }
            }
        }
        if name == "this" {
            let contract_name = self
                .host
                .definition_name(self.contract)
                .unwrap_or_default()
                .to_string();
            return Ok((
                SpecType::Contract {
                    name: contract_name,
                },
                SemanticInfo::default(),
            ));
        }
        // 3. Contract state, linearized bases in order.
        let linearized = match &self.host.node(self.contract).kind {
            NodeKind::ContractDefinition { linearized, .. } => linearized.clone(),
            _ => vec![self.contract],
        };
        for c in linearized {
            for member in self.host.children(c) {
                if let NodeKind::VariableDeclaration {
                    name: vname,
                    is_state_var: true,
                    ..
                } = &self.host.node(member).kind
                {
                    if vname == name {
                        return Ok((
                            self.declared_type(member, span)?,
                            SemanticInfo {
                                reads_state: true,
                                ..Default::default()
                            },
                        ));
                    }
                }
            }
        }
        // 4. Enclosing file constants.
        if let Some(unit) = self.host.enclosing_unit(self.contract) {
            for member in self.host.children(unit) {
                if let NodeKind::VariableDeclaration {
                    name: vname,
                    is_constant: true,
                    ..
                } = &self.host.node(member).kind
                {
                    if vname == name {
                        return Ok((self.declared_type(member, span)?, SemanticInfo::default()));
                    }
                }
            }
        }
        // 5. Top-level type names across imported units.
        if let Some(def) = self.find_top_level(name) {
            let ty = match &self.host.node(def).kind {
                NodeKind::ContractDefinition { name, .. } => SpecType::Contract {
                    name: name.clone(),
                },
                NodeKind::StructDefinition { name, .. } => SpecType::Struct { name: name.clone() },
                NodeKind::EnumDefinition { name, .. } => SpecType::Enum { name: name.clone() },
                _ => return Err(self.unknown(name, span)),
            };
            return Ok((SpecType::TypeOf(Box::new(ty)), SemanticInfo::default()));
        }
        Err(self.unknown(name, span))
    }

    fn declared_type(&self, decl: NodeId, span: Span) -> Result<SpecType, TypeError> {
        let type_string = match &self.host.node(decl).kind {
            NodeKind::VariableDeclaration { type_string, .. } => type_string.clone(),
            _ => String::new(),
        };
        parse_type_string(&type_string, &self.path).map_err(|_| TypeError::WrongType {
            expected: "a declarable host type".into(),
            found: type_string,
            span: source_span(span),
            src: self.named_source(),
        })
    }

    fn find_top_level(&self, name: &str) -> Option<NodeId> {
        for unit in self.host.source_units() {
            for member in self.host.children(unit) {
                if self.host.definition_name(member) == Some(name) {
                    return Some(member);
                }
            }
        }
        // Contract-scoped structs and enums are reachable by bare name too.
        for member in self.host.children(self.contract) {
            if self.host.definition_name(member) == Some(name)
                && matches!(
                    self.host.node(member).kind,
                    NodeKind::StructDefinition { .. } | NodeKind::EnumDefinition { .. }
                )
            {
                return Some(member);
            }
        }
        None
    }

    fn find_contract(&self, name: &str) -> Option<NodeId> {
        self.host.source_units().into_iter().find_map(|u| {
            self.host.children(u).into_iter().find(|&m| {
                matches!(
                    &self.host.node(m).kind,
                    NodeKind::ContractDefinition { name: n, .. } if n == name
                )
            })
        })
    }

    // ---------------------------------------------------------------
    // Members and calls
    // ---------------------------------------------------------------

    fn infer_member(
        &mut self,
        base: &Expr,
        member: &str,
        span: Span,
    ) -> Result<(SpecType, SemanticInfo), TypeError> {
        // Built-in namespaces never type as bare identifiers.
        if let ExprKind::Ident(ns) = &base.kind {
            let builtin = match (ns.as_str(), member) {
                ("msg", "sender") => Some(SpecType::Address),
                ("msg", "value") => Some(SpecType::UINT256),
                ("msg", "data") => Some(SpecType::Bytes { size: None }),
                ("block", "timestamp" | "number" | "gaslimit" | "basefee") => {
                    Some(SpecType::UINT256)
                }
                ("block", "coinbase") => Some(SpecType::Address),
                ("tx", "origin") => Some(SpecType::Address),
                ("tx", "gasprice") => Some(SpecType::UINT256),
                _ => None,
            };
            if let Some(ty) = builtin {
                return Ok((ty, SemanticInfo::default()));
            }
        }
        let (base_ty, info) = self.infer(base)?;
        match &base_ty {
            SpecType::DynArray { .. }
            | SpecType::FixedArray { .. }
            | SpecType::Bytes { size: None }
            | SpecType::String
                if member == "length" =>
            {
                Ok((SpecType::UINT256, info))
            }
            SpecType::Address if member == "balance" => Ok((SpecType::UINT256, info)),
            SpecType::Struct { name } => {
                let def = self
                    .find_top_level(struct_base_name(name))
                    .ok_or_else(|| self.unknown(name, base.span))?;
                let members = match &self.host.node(def).kind {
                    NodeKind::StructDefinition { members, .. } => members.clone(),
                    _ => Vec::new(),
                };
                for m in members {
                    if self.host.definition_name(m) == Some(member) {
                        return Ok((self.declared_type(m, span)?, info));
                    }
                }
                Err(self.unknown(member, span))
            }
            SpecType::Contract { name } => {
                let def = self
                    .find_contract(name)
                    .ok_or_else(|| self.unknown(name, base.span))?;
                for m in self.host.children(def) {
                    match &self.host.node(m).kind {
                        NodeKind::FunctionDefinition {
                            name: fname,
                            params,
                            returns,
                            ..
                        } if fname == member => {
                            let params = params.clone();
                            let returns = returns.clone();
                            let p = self.declared_types(&params, span)?;
                            let r = self.declared_types(&returns, span)?;
                            return Ok((SpecType::Function {
                                params: p,
                                returns: r,
                            }, info));
                        }
                        NodeKind::VariableDeclaration {
                            name: vname,
                            is_state_var: true,
                            visibility: Visibility::Public,
                            ..
                        } if vname == member => {
                            return Ok((self.declared_type(m, span)?, info));
                        }
                        _ => {}
                    }
                }
                Err(self.unknown(member, span))
            }
            SpecType::TypeOf(inner) => match inner.as_ref() {
                SpecType::Enum { name } => {
                    let def = self
                        .find_top_level(struct_base_name(name))
                        .ok_or_else(|| self.unknown(name, base.span))?;
                    let values = match &self.host.node(def).kind {
                        NodeKind::EnumDefinition { values, .. } => values.clone(),
                        _ => Vec::new(),
                    };
                    if values.iter().any(|v| v == member) {
                        Ok((SpecType::Enum { name: name.clone() }, info))
                    } else {
                        Err(self.unknown(member, span))
                    }
                }
                _ => Err(self.wrong_type("a member-bearing value", &base_ty, base.span)),
            },
            other => Err(self.wrong_type("a member-bearing value", other, base.span)),
        }
    }

    fn declared_types(&self, decls: &[NodeId], span: Span) -> Result<Vec<SpecType>, TypeError> {
        decls.iter().map(|&d| self.declared_type(d, span)).collect()
    }

    fn infer_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        span: Span,
    ) -> Result<(SpecType, SemanticInfo), TypeError> {
        let mut arg_types = Vec::with_capacity(args.len());
        let mut info = SemanticInfo::default();
        for a in args {
            let (t, i) = self.infer(a)?;
            arg_types.push(t);
            info = info.join(i);
        }

        match &callee.kind {
            ExprKind::Ident(name) => {
                if self.defining.as_deref() == Some(name.as_str()) {
                    return Err(TypeError::RecursiveDefine {
                        name: name.clone(),
                        span: source_span(span),
                        src: self.named_source(),
                    });
                }
                // User-defined spec helpers shadow host functions.
                if let Some(uf) = self.env.lookup_function(self.host, self.contract, name) {
                    let params: Vec<SpecType> =
                        uf.def.params.iter().map(|(_, t)| t.clone()).collect();
                    let ret = uf.def.return_type.clone();
                    let calls_mutating = uf.calls_mutating;
                    if self.require_pure && calls_mutating {
                        return Err(TypeError::NonPureCall {
                            name: name.clone(),
                            span: source_span(span),
                            src: self.named_source(),
                        });
                    }
                    self.saw_mutating_call |= calls_mutating;
                    self.check_args(name, &params, &arg_types, args, span)?;
                    return Ok((ret, info));
                }
                // Host functions via the linearized base list.
                if let Some(decl) = resolve_function(self.host, self.contract, name) {
                    return self.check_host_call(name, decl, &arg_types, args, span, info, false);
                }
                // Contract casts parse as calls on a type name.
                if let Some(def) = self.find_top_level(name) {
                    if let NodeKind::ContractDefinition { name: cname, .. } =
                        &self.host.node(def).kind
                    {
                        let cname = cname.clone();
                        if arg_types.len() != 1 {
                            return Err(TypeError::ArityMismatch {
                                name: name.clone(),
                                expected: 1,
                                found: arg_types.len(),
                                span: source_span(span),
                                src: self.named_source(),
                            });
                        }
                        return Ok((SpecType::Contract { name: cname }, info));
                    }
                }
                Err(self.unknown(name, span))
            }
            ExprKind::Member { base, member } => {
                let (base_ty, base_info) = self.infer(base)?;
                info = info.join(base_info);
                if let SpecType::Contract { name: cname } = &base_ty {
                    let def = self
                        .find_contract(cname)
                        .ok_or_else(|| self.unknown(cname, base.span))?;
                    for m in self.host.children(def) {
                        if let NodeKind::FunctionDefinition { name: fname, .. } =
                            &self.host.node(m).kind
                        {
                            if fname == member {
                                // Message calls are external even on `this`.
                                return self.check_host_call(
                                    member, m, &arg_types, args, span, info, true,
                                );
                            }
                        }
                    }
                    return Err(self.unknown(member, span));
                }
                Err(self.wrong_type("a callable member", &base_ty, callee.span))
            }
            _ => {
                let (ty, _) = self.infer(callee)?;
                Err(self.wrong_type("a callable expression", &ty, callee.span))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn check_host_call(
        &mut self,
        name: &str,
        decl: NodeId,
        arg_types: &[SpecType],
        args: &[Expr],
        span: Span,
        info: SemanticInfo,
        external: bool,
    ) -> Result<(SpecType, SemanticInfo), TypeError> {
        let (params, returns, mutability) = match &self.host.node(decl).kind {
            NodeKind::FunctionDefinition {
                params,
                returns,
                mutability,
                ..
            } => (params.clone(), returns.clone(), *mutability),
            _ => return Err(self.unknown(name, span)),
        };
        if mutability.is_mutating() {
            if self.require_pure {
                return Err(TypeError::NonPureCall {
                    name: name.to_string(),
                    span: source_span(span),
                    src: self.named_source(),
                });
            }
            self.saw_mutating_call = true;
        }
        let param_types = self.declared_types(&params, span)?;
        self.check_args(name, &param_types, arg_types, args, span)?;
        let return_types = self.declared_types(&returns, span)?;
        let result = match return_types.len() {
            0 => {
                return Err(self.wrong_type(
                    "a value-returning function",
                    &SpecType::Tuple(vec![]),
                    span,
                ))
            }
            1 => return_types.into_iter().next().expect("length checked"),
            _ => SpecType::Tuple(return_types),
        };
        let info = SemanticInfo {
            reads_state: info.reads_state || !matches!(mutability, Mutability::Pure),
            calls_external: info.calls_external || external,
            ..info
        };
        Ok((result, info))
    }

    fn check_args(
        &self,
        name: &str,
        params: &[SpecType],
        arg_types: &[SpecType],
        args: &[Expr],
        span: Span,
    ) -> Result<(), TypeError> {
        if params.len() != arg_types.len() {
            return Err(TypeError::ArityMismatch {
                name: name.to_string(),
                expected: params.len(),
                found: arg_types.len(),
                span: source_span(span),
                src: self.named_source(),
            });
        }
        for ((param, arg), arg_expr) in params.iter().zip(arg_types).zip(args) {
            if !assignable(arg, param) {
                return Err(self.incompatible(arg, param, "as argument", arg_expr.span));
            }
        }
        Ok(())
    }
}

fn struct_base_name(qualified: &str) -> &str {
    qualified.rsplit('.').next().unwrap_or(qualified)
}

fn both_numeric(a: &SpecType, b: &SpecType) -> bool {
    a.is_numeric() && b.is_numeric()
}

/// Widen two numeric types to the larger width; signs must agree.
fn promote(a: &SpecType, b: &SpecType) -> Option<SpecType> {
    match (a, b) {
        (
            SpecType::Int {
                signed: sa,
                bits: ba,
            },
            SpecType::Int {
                signed: sb,
                bits: bb,
            },
        ) if sa == sb => Some(SpecType::Int {
            signed: *sa,
            bits: (*ba).max(*bb),
        }),
        _ => None,
    }
}

fn comparable(a: &SpecType, b: &SpecType, equality: bool) -> bool {
    if promote(a, b).is_some() {
        return true;
    }
    match (a, b) {
        (SpecType::Address, SpecType::Address) => true,
        _ if equality => a == b,
        _ => false,
    }
}

/// `from` may flow into `to`: exact match or numeric widening.
fn assignable(from: &SpecType, to: &SpecType) -> bool {
    if from == to {
        return true;
    }
    match (from, to) {
        (
            SpecType::Int {
                signed: sa,
                bits: ba,
            },
            SpecType::Int {
                signed: sb,
                bits: bb,
            },
        ) => sa == sb && ba <= bb,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{extract_annotations, AnnotationFilter};
    use scribble_ast::{ContractKind, FunctionKind, SourceRange, Visibility};

    /// Host contract with a representative state surface:
    /// `uint256 x; int256 y; uint256[] arr; mapping(address => uint256) bal;`
    /// plus `inc(uint256 n)` (annotatable), `getX()` (view), `bump()`
    /// (mutating).
    fn host(contract_doc: &str, fn_doc: &str) -> (AstContext, Vec<ExtractedAnnotation>) {
        let mut ctx = AstContext::new();
        let file = ctx.register_file("test.sol");
        let x = ctx.mk_var_decl("x", "uint256", None, true);
        let y = ctx.mk_var_decl("y", "int256", None, true);
        let arr = ctx.mk_var_decl("arr", "uint256[]", None, true);
        let bal = ctx.mk_var_decl("bal", "mapping(address => uint256)", None, true);

        let n = ctx.mk_var_decl("n", "uint256", None, false);
        let inc_body = ctx.mk_block(vec![]);
        let inc = ctx.mk_function(
            "inc",
            FunctionKind::Function,
            Visibility::Public,
            Mutability::NonPayable,
            vec![n],
            vec![],
            Some(inc_body),
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

        let get_ret = ctx.mk_var_decl("", "uint256", None, false);
        let get_body = ctx.mk_block(vec![]);
        let get_x = ctx.mk_function(
            "getX",
            FunctionKind::Function,
            Visibility::Public,
            Mutability::View,
            vec![],
            vec![get_ret],
            Some(get_body),
        );
        let bump_ret = ctx.mk_var_decl("", "uint256", None, false);
        let bump_body = ctx.mk_block(vec![]);
        let bump = ctx.mk_function(
            "bump",
            FunctionKind::Function,
            Visibility::Public,
            Mutability::NonPayable,
            vec![],
            vec![bump_ret],
            Some(bump_body),
        );

        let c = ctx.mk_contract(
            "Foo",
            ContractKind::Contract,
            vec![x, y, arr, bal, inc, get_x, bump],
        );
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
        let unit = ctx.mk_source_unit("test.sol", vec![c]);
        ctx.node_mut(unit).src = Some(SourceRange::new(0, 0, file));

        let (annots, _) = extract_annotations(&ctx, &[String::new()], &AnnotationFilter::none())
            .expect("extraction failed");
        (ctx, annots)
    }

    fn check_all(
        ctx: &AstContext,
        annots: &[ExtractedAnnotation],
    ) -> Result<(TypeEnv, SemanticMap), TypeError> {
        let mut env = TypeEnv::default();
        let mut sem = SemanticMap::default();
        check_annotations(ctx, annots, &mut env, &mut sem, &[String::new()])?;
        Ok((env, sem))
    }

    #[test]
    fn invariant_over_state_typechecks() {
        let (ctx, annots) = host("#invariant x >= 0;", "");
        check_all(&ctx, &annots).expect("check failed");
    }

    #[test]
    fn if_succeeds_with_old_typechecks_and_marks_old_access() {
        let (ctx, annots) = host("", "#if_succeeds old(x) + 1 == x;");
        let (_, sem) = check_all(&ctx, &annots).expect("check failed");
        let file = annots[0].annotation_range.file;
        let expr = annots[0].parsed.expression();
        // The top-level comparison reads both state and pre-state.
        let info = sem.get(file, expr).expect("semantic info");
        assert!(info.reads_state);
        assert!(info.reads_old);
    }

    #[test]
    fn old_inside_invariant_is_rejected() {
        let (ctx, annots) = host("#invariant old(x) == x;", "");
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::ForbiddenOld { .. }));
    }

    #[test]
    fn mixed_sign_arithmetic_is_rejected() {
        let (ctx, annots) = host("#invariant x + y > 0;", "");
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::MixedSignArithmetic { .. }));
    }

    #[test]
    fn unknown_name_is_rejected() {
        let (ctx, annots) = host("#invariant missing > 0;", "");
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::UnknownName { name, .. } if name == "missing"));
    }

    #[test]
    fn function_parameters_resolve_before_state() {
        let (ctx, annots) = host("", "#if_succeeds n >= 0;");
        check_all(&ctx, &annots).expect("check failed");
    }

    #[test]
    fn quantifier_over_integer_range_typechecks() {
        let (ctx, annots) = host("#invariant forall (uint256 i in 0...10) i <= 10;", "");
        check_all(&ctx, &annots).expect("check failed");
    }

    #[test]
    fn quantifier_over_array_indices_typechecks() {
        let (ctx, annots) = host("#invariant forall (uint256 i in arr) arr[i] >= 0;", "");
        check_all(&ctx, &annots).expect("check failed");
    }

    #[test]
    fn quantifier_over_bare_mapping_is_infinite() {
        let (ctx, annots) = host("#invariant forall (uint256 k in bal) k >= 0;", "");
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::InfiniteQuantifier { .. }));
    }

    #[test]
    fn define_registers_and_is_callable_from_later_annotations() {
        let (ctx, annots) = host(
            "#define nonZero(uint256 v) bool = v > 0;\n#invariant nonZero(x);",
            "",
        );
        assert_eq!(annots.len(), 2);
        let (env, _) = check_all(&ctx, &annots).expect("check failed");
        assert_eq!(env.user_functions().count(), 1);
    }

    #[test]
    fn recursive_define_is_rejected() {
        let (ctx, annots) = host("#define f(uint256 v) bool = f(v);", "");
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::RecursiveDefine { name, .. } if name == "f"));
    }

    #[test]
    fn define_arity_is_enforced_at_call_sites() {
        let (ctx, annots) = host(
            "#define nonZero(uint256 v) bool = v > 0;\n#invariant nonZero(x, x);",
            "",
        );
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(
            err,
            TypeError::ArityMismatch {
                expected: 1,
                found: 2,
                ..
            }
        ));
    }

    #[test]
    fn mutating_call_inside_invariant_is_rejected() {
        let (ctx, annots) = host("#invariant bump() > 0;", "");
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::NonPureCall { name, .. } if name == "bump"));
    }

    #[test]
    fn mutating_call_inside_define_is_allowed() {
        // The purity rule binds invariants, not helper declarations.
        let (ctx, annots) = host("#define bumped() uint256 = bump();", "");
        let (env, _) = check_all(&ctx, &annots).expect("check failed");
        let uf = env.user_functions().next().expect("helper registered");
        assert!(uf.calls_mutating);
    }

    #[test]
    fn invariant_calling_mutating_define_is_rejected_at_the_call_site() {
        let (ctx, annots) = host(
            "#define bumped() uint256 = bump();\n#invariant bumped() > 0;",
            "",
        );
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::NonPureCall { name, .. } if name == "bumped"));
    }

    #[test]
    fn if_succeeds_may_call_a_mutating_define() {
        let (ctx, annots) = host(
            "#define bumped() uint256 = bump();",
            "#if_succeeds bumped() >= 0;",
        );
        check_all(&ctx, &annots).expect("check failed");
    }

    #[test]
    fn view_call_inside_invariant_is_allowed() {
        let (ctx, annots) = host("#invariant getX() >= 0;", "");
        check_all(&ctx, &annots).expect("check failed");
    }

    #[test]
    fn builtins_resolve_through_member_rules() {
        let (ctx, annots) = host("", "#if_succeeds msg.value >= 0 && msg.sender == msg.sender;");
        check_all(&ctx, &annots).expect("check failed");
    }

    #[test]
    fn non_boolean_predicate_is_rejected() {
        let (ctx, annots) = host("#invariant x + 1;", "");
        let err = check_all(&ctx, &annots).expect_err("expected rejection");
        assert!(matches!(err, TypeError::WrongType { .. }));
    }

    #[test]
    fn type_assignment_is_idempotent() {
        let (ctx, annots) = host("#invariant x >= 0 && forall (uint256 i in arr) arr[i] >= 0;", "");
        let mut env = TypeEnv::default();
        let mut sem = SemanticMap::default();
        check_annotations(&ctx, &annots, &mut env, &mut sem, &[String::new()])
            .expect("first check failed");
        let first = env.assignments().clone();
        check_annotations(&ctx, &annots, &mut env, &mut sem, &[String::new()])
            .expect("second check failed");
        assert_eq!(&first, env.assignments());
    }
}
