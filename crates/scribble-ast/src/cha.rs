//! Class-hierarchy analysis and the call graph.
//!
//! Ordering is deterministic throughout: contracts are discovered in unit and
//! member order, and every map iterates in insertion order.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::nodes::{AstContext, FunctionKind, NodeId, NodeKind};

#[derive(Debug, Error)]
pub enum ChaError {
    #[error("Cannot linearize bases of contract '{0}'")]
    LinearizationFailure(String),
}

/// Parent/child relation over contracts.
#[derive(Debug, Default)]
pub struct Cha {
    /// Direct bases, declaration order.
    pub parents: IndexMap<NodeId, Vec<NodeId>>,
    /// Direct derived contracts, discovery order.
    pub children: IndexMap<NodeId, Vec<NodeId>>,
}

impl Cha {
    pub fn build(ctx: &AstContext) -> Self {
        let mut cha = Cha::default();
        for unit in ctx.source_units() {
            for member in ctx.children(unit) {
                if let NodeKind::ContractDefinition { bases, .. } = &ctx.node(member).kind {
                    cha.parents.insert(member, bases.clone());
                    cha.children.entry(member).or_default();
                }
            }
        }
        let relation: Vec<(NodeId, Vec<NodeId>)> = cha
            .parents
            .iter()
            .map(|(c, bs)| (*c, bs.clone()))
            .collect();
        for (contract, bases) in relation {
            for base in bases {
                cha.children.entry(base).or_default().push(contract);
            }
        }
        cha
    }

    /// Every contract in the hierarchy, discovery order.
    pub fn contracts(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.parents.keys().copied()
    }

    pub fn transitive_parents(&self, contract: NodeId) -> IndexSet<NodeId> {
        let mut out = IndexSet::new();
        let mut queue = vec![contract];
        while let Some(c) = queue.pop() {
            for &p in self.parents.get(&c).map(Vec::as_slice).unwrap_or(&[]) {
                if out.insert(p) {
                    queue.push(p);
                }
            }
        }
        out
    }

    pub fn transitive_children(&self, contract: NodeId) -> IndexSet<NodeId> {
        let mut out = IndexSet::new();
        let mut queue = vec![contract];
        while let Some(c) = queue.pop() {
            for &d in self.children.get(&c).map(Vec::as_slice).unwrap_or(&[]) {
                if out.insert(d) {
                    queue.push(d);
                }
            }
        }
        out
    }

    /// Visit every contract exactly once, children before parents. Diamond
    /// hierarchies reach each contract through a single visit regardless of
    /// how many paths lead to it.
    pub fn dfs(&self, mut visit: impl FnMut(NodeId)) {
        let mut visited: IndexSet<NodeId> = IndexSet::new();
        fn rec(
            cha: &Cha,
            c: NodeId,
            visited: &mut IndexSet<NodeId>,
            visit: &mut impl FnMut(NodeId),
        ) {
            if !visited.insert(c) {
                return;
            }
            for &child in cha.children.get(&c).map(Vec::as_slice).unwrap_or(&[]) {
                rec(cha, child, visited, visit);
            }
            visit(c);
        }
        for c in self.parents.keys().copied().collect::<Vec<_>>() {
            rec(self, c, &mut visited, &mut visit);
        }
    }
}

/// C3 linearization of a contract's bases: the contract itself first, then
/// its bases most-derived-first.
pub fn linearize(ctx: &AstContext, contract: NodeId) -> Result<Vec<NodeId>, ChaError> {
    fn lin(ctx: &AstContext, c: NodeId) -> Result<Vec<NodeId>, ChaError> {
        let bases = match &ctx.node(c).kind {
            NodeKind::ContractDefinition { bases, .. } => bases.clone(),
            _ => Vec::new(),
        };
        if bases.is_empty() {
            return Ok(vec![c]);
        }
        let mut sequences: Vec<Vec<NodeId>> = Vec::new();
        for &b in &bases {
            sequences.push(lin(ctx, b)?);
        }
        sequences.push(bases.clone());
        let mut result = vec![c];
        // Standard C3 merge: repeatedly take a head that appears in no
        // sequence tail.
        while sequences.iter().any(|s| !s.is_empty()) {
            let mut chosen = None;
            for seq in &sequences {
                let Some(&head) = seq.first() else { continue };
                let in_tail = sequences
                    .iter()
                    .any(|s| s.iter().skip(1).any(|&x| x == head));
                if !in_tail {
                    chosen = Some(head);
                    break;
                }
            }
            let head = chosen.ok_or_else(|| {
                ChaError::LinearizationFailure(
                    ctx.definition_name(c).unwrap_or("<anonymous>").to_string(),
                )
            })?;
            result.push(head);
            for seq in &mut sequences {
                seq.retain(|&x| x != head);
            }
        }
        Ok(result)
    }
    lin(ctx, contract)
}

/// Look a function up through a contract's linearized base list, most-derived
/// first.
pub fn resolve_function(ctx: &AstContext, contract: NodeId, name: &str) -> Option<NodeId> {
    let linearized = match &ctx.node(contract).kind {
        NodeKind::ContractDefinition { linearized, .. } => linearized.clone(),
        _ => return None,
    };
    for c in linearized {
        for member in ctx.children(c) {
            if let NodeKind::FunctionDefinition {
                name: fname,
                kind: FunctionKind::Function,
                ..
            } = &ctx.node(member).kind
            {
                if fname == name {
                    return Some(member);
                }
            }
        }
    }
    None
}

/// May-call relation over functions.
#[derive(Debug, Default)]
pub struct CallGraph {
    pub callees: IndexMap<NodeId, IndexSet<NodeId>>,
}

impl CallGraph {
    pub fn build(ctx: &AstContext, cha: &Cha) -> Self {
        let mut graph = CallGraph::default();
        for contract in cha.contracts() {
            for member in ctx.children(contract) {
                if let NodeKind::FunctionDefinition { body: Some(_), .. } = &ctx.node(member).kind {
                    let targets = collect_callees(ctx, cha, contract, member);
                    graph.callees.insert(member, targets);
                }
            }
        }
        graph
    }

    pub fn may_call(&self, caller: NodeId, callee: NodeId) -> bool {
        self.callees
            .get(&caller)
            .map(|s| s.contains(&callee))
            .unwrap_or(false)
    }
}

fn collect_callees(
    ctx: &AstContext,
    cha: &Cha,
    contract: NodeId,
    function: NodeId,
) -> IndexSet<NodeId> {
    let mut out = IndexSet::new();
    ctx.walk(function, &mut |id| {
        let NodeKind::FunctionCall { expression, .. } = &ctx.node(id).kind else {
            return;
        };
        // (name, static declaration if known, participates in dispatch)
        let static_target: Option<(String, Option<NodeId>, bool)> =
            match &ctx.node(*expression).kind {
                // Direct call: the referent is the statically named function;
                // the dynamic target is its most-derived override here.
                NodeKind::Identifier {
                    name,
                    referenced_declaration,
                } => {
                    let decl = referenced_declaration.filter(|d| {
                        matches!(ctx.node(*d).kind, NodeKind::FunctionDefinition { .. })
                    });
                    decl.map(|d| (name.clone(), Some(d), true))
                }
                // this.f() / super.f()
                NodeKind::MemberAccess {
                    expression: base,
                    member,
                    ..
                } => match &ctx.node(*base).kind {
                    NodeKind::Identifier { name, .. } if name == "this" => {
                        Some((member.clone(), None, true))
                    }
                    NodeKind::Identifier { name, .. } if name == "super" => {
                        // super skips the contract itself in the linearized
                        // list and is not subject to further dispatch.
                        let linearized = match &ctx.node(contract).kind {
                            NodeKind::ContractDefinition { linearized, .. } => linearized.clone(),
                            _ => Vec::new(),
                        };
                        let target = linearized.into_iter().skip(1).find_map(|c| {
                            ctx.children(c).into_iter().find(|&m| {
                                matches!(
                                    &ctx.node(m).kind,
                                    NodeKind::FunctionDefinition { name, .. } if name == member
                                )
                            })
                        });
                        target.map(|d| (member.clone(), Some(d), false))
                    }
                    _ => None,
                },
                _ => None,
            };

        let Some((name, static_decl, dispatched)) = static_target else {
            return;
        };
        let resolved = if dispatched {
            match resolve_function(ctx, contract, &name).or(static_decl) {
                Some(r) => r,
                None => return,
            }
        } else {
            match static_decl {
                Some(r) => r,
                None => return,
            }
        };
        if matches!(ctx.node(resolved).kind, NodeKind::FunctionDefinition { .. }) {
            out.insert(resolved);
        }
        if dispatched {
            // A virtual call may land on any override in a derived contract.
            if let NodeKind::FunctionDefinition {
                is_virtual: true, ..
            } = &ctx.node(resolved).kind
            {
                for derived in cha.transitive_children(contract) {
                    for member in ctx.children(derived) {
                        if let NodeKind::FunctionDefinition {
                            name: mname,
                            overrides: true,
                            ..
                        } = &ctx.node(member).kind
                        {
                            if *mname == name {
                                out.insert(member);
                            }
                        }
                    }
                }
            }
        }
    });
    out
}

/// The set of contracts requiring invariant instrumentation: the union of the
/// inheritance-graph connected components containing an annotated contract.
pub fn contracts_needing_instrumentation(
    cha: &Cha,
    annotated: &[NodeId],
) -> IndexSet<NodeId> {
    let mut out = IndexSet::new();
    let mut queue: Vec<NodeId> = annotated.to_vec();
    while let Some(c) = queue.pop() {
        if !out.insert(c) {
            continue;
        }
        for &p in cha.parents.get(&c).map(Vec::as_slice).unwrap_or(&[]) {
            queue.push(p);
        }
        for &d in cha.children.get(&c).map(Vec::as_slice).unwrap_or(&[]) {
            queue.push(d);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{ContractKind, Mutability, Visibility};

    /// Diamond: D -> (B, C) -> A, plus unrelated X.
    fn diamond() -> (AstContext, [NodeId; 5]) {
        let mut ctx = AstContext::new();
        let a = ctx.mk_contract("A", ContractKind::Contract, vec![]);
        let b = ctx.mk_contract("B", ContractKind::Contract, vec![]);
        let c = ctx.mk_contract("C", ContractKind::Contract, vec![]);
        let d = ctx.mk_contract("D", ContractKind::Contract, vec![]);
        let x = ctx.mk_contract("X", ContractKind::Contract, vec![]);
        for (child, bases) in [(b, vec![a]), (c, vec![a]), (d, vec![b, c])] {
            if let NodeKind::ContractDefinition { bases: slot, .. } = &mut ctx.node_mut(child).kind
            {
                *slot = bases;
            }
        }
        for id in [a, b, c, d, x] {
            let lin = linearize(&ctx, id).expect("linearization failed");
            if let NodeKind::ContractDefinition { linearized, .. } = &mut ctx.node_mut(id).kind {
                *linearized = lin;
            }
        }
        ctx.mk_source_unit("diamond.sol", vec![a, b, c, d, x]);
        (ctx, [a, b, c, d, x])
    }

    #[test]
    fn diamond_linearizes_without_duplicates() {
        let (ctx, [a, b, c, d, _]) = diamond();
        let lin = linearize(&ctx, d).expect("linearization failed");
        assert_eq!(lin, vec![d, b, c, a]);
    }

    #[test]
    fn dfs_visits_children_before_parents_exactly_once() {
        let (ctx, [a, b, c, d, x]) = diamond();
        let cha = Cha::build(&ctx);
        let mut order = Vec::new();
        cha.dfs(|id| order.push(id));
        assert_eq!(order.len(), 5);
        let pos = |id| order.iter().position(|&o| o == id).unwrap();
        assert!(pos(d) < pos(b));
        assert!(pos(d) < pos(c));
        assert!(pos(b) < pos(a));
        assert!(pos(c) < pos(a));
        assert!(order.contains(&x));
    }

    #[test]
    fn transitive_relations_cover_the_diamond() {
        let (ctx, [a, _, _, d, x]) = diamond();
        let cha = Cha::build(&ctx);
        assert_eq!(cha.transitive_parents(d).len(), 3);
        assert_eq!(cha.transitive_children(a).len(), 3);
        assert!(cha.transitive_parents(x).is_empty());
    }

    #[test]
    fn instrumentation_set_is_the_connected_component() {
        let (ctx, [a, b, c, d, x]) = diamond();
        let cha = Cha::build(&ctx);
        let set = contracts_needing_instrumentation(&cha, &[b]);
        assert!(set.contains(&a) && set.contains(&b) && set.contains(&c) && set.contains(&d));
        assert!(!set.contains(&x));
    }

    #[test]
    fn direct_call_appears_in_call_graph() {
        let mut ctx = AstContext::new();
        let helper_body = ctx.mk_block(vec![]);
        let helper = ctx.mk_function(
            "helper",
            FunctionKind::Function,
            Visibility::Internal,
            Mutability::NonPayable,
            vec![],
            vec![],
            Some(helper_body),
        );
        let callee_ref = ctx.mk_identifier("helper", Some(helper));
        let call = ctx.mk_call(callee_ref, vec![]);
        let stmt = ctx.mk_expr_stmt(call);
        let body = ctx.mk_block(vec![stmt]);
        let caller = ctx.mk_function(
            "entry",
            FunctionKind::Function,
            Visibility::Public,
            Mutability::NonPayable,
            vec![],
            vec![],
            Some(body),
        );
        let c = ctx.mk_contract("C", ContractKind::Contract, vec![helper, caller]);
        ctx.mk_source_unit("c.sol", vec![c]);
        let cha = Cha::build(&ctx);
        let graph = CallGraph::build(&ctx, &cha);
        assert!(graph.may_call(caller, helper));
        assert!(!graph.may_call(helper, caller));
    }
}
