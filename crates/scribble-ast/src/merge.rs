//! AST merger: unify independently-compiled unit groups into one id space.
//!
//! Node ids are only unique within a single compilation. Cross-file analyses
//! and flattened output need one coherent arena, so every group is deep-cloned
//! into a fresh context. When two groups contain a unit with the same absolute
//! path, the first copy wins and references into the second are rewritten to
//! point at the first.

use indexmap::IndexMap;
use thiserror::Error;

use crate::nodes::{AstContext, NodeId, NodeKind};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Conflicting definitions of unit '{path}': tree shape differs between compilations")]
    ConflictingUnits { path: String },
    #[error("Merged tree failed sanity check: {0}")]
    SanityFailed(String),
}

const UNMAPPED: NodeId = usize::MAX;

/// Merge unit groups, input order. Returns the merged context; unit roots are
/// discoverable via [`AstContext::source_units`] (first-copy order).
pub fn merge(groups: &[AstContext]) -> Result<AstContext, MergeError> {
    let mut merged = AstContext::new();
    let mut seen_paths: IndexMap<String, NodeId> = IndexMap::new();

    for group in groups {
        let mut id_map: Vec<NodeId> = vec![UNMAPPED; group.len()];
        let file_map: Vec<usize> = group
            .files
            .iter()
            .map(|p| merged.register_file(p))
            .collect();
        let mut cloned_old: Vec<NodeId> = Vec::new();
        let mut cloned_roots: Vec<NodeId> = Vec::new();

        for unit in group.source_units() {
            let path = match &group.node(unit).kind {
                NodeKind::SourceUnit { path, .. } => path.clone(),
                _ => unreachable!("source_units returns units only"),
            };
            match seen_paths.get(&path) {
                Some(&existing) => {
                    pair_subtrees(group, unit, &merged, existing, &mut id_map)
                        .map_err(|_| MergeError::ConflictingUnits { path: path.clone() })?;
                }
                None => {
                    let new_root = clone_subtree(
                        group,
                        unit,
                        &mut merged,
                        &mut id_map,
                        &file_map,
                        &mut cloned_old,
                    );
                    seen_paths.insert(path, new_root);
                    cloned_roots.push(new_root);
                }
            }
        }

        // Rewrite child and referent edges of the freshly cloned nodes.
        // Duplicate-unit nodes already live in the merged arena with correct
        // edges and are only entries in the map, never remap targets.
        let mut dangling: Option<NodeId> = None;
        for &old in &cloned_old {
            let new = id_map[old];
            let mut kind = merged.node(new).kind.clone();
            remap_edges(&mut kind, |id| match id_map.get(id).copied() {
                Some(mapped) if mapped != UNMAPPED => mapped,
                _ => {
                    dangling.get_or_insert(id);
                    id
                }
            });
            merged.node_mut(new).kind = kind;
        }
        if let Some(id) = dangling {
            return Err(MergeError::SanityFailed(format!(
                "reference to node {id} escapes its compilation group"
            )));
        }
        for &root in &cloned_roots {
            merged.node_mut(root).parent = None;
            fix_parents(&mut merged, root);
        }
    }

    for unit in merged.source_units() {
        sanity_check(&merged, unit)?;
    }
    Ok(merged)
}

fn clone_subtree(
    group: &AstContext,
    root: NodeId,
    merged: &mut AstContext,
    id_map: &mut [NodeId],
    file_map: &[usize],
    cloned_old: &mut Vec<NodeId>,
) -> NodeId {
    let node = group.node(root);
    let src = node.src.map(|mut s| {
        s.file = file_map[s.file];
        s
    });
    // Child ids stay group-local here; the caller remaps them afterwards.
    let new_id = merged.push_raw(node.kind.clone(), src);
    id_map[root] = new_id;
    cloned_old.push(root);
    for child in group.children(root) {
        clone_subtree(group, child, merged, id_map, file_map, cloned_old);
    }
    new_id
}

fn pair_subtrees(
    group: &AstContext,
    old: NodeId,
    merged: &AstContext,
    existing: NodeId,
    id_map: &mut [NodeId],
) -> Result<(), ()> {
    if std::mem::discriminant(&group.node(old).kind)
        != std::mem::discriminant(&merged.node(existing).kind)
    {
        return Err(());
    }
    id_map[old] = existing;
    let old_children = group.children(old);
    let new_children = merged.children(existing);
    if old_children.len() != new_children.len() {
        return Err(());
    }
    for (o, n) in old_children.iter().zip(new_children.iter()) {
        pair_subtrees(group, *o, merged, *n, id_map)?;
    }
    Ok(())
}

fn fix_parents(ctx: &mut AstContext, root: NodeId) {
    for child in ctx.children(root) {
        ctx.node_mut(child).parent = Some(root);
        fix_parents(ctx, child);
    }
}

/// Rewrite every `NodeId` edge (children and referents) held inside a kind.
pub(crate) fn remap_edges(kind: &mut NodeKind, mut f: impl FnMut(NodeId) -> NodeId) {
    fn each(ids: &mut Vec<NodeId>, f: &mut impl FnMut(NodeId) -> NodeId) {
        for id in ids {
            *id = f(*id);
        }
    }
    fn opt(id: &mut Option<NodeId>, f: &mut impl FnMut(NodeId) -> NodeId) {
        if let Some(v) = id {
            *v = f(*v);
        }
    }
    fn one(id: &mut NodeId, f: &mut impl FnMut(NodeId) -> NodeId) {
        *id = f(*id);
    }

    let f = &mut f;
    match kind {
        NodeKind::SourceUnit { members, .. } => each(members, f),
        NodeKind::PragmaDirective { .. } => {}
        NodeKind::ImportDirective { unit, .. } => opt(unit, f),
        NodeKind::ContractDefinition {
            bases,
            linearized,
            members,
            documentation,
            ..
        } => {
            each(bases, f);
            each(linearized, f);
            each(members, f);
            opt(documentation, f);
        }
        NodeKind::StructuredDocumentation { .. } => {}
        NodeKind::FunctionDefinition {
            params,
            returns,
            body,
            documentation,
            ..
        } => {
            each(params, f);
            each(returns, f);
            opt(body, f);
            opt(documentation, f);
        }
        NodeKind::VariableDeclaration {
            type_name,
            value,
            documentation,
            ..
        } => {
            opt(type_name, f);
            opt(value, f);
            opt(documentation, f);
        }
        NodeKind::EventDefinition { params, .. } => each(params, f),
        NodeKind::StructDefinition { members, .. } => each(members, f),
        NodeKind::EnumDefinition { .. } => {}
        NodeKind::ElementaryTypeName { .. } => {}
        NodeKind::UserDefinedTypeName {
            referenced_declaration,
            ..
        } => opt(referenced_declaration, f),
        NodeKind::ArrayTypeName { base, length } => {
            one(base, f);
            opt(length, f);
        }
        NodeKind::MappingTypeName { key, value } => {
            one(key, f);
            one(value, f);
        }
        NodeKind::Block { statements } => each(statements, f),
        NodeKind::ExpressionStatement { expression } => one(expression, f),
        NodeKind::VariableDeclarationStatement {
            declarations,
            initial_value,
        } => {
            each(declarations, f);
            opt(initial_value, f);
        }
        NodeKind::IfStatement {
            condition,
            true_body,
            false_body,
        } => {
            one(condition, f);
            one(true_body, f);
            opt(false_body, f);
        }
        NodeKind::ForStatement {
            init,
            condition,
            loop_expression,
            body,
        } => {
            opt(init, f);
            opt(condition, f);
            opt(loop_expression, f);
            one(body, f);
        }
        NodeKind::Return { expression } => opt(expression, f),
        NodeKind::EmitStatement { event_call } => one(event_call, f),
        NodeKind::InlineAssembly { .. } => {}
        NodeKind::Identifier {
            referenced_declaration,
            ..
        } => opt(referenced_declaration, f),
        NodeKind::MemberAccess {
            expression,
            referenced_declaration,
            ..
        } => {
            one(expression, f);
            opt(referenced_declaration, f);
        }
        NodeKind::IndexAccess { base, index } => {
            one(base, f);
            one(index, f);
        }
        NodeKind::FunctionCall {
            expression,
            arguments,
        } => {
            one(expression, f);
            each(arguments, f);
        }
        NodeKind::BinaryOperation { left, right, .. } => {
            one(left, f);
            one(right, f);
        }
        NodeKind::UnaryOperation { sub, .. } => one(sub, f),
        NodeKind::Conditional {
            condition,
            true_expression,
            false_expression,
        } => {
            one(condition, f);
            one(true_expression, f);
            one(false_expression, f);
        }
        NodeKind::Assignment { left, right, .. } => {
            one(left, f);
            one(right, f);
        }
        NodeKind::TupleExpression { components } => each(components, f),
        NodeKind::Literal { .. } => {}
        NodeKind::ElementaryTypeNameExpression { .. } => {}
    }
}

/// Re-run the host sanity predicate on a merged unit: parent links are
/// consistent and every referent edge closes inside the arena.
pub fn sanity_check(ctx: &AstContext, unit: NodeId) -> Result<(), MergeError> {
    let mut result = Ok(());
    ctx.walk(unit, &mut |id| {
        if result.is_err() {
            return;
        }
        for child in ctx.children(id) {
            if child >= ctx.len() {
                result = Err(MergeError::SanityFailed(format!(
                    "node {id} has out-of-range child {child}"
                )));
                return;
            }
            if ctx.node(child).parent != Some(id) {
                result = Err(MergeError::SanityFailed(format!(
                    "node {child} has inconsistent parent (expected {id})"
                )));
                return;
            }
        }
        if let Some(referent) = ctx.referenced_declaration(id) {
            if referent >= ctx.len() {
                result = Err(MergeError::SanityFailed(format!(
                    "node {id} references dangling declaration {referent}"
                )));
            }
        }
        if let Some(src) = ctx.node(id).src {
            if src.file >= ctx.files.len() {
                result = Err(MergeError::SanityFailed(format!(
                    "node {id} names unknown file index {}",
                    src.file
                )));
            }
        }
    });
    result
}
