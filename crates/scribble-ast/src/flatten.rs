//! Flattener and renamer: topologically order units, disambiguate top-level
//! name collisions, rewrite references, strip directives, and concatenate.
//!
//! Active only in `flat`/`json` output modes. First-come-first-keep renaming
//! follows unit input order; only concatenation follows import topology.

use indexmap::{IndexMap, IndexSet};
use thiserror::Error;

use crate::nodes::{AstContext, NodeId, NodeKind};
use crate::printer::print_unit;

#[derive(Debug, Error)]
pub enum FlattenError {
    /// The host compiler accepted an import cycle; that is a bug, not a user
    /// error.
    #[error("internal: import cycle through unit '{0}'")]
    ImportCycle(String),
}

#[derive(Debug)]
pub struct FlattenedOutput {
    pub text: String,
    /// Byte offset of each unit's text within `text`, topological order.
    pub unit_offsets: IndexMap<NodeId, usize>,
    /// Node → (offset, length) in the flattened text.
    pub ranges: IndexMap<NodeId, (usize, usize)>,
    /// Definitions renamed during collision disambiguation: id → new name.
    pub renamed: IndexMap<NodeId, String>,
}

/// Flatten the merged program into one printable text.
pub fn flatten(ctx: &mut AstContext, version: &str) -> Result<FlattenedOutput, FlattenError> {
    let order = topo_sort(ctx)?;
    let renamed = disambiguate_names(ctx);
    fix_references(ctx);
    strip_directives(ctx);

    let mut text = format!("pragma solidity {version};\n");
    let mut unit_offsets = IndexMap::new();
    let mut ranges = IndexMap::new();
    for unit in order {
        text.push('\n');
        let base = text.len();
        let printed = print_unit(ctx, unit);
        unit_offsets.insert(unit, base);
        for (node, (off, len)) in printed.ranges {
            ranges.insert(node, (base + off, len));
        }
        text.push_str(&printed.text);
    }
    Ok(FlattenedOutput {
        text,
        unit_offsets,
        ranges,
        renamed,
    })
}

/// Order units so every import precedes its importer. Deterministic: ready
/// units are taken in input order.
pub fn topo_sort(ctx: &AstContext) -> Result<Vec<NodeId>, FlattenError> {
    let units = ctx.source_units();
    let unit_set: IndexSet<NodeId> = units.iter().copied().collect();
    let mut deps: IndexMap<NodeId, IndexSet<NodeId>> = IndexMap::new();
    for &unit in &units {
        let mut imports = IndexSet::new();
        for member in ctx.children(unit) {
            if let NodeKind::ImportDirective {
                unit: Some(target), ..
            } = &ctx.node(member).kind
            {
                if unit_set.contains(target) && *target != unit {
                    imports.insert(*target);
                }
            }
        }
        deps.insert(unit, imports);
    }

    let mut order = Vec::with_capacity(units.len());
    let mut placed: IndexSet<NodeId> = IndexSet::new();
    while order.len() < units.len() {
        let mut progressed = false;
        for &unit in &units {
            if placed.contains(&unit) {
                continue;
            }
            if deps[&unit].iter().all(|d| placed.contains(d)) {
                order.push(unit);
                placed.insert(unit);
                progressed = true;
            }
        }
        if !progressed {
            let stuck = units
                .iter()
                .find(|u| !placed.contains(*u))
                .expect("some unit is unplaced");
            let path = match &ctx.node(*stuck).kind {
                NodeKind::SourceUnit { path, .. } => path.clone(),
                _ => String::new(),
            };
            return Err(FlattenError::ImportCycle(path));
        }
    }
    Ok(order)
}

/// Keep the first definition of each colliding top-level name; rename each
/// subsequent one to `name_i`.
fn disambiguate_names(ctx: &mut AstContext) -> IndexMap<NodeId, String> {
    let mut taken: IndexSet<String> = IndexSet::new();
    let mut collision_counter: IndexMap<String, usize> = IndexMap::new();
    let mut renamed = IndexMap::new();
    for unit in ctx.source_units() {
        for member in ctx.children(unit) {
            let Some(name) = ctx.definition_name(member).map(str::to_string) else {
                continue;
            };
            if taken.insert(name.clone()) {
                continue;
            }
            let counter = collision_counter.entry(name.clone()).or_insert(0);
            let new_name = loop {
                *counter += 1;
                let candidate = format!("{name}_{counter}");
                if taken.insert(candidate.clone()) {
                    break candidate;
                }
            };
            ctx.set_definition_name(member, &new_name);
            renamed.insert(member, new_name);
        }
    }
    renamed
}

/// Rewrite references to renamed definitions and collapse unit-qualified
/// accesses (`Unit.Name`) into direct identifiers.
///
/// Only member accesses whose base resolves directly to a source unit or an
/// import are collapsed; deeper chains keep their inner structure.
fn fix_references(ctx: &mut AstContext) {
    let top_level: IndexSet<NodeId> = ctx
        .source_units()
        .iter()
        .flat_map(|&u| ctx.children(u))
        .filter(|&m| ctx.definition_name(m).is_some())
        .collect();

    let all: Vec<NodeId> = {
        let mut out = Vec::new();
        for unit in ctx.source_units() {
            ctx.walk(unit, &mut |id| out.push(id));
        }
        out
    };

    for id in all {
        match &ctx.node(id).kind {
            NodeKind::Identifier {
                referenced_declaration: Some(referent),
                ..
            }
            | NodeKind::UserDefinedTypeName {
                referenced_declaration: Some(referent),
                ..
            } => {
                let referent = *referent;
                // Local variables, parameters, and intra-contract members are
                // untouched: only top-level referents whose textual name no
                // longer matches (collision renames, `import {a as b}`
                // aliases) are rewritten.
                if !top_level.contains(&referent) {
                    continue;
                }
                let Some(def_name) = ctx.definition_name(referent).map(str::to_string) else {
                    continue;
                };
                match &mut ctx.node_mut(id).kind {
                    NodeKind::Identifier { name, .. }
                    | NodeKind::UserDefinedTypeName { name, .. } => {
                        if *name != def_name {
                            *name = def_name;
                        }
                    }
                    _ => unreachable!("matched above"),
                }
            }
            NodeKind::MemberAccess {
                expression: base,
                referenced_declaration: Some(referent),
                ..
            } => {
                let (base, referent) = (*base, *referent);
                let base_is_unit_or_import = matches!(
                    ctx.node(base).kind,
                    NodeKind::Identifier { referenced_declaration: Some(r), .. }
                        if matches!(
                            ctx.node(r).kind,
                            NodeKind::SourceUnit { .. } | NodeKind::ImportDirective { .. }
                        )
                );
                if base_is_unit_or_import && top_level.contains(&referent) {
                    let name = ctx
                        .definition_name(referent)
                        .expect("top-level definitions are named")
                        .to_string();
                    ctx.node_mut(id).kind = NodeKind::Identifier {
                        name,
                        referenced_declaration: Some(referent),
                    };
                    ctx.node_mut(base).parent = None;
                }
            }
            _ => {}
        }
    }
}

/// Drop import and pragma directives from every unit; the flattened output
/// carries a single synthesized pragma instead.
fn strip_directives(ctx: &mut AstContext) {
    for unit in ctx.source_units() {
        let keep: Vec<NodeId> = ctx
            .children(unit)
            .into_iter()
            .filter(|&m| {
                !matches!(
                    ctx.node(m).kind,
                    NodeKind::ImportDirective { .. } | NodeKind::PragmaDirective { .. }
                )
            })
            .collect();
        if let NodeKind::SourceUnit { members, .. } = &mut ctx.node_mut(unit).kind {
            *members = keep;
        }
    }
}
