//! Metadata emission: the property map and the bidirectional source map
//! between instrumented output and original input.

use indexmap::IndexMap;
use serde::Serialize;

use scribble_ast::{AstContext, NodeId, NodeKind, PrintedUnit};

use crate::context::InstrumentationResult;

/// Reserved `general_instrumentation` key for nodes not attributable to a
/// single annotation.
pub const UNATTRIBUTED: usize = usize::MAX;

fn range_str(offset: usize, length: usize, file: usize) -> String {
    format!("{offset}:{length}:{file}")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyRecord {
    pub id: usize,
    pub contract: String,
    pub target: String,
    pub target_name: String,
    pub property_source: String,
    pub annotation_source: String,
    pub instrumentation_ranges: Vec<String>,
    pub check_ranges: Vec<String>,
    pub debug_event_signature: Option<String>,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentationMetadata {
    pub property_map: Vec<PropertyRecord>,
    pub instr_to_original_map: Vec<(String, String)>,
    pub other_instrumentation: Vec<String>,
    pub original_source_list: Vec<String>,
    pub instr_source_list: Vec<String>,
}

/// Build the metadata record from the instrumented program and its printed
/// units (input order defines instrumented file indices).
pub fn build_metadata(
    ctx: &AstContext,
    result: &InstrumentationResult,
    printed: &[(NodeId, PrintedUnit)],
    arm: bool,
) -> InstrumentationMetadata {
    // node → (instr file index, offset, length)
    let mut instr_ranges: IndexMap<NodeId, (usize, usize, usize)> = IndexMap::new();
    for (file_idx, (_, unit)) in printed.iter().enumerate() {
        for (&node, &(off, len)) in &unit.ranges {
            instr_ranges.entry(node).or_insert((file_idx, off, len));
        }
    }
    let instr_range_of = |node: NodeId| -> Option<String> {
        instr_ranges
            .get(&node)
            .map(|&(f, o, l)| range_str(o, l, f))
    };
    // A node's instrumentation footprint: itself plus every descendant that
    // made it into the printed output.
    let ranges_of = |nodes: &[NodeId]| -> Vec<String> {
        nodes.iter().filter_map(|&n| instr_range_of(n)).collect()
    };

    let mut property_map = Vec::new();
    for annot in &result.annotations {
        if !annot.is_property() {
            continue;
        }
        let contract = ctx
            .enclosing_contract(annot.target)
            .and_then(|c| ctx.definition_name(c))
            .unwrap_or_default()
            .to_string();
        let target = match &ctx.node(annot.target).kind {
            NodeKind::FunctionDefinition { .. } => "function",
            NodeKind::VariableDeclaration { .. } => "variable",
            _ => "contract",
        };
        let target_name = ctx
            .definition_name(annot.target)
            .unwrap_or_default()
            .to_string();
        let instrumentation_ranges = result
            .evaluation_statements
            .get(&annot.id)
            .map(|stmts| ranges_of(stmts))
            .unwrap_or_default();
        let check_ranges = result
            .instrumented_check
            .get(&annot.id)
            .and_then(|&check| instr_range_of(check))
            .into_iter()
            .collect();
        property_map.push(PropertyRecord {
            id: annot.id,
            contract,
            target: target.to_string(),
            target_name,
            property_source: range_str(
                annot.predicate_range.offset,
                annot.predicate_range.length,
                annot.predicate_range.file,
            ),
            annotation_source: range_str(
                annot.annotation_range.offset,
                annot.annotation_range.length,
                annot.annotation_range.file,
            ),
            instrumentation_ranges,
            check_ranges,
            debug_event_signature: annot.debug_event_signature.clone(),
            message: annot.parsed.label.clone().unwrap_or_default(),
        });
    }

    // Copied original nodes map to their surviving source ranges; generated
    // checks map back to their annotation spans.
    let mut instr_to_original_map = Vec::new();
    for (&node, &(f, o, l)) in &instr_ranges {
        if let Some(src) = ctx.node(node).src {
            instr_to_original_map.push((
                range_str(o, l, f),
                range_str(src.offset, src.length, src.file),
            ));
        }
    }
    for annot in &result.annotations {
        if let Some(&check) = result.instrumented_check.get(&annot.id) {
            if let Some(instr) = instr_range_of(check) {
                instr_to_original_map.push((
                    instr,
                    range_str(
                        annot.annotation_range.offset,
                        annot.annotation_range.length,
                        annot.annotation_range.file,
                    ),
                ));
            }
        }
    }

    let other_instrumentation = result
        .general_instrumentation
        .get(&UNATTRIBUTED)
        .map(|nodes| ranges_of(nodes))
        .unwrap_or_default();

    let original_source_list = ctx
        .files
        .iter()
        .map(|f| {
            if arm {
                format!("{f}.original")
            } else {
                f.clone()
            }
        })
        .collect();
    let instr_source_list = printed
        .iter()
        .map(|(unit, _)| {
            let path = match &ctx.node(*unit).kind {
                NodeKind::SourceUnit { path, .. } => path.clone(),
                _ => String::new(),
            };
            format!("{path}.instrumented")
        })
        .collect();

    InstrumentationMetadata {
        property_map,
        instr_to_original_map,
        other_instrumentation,
        original_source_list,
        instr_source_list,
    }
}
