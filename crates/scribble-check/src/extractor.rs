//! Annotation extractor: locate doc-comments, scan for annotation
//! introducers, parse their bodies, and lift every span to file coordinates.
//!
//! Attachment prefers the structured-documentation child the host AST
//! carries; when absent, the raw source immediately preceding the declaration
//! is scanned for the comment block.

use regex::Regex;

use scribble_ast::{AstContext, NodeId, NodeKind, SourceRange};
use scribble_spec::ast::{Annotation, AnnotationKind, Span};
use scribble_spec::errors::ParseDiagnostic;
use scribble_spec::parser::parse_annotation_with_diagnostics;

use crate::errors::ExtractError;

/// `--filter-type` / `--filter-message` restriction.
#[derive(Debug, Default)]
pub struct AnnotationFilter {
    pub kind: Option<Regex>,
    pub message: Option<Regex>,
}

impl AnnotationFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn matches(&self, kind: AnnotationKind, label: Option<&str>) -> bool {
        if let Some(re) = &self.kind {
            if !re.is_match(kind.as_str()) {
                return false;
            }
        }
        if let Some(re) = &self.message {
            match label {
                Some(msg) if re.is_match(msg) => {}
                _ => return false,
            }
        }
        true
    }
}

/// One extracted annotation with every range in file coordinates.
#[derive(Debug)]
pub struct ExtractedAnnotation {
    /// Unique, monotonic across the run.
    pub id: usize,
    pub target: NodeId,
    pub parsed: Annotation,
    /// Raw file bytes of the annotation.
    pub original_text: String,
    pub annotation_range: SourceRange,
    pub predicate_range: SourceRange,
    /// Debug event signature, assigned by the instrumenter.
    pub debug_event_signature: Option<String>,
}

impl ExtractedAnnotation {
    pub fn kind(&self) -> AnnotationKind {
        self.parsed.kind
    }

    pub fn label(&self) -> Option<&str> {
        self.parsed.label.as_deref()
    }

    pub fn is_property(&self) -> bool {
        self.parsed.kind.is_property()
    }
}

/// Extract annotations for every contract, function, and state variable of
/// every unit, source order. `sources` is indexed like `ctx.files`.
pub fn extract_annotations(
    ctx: &AstContext,
    sources: &[String],
    filter: &AnnotationFilter,
) -> Result<(Vec<ExtractedAnnotation>, Vec<ParseDiagnostic>), ExtractError> {
    let mut out = Vec::new();
    let mut warnings = Vec::new();
    let mut next_id = 0usize;

    for unit in ctx.source_units() {
        let file = unit_file_index(ctx, unit);
        let source = sources.get(file).map(String::as_str).unwrap_or("");
        let path = ctx
            .files
            .get(file)
            .map(String::as_str)
            .unwrap_or("<unknown>");

        for member in ctx.children(unit) {
            match &ctx.node(member).kind {
                NodeKind::ContractDefinition { members, .. } => {
                    let members = members.clone();
                    extract_for_target(
                        ctx, member, source, path, file, filter, &mut next_id, &mut out,
                        &mut warnings,
                    )?;
                    for m in members {
                        match &ctx.node(m).kind {
                            NodeKind::FunctionDefinition { .. }
                            | NodeKind::VariableDeclaration { .. } => {
                                extract_for_target(
                                    ctx, m, source, path, file, filter, &mut next_id, &mut out,
                                    &mut warnings,
                                )?;
                            }
                            _ => {}
                        }
                    }
                }
                // Free-standing functions may not carry annotations at all.
                NodeKind::FunctionDefinition { .. } => {
                    if let Some((cleaned, table)) = doc_region(ctx, member, source) {
                        if let Some(pos) = find_introducer(&cleaned, 0) {
                            let at = lift(&table, pos.0);
                            return Err(ExtractError::free_function(
                                Span::new(at, at + pos.1.len() + 1),
                                source,
                                path,
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok((out, warnings))
}

#[allow(clippy::too_many_arguments)]
fn extract_for_target(
    ctx: &AstContext,
    target: NodeId,
    source: &str,
    path: &str,
    file: usize,
    filter: &AnnotationFilter,
    next_id: &mut usize,
    out: &mut Vec<ExtractedAnnotation>,
    warnings: &mut Vec<ParseDiagnostic>,
) -> Result<(), ExtractError> {
    let Some((cleaned, table)) = doc_region(ctx, target, source) else {
        return Ok(());
    };

    let mut search_from = 0;
    while let Some((pos, _kw)) = find_introducer(&cleaned, search_from) {
        let body_end = annotation_end(&cleaned, pos);
        let slice = &cleaned[pos..body_end];
        search_from = body_end;

        let (mut parsed, mut diags) =
            parse_annotation_with_diagnostics(slice, path).map_err(|e| {
                // Re-pin the parser-local span into file coordinates.
                let lifted = match e.span() {
                    Some(s) => {
                        let file_span =
                            Span::new(lift(&table, pos + s.start), lift_end(&table, pos + s.end));
                        let msg = e.to_string();
                        let msg = msg.strip_prefix("Syntax error: ").unwrap_or(&msg).to_string();
                        scribble_spec::errors::ParseError::syntax(msg, file_span, source, path)
                    }
                    None => e.with_source_context(source, path),
                };
                ExtractError::Syntax(lifted)
            })?;

        // Lift every parser-local span through the comment offset table.
        parsed.map_spans(&|s: Span| {
            Span::new(lift(&table, pos + s.start), lift_end(&table, pos + s.end))
        });
        for d in &mut diags {
            if let Some(s) = d.span {
                d.span = Some(Span::new(
                    lift(&table, pos + s.start),
                    lift_end(&table, pos + s.end),
                ));
            }
        }
        warnings.append(&mut diags);

        check_target(ctx, target, &parsed, source, path)?;

        if !filter.matches(parsed.kind, parsed.label.as_deref()) {
            continue;
        }

        let annotation_range = SourceRange::new(
            parsed.span.start,
            parsed.span.end - parsed.span.start,
            file,
        );
        let predicate_range = SourceRange::new(
            parsed.predicate_span.start,
            parsed.predicate_span.end - parsed.predicate_span.start,
            file,
        );
        let original_text = source
            .get(parsed.span.start..parsed.span.end)
            .unwrap_or(slice)
            .to_string();

        out.push(ExtractedAnnotation {
            id: *next_id,
            target,
            parsed,
            original_text,
            annotation_range,
            predicate_range,
            debug_event_signature: None,
        });
        *next_id += 1;
    }
    Ok(())
}

fn check_target(
    ctx: &AstContext,
    target: NodeId,
    parsed: &Annotation,
    source: &str,
    path: &str,
) -> Result<(), ExtractError> {
    let (ok, desc) = match &ctx.node(target).kind {
        NodeKind::ContractDefinition { .. } => (
            matches!(
                parsed.kind,
                AnnotationKind::Invariant | AnnotationKind::Define
            ),
            "a contract",
        ),
        NodeKind::FunctionDefinition { .. } => {
            if ctx.enclosing_contract(target).is_none() {
                return Err(ExtractError::free_function(parsed.span, source, path));
            }
            (parsed.kind == AnnotationKind::IfSucceeds, "a function")
        }
        NodeKind::VariableDeclaration { .. } => (false, "a state variable"),
        _ => (false, "this node"),
    };
    if ok {
        Ok(())
    } else {
        Err(ExtractError::target_mismatch(
            parsed.kind.as_str(),
            desc,
            parsed.span,
            source,
            path,
        ))
    }
}

// ---------------------------------------------------------------
// Doc-comment location and cleaning
// ---------------------------------------------------------------

/// The cleaned doc-comment text of a node, with a byte-for-byte table mapping
/// cleaned offsets back to file offsets.
fn doc_region(ctx: &AstContext, node: NodeId, source: &str) -> Option<(String, Vec<usize>)> {
    // Prefer the structured attachment.
    if let Some(doc) = documentation_of(ctx, node) {
        if let Some(src) = ctx.node(doc).src {
            let slice = source.get(src.offset..src.end())?;
            return Some(clean_comment(slice, src.offset));
        }
        // Synthetic documentation (no range): parser-local coordinates.
        if let NodeKind::StructuredDocumentation { text } = &ctx.node(doc).kind {
            let table = (0..text.len() + 1).collect();
            return Some((text.clone(), table));
        }
    }
    // Fallback: scan the raw source immediately preceding the declaration.
    let decl_src = ctx.node(node).src?;
    preceding_comment(source, decl_src.offset)
}

fn documentation_of(ctx: &AstContext, node: NodeId) -> Option<NodeId> {
    match &ctx.node(node).kind {
        NodeKind::ContractDefinition { documentation, .. }
        | NodeKind::FunctionDefinition { documentation, .. }
        | NodeKind::VariableDeclaration { documentation, .. } => *documentation,
        _ => None,
    }
}

/// Locate the comment block that ends right above `decl_start`.
fn preceding_comment(source: &str, decl_start: usize) -> Option<(String, Vec<usize>)> {
    let head = source.get(..decl_start)?;
    let trimmed = head.trim_end();
    if trimmed.ends_with("*/") {
        let open = trimmed.rfind("/*")?;
        return Some(clean_comment(&source[open..trimmed.len()], open));
    }
    // Consecutive `//` lines directly above the declaration.
    let mut start = None;
    let mut offset = trimmed.len();
    for line in trimmed.lines().rev() {
        let line_start = trimmed[..offset].rfind(line)?;
        if line.trim_start().starts_with("//") {
            start = Some(line_start + (line.len() - line.trim_start().len()));
            offset = line_start;
            if offset == 0 {
                break;
            }
        } else {
            break;
        }
    }
    let start = start?;
    Some(clean_comment(&source[start..trimmed.len()], start))
}

/// Strip comment decorations, producing cleaned text plus the offset table.
/// `base` is the file offset of `raw`.
fn clean_comment(raw: &str, base: usize) -> (String, Vec<usize>) {
    let mut cleaned = String::new();
    let mut table = Vec::new();
    let mut line_start = 0usize;
    for line in raw.split_inclusive('\n') {
        let content = line.strip_suffix('\n').unwrap_or(line);
        let mut skip = content.len() - content.trim_start().len();
        let t = content.trim_start();
        for marker in ["/**", "///", "//", "/*", "*/"] {
            if let Some(rest) = t.strip_prefix(marker) {
                skip += marker.len();
                if rest.starts_with(' ') {
                    skip += 1;
                }
                break;
            }
        }
        // Block-comment continuation lines: "  * text".
        if t.starts_with('*') && !t.starts_with("*/") && !content.trim_start().starts_with("/*") {
            let star = content.len() - t.len();
            skip = star + 1;
            if t[1..].starts_with(' ') {
                skip += 1;
            }
        }
        let body = &content[skip.min(content.len())..];
        let body = body.strip_suffix("*/").unwrap_or(body);
        for (i, ch) in body.char_indices() {
            cleaned.push(ch);
            // One table entry per cleaned byte keeps lifts exact for
            // multi-byte characters.
            for b in 0..ch.len_utf8() {
                table.push(base + line_start + skip + i + b);
            }
        }
        cleaned.push('\n');
        table.push(base + line_start + content.len());
        line_start += line.len();
    }
    // End-exclusive lift support.
    table.push(base + raw.len());
    (cleaned, table)
}

fn lift(table: &[usize], cleaned_off: usize) -> usize {
    table
        .get(cleaned_off)
        .copied()
        .unwrap_or_else(|| table.last().copied().unwrap_or(0))
}

/// Lift an end-exclusive offset: the file position one past the previous byte.
fn lift_end(table: &[usize], cleaned_off: usize) -> usize {
    if cleaned_off == 0 {
        return lift(table, 0);
    }
    lift(table, cleaned_off - 1) + 1
}

// ---------------------------------------------------------------
// Introducer scanning
// ---------------------------------------------------------------

const INTRODUCERS: [&str; 3] = ["if_succeeds", "invariant", "define"];

fn find_introducer(text: &str, from: usize) -> Option<(usize, &'static str)> {
    let mut best: Option<(usize, &'static str)> = None;
    for kw in INTRODUCERS {
        let needle = format!("#{kw}");
        let mut at = from;
        while let Some(rel) = text[at..].find(&needle) {
            let pos = at + rel;
            let after = pos + needle.len();
            let boundary = text[after..]
                .chars()
                .next()
                .map(|c| !c.is_alphanumeric() && c != '_')
                .unwrap_or(true);
            if boundary {
                if best.map(|(b, _)| pos < b).unwrap_or(true) {
                    best = Some((pos, kw));
                }
                break;
            }
            at = after;
        }
    }
    best
}

/// The end of an annotation body: its terminating semicolon (string-aware),
/// bounded by the next introducer or a blank comment line.
fn annotation_end(text: &str, start: usize) -> usize {
    let hard_stop = {
        let next = find_introducer(text, start + 1).map(|(p, _)| p);
        let blank = text[start..]
            .find("\n\n")
            .map(|p| start + p)
            .or_else(|| {
                // A line holding only whitespace also ends the annotation.
                let mut off = start;
                for line in text[start..].split_inclusive('\n') {
                    let stripped = line.trim();
                    if stripped.is_empty() && off > start {
                        return Some(off);
                    }
                    off += line.len();
                }
                None
            });
        match (next, blank) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => text.len(),
        }
    };
    let mut in_string = false;
    let bytes = text.as_bytes();
    let mut i = start;
    while i < hard_stop {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'\\' if in_string => i += 1,
            b';' if !in_string => return i + 1,
            _ => {}
        }
        i += 1;
    }
    hard_stop
}

fn unit_file_index(ctx: &AstContext, unit: NodeId) -> usize {
    if let Some(src) = ctx.node(unit).src {
        return src.file;
    }
    if let NodeKind::SourceUnit { path, .. } = &ctx.node(unit).kind {
        if let Some(idx) = ctx.files.iter().position(|f| f == path) {
            return idx;
        }
    }
    0
}
