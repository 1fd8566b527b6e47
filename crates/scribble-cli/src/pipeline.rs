//! The compile→merge→extract→check→instrument→print pipeline.
//!
//! Single-threaded and synchronous; the only blocking operations are file
//! reads and the external host-compiler invocation at the boundary. A fatal
//! error aborts before any output is committed.

use std::fs;
use std::io::Read;
use std::path::PathBuf;

use miette::Diagnostic;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info};

use scribble_ast::{
    flatten, merge, print_unit, AstContext, FlattenError, MergeError, NodeId, NodeKind,
    PrintedUnit,
};
use scribble_check::{
    check_annotations, extract_annotations, AnnotationFilter, ExtractError, SemanticMap, TypeEnv,
    TypeError,
};
use scribble_instr::{
    build_metadata, instrument, AssertionMode, InstrError, InstrumentationOptions, OutputMode,
};

use crate::arming::arm_files;
use crate::compiler::{
    load_standard_json, select_version, CompileError, HostCompiler, SolcCompiler, VersionSelection,
};

pub(crate) const UTILS_FILE_NAME: &str = "__scribble_ReentrancyUtils.sol";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InputMode {
    Source,
    Json,
}

pub(crate) struct RunConfig {
    pub inputs: Vec<String>,
    pub input_mode: InputMode,
    pub version: VersionSelection,
    pub remappings: Vec<String>,
    pub filter: AnnotationFilter,
    pub output_mode: OutputMode,
    pub output: String,
    pub utils_dir: String,
    pub assertion_mode: AssertionMode,
    pub no_assert: bool,
    pub debug_events: bool,
    pub metadata_file: Option<PathBuf>,
    pub arm: bool,
}

#[derive(Debug, Error, Diagnostic)]
pub(crate) enum CliError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Type(#[from] TypeError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Flatten(#[from] FlattenError),

    #[error(transparent)]
    Instr(#[from] InstrError),

    #[error("Cannot read '{path}'")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write '{path}'")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid regular expression for {flag}: {message}")]
    BadRegex { flag: String, message: String },
}

pub(crate) fn run(cfg: RunConfig) -> Result<(), CliError> {
    let inputs = read_inputs(&cfg.inputs)?;

    // Acquire one AST group per compilation via the host-compiler oracle.
    let groups = match cfg.input_mode {
        InputMode::Json => {
            if cfg.version == VersionSelection::Auto {
                return Err(CompileError::VersionRequired.into());
            }
            let mut groups = Vec::with_capacity(inputs.len());
            for (path, content) in &inputs {
                let document: serde_json::Value = serde_json::from_str(content).map_err(|e| {
                    CompileError::HostCompile(format!("'{path}' is not valid JSON: {e}"))
                })?;
                groups.push(load_standard_json(&document)?);
            }
            groups
        }
        InputMode::Source => {
            let version = select_version(&cfg.version, &inputs)?;
            info!(version = %version, "selected host compiler version");
            let compiler = SolcCompiler::new(version);
            let mut groups = Vec::with_capacity(inputs.len());
            for (path, content) in &inputs {
                debug!(path, "compiling");
                groups.push(compiler.compile(path, content, &cfg.remappings)?);
            }
            groups
        }
    };

    let mut merged = merge(&groups)?;
    info!(units = merged.source_units().len(), "merged compilation groups");

    // Raw sources aligned to the merged file table; units born from JSON
    // documents read their text from disk when available.
    let sources: Vec<String> = merged
        .files
        .iter()
        .map(|f| {
            inputs
                .iter()
                .find(|(p, _)| p == f)
                .map(|(_, c)| c.clone())
                .or_else(|| fs::read_to_string(f).ok())
                .unwrap_or_default()
        })
        .collect();

    let (annotations, warnings) = extract_annotations(&merged, &sources, &cfg.filter)?;
    for w in &warnings {
        tracing::warn!(code = %w.code, "{}", w.message);
    }
    info!(count = annotations.len(), "extracted annotations");

    let mut env = TypeEnv::default();
    let mut sem = SemanticMap::default();
    check_annotations(&merged, &annotations, &mut env, &mut sem, &sources)?;

    let utils_path = if cfg.utils_dir.is_empty() || cfg.utils_dir == "." {
        UTILS_FILE_NAME.to_string()
    } else {
        format!(
            "{}/{UTILS_FILE_NAME}",
            cfg.utils_dir.trim_end_matches('/')
        )
    };
    let options = InstrumentationOptions {
        assertion_mode: cfg.assertion_mode,
        no_assert: cfg.no_assert,
        debug_events: cfg.debug_events,
        utils_path: utils_path.clone(),
        output_mode: cfg.output_mode,
    };
    let result = instrument(&mut merged, &env, annotations, options)?;
    info!(
        contracts = result.instrumented_contracts.len(),
        "instrumented contracts"
    );

    // Print and emit.
    let version_line = match &cfg.version {
        VersionSelection::Exact(v) => format!("{v}"),
        VersionSelection::Auto => select_version(&cfg.version, &inputs)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "^0.8.0".to_string()),
    };

    match cfg.output_mode {
        OutputMode::Flat => {
            let flat = flatten(&mut merged, &version_line)?;
            // The flattened text is the single instrumented file; its running
            // offsets already incorporate every unit.
            let anchor = merged.source_units().first().copied().unwrap_or(0);
            let printed = vec![(
                anchor,
                PrintedUnit {
                    text: flat.text.clone(),
                    ranges: flat.ranges.clone(),
                },
            )];
            let mut metadata = build_metadata(&merged, &result, &printed, cfg.arm);
            metadata.instr_source_list = vec![output_name(&cfg.output)];
            write_output(&cfg.output, &flat.text)?;
            write_metadata(&cfg, &metadata)?;
        }
        OutputMode::Files => {
            let printed = print_all(&merged);
            let metadata = build_metadata(&merged, &result, &printed, cfg.arm);
            let mut armed_outputs = Vec::new();
            for (unit, p) in &printed {
                let path = unit_path(&merged, *unit);
                if *unit == result.utils_unit {
                    fs::write(&path, &p.text).map_err(|e| CliError::Write {
                        path: path.clone(),
                        source: e,
                    })?;
                } else {
                    let target = format!("{path}.instrumented");
                    fs::write(&target, &p.text).map_err(|e| CliError::Write {
                        path: target,
                        source: e,
                    })?;
                    armed_outputs.push((path, p.text.clone()));
                }
            }
            if cfg.arm {
                arm_files(&armed_outputs).map_err(|e| CliError::Write {
                    path: "<arm>".to_string(),
                    source: e,
                })?;
            }
            write_metadata(&cfg, &metadata)?;
        }
        OutputMode::Json => {
            let printed = print_all(&merged);
            let metadata = build_metadata(&merged, &result, &printed, cfg.arm);
            let mut sources_obj = serde_json::Map::new();
            for (unit, p) in &printed {
                sources_obj.insert(
                    unit_path(&merged, *unit),
                    serde_json::json!({ "source": p.text }),
                );
            }
            let bundle = serde_json::json!({
                "sources": sources_obj,
                "instrumentationMetadata": metadata,
            });
            let text = serde_json::to_string_pretty(&bundle)
                .expect("metadata serializes");
            write_output(&cfg.output, &text)?;
        }
    }
    Ok(())
}

fn print_all(ctx: &AstContext) -> Vec<(NodeId, PrintedUnit)> {
    ctx.source_units()
        .into_iter()
        .map(|u| (u, print_unit(ctx, u)))
        .collect()
}

fn unit_path(ctx: &AstContext, unit: NodeId) -> String {
    match &ctx.node(unit).kind {
        NodeKind::SourceUnit { path, .. } => path.clone(),
        _ => String::new(),
    }
}

fn output_name(output: &str) -> String {
    if output == "--" {
        "<stdout>".to_string()
    } else {
        output.to_string()
    }
}

fn read_inputs(paths: &[String]) -> Result<Vec<(String, String)>, CliError> {
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        if path == "--" {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .map_err(|e| CliError::Read {
                    path: "<stdin>".to_string(),
                    source: e,
                })?;
            out.push(("<stdin>".to_string(), content));
        } else {
            let content = fs::read_to_string(path).map_err(|e| CliError::Read {
                path: path.clone(),
                source: e,
            })?;
            out.push((path.clone(), content));
        }
    }
    Ok(out)
}

fn write_output(target: &str, text: &str) -> Result<(), CliError> {
    if target == "--" {
        print!("{text}");
        Ok(())
    } else {
        fs::write(target, text).map_err(|e| CliError::Write {
            path: target.to_string(),
            source: e,
        })
    }
}

fn write_metadata(
    cfg: &RunConfig,
    metadata: &scribble_instr::InstrumentationMetadata,
) -> Result<(), CliError> {
    let Some(path) = &cfg.metadata_file else {
        return Ok(());
    };
    let text = serde_json::to_string_pretty(metadata).expect("metadata serializes");
    fs::write(path, text).map_err(|e| CliError::Write {
        path: path.display().to_string(),
        source: e,
    })
}

pub(crate) fn build_filter(
    filter_type: Option<&str>,
    filter_message: Option<&str>,
) -> Result<AnnotationFilter, CliError> {
    let compile = |flag: &str, raw: Option<&str>| -> Result<Option<Regex>, CliError> {
        raw.map(|r| {
            Regex::new(r).map_err(|e| CliError::BadRegex {
                flag: flag.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
    };
    Ok(AnnotationFilter {
        kind: compile("--filter-type", filter_type)?,
        message: compile("--filter-message", filter_message)?,
    })
}
