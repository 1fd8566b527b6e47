//! Host-compiler oracle: version selection and AST acquisition.
//!
//! The target-language compiler is external. This module defines the trait
//! the pipeline programs against, a standard-JSON document loader (for
//! `--input-mode json`), and a subprocess-backed implementation that shells
//! out to the host compiler binary for `--input-mode source`.

use std::process::Command;

use miette::Diagnostic;
use semver::{Version, VersionReq};
use serde_json::Value;
use thiserror::Error;

use scribble_ast::{decode_group, AstContext, HostAstError};

/// Host-compiler versions the tool knows how to select under `auto`, newest
/// first per minor line.
const KNOWN_VERSIONS: [&str; 6] = ["0.8.29", "0.8.17", "0.7.6", "0.6.12", "0.5.17", "0.4.26"];

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("Ambiguous compiler versions detected: {detected}. Pass --compiler-version explicitly.")]
    #[diagnostic(code(scribble::compile::ambiguous_version))]
    AmbiguousVersion { detected: String },

    #[error("Cannot parse compiler version '{0}'")]
    #[diagnostic(code(scribble::compile::bad_version))]
    BadVersion(String),

    #[error("--compiler-version is mandatory when input is JSON")]
    #[diagnostic(code(scribble::compile::version_required))]
    VersionRequired,

    #[error("Host compiler rejected the input: {0}")]
    #[diagnostic(code(scribble::compile::host))]
    HostCompile(String),

    #[error("Host compiler binary '{0}' is not runnable")]
    #[diagnostic(code(scribble::compile::unavailable))]
    CompilerUnavailable(String),

    #[error(transparent)]
    #[diagnostic(code(scribble::compile::decode))]
    Decode(#[from] HostAstError),
}

/// The oracle interface: source text in, resolved AST group out.
pub trait HostCompiler {
    fn compile(
        &self,
        path: &str,
        source: &str,
        remappings: &[String],
    ) -> Result<AstContext, CompileError>;
}

/// Requested version selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelection {
    Auto,
    Exact(Version),
}

impl VersionSelection {
    pub fn parse(raw: &str) -> Result<Self, CompileError> {
        if raw == "auto" {
            return Ok(VersionSelection::Auto);
        }
        Version::parse(raw)
            .map(VersionSelection::Exact)
            .map_err(|_| CompileError::BadVersion(raw.to_string()))
    }
}

/// Read the version requirement out of a file's `pragma solidity` directive.
pub fn detect_version_req(source: &str) -> Option<VersionReq> {
    for line in source.lines() {
        let t = line.trim();
        if let Some(rest) = t.strip_prefix("pragma solidity") {
            let req = rest.trim().trim_end_matches(';').trim();
            if let Ok(parsed) = VersionReq::parse(req) {
                return Some(parsed);
            }
        }
    }
    None
}

/// Pick the host-compiler version for a run. Under `auto`, the maximal known
/// version satisfying every file's pragma wins; disagreement with no common
/// satisfier is the ambiguous-version error.
pub fn select_version(
    selection: &VersionSelection,
    files: &[(String, String)],
) -> Result<Version, CompileError> {
    if let VersionSelection::Exact(v) = selection {
        return Ok(v.clone());
    }
    let reqs: Vec<(String, VersionReq)> = files
        .iter()
        .filter_map(|(path, source)| {
            detect_version_req(source).map(|req| (path.clone(), req))
        })
        .collect();
    if reqs.is_empty() {
        // No pragma anywhere: latest known version.
        return Ok(Version::parse(KNOWN_VERSIONS[0]).expect("known versions parse"));
    }
    for candidate in KNOWN_VERSIONS {
        let v = Version::parse(candidate).expect("known versions parse");
        if reqs.iter().all(|(_, req)| req.matches(&v)) {
            return Ok(v);
        }
    }
    let detected = reqs
        .iter()
        .map(|(path, req)| format!("{path} requires {req}"))
        .collect::<Vec<_>>()
        .join(", ");
    Err(CompileError::AmbiguousVersion { detected })
}

/// Load one compilation group out of a host-compiler standard-JSON document:
/// `{"sources": {"<path>": {"ast": {...}}, …}}`, insertion order preserved.
pub fn load_standard_json(document: &Value) -> Result<AstContext, CompileError> {
    let sources = document
        .get("sources")
        .and_then(Value::as_object)
        .ok_or_else(|| {
            CompileError::HostCompile("standard-JSON document has no 'sources' object".into())
        })?;
    let mut units = Vec::with_capacity(sources.len());
    for (path, entry) in sources {
        let ast = entry.get("ast").or_else(|| entry.get("AST")).ok_or_else(|| {
            CompileError::HostCompile(format!("source '{path}' carries no AST"))
        })?;
        units.push(ast.clone());
    }
    Ok(decode_group(&units)?)
}

/// Subprocess-backed host compiler. Invokes the external binary with a
/// standard-JSON request and decodes the AST it returns.
pub struct SolcCompiler {
    pub version: Version,
    pub binary: String,
}

impl SolcCompiler {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            binary: "solc".to_string(),
        }
    }
}

impl HostCompiler for SolcCompiler {
    fn compile(
        &self,
        path: &str,
        source: &str,
        remappings: &[String],
    ) -> Result<AstContext, CompileError> {
        let request = serde_json::json!({
            "language": "Solidity",
            "sources": { path: { "content": source } },
            "settings": {
                "remappings": remappings,
                "outputSelection": { "*": { "": ["ast"] } }
            }
        });
        let output = Command::new(&self.binary)
            .arg("--standard-json")
            .arg("--pretty-json")
            .env("SOLC_VERSION", self.version.to_string())
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .and_then(|mut child| {
                use std::io::Write;
                child
                    .stdin
                    .take()
                    .expect("stdin was piped")
                    .write_all(request.to_string().as_bytes())?;
                child.wait_with_output()
            })
            .map_err(|_| CompileError::CompilerUnavailable(self.binary.clone()))?;
        if !output.status.success() {
            return Err(CompileError::HostCompile(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        let document: Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| CompileError::HostCompile(format!("unparseable compiler output: {e}")))?;
        if let Some(errors) = document.get("errors").and_then(Value::as_array) {
            let fatal: Vec<String> = errors
                .iter()
                .filter(|e| e.get("severity").and_then(Value::as_str) == Some("error"))
                .filter_map(|e| e.get("formattedMessage").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            if !fatal.is_empty() {
                return Err(CompileError::HostCompile(fatal.join("\n")));
            }
        }
        load_standard_json(&document)
    }
}
