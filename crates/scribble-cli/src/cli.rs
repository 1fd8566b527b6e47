//! CLI argument definitions: the flag surface of the `scribble` binary.

use clap::Parser;
use std::path::PathBuf;

const LONG_ABOUT: &str = "Runtime-verification annotation compiler for smart contracts.\n\n\
    Scribble reads annotated source files, translates every #if_succeeds,\n\
    #invariant, and #define annotation into inline executable checks, and\n\
    emits an instrumented program that fails deterministically when a\n\
    property is violated.\n\n\
    Typical use:\n  \
    1. scribble token.sol --output-mode files\n  \
    2. scribble token.sol --arm            (swap instrumented code in place)\n  \
    3. scribble token.sol --disarm         (restore the originals)";

#[derive(Parser)]
#[command(name = "scribble")]
#[command(about = "Runtime-verification annotation compiler for smart contracts")]
#[command(long_about = LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    /// Input paths; pass `--` to read from stdin
    #[arg(required = true)]
    pub(crate) inputs: Vec<String>,

    /// Interpret inputs as source text or a host-compiler standard-JSON
    /// document: source | json
    #[arg(long, default_value = "source")]
    pub(crate) input_mode: String,

    /// Host compiler version (semver), or `auto` for per-file detection.
    /// Mandatory when input is JSON.
    #[arg(long, default_value = "auto")]
    pub(crate) compiler_version: String,

    /// Import path remappings, passed to the host compiler verbatim
    /// (e.g. "a=b;c=d")
    #[arg(long)]
    pub(crate) path_remapping: Option<String>,

    /// Only process annotations whose kind matches this regex
    #[arg(long)]
    pub(crate) filter_type: Option<String>,

    /// Only process annotations whose message matches this regex
    #[arg(long)]
    pub(crate) filter_message: Option<String>,

    /// Output shape: flat | files | json
    #[arg(long, default_value = "flat")]
    pub(crate) output_mode: String,

    /// Destination for flat/json output; `--` writes to stdout
    #[arg(long, default_value = "--")]
    pub(crate) output: String,

    /// Directory where the synthesised utilities unit is placed
    #[arg(long, default_value = ".")]
    pub(crate) utils_output_path: String,

    /// Assertion lowering strategy: log | mstore
    #[arg(long, default_value = "log")]
    pub(crate) user_assert_mode: String,

    /// Skip generation of user assertions
    #[arg(long, default_value_t = false)]
    pub(crate) no_assert: bool,

    /// Emit one debug event per annotation
    #[arg(long, default_value_t = false)]
    pub(crate) debug_events: bool,

    /// Write the instrumentation metadata record to this path
    #[arg(long)]
    pub(crate) instrumentation_metadata_file: Option<PathBuf>,

    /// After writing, swap originals to `.original` and instrumented copies
    /// into their place
    #[arg(long, default_value_t = false)]
    pub(crate) arm: bool,

    /// Reverse a previous --arm
    #[arg(long, default_value_t = false)]
    pub(crate) disarm: bool,

    /// With --disarm, retain the `.instrumented` files
    #[arg(long, default_value_t = false)]
    pub(crate) keep_instrumented: bool,

    /// Suppress progress messages
    #[arg(long, default_value_t = false)]
    pub(crate) quiet: bool,
}
