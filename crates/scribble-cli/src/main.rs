use clap::Parser;
use tracing_subscriber::EnvFilter;

use scribble_instr::{AssertionMode, OutputMode};

mod arming;
mod cli;
mod compiler;
mod pipeline;

use cli::Cli;
use compiler::VersionSelection;
use pipeline::{InputMode, RunConfig};

fn parse_input_mode(raw: &str) -> InputMode {
    match raw {
        "source" => InputMode::Source,
        "json" => InputMode::Json,
        other => {
            eprintln!("Unknown input mode: {other}. Use 'source' or 'json'.");
            std::process::exit(1);
        }
    }
}

fn parse_output_mode(raw: &str) -> OutputMode {
    match raw {
        "flat" => OutputMode::Flat,
        "files" => OutputMode::Files,
        "json" => OutputMode::Json,
        other => {
            eprintln!("Unknown output mode: {other}. Use 'flat', 'files', or 'json'.");
            std::process::exit(1);
        }
    }
}

fn parse_assert_mode(raw: &str) -> AssertionMode {
    match raw {
        "log" => AssertionMode::Log,
        "mstore" => AssertionMode::Mstore,
        other => {
            eprintln!("Unknown user-assert mode: {other}. Use 'log' or 'mstore'.");
            std::process::exit(1);
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let env_filter = if cli.quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if cli.disarm {
        if let Err(e) = arming::disarm_files(&cli.inputs, cli.keep_instrumented) {
            eprintln!("disarm failed: {e}");
            std::process::exit(1);
        }
        return;
    }

    let version = match VersionSelection::parse(&cli.compiler_version) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(1);
        }
    };
    let filter = match pipeline::build_filter(
        cli.filter_type.as_deref(),
        cli.filter_message.as_deref(),
    ) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{:?}", miette::Report::new(e));
            std::process::exit(1);
        }
    };
    let remappings: Vec<String> = cli
        .path_remapping
        .as_deref()
        .map(|r| r.split(';').map(str::to_string).collect())
        .unwrap_or_default();

    let cfg = RunConfig {
        inputs: cli.inputs.clone(),
        input_mode: parse_input_mode(&cli.input_mode),
        version,
        remappings,
        filter,
        output_mode: parse_output_mode(&cli.output_mode),
        output: cli.output.clone(),
        utils_dir: cli.utils_output_path.clone(),
        assertion_mode: parse_assert_mode(&cli.user_assert_mode),
        no_assert: cli.no_assert,
        debug_events: cli.debug_events,
        metadata_file: cli.instrumentation_metadata_file.clone(),
        arm: cli.arm,
    };

    if let Err(e) = pipeline::run(cfg) {
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(1);
    }
}
