use clap::Parser;
use std::path::PathBuf;

use snetc::infer::{InferOptions, DEFAULT_STAR_ITERATION_LIMIT};
use snetc::pass::PassId;
use snetc::pipeline::{run_pipeline, CompilationState, PipelineOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Signature of the top-level network
    Signatures,
    /// Regenerated type annotations for every box and network
    Annotated,
    /// Only the diagnostics, on stdout
    Diagnostics,
    /// Source hash and compiler version as JSON
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "snetc",
    version,
    about = "S-Net type engine: infers and checks record types of stream network descriptions"
)]
struct Cli {
    /// Network description (JSON AST)
    source: PathBuf,

    /// Top-level network, overriding the one designated in the source
    #[arg(long)]
    top: Option<String>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Signatures)]
    emit: EmitStage,

    /// Print annotations as JSON
    #[arg(long)]
    json: bool,

    /// Iteration bound of star and feedback inference
    #[arg(long, default_value_t = DEFAULT_STAR_ITERATION_LIMIT)]
    star_limit: usize,

    /// Print passes and timing
    #[arg(long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("snetc=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if cli.verbose {
        eprintln!("snetc: source = {}", cli.source.display());
        eprintln!("snetc: emit   = {:?}", cli.emit);
    }

    // ── Read source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("snetc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let mut state = match CompilationState::from_json(&source) {
        Ok(state) => state,
        Err(e) => {
            eprintln!("snetc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    if let Some(top) = &cli.top {
        state.set_top(top);
    }

    if cli.emit == EmitStage::BuildInfo {
        if let Some(provenance) = &state.provenance {
            print!("{}", provenance.to_json());
        }
        return;
    }

    // ── Run passes ──
    let options = PipelineOptions {
        infer: InferOptions {
            star_iteration_limit: cli.star_limit,
        },
        verbose: cli.verbose,
    };
    let to_stdout = cli.emit == EmitStage::Diagnostics;
    let result = run_pipeline(&mut state, PassId::Annotate, &options, |_, diags| {
        for diag in diags {
            if to_stdout {
                println!("{}", diag);
            } else {
                eprintln!("snetc: {}", diag);
            }
        }
    });
    if let Err(e) = result {
        eprintln!("snetc: {}", e);
        std::process::exit(1);
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Signatures => {
            if let Some(sig) = state.top_signature() {
                println!("{}", sig);
            }
        }
        EmitStage::Annotated => {
            let Some(annotations) = &state.annotations else {
                return;
            };
            if cli.json {
                match serde_json::to_string_pretty(annotations) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("snetc: error: {}", e);
                        std::process::exit(2);
                    }
                }
            } else {
                println!("{}", annotations);
            }
        }
        EmitStage::Diagnostics | EmitStage::BuildInfo => {}
    }
}
