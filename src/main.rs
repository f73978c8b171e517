mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use radproc::error::ProcessError;

use crate::cli::{Cli, Commands};

/// Exit status for a request refused on its input, as opposed to a failed run.
const EXIT_REJECTED: i32 = 2;
const EXIT_FAILED: i32 = 1;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        let code = exit_code(&err);
        let outcome = if code == EXIT_REJECTED {
            "request rejected"
        } else {
            "command failed"
        };
        error!(error = %err, code, "{outcome}");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Process(args) => commands::process::run(args),
        Commands::ProcessFolder(args) => commands::process::run_folder(args),
        Commands::Inspect(args) => commands::inspect::run(args),
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    let rejected = err.chain().any(|cause| {
        cause
            .downcast_ref::<ProcessError>()
            .is_some_and(ProcessError::is_rejection)
    });
    if rejected { EXIT_REJECTED } else { EXIT_FAILED }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
