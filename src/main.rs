//! docxref CLI entry point.
//!
//! Thin glue only: parses the handful of flags the core pipeline needs,
//! wires up logging, and reports the run summary. Gitignore-aware file
//! discovery, a project config file, and watch mode are explicit non-goals
//! of the core pipeline and have no home here either.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;

use docxref::config::PipelineConfig;
use docxref::pipeline::{FileOutcome, Pipeline, RunSummary};

/// Maintain "Used in:" blocks inside docstrings across a file tree.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Arguments {
    /// A file whose docstrings may be updated. Repeatable.
    #[arg(long = "edit", required = true)]
    edit_files: Vec<PathBuf>,

    /// A file scanned for usages of constructs defined in `--edit` files. Repeatable.
    #[arg(long = "ref")]
    reference_files: Vec<PathBuf>,

    /// Ancestor directory used to compute the relative paths shown in
    /// "Used in:" blocks. Defaults to the current directory.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Directory for the on-disk parse/analysis caches.
    #[arg(long, default_value = ".docxref-cache")]
    cache_dir: PathBuf,

    /// Report what would change without writing any file.
    #[arg(long)]
    dry_run: bool,

    /// Remove generated "Used in:" blocks instead of adding them.
    #[arg(long)]
    clean: bool,

    /// Verbose logging (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn install_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "docxref=debug,warn",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .init();
}

fn print_summary(summary: &RunSummary) {
    for (path, outcome) in &summary.file_outcomes {
        match outcome {
            FileOutcome::Unchanged => {
                println!("{} {}", "unchanged".dimmed(), path.display());
            }
            FileOutcome::Modified => {
                println!("{} {}", "modified".green(), path.display());
            }
            FileOutcome::RolledBack { reason } => {
                println!("{} {} ({reason})", "rolled-back".red().bold(), path.display());
            }
            FileOutcome::Skipped { reason } => {
                println!("{} {} ({reason})", "skipped".yellow(), path.display());
            }
        }
    }
    if summary.truncated {
        println!("{}", "run was cancelled before every construct was analyzed".red());
    }
}

/// Drive one pipeline invocation end to end, composing library errors
/// with `anyhow::Context` before handing a plain exit code back to `main`.
async fn run(args: Arguments) -> Result<ExitCode> {
    let mut config = PipelineConfig::default();
    config.cache_dir = args.cache_dir;
    config.dry_run = args.dry_run;
    config
        .validate()
        .context("invalid pipeline configuration")?;

    let pipeline = Pipeline::new(config);
    let cancel = CancellationToken::new();

    let summary = if args.clean {
        pipeline.clean(&args.edit_files).await
    } else {
        pipeline
            .run(&args.edit_files, &args.reference_files, &args.root, cancel)
            .await
    };

    print_summary(&summary);

    Ok(if summary.exit_is_nonzero() {
        ExitCode::from(1)
    } else {
        ExitCode::from(0)
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Arguments::parse();
    install_logging(args.verbose);

    match run(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(2)
        }
    }
}
