//! aiscript-play - run AiScript programs against any supported engine release
//!
//! Provides subcommands for listing releases, checking programs and running
//! them the way the documentation playground does.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use aiscript_runner::host::{Playground, RunOutcome, RunnerRegistry};
use aiscript_runner::runner::OutputSink;
use aiscript_runner::PlaygroundConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "aiscript-play")]
#[command(about = "Run AiScript programs against several engine releases", long_about = None)]
struct Cli {
    /// Playground configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported engine releases
    Versions,

    /// Parse a program without running it
    Check {
        /// Program file, or `-` for stdin
        file: PathBuf,

        /// Engine release (default: from config, else the latest)
        #[arg(short, long)]
        engine: Option<String>,
    },

    /// Run a program, streaming its output to stdout
    Run {
        /// Program file, or `-` for stdin
        file: PathBuf,

        /// Engine release (default: from config, else the latest)
        #[arg(short, long)]
        engine: Option<String>,

        /// Abort the program after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Print the run report as JSON on stderr
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PlaygroundConfig::load(path)?,
        None => PlaygroundConfig::default(),
    };

    // Initialize tracing; stdout carries program output
    let level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let playground = Playground::new(RunnerRegistry::builtin(), &config)?;

    match cli.command {
        Commands::Versions => {
            for version in playground.registry().versions() {
                if version == playground.default_version() {
                    println!("{version} (default)");
                } else {
                    println!("{version}");
                }
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Check { file, engine } => {
            let code = read_source(&file)?;
            let version = engine.as_deref().unwrap_or(playground.default_version());
            let sink: OutputSink = Arc::new(|_: &str| {});
            let runner = playground
                .registry()
                .create(version, sink, &config.limits)?;

            let result = runner.parse(&code);
            runner.dispose();
            match result {
                Ok(parsed) => {
                    println!("OK ({version})");
                    for (name, value) in &parsed.metadata {
                        println!("### {} {}", name.as_deref().unwrap_or("-"), value);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                Err(failure) => {
                    let label = failure
                        .error()
                        .and_then(|err| runner.error_name(err))
                        .unwrap_or("Unknown");
                    eprintln!("{label}: {failure}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }

        Commands::Run {
            file,
            engine,
            timeout_ms,
            json,
        } => {
            let code = read_source(&file)?;
            let sink: OutputSink = Arc::new(|text: &str| println!("{text}"));
            let session = playground.open(engine.as_deref(), sink)?;

            let run = playground.run(session, &code);
            tokio::pin!(run);
            let report = match timeout_ms {
                Some(ms) => tokio::select! {
                    report = &mut run => report?,
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {
                        tracing::info!(%session, ms, "timeout reached, aborting");
                        playground.abort(session)?;
                        run.await?
                    }
                },
                None => run.await?,
            };
            playground.close(session)?;

            if json {
                eprintln!("{}", serde_json::to_string_pretty(&report)?);
            }
            match &report.outcome {
                RunOutcome::Completed => Ok(ExitCode::SUCCESS),
                RunOutcome::Aborted => {
                    eprintln!("aborted");
                    Ok(ExitCode::FAILURE)
                }
                RunOutcome::Failed { label, message, .. } => {
                    let label = label.map(|label| label.as_str()).unwrap_or("Unknown");
                    eprintln!("{label}: {}", message.as_deref().unwrap_or("unknown failure"));
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn read_source(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Failed to read program from stdin")?;
        Ok(code)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read program: {:?}", path))
    }
}
