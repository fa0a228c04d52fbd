//! treewire command-line interface.
//!
//! `serve` speaks the sync protocol on stdio (logs go to stderr), `sync`
//! pushes files to a worker subprocess, `check` validates that files parse
//! losslessly and survive the print-idempotence check.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use treewire::json::{check_print_idempotence, parse, print};
use treewire::rpc::{HelloFlags, PushSession, ServeSession};
use treewire::tree::NodeArena;

#[derive(Parser)]
#[command(name = "treewire")]
#[command(about = "Lossless-tree synchronization between refactoring processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse files and verify lossless printing and print idempotence
    Check {
        /// Files to check
        paths: Vec<PathBuf>,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Speak the sync protocol on stdin/stdout (the worker side)
    Serve,

    /// Push files to a worker process and report the outcome
    Sync {
        /// Files to push
        paths: Vec<PathBuf>,

        /// Worker executable; defaults to this binary with `serve`
        #[arg(long)]
        worker: Option<PathBuf>,

        /// Ask the worker to run the print-idempotence check on every tree
        #[arg(long)]
        verify: bool,

        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("treewire=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("treewire=info"))
    };
    // Protocol traffic owns stdout in serve mode; logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Check { paths, json } => check(paths, json).await,
        Commands::Serve => serve().await,
        Commands::Sync {
            paths,
            worker,
            verify,
            json,
        } => sync(paths, worker, verify, json).await,
    }
}

#[derive(Debug, Serialize)]
struct CheckOutcome {
    path: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn check(paths: Vec<PathBuf>, json: bool) -> Result<()> {
    let mut outcomes = Vec::new();
    for path in &paths {
        let display = path.display().to_string();
        let outcome = match check_one(path, &display).await {
            Ok(()) => CheckOutcome {
                path: display,
                ok: true,
                error: None,
            },
            Err(err) => CheckOutcome {
                path: display,
                ok: false,
                error: Some(err.to_string()),
            },
        };
        outcomes.push(outcome);
    }

    let failed = outcomes.iter().filter(|o| !o.ok).count();
    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            match &outcome.error {
                None => println!("ok      {}", outcome.path),
                Some(err) => println!("error   {}: {err}", outcome.path),
            }
        }
        println!("{} checked, {failed} failed", outcomes.len());
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn check_one(path: &PathBuf, display: &str) -> Result<()> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {display}"))?;
    let mut arena = NodeArena::new();
    let root = parse(&mut arena, display, &text)?;
    let printed = print(&arena, root);
    if printed != text {
        anyhow::bail!("printed output differs from the input bytes");
    }
    check_print_idempotence(&arena, root, display)?;
    Ok(())
}

async fn serve() -> Result<()> {
    let mut session = ServeSession::new(tokio::io::stdin(), tokio::io::stdout());
    let summary = session.run().await?;
    info!(
        files_ok = summary.files_ok,
        files_err = summary.files_err,
        "worker done"
    );
    Ok(())
}

async fn sync(
    paths: Vec<PathBuf>,
    worker: Option<PathBuf>,
    verify: bool,
    json: bool,
) -> Result<()> {
    let worker = match worker {
        Some(path) => path,
        None => std::env::current_exe().context("locating worker executable")?,
    };
    let mut child = Command::new(&worker)
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawning worker {}", worker.display()))?;
    let child_stdout = child.stdout.take().context("worker stdout not captured")?;
    let child_stdin = child.stdin.take().context("worker stdin not captured")?;

    let mut flags = HelloFlags::STATS;
    if verify {
        flags |= HelloFlags::VERIFY;
    }
    let mut session = PushSession::connect(child_stdout, child_stdin, flags).await?;

    for path in &paths {
        let display = path.display().to_string();
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {display}"))?;
        session.push_source(&display, &text).await?;
    }
    let report = session.finish().await?;

    let status = child.wait().await.context("waiting for worker")?;
    if !status.success() {
        error!(%status, "worker exited abnormally");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for outcome in &report.files {
            match &outcome.error {
                None => println!("synced  {}", outcome.path),
                Some(err) => println!("failed  {}: {err}", outcome.path),
            }
        }
        println!(
            "{} ok, {} failed, {} records ({} bytes) sent",
            report.files_ok, report.files_err, report.sent.records, report.sent.bytes
        );
    }
    if !report.all_synced() {
        std::process::exit(1);
    }
    Ok(())
}
