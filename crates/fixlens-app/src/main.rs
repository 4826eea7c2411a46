//! fixlens - quickfix preview, apply and revert for static-analysis reports
//!
//! Each invocation is one session: the report is loaded, applied records are
//! restored from the workspace ledger, and a single command runs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fixlens_adapters::config::Config;
use fixlens_adapters::git_ops::list_checkpoints;
use fixlens_adapters::report::{load_report, AnalysisReport};
use fixlens_core::issue::{DiagnosticLevel, IssueId};
use fixlens_core::marker::Marker;
use fixlens_core::quickfix::RecordId;
use fixlens_core::{DiagnosticSink, Event, FixError, LoadScope, NoticeLevel};
use fixlens_engine::{Session, SessionOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "fixlens",
    about = "Preview, apply and revert quickfixes from an analysis report",
    version
)]
struct Args {
    /// Workspace root (defaults to current directory)
    #[arg(long, short, default_value = ".")]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the markers of one file as an editor would show them
    Markers { report: PathBuf, file: PathBuf },
    /// Print the file as it would look with the quickfix applied
    Preview {
        report: PathBuf,
        issue: String,
        /// Print a unified diff instead of the whole file
        #[arg(long)]
        diff: bool,
    },
    /// Print the result document of an issue
    Result { report: PathBuf, issue: String },
    /// Apply the quickfix of an issue to the file on disk
    Apply { report: PathBuf, issue: String },
    /// Undo an applied quickfix
    Revert { record: String },
    /// List applied records of this workspace
    Records,
}

/// Prints published markers to stdout, one per line.
struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn publish(&self, file: &Path, markers: &[Marker]) {
        for marker in markers {
            println!(
                "{}:{}-{}: {} [{}] {}{}",
                file.display(),
                marker.range.start,
                marker.range.end,
                level_label(marker.level),
                marker.issue_id,
                marker.message,
                if marker.has_quickfix { " (quickfix)" } else { "" }
            );
        }
    }

    fn clear(&self, _file: &Path) {}
}

fn level_label(level: DiagnosticLevel) -> &'static str {
    match level {
        DiagnosticLevel::Error => "error",
        DiagnosticLevel::Warning => "warning",
        DiagnosticLevel::Information => "info",
        DiagnosticLevel::Hint => "hint",
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("FIXLENS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let args = Args::parse();

    let workspace = args
        .workspace
        .canonicalize()
        .with_context(|| format!("Workspace {} not found", args.workspace.display()))?;
    let config = Config::load(&workspace);
    let session = Session::new(SessionOptions::from_config(
        &workspace,
        &config,
        Arc::new(StdoutSink),
    ));

    let outcome = match args.command {
        Command::Markers { report, file } => {
            open_report(&session, &report).await?;
            show_markers(&session, &file).await
        }
        Command::Preview {
            report,
            issue,
            diff,
        } => {
            open_report(&session, &report).await?;
            let issue = IssueId::new(issue);
            if diff {
                session.preview_diff(&issue).await.map(|diff| {
                    if diff.is_empty() {
                        eprintln!("  No changes.");
                    } else {
                        print!("{}", diff);
                    }
                })
            } else {
                print!("{}", session.preview(&issue).await);
                Ok(())
            }
        }
        Command::Result { report, issue } => {
            open_report(&session, &report).await?;
            print!("{}", session.result(&IssueId::new(issue)).await);
            Ok(())
        }
        Command::Apply { report, issue } => {
            open_report(&session, &report).await?;
            session.apply(&IssueId::new(issue)).await.map(|record| {
                println!("{}", record.id);
                eprintln!(
                    "  + Applied quickfix for {} to {}",
                    record.issue_id,
                    record.file.display()
                );
                if record.checkpoint.is_none() {
                    eprintln!("  ! No version control; revert will restore the fixed range only.");
                }
            })
        }
        Command::Revert { record } => match record.parse::<RecordId>() {
            Ok(id) => session.revert(id).await.map(|record| {
                eprintln!(
                    "  + Reverted quickfix for {} in {}",
                    record.issue_id,
                    record.file.display()
                );
            }),
            Err(err) => Err(err),
        },
        Command::Records => {
            session.restore_records().await?;
            print_records(&session);
            report_stray_checkpoints(&session);
            Ok(())
        }
    };

    Ok(match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_failure(&err),
    })
}

async fn open_report(session: &Session, path: &Path) -> Result<AnalysisReport> {
    let report = load_report(path, session.root())?;
    let mut changes = session.store().subscribe();
    for configuration in &report.configurations {
        session
            .load(
                configuration.issues.clone(),
                LoadScope::Configuration(configuration.id.clone()),
            )
            .await
            .with_context(|| format!("Failed to load configuration {}", configuration.id))?;
    }
    session
        .restore_records()
        .await
        .context("Failed to read applied records")?;
    while let Ok(change) = changes.try_recv() {
        tracing::debug!(
            generation = change.generation,
            added = change.added.len(),
            superseded = change.superseded.len(),
            files = change.files.len(),
            "issues loaded"
        );
    }
    tracing::debug!(issues = report.issue_count(), "report loaded");
    Ok(report)
}

/// Open `file` as an editor buffer so its markers are published.
async fn show_markers(session: &Session, file: &Path) -> Result<(), FixError> {
    let absolute = if file.is_absolute() {
        file.to_path_buf()
    } else {
        session.root().join(file)
    };
    let text = tokio::fs::read_to_string(&absolute)
        .await
        .map_err(|err| FixError::io(file, err))?;
    session
        .reconcile(Event::DocumentOpened {
            path: absolute,
            version: 1,
            text,
        })
        .await;
    Ok(())
}

fn print_records(session: &Session) {
    let records = session.records();
    if records.is_empty() {
        eprintln!("  No applied quickfixes.");
        return;
    }
    for record in records {
        let status = match record.reverted_at {
            Some(at) => format!("reverted {}", at.format("%Y-%m-%d %H:%M")),
            None => "applied".to_string(),
        };
        println!(
            "{}  {}  {}:{}  {}  ({})",
            record.id,
            record.issue_id,
            record.file.display(),
            record.start,
            record.applied_at.format("%Y-%m-%d %H:%M"),
            status
        );
    }
}

/// Checkpoints pinned in git that no outstanding record can restore from.
fn report_stray_checkpoints(session: &Session) {
    let pinned = match list_checkpoints(session.root()) {
        Ok(pinned) => pinned,
        Err(err) => {
            tracing::debug!(error = %err, "no checkpoints to list");
            return;
        }
    };
    let records = session.records();
    let stray = pinned
        .iter()
        .filter(|token| {
            !records
                .iter()
                .any(|record| !record.is_reverted() && record.checkpoint.as_ref() == Some(*token))
        })
        .count();
    if stray > 0 {
        eprintln!(
            "  ! {} checkpoint(s) under refs/fixlens/checkpoints are not used by any applied quickfix.",
            stray
        );
    }
}

/// `NotFound` is a no-op; every other failure fails the command.
fn report_failure(err: &FixError) -> ExitCode {
    let prefix = match err.notice_level() {
        NoticeLevel::Info | NoticeLevel::Success => "  ·",
        NoticeLevel::Warning => "  !",
        NoticeLevel::Error => "  x",
    };
    eprintln!("{} {}", prefix, err.user_message());
    tracing::debug!(code = ?err.code(), error = %err, "command failed");
    match err {
        FixError::NotFound { .. } => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}
