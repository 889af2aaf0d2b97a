/*============================================================
  Synavera Project: Dev-Mgr
  Module: devmgr::main
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1.1
  ------------------------------------------------------------
  Purpose:
    Command-line shell over the Dev-Mgr core. Detects the
    host, dispatches package, pack and AUR operations to
    background workers and renders their progress.

  Security / Safety Notes:
    Operates within user privileges; mutating commands are
    escalated through the detected privilege method only.

  Dependencies:
    clap for CLI parsing, chrono for session stamps,
    serde_json for machine-readable output.

  Operational Scope:
    Invoked directly by operators or wrapped by scripts that
    consume `--json` output.

  Revision History:
    2025-10-28 COD  Authored core runtime entry point.
    2025-11-02 COD  Reworked as Dev-Mgr command shell.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Result-first error handling with deterministic exits
    - Structured logging following Synavera cadence
    - Configurable execution via CLI and config file
============================================================*/

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;

use devmgr_core::aur::SUPPORTED_HELPERS;
use devmgr_core::backend::Mutation;
use devmgr_core::batch::{BatchAction, BatchResult};
use devmgr_core::config::DevmgrConfig;
use devmgr_core::control::CancelToken;
use devmgr_core::environment::HelperState;
use devmgr_core::error::{DevmgrError, Result};
use devmgr_core::logger::{prune_logs, Logger};
use devmgr_core::runner::SystemRunner;
use devmgr_core::worker::{WorkerEvent, WorkerHandle, WorkerOutput};
use devmgr_core::{Session, SessionOptions};

/// Command-line arguments for Dev-Mgr.
#[derive(Debug, Parser)]
#[command(
    name = "devmgr",
    version,
    author = "Synavera Systems",
    about = "Distribution-agnostic developer package manager"
)]
struct Cli {
    /// Override configuration file path.
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Explicit log file path.
    #[arg(long, value_name = "PATH", global = true)]
    log: Option<PathBuf>,
    /// Enable verbose logging to stderr.
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    verbose: bool,
    /// Emit machine-readable JSON on stdout.
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show distribution, detected tooling and package counts.
    Info,
    /// Install native packages, skipping those already present.
    Install {
        #[arg(required = true, value_name = "PKG")]
        packages: Vec<String>,
    },
    /// Remove native packages, skipping those already absent.
    Remove {
        #[arg(required = true, value_name = "PKG")]
        packages: Vec<String>,
    },
    /// Upgrade a single package.
    Upgrade { package: String },
    /// Refresh the package databases.
    RefreshDb,
    /// Remove a package together with dependencies nothing else needs.
    Cleanup { package: String },
    /// Curated development packs.
    #[command(subcommand)]
    Pack(PackCommand),
    /// Arch User Repository packages (requires an active helper).
    #[command(subcommand)]
    Aur(AurCommand),
    /// AUR helper lifecycle.
    #[command(subcommand)]
    Helper(HelperCommand),
}

#[derive(Debug, Subcommand)]
enum PackCommand {
    /// List packs with their install status.
    List,
    Install { name: String },
    Remove { name: String },
}

#[derive(Debug, Subcommand)]
enum AurCommand {
    Search { query: String },
    Install {
        #[arg(required = true, value_name = "PKG")]
        packages: Vec<String>,
    },
    Remove {
        #[arg(required = true, value_name = "PKG")]
        packages: Vec<String>,
    },
    /// List packages installed from outside the sync repositories.
    Foreign,
}

#[derive(Debug, Subcommand)]
enum HelperCommand {
    List,
    /// Build and install a helper from source (defaults to the configured helper).
    Install { name: Option<String> },
    Remove { name: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("[Dev-Mgr] {}", err);
            err.exit_code()
        }
    }
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = DevmgrConfig::load_from_optional_path(cli.config.as_deref())?;

    let log_dir = config.log_dir();
    let session_stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S").to_string();
    let log_path = cli
        .log
        .clone()
        .unwrap_or_else(|| log_dir.join(format!("devmgr_{session_stamp}.log")));
    let logger = Arc::new(Logger::new(
        Some(log_path),
        cli.verbose,
        config.log_level(),
    )?);
    logger.info("INIT", "Dev-Mgr awakening.");
    let pruned = prune_logs(&log_dir, config.logging.retention_days);
    if pruned > 0 {
        logger.info("RETENTION", format!("Pruned {pruned} expired session log(s)"));
    }

    let session = Session::new(
        Arc::new(SystemRunner),
        logger.clone(),
        SessionOptions::from(&config),
    );

    let code = dispatch(&cli, &config, &session).await;
    match &code {
        Ok(_) => logger.info("COMPLETE", "Session closed."),
        Err(err) => logger.error("ABORT", err.to_string()),
    }
    logger.finalize()?;
    code
}

async fn dispatch(cli: &Cli, config: &DevmgrConfig, session: &Session) -> Result<ExitCode> {
    let json = cli.json;
    match &cli.command {
        Command::Info => {
            let summary = session.summary(&CancelToken::new()).await;
            emit(json, &summary, || summary.to_string())?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Install { packages } => {
            batch(json, session.spawn_batch(BatchAction::Install, packages.clone())?).await
        }
        Command::Remove { packages } => {
            batch(json, session.spawn_batch(BatchAction::Remove, packages.clone())?).await
        }
        Command::Upgrade { package } => {
            message(json, session.spawn_mutation(Mutation::Upgrade, Some(package.clone()))?).await
        }
        Command::RefreshDb => {
            message(json, session.spawn_mutation(Mutation::RefreshDatabases, None)?).await
        }
        Command::Cleanup { package } => {
            message(json, session.spawn_mutation(Mutation::Cleanup, Some(package.clone()))?).await
        }
        Command::Pack(PackCommand::List) => list_packs(json, session).await,
        Command::Pack(PackCommand::Install { name }) => {
            batch(json, session.spawn_pack(name, BatchAction::Install)?).await
        }
        Command::Pack(PackCommand::Remove { name }) => {
            batch(json, session.spawn_pack(name, BatchAction::Remove)?).await
        }
        Command::Aur(AurCommand::Search { query }) => {
            let records = drive(session.spawn_search(query)?).await?;
            emit(json, &records, || {
                records
                    .iter()
                    .map(|record| {
                        let installed = if record.installed { " [installed]" } else { "" };
                        format!(
                            "{} {} (+{} {:.2}%){installed}\n    {}",
                            record.name,
                            record.version,
                            record.votes,
                            record.popularity,
                            record.description
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Aur(AurCommand::Install { packages }) => {
            batch(json, session.spawn_aur_batch(BatchAction::Install, packages.clone())?).await
        }
        Command::Aur(AurCommand::Remove { packages }) => {
            batch(json, session.spawn_aur_batch(BatchAction::Remove, packages.clone())?).await
        }
        Command::Aur(AurCommand::Foreign) => {
            let packages = session
                .aur()
                .installed_foreign_packages(&CancelToken::new())
                .await?;
            emit(json, &packages, || {
                let mut lines: Vec<String> = packages
                    .iter()
                    .map(|pkg| format!("{} {}", pkg.name, pkg.version))
                    .collect();
                lines.push(format!("{} AUR package(s) installed", packages.len()));
                lines.join("\n")
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Helper(HelperCommand::List) => {
            list_helpers(json, session)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Helper(HelperCommand::Install { name }) => {
            let name = name.as_deref().unwrap_or(&config.aur.default_helper);
            helper(json, session.spawn_helper_install(name)?).await
        }
        Command::Helper(HelperCommand::Remove { name }) => {
            helper(json, session.spawn_helper_remove(name)?).await
        }
    }
}

/// Render worker events until completion; Ctrl-C cancels the worker.
async fn drive<T>(mut handle: WorkerHandle<T>) -> Result<T> {
    let cancel = handle.cancel_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("[Dev-Mgr] Cancelling…");
            cancel.cancel();
        }
    });

    while let Some(event) = handle.next_event().await {
        if let WorkerEvent::Progress { percent, label } = event {
            eprintln!("[{percent:>3}%] {label}");
        }
    }
    interrupt.abort();
    handle.join().await
}

async fn batch(json: bool, handle: WorkerHandle<BatchResult>) -> Result<ExitCode> {
    let result = drive(handle).await?;
    emit(json, &result, || {
        let mut lines: Vec<String> = result
            .items
            .iter()
            .map(|item| format!("{:<24} {}", item.package, item.outcome))
            .collect();
        lines.push(result.message.clone());
        lines.join("\n")
    })?;
    Ok(if result.overall_success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn message(json: bool, handle: WorkerHandle<String>) -> Result<ExitCode> {
    let done = drive(handle).await?;
    let summary = done.summary();
    emit(json, &summary, || summary.message.clone())?;
    Ok(ExitCode::SUCCESS)
}

async fn helper(json: bool, handle: WorkerHandle<HelperState>) -> Result<ExitCode> {
    let state = drive(handle).await?;
    emit(json, &state, || state.summary().message)?;
    Ok(ExitCode::SUCCESS)
}

async fn list_packs(json: bool, session: &Session) -> Result<ExitCode> {
    let cancel = CancelToken::new();
    let mut statuses = Vec::new();
    for pack in session.packs().packs() {
        statuses.push(session.pack_status(&pack.name, &cancel).await?);
    }
    emit(json, &statuses, || {
        session
            .packs()
            .packs()
            .iter()
            .zip(&statuses)
            .map(|(pack, status)| {
                format!(
                    "{} [{}]\n    {}\n    {}",
                    pack.name,
                    status.label(),
                    pack.description,
                    pack.packages.join(" ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })?;
    Ok(ExitCode::SUCCESS)
}

fn list_helpers(json: bool, session: &Session) -> Result<()> {
    let installed: Vec<&str> = session
        .aur()
        .installed_helpers()
        .iter()
        .map(|spec| spec.name)
        .collect();
    let active = session.helper_state();

    #[derive(Serialize)]
    struct HelperRow<'a> {
        name: &'a str,
        description: &'a str,
        installed: bool,
        active: bool,
    }
    let rows: Vec<HelperRow<'_>> = SUPPORTED_HELPERS
        .iter()
        .map(|spec| HelperRow {
            name: spec.name,
            description: spec.description,
            installed: installed.contains(&spec.name),
            active: active.active_helper() == Some(spec.name),
        })
        .collect();

    emit(json, &rows, || {
        rows.iter()
            .map(|row| {
                let marker = match (row.active, row.installed) {
                    (true, _) => "*",
                    (false, true) => "+",
                    (false, false) => " ",
                };
                format!("{marker} {:<8} {}", row.name, row.description)
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn emit<T, F>(json: bool, value: &T, text: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce() -> String,
{
    if json {
        let rendered = serde_json::to_string_pretty(value)
            .map_err(|err| DevmgrError::Serialization(format!("Failed to render JSON: {err}")))?;
        println!("{rendered}");
    } else {
        println!("{}", text());
    }
    Ok(())
}
