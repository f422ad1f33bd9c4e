mod model;
mod plugin;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use model::config::{DEFAULT_CONFIG_FILE, Registry};
use model::environment::Environment;
use plugin::PluginManager;
use plugin::outcome::InstallSummary;

/// Downloads, installs and manages host plugins declared in a registry file.
#[derive(Debug, Parser)]
#[command(name = "plugin-manager", version, about)]
struct Cli {
    /// Plugin registry (JSON, or TOML by extension)
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Environment profile to apply
    #[arg(long, value_enum, default_value_t = Environment::Production)]
    environment: Environment,

    /// Action to perform
    #[arg(long, value_enum, default_value_t = Action::Install)]
    action: Action,

    /// Project root that install paths are relative to [default: current directory]
    #[arg(long)]
    root: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Action {
    Install,
    List,
    Clean,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose)?;

    tracing::info!(environment = %cli.environment, action = ?cli.action, "plugin-manager starting");

    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("cannot determine working directory")?,
    };
    let registry = Registry::load(&cli.config);
    if registry.is_empty() {
        println!("[WARNING] No plugins loaded from {}", cli.config.display());
    }
    let manager = PluginManager::new(registry, cli.environment, root);

    let success = run_action(&manager, cli.action);

    tracing::info!(success, "plugin-manager finished");
    Ok(if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Perform `action`; `false` maps to a non-zero exit code.
fn run_action(manager: &PluginManager, action: Action) -> bool {
    match action {
        Action::Install => {
            let summary = manager.install_all();
            print_summary(&summary);
            summary.is_success()
        }
        Action::List => {
            print_listing(manager);
            true
        }
        Action::Clean => manager.clean().is_success(),
    }
}

/// Log to a daily file (never stdout, which carries progress output).
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = directories::ProjectDirs::from("", "", "plugin-manager")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(std::env::temp_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("cannot create log directory {}", log_dir.display()))?;

    let default_level = if verbose {
        "plugin_manager=debug"
    } else {
        "plugin_manager=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_appender = tracing_appender::rolling::daily(&log_dir, "plugin-manager.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    Ok(guard)
}

fn print_summary(summary: &InstallSummary) {
    println!("\n[SUMMARY] Installation Summary:");
    println!("  [SUCCESS] Installed: {}", summary.installed);
    println!("  [FAILED] Failed: {}", summary.failed);
    println!("  [SKIPPED] Skipped: {}", summary.skipped);
    println!("  [TOTAL] Total: {}", summary.total());
    for (id, reason) in summary.failures() {
        println!("  [FAILED] {id}: {reason}");
    }
}

fn print_listing(manager: &PluginManager) {
    println!("[PLUGINS] Configured Plugins:");
    if manager.plugin_count() == 0 {
        println!("  No plugins configured");
        return;
    }

    for row in manager.list() {
        let status = if row.enabled { "[ENABLED]" } else { "[DISABLED]" };
        let required = if row.required { "[REQUIRED]" } else { "[OPTIONAL]" };
        let installed = if row.installed {
            "[INSTALLED]"
        } else {
            "[NOT INSTALLED]"
        };
        let descriptor = row.descriptor;
        let or_na = |value: Option<&str>| value.unwrap_or("N/A").to_string();

        println!("  {}:", row.id);
        println!("    Name: {}", or_na(descriptor.name.as_deref()));
        println!("    Status: {status} | {required} | {installed}");
        println!("    Version: {}", or_na(descriptor.version.as_deref()));
        println!(
            "    Repository: {}",
            or_na(Some(descriptor.repository.url.as_str()).filter(|url| !url.is_empty()))
        );
        println!();
    }
}
