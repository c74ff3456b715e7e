//!
//! confhist binary
//! ---------------
//! Loads the settings file, starts the history service, and keeps watching
//! until interrupted. Supports configuration via CLI flags and environment
//! variables; flags win over the environment, which wins over the file.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use confhist::{AppSettings, ConfigRegistry, HistoryService, ServiceOptions};

const USAGE: &str = "confhist\n\nUSAGE:\n  confhist [--config PATH] [--no-watch] [--no-backfill] [--once]\n\nOPTIONS:\n  --config PATH    Settings file (env: CONFHIST_CONFIG, default config.json)\n  --no-watch       Do not watch live files for changes\n  --no-backfill    Skip the startup capture of every config\n  --once           Capture every config once, then exit\n\nENVIRONMENT:\n  CONFHIST_CONFIG_DIR   Overrides configDir from the settings file\n  CONFHIST_BACKUP_DIR   Overrides backupDir from the settings file\n  RUST_LOG              Log filter (default info)\n";

fn has_flag(args: &[String], flag: &str) -> bool { args.iter().any(|a| a == flag) }

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag {
            return args.get(i + 1).cloned();
        }
        i += 1;
    }
    None
}

fn env_path(name: &str) -> Option<PathBuf> { env::var(name).ok().filter(|v| !v.is_empty()).map(PathBuf::from) }

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to build log filter")?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{USAGE}");
        return Ok(());
    }

    let settings_path = arg_value(&args, "--config")
        .map(PathBuf::from)
        .or_else(|| env_path("CONFHIST_CONFIG"))
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let mut settings = AppSettings::load(&settings_path)?;
    if let Some(dir) = env_path("CONFHIST_CONFIG_DIR") {
        settings.config_dir = dir;
    }
    if let Some(dir) = env_path("CONFHIST_BACKUP_DIR") {
        settings.backup_dir = dir;
    }
    let registry = ConfigRegistry::from_settings(&settings)
        .with_context(|| format!("Invalid settings in {}", settings_path.display()))?;

    let once = has_flag(&args, "--once");
    let options = ServiceOptions {
        watch: !once && !has_flag(&args, "--no-watch"),
        backfill: once || !has_flag(&args, "--no-backfill"),
    };

    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "startup",
        "confhist starting: RUST_LOG='{}', settings='{}', config_dir='{}', backup_dir='{}', targets={}, watch={}, backfill={}",
        rust_log,
        settings_path.display(),
        registry.live_root.display(),
        registry.archive_root.display(),
        registry.targets.len(),
        options.watch,
        options.backfill
    );

    let service = HistoryService::start(registry, options).await?;
    if !once {
        tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
        info!(target: "startup", "shutdown requested");
    }
    service.shutdown().await;
    Ok(())
}
