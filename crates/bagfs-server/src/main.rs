//! bagfs binary
//!
//! ## Usage
//!
//! ```bash
//! # Mount every bag and serve the virtual drive (default)
//! bagfs serve
//!
//! # One-shot administration
//! bagfs volumes
//! bagfs add /media/usb/photos
//! bagfs resync /media/usb
//! bagfs browse '\music\By Artist'
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bagfs_kernel::{BagfsConfig, HotplugMonitor};
use bagfs_server::{Admin, AdminResult, Bagfs, ConsoleHost};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tag-organized virtual filesystem over bag volumes.
#[derive(Parser, Debug)]
#[command(name = "bagfs", version)]
struct Cli {
    /// Config file (default: <config dir>/bagfs/config.ron)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to <dir>/bagfs.log
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount every bag, keep them in sync and serve the virtual drive
    Serve,
    /// List bag volumes
    Volumes,
    /// Show one bag volume
    Stat { volume: String },
    /// Create a bag in a directory
    Add { path: PathBuf },
    /// Forget the bag on a volume
    Remove { volume: String },
    /// Rebuild a volume's catalog from its bag directory
    Resync { volume: String },
    /// List a virtual directory
    Browse {
        #[arg(default_value = "\\")]
        path: String,
    },
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, "bagfs.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config = match BagfsConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let app = Bagfs::new(config, tokio::runtime::Handle::current());

    let code = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => match run_server(Arc::clone(&app)).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("Server error: {e:#}");
                ExitCode::FAILURE
            }
        },
        Command::Volumes => cmd_volumes(&app),
        Command::Stat { volume } => cmd_admin(&app, |admin| admin.stat(&volume)),
        Command::Add { path } => cmd_admin(&app, |admin| admin.add(&path)),
        Command::Remove { volume } => cmd_admin(&app, |admin| admin.remove(&volume)),
        Command::Resync { volume } => cmd_admin(&app, |admin| admin.resync(&volume)),
        Command::Browse { path } => {
            app.load();
            print!("{}", Admin::new(Arc::clone(&app)).browse(&path));
            ExitCode::SUCCESS
        }
    };

    app.shutdown();
    code
}

async fn run_server(app: Arc<Bagfs>) -> anyhow::Result<()> {
    let mounted = app.start();
    tracing::info!(mounted, "starting bagfs");

    let watcher = Arc::clone(app.watcher());
    let mut monitor = HotplugMonitor::spawn_with_hook(
        Arc::clone(app.registry()),
        app.config().hotplug_debounce(),
        Arc::new(move || {
            watcher.reconcile();
        }),
    );
    if let Err(e) = monitor.watch_media_roots(&app.config().media_roots) {
        tracing::warn!(error = %e, "media roots not watched; hotplug limited to restarts");
    }

    let host = ConsoleHost::stdio().with_admin(Admin::new(Arc::clone(&app)));
    let registry = Arc::clone(app.registry());
    let options = app.config().driver_options();
    let served = tokio::task::spawn_blocking(move || {
        registry.mount_primary_filesystem(&host, options)
    })
    .await
    .context("drive host task failed")?;

    monitor.shutdown().await;
    served.context("primary filesystem")?;
    Ok(())
}

fn cmd_volumes(app: &Arc<Bagfs>) -> ExitCode {
    app.load();
    print!("{}", Admin::new(Arc::clone(app)).volumes());
    ExitCode::SUCCESS
}

/// Load the bags, run one admin command, print its output.
fn cmd_admin<F>(app: &Arc<Bagfs>, command: F) -> ExitCode
where
    F: FnOnce(&Admin) -> AdminResult,
{
    app.load();
    match command(&Admin::new(Arc::clone(app))) {
        Ok(text) => {
            print!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
