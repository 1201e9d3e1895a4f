//! Stand-in for a node daemon, driven by the integration tests of the supervisor.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(clap::ValueEnum, Clone, Copy)]
pub enum LogFormat {
    Human,
    Json,
}

#[derive(clap::ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Serve until SIGINT or SIGTERM.
    Standard,
    /// Print a version and exit with success.
    Version,
    /// Exit with a failure, no upgrade involved.
    Crash,
    /// Write the upgrade info and immediately panic, like a chain halting at an upgrade height.
    HaltForUpgrade,
    /// Keep serving and write the upgrade info after `--upgrade-delay-ms`.
    RequestUpgrade,
}

#[derive(Parser, Clone)]
#[clap()]
pub struct ConfigOpts {
    #[arg(long, value_enum, default_value = "human")]
    pub log_format: LogFormat,

    #[arg(long, value_enum, default_value = "standard")]
    pub mode: Mode,

    #[arg(long)]
    pub home: Option<PathBuf>,

    #[arg(long, default_value = "v2")]
    pub upgrade_name: String,

    #[arg(long, default_value = "100")]
    pub upgrade_delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opts = ConfigOpts::parse();
    let _guard = init_tracing(opts.log_format);

    tracing::info!("Initializing!");

    // We need to block on this part to ensure that we immediately register these signals.
    // Otherwise if we included signal creation in the below spawned task we would be at the mercy of whenever tokio decides to start running the task.
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (trigger_shutdown_tx, trigger_shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::select! {
            _ = interrupt.recv() => {
                tracing::info!("received SIGINT");
            },
            _ = terminate.recv() => {
                tracing::info!("received SIGTERM");
            },
        };

        trigger_shutdown_tx.send(true).ok();
    });

    match opts.mode {
        Mode::Version => {
            println!("fake-node 0.1.0");
            Ok(())
        }
        Mode::Crash => anyhow::bail!("database is corrupt"),
        Mode::HaltForUpgrade => {
            let home = opts.home.context("--home is required to request an upgrade")?;
            write_upgrade_info(&home, &opts.upgrade_name)?;
            panic!("UPGRADE {:?} NEEDED at height: 100", opts.upgrade_name);
        }
        Mode::RequestUpgrade => {
            let home = opts.home.context("--home is required to request an upgrade")?;
            let upgrade_name = opts.upgrade_name.clone();
            let delay = Duration::from_millis(opts.upgrade_delay_ms);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(err) = write_upgrade_info(&home, &upgrade_name) {
                    tracing::error!("{err:?}");
                }
            });
            node_logic(trigger_shutdown_rx).await;
            Ok(())
        }
        Mode::Standard => {
            node_logic(trigger_shutdown_rx).await;
            Ok(())
        }
    }
}

pub fn init_tracing(format: LogFormat) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let builder = tracing_subscriber::fmt().with_writer(non_blocking);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Human => builder.init(),
    }

    guard
}

fn write_upgrade_info(home: &Path, name: &str) -> Result<()> {
    let path = home.join("data").join("upgrade-info.json");
    let info = serde_json::json!({ "name": name, "height": 100, "info": "" });
    std::fs::write(&path, info.to_string())
        .with_context(|| format!("failed to write {}", path.display()))?;
    tracing::info!("upgrade {name:?} requested");
    Ok(())
}

async fn node_logic(mut trigger_shutdown_rx: watch::Receiver<bool>) {
    tracing::info!("accepting inbound connections");

    tracing::info!("some functionality occurs");

    trigger_shutdown_rx.changed().await.ok();
}
