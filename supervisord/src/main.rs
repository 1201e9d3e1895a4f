use anyhow::{Context, Result};
use clap::Parser;
use node_supervisor::{Config, Launcher, RunOutcome, SignalSubscription, SupervisionRequest};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Exit code telling the service manager that the binary must be swapped before starting again.
const RESTART_REQUIRED_EXIT_CODE: u8 = 3;

#[derive(clap::ValueEnum, Clone, Copy)]
pub enum LogFormat {
    Human,
    Json,
}

/// Runs a node daemon and stops it when it requests an upgrade.
#[derive(Parser, Clone)]
#[clap()]
pub struct ConfigOpts {
    #[arg(long, value_enum, default_value = "human")]
    pub log_format: LogFormat,

    /// Home directory of the daemon.
    #[arg(long, env = "DAEMON_HOME")]
    pub home: PathBuf,

    /// Name of the daemon executable under `<home>/cosmovisor/current/bin`.
    #[arg(long, env = "DAEMON_NAME")]
    pub name: String,

    /// Upgrade to stop the daemon for. Empty accepts any upgrade.
    #[arg(long, env = "DAEMON_UPGRADE_NAME", default_value = "")]
    pub upgrade_name: String,

    /// How often to look for the upgrade info file, in milliseconds.
    #[arg(long, env = "DAEMON_POLL_INTERVAL", default_value = "300")]
    pub poll_interval_ms: u64,

    /// Do not back up `<home>/data` before an upgrade.
    #[arg(long, env = "UNSAFE_SKIP_BACKUP")]
    pub unsafe_skip_backup: bool,

    /// Arguments passed to the daemon.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl ConfigOpts {
    fn config(&self) -> Config {
        Config::new(&self.home, &self.name)
            .with_upgrade_name(&self.upgrade_name)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_unsafe_skip_backup(self.unsafe_skip_backup)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let opts = ConfigOpts::parse();
    let _guard = init_tracing(opts.log_format);

    match supervise(opts).await {
        Ok(RunOutcome::Exited) => ExitCode::SUCCESS,
        Ok(RunOutcome::RestartRequired(info)) => {
            tracing::info!(
                "upgrade {:?} at height {} requires a new binary, restart once it is in place",
                info.name,
                info.height
            );
            ExitCode::from(RESTART_REQUIRED_EXIT_CODE)
        }
        Err(err) => {
            tracing::error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn supervise(opts: ConfigOpts) -> Result<RunOutcome> {
    let config = opts.config();
    let bin = config.current_bin();

    // Subscribe before the daemon exists so a shutdown request can never be missed.
    let signals = SignalSubscription::os().context("failed to subscribe to SIGQUIT/SIGTERM")?;
    let mut launcher = Launcher::new(config, signals);

    let outcome = launcher
        .run(SupervisionRequest::new(bin).with_args(opts.args))
        .await
        .context("daemon run failed")?;
    Ok(outcome)
}

pub fn init_tracing(format: LogFormat) -> WorkerGuard {
    let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking);

    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Human => builder.init(),
    }

    guard
}
