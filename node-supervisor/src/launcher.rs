use crate::backup::do_backup;
use crate::config::{ensure_binary, Config};
use crate::error::LaunchError;
use crate::result_box::{Outcome, ResultBox};
use crate::signal::SignalSubscription;
use crate::upgrade::{UpgradeFileWatcher, UpgradeInfo, UpgradeWatcher};
use itertools::Itertools;
use nix::unistd::Pid;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// What to run for one [`Launcher::run`] and where its output goes.
///
/// Output goes to the supervisor's own stdout and stderr unless replaced.
pub struct SupervisionRequest {
    bin: PathBuf,
    args: Vec<String>,
    stdout: Sink,
    stderr: Sink,
}

impl SupervisionRequest {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        SupervisionRequest {
            bin: bin.into(),
            args: vec![],
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_stdout(mut self, stdout: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stdout = Box::new(stdout);
        self
    }

    pub fn with_stderr(mut self, stderr: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        self.stderr = Box::new(stderr);
        self
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The daemon exited cleanly by itself. Do not run it again.
    Exited,
    /// The daemon was stopped for this upgrade and its data backed up.
    /// The binary has to be swapped before running again.
    RestartRequired(UpgradeInfo),
}

impl RunOutcome {
    pub fn needs_restart(&self) -> bool {
        matches!(self, RunOutcome::RestartRequired(_))
    }
}

/// Runs the daemon until it exits or until it has to be stopped for an upgrade.
pub struct Launcher {
    config: Config,
    watcher: Box<dyn UpgradeWatcher>,
    signals: SignalSubscription,
}

impl Launcher {
    /// Watches the upgrade info file in the daemon's data directory.
    pub fn new(config: Config, signals: SignalSubscription) -> Self {
        let watcher =
            UpgradeFileWatcher::new(config.upgrade_info_file_path(), config.poll_interval);
        Launcher::with_watcher(config, signals, watcher)
    }

    pub fn with_watcher(
        config: Config,
        signals: SignalSubscription,
        watcher: impl UpgradeWatcher + 'static,
    ) -> Self {
        Launcher {
            config,
            watcher: Box::new(watcher),
            signals,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the daemon and return once it is gone, either because it died
    /// or because it was killed for an upgrade *and* its data was backed up.
    ///
    /// * `Ok(RunOutcome::Exited)` the daemon exited with success, common for short lived commands like `simd version`.
    /// * `Ok(RunOutcome::RestartRequired(_))` swap the binary and call `run` again.
    /// * `Err(_)` the daemon could not be started, failed on its own, or the backup failed.
    pub async fn run(&mut self, request: SupervisionRequest) -> Result<RunOutcome, LaunchError> {
        let SupervisionRequest {
            bin,
            args,
            stdout,
            stderr,
        } = request;

        ensure_binary(&bin)?;
        let armed = self.signals.arm().await;
        tracing::info!("running {} {}", bin.display(), args.iter().join(" "));

        let mut child = Command::new(&bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: bin.clone(),
                args: args.iter().join(" "),
                source,
            })?;

        let output = OutputForwarders {
            tasks: vec![
                forward(
                    child.stdout.take().ok_or(LaunchError::Pipe("stdout"))?,
                    stdout,
                    "stdout",
                ),
                forward(
                    child.stderr.take().ok_or(LaunchError::Pipe("stderr"))?,
                    stderr,
                    "stderr",
                ),
            ],
        };

        // Only the pid is shared, the relay can signal the child but never reap it.
        let relay = child
            .id()
            .map(|pid| armed.relay_to(Pid::from_raw(pid as i32), bin.clone()));

        let outcome = self.wait_for_upgrade_or_exit(&mut child, output).await;

        if let Some(relay) = relay {
            relay.abort();
            // hands the receiver back for the next run
            relay.await.ok();
        }

        match outcome {
            Outcome::Upgrade(info) => {
                do_backup(&self.config).await?;
                Ok(RunOutcome::RestartRequired(info))
            }
            Outcome::Error(err) => Err(err),
            Outcome::None => Ok(RunOutcome::Exited),
        }
    }

    /// Races the child exiting against the watcher seeing the expected upgrade.
    /// When this returns the child has been reaped.
    ///
    /// * [`Outcome::Upgrade`] the upgrade won and the child was killed,
    ///   or the child failed while the upgrade was already requested.
    /// * [`Outcome::Error`] the child failed on its own.
    /// * [`Outcome::None`] the child exited with success.
    async fn wait_for_upgrade_or_exit(
        &mut self,
        child: &mut Child,
        output: OutputForwarders,
    ) -> Outcome {
        let upgrade_name = self.config.upgrade_name.clone();
        let decided = ResultBox::new();
        let mut upgrade = self.watcher.monitor_update(&upgrade_name);

        let exited = tokio::select! {
            status = child.wait() => Some(status),
            // a closed channel means the watcher gave up, keep waiting on the child
            Ok(info) = &mut upgrade => {
                tracing::info!("upgrade {:?} requested, stopping the daemon", info.name);
                decided.try_set(Outcome::Upgrade(info));
                None
            }
        };

        match exited {
            None => {
                self.watcher.stop();
                if let Err(err) = child.start_kill() {
                    // the child is expected to be dying already
                    tracing::warn!("failed to kill the daemon for the upgrade: {err}");
                }
                // Reap before anything touches the data directory.
                let late = exit_outcome(child.wait().await);
                if !decided.try_set(late) {
                    tracing::debug!("discarding exit of the daemon killed for the upgrade");
                }
                // forwarders finish once every holder of the pipes is gone
                drop(output);
            }
            Some(status) => {
                drop(upgrade);
                self.watcher.stop();
                output.join().await;

                match exit_outcome(status) {
                    Outcome::Error(err) => {
                        // The daemon panics on purpose right after writing the upgrade info,
                        // possibly before the watcher polled it.
                        match self.watcher.check_update(&upgrade_name) {
                            Some(info) => {
                                tracing::info!(
                                    "daemon exited for upgrade {:?}: {err}",
                                    info.name
                                );
                                decided.try_set(Outcome::Upgrade(info));
                            }
                            None => {
                                decided.try_set(Outcome::Error(err));
                            }
                        }
                    }
                    outcome => {
                        decided.try_set(outcome);
                    }
                }
            }
        }

        decided.into_outcome()
    }
}

fn exit_outcome(status: io::Result<ExitStatus>) -> Outcome {
    match status {
        Ok(status) if status.success() => Outcome::None,
        Ok(status) => Outcome::Error(LaunchError::ChildExit(status)),
        Err(err) => Outcome::Error(LaunchError::Wait(err)),
    }
}

struct OutputForwarders {
    tasks: Vec<JoinHandle<()>>,
}

impl OutputForwarders {
    async fn join(self) {
        for task in self.tasks {
            task.await.ok();
        }
    }
}

fn forward<R>(mut reader: R, mut sink: Sink, stream: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = tokio::io::copy(&mut reader, &mut sink).await {
            tracing::warn!("failed to forward {stream} of the daemon: {err}");
        }
        sink.flush().await.ok();
    })
}
