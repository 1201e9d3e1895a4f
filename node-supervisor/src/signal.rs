use nix::sys::signal::Signal;
use nix::unistd::Pid;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;

/// The shutdown requests a [`crate::Launcher`] relays to its child.
///
/// Owned by the launcher instead of being registered process wide,
/// so several launchers can coexist in one process without stealing each others signals.
pub struct SignalSubscription {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<Signal>>>,
    listener: Option<JoinHandle<()>>,
    relay_failure: Arc<dyn Fn(String) + Send + Sync>,
    armed_before: bool,
}

impl SignalSubscription {
    /// Subscribe to SIGQUIT and SIGTERM sent to this process.
    /// Must be called from within a tokio runtime.
    pub fn os() -> std::io::Result<Self> {
        // Register right away instead of inside the spawned task,
        // otherwise a signal arriving before tokio gets around to running the task would kill us.
        let mut quit = signal(SignalKind::quit())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let (tx, rx) = mpsc::unbounded_channel();

        let listener = tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    Some(()) = quit.recv() => Signal::SIGQUIT,
                    Some(()) = terminate.recv() => Signal::SIGTERM,
                    else => return,
                };
                tracing::info!("received {received:?}");
                if tx.send(received).is_err() {
                    return;
                }
            }
        });

        Ok(SignalSubscription {
            rx: Arc::new(Mutex::new(rx)),
            listener: Some(listener),
            relay_failure: Arc::new(exit_supervisor),
            armed_before: false,
        })
    }

    /// A subscription fed by hand through the returned sender.
    pub fn channel() -> (mpsc::UnboundedSender<Signal>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            SignalSubscription {
                rx: Arc::new(Mutex::new(rx)),
                listener: None,
                relay_failure: Arc::new(exit_supervisor),
                armed_before: false,
            },
        )
    }

    /// Replaces what happens when a signal cannot be relayed, which is to exit the supervisor.
    #[cfg(test)]
    pub(crate) fn on_relay_failure(
        mut self,
        handler: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        self.relay_failure = Arc::new(handler);
        self
    }

    /// Takes the receiver for one run.
    ///
    /// Signals left over from a previous run are dropped, they were meant for a process that is gone.
    /// Signals received before the first run are kept for its daemon.
    /// Waits for the relay of the previous run to let go of the receiver.
    pub(crate) async fn arm(&mut self) -> ArmedRelay {
        let mut rx = self.rx.clone().lock_owned().await;
        if self.armed_before {
            while let Ok(stale) = rx.try_recv() {
                tracing::warn!("dropping {stale:?}, it arrived after the previous daemon was gone");
            }
        }
        self.armed_before = true;
        ArmedRelay {
            rx,
            relay_failure: self.relay_failure.clone(),
        }
    }
}

/// Exclusive access to the subscription for the duration of one run.
pub(crate) struct ArmedRelay {
    rx: OwnedMutexGuard<mpsc::UnboundedReceiver<Signal>>,
    relay_failure: Arc<dyn Fn(String) + Send + Sync>,
}

impl ArmedRelay {
    /// Forward the next received signal to `pid`.
    ///
    /// Only one signal is relayed, later ones are consumed until the returned task is aborted once the child is gone.
    /// Failing to relay exits the whole supervisor: the child could be left running with nobody able to stop it.
    pub(crate) fn relay_to(mut self, pid: Pid, bin: PathBuf) -> JoinHandle<()> {
        tokio::spawn(async move {
            let Some(received) = self.rx.recv().await else {
                return;
            };
            tracing::info!("relaying {received:?} to {} (pid {pid})", bin.display());
            if let Err(err) = nix::sys::signal::kill(pid, received) {
                (self.relay_failure)(format!(
                    "{} terminated. Failed to relay {received:?}: {err}",
                    bin.display()
                ));
                return;
            }
            while let Some(ignored) = self.rx.recv().await {
                tracing::info!(
                    "ignoring {ignored:?}, {received:?} was already relayed to {}",
                    bin.display()
                );
            }
        })
    }
}

fn exit_supervisor(message: String) {
    tracing::error!("{message}");
    // The non blocking log writer is not flushed by process::exit.
    eprintln!("{message}");
    std::process::exit(1);
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
