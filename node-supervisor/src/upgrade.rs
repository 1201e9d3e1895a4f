use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Written by the daemon into `data/upgrade-info.json` when it halts for an upgrade.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UpgradeInfo {
    pub name: String,
    #[serde(default)]
    pub height: i64,
    #[serde(default)]
    pub info: String,
}

impl UpgradeInfo {
    /// An empty expected name accepts any requested upgrade.
    pub fn matches(&self, expected: &str) -> bool {
        !self.name.is_empty() && (expected.is_empty() || self.name == expected)
    }
}

/// Source of "an upgrade named X was requested" notifications.
pub trait UpgradeWatcher: Send {
    /// Resolves at most once, when an upgrade matching `name` is observed.
    /// A dropped sender means the watcher stopped without observing one.
    fn monitor_update(&mut self, name: &str) -> oneshot::Receiver<UpgradeInfo>;

    /// Looks for a matching upgrade right now, without waiting for the next poll.
    fn check_update(&mut self, name: &str) -> Option<UpgradeInfo>;

    /// Releases whatever `monitor_update` started.
    fn stop(&mut self);
}

/// One write of the upgrade info file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ArtifactVersion {
    modified: Option<SystemTime>,
    contents: Vec<u8>,
}

/// Polls the upgrade info file every `poll_interval`.
///
/// Each version of the file is reported at most once: the version present when the watcher is built
/// and any version already reported count as handled, so a file left behind by a finished upgrade
/// does not stop the next binary.
pub struct UpgradeFileWatcher {
    path: PathBuf,
    poll_interval: Duration,
    handled: Arc<Mutex<Option<ArtifactVersion>>>,
    task: Option<JoinHandle<()>>,
}

impl UpgradeFileWatcher {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        let path = path.into();
        let handled = read_artifact(&path);
        if handled.is_some() {
            tracing::debug!("ignoring upgrade info already present in {}", path.display());
        }
        UpgradeFileWatcher {
            path,
            poll_interval,
            handled: Arc::new(Mutex::new(handled)),
            task: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl UpgradeWatcher for UpgradeFileWatcher {
    fn monitor_update(&mut self, name: &str) -> oneshot::Receiver<UpgradeInfo> {
        self.stop();

        let (mut tx, rx) = oneshot::channel();
        let path = self.path.clone();
        let name = name.to_owned();
        let poll_interval = self.poll_interval;
        let handled = self.handled.clone();

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    // nobody is waiting for the notification anymore
                    _ = tx.closed() => return,
                }
                if let Some(info) = take_new_upgrade(&path, &name, &handled) {
                    tracing::debug!("upgrade {:?} found in {}", info.name, path.display());
                    tx.send(info).ok();
                    return;
                }
            }
        }));
        rx
    }

    fn check_update(&mut self, name: &str) -> Option<UpgradeInfo> {
        take_new_upgrade(&self.path, name, &self.handled)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for UpgradeFileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns the upgrade if the file holds a matching one that was not reported yet, and marks it reported.
fn take_new_upgrade(
    path: &Path,
    name: &str,
    handled: &Mutex<Option<ArtifactVersion>>,
) -> Option<UpgradeInfo> {
    let version = read_artifact(path)?;
    let mut handled = handled.lock().unwrap_or_else(|e| e.into_inner());
    if handled.as_ref() == Some(&version) {
        return None;
    }
    let info = parse_upgrade_info(path, &version.contents).filter(|info| info.matches(name))?;
    *handled = Some(version);
    Some(info)
}

/// A missing file is the normal case, anything else unreadable is worth a warning.
fn read_artifact(path: &Path) -> Option<ArtifactVersion> {
    let read = std::fs::read(path).and_then(|contents| {
        let modified = std::fs::metadata(path)?.modified().ok();
        Ok(ArtifactVersion { modified, contents })
    });
    match read {
        Ok(version) => Some(version),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            tracing::warn!("failed to read upgrade info {}: {err}", path.display());
            None
        }
    }
}

fn parse_upgrade_info(path: &Path, contents: &[u8]) -> Option<UpgradeInfo> {
    match serde_json::from_slice(contents) {
        Ok(info) => Some(info),
        Err(err) => {
            tracing::warn!("failed to parse upgrade info {}: {err}", path.display());
            None
        }
    }
}
