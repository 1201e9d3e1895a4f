use crate::error::LaunchError;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Values the supervisor needs from the operator.
/// How they are loaded is up to the caller, `supervisord` reads them from flags and env vars.
#[derive(Debug, Clone)]
pub struct Config {
    /// Home directory of the daemon, contains `data/` and the `cosmovisor/` binary tree.
    pub home: PathBuf,
    /// File name of the daemon executable.
    pub daemon_name: String,
    /// Name of the upgrade that, once requested, stops the current binary.
    pub upgrade_name: String,
    pub poll_interval: Duration,
    /// Skip the data backup before restarting for an upgrade.
    pub unsafe_skip_backup: bool,
}

impl Config {
    pub fn new(home: impl Into<PathBuf>, daemon_name: impl Into<String>) -> Self {
        Config {
            home: home.into(),
            daemon_name: daemon_name.into(),
            upgrade_name: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            unsafe_skip_backup: false,
        }
    }

    pub fn with_upgrade_name(mut self, upgrade_name: impl Into<String>) -> Self {
        self.upgrade_name = upgrade_name.into();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_unsafe_skip_backup(mut self, skip: bool) -> Self {
        self.unsafe_skip_backup = skip;
        self
    }

    pub fn data_dir(&self) -> PathBuf {
        self.home.join("data")
    }

    /// The artifact the daemon writes when it halts for an upgrade.
    pub fn upgrade_info_file_path(&self) -> PathBuf {
        self.data_dir().join("upgrade-info.json")
    }

    /// The executable the `current` link points at.
    pub fn current_bin(&self) -> PathBuf {
        self.home
            .join("cosmovisor")
            .join("current")
            .join("bin")
            .join(&self.daemon_name)
    }
}

/// Checks that `path` is a regular file that can be executed.
pub fn ensure_binary(path: &Path) -> Result<(), LaunchError> {
    let invalid = |reason: String| LaunchError::InvalidBinary {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path).map_err(|e| invalid(e.to_string()))?;
    if !metadata.is_file() {
        return Err(invalid("not a regular file".to_owned()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(invalid(format!(
                "not executable, mode is {:o}",
                metadata.permissions().mode() & 0o777
            )));
        }
    }

    Ok(())
}
