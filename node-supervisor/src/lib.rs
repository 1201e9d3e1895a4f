//! Supervises a node daemon running as a child process and stops it safely when it requests an upgrade.
//!
//! A [`Launcher`] starts the daemon, forwards its output, relays SIGQUIT/SIGTERM received by the supervisor to it,
//! and watches for the upgrade info file the daemon writes when it reaches an upgrade height.
//! Once the expected upgrade is requested the daemon is killed, its data directory is backed up
//! and [`RunOutcome::RestartRequired`] tells the caller to swap the binary and run again.
//!
//! ```rust,no_run
//! use node_supervisor::{Config, Launcher, RunOutcome, SignalSubscription, SupervisionRequest};
//! use std::time::Duration;
//!
//! # async fn supervise() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new("/data/home", "simd")
//!     .with_upgrade_name("v2")
//!     .with_poll_interval(Duration::from_secs(1));
//! let bin = config.current_bin();
//! let mut launcher = Launcher::new(config, SignalSubscription::os()?);
//!
//! let request = SupervisionRequest::new(bin).with_args(vec!["start".to_owned()]);
//! match launcher.run(request).await? {
//!     RunOutcome::Exited => println!("daemon exited"),
//!     RunOutcome::RestartRequired(info) => println!("swap the binary for {}", info.name),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! A daemon that crashes right after requesting the upgrade, before the watcher noticed, is still treated as an upgrade:
//! the upgrade info file is checked one last time whenever the daemon fails.
mod backup;
mod config;
mod error;
mod launcher;
mod result_box;
mod signal;
mod upgrade;

pub use backup::{copy_dir, do_backup};
pub use config::{ensure_binary, Config, DEFAULT_POLL_INTERVAL};
pub use error::LaunchError;
pub use launcher::{Launcher, RunOutcome, SupervisionRequest};
pub use result_box::{Outcome, ResultBox};
pub use signal::SignalSubscription;
pub use upgrade::{UpgradeFileWatcher, UpgradeInfo, UpgradeWatcher};

/// When called from within an integration test or benchmark, returns the path to the binary with the specified crate name in the current package.
///
/// Handy to point a [`SupervisionRequest`] at a stand-in daemon built alongside the tests.
#[macro_export]
macro_rules! bin_path {
    ($bin_name:expr) => {
        std::path::PathBuf::from(std::env!(concat!("CARGO_BIN_EXE_", $bin_name)))
    };
}
