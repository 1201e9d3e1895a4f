use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Everything that can end a [`crate::Launcher::run`] without a restart.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("current binary {path:?} is invalid: {reason}")]
    InvalidBinary { path: PathBuf, reason: String },

    #[error("launching process {path:?} {args} failed: {source}")]
    Spawn {
        path: PathBuf,
        args: String,
        source: std::io::Error,
    },

    #[error("{0} of the child process was not piped")]
    Pipe(&'static str),

    #[error("child process exited with {0}")]
    ChildExit(ExitStatus),

    #[error("failed to wait for the child process: {0}")]
    Wait(std::io::Error),

    #[error("error while taking data backup of {src:?} into {dst:?}: {source}")]
    Backup {
        src: PathBuf,
        dst: PathBuf,
        source: std::io::Error,
    },
}
