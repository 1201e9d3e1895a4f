use crate::config::Config;
use crate::error::LaunchError;
use chrono::Local;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Copies `<home>/data` next to itself unless backups are disabled.
/// Returns the destination when a backup was taken.
///
/// Must only be called once the daemon has been reaped.
pub async fn do_backup(config: &Config) -> Result<Option<PathBuf>, LaunchError> {
    if config.unsafe_skip_backup {
        tracing::debug!("backup of the data directory skipped");
        return Ok(None);
    }

    let src = config.data_dir();
    let dst = backup_destination(&config.home);
    let copied = {
        let (src, dst) = (src.clone(), dst.clone());
        tokio::task::spawn_blocking(move || copy_dir(&src, &dst)).await
    };
    match copied {
        Ok(result) => result?,
        Err(join_err) => {
            return Err(LaunchError::Backup {
                src,
                dst,
                source: std::io::Error::other(join_err),
            })
        }
    }

    tracing::info!("backup saved at {}", dst.display());
    Ok(Some(dst))
}

/// `data-backup-<date>T<time>`, with a numeric suffix when that name is already taken.
fn backup_destination(home: &Path) -> PathBuf {
    let stamp = Local::now().format("%Y-%m-%dT%H-%M-%S");
    let base = home.join(format!("data-backup-{stamp}"));
    if !base.exists() {
        return base;
    }
    (1..)
        .map(|n| home.join(format!("data-backup-{stamp}-{n}")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(base)
}

/// Copies the directory tree at `src` into `dst`, creating `dst`.
/// Stops at the first entry that cannot be copied.
pub fn copy_dir(src: &Path, dst: &Path) -> Result<(), LaunchError> {
    let fail = |source: std::io::Error| LaunchError::Backup {
        src: src.to_path_buf(),
        dst: dst.to_path_buf(),
        source,
    };

    if !src.is_dir() {
        return Err(fail(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", src.display()),
        )));
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| fail(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| fail(std::io::Error::other(e)))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(fail)?;
        } else if file_type.is_symlink() {
            let link = std::fs::read_link(entry.path()).map_err(fail)?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(link, &target).map_err(fail)?;
            #[cfg(not(unix))]
            std::fs::copy(entry.path().parent().unwrap_or(src).join(link), &target)
                .map_err(fail)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(fail)?;
        }
    }
    Ok(())
}
