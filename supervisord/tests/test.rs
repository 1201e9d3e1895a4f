use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use node_supervisor::bin_path;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

fn home_with_daemon(body: &str) -> tempfile::TempDir {
    let home = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(home.path().join("data")).unwrap();
    std::fs::write(home.path().join("data").join("genesis.json"), "{}").unwrap();
    install_daemon(home.path(), body);
    home
}

fn install_daemon(home: &Path, body: &str) {
    let bin_dir = home.join("cosmovisor/current/bin");
    std::fs::create_dir_all(&bin_dir).unwrap();
    let bin = bin_dir.join("simd");
    std::fs::write(&bin, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn upgrade_info(home: &Path) -> PathBuf {
    home.join("data").join("upgrade-info.json")
}

fn backups(home: &Path) -> usize {
    std::fs::read_dir(home)
        .unwrap()
        .filter(|entry| {
            entry
                .as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .starts_with("data-backup-")
        })
        .count()
}

fn supervisord(home: &Path, args: &[&str]) -> Command {
    let mut command = Command::new(bin_path!("supervisord"));
    command
        .env("DAEMON_HOME", home)
        .env("DAEMON_NAME", "simd")
        .env("DAEMON_UPGRADE_NAME", "v2")
        .env("DAEMON_POLL_INTERVAL", "50")
        .env_remove("UNSAFE_SKIP_BACKUP")
        .arg("--")
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command
}

async fn finish(command: &mut Command) -> Output {
    timeout(Duration::from_secs(30), command.output())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_daemon_exits_cleanly() {
    let home = home_with_daemon("echo \"simd $1\"");

    let output = finish(&mut supervisord(home.path(), &["version"])).await;

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("simd version"), "{stdout}");
    assert_eq!(backups(home.path()), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_daemon_failure() {
    let home = home_with_daemon("exit 5");

    let output = finish(&mut supervisord(home.path(), &["start"])).await;

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("daemon run failed"), "{stdout}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_binary() {
    let home = tempfile::tempdir().unwrap();

    let output = finish(&mut supervisord(home.path(), &["start"])).await;

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is invalid"), "{stdout}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_requires_restart() {
    let home = home_with_daemon("exit 1");
    // halt like a chain reaching the upgrade height: write the upgrade info, then crash
    install_daemon(
        home.path(),
        &format!(
            "echo '{{\"name\":\"v2\",\"height\":30}}' > {}\nexit 1",
            upgrade_info(home.path()).display()
        ),
    );

    let output = finish(&mut supervisord(home.path(), &["start"])).await;

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(backups(home.path()), 1);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("requires a new binary"), "{stdout}");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upgrade_without_backup() {
    let home = home_with_daemon("exit 1");
    install_daemon(
        home.path(),
        &format!(
            "echo '{{\"name\":\"v2\"}}' > {}\nexec sleep 60",
            upgrade_info(home.path()).display()
        ),
    );

    let output = finish(
        supervisord(home.path(), &["start"]).env("UNSAFE_SKIP_BACKUP", "true"),
    )
    .await;

    assert_eq!(output.status.code(), Some(3));
    assert_eq!(backups(home.path()), 0);
}

// Left behind by an upgrade handled before this supervisor started.
#[tokio::test(flavor = "multi_thread")]
async fn test_leftover_upgrade_info_is_ignored() {
    let home = home_with_daemon("sleep 0.5");
    std::fs::write(upgrade_info(home.path()), r#"{"name":"v2","height":30}"#).unwrap();

    let output = finish(&mut supervisord(home.path(), &["start"])).await;

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(backups(home.path()), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sigterm_reaches_daemon() {
    let ready_dir = tempfile::tempdir().unwrap();
    let ready = ready_dir.path().join("ready");
    let home = home_with_daemon(&format!(
        "trap 'echo daemon stopping; exit 0' TERM\ntouch {}\nwhile true; do sleep 0.1; done",
        ready.display()
    ));

    let mut child = supervisord(home.path(), &["start"]).spawn().unwrap();
    timeout(Duration::from_secs(30), async {
        while !ready.exists() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    kill(Pid::from_raw(child.id().unwrap() as i32), Signal::SIGTERM).unwrap();
    let output = timeout(Duration::from_secs(30), child.wait_with_output())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("daemon stopping"), "{stdout}");
}
