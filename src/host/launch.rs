//! Host process launch
//!
//! Used when the control socket cannot be reached and the operator has
//! opted in to automatic host restarts. The spawn is detached: the host
//! outlives the supervisor, and the supervisor never waits on it.
//!
//! All process work is argv-form only. Config-supplied strings (executable
//! path, process name) are bound as discrete arguments, never interpolated
//! into a shell line.

use crate::config::HostConfig;
use crate::error::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use tracing::{debug, info};

/// Launch the host executable unless its process image is already running.
///
/// Returns `Ok(true)` when a process was spawned, `Ok(false)` when the
/// already-running check short-circuited the launch.
pub async fn launch_host(config: &HostConfig) -> Result<bool> {
    if config.executable.is_empty() {
        return Err(Error::InvalidState("no host executable configured".to_string()));
    }

    if is_process_running(&config.process_name).await {
        return Ok(false);
    }

    clear_crash_sentinel(config).await;

    let executable = Path::new(&config.executable);
    let install_dir = executable.parent().unwrap_or_else(|| Path::new("."));

    info!("Launching host process: {}", executable.display());
    let mut command = tokio::process::Command::new(executable);
    command
        .arg("--disable-shutdown-check")
        .current_dir(install_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let child = command.spawn()?;
    // Detached by design: dropping the handle leaves the host running.
    drop(child);
    Ok(true)
}

/// Image-name liveness probe over the OS process table
async fn is_process_running(process_name: &str) -> bool {
    if process_name.is_empty() {
        return false;
    }
    let name = process_name.to_string();
    tokio::task::spawn_blocking(move || {
        let sys = sysinfo::System::new_all();
        let found = sys.processes_by_name(std::ffi::OsStr::new(&name)).next().is_some();
        found
    })
    .await
    .unwrap_or(false)
}

/// Remove the host's crash sentinel so it does not boot into safe mode
async fn clear_crash_sentinel(config: &HostConfig) {
    if config.crash_sentinel.is_empty() {
        return;
    }
    match tokio::fs::remove_file(&config.crash_sentinel).await {
        Ok(()) => debug!("Cleared crash sentinel {}", config.crash_sentinel),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!("Crash sentinel cleanup failed: {}", e),
    }
}
