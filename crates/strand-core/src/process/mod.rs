//! Background process management
//!
//! Tracks background processes started by tools so they survive across turns
//! and across save/load. Persisted descriptors are re-attached by PID.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::constants;

/// Persisted form of a background process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundProcess {
    pub pid: u32,
    pub command: String,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    pub start_time: DateTime<Utc>,
}

/// Status of a tracked process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    Running,
    Exited { exit_code: i32 },
    Failed { error: String },
    Killed,
}

struct ProcessEntry {
    descriptor: BackgroundProcess,
    status: ProcessStatus,
    /// Keep handle alive to prevent task cancellation
    _handle: Option<tokio::task::JoinHandle<()>>,
}

/// Registry of background processes keyed by PID
#[derive(Clone, Default)]
pub struct ProcessRegistry {
    processes: Arc<RwLock<HashMap<u32, ProcessEntry>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `command` through the shell in its own process group.
    ///
    /// Output goes to `log_path` when given, otherwise it is discarded.
    pub async fn spawn(
        &self,
        command: String,
        working_dir: PathBuf,
        log_path: Option<PathBuf>,
    ) -> Result<BackgroundProcess> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        // New process group so the whole tree can be signalled
        #[cfg(unix)]
        {
            #[allow(unused_imports)]
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        cmd.current_dir(&working_dir);

        match &log_path {
            Some(path) => {
                let file = std::fs::File::create(path)
                    .with_context(|| format!("Failed to create log file {}", path.display()))?;
                let stderr = file.try_clone()?;
                cmd.stdout(file).stderr(stderr);
            }
            None => {
                cmd.stdout(std::process::Stdio::null());
                cmd.stderr(std::process::Stdio::null());
            }
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn background command: {}", command))?;
        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("Spawned process exited before reporting a PID"))?;

        let descriptor = BackgroundProcess {
            pid,
            command: command.clone(),
            log_path,
            start_time: Utc::now(),
        };

        tracing::info!(pid, command = %command, "Background process spawned");

        let registry = self.clone();
        let handle = tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => ProcessStatus::Exited {
                    exit_code: status.code().unwrap_or(-1),
                },
                Err(e) => ProcessStatus::Failed {
                    error: e.to_string(),
                },
            };
            registry.update_status(pid, status).await;
        });

        let entry = ProcessEntry {
            descriptor: descriptor.clone(),
            status: ProcessStatus::Running,
            _handle: Some(handle),
        };
        self.processes.write().await.insert(pid, entry);

        Ok(descriptor)
    }

    /// Track a process started elsewhere
    pub async fn register(&self, descriptor: BackgroundProcess) {
        let pid = descriptor.pid;
        let entry = ProcessEntry {
            descriptor,
            status: ProcessStatus::Running,
            _handle: None,
        };
        self.processes.write().await.insert(pid, entry);
        tracing::info!(pid, "External process registered");
    }

    /// Re-handle a persisted process if it is still alive
    pub async fn reattach(&self, descriptor: BackgroundProcess) -> Result<()> {
        if !is_process_alive(descriptor.pid) {
            bail!("Process {} is no longer running", descriptor.pid);
        }
        self.register(descriptor).await;
        Ok(())
    }

    /// Descriptors of processes still believed to be running
    pub async fn running(&self) -> Vec<BackgroundProcess> {
        let mut running: Vec<BackgroundProcess> = self
            .processes
            .read()
            .await
            .values()
            .filter(|e| e.status == ProcessStatus::Running)
            .map(|e| e.descriptor.clone())
            .collect();
        running.sort_by_key(|p| p.start_time);
        running
    }

    pub async fn status(&self, pid: u32) -> Option<ProcessStatus> {
        self.processes
            .read()
            .await
            .get(&pid)
            .map(|e| e.status.clone())
    }

    pub async fn update_status(&self, pid: u32, status: ProcessStatus) {
        if let Some(entry) = self.processes.write().await.get_mut(&pid) {
            tracing::info!(pid, status = ?status, "Process status updated");
            entry.status = status;
        }
    }

    pub async fn remove(&self, pid: u32) -> Option<BackgroundProcess> {
        let removed = self.processes.write().await.remove(&pid);
        if removed.is_some() {
            tracing::info!(pid, "Process unregistered");
        }
        removed.map(|e| e.descriptor)
    }

    /// SIGTERM the process group, wait out the grace window, then SIGKILL
    pub async fn terminate(&self, pid: u32) -> Result<()> {
        terminate_process_group(pid, constants::PROCESS_TERMINATE_GRACE).await?;
        self.update_status(pid, ProcessStatus::Killed).await;
        Ok(())
    }

    /// Terminate every running process (called on shutdown)
    pub async fn kill_all(&self) {
        for process in self.running().await {
            if let Err(e) = self.terminate(process.pid).await {
                tracing::warn!(pid = process.pid, error = %e, "Failed to terminate process on shutdown");
            }
        }
    }
}

/// Whether `pid` refers to a live process
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 performs the permission and existence checks only
    let rc = unsafe { libc::kill(pid, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
async fn terminate_process_group(pid: u32, grace: Duration) -> Result<()> {
    let pgid = libc::pid_t::try_from(pid).context("PID out of range")?;

    // Negative PID targets the whole group; fall back to the single process
    let rc = unsafe { libc::kill(-pgid, libc::SIGTERM) };
    if rc != 0 {
        let rc = unsafe { libc::kill(pgid, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                return Ok(());
            }
            return Err(err).context(format!("Failed to signal process {}", pid));
        }
    }

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !is_process_alive(pid) {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    tracing::warn!(pid, grace_ms = grace.as_millis() as u64, "Process ignored SIGTERM, sending SIGKILL");
    unsafe {
        if libc::kill(-pgid, libc::SIGKILL) != 0 {
            libc::kill(pgid, libc::SIGKILL);
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_process_group(pid: u32, _grace: Duration) -> Result<()> {
    let output = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .output()
        .context("Failed to run taskkill")?;
    if !output.status.success() {
        bail!("taskkill failed for process {}", pid);
    }
    Ok(())
}
