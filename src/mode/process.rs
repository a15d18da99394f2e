//! Mode subprocess supervision
//!
//! The hub runs the security monitor and the conversation agent as external
//! processes. Starting is idempotent. Stopping sends SIGTERM, waits out the
//! grace period, then kills; the tracked handle is cleared whatever happens.

use super::state::ProcessKind;
use crate::config::ProcessConfig;
use crate::error::{NodeError, NodeResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
}

fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    unsafe {
        let signo = match signal {
            Signal::Term => libc::SIGTERM,
        };
        if libc::kill(pid as i32, signo) != 0 {
            tracing::debug!(
                "Failed to send signal {} to pid {}: {}",
                signo,
                pid,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        let _ = signal;
        tracing::debug!("Graceful termination unsupported on this platform");
    }
}

/// Owns the running mode subprocesses
pub struct Supervisor {
    commands: HashMap<ProcessKind, Vec<String>>,
    running: Mutex<HashMap<ProcessKind, Child>>,
    grace: Duration,
}

impl Supervisor {
    pub fn new(config: &ProcessConfig) -> Self {
        let mut commands = HashMap::new();
        if let Some(argv) = config.security_command.clone().filter(|a| !a.is_empty()) {
            commands.insert(ProcessKind::Security, argv);
        }
        if let Some(argv) = config.conversation_command.clone().filter(|a| !a.is_empty()) {
            commands.insert(ProcessKind::Conversation, argv);
        }
        Self {
            commands,
            running: Mutex::new(HashMap::new()),
            grace: Duration::from_secs(config.stop_grace_secs),
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Start the subprocess for `kind` unless it is already running
    ///
    /// Returns `Ok(true)` if a process was spawned, `Ok(false)` if one was
    /// already running or none is configured.
    pub fn start(&self, kind: ProcessKind) -> NodeResult<bool> {
        let Some(argv) = self.commands.get(&kind) else {
            return Ok(false);
        };

        let mut running = self.running.lock();
        if let Some(child) = running.get_mut(&kind) {
            match child.try_wait() {
                Ok(None) => {
                    tracing::debug!("{} process already running", kind.as_str());
                    return Ok(false);
                }
                Ok(Some(status)) => {
                    tracing::info!("{} process had exited ({}), restarting", kind.as_str(), status);
                }
                Err(e) => {
                    tracing::warn!("Could not poll {} process: {}", kind.as_str(), e);
                }
            }
            running.remove(&kind);
        }

        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to start {} process {:?}: {}", kind.as_str(), argv, e);
                NodeError::SubprocessFailure(format!("{}: {}", argv[0], e))
            })?;

        tracing::info!(
            "Started {} process (pid {:?})",
            kind.as_str(),
            child.id()
        );
        running.insert(kind, child);
        Ok(true)
    }

    /// Stop tracking the subprocess for `kind` and hand it back for termination
    ///
    /// Runs synchronously so a `start` issued right after cannot see the old
    /// child as still running.
    pub fn detach(&self, kind: ProcessKind) -> Option<DetachedProcess> {
        let child = self.running.lock().remove(&kind)?;
        Some(DetachedProcess {
            kind,
            child,
            grace: self.grace,
        })
    }

    /// Stop the subprocess for `kind`, forcing it after the grace period
    pub async fn stop(&self, kind: ProcessKind) {
        if let Some(process) = self.detach(kind) {
            process.terminate().await;
        }
    }

    pub async fn stop_all(&self) {
        for kind in [ProcessKind::Security, ProcessKind::Conversation] {
            self.stop(kind).await;
        }
    }

    pub fn is_running(&self, kind: ProcessKind) -> bool {
        let mut running = self.running.lock();
        match running.get_mut(&kind) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

/// A subprocess no longer tracked by the supervisor, awaiting termination
pub struct DetachedProcess {
    kind: ProcessKind,
    child: Child,
    grace: Duration,
}

impl DetachedProcess {
    /// SIGTERM, wait out the grace period, then kill
    pub async fn terminate(mut self) {
        let kind = self.kind;
        if let Some(pid) = self.child.id() {
            send_signal(pid, Signal::Term);
        }

        match tokio::time::timeout(self.grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!("{} process exited: {}", kind.as_str(), status);
            }
            Ok(Err(e)) => {
                tracing::warn!("Error waiting for {} process: {}", kind.as_str(), e);
            }
            Err(_) => {
                tracing::warn!(
                    "{} process ignored SIGTERM for {:?}, killing",
                    kind.as_str(),
                    self.grace
                );
                if let Err(e) = self.child.kill().await {
                    tracing::error!("Failed to kill {} process: {}", kind.as_str(), e);
                }
            }
        }
    }
}
