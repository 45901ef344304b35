// src/tracking/inhibit.rs
//! Wake lock backed by `systemd-inhibit`.
//!
//! Each handle is a child process holding an idle/sleep inhibitor lock for
//! as long as it runs. If the child exits on its own (logind restarted,
//! process killed, policy denial) the handle is reported as revoked.

use super::wake_lock::{RevocationSender, WakeLockError, WakeLockHandle, WakeLockPlatform};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::sync::oneshot;

const INHIBIT_PROGRAM: &str = "systemd-inhibit";

pub struct InhibitPlatform {
    program: Option<PathBuf>,
    next_id: u64,
    held: HashMap<WakeLockHandle, oneshot::Sender<()>>,
}

impl InhibitPlatform {
    /// Locate `systemd-inhibit` on `PATH`
    pub fn detect() -> Self {
        Self::with_program(find_in_path(INHIBIT_PROGRAM))
    }

    pub fn with_program(program: Option<PathBuf>) -> Self {
        Self {
            program,
            next_id: 0,
            held: HashMap::new(),
        }
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

#[async_trait]
impl WakeLockPlatform for InhibitPlatform {
    fn is_supported(&self) -> bool {
        self.program.is_some()
    }

    async fn acquire(
        &mut self,
        revoked: RevocationSender,
    ) -> std::result::Result<WakeLockHandle, WakeLockError> {
        let Some(program) = &self.program else {
            return Err(WakeLockError::Unsupported);
        };
        // Handles whose child already exited were revoked, not released
        self.held.retain(|_, release_tx| !release_tx.is_closed());

        let mut child = Command::new(program)
            .args([
                "--what=idle:sleep",
                "--who=dtracked",
                "--why=Route tracking in progress",
                "--mode=block",
                "sleep",
                "infinity",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WakeLockError::AcquisitionFailed(e.to_string()))?;

        self.next_id += 1;
        let handle = WakeLockHandle::new(self.next_id);
        let (release_tx, release_rx) = oneshot::channel();
        self.held.insert(handle, release_tx);

        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    tracing::debug!(?status, handle = handle.id(), "Inhibitor process exited");
                    let _ = revoked.send(handle);
                }
                _ = release_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::debug!(error = %e, "Failed to stop inhibitor process");
                    }
                }
            }
        });

        Ok(handle)
    }

    async fn release(&mut self, handle: WakeLockHandle) {
        if let Some(release_tx) = self.held.remove(&handle) {
            let _ = release_tx.send(());
        }
    }
}
