use core::time::Duration;
use std::{path::Path, process::Stdio};

use anyhow::{Context as _, Result, bail};
use tokio::{
    process::{Child, Command},
    sync::Mutex,
};
use tracing::{info, warn};

/// Tracks the server process this bridge started. Only one child at a time.
///
/// Owned by the host for the life of the process, so a reload never forgets a
/// running child.
#[derive(Debug, Default)]
pub struct Launcher {
    child: Mutex<Option<Child>>,
}

impl Launcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `argv` in `dir`.
    ///
    /// # Errors
    ///
    /// Fails when `argv` is empty, a child started earlier is still running, or
    /// the spawn fails.
    pub async fn start(&self, argv: &[String], dir: &Path) -> Result<()> {
        let Some((program, args)) = argv
            .split_first()
            .filter(|(program, _)| !program.trim().is_empty())
        else {
            bail!("no launch command is configured for the server");
        };
        let mut child = self.child.lock().await;
        if let Some(running) = child.as_mut()
            && running.try_wait()?.is_none()
        {
            bail!("the server process is already running");
        }
        let spawned = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("launching {program} in {}", dir.display()))?;
        info!(pid = ?spawned.id(), program = %program, "Server process started");
        *child = Some(spawned);
        Ok(())
    }

    /// Waits up to `timeout` for a child started here to exit. `true` when it
    /// has exited or none was started.
    pub async fn wait_exit(&self, timeout: Duration) -> bool {
        let mut child = self.child.lock().await;
        let Some(running) = child.as_mut() else {
            return true;
        };
        match tokio::time::timeout(timeout, running.wait()).await {
            Ok(Ok(status)) => {
                info!(%status, "Server process exited");
                *child = None;
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Waiting for the server process failed");
                false
            }
            Err(_) => false,
        }
    }

    /// Whether a child started here is still alive.
    pub async fn is_running(&self) -> bool {
        let mut child = self.child.lock().await;
        child
            .as_mut()
            .is_some_and(|c| matches!(c.try_wait(), Ok(None)))
    }
}
