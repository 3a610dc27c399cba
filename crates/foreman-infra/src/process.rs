//! Worker child-process pool.
//!
//! Workers are local child processes of the controller, re-invoking the
//! current executable's `worker` subcommand. Children are killed when the
//! pool shuts down (and on drop, as a backstop).

use std::path::Path;

use tokio::process::{Child, Command};

/// Handle on the spawned worker processes.
pub struct WorkerPool {
    children: Vec<Child>,
}

impl WorkerPool {
    /// Spawn `count` workers, each running `<current-exe> worker --id N`.
    pub fn spawn(count: u32, config_path: Option<&Path>) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        Self::spawn_with_exe(&exe, count, config_path)
    }

    /// Spawn workers from an explicit executable path.
    pub fn spawn_with_exe(
        exe: &Path,
        count: u32,
        config_path: Option<&Path>,
    ) -> std::io::Result<Self> {
        let mut children = Vec::with_capacity(count as usize);
        for id in 0..count {
            let mut command = Command::new(exe);
            command.arg("worker").arg("--id").arg(id.to_string());
            if let Some(path) = config_path {
                command.arg("--config").arg(path);
            }
            command.kill_on_drop(true);
            let child = command.spawn()?;
            tracing::info!(id, pid = child.id(), "worker process spawned");
            children.push(child);
        }
        Ok(Self { children })
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Kill every worker and wait for it to exit.
    pub async fn shutdown(mut self) {
        for child in &mut self.children {
            let pid = child.id();
            if let Err(e) = child.kill().await {
                tracing::warn!(pid, error = %e, "failed to kill worker process");
            }
        }
    }
}
