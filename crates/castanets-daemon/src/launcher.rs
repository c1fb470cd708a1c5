//! Spawns renderer workers as child processes.

use castanets_core::{LaunchError, Launcher};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tokio::runtime::Handle;

/// Launches `service_path` for each request.
///
/// `argv[0]` becomes the child's program name on Unix; the remaining entries
/// are its arguments. The executable never comes from the peer.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    service_path: PathBuf,
    runtime: Handle,
}

impl ProcessLauncher {
    /// Create a launcher whose children are reaped on `runtime`.
    pub fn new(service_path: impl Into<PathBuf>, runtime: Handle) -> Self {
        Self {
            service_path: service_path.into(),
            runtime,
        }
    }

    fn command(&self, argv: &[String]) -> Command {
        let mut command = Command::new(&self.service_path);
        if let Some((program_name, args)) = argv.split_first() {
            #[cfg(unix)]
            command.arg0(program_name);
            #[cfg(not(unix))]
            let _ = program_name;
            command.args(args);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        command
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, argv: &[String]) -> Result<(), LaunchError> {
        let _guard = self.runtime.enter();
        let mut child = self.command(argv).spawn().map_err(|e| {
            LaunchError::new(format!("{}: {}", self.service_path.display(), e))
        })?;

        let pid = child.id();
        tracing::debug!("Spawned worker pid {:?}", pid);
        self.runtime.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::debug!("Worker pid {:?} exited", pid);
                }
                Ok(status) => tracing::warn!("Worker pid {:?} exited with {}", pid, status),
                Err(e) => tracing::warn!("Failed to wait for worker pid {:?}: {}", pid, e),
            }
        });
        Ok(())
    }
}
