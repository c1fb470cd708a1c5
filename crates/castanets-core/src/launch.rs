//! Process launch seam.

/// Starts a worker process from a sanitized argument list.
///
/// `argv[0]` is the program-name slot; the executable itself is chosen by the
/// implementation, never by the peer.
pub trait Launcher: Send + Sync {
    fn launch(&self, argv: &[String]) -> Result<(), LaunchError>;
}

impl<F> Launcher for F
where
    F: Fn(&[String]) -> Result<(), LaunchError> + Send + Sync,
{
    fn launch(&self, argv: &[String]) -> Result<(), LaunchError> {
        self(argv)
    }
}

/// A launch attempt that did not start a process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("launch failed: {reason}")]
pub struct LaunchError {
    reason: String,
}

impl LaunchError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}
