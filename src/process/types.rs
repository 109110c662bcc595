use std::path::PathBuf;
use std::process::Child;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::readiness::Probe;

/// Something to do before a service process is spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreStart {
    /// Delete a file if it exists, so the service does not load stale state.
    RemoveFile(PathBuf),
}

/// Everything needed to launch one background service. Consumed by the
/// launcher; only the resulting [`ServiceHandle`] outlives the launch.
#[derive(Debug, Clone)]
pub struct ServiceDescriptor {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    /// Combined stdout/stderr of the service lands here.
    pub capture_path: PathBuf,
    pub pre_start: Vec<PreStart>,
    pub probe: Probe,
    pub max_attempts: u32,
    pub interval: Duration,
}

impl ServiceDescriptor {
    /// The command line as a single shell-quoted string, for logs.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        shell_words::join(parts)
    }
}

/// Owned handle to a running service.
///
/// The handle is the only thing allowed to stop the service. Dropping it
/// leaves the process running; call [`terminate`](Self::terminate) to stop it
/// or [`detach`](Self::detach) to hand it off deliberately.
#[derive(Debug)]
pub struct ServiceHandle {
    pub name: String,
    pub pid: u32,
    pub capture_path: PathBuf,
    pub(crate) child: Child,
}

impl ServiceHandle {
    /// Whether the process has not exited yet.
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Give up ownership, leaving the service running in its own process
    /// group. Returns the pid for the caller's records.
    pub fn detach(self) -> u32 {
        self.pid
    }

    pub fn record(&self) -> ServiceRecord {
        ServiceRecord {
            name: self.name.clone(),
            pid: self.pid,
            capture_path: self.capture_path.clone(),
        }
    }
}

/// Serializable summary of a live service, written to the session manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub pid: u32,
    pub capture_path: PathBuf,
}

/// Result of asking processes to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// This many processes were signalled.
    Terminated(usize),
    /// Nothing matched; already stopped counts as success.
    NotRunning,
    /// Some matches refused the signal, typically with `EPERM`.
    Partial { terminated: usize, refused: usize },
}
