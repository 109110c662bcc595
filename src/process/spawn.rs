use std::fs::File;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use super::error::LaunchError;
use super::terminate::{describe_exit, terminate_child};
use super::types::{PreStart, ServiceDescriptor, ServiceHandle};
use crate::readiness::{Readiness, wait_ready};

/// Grace given to a service that never became ready before it is killed.
const UNREADY_GRACE: Duration = Duration::from_secs(2);

/// A spawned service whose readiness has not been confirmed yet.
#[derive(Debug)]
pub struct PendingService {
    descriptor: ServiceDescriptor,
    handle: ServiceHandle,
}

impl PendingService {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid
    }

    /// Separate the readiness check from the process handle, so the handle can
    /// be owned (and stopped) by someone else while the check runs.
    pub fn split(self) -> (ReadinessWait, ServiceHandle) {
        (
            ReadinessWait {
                descriptor: self.descriptor,
            },
            self.handle,
        )
    }

    /// Poll the descriptor's probe within its retry budget.
    ///
    /// On timeout the half-started process is stopped and the error carries
    /// whatever it wrote to its capture file.
    pub fn await_ready(self) -> Result<ServiceHandle, LaunchError> {
        let (wait, mut handle) = self.split();
        match wait.wait() {
            Readiness::Ready { .. } => Ok(handle),
            Readiness::TimedOut { attempts } => Err(wait.timed_out(attempts, Some(&mut handle))),
        }
    }
}

/// The readiness half of a [`PendingService`]. Holds no process, only the
/// probe and where the service writes its output.
#[derive(Debug)]
pub struct ReadinessWait {
    descriptor: ServiceDescriptor,
}

impl ReadinessWait {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn wait(&self) -> Readiness {
        let descriptor = &self.descriptor;
        debug!(
            service = %descriptor.name,
            probe = %descriptor.probe.describe(),
            attempts = descriptor.max_attempts,
            "waiting for readiness"
        );
        let readiness = wait_ready(
            || descriptor.probe.check(),
            descriptor.max_attempts,
            descriptor.interval,
        );
        if let Readiness::Ready { attempts } = readiness {
            info!(service = %descriptor.name, attempts, "service ready");
        }
        readiness
    }

    /// Build the timeout error. A still-running process behind `handle` is
    /// stopped first; `None` means someone else already took it over.
    pub fn timed_out(self, attempts: u32, handle: Option<&mut ServiceHandle>) -> LaunchError {
        let mut exit = None;
        if let Some(handle) = handle {
            exit = handle
                .child
                .try_wait()
                .ok()
                .flatten()
                .map(|status| describe_exit(&status));
            if exit.is_none()
                && let Err(err) = terminate_child(&mut handle.child, UNREADY_GRACE)
            {
                warn!(service = %self.descriptor.name, "failed to stop unready service: {err:#}");
            }
        }
        LaunchError::ReadinessTimeout {
            service: self.descriptor.name,
            attempts,
            exit,
            log: read_capture(&self.descriptor.capture_path),
        }
    }
}

/// Run pre-start actions and spawn the service in its own process group, with
/// combined output redirected to the descriptor's capture file.
pub fn spawn_service(descriptor: ServiceDescriptor) -> Result<PendingService, LaunchError> {
    let spawn_error = |descriptor: &ServiceDescriptor, source: anyhow::Error| LaunchError::Spawn {
        service: descriptor.name.clone(),
        source,
        log: read_capture(&descriptor.capture_path),
    };

    if let Err(err) = run_pre_start(&descriptor.pre_start) {
        return Err(spawn_error(&descriptor, err));
    }

    let (stdout, stderr) = match open_capture(&descriptor.capture_path) {
        Ok(pair) => pair,
        Err(err) => return Err(spawn_error(&descriptor, err)),
    };

    info!(service = %descriptor.name, command = %descriptor.command_line(), "starting service");
    let child = Command::new(&descriptor.program)
        .args(&descriptor.args)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .with_context(|| format!("failed to spawn `{}`", descriptor.program));

    let child = match child {
        Ok(child) => child,
        Err(err) => return Err(spawn_error(&descriptor, err)),
    };

    let handle = ServiceHandle {
        name: descriptor.name.clone(),
        pid: child.id(),
        capture_path: descriptor.capture_path.clone(),
        child,
    };
    Ok(PendingService { descriptor, handle })
}

/// Spawn a service and block until it is ready or its budget is spent.
pub fn start_service(descriptor: ServiceDescriptor) -> Result<ServiceHandle, LaunchError> {
    spawn_service(descriptor)?.await_ready()
}

fn run_pre_start(actions: &[PreStart]) -> anyhow::Result<()> {
    for action in actions {
        match action {
            PreStart::RemoveFile(path) => match std::fs::remove_file(path) {
                Ok(()) => info!(path = %path.display(), "removed stale file"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("failed to remove {}", path.display()));
                }
            },
        }
    }
    Ok(())
}

fn open_capture(path: &Path) -> anyhow::Result<(File, File)> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create capture file {}", path.display()))?;
    let dup = file
        .try_clone()
        .context("failed to duplicate capture file handle")?;
    Ok((file, dup))
}

/// Read a capture file for diagnostics. Missing or unreadable files read as
/// empty; invalid UTF-8 is replaced.
pub fn read_capture(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}
