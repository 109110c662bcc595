use std::path::Path;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::types::{ServiceHandle, TerminateOutcome};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Stop a service: SIGTERM to its process group, then SIGKILL if it is still
/// running after `grace`. The child is always reaped.
pub fn terminate(handle: &mut ServiceHandle, grace: Duration) -> Result<()> {
    info!(service = %handle.name, pid = handle.pid, "stopping service");
    terminate_child(&mut handle.child, grace)
        .with_context(|| format!("failed to stop {}", handle.name))
}

/// Same as [`terminate`] for a bare child spawned with `process_group(0)`.
pub(crate) fn terminate_child(child: &mut Child, grace: Duration) -> Result<()> {
    if let Some(status) = child.try_wait()? {
        debug!(pid = child.id(), "already exited: {}", describe_exit(&status));
        return Ok(());
    }

    let pgid = child.id() as libc::pid_t;
    signal_group(pgid, libc::SIGTERM)?;

    let start = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        if start.elapsed() >= grace {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    warn!(pid = pgid, "did not exit within {grace:?}, sending SIGKILL");
    signal_group(pgid, libc::SIGKILL)?;
    child.wait()?;
    Ok(())
}

fn signal_group(pgid: libc::pid_t, signal: libc::c_int) -> Result<()> {
    // SAFETY: killpg has no memory-safety preconditions; a stale group id at
    // worst yields ESRCH, handled below.
    let rc = unsafe { libc::killpg(pgid, signal) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(err).with_context(|| format!("failed to signal process group {pgid}"))
}

/// Whether a process with this pid exists.
pub fn is_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only performs the existence and permission check.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Send SIGTERM to every process (other than this one) whose name contains
/// `pattern`. The name is the kernel's `comm` or the basename of `argv[0]`;
/// arguments are never matched, so a viewer open on `gpg-agent.conf` is not
/// an agent.
///
/// Finding nothing is [`TerminateOutcome::NotRunning`], and a process that
/// vanishes between the scan and the signal counts as already gone. A refused
/// signal (e.g. `EPERM` on another user's process) does not stop the sweep;
/// refusals are reported as [`TerminateOutcome::Partial`].
pub fn terminate_matching(pattern: &str) -> Result<TerminateOutcome> {
    terminate_matching_in(Path::new("/proc"), pattern, |pid| {
        // SAFETY: plain syscall on a pid read from procfs.
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc == 0 {
            Ok(())
        } else {
            Err(std::io::Error::last_os_error())
        }
    })
}

fn terminate_matching_in<F>(proc_root: &Path, pattern: &str, mut signal: F) -> Result<TerminateOutcome>
where
    F: FnMut(u32) -> std::io::Result<()>,
{
    if pattern.is_empty() {
        bail!("refusing to match every process with an empty pattern");
    }

    let own_pid = std::process::id();
    let mut terminated = 0;
    let mut refused = 0;
    for pid in matching_pids(proc_root, pattern) {
        if pid == own_pid {
            continue;
        }
        match signal(pid) {
            Ok(()) => {
                debug!(pid, pattern, "sent SIGTERM");
                terminated += 1;
            }
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {}
            Err(err) => {
                warn!(pid, pattern, "could not terminate: {err}");
                refused += 1;
            }
        }
    }

    Ok(match (terminated, refused) {
        (0, 0) => TerminateOutcome::NotRunning,
        (n, 0) => TerminateOutcome::Terminated(n),
        (terminated, refused) => TerminateOutcome::Partial {
            terminated,
            refused,
        },
    })
}

fn matching_pids(proc_root: &Path, pattern: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = WalkDir::new(proc_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let pid: u32 = entry.file_name().to_str()?.parse().ok()?;
            process_names(entry.path())
                .iter()
                .any(|name| name.contains(pattern))
                .then_some(pid)
        })
        .collect();
    pids.sort_unstable();
    pids
}

/// `comm` plus the basename of `argv[0]`; the latter survives the kernel's
/// 15-byte truncation of `comm`.
fn process_names(proc_dir: &Path) -> Vec<String> {
    let mut names = Vec::with_capacity(2);
    if let Ok(comm) = std::fs::read_to_string(proc_dir.join("comm")) {
        names.push(comm.trim_end().to_string());
    }
    if let Ok(raw) = std::fs::read(proc_dir.join("cmdline"))
        && let Some(argv0) = raw.split(|b| *b == 0).next()
        && !argv0.is_empty()
    {
        let argv0 = String::from_utf8_lossy(argv0);
        let base = argv0.rsplit('/').next().unwrap_or_default();
        names.push(base.to_string());
    }
    names
}

/// Human-readable exit status.
pub fn describe_exit(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with code {code}"),
        (None, Some(signal)) => {
            let name = crate::cleanup::signal_name(signal);
            if name == "signal" {
                format!("killed by signal {signal}")
            } else {
                format!("killed by {name} (signal {signal})")
            }
        }
        (None, None) => "exited (unknown status)".to_string(),
    }
}
