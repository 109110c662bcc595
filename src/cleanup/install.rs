use std::sync::OnceLock;

use anyhow::{Result, bail};
use tracing::{debug, warn};

use super::registry::CleanupRegistry;

/// Signals that end a session. Each drains the registry before exit.
pub const TERMINATION_SIGNALS: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

static INSTALLED: OnceLock<CleanupRegistry> = OnceLock::new();

/// Drains the registry when dropped, covering normal and error returns.
#[must_use = "dropping the guard runs cleanup immediately"]
pub struct ExitGuard {
    registry: CleanupRegistry,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.registry.run_all();
    }
}

/// Make `registry` the process's termination hook.
///
/// Blocks [`TERMINATION_SIGNALS`] in the calling thread and starts a thread
/// that waits for them with `sigwait`; on delivery it drains the registry and
/// exits with `128 + signo`. Call this before spawning any other thread so the
/// mask is inherited everywhere. A panic hook drains the registry as well.
///
/// Installing again composes: a different registry is chained into the
/// installed one and drained with it, and the same registry is a no-op.
pub fn install(registry: &CleanupRegistry) -> Result<ExitGuard> {
    let guard = ExitGuard {
        registry: registry.clone(),
    };

    if let Some(installed) = INSTALLED.get() {
        if !installed.same_as(registry) {
            let chained = registry.clone();
            installed.register("chained cleanup registry", move || {
                chained.run_all();
                Ok(())
            });
        }
        debug!("cleanup hook already installed");
        return Ok(guard);
    }

    let set = block_termination_signals()?;
    let waiter = registry.clone();
    std::thread::Builder::new()
        .name("devstack-signals".into())
        .spawn(move || wait_for_signal(set, waiter))?;

    let on_panic = registry.clone();
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        original_hook(info);
        on_panic.try_run_all();
    }));

    let _ = INSTALLED.set(registry.clone());
    Ok(guard)
}

fn block_termination_signals() -> Result<libc::sigset_t> {
    // SAFETY: `set` is a plain C struct initialised by sigemptyset before any
    // other use, and pthread_sigmask only reads it.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        for signal in TERMINATION_SIGNALS {
            libc::sigaddset(&mut set, signal);
        }
        let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut());
        if rc != 0 {
            bail!(
                "failed to block termination signals: {}",
                std::io::Error::from_raw_os_error(rc)
            );
        }
        Ok(set)
    }
}

fn wait_for_signal(set: libc::sigset_t, registry: CleanupRegistry) {
    loop {
        let mut signal: libc::c_int = 0;
        // SAFETY: `set` holds only the blocked termination signals and
        // `signal` is a valid out-pointer for the duration of the call.
        let rc = unsafe { libc::sigwait(&set, &mut signal) };
        if rc != 0 {
            continue;
        }

        warn!(signal = signal_name(signal), "received termination signal, cleaning up");
        registry.run_all();
        std::process::exit(128 + signal);
    }
}

pub fn signal_name(signal: libc::c_int) -> &'static str {
    match signal {
        libc::SIGINT => "SIGINT",
        libc::SIGTERM => "SIGTERM",
        libc::SIGHUP => "SIGHUP",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGKILL => "SIGKILL",
        _ => "signal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn exit_guard_drains_on_drop() {
        let registry = CleanupRegistry::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        registry.register("flag", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        {
            let _guard = ExitGuard {
                registry: registry.clone(),
            };
        }
        assert!(ran.load(Ordering::SeqCst));
        assert!(registry.is_empty());
    }

    #[test]
    fn exit_guard_drains_during_unwind() {
        let registry = CleanupRegistry::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        registry.register("flag", move || {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        let guarded = registry.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = ExitGuard { registry: guarded };
            panic!("setup step exploded");
        }));
        assert!(result.is_err());
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn signal_names_cover_the_termination_set() {
        for signal in TERMINATION_SIGNALS {
            assert_ne!(signal_name(signal), "signal");
        }
    }
}
