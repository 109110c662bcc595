use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};

use anyhow::Result;
use tracing::{debug, info, warn};

type Action = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

struct Entry {
    label: String,
    action: Action,
}

#[derive(Default)]
struct Inner {
    pending: Mutex<Vec<Entry>>,
    // Held for the whole of `run_all` so a second caller waits for the first
    // drain to finish instead of returning while actions are still running.
    draining: Mutex<()>,
}

/// Counts from one drain of the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub ran: usize,
    pub failed: usize,
}

/// Ordered list of cleanup actions for one session.
///
/// Actions run in reverse registration order, each at most once. Clones share
/// the same list, so any thread or signal path holding a clone can register or
/// drain.
#[derive(Clone, Default)]
pub struct CleanupRegistry {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action. Never replaces earlier registrations.
    pub fn register<F>(&self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let label = label.into();
        debug!(cleanup = %label, "registered cleanup action");
        lock(&self.inner.pending).push(Entry {
            label,
            action: Box::new(action),
        });
    }

    /// True when both handles share one list.
    pub fn same_as(&self, other: &CleanupRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of actions waiting to run.
    pub fn len(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels of pending actions in registration order.
    pub fn labels(&self) -> Vec<String> {
        lock(&self.inner.pending)
            .iter()
            .map(|entry| entry.label.clone())
            .collect()
    }

    /// Run every pending action, newest first.
    ///
    /// A failing or panicking action is logged and skipped; the remaining
    /// actions still run. Actions registered while draining run in the same
    /// drain.
    pub fn run_all(&self) -> CleanupReport {
        let _drain = lock(&self.inner.draining);
        self.drain_pending()
    }

    /// Like [`run_all`](Self::run_all), but returns `None` instead of waiting
    /// when a drain is already in progress. Used from the panic hook, which
    /// can fire on the draining thread itself.
    pub fn try_run_all(&self) -> Option<CleanupReport> {
        let _drain = match self.inner.draining.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return None,
        };
        Some(self.drain_pending())
    }

    fn drain_pending(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        loop {
            let next = lock(&self.inner.pending).pop();
            let Some(Entry { label, action }) = next else {
                break;
            };

            report.ran += 1;
            match catch_unwind(AssertUnwindSafe(action)) {
                Ok(Ok(())) => debug!(cleanup = %label, "cleanup action finished"),
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(cleanup = %label, "cleanup action failed: {err:#}");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(cleanup = %label, "cleanup action panicked");
                }
            }
        }

        if report.ran > 0 {
            info!(
                ran = report.ran,
                failed = report.failed,
                "session cleanup complete"
            );
        }
        report
    }
}

// A panic inside an action happens outside the lock, so poisoning can only come
// from a panic in this module's own bookkeeping; the data is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
