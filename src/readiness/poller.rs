use std::time::Duration;

/// Outcome of [`wait_ready`]. Exhausting the budget is a value, not an error,
/// so callers decide whether a missing service is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            Readiness::Ready { attempts } | Readiness::TimedOut { attempts } => attempts,
        }
    }
}

/// Call `check` up to `max_attempts` times, sleeping `interval` between calls,
/// until it returns true.
///
/// There is no sleep after the final attempt, so a check that succeeds on
/// attempt `k` returns after roughly `(k - 1) * interval` plus the time spent
/// in `check` itself.
pub fn wait_ready<F>(mut check: F, max_attempts: u32, interval: Duration) -> Readiness
where
    F: FnMut() -> bool,
{
    for attempt in 1..=max_attempts {
        if check() {
            return Readiness::Ready { attempts: attempt };
        }
        if attempt < max_attempts {
            std::thread::sleep(interval);
        }
    }
    Readiness::TimedOut {
        attempts: max_attempts,
    }
}
