// Session cleanup: ordered actions drained once at exit, on error, or on signal.

pub mod install;
pub mod registry;

pub use install::{ExitGuard, TERMINATION_SIGNALS, install, signal_name};
pub use registry::{CleanupReport, CleanupRegistry};
