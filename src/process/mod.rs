// Process management: background services with owned handles, plus one-shot
// setup commands behind a runner seam.

pub mod error;
pub mod runner;
pub mod spawn;
pub mod terminate;
pub mod types;

pub use error::LaunchError;
pub use runner::{CommandOutput, CommandRunner, StepCommand, SystemRunner};
pub use spawn::{PendingService, ReadinessWait, read_capture, spawn_service, start_service};
pub use terminate::{describe_exit, is_alive, terminate, terminate_matching};
pub use types::{PreStart, ServiceDescriptor, ServiceHandle, ServiceRecord, TerminateOutcome};
