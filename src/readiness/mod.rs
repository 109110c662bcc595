// Readiness polling: bounded retries around side-effect-free probes.

pub mod poller;
pub mod probe;

pub use poller::{Readiness, wait_ready};
pub use probe::Probe;
