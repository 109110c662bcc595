//! Supervisor for the local services of a development and test session.
//!
//! Brings up the anonymity-network daemon, a virtual display, the data store
//! and a remote-display server in dependency order, verifies each one, and
//! guarantees that whatever the session created is torn down when it ends.

pub mod cleanup;
pub mod config;
pub mod demo;
pub mod prepare;
pub mod process;
pub mod readiness;
pub mod services;
pub mod session;

#[cfg(test)]
pub mod test_support;
