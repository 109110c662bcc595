// Per-service launch recipes. Each builder turns config into a
// `ServiceDescriptor`; nothing here spawns processes.

mod display;
mod redis;
mod tor;
mod vnc;

use std::path::Path;

use crate::config::{Config, ServiceKind};
use crate::process::ServiceDescriptor;

pub use display::display_descriptor;
pub use redis::redis_descriptor;
pub use tor::tor_descriptor;
pub use vnc::{provision_vnc_password, vnc_descriptor};

/// Build the descriptor for `kind` rooted at the repository `root`.
pub fn descriptor(kind: ServiceKind, cfg: &Config, root: &Path) -> ServiceDescriptor {
    match kind {
        ServiceKind::Tor => tor_descriptor(cfg),
        ServiceKind::Xvfb => display_descriptor(cfg),
        ServiceKind::Redis => redis_descriptor(cfg, root),
        ServiceKind::Vnc => vnc_descriptor(cfg),
    }
}

/// Group requested services into launch waves, adding missing dependencies.
/// Within a wave the order follows [`ServiceKind::ALL`].
pub fn launch_waves(requested: &[ServiceKind]) -> Vec<Vec<ServiceKind>> {
    let mut needed: Vec<ServiceKind> = Vec::new();
    let mut stack: Vec<ServiceKind> = requested.to_vec();
    while let Some(kind) = stack.pop() {
        if !needed.contains(&kind) {
            needed.push(kind);
            stack.extend_from_slice(kind.depends_on());
        }
    }

    let depth = needed.iter().map(ServiceKind::wave).max();
    let Some(depth) = depth else {
        return Vec::new();
    };
    (0..=depth)
        .map(|wave| {
            ServiceKind::ALL
                .into_iter()
                .filter(|kind| needed.contains(kind) && kind.wave() == wave)
                .collect()
        })
        .collect()
}
