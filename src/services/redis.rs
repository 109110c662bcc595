use std::path::Path;

use crate::config::{Config, ServiceKind};
use crate::process::{PreStart, ServiceDescriptor};
use crate::readiness::Probe;

/// In-memory data store. Any persisted dump is removed before launch so the
/// store never loads state from a previous session.
pub fn redis_descriptor(cfg: &Config, root: &Path) -> ServiceDescriptor {
    let redis = &cfg.redis;

    ServiceDescriptor {
        name: ServiceKind::Redis.as_str().to_string(),
        program: redis.program.clone(),
        args: vec![root.join(&redis.config_file).to_string_lossy().into_owned()],
        capture_path: cfg.capture_path(ServiceKind::Redis),
        pre_start: vec![PreStart::RemoveFile(root.join(&redis.dump_file))],
        probe: Probe::RedisPing {
            addr: redis.addr.clone(),
        },
        max_attempts: redis.readiness.attempts,
        interval: redis.readiness.interval(),
    }
}
