use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::process::{ServiceRecord, is_alive};

/// Services started by devstack that may still be running. Sessions add
/// their services after each launch wave and take them out again at exit;
/// services handed off with `start` stay listed while they live.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub services: Vec<ServiceRecord>,
}

impl Manifest {
    /// Read the manifest at `path`. A missing file reads as `None`.
    pub fn read(path: &Path) -> Result<Option<Manifest>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()));
            }
        };
        let manifest = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(manifest))
    }

    /// Write atomically: a reader never sees a half-written file.
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize manifest")?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("failed to move manifest into {}", path.display()))
    }

    /// Entries from an earlier run whose process is still alive and whose
    /// name is not being replaced.
    fn carried_over(self, replaced: impl Fn(&ServiceRecord) -> bool) -> Vec<ServiceRecord> {
        self.services
            .into_iter()
            .filter(|record| !replaced(record) && is_alive(record.pid))
            .collect()
    }
}

/// Record `owned` in the manifest, keeping live entries left by other runs.
pub fn publish(path: &Path, owned: &[ServiceRecord]) -> Result<()> {
    let mut services = Manifest::read(path)?
        .unwrap_or_default()
        .carried_over(|record| owned.iter().any(|own| own.name == record.name));
    services.extend_from_slice(owned);
    debug!(path = %path.display(), services = services.len(), "writing session manifest");
    Manifest { services }.write(path)
}

/// Drop the entries with `owned_pids` (and any dead ones). The file is
/// removed once nothing live is left in it.
pub fn retire(path: &Path, owned_pids: &[u32]) -> Result<()> {
    let Some(manifest) = Manifest::read(path)? else {
        return Ok(());
    };
    let remaining = manifest.carried_over(|record| owned_pids.contains(&record.pid));
    if remaining.is_empty() {
        return match std::fs::remove_file(path) {
            Ok(()) => {
                debug!(path = %path.display(), "removed session manifest");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
        };
    }
    Manifest {
        services: remaining,
    }
    .write(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn record(name: &str, pid: u32) -> ServiceRecord {
        ServiceRecord {
            name: name.into(),
            pid,
            capture_path: PathBuf::from(format!("/tmp/{name}.log")),
        }
    }

    #[test]
    fn missing_manifest_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Manifest::read(&dir.path().join("m.json")).unwrap(), None);
    }

    #[test]
    fn publish_then_retire_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let me = std::process::id();

        publish(&path, &[record("redis", me)]).unwrap();
        let manifest = Manifest::read(&path).unwrap().unwrap();
        assert_eq!(manifest.services, vec![record("redis", me)]);

        retire(&path, &[me]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn live_entries_from_other_runs_survive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        let me = std::process::id();
        // Our own pid stands in for a detached service that is still up.
        Manifest {
            services: vec![record("tor", me), record("xvfb", u32::MAX / 2)],
        }
        .write(&path)
        .unwrap();

        publish(&path, &[record("redis", 1)]).unwrap();
        let names: Vec<String> = Manifest::read(&path)
            .unwrap()
            .unwrap()
            .services
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["tor", "redis"]);

        retire(&path, &[1]).unwrap();
        let left = Manifest::read(&path).unwrap().unwrap();
        assert_eq!(left.services, vec![record("tor", me)]);
    }

    #[test]
    fn corrupt_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Manifest::read(&path).is_err());
    }
}
