use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Result of a best-effort permission change on an optional path.
#[derive(Debug)]
pub enum PermissionOutcome {
    Applied,
    /// The path does not exist; nothing to fix.
    Absent,
    /// The change was attempted and refused. Logged, never fatal.
    Failed(io::Error),
}

/// Set `mode` on a path that must exist.
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, Permissions::from_mode(mode))
        .with_context(|| format!("failed to chmod {mode:o} {}", path.display()))
}

/// Set `mode` on a path that may legitimately be missing.
pub fn set_mode_optional(path: &Path, mode: u32) -> PermissionOutcome {
    match std::fs::set_permissions(path, Permissions::from_mode(mode)) {
        Ok(()) => {
            debug!(path = %path.display(), "chmod {mode:o}");
            PermissionOutcome::Applied
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => PermissionOutcome::Absent,
        Err(err) => {
            warn!(path = %path.display(), "could not chmod {mode:o}: {err}");
            PermissionOutcome::Failed(err)
        }
    }
}

/// Owner-only access for a key directory: the directory itself gets `0700`
/// and every regular file directly inside it `0600`.
pub fn restrict_key_dir(dir: &Path) -> Result<usize> {
    set_mode(dir, 0o700)?;
    let mut files = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("failed to list {}", dir.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            set_mode(&entry.path(), 0o600)?;
            files += 1;
        }
    }
    Ok(files)
}
